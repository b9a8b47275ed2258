//! Abstraction over the ambient systems the sequencer depends on: wall
//! clock, task spawning, randomness, and UUID generation. Production code
//! uses a tokio-backed implementation; tests use a simulated clock so that
//! scenarios like keep-alive watermark advancement don't need real wall
//! time to pass.

use std::{
    future::Future,
    pin::Pin,
    time::{
        Duration,
        SystemTime,
    },
};

use async_trait::async_trait;
use rand::RngCore;
use uuid::Uuid;

use crate::timestamp::Timestamp;

/// A handle to a spawned task. Dropping it does not cancel the task; call
/// `shutdown` explicitly or use [`shutdown_and_join`].
pub trait SpawnHandle: Send {
    fn shutdown(&mut self);
    fn join(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), JoinError>> + Send>>;
}

#[derive(thiserror::Error, Debug)]
pub enum JoinError {
    #[error("task panicked: {0}")]
    Panicked(anyhow::Error),
    #[error("task was canceled")]
    Canceled,
}

/// Cooperatively shuts down a spawned task and waits for it to finish.
pub async fn shutdown_and_join(mut handle: Box<dyn SpawnHandle>) -> Result<(), JoinError> {
    handle.shutdown();
    handle.join().await
}

/// The systems a sequencer instance needs from its environment. Implemented
/// once for production (tokio + system clock) and once for tests
/// (controllable clock, deterministic RNG).
#[async_trait]
pub trait Runtime: Clone + Send + Sync + 'static {
    /// Suspends the calling task for `duration`.
    async fn wait(&self, duration: Duration);

    /// Spawns `f` to run concurrently, returning a handle that can be used
    /// to request shutdown and observe completion.
    fn spawn(&self, name: &'static str, f: impl Future<Output = ()> + Send + 'static) -> Box<dyn SpawnHandle>;

    /// Wall-clock time. Used only to seed timestamp assignment; never
    /// trusted to be strictly monotone on its own -- see
    /// [`Timestamp::at_least_succ`].
    fn system_time(&self) -> SystemTime;

    fn now(&self) -> Timestamp {
        Timestamp::now(self.system_time())
    }

    /// Fills `dest` with random bytes, used for backoff jitter.
    fn fill_random(&self, dest: &mut [u8]);

    /// A fresh random f32 in `[0, 1)`, used for backoff jitter.
    fn random_f32(&self) -> f32 {
        let mut buf = [0u8; 4];
        self.fill_random(&mut buf);
        (u32::from_le_bytes(buf) as f32) / (u32::MAX as f32)
    }

    /// A fresh v4 UUID, used for instance discriminators and time-proof
    /// message ids.
    fn new_uuid_v4(&self) -> Uuid;
}

/// `rand::Rng`-compatible adapter so callers that already take `impl Rng`
/// (e.g. [`crate::backoff::Backoff::fail`]) can be driven by any `Runtime`.
pub struct RuntimeRng<'a, R: Runtime>(pub &'a R);

impl<'a, R: Runtime> RngCore for RuntimeRng<'a, R> {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.0.fill_random(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.0.fill_random(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_random(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.0.fill_random(dest);
        Ok(())
    }
}
