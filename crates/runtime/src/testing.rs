//! Deterministic test runtime. Unlike the teacher's hand-rolled cooperative
//! executor, this one leans on tokio's own paused-time test utilities
//! (`tokio::time::{pause, advance}`): tasks still run on the ambient tokio
//! executor, but `wait` resolves against virtual time, so a test can
//! simulate minutes of keep-alive ticks without sleeping in real time.
//! Randomness is seeded so failures are reproducible.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    time::{
        Duration,
        SystemTime,
    },
};

use async_trait::async_trait;
use common::runtime::{
    JoinError,
    Runtime,
    SpawnHandle,
};
use futures::FutureExt;
use parking_lot::Mutex;
use rand::{
    RngCore,
    SeedableRng,
};
use rand_chacha::ChaCha12Rng;
use uuid::Uuid;

struct Inner {
    rng: Mutex<ChaCha12Rng>,
    origin: SystemTime,
    start: tokio::time::Instant,
}

/// A `Runtime` whose clock advances only when the test calls
/// `tokio::time::advance` (after `tokio::time::pause()`), and whose
/// randomness is a fixed-seed `ChaCha12Rng` for reproducibility.
#[derive(Clone)]
pub struct TestRuntime {
    inner: Arc<Inner>,
}

impl TestRuntime {
    /// `origin` is the wall-clock instant virtual time zero corresponds to;
    /// tests typically use `UNIX_EPOCH` so literal timestamps in scenarios
    /// read naturally.
    pub fn new(seed: u64, origin: SystemTime) -> Self {
        Self {
            inner: Arc::new(Inner {
                rng: Mutex::new(ChaCha12Rng::seed_from_u64(seed)),
                origin,
                start: tokio::time::Instant::now(),
            }),
        }
    }

    /// Advances the simulated clock by `duration`. Pending `wait`s that are
    /// now due resolve on the next `.await` point.
    pub async fn advance(&self, duration: Duration) {
        tokio::time::advance(duration).await;
    }
}

pub struct NoopSpawnHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl SpawnHandle for NoopSpawnHandle {
    fn shutdown(&mut self) {
        self.handle.abort();
    }

    fn join(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), JoinError>> + Send>> {
        async move {
            match self.handle.await {
                Ok(()) => Ok(()),
                Err(e) if e.is_cancelled() => Err(JoinError::Canceled),
                Err(e) => Err(JoinError::Panicked(anyhow::anyhow!("{e}"))),
            }
        }
        .boxed()
    }
}

#[async_trait]
impl Runtime for TestRuntime {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }

    fn spawn(
        &self,
        _name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> Box<dyn SpawnHandle> {
        Box::new(NoopSpawnHandle {
            handle: tokio::spawn(f),
        })
    }

    fn system_time(&self) -> SystemTime {
        self.inner.origin + (tokio::time::Instant::now() - self.inner.start)
    }

    fn fill_random(&self, dest: &mut [u8]) {
        self.inner.rng.lock().fill_bytes(dest)
    }

    fn new_uuid_v4(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.fill_random(&mut bytes);
        Uuid::from_bytes(bytes)
    }
}
