//! Production implementation of the `Runtime` trait.

use std::{
    future::Future,
    pin::Pin,
    time::SystemTime,
};

use async_trait::async_trait;
use common::runtime::{
    JoinError,
    Runtime,
    SpawnHandle,
};
use futures::FutureExt;
use rand::RngCore;
use uuid::Uuid;

pub struct TokioSpawnHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl SpawnHandle for TokioSpawnHandle {
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

/// Runtime for production: sleeps for real wallclock time, spawns onto the
/// ambient tokio runtime, and uses the OS RNG.
#[derive(Clone, Default)]
pub struct ProdRuntime {
    rt: Option<tokio::runtime::Handle>,
}

impl ProdRuntime {
    /// Uses the handle of whatever tokio runtime is currently entered.
    pub fn new() -> anyhow::Result<Self> {
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|_| anyhow::anyhow!("ProdRuntime::new called outside a tokio runtime"))?;
        Ok(Self { rt: Some(rt) })
    }

    fn handle(&self) -> &tokio::runtime::Handle {
        self.rt.as_ref().expect("ProdRuntime used before initialization")
    }
}

#[async_trait]
impl Runtime for ProdRuntime {
    async fn wait(&self, duration: std::time::Duration) {
        tokio::time::sleep(duration).await
    }

    fn spawn(
        &self,
        _name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> Box<dyn SpawnHandle> {
        let handle = self.handle().spawn(f);
        Box::new(TokioSpawnHandle { handle })
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn fill_random(&self, dest: &mut [u8]) {
        rand::thread_rng().fill_bytes(dest)
    }

    fn new_uuid_v4(&self) -> Uuid {
        Uuid::new_v4()
    }
}
