use async_broadcast::{
    broadcast,
    Receiver,
    Sender,
};

/// Broadcast to every task in an instance that it must shut down, carrying
/// the fatal error (if any) that triggered it. A writer pipeline that hits
/// a Store I/O failure or a split-brain conflict signals here; the
/// supervisor observing the signal decides whether to restart the instance.
#[derive(Clone)]
pub struct ShutdownSignal {
    shutdown_tx: Sender<ShutdownMessage>,
    instance_name: String,
}

#[derive(Clone, Debug)]
pub enum ShutdownMessage {
    /// A fatal error occurred; the instance must stop making progress.
    Fatal(String),
    /// An orderly shutdown was requested (e.g. by an operator).
    Requested,
}

impl ShutdownSignal {
    pub fn new(instance_name: String) -> (Self, Receiver<ShutdownMessage>) {
        let (mut tx, rx) = broadcast(1);
        tx.set_overflow(true);
        (
            Self {
                shutdown_tx: tx,
                instance_name,
            },
            rx,
        )
    }

    /// Signals a fatal error. Only the first call has effect; subsequent
    /// calls are no-ops since the channel is already closed out.
    pub fn signal_fatal(&self, error: anyhow::Error) {
        tracing::error!(instance = %self.instance_name, "fatal error, shutting down: {error:#}");
        let _ = self.shutdown_tx.try_broadcast(ShutdownMessage::Fatal(format!("{error:#}")));
    }

    pub fn signal_requested(&self) {
        tracing::info!(instance = %self.instance_name, "shutdown requested");
        let _ = self.shutdown_tx.try_broadcast(ShutdownMessage::Requested);
    }

    /// A fresh receiver, independent of any previously issued one. Used by
    /// components (e.g. each subscription) that need their own view of the
    /// shutdown broadcast rather than sharing the original receiver.
    pub fn subscribe(&self) -> Receiver<ShutdownMessage> {
        self.shutdown_tx.new_receiver()
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn no_op() -> Self {
        let (tx, _rx) = broadcast(1);
        Self {
            shutdown_tx: tx,
            instance_name: "test".to_owned(),
        }
    }
}
