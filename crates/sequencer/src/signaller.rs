//! In-process pub/sub that wakes subscribers when new writes land, so they
//! don't have to poll the store. It carries no authoritative data: a
//! subscriber that misses a notification (slow reader, channel overflow)
//! simply re-reads from [`crate::store::Store`] by counter on its next
//! wake-up, so lost notifications cost at most extra latency, never lost
//! events.

use std::collections::BTreeSet;

use tokio::sync::broadcast;

use crate::types::MemberId;

/// `Some(members)` means events were just persisted addressed to at least
/// those members; `None` means a keep-alive tick advanced the watermark
/// with no new event.
#[derive(Debug, Clone)]
pub enum WriteNotification {
    Wrote(BTreeSet<MemberId>),
    KeepAlive,
}

/// Broadcasts [`WriteNotification`]s to any number of subscribers.
/// Cloning is cheap; every clone shares the same underlying channel.
#[derive(Clone)]
pub struct EventSignaller {
    tx: broadcast::Sender<WriteNotification>,
}

impl EventSignaller {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Called once per committed event batch, after the batch's watermark
    /// advance has been durably written (never before: signalling-before-
    /// durability would let a subscriber wake up and read an event that
    /// isn't watermark-visible yet).
    pub fn notify_write(&self, members: BTreeSet<MemberId>) {
        // `send` only errors when there are no receivers; that's fine, no
        // one is listening for this wake-up.
        let _ = self.tx.send(WriteNotification::Wrote(members));
    }

    pub fn notify_keep_alive(&self) {
        let _ = self.tx.send(WriteNotification::KeepAlive);
    }

    pub fn subscribe(&self) -> EventSignalReceiver {
        EventSignalReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

pub struct EventSignalReceiver {
    rx: broadcast::Receiver<WriteNotification>,
}

impl EventSignalReceiver {
    /// Waits for the next notification relevant to `member`, or for any
    /// keep-alive tick. Lagged notifications are swallowed and treated as
    /// "something changed, re-read" rather than an error, since the
    /// notification itself carries no data a caller could have missed.
    pub async fn recv(&mut self) {
        loop {
            match self.rx.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => return,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keep_alive_wakes_subscribers() {
        let signaller = EventSignaller::new(16);
        let mut rx = signaller.subscribe();
        signaller.notify_keep_alive();
        rx.recv().await;
    }

    #[tokio::test]
    async fn write_notification_wakes_subscribers() {
        let signaller = EventSignaller::new(16);
        let mut rx = signaller.subscribe();
        signaller.notify_write(BTreeSet::from([MemberId(0)]));
        rx.recv().await;
    }
}
