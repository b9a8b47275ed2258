//! Streams signed, sequenced events to a single member starting at a
//! requested counter. Parks on [`EventSignaller`] between reads instead of
//! polling; a missed wake-up just means the next one re-reads from
//! [`Store`] and catches up, since the signaller carries no authoritative
//! data of its own.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::Duration,
};

use common::{
    Runtime,
    ShutdownMessage,
    Timestamp,
};
use futures::Stream;

use crate::{
    crypto::CryptoOracle,
    signaller::EventSignaller,
    store::Store,
    types::{
        Event,
        Member,
        SignedContent,
    },
};

/// Why a subscription stopped producing events before the client dropped
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEnd {
    /// The member was disabled while subscribed.
    MemberDisabled,
    /// The writer pipeline instance is shutting down (fatal error or
    /// orderly shutdown); the client should reconnect, possibly to
    /// another instance, using the last counter it observed.
    ShuttingDown,
}

/// One item per event delivered to the subscriber, or the terminal
/// server-cancel reason if the stream ends for a reason other than the
/// client dropping it.
pub type SubscriptionItem = Result<SignedContent, SubscriptionEnd>;

struct State<RT, S, C: ?Sized> {
    rt: RT,
    store: Arc<S>,
    crypto: Arc<C>,
    rx: crate::signaller::EventSignalReceiver,
    shutdown_rx: async_broadcast::Receiver<ShutdownMessage>,
    member: Member,
    buffered: VecDeque<Event>,
    next_counter: u64,
    last_delivered: Option<Timestamp>,
    checkpoint_interval: Duration,
    ended: bool,
}

/// Returns a stream whose first item, if any, has `counter >= from_counter`
/// and whose items have strictly increasing counters thereafter. Dropping
/// the stream is the client-cancel path and requires no explicit call.
///
/// Independent of any explicit [`crate::store::Store::acknowledge`] call
/// from the client, an idle stream checkpoints its own last-delivered
/// timestamp every `checkpoint_interval` so reader progress is never fully
/// reliant on client-driven acknowledgement.
pub fn subscribe<RT, S, C>(
    rt: RT,
    store: Arc<S>,
    crypto: Arc<C>,
    signaller: &EventSignaller,
    shutdown_rx: async_broadcast::Receiver<ShutdownMessage>,
    member: Member,
    from_counter: u64,
    checkpoint_interval: Duration,
) -> impl Stream<Item = SubscriptionItem>
where
    RT: Runtime,
    S: Store,
    C: CryptoOracle + ?Sized,
{
    let state = State {
        rt,
        store,
        crypto,
        rx: signaller.subscribe(),
        shutdown_rx,
        member,
        buffered: VecDeque::new(),
        next_counter: from_counter,
        last_delivered: None,
        checkpoint_interval,
        ended: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.ended {
                return None;
            }
            if state.store.is_disabled(&state.member) {
                state.ended = true;
                return Some((Err(SubscriptionEnd::MemberDisabled), state));
            }
            if let Some(event) = state.buffered.pop_front() {
                state.next_counter = event.counter() + 1;
                state.last_delivered = Some(event.timestamp());
                let signed = state.crypto.sign_event(&event, None);
                return Some((Ok(signed), state));
            }
            let fresh = state.store.read_events(&state.member, state.next_counter);
            if !fresh.is_empty() {
                state.buffered.extend(fresh);
                continue;
            }
            tokio::select! {
                biased;
                // Both an explicit shutdown message and the sender being
                // dropped with no message mean the same thing here: the
                // instance is gone and the client must reconnect.
                _ = state.shutdown_rx.recv() => {
                    state.ended = true;
                    return Some((Err(SubscriptionEnd::ShuttingDown), state));
                },
                () = state.rt.wait(state.checkpoint_interval) => {
                    if let Some(ts) = state.last_delivered {
                        state.store.acknowledge(&state.member, ts);
                    }
                    continue;
                },
                () = state.rx.recv() => continue,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use common::Timestamp;
    use futures::StreamExt;
    use runtime::testing::TestRuntime;

    use super::*;
    use crate::{
        crypto::InMemoryCryptoOracle,
        store::InMemoryStore,
        types::MessageId,
    };

    /// Long enough that no test below accidentally hits the checkpoint
    /// branch while exercising something else.
    fn no_checkpoint() -> Duration {
        Duration::from_secs(3600)
    }

    fn deliver(counter: u64, sender: &str) -> Event {
        Event::Deliver {
            counter,
            timestamp: Timestamp::from_micros(counter + 1),
            sender: Member::new(sender),
            message_id: Some(MessageId::new("m").unwrap()),
            payload_ref: None,
            recipients: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn replays_already_durable_events_from_requested_counter() {
        let store = Arc::new(InMemoryStore::new());
        let alice = Member::new("alice");
        store.save_events(&[deliver(0, "alice"), deliver(1, "alice")]).unwrap();
        store.save_watermark(0, Timestamp::from_micros(2), true);

        let crypto = Arc::new(InMemoryCryptoOracle::new(1));
        let signaller = EventSignaller::new(16);
        let (_shutdown, shutdown_rx) = async_broadcast::broadcast(1);
        let rt = TestRuntime::new(0, std::time::UNIX_EPOCH);
        let stream = subscribe(rt, store, crypto, &signaller, shutdown_rx, alice, 1, no_checkpoint());
        futures::pin_mut!(stream);

        let item = stream.next().await.unwrap().unwrap();
        let event: Event = serde_json::from_slice(&item.content_bytes).unwrap();
        assert_eq!(event.counter(), 1);
    }

    #[tokio::test]
    async fn wakes_up_on_new_write_and_terminates_on_shutdown() {
        let store = Arc::new(InMemoryStore::new());
        let alice = Member::new("alice");
        let crypto = Arc::new(InMemoryCryptoOracle::new(1));
        let signaller = EventSignaller::new(16);
        let (shutdown_tx, shutdown_rx) = async_broadcast::broadcast(1);
        let rt = TestRuntime::new(0, std::time::UNIX_EPOCH);
        let stream = subscribe(rt, store.clone(), crypto, &signaller, shutdown_rx, alice, 0, no_checkpoint());
        futures::pin_mut!(stream);

        store.save_events(&[deliver(0, "alice")]).unwrap();
        store.save_watermark(0, Timestamp::from_micros(1), true);
        signaller.notify_write(BTreeSet::new());
        let item = stream.next().await.unwrap().unwrap();
        let event: Event = serde_json::from_slice(&item.content_bytes).unwrap();
        assert_eq!(event.counter(), 0);

        shutdown_tx.broadcast(ShutdownMessage::Requested).await.unwrap();
        let end = stream.next().await.unwrap();
        assert_eq!(end, Err(SubscriptionEnd::ShuttingDown));
    }

    #[tokio::test]
    async fn disabled_member_terminates_subscription() {
        let store = Arc::new(InMemoryStore::new());
        let alice = Member::new("alice");
        store.register_member(&alice, Timestamp::MIN);
        store.disable_member(&alice);
        let crypto = Arc::new(InMemoryCryptoOracle::new(1));
        let signaller = EventSignaller::new(16);
        let (_shutdown, shutdown_rx) = async_broadcast::broadcast(1);
        let rt = TestRuntime::new(0, std::time::UNIX_EPOCH);
        let stream = subscribe(rt, store, crypto, &signaller, shutdown_rx, alice, 0, no_checkpoint());
        futures::pin_mut!(stream);

        let end = stream.next().await.unwrap();
        assert_eq!(end, Err(SubscriptionEnd::MemberDisabled));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_checkpoints_last_delivered_position() {
        let store = Arc::new(InMemoryStore::new());
        let alice = Member::new("alice");
        store.save_events(&[deliver(0, "alice")]).unwrap();
        store.save_watermark(0, Timestamp::from_micros(1), true);

        let crypto = Arc::new(InMemoryCryptoOracle::new(1));
        let signaller = EventSignaller::new(16);
        let (_shutdown, shutdown_rx) = async_broadcast::broadcast(1);
        let rt = TestRuntime::new(0, std::time::UNIX_EPOCH);
        let stream = subscribe(
            rt.clone(),
            store.clone(),
            crypto,
            &signaller,
            shutdown_rx,
            alice.clone(),
            0,
            Duration::from_secs(30),
        );

        // Drains the one durable event, then sits idle; nothing ever
        // explicitly acknowledges, so only the checkpoint timer can advance
        // `store.acknowledged`.
        tokio::spawn(async move {
            futures::pin_mut!(stream);
            while stream.next().await.is_some() {}
        });
        tokio::task::yield_now().await;
        assert_eq!(store.acknowledged(&alice), None);

        for _ in 0..40 {
            tokio::task::yield_now().await;
            rt.advance(Duration::from_secs(1)).await;
        }
        tokio::task::yield_now().await;

        assert_eq!(store.acknowledged(&alice), Some(Timestamp::from_micros(1)));
    }
}
