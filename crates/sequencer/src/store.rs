//! The durable log of payloads and events, the member registry, and the
//! watermark table. The only shared mutable state in the system -- every
//! mutation goes through one of the `save_*` operations below, which
//! enforce their own invariants (counter contiguity, watermark
//! monotonicity, payload-id/discriminator conflicts) so callers never need
//! a separate lock.
//!
//! [`InMemoryStore`] is the only implementation here; a durable backend
//! would implement the same trait with identical contracts (see the
//! "dynamic dispatch over storage backends" design note).

use std::collections::{
    BTreeMap,
    BTreeSet,
    HashMap,
};

use common::Timestamp;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::types::{
    Event,
    Member,
    MemberId,
    Payload,
    PayloadId,
    Watermark,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveError {
    /// `save_payloads` saw a `PayloadId` already written by a different
    /// `instanceDiscriminator`: two writers believe they own the same
    /// namespace. Fatal to the writer that loses the race.
    #[error("payload id conflict, id already written by a different instance: {0}")]
    PayloadConflict(PayloadId),
    /// `save_events` was given a batch whose first counter does not equal
    /// the store's next expected counter. Fatal to the pipeline: either a
    /// split-brain writer or a programming bug in batch assembly.
    #[error("counter conflict: expected next counter {expected}, got {got}")]
    CounterConflict { expected: u64, got: u64 },
    /// Transient storage I/O failure (backend hiccup, not a logical
    /// conflict). Distinct from the two variants above, which are fatal:
    /// the writer pipeline retries this one with backoff instead of
    /// treating the instance as split-brained.
    #[error("store temporarily unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage contract for the write path. All methods are
/// synchronous snapshot operations against the current state; the store
/// itself performs no blocking/parking -- that responsibility belongs to
/// [`crate::subscription::subscribe`], which re-reads after
/// [`crate::signaller::EventSignaller`] wakes it.
pub trait Store: Send + Sync + 'static {
    /// Idempotent: returns the existing id if `m` is already registered.
    /// `at` records the timestamp below which `m` cannot have received any
    /// event (see invariant I5).
    fn register_member(&self, m: &Member, at: Timestamp) -> MemberId;

    fn is_registered_at(&self, m: &Member, at: Timestamp) -> bool;

    fn registered_at(&self, m: &Member) -> Option<Timestamp>;

    fn member_id(&self, m: &Member) -> Option<MemberId>;

    /// Disables `m`: subsequent submissions from `m` are refused and its
    /// open subscriptions terminate with a server-cancel signal. There is
    /// no re-enable; a disabled member is permanently retired.
    fn disable_member(&self, m: &Member);

    fn is_disabled(&self, m: &Member) -> bool;

    /// All-or-nothing within the batch. Rejects if any `PayloadId` in the
    /// batch was already written under a different `instance_discriminator`
    /// (split-brain detection at store granularity).
    fn save_payloads(
        &self,
        payloads: &[Payload],
        instance_discriminator: Uuid,
    ) -> Result<(), SaveError>;

    fn payload_persisted_at(&self, id: PayloadId) -> Option<Timestamp>;

    /// `events` must be a contiguous, increasing-counter batch starting at
    /// the store's next expected counter, or this returns
    /// `CounterConflict` and the caller must treat the instance as
    /// split-brained.
    fn save_events(&self, events: &[Event]) -> Result<(), SaveError>;

    fn next_counter(&self) -> u64;

    /// No-op (not an error) if `timestamp` does not strictly advance the
    /// current watermark for `instance`.
    fn save_watermark(&self, instance: u32, timestamp: Timestamp, online: bool);

    fn fetch_watermark(&self, instance: u32) -> Option<Watermark>;

    /// Events for which `member` is sender or recipient, with
    /// `counter >= from_counter`, in counter order, bounded by the current
    /// watermark. A non-blocking snapshot: callers needing to wait for more
    /// events use [`crate::signaller::EventSignaller`] to know when to call
    /// again.
    fn read_events(&self, member: &Member, from_counter: u64) -> Vec<Event>;

    /// No-op if `ts` does not advance the member's current acknowledged
    /// timestamp.
    fn acknowledge(&self, member: &Member, ts: Timestamp);

    fn acknowledged(&self, member: &Member) -> Option<Timestamp>;
}

#[derive(Default)]
struct MemberRegistry {
    ids: HashMap<Member, MemberId>,
    registered_at: HashMap<Member, Timestamp>,
    disabled: std::collections::HashSet<Member>,
    next_id: u64,
}

#[derive(Default)]
struct State {
    members: MemberRegistry,
    payloads: HashMap<PayloadId, (Vec<u8>, Uuid, Timestamp)>,
    events: BTreeMap<u64, Event>,
    // member -> sorted counters of events addressed to them, for fast read_events.
    by_member: HashMap<Member, BTreeSet<u64>>,
    watermarks: HashMap<u32, Watermark>,
    acknowledged: HashMap<Member, Timestamp>,
}

/// In-memory `Store`, used for tests and as a reference implementation.
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl Store for InMemoryStore {
    fn register_member(&self, m: &Member, at: Timestamp) -> MemberId {
        let mut state = self.state.lock();
        if let Some(id) = state.members.ids.get(m) {
            return *id;
        }
        let id = MemberId(state.members.next_id);
        state.members.next_id += 1;
        state.members.ids.insert(m.clone(), id);
        state.members.registered_at.insert(m.clone(), at);
        id
    }

    fn is_registered_at(&self, m: &Member, at: Timestamp) -> bool {
        let state = self.state.lock();
        matches!(state.members.registered_at.get(m), Some(t) if *t <= at)
    }

    fn registered_at(&self, m: &Member) -> Option<Timestamp> {
        self.state.lock().members.registered_at.get(m).copied()
    }

    fn member_id(&self, m: &Member) -> Option<MemberId> {
        self.state.lock().members.ids.get(m).copied()
    }

    fn disable_member(&self, m: &Member) {
        self.state.lock().members.disabled.insert(m.clone());
    }

    fn is_disabled(&self, m: &Member) -> bool {
        self.state.lock().members.disabled.contains(m)
    }

    fn save_payloads(
        &self,
        payloads: &[Payload],
        instance_discriminator: Uuid,
    ) -> Result<(), SaveError> {
        let mut state = self.state.lock();
        for p in payloads {
            if let Some((_, existing_discriminator, _)) = state.payloads.get(&p.id) {
                if *existing_discriminator != instance_discriminator {
                    return Err(SaveError::PayloadConflict(p.id));
                }
            }
        }
        // All-or-nothing: validated above, so this loop cannot fail.
        for p in payloads {
            state
                .payloads
                .insert(p.id, (p.bytes.clone(), instance_discriminator, p.id.inserted_at));
        }
        Ok(())
    }

    fn payload_persisted_at(&self, id: PayloadId) -> Option<Timestamp> {
        self.state.lock().payloads.get(&id).map(|(_, _, at)| *at)
    }

    fn save_events(&self, events: &[Event]) -> Result<(), SaveError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock();
        let expected = state.events.keys().next_back().map(|c| c + 1).unwrap_or(0);
        let first = events[0].counter();
        if first != expected {
            return Err(SaveError::CounterConflict {
                expected,
                got: first,
            });
        }
        for (i, e) in events.iter().enumerate() {
            debug_assert_eq!(e.counter(), expected + i as u64);
            for addressee in e.addressees() {
                state.by_member.entry(addressee).or_default().insert(e.counter());
            }
            state.events.insert(e.counter(), e.clone());
        }
        Ok(())
    }

    fn next_counter(&self) -> u64 {
        let state = self.state.lock();
        state.events.keys().next_back().map(|c| c + 1).unwrap_or(0)
    }

    fn save_watermark(&self, instance: u32, timestamp: Timestamp, online: bool) {
        let mut state = self.state.lock();
        let advances = match state.watermarks.get(&instance) {
            Some(w) => timestamp > w.timestamp,
            None => true,
        };
        if advances {
            state.watermarks.insert(
                instance,
                Watermark {
                    instance_index: instance,
                    timestamp,
                    online,
                },
            );
        }
    }

    fn fetch_watermark(&self, instance: u32) -> Option<Watermark> {
        self.state.lock().watermarks.get(&instance).copied()
    }

    fn read_events(&self, member: &Member, from_counter: u64) -> Vec<Event> {
        let state = self.state.lock();
        let Some(counters) = state.by_member.get(member) else {
            return vec![];
        };
        // Watermark-bounded visibility: no subscriber observes an event
        // beyond the latest durable timestamp, even if it is already
        // present in `state.events` (batches commit atomically but the
        // watermark advances in a separate, later step).
        let max_visible = state
            .watermarks
            .values()
            .map(|w| w.timestamp)
            .max()
            .unwrap_or(Timestamp::MIN);
        counters
            .range(from_counter..)
            .filter_map(|c| state.events.get(c))
            .filter(|e| e.timestamp() <= max_visible)
            .cloned()
            .collect()
    }

    fn acknowledge(&self, member: &Member, ts: Timestamp) {
        let mut state = self.state.lock();
        let entry = state.acknowledged.entry(member.clone()).or_insert(Timestamp::MIN);
        if ts > *entry {
            *entry = ts;
        }
    }

    fn acknowledged(&self, member: &Member) -> Option<Timestamp> {
        self.state.lock().acknowledged.get(member).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageId;

    fn ts(micros: u64) -> Timestamp {
        Timestamp::from_micros(micros)
    }

    #[test]
    fn register_member_is_idempotent() {
        let store = InMemoryStore::new();
        let alice = Member::new("alice");
        let id1 = store.register_member(&alice, ts(1));
        let id2 = store.register_member(&alice, ts(2));
        assert_eq!(id1, id2);
        // Second call does not move the registration time.
        assert_eq!(store.registered_at(&alice), Some(ts(1)));
    }

    #[test]
    fn payload_conflict_detects_split_brain() {
        let store = InMemoryStore::new();
        let id = PayloadId {
            inserted_at: ts(1),
            seq: 0,
        };
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store
            .save_payloads(&[Payload { id, bytes: vec![1] }], a)
            .unwrap();
        let err = store
            .save_payloads(&[Payload { id, bytes: vec![2] }], b)
            .unwrap_err();
        assert_eq!(err, SaveError::PayloadConflict(id));
    }

    #[test]
    fn counter_conflict_on_gap() {
        let store = InMemoryStore::new();
        let alice = Member::new("alice");
        let e0 = Event::Deliver {
            counter: 0,
            timestamp: ts(1),
            sender: alice.clone(),
            message_id: None,
            payload_ref: None,
            recipients: BTreeSet::new(),
        };
        store.save_events(&[e0]).unwrap();
        let e2 = Event::Deliver {
            counter: 2,
            timestamp: ts(2),
            sender: alice,
            message_id: None,
            payload_ref: None,
            recipients: BTreeSet::new(),
        };
        let err = store.save_events(&[e2]).unwrap_err();
        assert_eq!(
            err,
            SaveError::CounterConflict {
                expected: 1,
                got: 2
            }
        );
    }

    #[test]
    fn disabled_member_is_sticky() {
        let store = InMemoryStore::new();
        let alice = Member::new("alice");
        store.register_member(&alice, ts(1));
        assert!(!store.is_disabled(&alice));
        store.disable_member(&alice);
        assert!(store.is_disabled(&alice));
    }

    #[test]
    fn watermark_save_is_monotone() {
        let store = InMemoryStore::new();
        store.save_watermark(0, ts(10), true);
        store.save_watermark(0, ts(5), true);
        assert_eq!(store.fetch_watermark(0).unwrap().timestamp, ts(10));
        store.save_watermark(0, ts(20), true);
        assert_eq!(store.fetch_watermark(0).unwrap().timestamp, ts(20));
    }

    #[test]
    fn read_events_is_watermark_bounded() {
        let store = InMemoryStore::new();
        let alice = Member::new("alice");
        let e = Event::Deliver {
            counter: 0,
            timestamp: ts(100),
            sender: alice.clone(),
            message_id: Some(MessageId::new("m").unwrap()),
            payload_ref: None,
            recipients: BTreeSet::new(),
        };
        store.save_events(&[e]).unwrap();
        // Not yet visible: watermark hasn't advanced past the event.
        assert!(store.read_events(&alice, 0).is_empty());
        store.save_watermark(0, ts(100), true);
        assert_eq!(store.read_events(&alice, 0).len(), 1);
    }
}
