//! Per-member "read through timestamp T" bookkeeping, used by pruning
//! (out of scope here) to decide what's safe to discard. This is a thin
//! typed wrapper over [`Store::acknowledge`]/[`Store::acknowledged`]; it
//! exists as its own component because pruning policy is expected to grow
//! independently of the store's storage contract.

use common::Timestamp;

use crate::{
    store::Store,
    types::Member,
};

pub struct AcknowledgeTracker<'a, S: Store> {
    store: &'a S,
}

impl<'a, S: Store> AcknowledgeTracker<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Sets the member's acknowledged timestamp to `max(current, ts)`.
    pub fn acknowledge(&self, member: &Member, ts: Timestamp) {
        self.store.acknowledge(member, ts);
    }

    pub fn acknowledged(&self, member: &Member) -> Option<Timestamp> {
        self.store.acknowledged(member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn acknowledge_is_monotone() {
        let store = InMemoryStore::new();
        let tracker = AcknowledgeTracker::new(&store);
        let alice = Member::new("alice");
        tracker.acknowledge(&alice, Timestamp::from_micros(10));
        tracker.acknowledge(&alice, Timestamp::from_micros(5));
        assert_eq!(tracker.acknowledged(&alice), Some(Timestamp::from_micros(10)));
        tracker.acknowledge(&alice, Timestamp::from_micros(20));
        assert_eq!(tracker.acknowledged(&alice), Some(Timestamp::from_micros(20)));
    }
}
