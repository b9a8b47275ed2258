//! Stateless predicates evaluated once a submission has an assigned
//! `event_ts`. The only external dependency is the [`Store`] member
//! registry, queried read-only for recipient lookups; predicates are
//! otherwise pure functions of (submission, event_ts, payload_persisted_at).

use std::time::Duration;

use common::Timestamp;

use crate::{
    store::Store,
    types::{
        Member,
        SubmissionRequest,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The submission becomes a `Deliver` event.
    Accept,
    /// The submission becomes a `DeliverError` event addressed to the
    /// sender, with this reason string.
    Reject(String),
    /// The submission produces no event at all; `warning` is logged and the
    /// payload row is left orphaned for later pruning. Invariant I4 permits
    /// this only for max-sequencing-time exceedance and the payload-to-event
    /// bound: both indicate the assigned timestamp itself is unusable, so
    /// there's no meaningful event to hand the sender.
    SilentDrop {
        cause: SilentDropCause,
        warning: String,
    },
}

/// Distinguishes the two predicates that produce a [`ValidationOutcome::SilentDrop`],
/// so callers (metrics, logging) can observe them independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilentDropCause {
    MaxSequencingTimeExceeded,
    PayloadToEventBoundExceeded,
}

pub struct Validator<'a, S: Store> {
    store: &'a S,
    payload_to_event_margin: Duration,
}

impl<'a, S: Store> Validator<'a, S> {
    pub fn new(store: &'a S, payload_to_event_margin: Duration) -> Self {
        Self {
            store,
            payload_to_event_margin,
        }
    }

    /// Evaluates every predicate in priority order and returns the first
    /// that fires. `payload_persisted_at` is `None` only for time proofs,
    /// which have no payload and therefore skip the payload-to-event bound.
    pub fn validate(
        &self,
        submission: &SubmissionRequest,
        event_ts: Timestamp,
        payload_persisted_at: Option<Timestamp>,
    ) -> ValidationOutcome {
        if let Some(outcome) = self.check_max_sequencing_time(submission, event_ts) {
            return outcome;
        }
        if let Some(outcome) = self.check_signing_timestamp_window(submission, event_ts) {
            return outcome;
        }
        if let Some(payload_persisted_at) = payload_persisted_at {
            if let Some(outcome) =
                self.check_payload_to_event_bound(event_ts, payload_persisted_at)
            {
                return outcome;
            }
        }
        if let Some(outcome) = self.check_unknown_recipients(submission, event_ts) {
            return outcome;
        }
        ValidationOutcome::Accept
    }

    /// Unlike every other predicate here, an exceeded deadline is a
    /// silent drop, not a `DeliverError`: the assigned `event_ts` is
    /// already past the sender's own deadline, so there is no timestamp
    /// left that the sender could meaningfully be told about (I4).
    fn check_max_sequencing_time(
        &self,
        submission: &SubmissionRequest,
        event_ts: Timestamp,
    ) -> Option<ValidationOutcome> {
        if event_ts > submission.max_sequencing_time {
            return Some(ValidationOutcome::SilentDrop {
                cause: SilentDropCause::MaxSequencingTimeExceeded,
                warning: format!(
                    "sequencer time {event_ts} has exceeded the max-sequencing-time \
                     {} for deliver[message-id:{}]",
                    submission.max_sequencing_time, submission.message_id.0
                ),
            });
        }
        None
    }

    fn check_signing_timestamp_window(
        &self,
        submission: &SubmissionRequest,
        event_ts: Timestamp,
    ) -> Option<ValidationOutcome> {
        let t = submission.timestamp_of_signing_key?;
        // Inclusive upper bound: equal to event_ts is valid.
        if t > event_ts {
            return Some(ValidationOutcome::Reject(format!(
                "Invalid signing timestamp {t}, must be before or at {event_ts}"
            )));
        }
        None
    }

    fn check_payload_to_event_bound(
        &self,
        event_ts: Timestamp,
        payload_persisted_at: Timestamp,
    ) -> Option<ValidationOutcome> {
        let gap = event_ts.saturating_since(payload_persisted_at);
        if gap > self.payload_to_event_margin {
            return Some(ValidationOutcome::SilentDrop {
                cause: SilentDropCause::PayloadToEventBoundExceeded,
                warning: format!(
                    "The payload to event time bound [{}] has been been exceeded by payload time \
                     [{payload_persisted_at}] and sequenced event time [{event_ts}]",
                    humantime_duration(self.payload_to_event_margin),
                ),
            });
        }
        None
    }

    fn check_unknown_recipients(
        &self,
        submission: &SubmissionRequest,
        event_ts: Timestamp,
    ) -> Option<ValidationOutcome> {
        let mut unknown_names: Vec<String> = submission
            .recipients()
            .into_iter()
            .filter(|m| !self.store.is_registered_at(m, event_ts))
            .map(|m| m.0)
            .collect();
        if unknown_names.is_empty() {
            return None;
        }
        unknown_names.sort();
        Some(ValidationOutcome::Reject(format!(
            "Unknown recipients: {}",
            unknown_names.join(", ")
        )))
    }
}

/// Renders a duration in the ISO-8601-ish form the scenario fixtures use,
/// e.g. `PT1M` for one minute.
fn humantime_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        return format!("PT{}S", d.as_secs_f64());
    }
    if secs % 3600 == 0 {
        format!("PT{}H", secs / 3600)
    } else if secs % 60 == 0 {
        format!("PT{}M", secs / 60)
    } else {
        format!("PT{secs}S")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;
    use crate::{
        store::InMemoryStore,
        types::{
            Envelope,
            MessageId,
        },
    };

    fn submission(sender: &str, mst: u64, signing: Option<u64>) -> SubmissionRequest {
        SubmissionRequest {
            sender: Member::new(sender),
            message_id: MessageId::new("m").unwrap(),
            is_request: true,
            batch: vec![],
            max_sequencing_time: Timestamp::from_micros(mst),
            timestamp_of_signing_key: signing.map(Timestamp::from_micros),
        }
    }

    #[test]
    fn max_sequencing_time_inclusive_upper_bound() {
        let store = InMemoryStore::new();
        let v = Validator::new(&store, Duration::from_secs(60));
        let s = submission("alice", 100, None);
        assert_eq!(
            v.validate(&s, Timestamp::from_micros(100), Some(Timestamp::from_micros(0))),
            ValidationOutcome::Accept
        );
        assert!(matches!(
            v.validate(&s, Timestamp::from_micros(101), Some(Timestamp::from_micros(0))),
            ValidationOutcome::SilentDrop {
                cause: SilentDropCause::MaxSequencingTimeExceeded,
                ..
            }
        ));
    }

    #[test]
    fn signing_timestamp_inclusive_upper_bound() {
        let store = InMemoryStore::new();
        let v = Validator::new(&store, Duration::from_secs(60));
        let equal = submission("alice", 1_000_000, Some(10_000_000));
        assert_eq!(
            v.validate(&equal, Timestamp::from_micros(10_000_000), Some(Timestamp::MIN)),
            ValidationOutcome::Accept
        );
        let over = submission("alice", 1_000_000_000, Some(10_000_001));
        assert!(matches!(
            v.validate(&over, Timestamp::from_micros(10_000_000), Some(Timestamp::MIN)),
            ValidationOutcome::Reject(_)
        ));
    }

    #[test]
    fn payload_to_event_margin_exact_vs_over() {
        let store = InMemoryStore::new();
        let margin = Duration::from_secs(60);
        let v = Validator::new(&store, margin);
        let s = submission("alice", u64::MAX, None);
        let persisted_at = Timestamp::from_micros(0);
        let exactly_at_bound = Timestamp::from_micros(60_000_000);
        assert_eq!(
            v.validate(&s, exactly_at_bound, Some(persisted_at)),
            ValidationOutcome::Accept
        );
        let one_over = Timestamp::from_micros(60_000_001);
        assert!(matches!(
            v.validate(&s, one_over, Some(persisted_at)),
            ValidationOutcome::SilentDrop {
                cause: SilentDropCause::PayloadToEventBoundExceeded,
                ..
            }
        ));
    }

    #[test]
    fn unknown_recipient_is_rejected() {
        let store = InMemoryStore::new();
        let alice = Member::new("alice");
        store.register_member(&alice, Timestamp::MIN);
        let v = Validator::new(&store, Duration::from_secs(60));
        let mut s = submission("alice", u64::MAX, None);
        s.batch.push(Envelope {
            bytes: vec![],
            recipients: BTreeSet::from([Member::new("bob")]),
        });
        match v.validate(&s, Timestamp::from_micros(1), Some(Timestamp::MIN)) {
            ValidationOutcome::Reject(reason) => assert_eq!(reason, "Unknown recipients: bob"),
            other => panic!("expected Reject, got {other:?}"),
        }
    }

    proptest! {
        /// Any submission whose assigned timestamp has overshot its own
        /// max-sequencing-time is silently dropped for that reason,
        /// regardless of margin or payload timing.
        #[test]
        fn exceeding_max_sequencing_time_always_silently_drops(
            mst in 0u64..1_000_000_000,
            overshoot in 1u64..1_000_000,
        ) {
            let store = InMemoryStore::new();
            let v = Validator::new(&store, Duration::from_secs(3600));
            let s = submission("alice", mst, None);
            let event_ts = Timestamp::from_micros(mst + overshoot);
            let outcome = v.validate(&s, event_ts, Some(event_ts));
            let is_expected = matches!(
                outcome,
                ValidationOutcome::SilentDrop {
                    cause: SilentDropCause::MaxSequencingTimeExceeded,
                    ..
                }
            );
            prop_assert!(is_expected);
        }

        /// A payload-to-event gap within the configured margin never fires
        /// the payload-to-event-bound predicate.
        #[test]
        fn payload_to_event_gap_within_margin_is_accepted(
            margin_secs in 1u64..1000,
            gap_micros in 0u64..900_000_000,
        ) {
            let margin = Duration::from_secs(margin_secs);
            let gap = Duration::from_micros(gap_micros);
            prop_assume!(gap <= margin);
            let store = InMemoryStore::new();
            let v = Validator::new(&store, margin);
            let s = submission("alice", u64::MAX, None);
            let persisted_at = Timestamp::from_micros(1_000_000_000);
            let event_ts = persisted_at.add(gap);
            let outcome = v.validate(&s, event_ts, Some(persisted_at));
            prop_assert_eq!(outcome, ValidationOutcome::Accept);
        }

        /// A payload-to-event gap strictly beyond the configured margin
        /// always silently drops for that reason.
        #[test]
        fn exceeding_payload_to_event_margin_always_silently_drops(
            margin_secs in 1u64..1000,
            overshoot_micros in 1u64..1_000_000,
        ) {
            let margin = Duration::from_secs(margin_secs);
            let store = InMemoryStore::new();
            let v = Validator::new(&store, margin);
            let s = submission("alice", u64::MAX, None);
            let persisted_at = Timestamp::from_micros(1_000_000_000);
            let event_ts = persisted_at.add(margin).add(Duration::from_micros(overshoot_micros));
            let outcome = v.validate(&s, event_ts, Some(persisted_at));
            let is_expected = matches!(
                outcome,
                ValidationOutcome::SilentDrop {
                    cause: SilentDropCause::PayloadToEventBoundExceeded,
                    ..
                }
            );
            prop_assert!(is_expected);
        }
    }
}
