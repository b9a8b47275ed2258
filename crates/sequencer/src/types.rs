//! Core data model: members, payloads, submissions, and the two terminal
//! event shapes a submission can produce.

use std::{
    collections::BTreeSet,
    fmt,
};

use common::Timestamp;
use serde::{
    Deserialize,
    Serialize,
};

/// An opaque identity string: a participant, mediator, or domain component
/// addressable on the bus. Authenticated and unauthenticated members are
/// both represented this way; the core does not distinguish them beyond
/// what the submission's `is_request` flag records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Member(pub String);

impl Member {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Member {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A stable integer identity assigned at registration. Never reused or
/// renumbered even if the member is later disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(pub u64);

/// Submitter-chosen short string, scoped to the sending member, used for
/// de-duplication and to correlate rejection responses. Time-proof
/// submissions use the `tick-` prefix (see [`crate::time_proof`]).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// Maximum encoded length of a [`MessageId`], per the external interface.
pub const MAX_MESSAGE_ID_BYTES: usize = 73;

#[derive(thiserror::Error, Debug)]
#[error("messageId exceeds {MAX_MESSAGE_ID_BYTES} bytes: {0:?}")]
pub struct MessageIdTooLong(pub String);

impl MessageId {
    pub fn new(s: impl Into<String>) -> Result<Self, MessageIdTooLong> {
        let s = s.into();
        if s.len() > MAX_MESSAGE_ID_BYTES {
            return Err(MessageIdTooLong(s));
        }
        Ok(Self(s))
    }
}

/// Unique, monotone identifier of a stored payload. Minted at
/// payload-batching time from the current timestamp plus a per-microsecond
/// sub-sequence number, so concurrently-batched payloads still sort and
/// compare uniquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PayloadId {
    pub inserted_at: Timestamp,
    pub seq: u32,
}

impl fmt::Display for PayloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.inserted_at.as_micros(), self.seq)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub id: PayloadId,
    pub bytes: Vec<u8>,
}

/// A (payload bytes, recipients) pair within a submission's batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub bytes: Vec<u8>,
    pub recipients: BTreeSet<Member>,
}

/// A member's request to sequence a batch of envelopes, carrying the
/// deadline and signing-key freshness bound the validator enforces once a
/// tentative timestamp has been assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub sender: Member,
    pub message_id: MessageId,
    pub is_request: bool,
    pub batch: Vec<Envelope>,
    pub max_sequencing_time: Timestamp,
    pub timestamp_of_signing_key: Option<Timestamp>,
}

impl SubmissionRequest {
    /// A submission is a time proof iff its message id starts with `tick-`
    /// and its batch is empty.
    pub fn is_time_proof(&self) -> bool {
        self.message_id.0.starts_with("tick-") && self.batch.is_empty()
    }

    pub fn recipients(&self) -> BTreeSet<Member> {
        self.batch
            .iter()
            .flat_map(|e| e.recipients.iter().cloned())
            .collect()
    }
}

/// The two terminal outcomes of a submission, both observable by the
/// sender. Every committed event belongs to exactly one instance and
/// carries a globally monotone `counter` plus a strictly monotone
/// `timestamp` within that instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Deliver {
        counter: u64,
        timestamp: Timestamp,
        sender: Member,
        message_id: Option<MessageId>,
        payload_ref: Option<PayloadId>,
        recipients: BTreeSet<Member>,
    },
    DeliverError {
        counter: u64,
        timestamp: Timestamp,
        sender: Member,
        message_id: MessageId,
        reason: String,
    },
}

impl Event {
    pub fn counter(&self) -> u64 {
        match self {
            Event::Deliver { counter, .. } | Event::DeliverError { counter, .. } => *counter,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Event::Deliver { timestamp, .. } | Event::DeliverError { timestamp, .. } => *timestamp,
        }
    }

    pub fn sender(&self) -> &Member {
        match self {
            Event::Deliver { sender, .. } | Event::DeliverError { sender, .. } => sender,
        }
    }

    /// Every member addressed by this event: the sender always, plus
    /// recipients for `Deliver`.
    pub fn addressees(&self) -> BTreeSet<Member> {
        match self {
            Event::Deliver {
                sender, recipients, ..
            } => {
                let mut all = recipients.clone();
                all.insert(sender.clone());
                all
            },
            Event::DeliverError { sender, .. } => BTreeSet::from([sender.clone()]),
        }
    }

    /// A `Deliver` event with no payload reference and a `tick-` prefixed
    /// message id is a time proof: a signed witness of sequencer time with
    /// no business content.
    pub fn is_time_proof(&self) -> bool {
        matches!(
            self,
            Event::Deliver { message_id: Some(m), payload_ref: None, .. }
                if m.0.starts_with("tick-")
        )
    }
}

/// Per-instance durability and visibility boundary: no subscriber may
/// observe an event with `timestamp > watermark.timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub instance_index: u32,
    pub timestamp: Timestamp,
    pub online: bool,
}

/// Wire envelope for a signed, sequenced event. The signature is computed
/// by the [`crate::crypto::CryptoOracle`] over `hash(content_bytes)` with a
/// fixed purpose tag; `content_bytes` is the serialized [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedContent {
    pub content_bytes: Vec<u8>,
    pub signature: Vec<u8>,
    pub timestamp_of_signing_key: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_length_limit() {
        assert!(MessageId::new("short").is_ok());
        let too_long = "x".repeat(MAX_MESSAGE_ID_BYTES + 1);
        assert!(MessageId::new(too_long).is_err());
    }

    #[test]
    fn time_proof_detection() {
        let req = SubmissionRequest {
            sender: Member::new("alice"),
            message_id: MessageId::new("tick-abc").unwrap(),
            is_request: true,
            batch: vec![],
            max_sequencing_time: Timestamp::MAX,
            timestamp_of_signing_key: None,
        };
        assert!(req.is_time_proof());

        let not_tick = SubmissionRequest {
            message_id: MessageId::new("tick-abc-but-has-payload").unwrap(),
            batch: vec![Envelope {
                bytes: vec![1],
                recipients: BTreeSet::new(),
            }],
            ..req
        };
        assert!(!not_tick.is_time_proof());
    }
}
