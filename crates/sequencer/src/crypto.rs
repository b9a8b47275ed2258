//! Signing/hashing is assumed externally provided; the core treats it as
//! an opaque oracle and never chooses a primitive itself (see Non-goals).
//! The in-process implementation here exists to exercise
//! [`crate::types::SignedContent`] in tests and is not a cryptographic
//! recommendation.

use std::hash::{
    Hash,
    Hasher,
};

use common::Timestamp;

use crate::types::{
    Event,
    SignedContent,
};

/// A fixed domain-separation tag mixed into every hash this oracle
/// computes, so a signature over a sequenced event can never be replayed
/// as a signature over unrelated content.
pub const HASH_PURPOSE_SEQUENCED_EVENT_SIGNATURE: &str = "SequencedEventSignature";

pub trait CryptoOracle: Send + Sync + 'static {
    fn hash(&self, purpose: &str, bytes: &[u8]) -> Vec<u8>;
    fn sign(&self, hash: &[u8]) -> Vec<u8>;
    fn verify(&self, hash: &[u8], signature: &[u8]) -> bool;

    fn sign_event(&self, event: &Event, timestamp_of_signing_key: Option<Timestamp>) -> SignedContent {
        let content_bytes = serde_json::to_vec(event).expect("Event is always serializable");
        let hash = self.hash(HASH_PURPOSE_SEQUENCED_EVENT_SIGNATURE, &content_bytes);
        let signature = self.sign(&hash);
        SignedContent {
            content_bytes,
            signature,
            timestamp_of_signing_key,
        }
    }
}

/// Deterministic, non-cryptographic oracle: good enough to exercise the
/// signing contract in tests without pulling in a key-management story
/// that's out of scope for the sequencer core.
#[derive(Default)]
pub struct InMemoryCryptoOracle {
    key: u64,
}

impl InMemoryCryptoOracle {
    pub fn new(key: u64) -> Self {
        Self { key }
    }
}

fn hash_bytes(seed: u64, bytes: &[u8]) -> Vec<u8> {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    seed.hash(&mut hasher);
    bytes.hash(&mut hasher);
    hasher.finish().to_le_bytes().to_vec()
}

impl CryptoOracle for InMemoryCryptoOracle {
    fn hash(&self, purpose: &str, bytes: &[u8]) -> Vec<u8> {
        let mut tagged = purpose.as_bytes().to_vec();
        tagged.extend_from_slice(bytes);
        hash_bytes(0, &tagged)
    }

    fn sign(&self, hash: &[u8]) -> Vec<u8> {
        hash_bytes(self.key, hash)
    }

    fn verify(&self, hash: &[u8], signature: &[u8]) -> bool {
        self.sign(hash) == signature
    }
}
