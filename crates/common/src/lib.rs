//! Cross-cutting types shared between the runtime implementations and the
//! sequencer crate: the `Runtime` abstraction, sequencer timestamps,
//! shutdown signaling, and the retry backoff policy.

pub mod backoff;
pub mod runtime;
pub mod shutdown;
pub mod timestamp;

pub use crate::{
    backoff::Backoff,
    runtime::{
        JoinError,
        Runtime,
        RuntimeRng,
        SpawnHandle,
    },
    shutdown::{
        ShutdownMessage,
        ShutdownSignal,
    },
    timestamp::{
        Timestamp,
        EPSILON,
    },
};
