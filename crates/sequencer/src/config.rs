//! Recognized configuration keys and their semantic effect on the writer
//! pipeline. Grouped into one struct rather than read ad-hoc from the
//! environment so a config source (file, flags, env) only needs to
//! populate this type once.

use std::time::Duration;

/// `eventWriteBatchMaxSize`, `payloadWriteBatchMaxSize`,
/// `payloadToEventMargin`, `keepAliveInterval`, `checkpointInterval`, and
/// `totalNodeCount` from the external interface.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Max events per event-persist batch (Stage F).
    pub event_write_batch_max_size: usize,
    /// Max payloads per payload-persist batch (Stage B/C).
    pub payload_write_batch_max_size: usize,
    /// Maximum permitted gap between payload persist and event timestamp
    /// assignment (Stage E's payload-to-event bound).
    pub payload_to_event_margin: Duration,
    /// `None` disables keep-alive ticks (Stage G).
    pub keep_alive_interval: Option<Duration>,
    /// Reader checkpointing period: how often an idle [`crate::subscription::subscribe`]
    /// stream persists its last-delivered position via [`crate::store::Store::acknowledge`],
    /// independent of an explicit acknowledgement from the client.
    pub checkpoint_interval: Duration,
    /// Node count for HA split of the counter space / instance index.
    pub total_node_count: u32,
    /// Depth of the Stage A intake queue; beyond this, new submissions see
    /// `Overloaded`.
    pub intake_queue_capacity: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            event_write_batch_max_size: 100,
            payload_write_batch_max_size: 100,
            payload_to_event_margin: Duration::from_secs(60),
            keep_alive_interval: Some(Duration::from_secs(1)),
            checkpoint_interval: Duration::from_secs(30),
            total_node_count: 1,
            intake_queue_capacity: 1000,
        }
    }
}
