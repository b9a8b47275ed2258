//! The sequencer write path: accepts submission requests, orders them in
//! monotone sequencer time, persists payloads and events durably, and
//! streams them to subscribers. [`Sequencer`] is the facade wiring
//! together the individual components -- [`store::Store`],
//! [`pipeline`], [`subscription`], [`crypto::CryptoOracle`],
//! [`validator::Validator`], [`ack_tracker::AcknowledgeTracker`], and
//! [`time_proof`] -- each of which is independently usable and tested.
//!
//! RPC framing, admin surface, and contract semantics are deliberately not
//! part of this crate; it exposes plain Rust types and a `Stream` for a
//! caller to wire onto whatever transport it uses.

pub mod ack_tracker;
pub mod config;
pub mod crypto;
pub mod metrics;
pub mod pipeline;
pub mod signaller;
pub mod store;
pub mod subscription;
pub mod time_proof;
pub mod types;
pub mod validator;

use std::sync::Arc;

use common::{
    JoinError,
    Runtime,
    ShutdownSignal,
    Timestamp,
};
use futures::Stream;

pub use crate::config::SequencerConfig;
use crate::{
    ack_tracker::AcknowledgeTracker,
    crypto::CryptoOracle,
    signaller::EventSignaller,
    store::Store,
    subscription::SubscriptionItem,
    types::{
        Member,
        MemberId,
        SubmissionRequest,
        Watermark,
    },
};

/// A single writer instance of the sequencer: one [`store::Store`], one
/// [`pipeline::PipelineHandle`], one `instance_index`. Multiple instances
/// can share a `Store` for HA, each with a distinct `instance_index` and
/// `instanceDiscriminator` (minted inside [`pipeline::spawn`]); the store's
/// conflict detection is what keeps them from corrupting each other.
pub struct Sequencer<RT: Runtime, S: Store> {
    rt: RT,
    store: Arc<S>,
    crypto: Arc<dyn CryptoOracle>,
    signaller: EventSignaller,
    shutdown: ShutdownSignal,
    pipeline: pipeline::PipelineHandle<S>,
    instance_index: u32,
    checkpoint_interval: std::time::Duration,
}

impl<RT: Runtime, S: Store> Sequencer<RT, S> {
    /// Spawns the writer pipeline and returns the facade plus a receiver
    /// the caller can use to learn about fatal errors or orderly shutdown
    /// (e.g. to trigger a supervisor restart).
    pub fn spawn(
        rt: RT,
        store: Arc<S>,
        crypto: Arc<dyn CryptoOracle>,
        config: SequencerConfig,
        instance_name: impl Into<String>,
        instance_index: u32,
    ) -> (Self, async_broadcast::Receiver<common::ShutdownMessage>) {
        let signaller = EventSignaller::new(4096);
        let (shutdown, shutdown_rx) = ShutdownSignal::new(instance_name.into());
        let checkpoint_interval = config.checkpoint_interval;
        let pipeline = pipeline::spawn(
            rt.clone(),
            Arc::clone(&store),
            signaller.clone(),
            shutdown.clone(),
            config,
            instance_index,
        );
        (
            Self {
                rt,
                store,
                crypto,
                signaller,
                shutdown,
                pipeline,
                instance_index,
                checkpoint_interval,
            },
            shutdown_rx,
        )
    }

    /// Registers `member` at the current clock time, or returns its
    /// existing id if already registered (see invariant I5).
    pub fn register_member(&self, member: &Member) -> MemberId {
        self.store.register_member(member, self.rt.now())
    }

    pub fn disable_member(&self, member: &Member) {
        self.store.disable_member(member);
    }

    /// Stage A: hands `request` to the writer pipeline's intake queue.
    pub fn submit(&self, request: SubmissionRequest) -> anyhow::Result<()> {
        self.pipeline.submit(request)
    }

    /// Builds and submits a time-proof request on `sender`'s behalf.
    pub fn send_time_proof_request(&self, sender: Member, is_request: bool) -> anyhow::Result<()> {
        let request = time_proof::build_time_proof_request(&self.rt, sender, is_request);
        self.submit(request)
    }

    /// Streams `member`'s events starting at `from_counter`, parking
    /// between reads until the writer pipeline signals new durable
    /// progress. See [`subscription::subscribe`].
    pub fn subscribe(&self, member: Member, from_counter: u64) -> impl Stream<Item = SubscriptionItem> {
        subscription::subscribe(
            self.rt.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.crypto),
            &self.signaller,
            self.shutdown.subscribe(),
            member,
            from_counter,
            self.checkpoint_interval,
        )
    }

    pub fn acknowledge(&self, member: &Member, ts: Timestamp) {
        AcknowledgeTracker::new(self.store.as_ref()).acknowledge(member, ts);
    }

    pub fn acknowledged(&self, member: &Member) -> Option<Timestamp> {
        AcknowledgeTracker::new(self.store.as_ref()).acknowledged(member)
    }

    pub fn fetch_watermark(&self) -> Option<Watermark> {
        self.store.fetch_watermark(self.instance_index)
    }

    /// Orderly shutdown: signals subscribers, drains and stops the writer
    /// pipeline, and waits for it to exit.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.shutdown.signal_requested();
        self.pipeline.shutdown().await
    }
}
