//! The writer pipeline: the single place in the system that assigns
//! timestamps and counters, turning a stream of [`SubmissionRequest`]s into
//! the durable, totally ordered event log. Conceptually eight stages (Intake
//! -> Payload Batch -> Payload Persist -> Timestamp & Counter Assignment ->
//! Validation -> Event Persist -> Watermark Advance -> Signal), implemented
//! as one task that walks every batch through them in order so that
//! Timestamp & Counter Assignment stays the single serialization point.
//!
//! A submission that is silently dropped (see [`ValidationOutcome::SilentDrop`])
//! never reaches Event Persist, so it never consumes a counter: contiguity
//! (invariant I1) is about committed events, not attempted ones.

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    time::{
        Duration,
        Instant,
    },
};

use anyhow::Context;
use common::{
    Backoff,
    Runtime,
    RuntimeRng,
    ShutdownSignal,
    SpawnHandle,
    Timestamp,
};
use errors::ErrorMetadata;
use tokio::sync::mpsc;

use crate::{
    metrics as seqmetrics,
    signaller::EventSignaller,
    store::{
        SaveError,
        Store,
    },
    types::{
        Event,
        MemberId,
        Payload,
        PayloadId,
        SubmissionRequest,
    },
    validator::{
        SilentDropCause,
        ValidationOutcome,
        Validator,
    },
    SequencerConfig,
};

/// Transient `SaveError::Unavailable` failures are retried with backoff
/// this many times before being treated as fatal, matching the
/// `Unavailable` error code's "transport or store is down, retry" policy.
const MAX_STORE_RETRIES: u32 = 5;

struct QueuedSubmission {
    request: SubmissionRequest,
    enqueued_at: Instant,
}

/// Client side of a running writer pipeline instance. Cheap to pass
/// around; `submit` is the only hot-path method and never blocks.
pub struct PipelineHandle<S: Store> {
    intake_tx: mpsc::Sender<QueuedSubmission>,
    closing: Arc<AtomicBool>,
    spawn_handle: Box<dyn SpawnHandle>,
    store: Arc<S>,
}

impl<S: Store> PipelineHandle<S> {
    /// Stage A: enqueues `request` for sequencing. Fails fast, never
    /// blocks: `Overloaded` if the intake queue is full, `ShuttingDown` if
    /// the instance is draining or has already stopped, `Refused` if the
    /// sender was never registered.
    ///
    /// A successful return means the submission was accepted for
    /// sequencing, not that it will necessarily produce a `Deliver` event --
    /// the sender learns the final outcome by subscribing and reading its
    /// `Deliver`/`DeliverError` event (or, for the payload-to-event-margin
    /// and max-sequencing-time escapes, by its absence; see
    /// [`crate::validator::ValidationOutcome::SilentDrop`]).
    pub fn submit(&self, request: SubmissionRequest) -> anyhow::Result<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(anyhow::Error::new(ErrorMetadata::shutting_down()));
        }
        if self.store.registered_at(&request.sender).is_none() {
            return Err(anyhow::Error::new(ErrorMetadata::refused(
                "SenderUnknown",
                format!("sender {} is not a registered member", request.sender),
            )));
        }
        if self.store.is_disabled(&request.sender) {
            return Err(anyhow::Error::new(ErrorMetadata::refused(
                "RequestRefused",
                format!("sender {} has been disabled", request.sender),
            )));
        }
        let queued = QueuedSubmission {
            request,
            enqueued_at: Instant::now(),
        };
        self.intake_tx.try_send(queued).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                seqmetrics::log_submission_overloaded();
                anyhow::Error::new(ErrorMetadata::overloaded())
            },
            mpsc::error::TrySendError::Closed(_) => {
                anyhow::Error::new(ErrorMetadata::shutting_down())
            },
        })
    }

    /// Orderly shutdown: refuses further submissions immediately, drains
    /// whatever is already queued through the remaining stages (so the
    /// final watermark advance still happens), then waits for the
    /// pipeline task to exit.
    pub async fn shutdown(self) -> Result<(), common::JoinError> {
        self.closing.store(true, Ordering::SeqCst);
        drop(self.intake_tx);
        self.spawn_handle.join().await
    }
}

/// Spawns a writer pipeline instance backed by `store`, returning a handle
/// to submit requests and eventually shut it down. `instance_index`
/// identifies this writer's watermark row; at most one pipeline per
/// `instance_index` should be running at a time (enforced by `store`'s
/// payload/counter conflict detection, not by this function).
pub fn spawn<RT, S>(
    rt: RT,
    store: Arc<S>,
    signaller: EventSignaller,
    shutdown: ShutdownSignal,
    config: SequencerConfig,
    instance_index: u32,
) -> PipelineHandle<S>
where
    RT: Runtime,
    S: Store,
{
    let (intake_tx, intake_rx) = mpsc::channel(config.intake_queue_capacity);
    let closing = Arc::new(AtomicBool::new(false));
    let instance_discriminator = rt.new_uuid_v4();
    let next_counter = store.next_counter();
    let worker = PipelineWorker {
        rt: rt.clone(),
        store: Arc::clone(&store),
        signaller,
        shutdown,
        config,
        instance_index,
        instance_discriminator,
        last_assigned_ts: Timestamp::MIN,
        next_counter,
        payload_seq: 0,
    };
    let spawn_handle = rt.spawn("sequencer-writer-pipeline", async move {
        worker.run(intake_rx).await;
    });
    PipelineHandle {
        intake_tx,
        closing,
        spawn_handle,
        store,
    }
}

enum NextAction {
    Batch(Vec<QueuedSubmission>),
    KeepAlive,
    Shutdown,
}

/// Owns all in-process serialization state: the clock-derived but
/// monotone `last_assigned_ts`, the contiguous `next_counter`, and the
/// payload-id sub-sequence. None of this is shared with any other task --
/// that is what makes Timestamp & Counter Assignment a single
/// serialization point without needing a lock.
struct PipelineWorker<RT: Runtime, S: Store> {
    rt: RT,
    store: Arc<S>,
    signaller: EventSignaller,
    shutdown: ShutdownSignal,
    config: SequencerConfig,
    instance_index: u32,
    instance_discriminator: uuid::Uuid,
    last_assigned_ts: Timestamp,
    next_counter: u64,
    payload_seq: u32,
}

impl<RT: Runtime, S: Store> PipelineWorker<RT, S> {
    async fn run(mut self, mut intake_rx: mpsc::Receiver<QueuedSubmission>) {
        loop {
            match self.next_action(&mut intake_rx).await {
                NextAction::Shutdown => return,
                NextAction::KeepAlive => self.keep_alive_tick(),
                NextAction::Batch(batch) => {
                    if let Err(e) = self.process_batch(batch).await {
                        seqmetrics::log_pipeline_fatal_error();
                        self.shutdown.signal_fatal(e);
                        return;
                    }
                },
            }
        }
    }

    async fn next_action(
        &self,
        intake_rx: &mut mpsc::Receiver<QueuedSubmission>,
    ) -> NextAction {
        let first = match self.config.keep_alive_interval {
            Some(interval) => {
                tokio::select! {
                    biased;
                    maybe_req = intake_rx.recv() => maybe_req,
                    _ = self.rt.wait(interval) => return NextAction::KeepAlive,
                }
            },
            None => intake_rx.recv().await,
        };
        let Some(first) = first else {
            return NextAction::Shutdown;
        };
        let mut batch = vec![first];
        while batch.len() < self.config.payload_write_batch_max_size {
            match intake_rx.try_recv() {
                Ok(req) => batch.push(req),
                Err(_) => break,
            }
        }
        NextAction::Batch(batch)
    }

    /// Retries a `Store` write that failed with `SaveError::Unavailable`,
    /// backing off with full jitter; any other error is fatal and returned
    /// immediately. `CounterConflict`/`PayloadConflict` indicate a logical
    /// conflict (split brain), not a transient backend hiccup, so they are
    /// never retried here.
    async fn retry_store(&self, mut op: impl FnMut() -> Result<(), SaveError>) -> Result<(), SaveError> {
        let mut backoff = Backoff::new(Duration::from_millis(20), Duration::from_secs(2));
        loop {
            match op() {
                Ok(()) => return Ok(()),
                Err(SaveError::Unavailable(msg)) if backoff.failures() < MAX_STORE_RETRIES => {
                    let delay = backoff.fail(&mut RuntimeRng(&self.rt));
                    seqmetrics::log_store_retry();
                    self.rt.wait(delay).await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Stages B through H for a single intake batch.
    async fn process_batch(&mut self, batch: Vec<QueuedSubmission>) -> anyhow::Result<()> {
        // Stage B: mint payload ids for every submission with a non-empty
        // batch; time proofs (empty batch) have nothing to persist.
        let mut payloads = Vec::new();
        let mut payload_refs: Vec<Option<PayloadId>> = Vec::with_capacity(batch.len());
        for queued in &batch {
            if queued.request.batch.is_empty() {
                payload_refs.push(None);
                continue;
            }
            let id = PayloadId {
                inserted_at: self.rt.now(),
                seq: self.payload_seq,
            };
            self.payload_seq += 1;
            let bytes = serde_json::to_vec(&queued.request.batch)
                .context("serializing submission batch for payload persist")?;
            payloads.push(Payload { id, bytes });
            payload_refs.push(Some(id));
        }

        // Stage C: persist payloads strictly before any event referencing
        // them becomes visible.
        if !payloads.is_empty() {
            self.retry_store(|| self.store.save_payloads(&payloads, self.instance_discriminator))
                .await
                .map_err(|e| match e {
                    SaveError::Unavailable(msg) => anyhow::Error::new(ErrorMetadata::unavailable(
                        "StorePersistRetriesExhausted",
                        format!("store still unavailable after {MAX_STORE_RETRIES} retries persisting payloads: {msg}"),
                    )),
                    e => anyhow::Error::new(ErrorMetadata::internal_error(format!(
                        "payload persist failed, treating instance as split-brained: {e}"
                    ))),
                })?;
        }
        let payload_persisted_at = self.rt.now();

        // Stage D + E: assign a monotone timestamp to every submission in
        // the batch, then validate it. Counters are handed out only to
        // submissions that survive validation, so contiguity never has to
        // account for a drop (see module docs).
        let validator = Validator::new(self.store.as_ref(), self.config.payload_to_event_margin);
        let mut events = Vec::with_capacity(batch.len());
        let mut addressed: BTreeSet<MemberId> = BTreeSet::new();
        for (queued, payload_ref) in batch.into_iter().zip(payload_refs) {
            let req = queued.request;
            let now = self.rt.now();
            let event_ts = Timestamp::at_least_succ(now, self.last_assigned_ts);
            self.last_assigned_ts = event_ts;
            let persisted_at_for_check = payload_ref.map(|_| payload_persisted_at);

            let status = match validator.validate(&req, event_ts, persisted_at_for_check) {
                ValidationOutcome::Accept => {
                    let recipients = req.recipients();
                    for member in recipients.iter().chain(std::iter::once(&req.sender)) {
                        if let Some(id) = self.store.member_id(member) {
                            addressed.insert(id);
                        }
                    }
                    events.push(Event::Deliver {
                        counter: self.next_counter,
                        timestamp: event_ts,
                        sender: req.sender,
                        message_id: Some(req.message_id),
                        payload_ref,
                        recipients,
                    });
                    self.next_counter += 1;
                    seqmetrics::log_deliver();
                    "accept"
                },
                ValidationOutcome::Reject(reason) => {
                    if let Some(id) = self.store.member_id(&req.sender) {
                        addressed.insert(id);
                    }
                    events.push(Event::DeliverError {
                        counter: self.next_counter,
                        timestamp: event_ts,
                        sender: req.sender,
                        message_id: req.message_id,
                        reason,
                    });
                    self.next_counter += 1;
                    seqmetrics::log_deliver_error();
                    "reject"
                },
                ValidationOutcome::SilentDrop { cause, warning } => {
                    tracing::warn!(
                        sender = %req.sender,
                        message_id = %req.message_id.0,
                        "{warning}"
                    );
                    match cause {
                        SilentDropCause::MaxSequencingTimeExceeded => {
                            seqmetrics::log_silent_drop_max_sequencing_time();
                        },
                        SilentDropCause::PayloadToEventBoundExceeded => {
                            seqmetrics::log_silent_drop_payload_margin();
                        },
                    }
                    "drop"
                },
            };
            seqmetrics::log_submission_latency(status, queued.enqueued_at.elapsed());
            seqmetrics::log_intake_queue_latency(queued.enqueued_at.elapsed());
        }

        if events.is_empty() {
            return Ok(());
        }

        // Stage F: persist in chunks no larger than eventWriteBatchMaxSize.
        let mut max_committed_ts = Timestamp::MIN;
        for chunk in events.chunks(self.config.event_write_batch_max_size.max(1)) {
            self.retry_store(|| self.store.save_events(chunk))
                .await
                .map_err(|e| match e {
                    SaveError::CounterConflict { expected, got } => {
                        anyhow::Error::new(ErrorMetadata::internal_error(format!(
                            "counter conflict persisting events: expected {expected}, got {got} \
                             -- another writer for this instance is active (split brain)"
                        )))
                    },
                    SaveError::PayloadConflict(id) => anyhow::Error::new(ErrorMetadata::internal_error(
                        format!("payload conflict persisting events referencing {id}"),
                    )),
                    SaveError::Unavailable(msg) => anyhow::Error::new(ErrorMetadata::unavailable(
                        "StorePersistRetriesExhausted",
                        format!("store still unavailable after {MAX_STORE_RETRIES} retries persisting events: {msg}"),
                    )),
                })?;
            seqmetrics::log_event_batch_size(chunk.len());
            if let Some(last) = chunk.last() {
                max_committed_ts = std::cmp::max(max_committed_ts, last.timestamp());
            }
        }

        // Stage G: the watermark only ever advances after the events it
        // covers are durable.
        let current_watermark = self.current_watermark();
        let new_watermark = std::cmp::max(current_watermark, max_committed_ts);
        self.store.save_watermark(self.instance_index, new_watermark, true);
        seqmetrics::log_watermark(self.instance_index, as_secs(new_watermark));

        // Stage H: wake subscribers only now that the watermark advance
        // that makes these events visible is durable.
        self.signaller.notify_write(addressed);

        Ok(())
    }

    /// Advances the watermark to the current clock with no new events,
    /// when the intake queue has been idle for `keepAliveInterval`. Bounded
    /// implicitly by `current_watermark`'s monotonicity: if a committed
    /// event's assigned timestamp ran ahead of the clock (the epsilon-bump
    /// case), the watermark simply holds rather than regress.
    fn keep_alive_tick(&self) {
        let current = self.current_watermark();
        let candidate = std::cmp::max(current, self.rt.now());
        if candidate > current {
            self.store.save_watermark(self.instance_index, candidate, true);
            seqmetrics::log_watermark(self.instance_index, as_secs(candidate));
        }
        seqmetrics::log_keep_alive_tick();
        self.signaller.notify_keep_alive();
    }

    fn current_watermark(&self) -> Timestamp {
        self.store
            .fetch_watermark(self.instance_index)
            .map(|w| w.timestamp)
            .unwrap_or(Timestamp::MIN)
    }
}

fn as_secs(ts: Timestamp) -> f64 {
    ts.as_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeSet,
        sync::atomic::AtomicU32,
    };

    use runtime::testing::TestRuntime;

    use super::*;
    use crate::{
        store::InMemoryStore,
        types::{
            Envelope,
            Member,
            MessageId,
            Watermark,
        },
    };

    /// Wraps [`InMemoryStore`] but fails `save_events` with
    /// `SaveError::Unavailable` the first `failures` times it is called,
    /// to exercise `PipelineWorker::retry_store`.
    struct FlakyStore {
        inner: InMemoryStore,
        remaining_failures: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: InMemoryStore::new(),
                remaining_failures: AtomicU32::new(failures),
            }
        }
    }

    impl Store for FlakyStore {
        fn register_member(&self, m: &Member, at: Timestamp) -> MemberId {
            self.inner.register_member(m, at)
        }

        fn is_registered_at(&self, m: &Member, at: Timestamp) -> bool {
            self.inner.is_registered_at(m, at)
        }

        fn registered_at(&self, m: &Member) -> Option<Timestamp> {
            self.inner.registered_at(m)
        }

        fn member_id(&self, m: &Member) -> Option<MemberId> {
            self.inner.member_id(m)
        }

        fn disable_member(&self, m: &Member) {
            self.inner.disable_member(m)
        }

        fn is_disabled(&self, m: &Member) -> bool {
            self.inner.is_disabled(m)
        }

        fn save_payloads(&self, payloads: &[Payload], instance_discriminator: uuid::Uuid) -> Result<(), SaveError> {
            self.inner.save_payloads(payloads, instance_discriminator)
        }

        fn payload_persisted_at(&self, id: PayloadId) -> Option<Timestamp> {
            self.inner.payload_persisted_at(id)
        }

        fn save_events(&self, events: &[Event]) -> Result<(), SaveError> {
            let still_flaky = self
                .remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if still_flaky {
                return Err(SaveError::Unavailable("flaky store injected failure".to_owned()));
            }
            self.inner.save_events(events)
        }

        fn next_counter(&self) -> u64 {
            self.inner.next_counter()
        }

        fn save_watermark(&self, instance: u32, timestamp: Timestamp, online: bool) {
            self.inner.save_watermark(instance, timestamp, online)
        }

        fn fetch_watermark(&self, instance: u32) -> Option<Watermark> {
            self.inner.fetch_watermark(instance)
        }

        fn read_events(&self, member: &Member, from_counter: u64) -> Vec<Event> {
            self.inner.read_events(member, from_counter)
        }

        fn acknowledge(&self, member: &Member, ts: Timestamp) {
            self.inner.acknowledge(member, ts)
        }

        fn acknowledged(&self, member: &Member) -> Option<Timestamp> {
            self.inner.acknowledged(member)
        }
    }

    fn request(sender: &str, message_id: &str, recipients: &[&str]) -> SubmissionRequest {
        SubmissionRequest {
            sender: Member::new(sender),
            message_id: MessageId::new(message_id).unwrap(),
            is_request: true,
            batch: if recipients.is_empty() {
                vec![]
            } else {
                vec![Envelope {
                    bytes: vec![1, 2, 3],
                    recipients: recipients.iter().map(|r| Member::new(*r)).collect(),
                }]
            },
            max_sequencing_time: Timestamp::MAX,
            timestamp_of_signing_key: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_submission_produces_contiguous_deliver_event() {
        let rt = TestRuntime::new(0, std::time::UNIX_EPOCH);
        let store = Arc::new(InMemoryStore::new());
        store.register_member(&Member::new("alice"), Timestamp::MIN);
        store.register_member(&Member::new("bob"), Timestamp::MIN);
        let signaller = EventSignaller::new(16);
        let mut rx = signaller.subscribe();
        let (shutdown, _rx) = ShutdownSignal::new("test".to_owned());
        let handle = spawn(
            rt.clone(),
            Arc::clone(&store),
            signaller,
            shutdown,
            SequencerConfig {
                keep_alive_interval: None,
                ..SequencerConfig::default()
            },
            0,
        );

        handle.submit(request("alice", "1", &["bob"])).unwrap();
        rx.recv().await;

        let events = store.read_events(&Member::new("alice"), 0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].counter(), 0);
        assert!(matches!(events[0], Event::Deliver { .. }));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn overloaded_intake_rejects_immediately() {
        let rt = TestRuntime::new(0, std::time::UNIX_EPOCH);
        let store = Arc::new(InMemoryStore::new());
        store.register_member(&Member::new("alice"), Timestamp::MIN);
        let signaller = EventSignaller::new(16);
        let (shutdown, _rx) = ShutdownSignal::new("test".to_owned());
        let handle = spawn(
            rt.clone(),
            Arc::clone(&store),
            signaller,
            shutdown,
            SequencerConfig {
                intake_queue_capacity: 1,
                keep_alive_interval: None,
                ..SequencerConfig::default()
            },
            0,
        );

        // Fill the one slot without giving the worker a chance to drain it.
        handle.submit(request("alice", "1", &[])).unwrap();
        let err = handle.submit(request("alice", "2", &[])).unwrap_err();
        assert!(err.downcast_ref::<ErrorMetadata>().unwrap().is_overloaded());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_sender_is_refused() {
        let rt = TestRuntime::new(0, std::time::UNIX_EPOCH);
        let store = Arc::new(InMemoryStore::new());
        let signaller = EventSignaller::new(16);
        let (shutdown, _rx) = ShutdownSignal::new("test".to_owned());
        let handle = spawn(rt, store, signaller, shutdown, SequencerConfig::default(), 0);

        let err = handle.submit(request("ghost", "1", &[])).unwrap_err();
        assert!(err.downcast_ref::<ErrorMetadata>().unwrap().is_refused());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_advances_watermark_without_events() {
        let rt = TestRuntime::new(0, std::time::UNIX_EPOCH);
        let store = Arc::new(InMemoryStore::new());
        let signaller = EventSignaller::new(16);
        let mut rx = signaller.subscribe();
        let (shutdown, _rx) = ShutdownSignal::new("test".to_owned());
        let handle = spawn(
            rt.clone(),
            Arc::clone(&store),
            signaller,
            shutdown,
            SequencerConfig {
                keep_alive_interval: Some(Duration::from_secs(1)),
                ..SequencerConfig::default()
            },
            0,
        );

        rt.advance(Duration::from_millis(1500)).await;
        rx.recv().await;
        let w1 = store.fetch_watermark(0).unwrap().timestamp;
        assert!(w1 > Timestamp::MIN);

        rt.advance(Duration::from_secs(2)).await;
        rx.recv().await;
        let w2 = store.fetch_watermark(0).unwrap().timestamp;
        assert!(w2 > w1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn max_sequencing_time_exceeded_is_silently_dropped() {
        let rt = TestRuntime::new(0, std::time::UNIX_EPOCH);
        let store = Arc::new(InMemoryStore::new());
        store.register_member(&Member::new("alice"), Timestamp::MIN);
        let signaller = EventSignaller::new(16);
        let mut rx = signaller.subscribe();
        let (shutdown, _rx) = ShutdownSignal::new("test".to_owned());
        let handle = spawn(
            rt.clone(),
            Arc::clone(&store),
            signaller,
            shutdown,
            SequencerConfig {
                keep_alive_interval: None,
                ..SequencerConfig::default()
            },
            0,
        );

        let mut expired = request("alice", "1", &[]);
        expired.max_sequencing_time = Timestamp::MIN;
        handle.submit(expired).unwrap();
        handle.submit(request("alice", "2", &[])).unwrap();
        rx.recv().await;

        let events = store.read_events(&Member::new("alice"), 0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].counter(), 0, "the dropped submission must not consume a counter");

        handle.shutdown().await.unwrap();
    }

    /// Two transient `Unavailable` failures from the store are retried
    /// with backoff and the batch still commits, rather than being
    /// treated as a fatal split-brain error.
    #[tokio::test(start_paused = true)]
    async fn transient_store_failure_is_retried_then_succeeds() {
        let rt = TestRuntime::new(0, std::time::UNIX_EPOCH);
        let store = Arc::new(FlakyStore::new(2));
        store.register_member(&Member::new("alice"), Timestamp::MIN);
        let signaller = EventSignaller::new(16);
        let mut rx = signaller.subscribe();
        let (shutdown, _rx) = ShutdownSignal::new("test".to_owned());
        let handle = spawn(
            rt.clone(),
            Arc::clone(&store),
            signaller,
            shutdown,
            SequencerConfig {
                keep_alive_interval: None,
                ..SequencerConfig::default()
            },
            0,
        );

        handle.submit(request("alice", "1", &[])).unwrap();

        // Each retry waits at most a couple hundred milliseconds; advance
        // well past that, repeatedly, without needing to know the exact
        // jittered delays.
        for _ in 0..10 {
            tokio::task::yield_now().await;
            rt.advance(Duration::from_secs(2)).await;
        }
        rx.recv().await;

        let events = store.read_events(&Member::new("alice"), 0);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Deliver { .. }));

        handle.shutdown().await.unwrap();
    }
}
