use std::time::Duration;

use metrics::{
    log_counter,
    log_distribution,
    log_distribution_with_labels,
    log_gauge,
    register_convex_counter,
    register_convex_gauge,
    register_convex_histogram,
    StaticMetricLabel,
};

register_convex_histogram!(
    SEQUENCER_INTAKE_QUEUE_LATENCY_SECONDS,
    "Time a submission spends in the Stage A intake queue before payload batching begins"
);
pub fn log_intake_queue_latency(elapsed: Duration) {
    log_distribution(&SEQUENCER_INTAKE_QUEUE_LATENCY_SECONDS, elapsed.as_secs_f64());
}

register_convex_counter!(
    SEQUENCER_SUBMISSIONS_OVERLOADED_TOTAL,
    "Count of submissions rejected at Stage A because the intake queue was full"
);
pub fn log_submission_overloaded() {
    log_counter(&SEQUENCER_SUBMISSIONS_OVERLOADED_TOTAL, 1);
}

register_convex_counter!(
    SEQUENCER_EVENTS_DELIVERED_TOTAL,
    "Count of Deliver events committed"
);
register_convex_counter!(
    SEQUENCER_EVENTS_DELIVER_ERROR_TOTAL,
    "Count of DeliverError events committed"
);
register_convex_counter!(
    SEQUENCER_SUBMISSIONS_DROPPED_MAX_SEQUENCING_TIME_TOTAL,
    "Count of submissions silently dropped for exceeding their max-sequencing-time deadline"
);
register_convex_counter!(
    SEQUENCER_SUBMISSIONS_DROPPED_PAYLOAD_MARGIN_TOTAL,
    "Count of submissions silently dropped for exceeding the payload-to-event bound"
);

pub fn log_deliver() {
    log_counter(&SEQUENCER_EVENTS_DELIVERED_TOTAL, 1);
}
pub fn log_deliver_error() {
    log_counter(&SEQUENCER_EVENTS_DELIVER_ERROR_TOTAL, 1);
}
pub fn log_silent_drop_max_sequencing_time() {
    log_counter(&SEQUENCER_SUBMISSIONS_DROPPED_MAX_SEQUENCING_TIME_TOTAL, 1);
}
pub fn log_silent_drop_payload_margin() {
    log_counter(&SEQUENCER_SUBMISSIONS_DROPPED_PAYLOAD_MARGIN_TOTAL, 1);
}

register_convex_gauge!(
    SEQUENCER_WATERMARK_TIMESTAMP_SECONDS,
    "Current watermark timestamp of the writer pipeline, seconds since epoch"
);
pub fn log_watermark(instance: u32, timestamp_secs: f64) {
    // Labelless gauge: this process hosts exactly one instance at a time.
    let _ = instance;
    log_gauge(&SEQUENCER_WATERMARK_TIMESTAMP_SECONDS, timestamp_secs);
}

register_convex_histogram!(
    SEQUENCER_EVENT_PERSIST_BATCH_EVENTS,
    "Number of events committed per Stage F persist batch"
);
pub fn log_event_batch_size(size: usize) {
    log_distribution(&SEQUENCER_EVENT_PERSIST_BATCH_EVENTS, size as f64);
}

register_convex_counter!(
    SEQUENCER_KEEP_ALIVE_TICKS_TOTAL,
    "Count of keep-alive watermark advances with no new events"
);
pub fn log_keep_alive_tick() {
    log_counter(&SEQUENCER_KEEP_ALIVE_TICKS_TOTAL, 1);
}

register_convex_counter!(
    SEQUENCER_PIPELINE_FATAL_ERRORS_TOTAL,
    "Count of fatal errors that caused a writer pipeline instance to shut down"
);
pub fn log_pipeline_fatal_error() {
    log_counter(&SEQUENCER_PIPELINE_FATAL_ERRORS_TOTAL, 1);
}

register_convex_counter!(
    SEQUENCER_STORE_RETRIES_TOTAL,
    "Count of backed-off retries against the store after a transient Unavailable error"
);
pub fn log_store_retry() {
    log_counter(&SEQUENCER_STORE_RETRIES_TOTAL, 1);
}

register_convex_histogram!(
    SEQUENCER_SUBMISSION_LATENCY_SECONDS,
    "End-to-end latency of a submission from intake to terminal event, labeled by status",
    &["status"]
);
pub fn log_submission_latency(status: &'static str, elapsed: Duration) {
    log_distribution_with_labels(
        &SEQUENCER_SUBMISSION_LATENCY_SECONDS,
        elapsed.as_secs_f64(),
        vec![StaticMetricLabel::new("status", status)],
    );
}
