//! Recognizes and issues "tick" submissions: empty, sequenced events that
//! serve as a signed witness of domain time. The pipeline treats these
//! identically to any other submission; everything here is client-side
//! construction plus reader-side classification.

use common::{
    runtime::Runtime,
    Timestamp,
};

use crate::types::{
    Event,
    Member,
    MessageId,
    SubmissionRequest,
};

/// Builds the empty-batch, infinite-deadline submission that makes a
/// sequencer produce a time-proof `Deliver` event in response.
pub fn build_time_proof_request<RT: Runtime>(
    rt: &RT,
    sender: Member,
    is_request: bool,
) -> SubmissionRequest {
    let message_id = MessageId::new(format!("tick-{}", rt.new_uuid_v4()))
        .expect("uuidv4 with tick- prefix always fits in MAX_MESSAGE_ID_BYTES");
    SubmissionRequest {
        sender,
        message_id,
        is_request,
        batch: vec![],
        max_sequencing_time: Timestamp::MAX,
        timestamp_of_signing_key: None,
    }
}

/// Classifies a durable event as a time proof: a `Deliver` with no payload
/// reference whose message id carries the `tick-` prefix.
pub fn is_time_proof(event: &Event) -> bool {
    event.is_time_proof()
}

#[cfg(test)]
mod tests {
    use runtime::testing::TestRuntime;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn request_has_tick_prefix_and_empty_batch() {
        let rt = TestRuntime::new(0, std::time::UNIX_EPOCH);
        let req = build_time_proof_request(&rt, Member::new("alice"), true);
        assert!(req.message_id.0.starts_with("tick-"));
        assert!(req.batch.is_empty());
        assert!(req.is_time_proof());
        assert_eq!(req.max_sequencing_time, Timestamp::MAX);
    }
}
