//! Error taxonomy shared across the sequencer write path.
//!
//! The core idea, borrowed wholesale from the rest of the stack: rather than
//! matching on ad-hoc error enums everywhere, code attaches an [`ErrorMetadata`]
//! to an [`anyhow::Error`] via `.context(..)` at the point an error is raised,
//! and callers downcast through [`ErrorMetadataAnyhowExt`] to classify it later
//! (at the RPC boundary, in metrics, in retry loops) without needing to know
//! the concrete error type that originated it.

use std::borrow::Cow;

mod metrics;

/// Attached to an `anyhow::Error` chain via `.context(..)` to classify the
/// error for retry policy, RPC code mapping, and metrics.
///
/// `msg` is developer-facing and may be surfaced to the submitter; `short_msg`
/// is a stable ScreamingCamelCase tag for tests and metrics, resilient to
/// wording changes in `msg`.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    pub short_msg: Cow<'static, str>,
    pub msg: Cow<'static, str>,
}

/// Taxonomy of kinds a sequencer-path error can fall into. See the retry and
/// RPC-code mapping in [`ErrorCode::is_retryable`] and [`ErrorCode::rpc_code`].
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed submission (deserialization, size). Client error, never retry.
    InvalidRequest,
    /// Business-rule rejection (sender unknown, request too large). No retry.
    Refused,
    /// Backpressure: the intake queue is full. Retry with jitter.
    Overloaded,
    /// Transient during pipeline shutdown. Retry against another instance.
    ShuttingDown,
    /// Transport or store is down. Retry.
    Unavailable,
    /// Invariant violation; fatal to the instance. Supervisor restarts.
    InternalError,
}

impl ErrorMetadata {
    pub fn invalid_request(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::InvalidRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn refused(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Refused,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn overloaded() -> Self {
        Self {
            code: ErrorCode::Overloaded,
            short_msg: "Overloaded".into(),
            msg: "The sequencer intake queue is full, retry with backoff".into(),
        }
    }

    pub fn shutting_down() -> Self {
        Self {
            code: ErrorCode::ShuttingDown,
            short_msg: "ShuttingDown".into(),
            msg: "The sequencer instance is shutting down, retry against another instance".into(),
        }
    }

    pub fn unavailable(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Unavailable,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn internal_error(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::InternalError,
            short_msg: "InternalError".into(),
            msg: msg.into(),
        }
    }

    pub fn is_invalid_request(&self) -> bool {
        self.code == ErrorCode::InvalidRequest
    }

    pub fn is_refused(&self) -> bool {
        self.code == ErrorCode::Refused
    }

    pub fn is_overloaded(&self) -> bool {
        self.code == ErrorCode::Overloaded
    }

    pub fn is_shutting_down(&self) -> bool {
        self.code == ErrorCode::ShuttingDown
    }

    pub fn is_unavailable(&self) -> bool {
        self.code == ErrorCode::Unavailable
    }

    pub fn is_internal_error(&self) -> bool {
        self.code == ErrorCode::InternalError
    }

    /// Whether a caller should retry the request, possibly against a
    /// different instance, rather than surface the error to the end user.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl ErrorCode {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::Overloaded | ErrorCode::ShuttingDown | ErrorCode::Unavailable
        )
    }

    /// Maps to the gRPC-style families the external interface documents:
    /// client error, refused-by-server, client-gave-up, service-unavailable,
    /// server error.
    pub fn rpc_family(&self) -> RpcFamily {
        match self {
            ErrorCode::InvalidRequest => RpcFamily::ClientError,
            ErrorCode::Refused => RpcFamily::RefusedByServer,
            ErrorCode::Overloaded => RpcFamily::RefusedByServer,
            ErrorCode::ShuttingDown => RpcFamily::ServiceUnavailable,
            ErrorCode::Unavailable => RpcFamily::ServiceUnavailable,
            ErrorCode::InternalError => RpcFamily::ServerError,
        }
    }
}

/// The gRPC-style code families from the external interface section: every
/// concrete `ErrorCode` above maps into exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcFamily {
    ClientError,
    RefusedByServer,
    ClientGaveUp,
    ServiceUnavailable,
    ServerError,
}

/// Extension methods for classifying an opaque `anyhow::Error` by the
/// `ErrorMetadata` attached somewhere in its context chain, if any.
/// Errors with no attached metadata are treated as internal errors: an
/// unclassified failure is assumed to be a bug, not a user's fault.
pub trait ErrorMetadataAnyhowExt {
    fn metadata(&self) -> Option<&ErrorMetadata>;
    fn is_invalid_request(&self) -> bool;
    fn is_refused(&self) -> bool;
    fn is_overloaded(&self) -> bool;
    fn is_shutting_down(&self) -> bool;
    fn is_unavailable(&self) -> bool;
    fn is_internal_error(&self) -> bool;
    fn is_retryable(&self) -> bool;
    fn short_msg(&self) -> Cow<'static, str>;
    fn map_error_metadata<F: FnOnce(ErrorMetadata) -> ErrorMetadata>(self, f: F) -> Self;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn metadata(&self) -> Option<&ErrorMetadata> {
        self.downcast_ref::<ErrorMetadata>()
    }

    fn is_invalid_request(&self) -> bool {
        self.metadata().is_some_and(ErrorMetadata::is_invalid_request)
    }

    fn is_refused(&self) -> bool {
        self.metadata().is_some_and(ErrorMetadata::is_refused)
    }

    fn is_overloaded(&self) -> bool {
        self.metadata().is_some_and(ErrorMetadata::is_overloaded)
    }

    fn is_shutting_down(&self) -> bool {
        self.metadata().is_some_and(ErrorMetadata::is_shutting_down)
    }

    fn is_unavailable(&self) -> bool {
        self.metadata().is_some_and(ErrorMetadata::is_unavailable)
    }

    fn is_internal_error(&self) -> bool {
        match self.metadata() {
            Some(m) => m.is_internal_error(),
            None => true,
        }
    }

    fn is_retryable(&self) -> bool {
        self.metadata().is_some_and(ErrorMetadata::is_retryable)
    }

    fn short_msg(&self) -> Cow<'static, str> {
        match self.metadata() {
            Some(m) => m.short_msg.clone(),
            None => Cow::Borrowed("InternalError"),
        }
    }

    fn map_error_metadata<F: FnOnce(ErrorMetadata) -> ErrorMetadata>(self, f: F) -> Self {
        match self.downcast::<ErrorMetadata>() {
            Ok(metadata) => anyhow::Error::new(f(metadata)),
            Err(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unclassified_error_is_internal() {
        let e = anyhow::anyhow!("boom");
        assert!(e.is_internal_error());
        assert!(!e.is_retryable());
    }

    #[test]
    fn classified_error_round_trips() {
        let e = anyhow::Error::new(ErrorMetadata::overloaded());
        assert!(e.is_overloaded());
        assert!(e.is_retryable());
        assert_eq!(e.short_msg(), "Overloaded");
    }

    #[test]
    fn rpc_family_mapping() {
        assert_eq!(
            ErrorCode::ShuttingDown.rpc_family(),
            RpcFamily::ServiceUnavailable
        );
        assert_eq!(ErrorCode::Refused.rpc_family(), RpcFamily::RefusedByServer);
    }
}
