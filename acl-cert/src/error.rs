use std::{sync::Arc, time::Duration};

/// The single error type for all harness operations.
///
/// Every fallible API returns `acl_cert::Result<T>` (alias for
/// `Result<T, acl_cert::Error>`). Nothing is retried internally: a timeout
/// is a test failure, not a reason to wait again.
///
/// The three drain outcomes are kept apart so a test can tell "gave up
/// waiting" ([`Timeout`](Self::Timeout)) from "the stream was torn down"
/// ([`Cancelled`](Self::Cancelled)) and "the remote side hung up"
/// ([`Exhausted`](Self::Exhausted)). When raised by an assertion they name
/// the predicates still unmet and how many events were consumed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("timed out after {timeout:?} waiting for {} ({scanned} events scanned)", describe(.unmet))]
    Timeout {
        timeout: Duration,
        unmet: Vec<String>,
        scanned: usize,
    },

    #[error("stream closed while waiting for {} ({scanned} events scanned)", describe(.unmet))]
    Cancelled { unmet: Vec<String>, scanned: usize },

    #[error("stream ended before emitting {} ({scanned} events scanned)", describe(.unmet))]
    Exhausted { unmet: Vec<String>, scanned: usize },

    #[error("capture '{0}' was read before it matched an event")]
    UnmatchedCapture(String),

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("stream '{0}' is already being drained by another reader")]
    StreamBusy(String),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("RPC error: {0}")]
    Rpc(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

fn describe(unmet: &[String]) -> String {
    if unmet.is_empty() {
        "an event".to_string()
    } else {
        format!("[{}]", unmet.join(", "))
    }
}

impl Error {
    /// Wrap an error reported by the RPC facade.
    pub fn rpc(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Rpc(Arc::new(e))
    }

    pub fn precondition(reason: impl Into<String>) -> Self {
        Error::Precondition(reason.into())
    }

    pub(crate) fn timed_out(timeout: Duration) -> Self {
        Error::Timeout {
            timeout,
            unmet: Vec::new(),
            scanned: 0,
        }
    }

    pub(crate) fn cancelled() -> Self {
        Error::Cancelled {
            unmet: Vec::new(),
            scanned: 0,
        }
    }

    pub(crate) fn exhausted() -> Self {
        Error::Exhausted {
            unmet: Vec::new(),
            scanned: 0,
        }
    }

    /// Attach assertion progress to a drain outcome.
    ///
    /// Other variants pass through unchanged.
    pub(crate) fn with_progress(self, timeout: Duration, unmet: Vec<String>, scanned: usize) -> Self {
        match self {
            Error::Timeout { .. } => Error::Timeout {
                timeout,
                unmet,
                scanned,
            },
            Error::Cancelled { .. } => Error::Cancelled { unmet, scanned },
            Error::Exhausted { .. } => Error::Exhausted { unmet, scanned },
            other => other,
        }
    }

    /// Returns `true` for [`Timeout`](Self::Timeout).
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Returns `true` for [`Cancelled`](Self::Cancelled).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Returns `true` for [`Exhausted`](Self::Exhausted).
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Error::Exhausted { .. })
    }

    /// Predicates still unmet when a drain gave up. Empty for other variants.
    pub fn unmet(&self) -> &[String] {
        match self {
            Error::Timeout { unmet, .. }
            | Error::Cancelled { unmet, .. }
            | Error::Exhausted { unmet, .. } => unmet,
            _ => &[],
        }
    }
}
