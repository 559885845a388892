//! Abort signal threaded through every remote operation.

use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Why an operation was aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// A newer approve/edit/reject/run replaced this operation
    Superseded,
    /// The user cancelled the instance
    UserCancelled,
    /// The user paused the instance
    Paused,
    /// Aborted from outside the handler (shutdown, host teardown)
    External(String),
}

impl AbortReason {
    /// Self-initiated aborts are swallowed by the operation that triggered them;
    /// everything else surfaces as an error.
    pub fn is_self_initiated(&self) -> bool {
        !matches!(self, AbortReason::External(_))
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Superseded => write!(f, "superseded by a newer operation"),
            AbortReason::UserCancelled => write!(f, "cancelled by user"),
            AbortReason::Paused => write!(f, "paused by user"),
            AbortReason::External(reason) => write!(f, "external abort: {}", reason),
        }
    }
}

/// Cancellation token plus the reason of the first abort.
///
/// Clones share the same token; aborting one aborts all of them.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<AbortReason>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort with `reason`. Only the first reason is kept.
    pub fn abort(&self, reason: AbortReason) {
        if self.reason.set(reason).is_err() {
            tracing::trace!("abort signal already fired, keeping first reason");
        }
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason of the abort; `External` when the token was cancelled directly.
    pub fn reason(&self) -> AbortReason {
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| AbortReason::External("token cancelled".to_string()))
    }

    /// Resolves once the signal fires.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Underlying token, for APIs that take a `CancellationToken` directly.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
