//! Error types for the workflow client.

use crate::events::AbortReason;
use crate::types::{InstanceId, WorkflowStatus};
use thiserror::Error;

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network failure while sending a request or reading a response body
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Server answered with a non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Server sent something that does not follow the workflow protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Stream read was aborted through its signal
    #[error("Aborted: {0}")]
    Aborted(AbortReason),

    /// Handler called in a state where it is not legal (host bug)
    #[error("{operation} is not allowed while workflow is {status}")]
    IllegalState {
        operation: &'static str,
        status: WorkflowStatus,
    },

    /// Handler called before any state was fetched for the instance
    #[error("No state loaded for instance: {0}")]
    StateNotLoaded(InstanceId),

    /// Handlers used after the instance was cancelled locally
    #[error("Instance closed: {0}")]
    InstanceClosed(InstanceId),

    /// Invalid client configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ClientError {
    /// Stable error code, used in host notifications and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            ClientError::Transport(_) => "TRANSPORT_ERROR",
            ClientError::Status { status, .. } => error_codes::from_http_status(*status),
            ClientError::Protocol(_) => "PROTOCOL_ERROR",
            ClientError::Aborted(_) => "ABORTED",
            ClientError::IllegalState { .. } => "ILLEGAL_STATE",
            ClientError::StateNotLoaded(_) => "STATE_NOT_LOADED",
            ClientError::InstanceClosed(_) => "INSTANCE_CLOSED",
            ClientError::Config(_) => "CONFIG_ERROR",
            ClientError::Serialization(_) => "SERIALIZATION_ERROR",
            ClientError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the abort was triggered by this client (superseded, cancelled,
    /// paused). Such aborts are swallowed by the operation that caused them.
    pub fn is_self_initiated_abort(&self) -> bool {
        matches!(self, ClientError::Aborted(reason) if reason.is_self_initiated())
    }

    /// Status error from a response code and body text.
    /// Long bodies are cut so an HTML error page does not flood notifications.
    pub fn from_status(status: u16, body: &str) -> Self {
        const MAX_MESSAGE_LEN: usize = 512;
        let message = if body.len() > MAX_MESSAGE_LEN {
            let mut end = MAX_MESSAGE_LEN;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &body[..end])
        } else if body.is_empty() {
            "(empty body)".to_string()
        } else {
            body.to_string()
        };
        ClientError::Status { status, message }
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Error code mappings from HTTP status to client error codes
pub mod error_codes {
    /// Map HTTP status code to client error code
    pub fn from_http_status(status: u16) -> &'static str {
        match status {
            400 => "INVALID_INPUT",
            401 => "UNAUTHORIZED",
            403 => "PERMISSION_DENIED",
            404 => "INSTANCE_NOT_FOUND",
            408 => "TIMEOUT",
            409 => "CONFLICT",
            422 => "UNPROCESSABLE_ENTITY",
            429 => "RATE_LIMITED",
            500 => "INTERNAL_ERROR",
            502 => "BAD_GATEWAY",
            503 => "SERVICE_UNAVAILABLE",
            504 => "GATEWAY_TIMEOUT",
            _ => "HTTP_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ClientError::Status {
                status: 404,
                message: "missing".to_string()
            }
            .error_code(),
            "INSTANCE_NOT_FOUND"
        );
        assert_eq!(
            ClientError::Aborted(AbortReason::Superseded).error_code(),
            "ABORTED"
        );
        assert_eq!(
            ClientError::InstanceClosed(InstanceId::new("i-1")).error_code(),
            "INSTANCE_CLOSED"
        );
    }

    #[test]
    fn test_self_initiated_abort() {
        assert!(ClientError::Aborted(AbortReason::Superseded).is_self_initiated_abort());
        assert!(ClientError::Aborted(AbortReason::UserCancelled).is_self_initiated_abort());
        assert!(ClientError::Aborted(AbortReason::Paused).is_self_initiated_abort());
        assert!(
            !ClientError::Aborted(AbortReason::External("shutdown".to_string()))
                .is_self_initiated_abort()
        );
        assert!(!ClientError::Protocol("bad".to_string()).is_self_initiated_abort());
    }

    #[test]
    fn test_from_status_truncates() {
        let body = "é".repeat(400);
        let err = ClientError::from_status(500, &body);
        match err {
            ClientError::Status { status, message } => {
                assert_eq!(status, 500);
                assert!(message.ends_with("..."));
                assert!(message.len() <= 512 + 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let err = ClientError::from_status(503, "");
        assert_eq!(err.to_string(), "HTTP 503: (empty body)");
    }

    #[test]
    fn test_illegal_state_display() {
        let err = ClientError::IllegalState {
            operation: "approve",
            status: WorkflowStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "approve is not allowed while workflow is running"
        );
    }
}
