//! Workflow event type definitions.
//!
//! One event is one `data:` payload of the run/resume stream, e.g.
//! `{"event_type":"step_start","node_id":"draft","node_name":"Draft"}`.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowEventType {
    StepStart,
    StepComplete,
    StepProgress,
    Checkpoint,
    Complete,
    Error,
    Cancelled,
}

/// One unit of the remote event protocol. Transient: folded into state or shown
/// as the current event, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub event_type: WorkflowEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Only present on `error` events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowEvent {
    pub fn new(event_type: WorkflowEventType) -> Self {
        Self {
            event_type,
            node_id: None,
            node_name: None,
            data: None,
            error: None,
        }
    }

    pub fn step_start(node_id: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self::new(WorkflowEventType::StepStart).with_node(node_id, node_name)
    }

    pub fn step_complete(node_id: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            ..Self::new(WorkflowEventType::StepComplete)
        }
    }

    pub fn step_progress(node_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            node_id: Some(node_id.into()),
            data: Some(data),
            ..Self::new(WorkflowEventType::StepProgress)
        }
    }

    pub fn checkpoint(node_id: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self::new(WorkflowEventType::Checkpoint).with_node(node_id, node_name)
    }

    pub fn complete() -> Self {
        Self::new(WorkflowEventType::Complete)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(WorkflowEventType::Error)
        }
    }

    pub fn cancelled() -> Self {
        Self::new(WorkflowEventType::Cancelled)
    }

    pub fn with_node(mut self, node_id: impl Into<String>, node_name: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self.node_name = Some(node_name.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Events after which the server closes the stream.
    pub fn is_stream_end(&self) -> bool {
        matches!(
            self.event_type,
            WorkflowEventType::Checkpoint
                | WorkflowEventType::Complete
                | WorkflowEventType::Error
                | WorkflowEventType::Cancelled
        )
    }

    /// String field of `data`, if present.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.as_ref()?.get(key)?.as_str()
    }
}
