//! Workspace items other than workflows: tool call records and pinned payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// One discrete tool invocation shown in the workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub status: ToolCallStatus,
}

impl ToolCallRecord {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments: serde_json::Value::Null,
            result: None,
            status: ToolCallStatus::Pending,
        }
    }

    pub fn with_arguments(mut self, arguments: serde_json::Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self.status = ToolCallStatus::Completed;
        self
    }
}

/// Payload kind - key of the payload view registry. Open set: hosts add kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadKind(String);

impl PayloadKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PayloadKind {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Arbitrary data pinned to the workspace by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspacePayload {
    pub kind: PayloadKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub data: serde_json::Value,
}

impl WorkspacePayload {
    pub fn new(kind: impl Into<PayloadKind>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            title: None,
            data,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}
