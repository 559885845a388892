//! Instance state mirrored from the workflow engine.

use crate::types::ids::{InstanceId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};

/// Workflow instance status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WorkflowStatus {
    /// Created, not yet running
    #[default]
    Pending,
    /// Executing nodes
    Running,
    /// Stopped at a checkpoint, waiting for approve/edit/reject
    Waiting,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled by user
    Cancelled,
    /// Paused by user, can be continued with `run`
    Paused,
}

impl WorkflowStatus {
    /// Terminal statuses never change again for an instance.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeType {
    #[default]
    Execute,
    Checkpoint,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Execution state of one node. `execution_count` grows when a node is revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeState {
    pub status: NodeStatus,
    #[serde(default)]
    pub execution_count: u32,
}

impl NodeState {
    pub fn new(status: NodeStatus, execution_count: u32) -> Self {
        Self {
            status,
            execution_count,
        }
    }
}

/// Node currently executing or awaiting input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentNode {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub node_type: NodeType,
}

impl CurrentNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            node_type,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_checkpoint(&self) -> bool {
        self.node_type == NodeType::Checkpoint
    }
}

/// Broken state invariant found in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// More than one node reported as running
    MultipleRunningNodes(Vec<String>),
    /// `waiting` without a checkpoint as current node
    WaitingWithoutCheckpoint,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvariantViolation::MultipleRunningNodes(ids) => {
                write!(f, "multiple running nodes: {}", ids.join(", "))
            }
            InvariantViolation::WaitingWithoutCheckpoint => {
                write!(f, "status waiting without a checkpoint current node")
            }
        }
    }
}

/// Local mirror of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstanceState {
    pub instance_id: InstanceId,
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node: Option<CurrentNode>,
    #[serde(default)]
    pub node_states: HashMap<String, NodeState>,
    #[serde(default)]
    pub step_data: HashMap<String, serde_json::Value>,
    /// Failure message reported by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowInstanceState {
    pub fn new(instance_id: InstanceId, workflow_id: WorkflowId) -> Self {
        Self {
            instance_id,
            workflow_id,
            status: WorkflowStatus::Pending,
            current_node: None,
            node_states: HashMap::new(),
            step_data: HashMap::new(),
            error: None,
            input: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_current_node(mut self, node: CurrentNode) -> Self {
        self.current_node = Some(node);
        self
    }

    pub fn with_node_state(mut self, node_id: impl Into<String>, state: NodeState) -> Self {
        self.node_states.insert(node_id.into(), state);
        self
    }

    pub fn with_step_data(mut self, node_id: impl Into<String>, data: serde_json::Value) -> Self {
        self.step_data.insert(node_id.into(), data);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Ids of nodes currently marked running, sorted.
    pub fn running_nodes(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .node_states
            .iter()
            .filter(|(_, s)| s.status == NodeStatus::Running)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_waiting_at_checkpoint(&self) -> bool {
        self.status == WorkflowStatus::Waiting
            && self.current_node.as_ref().is_some_and(|n| n.is_checkpoint())
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let running = self.running_nodes();
        if running.len() > 1 {
            return Err(InvariantViolation::MultipleRunningNodes(running));
        }
        if self.status == WorkflowStatus::Waiting && !self.is_waiting_at_checkpoint() {
            return Err(InvariantViolation::WaitingWithoutCheckpoint);
        }
        Ok(())
    }
}

/// Action applied to an instance waiting at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResumeAction {
    Approve,
    Edit,
    Reject,
}

/// Body of a start request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartRequest {
    #[serde(skip)]
    pub workflow_id: WorkflowId,
    pub input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl StartRequest {
    pub fn new(workflow_id: impl Into<WorkflowId>, input: serde_json::Value) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            input,
            conversation_id: None,
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

/// Response of a start request. Each start creates a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    pub instance_id: InstanceId,
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
}
