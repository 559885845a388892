//! Type definitions mirrored from the remote workflow engine.

pub mod event;
pub mod ids;
pub mod record;
pub mod state;

pub use event::{WorkflowEvent, WorkflowEventType};
pub use ids::{InstanceId, WorkflowId};
pub use record::{PayloadKind, ToolCallRecord, ToolCallStatus, WorkspacePayload};
pub use state::{
    CurrentNode, InvariantViolation, NodeState, NodeStatus, NodeType, ResumeAction, StartRequest,
    StartResponse, WorkflowInstanceState, WorkflowStatus,
};
