//! Workspace composition: what to render and which view renders it.

pub mod mode;
pub mod registry;

pub use mode::{
    resolve_mode, ModeInputs, ModeKind, WorkflowPhase, WorkflowSlot, WorkflowSnapshot,
    WorkspaceMode,
};
pub use registry::{
    GenericWorkflowView, JsonPayloadView, PayloadView, ViewRegistries, ViewRegistry, WorkflowView,
};
