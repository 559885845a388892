//! Render mode resolution.

use crate::handler::WorkflowHandlers;
use crate::types::{
    InstanceId, ToolCallRecord, WorkflowEvent, WorkflowInstanceState, WorkflowStatus,
    WorkspacePayload,
};
use serde::Serialize;
use strum_macros::Display;

/// The workflow instance occupying the workspace, if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkflowSlot<'a> {
    pub instance_id: &'a InstanceId,
    /// `None` until the first snapshot arrives
    pub state: Option<&'a WorkflowInstanceState>,
    pub handlers: Option<&'a WorkflowHandlers>,
    pub is_processing: bool,
    pub current_event: Option<&'a WorkflowEvent>,
}

/// Everything the workspace could show right now.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModeInputs<'a> {
    pub workflow: Option<WorkflowSlot<'a>>,
    pub selected_tool: Option<&'a ToolCallRecord>,
    pub selected_tool_history: Option<&'a [ToolCallRecord]>,
    pub payload: Option<&'a WorkspacePayload>,
}

/// Exactly one thing occupies the workspace.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkspaceMode<'a> {
    WorkflowLoading {
        instance_id: &'a InstanceId,
    },
    Workflow {
        state: &'a WorkflowInstanceState,
        handlers: Option<&'a WorkflowHandlers>,
        is_processing: bool,
        current_event: Option<&'a WorkflowEvent>,
    },
    Tool {
        record: &'a ToolCallRecord,
    },
    ToolHistory {
        records: &'a [ToolCallRecord],
    },
    Payload {
        payload: &'a WorkspacePayload,
    },
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModeKind {
    WorkflowLoading,
    Workflow,
    Tool,
    ToolHistory,
    Payload,
    Empty,
}

impl WorkspaceMode<'_> {
    pub fn kind(&self) -> ModeKind {
        match self {
            WorkspaceMode::WorkflowLoading { .. } => ModeKind::WorkflowLoading,
            WorkspaceMode::Workflow { .. } => ModeKind::Workflow,
            WorkspaceMode::Tool { .. } => ModeKind::Tool,
            WorkspaceMode::ToolHistory { .. } => ModeKind::ToolHistory,
            WorkspaceMode::Payload { .. } => ModeKind::Payload,
            WorkspaceMode::Empty => ModeKind::Empty,
        }
    }

    /// Phase of the workflow shown, `None` outside workflow mode.
    pub fn workflow_phase(&self) -> Option<WorkflowPhase> {
        match self {
            WorkspaceMode::WorkflowLoading { .. } => Some(WorkflowPhase::Processing),
            WorkspaceMode::Workflow {
                state,
                is_processing,
                ..
            } => Some(WorkflowPhase::of(state, *is_processing)),
            _ => None,
        }
    }
}

/// What the workflow view should emphasise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowPhase {
    /// An operation is in flight
    Processing,
    /// Stopped at a checkpoint, approve/edit/reject are legal
    AwaitingInput,
    Idle,
}

impl WorkflowPhase {
    pub fn of(state: &WorkflowInstanceState, is_processing: bool) -> Self {
        if is_processing || state.status == WorkflowStatus::Running {
            WorkflowPhase::Processing
        } else if state.is_waiting_at_checkpoint() {
            WorkflowPhase::AwaitingInput
        } else {
            WorkflowPhase::Idle
        }
    }
}

/// Choose the render mode. First match wins:
/// workflow without state, workflow with state, selected tool call,
/// non-empty tool history, pinned payload, empty.
pub fn resolve_mode<'a>(inputs: &ModeInputs<'a>) -> WorkspaceMode<'a> {
    if let Some(slot) = inputs.workflow {
        return match slot.state {
            None => WorkspaceMode::WorkflowLoading {
                instance_id: slot.instance_id,
            },
            Some(state) => WorkspaceMode::Workflow {
                state,
                handlers: slot.handlers,
                is_processing: slot.is_processing,
                current_event: slot.current_event,
            },
        };
    }
    if let Some(record) = inputs.selected_tool {
        return WorkspaceMode::Tool { record };
    }
    match inputs.selected_tool_history {
        Some(records) if !records.is_empty() => return WorkspaceMode::ToolHistory { records },
        _ => {}
    }
    if let Some(payload) = inputs.payload {
        return WorkspaceMode::Payload { payload };
    }
    WorkspaceMode::Empty
}

/// Owned capture of a handler's observable state, for building [`ModeInputs`].
#[derive(Debug, Clone)]
pub struct WorkflowSnapshot {
    pub handlers: WorkflowHandlers,
    pub state: Option<WorkflowInstanceState>,
    pub is_processing: bool,
    pub current_event: Option<WorkflowEvent>,
}

impl WorkflowSnapshot {
    pub fn capture(handlers: &WorkflowHandlers) -> Self {
        Self {
            handlers: handlers.clone(),
            state: handlers.state(),
            is_processing: handlers.is_processing(),
            current_event: handlers.current_event(),
        }
    }

    pub fn slot(&self) -> WorkflowSlot<'_> {
        WorkflowSlot {
            instance_id: self.handlers.instance_id(),
            state: self.state.as_ref(),
            handlers: Some(&self.handlers),
            is_processing: self.is_processing,
            current_event: self.current_event.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ScriptedApi;
    use crate::callbacks::TracingCallbacks;
    use crate::types::{CurrentNode, NodeType, WorkflowId};
    use serde_json::json;
    use std::sync::Arc;

    fn state() -> WorkflowInstanceState {
        WorkflowInstanceState::new(InstanceId::new("i-1"), WorkflowId::new("wf"))
    }

    fn tools() -> Vec<ToolCallRecord> {
        vec![
            ToolCallRecord::new("c1", "search"),
            ToolCallRecord::new("c2", "fetch"),
        ]
    }

    #[test]
    fn test_precedence_first_match_wins() {
        let id = InstanceId::new("i-1");
        let state = state();
        let tools = tools();
        let payload = WorkspacePayload::new("markdown", json!("# Hi"));

        let mut inputs = ModeInputs {
            workflow: Some(WorkflowSlot {
                instance_id: &id,
                state: None,
                handlers: None,
                is_processing: true,
                current_event: None,
            }),
            selected_tool: Some(&tools[0]),
            selected_tool_history: Some(&tools),
            payload: Some(&payload),
        };
        assert_eq!(resolve_mode(&inputs).kind(), ModeKind::WorkflowLoading);

        inputs.workflow = inputs.workflow.map(|slot| WorkflowSlot {
            state: Some(&state),
            ..slot
        });
        assert_eq!(resolve_mode(&inputs).kind(), ModeKind::Workflow);

        inputs.workflow = None;
        assert_eq!(
            resolve_mode(&inputs),
            WorkspaceMode::Tool { record: &tools[0] }
        );

        inputs.selected_tool = None;
        assert_eq!(resolve_mode(&inputs).kind(), ModeKind::ToolHistory);

        inputs.selected_tool_history = None;
        assert_eq!(
            resolve_mode(&inputs),
            WorkspaceMode::Payload { payload: &payload }
        );

        inputs.payload = None;
        assert_eq!(resolve_mode(&inputs), WorkspaceMode::Empty);
    }

    #[test]
    fn test_empty_tool_history_is_no_selection() {
        let payload = WorkspacePayload::new("json", json!({"a": 1}));
        let inputs = ModeInputs {
            selected_tool_history: Some(&[]),
            payload: Some(&payload),
            ..Default::default()
        };
        assert_eq!(resolve_mode(&inputs).kind(), ModeKind::Payload);
        assert_eq!(resolve_mode(&ModeInputs::default()), WorkspaceMode::Empty);
    }

    #[test]
    fn test_resolve_is_pure() {
        let id = InstanceId::new("i-1");
        let state = state().with_status(WorkflowStatus::Running);
        let event = WorkflowEvent::step_start("A", "Fetch");
        let tools = tools();
        let inputs = ModeInputs {
            workflow: Some(WorkflowSlot {
                instance_id: &id,
                state: Some(&state),
                handlers: None,
                is_processing: true,
                current_event: Some(&event),
            }),
            selected_tool_history: Some(&tools),
            ..Default::default()
        };
        let first = resolve_mode(&inputs);
        let second = resolve_mode(&inputs);
        assert_eq!(first, second);
        assert_eq!(
            first,
            WorkspaceMode::Workflow {
                state: &state,
                handlers: None,
                is_processing: true,
                current_event: Some(&event),
            }
        );
    }

    #[test]
    fn test_workflow_phase() {
        let waiting = state()
            .with_status(WorkflowStatus::Waiting)
            .with_current_node(CurrentNode::new("review", "Review", NodeType::Checkpoint));
        assert_eq!(WorkflowPhase::of(&waiting, false), WorkflowPhase::AwaitingInput);
        assert_eq!(WorkflowPhase::of(&waiting, true), WorkflowPhase::Processing);
        let done = state().with_status(WorkflowStatus::Completed);
        assert_eq!(WorkflowPhase::of(&done, false), WorkflowPhase::Idle);
        assert_eq!(WorkspaceMode::Empty.workflow_phase(), None);
        assert_eq!(ModeKind::ToolHistory.to_string(), "tool_history");
    }

    #[test]
    fn test_snapshot_of_fresh_handlers_is_loading() {
        let handlers = WorkflowHandlers::new(
            InstanceId::new("i-7"),
            Arc::new(ScriptedApi::new()),
            Arc::new(TracingCallbacks),
        );
        let snapshot = WorkflowSnapshot::capture(&handlers);
        let inputs = ModeInputs {
            workflow: Some(snapshot.slot()),
            ..Default::default()
        };
        assert_eq!(
            resolve_mode(&inputs),
            WorkspaceMode::WorkflowLoading {
                instance_id: &InstanceId::new("i-7")
            }
        );
        // same handlers compare equal, others do not
        let slot = snapshot.slot();
        assert_eq!(slot.handlers, Some(&handlers));
    }
}
