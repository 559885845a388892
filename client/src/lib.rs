//! hitlflow client - drives remotely executed, checkpoint-driven workflows.
//!
//! The engine runs a workflow graph server side and streams progress as
//! Server-Sent Events. Execution stops at checkpoint nodes until a human
//! approves, edits or rejects the node's output. This crate keeps a local
//! mirror of one instance consistent with that stream.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Host (CLI / UI shell)                    │
//! │   resolve_mode ──► ViewRegistries ──► render                 │
//! └───────────────┬──────────────────────────────▲───────────────┘
//!                 │ approve/edit/reject/         │ state, is_processing,
//!                 │ run/cancel/pause             │ current_event, notify
//!                 ▼                              │
//! ┌──────────────────────────────────────────────┴───────────────┐
//! │                      WorkflowHandlers                        │
//! │  one active operation ── AbortSignal ── ProcessingGuard      │
//! │                 │                                            │
//! │  ┌──────────────▼─────────────┐   ┌──────────────────────┐   │
//! │  │      EventReconciler       │──►│  InstanceStateStore  │   │
//! │  └──────────────▲─────────────┘   └──────────────────────┘   │
//! └─────────────────┼────────────────────────────────────────────┘
//!                   │ decode_event_stream (SseDecoder)
//!         ┌─────────┴─────────┐
//!         │    WorkflowApi    │  HttpWorkflowApi (reqwest)
//!         └───────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: remote operations (`start`, `run`, `resume`, `get_state`, `cancel`, `pause`)
//! - `events`: SSE decoding, abort signals
//! - `store`: the per-instance state mirror
//! - `reconciler`: folds events into the store
//! - `handler`: user actions against one instance
//! - `workspace`: render mode resolution and view registries
//!
//! # Environment Variables
//!
//! - `HITLFLOW_BASE_URL`: API root (default: http://127.0.0.1:8000/api)
//! - `HITLFLOW_AUTH_TOKEN`: bearer token (default: none)
//! - `HITLFLOW_CONNECT_TIMEOUT_SEC`: connect timeout (default: 10)
//! - `HITLFLOW_USER_AGENT`: user agent (default: hitlflow/<version>)

pub mod api;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod progress;
pub mod reconciler;
pub mod store;
pub mod types;
pub mod workspace;

// Re-export main types
pub use api::{HttpWorkflowApi, WorkflowApi};
pub use callbacks::{ChannelCallbacks, HostCallbacks, Notification, NotificationLevel, TracingCallbacks};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::{
    decode_event_stream, encode_comment, AbortReason, AbortSignal, EventStream, FrameEncoder,
    SseDecoder,
};
pub use handler::WorkflowHandlers;
pub use progress::{CurrentEventCell, ProcessingFlag, ProcessingGuard};
pub use reconciler::{DrainOutcome, EventReconciler, Flow, InstanceContext};
pub use store::{InstanceStateStore, SnapshotOutcome};
pub use types::{
    CurrentNode, InstanceId, NodeState, NodeStatus, NodeType, PayloadKind, ResumeAction,
    StartRequest, StartResponse, ToolCallRecord, ToolCallStatus, WorkflowEvent,
    WorkflowEventType, WorkflowId, WorkflowInstanceState, WorkflowStatus, WorkspacePayload,
};
pub use workspace::{
    resolve_mode, ModeInputs, ModeKind, PayloadView, ViewRegistries, WorkflowPhase,
    WorkflowSlot, WorkflowSnapshot, WorkflowView, WorkspaceMode,
};
