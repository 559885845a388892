//! Folds workflow events into the local instance mirror.

use crate::api::WorkflowApi;
use crate::callbacks::{HostCallbacks, Notification};
use crate::error::{ClientError, Result};
use crate::events::{AbortReason, AbortSignal, EventStream};
use crate::progress::{CurrentEventCell, ProcessingFlag, ProcessingGuard};
use crate::store::{InstanceStateStore, SnapshotOutcome};
use crate::types::{
    CurrentNode, InstanceId, NodeState, NodeStatus, NodeType, WorkflowEvent, WorkflowEventType,
    WorkflowStatus,
};
use futures::StreamExt;
use std::sync::Arc;

const UNKNOWN_ERROR: &str = "Unknown workflow error";

/// Everything an operation on one instance touches.
#[derive(Clone)]
pub struct InstanceContext {
    pub instance_id: InstanceId,
    pub api: Arc<dyn WorkflowApi>,
    pub store: InstanceStateStore,
    pub current_event: CurrentEventCell,
    pub processing: ProcessingFlag,
    pub callbacks: Arc<dyn HostCallbacks>,
}

impl InstanceContext {
    pub fn new(
        instance_id: InstanceId,
        api: Arc<dyn WorkflowApi>,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> Self {
        Self {
            instance_id,
            api,
            store: InstanceStateStore::new(),
            current_event: CurrentEventCell::new(),
            processing: ProcessingFlag::new(),
            callbacks,
        }
    }

    pub fn notify(&self, notification: Notification) {
        self.callbacks.notify(notification);
    }

    /// Fetch a snapshot and fold it into the store.
    ///
    /// With a signal, the fetch is raced against it: when the signal fires
    /// first the response is discarded and `Aborted` is returned.
    pub async fn refresh(&self, signal: Option<&AbortSignal>) -> Result<SnapshotOutcome> {
        let snapshot = match signal {
            Some(signal) => tokio::select! {
                biased;
                _ = signal.cancelled() => {
                    tracing::debug!(instance_id = %self.instance_id, "discarding snapshot fetch: {}", signal.reason());
                    return Err(ClientError::Aborted(signal.reason()));
                }
                result = self.api.get_state(&self.instance_id) => result?,
            },
            None => self.api.get_state(&self.instance_id).await?,
        };
        let outcome = self.store.apply_snapshot(snapshot);
        if let SnapshotOutcome::Rejected(violation) = &outcome {
            self.notify(Notification::error(format!(
                "Ignored inconsistent workflow state: {}",
                violation
            )));
        }
        Ok(outcome)
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Continue,
    Stop {
        outcome: DrainOutcome,
        refresh: bool,
    },
}

/// How an event stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// Stopped at a checkpoint, waiting for input
    Checkpoint,
    Completed,
    /// Workflow error, or an external abort
    Failed(String),
    Cancelled,
    /// Stream closed without a terminal event
    Ended,
    /// Body read failed mid-stream
    Disconnected(String),
    /// Aborted by this client; the superseding operation owns the state
    Aborted(AbortReason),
}

impl DrainOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, DrainOutcome::Aborted(_))
    }
}

/// Applies the events of one run/resume stream. Holds the operation's share
/// of the processing flag and releases it when the stream stops.
pub struct EventReconciler {
    ctx: InstanceContext,
    guard: ProcessingGuard,
}

impl EventReconciler {
    pub fn new(ctx: InstanceContext, guard: ProcessingGuard) -> Self {
        Self { ctx, guard }
    }

    fn finish_processing(&mut self) {
        self.guard.release();
        self.ctx.current_event.clear();
    }

    fn is_terminal(&self) -> bool {
        self.ctx.store.status().is_some_and(|s| s.is_terminal())
    }

    /// Synchronous part of the fold.
    pub fn apply(&mut self, event: &WorkflowEvent) -> Flow {
        tracing::debug!(
            instance_id = %self.ctx.instance_id,
            event_type = %event.event_type,
            node_id = ?event.node_id,
            "event received"
        );
        match event.event_type {
            WorkflowEventType::Error => {
                let message = event
                    .error
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                tracing::warn!(instance_id = %self.ctx.instance_id, "workflow error: {}", message);
                self.ctx.notify(Notification::error(message.clone()));
                self.finish_processing();
                Flow::Stop {
                    outcome: DrainOutcome::Failed(message),
                    refresh: true,
                }
            }
            WorkflowEventType::Complete => {
                tracing::info!(instance_id = %self.ctx.instance_id, "workflow completed");
                self.ctx
                    .notify(Notification::success("Workflow completed successfully"));
                self.finish_processing();
                Flow::Stop {
                    outcome: DrainOutcome::Completed,
                    refresh: true,
                }
            }
            WorkflowEventType::Cancelled => {
                tracing::info!(instance_id = %self.ctx.instance_id, "workflow cancelled by server");
                self.ctx.notify(Notification::info("Workflow cancelled"));
                self.finish_processing();
                self.ctx.store.clear();
                Flow::Stop {
                    outcome: DrainOutcome::Cancelled,
                    refresh: false,
                }
            }
            WorkflowEventType::Checkpoint => {
                tracing::info!(
                    instance_id = %self.ctx.instance_id,
                    node_id = ?event.node_id,
                    "workflow reached checkpoint"
                );
                self.finish_processing();
                Flow::Stop {
                    outcome: DrainOutcome::Checkpoint,
                    refresh: true,
                }
            }
            WorkflowEventType::StepStart
            | WorkflowEventType::StepComplete
            | WorkflowEventType::StepProgress => {
                if self.is_terminal() {
                    tracing::debug!("ignoring {} after terminal status", event.event_type);
                    return Flow::Continue;
                }
                self.ctx.current_event.set(event.clone());
                match (event.event_type, event.node_id.as_deref()) {
                    (WorkflowEventType::StepStart, Some(node_id)) => self.start_node(node_id, event),
                    (WorkflowEventType::StepComplete, Some(node_id)) => {
                        self.complete_node(node_id, event)
                    }
                    _ => {}
                }
                Flow::Continue
            }
        }
    }

    fn start_node(&self, node_id: &str, event: &WorkflowEvent) {
        let name = event.node_name.as_deref().unwrap_or(node_id);
        let node_type = event
            .data_str("node_type")
            .and_then(|t| t.parse::<NodeType>().ok())
            .unwrap_or_default();
        let mut node = CurrentNode::new(node_id, name, node_type);
        if let Some(description) = event.data_str("description") {
            node = node.with_description(description);
        }

        let updated = self.ctx.store.update(|state| {
            if state.status.is_terminal() {
                return;
            }
            for (id, node_state) in state.node_states.iter_mut() {
                if id != node_id && node_state.status == NodeStatus::Running {
                    node_state.status = NodeStatus::Completed;
                }
            }
            let node_state = state
                .node_states
                .entry(node_id.to_string())
                .or_insert_with(|| NodeState::new(NodeStatus::Pending, 0));
            node_state.status = NodeStatus::Running;
            node_state.execution_count += 1;
            state.current_node = Some(node);
            state.status = WorkflowStatus::Running;
        });
        if !updated {
            tracing::debug!(node_id, "step_start before any snapshot, state not updated");
        }
    }

    fn complete_node(&self, node_id: &str, event: &WorkflowEvent) {
        self.ctx.store.update(|state| {
            if state.status.is_terminal() {
                return;
            }
            let node_state = state
                .node_states
                .entry(node_id.to_string())
                .or_insert_with(|| NodeState::new(NodeStatus::Pending, 0));
            node_state.status = NodeStatus::Completed;
            node_state.execution_count = node_state.execution_count.max(1);
            if let Some(data) = event.data.as_ref().filter(|d| !d.is_null()) {
                state.step_data.insert(node_id.to_string(), data.clone());
            }
        });
    }

    /// Apply every event of `stream` until it stops, then refresh the snapshot
    /// when the stop calls for it.
    pub async fn drain(mut self, mut stream: EventStream, signal: &AbortSignal) -> DrainOutcome {
        let instance_id = self.ctx.instance_id.clone();
        let (outcome, refresh) = loop {
            match stream.next().await {
                Some(Ok(event)) => {
                    if let Flow::Stop { outcome, refresh } = self.apply(&event) {
                        break (outcome, refresh);
                    }
                }
                Some(Err(ClientError::Aborted(reason))) if reason.is_self_initiated() => {
                    tracing::debug!(%instance_id, "stream stopped: {}", reason);
                    self.guard.release();
                    return DrainOutcome::Aborted(reason);
                }
                Some(Err(ClientError::Aborted(reason))) => {
                    tracing::warn!(%instance_id, "stream aborted: {}", reason);
                    self.ctx
                        .notify(Notification::error(format!("Workflow stream aborted: {}", reason)));
                    self.finish_processing();
                    return DrainOutcome::Failed(reason.to_string());
                }
                Some(Err(e)) => {
                    tracing::warn!(%instance_id, "stream failed: {}", e);
                    self.ctx
                        .notify(Notification::error(format!("Connection lost: {}", e)));
                    self.finish_processing();
                    break (DrainOutcome::Disconnected(e.to_string()), true);
                }
                None => {
                    tracing::debug!(%instance_id, "stream ended without terminal event");
                    self.finish_processing();
                    break (DrainOutcome::Ended, true);
                }
            }
        };
        // server closes the body after a stop event; do not keep it open during the fetch
        drop(stream);

        if refresh {
            match self.ctx.refresh(Some(signal)).await {
                Ok(_) => {}
                Err(e) if e.is_self_initiated_abort() => {
                    tracing::debug!(%instance_id, "snapshot refresh discarded: {}", e);
                }
                Err(e) => {
                    tracing::warn!(%instance_id, "snapshot refresh failed: {}", e);
                    self.ctx.notify(Notification::error(format!(
                        "Failed to refresh workflow state: {}",
                        e
                    )));
                }
            }
        }
        tracing::info!(%instance_id, ?outcome, "stream finished");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiCall, ScriptedApi, StreamScript};
    use crate::callbacks::{ChannelCallbacks, NotificationLevel};
    use crate::types::{WorkflowId, WorkflowInstanceState};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn running_state() -> WorkflowInstanceState {
        WorkflowInstanceState::new(InstanceId::new("i-1"), WorkflowId::new("wf"))
            .with_status(WorkflowStatus::Running)
    }

    fn setup(
        api: Arc<ScriptedApi>,
    ) -> (InstanceContext, UnboundedReceiver<Notification>) {
        let (callbacks, rx) = ChannelCallbacks::new();
        let ctx = InstanceContext::new(InstanceId::new("i-1"), api, Arc::new(callbacks));
        (ctx, rx)
    }

    fn reconciler(ctx: &InstanceContext) -> EventReconciler {
        EventReconciler::new(ctx.clone(), ctx.processing.acquire())
    }

    #[test]
    fn test_step_start_updates_node_and_status() {
        let (ctx, _rx) = setup(Arc::new(ScriptedApi::new()));
        ctx.store.set(
            running_state()
                .with_status(WorkflowStatus::Pending)
                .with_node_state("A", NodeState::new(NodeStatus::Completed, 1)),
        );
        let mut rec = reconciler(&ctx);

        let event = WorkflowEvent::step_start("A", "Fetch")
            .with_data(json!({"description": "Fetch sources"}));
        assert_eq!(rec.apply(&event), Flow::Continue);

        let state = ctx.store.get().unwrap();
        assert_eq!(state.status, WorkflowStatus::Running);
        assert_eq!(state.node_states["A"], NodeState::new(NodeStatus::Running, 2));
        let node = state.current_node.unwrap();
        assert_eq!(node.name, "Fetch");
        assert_eq!(node.description.as_deref(), Some("Fetch sources"));
        assert_eq!(node.node_type, NodeType::Execute);
        assert_eq!(ctx.current_event.get(), Some(event));
        assert!(ctx.processing.is_processing());
    }

    #[test]
    fn test_step_start_demotes_previous_running_node() {
        let (ctx, _rx) = setup(Arc::new(ScriptedApi::new()));
        ctx.store.set(running_state());
        let mut rec = reconciler(&ctx);
        rec.apply(&WorkflowEvent::step_start("A", "Fetch"));
        let mut event = WorkflowEvent::step_start("B", "Review");
        event.node_name = None;
        event.data = Some(json!({"node_type": "checkpoint"}));
        rec.apply(&event);

        let state = ctx.store.get().unwrap();
        assert_eq!(state.running_nodes(), vec!["B".to_string()]);
        assert_eq!(state.node_states["A"].status, NodeStatus::Completed);
        let node = state.current_node.unwrap();
        assert_eq!(node.name, "B");
        assert!(node.is_checkpoint());
    }

    #[test]
    fn test_step_complete_records_data() {
        let (ctx, _rx) = setup(Arc::new(ScriptedApi::new()));
        ctx.store.set(running_state());
        let mut rec = reconciler(&ctx);
        rec.apply(&WorkflowEvent::step_complete("A").with_data(json!({"text": "draft"})));
        rec.apply(&WorkflowEvent::step_complete("B").with_data(serde_json::Value::Null));

        let state = ctx.store.get().unwrap();
        assert_eq!(state.node_states["A"], NodeState::new(NodeStatus::Completed, 1));
        assert_eq!(state.step_data["A"], json!({"text": "draft"}));
        assert!(!state.step_data.contains_key("B"));
        assert_eq!(state.node_states["B"].status, NodeStatus::Completed);
    }

    #[test]
    fn test_step_progress_only_sets_current_event() {
        let (ctx, _rx) = setup(Arc::new(ScriptedApi::new()));
        ctx.store.set(running_state());
        let before = ctx.store.get();
        let mut rec = reconciler(&ctx);
        let event = WorkflowEvent::step_progress("A", json!({"pct": 40}));
        assert_eq!(rec.apply(&event), Flow::Continue);
        assert_eq!(ctx.store.get(), before);
        assert_eq!(ctx.current_event.get(), Some(event));
    }

    #[test]
    fn test_events_after_terminal_status_do_not_mutate() {
        let (ctx, _rx) = setup(Arc::new(ScriptedApi::new()));
        ctx.store
            .set(running_state().with_status(WorkflowStatus::Completed));
        let before = ctx.store.get();
        let mut rec = reconciler(&ctx);
        rec.apply(&WorkflowEvent::step_start("A", "Fetch"));
        rec.apply(&WorkflowEvent::step_complete("A").with_data(json!(1)));
        assert_eq!(ctx.store.get(), before);
        assert!(ctx.current_event.get().is_none());
    }

    #[test]
    fn test_error_event_notifies_and_stops() {
        let (ctx, mut rx) = setup(Arc::new(ScriptedApi::new()));
        ctx.store.set(running_state());
        let mut rec = reconciler(&ctx);
        rec.apply(&WorkflowEvent::step_start("A", "Fetch"));

        let mut event = WorkflowEvent::error("x");
        event.error = None;
        let flow = rec.apply(&event);
        assert_eq!(
            flow,
            Flow::Stop {
                outcome: DrainOutcome::Failed(UNKNOWN_ERROR.to_string()),
                refresh: true
            }
        );
        assert_eq!(rx.try_recv().unwrap(), Notification::error(UNKNOWN_ERROR));
        assert!(!ctx.processing.is_processing());
        assert!(ctx.current_event.get().is_none());
    }

    #[test]
    fn test_cancelled_event_clears_store() {
        let (ctx, mut rx) = setup(Arc::new(ScriptedApi::new()));
        ctx.store.set(running_state());
        let mut rec = reconciler(&ctx);
        let flow = rec.apply(&WorkflowEvent::cancelled());
        assert_eq!(
            flow,
            Flow::Stop {
                outcome: DrainOutcome::Cancelled,
                refresh: false
            }
        );
        assert!(ctx.store.get().is_none());
        assert_eq!(rx.try_recv().unwrap().level, NotificationLevel::Info);
    }

    #[tokio::test]
    async fn test_drain_checkpoint_refreshes_snapshot() {
        let api = Arc::new(ScriptedApi::new());
        let (ctx, mut rx) = setup(api.clone());
        ctx.store.set(running_state());
        let waiting = running_state()
            .with_status(WorkflowStatus::Waiting)
            .with_current_node(CurrentNode::new("B", "Review", NodeType::Checkpoint))
            .with_node_state("A", NodeState::new(NodeStatus::Completed, 1))
            .with_step_data("A", json!({"text": "draft"}));
        api.push_run(
            StreamScript::new()
                .event(WorkflowEvent::step_start("A", "Fetch"))
                .event(WorkflowEvent::step_complete("A").with_data(json!({"text": "draft"})))
                .event(WorkflowEvent::checkpoint("B", "Review"))
                .then_state(waiting.clone()),
        );

        let signal = AbortSignal::new();
        let stream = api.run(&ctx.instance_id, signal.clone()).await.unwrap();
        let outcome = reconciler(&ctx).drain(stream, &signal).await;

        assert_eq!(outcome, DrainOutcome::Checkpoint);
        assert_eq!(ctx.store.get(), Some(waiting));
        assert!(!ctx.processing.is_processing());
        assert!(rx.try_recv().is_err());
        assert_eq!(api.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_drain_skips_malformed_record() {
        let api = Arc::new(ScriptedApi::new());
        let (ctx, _rx) = setup(api.clone());
        ctx.store.set(running_state());
        api.set_state(running_state());
        api.push_run(
            StreamScript::new()
                .raw("data: {\"event_type\":\"step_start\",\"node_id\":\n\n")
                .event(WorkflowEvent::step_complete("B").with_data(json!("ok")))
                .chunked(5),
        );

        let signal = AbortSignal::new();
        let stream = api.run(&ctx.instance_id, signal.clone()).await.unwrap();
        let outcome = reconciler(&ctx).drain(stream, &signal).await;

        assert_eq!(outcome, DrainOutcome::Ended);
        // step data survives the merge with a snapshot that has none
        let state = ctx.store.get().unwrap();
        assert_eq!(state.status, WorkflowStatus::Running);
        assert_eq!(state.step_data["B"], json!("ok"));
        assert_eq!(api.count_calls(|c| matches!(c, ApiCall::GetState(_))), 1);
    }

    #[tokio::test]
    async fn test_drain_transport_error_notifies_and_refreshes() {
        let api = Arc::new(ScriptedApi::new());
        let (ctx, mut rx) = setup(api.clone());
        ctx.store.set(running_state());
        api.set_state(running_state().with_status(WorkflowStatus::Failed).with_error("lost"));
        api.push_run(
            StreamScript::new()
                .event(WorkflowEvent::step_start("A", "Fetch"))
                .fail("reset by peer"),
        );

        let signal = AbortSignal::new();
        let stream = api.run(&ctx.instance_id, signal.clone()).await.unwrap();
        let outcome = reconciler(&ctx).drain(stream, &signal).await;

        assert!(matches!(outcome, DrainOutcome::Disconnected(_)));
        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.level, NotificationLevel::Error);
        assert!(notification.message.contains("reset by peer"));
        assert_eq!(ctx.store.status(), Some(WorkflowStatus::Failed));
        assert!(ctx.current_event.get().is_none());
    }

    #[tokio::test]
    async fn test_drain_self_initiated_abort_is_silent() {
        let api = Arc::new(ScriptedApi::new());
        let (ctx, mut rx) = setup(api.clone());
        ctx.store.set(running_state());
        api.push_run(
            StreamScript::new()
                .event(WorkflowEvent::step_start("A", "Fetch"))
                .pending(),
        );

        let signal = AbortSignal::new();
        let stream = api.run(&ctx.instance_id, signal.clone()).await.unwrap();
        let rec = reconciler(&ctx);
        let aborter = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            aborter.abort(AbortReason::Superseded);
        });
        let outcome = rec.drain(stream, &signal).await;

        assert_eq!(outcome, DrainOutcome::Aborted(AbortReason::Superseded));
        assert!(rx.try_recv().is_err());
        assert!(!ctx.processing.is_processing());
        assert_eq!(api.count_calls(|c| matches!(c, ApiCall::GetState(_))), 0);
        // the superseding operation owns the current event from here
        assert!(ctx.current_event.get().is_some());
    }

    #[tokio::test]
    async fn test_drain_external_abort_is_reported() {
        let api = Arc::new(ScriptedApi::new());
        let (ctx, mut rx) = setup(api.clone());
        ctx.store.set(running_state());
        api.push_run(StreamScript::new().pending());

        let signal = AbortSignal::new();
        let stream = api.run(&ctx.instance_id, signal.clone()).await.unwrap();
        signal.abort(AbortReason::External("host shutdown".to_string()));
        let outcome = reconciler(&ctx).drain(stream, &signal).await;

        assert!(matches!(outcome, DrainOutcome::Failed(ref m) if m.contains("host shutdown")));
        assert_eq!(rx.try_recv().unwrap().level, NotificationLevel::Error);
    }

    #[tokio::test]
    async fn test_refresh_losing_race_is_discarded() {
        let api = Arc::new(ScriptedApi::new());
        let (ctx, _rx) = setup(api.clone());
        ctx.store.set(running_state());
        api.set_state(running_state().with_status(WorkflowStatus::Completed));
        api.set_state_delay(Some(std::time::Duration::from_millis(200)));

        let signal = AbortSignal::new();
        let aborter = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            aborter.abort(AbortReason::UserCancelled);
        });
        let result = ctx.refresh(Some(&signal)).await;

        assert!(matches!(result, Err(ClientError::Aborted(AbortReason::UserCancelled))));
        assert_eq!(ctx.store.status(), Some(WorkflowStatus::Running));
    }

    #[tokio::test]
    async fn test_refresh_rejects_inconsistent_snapshot() {
        let api = Arc::new(ScriptedApi::new());
        let (ctx, mut rx) = setup(api.clone());
        ctx.store.set(running_state());
        api.set_state(running_state().with_status(WorkflowStatus::Waiting));

        let outcome = ctx.refresh(None).await.unwrap();
        assert!(matches!(outcome, SnapshotOutcome::Rejected(_)));
        assert_eq!(ctx.store.status(), Some(WorkflowStatus::Running));
        assert_eq!(rx.try_recv().unwrap().level, NotificationLevel::Error);
    }
}
