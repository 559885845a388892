//! View registries: keyed lookups that always yield a view.

use crate::types::{
    NodeStatus, PayloadKind, WorkflowEvent, WorkflowId, WorkflowInstanceState, WorkspacePayload,
};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::hash::Hash;
use std::sync::Arc;

/// Renders a pinned payload.
pub trait PayloadView: Send + Sync {
    fn name(&self) -> &str;
    fn render(&self, payload: &WorkspacePayload) -> String;
}

/// Renders a workflow instance.
pub trait WorkflowView: Send + Sync {
    fn name(&self) -> &str;
    fn render(&self, state: &WorkflowInstanceState, current_event: Option<&WorkflowEvent>) -> String;
}

/// Mapping with a mandatory fallback: unknown keys get the fallback view.
pub struct ViewRegistry<K, V: ?Sized> {
    views: HashMap<K, Arc<V>>,
    fallback: Arc<V>,
}

impl<K, V> ViewRegistry<K, V>
where
    K: Eq + Hash,
    V: ?Sized,
{
    pub fn new(fallback: Arc<V>) -> Self {
        Self {
            views: HashMap::new(),
            fallback,
        }
    }

    /// Returns the view previously registered for `key`.
    pub fn register(&mut self, key: K, view: Arc<V>) -> Option<Arc<V>> {
        self.views.insert(key, view)
    }

    pub fn with(mut self, key: K, view: Arc<V>) -> Self {
        self.register(key, view);
        self
    }

    pub fn get(&self, key: &K) -> Arc<V> {
        self.views
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.views.contains_key(key)
    }

    pub fn fallback(&self) -> Arc<V> {
        self.fallback.clone()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

/// Pretty-printed JSON.
#[derive(Debug, Default)]
pub struct JsonPayloadView;

impl PayloadView for JsonPayloadView {
    fn name(&self) -> &str {
        "json"
    }

    fn render(&self, payload: &WorkspacePayload) -> String {
        let body = serde_json::to_string_pretty(&payload.data)
            .unwrap_or_else(|_| payload.data.to_string());
        match &payload.title {
            Some(title) => format!("{}\n{}", title, body),
            None => body,
        }
    }
}

/// Status, current node and node table of any workflow.
#[derive(Debug, Default)]
pub struct GenericWorkflowView;

impl WorkflowView for GenericWorkflowView {
    fn name(&self) -> &str {
        "generic"
    }

    fn render(&self, state: &WorkflowInstanceState, current_event: Option<&WorkflowEvent>) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} [{}] {}",
            state.workflow_id, state.instance_id, state.status
        );
        if let Some(node) = &state.current_node {
            let _ = write!(out, "  at {} ({})", node.name, node.node_type);
            if let Some(description) = &node.description {
                let _ = write!(out, ": {}", description);
            }
            out.push('\n');
        }
        if let Some(event) = current_event {
            let _ = writeln!(
                out,
                "  now: {} {}",
                event.event_type,
                event.node_name.as_deref().or(event.node_id.as_deref()).unwrap_or("")
            );
        }
        let mut nodes: Vec<_> = state.node_states.iter().collect();
        nodes.sort_by(|a, b| a.0.cmp(b.0));
        for (node_id, node_state) in nodes {
            let marker = match node_state.status {
                NodeStatus::Running => '>',
                NodeStatus::Completed => '+',
                NodeStatus::Failed => '!',
                NodeStatus::Skipped => '-',
                NodeStatus::Pending => ' ',
            };
            let _ = writeln!(
                out,
                "  {} {} {} x{}",
                marker, node_id, node_state.status, node_state.execution_count
            );
        }
        if let Some(error) = &state.error {
            let _ = writeln!(out, "  error: {}", error);
        }
        out
    }
}

/// Payload and workflow view lookups of a host.
pub struct ViewRegistries {
    payload_views: ViewRegistry<PayloadKind, dyn PayloadView>,
    workflow_views: ViewRegistry<WorkflowId, dyn WorkflowView>,
}

impl Default for ViewRegistries {
    fn default() -> Self {
        Self::new(Arc::new(JsonPayloadView), Arc::new(GenericWorkflowView))
    }
}

impl ViewRegistries {
    pub fn new(
        payload_fallback: Arc<dyn PayloadView>,
        workflow_fallback: Arc<dyn WorkflowView>,
    ) -> Self {
        Self {
            payload_views: ViewRegistry::new(payload_fallback),
            workflow_views: ViewRegistry::new(workflow_fallback),
        }
    }

    pub fn register_payload_view(&mut self, kind: impl Into<PayloadKind>, view: Arc<dyn PayloadView>) {
        self.payload_views.register(kind.into(), view);
    }

    pub fn register_workflow_view(
        &mut self,
        workflow_id: impl Into<WorkflowId>,
        view: Arc<dyn WorkflowView>,
    ) {
        self.workflow_views.register(workflow_id.into(), view);
    }

    pub fn get_payload_view(&self, kind: &PayloadKind) -> Arc<dyn PayloadView> {
        self.payload_views.get(kind)
    }

    pub fn get_workflow_view(&self, workflow_id: &WorkflowId) -> Arc<dyn WorkflowView> {
        self.workflow_views.get(workflow_id)
    }
}
