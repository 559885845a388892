//! User-facing operations on one workflow instance.
//!
//! Every remote operation that opens an event stream goes through a single
//! active slot: a new operation aborts the previous one, waits for it to
//! settle, and only then opens its own stream. At most one stream is ever
//! open per instance.


use crate::api::WorkflowApi;
use crate::callbacks::{HostCallbacks, Notification};
use crate::error::{ClientError, Result};
use crate::events::{AbortReason, AbortSignal, EventStream};
use crate::reconciler::{DrainOutcome, EventReconciler, InstanceContext};
use crate::store::SnapshotOutcome;
use crate::types::{
    InstanceId, ResumeAction, StartRequest, WorkflowEvent, WorkflowInstanceState, WorkflowStatus,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// The one live remote operation of an instance.
struct ActiveOperation {
    id: u64,
    operation: &'static str,
    signal: AbortSignal,
    done: watch::Receiver<bool>,
}

impl ActiveOperation {
    /// Abort and wait until the drain task has returned (its stream dropped,
    /// its processing share released).
    async fn abort_and_settle(mut self, reason: AbortReason) {
        tracing::debug!(
            operation_id = self.id,
            operation = self.operation,
            "aborting operation: {}",
            reason
        );
        self.signal.abort(reason);
        // a dropped sender means the task is gone too
        let _ = self.done.wait_for(|done| *done).await;
    }
}

struct Inner {
    ctx: InstanceContext,
    active: Mutex<Option<ActiveOperation>>,
    /// Task of the operation spawned by `start`, until someone joins it
    started: Mutex<Option<JoinHandle<Result<DrainOutcome>>>>,
    next_operation_id: AtomicU64,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active
                .signal
                .abort(AbortReason::External("workflow handlers dropped".to_string()));
        }
    }
}

/// Handlers bound to one instance. Cheap to clone; clones share the same
/// store, processing flag and active operation.
#[derive(Clone)]
pub struct WorkflowHandlers {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WorkflowHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandlers")
            .field("instance_id", &self.inner.ctx.instance_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for WorkflowHandlers {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl WorkflowHandlers {
    /// Handlers with an empty store. Nothing is fetched.
    pub fn new(
        instance_id: InstanceId,
        api: Arc<dyn WorkflowApi>,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx: InstanceContext::new(instance_id, api, callbacks),
                active: Mutex::new(None),
                started: Mutex::new(None),
                next_operation_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Start a new instance.
    ///
    /// Returns as soon as the engine has created the instance, with the store
    /// still empty. The first snapshot fetch and the `run` stream happen on a
    /// background operation; follow them through [`Self::subscribe_state`].
    pub async fn start(
        api: Arc<dyn WorkflowApi>,
        request: StartRequest,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> Result<Self> {
        let response = api.start(request).await?;
        tracing::info!(
            instance_id = %response.instance_id,
            workflow_id = %response.workflow_id,
            "workflow instance created"
        );
        let handlers = Self::new(response.instance_id, api, callbacks);
        let task = handlers
            .launch("start", |ctx, signal| async move {
                ctx.refresh(Some(&signal)).await?;
                ctx.api.run(&ctx.instance_id, signal).await
            })
            .await?;
        *handlers.inner.started.lock().await = Some(task);
        Ok(handlers)
    }

    /// Handlers for an existing instance, loaded with its current snapshot.
    pub async fn attach(
        instance_id: InstanceId,
        api: Arc<dyn WorkflowApi>,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> Result<Self> {
        let handlers = Self::new(instance_id, api, callbacks);
        handlers.inner.ctx.refresh(None).await?;
        Ok(handlers)
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.inner.ctx.instance_id
    }

    /// True after `cancel`; every later operation fails with `InstanceClosed`.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> Option<WorkflowInstanceState> {
        self.inner.ctx.store.get()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<Option<WorkflowInstanceState>> {
        self.inner.ctx.store.subscribe()
    }

    pub fn is_processing(&self) -> bool {
        self.inner.ctx.processing.is_processing()
    }

    /// In-flight count; processing while above zero.
    pub fn subscribe_processing(&self) -> watch::Receiver<usize> {
        self.inner.ctx.processing.subscribe()
    }

    pub fn current_event(&self) -> Option<WorkflowEvent> {
        self.inner.ctx.current_event.get()
    }

    pub fn subscribe_current_event(&self) -> watch::Receiver<Option<WorkflowEvent>> {
        self.inner.ctx.current_event.subscribe()
    }

    /// Continue from the checkpoint with the current data.
    pub async fn approve(&self, data: Option<serde_json::Value>) -> Result<DrainOutcome> {
        self.resume("approve", ResumeAction::Approve, data).await
    }

    /// Continue from the checkpoint with edited data.
    pub async fn edit(&self, data: serde_json::Value) -> Result<DrainOutcome> {
        self.resume("edit", ResumeAction::Edit, Some(data)).await
    }

    pub async fn reject(&self) -> Result<DrainOutcome> {
        self.resume("reject", ResumeAction::Reject, None).await
    }

    /// Continue a paused or not yet started instance.
    pub async fn run(&self) -> Result<DrainOutcome> {
        self.require_status("run", |s| {
            matches!(s, WorkflowStatus::Paused | WorkflowStatus::Pending)
        })?;
        let task = self
            .launch("run", |ctx, signal| async move {
                ctx.api.run(&ctx.instance_id, signal).await
            })
            .await?;
        join(task).await
    }

    /// Cancel the instance.
    ///
    /// Local state is cleared before the server is told; a failed server
    /// cancel is only logged. The handlers are closed afterwards.
    pub async fn cancel(&self) -> Result<()> {
        self.ensure_open()?;
        if let Some(status) = self.inner.ctx.store.status() {
            if status.is_terminal() {
                return Err(ClientError::IllegalState {
                    operation: "cancel",
                    status,
                });
            }
        }
        let ctx = &self.inner.ctx;
        let _processing = ctx.processing.acquire();
        {
            let mut active = self.inner.active.lock().await;
            // a concurrent cancel may have won the lock
            self.ensure_open()?;
            if let Some(previous) = active.take() {
                previous.abort_and_settle(AbortReason::UserCancelled).await;
            }
            self.inner.closed.store(true, Ordering::SeqCst);
            ctx.store.clear();
            ctx.current_event.clear();
        }
        tracing::info!(instance_id = %ctx.instance_id, "workflow cancelled locally");

        if let Err(e) = ctx.api.cancel(&ctx.instance_id).await {
            tracing::warn!(instance_id = %ctx.instance_id, "server cancel failed (ignored): {}", e);
        }
        ctx.notify(Notification::info("Workflow cancelled"));
        Ok(())
    }

    /// Pause a running instance and refresh its snapshot.
    pub async fn pause(&self) -> Result<SnapshotOutcome> {
        self.require_status("pause", |s| s == WorkflowStatus::Running)?;
        let ctx = &self.inner.ctx;
        let _processing = ctx.processing.acquire();
        {
            let mut active = self.inner.active.lock().await;
            self.ensure_open()?;
            if let Some(previous) = active.take() {
                previous.abort_and_settle(AbortReason::Paused).await;
            }
            ctx.current_event.clear();
        }
        if let Err(e) = ctx.api.pause(&ctx.instance_id).await {
            tracing::warn!(instance_id = %ctx.instance_id, "server pause failed (ignored): {}", e);
        }
        ctx.refresh(None).await
    }

    /// Fetch the current snapshot now.
    pub async fn refresh(&self) -> Result<SnapshotOutcome> {
        self.ensure_open()?;
        self.inner.ctx.refresh(None).await
    }

    /// Resolves once the live operation (if any) has settled.
    pub async fn wait_idle(&self) {
        let done = self
            .inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|active| active.done.clone());
        if let Some(mut done) = done {
            let _ = done.wait_for(|done| *done).await;
        }
    }

    /// Outcome of the operation spawned by [`Self::start`]. `None` when the
    /// handlers were not started or the outcome was already taken.
    pub async fn join_started(&self) -> Option<Result<DrainOutcome>> {
        let task = self.inner.started.lock().await.take()?;
        Some(join(task).await)
    }

    async fn resume(
        &self,
        operation: &'static str,
        action: ResumeAction,
        data: Option<serde_json::Value>,
    ) -> Result<DrainOutcome> {
        self.require_status(operation, |s| s == WorkflowStatus::Waiting)?;
        let task = self
            .launch(operation, move |ctx, signal| async move {
                ctx.api
                    .resume(&ctx.instance_id, action, data, signal)
                    .await
            })
            .await?;
        join(task).await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::InstanceClosed(
                self.inner.ctx.instance_id.clone(),
            ));
        }
        Ok(())
    }

    fn require_status(
        &self,
        operation: &'static str,
        allowed: impl Fn(WorkflowStatus) -> bool,
    ) -> Result<WorkflowStatus> {
        self.ensure_open()?;
        match self.inner.ctx.store.status() {
            None => Err(ClientError::StateNotLoaded(
                self.inner.ctx.instance_id.clone(),
            )),
            Some(status) if allowed(status) => Ok(status),
            Some(status) => Err(ClientError::IllegalState { operation, status }),
        }
    }

    /// Replace the active operation with a new one.
    ///
    /// The processing share is taken first, then the previous operation is
    /// aborted and awaited under the slot lock, then `open` runs on a spawned
    /// task that drains the stream it returns.
    async fn launch<F, Fut>(
        &self,
        operation: &'static str,
        open: F,
    ) -> Result<JoinHandle<Result<DrainOutcome>>>
    where
        F: FnOnce(InstanceContext, AbortSignal) -> Fut + Send + 'static,
        Fut: Future<Output = Result<EventStream>> + Send + 'static,
    {
        let guard = self.inner.ctx.processing.acquire();
        let mut active = self.inner.active.lock().await;
        self.ensure_open()?;
        if let Some(previous) = active.take() {
            previous.abort_and_settle(AbortReason::Superseded).await;
        }

        let id = self.inner.next_operation_id.fetch_add(1, Ordering::SeqCst);
        let signal = AbortSignal::new();
        let (done_tx, done_rx) = watch::channel(false);
        let ctx = self.inner.ctx.clone();
        let task_signal = signal.clone();
        tracing::info!(instance_id = %ctx.instance_id, operation_id = id, operation, "operation started");

        let task = tokio::spawn(async move {
            let result = match open(ctx.clone(), task_signal.clone()).await {
                Ok(stream) => Ok(EventReconciler::new(ctx, guard)
                    .drain(stream, &task_signal)
                    .await),
                Err(ClientError::Aborted(reason)) if reason.is_self_initiated() => {
                    drop(guard);
                    tracing::debug!(operation, "aborted before the stream opened: {}", reason);
                    Ok(DrainOutcome::Aborted(reason))
                }
                Err(e) => {
                    tracing::warn!(instance_id = %ctx.instance_id, operation, "operation failed: {}", e);
                    ctx.notify(Notification::error(format!(
                        "Failed to {} workflow: {}",
                        operation, e
                    )));
                    // resync with the server, the mirror may be stale or still empty
                    match ctx.refresh(Some(&task_signal)).await {
                        Ok(_) => {}
                        Err(refresh_err) if refresh_err.is_self_initiated_abort() => {
                            tracing::debug!(operation, "snapshot refresh discarded: {}", refresh_err);
                        }
                        Err(refresh_err) => {
                            tracing::warn!(
                                instance_id = %ctx.instance_id,
                                operation,
                                "snapshot refresh after failed open failed: {}",
                                refresh_err
                            );
                        }
                    }
                    drop(guard);
                    Err(e)
                }
            };
            done_tx.send_replace(true);
            result
        });

        *active = Some(ActiveOperation {
            id,
            operation,
            signal,
            done: done_rx,
        });
        Ok(task)
    }
}

async fn join(task: JoinHandle<Result<DrainOutcome>>) -> Result<DrainOutcome> {
    task.await
        .map_err(|e| ClientError::Internal(anyhow::anyhow!("operation task failed: {}", e)))?
}
