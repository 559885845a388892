//! In-memory `WorkflowApi` driven by scripted SSE bodies.
//!
//! Stream bodies are raw bytes fed through the real decoder, so chunk
//! boundaries, malformed records and transport failures can be reproduced
//! without a server.

use super::WorkflowApi;
use crate::error::{ClientError, Result};
use crate::events::{decode_event_stream, AbortSignal, EventStream, FrameEncoder};
use crate::types::{
    InstanceId, ResumeAction, StartRequest, StartResponse, WorkflowEvent, WorkflowId,
    WorkflowInstanceState, WorkflowStatus,
};
use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
enum ScriptItem {
    Chunk(Bytes),
    Fail(String),
    Pending,
}

/// Body of one scripted run/resume stream.
#[derive(Debug, Clone, Default)]
pub struct StreamScript {
    items: Vec<ScriptItem>,
    final_state: Option<WorkflowInstanceState>,
}

impl StreamScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// One event as a complete SSE frame.
    pub fn event(mut self, event: WorkflowEvent) -> Self {
        let encoder = FrameEncoder::new();
        match encoder.encode(&event) {
            Ok((_, frame)) => self.items.push(ScriptItem::Chunk(Bytes::from(frame))),
            Err(e) => self.items.push(ScriptItem::Fail(e.to_string())),
        }
        self
    }

    pub fn events(self, events: impl IntoIterator<Item = WorkflowEvent>) -> Self {
        events.into_iter().fold(self, |script, event| script.event(event))
    }

    /// Raw bytes, sent as one chunk.
    pub fn raw(mut self, raw: impl Into<String>) -> Self {
        self.items
            .push(ScriptItem::Chunk(Bytes::from(raw.into().into_bytes())));
        self
    }

    /// Body read fails with `message`; the stream ends there.
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.items.push(ScriptItem::Fail(message.into()));
        self
    }

    /// Body never ends (until the reader is aborted).
    pub fn pending(mut self) -> Self {
        self.items.push(ScriptItem::Pending);
        self
    }

    /// Server state once the last item is reached.
    pub fn then_state(mut self, state: WorkflowInstanceState) -> Self {
        self.final_state = Some(state);
        self
    }

    /// Re-split consecutive chunks into pieces of `size` bytes.
    pub fn chunked(mut self, size: usize) -> Self {
        let size = size.max(1);
        let mut items = Vec::with_capacity(self.items.len());
        let mut buffer: Vec<u8> = Vec::new();
        let flush = |buffer: &mut Vec<u8>, items: &mut Vec<ScriptItem>| {
            for piece in buffer.chunks(size) {
                items.push(ScriptItem::Chunk(Bytes::copy_from_slice(piece)));
            }
            buffer.clear();
        };
        for item in self.items.drain(..) {
            match item {
                ScriptItem::Chunk(bytes) => buffer.extend_from_slice(&bytes),
                other => {
                    flush(&mut buffer, &mut items);
                    items.push(other);
                }
            }
        }
        flush(&mut buffer, &mut items);
        self.items = items;
        self
    }
}

/// Recorded call of the scripted api
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Start(WorkflowId),
    Run(InstanceId),
    Resume(InstanceId, ResumeAction, Option<serde_json::Value>),
    GetState(InstanceId),
    Cancel(InstanceId),
    Pause(InstanceId),
}

#[derive(Default)]
struct Inner {
    states: HashMap<InstanceId, WorkflowInstanceState>,
    run_scripts: VecDeque<StreamScript>,
    resume_scripts: VecDeque<StreamScript>,
    calls: Vec<ApiCall>,
    next_instance: Option<InstanceId>,
    started: usize,
    fail_cancel: bool,
    fail_pause: bool,
    state_delay: Option<Duration>,
}

/// Decrements the open stream counter when the body is dropped.
struct OpenStreamGuard {
    open: Arc<AtomicUsize>,
}

impl Drop for OpenStreamGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct ScriptedApi {
    inner: Arc<Mutex<Inner>>,
    open_streams: Arc<AtomicUsize>,
    max_open_streams: Arc<AtomicUsize>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_state(self, state: WorkflowInstanceState) -> Self {
        self.set_state(state);
        self
    }

    /// Replace the server-side state of `state.instance_id`.
    pub fn set_state(&self, state: WorkflowInstanceState) {
        self.lock().states.insert(state.instance_id.clone(), state);
    }

    pub fn server_state(&self, instance_id: &InstanceId) -> Option<WorkflowInstanceState> {
        self.lock().states.get(instance_id).cloned()
    }

    /// Instance id returned by the next `start`.
    pub fn with_next_instance(self, instance_id: impl Into<InstanceId>) -> Self {
        self.lock().next_instance = Some(instance_id.into());
        self
    }

    pub fn push_run(&self, script: StreamScript) {
        self.lock().run_scripts.push_back(script);
    }

    pub fn push_resume(&self, script: StreamScript) {
        self.lock().resume_scripts.push_back(script);
    }

    pub fn fail_cancel(&self, fail: bool) {
        self.lock().fail_cancel = fail;
    }

    pub fn fail_pause(&self, fail: bool) {
        self.lock().fail_pause = fail;
    }

    /// Delay every `get_state` response.
    pub fn set_state_delay(&self, delay: Option<Duration>) {
        self.lock().state_delay = delay;
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&ApiCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Streams opened and not yet dropped
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open streams seen
    pub fn max_open_streams(&self) -> usize {
        self.max_open_streams.load(Ordering::SeqCst)
    }

    fn record(&self, call: ApiCall) {
        tracing::debug!("scripted api call: {:?}", call);
        self.lock().calls.push(call);
    }

    fn open(&self, script: Option<StreamScript>, signal: AbortSignal) -> Result<EventStream> {
        let Some(script) = script else {
            return Err(ClientError::from_status(409, "no scripted stream"));
        };
        let open = self.open_streams.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open_streams.fetch_max(open, Ordering::SeqCst);
        let guard = OpenStreamGuard {
            open: self.open_streams.clone(),
        };

        let inner = self.inner.clone();
        let StreamScript { items, final_state } = script;
        let apply_final = move |state: Option<WorkflowInstanceState>| {
            if let Some(state) = state {
                let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.states.insert(state.instance_id.clone(), state);
            }
        };

        let body = stream! {
            let _guard = guard;
            let mut final_state = final_state;
            let total = items.len();
            if total == 0 {
                apply_final(final_state.take());
            }
            for (i, item) in items.into_iter().enumerate() {
                if i + 1 == total {
                    apply_final(final_state.take());
                }
                match item {
                    ScriptItem::Chunk(bytes) => {
                        tokio::task::yield_now().await;
                        yield Ok::<Bytes, ClientError>(bytes);
                    }
                    ScriptItem::Fail(message) => {
                        yield Err(ClientError::Protocol(format!("connection lost: {message}")));
                        return;
                    }
                    ScriptItem::Pending => {
                        futures::future::pending::<()>().await;
                    }
                }
            }
        };
        Ok(decode_event_stream(body, signal))
    }
}

#[async_trait]
impl WorkflowApi for ScriptedApi {
    async fn start(&self, request: StartRequest) -> Result<StartResponse> {
        self.record(ApiCall::Start(request.workflow_id.clone()));
        let mut inner = self.lock();
        inner.started += 1;
        let instance_id = match inner.next_instance.take() {
            Some(id) => id,
            None => InstanceId::new(format!("instance-{}", inner.started)),
        };
        let state = inner
            .states
            .entry(instance_id.clone())
            .or_insert_with(|| {
                WorkflowInstanceState::new(instance_id.clone(), request.workflow_id.clone())
            });
        state.input = Some(request.input);
        Ok(StartResponse {
            instance_id,
            workflow_id: request.workflow_id,
            status: state.status,
        })
    }

    async fn run(&self, instance_id: &InstanceId, signal: AbortSignal) -> Result<EventStream> {
        self.record(ApiCall::Run(instance_id.clone()));
        let script = self.lock().run_scripts.pop_front();
        self.open(script, signal)
    }

    async fn resume(
        &self,
        instance_id: &InstanceId,
        action: ResumeAction,
        data: Option<serde_json::Value>,
        signal: AbortSignal,
    ) -> Result<EventStream> {
        self.record(ApiCall::Resume(instance_id.clone(), action, data));
        let script = self.lock().resume_scripts.pop_front();
        self.open(script, signal)
    }

    async fn get_state(&self, instance_id: &InstanceId) -> Result<WorkflowInstanceState> {
        self.record(ApiCall::GetState(instance_id.clone()));
        let delay = self.lock().state_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.lock()
            .states
            .get(instance_id)
            .cloned()
            .ok_or_else(|| ClientError::from_status(404, "instance not found"))
    }

    async fn cancel(&self, instance_id: &InstanceId) -> Result<()> {
        self.record(ApiCall::Cancel(instance_id.clone()));
        let mut inner = self.lock();
        if inner.fail_cancel {
            return Err(ClientError::from_status(503, "cancel unavailable"));
        }
        if let Some(state) = inner.states.get_mut(instance_id) {
            if !state.status.is_terminal() {
                state.status = WorkflowStatus::Cancelled;
            }
        }
        Ok(())
    }

    async fn pause(&self, instance_id: &InstanceId) -> Result<()> {
        self.record(ApiCall::Pause(instance_id.clone()));
        let mut inner = self.lock();
        if inner.fail_pause {
            return Err(ClientError::from_status(503, "pause unavailable"));
        }
        if let Some(state) = inner.states.get_mut(instance_id) {
            if !state.status.is_terminal() {
                state.status = WorkflowStatus::Paused;
                state.current_node = None;
            }
        }
        Ok(())
    }
}
