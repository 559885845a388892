//! Remote workflow engine API.

pub mod http;
#[cfg(any(test, feature = "test-utils"))]
pub mod scripted;

pub use http::HttpWorkflowApi;
#[cfg(any(test, feature = "test-utils"))]
pub use scripted::{ApiCall, ScriptedApi, StreamScript};

use crate::error::Result;
use crate::events::{AbortSignal, EventStream};
use crate::types::{
    InstanceId, ResumeAction, StartRequest, StartResponse, WorkflowInstanceState,
};
use async_trait::async_trait;

/// Operations of the remote engine the client depends on.
///
/// `run` and `resume` return a lazy event stream that ends when the engine
/// stops (checkpoint, completion, error, cancel) or when `signal` fires.
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    async fn start(&self, request: StartRequest) -> Result<StartResponse>;

    async fn run(&self, instance_id: &InstanceId, signal: AbortSignal) -> Result<EventStream>;

    async fn resume(
        &self,
        instance_id: &InstanceId,
        action: ResumeAction,
        data: Option<serde_json::Value>,
        signal: AbortSignal,
    ) -> Result<EventStream>;

    async fn get_state(&self, instance_id: &InstanceId) -> Result<WorkflowInstanceState>;

    async fn cancel(&self, instance_id: &InstanceId) -> Result<()>;

    async fn pause(&self, instance_id: &InstanceId) -> Result<()>;
}
