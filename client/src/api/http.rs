//! `WorkflowApi` over HTTP with reqwest.

use super::WorkflowApi;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{decode_event_stream, AbortSignal, EventStream};
use crate::types::{
    InstanceId, ResumeAction, StartRequest, StartResponse, WorkflowInstanceState,
};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, CACHE_CONTROL};
use reqwest::{RequestBuilder, Response};
use serde::Serialize;
use url::Url;

const EVENT_STREAM: &str = "text/event-stream";

#[derive(Serialize)]
struct ResumeBody<'a> {
    action: ResumeAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a serde_json::Value>,
}

#[derive(Clone, Debug)]
pub struct HttpWorkflowApi {
    client: reqwest::Client,
    base: Url,
    auth_token: Option<String>,
}

impl HttpWorkflowApi {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            client: config.build_http_client()?,
            base: config.base()?,
            auth_token: config.auth_token.clone(),
        })
    }

    /// Use a preconfigured client (proxies, custom TLS).
    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            client,
            base: config.base()?,
            auth_token: config.auth_token.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Base url plus percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Config(format!("base_url cannot be a base: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let response = self.authorize(req).send().await?;
        check_status(response).await
    }

    /// Open an event stream, racing the request itself against `signal`.
    async fn open_stream(&self, req: RequestBuilder, signal: AbortSignal) -> Result<EventStream> {
        let req = self
            .authorize(req)
            .header(ACCEPT, HeaderValue::from_static(EVENT_STREAM))
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let response = tokio::select! {
            biased;
            _ = signal.cancelled() => {
                tracing::debug!("stream request aborted before response: {}", signal.reason());
                return Err(ClientError::Aborted(signal.reason()));
            }
            result = req.send() => result?,
        };
        let response = check_status(response).await?;

        if let Some(content_type) = response.headers().get(reqwest::header::CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default();
            if !content_type.starts_with(EVENT_STREAM) {
                tracing::warn!("unexpected content type for event stream: {}", content_type);
            }
        }
        Ok(decode_event_stream(response.bytes_stream(), signal))
    }
}

/// Turn non-2xx responses into `ClientError::Status`.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!("request failed: {} {}", status, body);
    Err(ClientError::from_status(status.as_u16(), &body))
}

#[async_trait]
impl WorkflowApi for HttpWorkflowApi {
    async fn start(&self, request: StartRequest) -> Result<StartResponse> {
        let url = self.endpoint(&["workflows", request.workflow_id.as_str(), "instances"])?;
        tracing::info!(workflow_id = %request.workflow_id, "starting workflow");
        let response = self.send(self.client.post(url).json(&request)).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn run(&self, instance_id: &InstanceId, signal: AbortSignal) -> Result<EventStream> {
        let url = self.endpoint(&["instances", instance_id.as_str(), "run"])?;
        tracing::info!(%instance_id, "opening run stream");
        self.open_stream(self.client.post(url), signal).await
    }

    async fn resume(
        &self,
        instance_id: &InstanceId,
        action: ResumeAction,
        data: Option<serde_json::Value>,
        signal: AbortSignal,
    ) -> Result<EventStream> {
        let url = self.endpoint(&["instances", instance_id.as_str(), "resume"])?;
        tracing::info!(%instance_id, %action, "opening resume stream");
        let body = ResumeBody {
            action,
            data: data.as_ref(),
        };
        self.open_stream(self.client.post(url).json(&body), signal)
            .await
    }

    async fn get_state(&self, instance_id: &InstanceId) -> Result<WorkflowInstanceState> {
        let url = self.endpoint(&["instances", instance_id.as_str()])?;
        let response = self.send(self.client.get(url)).await?;
        let bytes = response.bytes().await?;
        let state: WorkflowInstanceState = serde_json::from_slice(&bytes)?;
        tracing::debug!(%instance_id, status = %state.status, "fetched snapshot");
        Ok(state)
    }

    async fn cancel(&self, instance_id: &InstanceId) -> Result<()> {
        let url = self.endpoint(&["instances", instance_id.as_str(), "cancel"])?;
        self.send(self.client.post(url)).await?;
        Ok(())
    }

    async fn pause(&self, instance_id: &InstanceId) -> Result<()> {
        let url = self.endpoint(&["instances", instance_id.as_str(), "pause"])?;
        self.send(self.client.post(url)).await?;
        Ok(())
    }
}
