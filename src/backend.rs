//! Backend client and tunnel contracts (`spec.md` §6).
//!
//! The concrete HTTP implementation lives here too, but the rest of the
//! crate only ever depends on the [`BackendClient`]/[`Tunnel`] traits, so a
//! test double can stand in for the real backend.

use async_trait::async_trait;

use crate::metadata::CiGitMetadata;
use crate::model::{InternalTest, PollResultsResponse, TestPayload, TriggerResponse};

/// Errors surfaced by the backend client, distinguishing the classes the
/// rest of the pipeline must react to differently.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("test not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("backend server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl BackendError {
    pub fn is_server_error(&self) -> bool {
        matches!(self, BackendError::Server { .. })
    }

    /// HTTP status code, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Server { status, .. } => Some(*status),
            BackendError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

fn classify_status(status: reqwest::StatusCode, body: String) -> BackendError {
    if status == reqwest::StatusCode::NOT_FOUND {
        BackendError::NotFound(body)
    } else if status == reqwest::StatusCode::FORBIDDEN {
        BackendError::Forbidden(body)
    } else {
        BackendError::Server {
            status: status.as_u16(),
            message: body,
        }
    }
}

/// What the core needs from the remote synthetics backend.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Fetches a test's definition. Distinguishes not-found (404) and
    /// forbidden (403) from other failures.
    async fn get_test(&self, public_id: &str) -> Result<InternalTest, BackendError>;

    /// Requests the terminal state of a batch of in-flight results. The
    /// response may omit ids that are still pending.
    async fn poll_results(
        &self,
        result_ids: &[String],
    ) -> Result<PollResultsResponse, BackendError>;

    /// Submits a batch of test payloads. All-or-nothing: either every
    /// payload is accepted, or the whole call fails.
    async fn trigger_tests(
        &self,
        payloads: &[TestPayload],
        metadata: &CiGitMetadata,
    ) -> Result<TriggerResponse, BackendError>;
}

/// Keeps a reverse tunnel to a local server alive for the duration of the
/// invocation.
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Resolves on graceful close, errors on failure. Either outcome means
    /// the tunnel is no longer usable.
    async fn keep_alive(&self) -> Result<(), anyhow::Error>;
}

/// Real backend client talking to the synthetics API over HTTPS.
pub struct HttpBackendClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    app_key: String,
}

impl HttpBackendClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            app_key: app_key.into(),
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("DD-API-KEY", &self.api_key)
            .header("DD-APPLICATION-KEY", &self.app_key)
    }

    async fn error_from_response(resp: reqwest::Response) -> BackendError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        classify_status(status, body)
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn get_test(&self, public_id: &str) -> Result<InternalTest, BackendError> {
        let url = format!("{}/api/v1/synthetics/tests/{public_id}", self.base_url);
        let resp = self.authed(self.client.get(&url)).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn poll_results(
        &self,
        result_ids: &[String],
    ) -> Result<PollResultsResponse, BackendError> {
        let url = format!("{}/api/v1/synthetics/tests/poll_results", self.base_url);
        let resp = self
            .authed(self.client.get(&url))
            .query(&[("result_ids", result_ids.join(","))])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn trigger_tests(
        &self,
        payloads: &[TestPayload],
        metadata: &CiGitMetadata,
    ) -> Result<TriggerResponse, BackendError> {
        let url = format!("{}/api/v1/synthetics/tests/trigger/ci", self.base_url);
        let body = serde_json::json!({
            "tests": payloads,
            "metadata": metadata,
            "trigger_app": crate::metadata::trigger_app(),
        });
        let resp = self.authed(self.client.post(&url)).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await?)
    }
}
