//! Trigger Dispatcher (`spec.md` §4.3).
//!
//! Composes the submission request — recognised overrides plus CI/git
//! metadata — and submits it through the [`BackendClient`].

use std::time::Duration;

use crate::backend::{BackendClient, BackendError};
use crate::metadata::{self, CiGitMetadata};
use crate::model::{TestPayload, TriggerResponse};
use crate::retry::retry;

/// Retries a transient (server or transport) failure up to this many times,
/// with an exponential backoff starting at 500ms. A 404/403 is never
/// transient and is never retried.
const MAX_RETRIES: u32 = 3;

fn backoff_decider(retries: u32, error: &BackendError) -> Option<Duration> {
    if retries >= MAX_RETRIES {
        return None;
    }
    match error {
        BackendError::Server { .. } | BackendError::Transport(_) => {
            Some(Duration::from_millis(100 * 2u64.pow(retries)))
        }
        BackendError::NotFound(_) | BackendError::Forbidden(_) => None,
    }
}

/// Error wrapping a failed trigger call, naming every public id that was in
/// the submitted batch.
#[derive(Debug, thiserror::Error)]
#[error("failed to trigger tests {public_ids:?}: {source}")]
pub struct TriggerError {
    pub public_ids: Vec<String>,
    #[source]
    pub source: BackendError,
}

impl TriggerError {
    /// HTTP status of the underlying failure, if one was received.
    pub fn status(&self) -> Option<u16> {
        self.source.status()
    }
}

/// Submits `payloads` to the backend, attaching CI/git metadata and the
/// configured `trigger_app` tag. On failure, wraps the error with every
/// submitted public id and the HTTP status if present (`spec.md` §4.3).
pub async fn trigger_tests(
    backend: &dyn BackendClient,
    payloads: Vec<TestPayload>,
) -> Result<TriggerResponse, TriggerError> {
    let public_ids: Vec<String> = payloads.iter().map(|p| p.public_id.clone()).collect();
    let metadata = build_metadata();

    retry(
        || backend.trigger_tests(&payloads, &metadata),
        backoff_decider,
    )
    .await
    .map_err(|source| TriggerError { public_ids, source })
}

fn build_metadata() -> CiGitMetadata {
    // trigger_app travels as a sibling field on the outer request body
    // rather than inside CiGitMetadata; BackendClient::trigger_tests reads
    // it separately via metadata::trigger_app() when composing the body.
    metadata::collect()
}
