//! Polling Engine (`spec.md` §4.4).
//!
//! Drives trigger results to a terminal state: either a real poll-result
//! returned by the backend, or a synthesised one (`TIMEOUT`, `TUNNEL`,
//! `ENDPOINT`) when the corresponding failure condition is observed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{BackendClient, BackendError, Tunnel};
use crate::model::{Device, PollResult, ResultError, ResultPayload, TriggerResponse, TriggerResult};
use crate::report::Reporter;

/// Default interval between polling batches (`spec.md` §4.4).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Debug, thiserror::Error)]
pub enum PollingError {
    #[error("polling failed: {0}")]
    Backend(#[from] BackendError),
}

/// Inputs to a single polling run.
pub struct PollingConfig {
    pub default_polling_timeout_ms: u64,
    pub fail_on_critical_errors: bool,
    pub fail_on_timeout: bool,
    /// Overridable only so tests don't have to wait 5 real seconds per
    /// iteration; production callers should leave this at
    /// [`DEFAULT_POLL_INTERVAL`].
    pub poll_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_polling_timeout_ms: 30_000,
            fail_on_critical_errors: false,
            fail_on_timeout: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

fn synthesize(trigger_result: &TriggerResult, error: ResultError, tunnel_present: bool) -> PollResult {
    PollResult {
        result_id: trigger_result.item.result_id.clone(),
        dc_id: Some(trigger_result.item.location.clone()),
        timestamp: 0,
        result: ResultPayload {
            passed: Some(false),
            error: Some(error),
            error_code: None,
            unhealthy: None,
            event_type: "finished".to_string(),
            duration: Some(0.0),
            timings: None,
            tunnel: tunnel_present,
            step_details: Vec::new(),
            device: Device {
                id: trigger_result.item.device.clone(),
                width: 0,
                height: 0,
            },
            start_url: String::new(),
        },
    }
}

/// Polls every result in `trigger_response` to a terminal state.
///
/// `polling_timeout_for` resolves a per-test `pollingTimeout` override (in
/// ms) for a given public id, falling back to
/// `config.default_polling_timeout_ms` when it returns `None`.
///
/// Returns `public_id -> list<PollResult>`, ordered as the trigger response
/// listed them.
pub async fn poll_results(
    backend: &dyn BackendClient,
    trigger_response: &TriggerResponse,
    polling_timeout_for: impl Fn(&str) -> Option<u64>,
    tunnel: Option<Arc<dyn Tunnel>>,
    config: &PollingConfig,
    reporter: &dyn Reporter,
) -> Result<HashMap<String, Vec<PollResult>>, PollingError> {
    let mut state: HashMap<String, TriggerResult> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for item in &trigger_response.results {
        let timeout_ms = polling_timeout_for(&item.public_id)
            .unwrap_or(config.default_polling_timeout_ms);
        order.push(item.result_id.clone());
        state.insert(
            item.result_id.clone(),
            TriggerResult {
                item: item.clone(),
                polling_timeout_ms: timeout_ms,
                result: None,
            },
        );
    }

    let max_timeout_ms = state.values().map(|t| t.polling_timeout_ms).max().unwrap_or(0);
    let tunnel_present = tunnel.is_some();
    let is_tunnel_connected = Arc::new(AtomicBool::new(true));

    if let Some(tunnel) = tunnel {
        let flag = is_tunnel_connected.clone();
        tokio::spawn(async move {
            // Either outcome of keep_alive flips liveness off; the result
            // itself carries no further information for the poll loop.
            let _ = tunnel.keep_alive().await;
            flag.store(false, Ordering::SeqCst);
        });
    }

    let polling_start = Instant::now();

    loop {
        let elapsed_ms = polling_start.elapsed().as_millis() as u64;

        // Step 2: per-test deadline.
        for trigger_result in state.values_mut() {
            if trigger_result.is_pending() && elapsed_ms >= trigger_result.polling_timeout_ms {
                trigger_result.result = Some(synthesize(
                    trigger_result,
                    ResultError::Timeout,
                    tunnel_present,
                ));
            }
        }

        // Step 3: tunnel liveness.
        if tunnel_present && !is_tunnel_connected.load(Ordering::SeqCst) {
            for trigger_result in state.values_mut() {
                if trigger_result.is_pending() {
                    trigger_result.result = Some(synthesize(
                        trigger_result,
                        ResultError::Tunnel,
                        tunnel_present,
                    ));
                }
            }
        }

        // Step 4: global deadline.
        if elapsed_ms >= max_timeout_ms {
            break;
        }

        let pending_ids: Vec<String> = state
            .values()
            .filter(|t| t.is_pending())
            .map(|t| t.item.result_id.clone())
            .collect();

        if pending_ids.is_empty() {
            break;
        }

        // Step 5: batched poll.
        match backend.poll_results(&pending_ids).await {
            Ok(response) => {
                for result in response.results {
                    if !result.result.is_finished() {
                        continue;
                    }
                    if let Some(trigger_result) = state.get_mut(&result.result_id) {
                        if trigger_result.is_pending() {
                            reporter.result_received(&result).await;
                            trigger_result.result = Some(result);
                        }
                    }
                }
            }
            Err(err) if err.is_server_error() && !config.fail_on_critical_errors => {
                for trigger_result in state.values_mut() {
                    if trigger_result.is_pending() {
                        trigger_result.result = Some(synthesize(
                            trigger_result,
                            ResultError::Endpoint,
                            tunnel_present,
                        ));
                    }
                }
            }
            Err(err) => return Err(PollingError::Backend(err)),
        }

        // Step 6: sleep and iterate, unless everything already settled.
        if state.values().any(|t| t.is_pending()) {
            tokio::time::sleep(config.poll_interval).await;
        } else {
            break;
        }
    }

    let mut by_public_id: HashMap<String, Vec<PollResult>> = HashMap::new();
    for result_id in order {
        if let Some(trigger_result) = state.remove(&result_id) {
            if let Some(result) = trigger_result.result {
                by_public_id
                    .entry(trigger_result.item.public_id.clone())
                    .or_default()
                    .push(result);
            }
        }
    }

    Ok(by_public_id)
}
