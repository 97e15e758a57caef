//! Shared data types for the trigger-and-wait pipeline.
//!
//! These mirror the backend's wire shapes closely enough to (de)serialise
//! directly, while giving the rest of the crate typed access instead of
//! loose JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Kind of synthetic test the backend can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Api,
    Browser,
}

/// CI execution policy for a test, in strictness order
/// `Skipped > NonBlocking > Blocking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionRule {
    Blocking,
    NonBlocking,
    Skipped,
}

impl Default for ExecutionRule {
    fn default() -> Self {
        ExecutionRule::Blocking
    }
}

/// `options.ci` block of an [`InternalTest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CiOptions {
    #[serde(default, rename = "executionRule")]
    pub execution_rule: Option<ExecutionRule>,
}

/// `options` block of an [`InternalTest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestOptions {
    #[serde(default)]
    pub ci: CiOptions,
}

/// `config.request` block of an [`InternalTest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestConfig {
    pub url: Option<String>,
}

/// `config` block of an [`InternalTest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default)]
    pub request: RequestConfig,
}

/// The backend's description of a test. Immutable within an invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalTest {
    pub public_id: String,
    #[serde(rename = "type")]
    pub test_type: TestType,
    pub subtype: Option<String>,
    #[serde(default)]
    pub config: TestConfig,
    #[serde(default)]
    pub options: TestOptions,
}

impl InternalTest {
    /// A test is treated as HTTP-shaped for the purposes of `startUrl`
    /// substitution if it's a browser test, or an api test with the
    /// `http` subtype.
    pub fn accepts_start_url(&self) -> bool {
        match self.test_type {
            TestType::Browser => true,
            TestType::Api => self.subtype.as_deref() == Some("http"),
        }
    }

    pub fn execution_rule(&self) -> ExecutionRule {
        self.options.ci.execution_rule.unwrap_or_default()
    }
}

/// User-supplied recognised options for a single test. Unknown JSON keys
/// are discarded by `serde` (no `deny_unknown_fields`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Override {
    #[serde(default, rename = "allowInsecureCertificates", skip_serializing_if = "Option::is_none")]
    pub allow_insecure_certificates: Option<bool>,
    #[serde(default, rename = "basicAuth", skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, rename = "bodyType", skip_serializing_if = "Option::is_none")]
    pub body_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<serde_json::Value>,
    #[serde(default, rename = "defaultStepTimeout", skip_serializing_if = "Option::is_none")]
    pub default_step_timeout: Option<u64>,
    #[serde(default, rename = "deviceIds", skip_serializing_if = "Option::is_none")]
    pub device_ids: Option<Vec<String>>,
    #[serde(default, rename = "followRedirects", skip_serializing_if = "Option::is_none")]
    pub follow_redirects: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<String>>,
    #[serde(default, rename = "pollingTimeout", skip_serializing_if = "Option::is_none")]
    pub polling_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<serde_json::Value>,
    #[serde(default, rename = "startUrl", skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
    #[serde(
        default,
        rename = "startUrlSubstitutionRegex",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_url_substitution_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<HashMap<String, String>>,
    #[serde(default, rename = "executionRule", skip_serializing_if = "Option::is_none")]
    pub execution_rule: Option<ExecutionRule>,
}

impl Override {
    pub fn is_empty(&self) -> bool {
        self == &Override::default()
    }
}

/// What is sent to the backend for one test: the recognised overrides plus
/// the resolved execution rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPayload {
    pub public_id: String,
    #[serde(rename = "executionRule")]
    pub execution_rule: ExecutionRule,
    #[serde(flatten)]
    pub overrides: Override,
}

/// One entry returned per submitted payload by `triggerTests`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponseItem {
    pub public_id: String,
    pub result_id: String,
    pub device: Option<String>,
    pub location: String,
}

/// Response body of `triggerTests`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub results: Vec<TriggerResponseItem>,
}

/// Non-verdict failure classes distinguished from assertion failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultError {
    Timeout,
    Tunnel,
    Endpoint,
}

/// A device descriptor as embedded in a poll result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Device {
    pub id: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

/// Timing breakdown, when the backend reports one instead of a flat
/// `duration`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timings {
    pub total: Option<f64>,
}

/// The inner `result` object of a [`PollResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(default)]
    pub error: Option<ResultError>,
    #[serde(default, rename = "errorCode")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub unhealthy: Option<bool>,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub timings: Option<Timings>,
    #[serde(default)]
    pub tunnel: bool,
    #[serde(default, rename = "stepDetails")]
    pub step_details: Vec<serde_json::Value>,
    #[serde(default)]
    pub device: Device,
    #[serde(default, rename = "startUrl")]
    pub start_url: String,
}

impl ResultPayload {
    pub fn is_finished(&self) -> bool {
        self.event_type == "finished"
    }
}

/// One polled outcome for a single `result_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResult {
    #[serde(rename = "resultID")]
    pub result_id: String,
    pub dc_id: Option<String>,
    pub timestamp: i64,
    pub result: ResultPayload,
}

/// Response body of `pollResults`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollResultsResponse {
    pub results: Vec<PollResult>,
}

/// The unit of polling state: a trigger response augmented with the
/// per-test polling budget and its terminal result once known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResult {
    pub item: TriggerResponseItem,
    pub polling_timeout_ms: u64,
    pub result: Option<PollResult>,
}

impl TriggerResult {
    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }
}

/// Aggregate counters for one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub batch_id: Option<String>,
    pub passed: u32,
    pub failed: u32,
    pub failed_non_blocking: u32,
    pub skipped: u32,
    pub timed_out: u32,
    pub critical_errors: u32,
    pub tests_not_found: std::collections::BTreeSet<String>,
}
