//! Configuration schema for `synthrun`.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── ApiConfig       - backend base URL and credentials
//! ├── PollingConfig    - global default timeout and poll interval
//! ├── PolicyConfig     - failOnCriticalErrors / failOnTimeout
//! ├── suites: Vec<String>  - glob patterns for suite files
//! ├── trigger_app      - optional override of the trigger_app tag
//! └── ReportConfig     - console/JUnit output settings
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure for `synthrun`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Backend connection settings.
    pub api: ApiConfig,

    /// Polling behaviour, applied to every test unless a suite entry
    /// supplies its own `pollingTimeout` override.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Pass/fail policy flags.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Glob patterns evaluated to discover suite files.
    pub suites: Vec<String>,

    /// Overrides the `trigger_app` tag submitted with every trigger
    /// request. Defaults to `"npm_package"` when unset.
    pub trigger_app: Option<String>,

    /// Output and reporting settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Backend connection settings.
///
/// `api_key` and `app_key` support `${VAR}` / `${VAR:-default}` environment
/// expansion (same syntax as the rest of the config), so secrets don't have
/// to live in the TOML file itself.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Base URL of the synthetics backend, e.g. `https://api.datadoghq.com`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    pub api_key: String,

    pub app_key: String,
}

fn default_base_url() -> String {
    "https://api.datadoghq.com".to_string()
}

/// Polling behaviour settings (`spec.md` §4.4).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    /// Default per-test polling timeout in milliseconds, used when a suite
    /// entry doesn't supply its own `pollingTimeout` override.
    #[serde(default = "default_polling_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Interval between polling batches, in milliseconds.
    ///
    /// The backend contract assumes 5000ms; this is only exposed so tests
    /// (ours and callers') don't have to wait on a real clock.
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_polling_timeout_ms(),
            interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_polling_timeout_ms() -> u64 {
    30 * 60 * 1000
}

fn default_poll_interval_ms() -> u64 {
    5000
}

/// Pass/fail policy flags (`spec.md` §4.5, §7).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PolicyConfig {
    /// If true, a critical backend error (ENDPOINT/unhealthy) fails the
    /// test instead of being treated as a pass.
    #[serde(default)]
    pub fail_on_critical_errors: bool,

    /// If true, a synthesised TIMEOUT result fails the test instead of
    /// being treated as a pass.
    #[serde(default)]
    pub fail_on_timeout: bool,
}

/// Output and reporting settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Print human-readable progress and a summary to the terminal.
    #[serde(default = "default_console")]
    pub console: bool,

    /// Write a JUnit XML report to this path, if set.
    pub junit_file: Option<PathBuf>,

    /// Print every poll result, not just failures.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            console: default_console(),
            junit_file: None,
            verbose: false,
        }
    }
}

fn default_console() -> bool {
    true
}
