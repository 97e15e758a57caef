//! Core orchestration: wires the identifier loader, override resolver,
//! trigger dispatcher, polling engine, and result classifier into one
//! invocation (`spec.md` §2, "Control flow: A → B → C → D → E, with F
//! receiving events from B/C/D/E").

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::SystemTime;

use crate::backend::{BackendClient, BackendError, Tunnel};
use crate::classify::{has_all_results_passed, has_result_passed};
use crate::identifiers::{self, LoadedSuite, SuiteLoadError};
use crate::model::{ExecutionRule, InternalTest, Override, Summary};
use crate::override_resolver::{self, resolve_execution_rule};
use crate::polling::{self, PollingConfig, PollingError};
use crate::report::Reporter;
use crate::trigger::{self, TriggerError};

/// Fatal errors that abort the whole invocation.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    SuiteLoad(#[from] SuiteLoadError),
    #[error("no tests to trigger")]
    NoTestsToTrigger,
    #[error("failed to look up test {public_id}: {source}")]
    Lookup {
        public_id: String,
        #[source]
        source: BackendError,
    },
    #[error(transparent)]
    Trigger(#[from] TriggerError),
    #[error(transparent)]
    Polling(#[from] PollingError),
}

/// One resolved test entry pending lookup: the raw id plus whatever
/// per-test override the suite file carried for it, with the file's
/// `global` override (if any) merged underneath.
struct PendingEntry {
    public_id: String,
    overrides: Override,
}

fn merge_overrides(global: Option<&Override>, specific: &Override) -> Override {
    let Some(global) = global else {
        return specific.clone();
    };
    // Per-test fields win field-by-field over the file's global override.
    Override {
        allow_insecure_certificates: specific
            .allow_insecure_certificates
            .or(global.allow_insecure_certificates),
        basic_auth: specific.basic_auth.clone().or_else(|| global.basic_auth.clone()),
        body: specific.body.clone().or_else(|| global.body.clone()),
        body_type: specific.body_type.clone().or_else(|| global.body_type.clone()),
        cookies: specific.cookies.clone().or_else(|| global.cookies.clone()),
        default_step_timeout: specific.default_step_timeout.or(global.default_step_timeout),
        device_ids: specific.device_ids.clone().or_else(|| global.device_ids.clone()),
        follow_redirects: specific.follow_redirects.or(global.follow_redirects),
        headers: specific.headers.clone().or_else(|| global.headers.clone()),
        locations: specific.locations.clone().or_else(|| global.locations.clone()),
        polling_timeout: specific.polling_timeout.or(global.polling_timeout),
        retry: specific.retry.clone().or_else(|| global.retry.clone()),
        start_url: specific.start_url.clone().or_else(|| global.start_url.clone()),
        start_url_substitution_regex: specific
            .start_url_substitution_regex
            .clone()
            .or_else(|| global.start_url_substitution_regex.clone()),
        tunnel: specific.tunnel.or(global.tunnel),
        variables: specific.variables.clone().or_else(|| global.variables.clone()),
        execution_rule: specific.execution_rule.or(global.execution_rule),
    }
}

fn flatten_suites(suites: Vec<LoadedSuite>) -> Vec<PendingEntry> {
    let mut entries = Vec::new();
    for suite in suites {
        for test in suite.content.tests {
            entries.push(PendingEntry {
                public_id: identifiers::normalize_test_id(&test.id),
                overrides: merge_overrides(suite.content.global.as_ref(), &test.overrides),
            });
        }
    }
    entries
}

/// Runs the full invocation: load suites, resolve tests, trigger, poll,
/// classify, and report. Returns the run [`Summary`].
#[allow(clippy::too_many_arguments)]
pub async fn run(
    backend: &dyn BackendClient,
    tunnel: Option<Arc<dyn Tunnel>>,
    suite_patterns: &[String],
    polling_config: &PollingConfig,
    reporter: &dyn Reporter,
) -> Result<Summary, RunError> {
    reporter.report_start(SystemTime::now()).await;

    let mut suites = Vec::new();
    for pattern in suite_patterns {
        let loaded = identifiers::load_suites(pattern)?;
        if loaded.is_empty() {
            reporter
                .log(&format!("suite pattern matched no files: {pattern}"))
                .await;
        }
        suites.extend(loaded);
    }

    let entries = flatten_suites(suites);

    // Component A: resolve every test id against the backend in parallel;
    // not-found lookups accumulate rather than aborting the whole batch.
    let lookups = futures::future::join_all(
        entries
            .iter()
            .map(|entry| async { (entry, backend.get_test(&entry.public_id).await) }),
    )
    .await;

    let mut tests_not_found = BTreeSet::new();
    let mut init_errors = Vec::new();
    let mut resolved: Vec<(InternalTest, &PendingEntry)> = Vec::new();

    for (entry, lookup) in lookups {
        match lookup {
            Ok(test) => resolved.push((test, entry)),
            Err(err) if matches!(err, BackendError::NotFound(_)) => {
                tests_not_found.insert(entry.public_id.clone());
                init_errors.push(format!("test not found: {}", entry.public_id));
            }
            Err(err) => {
                return Err(RunError::Lookup {
                    public_id: entry.public_id.clone(),
                    source: err,
                });
            }
        }
    }

    if !init_errors.is_empty() {
        reporter.init_errors(&init_errors).await;
    }

    // Component B: resolve overrides/execution rule, drop skipped tests.
    let mut payloads = Vec::new();
    let mut by_public_id: HashMap<String, InternalTest> = HashMap::new();
    let mut polling_timeouts: HashMap<String, u64> = HashMap::new();
    let mut skipped_count = 0u32;

    for (test, entry) in &resolved {
        let execution_rule = resolve_execution_rule(test, Some(&entry.overrides));
        if execution_rule == ExecutionRule::Skipped {
            skipped_count += 1;
            continue;
        }
        let payload = override_resolver::build_payload(
            test,
            &entry.public_id,
            Some(&entry.overrides),
            reporter,
        )
        .await;
        reporter
            .test_trigger(test, &entry.public_id, execution_rule, &payload.overrides)
            .await;
        if let Some(timeout) = entry.overrides.polling_timeout {
            polling_timeouts.insert(entry.public_id.clone(), timeout);
        }
        by_public_id.insert(entry.public_id.clone(), test.clone());
        payloads.push(payload);
    }

    if payloads.is_empty() {
        return Err(RunError::NoTestsToTrigger);
    }

    // Component C.
    let trigger_response = trigger::trigger_tests(backend, payloads).await?;

    reporter
        .tests_wait(&by_public_id.values().cloned().collect::<Vec<_>>())
        .await;
    for test in by_public_id.values() {
        reporter.test_wait(test).await;
    }

    // Component D.
    let results_by_public_id = polling::poll_results(
        backend,
        &trigger_response,
        |public_id| polling_timeouts.get(public_id).copied(),
        tunnel,
        polling_config,
        reporter,
    )
    .await?;

    // Component E + F: classify and report per test, then aggregate.
    let mut summary = Summary {
        tests_not_found: tests_not_found.clone(),
        skipped: skipped_count,
        ..Default::default()
    };

    for (public_id, test) in &by_public_id {
        let results = results_by_public_id.get(public_id).cloned().unwrap_or_default();
        let execution_rule = test.execution_rule();

        for result in &results {
            reporter.result_end(result, "").await;
        }
        reporter
            .test_end(
                test,
                &results,
                "",
                &HashMap::new(),
                polling_config.fail_on_critical_errors,
                polling_config.fail_on_timeout,
            )
            .await;

        let passed = has_all_results_passed(
            &results,
            polling_config.fail_on_critical_errors,
            polling_config.fail_on_timeout,
        );

        if passed {
            summary.passed += 1;
        } else if execution_rule == ExecutionRule::NonBlocking {
            summary.failed_non_blocking += 1;
        } else {
            summary.failed += 1;
        }

        for result in &results {
            if result.result.error == Some(crate::model::ResultError::Timeout) {
                summary.timed_out += 1;
            }
            if !has_result_passed(
                result,
                polling_config.fail_on_critical_errors,
                polling_config.fail_on_timeout,
            ) && (result.result.unhealthy == Some(true)
                || result.result.error == Some(crate::model::ResultError::Endpoint))
            {
                summary.critical_errors += 1;
            }
        }
    }

    reporter.run_end(&summary, "").await;
    Ok(summary)
}
