//! Test reporting and output generation.
//!
//! This module defines the [`Reporter`] hook set (`spec.md` §4.6) and ships
//! a composite fan-out plus three concrete reporters: [`NullReporter`],
//! [`ConsoleReporter`], and [`JUnitReporter`].
//!
//! Reporters are described by the capability set they choose to implement:
//! every hook has a no-op default body, so a reporter only overrides the
//! events it cares about. This replaces any inheritance-based reporter
//! hierarchy (`SPEC_FULL.md` §9).

pub mod junit;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::SystemTime;

use async_trait::async_trait;
use futures::FutureExt;

use crate::model::{ExecutionRule, InternalTest, Override, PollResult, Summary};

pub use junit::JUnitReporter;

/// Receives lifecycle events for one invocation.
///
/// # Ordering
///
/// A composite reporter delivers hook invocations to its members in
/// registration order. No single reporter may prevent others from being
/// called, even if it panics.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// A fatal error, about to abort the invocation.
    async fn error(&self, _message: &str) {}

    /// Non-fatal diagnostics gathered during identifier resolution (e.g.
    /// `testsNotFound`), delivered once after all lookups settle.
    async fn init_errors(&self, _messages: &[String]) {}

    /// A free-form diagnostic message (e.g. an empty glob match, a
    /// URL-template environment collision).
    async fn log(&self, _message: &str) {}

    /// The invocation is starting.
    async fn report_start(&self, _start_time: SystemTime) {}

    /// A test payload was resolved and is about to be submitted.
    async fn test_trigger(
        &self,
        _test: &InternalTest,
        _public_id: &str,
        _execution_rule: ExecutionRule,
        _overrides: &Override,
    ) {
    }

    /// Polling has begun for a single test.
    async fn test_wait(&self, _test: &InternalTest) {}

    /// Polling has begun for the whole batch.
    async fn tests_wait(&self, _tests: &[InternalTest]) {}

    /// A poll result was received for a test (may be synthesised).
    async fn result_received(&self, _result: &PollResult) {}

    /// A poll result reached its terminal state.
    async fn result_end(&self, _result: &PollResult, _base_url: &str) {}

    /// A test's overall verdict (across all its poll results) is final.
    async fn test_end(
        &self,
        _test: &InternalTest,
        _results: &[PollResult],
        _base_url: &str,
        _location_names: &HashMap<String, String>,
        _fail_on_critical_errors: bool,
        _fail_on_timeout: bool,
    ) {
    }

    /// The whole invocation is final.
    async fn run_end(&self, _summary: &Summary, _base_url: &str) {}
}

/// Discards all events. Useful in tests or as a safe default.
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {}

/// Forwards every event to each child reporter, in registration order.
///
/// A child reporter that panics inside a hook is isolated: the panic is
/// caught and logged through `tracing`, and the remaining children still
/// receive the event.
#[derive(Default)]
pub struct CompositeReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl CompositeReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

/// Runs `fut` to completion, converting a panic into a logged error instead
/// of propagating it, so one misbehaving reporter can't stop its siblings.
async fn isolate<F: std::future::Future<Output = ()>>(fut: F) {
    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(%message, "reporter hook panicked; continuing with remaining reporters");
    }
}

#[async_trait]
impl Reporter for CompositeReporter {
    async fn error(&self, message: &str) {
        for r in &self.reporters {
            isolate(r.error(message)).await;
        }
    }

    async fn init_errors(&self, messages: &[String]) {
        for r in &self.reporters {
            isolate(r.init_errors(messages)).await;
        }
    }

    async fn log(&self, message: &str) {
        for r in &self.reporters {
            isolate(r.log(message)).await;
        }
    }

    async fn report_start(&self, start_time: SystemTime) {
        for r in &self.reporters {
            isolate(r.report_start(start_time)).await;
        }
    }

    async fn test_trigger(
        &self,
        test: &InternalTest,
        public_id: &str,
        execution_rule: ExecutionRule,
        overrides: &Override,
    ) {
        for r in &self.reporters {
            isolate(r.test_trigger(test, public_id, execution_rule, overrides)).await;
        }
    }

    async fn test_wait(&self, test: &InternalTest) {
        for r in &self.reporters {
            isolate(r.test_wait(test)).await;
        }
    }

    async fn tests_wait(&self, tests: &[InternalTest]) {
        for r in &self.reporters {
            isolate(r.tests_wait(tests)).await;
        }
    }

    async fn result_received(&self, result: &PollResult) {
        for r in &self.reporters {
            isolate(r.result_received(result)).await;
        }
    }

    async fn result_end(&self, result: &PollResult, base_url: &str) {
        for r in &self.reporters {
            isolate(r.result_end(result, base_url)).await;
        }
    }

    async fn test_end(
        &self,
        test: &InternalTest,
        results: &[PollResult],
        base_url: &str,
        location_names: &HashMap<String, String>,
        fail_on_critical_errors: bool,
        fail_on_timeout: bool,
    ) {
        for r in &self.reporters {
            isolate(r.test_end(
                test,
                results,
                base_url,
                location_names,
                fail_on_critical_errors,
                fail_on_timeout,
            ))
            .await;
        }
    }

    async fn run_end(&self, summary: &Summary, base_url: &str) {
        for r in &self.reporters {
            isolate(r.run_end(summary, base_url)).await;
        }
    }
}

/// Terminal reporter with a progress bar and coloured pass/fail output.
pub struct ConsoleReporter {
    progress: std::sync::Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: std::sync::Mutex::new(None),
            verbose,
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn report_start(&self, _start_time: SystemTime) {
        println!("Triggering synthetic tests...");
    }

    async fn tests_wait(&self, tests: &[InternalTest]) {
        let pb = indicatif::ProgressBar::new(tests.len() as u64);
        pb.set_style(
            indicatif::ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")
                .unwrap()
                .progress_chars("#>-"),
        );
        *self.progress.lock().unwrap() = Some(pb);
    }

    async fn test_wait(&self, test: &InternalTest) {
        if self.verbose {
            println!("Waiting: {}", test.public_id);
        }
    }

    async fn result_end(&self, result: &PollResult, _base_url: &str) {
        if let Some(pb) = self.progress.lock().unwrap().as_ref() {
            pb.inc(1);
        }
        let passed = result.result.passed.unwrap_or(true);
        if self.verbose || !passed {
            let status = if passed {
                console::style("PASS").green()
            } else {
                console::style("FAIL").red()
            };
            println!("{} {}", status, result.result_id);
        }
    }

    async fn log(&self, message: &str) {
        println!("{}", console::style(message).dim());
    }

    async fn error(&self, message: &str) {
        eprintln!("{} {}", console::style("ERROR").red().bold(), message);
    }

    async fn run_end(&self, summary: &Summary, _base_url: &str) {
        if let Some(pb) = self.progress.lock().unwrap().take() {
            pb.finish_and_clear();
        }
        println!();
        println!("Passed:            {}", console::style(summary.passed).green());
        println!("Failed:            {}", console::style(summary.failed).red());
        println!(
            "Failed (non-blocking): {}",
            console::style(summary.failed_non_blocking).yellow()
        );
        println!("Skipped:           {}", console::style(summary.skipped).yellow());
        println!("Timed out:         {}", console::style(summary.timed_out).yellow());
        println!(
            "Critical errors:   {}",
            console::style(summary.critical_errors).red()
        );
        if !summary.tests_not_found.is_empty() {
            println!(
                "Not found:         {}",
                console::style(summary.tests_not_found.len()).red().bold()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingReporter {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Reporter for CountingReporter {
        async fn log(&self, _message: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingReporter;

    #[async_trait]
    impl Reporter for PanickingReporter {
        async fn log(&self, _message: &str) {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn composite_forwards_to_every_child_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let composite = CompositeReporter::new()
            .with_reporter(CountingReporter {
                calls: calls.clone(),
            })
            .with_reporter(CountingReporter {
                calls: calls.clone(),
            });
        composite.log("hello").await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_panicking_reporter_does_not_stop_the_others() {
        let calls = Arc::new(AtomicUsize::new(0));
        let composite = CompositeReporter::new()
            .with_reporter(PanickingReporter)
            .with_reporter(CountingReporter {
                calls: calls.clone(),
            });
        composite.log("hello").await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn null_reporter_accepts_every_hook_without_panicking() {
        let reporter = NullReporter;
        reporter.error("x").await;
        reporter.init_errors(&["x".to_string()]).await;
        reporter.log("x").await;
        reporter.report_start(SystemTime::now()).await;
    }
}
