//! JUnit XML report generation.
//!
//! Accumulates one `<testcase>` per test across the invocation and writes a
//! single `<testsuite>` document when the run ends, for CI systems that
//! consume JUnit XML.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::classify::{get_result_duration, has_all_results_passed};
use crate::model::{ExecutionRule, InternalTest, PollResult, Summary};
use crate::report::Reporter;

struct CaseRecord {
    public_id: String,
    execution_rule: ExecutionRule,
    passed: bool,
    duration_ms: i64,
    failure_message: Option<String>,
}

/// Writes a JUnit XML file to `path` on `run_end`.
pub struct JUnitReporter {
    path: PathBuf,
    cases: Mutex<Vec<CaseRecord>>,
    start_time: Mutex<Option<DateTime<Utc>>>,
}

impl JUnitReporter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cases: Mutex::new(Vec::new()),
            start_time: Mutex::new(None),
        }
    }

    fn render(&self, summary: &Summary) -> String {
        let cases = self.cases.lock().unwrap();
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .ok();

        let mut suite = BytesStart::new("testsuite");
        suite.push_attribute(("name", "synthrun"));
        suite.push_attribute(("tests", cases.len().to_string().as_str()));
        suite.push_attribute(("failures", (summary.failed + summary.failed_non_blocking).to_string().as_str()));
        suite.push_attribute(("skipped", summary.skipped.to_string().as_str()));
        if let Some(start_time) = *self.start_time.lock().unwrap() {
            suite.push_attribute(("timestamp", start_time.to_rfc3339().as_str()));
        }
        writer.write_event(Event::Start(suite)).ok();

        for case in cases.iter() {
            let mut testcase = BytesStart::new("testcase");
            testcase.push_attribute(("name", case.public_id.as_str()));
            testcase.push_attribute(("classname", "synthetics"));
            let seconds = case.duration_ms as f64 / 1000.0;
            testcase.push_attribute(("time", format!("{seconds:.3}").as_str()));

            if case.execution_rule == ExecutionRule::Skipped {
                writer.write_event(Event::Start(testcase)).ok();
                writer
                    .write_event(Event::Empty(BytesStart::new("skipped")))
                    .ok();
                writer
                    .write_event(Event::End(BytesEnd::new("testcase")))
                    .ok();
                continue;
            }

            if case.passed {
                writer
                    .write_event(Event::Empty(testcase))
                    .ok();
            } else {
                writer.write_event(Event::Start(testcase)).ok();
                let mut failure = BytesStart::new("failure");
                let message = case
                    .failure_message
                    .as_deref()
                    .unwrap_or("synthetic test failed");
                failure.push_attribute(("message", message));
                writer.write_event(Event::Start(failure)).ok();
                writer
                    .write_event(Event::Text(BytesText::new(message)))
                    .ok();
                writer
                    .write_event(Event::End(BytesEnd::new("failure")))
                    .ok();
                writer
                    .write_event(Event::End(BytesEnd::new("testcase")))
                    .ok();
            }
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite"))).ok();
        String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default()
    }
}

#[async_trait]
impl Reporter for JUnitReporter {
    async fn report_start(&self, start_time: SystemTime) {
        *self.start_time.lock().unwrap() = Some(DateTime::<Utc>::from(start_time));
    }

    async fn test_end(
        &self,
        test: &InternalTest,
        results: &[PollResult],
        _base_url: &str,
        _location_names: &HashMap<String, String>,
        fail_on_critical_errors: bool,
        fail_on_timeout: bool,
    ) {
        let execution_rule = test.execution_rule();
        let passed = execution_rule == ExecutionRule::Skipped
            || has_all_results_passed(results, fail_on_critical_errors, fail_on_timeout);
        let duration_ms = results.iter().map(get_result_duration).max().unwrap_or(0);
        let failure_message = results
            .iter()
            .find(|r| !crate::classify::has_result_passed(r, fail_on_critical_errors, fail_on_timeout))
            .and_then(|r| r.result.error_code.clone());

        self.cases.lock().unwrap().push(CaseRecord {
            public_id: test.public_id.clone(),
            execution_rule,
            passed,
            duration_ms,
            failure_message,
        });
    }

    async fn run_end(&self, summary: &Summary, _base_url: &str) {
        let xml = self.render(summary);
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::error!(error = %e, path = %self.path.display(), "failed to create JUnit output directory");
                return;
            }
        }
        if let Err(e) = std::fs::write(&self.path, xml) {
            tracing::error!(error = %e, path = %self.path.display(), "failed to write JUnit report");
        }
    }
}
