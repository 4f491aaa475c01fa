//! Sequential test runs: execute, judge, and report the outcome.
//!
//! Tests run one at a time and the run halts at the first test that does not
//! pass. Verdicts the local rule cannot reach are resolved by the service in
//! online runs and halt the run offline.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::types::{
    Failure, Judged, ProtocolError, TestDescription, TestResult, ValidationRule,
};
use crate::core::validation::check_output;
use crate::guidance::spawn_guidance;
use crate::io::client::AttemptService;
use crate::io::process::{HarnessError, SpawnError, Target, run_test};
use crate::io::store::Store;
use crate::progress::{Advanced, Event, advance_attempt};

/// Runs one test and returns its normalized output.
///
/// Implemented by [`Target`]; tests substitute scripted outputs.
pub trait TestExecutor {
    fn execute(&self, test: &TestDescription) -> Result<Vec<String>, HarnessError>;
}

impl TestExecutor for Target {
    fn execute(&self, test: &TestDescription) -> Result<Vec<String>, HarnessError> {
        run_test(self, test)
    }
}

/// Who decides verdicts the local rule cannot.
pub enum Judge<'a> {
    /// Test document on disk; nobody to ask.
    Offline,
    Online {
        code: &'a str,
        service: &'a dyn AttemptService,
        store: &'a Store,
    },
}

#[derive(Debug)]
pub enum HaltReason {
    Mismatch { actual: Vec<String>, error: Failure },
    Timeout(Duration),
    /// Stdout exceeded this many bytes.
    OutputLimit(usize),
    Spawn(SpawnError),
    /// Expected output withheld and the run is offline.
    NoJudgeAvailable,
}

#[derive(Debug)]
pub struct Halt {
    pub test: TestDescription,
    pub reason: HaltReason,
}

#[derive(Debug)]
pub struct RunReport {
    pub selected: usize,
    pub passed: usize,
    /// A name filter was given, so a clean run says nothing about the batch.
    pub filtered: bool,
    pub halt: Option<Halt>,
}

impl RunReport {
    pub fn all_passed(&self) -> bool {
        self.halt.is_none()
    }
}

/// Tests to run, in order; an empty `names` selects all of them.
pub fn select<'t>(tests: &'t [TestDescription], names: &[String]) -> Vec<&'t TestDescription> {
    tests
        .iter()
        .filter(|t| names.is_empty() || names.iter().any(|n| *n == t.name))
        .collect()
}

/// Run the selected tests until one fails.
///
/// `on_pass` is called after each passing test; its error aborts the run.
#[instrument(skip_all, fields(tests = tests.len(), names = names.len()))]
pub fn run_tests(
    tests: &[TestDescription],
    names: &[String],
    executor: &dyn TestExecutor,
    judge: &Judge<'_>,
    mut on_pass: impl FnMut(&TestDescription) -> Result<()>,
) -> Result<RunReport> {
    let selected = select(tests, names);
    let mut report = RunReport {
        selected: selected.len(),
        passed: 0,
        filtered: !names.is_empty(),
        halt: None,
    };

    for test in selected {
        let actual = match executor.execute(test) {
            Ok(lines) => lines,
            Err(HarnessError::Timeout { timeout, .. }) => {
                report.halt = Some(halt(test, HaltReason::Timeout(timeout)));
                break;
            }
            Err(HarnessError::OutputLimit { limit, .. }) => {
                report.halt = Some(halt(test, HaltReason::OutputLimit(limit)));
                break;
            }
            Err(HarnessError::Spawn(err)) => {
                report.halt = Some(halt(test, HaltReason::Spawn(err)));
                break;
            }
            Err(err) => return Err(err).context("run target"),
        };

        match verdict(test, &actual, judge)? {
            Some(reason) => {
                report.halt = Some(halt(test, reason));
                break;
            }
            None => {
                debug!(test = %test.name, "pass");
                report.passed += 1;
                on_pass(test)?;
            }
        }
    }

    info!(
        passed = report.passed,
        selected = report.selected,
        halted = report.halt.is_some(),
        "run finished"
    );
    Ok(report)
}

fn halt(test: &TestDescription, reason: HaltReason) -> Halt {
    Halt {
        test: test.clone(),
        reason,
    }
}

/// `None` on pass, otherwise why the run halts.
fn verdict(
    test: &TestDescription,
    actual: &[String],
    judge: &Judge<'_>,
) -> Result<Option<HaltReason>> {
    match check_output(test, actual) {
        TestResult::Pass { .. } => Ok(None),
        TestResult::Fail { actual, error } => Ok(Some(HaltReason::Mismatch { actual, error })),
        TestResult::AskServer => match judge {
            Judge::Offline => Ok(Some(HaltReason::NoJudgeAvailable)),
            Judge::Online {
                code,
                service,
                store,
            } => {
                let judged = service
                    .check_output(code, &test.name, actual)
                    .with_context(|| format!("ask server to check test [{}]", test.name))?;
                match judged {
                    Judged::Pass(rule) => {
                        cache_rule(store, code, &test.name, &rule)?;
                        Ok(None)
                    }
                    Judged::Fail { actual, error } => {
                        Ok(Some(HaltReason::Mismatch { actual, error }))
                    }
                }
            }
        },
    }
}

/// Remember a rule the server revealed so later runs can judge locally.
fn cache_rule(
    store: &Store,
    code: &str,
    test_name: &str,
    rule: &ValidationRule,
) -> Result<()> {
    let attempt = store
        .require_attempt(code)
        .context("load local attempt")?;
    let test = store
        .attempt_test(attempt.id, test_name)?
        .ok_or_else(|| ProtocolError::UnknownTest(test_name.to_string()))?;
    store.save_progress(attempt.id, test.id)?;
    store.save_rule(test.id, rule)?;
    debug!(test = test_name, "cached revealed rule");
    Ok(())
}

/// Tell the service (and the local copy of the attempt) how the run ended.
///
/// Mismatches, timeouts and oversized output are reported as `Fail`. Offline
/// runs, filtered clean runs, spawn failures and unjudged tests report
/// nothing. Returns the local transition, if one was applied.
#[instrument(skip_all)]
pub fn report_outcome(report: &RunReport, judge: &Judge<'_>) -> Result<Option<Advanced>> {
    let Judge::Online {
        code,
        service,
        store,
    } = judge
    else {
        return Ok(None);
    };

    match &report.halt {
        None if report.filtered => Ok(None),
        None => {
            service.send_pass(code).context("report pass to server")?;
            let step = advance_attempt(store, code, None, Event::Pass)
                .context("record pass locally")?;
            Ok(Some(step))
        }
        Some(Halt { test, reason }) => {
            let Some(result) = failure_report(reason) else {
                return Ok(None);
            };
            service
                .send_fail(code, &test.name, &result)
                .context("report failure to server")?;
            let step = advance_attempt(
                store,
                code,
                None,
                Event::Fail {
                    test_name: &test.name,
                },
            )
            .context("record failure locally")?;
            Ok(Some(step))
        }
    }
}

/// The `Fail` sent for a halt, if the learner's program is at fault.
fn failure_report(reason: &HaltReason) -> Option<TestResult> {
    let (actual, error) = match reason {
        HaltReason::Mismatch { actual, error } => (actual.clone(), error.clone()),
        HaltReason::Timeout(timeout) => (
            Vec::new(),
            Failure::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
        ),
        HaltReason::OutputLimit(limit) => (
            Vec::new(),
            Failure::OutputLimit {
                limit_bytes: *limit,
            },
        ),
        HaltReason::Spawn(_) | HaltReason::NoJudgeAvailable => return None,
    };
    Some(TestResult::Fail { actual, error })
}

/// Lines describing why the run halted.
pub fn render_halt(halt: &Halt) -> Vec<String> {
    let test = &halt.test;
    let verb = match halt.reason {
        HaltReason::Timeout(_) => "timed out",
        _ => "failed",
    };
    let mut lines = vec![format!("Test [{}] {verb}.", test.name)];
    if !test.head.is_empty() {
        lines.push(format!("### {}", test.head));
    }
    if !test.body.is_empty() {
        lines.extend(test.body.lines().map(str::to_string));
    }
    lines.push(String::new());
    lines.push(" --- input given ------".to_string());
    lines.extend(test.ilines.iter().cloned());
    lines.push(String::new());
    match &halt.reason {
        HaltReason::Mismatch { error, .. } => lines.extend(error.error_lines()),
        HaltReason::Timeout(timeout) => lines.push(format!(
            "Your program did not finish within {}s and was stopped.",
            timeout.as_secs_f32()
        )),
        HaltReason::OutputLimit(limit) => lines.push(format!(
            "Your program printed more than {limit} bytes and was stopped."
        )),
        HaltReason::Spawn(err) => lines.extend(spawn_guidance(err)),
        HaltReason::NoJudgeAvailable => {
            lines.push("The expected output for this test is not known locally,".to_string());
            lines.push("and there is no server to judge it in an offline run.".to_string());
        }
    }
    lines
}

/// Closing summary for a run.
pub fn render_summary(report: &RunReport, online: bool) -> Vec<String> {
    if report.halt.is_some() {
        return vec![format!(
            "{} of {} tests passed.",
            report.passed, report.selected
        )];
    }
    let mut lines = vec![format!("All {} tests passed.", report.passed)];
    if online && !report.filtered {
        lines.push(String::new());
        lines.push("This may be a good time to commit your changes,".to_string());
        lines.push("or to spend some time improving your code.".to_string());
        lines.push(String::new());
        lines.push("When you're ready, run `lockstep next` to start the next feature.".to_string());
    }
    lines
}
