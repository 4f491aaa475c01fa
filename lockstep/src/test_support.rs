//! Test-only fixtures and scripted stand-ins for the target program and the
//! remote service.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::core::types::{Challenge, Judged, ProtocolError, TestDescription, TestResult};
use crate::io::client::{AttemptService, ClientError};
use crate::io::process::HarnessError;
use crate::run::TestExecutor;

pub fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// A test in group `grp`; `olines: None` withholds the expected output.
pub fn test_case(
    name: &str,
    grp: i64,
    ilines: &[&str],
    olines: Option<&[&str]>,
) -> TestDescription {
    TestDescription {
        name: name.to_string(),
        grp,
        head: format!("{name} head"),
        ilines: owned(ilines),
        olines: olines.map(owned),
        ..TestDescription::default()
    }
}

pub fn challenge(name: &str, tests: Vec<TestDescription>) -> Challenge {
    Challenge {
        name: name.to_string(),
        title: format!("{name} title"),
        tests,
        ..Challenge::default()
    }
}

/// Returns scripted outputs in order, one per executed test.
pub struct ScriptedExecutor {
    outputs: RefCell<VecDeque<Result<Vec<String>, HarnessError>>>,
    calls: Cell<usize>,
}

impl ScriptedExecutor {
    pub fn new(outputs: Vec<Result<Vec<String>, HarnessError>>) -> Self {
        Self {
            outputs: RefCell::new(outputs.into()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl TestExecutor for ScriptedExecutor {
    fn execute(&self, test: &TestDescription) -> Result<Vec<String>, HarnessError> {
        self.calls.set(self.calls.get() + 1);
        self.outputs
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted output left for test [{}]", test.name))
    }
}

enum Verdict {
    Judged(Judged),
    AskServerEcho,
}

/// Records every call and answers `check_output` from a queue.
#[derive(Default)]
pub struct ScriptedService {
    verdicts: RefCell<VecDeque<Verdict>>,
    batches: RefCell<VecDeque<Vec<TestDescription>>>,
    checked: RefCell<Vec<String>>,
    fails: RefCell<Vec<(String, TestResult)>>,
    passes: Cell<usize>,
}

impl ScriptedService {
    pub fn push_verdict(&self, judged: Judged) {
        self.verdicts.borrow_mut().push_back(Verdict::Judged(judged));
    }

    /// Next check answers `AskServer`, which the client must reject.
    pub fn push_ask_server_echo(&self) {
        self.verdicts.borrow_mut().push_back(Verdict::AskServerEcho);
    }

    pub fn push_batch(&self, tests: Vec<TestDescription>) {
        self.batches.borrow_mut().push_back(tests);
    }

    pub fn checked(&self) -> Vec<String> {
        self.checked.borrow().clone()
    }

    pub fn fails(&self) -> Vec<(String, TestResult)> {
        self.fails.borrow().clone()
    }

    pub fn passes(&self) -> usize {
        self.passes.get()
    }
}

impl AttemptService for ScriptedService {
    fn check_output(
        &self,
        _code: &str,
        test_name: &str,
        _actual: &[String],
    ) -> Result<Judged, ClientError> {
        self.checked.borrow_mut().push(test_name.to_string());
        match self.verdicts.borrow_mut().pop_front() {
            Some(Verdict::Judged(judged)) => Ok(judged),
            Some(Verdict::AskServerEcho) => Err(ProtocolError::AskServerEcho.into()),
            None => panic!("no scripted verdict for test [{test_name}]"),
        }
    }

    fn send_pass(&self, _code: &str) -> Result<(), ClientError> {
        self.passes.set(self.passes.get() + 1);
        Ok(())
    }

    fn send_fail(
        &self,
        _code: &str,
        test_name: &str,
        result: &TestResult,
    ) -> Result<(), ClientError> {
        self.fails
            .borrow_mut()
            .push((test_name.to_string(), result.clone()));
        Ok(())
    }

    fn next_tests(&self, _code: &str) -> Result<Vec<TestDescription>, ClientError> {
        Ok(self.batches.borrow_mut().pop_front().unwrap_or_default())
    }
}
