//! Shared data model for challenges, tests and verdicts.
//!
//! These types are the wire contract between the CLI and the service as well
//! as the in-memory shape the parser produces. Serialized forms must stay
//! stable: `kind`-tagged objects, rule payloads under `data`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::diff::LineDiff;

/// Database identifier of a test row.
pub type TestId = i64;

/// A named, ordered sequence of tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(default)]
    pub id: i64,
    /// URL of the server that owns the challenge.
    #[serde(default)]
    pub server: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tests: Vec<TestDescription>,
}

/// One test case: input to send and (possibly withheld) expected output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDescription {
    #[serde(default)]
    pub id: TestId,
    #[serde(default)]
    pub chid: i64,
    /// Release batch; tests sharing a `grp` are handed out together.
    #[serde(default)]
    pub grp: i64,
    #[serde(default)]
    pub ord: i64,
    pub name: String,
    #[serde(default)]
    pub head: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub ilines: Vec<String>,
    /// `None` means only the server knows the expected output.
    #[serde(default)]
    pub olines: Option<Vec<String>>,
}

impl TestDescription {
    /// The rule this test is judged by locally, if the expected output is known.
    pub fn rule(&self) -> Option<ValidationRule> {
        self.olines.clone().map(ValidationRule::LineMatch)
    }
}

/// Server-defined criterion used to judge a test's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum ValidationRule {
    /// Output must equal these lines exactly, in order.
    #[serde(rename = "lines")]
    LineMatch(Vec<String>),
}

/// Why a test failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum Failure {
    #[serde(rename = "diff")]
    LineDiff(LineDiff),
    /// Killed at the deadline; no output to compare.
    #[serde(rename = "timeout")]
    Timeout { timeout_ms: u64 },
    #[serde(rename = "output_limit")]
    OutputLimit { limit_bytes: usize },
}

impl Failure {
    /// Human-readable explanation, one entry per printed line.
    pub fn error_lines(&self) -> Vec<String> {
        match self {
            Failure::LineDiff(diff) => {
                let mut lines = vec!["---- how to patch your output to pass the test ----".to_string()];
                lines.extend(diff.rendered());
                lines
            }
            Failure::Timeout { timeout_ms } => vec![format!(
                "Your program did not finish within {}s and was stopped.",
                *timeout_ms as f64 / 1000.0
            )],
            Failure::OutputLimit { limit_bytes } => vec![format!(
                "Your program printed more than {limit_bytes} bytes and was stopped."
            )],
        }
    }
}

/// Outcome of judging one test run.
///
/// `AskServer` only ever travels client to server; a server answering with it
/// is a protocol violation (see [`Judged`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TestResult {
    Pass {
        rule: ValidationRule,
    },
    Fail {
        #[serde(default)]
        actual: Vec<String>,
        error: Failure,
    },
    AskServer,
}

impl TestResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, TestResult::Pass { .. })
    }
}

/// A verdict a judge actually reached. Constructed from a [`TestResult`]
/// received over the wire, rejecting `AskServer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Judged {
    Pass(ValidationRule),
    Fail { actual: Vec<String>, error: Failure },
}

impl TryFrom<TestResult> for Judged {
    type Error = ProtocolError;

    fn try_from(result: TestResult) -> Result<Self, Self::Error> {
        match result {
            TestResult::Pass { rule } => Ok(Judged::Pass(rule)),
            TestResult::Fail { actual, error } => Ok(Judged::Fail { actual, error }),
            TestResult::AskServer => Err(ProtocolError::AskServerEcho),
        }
    }
}

/// Violations of the client/server contract.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("server answered AskServer; refusing to ask again")]
    AskServerEcho,
    #[error("pre-token not found")]
    UnknownPreToken,
    #[error("pre-token already used")]
    PreTokenAlreadyUsed,
    #[error("login was not completed in time")]
    LoginExpired,
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode server response: {0}")]
    Decode(String),
    #[error("server passed test [{0}], which this attempt does not have")]
    UnknownTest(String),
}

/// Persisted progress state of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptState {
    Start,
    Build,
    Fix,
    Change,
    Done,
}

impl AttemptState {
    pub const ALL: [AttemptState; 5] = [
        AttemptState::Start,
        AttemptState::Build,
        AttemptState::Fix,
        AttemptState::Change,
        AttemptState::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttemptState::Start => "start",
            AttemptState::Build => "build",
            AttemptState::Fix => "fix",
            AttemptState::Change => "change",
            AttemptState::Done => "done",
        }
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttemptState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown attempt state {s:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff::line_diff;
    use serde_json::json;

    #[test]
    fn pass_result_uses_kind_tags() {
        let result = TestResult::Pass {
            rule: ValidationRule::LineMatch(vec!["hi".to_string()]),
        };
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(
            value,
            json!({"kind": "Pass", "rule": {"kind": "lines", "data": ["hi"]}})
        );
    }

    #[test]
    fn fail_result_carries_rendered_diff() {
        let actual = vec!["hi".to_string()];
        let expected = vec!["bye".to_string()];
        let result = TestResult::Fail {
            actual: actual.clone(),
            error: Failure::LineDiff(line_diff(&actual, &expected)),
        };
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(
            value,
            json!({
                "kind": "Fail",
                "actual": ["hi"],
                "error": {"kind": "diff", "data": ["- hi", "+ bye"]}
            })
        );
        let back: TestResult = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, result);
    }

    #[test]
    fn timeout_failure_serializes_with_its_deadline() {
        let error = Failure::Timeout { timeout_ms: 1500 };
        let value = serde_json::to_value(&error).expect("serialize");
        assert_eq!(value, json!({"kind": "timeout", "data": {"timeout_ms": 1500}}));
        assert_eq!(
            error.error_lines(),
            vec!["Your program did not finish within 1.5s and was stopped.".to_string()]
        );
    }

    #[test]
    fn unknown_rule_kind_is_rejected() {
        let raw = json!({"kind": "Pass", "rule": {"kind": "regex", "data": ".*"}});
        assert!(serde_json::from_value::<TestResult>(raw).is_err());
    }

    #[test]
    fn ask_server_from_a_judge_is_a_protocol_error() {
        let err = Judged::try_from(TestResult::AskServer).expect_err("must reject");
        assert!(matches!(err, ProtocolError::AskServerEcho));
    }

    #[test]
    fn attempt_state_parses_case_insensitively() {
        assert_eq!("Change".parse::<AttemptState>(), Ok(AttemptState::Change));
        assert!("bogus".parse::<AttemptState>().is_err());
    }

    #[test]
    fn missing_olines_means_no_local_rule() {
        let test = TestDescription {
            name: "t".to_string(),
            ..TestDescription::default()
        };
        assert_eq!(test.rule(), None);
    }
}
