//! Local judging of a test's normalized output.

use crate::core::diff::line_diff;
use crate::core::types::{Failure, TestDescription, TestResult, ValidationRule};

/// Judge `actual` against the test's known expected lines.
///
/// Tests whose expected output is withheld always yield `AskServer`.
pub fn check_output(test: &TestDescription, actual: &[String]) -> TestResult {
    match &test.olines {
        None => TestResult::AskServer,
        Some(expected) if expected.as_slice() == actual => TestResult::Pass {
            rule: ValidationRule::LineMatch(expected.clone()),
        },
        Some(expected) => TestResult::Fail {
            actual: actual.to_vec(),
            error: Failure::LineDiff(line_diff(actual, expected)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_with(olines: Option<&[&str]>) -> TestDescription {
        TestDescription {
            name: "t1".to_string(),
            olines: olines.map(|lines| lines.iter().map(|s| s.to_string()).collect()),
            ..TestDescription::default()
        }
    }

    fn owned(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_match_passes_with_line_rule() {
        let result = check_output(&test_with(Some(&["hi"])), &owned(&["hi"]));
        assert_eq!(
            result,
            TestResult::Pass {
                rule: ValidationRule::LineMatch(owned(&["hi"]))
            }
        );
    }

    #[test]
    fn differing_inserted_or_missing_line_fails_with_diff() {
        let test = test_with(Some(&["a", "b"]));
        for actual in [owned(&["a", "c"]), owned(&["a", "b", "c"]), owned(&["a"])] {
            match check_output(&test, &actual) {
                TestResult::Fail {
                    actual: got,
                    error: Failure::LineDiff(diff),
                } => {
                    assert_eq!(got, actual);
                    assert!(!diff.is_identity());
                }
                other => panic!("expected fail, got {other:?}"),
            }
        }
    }

    #[test]
    fn withheld_output_asks_server_regardless_of_actual() {
        let test = test_with(None);
        assert_eq!(check_output(&test, &[]), TestResult::AskServer);
        assert_eq!(check_output(&test, &owned(&["x"])), TestResult::AskServer);
    }

    #[test]
    fn empty_expected_output_passes_on_silence() {
        assert!(check_output(&test_with(Some(&[])), &[]).is_pass());
    }
}
