//! Line-oriented edit scripts between actual and expected output.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One step of an edit script turning actual output into expected output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Keep(String),
    /// Present in the actual output, not expected.
    Delete(String),
    /// Expected, missing from the actual output.
    Insert(String),
}

impl fmt::Display for Edit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edit::Keep(line) => write!(f, "  {line}"),
            Edit::Delete(line) => write!(f, "- {line}"),
            Edit::Insert(line) => write!(f, "+ {line}"),
        }
    }
}

impl TryFrom<&str> for Edit {
    type Error = String;

    fn try_from(rendered: &str) -> Result<Self, Self::Error> {
        let (marker, rest) = match rendered.char_indices().nth(1) {
            Some((idx, _)) => (&rendered[..idx], &rendered[idx..]),
            None => (rendered, ""),
        };
        let line = rest.strip_prefix(' ').unwrap_or(rest).to_string();
        match marker {
            " " => Ok(Edit::Keep(line)),
            "-" => Ok(Edit::Delete(line)),
            "+" => Ok(Edit::Insert(line)),
            _ => Err(format!("malformed diff line {rendered:?}")),
        }
    }
}

/// A complete edit script. Serialized as its rendered lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct LineDiff {
    edits: Vec<Edit>,
}

impl LineDiff {
    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    /// True when the script contains no insertions or deletions.
    pub fn is_identity(&self) -> bool {
        self.edits.iter().all(|edit| matches!(edit, Edit::Keep(_)))
    }

    pub fn rendered(&self) -> Vec<String> {
        self.edits.iter().map(ToString::to_string).collect()
    }
}

impl From<LineDiff> for Vec<String> {
    fn from(diff: LineDiff) -> Self {
        diff.rendered()
    }
}

impl TryFrom<Vec<String>> for LineDiff {
    type Error = String;

    fn try_from(lines: Vec<String>) -> Result<Self, Self::Error> {
        let edits = lines
            .iter()
            .map(|line| Edit::try_from(line.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LineDiff { edits })
    }
}

/// Largest LCS table [`line_diff`] builds; beyond it the differing middle
/// is reported as one block of deletions followed by insertions.
pub const MAX_TABLE_CELLS: usize = 4_000_000;

/// Compute a longest-common-subsequence edit script from `actual` to `expected`.
///
/// At each divergence deletions are emitted before insertions. The common
/// prefix and suffix are kept without entering the table.
pub fn line_diff(actual: &[String], expected: &[String]) -> LineDiff {
    let prefix = actual
        .iter()
        .zip(expected)
        .take_while(|(a, e)| a == e)
        .count();
    let suffix = actual[prefix..]
        .iter()
        .rev()
        .zip(expected[prefix..].iter().rev())
        .take_while(|(a, e)| a == e)
        .count();

    let mut edits: Vec<Edit> = actual[..prefix].iter().cloned().map(Edit::Keep).collect();
    let actual_mid = &actual[prefix..actual.len() - suffix];
    let expected_mid = &expected[prefix..expected.len() - suffix];
    if (actual_mid.len() + 1).saturating_mul(expected_mid.len() + 1) > MAX_TABLE_CELLS {
        edits.extend(actual_mid.iter().cloned().map(Edit::Delete));
        edits.extend(expected_mid.iter().cloned().map(Edit::Insert));
    } else {
        lcs_edits(actual_mid, expected_mid, &mut edits);
    }
    edits.extend(actual[actual.len() - suffix..].iter().cloned().map(Edit::Keep));
    LineDiff { edits }
}

fn lcs_edits(actual: &[String], expected: &[String], edits: &mut Vec<Edit>) {
    let n = actual.len();
    let m = expected.len();
    // lcs[i][j] = LCS length of actual[i..] and expected[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if actual[i] == expected[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if actual[i] == expected[j] {
            edits.push(Edit::Keep(actual[i].clone()));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            edits.push(Edit::Delete(actual[i].clone()));
            i += 1;
        } else {
            edits.push(Edit::Insert(expected[j].clone()));
            j += 1;
        }
    }
    edits.extend(actual[i..].iter().cloned().map(Edit::Delete));
    edits.extend(expected[j..].iter().cloned().map(Edit::Insert));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identical_output_is_identity() {
        let diff = line_diff(&lines(&["a", "b"]), &lines(&["a", "b"]));
        assert!(diff.is_identity());
        assert_eq!(diff.rendered(), vec!["  a", "  b"]);
    }

    #[test]
    fn replaced_line_is_delete_then_insert() {
        let diff = line_diff(&lines(&["hi"]), &lines(&["bye"]));
        assert_eq!(
            diff.edits(),
            &[Edit::Delete("hi".to_string()), Edit::Insert("bye".to_string())]
        );
    }

    #[test]
    fn missing_and_extra_lines_are_reported() {
        let diff = line_diff(&lines(&["a", "x", "c"]), &lines(&["a", "c", "d"]));
        assert_eq!(diff.rendered(), vec!["  a", "- x", "  c", "+ d"]);
    }

    #[test]
    fn empty_actual_inserts_everything() {
        let diff = line_diff(&[], &lines(&["one", "two"]));
        assert_eq!(diff.rendered(), vec!["+ one", "+ two"]);
    }

    #[test]
    fn oversized_middle_falls_back_to_block_replace() {
        let actual: Vec<String> = (0..3000).map(|i| format!("a{i}")).collect();
        let expected: Vec<String> = (0..3000).map(|i| format!("e{i}")).collect();
        let mut wrapped_actual = lines(&["head"]);
        wrapped_actual.extend(actual);
        wrapped_actual.push("tail".to_string());
        let mut wrapped_expected = lines(&["head"]);
        wrapped_expected.extend(expected);
        wrapped_expected.push("tail".to_string());

        let diff = line_diff(&wrapped_actual, &wrapped_expected);
        let edits = diff.edits();
        assert_eq!(edits.len(), 6002);
        assert_eq!(edits[0], Edit::Keep("head".to_string()));
        assert_eq!(edits[1], Edit::Delete("a0".to_string()));
        assert_eq!(edits[3001], Edit::Insert("e0".to_string()));
        assert_eq!(edits[6001], Edit::Keep("tail".to_string()));
    }

    #[test]
    fn rendered_lines_parse_back() {
        let diff = line_diff(&lines(&["a", ""]), &lines(&["b"]));
        let parsed = LineDiff::try_from(diff.rendered()).expect("parse");
        assert_eq!(parsed, diff);
    }

    #[test]
    fn malformed_rendered_line_is_rejected() {
        assert!(LineDiff::try_from(vec!["? hint".to_string()]).is_err());
    }
}
