//! Finite-state scanner extracting a [`Challenge`] from an outline document.
//!
//! Documents open with metadata directives (`#+title:`, `#+server:`,
//! `#+name:`) and may declare `#+lockstep-format: 0.2` to select the current
//! dialect. Without it the legacy dialect applies:
//!
//! ```text
//! #+name: echo
//! #+begin_src
//! = echo a line
//! : the program repeats its input
//! > hello
//! hello
//! #+end_src
//! ```
//!
//! The current dialect names tests with a heading and takes the description
//! from the prose after the block:
//!
//! ```text
//! ** TEST echo : echo a line
//! #+begin_src
//! > hello
//! hello
//! #+end_src
//! The program repeats its input.
//! ```
//!
//! In both, `>` lines are input, other lines expected output, `#` starts a
//! comment.

use std::collections::HashSet;
use std::mem;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::core::types::{Challenge, TestDescription};

/// Directive selecting the document dialect.
pub const FORMAT_DIRECTIVE: &str = "lockstep-format";
/// Format version of the current dialect.
pub const CURRENT_FORMAT: &str = "0.2";
const LEGACY_FORMAT: &str = "0.1";

static TEST_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\*+\s+TEST\s+([^\s:]+)\s*(?::\s*(.*?))?\s*$").expect("test heading regex")
});

/// Document is malformed; `line` is 1-indexed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("duplicate test name {0:?}")]
    DuplicateName(String),
    #[error("#+begin_src has no matching #+end_src")]
    UnterminatedBlock,
    #[error("unexpected line {0:?}; expected #+title:, #+server: and #+name: at start of file")]
    UnknownDirective(String),
    #[error("unsupported document format {0:?}")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Legacy,
    Current,
}

/// Parse a whole document.
pub fn parse_challenge(text: &str) -> Result<Challenge, ParseError> {
    let mut scanner = Scanner::new();
    for line in text.lines() {
        scanner.lineno += 1;
        scanner
            .on_line(line)
            .map_err(|kind| scanner.error_here(kind))?;
    }
    scanner.finish()
}

/// Detect which dialect a document uses without parsing its tests.
pub fn detect_dialect(text: &str) -> Result<Dialect, ParseError> {
    for (idx, line) in text.lines().enumerate() {
        if let Some(value) = directive_value(line.trim(), FORMAT_DIRECTIVE) {
            return dialect_for(&value).map_err(|kind| ParseError {
                line: idx + 1,
                kind,
            });
        }
    }
    Ok(Dialect::Legacy)
}

struct Pending {
    name: String,
    head: String,
}

enum Section {
    /// Reading document metadata until title, server and name are known.
    Meta,
    Outline,
    Source {
        test: Option<Pending>,
        opened_at: usize,
        lines: Vec<String>,
    },
    /// Prose following a block (current dialect only).
    Description { lines: Vec<String> },
}

struct Scanner {
    dialect: Dialect,
    section: Section,
    lineno: usize,
    challenge: Challenge,
    names: HashSet<String>,
    pending: Option<Pending>,
}

impl Scanner {
    fn new() -> Self {
        Self {
            dialect: Dialect::Legacy,
            section: Section::Meta,
            lineno: 0,
            challenge: Challenge::default(),
            names: HashSet::new(),
            pending: None,
        }
    }

    fn error_here(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            line: self.lineno,
            kind,
        }
    }

    fn on_line(&mut self, line: &str) -> Result<(), ParseErrorKind> {
        match &mut self.section {
            Section::Meta => self.on_meta_line(line),
            Section::Outline => self.on_outline_line(line),
            Section::Source { lines, .. } => {
                if is_directive(line.trim(), "end_src") {
                    self.close_block();
                } else {
                    lines.push(line.to_string());
                }
                Ok(())
            }
            Section::Description { lines } => {
                let trimmed = line.trim();
                if trimmed.starts_with('*') || is_directive(trimmed, "begin_src") {
                    self.close_description();
                    return self.on_outline_line(line);
                }
                if !trimmed.starts_with('#') {
                    lines.push(line.trim_end().to_string());
                }
                Ok(())
            }
        }
    }

    fn on_meta_line(&mut self, line: &str) -> Result<(), ParseErrorKind> {
        let trimmed = line.trim();
        if trimmed.is_empty() || is_comment(trimmed) {
            return Ok(());
        }
        if let Some(title) = directive_value(trimmed, "title") {
            self.challenge.title = title;
        } else if let Some(server) = directive_value(trimmed, "server") {
            self.challenge.server = server;
        } else if let Some(name) = directive_value(trimmed, "name") {
            self.challenge.name = name;
        } else if let Some(format) = directive_value(trimmed, FORMAT_DIRECTIVE) {
            self.dialect = dialect_for(&format)?;
        } else if directive_value(trimmed, "todo").is_none() {
            return Err(ParseErrorKind::UnknownDirective(line.to_string()));
        }

        let c = &self.challenge;
        if !c.title.is_empty() && !c.server.is_empty() && !c.name.is_empty() {
            self.section = Section::Outline;
        }
        Ok(())
    }

    fn on_outline_line(&mut self, line: &str) -> Result<(), ParseErrorKind> {
        let trimmed = line.trim();
        if is_directive(trimmed, "begin_src") {
            self.section = Section::Source {
                test: self.pending.take(),
                opened_at: self.lineno,
                lines: Vec::new(),
            };
            return Ok(());
        }
        if let Some(format) = directive_value(trimmed, FORMAT_DIRECTIVE) {
            if self.challenge.tests.is_empty() {
                self.dialect = dialect_for(&format)?;
            }
            return Ok(());
        }
        match self.dialect {
            Dialect::Legacy => {
                if let Some(name) = directive_value(trimmed, "name") {
                    self.claim(name, String::new())?;
                }
            }
            Dialect::Current => {
                if let Some(caps) = TEST_HEADING.captures(trimmed) {
                    let name = caps[1].to_string();
                    let head = caps.get(2).map_or("", |m| m.as_str()).to_string();
                    self.claim(name, head)?;
                }
            }
        }
        Ok(())
    }

    /// Name the next source block. The name is taken only once that block
    /// becomes a test.
    fn claim(&mut self, name: String, head: String) -> Result<(), ParseErrorKind> {
        if name.is_empty() {
            self.pending = None;
            return Ok(());
        }
        if self.names.contains(&name) {
            return Err(ParseErrorKind::DuplicateName(name));
        }
        self.pending = Some(Pending { name, head });
        Ok(())
    }

    fn close_block(&mut self) {
        let Section::Source { test, lines, .. } = mem::replace(&mut self.section, Section::Outline)
        else {
            return;
        };
        // Blocks without a name are not tests.
        let Some(pending) = test else {
            return;
        };
        self.names.insert(pending.name.clone());
        let grp = self.challenge.tests.len() as i64;
        self.challenge
            .tests
            .push(build_test(pending, lines, self.dialect, grp));
        if self.dialect == Dialect::Current {
            self.section = Section::Description { lines: Vec::new() };
        }
    }

    fn close_description(&mut self) {
        let Section::Description { lines } = mem::replace(&mut self.section, Section::Outline)
        else {
            return;
        };
        let start = lines.iter().position(|l| !l.trim().is_empty());
        let end = lines.iter().rposition(|l| !l.trim().is_empty());
        if let (Some(start), Some(end), Some(test)) = (start, end, self.challenge.tests.last_mut())
        {
            test.body = lines[start..=end].join("\n");
        }
    }

    fn finish(mut self) -> Result<Challenge, ParseError> {
        match &self.section {
            Section::Source { opened_at, .. } => Err(ParseError {
                line: *opened_at,
                kind: ParseErrorKind::UnterminatedBlock,
            }),
            Section::Description { .. } => {
                self.close_description();
                Ok(self.challenge)
            }
            Section::Meta | Section::Outline => Ok(self.challenge),
        }
    }
}

fn build_test(pending: Pending, mut lines: Vec<String>, dialect: Dialect, grp: i64) -> TestDescription {
    trim_trailing_blank(&mut lines);
    let mut head = pending.head;
    let mut doc = Vec::new();
    let mut ilines = Vec::new();
    let mut olines = Vec::new();

    for raw in &lines {
        if raw.trim_start().starts_with('#') {
            continue;
        }
        let content = match raw.find('#') {
            Some(idx) => &raw[..idx],
            None => raw.as_str(),
        }
        .trim();

        if dialect == Dialect::Legacy {
            if let Some(title) = marked(content, '=') {
                head = title.to_string();
                continue;
            }
            if let Some(text) = marked(content, ':') {
                doc.push(text.to_string());
                continue;
            }
        }
        if let Some(input) = content.strip_prefix('>') {
            ilines.push(input.strip_prefix(' ').unwrap_or(input).to_string());
        } else {
            olines.push(content.to_string());
        }
    }
    trim_trailing_blank(&mut ilines);
    trim_trailing_blank(&mut olines);

    TestDescription {
        grp,
        name: pending.name,
        head,
        body: doc.join("\n"),
        ilines,
        olines: Some(olines),
        ..TestDescription::default()
    }
}

/// `"= text"` -> `Some("text")`; a lone marker yields an empty string.
pub(crate) fn marked(content: &str, marker: char) -> Option<&str> {
    let rest = content.strip_prefix(marker)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix(' ')
    }
}

fn trim_trailing_blank(lines: &mut Vec<String>) {
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
}

fn dialect_for(version: &str) -> Result<Dialect, ParseErrorKind> {
    match version {
        CURRENT_FORMAT => Ok(Dialect::Current),
        LEGACY_FORMAT => Ok(Dialect::Legacy),
        other => Err(ParseErrorKind::UnsupportedFormat(other.to_string())),
    }
}

pub(crate) fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with('#') && !trimmed.starts_with("#+")
}

/// Case-insensitive match of a bare `#+keyword` line (e.g. `#+begin_src python`).
pub(crate) fn is_directive(trimmed: &str, keyword: &str) -> bool {
    let Some(rest) = trimmed.strip_prefix("#+") else {
        return false;
    };
    let word = rest.split_whitespace().next().unwrap_or("");
    word.eq_ignore_ascii_case(keyword)
}

/// Value of a `#+key: value` line, trimmed.
pub(crate) fn directive_value(trimmed: &str, key: &str) -> Option<String> {
    let rest = trimmed.strip_prefix("#+")?;
    let (found, value) = rest.split_once(':')?;
    found
        .eq_ignore_ascii_case(key)
        .then(|| value.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_HEADER: &str = "#+title: echo things\n#+server: http://localhost:3001/\n#+name: echo\n";
    const CURRENT_HEADER: &str = "#+title: echo things\n#+server: http://localhost:3001/\n#+lockstep-format: 0.2\n#+name: echo\n";

    fn owned(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_metadata() {
        let challenge = parse_challenge(LEGACY_HEADER).expect("parse");
        assert_eq!(challenge.title, "echo things");
        assert_eq!(challenge.server, "http://localhost:3001/");
        assert_eq!(challenge.name, "echo");
        assert!(challenge.tests.is_empty());
    }

    #[test]
    fn legacy_tests_in_source_order() {
        let doc = format!(
            "{LEGACY_HEADER}\n* first\n#+name: one\n#+begin_src\n= say hello\n: greets\n: politely\n> hello\nhello\n#+end_src\n\n* second\n#+name: two\n#+begin_src\n> a\n> b\na\nb\n#+end_src\n"
        );
        let challenge = parse_challenge(&doc).expect("parse");
        let names: Vec<&str> = challenge.tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);

        let one = &challenge.tests[0];
        assert_eq!(one.head, "say hello");
        assert_eq!(one.body, "greets\npolitely");
        assert_eq!(one.ilines, owned(&["hello"]));
        assert_eq!(one.olines, Some(owned(&["hello"])));

        let two = &challenge.tests[1];
        assert_eq!(two.ilines, owned(&["a", "b"]));
        assert_eq!(two.olines, Some(owned(&["a", "b"])));
        assert_eq!((one.grp, two.grp), (0, 1));
    }

    #[test]
    fn current_dialect_reads_heading_and_trailing_prose() {
        let doc = format!(
            "{CURRENT_HEADER}\n** TEST greet : say hello\n#+begin_src\n> hello\nhello\n#+end_src\n\nThe program greets back.\nEvery time.\n\n** TEST quiet\n#+begin_src\n#+end_src\n"
        );
        let challenge = parse_challenge(&doc).expect("parse");
        assert_eq!(challenge.tests.len(), 2);

        let greet = &challenge.tests[0];
        assert_eq!(greet.name, "greet");
        assert_eq!(greet.head, "say hello");
        assert_eq!(greet.body, "The program greets back.\nEvery time.");
        assert_eq!(greet.ilines, owned(&["hello"]));
        assert_eq!(greet.olines, Some(owned(&["hello"])));

        let quiet = &challenge.tests[1];
        assert_eq!(quiet.head, "");
        assert_eq!(quiet.body, "");
        assert_eq!(quiet.olines, Some(Vec::new()));
    }

    #[test]
    fn current_dialect_keeps_equals_and_colon_lines_as_output() {
        let doc = format!("{CURRENT_HEADER}** TEST eq\n#+begin_src\n> x\n= 1\n: two\n#+end_src\n");
        let challenge = parse_challenge(&doc).expect("parse");
        assert_eq!(challenge.tests[0].olines, Some(owned(&["= 1", ": two"])));
        assert_eq!(challenge.tests[0].head, "");
    }

    #[test]
    fn comments_are_dropped_and_trailing_comments_stripped() {
        let doc = format!(
            "{LEGACY_HEADER}#+name: c\n#+begin_src\n# whole line\n   # indented comment\n> put 1 # send one\n1   # echoed\n#+end_src\n"
        );
        let challenge = parse_challenge(&doc).expect("parse");
        let test = &challenge.tests[0];
        assert_eq!(test.ilines, owned(&["put 1"]));
        assert_eq!(test.olines, Some(owned(&["1"])));
    }

    #[test]
    fn input_marker_strips_only_one_space() {
        let doc = format!("{LEGACY_HEADER}#+name: s\n#+begin_src\n>x\n>   y\n#+end_src\n");
        let challenge = parse_challenge(&doc).expect("parse");
        assert_eq!(challenge.tests[0].ilines, owned(&["x", "  y"]));
    }

    #[test]
    fn trailing_blank_lines_are_trimmed() {
        let doc = format!(
            "{LEGACY_HEADER}#+name: t\n#+begin_src\n> a\n>\nout\n\n   \n#+end_src\n#+name: u\n#+begin_src\n> a\n\n#+end_src\n"
        );
        let challenge = parse_challenge(&doc).expect("parse");
        assert_eq!(challenge.tests[0].ilines, owned(&["a"]));
        assert_eq!(challenge.tests[0].olines, Some(owned(&["out"])));
        assert_eq!(challenge.tests[1].olines, Some(Vec::new()));
    }

    #[test]
    fn duplicate_names_fail_in_both_dialects() {
        let legacy = format!(
            "{LEGACY_HEADER}#+name: t\n#+begin_src\n#+end_src\n#+name: t\n#+begin_src\n#+end_src\n"
        );
        let err = parse_challenge(&legacy).expect_err("duplicate");
        assert_eq!(err.kind, ParseErrorKind::DuplicateName("t".to_string()));
        assert_eq!(err.line, 7);

        let current = format!("{CURRENT_HEADER}** TEST t\n#+begin_src\n#+end_src\n* TEST t : again\n");
        let err = parse_challenge(&current).expect_err("duplicate");
        assert_eq!(err.kind, ParseErrorKind::DuplicateName("t".to_string()));
    }

    #[test]
    fn heading_without_block_does_not_take_its_name() {
        let current = format!(
            "{CURRENT_HEADER}** TEST t : draft
no block here
** TEST t : real
#+begin_src
ok
#+end_src
"
        );
        let challenge = parse_challenge(&current).expect("parse");
        assert_eq!(challenge.tests.len(), 1);
        assert_eq!(challenge.tests[0].head, "real");

        let legacy = format!("{LEGACY_HEADER}#+name: t

#+name: t
#+begin_src
ok
#+end_src
");
        assert_eq!(parse_challenge(&legacy).expect("parse").tests.len(), 1);
    }

    #[test]
    fn unterminated_block_is_an_error() {
        let doc = format!("{LEGACY_HEADER}#+name: t\n#+begin_src\n> a\n");
        let err = parse_challenge(&doc).expect_err("unterminated");
        assert_eq!(err.kind, ParseErrorKind::UnterminatedBlock);
        assert_eq!(err.line, 5);
    }

    #[test]
    fn unknown_directive_before_metadata_is_an_error() {
        let err = parse_challenge("#+title: x\n* heading\n").expect_err("unknown");
        assert!(matches!(err.kind, ParseErrorKind::UnknownDirective(_)));
        assert_eq!(err.line, 2);
    }

    #[test]
    fn unsupported_format_is_an_error() {
        let err = parse_challenge("#+lockstep-format: 9\n").expect_err("format");
        assert_eq!(err.kind, ParseErrorKind::UnsupportedFormat("9".to_string()));
    }

    #[test]
    fn unnamed_source_blocks_are_skipped() {
        let legacy = format!(
            "{LEGACY_HEADER}#+begin_src\n> ignored\n#+end_src\n#+name: real\n#+begin_src\nok\n#+end_src\n#+begin_src\nreused name is not inherited\n#+end_src\n"
        );
        let challenge = parse_challenge(&legacy).expect("parse");
        let names: Vec<&str> = challenge.tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["real"]);

        let current = format!("{CURRENT_HEADER}* notes\n#+begin_src\nexample only\n#+end_src\n");
        assert!(parse_challenge(&current).expect("parse").tests.is_empty());
    }

    #[test]
    fn detects_dialect_from_directive() {
        assert_eq!(detect_dialect(LEGACY_HEADER), Ok(Dialect::Legacy));
        assert_eq!(detect_dialect(CURRENT_HEADER), Ok(Dialect::Current));
    }

    #[test]
    fn directive_keywords_are_case_insensitive() {
        let doc = format!("{LEGACY_HEADER}#+NAME: up\n#+BEGIN_SRC text\nok\n#+END_SRC\n");
        let challenge = parse_challenge(&doc).expect("parse");
        assert_eq!(challenge.tests[0].name, "up");
    }
}
