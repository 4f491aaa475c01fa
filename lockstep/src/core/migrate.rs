//! Rewrite legacy documents into the current dialect.
//!
//! A legacy test is a `#+name:` line before a source block whose `=` line
//! holds the title and whose `:` lines hold the description. The rewrite
//! turns the nearest preceding headline into `* TEST name : title`, drops the
//! `#+name:` line and moves the description below the block. Everything
//! else is copied through.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::core::parser::{
    CURRENT_FORMAT, Dialect, FORMAT_DIRECTIVE, ParseError, detect_dialect, directive_value,
    is_comment, is_directive, marked, parse_challenge,
};

/// Org keyword line that lets outline editors highlight `TEST` headings.
pub const TODO_KEYWORDS: &str = "#+todo: TODO | DONE TEST";

static HEADLINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\*+)\s+(?:(?:TODO|DONE)\b\s*)?(.*?)$").expect("headline regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MigrateError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("document already uses {FORMAT_DIRECTIVE} {CURRENT_FORMAT}")]
    AlreadyCurrent,
    #[error("line {line}: test name {name:?} cannot be used in a TEST heading")]
    UnrepresentableName { line: usize, name: String },
}

/// A rewritten document and one line per change made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub text: String,
    pub changes: Vec<String>,
}

struct Headline {
    /// Index into the output lines.
    at: usize,
    stars: String,
    text: String,
}

/// Rewrite a legacy document. Malformed documents are rejected untouched.
pub fn migrate_legacy(text: &str) -> Result<Migration, MigrateError> {
    if detect_dialect(text)? == Dialect::Current {
        return Err(MigrateError::AlreadyCurrent);
    }
    parse_challenge(text)?;

    let format_line = format!("#+{FORMAT_DIRECTIVE}: {CURRENT_FORMAT}");
    let mut preamble = vec![format_line.clone()];
    let mut changes = vec![format!("added {format_line}")];
    if !text
        .lines()
        .any(|line| directive_value(line.trim(), "todo").is_some())
    {
        preamble.push(TODO_KEYWORDS.to_string());
        changes.push(format!("added {TODO_KEYWORDS}"));
    }

    let mut out: Vec<String> = Vec::new();
    let mut meta = MetaSeen::default();
    let mut preamble = Some(preamble);
    let mut headline: Option<Headline> = None;
    let mut pending: Option<String> = None;
    let mut lines = text.lines().enumerate();

    while let Some((idx, line)) = lines.next() {
        let trimmed = line.trim();

        // The legacy format directive gives way to the current one.
        if directive_value(trimmed, FORMAT_DIRECTIVE).is_some() {
            continue;
        }

        if preamble.is_some() {
            if meta.completes_with(trimmed)
                && let Some(header) = preamble.take()
            {
                out.extend(header);
            }
            out.push(line.to_string());
            continue;
        }

        if let Some(name) = directive_value(trimmed, "name") {
            if name.contains(|c: char| c.is_whitespace() || c == ':') {
                return Err(MigrateError::UnrepresentableName {
                    line: idx + 1,
                    name,
                });
            }
            pending = (!name.is_empty()).then_some(name);
            continue;
        }

        if is_directive(trimmed, "begin_src") {
            let mut block = Vec::new();
            let mut end = None;
            for (_, inner) in lines.by_ref() {
                if is_directive(inner.trim(), "end_src") {
                    end = Some(inner);
                    break;
                }
                block.push(inner);
            }
            let end = end.map_or_else(|| "#+end_src".to_string(), str::to_string);

            match pending.take() {
                Some(name) => {
                    let body = split_block(&block);
                    convert_test(&mut out, headline.take(), &name, &body);
                    out.push(line.to_string());
                    out.extend(body.kept);
                    out.push(end);
                    if !body.description.is_empty() {
                        out.push(String::new());
                        out.extend(body.description);
                    }
                    changes.push(format!("converted test {name}"));
                }
                None => {
                    headline = None;
                    out.push(line.to_string());
                    out.extend(block.iter().map(|l| l.to_string()));
                    out.push(end);
                }
            }
            continue;
        }

        if let Some(caps) = HEADLINE.captures(trimmed) {
            headline = Some(Headline {
                at: out.len(),
                stars: caps[1].to_string(),
                text: caps[2].trim().to_string(),
            });
        }
        out.push(line.to_string());
    }

    if let Some(header) = preamble {
        out.splice(0..0, header);
    }

    let mut text = out.join("\n");
    text.push('\n');
    Ok(Migration { text, changes })
}

/// Tracks the metadata directives that end the document header.
#[derive(Default)]
struct MetaSeen {
    title: bool,
    server: bool,
    name: bool,
}

impl MetaSeen {
    /// True when `trimmed` is the directive that completes the header.
    fn completes_with(&mut self, trimmed: &str) -> bool {
        if trimmed.is_empty() || is_comment(trimmed) {
            return false;
        }
        let before = self.complete();
        if directive_value(trimmed, "title").is_some_and(|v| !v.is_empty()) {
            self.title = true;
        } else if directive_value(trimmed, "server").is_some_and(|v| !v.is_empty()) {
            self.server = true;
        } else if directive_value(trimmed, "name").is_some_and(|v| !v.is_empty()) {
            self.name = true;
        }
        !before && self.complete()
    }

    fn complete(&self) -> bool {
        self.title && self.server && self.name
    }
}

struct BlockBody {
    title: Option<String>,
    description: Vec<String>,
    kept: Vec<String>,
}

/// Separate legacy `=` and `:` lines from the block's input and output.
fn split_block(block: &[&str]) -> BlockBody {
    let mut body = BlockBody {
        title: None,
        description: Vec::new(),
        kept: Vec::new(),
    };
    for &raw in block {
        if !raw.trim_start().starts_with('#') {
            let content = match raw.find('#') {
                Some(idx) => &raw[..idx],
                None => raw,
            }
            .trim();
            if let Some(title) = marked(content, '=') {
                body.title = Some(title.to_string());
                continue;
            }
            if let Some(text) = marked(content, ':') {
                body.description.push(text.to_string());
                continue;
            }
        }
        body.kept.push(raw.to_string());
    }
    body
}

/// Emit the `TEST` heading, replacing the test's headline when it has one.
fn convert_test(out: &mut Vec<String>, headline: Option<Headline>, name: &str, body: &BlockBody) {
    let (at, stars, original) = match headline {
        Some(h) => (Some(h.at), h.stars, h.text),
        None => (None, "**".to_string(), String::new()),
    };
    let title = body.title.as_deref().unwrap_or(&original);
    let heading = if title.is_empty() {
        format!("{stars} TEST {name}")
    } else {
        format!("{stars} TEST {name} : {title}")
    };

    match at {
        Some(at) => {
            out[at] = heading;
            if !original.is_empty() && original != title {
                out.insert(at + 1, format!("# Original headline: {original}"));
            }
        }
        None => out.push(heading),
    }
}
