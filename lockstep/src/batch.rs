//! Moving an attempt on to its next batch of tests.

use anyhow::{Context, Result};
use tracing::info;

use crate::core::types::{AttemptState, TestDescription};
use crate::io::client::AttemptService;
use crate::io::store::Store;
use crate::progress::{Event, advance_attempt};

#[derive(Debug, PartialEq, Eq)]
pub enum NextOutcome {
    /// The attempt was already finished.
    AlreadyDone,
    /// A regression is focused; it has to pass before new work is handed out.
    Blocked(AttemptState),
    /// The current batch is already here and still has to pass.
    Known(Vec<TestDescription>),
    /// New tests were fetched and the attempt moved to `build`.
    Fetched(Vec<TestDescription>),
    /// The server had nothing left; the attempt is done.
    Completed,
}

/// Show the current batch if one is pending, otherwise fetch the next one.
///
/// Fetched tests are stored locally before the local `X` transition, so the
/// transition sees the new batch.
pub fn fetch_next(store: &Store, service: &dyn AttemptService, code: &str) -> Result<NextOutcome> {
    let attempt = store.require_attempt(code)?;
    match attempt.state {
        AttemptState::Done => return Ok(NextOutcome::AlreadyDone),
        AttemptState::Start => {}
        state => {
            let known = store.next_batch(attempt.id)?;
            if !known.is_empty() {
                return Ok(NextOutcome::Known(known));
            }
            if state == AttemptState::Fix {
                return Ok(NextOutcome::Blocked(state));
            }
        }
    }

    let tests = service
        .next_tests(code)
        .context("fetch next tests from server")?;
    if !tests.is_empty() {
        store.insert_tests(attempt.chid, &tests)?;
    }
    let step = advance_attempt(store, code, None, Event::Next).context("record next locally")?;
    info!(fetched = tests.len(), state = %step.state, "next batch");
    if step.state == AttemptState::Done {
        return Ok(NextOutcome::Completed);
    }
    Ok(NextOutcome::Fetched(store.next_batch(attempt.id)?))
}
