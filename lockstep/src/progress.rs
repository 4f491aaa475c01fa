//! Attempt progress: apply one event to a persisted attempt.
//!
//! The transition itself comes from [`crate::core::attempt`]; this module
//! supplies what the table cannot know: whether a failing test passed
//! before (regression tagging) and what the next batch is.

use thiserror::Error;
use tracing::{info, instrument};

use crate::core::attempt::{self, InvalidTransition, Tag};
use crate::core::types::{AttemptState, TestId};
use crate::io::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("attempt {code:?} is inconsistent: {detail}")]
    Inconsistent { code: String, detail: String },
    #[error("unknown attempt {0:?}")]
    UnknownAttempt(String),
    #[error("attempt {code:?} has no test named {test:?}")]
    UnknownTest { code: String, test: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    /// The learner asked for the next batch.
    Next,
    /// Every test the learner currently has passed.
    Pass,
    Fail { test_name: &'a str },
}

/// The applied transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advanced {
    pub from: AttemptState,
    pub tag: Tag,
    pub state: AttemptState,
    pub focus: Option<TestId>,
    pub focus_name: Option<String>,
}

/// Apply `event` to the attempt `code` and persist the new state and focus.
///
/// With `uid` set, the attempt must belong to that user.
#[instrument(skip(store))]
pub fn advance_attempt(
    store: &Store,
    code: &str,
    uid: Option<i64>,
    event: Event<'_>,
) -> Result<Advanced, AttemptError> {
    let attempt = store
        .attempt(code)?
        .filter(|a| uid.is_none() || a.uid == uid)
        .ok_or_else(|| AttemptError::UnknownAttempt(code.to_string()))?;

    let (tag, mut focus) = match event {
        Event::Next => (Tag::Next, None),
        Event::Pass => (Tag::Pass, None),
        Event::Fail { test_name } => {
            let test = store.attempt_test(attempt.id, test_name)?.ok_or_else(|| {
                AttemptError::UnknownTest {
                    code: code.to_string(),
                    test: test_name.to_string(),
                }
            })?;
            let previously_passed = store.has_progress(attempt.id, test.id)?;
            (Tag::for_failure(previously_passed), Some(test.id))
        }
    };

    if tag == Tag::Pass
        && matches!(attempt.state, AttemptState::Build | AttemptState::Fix)
        && let Some(focused) = attempt.focus
        && !store.has_progress(attempt.id, focused)?
    {
        let name = store.test_name(focused)?.unwrap_or_default();
        return Err(AttemptError::Inconsistent {
            code: code.to_string(),
            detail: format!("batch reported passing but focus test {name:?} never passed"),
        });
    }

    let first_of_next = if tag == Tag::Next {
        store.next_batch(attempt.id)?.first().map(|t| t.id)
    } else {
        None
    };
    let mut state = attempt::resolve(attempt.state, tag, || first_of_next.is_some())?;
    if tag == Tag::Next && state == AttemptState::Build {
        match first_of_next {
            Some(first) => focus = Some(first),
            None => state = AttemptState::Done,
        }
    }

    store.set_attempt_state(attempt.id, state, focus)?;
    let focus_name = match focus {
        Some(tid) => store.test_name(tid)?,
        None => None,
    };
    info!(from = %attempt.state, %tag, to = %state, focus = ?focus_name, "attempt advanced");
    Ok(Advanced {
        from: attempt.state,
        tag,
        state,
        focus,
        focus_name,
    })
}
