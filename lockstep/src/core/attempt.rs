//! Attempt transition table.
//!
//! Transitions are keyed by `(state, tag)`. Every pair not listed in
//! [`TRANSITIONS`] is invalid.

use std::fmt;

use thiserror::Error;

use crate::core::types::AttemptState;

/// One-letter event tags driving the attempt state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// `X`: the learner asked for the next test batch.
    Next,
    /// `P`: the focused batch passed.
    Pass,
    /// `N`: a test failed that never passed before.
    NewFail,
    /// `O`: a previously passing test failed (regression).
    OldFail,
}

impl Tag {
    pub const ALL: [Tag; 4] = [Tag::Next, Tag::Pass, Tag::NewFail, Tag::OldFail];

    pub fn letter(self) -> char {
        match self {
            Tag::Next => 'X',
            Tag::Pass => 'P',
            Tag::NewFail => 'N',
            Tag::OldFail => 'O',
        }
    }

    /// Tag for a failure, given whether the test has a progress record.
    pub fn for_failure(previously_passed: bool) -> Tag {
        if previously_passed {
            Tag::OldFail
        } else {
            Tag::NewFail
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Where a transition leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    To(AttemptState),
    /// `Build` if another batch exists, otherwise `Done`.
    NextBatchOrDone,
}

pub const TRANSITIONS: &[(AttemptState, Tag, Target)] = &[
    (AttemptState::Start, Tag::Next, Target::To(AttemptState::Build)),
    (AttemptState::Start, Tag::Pass, Target::To(AttemptState::Start)),
    (AttemptState::Build, Tag::Pass, Target::To(AttemptState::Change)),
    (AttemptState::Build, Tag::NewFail, Target::To(AttemptState::Build)),
    (AttemptState::Build, Tag::OldFail, Target::To(AttemptState::Fix)),
    (AttemptState::Fix, Tag::Pass, Target::To(AttemptState::Change)),
    (AttemptState::Fix, Tag::NewFail, Target::To(AttemptState::Build)),
    (AttemptState::Fix, Tag::OldFail, Target::To(AttemptState::Fix)),
    (AttemptState::Change, Tag::Next, Target::NextBatchOrDone),
    (AttemptState::Change, Tag::Pass, Target::To(AttemptState::Change)),
    (AttemptState::Change, Tag::OldFail, Target::To(AttemptState::Fix)),
    (AttemptState::Done, Tag::Next, Target::To(AttemptState::Done)),
    (AttemptState::Done, Tag::Pass, Target::To(AttemptState::Done)),
    (AttemptState::Done, Tag::OldFail, Target::To(AttemptState::Fix)),
];

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid transition: {state}.{tag}")]
pub struct InvalidTransition {
    pub state: AttemptState,
    pub tag: Tag,
}

/// Look up the table cell for `(state, tag)`.
pub fn lookup(state: AttemptState, tag: Tag) -> Result<Target, InvalidTransition> {
    TRANSITIONS
        .iter()
        .find(|(from, on, _)| *from == state && *on == tag)
        .map(|(_, _, target)| *target)
        .ok_or(InvalidTransition { state, tag })
}

/// Resolve a transition to a concrete state.
///
/// `has_next_batch` is consulted only for `Change.X`.
pub fn resolve(
    state: AttemptState,
    tag: Tag,
    has_next_batch: impl FnOnce() -> bool,
) -> Result<AttemptState, InvalidTransition> {
    match lookup(state, tag)? {
        Target::To(next) => Ok(next),
        Target::NextBatchOrDone if has_next_batch() => Ok(AttemptState::Build),
        Target::NextBatchOrDone => Ok(AttemptState::Done),
    }
}
