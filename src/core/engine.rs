use thiserror::Error;

use crate::{
    action::{Action, ActionKind, ValidationError},
    rsvp::{ChangeReport, Outcome},
    types::{Capacity, Details, Placement, UserId, Version},
};

use super::state::EventState;

/// Reasons the engine refuses an action. State is untouched in every case.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Malformed action.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Shrinking capacity would evict confirmed users.
    #[error("capacity {requested} is below the {confirmed} already confirmed")]
    CapacityBelowConfirmed {
        /// Requested capacity.
        requested: Capacity,
        /// Current confirmed count.
        confirmed: usize,
    },
    /// Optimistic guard did not match.
    #[error("expected version {expected}, event is at {actual}")]
    VersionConflict {
        /// Version the caller expected.
        expected: Version,
        /// Version the event is at.
        actual: Version,
    },
}

/// Pure RSVP transition function.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsvpEngine;

impl RsvpEngine {
    /// Computes the state after `action`, leaving `state` as it was.
    ///
    /// Full events, duplicate joins, and cancels of absent users are business
    /// outcomes carried in the [`ChangeReport`], not errors. Every accepted
    /// action advances the version by exactly one.
    pub fn apply(state: &EventState, action: &Action) -> Result<(EventState, ChangeReport), EngineError> {
        action.check()?;

        let mut next = state.clone();
        let report = match action {
            Action::Join { user_id, details } => Self::join(&mut next, user_id, details),
            Action::Cancel { user_id } => Self::leave(&mut next, user_id, ActionKind::Cancel),
            Action::Decline { user_id } => Self::leave(&mut next, user_id, ActionKind::Decline),
            Action::SetCapacity { capacity } => Self::set_capacity(&mut next, *capacity)?,
            Action::SetMeta { meta } => {
                next.merge_meta(meta);
                event_report(ActionKind::SetMeta, Vec::new(), Outcome::MetaUpdated)
            }
        };
        next.bump_version();

        debug_assert_eq!(next.check_invariants(), Ok(()));
        Ok((next, report))
    }

    /// Applies `action` only if the state is at `expected`, when given.
    pub fn apply_expecting(
        state: &EventState,
        action: &Action,
        expected: Option<Version>,
    ) -> Result<(EventState, ChangeReport), EngineError> {
        if let Some(expected) = expected {
            if expected != state.version() {
                return Err(EngineError::VersionConflict {
                    expected,
                    actual: state.version(),
                });
            }
        }
        Self::apply(state, action)
    }

    fn join(next: &mut EventState, user_id: &UserId, details: &Details) -> ChangeReport {
        let from = next.placement_of(user_id);
        let (to, outcome) = match from {
            Placement::Confirmed => (Placement::Confirmed, Outcome::AlreadyConfirmed),
            Placement::Waitlist => {
                next.remove(user_id);
                next.push_waitlist(user_id.clone());
                (Placement::Waitlist, Outcome::AlreadyWaitlisted)
            }
            Placement::None if next.is_full() => {
                next.push_waitlist(user_id.clone());
                (Placement::Waitlist, Outcome::Waitlisted)
            }
            Placement::None => {
                next.push_confirmed(user_id.clone());
                (Placement::Confirmed, Outcome::Confirmed)
            }
        };
        next.merge_details(user_id, details);

        ChangeReport {
            kind: ActionKind::Join,
            user_id: Some(user_id.clone()),
            from,
            to,
            promoted: Vec::new(),
            outcome,
        }
    }

    fn leave(next: &mut EventState, user_id: &UserId, kind: ActionKind) -> ChangeReport {
        let from = next.remove(user_id);
        let promoted = if from == Placement::Confirmed && next.capacity() > 0 {
            next.promote_waitlisted()
        } else {
            Vec::new()
        };
        let outcome = if from.is_listed() {
            Outcome::Removed
        } else {
            Outcome::NotPresent
        };

        ChangeReport {
            kind,
            user_id: Some(user_id.clone()),
            from,
            to: Placement::None,
            promoted,
            outcome,
        }
    }

    fn set_capacity(next: &mut EventState, capacity: Capacity) -> Result<ChangeReport, EngineError> {
        let confirmed = next.confirmed().len();
        if capacity > 0 && (capacity as usize) < confirmed {
            return Err(EngineError::CapacityBelowConfirmed {
                requested: capacity,
                confirmed,
            });
        }

        let previous = next.capacity();
        next.set_capacity(capacity);
        let promoted = next.promote_waitlisted();

        Ok(event_report(
            ActionKind::SetCapacity,
            promoted,
            Outcome::CapacityUpdated {
                previous,
                current: capacity,
            },
        ))
    }
}

fn event_report(kind: ActionKind, promoted: Vec<UserId>, outcome: Outcome) -> ChangeReport {
    ChangeReport {
        kind,
        user_id: None,
        from: Placement::None,
        to: Placement::None,
        promoted,
        outcome,
    }
}
