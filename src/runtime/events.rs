//! Runtime event stream payloads.

use serde::{Deserialize, Serialize};

use crate::{
    action::ActionKind,
    core::engine::EngineError,
    rsvp::{ChangeReport, Snapshot},
    types::{EventId, UserId, Version},
};

/// Emitted once per committed transition, in version order per event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Event that changed.
    pub event_id: EventId,
    /// Version after the transition.
    pub version: Version,
    /// What changed.
    pub report: ChangeReport,
    /// State after the transition.
    pub snapshot: Snapshot,
}

/// A queued action the engine refused; the event is unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedAction {
    /// Target event.
    pub event_id: EventId,
    /// Version the event stayed at.
    pub version: Version,
    /// Kind of the refused action.
    pub kind: ActionKind,
    /// Acting user, absent for event-level actions.
    pub user_id: Option<UserId>,
    /// Why it was refused.
    pub error: EngineError,
}

/// Item of [`crate::runtime::handle::DispatcherHandle::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// A transition was applied.
    Committed(SyncEvent),
    /// An action was refused.
    Rejected(RejectedAction),
}

impl RuntimeEvent {
    /// Event the item belongs to.
    pub fn event_id(&self) -> &str {
        match self {
            Self::Committed(evt) => &evt.event_id,
            Self::Rejected(rej) => &rej.event_id,
        }
    }
}
