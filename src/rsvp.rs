//! RSVP domain records: event metadata, snapshots, and change reports.

use serde::{Deserialize, Serialize};

use crate::{
    action::ActionKind,
    types::{Capacity, Details, EventId, Placement, UserId, Version},
};

/// Descriptive event fields. Every field is optional so the same type doubles
/// as a sparse patch where each `Some` overwrites the stored value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventMeta {
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Start time in milliseconds since epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at_ms: Option<u64>,
    /// End time in milliseconds since epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at_ms: Option<u64>,
}

impl EventMeta {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Overwrites fields of `self` with every field present in `patch`.
    pub fn merge(&mut self, patch: &EventMeta) {
        if let Some(v) = &patch.title {
            self.title = Some(v.clone());
        }
        if let Some(v) = patch.starts_at_ms {
            self.starts_at_ms = Some(v);
        }
        if let Some(v) = patch.ends_at_ms {
            self.ends_at_ms = Some(v);
        }
    }
}

/// One listed user together with their profile fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// User identifier.
    pub user_id: UserId,
    /// Profile fields stored for the user.
    #[serde(default)]
    pub details: Details,
}

/// Immutable, order-preserving read of one event.
///
/// Safe to render or serialize without holding any lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Event identifier.
    pub event_id: EventId,
    /// Slot capacity, `0` for unlimited.
    pub capacity: Capacity,
    /// Version of the state this snapshot was taken from.
    pub version: Version,
    /// Descriptive fields.
    #[serde(default)]
    pub meta: EventMeta,
    /// Confirmed members in join order.
    pub confirmed: Vec<Member>,
    /// Waitlisted members in queue order.
    pub waitlist: Vec<Member>,
}

impl Snapshot {
    /// Number of confirmed members.
    pub fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }

    /// Number of waitlisted members.
    pub fn waitlist_count(&self) -> usize {
        self.waitlist.len()
    }

    /// Free slots, or `None` for an unlimited event.
    pub fn spots_left(&self) -> Option<usize> {
        if self.capacity == 0 {
            return None;
        }
        Some((self.capacity as usize).saturating_sub(self.confirmed.len()))
    }

    /// True when a limited event has no free slot.
    pub fn is_full(&self) -> bool {
        self.spots_left() == Some(0)
    }

    /// Confirmed user ids in order.
    pub fn confirmed_ids(&self) -> Vec<&str> {
        self.confirmed.iter().map(|m| m.user_id.as_str()).collect()
    }

    /// Waitlisted user ids in order.
    pub fn waitlist_ids(&self) -> Vec<&str> {
        self.waitlist.iter().map(|m| m.user_id.as_str()).collect()
    }

    /// Placement of `user_id` and its zero-based position within that list.
    pub fn position_of(&self, user_id: &str) -> (Placement, Option<usize>) {
        if let Some(idx) = self.confirmed.iter().position(|m| m.user_id == user_id) {
            return (Placement::Confirmed, Some(idx));
        }
        if let Some(idx) = self.waitlist.iter().position(|m| m.user_id == user_id) {
            return (Placement::Waitlist, Some(idx));
        }
        (Placement::None, None)
    }
}

/// Business outcome of one accepted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Outcome {
    /// User took a free slot.
    Confirmed,
    /// Event was full; user queued.
    Waitlisted,
    /// User already held a slot; details refreshed only.
    AlreadyConfirmed,
    /// User was already queued; moved to the tail.
    AlreadyWaitlisted,
    /// User left the list they were on.
    Removed,
    /// User was on neither list.
    NotPresent,
    /// Capacity changed.
    CapacityUpdated {
        /// Capacity before the change.
        previous: Capacity,
        /// Capacity after the change.
        current: Capacity,
    },
    /// Descriptive fields changed.
    MetaUpdated,
}

/// Description of what one transition changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeReport {
    /// Kind of action that produced this report.
    pub kind: ActionKind,
    /// Acting user, absent for event-level actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Placement of the acting user before the action.
    pub from: Placement,
    /// Placement of the acting user after the action.
    pub to: Placement,
    /// Users moved waitlist → confirmed as a side effect, in promotion order.
    #[serde(default)]
    pub promoted: Vec<UserId>,
    /// Business outcome.
    pub outcome: Outcome,
}

impl ChangeReport {
    /// True when membership of either list changed.
    pub fn membership_changed(&self) -> bool {
        self.from != self.to || !self.promoted.is_empty()
    }
}
