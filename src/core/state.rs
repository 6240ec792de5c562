use std::collections::VecDeque;

use hashbrown::HashMap;
use thiserror::Error;

use crate::{
    rsvp::{EventMeta, Member, Snapshot},
    types::{Capacity, Details, EventId, Placement, UserId, Version},
};

/// A broken structural invariant. Reaching one is a bug in the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// User appears twice, or on both lists.
    #[error("user {0} is listed more than once")]
    DuplicateMember(UserId),
    /// Confirmed list exceeds a non-zero capacity.
    #[error("{confirmed} confirmed exceeds capacity {capacity}")]
    OverCapacity {
        /// Configured capacity.
        capacity: Capacity,
        /// Confirmed count.
        confirmed: usize,
    },
    /// Someone waits although a slot is free, or the event is unlimited.
    #[error("{waiting} waiting while {confirmed}/{capacity} confirmed")]
    IdleWaitlist {
        /// Configured capacity.
        capacity: Capacity,
        /// Confirmed count.
        confirmed: usize,
        /// Waitlist length.
        waiting: usize,
    },
    /// Placement index disagrees with the lists.
    #[error("placement index out of sync for user {0}")]
    IndexMismatch(UserId),
}

/// Capacity, confirmed list, waitlist, and per-user details of one event.
///
/// Only [`crate::core::engine::RsvpEngine`] produces new states; everything
/// else reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventState {
    event_id: EventId,
    capacity: Capacity,
    confirmed: Vec<UserId>,
    waitlist: VecDeque<UserId>,
    details: HashMap<UserId, Details>,
    placement: HashMap<UserId, Placement>,
    meta: EventMeta,
    version: Version,
}

impl EventState {
    /// Empty state at version 0.
    pub fn new(event_id: impl Into<EventId>, capacity: Capacity) -> Self {
        Self {
            event_id: event_id.into(),
            capacity,
            confirmed: Vec::new(),
            waitlist: VecDeque::new(),
            details: HashMap::new(),
            placement: HashMap::new(),
            meta: EventMeta::default(),
            version: 0,
        }
    }

    /// Event identifier.
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Slot capacity, `0` for unlimited.
    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Number of accepted transitions so far.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Descriptive fields.
    pub fn meta(&self) -> &EventMeta {
        &self.meta
    }

    /// Confirmed users in join order.
    pub fn confirmed(&self) -> &[UserId] {
        &self.confirmed
    }

    /// Waitlisted users, head first.
    pub fn waitlist(&self) -> &VecDeque<UserId> {
        &self.waitlist
    }

    /// True when capacity is limited and every slot is taken.
    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.confirmed.len() >= self.capacity as usize
    }

    /// Which list holds `user_id`.
    pub fn placement_of(&self, user_id: &str) -> Placement {
        self.placement.get(user_id).copied().unwrap_or_default()
    }

    /// Stored details; kept after the user leaves so a re-join restores them.
    pub fn details_of(&self, user_id: &str) -> Option<&Details> {
        self.details.get(user_id)
    }

    /// Order-preserving read-only copy.
    pub fn snapshot(&self) -> Snapshot {
        let member = |user_id: &UserId| Member {
            user_id: user_id.clone(),
            details: self.details.get(user_id).cloned().unwrap_or_default(),
        };
        Snapshot {
            event_id: self.event_id.clone(),
            capacity: self.capacity,
            version: self.version,
            meta: self.meta.clone(),
            confirmed: self.confirmed.iter().map(member).collect(),
            waitlist: self.waitlist.iter().map(member).collect(),
        }
    }

    /// Verifies every structural invariant.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut seen: HashMap<&str, Placement> = HashMap::new();
        let listed = self
            .confirmed
            .iter()
            .map(|u| (u, Placement::Confirmed))
            .chain(self.waitlist.iter().map(|u| (u, Placement::Waitlist)));
        for (user_id, placement) in listed {
            if seen.insert(user_id.as_str(), placement).is_some() {
                return Err(InvariantViolation::DuplicateMember(user_id.clone()));
            }
            if self.placement.get(user_id) != Some(&placement) {
                return Err(InvariantViolation::IndexMismatch(user_id.clone()));
            }
        }
        if let Some(stray) = self.placement.keys().find(|u| !seen.contains_key(u.as_str())) {
            return Err(InvariantViolation::IndexMismatch(stray.clone()));
        }

        let confirmed = self.confirmed.len();
        let waiting = self.waitlist.len();
        if self.capacity > 0 && confirmed > self.capacity as usize {
            return Err(InvariantViolation::OverCapacity {
                capacity: self.capacity,
                confirmed,
            });
        }
        let slot_free = self.capacity == 0 || confirmed < self.capacity as usize;
        if slot_free && waiting > 0 {
            return Err(InvariantViolation::IdleWaitlist {
                capacity: self.capacity,
                confirmed,
                waiting,
            });
        }
        Ok(())
    }

    pub(crate) fn push_confirmed(&mut self, user_id: UserId) {
        self.placement.insert(user_id.clone(), Placement::Confirmed);
        self.confirmed.push(user_id);
    }

    pub(crate) fn push_waitlist(&mut self, user_id: UserId) {
        self.placement.insert(user_id.clone(), Placement::Waitlist);
        self.waitlist.push_back(user_id);
    }

    /// Removes `user_id` from whichever list holds it.
    pub(crate) fn remove(&mut self, user_id: &str) -> Placement {
        let Some(placement) = self.placement.remove(user_id) else {
            return Placement::None;
        };
        match placement {
            Placement::Confirmed => self.confirmed.retain(|u| u != user_id),
            Placement::Waitlist => self.waitlist.retain(|u| u != user_id),
            Placement::None => {}
        }
        placement
    }

    /// Moves waitlist heads into free slots; an unlimited event takes everyone.
    pub(crate) fn promote_waitlisted(&mut self) -> Vec<UserId> {
        let mut promoted = Vec::new();
        while self.capacity == 0 || self.confirmed.len() < self.capacity as usize {
            let Some(next) = self.waitlist.pop_front() else {
                break;
            };
            self.push_confirmed(next.clone());
            promoted.push(next);
        }
        promoted
    }

    pub(crate) fn set_capacity(&mut self, capacity: Capacity) {
        self.capacity = capacity;
    }

    /// Last-write-wins per field.
    pub(crate) fn merge_details(&mut self, user_id: &str, details: &Details) {
        if details.is_empty() && self.details.contains_key(user_id) {
            return;
        }
        let stored = self.details.entry(user_id.to_string()).or_default();
        for (k, v) in details {
            stored.insert(k.clone(), v.clone());
        }
    }

    pub(crate) fn merge_meta(&mut self, patch: &EventMeta) {
        self.meta.merge(patch);
    }

    pub(crate) fn bump_version(&mut self) {
        self.version = self.version.saturating_add(1);
    }
}
