//! Shared primitive IDs and list placement enums.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque event identifier.
pub type EventId = String;
/// Opaque user identifier.
pub type UserId = String;
/// Monotonic per-event transition counter.
pub type Version = u64;
/// Slot capacity; `0` means unlimited.
pub type Capacity = u32;
/// Free-form profile fields attached to a user (supplemental answers).
pub type Details = BTreeMap<String, String>;

/// Which list a user occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Not on either list.
    #[default]
    None,
    /// Holding an active slot.
    Confirmed,
    /// Queued for a slot.
    Waitlist,
}

impl Placement {
    /// Returns true for [`Placement::Confirmed`] and [`Placement::Waitlist`].
    pub fn is_listed(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Trims an identifier, returning `None` when nothing is left.
pub fn normalize_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
