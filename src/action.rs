//! Action model: the typed transitions the engine consumes and the loose
//! request shape the trigger surface hands in.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    rsvp::EventMeta,
    types::{Capacity, Details, EventId, UserId, Version, normalize_id},
};

/// Contract violation in a submitted action. Rejected before any state is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// `kind` is not one of the known action kinds.
    #[error("unknown action kind `{0}`")]
    UnknownKind(String),
    /// Event identifier is empty after trimming.
    #[error("missing event id")]
    MissingEvent,
    /// User identifier is empty after trimming.
    #[error("missing user id")]
    MissingUser,
    /// `set_capacity` without a capacity.
    #[error("set_capacity requires a capacity")]
    MissingCapacity,
    /// `set_meta` without any field to set.
    #[error("set_meta requires at least one field")]
    MissingMeta,
    /// Capacity below zero.
    #[error("capacity must not be negative, got {0}")]
    NegativeCapacity(i64),
    /// Capacity above the supported range.
    #[error("capacity {0} is out of range")]
    CapacityOutOfRange(i64),
    /// Payload could not be decoded at all.
    #[error("malformed action payload: {0}")]
    Malformed(String),
}

/// Discriminant of an [`Action`], also used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Request a slot.
    Join,
    /// Give up a slot or waitlist position.
    Cancel,
    /// Explicit "not attending".
    Decline,
    /// Change the event capacity.
    SetCapacity,
    /// Change descriptive event fields.
    SetMeta,
}

impl ActionKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Cancel => "cancel",
            Self::Decline => "decline",
            Self::SetCapacity => "set_capacity",
            Self::SetMeta => "set_meta",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "join" => Ok(Self::Join),
            "cancel" => Ok(Self::Cancel),
            "decline" => Ok(Self::Decline),
            "set_capacity" => Ok(Self::SetCapacity),
            "set_meta" => Ok(Self::SetMeta),
            other => Err(ValidationError::UnknownKind(other.to_string())),
        }
    }
}

/// Typed transition applied by [`crate::core::engine::RsvpEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Action {
    /// Join, or refresh details when already listed.
    Join {
        /// Acting user.
        user_id: UserId,
        /// Fields merged into the stored details.
        #[serde(default)]
        details: Details,
    },
    /// Leave whichever list the user is on.
    Cancel {
        /// Acting user.
        user_id: UserId,
    },
    /// Same membership effect as cancel, reported distinctly.
    Decline {
        /// Acting user.
        user_id: UserId,
    },
    /// Replace the capacity; `0` means unlimited.
    SetCapacity {
        /// New capacity.
        capacity: Capacity,
    },
    /// Merge descriptive fields.
    SetMeta {
        /// Sparse patch.
        meta: EventMeta,
    },
}

impl Action {
    /// Builds a join without details.
    pub fn join(user_id: impl Into<UserId>) -> Self {
        Self::Join {
            user_id: user_id.into(),
            details: Details::new(),
        }
    }

    /// Builds a cancel.
    pub fn cancel(user_id: impl Into<UserId>) -> Self {
        Self::Cancel {
            user_id: user_id.into(),
        }
    }

    /// Builds a decline.
    pub fn decline(user_id: impl Into<UserId>) -> Self {
        Self::Decline {
            user_id: user_id.into(),
        }
    }

    /// Builds a capacity change.
    pub fn set_capacity(capacity: Capacity) -> Self {
        Self::SetCapacity { capacity }
    }

    /// Kind of this action.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Join { .. } => ActionKind::Join,
            Self::Cancel { .. } => ActionKind::Cancel,
            Self::Decline { .. } => ActionKind::Decline,
            Self::SetCapacity { .. } => ActionKind::SetCapacity,
            Self::SetMeta { .. } => ActionKind::SetMeta,
        }
    }

    /// Acting user, if the action has one.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Join { user_id, .. } | Self::Cancel { user_id } | Self::Decline { user_id } => {
                Some(user_id)
            }
            Self::SetCapacity { .. } | Self::SetMeta { .. } => None,
        }
    }

    /// Checks the shape of a directly constructed action.
    pub fn check(&self) -> Result<(), ValidationError> {
        if let Some(user_id) = self.user_id() {
            if user_id.trim().is_empty() {
                return Err(ValidationError::MissingUser);
            }
        }
        if let Self::SetMeta { meta } = self {
            if meta.is_empty() {
                return Err(ValidationError::MissingMeta);
            }
        }
        Ok(())
    }
}

/// Loose action tuple as produced by a trigger surface.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Target event.
    pub event_id: String,
    /// Acting user; ignored for event-level kinds.
    #[serde(default)]
    pub user_id: String,
    /// One of `join`, `cancel`, `decline`, `set_capacity`, `set_meta`.
    pub kind: String,
    /// Profile fields for `join`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
    /// New capacity for `set_capacity`; for other kinds, the capacity used when
    /// this request is the first reference to the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<i64>,
    /// Fields for `set_meta`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<EventMeta>,
    /// Reject unless the event is at exactly this version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<Version>,
}

/// Request after validation, ready for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    /// Normalized event id.
    pub event_id: EventId,
    /// Typed action.
    pub action: Action,
    /// Capacity to use when the event does not exist yet.
    pub initial_capacity: Capacity,
    /// Optimistic concurrency guard.
    pub expected_version: Option<Version>,
}

impl ActionRequest {
    fn with_kind(event_id: impl Into<String>, user_id: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            event_id: event_id.into(),
            user_id: user_id.into(),
            kind: kind.as_str().to_string(),
            ..Self::default()
        }
    }

    /// `join` request.
    pub fn join(event_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::with_kind(event_id, user_id, ActionKind::Join)
    }

    /// `cancel` request.
    pub fn cancel(event_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::with_kind(event_id, user_id, ActionKind::Cancel)
    }

    /// `decline` request.
    pub fn decline(event_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::with_kind(event_id, user_id, ActionKind::Decline)
    }

    /// `set_capacity` request.
    pub fn set_capacity(event_id: impl Into<String>, capacity: i64) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::with_kind(event_id, "", ActionKind::SetCapacity)
        }
    }

    /// `set_meta` request.
    pub fn set_meta(event_id: impl Into<String>, meta: EventMeta) -> Self {
        Self {
            meta: Some(meta),
            ..Self::with_kind(event_id, "", ActionKind::SetMeta)
        }
    }

    /// Attaches profile fields.
    pub fn with_details<K, V>(mut self, details: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.details = Some(
            details
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Sets the capacity field.
    pub fn with_capacity(mut self, capacity: i64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Guards the request with an expected version.
    pub fn expecting(mut self, version: Version) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Decodes a JSON payload from a transport.
    pub fn from_json(payload: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(payload).map_err(|err| ValidationError::Malformed(err.to_string()))
    }

    /// Validates and converts into a typed action.
    pub fn validate(&self) -> Result<ValidatedRequest, ValidationError> {
        let event_id = normalize_id(&self.event_id).ok_or(ValidationError::MissingEvent)?;
        let kind: ActionKind = self.kind.parse()?;
        let capacity = self.capacity.map(checked_capacity).transpose()?;

        let user = || normalize_id(&self.user_id).ok_or(ValidationError::MissingUser);
        let action = match kind {
            ActionKind::Join => Action::Join {
                user_id: user()?,
                details: self.details.clone().unwrap_or_default(),
            },
            ActionKind::Cancel => Action::Cancel { user_id: user()? },
            ActionKind::Decline => Action::Decline { user_id: user()? },
            ActionKind::SetCapacity => Action::SetCapacity {
                capacity: capacity.ok_or(ValidationError::MissingCapacity)?,
            },
            ActionKind::SetMeta => {
                let meta = self.meta.clone().unwrap_or_default();
                if meta.is_empty() {
                    return Err(ValidationError::MissingMeta);
                }
                Action::SetMeta { meta }
            }
        };

        let initial_capacity = match kind {
            ActionKind::SetCapacity => 0,
            _ => capacity.unwrap_or(0),
        };

        Ok(ValidatedRequest {
            event_id,
            action,
            initial_capacity,
            expected_version: self.expected_version,
        })
    }
}

fn checked_capacity(raw: i64) -> Result<Capacity, ValidationError> {
    if raw < 0 {
        return Err(ValidationError::NegativeCapacity(raw));
    }
    Capacity::try_from(raw).map_err(|_| ValidationError::CapacityOutOfRange(raw))
}
