//! Event id → state map shared by every caller of the dispatcher.

use std::sync::Arc;

use hashbrown::HashMap;
use tokio::sync::{Mutex, MutexGuard, mpsc, watch};

use crate::{
    core::state::EventState,
    rsvp::Snapshot,
    types::EventId,
};

use super::handle::Command;

/// Where an event's state currently lives.
pub(crate) enum Slot {
    /// No actor; the registry owns the state.
    Idle(EventState),
    /// A live actor owns the state and publishes every committed version.
    Active(ActorLink),
}

/// Registry's side of a live actor.
pub(crate) struct ActorLink {
    pub(crate) tx: mpsc::Sender<Command>,
    pub(crate) state_rx: watch::Receiver<Arc<EventState>>,
}

/// Owns one slot per event id and creates default states on first reference.
///
/// Reads never see a partially applied transition: idle states are only
/// touched under the map lock, and live actors publish whole
/// `Arc<EventState>` values after each commit.
#[derive(Default)]
pub struct EventRegistry {
    slots: Mutex<HashMap<EventId, Slot>>,
}

impl EventRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `event_id`, created with unlimited capacity if absent.
    pub async fn get(&self, event_id: &str) -> EventState {
        let published = {
            let mut slots = self.slots.lock().await;
            match ensure_slot(&mut slots, event_id) {
                Slot::Idle(state) => return state.clone(),
                Slot::Active(link) => {
                    let published = link.state_rx.borrow().clone();
                    published
                }
            }
        };
        Arc::unwrap_or_clone(published)
    }

    /// Read-only copy of `event_id`, created with unlimited capacity if absent.
    pub async fn snapshot(&self, event_id: &str) -> Snapshot {
        let published = {
            let mut slots = self.slots.lock().await;
            match ensure_slot(&mut slots, event_id) {
                Slot::Idle(state) => return state.snapshot(),
                Slot::Active(link) => {
                    let published = link.state_rx.borrow().clone();
                    published
                }
            }
        };
        published.snapshot()
    }

    /// True when `event_id` has been referenced.
    pub async fn contains(&self, event_id: &str) -> bool {
        self.slots.lock().await.contains_key(event_id)
    }

    /// Number of known events.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// True when no event has been referenced yet.
    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    /// Number of events with a live actor.
    pub async fn active_actors(&self) -> usize {
        self.slots
            .lock()
            .await
            .values()
            .filter(|slot| matches!(slot, Slot::Active(_)))
            .count()
    }

    /// Known event ids, unordered.
    pub async fn event_ids(&self) -> Vec<EventId> {
        self.slots.lock().await.keys().cloned().collect()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, HashMap<EventId, Slot>> {
        self.slots.lock().await
    }
}

fn ensure_slot<'a>(slots: &'a mut HashMap<EventId, Slot>, event_id: &str) -> &'a Slot {
    slots
        .entry_ref(event_id)
        .or_insert_with(|| Slot::Idle(EventState::new(event_id, 0)))
}
