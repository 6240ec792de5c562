use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::{
    action::{Action, ActionRequest, ValidatedRequest, ValidationError},
    config::RuntimeConfig,
    core::{
        engine::{EngineError, RsvpEngine},
        state::EventState,
    },
    notify::{SyncNotifier, SyncStats, SyncSubscriber},
    rsvp::{ChangeReport, Snapshot},
    types::{Capacity, Version, normalize_id},
};

use super::{
    events::{RejectedAction, RuntimeEvent, SyncEvent},
    registry::{ActorLink, EventRegistry, Slot},
};

/// Why a submission did not produce a transition.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Request failed validation; nothing was queued.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// Engine refused the action; state unchanged.
    #[error(transparent)]
    Rejected(#[from] EngineError),
    /// [`DispatcherHandle::shutdown`] was called.
    #[error("dispatcher is shutting down")]
    ShuttingDown,
    /// Actor went away before answering.
    #[error("actor channel closed")]
    ChannelClosed,
}

/// Result of one committed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// State right after the transition.
    pub snapshot: Snapshot,
    /// What changed.
    pub report: ChangeReport,
}

pub(crate) enum Command {
    Apply {
        action: Action,
        expected_version: Option<Version>,
        resp: Option<oneshot::Sender<Result<Applied, DispatchError>>>,
    },
    Retire {
        resp: oneshot::Sender<()>,
    },
}

struct Shared {
    registry: Arc<EventRegistry>,
    events_tx: broadcast::Sender<RuntimeEvent>,
    notifier: SyncNotifier,
    config: RuntimeConfig,
    accepting: AtomicBool,
}

/// Cloneable entry point: routes each action to its event's serial actor.
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
}

/// Starts a dispatcher with the given subscribers. Must run inside a tokio runtime.
pub fn spawn_dispatcher(config: RuntimeConfig, subscribers: Vec<Arc<dyn SyncSubscriber>>) -> DispatcherHandle {
    let (events_tx, _) = broadcast::channel::<RuntimeEvent>(config.events_capacity.max(1));
    let notifier = if subscribers.is_empty() {
        SyncNotifier::disabled()
    } else {
        SyncNotifier::new(subscribers, &config.sync)
    };

    tracing::debug!(
        subscribers = notifier.subscriber_count(),
        actor_idle_ms = config.actor_idle_ms,
        "dispatcher started"
    );

    DispatcherHandle {
        shared: Arc::new(Shared {
            registry: Arc::new(EventRegistry::new()),
            events_tx,
            notifier,
            config,
            accepting: AtomicBool::new(true),
        }),
    }
}

impl DispatcherHandle {
    /// Stream of every committed transition and every refused action, across
    /// all events.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Backing registry.
    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.shared.registry
    }

    /// Delivery counters of the outbound notifier.
    pub fn sync_stats(&self) -> SyncStats {
        self.shared.notifier.stats()
    }

    /// Active configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Validates `request`, applies it on its event's actor, and waits for the result.
    pub async fn submit(&self, request: ActionRequest) -> Result<Applied, DispatchError> {
        let validated = request.validate()?;
        self.submit_validated(validated).await
    }

    /// Applies an already typed action to `event_id`.
    pub async fn submit_action(&self, event_id: &str, action: Action) -> Result<Applied, DispatchError> {
        let event_id = normalize_id(event_id).ok_or(ValidationError::MissingEvent)?;
        action.check()?;
        self.submit_validated(ValidatedRequest {
            event_id,
            action,
            initial_capacity: 0,
            expected_version: None,
        })
        .await
    }

    /// Queues `request` and returns once it is in its actor's queue.
    ///
    /// The outcome arrives through [`Self::subscribe`]: a
    /// [`RuntimeEvent::Committed`] (also handed to the notifier) or a
    /// [`RuntimeEvent::Rejected`].
    pub async fn submit_detached(&self, request: ActionRequest) -> Result<(), DispatchError> {
        let validated = request.validate()?;
        self.enqueue(validated, None).await
    }

    /// Registers `event_id` with `capacity` unless it already exists.
    pub async fn open_event(&self, event_id: &str, capacity: Capacity) -> Result<Snapshot, DispatchError> {
        let event_id = normalize_id(event_id).ok_or(ValidationError::MissingEvent)?;
        {
            let mut slots = self.shared.registry.lock().await;
            if !slots.contains_key(event_id.as_str()) {
                tracing::debug!(event_id = %event_id, capacity, "event opened");
                slots.insert(event_id.clone(), Slot::Idle(EventState::new(event_id.clone(), capacity)));
            }
        }
        Ok(self.shared.registry.snapshot(&event_id).await)
    }

    /// Read-only copy of `event_id`.
    pub async fn snapshot(&self, event_id: &str) -> Snapshot {
        self.shared.registry.snapshot(event_id).await
    }

    /// Full state of `event_id`.
    pub async fn get(&self, event_id: &str) -> EventState {
        self.shared.registry.get(event_id).await
    }

    /// Refuses new work, retires every actor after its queued commands, and
    /// drains the notifier. Event states stay in the registry.
    pub async fn shutdown(&self) {
        self.shared.accepting.store(false, Ordering::SeqCst);

        // Repeats until every slot is parked: a submitter that passed the
        // accepting check may still start an actor, and an actor already
        // retiring on its own refuses the retire command.
        loop {
            let senders: Vec<mpsc::Sender<Command>> = {
                let slots = self.shared.registry.lock().await;
                slots
                    .values()
                    .filter_map(|slot| match slot {
                        Slot::Active(link) => Some(link.tx.clone()),
                        Slot::Idle(_) => None,
                    })
                    .collect()
            };
            if senders.is_empty() {
                break;
            }

            for tx in senders {
                let (resp, done) = oneshot::channel();
                if tx.send(Command::Retire { resp }).await.is_ok() {
                    let _ = done.await;
                } else {
                    tokio::task::yield_now().await;
                }
            }
        }

        self.shared.notifier.shutdown().await;
        tracing::debug!("dispatcher stopped");
    }

    async fn submit_validated(&self, validated: ValidatedRequest) -> Result<Applied, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(validated, Some(tx)).await?;
        rx.await.map_err(|_| DispatchError::ChannelClosed)?
    }

    async fn enqueue(
        &self,
        validated: ValidatedRequest,
        resp: Option<oneshot::Sender<Result<Applied, DispatchError>>>,
    ) -> Result<(), DispatchError> {
        let ValidatedRequest {
            event_id,
            action,
            initial_capacity,
            expected_version,
        } = validated;

        let mut cmd = Command::Apply {
            action,
            expected_version,
            resp,
        };

        loop {
            if !self.shared.accepting.load(Ordering::SeqCst) {
                return Err(DispatchError::ShuttingDown);
            }
            let tx = self.actor_for(&event_id, initial_capacity).await;
            match tx.send(cmd).await {
                Ok(()) => return Ok(()),
                // The actor is retiring; once its state is parked the next
                // lookup starts a fresh actor.
                Err(mpsc::error::SendError(returned)) => {
                    tracing::trace!(event_id = %event_id, "actor retiring during send, resolving again");
                    cmd = returned;
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Sender of the live actor for `event_id`, starting one if needed.
    async fn actor_for(&self, event_id: &str, initial_capacity: Capacity) -> mpsc::Sender<Command> {
        let mut slots = self.shared.registry.lock().await;
        if let Some(Slot::Active(link)) = slots.get(event_id) {
            return link.tx.clone();
        }

        let state = match slots.remove(event_id) {
            Some(Slot::Idle(state)) => state,
            _ => EventState::new(event_id, initial_capacity),
        };
        let link = spawn_actor(state, Arc::clone(&self.shared));
        let tx = link.tx.clone();
        slots.insert(event_id.to_string(), Slot::Active(link));
        tx
    }
}

fn spawn_actor(state: EventState, shared: Arc<Shared>) -> ActorLink {
    let (tx, rx) = mpsc::channel::<Command>(shared.config.actor_queue_bound.max(1));
    let state = Arc::new(state);
    let (state_tx, state_rx) = watch::channel(Arc::clone(&state));

    tracing::debug!(event_id = %state.event_id(), version = state.version(), "actor started");
    tokio::spawn(run_actor(state, rx, state_tx, shared));

    ActorLink { tx, state_rx }
}

async fn run_actor(
    mut state: Arc<EventState>,
    mut rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<Arc<EventState>>,
    shared: Arc<Shared>,
) {
    let idle = shared.config.actor_idle();
    loop {
        match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(Command::Apply {
                action,
                expected_version,
                resp,
            })) => {
                apply_command(&mut state, action, expected_version, resp, &state_tx, &shared);
            }
            Ok(Some(Command::Retire { resp })) => {
                retire(state, rx, &state_tx, &shared).await;
                let _ = resp.send(());
                return;
            }
            Ok(None) | Err(_) => {
                retire(state, rx, &state_tx, &shared).await;
                return;
            }
        }
    }
}

/// Hands the state back to the registry as an idle slot.
///
/// The queue is closed under the map lock, so every later send fails and its
/// submitter re-resolves. Commands already queued are applied without the
/// lock; the lock is taken again only to park the state.
async fn retire(
    mut state: Arc<EventState>,
    mut rx: mpsc::Receiver<Command>,
    state_tx: &watch::Sender<Arc<EventState>>,
    shared: &Shared,
) {
    {
        let _slots = shared.registry.lock().await;
        rx.close();
    }
    // Yields `None` once the buffer is empty and no in-flight send remains.
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Apply {
                action,
                expected_version,
                resp,
            } => apply_command(&mut state, action, expected_version, resp, state_tx, shared),
            Command::Retire { resp } => {
                let _ = resp.send(());
            }
        }
    }

    let state = Arc::unwrap_or_clone(state);
    tracing::debug!(event_id = %state.event_id(), version = state.version(), "actor retired");
    let mut slots = shared.registry.lock().await;
    slots.insert(state.event_id().to_string(), Slot::Idle(state));
}

fn apply_command(
    state: &mut Arc<EventState>,
    action: Action,
    expected_version: Option<Version>,
    resp: Option<oneshot::Sender<Result<Applied, DispatchError>>>,
    state_tx: &watch::Sender<Arc<EventState>>,
    shared: &Shared,
) {
    let result = match RsvpEngine::apply_expecting(&**state, &action, expected_version) {
        Ok((next, report)) => {
            let next = Arc::new(next);
            *state = Arc::clone(&next);
            state_tx.send_replace(Arc::clone(&next));

            let snapshot = next.snapshot();
            tracing::debug!(
                event_id = %next.event_id(),
                version = next.version(),
                kind = %report.kind,
                outcome = ?report.outcome,
                promoted = report.promoted.len(),
                "transition committed"
            );

            let event = SyncEvent {
                event_id: next.event_id().to_string(),
                version: next.version(),
                report: report.clone(),
                snapshot: snapshot.clone(),
            };
            let _ = shared.events_tx.send(RuntimeEvent::Committed(event.clone()));
            shared.notifier.dispatch(event);

            Ok(Applied { snapshot, report })
        }
        Err(err) => {
            tracing::warn!(
                event_id = %state.event_id(),
                kind = %action.kind(),
                error = %err,
                "action rejected"
            );
            let _ = shared.events_tx.send(RuntimeEvent::Rejected(RejectedAction {
                event_id: state.event_id().to_string(),
                version: state.version(),
                kind: action.kind(),
                user_id: action.user_id().map(str::to_string),
                error: err.clone(),
            }));
            Err(DispatchError::Rejected(err))
        }
    };

    if let Some(resp) = resp {
        let _ = resp.send(result);
    }
}
