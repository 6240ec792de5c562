use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use tokio::sync::broadcast;

use nexus_rsvp::{
    action::{ActionKind, ActionRequest, ValidationError},
    config::{RuntimeConfig, SyncConfig},
    core::engine::EngineError,
    notify::{DeliveryFuture, SyncError, SyncSubscriber},
    rsvp::{EventMeta, Outcome},
    runtime::{
        events::{RuntimeEvent, SyncEvent},
        handle::{DispatchError, DispatcherHandle, spawn_dispatcher},
    },
    types::{Placement, Version},
};

struct RecordingSubscriber {
    seen: Arc<Mutex<Vec<(String, Version)>>>,
}

impl SyncSubscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        "recording"
    }

    fn deliver<'a>(&'a self, event: &'a SyncEvent) -> DeliveryFuture<'a> {
        Box::pin(async move {
            self.seen
                .lock()
                .expect("lock")
                .push((event.event_id.clone(), event.version));
            Ok(())
        })
    }
}

struct SlowSubscriber {
    delay: Duration,
    attempts: Arc<AtomicU32>,
}

impl SyncSubscriber for SlowSubscriber {
    fn name(&self) -> &str {
        "slow"
    }

    fn deliver<'a>(&'a self, _event: &'a SyncEvent) -> DeliveryFuture<'a> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(())
        })
    }
}

struct FailingSubscriber {
    attempts: Arc<AtomicU32>,
}

impl SyncSubscriber for FailingSubscriber {
    fn name(&self) -> &str {
        "failing"
    }

    fn deliver<'a>(&'a self, _event: &'a SyncEvent) -> DeliveryFuture<'a> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::Subscriber("backend unavailable".to_string()))
        })
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_sync_config() -> RuntimeConfig {
    RuntimeConfig {
        sync: SyncConfig {
            timeout_ms: 50,
            retry_delay_ms: 10,
            ..SyncConfig::default()
        },
        ..RuntimeConfig::default()
    }
}

async fn join(handle: &DispatcherHandle, event: &str, user: &str, capacity: i64) -> Placement {
    handle
        .submit(ActionRequest::join(event, user).with_capacity(capacity))
        .await
        .expect("join")
        .report
        .to
}

async fn next_event(events: &mut broadcast::Receiver<RuntimeEvent>) -> RuntimeEvent {
    tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event")
        .expect("recv")
}

fn committed(event: RuntimeEvent) -> SyncEvent {
    match event {
        RuntimeEvent::Committed(evt) => evt,
        other => panic!("expected a committed transition, got {other:?}"),
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn dispatcher_runs_waitlist_scenario() {
    let handle = spawn_dispatcher(RuntimeConfig::default(), Vec::new());

    assert_eq!(join(&handle, "e1", "A", 2).await, Placement::Confirmed);
    assert_eq!(join(&handle, "e1", "B", 2).await, Placement::Confirmed);
    assert_eq!(join(&handle, "e1", "C", 2).await, Placement::Waitlist);

    let applied = handle
        .submit(ActionRequest::cancel("e1", "A"))
        .await
        .expect("cancel");
    assert_eq!(applied.report.promoted, vec!["C".to_string()]);
    assert_eq!(applied.snapshot.confirmed_ids(), ["B", "C"]);
    assert_eq!(applied.snapshot.version, 4);

    let snap = handle.snapshot("e1").await;
    assert_eq!(snap, applied.snapshot);
}

#[tokio::test]
async fn concurrent_joins_for_last_slot_confirm_exactly_one() {
    let handle = spawn_dispatcher(RuntimeConfig::default(), Vec::new());

    let a = tokio::spawn({
        let handle = handle.clone();
        async move { join(&handle, "race", "A", 1).await }
    });
    let b = tokio::spawn({
        let handle = handle.clone();
        async move { join(&handle, "race", "B", 1).await }
    });

    let mut placements = vec![a.await.expect("task a"), b.await.expect("task b")];
    placements.sort_by_key(|p| matches!(p, Placement::Waitlist));
    assert_eq!(placements, vec![Placement::Confirmed, Placement::Waitlist]);

    let snap = handle.snapshot("race").await;
    assert_eq!(snap.confirmed_count(), 1);
    assert_eq!(snap.waitlist_count(), 1);
    assert_eq!(snap.version, 2);
}

#[tokio::test]
async fn events_progress_independently() {
    let handle = spawn_dispatcher(RuntimeConfig::default(), Vec::new());

    let mut tasks = Vec::new();
    for event in 0..16 {
        for user in 0..10 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                join(&handle, &format!("event-{event}"), &format!("user-{user}"), 5).await
            }));
        }
    }
    for task in tasks {
        task.await.expect("join task");
    }

    for event in 0..16 {
        let snap = handle.snapshot(&format!("event-{event}")).await;
        assert_eq!(snap.confirmed_count(), 5);
        assert_eq!(snap.waitlist_count(), 5);
        assert_eq!(snap.version, 10);
    }
    assert_eq!(handle.registry().len().await, 16);
}

#[tokio::test]
async fn broadcast_events_follow_commit_order() {
    let handle = spawn_dispatcher(RuntimeConfig::default(), Vec::new());
    let mut events = handle.subscribe();

    for user in ["A", "B", "C"] {
        join(&handle, "e1", user, 1).await;
    }
    handle
        .submit(ActionRequest::cancel("e1", "A"))
        .await
        .expect("cancel");

    let mut versions = Vec::new();
    for _ in 0..4 {
        let evt = committed(next_event(&mut events).await);
        assert_eq!(evt.event_id, "e1");
        assert_eq!(evt.snapshot.version, evt.version);
        versions.push(evt.version);
    }
    assert_eq!(versions, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn idle_actor_retires_and_resumes_with_state() {
    init_tracing();
    let config = RuntimeConfig {
        actor_idle_ms: 100,
        ..RuntimeConfig::default()
    };
    let handle = spawn_dispatcher(config, Vec::new());

    join(&handle, "e1", "A", 1).await;
    assert_eq!(handle.registry().active_actors().await, 1);

    let registry = Arc::clone(handle.registry());
    tokio::time::timeout(Duration::from_secs(2), async {
        while registry.active_actors().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("actor retired");

    let snap = handle.snapshot("e1").await;
    assert_eq!(snap.confirmed_ids(), ["A"]);
    assert_eq!(snap.version, 1);

    assert_eq!(join(&handle, "e1", "B", 1).await, Placement::Waitlist);
    assert_eq!(handle.snapshot("e1").await.version, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retiring_actors_lose_no_commands() {
    let config = RuntimeConfig {
        actor_idle_ms: 1,
        ..RuntimeConfig::default()
    };
    let handle = spawn_dispatcher(config, Vec::new());

    let mut tasks = Vec::new();
    for round in 0..40 {
        for event in ["a", "b"] {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                join(&handle, event, &format!("user-{round}"), 0).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    for task in tasks {
        assert_eq!(task.await.expect("join task"), Placement::Confirmed);
    }

    for event in ["a", "b"] {
        let snap = handle.snapshot(event).await;
        assert_eq!(snap.confirmed_count(), 40);
        assert_eq!(snap.version, 40);
    }
}

#[tokio::test]
async fn slow_subscriber_does_not_block_submissions() {
    let attempts = Arc::new(AtomicU32::new(0));
    let slow: Arc<dyn SyncSubscriber> = Arc::new(SlowSubscriber {
        delay: Duration::from_secs(5),
        attempts: Arc::clone(&attempts),
    });
    let handle = spawn_dispatcher(RuntimeConfig::default(), vec![slow]);

    tokio::time::timeout(Duration::from_secs(1), async {
        for user in 0..20 {
            join(&handle, "e1", &format!("user-{user}"), 0).await;
        }
    })
    .await
    .expect("submissions stalled behind subscriber");

    assert_eq!(handle.snapshot("e1").await.confirmed_count(), 20);
    wait_until(|| attempts.load(Ordering::SeqCst) >= 1).await;
}

#[tokio::test]
async fn timed_out_delivery_is_retried_once() {
    init_tracing();
    let attempts = Arc::new(AtomicU32::new(0));
    let slow: Arc<dyn SyncSubscriber> = Arc::new(SlowSubscriber {
        delay: Duration::from_secs(5),
        attempts: Arc::clone(&attempts),
    });
    let handle = spawn_dispatcher(fast_sync_config(), vec![slow]);

    join(&handle, "e1", "A", 0).await;

    wait_until(|| handle.sync_stats().failed == 1).await;
    let stats = handle.sync_stats();
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.delivered, 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failing_subscriber_gets_two_attempts_and_state_still_commits() {
    init_tracing();
    let attempts = Arc::new(AtomicU32::new(0));
    let failing: Arc<dyn SyncSubscriber> = Arc::new(FailingSubscriber {
        attempts: Arc::clone(&attempts),
    });
    let handle = spawn_dispatcher(fast_sync_config(), vec![failing]);

    let applied = handle
        .submit(ActionRequest::join("e1", "A").with_capacity(1))
        .await
        .expect("join despite failing subscriber");
    assert_eq!(applied.report.outcome, Outcome::Confirmed);

    wait_until(|| handle.sync_stats().failed == 1).await;
    assert_eq!(handle.sync_stats().retried, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(handle.snapshot("e1").await.confirmed_ids(), ["A"]);
}

#[tokio::test]
async fn subscriber_sees_versions_in_order_per_event() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder: Arc<dyn SyncSubscriber> = Arc::new(RecordingSubscriber {
        seen: Arc::clone(&seen),
    });
    let handle = spawn_dispatcher(RuntimeConfig::default(), vec![recorder]);

    for user in 0..5 {
        join(&handle, "a", &format!("u{user}"), 2).await;
        join(&handle, "b", &format!("u{user}"), 3).await;
    }
    handle.shutdown().await;

    let seen = seen.lock().expect("lock").clone();
    for event in ["a", "b"] {
        let versions: Vec<Version> = seen
            .iter()
            .filter(|(id, _)| id == event)
            .map(|(_, v)| *v)
            .collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
    }
    assert_eq!(handle.sync_stats().delivered, 10);
}

#[tokio::test]
async fn detached_submission_reports_through_event_stream() {
    let handle = spawn_dispatcher(RuntimeConfig::default(), Vec::new());
    let mut events = handle.subscribe();

    handle
        .submit_detached(ActionRequest::join("e1", "A").with_details([("psn", "alpha")]))
        .await
        .expect("queued");

    let evt = committed(next_event(&mut events).await);
    assert_eq!(evt.report.user_id.as_deref(), Some("A"));
    assert_eq!(evt.snapshot.confirmed[0].details.get("psn").map(String::as_str), Some("alpha"));
}

#[tokio::test]
async fn detached_rejection_reaches_event_stream() {
    let handle = spawn_dispatcher(RuntimeConfig::default(), Vec::new());
    join(&handle, "e1", "A", 3).await;
    join(&handle, "e1", "B", 3).await;
    let mut events = handle.subscribe();

    handle
        .submit_detached(ActionRequest::set_capacity("e1", 1))
        .await
        .expect("queued");

    match next_event(&mut events).await {
        RuntimeEvent::Rejected(rejected) => {
            assert_eq!(rejected.event_id, "e1");
            assert_eq!(rejected.version, 2);
            assert_eq!(rejected.kind, ActionKind::SetCapacity);
            assert_eq!(rejected.user_id, None);
            assert_eq!(
                rejected.error,
                EngineError::CapacityBelowConfirmed {
                    requested: 1,
                    confirmed: 2
                }
            );
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert_eq!(handle.snapshot("e1").await.capacity, 3);
}

#[tokio::test]
async fn detached_version_conflict_names_the_user() {
    let handle = spawn_dispatcher(RuntimeConfig::default(), Vec::new());
    join(&handle, "e1", "A", 2).await;
    let mut events = handle.subscribe();

    handle
        .submit_detached(ActionRequest::join("e1", "B").expecting(0))
        .await
        .expect("queued");

    let event = next_event(&mut events).await;
    assert_eq!(event.event_id(), "e1");
    let rejected = match event {
        RuntimeEvent::Rejected(rejected) => rejected,
        other => panic!("expected a rejection, got {other:?}"),
    };
    assert_eq!(rejected.user_id.as_deref(), Some("B"));
    assert_eq!(rejected.error, EngineError::VersionConflict { expected: 0, actual: 1 });
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_queueing() {
    let handle = spawn_dispatcher(RuntimeConfig::default(), Vec::new());

    let err = handle
        .submit(ActionRequest::set_capacity("e1", -1))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Invalid(ValidationError::NegativeCapacity(-1))));

    let err = handle
        .submit(ActionRequest {
            kind: "maybe".to_string(),
            ..ActionRequest::join("e1", "A")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Invalid(ValidationError::UnknownKind(ref k)) if k == "maybe"));

    let err = handle.submit(ActionRequest::join("e1", "  ")).await.unwrap_err();
    assert!(matches!(err, DispatchError::Invalid(ValidationError::MissingUser)));

    let err = handle.submit(ActionRequest::join("", "A")).await.unwrap_err();
    assert!(matches!(err, DispatchError::Invalid(ValidationError::MissingEvent)));

    assert!(!handle.registry().contains("e1").await);
}

#[tokio::test]
async fn engine_rejections_leave_state_unchanged() {
    let handle = spawn_dispatcher(RuntimeConfig::default(), Vec::new());
    join(&handle, "e1", "A", 3).await;
    join(&handle, "e1", "B", 3).await;

    let err = handle
        .submit(ActionRequest::set_capacity("e1", 1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Rejected(EngineError::CapacityBelowConfirmed {
            requested: 1,
            confirmed: 2
        })
    ));

    let err = handle
        .submit(ActionRequest::join("e1", "C").expecting(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Rejected(EngineError::VersionConflict {
            expected: 1,
            actual: 2
        })
    ));

    let snap = handle.snapshot("e1").await;
    assert_eq!(snap.capacity, 3);
    assert_eq!(snap.version, 2);
    assert_eq!(snap.confirmed_ids(), ["A", "B"]);
}

#[tokio::test]
async fn open_event_is_insert_if_absent() {
    let handle = spawn_dispatcher(RuntimeConfig::default(), Vec::new());

    let snap = handle.open_event("e1", 2).await.expect("open");
    assert_eq!(snap.capacity, 2);
    assert_eq!(snap.version, 0);

    let snap = handle.open_event(" e1 ", 9).await.expect("reopen");
    assert_eq!(snap.capacity, 2);

    // An explicit capacity on the first join only applies to unknown events.
    join(&handle, "e1", "A", 9).await;
    assert_eq!(handle.snapshot("e1").await.capacity, 2);
}

#[tokio::test]
async fn unknown_event_reads_as_empty_default() {
    let handle = spawn_dispatcher(RuntimeConfig::default(), Vec::new());

    let snap = handle.snapshot("never-seen").await;
    assert_eq!(snap.capacity, 0);
    assert_eq!(snap.version, 0);
    assert!(snap.confirmed.is_empty());
    assert!(snap.waitlist.is_empty());
}

#[tokio::test]
async fn set_meta_through_dispatcher() {
    let handle = spawn_dispatcher(RuntimeConfig::default(), Vec::new());

    let applied = handle
        .submit(ActionRequest::set_meta(
            "e1",
            EventMeta {
                title: Some("Raid night".to_string()),
                ..EventMeta::default()
            },
        ))
        .await
        .expect("set_meta");

    assert_eq!(applied.report.outcome, Outcome::MetaUpdated);
    assert_eq!(applied.snapshot.meta.title.as_deref(), Some("Raid night"));
}

#[tokio::test]
async fn shutdown_refuses_new_work_and_keeps_state() {
    let handle = spawn_dispatcher(RuntimeConfig::default(), Vec::new());
    join(&handle, "e1", "A", 1).await;

    handle.shutdown().await;
    assert_eq!(handle.registry().active_actors().await, 0);

    let err = handle
        .submit(ActionRequest::join("e1", "B"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::ShuttingDown));
    assert_eq!(handle.snapshot("e1").await.confirmed_ids(), ["A"]);
}
