mod common;

use common::{shift_paused_at, shift_session, test_engine, TASK, USER};
use deepwork::{EngineError, EventType, SessionStatus, SessionType};

#[tokio::test]
async fn essay_scenario_checkpoints_then_completes() {
    let (engine, _dir) = test_engine();

    let session = engine
        .start_session(USER, TASK, "Essay", SessionType::Focus, 1500, "device-a")
        .await
        .expect("start");
    assert_eq!(session.status, SessionStatus::Focusing);
    assert_eq!(session.current_duration_seconds, 0);

    // T0 + 10s
    shift_session(engine.database(), &session.id, 10, 10).await;
    let outcome = engine
        .checkpoint_session(&session.id, "device-a")
        .await
        .expect("first checkpoint");
    assert!(!outcome.completed);
    assert_eq!(outcome.elapsed_seconds, 10);

    // T0 + 1501s: past the target, auto-completion path.
    shift_session(engine.database(), &session.id, 1501, 10).await;
    let outcome = engine
        .checkpoint_session(&session.id, "device-a")
        .await
        .expect("second checkpoint");
    assert!(outcome.completed);
    assert_eq!(outcome.elapsed_seconds, 1500);

    let records = engine.completed_activities(USER).await.expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].duration_minutes, 25);
    assert_eq!(records[0].task_id, TASK);

    let events = engine.session_events(&session.id).await.expect("events");
    let starts = events.iter().filter(|e| e.event_type == EventType::Start).count();
    let stops = events.iter().filter(|e| e.event_type == EventType::Stop).count();
    assert_eq!(starts, 1);
    assert_eq!(stops, 1);
}

#[tokio::test]
async fn repeated_starts_keep_a_single_active_session() {
    let (engine, _dir) = test_engine();

    let first = engine
        .start_session(USER, TASK, "Essay", SessionType::Focus, 1500, "device-a")
        .await
        .expect("first start");
    let second = engine
        .start_session(USER, TASK, "Essay", SessionType::Focus, 1500, "device-b")
        .await
        .expect("second start");

    assert_eq!(first.id, second.id);
    assert_eq!(first.start_time, second.start_time);
    assert_eq!(second.owner_device_id, "device-b");

    let active = engine
        .get_active_session(USER, TASK)
        .await
        .expect("get active")
        .expect("one active session");
    assert_eq!(active.id, first.id);
}

#[tokio::test]
async fn racing_stops_produce_one_record_and_one_stop_event() {
    let (engine, _dir) = test_engine();

    let session = engine
        .start_session(USER, TASK, "Essay", SessionType::Focus, 1500, "device-a")
        .await
        .expect("start");
    shift_session(engine.database(), &session.id, 100, 100).await;

    let (a, b) = tokio::join!(
        engine.stop_session(&session.id, "device-a"),
        engine.stop_session(&session.id, "device-b"),
    );
    let record_a = a.expect("device A stop");
    let record_b = b.expect("device B stop");
    assert_eq!(record_a.id, record_b.id);

    let records = engine.completed_activities(USER).await.expect("records");
    assert_eq!(records.len(), 1);

    let events = engine.session_events(&session.id).await.expect("events");
    let stops = events.iter().filter(|e| e.event_type == EventType::Stop).count();
    assert_eq!(stops, 1);
}

#[tokio::test]
async fn manual_stop_records_actual_elapsed_with_minute_floor() {
    let (engine, _dir) = test_engine();

    let session = engine
        .start_session(USER, TASK, "Essay", SessionType::Focus, 1500, "device-a")
        .await
        .expect("start");
    shift_session(engine.database(), &session.id, 10, 10).await;

    let record = engine
        .stop_session(&session.id, "device-a")
        .await
        .expect("stop");
    assert_eq!(record.duration_minutes, 1);
    assert_eq!(record.local_date, record.start_time.date_naive());

    let stored = engine
        .database()
        .get_session(&session.id)
        .await
        .expect("fetch")
        .expect("session");
    assert_eq!(stored.status, SessionStatus::Completed);
    assert!(stored.end_time.is_some());
}

#[tokio::test]
async fn paused_time_does_not_count_against_the_target() {
    let (engine, _dir) = test_engine();

    let session = engine
        .start_session(USER, TASK, "Essay", SessionType::Focus, 1500, "device-a")
        .await
        .expect("start");
    shift_session(engine.database(), &session.id, 100, 100).await;

    let paused = engine
        .pause_session(&session.id, "device-a")
        .await
        .expect("pause");
    assert_eq!(paused.status, SessionStatus::Paused);

    // Simulate 50 seconds spent paused before resuming.
    shift_paused_at(engine.database(), &session.id, 50).await;
    let resumed = engine
        .resume_session(&session.id, "device-a")
        .await
        .expect("resume");
    assert_eq!(resumed.status, SessionStatus::Focusing);
    assert!(resumed.paused_seconds >= 49, "paused_seconds = {}", resumed.paused_seconds);

    let outcome = engine
        .checkpoint_session(&session.id, "device-a")
        .await
        .expect("checkpoint");
    assert!(!outcome.completed);
    assert!(
        (48..=53).contains(&outcome.elapsed_seconds),
        "elapsed = {}",
        outcome.elapsed_seconds
    );
}

#[tokio::test]
async fn checkpoint_while_paused_never_completes() {
    let (engine, _dir) = test_engine();

    let session = engine
        .start_session(USER, TASK, "Essay", SessionType::Focus, 1500, "device-a")
        .await
        .expect("start");
    engine
        .pause_session(&session.id, "device-a")
        .await
        .expect("pause");

    // Even with the start far in the past, the open pause span freezes
    // elapsed at the moment of the pause.
    shift_session(engine.database(), &session.id, 5000, 5000).await;
    shift_paused_at(engine.database(), &session.id, 5000).await;

    let outcome = engine
        .checkpoint_session(&session.id, "device-a")
        .await
        .expect("checkpoint");
    assert!(!outcome.completed);
    assert!(outcome.elapsed_seconds <= 2);
}

#[tokio::test]
async fn operations_fail_closed_without_a_user() {
    let (engine, _dir) = test_engine();

    let err = engine
        .start_session("", TASK, "Essay", SessionType::Focus, 1500, "device-a")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotAuthenticated));

    let err = engine.get_active_session("  ", TASK).await.unwrap_err();
    assert!(matches!(err, EngineError::NotAuthenticated));

    assert!(engine
        .get_active_session(USER, TASK)
        .await
        .expect("no session yet")
        .is_none());
}

#[tokio::test]
async fn stale_session_reference_reports_not_found() {
    let (engine, _dir) = test_engine();

    let err = engine
        .stop_session("f0f0f0f0-0000-0000-0000-000000000000", "device-a")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionNotFound(_)));
}

#[tokio::test]
async fn lifecycle_events_are_appended_in_order() {
    let (engine, _dir) = test_engine();

    let session = engine
        .start_session(USER, TASK, "Essay", SessionType::Focus, 1500, "device-a")
        .await
        .expect("start");
    engine
        .pause_session(&session.id, "device-a")
        .await
        .expect("pause");
    engine
        .resume_session(&session.id, "device-b")
        .await
        .expect("resume");
    shift_session(engine.database(), &session.id, 60, 60).await;
    engine
        .stop_session(&session.id, "device-b")
        .await
        .expect("stop");

    let events = engine.session_events(&session.id).await.expect("events");
    let kinds: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(kinds.first(), Some(&EventType::Start));
    assert_eq!(kinds.last(), Some(&EventType::Stop));
    assert!(kinds.contains(&EventType::Pause));
    assert!(kinds.contains(&EventType::Resume));

    // Device tagging survives into the audit trail.
    let stop = events
        .iter()
        .find(|e| e.event_type == EventType::Stop)
        .expect("stop event");
    assert_eq!(stop.device_id, "device-b");
}

#[tokio::test]
async fn subscribers_see_the_mutation_stream() {
    let (engine, _dir) = test_engine();
    let mut deltas = engine.subscribe(USER);

    let session = engine
        .start_session(USER, TASK, "Essay", SessionType::Focus, 1500, "device-a")
        .await
        .expect("start");
    engine
        .pause_session(&session.id, "device-a")
        .await
        .expect("pause");
    shift_session(engine.database(), &session.id, 30, 30).await;
    shift_paused_at(engine.database(), &session.id, 30).await;
    engine
        .resume_session(&session.id, "device-a")
        .await
        .expect("resume");
    engine
        .stop_session(&session.id, "device-a")
        .await
        .expect("stop");

    let mut statuses = Vec::new();
    while let Ok(delta) = deltas.try_recv() {
        assert_eq!(delta.session_id, session.id);
        statuses.push(delta.status);
    }
    assert_eq!(
        statuses,
        vec![
            SessionStatus::Focusing,
            SessionStatus::Paused,
            SessionStatus::Focusing,
            SessionStatus::Completed,
        ]
    );
}
