use smartctl_wrapper::adapters::{SimulatedGateway, Simulator};
use smartctl_wrapper::core::{
    DevicePath, ProgressStream, SessionState, StatusSnapshot, TestKind, TestOrchestrator,
};
use smartctl_wrapper::{QueryError, TestError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const POLL: Duration = Duration::from_secs(5);

fn sda() -> DevicePath {
    DevicePath::parse("/dev/sda").unwrap()
}

fn setup() -> (TestOrchestrator, Simulator) {
    let (gateway, simulator) = SimulatedGateway::new();
    simulator.add_device(&sda());
    (TestOrchestrator::new(Arc::new(gateway), POLL), simulator)
}

/// Read a feed to the end: every progress value, then the error if the feed
/// closed with one.
async fn drain(mut stream: ProgressStream) -> (Vec<u8>, Option<TestError>) {
    let mut seen = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(progress) => seen.push(progress),
            Err(e) => return (seen, Some(e)),
        }
    }
    (seen, None)
}

fn running(remaining: u8) -> StatusSnapshot {
    StatusSnapshot::running(remaining)
}

#[tokio::test(start_paused = true)]
async fn test_progress_then_pass() {
    let (orchestrator, simulator) = setup();
    simulator.script_test(
        &sda(),
        vec![
            running(80),
            running(80),
            running(50),
            StatusSnapshot::finished(true),
        ],
    );

    let session = orchestrator.start(&sda(), TestKind::Short).await.unwrap();
    let (progress, error) = drain(session.subscribe()).await;

    assert_eq!(progress, vec![20, 50]);
    assert!(error.is_none());

    let info = session.info();
    assert_eq!(info.state, SessionState::Passed);
    assert_eq!(info.passed(), Some(true));
    assert_eq!(info.progress, Some(50));
    assert!(info.ended_at.is_some());
    assert!(info.error.is_none());

    // One status check before starting, then four polls. Nothing after the
    // terminal sample.
    assert_eq!(simulator.query_count(&sda()), 5);
    tokio::time::sleep(POLL * 10).await;
    assert_eq!(simulator.query_count(&sda()), 5);
}

#[tokio::test(start_paused = true)]
async fn test_untouched_drive_reports_no_zero_progress() {
    let (orchestrator, simulator) = setup();
    simulator.script_test(
        &sda(),
        vec![
            running(100),
            running(100),
            running(80),
            StatusSnapshot::finished(true),
        ],
    );

    let session = orchestrator.start(&sda(), TestKind::Short).await.unwrap();
    let (progress, error) = drain(session.subscribe()).await;

    assert_eq!(progress, vec![20]);
    assert!(error.is_none());
    assert_eq!(session.state(), SessionState::Passed);
}

#[tokio::test(start_paused = true)]
async fn test_remaining_going_back_up_is_not_reported() {
    let (orchestrator, simulator) = setup();
    simulator.script_test(
        &sda(),
        vec![
            running(50),
            running(60),
            running(40),
            StatusSnapshot::finished(true),
        ],
    );

    let session = orchestrator.start(&sda(), TestKind::Long).await.unwrap();
    let (progress, _) = drain(session.subscribe()).await;

    assert_eq!(progress, vec![50, 60]);
    assert_eq!(session.info().progress, Some(60));
}

#[tokio::test(start_paused = true)]
async fn test_abort_sentinel_mid_poll() {
    let (orchestrator, simulator) = setup();
    simulator.script_test(&sda(), vec![running(60), StatusSnapshot::aborted()]);

    let session = orchestrator.start(&sda(), TestKind::Long).await.unwrap();
    let (progress, error) = drain(session.subscribe()).await;

    assert_eq!(progress, vec![40]);
    assert!(matches!(error, Some(TestError::TestAborted(_))));
    assert_eq!(session.state(), SessionState::Aborted);
    assert!(session.info().error.unwrap().contains("aborted"));
}

#[tokio::test(start_paused = true)]
async fn test_start_while_device_already_testing() {
    let (orchestrator, simulator) = setup();
    simulator.set_status(&sda(), running(50));

    let result = orchestrator.start(&sda(), TestKind::Short).await;

    assert!(matches!(result, Err(TestError::CurrentlyTesting(ref d)) if *d == sda()));
    assert_eq!(simulator.start_count(&sda()), 0);
    assert!(orchestrator.session(&sda()).is_none());
    assert_eq!(orchestrator.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_second_start_leaves_running_session_alone() {
    let (orchestrator, simulator) = setup();
    simulator.script_test(&sda(), vec![running(90), running(80), running(70)]);

    let first = orchestrator.start(&sda(), TestKind::Long).await.unwrap();
    let mut feed = first.subscribe();
    assert_eq!(feed.next().await.unwrap().unwrap(), 10);

    let before = first.info();
    let second = orchestrator.start(&sda(), TestKind::Short).await;
    assert!(matches!(second, Err(TestError::CurrentlyTesting(_))));

    let after = first.info();
    assert_eq!(after.state, SessionState::Running);
    assert_eq!(after.id, before.id);
    assert_eq!(after.kind, TestKind::Long);
    assert_eq!(after.progress, before.progress);
    assert_eq!(simulator.start_count(&sda()), 1);
    assert_eq!(orchestrator.session(&sda()).unwrap().id(), first.id());
}

#[tokio::test(start_paused = true)]
async fn test_end_without_outcome_is_errored() {
    let (orchestrator, simulator) = setup();
    simulator.script_test(&sda(), vec![running(90), StatusSnapshot::unknown(0)]);

    let session = orchestrator.start(&sda(), TestKind::Conveyance).await.unwrap();
    let (progress, error) = drain(session.subscribe()).await;

    assert_eq!(progress, vec![10]);
    assert!(matches!(
        error,
        Some(TestError::IndeterminateOutcome { status_code: 0, .. })
    ));
    assert_eq!(session.state(), SessionState::Errored);
    assert!(session.info().ended_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_poll_stops_polling() {
    let (orchestrator, simulator) = setup();
    simulator.script_polls(
        &sda(),
        vec![Ok(running(60)), Err("device went away".to_string())],
    );

    let session = orchestrator.start(&sda(), TestKind::Short).await.unwrap();
    let (progress, error) = drain(session.subscribe()).await;

    assert_eq!(progress, vec![40]);
    match error {
        Some(TestError::QueryFailed(inner)) => {
            assert!(matches!(*inner, QueryError::CommandFailed { .. }));
        }
        other => panic!("expected QueryFailed, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Errored);

    let queries = simulator.query_count(&sda());
    tokio::time::sleep(POLL * 10).await;
    assert_eq!(simulator.query_count(&sda()), queries);
}

#[tokio::test(start_paused = true)]
async fn test_failing_drive_reports_failed() {
    let (orchestrator, simulator) = setup();
    simulator.script_test(
        &sda(),
        vec![running(50), running(20), StatusSnapshot::finished(false)],
    );

    let session = orchestrator.start(&sda(), TestKind::Long).await.unwrap();
    let info = session.wait().await.unwrap();

    assert_eq!(info.state, SessionState::Failed);
    assert_eq!(info.passed(), Some(false));
    assert_eq!(info.progress, Some(80));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_start_failure_releases_device() {
    let (orchestrator, simulator) = setup();
    simulator.fail_next_start(&sda(), "SMART disabled");

    let result = orchestrator.start(&sda(), TestKind::Short).await;
    match result {
        Err(TestError::UnknownTestError { reason, .. }) => assert!(reason.contains("SMART disabled")),
        other => panic!("expected UnknownTestError, got {:?}", other.map(|s| s.id())),
    }
    assert_eq!(orchestrator.active_count(), 0);

    simulator.script_test(&sda(), vec![StatusSnapshot::finished(true)]);
    let session = orchestrator.start(&sda(), TestKind::Short).await.unwrap();
    assert_eq!(session.wait().await.unwrap().state, SessionState::Passed);
}

#[tokio::test(start_paused = true)]
async fn test_status_check_failing_after_rejected_start_is_query_failure() {
    let (orchestrator, simulator) = setup();
    simulator.fail_next_start(&sda(), "SMART disabled");
    simulator.queue_queries(
        &sda(),
        vec![
            Ok(StatusSnapshot::finished(true)),
            Err("bus reset".to_string()),
        ],
    );

    let result = orchestrator.start(&sda(), TestKind::Short).await;

    match result {
        Err(TestError::QueryFailed(inner)) => {
            assert!(inner.to_string().contains("bus reset"));
        }
        other => panic!("expected QueryFailed, got {:?}", other.map(|s| s.id())),
    }
    assert_eq!(simulator.start_count(&sda()), 1);
    assert_eq!(orchestrator.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_device_start_is_query_failure() {
    let (orchestrator, _simulator) = setup();
    let sdq = DevicePath::parse("sdq").unwrap();

    let result = orchestrator.start(&sdq, TestKind::Short).await;
    assert!(matches!(result, Err(TestError::QueryFailed(_))));
    assert_eq!(orchestrator.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_running_session() {
    let (orchestrator, simulator) = setup();
    let samples = (1..=9).rev().map(|t| running(t * 10)).collect();
    simulator.script_test(&sda(), samples);

    let session = orchestrator.start(&sda(), TestKind::Long).await.unwrap();
    let mut feed = session.subscribe();
    assert_eq!(feed.next().await.unwrap().unwrap(), 10);

    orchestrator.abort(&sda()).await.unwrap();
    assert_eq!(simulator.abort_count(&sda()), 1);

    // Polling carries on until the drive reports the abort
    let (_, error) = drain(feed).await;
    assert!(matches!(error, Some(TestError::TestAborted(_))));
    assert_eq!(session.state(), SessionState::Aborted);
    assert_eq!(orchestrator.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_without_test() {
    let (orchestrator, simulator) = setup();

    let result = orchestrator.abort(&sda()).await;
    assert!(matches!(result, Err(TestError::NoActiveTest(_))));
    assert_eq!(simulator.abort_count(&sda()), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_test_started_elsewhere() {
    let (orchestrator, simulator) = setup();
    simulator.set_status(&sda(), running(40));

    orchestrator.abort(&sda()).await.unwrap();
    assert_eq!(simulator.abort_count(&sda()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_subscriber_replays_everything() {
    let (orchestrator, simulator) = setup();
    simulator.script_test(
        &sda(),
        vec![running(75), running(25), StatusSnapshot::finished(true)],
    );

    let session = orchestrator.start(&sda(), TestKind::Short).await.unwrap();
    session.wait().await.unwrap();

    let (progress, error) = drain(session.subscribe()).await;
    assert_eq!(progress, vec![25, 75]);
    assert!(error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_new_session_after_terminal() {
    let (orchestrator, simulator) = setup();
    simulator.script_test(&sda(), vec![StatusSnapshot::finished(true)]);
    let first = orchestrator.start(&sda(), TestKind::Short).await.unwrap();
    first.wait().await.unwrap();

    simulator.script_test(&sda(), vec![running(50), StatusSnapshot::finished(true)]);
    let second = orchestrator.start(&sda(), TestKind::Long).await.unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(second.wait().await.unwrap().state, SessionState::Passed);

    // The old handle still describes the old run
    assert_eq!(first.info().kind, TestKind::Short);
    assert_eq!(orchestrator.sessions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sessions_on_different_devices_are_independent() {
    let (gateway, simulator) = SimulatedGateway::new();
    let sdb = DevicePath::parse("/dev/sdb").unwrap();
    simulator.add_device(&sda());
    simulator.add_device(&sdb);
    simulator.script_test(&sda(), vec![running(50), StatusSnapshot::finished(true)]);
    simulator.script_test(&sdb, vec![running(90), StatusSnapshot::aborted()]);
    let orchestrator = TestOrchestrator::new(Arc::new(gateway), POLL);

    let a = orchestrator.start(&sda(), TestKind::Short).await.unwrap();
    let b = orchestrator.start(&sdb, TestKind::Short).await.unwrap();
    assert_eq!(orchestrator.active_count(), 2);

    assert_eq!(a.wait().await.unwrap().state, SessionState::Passed);
    assert!(matches!(b.wait().await, Err(TestError::TestAborted(_))));

    let infos = orchestrator.sessions();
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].device, sda());
    assert_eq!(infos[1].device, sdb);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_first_wins() {
    let (gateway, simulator) = SimulatedGateway::new();
    simulator.add_device(&sda());
    simulator.script_test(&sda(), vec![running(90)]);
    let orchestrator = TestOrchestrator::new(Arc::new(gateway), Duration::from_secs(3600));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.start(&sda(), TestKind::Short).await
        }));
    }

    let mut started = 0;
    let mut rejected = 0;
    for handle in handles {
        match timeout(Duration::from_secs(5), handle).await.unwrap().unwrap() {
            Ok(_) => started += 1,
            Err(TestError::CurrentlyTesting(_)) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(started, 1);
    assert_eq!(rejected, 7);
    assert_eq!(simulator.start_count(&sda()), 1);
}
