//! Batch build tracking against a scripted job backend, on a paused clock.

use crate::integration::test_utils::{job, ScriptedJobs};
use jobwatch::build::{
    BuildTracker, ItemSet, ItemStatus, PollOutcome, PollSettings, PollingReconciler,
};
use jobwatch::error::ApiError;
use jobwatch::registry::SubscriptionRegistry;
use jobwatch::transport::{JobId, JobState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn settings(max_failures: u32) -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(1000),
        max_consecutive_failures: max_failures,
    }
}

fn tracker(jobs: &Arc<ScriptedJobs>, paths: &[&str], max_failures: u32) -> BuildTracker {
    BuildTracker::new(
        jobs.clone(),
        SubscriptionRegistry::new(),
        ItemSet::new(paths.iter().copied()),
        settings(max_failures),
    )
}

fn status_of(tracker: &BuildTracker, path: &str) -> ItemStatus {
    tracker.items().get(path).unwrap().status
}

#[tokio::test(start_paused = true)]
async fn partial_results_then_completion() {
    let jobs = ScriptedJobs::new("job-1");
    jobs.push_status(job(JobState::Running, 1, 3, &[("a.txt", "success")]))
        .push_status(job(
            JobState::Completed,
            3,
            3,
            &[("a.txt", "success"), ("b.txt", "empty_file")],
        ));
    let tracker = tracker(&jobs, &["a.txt", "b.txt", "c.txt"], 10);

    tracker.start().await.unwrap();
    sleep(Duration::from_millis(1500)).await;

    let a = tracker.items().get("a.txt").unwrap();
    assert_eq!(a.status, ItemStatus::Completed);
    assert_eq!(a.progress, 100);
    let b = tracker.items().get("b.txt").unwrap();
    assert_eq!(b.status, ItemStatus::Processing);
    assert_eq!(b.progress, 50);
    assert_eq!(status_of(&tracker, "c.txt"), ItemStatus::Waiting);
    // One second elapsed for one of three items.
    assert_eq!(tracker.state().unwrap().remaining_secs, Some(2));
    assert_eq!(tracker.formatted_remaining().as_deref(), Some("2s"));

    let state = tracker.wait_finished().await.unwrap();
    assert_eq!(state.outcome, Some(PollOutcome::Completed));
    assert_eq!(state.remaining_secs, Some(0));
    assert_eq!(status_of(&tracker, "a.txt"), ItemStatus::Completed);
    assert_eq!(status_of(&tracker, "b.txt"), ItemStatus::Empty);
    let c = tracker.items().get("c.txt").unwrap();
    assert_eq!(c.status, ItemStatus::Error);
    assert_eq!(c.message, "Backend returned no result for this item");
    assert!(!tracker.is_running());
    assert_eq!(tracker.overall_progress(), 100.0);

    // The timer is gone: no further reads.
    let calls = jobs.calls();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(jobs.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn first_poll_waits_one_interval() {
    let jobs = ScriptedJobs::new("job-1");
    jobs.push_status(job(JobState::Running, 0, 1, &[]));
    let tracker = tracker(&jobs, &["a.txt"], 10);

    tracker.start().await.unwrap();
    sleep(Duration::from_millis(900)).await;
    assert_eq!(jobs.calls(), 0);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(jobs.calls(), 1);
    assert_eq!(tracker.state().unwrap().remaining_secs, None);
    tracker.reset();
}

#[tokio::test(start_paused = true)]
async fn exactly_one_item_promoted_per_tick() {
    let jobs = ScriptedJobs::new("job-1");
    jobs.push_status(job(JobState::Running, 0, 4, &[]));
    let tracker = tracker(&jobs, &["a", "b", "c", "d"], 10);

    tracker.start().await.unwrap();
    sleep(Duration::from_millis(500)).await;
    for expected in 1..=4 {
        sleep(Duration::from_millis(1000)).await;
        let counts = tracker.items().counts();
        assert_eq!(counts.processing, expected);
        assert_eq!(counts.waiting, 4 - expected);
    }
    tracker.reset();
}

#[tokio::test(start_paused = true)]
async fn poll_failures_below_threshold_change_nothing() {
    let jobs = ScriptedJobs::new("job-1");
    jobs.push_failure("connection reset")
        .push_failure("connection reset")
        .push_status(job(JobState::Running, 0, 2, &[]));
    let tracker = tracker(&jobs, &["a", "b"], 3);

    tracker.start().await.unwrap();
    sleep(Duration::from_millis(2500)).await;
    assert_eq!(jobs.calls(), 2);
    assert_eq!(tracker.items().counts().waiting, 2);
    assert_eq!(tracker.state().unwrap().consecutive_failures, 2);
    assert!(tracker.is_running());

    sleep(Duration::from_millis(1000)).await;
    assert_eq!(tracker.state().unwrap().consecutive_failures, 0);
    assert_eq!(tracker.items().counts().processing, 1);
    tracker.reset();
}

#[tokio::test(start_paused = true)]
async fn consecutive_failures_abandon_the_job() {
    let jobs = ScriptedJobs::new("job-1");
    jobs.push_status(job(JobState::Running, 1, 2, &[("a", "success")]))
        .push_failure("connection refused");
    let registry = SubscriptionRegistry::new();
    let tracker = BuildTracker::new(
        jobs.clone(),
        registry.clone(),
        ItemSet::new(["a", "b"]),
        settings(3),
    );

    tracker.start().await.unwrap();
    let state = tracker.wait_finished().await.unwrap();

    match state.outcome {
        Some(PollOutcome::Abandoned { reason }) => {
            assert!(reason.starts_with("Lost contact with backend"));
            assert!(reason.contains("connection refused"));
        }
        other => panic!("expected abandoned, got {:?}", other),
    }
    assert_eq!(jobs.calls(), 4);
    assert_eq!(status_of(&tracker, "a"), ItemStatus::Completed);
    let b = tracker.items().get("b").unwrap();
    assert_eq!(b.status, ItemStatus::Error);
    assert!(b.message.starts_with("Lost contact with backend"));
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn zero_threshold_polls_forever() {
    let jobs = ScriptedJobs::new("job-1");
    jobs.push_failure("unreachable");
    let tracker = tracker(&jobs, &["a"], 0);

    tracker.start().await.unwrap();
    sleep(Duration::from_millis(30_500)).await;
    assert_eq!(jobs.calls(), 30);
    assert!(tracker.is_running());
    assert_eq!(status_of(&tracker, "a"), ItemStatus::Waiting);
    tracker.reset();
}

#[tokio::test(start_paused = true)]
async fn response_after_stop_is_discarded() {
    let jobs = ScriptedJobs::new("job-1");
    jobs.delay_status(Duration::from_secs(10));
    jobs.push_status(job(JobState::Completed, 1, 1, &[("a", "success")]));
    let registry = SubscriptionRegistry::new();
    let items = ItemSet::new(["a"]);
    let reconciler =
        PollingReconciler::new(jobs.clone(), registry.clone(), items.clone(), settings(10));

    let mut handle = reconciler.start(JobId::new("job-1"));
    sleep(Duration::from_millis(2000)).await;
    assert_eq!(jobs.calls(), 1, "fetch should be in flight");
    handle.stop();
    assert!(!registry.is_live("job:job-1"));

    let state = handle.wait_finished().await;
    assert_eq!(state.outcome, Some(PollOutcome::Stopped));
    assert_eq!(items.get("a").unwrap().status, ItemStatus::Waiting);
}

#[tokio::test(start_paused = true)]
async fn submit_failure_marks_every_item() {
    let jobs = ScriptedJobs::failing_start("connection refused");
    let tracker = tracker(&jobs, &["a", "b"], 10);

    let err = tracker.start().await.unwrap_err();
    assert!(matches!(err, ApiError::TransportError(_)));
    for item in tracker.snapshot() {
        assert_eq!(item.status, ItemStatus::Error);
        assert_eq!(item.progress, 100);
        assert_eq!(item.message, "Request failed: Transport error: connection refused");
    }
    assert!(tracker.state().is_none());
    assert_eq!(jobs.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn submit_resets_items_and_sends_paths() {
    let jobs = ScriptedJobs::new("job-1");
    jobs.push_status(job(JobState::Running, 0, 2, &[]));
    let tracker = tracker(&jobs, &["a", "b"], 10);
    tracker.items().fail_all("left over");

    tracker.start().await.unwrap();
    assert_eq!(tracker.items().counts().waiting, 2);
    assert_eq!(
        jobs.submitted.lock().clone(),
        vec![vec!["a".to_string(), "b".to_string()]]
    );
    tracker.reset();
}

#[tokio::test(start_paused = true)]
async fn second_start_while_running_is_rejected() {
    let jobs = ScriptedJobs::new("job-1");
    jobs.push_status(job(JobState::Running, 0, 1, &[]));
    let tracker = tracker(&jobs, &["a"], 10);

    tracker.start().await.unwrap();
    let err = tracker.start().await.unwrap_err();
    assert!(matches!(err, ApiError::AlreadyRunning(ref id) if id == "job-1"));
    assert_eq!(jobs.submitted.lock().len(), 1);

    tracker.reset();
    assert!(!tracker.is_running());
    assert!(tracker.start().await.is_ok());
    tracker.reset();
}

#[tokio::test(start_paused = true)]
async fn empty_item_set_completes() {
    let jobs = ScriptedJobs::new("job-empty");
    jobs.push_status(job(JobState::Completed, 0, 0, &[]));
    let tracker = tracker(&jobs, &[], 10);

    tracker.start().await.unwrap();
    let state = tracker.wait_finished().await.unwrap();
    assert_eq!(state.outcome, Some(PollOutcome::Completed));
    assert_eq!(tracker.overall_progress(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn restarting_the_same_job_replaces_the_poller() {
    let jobs = ScriptedJobs::new("job-1");
    jobs.push_status(job(JobState::Running, 0, 1, &[]));
    let registry = SubscriptionRegistry::new();
    let items = ItemSet::new(["a"]);
    let reconciler =
        PollingReconciler::new(jobs.clone(), registry.clone(), items.clone(), settings(10));

    let mut first = reconciler.start(JobId::new("job-1"));
    let second = reconciler.start(JobId::new("job-1"));
    assert!(!first.is_running());
    assert!(second.is_running());
    assert_eq!(registry.len(), 1);
    assert_eq!(first.wait_finished().await.outcome, Some(PollOutcome::Stopped));

    second.stop();
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_tracker_stops_polling() {
    let jobs = ScriptedJobs::new("job-1");
    jobs.push_status(job(JobState::Running, 0, 1, &[]));
    let registry = SubscriptionRegistry::new();
    let tracker = BuildTracker::new(
        jobs.clone(),
        registry.clone(),
        ItemSet::new(["a"]),
        settings(10),
    );
    tracker.start().await.unwrap();
    assert_eq!(registry.len(), 1);

    drop(tracker);
    assert!(registry.is_empty());
    let calls = jobs.calls();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(jobs.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn overlapping_starts_submit_once() {
    let jobs = ScriptedJobs::new("job-1");
    jobs.delay_start(Duration::from_millis(100));
    jobs.push_status(job(JobState::Running, 0, 4, &[]));
    let registry = SubscriptionRegistry::new();
    let tracker = BuildTracker::new(
        jobs.clone(),
        registry.clone(),
        ItemSet::new(["a", "b", "c", "d"]),
        settings(10),
    );

    let (first, second) = tokio::join!(tracker.start(), tracker.start());
    assert!(first.is_ok());
    assert!(matches!(second, Err(ApiError::AlreadyRunning(_))));
    assert_eq!(jobs.submitted.lock().len(), 1);
    assert_eq!(registry.keys(), vec!["job:job-1".to_string()]);

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(tracker.items().counts().processing, 1);

    tracker.reset();
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_submission_frees_the_tracker() {
    let jobs = ScriptedJobs::failing_start("connection refused");
    let tracker = tracker(&jobs, &["a"], 10);

    assert!(matches!(
        tracker.start().await,
        Err(ApiError::TransportError(_))
    ));
    // A second attempt is submitted again rather than rejected as running.
    assert!(matches!(
        tracker.start().await,
        Err(ApiError::TransportError(_))
    ));
    assert_eq!(jobs.submitted.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn reset_during_submission_stops_the_new_poller() {
    let jobs = ScriptedJobs::new("job-1");
    jobs.delay_start(Duration::from_millis(100));
    jobs.push_status(job(JobState::Running, 0, 1, &[]));
    let registry = SubscriptionRegistry::new();
    let tracker = BuildTracker::new(
        jobs.clone(),
        registry.clone(),
        ItemSet::new(["a"]),
        settings(10),
    );

    let (started, ()) = tokio::join!(tracker.start(), async {
        sleep(Duration::from_millis(50)).await;
        tracker.reset();
    });
    let handle = started.unwrap();
    assert!(!handle.is_running());
    assert!(registry.is_empty());
    assert!(tracker.state().is_none());

    sleep(Duration::from_secs(3)).await;
    assert_eq!(jobs.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn poll_handle_debug_shows_key_and_state() {
    let jobs = ScriptedJobs::new("job-7");
    jobs.push_status(job(JobState::Running, 0, 1, &[]));
    let tracker = tracker(&jobs, &["a"], 10);

    let handle = tracker.start().await.unwrap();
    let rendered = format!("{:?}", handle);
    assert!(rendered.contains("job:job-7"));
    assert!(rendered.contains("alive: true"));
    tracker.reset();
}
