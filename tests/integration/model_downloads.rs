//! Model downloads over scripted push channels and progress reads.

use crate::integration::test_utils::{settle, ScriptedModels, StreamItem, StreamScript};
use jobwatch::config::ModelSpec;
use jobwatch::downloads::{
    DownloadObserver, DownloadSettings, ModelCatalog, ModelDownloads, ModelStatus,
};
use jobwatch::error::ApiError;
use jobwatch::registry::{SubscriptionRegistry, Transport};
use jobwatch::transport::ProgressEvent;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Default)]
struct RecordingObserver {
    completed: Mutex<Vec<String>>,
    failed: Mutex<Vec<(String, String)>>,
}

impl DownloadObserver for RecordingObserver {
    fn download_completed(&self, model: &str) {
        self.completed.lock().push(model.to_string());
    }

    fn download_failed(&self, model: &str, reason: &str) {
        self.failed.lock().push((model.to_string(), reason.to_string()));
    }
}

struct Fixture {
    backend: Arc<ScriptedModels>,
    registry: SubscriptionRegistry,
    observer: Arc<RecordingObserver>,
    downloads: ModelDownloads,
}

fn fixture(settings: DownloadSettings) -> Fixture {
    let backend = ScriptedModels::new();
    let registry = SubscriptionRegistry::new();
    let observer = Arc::new(RecordingObserver::default());
    let downloads = ModelDownloads::new(
        backend.clone(),
        registry.clone(),
        ModelCatalog::new(vec![ModelSpec::named("m1"), ModelSpec::named("m2")]),
        observer.clone(),
        settings,
    );
    Fixture {
        backend,
        registry,
        observer,
        downloads,
    }
}

fn with_fallback() -> DownloadSettings {
    DownloadSettings {
        fallback_to_polling: true,
        ..DownloadSettings::default()
    }
}

fn event(e: ProgressEvent) -> StreamItem {
    StreamItem::Event(e)
}

fn status(f: &Fixture, model: &str) -> ModelStatus {
    f.downloads.catalog().get(model).unwrap().status
}

#[tokio::test(start_paused = true)]
async fn stream_completion_marks_downloaded_and_refreshes() {
    let f = fixture(DownloadSettings::default());
    f.backend.push_stream(StreamScript::Finite(vec![
        event(ProgressEvent::running(30)),
        event(ProgressEvent::running(60)),
        event(ProgressEvent::completed()),
    ]));
    f.backend.mark_present("m1");
    *f.backend.active.lock() = Some("m2".to_string());

    let liveness = f.downloads.download("m1").await.unwrap();
    assert_eq!(status(&f, "m1"), ModelStatus::Downloading);
    assert_eq!(f.downloads.watcher_of("m1"), Some(Transport::Stream));

    settle().await;
    assert_eq!(status(&f, "m1"), ModelStatus::Downloaded);
    assert_eq!(*f.observer.completed.lock(), vec!["m1".to_string()]);
    assert!(f.observer.failed.lock().is_empty());
    assert!(!liveness.is_alive());
    assert!(f.registry.is_empty());
    assert_eq!(*f.backend.download_requests.lock(), vec!["m1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn progress_events_update_the_entry() {
    let f = fixture(DownloadSettings::default());
    f.backend.push_stream(StreamScript::Open(vec![
        event(ProgressEvent::running(10)),
        event(ProgressEvent::running(45)),
    ]));

    f.downloads.download("m1").await.unwrap();
    settle().await;
    let entry = f.downloads.catalog().get("m1").unwrap();
    assert_eq!(entry.status, ModelStatus::Downloading);
    assert_eq!(entry.progress, 45);
    assert!(f.downloads.is_watching("m1"));
    f.downloads.stop_all();
}

#[tokio::test(start_paused = true)]
async fn error_event_reverts_and_closes() {
    let f = fixture(with_fallback());
    f.backend.push_stream(StreamScript::Open(vec![
        event(ProgressEvent::running(20)),
        event(ProgressEvent::failed(20, "disk full")),
    ]));

    f.downloads.download("m1").await.unwrap();
    settle().await;

    let entry = f.downloads.catalog().get("m1").unwrap();
    assert_eq!(entry.status, ModelStatus::NotDownloaded);
    assert_eq!(entry.progress, 0);
    assert_eq!(
        *f.observer.failed.lock(),
        vec![("m1".to_string(), "disk full".to_string())]
    );
    // A reported error is final, even with fallback enabled.
    assert!(!f.downloads.is_watching("m1"));
    assert_eq!(f.backend.subscribe_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn broken_channel_reverts() {
    let f = fixture(DownloadSettings::default());
    f.backend.push_stream(StreamScript::Finite(vec![
        event(ProgressEvent::running(40)),
        StreamItem::Broken("connection reset".to_string()),
    ]));

    f.downloads.download("m1").await.unwrap();
    settle().await;

    assert_eq!(status(&f, "m1"), ModelStatus::NotDownloaded);
    let failed = f.observer.failed.lock().clone();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].1.contains("connection reset"));
    assert!(f.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stream_ending_early_reverts() {
    let f = fixture(DownloadSettings::default());
    f.backend
        .push_stream(StreamScript::Finite(vec![event(ProgressEvent::running(10))]));

    f.downloads.download("m1").await.unwrap();
    settle().await;

    assert_eq!(status(&f, "m1"), ModelStatus::NotDownloaded);
    assert_eq!(f.observer.failed.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn refused_subscription_reverts() {
    let f = fixture(DownloadSettings::default());
    f.backend
        .push_stream(StreamScript::Refused("503 from proxy".to_string()));

    f.downloads.download("m1").await.unwrap();
    settle().await;

    assert_eq!(status(&f, "m1"), ModelStatus::NotDownloaded);
    assert!(!f.downloads.is_watching("m1"));
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_skipped() {
    let f = fixture(DownloadSettings::default());
    f.backend.push_stream(StreamScript::Finite(vec![
        StreamItem::Malformed("{not json".to_string()),
        event(ProgressEvent::running(50)),
        event(ProgressEvent::completed()),
    ]));
    f.backend.mark_present("m1");

    f.downloads.download("m1").await.unwrap();
    settle().await;

    assert_eq!(status(&f, "m1"), ModelStatus::Downloaded);
    assert!(f.observer.failed.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transport_failure_falls_back_to_polling() {
    let f = fixture(with_fallback());
    f.backend.push_stream(StreamScript::Finite(vec![
        event(ProgressEvent::running(25)),
        StreamItem::Broken("connection reset".to_string()),
    ]));
    f.backend
        .push_progress(ProgressEvent::running(70))
        .push_progress(ProgressEvent::completed());
    f.backend.mark_present("m1");

    f.downloads.download("m1").await.unwrap();
    settle().await;

    assert_eq!(f.downloads.watcher_of("m1"), Some(Transport::Poll));
    let entry = f.downloads.catalog().get("m1").unwrap();
    assert_eq!(entry.status, ModelStatus::Downloading);
    assert_eq!(entry.progress, 25);
    assert!(f.observer.failed.lock().is_empty());

    sleep(Duration::from_millis(1000)).await;
    assert_eq!(f.downloads.catalog().get("m1").unwrap().progress, 70);

    sleep(Duration::from_millis(1000)).await;
    assert_eq!(status(&f, "m1"), ModelStatus::Downloaded);
    assert_eq!(*f.observer.completed.lock(), vec!["m1".to_string()]);
    assert!(f.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn poll_watcher_follows_progress() {
    let f = fixture(DownloadSettings::default());
    f.backend
        .push_progress(ProgressEvent::running(10))
        .push_progress(ProgressEvent::running(55))
        .push_progress(ProgressEvent::completed());
    f.backend.mark_present("m2");

    f.downloads.download_with("m2", Transport::Poll).await.unwrap();
    assert_eq!(f.downloads.watcher_of("m2"), Some(Transport::Poll));
    assert_eq!(f.backend.subscribe_calls.load(Ordering::SeqCst), 0);

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(f.downloads.catalog().get("m2").unwrap().progress, 10);
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(f.downloads.catalog().get("m2").unwrap().progress, 55);
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(status(&f, "m2"), ModelStatus::Downloaded);
    assert!(!f.downloads.is_watching("m2"));
}

#[tokio::test(start_paused = true)]
async fn poll_failure_reverts() {
    let f = fixture(DownloadSettings::default());
    f.backend
        .push_progress(ProgressEvent::running(10))
        .push_progress_failure("gateway timeout");

    f.downloads.download_with("m1", Transport::Poll).await.unwrap();
    sleep(Duration::from_millis(2500)).await;

    assert_eq!(status(&f, "m1"), ModelStatus::NotDownloaded);
    assert!(!f.downloads.is_watching("m1"));
    assert_eq!(f.observer.failed.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_request_reverts_without_watcher() {
    let f = fixture(DownloadSettings::default());
    f.backend.refuse_downloads("no space left");

    let err = f.downloads.download("m1").await.unwrap_err();
    assert!(matches!(err, ApiError::RequestFailed { status: 500, .. }));
    let entry = f.downloads.catalog().get("m1").unwrap();
    assert_eq!(entry.status, ModelStatus::NotDownloaded);
    assert_eq!(entry.progress, 0);
    assert!(f.registry.is_empty());
    assert_eq!(f.backend.subscribe_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn unknown_model_is_rejected_before_any_request() {
    let f = fixture(DownloadSettings::default());
    let err = f.downloads.download("nope").await.unwrap_err();
    assert!(matches!(err, ApiError::UnknownModel(ref name) if name == "nope"));
    assert!(f.backend.download_requests.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn second_download_replaces_first_watcher() {
    let f = fixture(DownloadSettings::default());
    f.backend
        .push_stream(StreamScript::Open(vec![event(ProgressEvent::running(30))]))
        .push_stream(StreamScript::Open(vec![]));

    let first = f.downloads.download("m1").await.unwrap();
    settle().await;
    let second = f.downloads.download("m1").await.unwrap();
    settle().await;

    assert!(!first.is_alive());
    assert!(second.is_alive());
    assert_eq!(f.registry.len(), 1);
    assert_eq!(f.backend.subscribe_calls.load(Ordering::SeqCst), 2);
    // The second request restarted progress from zero.
    assert_eq!(f.downloads.catalog().get("m1").unwrap().progress, 0);
    f.downloads.stop_all();
}

#[tokio::test(start_paused = true)]
async fn stop_discards_later_events() {
    let f = fixture(DownloadSettings::default());
    f.backend
        .push_stream(StreamScript::Open(vec![event(ProgressEvent::running(30))]));

    let liveness = f.downloads.download("m1").await.unwrap();
    settle().await;
    assert!(f.downloads.stop("m1"));
    assert!(!liveness.is_alive());

    let catalog = f.downloads.catalog();
    assert_eq!(catalog.apply_event("m1", &ProgressEvent::completed(), &liveness), None);
    assert_eq!(catalog.get("m1").unwrap().progress, 30);
    assert!(!f.downloads.stop("m1"));
}

#[tokio::test(start_paused = true)]
async fn refresh_and_activate() {
    let f = fixture(DownloadSettings::default());
    f.backend.mark_present("m1");
    f.backend.mark_present("m2");
    *f.backend.active.lock() = Some("m1".to_string());

    f.downloads.refresh().await.unwrap();
    assert_eq!(status(&f, "m1"), ModelStatus::Active);
    assert_eq!(status(&f, "m2"), ModelStatus::Downloaded);

    let reply = f.downloads.activate("m2").await.unwrap();
    assert!(reply.message.unwrap().contains("m2"));
    assert_eq!(*f.backend.activations.lock(), vec!["m2".to_string()]);
    assert_eq!(status(&f, "m1"), ModelStatus::Downloaded);
    assert_eq!(status(&f, "m2"), ModelStatus::Active);

    let err = f.downloads.activate("other").await.unwrap_err();
    assert!(matches!(err, ApiError::UnknownModel(_)));
}

#[tokio::test(start_paused = true)]
async fn dropping_downloads_disposes_watchers() {
    let f = fixture(DownloadSettings::default());
    f.backend.push_stream(StreamScript::Open(vec![]));
    let liveness = f.downloads.download("m1").await.unwrap();
    assert_eq!(f.registry.len(), 1);

    let Fixture {
        registry, downloads, ..
    } = f;
    drop(downloads);
    assert!(registry.is_empty());
    assert!(!liveness.is_alive());
}
