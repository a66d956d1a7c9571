//! Integration tests for the job admission and dispatch layer.
//!
//! Exercises the concrete scenarios named in spec.md §8, wired against the
//! in-memory doubles so no external store or worker is needed.

use std::sync::Arc;

use dispatch_core::admission::AdmissionController;
use dispatch_core::blob_store::LocalBlobStore;
use dispatch_core::directory::StaticDirectory;
use dispatch_core::dispatcher::Dispatcher;
use dispatch_core::drainer::{DrainTrigger, Drainer};
use dispatch_core::error::WaitError;
use dispatch_core::ledger::{InMemoryLedger, Ledger};
use dispatch_core::notify::{LoggingNotificationChannel, NotificationGate};
use dispatch_core::types::{CrawlRecord, Job, JobCompletion, JobMode, JobResult, ScrapePayload};
use dispatch_core::wait::WaitCoordinator;
use dispatch_core::worker_queue::LocalWorkerQueue;
use uuid::Uuid;

fn job(team_id: &str, crawl_id: Option<&str>) -> Job {
    Job {
        id: Uuid::new_v4(),
        team_id: team_id.to_string(),
        crawl_id: crawl_id.map(|s| s.to_string()),
        priority: 0,
        mode: if crawl_id.is_some() { JobMode::Crawl } else { JobMode::SingleUrls },
        timeout_ms: 60_000,
        payload: ScrapePayload {
            url: "https://example.com".to_string(),
            options: Default::default(),
            was_deferred: false,
        },
        is_extract: false,
        from_extract: false,
        direct_to_worker: false,
    }
}

type TestDispatcher = Dispatcher<InMemoryLedger, StaticDirectory, StaticDirectory, LocalWorkerQueue>;
type TestDrainer = Drainer<InMemoryLedger, StaticDirectory, StaticDirectory, LocalWorkerQueue>;

struct Harness {
    dispatcher: Arc<TestDispatcher>,
    drainer: TestDrainer,
    queue: Arc<LocalWorkerQueue>,
    ledger: Arc<InMemoryLedger>,
}

fn harness(default_ceiling: u32, directory: Arc<StaticDirectory>) -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    let queue = Arc::new(LocalWorkerQueue::new());
    let notifier = NotificationGate::new(ledger.clone(), Arc::new(LoggingNotificationChannel), 15);

    let dispatcher = Arc::new(Dispatcher::new(
        ledger.clone(),
        directory.clone(),
        directory.clone(),
        queue.clone(),
        notifier,
        default_ceiling,
        60_000,
    ));
    let admission = Arc::new(AdmissionController::new(
        ledger.clone(),
        directory.clone(),
        directory.clone(),
        default_ceiling,
    ));
    let drainer = Drainer::new(ledger.clone(), admission, dispatcher.clone(), queue.clone(), default_ceiling);

    Harness { dispatcher, drainer, queue, ledger }
}

fn counts(handles: &[Option<dispatch_core::types::JobHandle>]) -> (usize, usize) {
    let admitted = handles.iter().filter(|h| h.is_some()).count();
    let deferred = handles.iter().filter(|h| h.is_none()).count();
    (admitted, deferred)
}

#[tokio::test]
async fn tenant_saturation_defers_and_notifies_once() {
    // Scenario 1: ceiling=2, submit 5 single-URL jobs for the same tenant.
    let h = harness(2, Arc::new(StaticDirectory::new()));
    let jobs: Vec<Job> = (0..5).map(|_| job("team-1", None)).collect();

    let handles = h.dispatcher.submit_many(jobs).await.unwrap();
    let (admitted, deferred) = counts(&handles);

    assert_eq!(admitted, 2);
    assert_eq!(deferred, 3);
    assert_eq!(h.ledger.count_deferred("team-1").await.unwrap(), 3);

    // deferred (3) > ceiling (2): the Notification Gate must have fired.
    let last_sent = h
        .ledger
        .notification_last_sent("team-1", dispatch_core::types::NotificationKind::ConcurrencyLimitReached.as_str())
        .await
        .unwrap();
    assert!(last_sent.is_some(), "expected a concurrency-limit-reached notification to be recorded");
}

#[tokio::test]
async fn crawl_backpressure_forces_defer_without_notification() {
    // Scenario 2: crawl C has max_concurrency=1, submit 4 jobs under C.
    let directory = Arc::new(StaticDirectory::new());
    directory.set_crawl("crawl-1", CrawlRecord { max_concurrency: Some(1), delay: None });
    let h = harness(10, directory);

    let jobs: Vec<Job> = (0..4).map(|_| job("team-2", Some("crawl-1"))).collect();
    let (admitted, deferred) = counts(&h.dispatcher.submit_many(jobs).await.unwrap());

    assert_eq!(admitted, 1);
    assert_eq!(deferred, 3);
}

#[tokio::test]
async fn crawl_delay_implies_ceiling_one() {
    // Scenario 3: crawl C has delay=5 only. Submit 2 jobs under C.
    let directory = Arc::new(StaticDirectory::new());
    directory.set_crawl("crawl-2", CrawlRecord { max_concurrency: None, delay: Some(5) });
    let h = harness(10, directory);

    let jobs = vec![job("team-3", Some("crawl-2")), job("team-3", Some("crawl-2"))];
    let (admitted, deferred) = counts(&h.dispatcher.submit_many(jobs).await.unwrap());

    assert_eq!(admitted, 1);
    assert_eq!(deferred, 1);
}

#[tokio::test]
async fn bulk_mixed_crawl_and_ad_hoc_admits_headroom_on_both_sides() {
    // Scenario 4: ceiling=3; 6 jobs, 3 under crawl C (max_concurrency=1), 3 ad-hoc.
    let directory = Arc::new(StaticDirectory::new());
    directory.set_crawl("crawl-3", CrawlRecord { max_concurrency: Some(1), delay: None });
    let h = harness(3, directory);

    let mut jobs: Vec<Job> = (0..3).map(|_| job("team-4", Some("crawl-3"))).collect();
    jobs.extend((0..3).map(|_| job("team-4", None)));

    let (admitted, deferred) = counts(&h.dispatcher.submit_many(jobs).await.unwrap());

    // 1 of C admitted + 2 ad-hoc admitted (tenant headroom = 3, 1 used by C).
    assert_eq!(admitted, 3);
    assert_eq!(deferred, 3);
}

#[tokio::test]
async fn wait_times_out_before_job_materializes() {
    let h = harness(2, Arc::new(StaticDirectory::new()));
    let job_id = Uuid::new_v4();

    let coordinator = WaitCoordinator::new(h.queue.clone(), Arc::new(LocalBlobStore::new()));
    let result = coordinator.wait_for_job(job_id, 200, false).await;

    assert!(matches!(result, Err(WaitError::ScrapeTimeoutInQueue)));
}

#[tokio::test]
async fn wait_fetches_out_of_band_result_and_honors_zero_retention() {
    let h = harness(2, Arc::new(StaticDirectory::new()));
    let target = job("team-6", None);
    let job_id = target.id;

    h.dispatcher.submit_one(target).await.unwrap();

    let blobs = Arc::new(LocalBlobStore::new());
    let documents = vec![serde_json::json!({"markdown": "doc"})];
    blobs.put(job_id, documents.clone());
    h.queue.complete(job_id, JobCompletion::Success(JobResult::OutOfBand)).await;

    let coordinator = WaitCoordinator::new(h.queue.clone(), blobs.clone());
    let result = coordinator.wait_for_job(job_id, 5_000, true).await.unwrap();

    assert_eq!(result, documents);
    assert!(blobs.get(job_id).await.unwrap().is_none());
}

#[tokio::test]
async fn drainer_promotes_deferred_job_after_completion_releases_a_slot() {
    let h = harness(1, Arc::new(StaticDirectory::new()));
    let first = job("team-7", None);
    let second = job("team-7", None);
    let second_id = second.id;

    let first_handle = h.dispatcher.submit_one(first.clone()).await.unwrap();
    assert!(first_handle.is_some());
    let second_handle = h.dispatcher.submit_one(second).await.unwrap();
    assert!(second_handle.is_none());
    assert_eq!(h.ledger.count_deferred("team-7").await.unwrap(), 1);

    let promoted = h.drainer.release_and_drain("team-7", None, first.id).await.unwrap();
    assert_eq!(promoted, 1);
    assert_eq!(h.ledger.count_deferred("team-7").await.unwrap(), 0);
    assert!(h.queue.handle_for(second_id).await.unwrap().is_some());

    let noop = h.drainer.drain_tenant("team-7", DrainTrigger::PeriodicSweep).await.unwrap();
    assert_eq!(noop, 0);
}
