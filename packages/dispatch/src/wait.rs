//! The Wait Coordinator (spec.md §4.5): the synchronous "wait for this job's
//! result" primitive used by request-blocking endpoints.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::blob_store::BlobStore;
use crate::error::WaitError;
use crate::types::{JobCompletion, JobResult};
use crate::worker_queue::WorkerQueue;

const MATERIALIZATION_POLL_INTERVAL: StdDuration = StdDuration::from_millis(500);

pub struct WaitCoordinator<Q, B> {
    queue: Arc<Q>,
    blobs: Arc<B>,
}

impl<Q, B> WaitCoordinator<Q, B>
where
    Q: WorkerQueue,
    B: BlobStore,
{
    pub fn new(queue: Arc<Q>, blobs: Arc<B>) -> Self {
        Self { queue, blobs }
    }

    /// `wait_for_job` (spec.md §4.5). Exactly one outcome per call; dropping
    /// the returned future (caller cancellation) drops the deadline timer
    /// with it, since nothing here is detached via `tokio::spawn`.
    pub async fn wait_for_job(
        &self,
        job_id: Uuid,
        timeout_ms: u64,
        zero_data_retention: bool,
    ) -> Result<Vec<serde_json::Value>, WaitError> {
        let deadline = Instant::now() + StdDuration::from_millis(timeout_ms);

        // Step 1: resolve job_ref to a live handle, polling until materialized.
        let handle = loop {
            if let Some(handle) = self.queue.handle_for(job_id).await? {
                break handle;
            }
            if Instant::now() >= deadline {
                return Err(WaitError::ScrapeTimeoutInQueue);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            time::sleep(MATERIALIZATION_POLL_INTERVAL.min(remaining)).await;
            if Instant::now() >= deadline {
                return Err(WaitError::ScrapeTimeoutInQueue);
            }
        };

        // Step 2: race the completion event against the remaining budget.
        let remaining = deadline.saturating_duration_since(Instant::now());
        let completion = match time::timeout(remaining, self.queue.await_completion(handle)).await {
            Ok(result) => result?,
            Err(_) => return Err(WaitError::ScrapeTimeout),
        };

        // Step 3 and 4.
        match completion {
            JobCompletion::TimedOutInQueue => Err(WaitError::ScrapeTimeoutInQueue),
            JobCompletion::TransportableFailure(err) => Err(WaitError::Transportable(err)),
            JobCompletion::GenericFailure(message) => Err(WaitError::Generic(message)),
            JobCompletion::Success(JobResult::Inline(documents)) => Ok(documents),
            JobCompletion::Success(JobResult::OutOfBand) => {
                let documents = self
                    .blobs
                    .get(job_id)
                    .await?
                    .ok_or(WaitError::ResultNotFound)?;

                if zero_data_retention {
                    self.blobs.delete(job_id).await?;
                }

                Ok(documents)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::LocalBlobStore;
    use crate::types::TransportableError;
    use crate::worker_queue::LocalWorkerQueue;

    async fn setup() -> (Arc<LocalWorkerQueue>, Arc<LocalBlobStore>, WaitCoordinator<LocalWorkerQueue, LocalBlobStore>) {
        let queue = Arc::new(LocalWorkerQueue::new());
        let blobs = Arc::new(LocalBlobStore::new());
        let coordinator = WaitCoordinator::new(queue.clone(), blobs.clone());
        (queue, blobs, coordinator)
    }

    #[tokio::test]
    async fn times_out_when_job_never_materializes() {
        let (_queue, _blobs, coordinator) = setup().await;
        let job_id = Uuid::new_v4();

        let result = coordinator.wait_for_job(job_id, 50, false).await;
        assert!(matches!(result, Err(WaitError::ScrapeTimeoutInQueue)));
    }

    #[tokio::test]
    async fn returns_inline_result_on_success() {
        let (queue, _blobs, coordinator) = setup().await;
        let job_id = Uuid::new_v4();
        queue
            .enqueue(job_id, &crate::types::ScrapePayload {
                url: "https://example.com".to_string(),
                options: Default::default(),
                was_deferred: false,
            }, 0)
            .await
            .unwrap();

        let documents = vec![serde_json::json!({"markdown": "hello"})];
        queue
            .complete(job_id, JobCompletion::Success(JobResult::Inline(documents.clone())))
            .await;

        let result = coordinator.wait_for_job(job_id, 5_000, false).await.unwrap();
        assert_eq!(result, documents);
    }

    #[tokio::test]
    async fn fetches_out_of_band_result_from_blob_store() {
        let (queue, blobs, coordinator) = setup().await;
        let job_id = Uuid::new_v4();
        queue
            .enqueue(job_id, &crate::types::ScrapePayload {
                url: "https://example.com".to_string(),
                options: Default::default(),
                was_deferred: false,
            }, 0)
            .await
            .unwrap();

        let documents = vec![serde_json::json!({"markdown": "big document"})];
        blobs.put(job_id, documents.clone());
        queue
            .complete(job_id, JobCompletion::Success(JobResult::OutOfBand))
            .await;

        let result = coordinator.wait_for_job(job_id, 5_000, true).await.unwrap();
        assert_eq!(result, documents);
        assert!(blobs.get(job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reraises_transportable_error() {
        let (queue, _blobs, coordinator) = setup().await;
        let job_id = Uuid::new_v4();
        queue
            .enqueue(job_id, &crate::types::ScrapePayload {
                url: "https://example.com".to_string(),
                options: Default::default(),
                was_deferred: false,
            }, 0)
            .await
            .unwrap();

        let transportable = TransportableError {
            kind: "RateLimited".to_string(),
            message: "upstream rate limit".to_string(),
            cause: None,
        };
        queue
            .complete(job_id, JobCompletion::TransportableFailure(transportable.clone()))
            .await;

        let result = coordinator.wait_for_job(job_id, 5_000, false).await;
        match result {
            Err(WaitError::Transportable(err)) => assert_eq!(err, transportable),
            other => panic!("expected transportable error, got {other:?}"),
        }
    }
}
