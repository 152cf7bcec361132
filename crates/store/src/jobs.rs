use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use bk_domain::error::{Error, Result};

/// Fire-and-forget hand-off to the generation workers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job and return its id.
    async fn enqueue(&self, job_type: &str, payload: serde_json::Value) -> Result<String>;
}

#[derive(Debug, Clone, Serialize)]
pub struct QueuedJob {
    pub job_id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
}

/// Queue that records jobs in memory. Nothing consumes them.
#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<Vec<QueuedJob>>,
    failing: AtomicBool,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `enqueue` fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<QueuedJob> {
        self.jobs.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job_type: &str, payload: serde_json::Value) -> Result<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Queue(format!("dispatch of {job_type} refused")));
        }
        let job_id = format!("job_{}", uuid::Uuid::new_v4().simple());
        self.jobs.lock().push(QueuedJob {
            job_id: job_id.clone(),
            job_type: job_type.to_owned(),
            payload,
            enqueued_at: Utc::now(),
        });
        tracing::debug!(job_id = %job_id, job_type, "job enqueued");
        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_jobs_in_order() {
        let q = InMemoryJobQueue::new();
        let a = q.enqueue("image-generation", serde_json::json!({"n": 1})).await.unwrap();
        let b = q.enqueue("logo-generation", serde_json::json!({})).await.unwrap();
        assert_ne!(a, b);
        let jobs = q.jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job_id, a);
        assert_eq!(jobs[1].job_type, "logo-generation");
    }

    #[tokio::test]
    async fn failing_queue_rejects() {
        let q = InMemoryJobQueue::new();
        q.set_failing(true);
        let err = q.enqueue("image-generation", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Queue(_)));
        assert!(q.is_empty());
    }
}
