use super::{JobHandle, JobKind, JobQueue, JobRequest, JobState, JobStatus, StatusBoard};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::info;
use ulid::Ulid;

/// In-process queue: an unbounded channel drained by a [`super::Worker`].
pub struct LocalQueue {
    tx: mpsc::UnboundedSender<JobRequest>,
    board: StatusBoard,
}

impl LocalQueue {
    /// The receiver must be handed to a worker, otherwise submitted jobs stay pending.
    #[must_use]
    pub fn new(board: StatusBoard) -> (Self, mpsc::UnboundedReceiver<JobRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, board }, rx)
    }
}

#[async_trait]
impl JobQueue for LocalQueue {
    async fn submit(&self, kind: JobKind, submitted_by: i64) -> Result<JobHandle> {
        let request = JobRequest {
            id: Ulid::new().to_string(),
            kind,
            submitted_by,
            submitted_at: Utc::now(),
        };

        self.board
            .publish(&JobStatus::new(
                request.id.clone(),
                submitted_by,
                JobState::Pending,
            ))
            .await?;

        let handle = JobHandle {
            task_id: request.id.clone(),
        };
        info!(job_id = %request.id, kind = request.kind.name(), submitted_by, "job submitted");

        self.tx
            .send(request)
            .map_err(|_| anyhow!("job worker is not running"))?;
        Ok(handle)
    }

    async fn status(&self, task_id: &str) -> Result<Option<JobStatus>> {
        self.board.get(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn submit_publishes_pending_and_enqueues() -> Result<()> {
        let (queue, mut rx) = LocalQueue::new(StatusBoard::new(Arc::new(MemoryCache::new("t"))));
        let handle = queue
            .submit(JobKind::Process { items: vec![json!("a")] }, 7)
            .await?;

        let status = queue.status(&handle.task_id).await?;
        assert_eq!(
            status.map(|s| (s.status, s.submitted_by)),
            Some((JobState::Pending, 7))
        );

        let request = rx.recv().await.ok_or_else(|| anyhow!("nothing queued"))?;
        assert_eq!(request.id, handle.task_id);
        assert_eq!(request.submitted_by, 7);
        Ok(())
    }

    #[tokio::test]
    async fn submit_fails_without_a_worker() -> Result<()> {
        let (queue, rx) = LocalQueue::new(StatusBoard::new(Arc::new(MemoryCache::new("t"))));
        drop(rx);
        assert!(queue.submit(JobKind::Process { items: Vec::new() }, 1).await.is_err());
        Ok(())
    }
}
