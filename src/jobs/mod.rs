//! Background job hand-off.
//!
//! The request path never runs long work itself. It builds a [`JobRequest`],
//! hands it to a [`JobQueue`] and returns a [`JobHandle`]; a worker consumes
//! the request and publishes [`JobStatus`] snapshots that the status endpoint
//! reads back. Statuses live in the cache and expire an hour after the last
//! update.

use crate::cache::{Cache, CacheKey, get_json, set_json};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use utoipa::ToSchema;

pub mod autotest;
mod local;
mod worker;

pub use autotest::TestCase;
pub use local::LocalQueue;
pub use worker::Worker;

pub const STATUS_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// Run the HTTP cases of an auto-test task against its environment.
    AutotestRun { task_id: i64, cases: Vec<TestCase> },
    /// Generic batch processing of opaque items.
    Process { items: Vec<Value> },
}

impl JobKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AutotestRun { .. } => "autotest_run",
            Self::Process { .. } => "process",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub id: String,
    pub kind: JobKind,
    pub submitted_by: i64,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Started,
    Progress,
    Success,
    Failure,
}

impl JobState {
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Body of `GET /jobs/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JobStatus {
    pub task_id: String,
    /// User that submitted the job; status reads are scoped by it.
    pub submitted_by: i64,
    pub status: JobState,
    /// 0 to 100.
    pub progress: u8,
    #[schema(value_type = Vec<Object>)]
    pub results: Vec<Value>,
}

impl JobStatus {
    #[must_use]
    pub fn new(task_id: impl Into<String>, submitted_by: i64, status: JobState) -> Self {
        Self {
            task_id: task_id.into(),
            submitted_by,
            status,
            progress: 0,
            results: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, done: usize, total: usize) -> Self {
        self.progress = percent(done, total);
        self
    }

    #[must_use]
    pub fn with_results(mut self, results: Vec<Value>) -> Self {
        self.results = results;
        self
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    u8::try_from(done.min(total) * 100 / total).unwrap_or(100)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobHandle {
    pub task_id: String,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job and return its handle; the job runs later.
    async fn submit(&self, kind: JobKind, submitted_by: i64) -> Result<JobHandle>;

    /// Latest status, `None` when unknown or expired.
    async fn status(&self, task_id: &str) -> Result<Option<JobStatus>>;
}

/// Job statuses kept in the cache.
#[derive(Clone)]
pub struct StatusBoard {
    cache: Arc<dyn Cache>,
}

impl StatusBoard {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// # Errors
    /// Returns an error if the cache write fails.
    pub async fn publish(&self, status: &JobStatus) -> Result<()> {
        set_json(
            self.cache.as_ref(),
            &CacheKey::Job(status.task_id.clone()),
            status,
            STATUS_TTL,
        )
        .await
    }

    /// # Errors
    /// Returns an error if the cache read fails.
    pub async fn get(&self, task_id: &str) -> Result<Option<JobStatus>> {
        get_json(self.cache.as_ref(), &CacheKey::Job(task_id.to_string())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use serde_json::json;

    #[test]
    fn progress_is_a_bounded_percentage() {
        assert_eq!(percent(0, 4), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(5, 4), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn states_serialize_upper_case() -> Result<()> {
        assert_eq!(serde_json::to_string(&JobState::Progress)?, "\"PROGRESS\"");
        assert!(JobState::Failure.is_finished());
        assert!(!JobState::Started.is_finished());
        Ok(())
    }

    #[test]
    fn job_kind_is_tagged() -> Result<()> {
        let kind: JobKind = serde_json::from_value(json!({"kind": "process", "items": [1]}))?;
        assert_eq!(kind, JobKind::Process { items: vec![json!(1)] });
        assert_eq!(kind.name(), "process");
        Ok(())
    }

    #[tokio::test]
    async fn board_round_trips_statuses() -> Result<()> {
        let board = StatusBoard::new(Arc::new(MemoryCache::new("test")));
        assert_eq!(board.get("missing").await?, None);

        let status = JobStatus::new("01J", 3, JobState::Progress)
            .with_progress(1, 2)
            .with_results(vec![json!({"ok": true})]);
        board.publish(&status).await?;
        assert_eq!(board.get("01J").await?, Some(status));
        Ok(())
    }
}
