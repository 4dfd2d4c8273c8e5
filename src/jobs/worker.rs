use super::{
    JobKind, JobRequest, JobState, JobStatus, StatusBoard,
    autotest::{Outcome, TestCase, run_case},
};
use crate::{
    APP_USER_AGENT,
    resources::{Environment, Task, TaskStatus},
    store::Store,
};
use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use reqwest::Client;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{Instrument, error, info, info_span};

const CASE_TIMEOUT_SECONDS: u64 = 10;

/// Batch jobs publish progress every this many items, and once at the end.
const PROGRESS_STEP: usize = 100;

/// Consumes job requests one at a time and records their progress.
#[derive(Clone)]
pub struct Worker {
    board: StatusBoard,
    tasks: Arc<dyn Store<Task>>,
    environments: Arc<dyn Store<Environment>>,
    client: Client,
}

/// Status publishing for one job. Progress updates carry no results; the
/// full result list is published once, when the job ends.
struct Reporter<'a> {
    board: &'a StatusBoard,
    id: &'a str,
    submitted_by: i64,
}

impl Reporter<'_> {
    fn status(&self, state: JobState) -> JobStatus {
        JobStatus::new(self.id, self.submitted_by, state)
    }

    async fn progress(&self, done: usize, total: usize) -> Result<()> {
        self.board
            .publish(&self.status(JobState::Progress).with_progress(done, total))
            .await
    }

    async fn publish(&self, status: &JobStatus) {
        if let Err(err) = self.board.publish(status).await {
            error!("failed to publish job status: {err:#}");
        }
    }
}

fn progress_due(done: usize, total: usize) -> bool {
    done == total || done % PROGRESS_STEP == 0
}

impl Worker {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        board: StatusBoard,
        tasks: Arc<dyn Store<Task>>,
        environments: Arc<dyn Store<Environment>>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(CASE_TIMEOUT_SECONDS))
            .build()?;
        Ok(Self {
            board,
            tasks,
            environments,
            client,
        })
    }

    /// Drain `rx` on a background task until every sender is gone. Dropping
    /// the handle detaches the worker.
    #[must_use]
    pub fn spawn(self, mut rx: mpsc::UnboundedReceiver<JobRequest>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let span = info_span!("job", job_id = %request.id, kind = request.kind.name());
                self.process(request).instrument(span).await;
            }
            info!("job worker stopped");
        })
    }

    /// Run one job to completion; failures end up in its status.
    pub async fn process(&self, request: JobRequest) {
        let reporter = Reporter {
            board: &self.board,
            id: &request.id,
            submitted_by: request.submitted_by,
        };
        reporter.publish(&reporter.status(JobState::Started)).await;

        let outcome = match &request.kind {
            JobKind::AutotestRun { task_id, cases } => {
                self.autotest(&reporter, *task_id, cases).await
            }
            JobKind::Process { items } => batch(&reporter, items).await,
        };

        let status = match outcome {
            Ok(results) => {
                info!(results = results.len(), "job finished");
                reporter
                    .status(JobState::Success)
                    .with_progress(1, 1)
                    .with_results(results)
            }
            Err(err) => {
                error!("job failed: {err:#}");
                reporter.status(JobState::Failure).with_results(vec![json!({
                    "error": err.to_string(),
                })])
            }
        };
        reporter.publish(&status).await;
    }

    async fn autotest(
        &self,
        reporter: &Reporter<'_>,
        task_id: i64,
        cases: &[TestCase],
    ) -> Result<Vec<Value>> {
        let outcome = self.run_cases(reporter, task_id, cases).await;
        if let Err(err) = &outcome {
            self.abort(task_id, err).await;
        }
        outcome
    }

    async fn run_cases(
        &self,
        reporter: &Reporter<'_>,
        task_id: i64,
        cases: &[TestCase],
    ) -> Result<Vec<Value>> {
        let mut task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| anyhow!("task {task_id} not found"))?;

        let environment = match task.environment_id {
            Some(env_id) => self
                .environments
                .get(env_id)
                .await?
                .filter(|env| env.meta.available),
            None => None,
        };
        let Some(environment) = environment else {
            task.start(Utc::now());
            task.log("no available environment configured");
            task.error_count = 1;
            task.finish(json!({"error": "no available environment"}), Utc::now());
            self.tasks.update(task).await?;
            return Err(anyhow!("task {task_id} has no available environment"));
        };

        task.start(Utc::now());
        task.total_count = i64::try_from(cases.len()).context("too many cases")?;
        task.log(format!("running {} cases against {}", cases.len(), environment.base_url));
        let mut task = self
            .tasks
            .update(task)
            .await?
            .ok_or_else(|| anyhow!("task {task_id} was deleted"))?;

        let mut results = Vec::with_capacity(cases.len());
        for (done, case) in cases.iter().enumerate() {
            let result = run_case(
                &self.client,
                &environment.base_url,
                &environment.variables,
                case,
            )
            .await;

            match result.outcome {
                Outcome::Passed => task.success_count += 1,
                Outcome::Failed => task.fail_count += 1,
                Outcome::Skipped => task.skip_count += 1,
                Outcome::Error => task.error_count += 1,
            }
            task.log(result.log_line());
            results.push(result.to_value());

            reporter.progress(done + 1, cases.len()).await?;
        }

        let summary = json!({
            "total": task.total_count,
            "passed": task.success_count,
            "failed": task.fail_count,
            "skipped": task.skip_count,
            "errors": task.error_count,
        });
        task.finish(summary, Utc::now());
        info!(
            target: "audit",
            task_id,
            status = task.status.as_str(),
            "autotest run finished"
        );
        self.tasks
            .update(task)
            .await?
            .ok_or_else(|| anyhow!("task {task_id} was deleted"))?;

        Ok(results)
    }

    /// Close a run that stopped part way, so the task can be run again.
    async fn abort(&self, task_id: i64, cause: &anyhow::Error) {
        let mut task = match self.tasks.get(task_id).await {
            Ok(Some(task)) if task.status == TaskStatus::Running => task,
            Ok(_) => return,
            Err(err) => {
                error!(task_id, "failed to load aborted task: {err:#}");
                return;
            }
        };

        task.log(format!("run aborted: {cause:#}"));
        task.error_count += 1;
        task.finish(json!({"error": cause.to_string()}), Utc::now());
        if let Err(err) = self.tasks.update(task).await {
            error!(task_id, "failed to mark aborted task as failed: {err:#}");
        }
    }
}

async fn batch(reporter: &Reporter<'_>, items: &[Value]) -> Result<Vec<Value>> {
    let mut results = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        results.push(json!({
            "index": index,
            "type": type_name(item),
            "size": size(item),
        }));
        if progress_due(index + 1, items.len()) {
            reporter.progress(index + 1, items.len()).await?;
        }
        tokio::task::yield_now().await;
    }
    Ok(results)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn size(value: &Value) -> usize {
    match value {
        Value::String(text) => text.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{Cache, CacheKey, MemoryCache},
        jobs::{JobQueue, LocalQueue},
        resources::{AuditMeta, TaskStatus},
        store::MemoryStore,
    };
    use async_trait::async_trait;
    use axum::{Router, http::StatusCode, routing::get};
    use tokio::{net::TcpListener, sync::Mutex};

    /// Cache that records every status write and can refuse progress ones.
    struct Recording {
        inner: MemoryCache,
        writes: Mutex<Vec<JobStatus>>,
        fail_progress: bool,
    }

    impl Recording {
        fn new(fail_progress: bool) -> Self {
            Self {
                inner: MemoryCache::new("test"),
                writes: Mutex::new(Vec::new()),
                fail_progress,
            }
        }

        async fn states(&self) -> Vec<JobState> {
            self.writes.lock().await.iter().map(|s| s.status).collect()
        }
    }

    #[async_trait]
    impl Cache for Recording {
        async fn get(&self, key: &CacheKey) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &CacheKey, value: String, ttl: Duration) -> Result<()> {
            let status: JobStatus = serde_json::from_str(&value)?;
            if self.fail_progress && status.status == JobState::Progress {
                return Err(anyhow!("cache unavailable"));
            }
            self.writes.lock().await.push(status);
            self.inner.set(key, value, ttl).await
        }

        async fn take(&self, key: &CacheKey) -> Result<Option<String>> {
            self.inner.take(key).await
        }

        async fn delete(&self, key: &CacheKey) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    struct Fixture {
        worker: Worker,
        board: StatusBoard,
        cache: Arc<Recording>,
        tasks: Arc<MemoryStore<Task>>,
        environments: Arc<MemoryStore<Environment>>,
    }

    fn fixture() -> Result<Fixture> {
        fixture_with(Recording::new(false))
    }

    fn fixture_with(cache: Recording) -> Result<Fixture> {
        let cache = Arc::new(cache);
        let board = StatusBoard::new(cache.clone());
        let tasks = Arc::new(MemoryStore::<Task>::new());
        let environments = Arc::new(MemoryStore::<Environment>::new());
        let worker = Worker::new(board.clone(), tasks.clone(), environments.clone())?;
        Ok(Fixture {
            worker,
            board,
            cache,
            tasks,
            environments,
        })
    }

    async fn environment(fx: &Fixture) -> Result<Environment> {
        Ok(fx
            .environments
            .insert(Environment {
                meta: AuditMeta::new(Some(1), Utc::now()),
                name: "local".to_string(),
                base_url: target().await?,
                variables: json!({"who": "alice"}),
            })
            .await?)
    }

    fn task(environment_id: Option<i64>) -> Task {
        Task {
            meta: AuditMeta::new(Some(1), Utc::now()),
            name: "smoke".to_string(),
            environment_id,
            status: TaskStatus::Pending,
            start_time: None,
            end_time: None,
            total_count: 0,
            success_count: 0,
            fail_count: 0,
            skip_count: 0,
            error_count: 0,
            summary: None,
            logs: None,
        }
    }

    fn case(name: &str, path: &str, skip: bool) -> TestCase {
        TestCase {
            name: name.to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            expected_status: 200,
            body: None,
            skip,
        }
    }

    async fn target() -> Result<String> {
        let app = Router::new()
            .route("/ok/{name}", get(|| async { StatusCode::OK }))
            .route("/teapot", get(|| async { StatusCode::IM_A_TEAPOT }));
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(format!("http://{addr}"))
    }

    fn request(kind: JobKind) -> JobRequest {
        JobRequest {
            id: "job-1".to_string(),
            kind,
            submitted_by: 1,
            submitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn autotest_run_updates_the_task() -> Result<()> {
        let fx = fixture()?;
        let environment = environment(&fx).await?;
        let task = fx.tasks.insert(task(Some(environment.meta.id))).await?;

        fx.worker
            .process(request(JobKind::AutotestRun {
                task_id: task.meta.id,
                cases: vec![
                    case("ok", "/ok/{{who}}", false),
                    case("teapot", "/teapot", false),
                    case("later", "/ok/x", true),
                ],
            }))
            .await;

        let status = fx.board.get("job-1").await?.ok_or_else(|| anyhow!("no status"))?;
        assert_eq!(status.status, JobState::Success);
        assert_eq!(status.submitted_by, 1);
        assert_eq!(status.progress, 100);
        assert_eq!(status.results.len(), 3);

        let task = fx.tasks.get(task.meta.id).await?.ok_or_else(|| anyhow!("no task"))?;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            (task.total_count, task.success_count, task.fail_count, task.skip_count),
            (3, 1, 1, 1)
        );
        assert!(task.end_time >= task.start_time);
        assert!(task.summary.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn autotest_without_environment_fails_the_job() -> Result<()> {
        let fx = fixture()?;
        let task = fx.tasks.insert(task(None)).await?;

        fx.worker
            .process(request(JobKind::AutotestRun {
                task_id: task.meta.id,
                cases: vec![case("ok", "/ok/x", false)],
            }))
            .await;

        let status = fx.board.get("job-1").await?.map(|s| s.status);
        assert_eq!(status, Some(JobState::Failure));
        let task = fx.tasks.get(task.meta.id).await?.map(|t| t.status);
        assert_eq!(task, Some(TaskStatus::Failed));
        Ok(())
    }

    #[tokio::test]
    async fn queued_jobs_reach_the_worker() -> Result<()> {
        let fx = fixture()?;
        let (queue, rx) = LocalQueue::new(fx.board.clone());
        let _worker = fx.worker.clone().spawn(rx);

        let handle = queue
            .submit(
                JobKind::Process {
                    items: vec![json!("abc"), json!([1, 2]), json!(null)],
                },
                1,
            )
            .await?;

        let mut status = None;
        for _ in 0..200 {
            status = queue.status(&handle.task_id).await?;
            if status.as_ref().is_some_and(|s| s.status.is_finished()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let status = status.ok_or_else(|| anyhow!("no status"))?;
        assert_eq!(status.status, JobState::Success);
        assert_eq!(status.results[0], json!({"index": 0, "type": "string", "size": 3}));
        assert_eq!(status.results[1]["size"], json!(2));
        Ok(())
    }

    #[tokio::test]
    async fn batch_progress_is_throttled_and_carries_no_results() -> Result<()> {
        let fx = fixture()?;
        let items = (0..250).map(|n| json!(n)).collect();
        fx.worker.process(request(JobKind::Process { items })).await;

        assert_eq!(
            fx.cache.states().await,
            vec![
                JobState::Started,
                JobState::Progress,
                JobState::Progress,
                JobState::Progress,
                JobState::Success,
            ]
        );
        let writes = fx.cache.writes.lock().await;
        let progress: Vec<u8> = writes
            .iter()
            .filter(|s| s.status == JobState::Progress)
            .map(|s| s.progress)
            .collect();
        assert_eq!(progress, vec![40, 80, 100]);
        assert!(
            writes
                .iter()
                .filter(|s| s.status != JobState::Success)
                .all(|s| s.results.is_empty())
        );
        assert_eq!(writes.last().map(|s| s.results.len()), Some(250));
        assert!(writes.iter().all(|s| s.submitted_by == 1));
        Ok(())
    }

    #[tokio::test]
    async fn autotest_failing_mid_run_does_not_leave_the_task_running() -> Result<()> {
        let fx = fixture_with(Recording::new(true))?;
        let environment = environment(&fx).await?;
        let task = fx.tasks.insert(task(Some(environment.meta.id))).await?;

        fx.worker
            .process(request(JobKind::AutotestRun {
                task_id: task.meta.id,
                cases: vec![case("ok", "/ok/x", false), case("ok", "/ok/y", false)],
            }))
            .await;

        let status = fx.board.get("job-1").await?.map(|s| s.status);
        assert_eq!(status, Some(JobState::Failure));

        let task = fx.tasks.get(task.meta.id).await?.ok_or_else(|| anyhow!("no task"))?;
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.end_time.is_some());
        assert!(task.error_count >= 1);
        let logs = task.logs.map(|logs| logs.to_string()).unwrap_or_default();
        assert!(logs.contains("run aborted"), "{logs}");
        Ok(())
    }
}
