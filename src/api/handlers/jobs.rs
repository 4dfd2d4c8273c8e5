//! Background job routes: auto-test runs, generic processing and status polling.

use crate::{
    api::{
        envelope::Success,
        error::ErrorBody,
        extract::Input,
    },
    auth::{AuthContext, Permission},
    crud::CrudService,
    error::Error,
    jobs::{JobHandle, JobKind, JobQueue, JobStatus, autotest::RunTask},
    resources::{Task, TaskStatus},
    validate::{Checks, FieldError, Validate},
};
use axum::extract::Extension;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

const MAX_ITEMS: usize = 10_000;

#[derive(Debug, Deserialize, IntoParams)]
pub struct StatusQuery {
    pub task_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitRequest {
    #[schema(value_type = Vec<Object>)]
    pub items: Vec<Value>,
}

impl Validate for SubmitRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .check(
                "items",
                (1..=MAX_ITEMS).contains(&self.items.len()),
                &format!("between 1 and {MAX_ITEMS} items required"),
            )
            .finish()
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/autotest/task/run",
    request_body = RunTask,
    responses(
        (status = 200, description = "Run enqueued", body = JobHandle),
        (status = 400, description = "Task is already running", body = ErrorBody),
        (status = 404, description = "Task does not exist or is not visible", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "jobs",
)]
/// Enqueue a run of a task's cases. Returns immediately with the job id.
pub async fn run_task(
    Extension(tasks): Extension<CrudService<Task>>,
    Extension(queue): Extension<Arc<dyn JobQueue>>,
    context: AuthContext,
    input: Input,
) -> Result<Success<JobHandle>, Error> {
    let grant = context.authorize(Permission::TaskRun)?;
    let run: RunTask = input.valid_json()?;
    let task = tasks.get(&grant, run.task_id).await?;
    if task.status == TaskStatus::Running {
        return Err(Error::domain(format!("task {} is already running", run.task_id)));
    }

    let handle = queue
        .submit(
            JobKind::AutotestRun {
                task_id: run.task_id,
                cases: run.cases,
            },
            grant.user_id(),
        )
        .await?;
    Ok(Success::new(handle, "submitted"))
}

#[utoipa::path(
    post,
    path = "/api/v1/jobs/submit",
    request_body = SubmitRequest,
    responses(
        (status = 200, description = "Job enqueued", body = JobHandle),
        (status = 422, description = "No items or too many", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "jobs",
)]
pub async fn submit(
    Extension(queue): Extension<Arc<dyn JobQueue>>,
    context: AuthContext,
    input: Input,
) -> Result<Success<JobHandle>, Error> {
    let grant = context.authorize(Permission::JobSubmit)?;
    let request: SubmitRequest = input.valid_json()?;
    let handle = queue
        .submit(
            JobKind::Process {
                items: request.items,
            },
            grant.user_id(),
        )
        .await?;
    Ok(Success::new(handle, "submitted"))
}

#[utoipa::path(
    get,
    path = "/api/v1/jobs/status",
    params(StatusQuery),
    responses(
        (status = 200, description = "Latest job status", body = JobStatus),
        (status = 404, description = "Unknown, expired or not visible job", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "jobs",
)]
pub async fn status(
    Extension(queue): Extension<Arc<dyn JobQueue>>,
    context: AuthContext,
    input: Input,
) -> Result<Success<JobStatus>, Error> {
    let grant = context.authorize(Permission::JobQuery)?;
    let query: StatusQuery = input.query()?;
    let status = queue
        .status(&query.task_id)
        .await?
        .filter(|status| grant.visibility().allows(Some(status.submitted_by)))
        .ok_or_else(|| Error::not_found("job", &query.task_id))?;
    Ok(Success::new(status, "success"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{PermissionSet, Principal, TokenRef},
        cache::MemoryCache,
        jobs::{LocalQueue, StatusBoard},
        store::Visibility,
    };
    use axum::{body::Body, extract::FromRequest, http::Request};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn context(user_id: i64, permissions: &[Permission], visibility: Visibility) -> AuthContext {
        AuthContext {
            principal: Principal {
                user_id,
                username: format!("user{user_id}"),
                name: format!("User {user_id}"),
                role_ids: Vec::new(),
                dept_id: None,
            },
            permissions: permissions.iter().copied().collect::<PermissionSet>(),
            visibility,
            token: TokenRef {
                jti: "jti".to_string(),
                expires_at: 0,
            },
        }
    }

    async fn input(uri: &str) -> Input {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap_or_else(|err| panic!("request: {err}"));
        Input::from_request(request, &())
            .await
            .unwrap_or_else(|err| panic!("input: {err}"))
    }

    fn own_only(user_id: i64) -> Visibility {
        Visibility::Creators(BTreeSet::from([user_id]))
    }

    #[tokio::test]
    async fn status_is_scoped_to_the_submitter() -> anyhow::Result<()> {
        let (queue, _rx) = LocalQueue::new(StatusBoard::new(Arc::new(MemoryCache::new("test"))));
        let queue: Arc<dyn JobQueue> = Arc::new(queue);
        let handle = queue
            .submit(JobKind::Process { items: vec![json!(1)] }, 7)
            .await?;
        let uri = format!("/api/v1/jobs/status?task_id={}", handle.task_id);

        let owner = context(7, &[Permission::JobQuery], own_only(7));
        let found = status(Extension(queue.clone()), owner, input(&uri).await).await?;
        let body = serde_json::to_value(&found)?;
        assert_eq!(body["data"]["status"], json!("PENDING"));
        assert_eq!(body["data"]["submitted_by"], json!(7));

        let admin = context(1, &[Permission::JobQuery], Visibility::All);
        assert!(status(Extension(queue.clone()), admin, input(&uri).await).await.is_ok());

        let other = context(8, &[Permission::JobQuery], own_only(8));
        assert!(matches!(
            status(Extension(queue), other, input(&uri).await).await,
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn permission_is_checked_before_the_query_string() {
        let (queue, _rx) = LocalQueue::new(StatusBoard::new(Arc::new(MemoryCache::new("test"))));
        let queue: Arc<dyn JobQueue> = Arc::new(queue);
        let nobody = context(9, &[], Visibility::All);
        assert!(matches!(
            status(Extension(queue), nobody, input("/api/v1/jobs/status").await).await,
            Err(Error::Auth(_))
        ));
    }

    #[test]
    fn submit_needs_items() {
        let empty = SubmitRequest { items: Vec::new() };
        assert!(empty.validate().is_err());

        let one = SubmitRequest {
            items: vec![json!({"a": 1})],
        };
        assert!(one.validate().is_ok());
    }
}
