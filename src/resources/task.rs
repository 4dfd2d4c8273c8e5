use super::{ActionPermissions, AuditMeta, Resource, UnknownVariant};
use crate::{
    auth::Permission,
    error::Error,
    store::{FieldValue, Filter},
    validate::{Checks, FieldError, Validate},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(UnknownVariant {
                kind: "task status",
                value,
            }),
        }
    }
}

/// Record of one auto-test run. Counters and logs are written by the job worker.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Task {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub meta: AuditMeta,
    pub name: String,
    pub environment_id: Option<i64>,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_count: i64,
    pub success_count: i64,
    pub fail_count: i64,
    pub skip_count: i64,
    pub error_count: i64,
    pub summary: Option<Value>,
    pub logs: Option<Value>,
}

impl Task {
    /// Reset counters and mark the task as running.
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.start_time = Some(now);
        self.end_time = None;
        self.total_count = 0;
        self.success_count = 0;
        self.fail_count = 0;
        self.skip_count = 0;
        self.error_count = 0;
        self.logs = Some(Value::Array(Vec::new()));
        self.meta.touch(now);
    }

    /// Close the run; the task fails when any case failed or errored.
    pub fn finish(&mut self, summary: Value, now: DateTime<Utc>) {
        self.status = if self.fail_count + self.error_count > 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };
        self.end_time = Some(now);
        self.summary = Some(summary);
        self.meta.touch(now);
    }

    pub fn log(&mut self, line: impl Into<String>) {
        let line = Value::String(line.into());
        match self.logs.as_mut() {
            Some(Value::Array(lines)) => lines.push(line),
            _ => self.logs = Some(Value::Array(vec![line])),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TaskCreate {
    pub name: String,
    pub environment_id: Option<i64>,
    pub description: Option<String>,
}

impl Validate for TaskCreate {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .length("name", &self.name, 1, 100)
            .optional_length("description", self.description.as_deref(), 0, 255)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub environment_id: Option<i64>,
    pub description: Option<String>,
}

impl Validate for TaskUpdate {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .optional_length("name", self.name.as_deref(), 1, 100)
            .optional_length("description", self.description.as_deref(), 0, 255)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskQuery {
    pub name: Option<String>,
    pub status: Option<TaskStatus>,
    pub environment_id: Option<i64>,
    pub available: Option<bool>,
}

impl Resource for Task {
    const KIND: &'static str = "task";
    const LABEL: &'static str = "tasks";
    const TABLE: &'static str = "autotest_task";
    const PERMISSIONS: ActionPermissions = ActionPermissions {
        query: Permission::TaskQuery,
        create: Permission::TaskCreate,
        update: Permission::TaskUpdate,
        delete: Permission::TaskDelete,
        patch: Permission::TaskPatch,
        export: Permission::TaskExport,
    };
    const SORTABLE: &'static [&'static str] =
        &["id", "name", "status", "start_time", "end_time", "created_at"];
    const EXPORT: &'static [(&'static str, &'static str)] = &[
        ("id", "ID"),
        ("name", "Name"),
        ("environment_id", "Environment"),
        ("status", "Status"),
        ("start_time", "Started"),
        ("end_time", "Finished"),
        ("total_count", "Total"),
        ("success_count", "Passed"),
        ("fail_count", "Failed"),
        ("skip_count", "Skipped"),
        ("error_count", "Errors"),
    ];

    type Create = TaskCreate;
    type Update = TaskUpdate;
    type Query = TaskQuery;

    fn meta(&self) -> &AuditMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut AuditMeta {
        &mut self.meta
    }

    fn create(payload: TaskCreate, mut meta: AuditMeta) -> Result<Self, Error> {
        meta.description = payload.description;
        Ok(Self {
            meta,
            name: payload.name.trim().to_string(),
            environment_id: payload.environment_id,
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
        })
    }

    fn apply(&mut self, changes: TaskUpdate) -> Result<(), Error> {
        if self.status == TaskStatus::Running {
            return Err(Error::domain("a running task cannot be modified"));
        }
        if let Some(name) = changes.name {
            self.name = name.trim().to_string();
        }
        if changes.environment_id.is_some() {
            self.environment_id = changes.environment_id;
        }
        if changes.description.is_some() {
            self.meta.description = changes.description;
        }
        Ok(())
    }

    fn filter(query: &TaskQuery) -> Filter {
        Filter::new()
            .contains("name", query.name.as_deref())
            .equals("status", query.status.map(TaskStatus::as_str))
            .equals("environment_id", query.environment_id)
            .equals("available", query.available)
    }

    fn field(&self, column: &str) -> Option<FieldValue> {
        Some(match column {
            "name" => FieldValue::from(self.name.as_str()),
            "environment_id" => FieldValue::Int(self.environment_id),
            "status" => FieldValue::from(self.status.as_str()),
            "start_time" => FieldValue::Timestamp(self.start_time),
            "end_time" => FieldValue::Timestamp(self.end_time),
            "total_count" => FieldValue::from(self.total_count),
            "success_count" => FieldValue::from(self.success_count),
            "fail_count" => FieldValue::from(self.fail_count),
            "skip_count" => FieldValue::from(self.skip_count),
            "error_count" => FieldValue::from(self.error_count),
            "summary" => FieldValue::Json(self.summary.clone()),
            "logs" => FieldValue::Json(self.logs.clone()),
            _ => return None,
        })
    }

    fn columns(&self) -> Vec<(&'static str, FieldValue)> {
        [
            "name",
            "environment_id",
            "status",
            "start_time",
            "end_time",
            "total_count",
            "success_count",
            "fail_count",
            "skip_count",
            "error_count",
            "summary",
            "logs",
        ]
        .into_iter()
        .filter_map(|column| self.field(column).map(|value| (column, value)))
        .collect()
    }

    fn guard_delete(&self) -> Result<(), Error> {
        if self.status == TaskStatus::Running {
            Err(Error::domain(format!(
                "task '{}' is running and cannot be deleted",
                self.name
            )))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task() -> Task {
        Task::create(
            TaskCreate {
                name: "smoke".to_string(),
                environment_id: Some(1),
                description: None,
            },
            AuditMeta::new(Some(1), Utc::now()),
        )
        .unwrap_or_else(|err| panic!("task create failed: {err}"))
    }

    #[test]
    fn run_lifecycle() {
        let mut task = task();
        assert_eq!(task.status, TaskStatus::Pending);

        task.start(Utc::now());
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.guard_delete().is_err());

        task.total_count = 2;
        task.success_count = 1;
        task.fail_count = 1;
        task.log("case 2 failed");
        task.finish(json!({"passed": 1}), Utc::now());

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.end_time >= task.start_time);
        assert_eq!(task.logs, Some(json!(["case 2 failed"])));
        assert!(task.guard_delete().is_ok());
    }

    #[test]
    fn running_task_rejects_updates() {
        let mut task = task();
        task.start(Utc::now());
        let result = task.apply(TaskUpdate {
            name: Some("renamed".to_string()),
            environment_id: None,
            description: None,
        });
        assert!(matches!(result, Err(Error::Domain { .. })));
    }

    #[test]
    fn status_text_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::try_from(status.as_str().to_string()), Ok(status));
        }
    }
}
