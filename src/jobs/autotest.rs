//! HTTP test cases executed by auto-test runs.
//!
//! A case is one request against the task's environment. `{{name}}`
//! placeholders in the path are filled from the environment variables before
//! the request is sent.

use crate::validate::{Checks, FieldError, Validate};
use regex::{Captures, Regex};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::debug;
use utoipa::ToSchema;

pub const MAX_CASES: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TestCase {
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Path relative to the environment base URL.
    pub path: String,
    #[serde(default = "default_status")]
    pub expected_status: u16,
    #[schema(value_type = Option<Object>)]
    pub body: Option<Value>,
    #[serde(default)]
    pub skip: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

const fn default_status() -> u16 {
    200
}

fn valid_method(method: &str) -> bool {
    matches!(
        method.to_ascii_uppercase().as_str(),
        "GET" | "POST" | "PUT" | "PATCH" | "DELETE" | "HEAD" | "OPTIONS"
    )
}

/// Body of `POST /autotest/task/run`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RunTask {
    pub task_id: i64,
    pub cases: Vec<TestCase>,
}

impl Validate for RunTask {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut checks = Checks::new().check(
            "cases",
            (1..=MAX_CASES).contains(&self.cases.len()),
            &format!("between 1 and {MAX_CASES} cases required"),
        );
        for (idx, case) in self.cases.iter().enumerate() {
            checks = checks
                .length(&format!("cases[{idx}].name"), &case.name, 1, 100)
                .check(
                    &format!("cases[{idx}].method"),
                    valid_method(&case.method),
                    "unsupported HTTP method",
                )
                .check(
                    &format!("cases[{idx}].path"),
                    case.path.starts_with('/'),
                    "must start with '/'",
                )
                .check(
                    &format!("cases[{idx}].expected_status"),
                    (100..=599).contains(&case.expected_status),
                    "must be an HTTP status code",
                );
        }
        checks.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
    /// The request could not be sent or no response arrived.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub name: String,
    pub outcome: Outcome,
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    pub message: Option<String>,
}

impl CaseResult {
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    #[must_use]
    pub fn log_line(&self) -> String {
        let status = self
            .status
            .map_or_else(|| "-".to_string(), |status| status.to_string());
        format!(
            "[{:?}] {} status={status} {}ms{}",
            self.outcome,
            self.name,
            self.elapsed_ms,
            self.message
                .as_deref()
                .map(|message| format!(" ({message})"))
                .unwrap_or_default()
        )
    }
}

/// Replace `{{name}}` with the matching variable; unknown names are kept.
#[must_use]
pub fn substitute(template: &str, variables: &Value) -> String {
    let Ok(re) = Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}") else {
        return template.to_string();
    };
    re.replace_all(template, |caps: &Captures| {
        match variables.get(&caps[1]) {
            Some(Value::String(value)) => value.clone(),
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        }
    })
    .into_owned()
}

/// Send one case and classify the response.
pub async fn run_case(client: &Client, base_url: &str, variables: &Value, case: &TestCase) -> CaseResult {
    let mut result = CaseResult {
        name: case.name.clone(),
        outcome: Outcome::Skipped,
        status: None,
        elapsed_ms: 0,
        message: None,
    };
    if case.skip {
        return result;
    }

    let method = match Method::from_bytes(case.method.to_ascii_uppercase().as_bytes()) {
        Ok(method) => method,
        Err(err) => {
            result.outcome = Outcome::Error;
            result.message = Some(err.to_string());
            return result;
        }
    };

    let url = format!("{base_url}{}", substitute(&case.path, variables));
    let mut request = client.request(method, &url);
    if let Some(body) = &case.body {
        request = request.json(body);
    }

    let started = Instant::now();
    let response = request.send().await;
    result.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match response {
        Ok(response) => {
            let status = response.status().as_u16();
            result.status = Some(status);
            if status == case.expected_status {
                result.outcome = Outcome::Passed;
            } else {
                result.outcome = Outcome::Failed;
                result.message = Some(format!("expected {}", case.expected_status));
            }
        }
        Err(err) => {
            debug!(case = %case.name, %url, "request failed: {err}");
            result.outcome = Outcome::Error;
            result.message = Some(if err.is_timeout() {
                "request timed out".to_string()
            } else {
                "request failed".to_string()
            });
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn case(path: &str) -> TestCase {
        TestCase {
            name: "ping".to_string(),
            method: "get".to_string(),
            path: path.to_string(),
            expected_status: 200,
            body: None,
            skip: false,
        }
    }

    #[test]
    fn placeholders_are_filled_from_variables() {
        let variables = json!({"user": "alice", "id": 7});
        assert_eq!(substitute("/users/{{user}}/{{ id }}", &variables), "/users/alice/7");
        assert_eq!(substitute("/x/{{missing}}", &variables), "/x/{{missing}}");
    }

    #[test]
    fn run_request_validation_lists_each_case() {
        let mut bad = case("health");
        bad.method = "BREW".to_string();
        let request = RunTask {
            task_id: 1,
            cases: vec![case("/health"), bad],
        };
        let errors = request.validate().err().unwrap_or_default();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["cases[1].method", "cases[1].path"]);

        let empty = RunTask {
            task_id: 1,
            cases: Vec::new(),
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn defaults_apply_when_fields_are_missing() -> Result<(), serde_json::Error> {
        let case: TestCase = serde_json::from_value(json!({"name": "root", "path": "/"}))?;
        assert_eq!(case.method, "GET");
        assert_eq!(case.expected_status, 200);
        assert!(!case.skip);
        Ok(())
    }

    #[tokio::test]
    async fn skipped_cases_send_nothing() {
        let mut skipped = case("/never");
        skipped.skip = true;
        let result = run_case(&Client::new(), "http://127.0.0.1:9", &json!({}), &skipped).await;
        assert_eq!(result.outcome, Outcome::Skipped);
        assert_eq!(result.status, None);
    }
}
