//! Client for the task-index service.
//!
//! `GET {base_url}/{index}` returns one benchmark task. The test lists are
//! usually JSON-encoded strings (`"[\"tests/a.py::t\"]"`) but native arrays
//! are accepted as well; missing lists are empty.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::TaskSpec;
use crate::error::ServiceError;

/// Default base URL of the task-index service.
pub const DEFAULT_TASK_API_URL: &str = "http://localhost:8081/task/index";

/// Source of benchmark tasks.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Fetch the task stored under `index`.
    async fn fetch(&self, index: u32) -> Result<TaskSpec, ServiceError>;
}

/// A test list as it appears on the wire.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTestList {
    Encoded(String),
    List(Vec<String>),
}

impl WireTestList {
    fn decode(self, field: &str, url: &str) -> Result<Vec<String>, ServiceError> {
        match self {
            Self::List(list) => Ok(list),
            Self::Encoded(text) if text.trim().is_empty() => Ok(Vec::new()),
            Self::Encoded(text) => {
                serde_json::from_str(&text).map_err(|e| ServiceError::Decode {
                    url: url.to_string(),
                    message: format!("{} is not a JSON list: {}", field, e),
                })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireTask {
    #[serde(rename = "Problem_statement")]
    problem_statement: Option<String>,
    git_clone: Option<String>,
    #[serde(rename = "FAIL_TO_PASS")]
    fail_to_pass: Option<WireTestList>,
    #[serde(rename = "PASS_TO_PASS")]
    pass_to_pass: Option<WireTestList>,
    instance_id: Option<String>,
}

/// Decode a task payload served under `index`.
pub fn decode_task(index: u32, body: &str, url: &str) -> Result<TaskSpec, ServiceError> {
    let wire: WireTask = serde_json::from_str(body).map_err(|e| ServiceError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let decode_list = |list: Option<WireTestList>, field: &str| match list {
        Some(list) => list.decode(field, url),
        None => Ok(Vec::new()),
    };

    Ok(TaskSpec {
        index,
        instance_id: wire
            .instance_id
            .ok_or_else(|| ServiceError::MissingField("instance_id".to_string()))?,
        problem_statement: wire
            .problem_statement
            .ok_or_else(|| ServiceError::MissingField("Problem_statement".to_string()))?,
        git_clone: wire
            .git_clone
            .ok_or_else(|| ServiceError::MissingField("git_clone".to_string()))?,
        fail_to_pass: decode_list(wire.fail_to_pass, "FAIL_TO_PASS")?,
        pass_to_pass: decode_list(wire.pass_to_pass, "PASS_TO_PASS")?,
    })
}

/// HTTP implementation of [`TaskSource`].
pub struct HttpTaskSource {
    client: Client,
    base_url: String,
}

impl HttpTaskSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn task_url(&self, index: u32) -> String {
        format!("{}/{}", self.base_url, index)
    }
}

#[async_trait]
impl TaskSource for HttpTaskSource {
    async fn fetch(&self, index: u32) -> Result<TaskSpec, ServiceError> {
        let url = self.task_url(index);
        tracing::debug!(url = %url, "Fetching task");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ServiceError::Transport {
            url: url.clone(),
            message: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(ServiceError::Status {
                url,
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let task = decode_task(index, &body, &url)?;
        tracing::info!(
            index = index,
            instance_id = %task.instance_id,
            prompt_chars = task.problem_statement.len(),
            "Fetched task"
        );
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swe::test_server::serve_once;

    const TASK_JSON: &str = r#"{
        "Problem_statement": "Division by zero in compute()",
        "git_clone": "git clone https://github.com/x/y && git checkout abc123",
        "FAIL_TO_PASS": "[\"tests/test_a.py::test_div\"]",
        "PASS_TO_PASS": "[\"tests/test_a.py::test_add\", \"tests/test_a.py::test_sub\"]",
        "instance_id": "x__y-1"
    }"#;

    #[test]
    fn test_decode_encoded_lists() {
        let task = decode_task(1, TASK_JSON, "u").unwrap();
        assert_eq!(task.instance_id, "x__y-1");
        assert_eq!(task.fail_to_pass, vec!["tests/test_a.py::test_div"]);
        assert_eq!(task.pass_to_pass.len(), 2);
    }

    #[test]
    fn test_decode_native_lists_and_missing() {
        let body = r#"{
            "Problem_statement": "p",
            "git_clone": "git clone u",
            "FAIL_TO_PASS": ["t1", "t2"],
            "instance_id": "i"
        }"#;
        let task = decode_task(6, body, "u").unwrap();
        assert_eq!(task.fail_to_pass, vec!["t1", "t2"]);
        assert!(task.pass_to_pass.is_empty());
        assert_eq!(task.index, 6);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode_task(1, r#"{"git_clone": "g", "instance_id": "i"}"#, "u"),
            Err(ServiceError::MissingField(f)) if f == "Problem_statement"
        ));
        assert!(matches!(
            decode_task(
                1,
                r#"{"Problem_statement": "p", "git_clone": "g", "instance_id": "i", "FAIL_TO_PASS": "not json"}"#,
                "u"
            ),
            Err(ServiceError::Decode { .. })
        ));
        assert!(matches!(
            decode_task(1, "<html>", "u"),
            Err(ServiceError::Decode { .. })
        ));
    }

    #[test]
    fn test_task_url() {
        let source = HttpTaskSource::new("http://localhost:8081/task/index/");
        assert_eq!(source.task_url(11), "http://localhost:8081/task/index/11");
    }

    #[tokio::test]
    async fn test_fetch_over_http() {
        let (base, request) = serve_once(200, TASK_JSON).await;
        let source = HttpTaskSource::new(format!("{}/task/index/", base));

        let task = source.fetch(1).await.unwrap();
        assert_eq!(task.problem_statement, "Division by zero in compute()");
        let recorded = request.await.unwrap();
        assert_eq!(recorded.method, axum::http::Method::GET);
        assert_eq!(recorded.path, "/task/index/1");
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let (base, _request) = serve_once(404, r#"{"detail": "not found"}"#).await;
        let source = HttpTaskSource::new(base);

        let err = source.fetch(999).await.unwrap_err();
        assert!(matches!(err, ServiceError::Status { status: 404, .. }));
    }
}
