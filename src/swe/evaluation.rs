//! Client for the evaluation service.
//!
//! The service runs the benchmark tests inside its own container against the
//! repository mounted at `repoDir` and answers with a `harnessOutput` field:
//! a JSON document (usually encoded as a string) keyed by instance id.
//!
//! ```text
//! {"x__y-1": {"tests_status": {
//!     "FAIL_TO_PASS": {"success": [...], "failure": [...]},
//!     "PASS_TO_PASS": {"success": [...], "failure": [...]}
//! }}}
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::ServiceError;

/// Default base URL of the evaluation service.
pub const DEFAULT_EVAL_API_URL: &str = "http://localhost:8082";

/// Evaluation runs the full test suite; allow it plenty of time.
const EVAL_TIMEOUT_SECS: u64 = 1800;

/// Body of `POST {base_url}/test`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub instance_id: String,
    #[serde(rename = "repoDir")]
    pub repo_dir: String,
    #[serde(rename = "FAIL_TO_PASS")]
    pub fail_to_pass: Vec<String>,
    #[serde(rename = "PASS_TO_PASS")]
    pub pass_to_pass: Vec<String>,
}

/// Passed / total counts of one test group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub passed: usize,
    pub total: usize,
}

impl TestCounts {
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

impl fmt::Display for TestCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.passed, self.total)
    }
}

/// Parsed evaluation outcome for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub instance_id: String,
    pub fail_to_pass: TestCounts,
    pub pass_to_pass: TestCounts,
}

impl EvaluationResult {
    /// The task counts as resolved when every listed test passes.
    pub fn resolved(&self) -> bool {
        self.fail_to_pass.all_passed() && self.pass_to_pass.all_passed()
    }
}

#[derive(Debug, Deserialize)]
struct EvaluationResponse {
    #[serde(rename = "harnessOutput")]
    harness_output: Option<Value>,
}

/// Parse a harness output document.
///
/// `raw` may be the JSON-encoded string the service sends or an already
/// decoded object. The entry for `expected_instance` is used when present,
/// otherwise the first entry.
pub fn parse_harness_output(
    raw: &Value,
    expected_instance: &str,
) -> Result<EvaluationResult, ServiceError> {
    let decoded;
    let document = match raw {
        Value::String(text) if text.trim().is_empty() => {
            return Err(ServiceError::EmptyHarnessOutput)
        }
        Value::String(text) => {
            decoded = serde_json::from_str::<Value>(text).map_err(|e| ServiceError::Decode {
                url: "harnessOutput".to_string(),
                message: e.to_string(),
            })?;
            &decoded
        }
        other => other,
    };

    let entries = match document {
        Value::Object(map) if map.is_empty() => return Err(ServiceError::EmptyHarnessOutput),
        Value::Object(map) => map,
        Value::Null => return Err(ServiceError::EmptyHarnessOutput),
        _ => {
            return Err(ServiceError::Decode {
                url: "harnessOutput".to_string(),
                message: "expected an object keyed by instance id".to_string(),
            })
        }
    };

    let (instance_id, entry) = match entries.get_key_value(expected_instance) {
        Some(found) => found,
        None => entries.iter().next().ok_or(ServiceError::EmptyHarnessOutput)?,
    };

    let status = entry
        .get("tests_status")
        .ok_or_else(|| ServiceError::MissingField("tests_status".to_string()))?;

    Ok(EvaluationResult {
        instance_id: instance_id.clone(),
        fail_to_pass: count_group(status, "FAIL_TO_PASS")?,
        pass_to_pass: count_group(status, "PASS_TO_PASS")?,
    })
}

fn count_group(status: &Value, group: &str) -> Result<TestCounts, ServiceError> {
    let results = status
        .get(group)
        .ok_or_else(|| ServiceError::MissingField(format!("tests_status.{}", group)))?;

    let list_len = |key: &str| -> Result<usize, ServiceError> {
        results
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::len)
            .ok_or_else(|| ServiceError::MissingField(format!("tests_status.{}.{}", group, key)))
    };

    let passed = list_len("success")?;
    let failed = list_len("failure")?;
    Ok(TestCounts {
        passed,
        total: passed + failed,
    })
}

/// Runs the benchmark tests for a prepared repository.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest)
        -> Result<EvaluationResult, ServiceError>;
}

/// HTTP implementation of [`Evaluator`].
pub struct HttpEvaluator {
    client: Client,
    base_url: String,
}

impl HttpEvaluator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(EVAL_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn test_url(&self) -> String {
        format!("{}/test", self.base_url)
    }
}

#[async_trait]
impl Evaluator for HttpEvaluator {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<EvaluationResult, ServiceError> {
        let url = self.test_url();
        tracing::info!(
            instance_id = %request.instance_id,
            repo_dir = %request.repo_dir,
            "Submitting repository for evaluation"
        );

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ServiceError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                url,
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let payload: EvaluationResponse =
            response.json().await.map_err(|e| ServiceError::Decode {
                url: url.clone(),
                message: e.to_string(),
            })?;
        let raw = payload
            .harness_output
            .unwrap_or_else(|| Value::String("{}".to_string()));

        let result = parse_harness_output(&raw, &request.instance_id)?;
        tracing::info!(
            instance_id = %result.instance_id,
            fail_to_pass = %result.fail_to_pass,
            pass_to_pass = %result.pass_to_pass,
            "Evaluation finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swe::test_server::serve_once;
    use serde_json::json;

    fn harness_doc() -> Value {
        json!({
            "x__y-1": {"tests_status": {
                "FAIL_TO_PASS": {"success": ["t1", "t2"], "failure": ["t3"]},
                "PASS_TO_PASS": {"success": ["t4"], "failure": []}
            }}
        })
    }

    #[test]
    fn test_parse_counts_from_encoded_string() {
        let raw = Value::String(harness_doc().to_string());
        let result = parse_harness_output(&raw, "x__y-1").unwrap();

        assert_eq!(result.fail_to_pass.to_string(), "2/3");
        assert_eq!(result.pass_to_pass.to_string(), "1/1");
        assert!(!result.resolved());
    }

    #[test]
    fn test_parse_counts_from_object() {
        let result = parse_harness_output(&harness_doc(), "other").unwrap();
        assert_eq!(result.instance_id, "x__y-1");
        assert_eq!(result.fail_to_pass, TestCounts { passed: 2, total: 3 });
    }

    #[test]
    fn test_parse_prefers_expected_instance() {
        let doc = json!({
            "a": {"tests_status": {
                "FAIL_TO_PASS": {"success": [], "failure": ["x"]},
                "PASS_TO_PASS": {"success": [], "failure": []}
            }},
            "b": {"tests_status": {
                "FAIL_TO_PASS": {"success": ["x"], "failure": []},
                "PASS_TO_PASS": {"success": [], "failure": []}
            }}
        });
        let result = parse_harness_output(&doc, "b").unwrap();
        assert_eq!(result.instance_id, "b");
        assert!(result.resolved());
    }

    #[test]
    fn test_parse_empty_output() {
        for raw in [
            Value::String("{}".to_string()),
            Value::String(String::new()),
            json!({}),
            Value::Null,
        ] {
            assert!(matches!(
                parse_harness_output(&raw, "i"),
                Err(ServiceError::EmptyHarnessOutput)
            ));
        }
    }

    #[test]
    fn test_parse_missing_group() {
        let doc = json!({"i": {"tests_status": {"FAIL_TO_PASS": {"success": [], "failure": []}}}});
        let err = parse_harness_output(&doc, "i").unwrap_err();
        assert!(matches!(err, ServiceError::MissingField(f) if f == "tests_status.PASS_TO_PASS"));
    }

    #[test]
    fn test_request_wire_names() {
        let request = EvaluationRequest {
            instance_id: "x__y-1".into(),
            repo_dir: "/repos/repo_1".into(),
            fail_to_pass: vec!["t1".into()],
            pass_to_pass: vec![],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["repoDir"], "/repos/repo_1");
        assert_eq!(value["FAIL_TO_PASS"], json!(["t1"]));
        assert_eq!(value["PASS_TO_PASS"], json!([]));
    }

    #[tokio::test]
    async fn test_evaluate_over_http() {
        let body = json!({"harnessOutput": harness_doc().to_string()}).to_string();
        let (base, request) = serve_once(200, &body).await;
        let evaluator = HttpEvaluator::new(base);

        let result = evaluator
            .evaluate(&EvaluationRequest {
                instance_id: "x__y-1".into(),
                repo_dir: "/repos/repo_1".into(),
                fail_to_pass: vec!["t1".into(), "t2".into(), "t3".into()],
                pass_to_pass: vec!["t4".into()],
            })
            .await
            .unwrap();

        assert_eq!(result.fail_to_pass.to_string(), "2/3");
        let recorded = request.await.unwrap();
        assert_eq!(recorded.method, axum::http::Method::POST);
        assert_eq!(recorded.path, "/test");
        assert!(recorded.body.contains("\"repoDir\":\"/repos/repo_1\""));
    }

    #[tokio::test]
    async fn test_evaluate_missing_harness_output() {
        let (base, _request) = serve_once(200, r#"{"status": "ok"}"#).await;
        let err = HttpEvaluator::new(base)
            .evaluate(&EvaluationRequest {
                instance_id: "i".into(),
                repo_dir: "/repos/repo_1".into(),
                fail_to_pass: vec![],
                pass_to_pass: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::EmptyHarnessOutput));
    }

    #[tokio::test]
    async fn test_evaluate_server_error() {
        let (base, _request) = serve_once(500, r#"{"error": "boom"}"#).await;
        let err = HttpEvaluator::new(base)
            .evaluate(&EvaluationRequest {
                instance_id: "i".into(),
                repo_dir: "/r".into(),
                fail_to_pass: vec![],
                pass_to_pass: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Status { status: 500, .. }));
    }
}
