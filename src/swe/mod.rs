//! SWE-bench task and evaluation services.
//!
//! This module holds the task model and the clients of the two external
//! services a run talks to:
//! - the task-index service, which serves one [`TaskSpec`] per index
//! - the evaluation service, which runs the benchmark tests against a
//!   repository directory and reports pass/fail lists

pub mod evaluation;
pub mod task_client;

#[cfg(test)]
pub(crate) mod test_server;

pub use evaluation::{
    parse_harness_output, EvaluationRequest, EvaluationResult, Evaluator, HttpEvaluator,
    TestCounts, DEFAULT_EVAL_API_URL,
};
pub use task_client::{decode_task, HttpTaskSource, TaskSource, DEFAULT_TASK_API_URL};

use serde::{Deserialize, Serialize};

use crate::error::WorkspaceError;

/// Checkout target used when the clone instruction names none.
pub const DEFAULT_CHECKOUT: &str = "main";

/// A benchmark task as served by the task-index service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Index the task was fetched with.
    pub index: u32,
    /// Benchmark instance identifier (e.g. `astropy__astropy-12907`).
    pub instance_id: String,
    /// Issue text handed to the agents.
    pub problem_statement: String,
    /// Raw `git clone <url> && git checkout <ref>` instruction.
    pub git_clone: String,
    /// Tests that must go from failing to passing.
    pub fail_to_pass: Vec<String>,
    /// Tests that must keep passing.
    pub pass_to_pass: Vec<String>,
}

impl TaskSpec {
    /// Repository URL and checkout target of this task.
    pub fn clone_instruction(&self) -> Result<CloneInstruction, WorkspaceError> {
        parse_clone_instruction(&self.git_clone)
    }
}

/// Parsed form of a clone instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneInstruction {
    pub repo_url: String,
    pub checkout: String,
}

/// Parse `git clone <url> [&& git checkout <ref>]`.
///
/// Only the URL and the final checkout target are used; a missing checkout
/// defaults to [`DEFAULT_CHECKOUT`].
pub fn parse_clone_instruction(instruction: &str) -> Result<CloneInstruction, WorkspaceError> {
    let invalid = || WorkspaceError::InvalidCloneInstruction(instruction.to_string());

    let parts: Vec<&str> = instruction.split("&&").map(str::trim).collect();
    let clone_words: Vec<&str> = parts.first().ok_or_else(invalid)?.split_whitespace().collect();
    let repo_url = match clone_words.as_slice() {
        ["git", "clone", url, ..] => *url,
        _ => return Err(invalid()),
    };
    if repo_url.starts_with('-') {
        return Err(invalid());
    }

    let checkout = match parts.get(1..).and_then(|rest| rest.last()) {
        Some(last) => {
            let words: Vec<&str> = last.split_whitespace().collect();
            match words.as_slice() {
                ["git", "checkout", .., target] => target.to_string(),
                _ => return Err(invalid()),
            }
        }
        None => DEFAULT_CHECKOUT.to_string(),
    };
    validate_git_ref(&checkout)?;

    Ok(CloneInstruction {
        repo_url: repo_url.to_string(),
        checkout,
    })
}

/// Validate a git ref (commit SHA, branch name) before handing it to git.
///
/// Accepts hex-only SHAs (short or full) and standard git ref names
/// (alphanumeric, `/`, `.`, `-`, `_`). Rejects `..` sequences and refs
/// starting with `-` (flag injection).
pub fn validate_git_ref(s: &str) -> Result<(), WorkspaceError> {
    let invalid = |reason: String| WorkspaceError::InvalidRef {
        reference: s.to_string(),
        reason,
    };
    if s.is_empty() {
        return Err(invalid("git ref is empty".to_string()));
    }
    if s.len() > 256 {
        return Err(invalid(format!("too long ({} chars, max 256)", s.len())));
    }
    if s.starts_with('-') {
        return Err(invalid(
            "must not start with '-' (could be interpreted as a flag)".to_string(),
        ));
    }
    if s.contains("..") {
        return Err(invalid("must not contain '..'".to_string()));
    }
    if let Some(ch) = s
        .chars()
        .find(|ch| !matches!(ch, 'a'..='z' | 'A'..='Z' | '0'..='9' | '/' | '.' | '-' | '_' | '~' | '^'))
    {
        return Err(invalid(format!(
            "invalid character '{}': only alphanumeric, /, ., -, _, ~, ^ allowed",
            ch
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clone_with_checkout() {
        let parsed =
            parse_clone_instruction("git clone https://github.com/x/y && git checkout abc123")
                .unwrap();
        assert_eq!(parsed.repo_url, "https://github.com/x/y");
        assert_eq!(parsed.checkout, "abc123");
    }

    #[test]
    fn test_parse_clone_defaults_to_main() {
        let parsed = parse_clone_instruction("git clone https://github.com/x/y").unwrap();
        assert_eq!(parsed.checkout, "main");
    }

    #[test]
    fn test_parse_clone_uses_last_checkout() {
        let parsed = parse_clone_instruction(
            "git clone https://github.com/x/y && git fetch && git checkout -q 0a1b2c",
        )
        .unwrap();
        assert_eq!(parsed.checkout, "0a1b2c");
    }

    #[test]
    fn test_parse_clone_rejects_garbage() {
        for bad in [
            "",
            "curl https://x",
            "git clone",
            "git clone --upload-pack=evil x",
            "git clone https://github.com/x/y && rm -rf /",
            "git clone https://github.com/x/y && git checkout ../../etc",
        ] {
            assert!(parse_clone_instruction(bad).is_err(), "{} should fail", bad);
        }
    }

    #[test]
    fn test_validate_git_ref() {
        assert!(validate_git_ref("abc123").is_ok());
        assert!(validate_git_ref("release/1.2").is_ok());
        assert!(validate_git_ref("HEAD~1").is_ok());
        assert!(validate_git_ref("").is_err());
        assert!(validate_git_ref("-f").is_err());
        assert!(validate_git_ref("a..b").is_err());
        assert!(validate_git_ref("main;rm").is_err());
    }

    #[test]
    fn test_task_spec_clone_instruction() {
        let task = TaskSpec {
            index: 1,
            instance_id: "x__y-1".into(),
            problem_statement: "bug".into(),
            git_clone: "git clone https://github.com/x/y && git checkout abc123".into(),
            fail_to_pass: vec![],
            pass_to_pass: vec![],
        };
        assert_eq!(task.clone_instruction().unwrap().checkout, "abc123");
    }
}
