//! Error types for swe-crew operations.
//!
//! Defines error types for the subsystems that sit outside the agent tool
//! surface:
//! - LLM API interactions
//! - Repository workspace preparation and commits
//! - External task-index and evaluation services
//!
//! Tool errors live next to the tools (`scaffold::tools::ToolError`) and
//! conversation errors next to the agents (`agents::AgentError`), because both
//! are turned into text for the agents rather than propagated.

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Context length exceeded: {limit} tokens")]
    ContextLengthExceeded { limit: u32 },

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

/// Errors that can occur while preparing or committing a repository workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Invalid clone instruction '{0}': expected 'git clone <url> [&& git checkout <ref>]'")]
    InvalidCloneInstruction(String),

    #[error("Invalid git ref '{reference}': {reason}")]
    InvalidRef { reference: String, reason: String },

    #[error("git {command} failed (exit {code}): {stderr}")]
    GitFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("git {command} timed out after {seconds} seconds")]
    GitTimeout { command: String, seconds: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the external task-index and evaluation services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} returned status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Malformed payload from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("No data in harnessOutput: possible evaluation error or empty result")]
    EmptyHarnessOutput,

    #[error("Missing field '{0}' in service payload")]
    MissingField(String),
}
