//! swe-crew: multi-agent orchestration for SWE-bench style tasks.
//!
//! This library fetches benchmark tasks, lets a crew of LLM agents resolve
//! them inside a confined repository checkout, and reports token usage and
//! evaluation results.

// Core modules
pub mod agents;
pub mod cli;
pub mod error;
pub mod llm;
pub mod runner;
pub mod scaffold;
pub mod swe;

// Re-export commonly used error types
pub use agents::AgentError;
pub use error::{LlmError, ServiceError, WorkspaceError};
pub use runner::{ConfigError, StageError};
pub use scaffold::ToolError;
