//! Error types for the agent conversation.
//!
//! A participant error never ends a conversation: the coordinator records it
//! as a failed turn carrying the error text and moves on.

use thiserror::Error;

/// Errors that can occur while an agent produces a turn.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Error from the LLM provider.
    #[error("LLM error: {0}")]
    LlmError(String),

    /// The LLM answered without any content.
    #[error("Empty response from {agent}")]
    EmptyResponse { agent: String },

    /// The agent used up its automatic replies for this session.
    #[error("{agent} reached its limit of {limit} automatic replies")]
    AutoReplyLimit { agent: String, limit: u32 },

    /// Invalid roster or coordinator configuration.
    #[error("Agent configuration error: {0}")]
    ConfigurationError(String),
}

impl From<crate::error::LlmError> for AgentError {
    fn from(err: crate::error::LlmError) -> Self {
        AgentError::LlmError(err.to_string())
    }
}
