//! LLM integration for swe-crew.
//!
//! This module provides the OpenAI-compatible backend client used by every
//! agent and the usage/cost accounting applied to each conversation.
//!
//! ```ignore
//! use swe_crew::llm::{LiteLlmClient, LlmProvider, Message, GenerationRequest};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new("gpt-4o", vec![Message::user("Hello")]);
//! let response = client.generate(request).await?;
//! ```
//!
//! # Cost Tracking
//!
//! A [`UsageTracker`] records every call of a conversation; the resulting
//! [`ChatCost`] is reduced to one [`UsageRecord`] by the [`UsageAccountant`].

pub mod cost;
pub mod litellm;

pub use cost::{
    calculate_cost, ChatCost, ModelPricing, ModelSelection, ModelUsage, PriceTable, UsageAccountant,
    UsageOutcome, UsageRecord, UsageSummary, UsageTracker,
};
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
    DEFAULT_MODEL,
};
