//! Multi-agent conversation for resolving repository tasks.
//!
//! A [`Roster`] of [`Participant`]s (initiator, planner, coder) talks in a
//! [`GroupChat`] until one of them writes the sentinel or the round ceiling is
//! reached. Agents act on the repository only through the tools bound to the
//! workspace.
//!
//! ```ignore
//! use swe_crew::agents::{AgentConfig, GroupChat, GroupChatConfig, Role, Roster};
//!
//! let roster = Roster::for_workspace(
//!     &Role::default_roster(false),
//!     "/work/repos/repo_1",
//!     &toolbox,
//!     llm,
//!     &AgentConfig::default(),
//! )?;
//! let outcome = GroupChat::new(roster, GroupChatConfig::default(), None)?
//!     .run(&task.problem_statement)
//!     .await;
//! ```

pub mod error;
pub mod group_chat;
pub mod participant;
pub mod roles;

pub use error::AgentError;
pub use group_chat::{
    round_limit_reached, sentinel_detected, ChatOutcome, ConversationState, GroupChat,
    GroupChatConfig, Manager, Roster, SpeakerSelection, Termination, DEFAULT_MAX_ROUNDS,
    MAX_ROUNDS_LIMIT,
};
pub use participant::{AgentConfig, ChatMessage, LlmAgent, Participant, Turn};
pub use roles::{is_sentinel, Role, SENTINEL};
