//! Agent roles and the termination sentinel.
//!
//! Each role fixes an agent's default name, directive, and the tools it may
//! use. The reviewer role is defined but left out of the default roster: in
//! practice it kept conversations looping without converging.

use serde::{Deserialize, Serialize};

use crate::scaffold::prompts::{
    CODER_DIRECTIVE, INITIATOR_DIRECTIVE, PLANNER_DIRECTIVE, REVIEWER_DIRECTIVE,
};

/// Word an agent writes to end the conversation.
pub const SENTINEL: &str = "TERMINATE";

/// Whether a message asks to end the conversation (case-insensitive).
pub fn is_sentinel(message: &str) -> bool {
    message.to_uppercase().contains(SENTINEL)
}

// ============================================================================
// Roles
// ============================================================================

/// Roles an agent can take in the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Opens the conversation with the task and accepts results.
    Initiator,
    /// Explores the repository and writes a file-level plan.
    Planner,
    /// Applies the plan by overwriting whole files.
    Coder,
    /// Reviews the coder's changes. Disabled by default.
    Reviewer,
}

impl Role {
    /// Roles of the default roster, initiator first.
    pub fn default_roster(enable_reviewer: bool) -> Vec<Self> {
        let mut roles = vec![Self::Initiator, Self::Planner, Self::Coder];
        if enable_reviewer {
            roles.push(Self::Reviewer);
        }
        roles
    }

    /// Agent name used in transcripts.
    pub fn agent_name(&self) -> &'static str {
        match self {
            Self::Initiator => "User",
            Self::Planner => "Planner_Agent",
            Self::Coder => "Coding_Agent",
            Self::Reviewer => "Test_Agent",
        }
    }

    /// Short description used for speaker selection.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Initiator => "Describes the task and accepts the results",
            Self::Planner => "Explores the repository and writes a step-by-step file-level plan",
            Self::Coder => "Implements the plan by rewriting files in the repository",
            Self::Reviewer => "Reviews the changes and runs tests",
        }
    }

    pub fn directive(&self) -> &'static str {
        match self {
            Self::Initiator => INITIATOR_DIRECTIVE,
            Self::Planner => PLANNER_DIRECTIVE,
            Self::Coder => CODER_DIRECTIVE,
            Self::Reviewer => REVIEWER_DIRECTIVE,
        }
    }

    /// Names of the tools this role may call.
    pub fn allowed_tools(&self) -> &'static [&'static str] {
        match self {
            Self::Initiator => &[],
            Self::Planner => &["read", "ls"],
            Self::Coder => &["read", "write", "ls", "git", "exec"],
            Self::Reviewer => &["read", "ls", "git", "exec"],
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.agent_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_is_case_insensitive() {
        assert!(is_sentinel("TERMINATE"));
        assert!(is_sentinel("All done. terminate"));
        assert!(is_sentinel("Terminate."));
        assert!(!is_sentinel("The plan is ready."));
        assert!(!is_sentinel(""));
    }

    #[test]
    fn test_default_roster_excludes_reviewer() {
        assert_eq!(
            Role::default_roster(false),
            vec![Role::Initiator, Role::Planner, Role::Coder]
        );
        assert!(Role::default_roster(true).contains(&Role::Reviewer));
    }

    #[test]
    fn test_planner_cannot_write() {
        assert!(!Role::Planner.allowed_tools().contains(&"write"));
        assert!(!Role::Planner.allowed_tools().contains(&"git"));
        assert!(Role::Coder.allowed_tools().contains(&"write"));
        assert!(Role::Initiator.allowed_tools().is_empty());
    }

    #[test]
    fn test_names_are_unique() {
        let roles = Role::default_roster(true);
        let mut names: Vec<_> = roles.iter().map(|r| r.agent_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), roles.len());
    }
}
