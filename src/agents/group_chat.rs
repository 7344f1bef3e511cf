//! Group conversation coordinator.
//!
//! The initiator's task message opens the conversation as round 1. After that
//! the coordinator repeatedly selects a speaker, appends its turn, and checks
//! the two stop conditions:
//! - [`sentinel_detected`] on the speaker's message
//! - [`round_limit_reached`] on the round counter
//!
//! The sentinel wins when both hold. Participant failures become failed turns
//! and never end the session early.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use super::error::AgentError;
use super::participant::{AgentConfig, ChatMessage, LlmAgent, Participant};
use super::roles::{is_sentinel, Role};
use crate::llm::{ChatCost, GenerationRequest, LlmProvider, Message, PriceTable, UsageTracker};
use crate::scaffold::prompts::{build_speaker_prompt, MANAGER_PROMPT};
use crate::scaffold::tools::ToolBox;

/// Default round ceiling of a conversation.
pub const DEFAULT_MAX_ROUNDS: usize = 7;

/// Highest accepted round ceiling.
pub const MAX_ROUNDS_LIMIT: usize = 50;

/// Name of the coordinating manager.
pub const MANAGER_NAME: &str = "Group_Manager";

/// Whether a message contains the termination sentinel.
pub fn sentinel_detected(message: &str) -> bool {
    is_sentinel(message)
}

/// Whether the conversation has used all of its rounds.
pub fn round_limit_reached(rounds: usize, max_rounds: usize) -> bool {
    rounds >= max_rounds
}

// ============================================================================
// Configuration and outcome types
// ============================================================================

/// How the next speaker is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerSelection {
    /// Roster order, wrapping back to the initiator.
    #[default]
    RoundRobin,
    /// The manager LLM names the next speaker.
    Auto,
}

impl FromStr for SpeakerSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "round_robin" | "round-robin" | "roundrobin" => Ok(Self::RoundRobin),
            "auto" => Ok(Self::Auto),
            other => Err(format!(
                "invalid speaker selection '{}': expected round_robin or auto",
                other
            )),
        }
    }
}

impl std::fmt::Display for SpeakerSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "round_robin"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Why a conversation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// A participant wrote the sentinel.
    Sentinel,
    /// The round ceiling was reached.
    RoundLimit,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sentinel => write!(f, "sentinel"),
            Self::RoundLimit => write!(f, "round limit"),
        }
    }
}

/// State of a running conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Waiting for the participant at this roster index.
    AwaitingTurn(usize),
    Terminated(Termination),
}

/// Coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupChatConfig {
    pub max_rounds: usize,
    pub speaker_selection: SpeakerSelection,
}

impl Default for GroupChatConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            speaker_selection: SpeakerSelection::RoundRobin,
        }
    }
}

impl GroupChatConfig {
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_speaker_selection(mut self, selection: SpeakerSelection) -> Self {
        self.speaker_selection = selection;
        self
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if !(1..=MAX_ROUNDS_LIMIT).contains(&self.max_rounds) {
            return Err(AgentError::ConfigurationError(format!(
                "max_rounds must be between 1 and {}, got {}",
                MAX_ROUNDS_LIMIT, self.max_rounds
            )));
        }
        Ok(())
    }
}

/// What survives a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub transcript: Vec<ChatMessage>,
    pub termination: Termination,
    pub rounds: usize,
    pub cost: ChatCost,
}

// ============================================================================
// Roster
// ============================================================================

/// Ordered participants; index 0 is the initiator.
pub struct Roster {
    members: Vec<Box<dyn Participant>>,
}

impl Roster {
    pub fn new(
        initiator: Box<dyn Participant>,
        others: Vec<Box<dyn Participant>>,
    ) -> Result<Self, AgentError> {
        if others.is_empty() {
            return Err(AgentError::ConfigurationError(
                "roster needs at least one participant besides the initiator".to_string(),
            ));
        }
        let mut members = Vec::with_capacity(others.len() + 1);
        members.push(initiator);
        members.extend(others);

        for (i, member) in members.iter().enumerate() {
            if members[..i].iter().any(|m| m.name() == member.name()) {
                return Err(AgentError::ConfigurationError(format!(
                    "duplicate participant name '{}'",
                    member.name()
                )));
            }
        }
        Ok(Self { members })
    }

    /// LLM agents for `roles` (initiator first) bound to one workspace.
    pub fn for_workspace(
        roles: &[Role],
        repo_dir: &str,
        workspace_tools: &ToolBox,
        llm: Arc<dyn LlmProvider>,
        config: &AgentConfig,
    ) -> Result<Self, AgentError> {
        let mut agents = roles.iter().map(|role| {
            Box::new(LlmAgent::for_role(
                *role,
                repo_dir,
                workspace_tools,
                llm.clone(),
                config.clone(),
            )) as Box<dyn Participant>
        });
        let initiator = agents.next().ok_or_else(|| {
            AgentError::ConfigurationError("roster needs an initiator".to_string())
        })?;
        Self::new(initiator, agents.collect())
    }

    pub fn names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl std::fmt::Debug for Roster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Roster")
            .field("members", &self.names())
            .finish()
    }
}

// ============================================================================
// Manager
// ============================================================================

/// What the manager decided.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Selection {
    Speaker(String),
    /// The manager answered with the sentinel and closes the session.
    Terminate,
    /// No usable answer; the caller falls back to roster order.
    Fallback,
}

/// The manager LLM used for automatic speaker selection.
pub struct Manager {
    llm: Arc<dyn LlmProvider>,
    config: AgentConfig,
}

impl Manager {
    pub fn new(llm: Arc<dyn LlmProvider>, config: AgentConfig) -> Self {
        Self { llm, config }
    }

    /// Ask for the next speaker among `candidates`.
    async fn select(
        &self,
        transcript: &[ChatMessage],
        candidates: &[(String, String)],
        last_speaker: &str,
        usage: &mut UsageTracker,
    ) -> Selection {
        let mut messages = vec![Message::system(MANAGER_PROMPT)];
        messages.extend(
            transcript
                .iter()
                .map(|m| Message::user(&m.content).with_name(&m.speaker)),
        );
        messages.push(Message::user(build_speaker_prompt(candidates, last_speaker)));

        let mut request = GenerationRequest::new(&self.config.model, messages).with_max_tokens(64);
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }

        match self.llm.generate(request).await {
            Ok(response) => {
                usage.record(&self.config.model, &response.usage, response.cost);
                let answer = response.first_content().unwrap_or_default();
                if sentinel_detected(answer) {
                    return Selection::Terminate;
                }
                parse_speaker(answer, candidates).map_or(Selection::Fallback, Selection::Speaker)
            }
            Err(e) => {
                tracing::warn!(manager = MANAGER_NAME, error = %e, "Speaker selection failed");
                Selection::Fallback
            }
        }
    }
}

/// Match a manager answer against candidate names; the earliest whole-word
/// mention wins.
fn parse_speaker(answer: &str, candidates: &[(String, String)]) -> Option<String> {
    let mut names: Vec<&String> = candidates.iter().map(|(name, _)| name).collect();
    if names.is_empty() {
        return None;
    }
    // Longer names first so a name that prefixes another cannot shadow it.
    names.sort_by_key(|name| std::cmp::Reverse(name.len()));
    let alternatives: Vec<String> = names.iter().map(|name| regex::escape(name)).collect();
    let pattern = RegexBuilder::new(&format!(r"\b(?:{})\b", alternatives.join("|")))
        .case_insensitive(true)
        .build()
        .ok()?;

    let found = pattern.find(answer)?.as_str();
    names
        .into_iter()
        .find(|name| name.eq_ignore_ascii_case(found))
        .cloned()
}

// ============================================================================
// GroupChat
// ============================================================================

/// One conversation session.
pub struct GroupChat {
    config: GroupChatConfig,
    roster: Roster,
    manager: Option<Manager>,
    prices: PriceTable,
}

impl GroupChat {
    pub fn new(
        roster: Roster,
        config: GroupChatConfig,
        manager: Option<Manager>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        if config.speaker_selection == SpeakerSelection::Auto && manager.is_none() {
            return Err(AgentError::ConfigurationError(
                "automatic speaker selection needs a manager".to_string(),
            ));
        }
        Ok(Self {
            config,
            roster,
            manager,
            prices: PriceTable::default(),
        })
    }

    pub fn with_prices(mut self, prices: PriceTable) -> Self {
        self.prices = prices;
        self
    }

    /// Run the conversation on `task` until the sentinel or the round limit.
    pub async fn run(mut self, task: &str) -> ChatOutcome {
        let mut usage = UsageTracker::new(self.prices.clone());
        let initiator = self.roster.members[0].name().to_string();
        let mut transcript = vec![ChatMessage::new(1, &initiator, task)];
        let mut rounds = 1;
        let mut last = 0;

        tracing::info!(
            participants = ?self.roster.names(),
            max_rounds = self.config.max_rounds,
            selection = %self.config.speaker_selection,
            "Conversation started"
        );

        let state = loop {
            if round_limit_reached(rounds, self.config.max_rounds) {
                break ConversationState::Terminated(Termination::RoundLimit);
            }
            let Some(next) = self.select_next(last, &transcript, &mut usage).await else {
                tracing::info!(manager = MANAGER_NAME, "Manager closed the conversation");
                break ConversationState::Terminated(Termination::Sentinel);
            };
            let state = ConversationState::AwaitingTurn(next);
            tracing::trace!(?state, "Awaiting turn");
            rounds += 1;

            let speaker = &mut self.roster.members[next];
            let name = speaker.name().to_string();
            let (entry, terminal) = match speaker.produce_turn(&transcript, &mut usage).await {
                Ok(turn) => {
                    let terminal = speaker.is_terminal(&turn.content);
                    let entry = ChatMessage::new(rounds, &name, turn.content)
                        .with_tool_invocations(turn.tool_invocations);
                    (entry, terminal)
                }
                Err(e) => {
                    tracing::warn!(round = rounds, speaker = %name, error = %e, "Turn failed");
                    (ChatMessage::failed(rounds, &name, &e), false)
                }
            };

            tracing::info!(
                round = rounds,
                speaker = %name,
                failed = entry.failed,
                tool_calls = entry.tool_invocations.len(),
                "Turn completed"
            );
            transcript.push(entry);
            last = next;

            if terminal {
                break ConversationState::Terminated(Termination::Sentinel);
            }
        };

        let termination = match state {
            ConversationState::Terminated(termination) => termination,
            ConversationState::AwaitingTurn(_) => Termination::RoundLimit,
        };
        tracing::info!(rounds = rounds, termination = %termination, "Conversation ended");

        ChatOutcome {
            transcript,
            termination,
            rounds,
            cost: usage.finish(),
        }
    }

    /// Index of the next speaker, or `None` when the manager ends the session.
    async fn select_next(
        &self,
        last: usize,
        transcript: &[ChatMessage],
        usage: &mut UsageTracker,
    ) -> Option<usize> {
        let round_robin = (last + 1) % self.roster.len();
        let Some(manager) = self
            .manager
            .as_ref()
            .filter(|_| self.config.speaker_selection == SpeakerSelection::Auto)
        else {
            return Some(round_robin);
        };

        let last_name = self.roster.members[last].name();
        let candidates: Vec<(String, String)> = self
            .roster
            .members
            .iter()
            .filter(|m| m.name() != last_name)
            .map(|m| (m.name().to_string(), m.description().to_string()))
            .collect();

        match manager.select(transcript, &candidates, last_name, usage).await {
            Selection::Speaker(choice) => Some(
                self.roster
                    .members
                    .iter()
                    .position(|m| m.name() == choice)
                    .unwrap_or(round_robin),
            ),
            Selection::Terminate => None,
            Selection::Fallback => {
                tracing::debug!("Falling back to round-robin speaker selection");
                Some(round_robin)
            }
        }
    }
}
