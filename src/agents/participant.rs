//! Conversation participants.
//!
//! The coordinator only sees the [`Participant`] trait. [`LlmAgent`] is the
//! implementation used for every role: it answers from the shared transcript,
//! runs any tool commands in its reply through its [`ToolBox`], and feeds the
//! results back until it produces a reply without commands.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::AgentError;
use super::roles::{is_sentinel, Role};
use crate::llm::{GenerationRequest, LlmProvider, Message, UsageTracker, DEFAULT_MODEL};
use crate::scaffold::parser::{CommandParser, ToolCall, ToolCallParser};
use crate::scaffold::prompts::build_system_prompt;
use crate::scaffold::tools::{ExecutionContext, ToolBox, ToolInvocation};

/// Longest tool output fed back to the model, in characters.
const MAX_OBSERVATION_CHARS: usize = 20_000;

/// One entry of the shared transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Round in which the message was produced (1-based).
    pub round: usize,
    pub speaker: String,
    pub content: String,
    /// Tool calls the speaker made while producing the message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,
    /// Set when the turn failed; `content` then holds the error text.
    #[serde(default)]
    pub failed: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(round: usize, speaker: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            round,
            speaker: speaker.into(),
            content: content.into(),
            tool_invocations: Vec::new(),
            failed: false,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(round: usize, speaker: impl Into<String>, error: &AgentError) -> Self {
        Self {
            failed: true,
            ..Self::new(round, speaker, format!("ERROR: {}", error))
        }
    }

    pub fn with_tool_invocations(mut self, invocations: Vec<ToolInvocation>) -> Self {
        self.tool_invocations = invocations;
        self
    }
}

/// What a participant contributes in one turn.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    pub content: String,
    pub tool_invocations: Vec<ToolInvocation>,
}

/// A member of a group conversation.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Unique name within the roster.
    fn name(&self) -> &str;

    /// Short description used for speaker selection.
    fn description(&self) -> &str;

    /// Produce the next message given the transcript so far. Every LLM call
    /// is recorded in `usage`, including calls of a turn that later fails.
    async fn produce_turn(
        &mut self,
        transcript: &[ChatMessage],
        usage: &mut UsageTracker,
    ) -> Result<Turn, AgentError>;

    /// Whether `message`, written by this participant, ends the conversation.
    fn is_terminal(&self, message: &str) -> bool {
        is_sentinel(message)
    }
}

// ============================================================================
// Agent configuration
// ============================================================================

/// LLM and budget settings of an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model to use.
    pub model: String,
    /// Sampling temperature; the backend default when unset.
    pub temperature: Option<f64>,
    /// Maximum completion tokens per call.
    pub max_tokens: u32,
    /// Turns the agent may take in one conversation.
    pub max_auto_replies: u32,
    /// LLM calls with tool commands allowed within one turn.
    pub max_tool_steps: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            max_tokens: 8096,
            max_auto_replies: 7,
            max_tool_steps: 8,
        }
    }
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_auto_replies(mut self, max_auto_replies: u32) -> Self {
        self.max_auto_replies = max_auto_replies;
        self
    }

    pub fn with_max_tool_steps(mut self, max_tool_steps: usize) -> Self {
        self.max_tool_steps = max_tool_steps;
        self
    }
}

// ============================================================================
// LlmAgent
// ============================================================================

/// An LLM-backed participant.
pub struct LlmAgent {
    name: String,
    description: String,
    system_prompt: String,
    llm: Arc<dyn LlmProvider>,
    config: AgentConfig,
    tools: ToolBox,
    parser: Box<dyn ToolCallParser>,
    replies: u32,
}

impl LlmAgent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
        llm: Arc<dyn LlmProvider>,
        config: AgentConfig,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
            llm,
            config,
            tools: ToolBox::new(),
            parser: Box::new(CommandParser),
            replies: 0,
        }
    }

    /// Build an agent for a role; `workspace_tools` is narrowed to the tools
    /// the role is allowed to use.
    pub fn for_role(
        role: Role,
        repo_dir: &str,
        workspace_tools: &ToolBox,
        llm: Arc<dyn LlmProvider>,
        config: AgentConfig,
    ) -> Self {
        let tools = workspace_tools.restricted_to(role.allowed_tools());
        let prompt = build_system_prompt(role.directive(), repo_dir, &tools.describe());
        Self::new(role.agent_name(), role.description(), prompt, llm, config).with_tools(tools)
    }

    pub fn with_tools(mut self, tools: ToolBox) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_parser(mut self, parser: Box<dyn ToolCallParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tools(&self) -> &ToolBox {
        &self.tools
    }

    /// Turns taken so far in this conversation.
    pub fn replies(&self) -> u32 {
        self.replies
    }

    /// Build the LLM conversation from this agent's point of view.
    fn build_messages(&self, transcript: &[ChatMessage]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        messages.push(Message::system(&self.system_prompt));
        for entry in transcript {
            if entry.speaker == self.name {
                messages.push(Message::assistant(&entry.content));
            } else {
                messages.push(Message::user(&entry.content).with_name(&entry.speaker));
            }
        }
        messages
    }

    async fn complete(
        &self,
        messages: &[Message],
        usage: &mut UsageTracker,
    ) -> Result<String, AgentError> {
        let mut request = GenerationRequest::new(&self.config.model, messages.to_vec())
            .with_max_tokens(self.config.max_tokens);
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }

        let response = self.llm.generate(request).await?;
        usage.record(&self.config.model, &response.usage, response.cost);

        match response.first_content() {
            Some(content) if !content.trim().is_empty() => Ok(content.to_string()),
            _ => Err(AgentError::EmptyResponse {
                agent: self.name.clone(),
            }),
        }
    }
}

#[async_trait]
impl Participant for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn produce_turn(
        &mut self,
        transcript: &[ChatMessage],
        usage: &mut UsageTracker,
    ) -> Result<Turn, AgentError> {
        if self.replies >= self.config.max_auto_replies {
            return Err(AgentError::AutoReplyLimit {
                agent: self.name.clone(),
                limit: self.config.max_auto_replies,
            });
        }
        self.replies += 1;

        let ctx = ExecutionContext::new(&self.name);
        let mut messages = self.build_messages(transcript);
        let mut invocations = Vec::new();
        let mut step = 0;

        loop {
            let content = self.complete(&messages, usage).await?;
            let calls = if self.tools.is_empty() {
                Vec::new()
            } else {
                self.parser.parse(&content)
            };

            if calls.is_empty() {
                return Ok(Turn {
                    content,
                    tool_invocations: invocations,
                });
            }
            if step >= self.config.max_tool_steps {
                tracing::warn!(
                    agent = %self.name,
                    limit = self.config.max_tool_steps,
                    "Tool step limit reached, ending turn without running further commands"
                );
                return Ok(Turn {
                    content,
                    tool_invocations: invocations,
                });
            }
            step += 1;

            let mut observations = Vec::with_capacity(calls.len());
            for call in &calls {
                let invocation = self.tools.invoke(call, &ctx).await;
                observations.push(format_observation(call, &invocation.output));
                invocations.push(invocation);
            }

            messages.push(Message::assistant(content));
            messages.push(Message::user(observations.join("\n\n")).with_name("tools"));
        }
    }
}

/// Render a tool result for the model.
fn format_observation(call: &ToolCall, output: &str) -> String {
    let target = call
        .arguments
        .get("path")
        .or_else(|| call.arguments.get("command"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let output = if output.chars().count() > MAX_OBSERVATION_CHARS {
        let truncated: String = output.chars().take(MAX_OBSERVATION_CHARS).collect();
        format!("{}\n[output truncated]", truncated)
    } else {
        output.to_string()
    };
    format!("Result of `{} {}`:\n{}", call.name, target, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationResponse, PriceTable, Usage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct MockLlmProvider {
        responses: Mutex<Vec<String>>,
        requests: Mutex<Vec<GenerationRequest>>,
        call_count: AtomicUsize,
    }

    impl MockLlmProvider {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                requests: Mutex::new(Vec::new()),
                call_count: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().expect("lock").push(request);
            let responses = self.responses.lock().expect("lock not poisoned");
            let content = responses
                .get(idx)
                .cloned()
                .unwrap_or_else(|| responses.last().cloned().unwrap_or_default());

            Ok(GenerationResponse {
                id: format!("mock-{}", idx),
                model: "mock-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(content),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage {
                    prompt_tokens: 100,
                    completion_tokens: 20,
                    total_tokens: 120,
                    cached_tokens: 0,
                },
                cost: Some(0.001),
            })
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmProvider for FailingLlm {
        async fn generate(&self, _: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            Err(LlmError::RequestFailed("connection refused".into()))
        }
    }

    fn transcript() -> Vec<ChatMessage> {
        vec![ChatMessage::new(1, "User", "Fix the bug in src/a.py")]
    }

    #[tokio::test]
    async fn test_plain_reply_without_tools() {
        let llm = Arc::new(MockLlmProvider::new(vec!["Here is the plan."]));
        let mut agent = LlmAgent::new("Planner_Agent", "plans", "You plan.", llm.clone(), AgentConfig::default());
        let mut usage = UsageTracker::new(PriceTable::empty());

        let turn = agent.produce_turn(&transcript(), &mut usage).await.unwrap();
        assert_eq!(turn.content, "Here is the plan.");
        assert!(turn.tool_invocations.is_empty());
        assert_eq!(usage.call_count(), 1);

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests[0].messages[0].role, "system");
        assert_eq!(requests[0].messages[1].name.as_deref(), Some("User"));
    }

    #[tokio::test]
    async fn test_auto_reply_budget() {
        let llm = Arc::new(MockLlmProvider::new(vec!["ok"]));
        let config = AgentConfig::default().with_max_auto_replies(2);
        let mut agent = LlmAgent::new("Coding_Agent", "codes", "You code.", llm, config);
        let mut usage = UsageTracker::default();

        assert!(agent.produce_turn(&transcript(), &mut usage).await.is_ok());
        assert!(agent.produce_turn(&transcript(), &mut usage).await.is_ok());
        let err = agent.produce_turn(&transcript(), &mut usage).await.unwrap_err();
        assert!(matches!(err, AgentError::AutoReplyLimit { limit: 2, .. }));
        assert_eq!(usage.call_count(), 2);
    }

    #[tokio::test]
    async fn test_tool_loop_writes_and_reports() {
        let dir = TempDir::new().unwrap();
        let tools = crate::scaffold::build_toolbox(
            dir.path(),
            None,
            &crate::scaffold::ToolBoxOptions::default(),
        )
        .unwrap();
        let llm = Arc::new(MockLlmProvider::new(vec![
            "```tool\nwrite src/a.py\nimport os\n```",
            "```tool\nread src/a.py\n```",
            "Implemented the plan.",
        ]));
        let mut agent = LlmAgent::for_role(
            Role::Coder,
            &dir.path().display().to_string(),
            &tools,
            llm.clone(),
            AgentConfig::default(),
        );
        let mut usage = UsageTracker::default();

        let turn = agent.produce_turn(&transcript(), &mut usage).await.unwrap();
        assert_eq!(turn.content, "Implemented the plan.");
        assert_eq!(turn.tool_invocations.len(), 2);
        assert_eq!(turn.tool_invocations[1].output, "import os\n");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/a.py")).unwrap(),
            "import os\n"
        );
        assert_eq!(usage.call_count(), 3);

        let requests = llm.requests.lock().unwrap();
        let last = requests.last().unwrap().messages.last().unwrap();
        assert!(last.content.contains("Result of `read src/a.py`"));
        assert!(last.content.contains("import os"));
    }

    #[tokio::test]
    async fn test_planner_write_is_not_available() {
        let dir = TempDir::new().unwrap();
        let tools = crate::scaffold::build_toolbox(
            dir.path(),
            None,
            &crate::scaffold::ToolBoxOptions::default(),
        )
        .unwrap();
        let llm = Arc::new(MockLlmProvider::new(vec![
            "```tool\nwrite a.py x = 1\n```",
            "Plan: edit a.py",
        ]));
        let mut agent =
            LlmAgent::for_role(Role::Planner, "/repo", &tools, llm, AgentConfig::default());
        let mut usage = UsageTracker::default();

        let turn = agent.produce_turn(&transcript(), &mut usage).await.unwrap();
        assert_eq!(turn.tool_invocations[0].output, "ERROR: Tool not available: write");
        assert!(!dir.path().join("a.py").exists());
    }

    #[tokio::test]
    async fn test_tool_step_limit_ends_turn() {
        let dir = TempDir::new().unwrap();
        let tools = crate::scaffold::build_toolbox(
            dir.path(),
            None,
            &crate::scaffold::ToolBoxOptions::default(),
        )
        .unwrap();
        let llm = Arc::new(MockLlmProvider::new(vec!["```tool\nls\n```"]));
        let config = AgentConfig::default().with_max_tool_steps(2);
        let mut agent = LlmAgent::for_role(Role::Coder, "/repo", &tools, llm, config);
        let mut usage = UsageTracker::default();

        let turn = agent.produce_turn(&transcript(), &mut usage).await.unwrap();
        assert_eq!(turn.tool_invocations.len(), 2);
        assert_eq!(usage.call_count(), 3);
    }

    #[tokio::test]
    async fn test_llm_failure_is_an_error() {
        let mut agent = LlmAgent::new("User", "", "", Arc::new(FailingLlm), AgentConfig::default());
        let mut usage = UsageTracker::default();
        let err = agent.produce_turn(&transcript(), &mut usage).await.unwrap_err();
        assert!(matches!(err, AgentError::LlmError(_)));
        assert_eq!(agent.replies(), 1);
    }

    #[tokio::test]
    async fn test_empty_reply_is_an_error() {
        let llm = Arc::new(MockLlmProvider::new(vec!["   "]));
        let mut agent = LlmAgent::new("User", "", "", llm, AgentConfig::default());
        let mut usage = UsageTracker::default();
        let err = agent.produce_turn(&transcript(), &mut usage).await.unwrap_err();
        assert!(matches!(err, AgentError::EmptyResponse { .. }));
        assert_eq!(usage.call_count(), 1);
    }

    #[test]
    fn test_failed_message() {
        let msg = ChatMessage::failed(
            3,
            "Coding_Agent",
            &AgentError::LlmError("timeout".into()),
        );
        assert!(msg.failed);
        assert_eq!(msg.content, "ERROR: LLM error: timeout");
    }
}
