//! Tool definitions and the tool box handed to agents.
//!
//! This module defines the `Tool` trait and a `ToolBox` holding the tools an
//! agent may invoke against its bound repository workspace. Tool outcomes are
//! always rendered to text for the agent; nothing here propagates into the
//! conversation as an error.

pub mod exec;
pub mod file;
pub mod git;

pub use exec::{CodeExecutor, DockerCodeExecutor, ExecOutput, ExecTool};
pub use file::{ListDirTool, ReadFileTool, SandboxedFs, WriteFileTool};
pub use git::{tokenize, GitTool};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use super::parser::ToolCall;

/// Errors that can occur during tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Invalid parameters provided to the tool.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Tool execution failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Tool execution timed out.
    #[error("Execution timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Tool is not available to the calling agent.
    #[error("Tool not available: {0}")]
    NotAvailable(String),

    /// Docker-related error during execution.
    #[error("Docker error: {0}")]
    DockerError(String),

    /// File system error.
    #[error("Filesystem error: {0}")]
    FilesystemError(String),

    /// The operation would leave the bound workspace.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Resource limit exceeded.
    #[error("Resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),
}

/// Result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution was successful.
    pub success: bool,
    /// Output from the tool execution.
    pub output: String,
    /// Error message if execution failed.
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful tool result.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    /// Create a failed tool result.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Create a result with both output and error (partial success).
    pub fn partial(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }

    /// Text shown to the agent.
    pub fn to_text(&self) -> String {
        match (&self.error, self.output.is_empty()) {
            (None, _) => self.output.clone(),
            (Some(error), true) => error.clone(),
            (Some(error), false) => format!("{}\n{}", self.output, error),
        }
    }
}

/// Who is calling a tool.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Name of the calling agent.
    pub agent: String,
}

impl ExecutionContext {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
        }
    }
}

/// Trait for tools that can be executed by an agent.
///
/// Every tool is bound to one repository workspace at construction; the
/// execution context only identifies the caller.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the unique name of the tool, which is also its command word.
    fn name(&self) -> &str;

    /// Returns a description of what the tool does.
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments and context.
    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult, ToolError>;
}

/// Record of one tool invocation made during a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: Value,
    pub output: String,
    pub success: bool,
}

/// Ordered set of tools available to an agent.
#[derive(Clone, Default)]
pub struct ToolBox {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolBox {
    /// Create a new empty tool box.
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    /// Builder form of [`ToolBox::register`].
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// Registered tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// A tool box holding only the named tools that are registered here.
    pub fn restricted_to(&self, allowed: &[&str]) -> ToolBox {
        ToolBox {
            tools: self
                .tools
                .iter()
                .filter(|t| allowed.contains(&t.name()))
                .cloned()
                .collect(),
        }
    }

    /// Generate a JSON schema for all registered tools.
    pub fn to_json_schema(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters_schema()
                    }
                })
            })
            .collect();

        Value::Array(tools)
    }

    /// One line per tool, for system prompts.
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Run a parsed tool call and render its outcome as text.
    pub async fn invoke(&self, call: &ToolCall, ctx: &ExecutionContext) -> ToolInvocation {
        let outcome = match self.get(&call.name) {
            Some(tool) => tool.execute(call.arguments.clone(), ctx).await,
            None => Err(ToolError::NotAvailable(call.name.clone())),
        };

        let (output, success) = match outcome {
            Ok(result) => (result.to_text(), result.success),
            Err(ToolError::AccessDenied(reason)) => {
                tracing::warn!(agent = %ctx.agent, tool = %call.name, reason = %reason, "Tool access denied");
                (ToolError::AccessDenied(reason).to_string(), false)
            }
            Err(e) => (format!("ERROR: {}", e), false),
        };

        tracing::debug!(
            agent = %ctx.agent,
            tool = %call.name,
            success = success,
            output_len = output.len(),
            "Tool invoked"
        );

        ToolInvocation {
            tool: call.name.clone(),
            arguments: call.arguments.clone(),
            output,
            success,
        }
    }
}

impl std::fmt::Debug for ToolBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBox")
            .field("tools", &self.names())
            .finish()
    }
}

/// Extract a required string argument.
pub(crate) fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing string argument '{}'", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text argument"
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }

        async fn execute(
            &self,
            args: Value,
            _ctx: &ExecutionContext,
        ) -> Result<ToolResult, ToolError> {
            match str_arg(&args, "text")? {
                "deny" => Err(ToolError::AccessDenied("nope".into())),
                text => Ok(ToolResult::success(text)),
            }
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            arguments: args,
        }
    }

    #[test]
    fn test_tool_result_to_text() {
        assert_eq!(ToolResult::success("out").to_text(), "out");
        assert_eq!(ToolResult::failure("bad").to_text(), "bad");
        assert_eq!(ToolResult::partial("out", "warn").to_text(), "out\nwarn");
    }

    #[test]
    fn test_tool_box_register_replaces_by_name() {
        let tools = ToolBox::new()
            .with_tool(Arc::new(EchoTool))
            .with_tool(Arc::new(EchoTool));
        assert_eq!(tools.len(), 1);
        assert_eq!(tools.names(), vec!["echo"]);
    }

    #[test]
    fn test_restricted_to_filters() {
        let tools = ToolBox::new().with_tool(Arc::new(EchoTool));
        assert!(tools.restricted_to(&["read"]).is_empty());
        assert_eq!(tools.restricted_to(&["echo", "read"]).len(), 1);
    }

    #[test]
    fn test_to_json_schema() {
        let schema = ToolBox::new().with_tool(Arc::new(EchoTool)).to_json_schema();
        let arr = schema.as_array().expect("schema should be an array");
        assert_eq!(arr[0]["type"], "function");
        assert_eq!(arr[0]["function"]["name"], "echo");
        assert!(arr[0]["function"]["parameters"].is_object());
    }

    #[tokio::test]
    async fn test_invoke_renders_outcomes() {
        let tools = ToolBox::new().with_tool(Arc::new(EchoTool));
        let ctx = ExecutionContext::new("Coding_Agent");

        let ok = tools
            .invoke(&call("echo", serde_json::json!({"text": "hi"})), &ctx)
            .await;
        assert!(ok.success);
        assert_eq!(ok.output, "hi");

        let denied = tools
            .invoke(&call("echo", serde_json::json!({"text": "deny"})), &ctx)
            .await;
        assert!(!denied.success);
        assert_eq!(denied.output, "Access denied: nope");

        let missing = tools.invoke(&call("echo", serde_json::json!({})), &ctx).await;
        assert!(missing.output.starts_with("ERROR: Invalid parameters"));

        let unknown = tools.invoke(&call("rm", serde_json::json!({})), &ctx).await;
        assert_eq!(unknown.output, "ERROR: Tool not available: rm");
    }
}
