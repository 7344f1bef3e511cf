//! Tool surface offered to the agents.
//!
//! Agents act on their bound repository workspace through text commands:
//! 1. The agent writes commands in a fenced `tool` block
//! 2. [`parser`] turns them into [`ToolCall`]s
//! 3. The agent's [`ToolBox`] runs each call against the workspace
//! 4. The rendered text result is fed back as an observation
//!
//! [`build_toolbox`] assembles the full set of tools for one workspace.

pub mod parser;
pub mod prompts;
pub mod tools;

use std::path::Path;
use std::sync::Arc;

pub use parser::{parse_command, CommandParser, ToolCall, ToolCallParser};
pub use prompts::build_system_prompt;
pub use tools::{
    CodeExecutor, DockerCodeExecutor, ExecTool, ExecutionContext, GitTool, ListDirTool,
    ReadFileTool, SandboxedFs, Tool, ToolBox, ToolError, ToolInvocation, ToolResult,
    WriteFileTool,
};

/// Options for [`build_toolbox`].
#[derive(Debug, Clone)]
pub struct ToolBoxOptions {
    pub git_timeout_secs: u64,
    pub denied_git_subcommands: Vec<String>,
}

impl Default for ToolBoxOptions {
    fn default() -> Self {
        Self {
            git_timeout_secs: tools::git::DEFAULT_GIT_TIMEOUT_SECS,
            denied_git_subcommands: tools::git::DEFAULT_DENIED_SUBCOMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// All tools bound to one workspace: `read`, `write`, `ls`, `git`, and `exec`
/// when an executor is given.
pub fn build_toolbox(
    root: &Path,
    executor: Option<Arc<dyn CodeExecutor>>,
    options: &ToolBoxOptions,
) -> Result<ToolBox, ToolError> {
    let fs = Arc::new(SandboxedFs::new(root)?);
    let git = GitTool::new(fs.root())?
        .with_timeout(options.git_timeout_secs)
        .with_denied_subcommands(options.denied_git_subcommands.iter().cloned());

    let mut toolbox = ToolBox::new()
        .with_tool(Arc::new(ReadFileTool::new(fs.clone())))
        .with_tool(Arc::new(WriteFileTool::new(fs.clone())))
        .with_tool(Arc::new(ListDirTool::new(fs)))
        .with_tool(Arc::new(git));
    if let Some(executor) = executor {
        toolbox.register(Arc::new(ExecTool::new(executor)));
    }
    Ok(toolbox)
}
