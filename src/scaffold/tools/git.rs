//! Git tool for running version-control commands inside the workspace.
//!
//! The agent passes a command line without the `git` prefix. It is tokenized
//! with shell quoting rules and executed directly (no shell) with the workspace
//! as working directory. Results are always text:
//! - exit 0: trimmed stdout
//! - non-zero exit: `[stderr]\n<stderr>`
//! - launch failure, timeout or bad quoting: `[error] <reason>`

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use super::{str_arg, ExecutionContext, Tool, ToolError, ToolResult};

/// Default timeout for git commands in seconds.
pub const DEFAULT_GIT_TIMEOUT_SECS: u64 = 15;

/// Subcommands agents may not run by default.
pub const DEFAULT_DENIED_SUBCOMMANDS: &[&str] = &["commit", "push"];

/// Options that would point git at another repository or binary.
const RELOCATING_OPTIONS: &[&str] = &["-C", "--git-dir", "--work-tree", "--exec-path"];

/// Global options that set configuration for one invocation. Configuration can
/// define aliases and helper programs, so it never comes from the agent.
const CONFIG_OPTIONS: &[&str] = &["-c", "--config-env"];

/// Subcommands that write configuration or run programs of the caller's
/// choosing. Refused regardless of the configured deny list.
const RESTRICTED_SUBCOMMANDS: &[&str] = &[
    "config",
    "submodule",
    "bisect",
    "difftool",
    "mergetool",
    "filter-branch",
    "instaweb",
    "daemon",
];

/// Options naming a program for git to run.
const PROGRAM_OPTIONS: &[&str] = &[
    "--upload-pack",
    "--receive-pack",
    "--exec",
    "--extcmd",
    "--ext-diff",
    "--open-files-in-pager",
];

/// Split a command line into words using POSIX shell quoting rules.
pub fn tokenize(input: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err("No closing quotation".to_string()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some('\n') => {}
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err("No closing quotation".to_string()),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err("No closing quotation".to_string()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some('\n') => {}
                    Some(ch) => current.push(ch),
                    None => return Err("No escaped character".to_string()),
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Tool for running git inside one repository workspace.
#[derive(Debug, Clone)]
pub struct GitTool {
    root: PathBuf,
    timeout_secs: u64,
    denied_subcommands: Vec<String>,
}

impl GitTool {
    /// Bind to a repository root with the default timeout and deny list.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|e| {
            ToolError::FilesystemError(format!("cannot open root '{}': {}", root.display(), e))
        })?;
        Ok(Self {
            root,
            timeout_secs: DEFAULT_GIT_TIMEOUT_SECS,
            denied_subcommands: DEFAULT_DENIED_SUBCOMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        })
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_denied_subcommands<I, S>(mut self, subcommands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denied_subcommands = subcommands.into_iter().map(Into::into).collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Run a git command and render the outcome as text.
    pub async fn run(&self, command: &str) -> String {
        match self.run_checked(command).await {
            Ok(result) => result.to_text(),
            Err(e) => e.to_string(),
        }
    }

    /// Run a git command; confinement and policy violations are errors, all
    /// other outcomes are results.
    pub async fn run_checked(&self, command: &str) -> Result<ToolResult, ToolError> {
        let args = match tokenize(command) {
            Ok(args) => args,
            Err(reason) => return Ok(ToolResult::failure(format!("[error] {}", reason))),
        };
        self.check_confinement(&args)?;
        self.check_policy(&args)?;

        let child = Command::new("git")
            .args(&args)
            .current_dir(&self.root)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match timeout(Duration::from_secs(self.timeout_secs), child).await {
            Err(_) => {
                return Ok(ToolResult::failure(format!(
                    "[error] git {} timed out after {} seconds",
                    args.first().map(String::as_str).unwrap_or(""),
                    self.timeout_secs
                )))
            }
            Ok(Err(e)) => return Ok(ToolResult::failure(format!("[error] {}", e))),
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            Ok(ToolResult::success(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ))
        } else {
            Ok(ToolResult::failure(format!(
                "[stderr]\n{}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn check_confinement(&self, args: &[String]) -> Result<(), ToolError> {
        for arg in args {
            let option = arg.split('=').next().unwrap_or(arg);
            if RELOCATING_OPTIONS.contains(&option) || (arg.starts_with("-C") && arg.len() > 2) {
                return Err(not_allowed(option));
            }

            let value = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with('-') => value,
                _ => arg.as_str(),
            };
            if escapes_root(&self.root, value) {
                return Err(ToolError::AccessDenied(format!(
                    "'{}' is outside of root directory.",
                    value
                )));
            }
        }
        Ok(())
    }

    fn check_policy(&self, args: &[String]) -> Result<(), ToolError> {
        for arg in global_options(args) {
            let option = arg.split('=').next().unwrap_or(arg);
            if CONFIG_OPTIONS.contains(&option) || (arg.starts_with("-c") && !arg.starts_with("--")) {
                return Err(not_allowed(option));
            }
        }

        let Some(subcommand) = subcommand(args) else {
            return Ok(());
        };
        if RESTRICTED_SUBCOMMANDS.contains(&subcommand) {
            return Err(ToolError::AccessDenied(format!(
                "git {} is not available to agents",
                subcommand
            )));
        }
        if self.denied_subcommands.iter().any(|d| d == subcommand) {
            return Err(ToolError::AccessDenied(format!(
                "git {} is reserved for the task runner",
                subcommand
            )));
        }

        for arg in args {
            let option = arg.split('=').next().unwrap_or(arg);
            let exec_flag = subcommand == "rebase" && arg.starts_with("-x");
            let pager_flag = subcommand == "grep" && arg.starts_with("-O");
            if PROGRAM_OPTIONS.contains(&option) || exec_flag || pager_flag {
                return Err(not_allowed(option));
            }
        }
        Ok(())
    }
}

fn not_allowed(option: &str) -> ToolError {
    ToolError::AccessDenied(format!("option '{}' is not allowed", option))
}

/// Options given before the subcommand.
fn global_options(args: &[String]) -> impl Iterator<Item = &String> {
    args.iter().take_while(|arg| arg.starts_with('-'))
}

/// The first non-option word.
fn subcommand(args: &[String]) -> Option<&str> {
    args.iter()
        .find(|arg| !arg.starts_with('-'))
        .map(String::as_str)
}

/// Whether a path-like argument lexically leaves `root`.
fn escapes_root(root: &Path, value: &str) -> bool {
    let path = Path::new(value);
    if path.is_absolute() {
        return !path.starts_with(root);
    }
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if depth == 0 {
                    return true;
                }
                depth -= 1;
            }
            Component::Normal(_) => depth += 1,
            _ => {}
        }
    }
    false
}

#[async_trait]
impl Tool for GitTool {
    fn name(&self) -> &str {
        "git"
    }

    fn description(&self) -> &str {
        "Run a git command in the repository, without the 'git' prefix. Usage: `git status`, `git diff`, `git log --oneline -5`"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Git command line without the leading 'git'"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolResult, ToolError> {
        let command = str_arg(&args, "command")?;
        self.run_checked(command).await
    }
}
