//! Configuration for batch runs.
//!
//! Defaults reproduce the reference deployment: tasks 1, 6, 11, ... 96 from
//! the local task service, repositories under `repos/`, the run log at
//! `logs/results.log` and evaluation against `/repos/repo_{index}` as the
//! evaluation container sees it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agents::{AgentConfig, GroupChatConfig, SpeakerSelection, MAX_ROUNDS_LIMIT};
use crate::llm::{ModelSelection, DEFAULT_MODEL};
use crate::scaffold::tools::exec::{DEFAULT_EXEC_IMAGE, DEFAULT_EXEC_TIMEOUT_SECS};
use crate::scaffold::tools::git::{DEFAULT_DENIED_SUBCOMMANDS, DEFAULT_GIT_TIMEOUT_SECS};
use crate::scaffold::ToolBoxOptions;
use crate::swe::evaluation::DEFAULT_EVAL_API_URL;
use crate::swe::task_client::DEFAULT_TASK_API_URL;

/// Upper bound for the git timeout.
pub const MAX_GIT_TIMEOUT_SECS: u64 = 120;

/// Errors in the run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything a batch run needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Directory holding `repo_{index}` checkouts.
    pub work_dir: PathBuf,
    /// Directory holding `results.log` and transcripts.
    pub log_dir: PathBuf,
    /// Where the evaluation service sees `work_dir`.
    pub container_repo_root: String,

    /// First task index (inclusive).
    pub start: u32,
    /// Last task index (exclusive).
    pub end: u32,
    pub step: u32,

    pub task_api_url: String,
    pub eval_api_url: String,

    pub api_base: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: u32,

    pub max_rounds: usize,
    pub speaker_selection: SpeakerSelection,
    /// Adds the reviewer to the roster.
    pub enable_reviewer: bool,
    pub max_auto_replies: u32,
    pub max_tool_steps: usize,

    pub git_timeout_secs: u64,
    pub denied_git_subcommands: Vec<String>,
    /// Pathspecs staged before the commit.
    pub stage_paths: Vec<String>,

    /// Gives the coder an `exec` tool backed by a Docker container.
    pub enable_exec: bool,
    pub exec_image: String,
    pub exec_timeout_secs: u64,

    pub model_selection: ModelSelection,
    /// Writes `transcripts/task_{index}.json` under `log_dir`.
    pub save_transcripts: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("repos"),
            log_dir: PathBuf::from("logs"),
            container_repo_root: "/repos".to_string(),
            start: 1,
            end: 100,
            step: 5,
            task_api_url: DEFAULT_TASK_API_URL.to_string(),
            eval_api_url: DEFAULT_EVAL_API_URL.to_string(),
            api_base: None,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            max_tokens: 8096,
            max_rounds: 7,
            speaker_selection: SpeakerSelection::RoundRobin,
            enable_reviewer: false,
            max_auto_replies: 7,
            max_tool_steps: 8,
            git_timeout_secs: DEFAULT_GIT_TIMEOUT_SECS,
            denied_git_subcommands: DEFAULT_DENIED_SUBCOMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            stage_paths: vec![".".to_string()],
            enable_exec: false,
            exec_image: DEFAULT_EXEC_IMAGE.to_string(),
            exec_timeout_secs: DEFAULT_EXEC_TIMEOUT_SECS,
            model_selection: ModelSelection::First,
            save_transcripts: false,
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a YAML file; absent keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&text).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }

    pub fn with_range(mut self, start: u32, end: u32, step: u32) -> Self {
        self.start = start;
        self.end = end;
        self.step = step;
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_transcripts(mut self, enabled: bool) -> Self {
        self.save_transcripts = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_ROUNDS_LIMIT).contains(&self.max_rounds) {
            return Err(ConfigError::Invalid(format!(
                "max_rounds must be between 1 and {}, got {}",
                MAX_ROUNDS_LIMIT, self.max_rounds
            )));
        }
        if self.step == 0 {
            return Err(ConfigError::Invalid("step must be greater than 0".to_string()));
        }
        if self.start >= self.end {
            return Err(ConfigError::Invalid(format!(
                "start ({}) must be less than end ({})",
                self.start, self.end
            )));
        }
        if !(1..=MAX_GIT_TIMEOUT_SECS).contains(&self.git_timeout_secs) {
            return Err(ConfigError::Invalid(format!(
                "git_timeout_secs must be between 1 and {}, got {}",
                MAX_GIT_TIMEOUT_SECS, self.git_timeout_secs
            )));
        }
        if self.stage_paths.is_empty() {
            return Err(ConfigError::Invalid(
                "stage_paths must name at least one pathspec".to_string(),
            ));
        }
        if self.stage_paths.iter().any(|p| p.starts_with('-')) {
            return Err(ConfigError::Invalid(
                "stage_paths must not start with '-'".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }
        Ok(())
    }

    /// Task indices of the batch, in order.
    pub fn task_indices(&self) -> Vec<u32> {
        if self.step == 0 {
            return Vec::new();
        }
        (self.start..self.end).step_by(self.step as usize).collect()
    }

    /// Local checkout directory of a task.
    pub fn repo_dir(&self, index: u32) -> PathBuf {
        self.work_dir.join(format!("repo_{}", index))
    }

    /// Checkout directory as the evaluation service sees it.
    pub fn container_repo_dir(&self, index: u32) -> String {
        format!(
            "{}/repo_{}",
            self.container_repo_root.trim_end_matches('/'),
            index
        )
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join("results.log")
    }

    pub fn transcript_file(&self, index: u32) -> PathBuf {
        self.log_dir
            .join("transcripts")
            .join(format!("task_{}.json", index))
    }

    pub fn agent_config(&self) -> AgentConfig {
        let config = AgentConfig::new()
            .with_model(self.model.clone())
            .with_max_tokens(self.max_tokens)
            .with_max_auto_replies(self.max_auto_replies)
            .with_max_tool_steps(self.max_tool_steps);
        match self.temperature {
            Some(t) => config.with_temperature(t),
            None => config,
        }
    }

    pub fn group_chat_config(&self) -> GroupChatConfig {
        GroupChatConfig::default()
            .with_max_rounds(self.max_rounds)
            .with_speaker_selection(self.speaker_selection)
    }

    pub fn toolbox_options(&self) -> ToolBoxOptions {
        ToolBoxOptions {
            git_timeout_secs: self.git_timeout_secs,
            denied_git_subcommands: self.denied_git_subcommands.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.task_indices().first(), Some(&1));
        assert_eq!(config.task_indices().last(), Some(&96));
        assert_eq!(config.task_indices().len(), 20);
        assert_eq!(config.repo_dir(1), PathBuf::from("repos/repo_1"));
        assert_eq!(config.container_repo_dir(6), "/repos/repo_6");
        assert_eq!(config.log_file(), PathBuf::from("logs/results.log"));
        assert_eq!(config.stage_paths, vec!["."]);
    }

    #[test]
    fn test_yaml_partial_override() {
        let config = RunnerConfig::from_yaml_str(
            "start: 11\nend: 12\nmax_rounds: 10\nspeaker_selection: auto\nmodel_selection: aggregate\n",
        )
        .unwrap();
        assert_eq!(config.task_indices(), vec![11]);
        assert_eq!(config.max_rounds, 10);
        assert_eq!(config.speaker_selection, SpeakerSelection::Auto);
        assert_eq!(config.model_selection, ModelSelection::Aggregate);
        assert_eq!(config.git_timeout_secs, DEFAULT_GIT_TIMEOUT_SECS);
    }

    #[test]
    fn test_yaml_named_model_selection() {
        let config =
            RunnerConfig::from_yaml_str("model_selection:\n  named: gpt-4o-mini\n").unwrap();
        assert_eq!(
            config.model_selection,
            ModelSelection::Named("gpt-4o-mini".to_string())
        );
    }

    #[test]
    fn test_yaml_parse_error() {
        assert!(matches!(
            RunnerConfig::from_yaml_str("max_rounds: many"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_validation() {
        assert!(RunnerConfig::new().with_max_rounds(0).validate().is_err());
        assert!(RunnerConfig::new().with_max_rounds(51).validate().is_err());
        assert!(RunnerConfig::new().with_max_rounds(50).validate().is_ok());
        assert!(RunnerConfig::new().with_range(5, 5, 1).validate().is_err());
        assert!(RunnerConfig::new().with_range(1, 5, 0).validate().is_err());

        let mut config = RunnerConfig::new();
        config.git_timeout_secs = 0;
        assert!(config.validate().is_err());
        config.git_timeout_secs = 20;
        config.stage_paths = vec!["--all".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_configs() {
        let mut config = RunnerConfig::new().with_model("gpt-4o-mini").with_max_rounds(9);
        config.temperature = Some(0.2);

        let agent = config.agent_config();
        assert_eq!(agent.model, "gpt-4o-mini");
        assert_eq!(agent.temperature, Some(0.2));
        assert_eq!(config.group_chat_config().max_rounds, 9);
        assert_eq!(
            config.toolbox_options().denied_git_subcommands,
            vec!["commit", "push"]
        );
    }
}
