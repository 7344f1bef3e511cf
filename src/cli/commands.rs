//! CLI command definitions for swe-crew.
//!
//! `swe-crew run` drives a batch of benchmark tasks through the agent crew;
//! `swe-crew config` prints the effective configuration.

use crate::agents::SpeakerSelection;
use crate::llm::{LiteLlmClient, LlmProvider, ModelSelection};
use crate::runner::{RunLog, RunnerConfig, TaskRunner};
use crate::swe::{HttpEvaluator, HttpTaskSource};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Multi-agent orchestration for SWE-bench style tasks.
#[derive(Parser)]
#[command(name = "swe-crew")]
#[command(about = "Let a planner/coder agent crew resolve SWE-bench tasks and evaluate the result")]
#[command(version)]
#[command(
    long_about = "swe-crew fetches benchmark tasks by index, clones each repository, lets a group of LLM agents edit it, commits the result and submits it to an evaluation service.\n\nExample usage:\n  swe-crew run --start 1 --end 100 --step 5 --model gpt-4o"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a batch of tasks.
    Run(Box<RunArgs>),

    /// Print the effective configuration as YAML.
    Config(ConfigArgs),
}

/// Output format of the batch summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Settings shared by `run` and `config`; each flag overrides the file.
#[derive(Parser, Debug, Default)]
pub struct ConfigOverrides {
    /// YAML configuration file.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// First task index (inclusive).
    #[arg(long)]
    pub start: Option<u32>,

    /// Last task index (exclusive).
    #[arg(long)]
    pub end: Option<u32>,

    /// Distance between task indices.
    #[arg(long)]
    pub step: Option<u32>,

    /// Run only this task index.
    #[arg(short = 't', long, conflicts_with_all = ["start", "end", "step"])]
    pub task: Option<u32>,

    /// Directory for repository checkouts.
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Directory for results.log and transcripts.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Base URL of the task-index service.
    #[arg(long, env = "TASK_API_URL")]
    pub task_api_url: Option<String>,

    /// Base URL of the evaluation service.
    #[arg(long, env = "EVAL_API_URL")]
    pub eval_api_url: Option<String>,

    /// OpenAI-compatible API base (LiteLLM proxy).
    #[arg(long, env = "LITELLM_API_BASE")]
    pub api_base: Option<String>,

    /// API key for the LLM backend.
    #[arg(long, env = "LITELLM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model used by every agent.
    #[arg(short = 'm', long, env = "SWE_CREW_MODEL")]
    pub model: Option<String>,

    /// Maximum conversation rounds per task (1-50).
    #[arg(long)]
    pub max_rounds: Option<usize>,

    /// Speaker selection: round_robin or auto.
    #[arg(long)]
    pub speaker_selection: Option<SpeakerSelection>,

    /// Usage reported per task: first, aggregate or model:<name>.
    #[arg(long)]
    pub model_selection: Option<ModelSelection>,

    /// Add the reviewer agent to the roster.
    #[arg(long)]
    pub enable_reviewer: bool,

    /// Give the coder a Docker-backed exec tool.
    #[arg(long)]
    pub enable_exec: bool,

    /// Save each conversation to logs/transcripts/task_{index}.json.
    #[arg(long)]
    pub save_transcripts: bool,
}

impl ConfigOverrides {
    /// Loads the config file (or defaults) and applies the flags.
    pub fn resolve(&self) -> anyhow::Result<RunnerConfig> {
        let mut config = match &self.config {
            Some(path) => RunnerConfig::from_yaml_file(path)?,
            None => RunnerConfig::default(),
        };

        if let Some(index) = self.task {
            config.start = index;
            config.end = index.saturating_add(1);
            config.step = 1;
        }
        if let Some(start) = self.start {
            config.start = start;
        }
        if let Some(end) = self.end {
            config.end = end;
        }
        if let Some(step) = self.step {
            config.step = step;
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
        }
        if let Some(url) = &self.task_api_url {
            config.task_api_url = url.clone();
        }
        if let Some(url) = &self.eval_api_url {
            config.eval_api_url = url.clone();
        }
        if let Some(base) = &self.api_base {
            config.api_base = Some(base.clone());
        }
        if let Some(key) = &self.api_key {
            config.api_key = Some(key.clone());
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(max_rounds) = self.max_rounds {
            config.max_rounds = max_rounds;
        }
        if let Some(selection) = self.speaker_selection {
            config.speaker_selection = selection;
        }
        if let Some(selection) = &self.model_selection {
            config.model_selection = selection.clone();
        }
        config.enable_reviewer |= self.enable_reviewer;
        config.enable_exec |= self.enable_exec;
        config.save_transcripts |= self.save_transcripts;

        config.validate()?;
        Ok(config)
    }
}

/// Arguments for `swe-crew run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub overrides: ConfigOverrides,

    /// Format of the summary printed at the end.
    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Arguments for `swe-crew config`.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse the process arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_batch_command(*args).await,
        Commands::Config(args) => run_config_command(args),
    }
}

// ============================================================================
// Command implementations
// ============================================================================

async fn run_batch_command(args: RunArgs) -> anyhow::Result<()> {
    let config = args.overrides.resolve()?;
    let llm = build_llm_client(&config)?;

    tokio::fs::create_dir_all(&config.work_dir).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to create work directory {}: {}",
            config.work_dir.display(),
            e
        )
    })?;
    let log = RunLog::open(config.log_file()).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to open run log {}: {}",
            config.log_file().display(),
            e
        )
    })?;

    info!(
        model = %config.model,
        task_api = %config.task_api_url,
        eval_api = %config.eval_api_url,
        log = %log.path().display(),
        "Configuration loaded"
    );

    let tasks = Arc::new(HttpTaskSource::new(config.task_api_url.clone()));
    let evaluator = Arc::new(HttpEvaluator::new(config.eval_api_url.clone()));
    let runner = TaskRunner::new(config, tasks, evaluator, llm);

    let summary = runner.run_batch(&log).await;

    match args.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&summary)
                .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            println!("{}", summary);
            println!("Results written to {}", log.path().display());
        }
    }
    Ok(())
}

fn run_config_command(args: ConfigArgs) -> anyhow::Result<()> {
    let config = args.overrides.resolve()?;
    let yaml = serde_yaml::to_string(&config)
        .map_err(|e| anyhow::anyhow!("Failed to serialize configuration: {}", e))?;
    print!("{}", yaml);
    Ok(())
}

fn build_llm_client(config: &RunnerConfig) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let api_base = config.api_base.clone().ok_or_else(|| {
        anyhow::anyhow!(
            "No LLM backend configured. Provide --api-base or set the LITELLM_API_BASE env var."
        )
    })?;
    info!(api_base = %api_base, model = %config.model, "Using LiteLLM backend");
    Ok(Arc::new(LiteLlmClient::new(
        api_base,
        config.api_key.clone(),
        config.model.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn clear_env() {
        for var in [
            "TASK_API_URL",
            "EVAL_API_URL",
            "LITELLM_API_BASE",
            "LITELLM_API_KEY",
            "SWE_CREW_MODEL",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_defaults() {
        clear_env();
        let cli = Cli::try_parse_from(["swe-crew", "run"]).expect("should parse");

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.format, OutputFormat::Text);
                let config = args.overrides.resolve().unwrap();
                assert_eq!(config.task_indices().len(), 20);
                assert_eq!(config.max_rounds, 7);
                assert!(!config.enable_reviewer);
            }
            _ => panic!("Expected Run command"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_run_command_with_options() {
        let cli = Cli::try_parse_from([
            "swe-crew",
            "run",
            "--start",
            "11",
            "--end",
            "30",
            "--step",
            "2",
            "-m",
            "gpt-4o-mini",
            "--max-rounds",
            "12",
            "--speaker-selection",
            "auto",
            "--model-selection",
            "model:gpt-4o-mini",
            "--save-transcripts",
            "--task-api-url",
            "http://tasks:8081/task/index",
            "-f",
            "json",
            "--log-level",
            "debug",
        ])
        .expect("should parse");

        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.format, OutputFormat::Json);
                let config = args.overrides.resolve().unwrap();
                assert_eq!(config.task_indices().first(), Some(&11));
                assert_eq!(config.model, "gpt-4o-mini");
                assert_eq!(config.max_rounds, 12);
                assert_eq!(config.speaker_selection, SpeakerSelection::Auto);
                assert_eq!(
                    config.model_selection,
                    ModelSelection::Named("gpt-4o-mini".into())
                );
                assert!(config.save_transcripts);
                assert_eq!(config.task_api_url, "http://tasks:8081/task/index");
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_single_task_flag() {
        let cli = Cli::try_parse_from(["swe-crew", "run", "--task", "42"]).expect("should parse");
        let Commands::Run(args) = cli.command else {
            panic!("Expected Run command");
        };
        assert_eq!(args.overrides.resolve().unwrap().task_indices(), vec![42]);

        assert!(Cli::try_parse_from(["swe-crew", "run", "--task", "1", "--start", "2"]).is_err());
    }

    #[test]
    fn test_invalid_overrides_are_rejected() {
        let cli = Cli::try_parse_from(["swe-crew", "config", "--max-rounds", "0"])
            .expect("should parse");
        let Commands::Config(args) = cli.command else {
            panic!("Expected Config command");
        };
        assert!(args.overrides.resolve().is_err());

        assert!(Cli::try_parse_from(["swe-crew", "run", "--speaker-selection", "loud"]).is_err());
    }

    #[test]
    fn test_config_file_with_flag_override() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("swe-crew.yaml");
        std::fs::write(&path, "max_rounds: 9\nmodel: from-file\nstep: 10\n").unwrap();

        let cli = Cli::try_parse_from([
            "swe-crew",
            "config",
            "--config",
            path.to_str().unwrap(),
            "--model",
            "from-flag",
        ])
        .expect("should parse");
        let Commands::Config(args) = cli.command else {
            panic!("Expected Config command");
        };
        let config = args.overrides.resolve().unwrap();
        assert_eq!(config.max_rounds, 9);
        assert_eq!(config.step, 10);
        assert_eq!(config.model, "from-flag");
    }

    #[test]
    fn test_missing_api_base_is_reported() {
        let config = RunnerConfig::default();
        let err = build_llm_client(&config).err().unwrap();
        assert!(err.to_string().contains("LITELLM_API_BASE"));
    }
}
