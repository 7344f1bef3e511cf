//! Batch runner for benchmark tasks.
//!
//! # Architecture
//!
//! ```text
//! TaskSource → Workspace (repos/repo_{i}) → GroupChat → commit
//!            → UsageAccountant → Evaluator → RunLog
//! ```
//!
//! The runner:
//! 1. Fetches each task of the configured index range
//! 2. Clones and checks out the task's repository
//! 3. Lets the agents work on the checkout and commits their changes
//! 4. Records token usage and the evaluation counts in `logs/results.log`
//!
//! # Example
//!
//! ```ignore
//! use swe_crew::runner::{RunLog, RunnerConfig, TaskRunner};
//!
//! let config = RunnerConfig::from_yaml_file("swe-crew.yaml")?;
//! let log = RunLog::open(config.log_file()).await?;
//! let runner = TaskRunner::new(config, tasks, evaluator, llm);
//! let summary = runner.run_batch(&log).await;
//! println!("{}", summary);
//! ```

pub mod config;
pub mod run_log;
pub mod task;
pub mod workspace;

pub use config::{ConfigError, RunnerConfig};
pub use run_log::{EntryGuard, RunLog};
pub use task::{BatchSummary, Stage, StageError, TaskReport, TaskRunner};
pub use workspace::Workspace;
