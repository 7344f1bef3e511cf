//! Per-task pipeline and batch driver.
//!
//! ```text
//! fetch → workspace → conversation → commit → usage → evaluation → log
//! ```
//!
//! Each stage is isolated: a failure is recorded as a [`StageError`], written
//! to the run log and the remaining independent stages still run. Once the
//! task has been fetched, evaluation always happens.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::config::RunnerConfig;
use super::run_log::{EntryGuard, RunLog};
use super::workspace::Workspace;
use crate::agents::{ChatOutcome, GroupChat, Manager, Role, Roster, SpeakerSelection, Termination};
use crate::llm::{LlmProvider, PriceTable, UsageAccountant, UsageOutcome, UsageRecord};
use crate::scaffold::{build_toolbox, CodeExecutor, DockerCodeExecutor};
use crate::swe::{EvaluationRequest, EvaluationResult, Evaluator, TaskSource, TaskSpec};

/// Pipeline stages that can fail independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Workspace,
    Conversation,
    Commit,
    Evaluation,
    Transcript,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetch => "fetch",
            Self::Workspace => "workspace",
            Self::Conversation => "conversation",
            Self::Commit => "commit",
            Self::Evaluation => "evaluation",
            Self::Transcript => "transcript",
        };
        write!(f, "{}", name)
    }
}

/// A failed stage of one task.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("{stage}: {message}")]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, message: impl fmt::Display) -> Self {
        Self {
            stage,
            message: message.to_string(),
        }
    }
}

/// What happened to one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub index: u32,
    pub instance_id: Option<String>,
    pub termination: Option<Termination>,
    pub rounds: usize,
    pub commit: Option<String>,
    pub usage: Option<UsageRecord>,
    pub evaluation: Option<EvaluationResult>,
    pub errors: Vec<StageError>,
}

impl TaskReport {
    fn new(index: u32) -> Self {
        Self {
            index,
            instance_id: None,
            termination: None,
            rounds: 0,
            commit: None,
            usage: None,
            evaluation: None,
            errors: Vec::new(),
        }
    }

    pub fn resolved(&self) -> bool {
        self.evaluation.as_ref().is_some_and(EvaluationResult::resolved)
    }

    pub fn failed_stage(&self, stage: Stage) -> bool {
        self.errors.iter().any(|e| e.stage == stage)
    }
}

/// Totals over a batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub evaluated: usize,
    pub resolved: usize,
    pub total_cost: f64,
    pub tasks: Vec<TaskReport>,
}

impl BatchSummary {
    fn push(&mut self, report: TaskReport) {
        self.attempted += 1;
        if report.evaluation.is_some() {
            self.evaluated += 1;
        }
        if report.resolved() {
            self.resolved += 1;
        }
        if let Some(usage) = &report.usage {
            self.total_cost += usage.total_cost;
        }
        self.tasks.push(report);
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tasks attempted: {}", self.attempted)?;
        writeln!(f, "Tasks evaluated: {}", self.evaluated)?;
        writeln!(f, "Tasks resolved:  {}", self.resolved)?;
        write!(f, "Total cost:      ${:.4}", self.total_cost)
    }
}

#[derive(Serialize)]
struct TranscriptFile<'a> {
    index: u32,
    instance_id: &'a str,
    #[serde(flatten)]
    outcome: &'a ChatOutcome,
}

/// Runs tasks through the full pipeline.
pub struct TaskRunner {
    config: RunnerConfig,
    tasks: Arc<dyn TaskSource>,
    evaluator: Arc<dyn Evaluator>,
    llm: Arc<dyn LlmProvider>,
    prices: PriceTable,
    accountant: UsageAccountant,
}

impl TaskRunner {
    pub fn new(
        config: RunnerConfig,
        tasks: Arc<dyn TaskSource>,
        evaluator: Arc<dyn Evaluator>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        if config.enable_reviewer {
            warn!("Reviewer agent enabled: it has been seen to keep conversations looping");
        }
        let accountant = UsageAccountant::new(config.model_selection.clone());
        Self {
            config,
            tasks,
            evaluator,
            llm,
            prices: PriceTable::default(),
            accountant,
        }
    }

    pub fn with_prices(mut self, prices: PriceTable) -> Self {
        self.prices = prices;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs every configured task index in order.
    pub async fn run_batch(&self, log: &RunLog) -> BatchSummary {
        let indices = self.config.task_indices();
        info!(
            tasks = indices.len(),
            start = self.config.start,
            end = self.config.end,
            step = self.config.step,
            "Starting batch"
        );

        let mut summary = BatchSummary::default();
        for index in indices {
            summary.push(self.run_task(index, log).await);
        }

        info!(
            attempted = summary.attempted,
            evaluated = summary.evaluated,
            resolved = summary.resolved,
            total_cost = summary.total_cost,
            "Batch finished"
        );
        summary
    }

    /// Runs one task and writes its block to the run log.
    pub async fn run_task(&self, index: u32, log: &RunLog) -> TaskReport {
        let mut report = TaskReport::new(index);
        let mut entry = match log.entry(index).await {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(index, error = %e, "Cannot write to run log");
                None
            }
        };

        info!(index, "Fetching task");
        let task = match self.tasks.fetch(index).await {
            Ok(task) => task,
            Err(e) => {
                let error = StageError::new(Stage::Fetch, e);
                record_failure(&mut report, &mut entry, error).await;
                return report;
            }
        };
        report.instance_id = Some(task.instance_id.clone());

        let repo_dir = self.config.repo_dir(index);
        let workspace = Workspace::new(&repo_dir).with_git_timeout(self.config.git_timeout_secs);

        let prepared = match self.prepare_workspace(&task, &workspace).await {
            Ok(()) => true,
            Err(error) => {
                record_failure(&mut report, &mut entry, error).await;
                false
            }
        };

        // A reused clone whose checkout failed is still worth working on.
        let outcome = if prepared || workspace.exists() {
            match self.converse(&task, workspace.path()).await {
                Ok(outcome) => Some(outcome),
                Err(error) => {
                    record_failure(&mut report, &mut entry, error).await;
                    None
                }
            }
        } else {
            None
        };

        if let Some(outcome) = &outcome {
            report.termination = Some(outcome.termination);
            report.rounds = outcome.rounds;

            let message = format!("Solved task {} automatically", task.instance_id);
            match workspace
                .stage_and_commit(&self.config.stage_paths, &message)
                .await
            {
                Ok(commit) => report.commit = Some(commit),
                Err(e) => {
                    let error = StageError::new(Stage::Commit, e);
                    record_failure(&mut report, &mut entry, error).await;
                }
            }
        }

        let usage = match &outcome {
            Some(outcome) => self.accountant.extract(&outcome.cost),
            None => UsageOutcome::NoData("no conversation was held".to_string()),
        };
        if let UsageOutcome::NoData(reason) = &usage {
            warn!(index, reason = %reason, "No usage data");
        }
        report.usage = usage.record().cloned();
        if let Some(entry) = entry.as_mut() {
            write_or_warn(index, entry.usage(&usage).await);
        }

        let request = EvaluationRequest {
            instance_id: task.instance_id.clone(),
            repo_dir: self.config.container_repo_dir(index),
            fail_to_pass: task.fail_to_pass.clone(),
            pass_to_pass: task.pass_to_pass.clone(),
        };
        let evaluation = self.evaluator.evaluate(&request).await;
        if let Some(entry) = entry.as_mut() {
            write_or_warn(index, entry.evaluation(&evaluation).await);
        }
        match evaluation {
            Ok(result) => report.evaluation = Some(result),
            Err(e) => {
                warn!(index, error = %e, "Evaluation failed");
                report.errors.push(StageError::new(Stage::Evaluation, e));
            }
        }

        if let (true, Some(outcome)) = (self.config.save_transcripts, &outcome) {
            if let Err(error) = self.save_transcript(&task, outcome).await {
                record_failure(&mut report, &mut entry, error).await;
            }
        }

        info!(
            index,
            instance_id = %task.instance_id,
            resolved = report.resolved(),
            errors = report.errors.len(),
            "Task finished"
        );
        report
    }

    async fn prepare_workspace(
        &self,
        task: &TaskSpec,
        workspace: &Workspace,
    ) -> Result<(), StageError> {
        let instruction = task
            .clone_instruction()
            .map_err(|e| StageError::new(Stage::Workspace, e))?;
        workspace
            .prepare(&instruction)
            .await
            .map_err(|e| StageError::new(Stage::Workspace, e))?;
        Ok(())
    }

    async fn converse(&self, task: &TaskSpec, repo_dir: &Path) -> Result<ChatOutcome, StageError> {
        let stage_error = |e: &dyn fmt::Display| StageError::new(Stage::Conversation, e);

        let executor: Option<Arc<dyn CodeExecutor>> = if self.config.enable_exec {
            let executor = DockerCodeExecutor::new(repo_dir)
                .map_err(|e| stage_error(&e))?
                .with_image(self.config.exec_image.clone())
                .with_timeout(self.config.exec_timeout_secs);
            Some(Arc::new(executor))
        } else {
            None
        };

        let toolbox = build_toolbox(repo_dir, executor.clone(), &self.config.toolbox_options())
            .map_err(|e| stage_error(&e))?;
        let agent_config = self.config.agent_config();
        let repo_display = repo_dir.display().to_string();

        let roster = Roster::for_workspace(
            &Role::default_roster(self.config.enable_reviewer),
            &repo_display,
            &toolbox,
            self.llm.clone(),
            &agent_config,
        )
        .map_err(|e| stage_error(&e))?;

        let chat_config = self.config.group_chat_config();
        let manager = (chat_config.speaker_selection == SpeakerSelection::Auto)
            .then(|| Manager::new(self.llm.clone(), agent_config.clone()));
        let chat = GroupChat::new(roster, chat_config, manager)
            .map_err(|e| stage_error(&e))?
            .with_prices(self.prices.clone());

        info!(
            instance_id = %task.instance_id,
            repo_dir = %repo_display,
            "Starting conversation"
        );
        let outcome = chat.run(&task.problem_statement).await;
        info!(
            instance_id = %task.instance_id,
            termination = %outcome.termination,
            rounds = outcome.rounds,
            "Conversation ended"
        );

        if let Some(executor) = executor {
            if let Err(e) = executor.shutdown().await {
                warn!(error = %e, "Failed to shut down code executor");
            }
        }
        Ok(outcome)
    }

    async fn save_transcript(&self, task: &TaskSpec, outcome: &ChatOutcome) -> Result<(), StageError> {
        let path = self.config.transcript_file(task.index);
        let file = TranscriptFile {
            index: task.index,
            instance_id: &task.instance_id,
            outcome,
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| StageError::new(Stage::Transcript, e))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StageError::new(Stage::Transcript, e))?;
        }
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| StageError::new(Stage::Transcript, e))?;
        info!(path = %path.display(), "Saved transcript");
        Ok(())
    }
}

async fn record_failure(
    report: &mut TaskReport,
    entry: &mut Option<EntryGuard<'_>>,
    error: StageError,
) {
    warn!(index = report.index, stage = %error.stage, error = %error.message, "Stage failed");
    if let Some(entry) = entry.as_mut() {
        write_or_warn(report.index, entry.error(&error).await);
    }
    report.errors.push(error);
}

fn write_or_warn(index: u32, result: std::io::Result<()>) {
    if let Err(e) = result {
        warn!(index, error = %e, "Cannot write to run log");
    }
}
