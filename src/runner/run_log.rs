//! Human-readable results log (`logs/results.log`).
//!
//! Opening the log truncates it and writes the run header. Each task then
//! takes an [`EntryGuard`] for its whole block, so lines of different tasks
//! never interleave. Every line is flushed as soon as it is written.

use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::ServiceError;
use crate::llm::UsageOutcome;
use crate::swe::EvaluationResult;

/// Append handle of the results log.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl RunLog {
    /// Truncates `path` and writes the run header.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await?;

        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "?".to_string());
        let header = format!("--- Starting new run on {} at {} ---\n", host_name(), cwd);
        file.write_all(header.as_bytes()).await?;
        file.flush().await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts the block of one task; the block stays exclusive until the
    /// guard is dropped.
    pub async fn entry(&self, index: u32) -> io::Result<EntryGuard<'_>> {
        let mut guard = EntryGuard {
            file: self.file.lock().await,
        };
        guard.line(format!("\n--- TESTCASE {} ---", index)).await?;
        Ok(guard)
    }
}

/// Exclusive writer for one task's block.
pub struct EntryGuard<'a> {
    file: MutexGuard<'a, File>,
}

impl EntryGuard<'_> {
    pub async fn line(&mut self, text: impl Display) -> io::Result<()> {
        self.file.write_all(format!("{}\n", text).as_bytes()).await?;
        self.file.flush().await
    }

    pub async fn usage(&mut self, outcome: &UsageOutcome) -> io::Result<()> {
        match outcome {
            UsageOutcome::Recorded(record) => {
                self.line(format!("Model: {}", record.model)).await?;
                self.line(format!("Total Tokens Used: {}", record.total_tokens))
                    .await?;
                self.line(format!("Total Cost: {:.4}", record.total_cost))
                    .await
            }
            UsageOutcome::NoData(reason) => self.line(format!("No Token Info: {}", reason)).await,
        }
    }

    pub async fn evaluation(
        &mut self,
        result: &Result<EvaluationResult, ServiceError>,
    ) -> io::Result<()> {
        match result {
            Ok(result) => {
                self.line(format!("FAIL_TO_PASS passed: {}", result.fail_to_pass))
                    .await?;
                self.line(format!("PASS_TO_PASS passed: {}", result.pass_to_pass))
                    .await
            }
            Err(e) => {
                self.line(format!("Error calling SWE-Bench Test service: {}", e))
                    .await
            }
        }
    }

    pub async fn error(&mut self, error: impl Display) -> io::Result<()> {
        self.line(format!("Error: {}", error)).await
    }
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}
