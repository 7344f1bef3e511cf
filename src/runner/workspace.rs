//! Repository checkout owned by one task.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::WorkspaceError;
use crate::scaffold::tools::git::DEFAULT_GIT_TIMEOUT_SECS;
use crate::swe::CloneInstruction;

/// Clones of large repositories take far longer than local git commands.
pub const DEFAULT_CLONE_TIMEOUT_SECS: u64 = 900;

/// Identity used for the automatic commit.
const COMMIT_AUTHOR_NAME: &str = "swe-crew";
const COMMIT_AUTHOR_EMAIL: &str = "swe-crew@localhost";

/// A local checkout at `repos/repo_{index}`.
#[derive(Debug, Clone)]
pub struct Workspace {
    path: PathBuf,
    git_timeout_secs: u64,
    clone_timeout_secs: u64,
}

impl Workspace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            git_timeout_secs: DEFAULT_GIT_TIMEOUT_SECS,
            clone_timeout_secs: DEFAULT_CLONE_TIMEOUT_SECS,
        }
    }

    pub fn with_git_timeout(mut self, seconds: u64) -> Self {
        self.git_timeout_secs = seconds;
        self
    }

    pub fn with_clone_timeout(mut self, seconds: u64) -> Self {
        self.clone_timeout_secs = seconds;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the directory already holds a git checkout.
    pub fn exists(&self) -> bool {
        self.path.join(".git").exists()
    }

    /// Clones the repository if the directory is absent, then checks out the
    /// target. Returns whether a clone happened.
    pub async fn prepare(&self, instruction: &CloneInstruction) -> Result<bool, WorkspaceError> {
        let cloned = if self.exists() {
            debug!(path = %self.path.display(), "Reusing existing checkout");
            false
        } else {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            info!(
                url = %instruction.repo_url,
                path = %self.path.display(),
                "Cloning repository"
            );
            let target = self.path.to_string_lossy().to_string();
            run_git(
                None,
                &["clone", "--", &instruction.repo_url, &target],
                self.clone_timeout_secs,
            )
            .await?;
            true
        };

        info!(checkout = %instruction.checkout, path = %self.path.display(), "Checking out");
        self.git(&["checkout", "--quiet", &instruction.checkout]).await?;
        Ok(cloned)
    }

    /// Stages `pathspecs` and commits them once. Fails when there is nothing
    /// to commit. Repository hooks are not run.
    pub async fn stage_and_commit(
        &self,
        pathspecs: &[String],
        message: &str,
    ) -> Result<String, WorkspaceError> {
        let mut add: Vec<&str> = vec!["add", "--"];
        add.extend(pathspecs.iter().map(String::as_str));
        self.git(&add).await?;

        self.git(&[
            "-c",
            &format!("user.name={}", COMMIT_AUTHOR_NAME),
            "-c",
            &format!("user.email={}", COMMIT_AUTHOR_EMAIL),
            "commit",
            "--quiet",
            "--no-verify",
            "-m",
            message,
        ])
        .await?;

        let head = self.git(&["rev-parse", "HEAD"]).await?;
        info!(commit = %head, path = %self.path.display(), "Committed changes");
        Ok(head)
    }

    /// Current commit of the checkout.
    pub async fn head(&self) -> Result<String, WorkspaceError> {
        self.git(&["rev-parse", "HEAD"]).await
    }

    async fn git(&self, args: &[&str]) -> Result<String, WorkspaceError> {
        run_git(Some(&self.path), args, self.git_timeout_secs).await
    }
}

async fn run_git(
    dir: Option<&Path>,
    args: &[&str],
    timeout_secs: u64,
) -> Result<String, WorkspaceError> {
    let command_name = args
        .iter()
        .find(|a| !a.starts_with('-') && !a.contains('='))
        .copied()
        .unwrap_or("")
        .to_string();

    let mut command = Command::new("git");
    command
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }

    let output = match timeout(Duration::from_secs(timeout_secs), command.output()).await {
        Err(_) => {
            return Err(WorkspaceError::GitTimeout {
                command: command_name,
                seconds: timeout_secs,
            })
        }
        Ok(result) => result?,
    };

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Err(WorkspaceError::GitFailed {
            command: command_name,
            code: output.status.code().unwrap_or(-1),
            stderr: if stderr.is_empty() { stdout } else { stderr },
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "t")
            .env("GIT_AUTHOR_EMAIL", "t@t")
            .env("GIT_COMMITTER_NAME", "t")
            .env("GIT_COMMITTER_EMAIL", "t@t")
            .output()
            .unwrap();
        assert!(output.status.success(), "git {:?}: {:?}", args, output);
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// An upstream repository with one commit on `main`; returns its URL and
    /// the commit id.
    pub(crate) fn upstream_repo(dir: &Path) -> (String, String) {
        let upstream = dir.join("upstream");
        std::fs::create_dir_all(&upstream).unwrap();
        git(&upstream, &["init", "--quiet", "--initial-branch=main"]);
        std::fs::write(upstream.join("calc.py"), "def div(a, b):\n    return a / b\n").unwrap();
        git(&upstream, &["add", "."]);
        git(&upstream, &["commit", "--quiet", "-m", "initial"]);
        let head = git(&upstream, &["rev-parse", "HEAD"]);
        (upstream.to_string_lossy().to_string(), head)
    }

    #[tokio::test]
    async fn test_prepare_clones_then_reuses() {
        let dir = TempDir::new().unwrap();
        let (url, head) = upstream_repo(dir.path());
        let workspace = Workspace::new(dir.path().join("repos").join("repo_1"));
        let instruction = CloneInstruction {
            repo_url: url,
            checkout: head.clone(),
        };

        assert!(workspace.prepare(&instruction).await.unwrap());
        assert!(workspace.path().join("calc.py").exists());
        assert_eq!(workspace.head().await.unwrap(), head);

        assert!(!workspace.prepare(&instruction).await.unwrap());
    }

    #[tokio::test]
    async fn test_prepare_unknown_ref_fails() {
        let dir = TempDir::new().unwrap();
        let (url, _) = upstream_repo(dir.path());
        let workspace = Workspace::new(dir.path().join("repo_2"));

        let err = workspace
            .prepare(&CloneInstruction {
                repo_url: url,
                checkout: "does-not-exist".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::GitFailed { ref command, .. } if command == "checkout"));
    }

    #[tokio::test]
    async fn test_stage_and_commit() {
        let dir = TempDir::new().unwrap();
        let (url, head) = upstream_repo(dir.path());
        let workspace = Workspace::new(dir.path().join("repo_3"));
        workspace
            .prepare(&CloneInstruction {
                repo_url: url,
                checkout: "main".into(),
            })
            .await
            .unwrap();

        std::fs::write(
            workspace.path().join("calc.py"),
            "def div(a, b):\n    return a / b if b else 0\n",
        )
        .unwrap();
        let commit = workspace
            .stage_and_commit(&[".".to_string()], "Solved task x__y-1 automatically")
            .await
            .unwrap();
        assert_ne!(commit, head);
        assert_eq!(
            git(workspace.path(), &["log", "-1", "--format=%s"]),
            "Solved task x__y-1 automatically"
        );
    }

    #[tokio::test]
    async fn test_commit_with_nothing_to_commit_fails() {
        let dir = TempDir::new().unwrap();
        let (url, _) = upstream_repo(dir.path());
        let workspace = Workspace::new(dir.path().join("repo_4"));
        workspace
            .prepare(&CloneInstruction {
                repo_url: url,
                checkout: "main".into(),
            })
            .await
            .unwrap();

        let err = workspace
            .stage_and_commit(&[".".to_string()], "Solved task i automatically")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::GitFailed { ref command, .. } if command == "commit"));
    }

    #[tokio::test]
    async fn test_clone_of_missing_remote_fails() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::new(dir.path().join("repo_5"));
        let err = workspace
            .prepare(&CloneInstruction {
                repo_url: dir.path().join("nope").to_string_lossy().to_string(),
                checkout: "main".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::GitFailed { ref command, .. } if command == "clone"));
    }
}
