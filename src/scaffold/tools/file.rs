//! Sandboxed file tools for reading, writing, and listing files.
//!
//! All three tools share one [`SandboxedFs`] bound to a repository workspace:
//! - `ReadFileTool` (`read`): read a UTF-8 file
//! - `WriteFileTool` (`write`): create or overwrite a file
//! - `ListDirTool` (`ls`): list a directory

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::{str_arg, ExecutionContext, Tool, ToolError, ToolResult};

/// Maximum file size that can be read or written (1MB).
const MAX_FILE_SIZE: usize = 1_048_576;

/// File access confined to one directory tree.
#[derive(Debug, Clone)]
pub struct SandboxedFs {
    root: PathBuf,
}

impl SandboxedFs {
    /// Bind to `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|e| {
            ToolError::FilesystemError(format!("cannot open root '{}': {}", root.display(), e))
        })?;
        if !canonical.is_dir() {
            return Err(ToolError::FilesystemError(format!(
                "root '{}' is not a directory",
                root.display()
            )));
        }
        Ok(Self { root: canonical })
    }

    /// Canonical root of the sandbox.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to an absolute path inside the root.
    ///
    /// The longest existing ancestor is canonicalized so symlinks are followed;
    /// the remaining components must be plain names. A symlink whose target
    /// does not exist is denied, since writing through it would create the
    /// target wherever the link points.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf, ToolError> {
        if rel.contains('\0') {
            return Err(ToolError::InvalidParameters(
                "Path contains invalid null character".to_string(),
            ));
        }
        let requested = Path::new(rel.trim());
        if requested.is_absolute() {
            return Err(denied(rel));
        }

        let joined = self.root.join(requested);
        let mut existing = joined.as_path();
        let mut missing: Vec<Component<'_>> = Vec::new();
        while existing.symlink_metadata().is_err() {
            let Some(parent) = existing.parent() else {
                return Err(denied(rel));
            };
            if let Some(name) = existing.components().next_back() {
                missing.push(name);
            }
            existing = parent;
        }

        let mut resolved = match existing.canonicalize() {
            Ok(resolved) => resolved,
            Err(_) if existing.is_symlink() => return Err(denied(rel)),
            Err(e) => {
                return Err(ToolError::FilesystemError(format!(
                    "cannot resolve '{}': {}",
                    rel, e
                )))
            }
        };
        for component in missing.into_iter().rev() {
            match component {
                Component::Normal(name) => resolved.push(name),
                Component::CurDir => {}
                _ => return Err(denied(rel)),
            }
        }

        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(denied(rel))
        }
    }

    /// Whether a resolved path lies in the repository's `.git` directory.
    fn in_git_dir(&self, path: &Path) -> bool {
        path.strip_prefix(&self.root)
            .ok()
            .and_then(|rel| rel.components().next())
            .is_some_and(|first| first.as_os_str() == ".git")
    }

    /// Read a UTF-8 text file.
    pub async fn read(&self, rel: &str) -> Result<String, ToolError> {
        let path = self.resolve(rel)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ToolError::FilesystemError(format!("cannot read '{}': {}", rel, e)))?;
        if bytes.len() > MAX_FILE_SIZE {
            return Err(ToolError::ResourceLimitExceeded(format!(
                "File size ({} bytes) exceeds maximum allowed ({} bytes)",
                bytes.len(),
                MAX_FILE_SIZE
            )));
        }
        String::from_utf8(bytes)
            .map_err(|_| ToolError::FilesystemError(format!("'{}' is not UTF-8 text", rel)))
    }

    /// Overwrite a file, creating it and any missing parent directories.
    pub async fn write(&self, rel: &str, content: &str) -> Result<(), ToolError> {
        if content.len() > MAX_FILE_SIZE {
            return Err(ToolError::ResourceLimitExceeded(format!(
                "Content size ({} bytes) exceeds maximum allowed ({} bytes)",
                content.len(),
                MAX_FILE_SIZE
            )));
        }
        let path = self.resolve(rel)?;
        if path == self.root {
            return Err(ToolError::InvalidParameters(
                "cannot write to the workspace root".to_string(),
            ));
        }
        // Hooks and config under .git run programs on the host.
        if self.in_git_dir(&path) {
            return Err(ToolError::AccessDenied(format!(
                "'{}' is inside the repository metadata",
                rel
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::FilesystemError(format!("cannot create directories for '{}': {}", rel, e))
            })?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::FilesystemError(format!("cannot write '{}': {}", rel, e)))
    }

    /// Entry names of a directory, sorted.
    pub async fn list(&self, rel: &str) -> Result<Vec<String>, ToolError> {
        let rel = if rel.trim().is_empty() { "." } else { rel };
        let path = self.resolve(rel)?;
        if !path.is_dir() {
            return Err(ToolError::FilesystemError(format!(
                "'{}' is not a valid directory",
                rel
            )));
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::FilesystemError(format!("cannot list '{}': {}", rel, e)))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ToolError::FilesystemError(format!("cannot list '{}': {}", rel, e)))?
        {
            entries.push(entry.file_name().to_string_lossy().into_owned());
        }
        entries.sort();
        Ok(entries)
    }
}

fn denied(rel: &str) -> ToolError {
    ToolError::AccessDenied(format!("'{}' is outside of root directory.", rel))
}

// ============================================================================
// ReadFileTool
// ============================================================================

/// Tool for reading a file inside the workspace.
pub struct ReadFileTool {
    fs: Arc<SandboxedFs>,
}

impl ReadFileTool {
    pub fn new(fs: Arc<SandboxedFs>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a whole file. Usage: `read <relative_path>`"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the repository root"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolResult, ToolError> {
        let path = str_arg(&args, "path")?;
        let content = self.fs.read(path).await?;
        Ok(ToolResult::success(content))
    }
}

// ============================================================================
// WriteFileTool
// ============================================================================

/// Parameters for the write tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WriteFileParams {
    path: String,
    content: String,
}

/// Tool for creating or overwriting a file inside the workspace.
pub struct WriteFileTool {
    fs: Arc<SandboxedFs>,
}

impl WriteFileTool {
    pub fn new(fs: Arc<SandboxedFs>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Overwrite a file with complete new content. Usage: `write <relative_path> <content>`; the content may start on the next line."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the repository root"
                },
                "content": {
                    "type": "string",
                    "description": "Complete file content"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolResult, ToolError> {
        let params: WriteFileParams = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidParameters(format!("Invalid parameters: {}", e)))?;
        self.fs.write(&params.path, &params.content).await?;
        Ok(ToolResult::success(format!(
            "Successfully wrote to {}.",
            params.path
        )))
    }
}

// ============================================================================
// ListDirTool
// ============================================================================

/// Tool for listing a directory inside the workspace.
pub struct ListDirTool {
    fs: Arc<SandboxedFs>,
}

impl ListDirTool {
    pub fn new(fs: Arc<SandboxedFs>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List the contents of a directory. Usage: `ls [relative_path]`"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory relative to the repository root (default '.')"
                }
            }
        })
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolResult, ToolError> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let entries = self.fs.list(path).await?;
        Ok(ToolResult::success(entries.join("\n")))
    }
}
