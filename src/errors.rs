use std::path::PathBuf;
use thiserror::Error;

/// Failures a single backup target can run into.
///
/// Everything except `Cancelled` ends up as a failed outcome for the target;
/// `Cancelled` aborts the remaining attempts and is reported separately.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Unsupported database type: {0}")]
    UnsupportedDatabaseType(String),

    #[error("Tool not found at '{}'", .0.display())]
    ToolNotFound(PathBuf),

    #[error("Failed to start process '{}': {source}", .program.display())]
    ProcessSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}", exit_message(.code, .stderr))]
    ProcessExecutionFailure { code: Option<i32>, stderr: String },

    #[error("Error while waiting for process output: {0}")]
    ProcessIo(#[source] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackupError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackupError::Cancelled)
    }
}

fn exit_message(code: &Option<i32>, stderr: &str) -> String {
    let status = match code {
        Some(code) => format!("Process exited with status {}", code),
        None => "Process exited with unknown status".to_string(),
    };
    let stderr = stderr.trim();
    if stderr.is_empty() {
        status
    } else {
        format!("{}: {}", status, stderr)
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
