mod audit;
pub(crate) mod command;
mod logic;
pub(crate) mod process;
pub(crate) mod retry;

#[cfg(test)]
pub(crate) mod test_support;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub use logic::BackupRunner;

/// Result of backing up one target in one run. This is what the audit log holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOutcome {
    pub success: bool,
    pub file_path: String,
    pub message: String,
    pub completed_at: DateTime<Utc>,
}

impl BackupOutcome {
    pub fn succeeded(file_path: &std::path::Path, message: String) -> Self {
        BackupOutcome {
            success: true,
            file_path: file_path.display().to_string(),
            message,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(message: String) -> Self {
        BackupOutcome {
            success: false,
            file_path: String::new(),
            message,
            completed_at: Utc::now(),
        }
    }
}

/// Everything one call to [`BackupRunner::run_backup`] produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<BackupOutcome>,
    pub audit_file: Option<PathBuf>,
    pub cancelled: bool,
    pub system_error: Option<String>,
}

impl RunReport {
    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.succeeded_count()
    }

    /// True only if every target succeeded and nothing went wrong around them.
    pub fn all_succeeded(&self) -> bool {
        self.system_error.is_none() && !self.cancelled && self.outcomes.iter().all(|o| o.success)
    }

    pub fn failure_messages(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.success)
            .map(|o| o.message.as_str())
            .chain(self.system_error.as_deref())
            .collect()
    }
}
