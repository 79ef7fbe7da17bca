// databasebackup/src/backup/audit.rs
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::BackupOutcome;
use crate::errors::Result;

/// Writes the outcome list of one run as pretty-printed JSON.
///
/// The file is `backup_log_{timestamp}.json`. It is never overwritten: if a
/// run in the same second already claimed that name, the run id is appended.
pub async fn write_audit_log(
    audit_dir: &Path,
    timestamp: &str,
    run_id: Uuid,
    outcomes: &[BackupOutcome],
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(audit_dir).await?;
    let json = serde_json::to_vec_pretty(outcomes)?;

    let primary = audit_dir.join(format!("backup_log_{}.json", timestamp));
    match create_new(&primary, &json).await {
        Ok(()) => Ok(primary),
        Err(error) if error.kind() == ErrorKind::AlreadyExists => {
            let run_suffix = run_id.simple().to_string();
            let fallback = audit_dir.join(format!("backup_log_{}_{}.json", timestamp, &run_suffix[..8]));
            tracing::debug!(existing = %primary.display(), "audit log name taken, using {}", fallback.display());
            create_new(&fallback, &json).await?;
            Ok(fallback)
        }
        Err(error) => Err(error.into()),
    }
}

async fn create_new(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(contents).await?;
    file.flush().await?;
    Ok(())
}
