// databasebackup/src/backup/logic.rs
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::audit::write_audit_log;
use super::command::{ConnectionDetails, ToolPaths, build_backup_command};
use super::process::run_tool;
use super::retry::{RetryOutcome, RetryPolicy, run_with_retries};
use super::{BackupOutcome, RunReport};
use crate::config::{BackupConfig, DatabaseKind, DatabaseTarget};
use crate::utils::{default_audit_directory, find_tool_executable, run_timestamp, sanitize_file_name_part};

const FALLBACK_REASON: &str = "manual";

/// Owns the backup configuration and executes backup runs against it.
///
/// Runs are serialized: a scheduled run and an on-demand run never overlap.
#[derive(Debug)]
pub struct BackupRunner {
    config: BackupConfig,
    run_lock: Mutex<()>,
}

impl BackupRunner {
    pub fn new(config: BackupConfig) -> Self {
        BackupRunner {
            config,
            run_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    fn audit_directory(&self) -> PathBuf {
        self.config
            .audit_directory
            .clone()
            .unwrap_or_else(default_audit_directory)
    }

    /// Backs up every configured target and writes the audit log.
    ///
    /// Never fails: per-target problems become failed outcomes and anything
    /// that goes wrong around them lands in `RunReport::system_error`. The
    /// report always has exactly one outcome per configured target.
    #[tracing::instrument(name = "backup_run", skip(self, cancel), fields(run_id))]
    pub async fn run_backup(&self, reason: &str, cancel: &CancellationToken) -> RunReport {
        let _guard = self.run_lock.lock().await;

        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        let started_at = Utc::now();
        let timestamp = run_timestamp(started_at);
        let safe_reason = Some(sanitize_file_name_part(reason))
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| FALLBACK_REASON.to_string());

        info!("🚀 Starting database backup run ({} targets)", self.config.targets.len());

        let mut outcomes = Vec::with_capacity(self.config.targets.len());
        let mut system_error = None;
        let cancelled = match self
            .perform_backup_orchestration(&safe_reason, &timestamp, cancel, &mut outcomes)
            .await
        {
            Ok(cancelled) => cancelled,
            Err(err) => {
                error!(error = %format!("{:#}", err), "Unexpected error during backup operation");
                let message = format!("Unexpected system error during backup: {:#}", err);
                // keep what we already have, the rest gets the system error
                for target in &self.config.targets[outcomes.len()..] {
                    outcomes.push(BackupOutcome::failed(format!(
                        "{} Backup for {} was not attempted.",
                        message, target.database
                    )));
                }
                system_error = Some(message);
                false
            }
        };

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        info!(
            "Backup summary: {} total, {} succeeded, {} failed",
            outcomes.len(),
            succeeded,
            outcomes.len() - succeeded
        );

        let audit_dir = self.audit_directory();
        let audit_file = match write_audit_log(&audit_dir, &timestamp, run_id, &outcomes).await {
            Ok(path) => {
                info!("Backup audit log written to: {}", path.display());
                Some(path)
            }
            Err(err) => {
                error!(error = %err, "Failed to write backup audit log to {}", audit_dir.display());
                system_error.get_or_insert_with(|| {
                    format!("Unexpected system error during backup: audit log not written: {}", err)
                });
                None
            }
        };

        RunReport {
            run_id,
            reason: reason.to_string(),
            started_at,
            outcomes,
            audit_file,
            cancelled,
            system_error,
        }
    }

    /// Processes the targets in configuration order, appending one outcome
    /// per target. Returns whether the run was cancelled.
    async fn perform_backup_orchestration(
        &self,
        safe_reason: &str,
        timestamp: &str,
        cancel: &CancellationToken,
        outcomes: &mut Vec<BackupOutcome>,
    ) -> Result<bool> {
        tokio::fs::create_dir_all(&self.config.backup_directory)
            .await
            .with_context(|| {
                format!(
                    "Failed to create backup directory: {}",
                    self.config.backup_directory.display()
                )
            })?;

        for (index, target) in self.config.targets.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("Backup run cancelled, skipping {} remaining targets", self.config.targets.len() - index);
                for skipped in &self.config.targets[index..] {
                    outcomes.push(BackupOutcome::failed(format!(
                        "Backup for {} was cancelled before it started.",
                        skipped.database
                    )));
                }
                return Ok(true);
            }

            let outcome = self.backup_target(target, safe_reason, timestamp, cancel).await;
            outcomes.push(outcome);
        }

        Ok(cancel.is_cancelled())
    }

    #[tracing::instrument(skip_all, fields(database = %target.database, kind = target.kind.name()))]
    async fn backup_target(
        &self,
        target: &DatabaseTarget,
        safe_reason: &str,
        timestamp: &str,
        cancel: &CancellationToken,
    ) -> BackupOutcome {
        let database = target.database.as_str();

        if let DatabaseKind::Unsupported(raw) = &target.kind {
            let msg = format!("Unsupported DB type '{}' for {}. Skipping backup.", raw, database);
            error!("{}", msg);
            return BackupOutcome::failed(msg);
        }

        let extension = match target.kind {
            DatabaseKind::SqlServer => "bak",
            _ => "sql",
        };
        let file_path = self.config.backup_directory.join(format!(
            "backup_{}_{}_{}.{}",
            sanitize_file_name_part(database),
            safe_reason,
            timestamp,
            extension
        ));

        let tools = ToolPaths {
            pg_dump: &self.config.pg_dump_path,
            sqlcmd: &self.config.sqlcmd_path,
        };
        let connection = ConnectionDetails {
            host: target.resolve_platform_host(),
            port: target.port,
            database,
            user: &target.user,
            password: &target.password,
        };
        let mut command = match build_backup_command(&target.kind, &tools, &connection, &file_path) {
            Ok(command) => command,
            Err(err) => {
                let msg = format!("{} for {}. Skipping backup.", err, database);
                error!("{}", msg);
                return BackupOutcome::failed(msg);
            }
        };

        let Some(tool) = find_tool_executable(&command.program) else {
            let msg = format!(
                "Tool not found at '{}' for {} database. Skipping backup for {}.",
                command.program.display(),
                target.kind.name(),
                database
            );
            error!("{}", msg);
            return BackupOutcome::failed(msg);
        };
        command.program = tool;
        debug!(?command, "Prepared backup command");

        let policy = RetryPolicy::new(self.config.max_retries, self.config.retry_delay);
        let command = &command;
        let outcome = run_with_retries(&policy, cancel, database, move |_attempt| async move {
            run_tool(command, cancel).await?.check_status()
        })
        .await;

        match outcome {
            RetryOutcome::Succeeded { value: output, attempts } => {
                let msg = format!("Backup completed for {}", database);
                info!(attempts, "✓ {} | File: {}", msg, file_path.display());
                trace!("Process Output:\n{}", output.stdout);
                BackupOutcome::succeeded(&file_path, msg)
            }
            RetryOutcome::Exhausted { attempts, last_error } => {
                let msg = format!(
                    "Backup failed for {} after {} attempts: {}",
                    database, attempts, last_error
                );
                error!("{}", msg);
                BackupOutcome::failed(msg)
            }
            RetryOutcome::Cancelled { attempts } => {
                warn!(attempts, "Backup for {} was cancelled after {} attempts", database, attempts);
                BackupOutcome::failed(format!("Backup for {} was cancelled.", database))
            }
        }
    }
}
