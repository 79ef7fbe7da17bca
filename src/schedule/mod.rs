// databasebackup/src/schedule/mod.rs
use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, TimeDelta};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backup::BackupRunner;
use crate::config::ScheduleConfig;

pub const SCHEDULED_REASON: &str = "automated";

/// When the next scheduled run is due, in local wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleState {
    next_run: NaiveDateTime,
    poll_interval: TimeDelta,
    run_on_startup: bool,
}

impl ScheduleState {
    /// Anchors the schedule at today's configured start time (or `now` when
    /// none is set) and moves it forward in whole intervals until it is in
    /// the future. Only `run_on_startup` makes the first run due at once.
    pub fn new(config: &ScheduleConfig, now: NaiveDateTime) -> Result<Self> {
        let poll_interval = TimeDelta::from_std(config.poll_interval)
            .context("poll interval is out of range")?;
        if poll_interval <= TimeDelta::zero() {
            anyhow::bail!("poll interval must be greater than zero");
        }

        let mut next_run = config
            .start_time
            .map(|start| now.date().and_time(start))
            .unwrap_or(now);
        if config.run_on_startup {
            next_run = now;
        } else {
            while next_run <= now {
                next_run += poll_interval;
            }
        }

        Ok(ScheduleState {
            next_run,
            poll_interval,
            run_on_startup: config.run_on_startup,
        })
    }

    pub fn next_run(&self) -> NaiveDateTime {
        self.next_run
    }

    pub fn run_on_startup(&self) -> bool {
        self.run_on_startup
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        now >= self.next_run
    }

    /// Moves `next_run` forward by whole intervals until it is after `now`.
    /// Missed intervals are skipped, never replayed.
    pub fn reschedule(&mut self, now: NaiveDateTime) {
        while self.next_run <= now {
            self.next_run += self.poll_interval;
        }
    }

    pub fn delay_until_next(&self, now: NaiveDateTime) -> Duration {
        (self.next_run - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Background loop that triggers a backup run whenever the schedule is due.
pub struct Scheduler {
    runner: Arc<BackupRunner>,
    state: ScheduleState,
}

impl Scheduler {
    pub fn new(runner: Arc<BackupRunner>, config: &ScheduleConfig) -> Result<Self> {
        let state = ScheduleState::new(config, Local::now().naive_local())?;
        Ok(Scheduler { runner, state })
    }

    /// Runs until `shutdown` is cancelled. An in-flight run gets a child
    /// token, so shutdown also terminates its tool process.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            run_on_startup = self.state.run_on_startup(),
            "Backup scheduler started. First run at {} (every {} minutes)",
            self.state.next_run,
            self.state.poll_interval.num_minutes()
        );

        loop {
            let now = Local::now().naive_local();
            debug!("Backup scheduler heartbeat at {}", now);

            if self.state.is_due(now) {
                info!("Scheduled backup is due (planned for {})", self.state.next_run);
                let runner = Arc::clone(&self.runner);
                let cancel = shutdown.child_token();
                let handle = tokio::spawn(async move {
                    runner.run_backup(SCHEDULED_REASON, &cancel).await
                });
                match handle.await {
                    Ok(report) if report.all_succeeded() => {
                        info!(
                            run_id = %report.run_id,
                            started_at = %report.started_at,
                            "Scheduled backup finished: {} targets backed up",
                            report.outcomes.len()
                        );
                    }
                    Ok(report) => {
                        warn!(
                            run_id = %report.run_id,
                            started_at = %report.started_at,
                            "Scheduled backup finished with {} failures out of {} targets: {}",
                            report.failed_count(),
                            report.outcomes.len(),
                            report.failure_messages().join("; ")
                        );
                    }
                    Err(join_error) => {
                        error!(error = %join_error, "Scheduled backup task failed");
                    }
                }

                self.state.reschedule(Local::now().naive_local());
                info!("Next backup scheduled for {}", self.state.next_run);
            }

            let delay = self.state.delay_until_next(Local::now().naive_local());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => {
                    info!("Backup scheduler received shutdown signal");
                    break;
                }
            }
        }

        info!("Backup scheduler stopped");
    }
}
