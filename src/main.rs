//! Database Backup Service
//!
//! Dumps the configured PostgreSQL and SQL Server databases with their
//! vendor tools, on a schedule, over HTTP, or once from the command line.

// databasebackup/src/main.rs
mod backup;
mod config;
mod errors;
mod schedule;
mod server;
mod shutdown;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use backup::BackupRunner;
use config::AppConfig;
use schedule::Scheduler;
use server::ServerState;

#[derive(Parser, Debug)]
#[command(name = "databasebackup", about = "Scheduled backups of PostgreSQL and SQL Server databases")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, env = "DBBACKUP_CONFIG", default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and the HTTP trigger until interrupted.
    Serve {
        /// Overrides http.bind_address from the configuration.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Run one backup of every configured database and exit.
    Backup {
        #[arg(long, default_value = "Manual")]
        reason: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
    {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run_app(cli).await {
        Ok(true) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            println!("❌ Backup finished with failures.");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the requested operation fully succeeded.
async fn run_app(cli: Cli) -> Result<bool> {
    let app_config = AppConfig::load_from_json(&cli.config).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            cli.config.display()
        )
    })?;

    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(shutdown::cancel_on_signal(shutdown.clone()));
    let runner = Arc::new(BackupRunner::new(app_config.backup));
    info!(
        "Loaded {} backup targets, writing to {}",
        runner.config().targets.len(),
        runner.config().backup_directory.display()
    );

    let result = match cli.command {
        Command::Backup { reason } => {
            println!("🚀 Starting Backup Process...");
            let report = runner.run_backup(&reason, &shutdown.child_token()).await;
            println!(
                "Run {} ({}) started at {}",
                report.run_id,
                report.reason,
                report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            for outcome in &report.outcomes {
                let mark = if outcome.success { "✓" } else { "✗" };
                println!("{} {}", mark, outcome.message);
            }
            if let Some(system_error) = &report.system_error {
                println!("✗ {}", system_error);
            }
            if let Some(audit_file) = &report.audit_file {
                println!("Audit log: {}", audit_file.display());
            }
            Ok(report.all_succeeded())
        }
        Command::Serve { bind } => {
            let bind_address = bind.unwrap_or(app_config.http.bind_address);
            serve(runner, app_config.schedule, bind_address, shutdown.clone()).await.map(|()| true)
        }
    };

    shutdown.cancel();
    match signals.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %format!("{:#}", e), "Could not listen for shutdown signals"),
        Err(join_error) => warn!(error = %join_error, "Signal listener task failed"),
    }
    result
}

async fn serve(
    runner: Arc<BackupRunner>,
    schedule_config: config::ScheduleConfig,
    bind_address: SocketAddr,
    shutdown: CancellationToken,
) -> Result<()> {
    let scheduler = if schedule_config.enabled {
        let scheduler = Scheduler::new(Arc::clone(&runner), &schedule_config)
            .context("Failed to set up the backup schedule")?;
        Some(tokio::spawn(scheduler.run(shutdown.child_token())))
    } else {
        info!("Scheduled backups are disabled");
        None
    };

    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind HTTP trigger to {}", bind_address))?;
    let served = server::serve(
        listener,
        ServerState {
            runner,
            shutdown: shutdown.clone(),
        },
    )
    .await;

    // stop the scheduler whether the server exited cleanly or not
    shutdown.cancel();
    if let Some(handle) = scheduler {
        if let Err(join_error) = handle.await {
            warn!(error = %join_error, "Backup scheduler task failed");
        }
    }
    served
}
