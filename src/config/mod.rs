// databasebackup/src/config/mod.rs
use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PG_DUMP: &str = "pg_dump";
const DEFAULT_SQLCMD: &str = "sqlcmd";
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 5000;
const DEFAULT_POLL_INTERVAL_MINUTES: u64 = 24 * 60;
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonConnection {
    #[serde(rename = "type")]
    pub db_type: String,
    pub host_windows: Option<String>,
    pub host_linux: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonBackupSection {
    pub backup_directory: Option<PathBuf>,
    pub pg_dump_path: Option<PathBuf>,
    pub sqlcmd_path: Option<PathBuf>,
    pub max_retries: Option<u32>,
    pub retry_delay_milliseconds: Option<u64>,
    pub audit_directory: Option<PathBuf>,
    pub connections: Option<Vec<JsonConnection>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonHostedService {
    pub start_time: Option<String>,
    pub poll_interval_minutes: Option<u64>,
    pub run_on_startup: Option<bool>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonHttpConfig {
    pub bind_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub database_backup: Option<JsonBackupSection>,
    pub hosted_service: Option<JsonHostedService>,
    pub http: Option<JsonHttpConfig>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseKind {
    Postgres,
    SqlServer,
    Unsupported(String),
}

impl DatabaseKind {
    /// Case-insensitive; anything unknown is kept verbatim so it can be reported later.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseKind::Postgres,
            "sqlserver" | "mssql" => DatabaseKind::SqlServer,
            _ => DatabaseKind::Unsupported(value.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DatabaseKind::Postgres => "Postgres",
            DatabaseKind::SqlServer => "SqlServer",
            DatabaseKind::Unsupported(raw) => raw,
        }
    }

    fn default_port(&self) -> u16 {
        match self {
            DatabaseKind::Postgres => 5432,
            DatabaseKind::SqlServer => 1433,
            DatabaseKind::Unsupported(_) => 0,
        }
    }
}

#[derive(Clone)]
pub struct DatabaseTarget {
    pub kind: DatabaseKind,
    pub host_windows: String,
    pub host_linux: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl DatabaseTarget {
    /// Picks the hostname for the OS we are running on, falling back to the
    /// other one when it was left empty.
    pub fn resolve_platform_host(&self) -> &str {
        let (preferred, other) = if cfg!(windows) {
            (&self.host_windows, &self.host_linux)
        } else {
            (&self.host_linux, &self.host_windows)
        };
        if preferred.trim().is_empty() {
            other
        } else {
            preferred
        }
    }
}

impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseTarget")
            .field("kind", &self.kind)
            .field("host_windows", &self.host_windows)
            .field("host_linux", &self.host_linux)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub backup_directory: PathBuf,
    pub pg_dump_path: PathBuf,
    pub sqlcmd_path: PathBuf,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub audit_directory: Option<PathBuf>,
    pub targets: Vec<DatabaseTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub start_time: Option<NaiveTime>,
    pub poll_interval: Duration,
    pub run_on_startup: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub bind_address: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backup: BackupConfig,
    pub schedule: ScheduleConfig,
    pub http: HttpConfig,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        Self::from_json_str(&config_content).with_context(|| {
            format!(
                "Failed to load configuration from {}",
                config_path.display()
            )
        })
    }

    pub fn from_json_str(config_content: &str) -> Result<Self> {
        let raw_json_config: RawJsonConfig =
            serde_json::from_str(config_content).context("Failed to parse JSON configuration")?;

        Ok(AppConfig {
            backup: load_backup_config_from_json(&raw_json_config)?,
            schedule: load_schedule_config_from_json(&raw_json_config)?,
            http: load_http_config_from_json(&raw_json_config)?,
        })
    }
}

pub fn load_backup_config_from_json(raw_config: &RawJsonConfig) -> Result<BackupConfig> {
    let section = raw_config
        .database_backup
        .as_ref()
        .context("database_backup section must be set in config.json")?;

    let backup_directory = section
        .backup_directory
        .as_ref()
        .context("database_backup.backup_directory must be set in config.json")?
        .clone();
    if backup_directory.as_os_str().is_empty() {
        anyhow::bail!("database_backup.backup_directory cannot be empty in config.json.");
    }

    let targets = section
        .connections
        .as_deref()
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(index, connection)| parse_connection(index, connection))
        .collect::<Result<Vec<_>>>()?;

    if targets.is_empty() {
        tracing::warn!("No database connections configured; backup runs will do nothing.");
    }

    Ok(BackupConfig {
        backup_directory,
        pg_dump_path: tool_path_or_default(&section.pg_dump_path, DEFAULT_PG_DUMP),
        sqlcmd_path: tool_path_or_default(&section.sqlcmd_path, DEFAULT_SQLCMD),
        max_retries: section.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        retry_delay: Duration::from_millis(
            section
                .retry_delay_milliseconds
                .unwrap_or(DEFAULT_RETRY_DELAY_MS),
        ),
        audit_directory: section
            .audit_directory
            .clone()
            .filter(|p| !p.as_os_str().is_empty()),
        targets,
    })
}

pub fn load_schedule_config_from_json(raw_config: &RawJsonConfig) -> Result<ScheduleConfig> {
    let Some(section) = raw_config.hosted_service.as_ref() else {
        return Ok(ScheduleConfig {
            start_time: None,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_MINUTES * 60),
            run_on_startup: false,
            enabled: true,
        });
    };

    let poll_interval_minutes = section
        .poll_interval_minutes
        .unwrap_or(DEFAULT_POLL_INTERVAL_MINUTES);
    if poll_interval_minutes == 0 {
        anyhow::bail!("hosted_service.poll_interval_minutes must be greater than zero.");
    }

    Ok(ScheduleConfig {
        start_time: parse_start_time(section.start_time.as_deref())?,
        poll_interval: Duration::from_secs(poll_interval_minutes * 60),
        run_on_startup: section.run_on_startup.unwrap_or(false),
        enabled: section.enabled.unwrap_or(true),
    })
}

pub fn load_http_config_from_json(raw_config: &RawJsonConfig) -> Result<HttpConfig> {
    let bind_address = raw_config
        .http
        .as_ref()
        .and_then(|http| http.bind_address.as_deref())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_BIND_ADDRESS);

    Ok(HttpConfig {
        bind_address: bind_address
            .parse()
            .with_context(|| format!("http.bind_address '{}' is not a valid socket address", bind_address))?,
    })
}

fn parse_connection(index: usize, connection: &JsonConnection) -> Result<DatabaseTarget> {
    let database = connection
        .database
        .as_ref()
        .filter(|s| !s.trim().is_empty())
        .with_context(|| format!("database_backup.connections[{}].database must be set", index))?
        .clone();

    let kind = DatabaseKind::parse(&connection.db_type);
    let host_windows = connection.host_windows.clone().unwrap_or_default();
    let host_linux = connection.host_linux.clone().unwrap_or_default();
    if !matches!(kind, DatabaseKind::Unsupported(_))
        && host_windows.trim().is_empty()
        && host_linux.trim().is_empty()
    {
        anyhow::bail!(
            "database_backup.connections[{}] ({}) needs host_windows or host_linux",
            index,
            database
        );
    }

    Ok(DatabaseTarget {
        port: connection.port.unwrap_or_else(|| kind.default_port()),
        kind,
        host_windows,
        host_linux,
        database,
        user: connection.user.clone().unwrap_or_default(),
        password: connection.password.clone().unwrap_or_default(),
    })
}

fn tool_path_or_default(configured: &Option<PathBuf>, default: &str) -> PathBuf {
    configured
        .clone()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(default))
}

/// Parses `HH:MM:SS` or `HH:MM`. Blank means "no fixed start time".
fn parse_start_time(value: Option<&str>) -> Result<Option<NaiveTime>> {
    let Some(value) = value.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map(Some)
        .with_context(|| format!("hosted_service.start_time '{}' is not a valid HH:MM[:SS] time", value))
}
