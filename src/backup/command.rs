// databasebackup/src/backup/command.rs
use std::path::{Path, PathBuf};

use crate::config::DatabaseKind;
use crate::errors::{BackupError, Result};

pub const PG_PASSWORD_ENV: &str = "PGPASSWORD";
pub const SQLCMD_PASSWORD_ENV: &str = "SQLCMDPASSWORD";

/// Everything needed to start one vendor tool invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl std::fmt::Debug for ToolCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ToolCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env_keys)
            .finish()
    }
}

/// Connection details for a single dump, with the host already resolved.
#[derive(Clone, Copy)]
pub struct ConnectionDetails<'a> {
    pub host: &'a str,
    pub port: u16,
    pub database: &'a str,
    pub user: &'a str,
    pub password: &'a str,
}

/// Configured locations of the vendor tools.
#[derive(Debug, Clone, Copy)]
pub struct ToolPaths<'a> {
    pub pg_dump: &'a Path,
    pub sqlcmd: &'a Path,
}

impl<'a> ToolPaths<'a> {
    pub fn for_kind(&self, kind: &DatabaseKind) -> Result<&'a Path> {
        match kind {
            DatabaseKind::Postgres => Ok(self.pg_dump),
            DatabaseKind::SqlServer => Ok(self.sqlcmd),
            DatabaseKind::Unsupported(raw) => Err(BackupError::UnsupportedDatabaseType(raw.clone())),
        }
    }
}

/// Builds the command line for dumping one database into `output_file`.
///
/// Passwords never go into `args`: pg_dump reads `PGPASSWORD` and sqlcmd
/// reads `SQLCMDPASSWORD`. The result only depends on the inputs.
pub fn build_backup_command(
    kind: &DatabaseKind,
    tools: &ToolPaths<'_>,
    connection: &ConnectionDetails<'_>,
    output_file: &Path,
) -> Result<ToolCommand> {
    let program = tools.for_kind(kind)?.to_path_buf();
    let (args, env) = match kind {
        DatabaseKind::Postgres => postgres_args(connection, output_file),
        DatabaseKind::SqlServer => sqlserver_args(connection, output_file),
        DatabaseKind::Unsupported(raw) => {
            return Err(BackupError::UnsupportedDatabaseType(raw.clone()));
        }
    };
    Ok(ToolCommand { program, args, env })
}

fn postgres_args(
    connection: &ConnectionDetails<'_>,
    output_file: &Path,
) -> (Vec<String>, Vec<(String, String)>) {
    let conninfo = format!(
        "host={} port={} dbname={} user={}",
        conninfo_value(connection.host),
        connection.port,
        conninfo_value(connection.database),
        conninfo_value(connection.user),
    );
    let args = vec![
        format!("--dbname={}", conninfo),
        format!("--file={}", output_file.display()),
    ];
    let mut env = Vec::new();
    if !connection.password.is_empty() {
        env.push((PG_PASSWORD_ENV.to_string(), connection.password.to_string()));
    }
    (args, env)
}

fn sqlserver_args(
    connection: &ConnectionDetails<'_>,
    output_file: &Path,
) -> (Vec<String>, Vec<(String, String)>) {
    let mut args = vec![
        "-S".to_string(),
        format!("{},{}", connection.host, connection.port),
    ];
    let mut env = Vec::new();

    let use_sql_auth = !connection.user.trim().is_empty() && !connection.password.trim().is_empty();
    if use_sql_auth {
        args.push("-U".to_string());
        args.push(connection.user.to_string());
        env.push((SQLCMD_PASSWORD_ENV.to_string(), connection.password.to_string()));
    } else {
        // trusted connection
        args.push("-E".to_string());
    }

    let sql = format!(
        "BACKUP DATABASE {} TO DISK = N'{}' WITH INIT;",
        tsql_identifier(connection.database),
        tsql_string_literal(&output_file.display().to_string()),
    );
    // -b: non-zero exit on SQL errors, -x: no $(var) substitution inside -Q
    args.extend([
        "-b".to_string(),
        "-V".to_string(),
        "1".to_string(),
        "-x".to_string(),
        "-Q".to_string(),
        sql,
    ]);
    (args, env)
}

/// Quotes a libpq connection-string value when it needs it.
fn conninfo_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\' || c == '=');
    if !needs_quotes {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

fn tsql_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn tsql_string_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> (PathBuf, PathBuf) {
        (PathBuf::from("/usr/bin/pg_dump"), PathBuf::from("/opt/mssql-tools/bin/sqlcmd"))
    }

    fn connection<'a>(user: &'a str, password: &'a str) -> ConnectionDetails<'a> {
        ConnectionDetails {
            host: "db.internal",
            port: 5432,
            database: "orders",
            user,
            password,
        }
    }

    #[test]
    fn postgres_password_goes_through_environment() -> anyhow::Result<()> {
        let (pg_dump, sqlcmd) = tools();
        let tools = ToolPaths { pg_dump: &pg_dump, sqlcmd: &sqlcmd };
        let cmd = build_backup_command(
            &DatabaseKind::Postgres,
            &tools,
            &connection("backup", "p@ss word"),
            Path::new("/backups/backup_orders_manual_20240101_000000.sql"),
        )?;

        assert_eq!(cmd.program, pg_dump);
        assert_eq!(
            cmd.args,
            vec![
                "--dbname=host=db.internal port=5432 dbname=orders user=backup".to_string(),
                "--file=/backups/backup_orders_manual_20240101_000000.sql".to_string(),
            ]
        );
        assert_eq!(cmd.env, vec![("PGPASSWORD".to_string(), "p@ss word".to_string())]);
        assert!(cmd.args.iter().all(|a| !a.contains("p@ss")));
        Ok(())
    }

    #[test]
    fn postgres_conninfo_values_are_quoted() -> anyhow::Result<()> {
        let (pg_dump, sqlcmd) = tools();
        let tools = ToolPaths { pg_dump: &pg_dump, sqlcmd: &sqlcmd };
        let details = ConnectionDetails {
            host: "db.internal",
            port: 5432,
            database: "my db",
            user: r"dom\o'neil",
            password: "",
        };
        let cmd = build_backup_command(&DatabaseKind::Postgres, &tools, &details, Path::new("/tmp/x.sql"))?;

        assert_eq!(
            cmd.args[0],
            r"--dbname=host=db.internal port=5432 dbname='my db' user='dom\\o\'neil'"
        );
        assert!(cmd.env.is_empty());
        Ok(())
    }

    #[test]
    fn sqlserver_uses_sql_auth_without_password_in_args() -> anyhow::Result<()> {
        let (pg_dump, sqlcmd) = tools();
        let tools = ToolPaths { pg_dump: &pg_dump, sqlcmd: &sqlcmd };
        let details = ConnectionDetails { port: 1433, ..connection("sa", "Str0ng!") };
        let cmd = build_backup_command(&DatabaseKind::SqlServer, &tools, &details, Path::new("/backups/o.bak"))?;

        assert_eq!(cmd.program, sqlcmd);
        assert_eq!(
            cmd.args,
            vec![
                "-S",
                "db.internal,1433",
                "-U",
                "sa",
                "-b",
                "-V",
                "1",
                "-x",
                "-Q",
                "BACKUP DATABASE [orders] TO DISK = N'/backups/o.bak' WITH INIT;",
            ]
        );
        assert_eq!(cmd.env, vec![("SQLCMDPASSWORD".to_string(), "Str0ng!".to_string())]);
        assert!(!cmd.args.iter().any(|a| a == "-P" || a.contains("Str0ng!")));
        Ok(())
    }

    #[test]
    fn sqlserver_falls_back_to_trusted_connection() -> anyhow::Result<()> {
        let (pg_dump, sqlcmd) = tools();
        let tools = ToolPaths { pg_dump: &pg_dump, sqlcmd: &sqlcmd };
        for (user, password) in [("", ""), ("sa", ""), ("", "secret"), ("  ", "  ")] {
            let cmd = build_backup_command(
                &DatabaseKind::SqlServer,
                &tools,
                &connection(user, password),
                Path::new("/backups/o.bak"),
            )?;
            assert!(cmd.args.contains(&"-E".to_string()), "{:?}", cmd.args);
            assert!(!cmd.args.contains(&"-U".to_string()));
            assert!(cmd.env.is_empty());
        }
        Ok(())
    }

    #[test]
    fn sqlserver_path_with_spaces_and_backslashes_round_trips() -> anyhow::Result<()> {
        let (pg_dump, sqlcmd) = tools();
        let tools = ToolPaths { pg_dump: &pg_dump, sqlcmd: &sqlcmd };
        let path = r"C:\Database Backups\O'Brien\backup_orders_manual_20240101_000000.bak";
        let details = ConnectionDetails { database: "ord]ers", ..connection("", "") };
        let cmd = build_backup_command(&DatabaseKind::SqlServer, &tools, &details, Path::new(path))?;

        let sql = cmd.args.last().expect("query argument");
        assert_eq!(
            sql,
            r"BACKUP DATABASE [ord]]ers] TO DISK = N'C:\Database Backups\O''Brien\backup_orders_manual_20240101_000000.bak' WITH INIT;"
        );
        // undo the T-SQL literal escaping and we are back at the original path
        let literal = sql
            .split_once("N'")
            .and_then(|(_, rest)| rest.rsplit_once("' WITH INIT;"))
            .map(|(literal, _)| literal.replace("''", "'"))
            .expect("literal present");
        assert_eq!(literal, path);
        Ok(())
    }

    #[test]
    fn same_inputs_give_same_command() -> anyhow::Result<()> {
        let (pg_dump, sqlcmd) = tools();
        let tools = ToolPaths { pg_dump: &pg_dump, sqlcmd: &sqlcmd };
        for kind in [DatabaseKind::Postgres, DatabaseKind::SqlServer] {
            let first = build_backup_command(&kind, &tools, &connection("u", "p"), Path::new("/b/x"))?;
            let second = build_backup_command(&kind, &tools, &connection("u", "p"), Path::new("/b/x"))?;
            assert_eq!(first, second);
        }
        Ok(())
    }

    #[test]
    fn unsupported_type_is_rejected() {
        let (pg_dump, sqlcmd) = tools();
        let tools = ToolPaths { pg_dump: &pg_dump, sqlcmd: &sqlcmd };
        let result = build_backup_command(
            &DatabaseKind::Unsupported("Oracle".to_string()),
            &tools,
            &connection("u", "p"),
            Path::new("/b/x"),
        );
        assert!(matches!(result, Err(BackupError::UnsupportedDatabaseType(ref t)) if t == "Oracle"));
    }

    #[test]
    fn debug_output_hides_environment_values() -> anyhow::Result<()> {
        let (pg_dump, sqlcmd) = tools();
        let tools = ToolPaths { pg_dump: &pg_dump, sqlcmd: &sqlcmd };
        let cmd = build_backup_command(&DatabaseKind::Postgres, &tools, &connection("u", "hunter2"), Path::new("/b/x"))?;
        let debug = format!("{:?}", cmd);
        assert!(debug.contains("PGPASSWORD"));
        assert!(!debug.contains("hunter2"));
        Ok(())
    }
}
