//! Helpers for tests that need a stand-in for pg_dump or sqlcmd.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{BackupConfig, DatabaseKind, DatabaseTarget};

/// Writes `body` as an executable `/bin/sh` script and returns its path.
#[cfg(unix)]
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> std::io::Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Fake pg_dump: writes a small dump to the `--file=` argument, and insists
/// on the password arriving through `PGPASSWORD`.
pub(crate) const FAKE_PG_DUMP: &str = r#"out=""
for arg in "$@"; do
  case "$arg" in
    --file=*) out="${arg#--file=}" ;;
  esac
done
[ -n "$out" ] || { echo "missing --file" >&2; exit 2; }
[ "$PGPASSWORD" = "secret" ] || { echo "password authentication failed" >&2; exit 3; }
echo "-- fake dump" > "$out"
"#;

pub(crate) fn target(kind: DatabaseKind, database: &str) -> DatabaseTarget {
    DatabaseTarget {
        kind,
        host_windows: "localhost".to_string(),
        host_linux: "localhost".to_string(),
        port: 5432,
        database: database.to_string(),
        user: "backup".to_string(),
        password: "secret".to_string(),
    }
}

pub(crate) fn backup_config(root: &Path, targets: Vec<DatabaseTarget>) -> BackupConfig {
    BackupConfig {
        backup_directory: root.join("backups"),
        pg_dump_path: root.join("bin").join("pg_dump"),
        sqlcmd_path: root.join("bin").join("sqlcmd"),
        max_retries: 3,
        retry_delay: Duration::from_millis(10),
        audit_directory: Some(root.join("audit")),
        targets,
    }
}
