use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use which::which;

pub const WINDOWS_AUDIT_DIRECTORY: &str = r"C:\DatabaseBackups";
pub const LINUX_AUDIT_DIRECTORY: &str = "/shared-backups";

// Characters Windows rejects in file names, plus '/' and control chars.
static ILLEGAL_FILE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).expect("static regex is valid"));

/// Locates a vendor tool on disk.
///
/// A bare name such as `pg_dump` is looked up in `PATH`; anything with a
/// directory component must point at an existing file.
pub fn find_tool_executable(configured: &Path) -> Option<PathBuf> {
    if configured.components().count() > 1 || configured.is_absolute() {
        return configured.is_file().then(|| configured.to_path_buf());
    }
    which(configured).ok()
}

/// Replaces every character that cannot appear in a file name with `_`.
pub fn sanitize_file_name_part(value: &str) -> String {
    ILLEGAL_FILE_NAME_CHARS.replace_all(value.trim(), "_").into_owned()
}

/// Directory the audit logs land in when none is configured.
pub fn default_audit_directory() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(WINDOWS_AUDIT_DIRECTORY)
    } else {
        PathBuf::from(LINUX_AUDIT_DIRECTORY)
    }
}

/// `yyyyMMdd_HHmmss`, shared by backup files and the audit log of a run.
pub fn run_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}
