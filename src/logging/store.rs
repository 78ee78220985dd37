//! On-disk log store: file naming, state classification and the two-phase
//! delete helpers.
//!
//! # File States
//! ```text
//! logdata.tmp              WORKING  (single file accepting appends)
//! logdata<ms>.dat          CLOSED   (one rolled working file)
//! logdata<ms>.rollup       ROLLUP   (JSON array of closed files, upload-ready)
//! logdata<ms>.<ext>.bak    EXPIRED  (soft-deleted, removed by cleanup)
//! ```
//!
//! The state of a file is its last extension, so a soft-deleted rollup
//! (`.rollup.bak`) is EXPIRED until recovered.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Subdirectory of the configured data dir holding the log store.
pub const LOG_REPORTS_DIR: &str = "logreporting";

pub const FILE_PREFIX: &str = "logdata";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogFileState {
    Working,
    Closed,
    Expired,
    Rollup,
}

impl LogFileState {
    pub fn extension(self) -> &'static str {
        match self {
            LogFileState::Working => "tmp",
            LogFileState::Closed => "dat",
            LogFileState::Expired => "bak",
            LogFileState::Rollup => "rollup",
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "tmp" => Some(LogFileState::Working),
            "dat" => Some(LogFileState::Closed),
            "bak" => Some(LogFileState::Expired),
            "rollup" => Some(LogFileState::Rollup),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogFileState::Working => "working",
            LogFileState::Closed => "closed",
            LogFileState::Expired => "expired",
            LogFileState::Rollup => "rollup",
        }
    }
}

pub fn working_file_name() -> String {
    format!("{FILE_PREFIX}.{}", LogFileState::Working.extension())
}

pub fn file_name(timestamp: u64, state: LogFileState) -> String {
    format!("{FILE_PREFIX}{timestamp}.{}", state.extension())
}

/// State of a store file, or `None` for anything the store did not create.
pub fn state_of(path: &Path) -> Option<LogFileState> {
    let name = path.file_name()?.to_str()?;
    if !name.starts_with(FILE_PREFIX) {
        return None;
    }
    let extension = path.extension()?.to_str()?;
    LogFileState::from_extension(extension)
}

/// Timestamp embedded in a store file name (`logdata<ms>.*`).
pub fn timestamp_of(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_prefix(FILE_PREFIX)?;
    let digits = rest.split('.').next()?;
    digits.parse().ok()
}

/// Store files in `state`, oldest first.
pub fn list(dir: &Path, state: LogFileState) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = list_all(dir)?
        .into_iter()
        .filter(|(_, s)| *s == state)
        .map(|(path, _)| path)
        .collect();
    files.sort_by_key(|path| (timestamp_of(path).unwrap_or(0), path.clone()));
    Ok(files)
}

/// Every store file with its state, in directory order.
pub fn list_all(dir: &Path) -> io::Result<Vec<(PathBuf, LogFileState)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(state) = state_of(&path) {
            files.push((path, state));
        }
    }
    Ok(files)
}

/// Mark a file expired by appending the expired extension. The file stays on
/// disk until [`remove_expired`] runs. Already expired files are left alone.
pub fn soft_delete(path: &Path) -> io::Result<PathBuf> {
    if state_of(path) == Some(LogFileState::Expired) {
        return Ok(path.to_path_buf());
    }
    set_readonly(path)?;
    let mut expired = path.as_os_str().to_owned();
    expired.push(".");
    expired.push(LogFileState::Expired.extension());
    let expired = PathBuf::from(expired);
    fs::rename(path, &expired)?;
    Ok(expired)
}

/// Physically remove an expired file.
pub fn remove_expired(path: &Path) -> io::Result<()> {
    set_writable(path)?;
    fs::remove_file(path)
}

/// Undo a soft delete, restoring the file's prior state.
pub fn restore(path: &Path) -> io::Result<PathBuf> {
    set_writable(path)?;
    let restored = path.with_extension("");
    fs::rename(path, &restored)?;
    Ok(restored)
}

pub fn set_readonly(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)
}

pub fn set_writable(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        permissions.set_mode(permissions.mode() | 0o200);
    }
    #[cfg(not(unix))]
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("logstore-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_state_from_last_extension() {
        assert_eq!(state_of(Path::new("/x/logdata.tmp")), Some(LogFileState::Working));
        assert_eq!(state_of(Path::new("/x/logdata12.dat")), Some(LogFileState::Closed));
        assert_eq!(state_of(Path::new("/x/logdata12.rollup")), Some(LogFileState::Rollup));
        assert_eq!(state_of(Path::new("/x/logdata12.dat.bak")), Some(LogFileState::Expired));
        assert_eq!(state_of(Path::new("/x/other12.dat")), None);
        assert_eq!(state_of(Path::new("/x/logdata12.json")), None);
        assert_eq!(timestamp_of(Path::new("/x/logdata12.dat.bak")), Some(12));
        assert_eq!(timestamp_of(Path::new("/x/logdata.tmp")), None);
    }

    #[test]
    fn test_list_orders_by_timestamp() {
        let dir = temp_store();
        for ts in [1000_u64, 999, 20] {
            fs::write(dir.join(file_name(ts, LogFileState::Closed)), b"{}").unwrap();
        }
        fs::write(dir.join(file_name(5, LogFileState::Rollup)), b"[]").unwrap();

        let closed = list(&dir, LogFileState::Closed).unwrap();
        let stamps: Vec<_> = closed.iter().filter_map(|p| timestamp_of(p)).collect();
        assert_eq!(stamps, vec![20, 999, 1000]);
        assert_eq!(list(&dir, LogFileState::Rollup).unwrap().len(), 1);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_soft_delete_and_restore() {
        let dir = temp_store();
        let path = dir.join(file_name(7, LogFileState::Rollup));
        fs::write(&path, b"[]").unwrap();

        let expired = soft_delete(&path).unwrap();
        assert!(!path.exists());
        assert_eq!(state_of(&expired), Some(LogFileState::Expired));
        assert_eq!(soft_delete(&expired).unwrap(), expired);

        let restored = restore(&expired).unwrap();
        assert_eq!(restored, path);
        assert_eq!(state_of(&restored), Some(LogFileState::Rollup));

        let expired = soft_delete(&restored).unwrap();
        remove_expired(&expired).unwrap();
        assert!(list_all(&dir).unwrap().is_empty());

        fs::remove_dir_all(&dir).unwrap();
    }
}
