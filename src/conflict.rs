//! Conflict gates run before a sync touches anything.
//!
//! Pull refuses to merge into a file that was edited after the last sync;
//! push refuses to overwrite a remote document that gained revisions this
//! tool did not produce. Both gates can be overridden, and pull can take a
//! timestamped backup first.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictStatus {
    Clean,
    /// The outline was written after the last recorded sync.
    LocalChanges {
        modified: DateTime<Utc>,
        last_sync: DateTime<Utc>,
    },
    NeverSynced,
}

impl ConflictStatus {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ConflictStatus::LocalChanges { .. })
    }
}

pub fn file_mtime(path: &Path) -> SyncResult<DateTime<Utc>> {
    let meta = std::fs::metadata(path).map_err(|e| SyncError::io(path, e))?;
    let modified = meta.modified().map_err(|e| SyncError::io(path, e))?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Compare the file's modification time with `last_sync`. Sub-second
/// precision is dropped on both sides since `LAST_SYNC` is stored in
/// whole seconds.
pub fn check_local(path: &Path, last_sync: Option<DateTime<Utc>>) -> SyncResult<ConflictStatus> {
    let Some(last_sync) = last_sync else {
        return Ok(ConflictStatus::NeverSynced);
    };
    let modified = file_mtime(path)?;
    if modified.timestamp() > last_sync.timestamp() {
        Ok(ConflictStatus::LocalChanges { modified, last_sync })
    } else {
        Ok(ConflictStatus::Clean)
    }
}

/// The remote has drifted when its newest revision is neither the one we
/// last pushed nor the one we last pulled. Documents with no recorded
/// revision, or remotes that expose none, never conflict.
pub fn check_remote(
    latest: Option<&str>,
    last_push: Option<&str>,
    last_pull: Option<&str>,
) -> Result<(), String> {
    let Some(latest) = latest else {
        return Ok(());
    };
    if last_push.is_none() && last_pull.is_none() {
        return Ok(());
    }
    if Some(latest) == last_push || Some(latest) == last_pull {
        return Ok(());
    }
    Err(format!(
        "remote document changed since the last sync (now at revision {}); pull first or push with --force",
        latest
    ))
}

/// `<file>.backup.<mtime seconds>` next to the outline.
pub fn backup_path(path: &Path) -> SyncResult<PathBuf> {
    let stamp = file_mtime(path)?.timestamp();
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".backup.{}", stamp));
    Ok(PathBuf::from(name))
}

/// Copy the outline to its backup path, returning that path.
pub fn snapshot(path: &Path) -> SyncResult<PathBuf> {
    let dest = backup_path(path)?;
    std::fs::copy(path, &dest).map_err(|e| SyncError::io(&dest, e))?;
    tracing::info!(backup = %dest.display(), "backed up outline before pull");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::time::SystemTime;

    fn touch(path: &Path, at: DateTime<Utc>) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::from(at)).unwrap();
    }

    #[test]
    fn local_edit_after_sync_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.org");
        std::fs::write(&path, "* A\n").unwrap();
        let last_sync = Utc::now() - Duration::hours(1);
        touch(&path, last_sync + Duration::minutes(5));
        let status = check_local(&path, Some(last_sync)).unwrap();
        assert!(status.is_conflict());

        touch(&path, last_sync);
        assert_eq!(check_local(&path, Some(last_sync)).unwrap(), ConflictStatus::Clean);
        assert_eq!(check_local(&path, None).unwrap(), ConflictStatus::NeverSynced);
    }

    #[test]
    fn remote_drift() {
        assert!(check_remote(None, Some("3"), None).is_ok());
        assert!(check_remote(Some("7"), None, None).is_ok());
        assert!(check_remote(Some("3"), Some("3"), Some("1")).is_ok());
        assert!(check_remote(Some("4"), Some("3"), Some("4")).is_ok());
        let err = check_remote(Some("5"), Some("3"), Some("4")).unwrap_err();
        assert!(err.contains("revision 5"));
    }

    #[test]
    fn snapshot_names_backup_after_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.org");
        std::fs::write(&path, "* Keep me\n").unwrap();
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        touch(&path, at);
        let backup = snapshot(&path).unwrap();
        assert_eq!(backup, dir.path().join("notes.org.backup.1700000000"));
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "* Keep me\n");
    }
}
