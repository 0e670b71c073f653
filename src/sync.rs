//! Sync orchestration shared by every command.
//!
//! Each operation reads the outline once, works on the in-memory
//! [`Document`], and writes it back at most once at the very end. Push and
//! pull live in their own modules; this one holds the pieces they share
//! (lock, collaborators, saving) and the local-only commands.
//!
//! ```text
//!   init ──► create/link remote ─► GDOC_ID + LAST_SYNC ─► save
//!   push ──► see crate::push
//!   pull ──► see crate::pull
//!   status / list                      (read only)
//!   resolve / integrate / reply ──► lifecycle ─► save
//! ```

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;

use crate::conflict::{self, ConflictStatus};
use crate::error::{SyncError, SyncResult};
use crate::lifecycle::{self, AnnotationState, AnnotationSummary, KindFilter};
use crate::models::{format_timestamp, Annotation, Document, LAST_PULL_REV, LAST_PUSH_REV};
use crate::parser::parse_file;
use crate::progress::{SyncPhase, SyncProgressEvent, SyncProgressReporter};
use crate::traits::{AssetStore, Renderer, Transport};
use crate::writer::write_file;

/// The external services a push or pull talks to.
pub struct Collaborators<'a> {
    pub transport: &'a dyn Transport,
    pub assets: &'a dyn AssetStore,
    pub renderer: &'a dyn Renderer,
    pub progress: &'a dyn SyncProgressReporter,
}

impl Collaborators<'_> {
    pub(crate) fn phase(&self, command: &'static str, phase: SyncPhase) {
        tracing::debug!(command, phase = phase.as_str(), "sync phase");
        self.progress.report(SyncProgressEvent::Phase { command, phase });
    }

    pub(crate) fn items(&self, command: &'static str, phase: SyncPhase, n: usize, total: usize) {
        self.progress.report(SyncProgressEvent::Items {
            command,
            phase,
            n: n as u64,
            total: total as u64,
        });
    }
}

/// Advisory `<file>.lock`, removed on drop. The file records the holder's
/// pid and start time so a lock left by a crash can be identified.
#[derive(Debug)]
pub struct DocumentLock {
    path: PathBuf,
}

impl DocumentLock {
    pub fn lock_path(doc_path: &Path) -> PathBuf {
        let mut name = doc_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    pub fn acquire(doc_path: &Path) -> SyncResult<Self> {
        let path = Self::lock_path(doc_path);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path)
                    .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
                    .ok()
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| "an unknown process".to_string());
                return Err(SyncError::Locked { path, holder });
            }
            Err(e) => return Err(SyncError::io(&path, e)),
        };
        let lock = DocumentLock { path };
        writeln!(
            file,
            "pid {} since {}",
            std::process::id(),
            format_timestamp(&now())
        )
        .map_err(|e| SyncError::io(&lock.path, e))?;
        Ok(lock)
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "could not remove lock file");
        }
    }
}

/// Current time at the one-second precision `LAST_SYNC` is stored with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

pub fn document_url(gdoc_id: &str) -> String {
    format!("https://docs.google.com/document/d/{}/edit", gdoc_id)
}

pub(crate) fn require_identity(doc: &Document) -> SyncResult<String> {
    doc.gdoc_id()
        .map(str::to_string)
        .ok_or(SyncError::MissingIdentity)
}

/// Write after a sync and set the file's mtime to `LAST_SYNC`, so the
/// conflict check sees a clean file until the user edits it again.
pub(crate) fn save_synced(doc: &Document, path: &Path) -> SyncResult<()> {
    write_file(doc, path)?;
    if let Some(last_sync) = doc.last_sync() {
        let file = File::options()
            .write(true)
            .open(path)
            .map_err(|e| SyncError::io(path, e))?;
        file.set_modified(SystemTime::from(last_sync))
            .map_err(|e| SyncError::io(path, e))?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub gdoc_id: String,
    pub url: String,
    /// False when an existing remote document was linked.
    pub created: bool,
}

/// Link the outline to a remote document, creating one unless
/// `existing_id` names it.
pub fn init(
    path: &Path,
    transport: &dyn Transport,
    title: Option<&str>,
    existing_id: Option<&str>,
) -> SyncResult<InitReport> {
    let _lock = DocumentLock::acquire(path)?;
    let mut doc = parse_file(path)?;
    if let Some(id) = doc.gdoc_id() {
        return Err(SyncError::AlreadyInitialized { id: id.to_string() });
    }

    let (gdoc_id, created) = match existing_id {
        Some(id) => {
            transport
                .get_document(id, false)
                .map_err(|e| SyncError::transport("get_document", e))?;
            (id.to_string(), false)
        }
        None => {
            let title = title.map(str::to_string).unwrap_or_else(|| doc.title());
            let id = transport
                .create_document(&title)
                .map_err(|e| SyncError::transport("create_document", e))?;
            (id, true)
        }
    };

    doc.set_gdoc_id(&gdoc_id);
    doc.set_last_sync(now());
    save_synced(&doc, path)?;
    tracing::info!(gdoc_id = %gdoc_id, created, "linked outline to remote document");

    Ok(InitReport {
        url: document_url(&gdoc_id),
        gdoc_id,
        created,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    NotInitialized,
    NeverSynced,
    Synced,
    LocalChanges,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub state: SyncState,
    pub gdoc_id: Option<String>,
    pub url: Option<String>,
    pub last_sync: Option<String>,
    pub last_push_rev: Option<String>,
    pub last_pull_rev: Option<String>,
    pub pending_comments: usize,
    pub pending_suggestions: usize,
    pub queued_replies: usize,
    pub awaiting_archive: usize,
    pub archived: usize,
}

pub fn status(path: &Path) -> SyncResult<StatusReport> {
    let doc = parse_file(path)?;
    let gdoc_id = doc.gdoc_id().map(str::to_string);
    let state = match gdoc_id {
        None => SyncState::NotInitialized,
        Some(_) => match conflict::check_local(path, doc.last_sync())? {
            ConflictStatus::NeverSynced => SyncState::NeverSynced,
            ConflictStatus::Clean => SyncState::Synced,
            ConflictStatus::LocalChanges { .. } => SyncState::LocalChanges,
        },
    };
    let queued_replies = doc
        .active_annotations()
        .map(|a| match a {
            Annotation::Comment(c) => c.drafts().count(),
            Annotation::Suggestion(_) => 0,
        })
        .sum();

    Ok(StatusReport {
        state,
        url: gdoc_id.as_deref().map(document_url),
        gdoc_id,
        last_sync: doc.last_sync().as_ref().map(format_timestamp),
        last_push_rev: doc.meta(LAST_PUSH_REV).map(str::to_string),
        last_pull_rev: doc.meta(LAST_PULL_REV).map(str::to_string),
        pending_comments: lifecycle::pending_comments(&doc).len(),
        pending_suggestions: lifecycle::pending_suggestions(&doc).len(),
        queued_replies,
        awaiting_archive: lifecycle::disposed_ids(&doc).len(),
        archived: doc.archive.len(),
    })
}

pub fn list(path: &Path, filter: KindFilter, include_archived: bool) -> SyncResult<Vec<AnnotationSummary>> {
    let doc = parse_file(path)?;
    Ok(lifecycle::summaries(&doc, filter, include_archived))
}

/// Outcome of a local lifecycle command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionReport {
    pub id: String,
    pub state: AnnotationState,
}

/// Apply a lifecycle transition and save. A rejected transition leaves the
/// file untouched.
fn transition<F>(path: &Path, id: &str, apply: F) -> SyncResult<TransitionReport>
where
    F: FnOnce(&mut Document, DateTime<Utc>) -> SyncResult<()>,
{
    let _lock = DocumentLock::acquire(path)?;
    let mut doc = parse_file(path)?;
    apply(&mut doc, now())?;
    write_file(&doc, path)?;
    let state = lifecycle::find(&doc, id)
        .map(|(_, state)| state)
        .ok_or_else(|| SyncError::NotFound { id: id.to_string() })?;
    tracing::info!(id, state = state.as_str(), "annotation updated");
    Ok(TransitionReport {
        id: id.to_string(),
        state,
    })
}

pub fn resolve(path: &Path, id: &str) -> SyncResult<TransitionReport> {
    transition(path, id, |doc, now| lifecycle::resolve(doc, id, now))
}

pub fn integrate(path: &Path, id: &str) -> SyncResult<TransitionReport> {
    transition(path, id, |doc, now| lifecycle::integrate(doc, id, now))
}

pub fn reply(path: &Path, id: &str, author: &str, text: &str) -> SyncResult<TransitionReport> {
    transition(path, id, |doc, now| lifecycle::queue_reply(doc, id, author, text, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRemote;

    const OUTLINE: &str = "\
#+TITLE: Plan
#+GDOC_ID: doc-1
#+LAST_SYNC: 2024-05-01T08:00:00Z

* Intro
Hello.

** GDOCS_ANNOTATIONS
*** Comment from Ana
:PROPERTIES:
:COMMENT_ID: c1
:AUTHOR: Ana
:END:
Clarify.

*** Suggestion from Bo
:PROPERTIES:
:SUGG_ID: s1
:AUTHOR: Bo
:TYPE: insertion
:STATUS: pending
:END:
[INSERTION] more
";

    fn outline(text: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.org");
        std::fs::write(&path, text).unwrap();
        (dir, path)
    }

    #[test]
    fn lock_is_exclusive_and_released() {
        let (_dir, path) = outline(OUTLINE);
        let lock = DocumentLock::acquire(&path).unwrap();
        match DocumentLock::acquire(&path) {
            Err(SyncError::Locked { holder, .. }) => {
                assert!(holder.starts_with(&format!("pid {} since ", std::process::id())));
            }
            other => panic!("expected a lock error, got {:?}", other),
        }
        drop(lock);
        assert!(!DocumentLock::lock_path(&path).exists());
        assert!(DocumentLock::acquire(&path).is_ok());
    }

    #[test]
    fn leftover_lock_names_its_file_and_holder() {
        let (_dir, path) = outline(OUTLINE);
        let lock_path = DocumentLock::lock_path(&path);
        std::fs::write(&lock_path, "pid 4242 since 2024-05-01T08:00:00Z\n").unwrap();
        let err = DocumentLock::acquire(&path).unwrap_err();
        let message = err.to_string();
        assert!(message.contains(&lock_path.display().to_string()), "{}", message);
        assert!(message.contains("pid 4242"), "{}", message);
        assert!(message.contains("remove it"), "{}", message);
        assert_eq!(err.code(), "locked");
        assert!(lock_path.exists());
    }

    #[test]
    fn init_creates_and_refuses_twice() {
        let (_dir, path) = outline("#+TITLE: Fresh\n\n* One\nBody.\n");
        let remote = InMemoryRemote::new();
        let report = init(&path, &remote, None, None).unwrap();
        assert!(report.created);
        assert_eq!(remote.document_title(&report.gdoc_id).as_deref(), Some("Fresh"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(&format!("#+GDOC_ID: {}", report.gdoc_id)));
        assert!(text.contains("#+LAST_SYNC: "));
        assert_eq!(status(&path).unwrap().state, SyncState::Synced);

        let err = init(&path, &remote, None, None).unwrap_err();
        assert_eq!(err.code(), "already_initialized");
    }

    #[test]
    fn init_links_existing_document() {
        let (_dir, path) = outline("* One\n");
        let remote = InMemoryRemote::new();
        let id = remote.seed_document("Shared", vec![]);
        let report = init(&path, &remote, None, Some(&id)).unwrap();
        assert!(!report.created);
        assert_eq!(report.gdoc_id, id);

        let (_dir2, other) = outline("* Two\n");
        let err = init(&other, &remote, None, Some("missing")).unwrap_err();
        assert_eq!(err.code(), "transport_failure");
        assert!(!std::fs::read_to_string(&other).unwrap().contains("GDOC_ID"));
    }

    #[test]
    fn status_counts() {
        let (_dir, path) = outline(OUTLINE);
        let report = status(&path).unwrap();
        assert_eq!(report.gdoc_id.as_deref(), Some("doc-1"));
        assert_eq!(report.state, SyncState::LocalChanges);
        assert_eq!(report.pending_comments, 1);
        assert_eq!(report.pending_suggestions, 1);
        assert_eq!(report.awaiting_archive, 0);
        assert_eq!(report.url.as_deref(), Some("https://docs.google.com/document/d/doc-1/edit"));

        let (_dir, bare) = outline("* Nothing\n");
        assert_eq!(status(&bare).unwrap().state, SyncState::NotInitialized);
    }

    #[test]
    fn transitions_persist_and_reject() {
        let (_dir, path) = outline(OUTLINE);
        assert_eq!(reply(&path, "c1", "me", "Done, thanks").unwrap().state, AnnotationState::ReplyQueued);
        assert_eq!(resolve(&path, "c1").unwrap().state, AnnotationState::Resolved);
        assert_eq!(integrate(&path, "s1").unwrap().state, AnnotationState::Integrated);
        let report = status(&path).unwrap();
        assert_eq!(report.awaiting_archive, 2);
        assert_eq!(report.queued_replies, 1);

        let before = std::fs::read_to_string(&path).unwrap();
        assert_eq!(resolve(&path, "c1").unwrap_err().code(), "already_terminal");
        assert_eq!(integrate(&path, "c1").unwrap_err().code(), "wrong_kind");
        assert_eq!(resolve(&path, "nope").unwrap_err().code(), "not_found");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn list_filters_by_kind() {
        let (_dir, path) = outline(OUTLINE);
        let all = list(&path, KindFilter::All, false).unwrap();
        assert_eq!(all.len(), 2);
        let comments = list(&path, KindFilter::Comments, false).unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].id, "c1");
        assert_eq!(comments[0].section.as_deref(), Some("Intro"));
    }
}
