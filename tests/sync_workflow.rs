//! End-to-end push/pull tests against the in-memory remote.
//!
//! Each test works on a real outline file in a temp directory, linked with
//! `init`, and drives the same entry points the CLI uses.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use orgsync::config::Config;
use orgsync::error::SyncError;
use orgsync::lifecycle::{AnnotationState, KindFilter};
use orgsync::memory::InMemoryRemote;
use orgsync::parser::parse_file;
use orgsync::progress::{NoProgress, RecordingProgress, SyncPhase};
use orgsync::pull::{pull, PullOptions, PullReport};
use orgsync::push::{push, PushOptions, PushReport};
use orgsync::remote::{Mutation, RemoteBlock, RemoteComment, RemoteElement, TextRange, TextStyle};
use orgsync::sync::{self, Collaborators, DocumentLock, SyncState};
use orgsync::traits::Renderer;

const SHIP_IT: &str = "* TODO Ship it\nSome /italic/ text.\n";

// ─── Fixtures ───────────────────────────────────────────────────────

/// Renderer that produces nothing.
struct NoopRenderer;

impl Renderer for NoopRenderer {
    fn render(&self, _document_path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Renderer that writes the named files next to the outline.
struct FileRenderer(&'static [&'static str]);

impl Renderer for FileRenderer {
    fn render(&self, document_path: &Path) -> Result<()> {
        let dir = document_path.parent().unwrap();
        for name in self.0 {
            fs::write(dir.join(name), b"<svg/>")?;
        }
        Ok(())
    }
}

struct Fixture {
    dir: TempDir,
    path: PathBuf,
    remote: InMemoryRemote,
    gdoc_id: String,
}

impl Fixture {
    fn new(text: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.org");
        fs::write(&path, text).unwrap();
        let remote = InMemoryRemote::new().with_author("me");
        let gdoc_id = sync::init(&path, &remote, None, None).unwrap().gdoc_id;
        Fixture {
            dir,
            path,
            remote,
            gdoc_id,
        }
    }

    fn collab<'a>(&'a self, renderer: &'a dyn Renderer) -> Collaborators<'a> {
        Collaborators {
            transport: &self.remote,
            assets: &self.remote,
            renderer,
            progress: &NoProgress,
        }
    }

    fn push_with(&self, renderer: &dyn Renderer, options: PushOptions) -> Result<PushReport, SyncError> {
        push(&self.path, &self.collab(renderer), &Config::default(), options)
    }

    fn push(&self) -> PushReport {
        self.push_with(&NoopRenderer, PushOptions::default()).unwrap()
    }

    fn pull_with(&self, options: PullOptions) -> Result<PullReport, SyncError> {
        pull(&self.path, &self.collab(&NoopRenderer), &Config::default(), options)
    }

    fn pull(&self) -> PullReport {
        self.pull_with(PullOptions::default()).unwrap()
    }

    fn text(&self) -> String {
        fs::read_to_string(&self.path).unwrap()
    }

    fn backups(&self) -> Vec<PathBuf> {
        fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains(".backup."))
            .collect()
    }

    /// Reviewer leaves a comment anchored on `anchor`.
    fn comment(&self, id: &str, anchor: &str, resolved: bool) {
        self.remote
            .add_comment(
                &self.gdoc_id,
                RemoteComment {
                    id: id.to_string(),
                    author: "Ana".to_string(),
                    created: Some(Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap()),
                    body: format!("Comment {}", id),
                    anchor: Some(anchor.to_string()),
                    resolved,
                    replies: vec![],
                },
            )
            .unwrap();
    }

    /// Reviewer suggests inserting "today" after the ship-it paragraph text.
    fn suggest_today(&self) {
        self.remote
            .set_blocks(
                &self.gdoc_id,
                vec![
                    RemoteBlock::Paragraph {
                        heading: Some(1),
                        elements: vec![RemoteElement::text(1, "TODO Ship it\n")],
                    },
                    RemoteBlock::Paragraph {
                        heading: None,
                        elements: vec![
                            RemoteElement::text(14, "Some italic text. "),
                            RemoteElement::Text {
                                start: 32,
                                end: 37,
                                content: "today".to_string(),
                                suggested_insertions: vec!["sugg-1".to_string()],
                                suggested_deletions: vec![],
                            },
                            RemoteElement::text(37, "\n"),
                        ],
                    },
                ],
            )
            .unwrap();
    }
}

fn touch(path: &Path, at: chrono::DateTime<Utc>) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::from(at)).unwrap();
}

// ─── Push ───────────────────────────────────────────────────────────

#[test]
fn push_emits_heading_then_styled_paragraph() {
    let fx = Fixture::new(SHIP_IT);
    let report = fx.push();

    assert_eq!(
        fx.remote.last_batch(&fx.gdoc_id),
        vec![
            Mutation::InsertText {
                index: 1,
                text: "TODO Ship it\n".to_string()
            },
            Mutation::UpdateParagraphStyle {
                range: TextRange::new(1, 14),
                heading: 1
            },
            Mutation::InsertText {
                index: 14,
                text: "Some italic text.\n".to_string()
            },
            Mutation::UpdateTextStyle {
                range: TextRange::new(19, 25),
                style: TextStyle::Italic
            },
        ]
    );
    assert_eq!(report.mutations, 4);
    assert_eq!(
        fx.remote.body_text(&fx.gdoc_id).as_deref(),
        Some("TODO Ship it\nSome italic text.\n")
    );

    let text = fx.text();
    assert!(text.contains("#+LAST_PUSH_REV: 3"));
    assert!(text.contains("* TODO Ship it\nSome /italic/ text.\n"));
    assert_eq!(sync::status(&fx.path).unwrap().state, SyncState::Synced);
    assert!(!DocumentLock::lock_path(&fx.path).exists());
}

#[test]
fn push_refuses_remote_drift_unless_forced() {
    let fx = Fixture::new(SHIP_IT);
    fx.push();
    fx.remote.set_blocks(&fx.gdoc_id, vec![]).unwrap();

    let before = fx.text();
    let err = fx.push_with(&NoopRenderer, PushOptions::default()).unwrap_err();
    assert_eq!(err.code(), "conflict_detected");
    assert_eq!(fx.text(), before);

    let report = fx
        .push_with(&NoopRenderer, PushOptions { force: true })
        .unwrap();
    assert_eq!(report.mutations, 4);
}

#[test]
fn failed_remote_call_leaves_outline_byte_identical() {
    let fx = Fixture::new("#+GDOCS_COMMENT: Please review the intro\n* Intro\nHello.\n");
    fx.remote.fail_on("create_comment");
    let before = fx.text();

    let err = fx.push_with(&NoopRenderer, PushOptions::default()).unwrap_err();
    match &err {
        SyncError::TransportFailure { operation, .. } => assert_eq!(*operation, "create_comment"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(fx.text(), before);
    assert!(!DocumentLock::lock_path(&fx.path).exists());

    fx.remote.clear_failures();
    let report = fx.push();
    assert_eq!(report.comments_posted, 1);
    assert!(!fx.text().contains("GDOCS_COMMENT"));
    assert_eq!(fx.remote.comments(&fx.gdoc_id)[0].body, "Please review the intro");
}

#[test]
fn missing_figure_output_fails_before_any_remote_write() {
    let fx = Fixture::new("* Figures\n#+BEGIN_SRC dot :file out.svg\ndigraph { a -> b }\n#+END_SRC\n");
    let before = fx.text();

    let err = fx.push_with(&NoopRenderer, PushOptions::default()).unwrap_err();
    match &err {
        SyncError::RenderingFailure { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].output, PathBuf::from("out.svg"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(err.to_string().contains("out.svg"));
    assert_eq!(fx.text(), before);
    assert!(!fx.remote.calls().iter().any(|c| c == "clear_content"));
}

#[test]
fn rendered_figures_are_uploaded_but_not_persisted() {
    let fx = Fixture::new("* Figures\n#+BEGIN_SRC dot :file out.svg\ndigraph { a -> b }\n#+END_SRC\n");
    let report = fx
        .push_with(&FileRenderer(&["out.svg"]), PushOptions::default())
        .unwrap();
    assert_eq!(report.figures_uploaded, 1);

    let body = fx.remote.body_text(&fx.gdoc_id).unwrap();
    assert_eq!(body, "Figures\n\u{FFFC}\n");
    let uploads = fx.remote.uploads();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].1.ends_with("/out.svg"));
    assert!(fx.text().contains("#+BEGIN_SRC dot :file out.svg"));
}

#[test]
fn local_images_are_uploaded_in_place() {
    let fx = Fixture::new("* Pics\n[[file:local.png]]\n");
    fs::write(fx.dir.path().join("local.png"), b"PNG").unwrap();
    let report = fx.push();
    assert_eq!(report.images_uploaded, 1);
    assert_eq!(fx.remote.body_text(&fx.gdoc_id).as_deref(), Some("Pics\n\u{FFFC}\n"));
    assert!(fx.text().contains("[[file:local.png]]"));
}

#[test]
fn push_reports_phases_in_order() {
    let fx = Fixture::new("#+GDOCS_COMMENT: hi\n* Figures\n#+BEGIN_SRC dot :file out.svg\n#+END_SRC\n");
    let recorder = RecordingProgress::default();
    let renderer = FileRenderer(&["out.svg"]);
    let collab = Collaborators {
        transport: &fx.remote,
        assets: &fx.remote,
        renderer: &renderer,
        progress: &recorder,
    };
    push(&fx.path, &collab, &Config::default(), PushOptions::default()).unwrap();
    assert_eq!(
        recorder.phases(),
        vec![
            SyncPhase::Checking,
            SyncPhase::Rendering,
            SyncPhase::Uploading,
            SyncPhase::Writing,
            SyncPhase::Commenting,
            SyncPhase::Saving
        ]
    );
}

// ─── Pull ───────────────────────────────────────────────────────────

#[test]
fn pull_merges_feedback_once() {
    let fx = Fixture::new(SHIP_IT);
    fx.push();
    fx.comment("c1", "italic", false);
    fx.comment("c0", "Ship", true);
    fx.suggest_today();

    let report = fx.pull();
    assert_eq!(report.added_comments, 1);
    assert_eq!(report.added_suggestions, 1);
    assert_eq!(report.skipped_resolved, 1);
    assert_eq!(report.revision.as_deref(), Some("4"));

    let text = fx.text();
    assert!(text.contains("** GDOCS_ANNOTATIONS"));
    assert!(text.contains(":COMMENT_ID: c1"));
    assert!(text.contains(":SUGG_ID: sugg-1"));
    assert!(text.contains("#+LAST_PULL_REV: 4"));
    assert!(!text.contains("c0"));

    let listed = sync::list(&fx.path, KindFilter::All, false).unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|a| a.section.as_deref() == Some("Ship it")));
    assert!(listed.iter().all(|a| a.state == AnnotationState::Pending));

    let again = fx.pull();
    assert_eq!(again.added_comments, 0);
    assert_eq!(again.added_suggestions, 0);
    assert_eq!(again.updated, 0);
    assert_eq!(sync::list(&fx.path, KindFilter::All, false).unwrap().len(), 2);
}

#[test]
fn pull_conflict_gate_and_single_backup() {
    let fx = Fixture::new(SHIP_IT);
    let last_sync = parse_file(&fx.path).unwrap().last_sync().unwrap();
    let edited = format!("{}\nA local edit.\n", fx.text());
    fs::write(&fx.path, &edited).unwrap();
    touch(&fx.path, last_sync + Duration::seconds(120));

    let err = fx.pull_with(PullOptions::default()).unwrap_err();
    assert_eq!(err.code(), "conflict_detected");
    assert_eq!(fx.text(), edited);
    assert!(fx.backups().is_empty());

    let report = fx
        .pull_with(PullOptions {
            force: true,
            backup: true,
        })
        .unwrap();
    let backups = fx.backups();
    assert_eq!(backups.len(), 1);
    assert_eq!(report.backup.as_ref(), Some(&backups[0]));
    assert_eq!(fs::read_to_string(&backups[0]).unwrap(), edited);
    assert!(fx.text().contains("A local edit."));
    assert_eq!(sync::status(&fx.path).unwrap().state, SyncState::Synced);
}

#[test]
fn pull_downloads_remote_images_and_relinks() {
    let fx = Fixture::new("* Pics\n[[https://img.example/a.png]]\n");
    fx.remote.seed_image("https://img.example/a.png", b"PNG");
    fx.remote
        .set_blocks(
            &fx.gdoc_id,
            vec![RemoteBlock::Paragraph {
                heading: None,
                elements: vec![
                    RemoteElement::InlineImage {
                        start: 1,
                        object_id: "kix.abc".to_string(),
                        uri: "https://img.example/a.png".to_string(),
                    },
                    RemoteElement::text(2, "\n"),
                ],
            }],
        )
        .unwrap();

    let report = fx.pull();
    assert_eq!(report.images_downloaded, 1);
    let local = fx.dir.path().join("notes_assets").join("kix_abc.png");
    assert_eq!(fs::read(&local).unwrap(), b"PNG");
    assert!(fx.text().contains("[[file:notes_assets/kix_abc.png]]"));

    assert_eq!(fx.pull().images_downloaded, 0);
}

#[test]
fn pull_requires_identity() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("loose.org");
    fs::write(&path, SHIP_IT).unwrap();
    let remote = InMemoryRemote::new();
    let collab = Collaborators {
        transport: &remote,
        assets: &remote,
        renderer: &NoopRenderer,
        progress: &NoProgress,
    };
    let err = pull(&path, &collab, &Config::default(), PullOptions::default()).unwrap_err();
    assert_eq!(err.code(), "missing_identity");
    let err = push(&path, &collab, &Config::default(), PushOptions::default()).unwrap_err();
    assert_eq!(err.code(), "missing_identity");
}

// ─── Full review loop ───────────────────────────────────────────────

#[test]
fn resolved_and_integrated_annotations_archive_after_push() {
    let fx = Fixture::new(SHIP_IT);
    fx.push();
    fx.comment("c1", "italic", false);
    fx.suggest_today();
    fx.pull();

    sync::reply(&fx.path, "c1", "me", "Fixed now").unwrap();
    sync::resolve(&fx.path, "c1").unwrap();
    sync::integrate(&fx.path, "sugg-1").unwrap();
    let status = sync::status(&fx.path).unwrap();
    assert_eq!(status.awaiting_archive, 2);
    assert_eq!(status.queued_replies, 1);

    let report = fx.push();
    assert_eq!(report.replies_sent, 1);
    assert_eq!(report.comments_resolved, 1);
    assert_eq!(report.archived, 2);

    let remote_comment = &fx.remote.comments(&fx.gdoc_id)[0];
    assert!(remote_comment.resolved);
    assert_eq!(remote_comment.replies[0].body, "Fixed now");

    let text = fx.text();
    assert!(text.contains("* GDOCS_ARCHIVE"));
    assert!(text.contains(":REPLY_ID: reply-"));
    assert!(text.contains(":ARCHIVED: "));
    let status = sync::status(&fx.path).unwrap();
    assert_eq!(status.awaiting_archive, 0);
    assert_eq!(status.archived, 2);
    assert_eq!(status.pending_comments + status.pending_suggestions, 0);

    let again = fx.pull();
    assert_eq!(again.added_comments, 0);
    assert_eq!(again.added_suggestions, 0);
    let archived = sync::list(&fx.path, KindFilter::All, true).unwrap();
    assert_eq!(archived.len(), 2);
    assert!(archived.iter().all(|a| a.state == AnnotationState::Archived));
}

#[test]
fn reply_queued_annotation_archives_after_push() {
    let fx = Fixture::new(SHIP_IT);
    fx.push();
    fx.comment("c1", "italic", false);
    fx.pull();

    let queued = sync::reply(&fx.path, "c1", "me", "Fixed now").unwrap();
    assert_eq!(queued.state, AnnotationState::ReplyQueued);

    let report = fx.push();
    assert_eq!(report.replies_sent, 1);
    assert_eq!(report.comments_resolved, 0);
    assert_eq!(report.archived, 1);
    let remote_comment = &fx.remote.comments(&fx.gdoc_id)[0];
    assert!(!remote_comment.resolved);
    assert_eq!(remote_comment.replies[0].body, "Fixed now");

    let text = fx.text();
    assert!(text.contains("* GDOCS_ARCHIVE"));
    assert!(text.contains(":ARCHIVED: "));
    assert!(!text.contains("GDOCS_ANNOTATIONS"));
    let listed = sync::list(&fx.path, KindFilter::All, true).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].state, AnnotationState::Archived);
    let status = sync::status(&fx.path).unwrap();
    assert_eq!(status.archived, 1);
    assert_eq!(status.queued_replies, 0);

    let again = fx.pull();
    assert_eq!(again.added_comments, 0);
}
