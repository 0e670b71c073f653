//! Push: outline → remote document.
//!
//! ```text
//!  lock ─► parse ─► identity ─► remote drift check (unless --force)
//!    ─► render figures ─► verify outputs
//!    ─► upload figures + local images into the working copy
//!    ─► convert ─► clear + apply mutations
//!    ─► post directives, send drafts, resolve comments
//!    ─► latest revision
//!    ─► confirm reply ids, archive disposed, drop directives,
//!       LAST_PUSH_REV + LAST_SYNC ─► save
//! ```
//!
//! The remote body is replaced wholesale every time. Uploads happen on a
//! clone of the document so rendered figures and uploaded images never
//! leak into the outline. Everything up to the final save can fail; the
//! outline on disk is only touched once every remote call succeeded.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;

use crate::config::Config;
use crate::conflict;
use crate::error::{RenderFailure, SyncError, SyncResult};
use crate::forward::{self, SideAction};
use crate::lifecycle;
use crate::models::{Document, Image, Node, NodePath, RenderedFigure, LAST_PULL_REV, LAST_PUSH_REV};
use crate::parser::parse_file;
use crate::progress::SyncPhase;
use crate::render::{find_render_targets, verify_outputs, RenderTarget};
use crate::sync::{document_url, now, require_identity, save_synced, Collaborators, DocumentLock};

const COMMAND: &str = "push";

#[derive(Debug, Clone, Copy, Default)]
pub struct PushOptions {
    /// Overwrite the remote even if it changed since the last sync.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PushReport {
    pub gdoc_id: String,
    pub url: String,
    pub mutations: usize,
    pub comments_posted: usize,
    pub replies_sent: usize,
    pub comments_resolved: usize,
    pub archived: usize,
    pub figures_uploaded: usize,
    pub images_uploaded: usize,
    pub revision: Option<String>,
}

/// Local images referenced by the outline that exist on disk.
fn local_images(doc: &Document, base_dir: &Path) -> Vec<(NodePath, PathBuf)> {
    fn walk(nodes: &[Node], prefix: &NodePath, base_dir: &Path, out: &mut Vec<(NodePath, PathBuf)>) {
        for (i, node) in nodes.iter().enumerate() {
            match node {
                Node::Image(image) => {
                    let Some(local) = image.local_path() else {
                        continue;
                    };
                    let file = base_dir.join(local);
                    if file.is_file() {
                        out.push((prefix.child(i), file));
                    } else {
                        tracing::warn!(image = %file.display(), "local image not found; it will be left out");
                    }
                }
                Node::Section(section) => walk(&section.children, &prefix.child(i), base_dir, out),
                _ => {}
            }
        }
    }
    let mut out = Vec::new();
    walk(&doc.content, &NodePath::default(), base_dir, &mut out);
    out
}

fn remove_directives(nodes: &mut Vec<Node>) {
    nodes.retain(|n| !matches!(n, Node::CommentDirective(_)));
    for node in nodes {
        if let Node::Section(section) = node {
            remove_directives(&mut section.children);
        }
    }
}

fn render(collab: &Collaborators, path: &Path, targets: &[RenderTarget]) -> SyncResult<()> {
    collab.phase(COMMAND, SyncPhase::Rendering);
    if let Err(err) = collab.renderer.render(path) {
        let reason = format!("renderer failed: {:#}", err);
        return Err(SyncError::RenderingFailure {
            failures: targets
                .iter()
                .map(|t| RenderFailure {
                    output: PathBuf::from(&t.declared),
                    reason: reason.clone(),
                })
                .collect(),
        });
    }
    verify_outputs(targets)
}

/// Upload figures and local images, swapping their nodes in `working` for
/// remote references. Returns (figures, images) uploaded.
fn upload_assets(
    collab: &Collaborators,
    config: &Config,
    working: &mut Document,
    targets: &[RenderTarget],
    images: &[(NodePath, PathBuf)],
) -> SyncResult<(usize, usize)> {
    if targets.is_empty() && images.is_empty() {
        return Ok((0, 0));
    }
    collab.phase(COMMAND, SyncPhase::Uploading);
    let folder_name = format!("{}{}", working.title(), config.assets.folder_suffix);
    let folder = collab
        .assets
        .ensure_folder(&folder_name, config.assets.parent_folder.as_deref())
        .map_err(|e| SyncError::transport("ensure_folder", e))?;

    let total = targets.len() + images.len();
    let mut done = 0;
    for target in targets {
        let uri = collab
            .assets
            .upload_image(&target.output, &folder)
            .map_err(|e| SyncError::transport("upload_image", e))?;
        working.replace_node(
            &target.path,
            Node::Figure(RenderedFigure {
                language: target.language.clone(),
                local_path: target.output.clone(),
                remote_uri: Some(uri),
            }),
        );
        done += 1;
        collab.items(COMMAND, SyncPhase::Uploading, done, total);
    }
    for (path, file) in images {
        let uri = collab
            .assets
            .upload_image(file, &folder)
            .map_err(|e| SyncError::transport("upload_image", e))?;
        working.replace_node(path, Node::Image(Image { target: uri }));
        done += 1;
        collab.items(COMMAND, SyncPhase::Uploading, done, total);
    }
    Ok((targets.len(), images.len()))
}

pub fn push(
    path: &Path,
    collab: &Collaborators,
    config: &Config,
    options: PushOptions,
) -> SyncResult<PushReport> {
    let _lock = DocumentLock::acquire(path)?;
    let mut doc = parse_file(path)?;
    let gdoc_id = require_identity(&doc)?;
    let transport = collab.transport;
    tracing::info!(gdoc_id = %gdoc_id, path = %path.display(), "push started");

    if !options.force {
        collab.phase(COMMAND, SyncPhase::Checking);
        let latest = transport
            .latest_revision(&gdoc_id)
            .map_err(|e| SyncError::transport("latest_revision", e))?;
        conflict::check_remote(
            latest.as_deref(),
            doc.meta(LAST_PUSH_REV),
            doc.meta(LAST_PULL_REV),
        )
        .map_err(|message| SyncError::ConflictDetected { message })?;
    }

    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let targets = find_render_targets(&doc, base_dir);
    if !targets.is_empty() {
        render(collab, path, &targets)?;
    }
    let images = local_images(&doc, base_dir);
    let mut working = doc.clone();
    let (figures_uploaded, images_uploaded) =
        upload_assets(collab, config, &mut working, &targets, &images)?;

    collab.phase(COMMAND, SyncPhase::Writing);
    let conversion = forward::convert(&working);
    transport
        .clear_content(&gdoc_id)
        .map_err(|e| SyncError::transport("clear_content", e))?;
    if !conversion.mutations.is_empty() {
        transport
            .apply_mutations(&gdoc_id, &conversion.mutations)
            .map_err(|e| SyncError::transport("apply_mutations", e))?;
    }
    tracing::debug!(mutations = conversion.mutations.len(), "remote body replaced");

    let mut report = PushReport {
        gdoc_id: gdoc_id.clone(),
        url: document_url(&gdoc_id),
        mutations: conversion.mutations.len(),
        figures_uploaded,
        images_uploaded,
        ..PushReport::default()
    };

    let mut sent: IndexMap<String, Vec<String>> = IndexMap::new();
    if !conversion.actions.is_empty() {
        collab.phase(COMMAND, SyncPhase::Commenting);
    }
    for (n, action) in conversion.actions.iter().enumerate() {
        match action {
            SideAction::PostComment { text } => {
                let id = transport
                    .create_comment(&gdoc_id, text)
                    .map_err(|e| SyncError::transport("create_comment", e))?;
                tracing::debug!(comment_id = %id, "posted comment");
                report.comments_posted += 1;
            }
            SideAction::SendReply { comment_id, text } => {
                let id = transport
                    .create_reply(&gdoc_id, comment_id, text)
                    .map_err(|e| SyncError::transport("create_reply", e))?;
                sent.entry(comment_id.clone()).or_default().push(id);
                report.replies_sent += 1;
            }
            SideAction::ResolveComment { comment_id } => {
                transport
                    .resolve_comment(&gdoc_id, comment_id)
                    .map_err(|e| SyncError::transport("resolve_comment", e))?;
                report.comments_resolved += 1;
            }
        }
        collab.items(COMMAND, SyncPhase::Commenting, n + 1, conversion.actions.len());
    }

    let revision = transport
        .latest_revision(&gdoc_id)
        .map_err(|e| SyncError::transport("latest_revision", e))?;

    collab.phase(COMMAND, SyncPhase::Saving);
    let stamp = now();
    let mut finished = lifecycle::disposed_ids(&doc);
    for (comment_id, ids) in &sent {
        let confirmed = lifecycle::confirm_replies(&mut doc, comment_id, ids);
        if confirmed && !finished.contains(comment_id) {
            finished.push(comment_id.clone());
        }
    }
    report.archived = lifecycle::archive(&mut doc, &finished, stamp);
    remove_directives(&mut doc.content);
    if let Some(rev) = &revision {
        doc.set_meta(LAST_PUSH_REV, rev.clone());
    }
    doc.set_last_sync(stamp);
    save_synced(&doc, path)?;

    report.revision = revision;
    tracing::info!(
        gdoc_id = %gdoc_id,
        mutations = report.mutations,
        archived = report.archived,
        "push finished"
    );
    Ok(report)
}
