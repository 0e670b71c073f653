//! Pull: remote comments and suggestions → outline annotations.
//!
//! Pull never rewrites outline content from the remote body. It merges
//! reviewer feedback into the annotation sections, downloads inline images
//! the outline links to, and records the remote revision it saw.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::Config;
use crate::conflict::{self, ConflictStatus};
use crate::error::{SyncError, SyncResult};
use crate::models::{format_timestamp, LAST_PULL_REV};
use crate::parser::parse_file;
use crate::progress::SyncPhase;
use crate::reverse::{extract_suggestions, merge, plan_assets};
use crate::sync::{now, require_identity, save_synced, Collaborators, DocumentLock};

const COMMAND: &str = "pull";

#[derive(Debug, Clone, Copy, Default)]
pub struct PullOptions {
    /// Merge even though the outline changed since the last sync.
    pub force: bool,
    /// Copy the outline to `<file>.backup.<mtime>` first. Also lifts the
    /// local-changes gate.
    pub backup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PullReport {
    pub gdoc_id: String,
    pub added_comments: usize,
    pub added_suggestions: usize,
    pub updated: usize,
    pub skipped_resolved: usize,
    pub images_downloaded: usize,
    pub backup: Option<PathBuf>,
    pub revision: Option<String>,
}

pub fn pull(
    path: &Path,
    collab: &Collaborators,
    config: &Config,
    options: PullOptions,
) -> SyncResult<PullReport> {
    let _lock = DocumentLock::acquire(path)?;
    let mut doc = parse_file(path)?;
    let gdoc_id = require_identity(&doc)?;
    let transport = collab.transport;
    tracing::info!(gdoc_id = %gdoc_id, path = %path.display(), "pull started");

    collab.phase(COMMAND, SyncPhase::Checking);
    if let ConflictStatus::LocalChanges { modified, last_sync } =
        conflict::check_local(path, doc.last_sync())?
    {
        if !options.force && !options.backup {
            return Err(SyncError::ConflictDetected {
                message: format!(
                    "{} was modified at {}, after the last sync at {}; pull with --force or --backup",
                    path.display(),
                    format_timestamp(&modified),
                    format_timestamp(&last_sync)
                ),
            });
        }
        tracing::warn!(path = %path.display(), "pulling over local changes");
    }
    let backup = if options.backup {
        Some(conflict::snapshot(path)?)
    } else {
        None
    };

    collab.phase(COMMAND, SyncPhase::Fetching);
    let remote = transport
        .get_document(&gdoc_id, true)
        .map_err(|e| SyncError::transport("get_document", e))?;
    let comments = transport
        .list_comments(&gdoc_id)
        .map_err(|e| SyncError::transport("list_comments", e))?;
    let latest = transport
        .latest_revision(&gdoc_id)
        .map_err(|e| SyncError::transport("latest_revision", e))?;

    collab.phase(COMMAND, SyncPhase::Merging);
    let stamp = now();
    let suggestions = extract_suggestions(&remote);
    let merged = merge(&mut doc, &comments, &suggestions, stamp);

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "outline".to_string());
    let dir_name = format!("{}{}", stem, config.assets.download_dir_suffix);
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let asset_dir = base_dir.join(&dir_name);
    let downloads: Vec<_> = plan_assets(&mut doc, &remote, &asset_dir, &dir_name)
        .into_iter()
        .filter(|d| !d.dest.exists())
        .collect();
    if !downloads.is_empty() {
        collab.phase(COMMAND, SyncPhase::Downloading);
        std::fs::create_dir_all(&asset_dir).map_err(|e| SyncError::io(&asset_dir, e))?;
        for (n, download) in downloads.iter().enumerate() {
            collab
                .assets
                .download_image(&download.uri, &download.dest)
                .map_err(|e| SyncError::transport("download_image", e))?;
            collab.items(COMMAND, SyncPhase::Downloading, n + 1, downloads.len());
        }
    }

    collab.phase(COMMAND, SyncPhase::Saving);
    let revision = latest.or_else(|| remote.revision.clone());
    if let Some(rev) = &revision {
        doc.set_meta(LAST_PULL_REV, rev.clone());
    }
    doc.set_last_sync(stamp);
    save_synced(&doc, path)?;

    tracing::info!(
        gdoc_id = %gdoc_id,
        added_comments = merged.added_comments,
        added_suggestions = merged.added_suggestions,
        "pull finished"
    );
    Ok(PullReport {
        gdoc_id,
        added_comments: merged.added_comments,
        added_suggestions: merged.added_suggestions,
        updated: merged.updated,
        skipped_resolved: merged.skipped_resolved,
        images_downloaded: downloads.len(),
        backup,
        revision,
    })
}
