//! Remote state → annotations.
//!
//! [`extract_suggestions`] reassembles reviewer suggestions from the
//! suggestion-tagged runs of a document fetched with suggestions inline.
//! [`merge`] folds remote comments and suggestions into the outline, keyed
//! by remote id:
//!
//! - known ids (active or archived) keep their local lifecycle state; only
//!   descriptive fields are refreshed and local draft replies are kept,
//! - new ids become `pending` annotations on a best-effort section,
//! - new comments that are already resolved remotely are skipped.
//!
//! Placement is approximate: the remote anchor does not map precisely onto
//! outline structure. Running the same merge twice changes nothing.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::models::{
    normalize_body, Annotation, Comment, Document, Node, NodePath, Reply, Section, Suggestion,
    SuggestionKind, SuggestionStatus,
};
use crate::remote::{RemoteBlock, RemoteComment, RemoteDocument, RemoteElement, RemoteSuggestion};

pub fn extract_suggestions(remote: &RemoteDocument) -> Vec<RemoteSuggestion> {
    let mut found: IndexMap<String, RemoteSuggestion> = IndexMap::new();
    let mut heading: Option<String> = None;
    collect_suggestions(&remote.blocks, &mut heading, &mut found);
    found
        .into_values()
        .map(|mut s| {
            s.content = s.content.trim_end_matches('\n').to_string();
            s
        })
        .collect()
}

fn collect_suggestions(
    blocks: &[RemoteBlock],
    heading: &mut Option<String>,
    found: &mut IndexMap<String, RemoteSuggestion>,
) {
    for block in blocks {
        match block {
            RemoteBlock::Paragraph {
                heading: level,
                elements,
            } => {
                if level.is_some() {
                    *heading = Some(block.plain_text()).filter(|t| !t.is_empty());
                }
                for element in elements {
                    let RemoteElement::Text {
                        start,
                        end,
                        content,
                        suggested_insertions,
                        suggested_deletions,
                    } = element
                    else {
                        continue;
                    };
                    let tagged = suggested_insertions
                        .iter()
                        .map(|id| (id, SuggestionKind::Insertion))
                        .chain(
                            suggested_deletions
                                .iter()
                                .map(|id| (id, SuggestionKind::Deletion)),
                        );
                    for (id, kind) in tagged {
                        let entry = found.entry(id.clone()).or_insert_with(|| RemoteSuggestion {
                            id: id.clone(),
                            kind,
                            content: String::new(),
                            author: None,
                            start: *start,
                            end: *end,
                            location: heading.clone(),
                        });
                        entry.content.push_str(content);
                        entry.start = entry.start.min(*start);
                        entry.end = entry.end.max(*end);
                    }
                }
            }
            RemoteBlock::Table { rows } => {
                for cell in rows.iter().flatten() {
                    collect_suggestions(cell, heading, found);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct MergeReport {
    pub added_comments: usize,
    pub added_suggestions: usize,
    pub updated: usize,
    pub skipped_resolved: usize,
}

pub fn merge(
    doc: &mut Document,
    comments: &[RemoteComment],
    suggestions: &[RemoteSuggestion],
    now: DateTime<Utc>,
) -> MergeReport {
    let mut report = MergeReport::default();

    for remote in comments {
        if let Some(existing) = annotation_mut(doc, &remote.id) {
            if refresh_comment(existing, remote) {
                report.updated += 1;
            }
            continue;
        }
        if remote.resolved {
            report.skipped_resolved += 1;
            continue;
        }
        let target = place(doc, remote.anchor.as_deref(), None);
        attach(doc, target, Annotation::Comment(new_comment(remote)));
        report.added_comments += 1;
    }

    for remote in suggestions {
        if let Some(existing) = annotation_mut(doc, &remote.id) {
            if refresh_suggestion(existing, remote) {
                report.updated += 1;
            }
            continue;
        }
        let target = place(doc, Some(&remote.content), remote.location.as_deref());
        attach(
            doc,
            target,
            Annotation::Suggestion(Suggestion {
                id: remote.id.clone(),
                kind: remote.kind,
                author: remote.author.clone().unwrap_or_default(),
                created: Some(now),
                content: normalize_body(&remote.content),
                location: remote.location.clone(),
                status: SuggestionStatus::Pending,
                integrated_at: None,
            }),
        );
        report.added_suggestions += 1;
    }

    tracing::debug!(?report, "merged remote annotations");
    report
}

fn annotation_mut<'a>(doc: &'a mut Document, id: &str) -> Option<&'a mut Annotation> {
    if let Some(pos) = doc.archive.iter().position(|a| a.annotation.id() == id) {
        return Some(&mut doc.archive[pos].annotation);
    }
    doc.annotation_lists_mut()
        .into_iter()
        .flat_map(|list| list.iter_mut())
        .find(|a| a.id() == id)
}

fn remote_replies(remote: &RemoteComment) -> Vec<Reply> {
    remote
        .replies
        .iter()
        .map(|r| Reply {
            id: Some(r.id.clone()),
            author: r.author.clone(),
            created: r.created,
            body: normalize_body(&r.body),
        })
        .collect()
}

fn new_comment(remote: &RemoteComment) -> Comment {
    Comment {
        id: remote.id.clone(),
        author: remote.author.clone(),
        created: remote.created,
        body: normalize_body(&remote.body),
        anchor: remote.anchor.clone().filter(|a| !a.is_empty()),
        resolved: false,
        resolved_at: None,
        replies: remote_replies(remote),
    }
}

/// Returns whether anything changed.
fn refresh_comment(existing: &mut Annotation, remote: &RemoteComment) -> bool {
    let Annotation::Comment(local) = existing else {
        tracing::warn!(id = %remote.id, "remote comment id matches a local suggestion");
        return false;
    };
    let before = local.clone();
    local.author = remote.author.clone();
    if remote.created.is_some() {
        local.created = remote.created;
    }
    local.body = normalize_body(&remote.body);
    local.anchor = remote.anchor.clone().filter(|a| !a.is_empty());

    let mut replies = remote_replies(remote);
    // Replies we sent but the remote no longer lists are kept as they were.
    for reply in &local.replies {
        let known = reply
            .id
            .as_ref()
            .is_some_and(|id| replies.iter().any(|r| r.id.as_ref() == Some(id)));
        if reply.id.is_some() && !known {
            replies.push(reply.clone());
        }
    }
    replies.extend(local.replies.iter().filter(|r| r.is_draft()).cloned());
    local.replies = replies;
    *local != before
}

fn refresh_suggestion(existing: &mut Annotation, remote: &RemoteSuggestion) -> bool {
    let Annotation::Suggestion(local) = existing else {
        tracing::warn!(id = %remote.id, "remote suggestion id matches a local comment");
        return false;
    };
    let before = local.clone();
    local.kind = remote.kind;
    local.content = normalize_body(&remote.content);
    if remote.location.is_some() {
        local.location = remote.location.clone();
    }
    if let Some(author) = &remote.author {
        local.author = author.clone();
    }
    *local != before
}

/// Direct text of a section, excluding child sections.
fn section_text(section: &Section) -> String {
    let mut out = String::new();
    for node in &section.children {
        match node {
            Node::Text(run) => out.push_str(&run.text),
            Node::Link(link) => out.push_str(link.display()),
            Node::List(list) => {
                for item in &list.items {
                    out.push_str(&item.text.text);
                    out.push('\n');
                }
            }
            Node::Table(table) => {
                for row in &table.rows {
                    out.push_str(&row.join(" "));
                    out.push('\n');
                }
            }
            Node::Code(block) => out.push_str(&block.body),
            _ => continue,
        }
        out.push('\n');
    }
    out
}

/// Best section for a new annotation: a section whose remote heading equals
/// `location`, else the deepest section whose title or text contains
/// `anchor`, else the first section. `None` means the document has none.
fn place(doc: &Document, anchor: Option<&str>, location: Option<&str>) -> Option<NodePath> {
    let sections = doc.sections();
    if let Some(location) = location.map(str::trim).filter(|l| !l.is_empty()) {
        if let Some((path, _)) = sections
            .iter()
            .find(|(_, s)| s.display_heading() == location || s.title == location)
        {
            return Some(path.clone());
        }
    }
    if let Some(anchor) = anchor.map(str::trim).filter(|a| !a.is_empty()) {
        let best = sections
            .iter()
            .filter(|(_, s)| s.title.contains(anchor) || section_text(s).contains(anchor))
            .fold(None::<&(NodePath, &Section)>, |best, candidate| match best {
                Some(b) if b.0.depth() >= candidate.0.depth() => Some(b),
                _ => Some(candidate),
            });
        if let Some((path, _)) = best {
            return Some(path.clone());
        }
    }
    sections.first().map(|(path, _)| path.clone())
}

fn attach(doc: &mut Document, target: Option<NodePath>, annotation: Annotation) {
    match target.and_then(|path| doc.section_at_mut(&path)) {
        Some(section) => section.annotations.push(annotation),
        None => doc.annotations.push(annotation),
    }
}

/// One remote image to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDownload {
    pub object_id: String,
    pub uri: String,
    pub dest: PathBuf,
}

fn remote_images(blocks: &[RemoteBlock], out: &mut Vec<(String, String)>) {
    for block in blocks {
        match block {
            RemoteBlock::Paragraph { elements, .. } => {
                for element in elements {
                    if let RemoteElement::InlineImage { object_id, uri, .. } = element {
                        out.push((object_id.clone(), uri.clone()));
                    }
                }
            }
            RemoteBlock::Table { rows } => {
                for cell in rows.iter().flatten() {
                    remote_images(cell, out);
                }
            }
        }
    }
}

fn file_name_for(object_id: &str) -> String {
    let safe: String = object_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}.png", safe)
}

/// Schedule every remote inline image for download into `dir` and point
/// outline images that reference the same URI at the local copy.
/// `link_dir` is how `dir` is written in links, relative to the outline.
pub fn plan_assets(
    doc: &mut Document,
    remote: &RemoteDocument,
    dir: &Path,
    link_dir: &str,
) -> Vec<AssetDownload> {
    let mut images = Vec::new();
    remote_images(&remote.blocks, &mut images);

    let mut plan = Vec::new();
    for (object_id, uri) in images {
        let name = file_name_for(&object_id);
        let local = format!("file:{}/{}", link_dir, name);
        rewrite_images(&mut doc.content, &uri, &local);
        plan.push(AssetDownload {
            object_id,
            uri,
            dest: dir.join(name),
        });
    }
    plan
}

fn rewrite_images(nodes: &mut [Node], uri: &str, local: &str) {
    for node in nodes {
        match node {
            Node::Image(image) if image.target == uri => image.target = local.to_string(),
            Node::Section(section) => rewrite_images(&mut section.children, uri, local),
            _ => {}
        }
    }
}
