//! In-memory remote: a [`Transport`] and [`AssetStore`] that keep every
//! document, comment and asset in process memory.
//!
//! The body is modelled as a sequence of UTF-16 units (plus one unit per
//! inline image) so mutation indices are checked the way the hosted service
//! checks them. A batch is applied atomically: one bad index rejects the
//! whole batch and leaves the body as it was.
//!
//! Test helpers let a caller play the reviewer ([`set_blocks`],
//! [`add_comment`]), make a named operation fail ([`fail_on`]) and inspect
//! what was called ([`calls`]).
//!
//! [`set_blocks`]: InMemoryRemote::set_blocks
//! [`add_comment`]: InMemoryRemote::add_comment
//! [`fail_on`]: InMemoryRemote::fail_on
//! [`calls`]: InMemoryRemote::calls

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{SubsecRound, Utc};
use indexmap::IndexMap;

use crate::remote::{
    Mutation, RemoteBlock, RemoteComment, RemoteDocument, RemoteElement, RemoteReply, TextRange,
    FIRST_INDEX,
};
use crate::traits::{AssetStore, Transport};

#[derive(Debug, Clone, PartialEq)]
enum Unit {
    Char(u16),
    Image { object_id: String, uri: String },
}

const NEWLINE: u16 = b'\n' as u16;

#[derive(Debug, Clone, Default)]
struct Body {
    units: Vec<Unit>,
    /// Heading level per unit; only meaningful on paragraph-ending newlines.
    headings: Vec<Option<u8>>,
}

impl Body {
    /// One past the last addressable index.
    fn end(&self) -> usize {
        FIRST_INDEX + self.units.len()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < FIRST_INDEX || index > self.end() {
            bail!("index {} outside body [{}, {}]", index, FIRST_INDEX, self.end());
        }
        Ok(())
    }

    fn check_range(&self, range: &TextRange) -> Result<()> {
        if range.is_empty() || range.start < FIRST_INDEX || range.end > self.end() {
            bail!(
                "range [{}, {}) outside body [{}, {})",
                range.start,
                range.end,
                FIRST_INDEX,
                self.end()
            );
        }
        Ok(())
    }

    fn insert(&mut self, index: usize, units: Vec<Unit>) {
        let at = index - FIRST_INDEX;
        let n = units.len();
        self.units.splice(at..at, units);
        self.headings.splice(at..at, std::iter::repeat(None).take(n));
    }

    /// Set the heading on every paragraph the range touches.
    fn set_heading(&mut self, range: &TextRange, level: u8) {
        let mut i = range.start - FIRST_INDEX;
        while i < self.units.len() {
            if self.units[i] == Unit::Char(NEWLINE) {
                self.headings[i] = Some(level);
                if i + FIRST_INDEX >= range.end - 1 {
                    break;
                }
            }
            i += 1;
        }
    }

    fn text(&self) -> String {
        let units: Vec<u16> = self
            .units
            .iter()
            .map(|u| match u {
                Unit::Char(c) => *c,
                Unit::Image { .. } => 0xFFFC,
            })
            .collect();
        String::from_utf16_lossy(&units)
    }

    fn blocks(&self) -> Vec<RemoteBlock> {
        let mut blocks = Vec::new();
        let mut elements: Vec<RemoteElement> = Vec::new();
        let mut run: Vec<u16> = Vec::new();
        let mut run_start = FIRST_INDEX;

        fn flush(run: &mut Vec<u16>, start: usize, elements: &mut Vec<RemoteElement>) {
            if !run.is_empty() {
                elements.push(RemoteElement::text(start, &String::from_utf16_lossy(run)));
                run.clear();
            }
        }

        for (i, unit) in self.units.iter().enumerate() {
            let index = i + FIRST_INDEX;
            match unit {
                Unit::Image { object_id, uri } => {
                    flush(&mut run, run_start, &mut elements);
                    elements.push(RemoteElement::InlineImage {
                        start: index,
                        object_id: object_id.clone(),
                        uri: uri.clone(),
                    });
                    run_start = index + 1;
                }
                Unit::Char(c) => {
                    if run.is_empty() {
                        run_start = index;
                    }
                    run.push(*c);
                    if *c == NEWLINE {
                        flush(&mut run, run_start, &mut elements);
                        blocks.push(RemoteBlock::Paragraph {
                            heading: self.headings[i],
                            elements: std::mem::take(&mut elements),
                        });
                    }
                }
            }
        }
        flush(&mut run, run_start, &mut elements);
        if !elements.is_empty() {
            blocks.push(RemoteBlock::Paragraph {
                heading: None,
                elements,
            });
        }
        blocks
    }
}

#[derive(Debug, Clone, Default)]
struct StoredDocument {
    title: String,
    body: Body,
    /// Reviewer-edited view replacing the derived body until the next write.
    edited: Option<Vec<RemoteBlock>>,
    comments: Vec<RemoteComment>,
    revision: u64,
    last_batch: Vec<Mutation>,
}

#[derive(Debug, Default)]
struct State {
    documents: IndexMap<String, StoredDocument>,
    /// (name, parent) → folder id.
    folders: IndexMap<(String, Option<String>), String>,
    /// uri → (folder, bytes).
    assets: IndexMap<String, (Option<String>, Vec<u8>)>,
    failing: HashSet<String>,
    calls: Vec<String>,
    next_id: u64,
}

impl State {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn enter(&mut self, operation: &str) -> Result<()> {
        self.calls.push(operation.to_string());
        if self.failing.contains(operation) {
            bail!("injected failure in {}", operation);
        }
        Ok(())
    }

    fn document(&mut self, id: &str) -> Result<&mut StoredDocument> {
        self.documents
            .get_mut(id)
            .ok_or_else(|| anyhow!("document {} not found", id))
    }
}

/// Process-local remote used by tests and embedders.
pub struct InMemoryRemote {
    state: Mutex<State>,
    author: String,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        InMemoryRemote {
            state: Mutex::new(State::default()),
            author: "orgsync".to_string(),
        }
    }

    /// Author recorded on comments and replies created through the transport.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a document whose body reads as `blocks`.
    pub fn seed_document(&self, title: &str, blocks: Vec<RemoteBlock>) -> String {
        let mut state = self.state();
        let id = state.next("doc");
        state.documents.insert(
            id.clone(),
            StoredDocument {
                title: title.to_string(),
                edited: Some(blocks),
                revision: 1,
                ..StoredDocument::default()
            },
        );
        id
    }

    /// Replace what readers see, as a reviewer editing the document would.
    /// Bumps the revision.
    pub fn set_blocks(&self, doc_id: &str, blocks: Vec<RemoteBlock>) -> Result<()> {
        let mut state = self.state();
        let doc = state.document(doc_id)?;
        doc.edited = Some(blocks);
        doc.revision += 1;
        Ok(())
    }

    pub fn add_comment(&self, doc_id: &str, comment: RemoteComment) -> Result<()> {
        let mut state = self.state();
        state.document(doc_id)?.comments.push(comment);
        Ok(())
    }

    /// Append a reviewer reply to an existing thread.
    pub fn add_reply(&self, doc_id: &str, comment_id: &str, reply: RemoteReply) -> Result<()> {
        let mut state = self.state();
        let doc = state.document(doc_id)?;
        let comment = doc
            .comments
            .iter_mut()
            .find(|c| c.id == comment_id)
            .ok_or_else(|| anyhow!("comment {} not found", comment_id))?;
        comment.replies.push(reply);
        Ok(())
    }

    pub fn comments(&self, doc_id: &str) -> Vec<RemoteComment> {
        self.state()
            .documents
            .get(doc_id)
            .map(|d| d.comments.clone())
            .unwrap_or_default()
    }

    pub fn document_title(&self, doc_id: &str) -> Option<String> {
        self.state().documents.get(doc_id).map(|d| d.title.clone())
    }

    /// Body text written by mutations; images show as U+FFFC.
    pub fn body_text(&self, doc_id: &str) -> Option<String> {
        self.state().documents.get(doc_id).map(|d| d.body.text())
    }

    pub fn last_batch(&self, doc_id: &str) -> Vec<Mutation> {
        self.state()
            .documents
            .get(doc_id)
            .map(|d| d.last_batch.clone())
            .unwrap_or_default()
    }

    pub fn seed_image(&self, uri: &str, bytes: &[u8]) {
        self.state()
            .assets
            .insert(uri.to_string(), (None, bytes.to_vec()));
    }

    /// (folder, uri) of every stored asset, in upload order.
    pub fn uploads(&self) -> Vec<(Option<String>, String)> {
        self.state()
            .assets
            .iter()
            .map(|(uri, (folder, _))| (folder.clone(), uri.clone()))
            .collect()
    }

    /// Make every later call of `operation` fail.
    pub fn fail_on(&self, operation: &str) {
        self.state().failing.insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.state().failing.clear();
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }
}

fn apply(body: &mut Body, mutation: &Mutation, next_image: &mut impl FnMut() -> String) -> Result<()> {
    match mutation {
        Mutation::InsertText { index, text } => {
            body.check_index(*index)?;
            body.insert(*index, text.encode_utf16().map(Unit::Char).collect());
        }
        Mutation::InsertInlineImage { index, uri } => {
            body.check_index(*index)?;
            body.insert(
                *index,
                vec![Unit::Image {
                    object_id: next_image(),
                    uri: uri.clone(),
                }],
            );
        }
        Mutation::UpdateParagraphStyle { range, heading } => {
            body.check_range(range)?;
            if !(1..=6).contains(heading) {
                bail!("heading level {} out of range", heading);
            }
            body.set_heading(range, *heading);
        }
        Mutation::UpdateTextStyle { range, .. } | Mutation::CreateParagraphBullets { range, .. } => {
            body.check_range(range)?;
        }
    }
    Ok(())
}

/// Drop suggested insertions and forget suggested deletions.
fn without_suggestions(blocks: &[RemoteBlock]) -> Vec<RemoteBlock> {
    blocks
        .iter()
        .map(|block| match block {
            RemoteBlock::Paragraph { heading, elements } => RemoteBlock::Paragraph {
                heading: *heading,
                elements: elements
                    .iter()
                    .filter_map(|e| match e {
                        RemoteElement::Text {
                            suggested_insertions,
                            ..
                        } if !suggested_insertions.is_empty() => None,
                        RemoteElement::Text {
                            start,
                            end,
                            content,
                            ..
                        } => Some(RemoteElement::Text {
                            start: *start,
                            end: *end,
                            content: content.clone(),
                            suggested_insertions: Vec::new(),
                            suggested_deletions: Vec::new(),
                        }),
                        other => Some(other.clone()),
                    })
                    .collect(),
            },
            RemoteBlock::Table { rows } => RemoteBlock::Table {
                rows: rows
                    .iter()
                    .map(|row| row.iter().map(|cell| without_suggestions(cell)).collect())
                    .collect(),
            },
        })
        .collect()
}

impl Transport for InMemoryRemote {
    fn create_document(&self, title: &str) -> Result<String> {
        let mut state = self.state();
        state.enter("create_document")?;
        let id = state.next("doc");
        state.documents.insert(
            id.clone(),
            StoredDocument {
                title: title.to_string(),
                revision: 1,
                ..StoredDocument::default()
            },
        );
        Ok(id)
    }

    fn get_document(&self, doc_id: &str, include_suggestions: bool) -> Result<RemoteDocument> {
        let mut state = self.state();
        state.enter("get_document")?;
        let doc = state.document(doc_id)?;
        let blocks = match &doc.edited {
            Some(blocks) if include_suggestions => blocks.clone(),
            Some(blocks) => without_suggestions(blocks),
            None => doc.body.blocks(),
        };
        Ok(RemoteDocument {
            id: doc_id.to_string(),
            title: doc.title.clone(),
            revision: Some(doc.revision.to_string()),
            blocks,
        })
    }

    fn clear_content(&self, doc_id: &str) -> Result<()> {
        let mut state = self.state();
        state.enter("clear_content")?;
        let doc = state.document(doc_id)?;
        doc.body = Body::default();
        doc.edited = None;
        doc.revision += 1;
        Ok(())
    }

    fn apply_mutations(&self, doc_id: &str, mutations: &[Mutation]) -> Result<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.enter("apply_mutations")?;
        let mut next_id = state.next_id;
        let doc = state
            .documents
            .get_mut(doc_id)
            .ok_or_else(|| anyhow!("document {} not found", doc_id))?;

        let mut body = doc.body.clone();
        let mut next_image = || {
            next_id += 1;
            format!("kix.img{}", next_id)
        };
        for (n, mutation) in mutations.iter().enumerate() {
            apply(&mut body, mutation, &mut next_image)
                .with_context(|| format!("mutation {} rejected", n))?;
        }
        doc.body = body;
        doc.edited = None;
        doc.last_batch = mutations.to_vec();
        doc.revision += 1;
        state.next_id = next_id;
        Ok(())
    }

    fn list_comments(&self, doc_id: &str) -> Result<Vec<RemoteComment>> {
        let mut state = self.state();
        state.enter("list_comments")?;
        Ok(state.document(doc_id)?.comments.clone())
    }

    fn create_comment(&self, doc_id: &str, text: &str) -> Result<String> {
        let mut state = self.state();
        state.enter("create_comment")?;
        state.document(doc_id)?;
        let id = state.next("comment");
        let comment = RemoteComment {
            id: id.clone(),
            author: self.author.clone(),
            created: Some(Utc::now().trunc_subsecs(0)),
            body: text.to_string(),
            anchor: None,
            resolved: false,
            replies: Vec::new(),
        };
        state.document(doc_id)?.comments.push(comment);
        Ok(id)
    }

    fn create_reply(&self, doc_id: &str, comment_id: &str, text: &str) -> Result<String> {
        let mut state = self.state();
        state.enter("create_reply")?;
        let id = state.next("reply");
        let reply = RemoteReply {
            id: id.clone(),
            author: self.author.clone(),
            created: Some(Utc::now().trunc_subsecs(0)),
            body: text.to_string(),
        };
        let comment = state
            .document(doc_id)?
            .comments
            .iter_mut()
            .find(|c| c.id == comment_id)
            .ok_or_else(|| anyhow!("comment {} not found", comment_id))?;
        comment.replies.push(reply);
        Ok(id)
    }

    fn resolve_comment(&self, doc_id: &str, comment_id: &str) -> Result<()> {
        let mut state = self.state();
        state.enter("resolve_comment")?;
        let comment = state
            .document(doc_id)?
            .comments
            .iter_mut()
            .find(|c| c.id == comment_id)
            .ok_or_else(|| anyhow!("comment {} not found", comment_id))?;
        comment.resolved = true;
        Ok(())
    }

    fn latest_revision(&self, doc_id: &str) -> Result<Option<String>> {
        let mut state = self.state();
        state.enter("latest_revision")?;
        Ok(Some(state.document(doc_id)?.revision.to_string()))
    }
}

impl AssetStore for InMemoryRemote {
    fn ensure_folder(&self, name: &str, parent: Option<&str>) -> Result<String> {
        let mut state = self.state();
        state.enter("ensure_folder")?;
        let key = (name.to_string(), parent.map(str::to_string));
        if let Some(id) = state.folders.get(&key) {
            return Ok(id.clone());
        }
        let id = state.next("folder");
        state.folders.insert(key, id.clone());
        Ok(id)
    }

    fn upload_image(&self, local: &Path, folder: &str) -> Result<String> {
        let mut state = self.state();
        state.enter("upload_image")?;
        let bytes = std::fs::read(local)
            .with_context(|| format!("failed to read {}", local.display()))?;
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let n = state.next("asset");
        let uri = format!("https://assets.invalid/{}/{}", n, name);
        state
            .assets
            .insert(uri.clone(), (Some(folder.to_string()), bytes));
        Ok(uri)
    }

    fn download_image(&self, uri: &str, dest: &Path) -> Result<()> {
        let mut state = self.state();
        state.enter("download_image")?;
        let (_, bytes) = state
            .assets
            .get(uri)
            .ok_or_else(|| anyhow!("no asset at {}", uri))?;
        std::fs::write(dest, bytes).with_context(|| format!("failed to write {}", dest.display()))
    }
}
