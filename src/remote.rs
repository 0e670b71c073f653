//! Remote-side vocabulary: mutation commands sent to the hosted document
//! and the snapshot shapes read back from it.
//!
//! Indices are in the remote coordinate space, which counts UTF-16 code
//! units and starts at 1 (index 0 is the body's own start marker).
//! Ranges are half-open `[start, end)`.

use serde::{Deserialize, Serialize};

use crate::models::SuggestionKind;

/// First writable index of an empty remote document body.
pub const FIRST_INDEX: usize = 1;

/// Length of `text` in remote-addressable units.
pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn new(start: usize, end: usize) -> Self {
        TextRange { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, other: &TextRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TextStyle {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    /// Inline code and verbatim: monospace font.
    Monospace,
    /// Code blocks and tables: monospace font at a smaller size.
    Code,
    Link(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BulletPreset {
    Disc,
    Numbered,
}

/// One remote edit. Text inserts always precede styles that address them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Mutation {
    InsertText { index: usize, text: String },
    UpdateParagraphStyle { range: TextRange, heading: u8 },
    UpdateTextStyle { range: TextRange, style: TextStyle },
    CreateParagraphBullets { range: TextRange, preset: BulletPreset },
    InsertInlineImage { index: usize, uri: String },
}

/// Snapshot of the remote document body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteDocument {
    pub id: String,
    pub title: String,
    pub revision: Option<String>,
    pub blocks: Vec<RemoteBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteBlock {
    Paragraph {
        /// 1..=6 for headings, `None` for body text.
        heading: Option<u8>,
        elements: Vec<RemoteElement>,
    },
    Table {
        rows: Vec<Vec<Vec<RemoteBlock>>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteElement {
    Text {
        start: usize,
        end: usize,
        content: String,
        /// Ids of reviewer suggestions that insert this run.
        suggested_insertions: Vec<String>,
        /// Ids of reviewer suggestions that delete this run.
        suggested_deletions: Vec<String>,
    },
    InlineImage {
        start: usize,
        object_id: String,
        uri: String,
    },
}

impl RemoteElement {
    pub fn text(start: usize, content: &str) -> Self {
        RemoteElement::Text {
            start,
            end: start + utf16_len(content),
            content: content.to_string(),
            suggested_insertions: Vec::new(),
            suggested_deletions: Vec::new(),
        }
    }
}

impl RemoteBlock {
    /// Concatenated text of a paragraph, without the trailing newline.
    pub fn plain_text(&self) -> String {
        match self {
            RemoteBlock::Paragraph { elements, .. } => elements
                .iter()
                .filter_map(|e| match e {
                    RemoteElement::Text { content, .. } => Some(content.as_str()),
                    _ => None,
                })
                .collect::<String>()
                .trim_end_matches('\n')
                .to_string(),
            RemoteBlock::Table { .. } => String::new(),
        }
    }

    /// Remote index range covered by a paragraph.
    pub fn range(&self) -> Option<TextRange> {
        let RemoteBlock::Paragraph { elements, .. } = self else {
            return None;
        };
        let start = elements.iter().map(|e| match e {
            RemoteElement::Text { start, .. } | RemoteElement::InlineImage { start, .. } => *start,
        });
        let end = elements.iter().map(|e| match e {
            RemoteElement::Text { end, .. } => *end,
            RemoteElement::InlineImage { start, .. } => start + 1,
        });
        Some(TextRange::new(start.min()?, end.max()?))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RemoteReply {
    pub id: String,
    pub author: String,
    pub created: Option<chrono::DateTime<chrono::Utc>>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RemoteComment {
    pub id: String,
    pub author: String,
    pub created: Option<chrono::DateTime<chrono::Utc>>,
    pub body: String,
    /// Quoted text the comment is anchored to.
    pub anchor: Option<String>,
    pub resolved: bool,
    pub replies: Vec<RemoteReply>,
}

/// A reviewer suggestion reassembled from the suggested runs sharing its id.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSuggestion {
    pub id: String,
    pub kind: SuggestionKind,
    pub content: String,
    pub author: Option<String>,
    pub start: usize,
    pub end: usize,
    /// Text of the closest heading above the suggestion.
    pub location: Option<String>,
}
