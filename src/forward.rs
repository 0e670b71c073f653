//! Document → remote mutation commands.
//!
//! [`convert`] walks the outline depth-first with a single cursor that
//! starts at [`FIRST_INDEX`] and advances by the UTF-16 length of every
//! insert. Each node inserts its text first and then styles the range it
//! just inserted, so a style command never addresses text that does not
//! exist yet.
//!
//! Reserved sections never reach the remote document: a pre-pass drops any
//! subtree whose title is reserved, and annotations live outside the
//! content tree anyway.
//!
//! The output depends only on the document, so converting an unchanged
//! document twice yields the same commands.

use crate::models::{
    is_reserved_title, Annotation, Document, InlineStyle, List, Node, Table, TextRun,
};
use crate::remote::{utf16_len, BulletPreset, Mutation, TextRange, TextStyle, FIRST_INDEX};

/// Remote actions derived from annotations, run after the body is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideAction {
    PostComment { text: String },
    SendReply { comment_id: String, text: String },
    ResolveComment { comment_id: String },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Conversion {
    pub mutations: Vec<Mutation>,
    pub actions: Vec<SideAction>,
}

pub fn convert(doc: &Document) -> Conversion {
    let content = strip_reserved(&doc.content);
    let mut emitter = Emitter::default();
    for node in &content {
        emitter.node(node);
    }
    Conversion {
        mutations: emitter.mutations,
        actions: side_actions(doc),
    }
}

/// Copy of `nodes` without any section titled with a reserved name.
pub fn strip_reserved(nodes: &[Node]) -> Vec<Node> {
    nodes
        .iter()
        .filter_map(|node| match node {
            Node::Section(section) if is_reserved_title(&section.title) => None,
            Node::Section(section) => {
                let mut section = section.clone();
                section.children = strip_reserved(&section.children);
                Some(Node::Section(section))
            }
            other => Some(other.clone()),
        })
        .collect()
}

/// Comment directives first, then per comment its drafts and its resolve.
pub fn side_actions(doc: &Document) -> Vec<SideAction> {
    fn directives(nodes: &[Node], out: &mut Vec<SideAction>) {
        for node in nodes {
            match node {
                Node::CommentDirective(text) if !text.trim().is_empty() => {
                    out.push(SideAction::PostComment {
                        text: text.trim().to_string(),
                    })
                }
                Node::Section(section) if !is_reserved_title(&section.title) => {
                    directives(&section.children, out)
                }
                _ => {}
            }
        }
    }

    let mut actions = Vec::new();
    directives(&doc.content, &mut actions);
    for annotation in doc.active_annotations() {
        let Annotation::Comment(comment) = annotation else {
            continue;
        };
        for draft in comment.drafts() {
            actions.push(SideAction::SendReply {
                comment_id: comment.id.clone(),
                text: draft.body.clone(),
            });
        }
        if comment.resolved {
            actions.push(SideAction::ResolveComment {
                comment_id: comment.id.clone(),
            });
        }
    }
    actions
}

struct Emitter {
    cursor: usize,
    mutations: Vec<Mutation>,
}

impl Default for Emitter {
    fn default() -> Self {
        Emitter {
            cursor: FIRST_INDEX,
            mutations: Vec::new(),
        }
    }
}

impl Emitter {
    fn insert(&mut self, text: &str) -> TextRange {
        let start = self.cursor;
        self.mutations.push(Mutation::InsertText {
            index: start,
            text: text.to_string(),
        });
        self.cursor += utf16_len(text);
        TextRange::new(start, self.cursor)
    }

    fn style(&mut self, range: TextRange, style: TextStyle) {
        if !range.is_empty() {
            self.mutations.push(Mutation::UpdateTextStyle { range, style });
        }
    }

    fn image(&mut self, uri: &str) {
        self.mutations.push(Mutation::InsertInlineImage {
            index: self.cursor,
            uri: uri.to_string(),
        });
        self.cursor += 1;
        self.insert("\n");
    }

    fn node(&mut self, node: &Node) {
        match node {
            Node::Section(section) => {
                let range = self.insert(&format!("{}\n", section.display_heading()));
                self.mutations.push(Mutation::UpdateParagraphStyle {
                    range,
                    heading: section.level.clamp(1, 6) as u8,
                });
                for child in &section.children {
                    self.node(child);
                }
            }
            Node::Text(run) => {
                let range = self.insert(&format!("{}\n", run.text));
                self.spans(range.start, run);
            }
            Node::Link(link) => {
                let range = self.insert(&format!("{}\n", link.display()));
                self.style(
                    TextRange::new(range.start, range.end - 1),
                    TextStyle::Link(link.target.clone()),
                );
            }
            Node::List(list) => self.list(list),
            Node::Table(table) => self.table(table),
            Node::Code(block) => {
                let mut text = String::new();
                if let Some(lang) = &block.language {
                    text.push_str(&format!("# Language: {}\n", lang));
                }
                text.push_str(&block.body);
                text.push_str("\n\n");
                let range = self.insert(&text);
                self.style(TextRange::new(range.start, range.end - 1), TextStyle::Code);
            }
            Node::Figure(figure) => match &figure.remote_uri {
                Some(uri) => self.image(uri),
                None => tracing::warn!(
                    path = %figure.local_path.display(),
                    "figure was never uploaded; skipping"
                ),
            },
            Node::Image(image) if image.is_remote() => self.image(&image.target),
            Node::Image(image) => {
                tracing::warn!(image = %image.target, "local image was never uploaded; skipping")
            }
            Node::CommentDirective(_) => {}
        }
    }

    /// Style commands for a run inserted at `base`.
    fn spans(&mut self, base: usize, run: &TextRun) {
        for span in &run.spans {
            let (Some(before), Some(inner)) =
                (run.text.get(..span.start), run.text.get(span.start..span.end))
            else {
                continue;
            };
            let start = base + utf16_len(before);
            let range = TextRange::new(start, start + utf16_len(inner));
            for style in text_styles(&span.style) {
                self.style(range, style);
            }
        }
    }

    fn list(&mut self, list: &List) {
        if list.items.is_empty() {
            return;
        }
        let first = self.cursor;
        for item in &list.items {
            let prefix = item
                .checkbox
                .map(|mark| format!("[{}] ", mark))
                .unwrap_or_default();
            let range = self.insert(&format!("{}{}\n", prefix, item.text.text));
            self.spans(range.start + utf16_len(&prefix), &item.text);
        }
        self.mutations.push(Mutation::CreateParagraphBullets {
            range: TextRange::new(first, self.cursor),
            preset: if list.ordered {
                BulletPreset::Numbered
            } else {
                BulletPreset::Disc
            },
        });
        self.insert("\n");
    }

    fn table(&mut self, table: &Table) {
        if table.rows.is_empty() {
            return;
        }
        let lines = table.render_lines();
        let range = self.insert(&format!("{}\n\n", lines.join("\n")));
        self.style(TextRange::new(range.start, range.end - 1), TextStyle::Code);
        if table.header_rows > 0 {
            let header: usize = lines
                .iter()
                .take(table.header_rows.min(table.rows.len()))
                .map(|l| utf16_len(l) + 1)
                .sum();
            self.style(
                TextRange::new(range.start, range.start + header - 1),
                TextStyle::Bold,
            );
        }
    }
}

fn text_styles(style: &InlineStyle) -> Vec<TextStyle> {
    let mut out = Vec::new();
    if style.strong {
        out.push(TextStyle::Bold);
    }
    if style.emphasis {
        out.push(TextStyle::Italic);
    }
    if style.underline {
        out.push(TextStyle::Underline);
    }
    if style.strike {
        out.push(TextStyle::Strikethrough);
    }
    if style.monospace || style.verbatim {
        out.push(TextStyle::Monospace);
    }
    if let Some(target) = &style.link {
        out.push(TextStyle::Link(target.clone()));
    }
    out
}

/// Ranges addressed by every non-insert command must lie inside text
/// already inserted. Returns the first violation.
pub fn check_ordering(mutations: &[Mutation]) -> Result<(), String> {
    let mut inserted: Vec<TextRange> = Vec::new();
    let covered = |inserted: &[TextRange], range: &TextRange| {
        let lo = inserted.iter().map(|r| r.start).min().unwrap_or(usize::MAX);
        let hi = inserted.iter().map(|r| r.end).max().unwrap_or(0);
        lo <= range.start && range.end <= hi
    };
    for (i, m) in mutations.iter().enumerate() {
        match m {
            Mutation::InsertText { index, text } => {
                inserted.push(TextRange::new(*index, index + utf16_len(text)))
            }
            Mutation::InsertInlineImage { index, .. } => {
                inserted.push(TextRange::new(*index, index + 1))
            }
            Mutation::UpdateParagraphStyle { range, .. }
            | Mutation::UpdateTextStyle { range, .. }
            | Mutation::CreateParagraphBullets { range, .. } => {
                if !covered(&inserted, range) {
                    return Err(format!("command {} addresses {:?} before it exists", i, range));
                }
            }
        }
    }
    Ok(())
}
