//! Core data models used throughout orgsync.
//!
//! A [`Document`] is the in-memory form of one synchronized org file: ordered
//! metadata, a tree of [`Node`]s, the reviewer [`Annotation`]s attached to
//! sections, and the archive of annotations whose disposition has been
//! confirmed by a push.
//!
//! # Tree shape
//!
//! Only [`Section`] carries children. Every other variant is a leaf. Nodes
//! are addressed structurally with a [`NodePath`] (child indices from the
//! document root), which is how the push working copy swaps code blocks for
//! their rendered figures and how pull places new annotations.
//!
//! # Annotation placement
//!
//! Each annotation lives in exactly one of: a section's `annotations`,
//! the document-level `annotations` list (used only when the document has
//! no sections), or `archive`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::Serialize;

/// Remote document identity.
pub const GDOC_ID: &str = "GDOC_ID";
/// Revision observed right after the last successful push.
pub const LAST_PUSH_REV: &str = "LAST_PUSH_REV";
/// Revision observed during the last successful pull.
pub const LAST_PULL_REV: &str = "LAST_PULL_REV";
/// Timestamp of the last successful push or pull.
pub const LAST_SYNC: &str = "LAST_SYNC";

/// Title of the section holding active annotations.
pub const ANNOTATIONS_TITLE: &str = "GDOCS_ANNOTATIONS";
/// Title of the document-level archive section.
pub const ARCHIVE_TITLE: &str = "GDOCS_ARCHIVE";

/// Sync bookkeeping sections. Compared case-sensitively; shared by the
/// parser and the forward converter.
pub fn is_reserved_title(title: &str) -> bool {
    title == ANNOTATIONS_TITLE || title == ARCHIVE_TITLE
}

/// Task-state keywords recognized at the start of a heading.
pub const TODO_KEYWORDS: &[&str] = &["TODO", "DONE", "WAITING", "CANCELLED"];

/// Parse a timestamp as written in metadata or property drawers.
///
/// Accepts RFC 3339, org inactive timestamps (`[2024-01-15 Mon 10:30]`) and
/// naive ISO-8601 values, which are interpreted in local time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw
        .trim()
        .trim_start_matches(['[', '<'])
        .trim_end_matches([']', '>']);
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %a %H:%M",
        "%Y-%m-%d %H:%M",
    ];
    NAIVE_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(s, fmt)
            .ok()
            .and_then(|naive| naive.and_local_timezone(Local).single())
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Canonical persisted form of a timestamp.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Body text as it survives a write and re-parse: unix line endings,
/// no leading or trailing blank lines.
pub fn normalize_body(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let first = lines
        .iter()
        .position(|l| !l.trim().is_empty())
        .unwrap_or(lines.len());
    let last = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(first);
    lines[first..last.max(first)].join("\n")
}

/// One synchronized outline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub metadata: IndexMap<String, String>,
    pub content: Vec<Node>,
    /// Active annotations not attached to any section.
    pub annotations: Vec<Annotation>,
    pub archive: Vec<ArchivedAnnotation>,
    pub path: Option<PathBuf>,
}

impl Document {
    pub fn gdoc_id(&self) -> Option<&str> {
        self.metadata
            .get(GDOC_ID)
            .map(String::as_str)
            .filter(|id| !id.trim().is_empty())
    }

    pub fn set_gdoc_id(&mut self, id: &str) {
        self.metadata.insert(GDOC_ID.to_string(), id.to_string());
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.meta(LAST_SYNC).and_then(parse_timestamp)
    }

    pub fn set_last_sync(&mut self, ts: DateTime<Utc>) {
        self.set_meta(LAST_SYNC, format_timestamp(&ts));
    }

    /// Title used for the remote document and its asset folder: `TITLE`
    /// metadata, else the file stem, else `Untitled`.
    pub fn title(&self) -> String {
        if let Some(title) = self.meta("TITLE") {
            return title.to_string();
        }
        self.path
            .as_deref()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string())
    }

    pub fn node_at(&self, path: &NodePath) -> Option<&Node> {
        let (first, rest) = path.0.split_first()?;
        let mut node = self.content.get(*first)?;
        for idx in rest {
            match node {
                Node::Section(section) => node = section.children.get(*idx)?,
                _ => return None,
            }
        }
        Some(node)
    }

    pub fn node_at_mut(&mut self, path: &NodePath) -> Option<&mut Node> {
        let (first, rest) = path.0.split_first()?;
        let mut node = self.content.get_mut(*first)?;
        for idx in rest {
            match node {
                Node::Section(section) => node = section.children.get_mut(*idx)?,
                _ => return None,
            }
        }
        Some(node)
    }

    /// Swap the node at `path`, returning the previous one.
    pub fn replace_node(&mut self, path: &NodePath, replacement: Node) -> Option<Node> {
        let slot = self.node_at_mut(path)?;
        Some(std::mem::replace(slot, replacement))
    }

    /// Every section in document order, paired with its path.
    pub fn sections(&self) -> Vec<(NodePath, &Section)> {
        fn walk<'a>(nodes: &'a [Node], prefix: &NodePath, out: &mut Vec<(NodePath, &'a Section)>) {
            for (i, node) in nodes.iter().enumerate() {
                if let Node::Section(section) = node {
                    let path = prefix.child(i);
                    out.push((path.clone(), section));
                    walk(&section.children, &path, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.content, &NodePath::default(), &mut out);
        out
    }

    pub fn section_at_mut(&mut self, path: &NodePath) -> Option<&mut Section> {
        match self.node_at_mut(path)? {
            Node::Section(section) => Some(section),
            _ => None,
        }
    }

    /// All active annotation lists: every section's, then the document-level one.
    pub fn annotation_lists(&self) -> Vec<&Vec<Annotation>> {
        let mut lists: Vec<&Vec<Annotation>> = self
            .sections()
            .into_iter()
            .map(|(_, section)| &section.annotations)
            .collect();
        lists.push(&self.annotations);
        lists
    }

    pub fn annotation_lists_mut(&mut self) -> Vec<&mut Vec<Annotation>> {
        fn walk<'a>(nodes: &'a mut [Node], out: &mut Vec<&'a mut Vec<Annotation>>) {
            for node in nodes {
                if let Node::Section(section) = node {
                    out.push(&mut section.annotations);
                    walk(&mut section.children, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&mut self.content, &mut out);
        out.push(&mut self.annotations);
        out
    }

    pub fn active_annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.annotation_lists().into_iter().flatten()
    }

    /// Ids of every annotation, active or archived.
    pub fn all_ids(&self) -> Vec<&str> {
        self.active_annotations()
            .map(Annotation::id)
            .chain(self.archive.iter().map(|a| a.annotation.id()))
            .collect()
    }

    pub fn has_sections(&self) -> bool {
        self.content.iter().any(|n| matches!(n, Node::Section(_)))
    }
}

/// Child-index path from the document root. `[2, 0]` is the first child of
/// the third top-level node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodePath(pub Vec<usize>);

impl NodePath {
    pub fn child(&self, index: usize) -> NodePath {
        let mut indices = self.0.clone();
        indices.push(index);
        NodePath(indices)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Section(Section),
    Text(TextRun),
    Link(Link),
    List(List),
    Table(Table),
    Code(CodeBlock),
    /// Only ever present in the push working copy.
    Figure(RenderedFigure),
    Image(Image),
    /// `#+GDOCS_COMMENT:` line, a comment to post on the next push.
    CommentDirective(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Section {
    pub level: usize,
    pub title: String,
    pub todo: Option<String>,
    pub priority: Option<char>,
    pub tags: Vec<String>,
    pub properties: IndexMap<String, String>,
    pub children: Vec<Node>,
    pub annotations: Vec<Annotation>,
}

impl Section {
    pub fn new(level: usize, title: impl Into<String>) -> Self {
        Section {
            level,
            title: title.into(),
            ..Default::default()
        }
    }

    /// Heading as shown remotely: task state prefix, title, tags.
    pub fn display_heading(&self) -> String {
        let mut out = String::new();
        if let Some(todo) = &self.todo {
            out.push_str(todo);
            out.push(' ');
        }
        out.push_str(&self.title);
        if !self.tags.is_empty() {
            out.push_str(" :");
            out.push_str(&self.tags.join(":"));
            out.push(':');
        }
        out
    }
}

/// Emphasis flags for one span of a [`TextRun`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InlineStyle {
    pub emphasis: bool,
    pub strong: bool,
    /// `~code~`.
    pub monospace: bool,
    /// `=verbatim=`. Rendered remotely the same as code.
    pub verbatim: bool,
    pub underline: bool,
    pub strike: bool,
    pub link: Option<String>,
}

/// Byte range `[start, end)` of a run's text carrying a style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSpan {
    pub start: usize,
    pub end: usize,
    pub style: InlineStyle,
}

/// Paragraph text with org markers stripped; styles are kept as spans.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextRun {
    pub text: String,
    pub spans: Vec<StyleSpan>,
}

impl TextRun {
    pub fn plain(text: impl Into<String>) -> Self {
        TextRun {
            text: text.into(),
            spans: Vec::new(),
        }
    }

    /// Style covering the byte at `offset`, if any.
    pub fn style_at(&self, offset: usize) -> Option<&InlineStyle> {
        self.spans
            .iter()
            .find(|s| s.start <= offset && offset < s.end)
            .map(|s| &s.style)
    }
}

/// A paragraph consisting of a single link.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub target: String,
    pub description: Option<String>,
}

impl Link {
    pub fn display(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.target)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    /// Link target as written: `file:x.png`, `./x.png` or an URL.
    pub target: String,
}

impl Image {
    pub fn is_remote(&self) -> bool {
        self.target.starts_with("http://") || self.target.starts_with("https://")
    }

    pub fn local_path(&self) -> Option<&str> {
        if self.is_remote() {
            None
        } else {
            Some(self.target.strip_prefix("file:").unwrap_or(&self.target))
        }
    }
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp"];

/// Whether a link target points at an image file.
pub fn is_image_target(target: &str) -> bool {
    let path = target.split(['?', '#']).next().unwrap_or(target);
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq)]
pub struct List {
    pub ordered: bool,
    pub items: Vec<ListItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    /// Leading spaces before the bullet.
    pub indent: usize,
    /// `-`, `+`, `*`, `1.` or `1)`.
    pub bullet: String,
    /// `' '`, `'X'` or `'-'` when the item carries a checkbox.
    pub checkbox: Option<char>,
    pub text: TextRun,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
    pub header_rows: usize,
}

impl Table {
    /// Column-aligned `| a | b |` lines with a `|---+---|` separator after
    /// the header rows. Shared by the serializer and the forward converter.
    pub fn render_lines(&self) -> Vec<String> {
        let columns = self.rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut widths = vec![1usize; columns];
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
        let separator = format!(
            "|{}|",
            widths
                .iter()
                .map(|w| "-".repeat(w + 2))
                .collect::<Vec<_>>()
                .join("+")
        );
        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        for (r, row) in self.rows.iter().enumerate() {
            // Short rows stay short so a re-parse sees the same cells.
            let cells: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(cell, w)| {
                    let pad = w - cell.chars().count();
                    format!(" {}{} ", cell, " ".repeat(pad))
                })
                .collect();
            lines.push(format!("|{}|", cells.join("|")));
            if self.header_rows > 0 && r + 1 == self.header_rows {
                lines.push(separator.clone());
            }
        }
        lines
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlock {
    pub language: Option<String>,
    /// Raw header arguments after the language, e.g. `:file out.svg :exports results`.
    pub header_args: Option<String>,
    pub body: String,
}

/// Output of a code block rendered to a file.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFigure {
    pub language: Option<String>,
    pub local_path: PathBuf,
    /// Set once the asset store accepted the upload.
    pub remote_uri: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Insertion,
    Deletion,
}

impl SuggestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionKind::Insertion => "insertion",
            SuggestionKind::Deletion => "deletion",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "insertion" => Some(SuggestionKind::Insertion),
            "deletion" => Some(SuggestionKind::Deletion),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionStatus {
    Pending,
    Integrated,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionStatus::Pending => "pending",
            SuggestionStatus::Integrated => "integrated",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// `None` marks a draft written locally and not yet sent.
    pub id: Option<String>,
    pub author: String,
    pub created: Option<DateTime<Utc>>,
    pub body: String,
}

impl Reply {
    pub fn is_draft(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub created: Option<DateTime<Utc>>,
    pub body: String,
    /// Quoted text the reviewer anchored the comment to.
    pub anchor: Option<String>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub replies: Vec<Reply>,
}

impl Comment {
    pub fn drafts(&self) -> impl Iterator<Item = &Reply> {
        self.replies.iter().filter(|r| r.is_draft())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub id: String,
    pub kind: SuggestionKind,
    pub author: String,
    pub created: Option<DateTime<Utc>>,
    pub content: String,
    /// Remote heading the suggestion was found under.
    pub location: Option<String>,
    pub status: SuggestionStatus,
    pub integrated_at: Option<DateTime<Utc>>,
}

/// One piece of reviewer feedback.
#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    Comment(Comment),
    Suggestion(Suggestion),
}

impl Annotation {
    pub fn id(&self) -> &str {
        match self {
            Annotation::Comment(c) => &c.id,
            Annotation::Suggestion(s) => &s.id,
        }
    }

    pub fn author(&self) -> &str {
        match self {
            Annotation::Comment(c) => &c.author,
            Annotation::Suggestion(s) => &s.author,
        }
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        match self {
            Annotation::Comment(c) => c.created,
            Annotation::Suggestion(s) => s.created,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Annotation::Comment(_) => "comment",
            Annotation::Suggestion(_) => "suggestion",
        }
    }

    /// Date of the local disposition (resolve or integrate), if any.
    pub fn disposed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Annotation::Comment(c) if c.resolved => c.resolved_at,
            Annotation::Suggestion(s) if s.status == SuggestionStatus::Integrated => {
                s.integrated_at
            }
            _ => None,
        }
    }
}

/// An annotation whose disposition was confirmed remotely.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedAnnotation {
    pub annotation: Annotation,
    pub archived_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Document {
        let mut intro = Section::new(1, "Intro");
        intro.children.push(Node::Text(TextRun::plain("hello")));
        let mut details = Section::new(2, "Details");
        details.children.push(Node::Text(TextRun::plain("deep")));
        intro.children.push(Node::Section(details));
        Document {
            content: vec![Node::Section(intro), Node::Section(Section::new(1, "Outro"))],
            ..Default::default()
        }
    }

    #[test]
    fn reserved_titles_are_case_sensitive() {
        assert!(is_reserved_title("GDOCS_ANNOTATIONS"));
        assert!(is_reserved_title("GDOCS_ARCHIVE"));
        assert!(!is_reserved_title("gdocs_annotations"));
        assert!(!is_reserved_title("Annotations"));
    }

    #[test]
    fn node_path_addresses_nested_children() {
        let doc = sample();
        match doc.node_at(&NodePath(vec![0, 1, 0])) {
            Some(Node::Text(run)) => assert_eq!(run.text, "deep"),
            other => panic!("unexpected node: {:?}", other),
        }
        assert!(doc.node_at(&NodePath(vec![0, 0, 0])).is_none());
        assert!(doc.node_at(&NodePath(vec![])).is_none());
    }

    #[test]
    fn replace_node_swaps_in_place() {
        let mut doc = sample();
        let old = doc.replace_node(
            &NodePath(vec![0, 0]),
            Node::Text(TextRun::plain("replaced")),
        );
        assert_eq!(old, Some(Node::Text(TextRun::plain("hello"))));
        assert_eq!(
            doc.node_at(&NodePath(vec![0, 0])),
            Some(&Node::Text(TextRun::plain("replaced")))
        );
    }

    #[test]
    fn sections_are_listed_in_document_order() {
        let doc = sample();
        let titles: Vec<_> = doc.sections().iter().map(|(_, s)| s.title.clone()).collect();
        assert_eq!(titles, vec!["Intro", "Details", "Outro"]);
        assert_eq!(doc.sections()[1].0, NodePath(vec![0, 1]));
    }

    #[test]
    fn timestamps_accept_rfc3339_and_org_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-15T10:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T11:30:00+01:00"), Some(expected));
        assert!(parse_timestamp("[2024-01-15 Mon 10:30]").is_some());
        assert!(parse_timestamp("2024-01-15T10:30:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
        assert_eq!(format_timestamp(&expected), "2024-01-15T10:30:00Z");
    }

    #[test]
    fn display_heading_prefixes_task_state() {
        let mut section = Section::new(1, "Ship it");
        section.todo = Some("TODO".into());
        section.tags = vec!["work".into(), "urgent".into()];
        assert_eq!(section.display_heading(), "TODO Ship it :work:urgent:");
    }

    #[test]
    fn table_lines_are_aligned() {
        let table = Table {
            rows: vec![
                vec!["Name".into(), "Qty".into()],
                vec!["apple".into(), "3".into()],
            ],
            header_rows: 1,
        };
        assert_eq!(
            table.render_lines(),
            vec![
                "| Name  | Qty |".to_string(),
                "|-------+-----|".to_string(),
                "| apple | 3   |".to_string(),
            ]
        );
    }

    #[test]
    fn image_targets() {
        assert!(is_image_target("file:figs/a.PNG"));
        assert!(is_image_target("https://example.com/x.svg?raw=1"));
        assert!(!is_image_target("https://example.com"));
        let img = Image {
            target: "file:out.png".into(),
        };
        assert_eq!(img.local_path(), Some("out.png"));
    }
}
