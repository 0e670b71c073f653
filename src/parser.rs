//! Org text → [`Document`].
//!
//! The parser is line-oriented. At each line it tries, in order: metadata
//! (only before the first structural line), headings, property drawers
//! directly under a heading, `#+BEGIN_SRC` blocks, `#+GDOCS_COMMENT:`
//! directives, tables, list items and finally paragraphs.
//!
//! Headings titled [`ANNOTATIONS_TITLE`] or
//! [`ARCHIVE_TITLE`](crate::models::ARCHIVE_TITLE) are not content, even
//! with a TODO keyword or tags. Their sub-headings are annotation entries:
//!
//! ```org
//! ** GDOCS_ANNOTATIONS
//! *** Comment from Alice [2024-01-15 Mon 10:30]
//! :PROPERTIES:
//! :COMMENT_ID: AAAA
//! :AUTHOR: Alice
//! :ANCHOR: "quoted text"
//! :RESOLVED: nil
//! :END:
//! Comment body.
//! **** Reply from me
//! :PROPERTIES:
//! :AUTHOR: me
//! :END:
//! A draft reply (no REPLY_ID yet).
//! ```
//!
//! Nothing is evaluated; malformed input fails with
//! [`SyncError::MalformedStructure`] naming the 1-based line.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;

use crate::error::{SyncError, SyncResult};
use crate::inline::parse_inline;
use crate::models::{
    is_image_target, is_reserved_title, normalize_body, parse_timestamp, Annotation,
    ArchivedAnnotation, CodeBlock, Comment, Document, Image, Link, List, ListItem, Node, Reply,
    Section, Suggestion, SuggestionKind, SuggestionStatus, Table, ANNOTATIONS_TITLE,
};

struct Patterns {
    heading: Regex,
    metadata: Regex,
    src_begin: Regex,
    src_end: Regex,
    directive: Regex,
    list_item: Regex,
    drawer_start: Regex,
    drawer_end: Regex,
    property: Regex,
    whole_link: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        heading: Regex::new(
            r"^(\*+)\s+(?:(TODO|DONE|WAITING|CANCELLED)\s+)?(?:\[#([A-Z])\]\s+)?(.*?)(?:\s+:((?:[\w@#%]+:)+))?\s*$",
        )
        .expect("heading pattern"),
        metadata: Regex::new(r"^#\+(\w+):\s*(.*)$").expect("metadata pattern"),
        src_begin: Regex::new(r"(?i)^\s*#\+begin_src(?:\s+(.*))?$").expect("src begin pattern"),
        src_end: Regex::new(r"(?i)^\s*#\+end_src\s*$").expect("src end pattern"),
        directive: Regex::new(r"^#\+GDOCS_COMMENT:\s*(.*)$").expect("directive pattern"),
        list_item: Regex::new(r"^(\s*)([-+*]|\d+[.)])\s+(?:\[([ X-])\]\s+)?(.*)$")
            .expect("list item pattern"),
        drawer_start: Regex::new(r"^\s*:PROPERTIES:\s*$").expect("drawer start pattern"),
        drawer_end: Regex::new(r"^\s*:END:\s*$").expect("drawer end pattern"),
        property: Regex::new(r"^\s*:([\w-]+):\s*(.*)$").expect("property pattern"),
        whole_link: Regex::new(r"^\[\[([^\]\[]+)\](?:\[([^\]\[]+)\])?\]$")
            .expect("link pattern"),
    })
}

/// Keywords that look like metadata but are content directives.
const NON_METADATA_KEYS: &[&str] = &["GDOCS_COMMENT", "BEGIN_SRC", "END_SRC"];

/// Parse org text into a [`Document`] with no owning path.
pub fn parse(text: &str) -> SyncResult<Document> {
    Parser::new(text).run()
}

/// Read and parse a file, recording its path on the document.
pub fn parse_file(path: &Path) -> SyncResult<Document> {
    let text = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
    let mut doc = parse(&text)?;
    doc.path = Some(path.to_path_buf());
    Ok(doc)
}

struct Heading {
    level: usize,
    todo: Option<String>,
    priority: Option<char>,
    title: String,
    tags: Vec<String>,
    /// Everything after the stars, trimmed. Entry headings read the author from it.
    raw: String,
}

struct Entry {
    annotation: Annotation,
    archived: Option<DateTime<Utc>>,
    line: usize,
}

struct Parser<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    seen_ids: HashMap<String, usize>,
    archive: Vec<ArchivedAnnotation>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Parser {
            lines: text.lines().collect(),
            pos: 0,
            seen_ids: HashMap::new(),
            archive: Vec::new(),
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    fn run(mut self) -> SyncResult<Document> {
        let metadata = self.metadata();
        let mut annotations = Vec::new();
        let content = self.block(0, &mut annotations)?;
        Ok(Document {
            metadata,
            content,
            annotations,
            archive: self.archive,
            path: None,
        })
    }

    fn metadata(&mut self) -> IndexMap<String, String> {
        let mut metadata = IndexMap::new();
        while let Some(line) = self.peek() {
            if line.trim().is_empty() {
                self.pos += 1;
                continue;
            }
            let Some(caps) = patterns().metadata.captures(line) else {
                break;
            };
            let key = &caps[1];
            if NON_METADATA_KEYS.contains(&key.to_ascii_uppercase().as_str()) {
                break;
            }
            metadata.insert(key.to_string(), caps[2].trim_end().to_string());
            self.pos += 1;
        }
        metadata
    }

    fn heading(&self, line: &str) -> Option<Heading> {
        let caps = patterns().heading.captures(line)?;
        let level = caps[1].len();
        let raw = line[level..].trim().to_string();
        Some(Heading {
            level,
            todo: caps.get(2).map(|m| m.as_str().to_string()),
            priority: caps.get(3).and_then(|m| m.as_str().chars().next()),
            title: caps.get(4).map(|m| m.as_str().to_string()).unwrap_or_default(),
            tags: caps
                .get(5)
                .map(|m| {
                    m.as_str()
                        .split(':')
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            raw,
        })
    }

    /// Content nodes until EOF or a heading at or above `parent_level`.
    /// Entries of a nested annotations section are appended to `found`.
    fn block(&mut self, parent_level: usize, found: &mut Vec<Annotation>) -> SyncResult<Vec<Node>> {
        let mut nodes = Vec::new();
        while let Some(line) = self.peek() {
            if line.trim().is_empty() {
                self.pos += 1;
                continue;
            }
            let Some(heading) = self.heading(line) else {
                nodes.push(self.leaf()?);
                continue;
            };
            if heading.level <= parent_level {
                break;
            }
            if is_reserved_title(&heading.title) {
                self.pos += 1;
                self.drawer()?;
                let entries = self.entries(heading.level)?;
                if heading.title == ANNOTATIONS_TITLE {
                    found.extend(entries.into_iter().map(|e| e.annotation));
                    continue;
                }
                for entry in entries {
                    let archived_at = entry
                        .archived
                        .or_else(|| entry.annotation.disposed_at())
                        .ok_or_else(|| {
                            SyncError::malformed(entry.line, "archived entry has no ARCHIVED date")
                        })?;
                    self.archive.push(ArchivedAnnotation {
                        annotation: entry.annotation,
                        archived_at,
                    });
                }
            } else {
                nodes.push(Node::Section(self.section(heading)?));
            }
        }
        Ok(nodes)
    }

    fn section(&mut self, heading: Heading) -> SyncResult<Section> {
        self.pos += 1;
        let properties = self.drawer()?.unwrap_or_default();
        let mut annotations = Vec::new();
        let children = self.block(heading.level, &mut annotations)?;
        Ok(Section {
            level: heading.level,
            title: heading.title,
            todo: heading.todo,
            priority: heading.priority,
            tags: heading.tags,
            properties,
            children,
            annotations,
        })
    }

    /// Property drawer directly at the cursor, if present.
    fn drawer(&mut self) -> SyncResult<Option<IndexMap<String, String>>> {
        let p = patterns();
        match self.peek() {
            Some(line) if p.drawer_start.is_match(line) => {}
            _ => return Ok(None),
        }
        let start = self.pos + 1;
        self.pos += 1;
        let mut props = IndexMap::new();
        loop {
            let Some(line) = self.peek() else {
                return Err(SyncError::malformed(start, "unterminated property drawer"));
            };
            self.pos += 1;
            if p.drawer_end.is_match(line) {
                break;
            }
            if let Some(caps) = p.property.captures(line) {
                props.insert(caps[1].to_string(), caps[2].trim_end().to_string());
            }
        }
        Ok(Some(props))
    }

    /// Free text up to the next heading, with blank edges trimmed.
    fn body(&mut self) -> String {
        let mut lines = Vec::new();
        while let Some(line) = self.peek() {
            if patterns().heading.is_match(line) {
                break;
            }
            self.pos += 1;
            lines.push(line.strip_prefix(',').unwrap_or(line));
        }
        normalize_body(&lines.join("\n"))
    }

    fn entries(&mut self, container: usize) -> SyncResult<Vec<Entry>> {
        let mut out = Vec::new();
        while let Some(line) = self.peek() {
            if line.trim().is_empty() {
                self.pos += 1;
                continue;
            }
            let Some(heading) = self.heading(line) else {
                return Err(SyncError::malformed(
                    self.pos + 1,
                    "unexpected text in annotation section; entries must be headings",
                ));
            };
            if heading.level <= container {
                break;
            }
            out.push(self.entry(heading)?);
        }
        Ok(out)
    }

    fn entry(&mut self, heading: Heading) -> SyncResult<Entry> {
        let line = self.pos + 1;
        self.pos += 1;
        let props = self.drawer()?.unwrap_or_default();
        let body = self.body();

        let mut replies = Vec::new();
        while let Some(next) = self.peek() {
            match self.heading(next) {
                Some(reply) if reply.level > heading.level => {
                    self.pos += 1;
                    let reply_props = self.drawer()?.unwrap_or_default();
                    let reply_body = self.body();
                    replies.push(Reply {
                        id: non_empty(reply_props.get("REPLY_ID")),
                        author: author_of(&reply_props, &reply.raw),
                        created: timestamp(&reply_props, "CREATED"),
                        body: reply_body,
                    });
                }
                _ => break,
            }
        }

        let author = author_of(&props, &heading.raw);
        let created = timestamp(&props, "CREATED");
        let annotation = if let Some(id) = non_empty(props.get("COMMENT_ID")) {
            Annotation::Comment(Comment {
                id,
                author,
                created,
                body,
                anchor: props.get("ANCHOR").map(|v| unquote(v)).filter(|v| !v.is_empty()),
                resolved: props.get("RESOLVED").is_some_and(|v| is_true(v)),
                resolved_at: timestamp(&props, "RESOLVED_DATE"),
                replies,
            })
        } else if let Some(id) = non_empty(props.get("SUGG_ID")) {
            let kind = match props.get("TYPE") {
                None => SuggestionKind::Insertion,
                Some(raw) => SuggestionKind::parse(raw).ok_or_else(|| {
                    SyncError::malformed(line, format!("unknown suggestion TYPE `{}`", raw))
                })?,
            };
            let status = match props.get("STATUS").map(|s| s.trim().to_ascii_lowercase()) {
                None => SuggestionStatus::Pending,
                Some(s) if s == "pending" => SuggestionStatus::Pending,
                Some(s) if s == "integrated" => SuggestionStatus::Integrated,
                Some(s) => {
                    return Err(SyncError::malformed(
                        line,
                        format!("unknown suggestion STATUS `{}`", s),
                    ))
                }
            };
            Annotation::Suggestion(Suggestion {
                id,
                kind,
                author,
                created,
                content: strip_kind_prefix(&body).to_string(),
                location: props.get("LOCATION").map(|v| unquote(v)).filter(|v| !v.is_empty()),
                status,
                integrated_at: timestamp(&props, "INTEGRATED_DATE"),
            })
        } else {
            return Err(SyncError::malformed(
                line,
                "annotation entry has neither COMMENT_ID nor SUGG_ID",
            ));
        };

        let id = annotation.id().to_string();
        if let Some(first) = self.seen_ids.insert(id.clone(), line) {
            return Err(SyncError::malformed(
                line,
                format!("duplicate annotation id {} (first seen on line {})", id, first),
            ));
        }
        Ok(Entry {
            annotation,
            archived: timestamp(&props, "ARCHIVED"),
            line,
        })
    }

    fn leaf(&mut self) -> SyncResult<Node> {
        let p = patterns();
        let line = self.lines[self.pos];
        if let Some(caps) = p.src_begin.captures(line) {
            let args = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            return self.code_block(args);
        }
        if let Some(caps) = p.directive.captures(line) {
            self.pos += 1;
            return Ok(Node::CommentDirective(caps[1].trim().to_string()));
        }
        if is_table_line(line) {
            return Ok(Node::Table(self.table()));
        }
        if self.list_item(line).is_some() {
            return Ok(Node::List(self.list()));
        }
        Ok(self.paragraph())
    }

    fn code_block(&mut self, args: &str) -> SyncResult<Node> {
        let start = self.pos + 1;
        self.pos += 1;
        let (language, header_args) = split_src_args(args);
        let mut body = Vec::new();
        loop {
            let Some(line) = self.peek() else {
                return Err(SyncError::malformed(start, "unterminated #+BEGIN_SRC block"));
            };
            self.pos += 1;
            if patterns().src_end.is_match(line) {
                break;
            }
            body.push(unescape_src_line(line));
        }
        Ok(Node::Code(CodeBlock {
            language,
            header_args,
            body: body.join("\n"),
        }))
    }

    fn table(&mut self) -> Table {
        let mut table = Table::default();
        let mut seen_separator = false;
        while let Some(line) = self.peek() {
            if !is_table_line(line) {
                break;
            }
            self.pos += 1;
            if is_separator(line) {
                if !seen_separator {
                    seen_separator = true;
                    table.header_rows = table.rows.len().max(1);
                }
                continue;
            }
            table.rows.push(split_row(line));
        }
        table
    }

    fn list_item(&self, line: &str) -> Option<(usize, String, Option<char>, String)> {
        let caps = patterns().list_item.captures(line)?;
        let indent = caps[1].len();
        let bullet = caps[2].to_string();
        if bullet == "*" && indent == 0 {
            return None;
        }
        Some((
            indent,
            bullet,
            caps.get(3).and_then(|m| m.as_str().chars().next()),
            caps[4].trim_end().to_string(),
        ))
    }

    fn list(&mut self) -> List {
        let mut raw: Vec<(usize, String, Option<char>, String)> = Vec::new();
        while let Some(line) = self.peek() {
            if line.trim().is_empty() {
                break;
            }
            if let Some(item) = self.list_item(line) {
                raw.push(item);
                self.pos += 1;
                continue;
            }
            let continues = line.starts_with(char::is_whitespace)
                && !is_table_line(line)
                && !patterns().src_begin.is_match(line);
            match raw.last_mut() {
                Some(last) if continues => {
                    if !last.3.is_empty() {
                        last.3.push(' ');
                    }
                    last.3.push_str(line.trim());
                    self.pos += 1;
                }
                _ => break,
            }
        }
        let ordered = raw
            .first()
            .is_some_and(|(_, bullet, _, _)| bullet.starts_with(|c: char| c.is_ascii_digit()));
        List {
            ordered,
            items: raw
                .into_iter()
                .map(|(indent, bullet, checkbox, text)| ListItem {
                    indent,
                    bullet,
                    checkbox,
                    text: parse_inline(&text),
                })
                .collect(),
        }
    }

    fn breaks_paragraph(&self, line: &str) -> bool {
        let p = patterns();
        line.trim().is_empty()
            || p.heading.is_match(line)
            || p.src_begin.is_match(line)
            || p.directive.is_match(line)
            || is_table_line(line)
            || self.list_item(line).is_some()
    }

    fn paragraph(&mut self) -> Node {
        let mut parts = Vec::new();
        while let Some(line) = self.peek() {
            if !parts.is_empty() && self.breaks_paragraph(line) {
                break;
            }
            parts.push(line.trim());
            self.pos += 1;
        }
        let text = parts.join(" ");
        if let Some(caps) = patterns().whole_link.captures(&text) {
            let target = caps[1].to_string();
            let description = caps.get(2).map(|m| m.as_str().to_string());
            if description.is_none() && is_image_target(&target) {
                return Node::Image(Image { target });
            }
            return Node::Link(Link {
                target,
                description,
            });
        }
        Node::Text(parse_inline(&text))
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
}

fn timestamp(props: &IndexMap<String, String>, key: &str) -> Option<DateTime<Utc>> {
    let raw = props.get(key)?;
    let parsed = parse_timestamp(raw);
    if parsed.is_none() && !raw.trim().is_empty() {
        tracing::warn!(key, value = %raw, "ignoring unparseable timestamp");
    }
    parsed
}

/// AUTHOR property, else the name in a `Comment from NAME [date]` heading.
fn author_of(props: &IndexMap<String, String>, heading: &str) -> String {
    if let Some(author) = non_empty(props.get("AUTHOR")) {
        return author;
    }
    let name = heading.split_once(" from ").map(|(_, rest)| rest).unwrap_or("");
    name.split(" [").next().unwrap_or("").trim().to_string()
}

fn is_true(value: &str) -> bool {
    matches!(value.trim(), "t" | "true" | "yes")
}

fn strip_kind_prefix(body: &str) -> &str {
    body.strip_prefix("[INSERTION] ")
        .or_else(|| body.strip_prefix("[DELETION] "))
        .or_else(|| body.strip_prefix("[INSERTION]"))
        .or_else(|| body.strip_prefix("[DELETION]"))
        .unwrap_or(body)
}

/// Undo the quoting applied to ANCHOR and LOCATION values.
pub(crate) fn unquote(value: &str) -> String {
    let v = value.trim();
    let Some(inner) = v.strip_prefix('"').and_then(|s| s.strip_suffix('"')) else {
        return v.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// `python :file out.png` → (`python`, `:file out.png`). A first token
/// starting with `:` means the block has no language.
fn split_src_args(args: &str) -> (Option<String>, Option<String>) {
    let args = args.trim();
    if args.is_empty() {
        return (None, None);
    }
    if args.starts_with(':') {
        return (None, Some(args.to_string()));
    }
    match args.split_once(char::is_whitespace) {
        Some((lang, rest)) if !rest.trim().is_empty() => {
            (Some(lang.to_string()), Some(rest.trim().to_string()))
        }
        Some((lang, _)) => (Some(lang.to_string()), None),
        None => (Some(args.to_string()), None),
    }
}

/// Lines inside a src block that org would read as structure get a `,`.
pub(crate) fn src_line_needs_escape(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with('*') || t.starts_with("#+") || (t.starts_with(',') && src_line_needs_escape(&t[1..]))
}

fn unescape_src_line(line: &str) -> String {
    let indent = line.len() - line.trim_start().len();
    let rest = &line[indent..];
    match rest.strip_prefix(',') {
        Some(after) if src_line_needs_escape(after) => format!("{}{}", &line[..indent], after),
        _ => line.to_string(),
    }
}

fn is_table_line(line: &str) -> bool {
    line.trim_start().starts_with('|')
}

fn is_separator(line: &str) -> bool {
    let t = line.trim();
    t.contains('-') && t.chars().all(|c| matches!(c, '-' | '+' | '|'))
}

fn split_row(line: &str) -> Vec<String> {
    let t = line.trim();
    let t = t.strip_prefix('|').unwrap_or(t);
    let t = t.strip_suffix('|').unwrap_or(t);
    t.split('|').map(|cell| cell.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn only_section(doc: &Document) -> &Section {
        match &doc.content[..] {
            [Node::Section(s)] => s,
            other => panic!("expected one section, got {:?}", other),
        }
    }

    #[test]
    fn todo_heading_with_italic_paragraph() {
        let doc = parse("* TODO Ship it\nSome /italic/ text.\n").unwrap();
        let section = only_section(&doc);
        assert_eq!(section.level, 1);
        assert_eq!(section.todo.as_deref(), Some("TODO"));
        assert_eq!(section.title, "Ship it");
        assert_eq!(section.children.len(), 1);
        let Node::Text(run) = &section.children[0] else {
            panic!("expected text run");
        };
        assert_eq!(run.text, "Some italic text.");
        let span = &run.spans[0];
        assert_eq!(&run.text[span.start..span.end], "italic");
        assert!(span.style.emphasis);
    }

    #[test]
    fn metadata_stops_at_first_structural_line() {
        let doc = parse("#+TITLE: Plan\n#+GDOC_ID: abc\n\nIntro\n#+LATE: no\n").unwrap();
        assert_eq!(doc.metadata.get("TITLE").map(String::as_str), Some("Plan"));
        assert_eq!(doc.gdoc_id(), Some("abc"));
        assert!(!doc.metadata.contains_key("LATE"));
    }

    #[test]
    fn comment_directive_is_not_metadata() {
        let doc = parse("#+GDOCS_COMMENT: please review\n* A\n").unwrap();
        assert!(doc.metadata.is_empty());
        assert_eq!(
            doc.content[0],
            Node::CommentDirective("please review".into())
        );
    }

    #[test]
    fn heading_priority_and_tags() {
        let doc = parse("** DONE [#A] Release notes :docs:v2:\n").unwrap();
        let s = only_section(&doc);
        assert_eq!(s.level, 2);
        assert_eq!(s.todo.as_deref(), Some("DONE"));
        assert_eq!(s.priority, Some('A'));
        assert_eq!(s.title, "Release notes");
        assert_eq!(s.tags, vec!["docs", "v2"]);
    }

    #[test]
    fn nested_sections_keep_depth() {
        let doc = parse("* A\n** B\n*** C\n* D\n").unwrap();
        assert_eq!(doc.content.len(), 2);
        let Node::Section(a) = &doc.content[0] else { panic!() };
        let Node::Section(b) = &a.children[0] else { panic!() };
        let Node::Section(c) = &b.children[0] else { panic!() };
        assert_eq!((a.level, b.level, c.level), (1, 2, 3));
    }

    #[test]
    fn unterminated_src_block_names_opening_line() {
        let err = parse("* A\ntext\n#+BEGIN_SRC python\nprint(1)\n").unwrap_err();
        match err {
            SyncError::MalformedStructure { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn src_block_language_and_header_args() {
        let doc = parse("#+begin_src dot :file out.svg :exports results\ndigraph {}\n#+end_src\n")
            .unwrap();
        assert_eq!(
            doc.content[0],
            Node::Code(CodeBlock {
                language: Some("dot".into()),
                header_args: Some(":file out.svg :exports results".into()),
                body: "digraph {}".into(),
            })
        );
        let doc = parse("#+BEGIN_SRC :file x.png\n#+END_SRC\n").unwrap();
        let Node::Code(block) = &doc.content[0] else { panic!() };
        assert_eq!(block.language, None);
        assert_eq!(block.header_args.as_deref(), Some(":file x.png"));
    }

    #[test]
    fn table_header_from_first_separator() {
        let doc = parse("| a | b |\n|---+---|\n| 1 | 2 |\n|---+---|\n| 3 | 4 |\n").unwrap();
        let Node::Table(t) = &doc.content[0] else { panic!() };
        assert_eq!(t.header_rows, 1);
        assert_eq!(t.rows.len(), 3);
        assert_eq!(t.rows[2], vec!["3", "4"]);

        let doc = parse("|---|\n| x |\n").unwrap();
        let Node::Table(t) = &doc.content[0] else { panic!() };
        assert_eq!(t.header_rows, 1);

        let doc = parse("| x |\n| y |\n").unwrap();
        let Node::Table(t) = &doc.content[0] else { panic!() };
        assert_eq!(t.header_rows, 0);
    }

    #[test]
    fn lists_with_checkboxes_and_continuations() {
        let doc = parse("- [X] done thing\n- [ ] open\n  continued here\n\n1. first\n2. second\n")
            .unwrap();
        let Node::List(l) = &doc.content[0] else { panic!() };
        assert!(!l.ordered);
        assert_eq!(l.items[0].checkbox, Some('X'));
        assert_eq!(l.items[1].text.text, "open continued here");
        let Node::List(l) = &doc.content[1] else { panic!() };
        assert!(l.ordered);
        assert_eq!(l.items.len(), 2);
    }

    #[test]
    fn standalone_links_and_images() {
        let doc = parse("[[https://example.com][Example]]\n\n[[file:diagram.png]]\n\n[[https://x.org/a.jpg]]\n")
            .unwrap();
        assert_eq!(
            doc.content[0],
            Node::Link(Link {
                target: "https://example.com".into(),
                description: Some("Example".into()),
            })
        );
        assert_eq!(
            doc.content[1],
            Node::Image(Image {
                target: "file:diagram.png".into()
            })
        );
        let Node::Image(img) = &doc.content[2] else { panic!() };
        assert!(img.is_remote());
    }

    #[test]
    fn paragraph_lines_are_joined() {
        let doc = parse("first line\n  second line\n\nnext").unwrap();
        assert_eq!(doc.content.len(), 2);
        let Node::Text(run) = &doc.content[0] else { panic!() };
        assert_eq!(run.text, "first line second line");
    }

    const ANNOTATED: &str = "\
* Intro
Body text.
** GDOCS_ANNOTATIONS
*** Comment from Alice
:PROPERTIES:
:COMMENT_ID: c1
:AUTHOR: Alice
:CREATED: 2024-01-15T10:30:00Z
:ANCHOR: \"Body \\\"text\\\"\"
:RESOLVED: nil
:END:
Please expand.
,* not a heading
**** Reply from me
:PROPERTIES:
:AUTHOR: me
:END:
Will do.
*** Suggestion from Bob
:PROPERTIES:
:SUGG_ID: s1
:TYPE: insertion
:STATUS: pending
:LOCATION: \"Intro\"
:END:
[INSERTION] more words
* GDOCS_ARCHIVE
** Comment from Carol
:PROPERTIES:
:COMMENT_ID: c0
:AUTHOR: Carol
:RESOLVED: t
:RESOLVED_DATE: 2024-01-10T09:00:00Z
:ARCHIVED: 2024-01-11T09:00:00Z
:END:
Old note.
";

    #[test]
    fn annotation_sections_attach_to_their_parent() {
        let doc = parse(ANNOTATED).unwrap();
        let intro = only_section(&doc);
        assert_eq!(intro.children.len(), 1, "annotations are not content");
        assert_eq!(intro.annotations.len(), 2);

        let Annotation::Comment(c) = &intro.annotations[0] else { panic!() };
        assert_eq!(c.id, "c1");
        assert_eq!(c.author, "Alice");
        assert_eq!(c.anchor.as_deref(), Some("Body \"text\""));
        assert_eq!(c.body, "Please expand.\n* not a heading");
        assert!(!c.resolved);
        assert_eq!(c.replies.len(), 1);
        assert!(c.replies[0].is_draft());
        assert_eq!(c.replies[0].body, "Will do.");

        let Annotation::Suggestion(s) = &intro.annotations[1] else { panic!() };
        assert_eq!(s.kind, SuggestionKind::Insertion);
        assert_eq!(s.content, "more words");
        assert_eq!(s.location.as_deref(), Some("Intro"));

        assert_eq!(doc.archive.len(), 1);
        assert_eq!(doc.archive[0].annotation.id(), "c0");
    }

    #[test]
    fn entry_without_id_is_malformed() {
        let text = "* A\n** GDOCS_ANNOTATIONS\n*** Comment from X\n:PROPERTIES:\n:AUTHOR: X\n:END:\nhi\n";
        match parse(text).unwrap_err() {
            SyncError::MalformedStructure { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let text = "\
* A
** GDOCS_ANNOTATIONS
*** Comment from X
:PROPERTIES:
:COMMENT_ID: dup
:END:
* GDOCS_ARCHIVE
** Comment from X
:PROPERTIES:
:COMMENT_ID: dup
:RESOLVED: t
:ARCHIVED: 2024-01-01T00:00:00Z
:END:
";
        assert!(matches!(
            parse(text),
            Err(SyncError::MalformedStructure { line: 8, .. })
        ));
    }

    #[test]
    fn top_level_annotations_attach_to_document() {
        let text = "Just text.\n* GDOCS_ANNOTATIONS\n** Comment from X\n:PROPERTIES:\n:COMMENT_ID: c9\n:END:\nhello\n";
        let doc = parse(text).unwrap();
        assert_eq!(doc.content.len(), 1);
        assert_eq!(doc.annotations.len(), 1);
    }

    #[test]
    fn stray_text_in_annotation_section_is_malformed() {
        let text = "* A\n** GDOCS_ANNOTATIONS\nloose text\n";
        assert!(matches!(
            parse(text),
            Err(SyncError::MalformedStructure { line: 3, .. })
        ));
    }

    #[test]
    fn keyword_and_tags_do_not_hide_reserved_headings() {
        let text = "\
* Intro
Body.
** GDOCS_ANNOTATIONS :draft:
*** Comment from X
:PROPERTIES:
:COMMENT_ID: c1
:END:
hi
* TODO GDOCS_ARCHIVE
** Comment from Y
:PROPERTIES:
:COMMENT_ID: c0
:RESOLVED: t
:ARCHIVED: 2024-01-01T00:00:00Z
:END:
";
        let doc = parse(text).unwrap();
        let intro = only_section(&doc);
        assert_eq!(intro.title, "Intro");
        assert_eq!(intro.children.len(), 1);
        assert_eq!(intro.annotations.len(), 1);
        assert_eq!(intro.annotations[0].id(), "c1");
        assert_eq!(doc.archive.len(), 1);

        let inserted: String = crate::forward::convert(&doc)
            .mutations
            .iter()
            .filter_map(|m| match m {
                crate::remote::Mutation::InsertText { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert!(inserted.contains("Body."));
        assert!(!inserted.contains("GDOCS"));
        assert!(!inserted.contains("Comment from"));
    }

    #[test]
    fn text_under_tagged_reserved_heading_is_malformed() {
        let text = "* A\n** GDOCS_ANNOTATIONS :draft:\nImportant paragraph.\n";
        assert!(matches!(
            parse(text),
            Err(SyncError::MalformedStructure { line: 3, .. })
        ));
    }
}
