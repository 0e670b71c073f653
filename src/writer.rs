//! [`Document`] → org text, the inverse of [`crate::parser`].
//!
//! Layout: metadata lines, a blank line, then content. A section's active
//! annotations follow its children under a `GDOCS_ANNOTATIONS` heading one
//! level deeper. Document-level annotations and the archive are written as
//! top-level sections at the end.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Local, Utc};

use crate::error::{SyncError, SyncResult};
use crate::inline::render_inline;
use crate::models::{
    format_timestamp, Annotation, Comment, Document, List, Node, Reply, Section, Suggestion,
    ANNOTATIONS_TITLE, ARCHIVE_TITLE,
};
use crate::parser::src_line_needs_escape;

/// Serialize a document to org text.
pub fn to_string(doc: &Document) -> String {
    let mut out = String::new();
    for (key, value) in &doc.metadata {
        push_line(&mut out, format!("#+{}: {}", key, value).trim_end());
    }
    if !doc.metadata.is_empty() {
        out.push('\n');
    }

    write_nodes(&mut out, &doc.content);

    if !doc.annotations.is_empty() {
        push_line(&mut out, &format!("* {}", ANNOTATIONS_TITLE));
        for annotation in &doc.annotations {
            write_annotation(&mut out, annotation, 2, None);
        }
    }
    if !doc.archive.is_empty() {
        push_line(&mut out, &format!("* {}", ARCHIVE_TITLE));
        for archived in &doc.archive {
            write_annotation(&mut out, &archived.annotation, 2, Some(archived.archived_at));
        }
    }
    out
}

/// Write the document to `path` through a sibling temp file and rename, so
/// a crash never leaves a half-written outline.
pub fn write_file(doc: &Document, path: &Path) -> SyncResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);
    std::fs::write(tmp, to_string(doc)).map_err(|e| SyncError::io(tmp, e))?;
    std::fs::rename(tmp, path).map_err(|e| SyncError::io(path, e))
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

fn write_nodes(out: &mut String, nodes: &[Node]) {
    for node in nodes {
        match node {
            Node::Section(section) => write_section(out, section),
            Node::Text(run) => {
                push_line(out, &render_inline(run));
                out.push('\n');
            }
            Node::Link(link) => {
                match &link.description {
                    Some(desc) => push_line(out, &format!("[[{}][{}]]", link.target, desc)),
                    None => push_line(out, &format!("[[{}]]", link.target)),
                }
                out.push('\n');
            }
            Node::Image(image) => {
                push_line(out, &format!("[[{}]]", image.target));
                out.push('\n');
            }
            Node::Figure(figure) => {
                push_line(out, &format!("[[file:{}]]", figure.local_path.display()));
                out.push('\n');
            }
            Node::List(list) => {
                write_list(out, list);
                out.push('\n');
            }
            Node::Table(table) => {
                if table.rows.is_empty() {
                    push_line(out, "|-|");
                } else {
                    for line in table.render_lines() {
                        push_line(out, &line);
                    }
                }
                out.push('\n');
            }
            Node::Code(block) => {
                let mut begin = String::from("#+BEGIN_SRC");
                if let Some(lang) = &block.language {
                    begin.push(' ');
                    begin.push_str(lang);
                }
                if let Some(args) = &block.header_args {
                    begin.push(' ');
                    begin.push_str(args);
                }
                push_line(out, &begin);
                if !block.body.is_empty() {
                    for line in block.body.split('\n') {
                        if src_line_needs_escape(line) {
                            let indent = line.len() - line.trim_start().len();
                            push_line(out, &format!("{},{}", &line[..indent], &line[indent..]));
                        } else {
                            push_line(out, line);
                        }
                    }
                }
                push_line(out, "#+END_SRC");
                out.push('\n');
            }
            Node::CommentDirective(text) => {
                push_line(out, format!("#+GDOCS_COMMENT: {}", text).trim_end());
                out.push('\n');
            }
        }
    }
}

fn write_section(out: &mut String, section: &Section) {
    let mut heading = "*".repeat(section.level.max(1));
    heading.push(' ');
    if let Some(todo) = &section.todo {
        heading.push_str(todo);
        heading.push(' ');
    }
    if let Some(priority) = section.priority {
        let _ = write!(heading, "[#{}] ", priority);
    }
    heading.push_str(&section.title);
    if !section.tags.is_empty() {
        let _ = write!(heading, " :{}:", section.tags.join(":"));
    }
    push_line(out, &heading);

    if !section.properties.is_empty() {
        push_line(out, ":PROPERTIES:");
        for (key, value) in &section.properties {
            push_line(out, format!(":{}: {}", key, value).trim_end());
        }
        push_line(out, ":END:");
    }

    write_nodes(out, &section.children);

    if !section.annotations.is_empty() {
        let level = section.level.max(1) + 1;
        push_line(out, &format!("{} {}", "*".repeat(level), ANNOTATIONS_TITLE));
        for annotation in &section.annotations {
            write_annotation(out, annotation, level + 1, None);
        }
    }
}

fn write_list(out: &mut String, list: &List) {
    for item in &list.items {
        let mut line = " ".repeat(item.indent);
        line.push_str(&item.bullet);
        line.push(' ');
        if let Some(mark) = item.checkbox {
            let _ = write!(line, "[{}] ", mark);
        }
        line.push_str(&render_inline(&item.text));
        push_line(out, &line);
    }
}

/// `"…"` with backslash escapes, so anchors keep quotes and newlines.
pub(crate) fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn entry_title(kind: &str, author: &str, created: Option<DateTime<Utc>>) -> String {
    let mut title = kind.to_string();
    if !author.is_empty() {
        let _ = write!(title, " from {}", author);
    }
    if let Some(ts) = created {
        let _ = write!(title, " [{}]", ts.with_timezone(&Local).format("%Y-%m-%d %a %H:%M"));
    }
    title
}

fn write_drawer(out: &mut String, props: &[(&str, Option<String>)]) {
    push_line(out, ":PROPERTIES:");
    for (key, value) in props {
        if let Some(value) = value {
            push_line(out, format!(":{}: {}", key, value).trim_end());
        }
    }
    push_line(out, ":END:");
}

fn write_body(out: &mut String, body: &str) {
    if body.is_empty() {
        return;
    }
    for line in body.lines() {
        if line.starts_with(['*', '#', ',', ':']) {
            out.push(',');
        }
        push_line(out, line);
    }
}

fn ts(value: Option<DateTime<Utc>>) -> Option<String> {
    value.as_ref().map(format_timestamp)
}

fn write_annotation(
    out: &mut String,
    annotation: &Annotation,
    level: usize,
    archived: Option<DateTime<Utc>>,
) {
    match annotation {
        Annotation::Comment(comment) => write_comment(out, comment, level, archived),
        Annotation::Suggestion(suggestion) => write_suggestion(out, suggestion, level, archived),
    }
    out.push('\n');
}

fn write_comment(out: &mut String, c: &Comment, level: usize, archived: Option<DateTime<Utc>>) {
    push_line(
        out,
        &format!("{} {}", "*".repeat(level), entry_title("Comment", &c.author, c.created)),
    );
    write_drawer(
        out,
        &[
            ("COMMENT_ID", Some(c.id.clone())),
            ("AUTHOR", Some(c.author.clone()).filter(|a| !a.is_empty())),
            ("CREATED", ts(c.created)),
            ("ANCHOR", c.anchor.as_deref().map(quote)),
            ("RESOLVED", Some(if c.resolved { "t" } else { "nil" }.to_string())),
            ("RESOLVED_DATE", ts(c.resolved_at)),
            ("ARCHIVED", ts(archived)),
        ],
    );
    write_body(out, &c.body);
    for reply in &c.replies {
        write_reply(out, reply, level + 1);
    }
}

fn write_reply(out: &mut String, r: &Reply, level: usize) {
    push_line(
        out,
        &format!("{} {}", "*".repeat(level), entry_title("Reply", &r.author, r.created)),
    );
    write_drawer(
        out,
        &[
            ("REPLY_ID", r.id.clone()),
            ("AUTHOR", Some(r.author.clone()).filter(|a| !a.is_empty())),
            ("CREATED", ts(r.created)),
        ],
    );
    write_body(out, &r.body);
}

fn write_suggestion(
    out: &mut String,
    s: &Suggestion,
    level: usize,
    archived: Option<DateTime<Utc>>,
) {
    push_line(
        out,
        &format!("{} {}", "*".repeat(level), entry_title("Suggestion", &s.author, s.created)),
    );
    write_drawer(
        out,
        &[
            ("SUGG_ID", Some(s.id.clone())),
            ("TYPE", Some(s.kind.as_str().to_string())),
            ("STATUS", Some(s.status.as_str().to_string())),
            ("AUTHOR", Some(s.author.clone()).filter(|a| !a.is_empty())),
            ("CREATED", ts(s.created)),
            ("LOCATION", s.location.as_deref().map(quote)),
            ("INTEGRATED_DATE", ts(s.integrated_at)),
            ("ARCHIVED", ts(archived)),
        ],
    );
    let tag = s.kind.as_str().to_ascii_uppercase();
    write_body(out, &format!("[{}] {}", tag, s.content));
}
