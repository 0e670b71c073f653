//! Annotation lifecycle.
//!
//! State is derived, never stored:
//!
//! | state          | condition                                        |
//! |----------------|--------------------------------------------------|
//! | `archived`     | entry lives in the document archive              |
//! | `resolved`     | comment with `RESOLVED: t`                       |
//! | `reply-queued` | comment with at least one reply lacking an id    |
//! | `integrated`   | suggestion with `STATUS: integrated`             |
//! | `pending`      | anything else                                    |
//!
//! Manual commands ([`queue_reply`], [`resolve`], [`integrate`]) validate
//! before touching the document, so a rejected command leaves it unchanged.
//! [`archive`] is only called by push once every remote action succeeded.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{SyncError, SyncResult};
use crate::models::{
    format_timestamp, normalize_body, Annotation, ArchivedAnnotation, Comment, Document, Reply,
    Suggestion, SuggestionStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnotationState {
    Pending,
    ReplyQueued,
    Resolved,
    Integrated,
    Archived,
}

impl AnnotationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationState::Pending => "pending",
            AnnotationState::ReplyQueued => "reply-queued",
            AnnotationState::Resolved => "resolved",
            AnnotationState::Integrated => "integrated",
            AnnotationState::Archived => "archived",
        }
    }
}

impl fmt::Display for AnnotationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of an annotation that is still active (not archived).
pub fn state_of(annotation: &Annotation) -> AnnotationState {
    match annotation {
        Annotation::Comment(c) if c.resolved => AnnotationState::Resolved,
        Annotation::Comment(c) if c.drafts().next().is_some() => AnnotationState::ReplyQueued,
        Annotation::Comment(_) => AnnotationState::Pending,
        Annotation::Suggestion(s) if s.status == SuggestionStatus::Integrated => {
            AnnotationState::Integrated
        }
        Annotation::Suggestion(_) => AnnotationState::Pending,
    }
}

/// Look an annotation up anywhere in the document.
pub fn find<'a>(doc: &'a Document, id: &str) -> Option<(&'a Annotation, AnnotationState)> {
    if let Some(a) = doc.active_annotations().find(|a| a.id() == id) {
        return Some((a, state_of(a)));
    }
    doc.archive
        .iter()
        .find(|a| a.annotation.id() == id)
        .map(|a| (&a.annotation, AnnotationState::Archived))
}

fn find_active_mut<'a>(doc: &'a mut Document, id: &str) -> Option<&'a mut Annotation> {
    doc.annotation_lists_mut()
        .into_iter()
        .flat_map(|list| list.iter_mut())
        .find(|a| a.id() == id)
}

/// Resolve `id` to an active annotation, rejecting unknown and archived ids.
fn active_mut<'a>(doc: &'a mut Document, id: &str) -> SyncResult<&'a mut Annotation> {
    if doc.archive.iter().any(|a| a.annotation.id() == id) {
        return Err(SyncError::AlreadyTerminal {
            id: id.to_string(),
            state: AnnotationState::Archived,
        });
    }
    find_active_mut(doc, id).ok_or_else(|| SyncError::NotFound { id: id.to_string() })
}

fn comment_mut<'a>(doc: &'a mut Document, id: &str) -> SyncResult<&'a mut Comment> {
    match active_mut(doc, id)? {
        Annotation::Comment(c) => Ok(c),
        Annotation::Suggestion(_) => Err(SyncError::WrongKind {
            id: id.to_string(),
            expected: "comment",
        }),
    }
}

/// Attach a draft reply; it is sent on the next push.
pub fn queue_reply(
    doc: &mut Document,
    id: &str,
    author: &str,
    text: &str,
    now: DateTime<Utc>,
) -> SyncResult<()> {
    let comment = comment_mut(doc, id)?;
    if comment.resolved {
        return Err(SyncError::AlreadyTerminal {
            id: id.to_string(),
            state: AnnotationState::Resolved,
        });
    }
    comment.replies.push(Reply {
        id: None,
        author: author.to_string(),
        created: Some(now),
        body: normalize_body(text),
    });
    Ok(())
}

/// Mark a comment resolved locally. Pending and reply-queued comments
/// qualify; queued drafts are still sent before the resolve.
pub fn resolve(doc: &mut Document, id: &str, now: DateTime<Utc>) -> SyncResult<()> {
    let comment = comment_mut(doc, id)?;
    if comment.resolved {
        return Err(SyncError::AlreadyTerminal {
            id: id.to_string(),
            state: AnnotationState::Resolved,
        });
    }
    comment.resolved = true;
    comment.resolved_at = Some(now);
    Ok(())
}

/// Record that a suggestion's content has been merged into the outline.
pub fn integrate(doc: &mut Document, id: &str, now: DateTime<Utc>) -> SyncResult<()> {
    let suggestion: &mut Suggestion = match active_mut(doc, id)? {
        Annotation::Suggestion(s) => s,
        Annotation::Comment(_) => {
            return Err(SyncError::WrongKind {
                id: id.to_string(),
                expected: "suggestion",
            })
        }
    };
    if suggestion.status == SuggestionStatus::Integrated {
        return Err(SyncError::AlreadyTerminal {
            id: id.to_string(),
            state: AnnotationState::Integrated,
        });
    }
    suggestion.status = SuggestionStatus::Integrated;
    suggestion.integrated_at = Some(now);
    Ok(())
}

/// Ids of active annotations with a local disposition awaiting archival.
pub fn disposed_ids(doc: &Document) -> Vec<String> {
    doc.active_annotations()
        .filter(|a| {
            matches!(
                state_of(a),
                AnnotationState::Resolved | AnnotationState::Integrated
            )
        })
        .map(|a| a.id().to_string())
        .collect()
}

/// Give the drafts of `comment_id` the ids the remote assigned, in order.
/// Returns true when no draft of that comment is left unsent.
pub fn confirm_replies(doc: &mut Document, comment_id: &str, reply_ids: &[String]) -> bool {
    let Some(Annotation::Comment(comment)) = find_active_mut(doc, comment_id) else {
        return false;
    };
    let mut ids = reply_ids.iter();
    for reply in comment.replies.iter_mut().filter(|r| r.is_draft()) {
        match ids.next() {
            Some(id) => reply.id = Some(id.clone()),
            None => break,
        }
    }
    comment.drafts().next().is_none()
}

/// Move the given annotations into the archive, stamped with `now`.
/// Returns how many were moved.
pub fn archive(doc: &mut Document, ids: &[String], now: DateTime<Utc>) -> usize {
    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let mut moved = Vec::new();
    for list in doc.annotation_lists_mut() {
        let (go, stay): (Vec<_>, Vec<_>) = list.drain(..).partition(|a| wanted.contains(a.id()));
        *list = stay;
        moved.extend(go);
    }
    let count = moved.len();
    doc.archive
        .extend(moved.into_iter().map(|annotation| ArchivedAnnotation {
            annotation,
            archived_at: now,
        }));
    count
}

/// Active comments still awaiting a decision (pending or reply-queued).
pub fn pending_comments(doc: &Document) -> Vec<&Comment> {
    doc.active_annotations()
        .filter_map(|a| match a {
            Annotation::Comment(c) if !c.resolved => Some(c),
            _ => None,
        })
        .collect()
}

pub fn pending_suggestions(doc: &Document) -> Vec<&Suggestion> {
    doc.active_annotations()
        .filter_map(|a| match a {
            Annotation::Suggestion(s) if s.status == SuggestionStatus::Pending => Some(s),
            _ => None,
        })
        .collect()
}

/// Which annotations `list` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KindFilter {
    #[default]
    All,
    Comments,
    Suggestions,
}

impl KindFilter {
    fn accepts(&self, annotation: &Annotation) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::Comments => matches!(annotation, Annotation::Comment(_)),
            KindFilter::Suggestions => matches!(annotation, Annotation::Suggestion(_)),
        }
    }
}

/// Flat view of one annotation, for `list` output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationSummary {
    pub id: String,
    pub kind: &'static str,
    pub state: AnnotationState,
    pub author: String,
    pub created: Option<String>,
    /// Title of the owning section; `None` for document-level and archived entries.
    pub section: Option<String>,
    pub text: String,
    /// Anchor snippet for comments, location hint for suggestions.
    pub context: Option<String>,
    pub replies: usize,
}

fn summarize(annotation: &Annotation, state: AnnotationState, section: Option<&str>) -> AnnotationSummary {
    let (text, context, replies) = match annotation {
        Annotation::Comment(c) => (c.body.clone(), c.anchor.clone(), c.replies.len()),
        Annotation::Suggestion(s) => (s.content.clone(), s.location.clone(), 0),
    };
    AnnotationSummary {
        id: annotation.id().to_string(),
        kind: annotation.kind_label(),
        state,
        author: annotation.author().to_string(),
        created: annotation.created().as_ref().map(format_timestamp),
        section: section.map(str::to_string),
        text,
        context,
        replies,
    }
}

/// Active annotations in document order, plus the archive when asked.
pub fn summaries(doc: &Document, filter: KindFilter, include_archived: bool) -> Vec<AnnotationSummary> {
    let mut out = Vec::new();
    for (_, section) in doc.sections() {
        for a in section.annotations.iter().filter(|a| filter.accepts(a)) {
            out.push(summarize(a, state_of(a), Some(&section.title)));
        }
    }
    for a in doc.annotations.iter().filter(|a| filter.accepts(a)) {
        out.push(summarize(a, state_of(a), None));
    }
    if include_archived {
        for archived in doc.archive.iter().filter(|a| filter.accepts(&a.annotation)) {
            out.push(summarize(&archived.annotation, AnnotationState::Archived, None));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const DOC: &str = "\
* Intro
Text.
** GDOCS_ANNOTATIONS
*** Comment from A
:PROPERTIES:
:COMMENT_ID: c1
:END:
Fix this.
*** Suggestion from B
:PROPERTIES:
:SUGG_ID: s1
:TYPE: insertion
:STATUS: pending
:END:
[INSERTION] extra
* GDOCS_ARCHIVE
** Comment from Z
:PROPERTIES:
:COMMENT_ID: old
:RESOLVED: t
:ARCHIVED: 2024-01-01T00:00:00Z
:END:
done
";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn derived_states() {
        let mut doc = parse(DOC).unwrap();
        assert_eq!(find(&doc, "c1").unwrap().1, AnnotationState::Pending);
        assert_eq!(find(&doc, "old").unwrap().1, AnnotationState::Archived);

        queue_reply(&mut doc, "c1", "me", "On it", now()).unwrap();
        assert_eq!(find(&doc, "c1").unwrap().1, AnnotationState::ReplyQueued);

        resolve(&mut doc, "c1", now()).unwrap();
        assert_eq!(find(&doc, "c1").unwrap().1, AnnotationState::Resolved);

        integrate(&mut doc, "s1", now()).unwrap();
        assert_eq!(find(&doc, "s1").unwrap().1, AnnotationState::Integrated);
        assert_eq!(disposed_ids(&doc), vec!["c1".to_string(), "s1".to_string()]);
    }

    #[test]
    fn integrating_twice_is_terminal_and_changes_nothing() {
        let mut doc = parse(DOC).unwrap();
        integrate(&mut doc, "s1", now()).unwrap();
        let before = doc.clone();
        let later = now() + chrono::Duration::hours(1);
        match integrate(&mut doc, "s1", later) {
            Err(SyncError::AlreadyTerminal { state, .. }) => {
                assert_eq!(state, AnnotationState::Integrated)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(doc, before);
    }

    #[test]
    fn archived_and_unknown_ids_are_rejected() {
        let mut doc = parse(DOC).unwrap();
        let before = doc.clone();
        assert!(matches!(
            resolve(&mut doc, "old", now()),
            Err(SyncError::AlreadyTerminal {
                state: AnnotationState::Archived,
                ..
            })
        ));
        assert!(matches!(
            queue_reply(&mut doc, "missing", "me", "x", now()),
            Err(SyncError::NotFound { .. })
        ));
        assert!(matches!(
            integrate(&mut doc, "c1", now()),
            Err(SyncError::WrongKind { .. })
        ));
        assert_eq!(doc, before);
    }

    #[test]
    fn resolved_comment_rejects_replies() {
        let mut doc = parse(DOC).unwrap();
        resolve(&mut doc, "c1", now()).unwrap();
        assert!(matches!(
            queue_reply(&mut doc, "c1", "me", "late", now()),
            Err(SyncError::AlreadyTerminal { .. })
        ));
    }

    #[test]
    fn archive_moves_entries_and_stamps_them() {
        let mut doc = parse(DOC).unwrap();
        resolve(&mut doc, "c1", now()).unwrap();
        let ids = disposed_ids(&doc);
        let moved = archive(&mut doc, &ids, now());
        assert_eq!(moved, 1);
        assert_eq!(doc.active_annotations().count(), 1);
        assert_eq!(doc.archive.len(), 2);
        assert_eq!(doc.archive[1].annotation.id(), "c1");
        assert_eq!(doc.archive[1].archived_at, now());
    }

    #[test]
    fn confirm_replies_assigns_ids_in_order() {
        let mut doc = parse(DOC).unwrap();
        queue_reply(&mut doc, "c1", "me", "one", now()).unwrap();
        queue_reply(&mut doc, "c1", "me", "two", now()).unwrap();
        assert!(!confirm_replies(&mut doc, "c1", &["r1".into()]));
        assert!(confirm_replies(&mut doc, "c1", &["r2".into()]));
        let Some((Annotation::Comment(c), state)) = find(&doc, "c1") else {
            panic!("comment missing");
        };
        assert_eq!(state, AnnotationState::Pending);
        let ids: Vec<_> = c.replies.iter().map(|r| r.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
    }

    #[test]
    fn summaries_filter_by_kind() {
        let doc = parse(DOC).unwrap();
        let all = summaries(&doc, KindFilter::All, true);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].section.as_deref(), Some("Intro"));
        let suggestions = summaries(&doc, KindFilter::Suggestions, false);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].text, "extra");
        assert_eq!(pending_comments(&doc).len(), 1);
        assert_eq!(pending_suggestions(&doc).len(), 1);
    }
}
