//! Google Docs v1 / Drive v3 adapter.
//!
//! Implements [`Transport`] and [`AssetStore`] over the REST APIs with a
//! blocking `reqwest` client. Authentication is a bearer token read from
//! the environment variable named by `remote.token_env`; obtaining and
//! refreshing that token is left to the caller (e.g. `gcloud auth
//! print-access-token`).
//!
//! | Operation          | Endpoint                                              |
//! |--------------------|-------------------------------------------------------|
//! | create_document    | `POST docs/documents`                                 |
//! | get_document       | `GET docs/documents/{id}?suggestionsViewMode=…`       |
//! | apply_mutations    | `POST docs/documents/{id}:batchUpdate`                |
//! | clear_content      | `batchUpdate` with `deleteContentRange`               |
//! | list_comments      | `GET drive/files/{id}/comments` (paginated)           |
//! | create_comment     | `POST drive/files/{id}/comments`                      |
//! | create_reply       | `POST drive/files/{id}/comments/{cid}/replies`        |
//! | resolve_comment    | reply with `action: resolve`                          |
//! | latest_revision    | `GET drive/files/{id}/revisions` (last page, last)    |
//! | ensure_folder      | `GET drive/files?q=…`, else `POST drive/files`        |
//! | upload_image       | media upload, metadata patch, public read permission  |
//! | download_image     | `GET` on the image content URI                        |
//!
//! Nothing is retried.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::RemoteConfig;
use crate::remote::{
    BulletPreset, Mutation, RemoteBlock, RemoteComment, RemoteDocument, RemoteElement,
    RemoteReply, TextRange, TextStyle, FIRST_INDEX,
};
use crate::traits::{AssetStore, Transport};

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

pub struct GoogleDocsClient {
    http: Client,
    token: String,
    docs_base: String,
    drive_base: String,
    upload_base: String,
}

impl GoogleDocsClient {
    /// Build a client from config, reading the token from the environment.
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env).with_context(|| {
            format!(
                "{} is not set; export an OAuth access token with Docs and Drive scopes",
                config.token_env
            )
        })?;
        Self::new(config, token)
    }

    pub fn new(config: &RemoteConfig, token: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(GoogleDocsClient {
            http,
            token,
            docs_base: config.docs_base.trim_end_matches('/').to_string(),
            drive_base: config.drive_base.trim_end_matches('/').to_string(),
            upload_base: config.upload_base.trim_end_matches('/').to_string(),
        })
    }

    fn send<T: DeserializeOwned>(&self, what: &str, request: RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .with_context(|| format!("{} request failed", what))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("{} returned {}: {}", what, status, body.trim());
        }
        response
            .json()
            .with_context(|| format!("{} returned an unreadable body", what))
    }

    fn batch_update(&self, doc_id: &str, requests: Vec<Value>) -> Result<()> {
        let url = format!("{}/documents/{}:batchUpdate", self.docs_base, doc_id);
        let _: Value = self.send(
            "documents.batchUpdate",
            self.http.post(url).json(&json!({ "requests": requests })),
        )?;
        Ok(())
    }

    fn fetch_document(&self, doc_id: &str, include_suggestions: bool) -> Result<ApiDocument> {
        let mode = if include_suggestions {
            "SUGGESTIONS_INLINE"
        } else {
            "PREVIEW_WITHOUT_SUGGESTIONS"
        };
        let url = format!("{}/documents/{}", self.docs_base, doc_id);
        self.send(
            "documents.get",
            self.http.get(url).query(&[("suggestionsViewMode", mode)]),
        )
    }

    fn find_file(&self, query: &str) -> Result<Option<String>> {
        let url = format!("{}/files", self.drive_base);
        let list: FileList = self.send(
            "files.list",
            self.http
                .get(url)
                .query(&[("q", query), ("fields", "files(id)"), ("pageSize", "1")]),
        )?;
        Ok(list.files.into_iter().next().map(|f| f.id))
    }
}

/// Escape a value for a Drive query string literal.
fn query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

fn range_json(range: &TextRange) -> Value {
    json!({ "startIndex": range.start, "endIndex": range.end })
}

/// One batchUpdate request for a mutation.
pub fn mutation_request(mutation: &Mutation) -> Value {
    match mutation {
        Mutation::InsertText { index, text } => json!({
            "insertText": { "location": { "index": index }, "text": text }
        }),
        Mutation::UpdateParagraphStyle { range, heading } => json!({
            "updateParagraphStyle": {
                "range": range_json(range),
                "paragraphStyle": { "namedStyleType": format!("HEADING_{}", heading) },
                "fields": "namedStyleType"
            }
        }),
        Mutation::UpdateTextStyle { range, style } => {
            let (text_style, fields) = match style {
                TextStyle::Bold => (json!({ "bold": true }), "bold"),
                TextStyle::Italic => (json!({ "italic": true }), "italic"),
                TextStyle::Underline => (json!({ "underline": true }), "underline"),
                TextStyle::Strikethrough => (json!({ "strikethrough": true }), "strikethrough"),
                TextStyle::Monospace => (
                    json!({ "weightedFontFamily": { "fontFamily": "Courier New" } }),
                    "weightedFontFamily",
                ),
                TextStyle::Code => (
                    json!({
                        "weightedFontFamily": { "fontFamily": "Courier New" },
                        "fontSize": { "magnitude": 10, "unit": "PT" }
                    }),
                    "weightedFontFamily,fontSize",
                ),
                TextStyle::Link(url) => (json!({ "link": { "url": url } }), "link"),
            };
            json!({
                "updateTextStyle": {
                    "range": range_json(range),
                    "textStyle": text_style,
                    "fields": fields
                }
            })
        }
        Mutation::CreateParagraphBullets { range, preset } => json!({
            "createParagraphBullets": {
                "range": range_json(range),
                "bulletPreset": match preset {
                    BulletPreset::Disc => "BULLET_DISC_CIRCLE_SQUARE",
                    BulletPreset::Numbered => "NUMBERED_DECIMAL_ALPHA_ROMAN",
                }
            }
        }),
        Mutation::InsertInlineImage { index, uri } => json!({
            "insertInlineImage": { "location": { "index": index }, "uri": uri }
        }),
    }
}

// Wire shapes, limited to the fields read.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiDocument {
    document_id: String,
    title: String,
    revision_id: Option<String>,
    body: ApiBody,
    inline_objects: HashMap<String, ApiInlineObject>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiBody {
    content: Vec<ApiStructural>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiStructural {
    end_index: Option<usize>,
    paragraph: Option<ApiParagraph>,
    table: Option<ApiTable>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiParagraph {
    elements: Vec<ApiParagraphElement>,
    paragraph_style: ApiParagraphStyle,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiParagraphStyle {
    named_style_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiParagraphElement {
    start_index: usize,
    end_index: usize,
    text_run: Option<ApiTextRun>,
    inline_object_element: Option<ApiInlineObjectElement>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiTextRun {
    content: String,
    suggested_insertion_ids: Vec<String>,
    suggested_deletion_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiInlineObjectElement {
    inline_object_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiTable {
    table_rows: Vec<ApiTableRow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiTableRow {
    table_cells: Vec<ApiTableCell>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiTableCell {
    content: Vec<ApiStructural>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiInlineObject {
    inline_object_properties: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiUser {
    display_name: Option<String>,
    email_address: Option<String>,
}

impl ApiUser {
    fn name(&self) -> String {
        self.email_address
            .clone()
            .or_else(|| self.display_name.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiReply {
    id: String,
    content: String,
    author: ApiUser,
    created_time: Option<DateTime<Utc>>,
    action: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiQuoted {
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiComment {
    id: String,
    content: String,
    author: ApiUser,
    created_time: Option<DateTime<Utc>>,
    resolved: bool,
    deleted: bool,
    quoted_file_content: Option<ApiQuoted>,
    replies: Vec<ApiReply>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CommentList {
    comments: Vec<ApiComment>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RevisionList {
    revisions: Vec<IdOnly>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileList {
    files: Vec<IdOnly>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CreatedDocument {
    document_id: String,
}

fn heading_level(style: &ApiParagraphStyle) -> Option<u8> {
    match style.named_style_type.as_deref()? {
        "TITLE" => Some(1),
        other => other.strip_prefix("HEADING_")?.parse().ok(),
    }
}

fn image_uri(doc: &ApiDocument, object_id: &str) -> Option<String> {
    doc.inline_objects
        .get(object_id)?
        .inline_object_properties
        .pointer("/embeddedObject/imageProperties/contentUri")?
        .as_str()
        .map(str::to_string)
}

fn convert_blocks(doc: &ApiDocument, content: &[ApiStructural]) -> Vec<RemoteBlock> {
    content
        .iter()
        .filter_map(|element| {
            if let Some(paragraph) = &element.paragraph {
                let elements = paragraph
                    .elements
                    .iter()
                    .filter_map(|e| {
                        if let Some(run) = &e.text_run {
                            return Some(RemoteElement::Text {
                                start: e.start_index,
                                end: e.end_index,
                                content: run.content.clone(),
                                suggested_insertions: run.suggested_insertion_ids.clone(),
                                suggested_deletions: run.suggested_deletion_ids.clone(),
                            });
                        }
                        let object = e.inline_object_element.as_ref()?;
                        let uri = image_uri(doc, &object.inline_object_id)?;
                        Some(RemoteElement::InlineImage {
                            start: e.start_index,
                            object_id: object.inline_object_id.clone(),
                            uri,
                        })
                    })
                    .collect();
                return Some(RemoteBlock::Paragraph {
                    heading: heading_level(&paragraph.paragraph_style),
                    elements,
                });
            }
            let table = element.table.as_ref()?;
            Some(RemoteBlock::Table {
                rows: table
                    .table_rows
                    .iter()
                    .map(|row| {
                        row.table_cells
                            .iter()
                            .map(|cell| convert_blocks(doc, &cell.content))
                            .collect()
                    })
                    .collect(),
            })
        })
        .collect()
}

fn convert_document(doc: &ApiDocument) -> RemoteDocument {
    RemoteDocument {
        id: doc.document_id.clone(),
        title: doc.title.clone(),
        revision: doc.revision_id.clone(),
        blocks: convert_blocks(doc, &doc.body.content),
    }
}

fn convert_comment(c: ApiComment) -> RemoteComment {
    RemoteComment {
        author: c.author.name(),
        anchor: c
            .quoted_file_content
            .and_then(|q| q.value)
            .filter(|v| !v.trim().is_empty()),
        replies: c
            .replies
            .into_iter()
            .filter(|r| !r.content.trim().is_empty() || r.action.is_none())
            .map(|r| RemoteReply {
                author: r.author.name(),
                id: r.id,
                created: r.created_time,
                body: r.content,
            })
            .collect(),
        id: c.id,
        created: c.created_time,
        body: c.content,
        resolved: c.resolved,
    }
}

const COMMENT_FIELDS: &str = "nextPageToken,comments(id,content,quotedFileContent,author,createdTime,\
resolved,deleted,replies(id,content,author,createdTime,action))";

impl Transport for GoogleDocsClient {
    fn create_document(&self, title: &str) -> Result<String> {
        let url = format!("{}/documents", self.docs_base);
        let created: CreatedDocument =
            self.send("documents.create", self.http.post(url).json(&json!({ "title": title })))?;
        Ok(created.document_id)
    }

    fn get_document(&self, doc_id: &str, include_suggestions: bool) -> Result<RemoteDocument> {
        Ok(convert_document(&self.fetch_document(doc_id, include_suggestions)?))
    }

    fn clear_content(&self, doc_id: &str) -> Result<()> {
        let doc = self.fetch_document(doc_id, false)?;
        let end = doc
            .body
            .content
            .last()
            .and_then(|e| e.end_index)
            .unwrap_or(FIRST_INDEX);
        // The final newline of the body cannot be deleted.
        if end <= FIRST_INDEX + 1 {
            return Ok(());
        }
        self.batch_update(
            doc_id,
            vec![json!({
                "deleteContentRange": {
                    "range": range_json(&TextRange::new(FIRST_INDEX, end - 1))
                }
            })],
        )
    }

    fn apply_mutations(&self, doc_id: &str, mutations: &[Mutation]) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        self.batch_update(doc_id, mutations.iter().map(mutation_request).collect())
    }

    fn list_comments(&self, doc_id: &str) -> Result<Vec<RemoteComment>> {
        let url = format!("{}/files/{}/comments", self.drive_base, doc_id);
        let mut out = Vec::new();
        let mut page: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(&url)
                .query(&[("fields", COMMENT_FIELDS), ("pageSize", "100")]);
            if let Some(token) = &page {
                request = request.query(&[("pageToken", token)]);
            }
            let list: CommentList = self.send("comments.list", request)?;
            out.extend(
                list.comments
                    .into_iter()
                    .filter(|c| !c.deleted)
                    .map(convert_comment),
            );
            match list.next_page_token {
                Some(token) => page = Some(token),
                None => break,
            }
        }
        Ok(out)
    }

    fn create_comment(&self, doc_id: &str, text: &str) -> Result<String> {
        let url = format!("{}/files/{}/comments", self.drive_base, doc_id);
        let created: IdOnly = self.send(
            "comments.create",
            self.http
                .post(url)
                .query(&[("fields", "id")])
                .json(&json!({ "content": text })),
        )?;
        Ok(created.id)
    }

    fn create_reply(&self, doc_id: &str, comment_id: &str, text: &str) -> Result<String> {
        let url = format!(
            "{}/files/{}/comments/{}/replies",
            self.drive_base, doc_id, comment_id
        );
        let created: IdOnly = self.send(
            "replies.create",
            self.http
                .post(url)
                .query(&[("fields", "id")])
                .json(&json!({ "content": text })),
        )?;
        Ok(created.id)
    }

    fn resolve_comment(&self, doc_id: &str, comment_id: &str) -> Result<()> {
        let url = format!(
            "{}/files/{}/comments/{}/replies",
            self.drive_base, doc_id, comment_id
        );
        let _: IdOnly = self.send(
            "replies.create(resolve)",
            self.http
                .post(url)
                .query(&[("fields", "id")])
                .json(&json!({ "action": "resolve", "content": "" })),
        )?;
        Ok(())
    }

    fn latest_revision(&self, doc_id: &str) -> Result<Option<String>> {
        let url = format!("{}/files/{}/revisions", self.drive_base, doc_id);
        let mut last = None;
        let mut page: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(&url)
                .query(&[("fields", "nextPageToken,revisions(id)"), ("pageSize", "1000")]);
            if let Some(token) = &page {
                request = request.query(&[("pageToken", token)]);
            }
            let list: RevisionList = self.send("revisions.list", request)?;
            if let Some(rev) = list.revisions.into_iter().last() {
                last = Some(rev.id);
            }
            match list.next_page_token {
                Some(token) => page = Some(token),
                None => break,
            }
        }
        Ok(last)
    }
}

impl AssetStore for GoogleDocsClient {
    fn ensure_folder(&self, name: &str, parent: Option<&str>) -> Result<String> {
        let mut query = format!(
            "name='{}' and mimeType='{}' and trashed=false",
            query_literal(name),
            FOLDER_MIME
        );
        if let Some(parent) = parent {
            query.push_str(&format!(" and '{}' in parents", query_literal(parent)));
        }
        if let Some(id) = self.find_file(&query)? {
            return Ok(id);
        }
        let mut metadata = json!({ "name": name, "mimeType": FOLDER_MIME });
        if let Some(parent) = parent {
            metadata["parents"] = json!([parent]);
        }
        let url = format!("{}/files", self.drive_base);
        let created: IdOnly = self.send(
            "files.create(folder)",
            self.http.post(url).query(&[("fields", "id")]).json(&metadata),
        )?;
        tracing::debug!(folder = %name, id = %created.id, "created asset folder");
        Ok(created.id)
    }

    fn upload_image(&self, local: &Path, folder: &str) -> Result<String> {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", local.display()))?;
        let bytes =
            std::fs::read(local).with_context(|| format!("failed to read {}", local.display()))?;
        let mime = mime_for(local);

        let existing = self.find_file(&format!(
            "name='{}' and '{}' in parents and trashed=false",
            query_literal(&name),
            query_literal(folder)
        ))?;
        let id = match existing {
            Some(id) => {
                let url = format!("{}/files/{}", self.upload_base, id);
                let _: IdOnly = self.send(
                    "files.update(media)",
                    self.http
                        .patch(url)
                        .query(&[("uploadType", "media"), ("fields", "id")])
                        .header("Content-Type", mime)
                        .body(bytes),
                )?;
                id
            }
            None => {
                let url = format!("{}/files", self.upload_base);
                let created: IdOnly = self.send(
                    "files.create(media)",
                    self.http
                        .post(url)
                        .query(&[("uploadType", "media"), ("fields", "id")])
                        .header("Content-Type", mime)
                        .body(bytes),
                )?;
                let url = format!("{}/files/{}", self.drive_base, created.id);
                let _: IdOnly = self.send(
                    "files.update(metadata)",
                    self.http
                        .patch(url)
                        .query(&[("addParents", folder), ("fields", "id")])
                        .json(&json!({ "name": name })),
                )?;
                created.id
            }
        };

        // The Docs API fetches inline images anonymously.
        let url = format!("{}/files/{}/permissions", self.drive_base, id);
        let _: Value = self.send(
            "permissions.create",
            self.http
                .post(url)
                .json(&json!({ "role": "reader", "type": "anyone" })),
        )?;
        Ok(format!("https://drive.google.com/uc?export=download&id={}", id))
    }

    fn download_image(&self, uri: &str, dest: &Path) -> Result<()> {
        let response = self
            .http
            .get(uri)
            .send()
            .with_context(|| format!("download of {} failed", uri))?;
        let status = response.status();
        if !status.is_success() {
            bail!("download of {} returned {}", uri, status);
        }
        let bytes = response.bytes()?;
        std::fs::write(dest, &bytes).with_context(|| format!("failed to write {}", dest.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn text_style_requests_name_their_fields() {
        let req = mutation_request(&Mutation::UpdateTextStyle {
            range: TextRange::new(19, 25),
            style: TextStyle::Italic,
        });
        assert_eq!(
            req,
            json!({"updateTextStyle": {
                "range": {"startIndex": 19, "endIndex": 25},
                "textStyle": {"italic": true},
                "fields": "italic"
            }})
        );
        let code = mutation_request(&Mutation::UpdateTextStyle {
            range: TextRange::new(1, 4),
            style: TextStyle::Code,
        });
        assert_eq!(code["updateTextStyle"]["fields"], "weightedFontFamily,fontSize");
    }

    #[test]
    fn structural_requests() {
        assert_eq!(
            mutation_request(&Mutation::InsertText { index: 1, text: "Hi\n".into() }),
            json!({"insertText": {"location": {"index": 1}, "text": "Hi\n"}})
        );
        let heading = mutation_request(&Mutation::UpdateParagraphStyle {
            range: TextRange::new(1, 14),
            heading: 2,
        });
        assert_eq!(heading["updateParagraphStyle"]["paragraphStyle"]["namedStyleType"], "HEADING_2");
        let bullets = mutation_request(&Mutation::CreateParagraphBullets {
            range: TextRange::new(1, 9),
            preset: BulletPreset::Numbered,
        });
        assert_eq!(bullets["createParagraphBullets"]["bulletPreset"], "NUMBERED_DECIMAL_ALPHA_ROMAN");
    }

    #[test]
    fn documents_parse_from_api_json() {
        let raw = json!({
            "documentId": "d1",
            "title": "Plan",
            "revisionId": "r9",
            "body": {"content": [
                {"endIndex": 1, "sectionBreak": {}},
                {"startIndex": 1, "endIndex": 7, "paragraph": {
                    "paragraphStyle": {"namedStyleType": "HEADING_1"},
                    "elements": [{"startIndex": 1, "endIndex": 7, "textRun": {"content": "Intro\n"}}]
                }},
                {"startIndex": 7, "endIndex": 20, "paragraph": {
                    "paragraphStyle": {"namedStyleType": "NORMAL_TEXT"},
                    "elements": [
                        {"startIndex": 7, "endIndex": 11, "textRun": {"content": "New ", "suggestedInsertionIds": ["suggest.1"]}},
                        {"startIndex": 11, "endIndex": 12, "inlineObjectElement": {"inlineObjectId": "kix.a"}},
                        {"startIndex": 12, "endIndex": 20, "textRun": {"content": "content\n"}}
                    ]
                }}
            ]},
            "inlineObjects": {"kix.a": {"inlineObjectProperties": {"embeddedObject": {
                "imageProperties": {"contentUri": "https://lh3.example/img"}
            }}}}
        });
        let api: ApiDocument = serde_json::from_value(raw).unwrap();
        let doc = convert_document(&api);
        assert_eq!(doc.revision.as_deref(), Some("r9"));
        assert_eq!(doc.blocks.len(), 2);
        assert!(matches!(&doc.blocks[0], RemoteBlock::Paragraph { heading: Some(1), .. }));
        match &doc.blocks[1] {
            RemoteBlock::Paragraph { heading: None, elements } => {
                assert_eq!(elements.len(), 3);
                assert!(matches!(
                    &elements[1],
                    RemoteElement::InlineImage { start: 11, uri, .. } if uri == "https://lh3.example/img"
                ));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn comments_parse_and_drop_resolve_markers() {
        let raw = json!({"comments": [{
            "id": "c1",
            "content": "Why?",
            "author": {"displayName": "Ana"},
            "createdTime": "2024-01-15T10:30:00.000Z",
            "resolved": true,
            "quotedFileContent": {"mimeType": "text/html", "value": "Ship it"},
            "replies": [
                {"id": "r1", "content": "Because.", "author": {"displayName": "Bo"}, "createdTime": "2024-01-16T08:00:00Z"},
                {"id": "r2", "content": "", "action": "resolve", "author": {"displayName": "Ana"}}
            ]
        }]});
        let list: CommentList = serde_json::from_value(raw).unwrap();
        let comments: Vec<RemoteComment> = list.comments.into_iter().map(convert_comment).collect();
        assert_eq!(comments[0].author, "Ana");
        assert_eq!(comments[0].anchor.as_deref(), Some("Ship it"));
        assert!(comments[0].resolved);
        assert_eq!(comments[0].replies.len(), 1);
        assert_eq!(comments[0].replies[0].author, "Bo");
    }

    #[test]
    fn drive_query_literals_are_escaped() {
        assert_eq!(query_literal("Bob's \\ notes"), "Bob\\'s \\\\ notes");
        assert_eq!(mime_for(Path::new("a/b.SVG")), "image/svg+xml");
        assert_eq!(mime_for(Path::new("a/b.bin")), "application/octet-stream");
    }
}
