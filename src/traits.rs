//! Collaborator seams.
//!
//! The sync core never talks to the network or spawns processes itself. It
//! goes through three traits:
//!
//! ```text
//!            ┌──────────────┐
//!  push/pull │  Transport   │  documents, comments, revisions
//!  ─────────►├──────────────┤
//!            │  AssetStore  │  image upload / download
//!            ├──────────────┤
//!            │  Renderer    │  code block → figure files
//!            └──────────────┘
//! ```
//!
//! Implementations: [`GoogleDocsClient`](crate::gdocs::GoogleDocsClient)
//! for the first two against the Google REST APIs,
//! [`InMemoryRemote`](crate::memory::InMemoryRemote) for tests, and
//! [`CommandRenderer`](crate::render::CommandRenderer) for rendering.
//!
//! Calls are blocking request/response. Failures are reported once and
//! never retried; the orchestrator turns them into
//! [`SyncError::TransportFailure`](crate::error::SyncError::TransportFailure).

use std::path::Path;

use anyhow::Result;

use crate::remote::{Mutation, RemoteComment, RemoteDocument};

/// Remote document and comment service.
pub trait Transport: Send + Sync {
    /// Create an empty remote document, returning its id.
    fn create_document(&self, title: &str) -> Result<String>;

    /// Fetch the body. With `include_suggestions` reviewer suggestions are
    /// expanded inline and tagged with their ids.
    fn get_document(&self, doc_id: &str, include_suggestions: bool) -> Result<RemoteDocument>;

    /// Delete everything after the first writable index.
    fn clear_content(&self, doc_id: &str) -> Result<()>;

    fn apply_mutations(&self, doc_id: &str, mutations: &[Mutation]) -> Result<()>;

    fn list_comments(&self, doc_id: &str) -> Result<Vec<RemoteComment>>;

    fn create_comment(&self, doc_id: &str, text: &str) -> Result<String>;

    fn create_reply(&self, doc_id: &str, comment_id: &str, text: &str) -> Result<String>;

    fn resolve_comment(&self, doc_id: &str, comment_id: &str) -> Result<()>;

    /// Newest revision token, if the service exposes one.
    fn latest_revision(&self, doc_id: &str) -> Result<Option<String>>;
}

/// Binary asset storage for figures and images.
pub trait AssetStore: Send + Sync {
    /// Find or create a folder named `name`, returning its reference.
    fn ensure_folder(&self, name: &str, parent: Option<&str>) -> Result<String>;

    /// Upload a local image into `folder`, returning a URI the remote
    /// document can embed.
    fn upload_image(&self, local: &Path, folder: &str) -> Result<String>;

    fn download_image(&self, uri: &str, dest: &Path) -> Result<()>;
}

/// Produces the output files of code blocks that request file output.
pub trait Renderer: Send + Sync {
    fn render(&self, document_path: &Path) -> Result<()>;
}
