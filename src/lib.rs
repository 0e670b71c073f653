//! # orgsync
//!
//! Keep an org-mode outline and a Google Docs document in step, with
//! reviewer feedback tracked inside the outline itself.
//!
//! The outline is the source of truth for content: push replaces the remote
//! body with a rendering of the outline. Reviewers work in the remote
//! document; pull brings their comments and suggestions back as annotation
//! entries under `GDOCS_ANNOTATIONS` headings, where they move through a
//! small lifecycle until a later push confirms their disposition and moves
//! them under `GDOCS_ARCHIVE`. All sync state lives in the file.
//!
//! ## Architecture
//!
//! ```text
//!             parse                 convert                 Transport
//!  .org ───────────────▶ Document ───────────▶ Mutations ──────────────▶ remote
//!   ▲                      │  ▲                                            │
//!   │        write         │  │ merge           extract                    │
//!   └──────────────────────┘  └──────────── Annotations ◀──────────────────┘
//!                                                        comments, suggestions
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export ORGSYNC_ACCESS_TOKEN=$(gcloud auth print-access-token)
//! orgsync init notes.org          # create the remote document
//! orgsync push notes.org          # publish the outline
//! orgsync pull notes.org          # bring back comments and suggestions
//! orgsync list notes.org
//! orgsync reply notes.org <id> "Fixed in the next draft"
//! orgsync resolve notes.org <id>
//! orgsync push notes.org          # sends replies, resolves, archives
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Document tree, annotations, metadata keys |
//! | [`inline`] | Inline markup spans |
//! | [`parser`] | Outline text → [`models::Document`] |
//! | [`writer`] | [`models::Document`] → outline text |
//! | [`lifecycle`] | Annotation states and transitions |
//! | [`forward`] | Document → remote mutations and side actions |
//! | [`reverse`] | Remote snapshot and comments → annotations |
//! | [`render`] | Figure rendering for code blocks |
//! | [`conflict`] | Local and remote conflict gates, backups |
//! | [`sync`] | Shared orchestration, init, status, local commands |
//! | [`push`] / [`pull`] | The two sync directions |
//! | [`traits`] / [`remote`] | Collaborator seams and the remote vocabulary |
//! | [`gdocs`] | Google Docs / Drive REST adapter |
//! | [`memory`] | In-memory remote |
//! | [`config`] | TOML configuration |
//! | [`output`] | Plist / JSON command output |
//! | [`progress`] | Progress reporting on stderr |

pub mod config;
pub mod conflict;
pub mod error;
pub mod forward;
pub mod gdocs;
pub mod inline;
pub mod lifecycle;
pub mod memory;
pub mod models;
pub mod output;
pub mod parser;
pub mod progress;
pub mod pull;
pub mod push;
pub mod remote;
pub mod render;
pub mod reverse;
pub mod sync;
pub mod traits;
pub mod writer;
