//! # orgsync CLI
//!
//! Every command takes the outline path and prints one result on stdout,
//! as an Emacs Lisp plist by default or JSON with `--json`. Logs and
//! progress go to stderr.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `orgsync init <file>` | Create (or link with `--gdoc-id`) the remote document |
//! | `orgsync push <file>` | Replace the remote body, send replies and resolutions |
//! | `orgsync pull <file>` | Merge remote comments and suggestions into the outline |
//! | `orgsync status <file>` | Sync state and annotation counts |
//! | `orgsync list <file>` | Annotations, optionally filtered by kind |
//! | `orgsync integrate <file> <id>` | Mark a suggestion as merged |
//! | `orgsync resolve <file> <id>` | Mark a comment resolved |
//! | `orgsync reply <file> <id> <text>` | Queue a reply for the next push |
//!
//! Failures print `(:status "error" :code "…" :message "…")` (or
//! `"conflict"` for conflict gates) and exit with status 1.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};

use orgsync::config::{resolve_config, Config};
use orgsync::error::SyncError;
use orgsync::gdocs::GoogleDocsClient;
use orgsync::lifecycle::KindFilter;
use orgsync::output::{self, OutputFormat};
use orgsync::progress::ProgressMode;
use orgsync::pull::{pull, PullOptions};
use orgsync::push::{push, PushOptions};
use orgsync::render::CommandRenderer;
use orgsync::sync::{self, Collaborators};

/// Sync org-mode outlines with Google Docs.
#[derive(Parser)]
#[command(
    name = "orgsync",
    version,
    about = "Keep org-mode outlines and Google Docs in step",
    long_about = "orgsync publishes an org-mode outline to a Google Docs document and brings \
    reviewer comments and suggestions back into the outline, where they are tracked until \
    resolved, integrated and archived."
)]
struct Cli {
    /// Path to the configuration file (TOML).
    ///
    /// Defaults to `~/.config/orgsync/orgsync.toml`; built-in defaults
    /// apply when that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON instead of an Elisp plist.
    #[arg(long, global = true)]
    json: bool,

    /// Progress on stderr. Defaults to `human` on a terminal, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    All,
    Comments,
    Suggestions,
}

impl From<KindArg> for KindFilter {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::All => KindFilter::All,
            KindArg::Comments => KindFilter::Comments,
            KindArg::Suggestions => KindFilter::Suggestions,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a remote document for the outline, or link an existing one.
    Init {
        file: PathBuf,
        /// Title of the new document. Defaults to `#+TITLE`, then the file name.
        #[arg(long)]
        title: Option<String>,
        /// Link this existing document instead of creating one.
        #[arg(long)]
        gdoc_id: Option<String>,
    },

    /// Replace the remote body with the outline and send queued actions.
    Push {
        file: PathBuf,
        /// Overwrite even if the remote changed since the last sync.
        #[arg(long)]
        force: bool,
    },

    /// Merge remote comments and suggestions into the outline.
    Pull {
        file: PathBuf,
        /// Merge even though the outline changed since the last sync.
        #[arg(long)]
        force: bool,
        /// Write `<file>.backup.<mtime>` first; implies proceeding.
        #[arg(long)]
        backup: bool,
    },

    /// Show sync state and annotation counts.
    Status { file: PathBuf },

    /// List annotations.
    List {
        file: PathBuf,
        #[arg(long = "type", value_enum, default_value = "all")]
        kind: KindArg,
        /// Include archived annotations.
        #[arg(long)]
        all: bool,
    },

    /// Mark a suggestion as integrated into the outline.
    Integrate { file: PathBuf, id: String },

    /// Mark a comment as resolved; the remote thread is resolved on push.
    Resolve { file: PathBuf, id: String },

    /// Queue a reply to a comment; it is sent on the next push.
    Reply {
        file: PathBuf,
        id: String,
        text: String,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    resolve_config(cli.config.as_deref())
        .map_err(|e| anyhow::Error::new(SyncError::Config(format!("{:#}", e))))
}

fn progress_mode(arg: Option<ProgressArg>) -> ProgressMode {
    match arg {
        None => ProgressMode::default_for_tty(),
        Some(ProgressArg::Off) => ProgressMode::Off,
        Some(ProgressArg::Human) => ProgressMode::Human,
        Some(ProgressArg::Json) => ProgressMode::Json,
    }
}

fn remote_client(config: &Config) -> Result<GoogleDocsClient> {
    GoogleDocsClient::from_config(&config.remote)
        .map_err(|e| anyhow::Error::new(SyncError::Config(format!("{:#}", e))))
}

fn with_collaborators<T>(
    cli: &Cli,
    config: &Config,
    run: impl FnOnce(&Collaborators) -> Result<T>,
) -> Result<T> {
    let client = remote_client(config)?;
    let renderer = CommandRenderer::from_config(&config.render);
    let reporter = progress_mode(cli.progress).reporter();
    let collab = Collaborators {
        transport: &client,
        assets: &client,
        renderer: &renderer,
        progress: reporter.as_ref(),
    };
    run(&collab)
}

fn run(cli: &Cli) -> Result<Value> {
    match &cli.command {
        Commands::Init {
            file,
            title,
            gdoc_id,
        } => {
            let config = load_config(cli)?;
            let client = remote_client(&config)?;
            let report = sync::init(file, &client, title.as_deref(), gdoc_id.as_deref())?;
            output::success(&report)
        }
        Commands::Push { file, force } => {
            let config = load_config(cli)?;
            let report = with_collaborators(cli, &config, |collab| {
                Ok(push(file, collab, &config, PushOptions { force: *force })?)
            })?;
            output::success(&report)
        }
        Commands::Pull {
            file,
            force,
            backup,
        } => {
            let config = load_config(cli)?;
            let options = PullOptions {
                force: *force,
                backup: *backup,
            };
            let report =
                with_collaborators(cli, &config, |collab| Ok(pull(file, collab, &config, options)?))?;
            output::success(&report)
        }
        Commands::Status { file } => output::success(&sync::status(file)?),
        Commands::List { file, kind, all } => {
            let annotations = sync::list(file, (*kind).into(), *all)?;
            output::success(&json!({ "count": annotations.len(), "annotations": annotations }))
        }
        Commands::Integrate { file, id } => output::success(&sync::integrate(file, id)?),
        Commands::Resolve { file, id } => output::success(&sync::resolve(file, id)?),
        Commands::Reply { file, id, text } => {
            let config = load_config(cli)?;
            output::success(&sync::reply(file, id, &config.sync.author, text)?)
        }
    }
}

fn error_payload(err: &anyhow::Error) -> Value {
    match err.downcast_ref::<SyncError>() {
        Some(sync_err) => {
            let status = match sync_err {
                SyncError::ConflictDetected { .. } => "conflict",
                _ => "error",
            };
            json!({ "status": status, "code": sync_err.code(), "message": sync_err.to_string() })
        }
        None => json!({ "status": "error", "code": "internal", "message": format!("{:#}", err) }),
    }
}

fn file_of(command: &Commands) -> &Path {
    match command {
        Commands::Init { file, .. }
        | Commands::Push { file, .. }
        | Commands::Pull { file, .. }
        | Commands::Status { file }
        | Commands::List { file, .. }
        | Commands::Integrate { file, .. }
        | Commands::Resolve { file, .. }
        | Commands::Reply { file, .. } => file,
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing();
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Plist
    };

    match run(&cli) {
        Ok(value) => {
            if let Err(e) = output::print_output(&value, format) {
                eprintln!("error: failed to render output: {:#}", e);
                std::process::exit(1);
            }
        }
        Err(err) => {
            tracing::debug!(file = %file_of(&cli.command).display(), error = %format!("{:#}", err), "command failed");
            let payload = error_payload(&err);
            if output::print_output(&payload, format).is_err() {
                eprintln!("error: {:#}", err);
            }
            std::process::exit(1);
        }
    }
}
