use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_docs_base")]
    pub docs_base: String,
    #[serde(default = "default_drive_base")]
    pub drive_base: String,
    #[serde(default = "default_upload_base")]
    pub upload_base: String,
    /// Environment variable holding the OAuth access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            docs_base: default_docs_base(),
            drive_base: default_drive_base(),
            upload_base: default_upload_base(),
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_docs_base() -> String {
    "https://docs.googleapis.com/v1".to_string()
}
fn default_drive_base() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}
fn default_upload_base() -> String {
    "https://www.googleapis.com/upload/drive/v3".to_string()
}
fn default_token_env() -> String {
    "ORGSYNC_ACCESS_TOKEN".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_render_program")]
    pub program: String,
    /// `{file}` is replaced by the outline path.
    #[serde(default = "default_render_args")]
    pub args: Vec<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            program: default_render_program(),
            args: default_render_args(),
        }
    }
}

fn default_render_program() -> String {
    "emacs".to_string()
}
fn default_render_args() -> Vec<String> {
    vec![
        "--batch".to_string(),
        "{file}".to_string(),
        "--eval".to_string(),
        "(progn (require 'ob) (setq org-confirm-babel-evaluate nil) (org-babel-execute-buffer))"
            .to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssetsConfig {
    /// Remote folder for uploads is `<title><folder_suffix>`.
    #[serde(default = "default_asset_suffix")]
    pub folder_suffix: String,
    #[serde(default)]
    pub parent_folder: Option<String>,
    /// Downloaded images go to `<outline stem><download_dir_suffix>/`.
    #[serde(default = "default_asset_suffix")]
    pub download_dir_suffix: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            folder_suffix: default_asset_suffix(),
            parent_folder: None,
            download_dir_suffix: default_asset_suffix(),
        }
    }
}

fn default_asset_suffix() -> String {
    "_assets".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Author recorded on locally queued replies.
    #[serde(default = "default_author")]
    pub author: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            author: default_author(),
        }
    }
}

fn default_author() -> String {
    "me".to_string()
}

/// `$XDG_CONFIG_HOME/orgsync/orgsync.toml`, falling back to `~/.config`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|d| !d.is_empty()) {
        return Some(PathBuf::from(dir).join("orgsync").join("orgsync.toml"));
    }
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("orgsync")
            .join("orgsync.toml")
    })
}

/// An explicit path must exist. Without one, a missing default file means
/// built-in defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => load_config(path),
        None => match default_config_path() {
            Some(path) if path.is_file() => load_config(&path),
            _ => Ok(Config::default()),
        },
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    for (key, value) in [
        ("remote.docs_base", &config.remote.docs_base),
        ("remote.drive_base", &config.remote.drive_base),
        ("remote.upload_base", &config.remote.upload_base),
    ] {
        if !value.starts_with("http://") && !value.starts_with("https://") {
            anyhow::bail!("{} must be an http(s) URL, got '{}'", key, value);
        }
    }

    if config.remote.token_env.trim().is_empty() {
        anyhow::bail!("remote.token_env must not be empty");
    }

    if config.remote.timeout_secs == 0 {
        anyhow::bail!("remote.timeout_secs must be > 0");
    }

    if config.render.program.trim().is_empty() {
        anyhow::bail!("render.program must not be empty");
    }

    if !config.render.args.iter().any(|a| a.contains("{file}")) {
        anyhow::bail!("render.args must reference the outline with '{{file}}'");
    }

    if config.assets.download_dir_suffix.contains('/') || config.assets.download_dir_suffix.is_empty() {
        anyhow::bail!(
            "assets.download_dir_suffix must be a non-empty name without '/', got '{}'",
            config.assets.download_dir_suffix
        );
    }

    Ok(())
}
