//! Figure rendering for code blocks that write a file.
//!
//! A block whose header arguments carry `:file PATH` is a render target
//! unless it also says `:exports code` or `:eval no`. Rendering is the
//! external renderer's job; this module only finds the targets, names their
//! outputs and checks the outputs exist afterwards.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;

use crate::config::RenderConfig;
use crate::error::{RenderFailure, SyncError, SyncResult};
use crate::models::{CodeBlock, Document, Node, NodePath};
use crate::traits::Renderer;

/// `:file out.svg :exports results` → {file: out.svg, exports: results}.
///
/// A key is a whitespace-separated token starting with `:`. Everything up to
/// the next key is its value, so values may hold spaces or colons. Double
/// quotes group a token and are dropped.
pub fn parse_header_args(args: &str) -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    let mut key: Option<String> = None;
    let mut value: Vec<String> = Vec::new();
    for (token, quoted) in header_tokens(args) {
        if !quoted && token.len() > 1 && token.starts_with(':') {
            if let Some(k) = key.take() {
                out.insert(k, value.join(" "));
            }
            key = Some(token[1..].to_string());
            value.clear();
        } else if key.is_some() {
            value.push(token);
        }
    }
    if let Some(k) = key {
        out.insert(k, value.join(" "));
    }
    out
}

/// Whitespace-separated tokens, with `"…"` kept together. The flag marks
/// tokens that had quotes.
fn header_tokens(args: &str) -> Vec<(String, bool)> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    for c in args.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() || quoted {
                    tokens.push((std::mem::take(&mut current), quoted));
                }
                quoted = false;
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() || quoted {
        tokens.push((current, quoted));
    }
    tokens
}

/// Declared output of a block, as written in its `:file` argument.
pub fn declared_output(block: &CodeBlock) -> Option<String> {
    let args = parse_header_args(block.header_args.as_deref()?);
    if args.get("exports").is_some_and(|v| v == "code") || args.get("eval").is_some_and(|v| v == "no")
    {
        return None;
    }
    args.get("file").cloned()
}

/// Where a declared output lands, relative to the outline's directory.
pub fn output_path(declared: &str, base_dir: &Path) -> PathBuf {
    let path = Path::new(declared);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderTarget {
    pub path: NodePath,
    pub language: Option<String>,
    pub declared: String,
    pub output: PathBuf,
}

pub fn find_render_targets(doc: &Document, base_dir: &Path) -> Vec<RenderTarget> {
    fn walk(nodes: &[Node], prefix: &NodePath, base_dir: &Path, out: &mut Vec<RenderTarget>) {
        for (i, node) in nodes.iter().enumerate() {
            match node {
                Node::Code(block) => {
                    if let Some(declared) = declared_output(block) {
                        out.push(RenderTarget {
                            path: prefix.child(i),
                            language: block.language.clone(),
                            output: output_path(&declared, base_dir),
                            declared,
                        });
                    }
                }
                Node::Section(section) => walk(&section.children, &prefix.child(i), base_dir, out),
                _ => {}
            }
        }
    }
    let mut out = Vec::new();
    walk(&doc.content, &NodePath::default(), base_dir, &mut out);
    out
}

/// Every target whose output is missing, reported together.
pub fn verify_outputs(targets: &[RenderTarget]) -> SyncResult<()> {
    let failures: Vec<RenderFailure> = targets
        .iter()
        .filter(|t| !t.output.is_file())
        .map(|t| RenderFailure {
            output: PathBuf::from(&t.declared),
            reason: "expected output missing after render".to_string(),
        })
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(SyncError::RenderingFailure { failures })
    }
}

/// Runs an external program over the outline file, e.g. Emacs in batch
/// mode executing every babel block. The file itself is not modified.
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
}

impl CommandRenderer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        CommandRenderer {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }

    fn command_args(&self, document_path: &Path) -> Vec<String> {
        let file = document_path.display().to_string();
        self.args.iter().map(|a| a.replace("{file}", &file)).collect()
    }
}

impl Renderer for CommandRenderer {
    fn render(&self, document_path: &Path) -> Result<()> {
        let args = self.command_args(document_path);
        tracing::debug!(program = %self.program, ?args, "running renderer");
        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(document_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new(".")))
            .output()
            .with_context(|| format!("failed to start renderer `{}`", self.program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            bail!(
                "`{}` exited with {}: {}",
                self.program,
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            );
        }
        Ok(())
    }
}
