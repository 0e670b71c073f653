//! Command result rendering for editors and scripts.
//!
//! Results go to stdout either as an Emacs Lisp property list (the default,
//! read directly by the editor integration) or as JSON with `--json`.
//!
//! | JSON                  | plist                      |
//! |-----------------------|----------------------------|
//! | `{"gdoc_id": "x"}`    | `(:gdoc-id "x")`           |
//! | `true` / `false`      | `t` / `nil`                |
//! | `null`                | `nil`                      |
//! | `[1, 2]`              | `(1 2)`                    |
//! | `"a\"b"`              | `"a\"b"`                   |

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Plist,
    Json,
}

/// `gdoc_id` → `gdoc-id`, `lastSync` → `last-sync`.
fn kebab(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, c) in key.chars().enumerate() {
        if c == '_' {
            out.push('-');
        } else if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => Some("nil".to_string()),
        Value::Bool(true) => Some("t".to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(quote(s)),
        Value::Array(items) if items.is_empty() => Some("()".to_string()),
        Value::Object(map) if map.is_empty() => Some("()".to_string()),
        _ => None,
    }
}

/// Single-line plist.
pub fn to_plist(value: &Value) -> String {
    if let Some(s) = scalar(value) {
        return s;
    }
    let parts: Vec<String> = match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!(":{} {}", kebab(k), to_plist(v)))
            .collect(),
        Value::Array(items) => items.iter().map(to_plist).collect(),
        _ => unreachable!("scalars handled above"),
    };
    format!("({})", parts.join(" "))
}

/// Plist with one key per line and each object of a list on its own line.
pub fn to_plist_pretty(value: &Value) -> String {
    pretty(value, 0)
}

fn pretty(value: &Value, indent: usize) -> String {
    if let Some(s) = scalar(value) {
        return s;
    }
    let sep = format!("\n{} ", " ".repeat(indent));
    match value {
        Value::Object(map) => {
            let lines: Vec<String> = map
                .iter()
                .map(|(k, v)| format!(":{} {}", kebab(k), pretty(v, indent + 1)))
                .collect();
            format!("({})", lines.join(&sep))
        }
        Value::Array(items) if items.first().is_some_and(Value::is_object) => {
            let parts: Vec<String> = items.iter().map(|v| pretty(v, indent + 1)).collect();
            format!("({})", parts.join(&sep))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(|v| pretty(v, indent)).collect();
            format!("({})", parts.join(" "))
        }
        _ => unreachable!("scalars handled above"),
    }
}

pub fn render<T: Serialize>(data: &T, format: OutputFormat) -> anyhow::Result<String> {
    let value = serde_json::to_value(data)?;
    Ok(match format {
        OutputFormat::Plist => to_plist_pretty(&value),
        OutputFormat::Json => serde_json::to_string_pretty(&value)?,
    })
}

/// Wrap a command payload as `{status: "success", ...payload}`.
pub fn success<T: Serialize>(payload: &T) -> anyhow::Result<Value> {
    let mut out = serde_json::Map::new();
    out.insert("status".to_string(), Value::from("success"));
    match serde_json::to_value(payload)? {
        Value::Object(map) => out.extend(map),
        Value::Null => {}
        other => {
            out.insert("data".to_string(), other);
        }
    }
    Ok(Value::Object(out))
}

pub fn print_output<T: Serialize>(data: &T, format: OutputFormat) -> anyhow::Result<()> {
    println!("{}", render(data, format)?);
    Ok(())
}
