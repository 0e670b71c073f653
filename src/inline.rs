//! Inline markup: `*strong*`, `/emphasis/`, `_underline_`, `+strike+`,
//! `~code~` / `=verbatim=` and `[[target][description]]` links.
//!
//! [`parse_inline`] strips the markers and records [`StyleSpan`]s over the
//! remaining text; [`render_inline`] writes them back. Both the parser and
//! the serializer go through this module so the two stay inverse.
//!
//! Markup does not nest. A marker only opens or closes an emphasis when the
//! neighbouring character is not alphanumeric, so `snake_case_name` and
//! `a/b/c` stay plain text.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{InlineStyle, StyleSpan, TextRun};

#[derive(Clone, Copy, Debug)]
enum Markup {
    Link,
    Marker(char),
}

struct Pattern {
    re: Regex,
    markup: Markup,
}

fn patterns() -> &'static [Pattern] {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let mut out = vec![
            Pattern {
                re: Regex::new(r"\[\[([^\]\[]+)\](?:\[([^\]\[]+)\])?\]").expect("link pattern"),
                markup: Markup::Link,
            },
        ];
        for marker in ['*', '/', '_', '+', '~', '='] {
            let m = regex::escape(&marker.to_string());
            let re = Regex::new(&format!(r"{m}([^\s{m}](?:[^{m}]*[^\s{m}])?){m}"))
                .expect("marker pattern");
            out.push(Pattern {
                re,
                markup: Markup::Marker(marker),
            });
        }
        out
    })
}

struct Candidate {
    start: usize,
    end: usize,
    display: String,
    style: InlineStyle,
}

fn style_for(marker: char) -> InlineStyle {
    let mut style = InlineStyle::default();
    match marker {
        '*' => style.strong = true,
        '/' => style.emphasis = true,
        '_' => style.underline = true,
        '+' => style.strike = true,
        '=' => style.verbatim = true,
        _ => style.monospace = true,
    }
    style
}

fn is_boundary(c: Option<char>, marker: char) -> bool {
    match c {
        None => true,
        Some(c) => !c.is_alphanumeric() && c != marker,
    }
}

fn next_char_boundary(text: &str, from: usize) -> usize {
    let mut pos = from + 1;
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

fn candidates(text: &str) -> Vec<Candidate> {
    let mut found = Vec::new();
    for pattern in patterns() {
        let mut pos = 0;
        while pos <= text.len() {
            let Some(caps) = pattern.re.captures_at(text, pos) else {
                break;
            };
            let Some(whole) = caps.get(0) else { break };
            let inner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let accepted = match pattern.markup {
                Markup::Link => true,
                Markup::Marker(marker) => {
                    is_boundary(text[..whole.start()].chars().next_back(), marker)
                        && is_boundary(text[whole.end()..].chars().next(), marker)
                }
            };
            if !accepted {
                pos = next_char_boundary(text, whole.start());
                continue;
            }
            let candidate = match pattern.markup {
                Markup::Link => {
                    let description = caps.get(2).map(|m| m.as_str());
                    Candidate {
                        start: whole.start(),
                        end: whole.end(),
                        display: description.unwrap_or(inner).to_string(),
                        style: InlineStyle {
                            link: Some(inner.to_string()),
                            ..Default::default()
                        },
                    }
                }
                Markup::Marker(marker) => Candidate {
                    start: whole.start(),
                    end: whole.end(),
                    display: inner.to_string(),
                    style: style_for(marker),
                },
            };
            found.push(candidate);
            pos = whole.end();
        }
    }
    found
}

/// Strip inline markup from `text`, recording spans over the stripped text.
pub fn parse_inline(text: &str) -> TextRun {
    let mut found = candidates(text);
    // Earliest match wins; on a tie the longer one.
    found.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut run = TextRun::default();
    let mut pos = 0;
    for cand in found {
        if cand.start < pos {
            continue;
        }
        run.text.push_str(&text[pos..cand.start]);
        let start = run.text.len();
        run.text.push_str(&cand.display);
        run.spans.push(StyleSpan {
            start,
            end: run.text.len(),
            style: cand.style,
        });
        pos = cand.end;
    }
    run.text.push_str(&text[pos..]);
    run
}

fn wrap(inner: &str, style: &InlineStyle) -> String {
    if let Some(target) = &style.link {
        return if inner == target {
            format!("[[{}]]", target)
        } else {
            format!("[[{}][{}]]", target, inner)
        };
    }
    let mut out = inner.to_string();
    for (on, marker) in [
        (style.monospace, '~'),
        (style.verbatim, '='),
        (style.strike, '+'),
        (style.underline, '_'),
        (style.emphasis, '/'),
        (style.strong, '*'),
    ] {
        if on {
            out = format!("{marker}{out}{marker}");
        }
    }
    out
}

/// Write a run back as org text.
pub fn render_inline(run: &TextRun) -> String {
    let mut spans: Vec<&StyleSpan> = run.spans.iter().collect();
    spans.sort_by_key(|s| s.start);

    let mut out = String::with_capacity(run.text.len() + spans.len() * 2);
    let mut pos = 0;
    for span in spans {
        let (Some(before), Some(inner)) = (
            run.text.get(pos..span.start),
            run.text.get(span.start..span.end),
        ) else {
            continue;
        };
        out.push_str(before);
        out.push_str(&wrap(inner, &span.style));
        pos = span.end;
    }
    out.push_str(run.text.get(pos..).unwrap_or_default());
    out
}
