//! Wikitext → plain text rendering.
//!
//! This is the first step of normalization and sits behind the
//! [`MarkupStripper`] trait so the normalizer can be driven by any renderer.
//! [`WikitextStripper`] keeps visible prose only: templates, tables, comments,
//! references, file and category links disappear; links collapse to their
//! label; headings collapse to their title on a line of their own.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static COMMENT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?(?:-->|\z)").unwrap());

static REF_SELF_CLOSING_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<ref\b[^>]*/>").unwrap());

static REF_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<ref\b[^>]*>.*?</ref\s*>").unwrap());

/// Tags whose content is not visible prose
static INVISIBLE_TAG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(gallery|math|score|timeline|syntaxhighlight|templatedata)\b[^>]*>.*?</(?:gallery|math|score|timeline|syntaxhighlight|templatedata)\s*>").unwrap()
});

static EXTERNAL_LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(?:https?:|ftp:)?//[^\s\]]+(?:\s+([^\]]*))?\]").unwrap());

static HEADING_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(={1,6})[ \t]*(.+?)[ \t]*={1,6}[ \t]*$").unwrap());

static HTML_TAG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?[a-zA-Z][a-zA-Z0-9]*(?:\s[^<>]*)?/?>").unwrap());

static EMPHASIS_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"'{2,}").unwrap());

static LIST_MARKER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[*#:;]+[ \t]*").unwrap());

static RULE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^-{4,}[ \t]*$").unwrap());

static MAGIC_WORD_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"__[A-Z]+__").unwrap());

static ENTITY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap());

static BLANK_LINES_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Link namespaces that render nothing in running text
const HIDDEN_LINK_PREFIXES: [&str; 3] = ["file:", "image:", "category:"];

#[derive(Debug, thiserror::Error)]
#[error("markup could not be rendered: {0}")]
pub struct StripError(pub String);

/// Renders raw markup to plain text.
pub trait MarkupStripper: Sync {
    fn strip(&self, raw: &str) -> Result<String, StripError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WikitextStripper;

impl WikitextStripper {
    pub fn new() -> Self {
        Self
    }
}

impl MarkupStripper for WikitextStripper {
    fn strip(&self, raw: &str) -> Result<String, StripError> {
        Ok(strip_code(raw))
    }
}

pub fn strip_code(text: &str) -> String {
    let text = COMMENT_REGEX.replace_all(text, "");
    let text = REF_SELF_CLOSING_REGEX.replace_all(&text, "");
    let text = REF_REGEX.replace_all(&text, "");
    let text = INVISIBLE_TAG_REGEX.replace_all(&text, "");
    let text = strip_nested(&text, "{{", "}}");
    let text = strip_nested(&text, "{|", "|}");
    let text = replace_wikilinks(&text);
    let text = EXTERNAL_LINK_REGEX.replace_all(&text, |caps: &Captures| {
        caps.get(1).map_or(String::new(), |m| m.as_str().trim().to_string())
    });
    let text = HEADING_REGEX.replace_all(&text, "$2");
    let text = HTML_TAG_REGEX.replace_all(&text, "");
    let text = EMPHASIS_REGEX.replace_all(&text, "");
    let text = RULE_REGEX.replace_all(&text, "");
    let text = LIST_MARKER_REGEX.replace_all(&text, "");
    let text = MAGIC_WORD_REGEX.replace_all(&text, "");
    let text = decode_entities(&text);
    let text = BLANK_LINES_REGEX.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Removes every balanced `open ... close` span, nesting included. An
/// unclosed span swallows the rest of the text.
fn strip_nested(text: &str, open: &str, close: &str) -> String {
    let bytes = text.as_bytes();
    let (open, close) = (open.as_bytes(), close.as_bytes());
    let mut result = String::with_capacity(text.len());
    let mut i = 0;
    let mut run_start = 0;

    while i < bytes.len() {
        if bytes[i..].starts_with(open) {
            result.push_str(&text[run_start..i]);
            let mut depth: i32 = 0;
            while i < bytes.len() {
                if bytes[i..].starts_with(open) {
                    depth += 1;
                    i += open.len();
                } else if bytes[i..].starts_with(close) {
                    depth -= 1;
                    i += close.len();
                    if depth == 0 {
                        break;
                    }
                } else {
                    i += 1;
                }
            }
            run_start = i;
        } else {
            i += 1;
        }
    }

    if run_start < bytes.len() {
        result.push_str(&text[run_start..]);
    }
    result
}

/// Index just past the `]]` closing the link opened at `start`.
fn find_link_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0;
    let mut i = start;
    while i + 1 < bytes.len() {
        if bytes[i] == b'[' && bytes[i + 1] == b'[' {
            depth += 1;
            i += 2;
        } else if bytes[i] == b']' && bytes[i + 1] == b']' {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return Some(i);
            }
        } else {
            i += 1;
        }
    }
    None
}

/// `[[target|label]]` → `label`, `[[target]]` → `target`; file, image and
/// category links are dropped.
fn replace_wikilinks(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut result = String::with_capacity(text.len());
    let mut i = 0;
    let mut run_start = 0;

    while i + 1 < bytes.len() {
        if bytes[i] == b'[' && bytes[i + 1] == b'[' {
            let Some(end) = find_link_end(bytes, i) else {
                break;
            };
            result.push_str(&text[run_start..i]);
            result.push_str(&render_link(&text[i + 2..end - 2]));
            i = end;
            run_start = i;
        } else {
            i += 1;
        }
    }

    if run_start < bytes.len() {
        result.push_str(&text[run_start..]);
    }
    result
}

fn render_link(inner: &str) -> String {
    let lowered = inner.trim_start().to_ascii_lowercase();
    if HIDDEN_LINK_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
        return String::new();
    }
    let label = match inner.rfind('|') {
        Some(pos) if !inner[pos + 1..].trim().is_empty() => &inner[pos + 1..],
        Some(pos) => &inner[..pos],
        None => inner,
    };
    let label = label.trim().trim_start_matches(':');
    if label.contains("[[") {
        replace_wikilinks(label)
    } else {
        label.to_string()
    }
}

fn decode_entities(text: &str) -> String {
    ENTITY_REGEX
        .replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            let decoded = if let Some(hex) = name
                .strip_prefix("#x")
                .or_else(|| name.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(name)
            };
            decoded.map_or_else(|| caps[0].to_string(), |c| c.to_string())
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "minus" => '\u{2212}',
        "times" => '\u{d7}',
        "deg" => '\u{b0}',
        "laquo" => '\u{ab}',
        "raquo" => '\u{bb}',
        "copy" => '\u{a9}',
        "shy" => '\u{ad}',
        _ => return None,
    };
    Some(c)
}
