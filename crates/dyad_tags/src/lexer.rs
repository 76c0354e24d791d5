use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::escape::{normalize_response, unescape_attr};
use crate::tag::Tag;

const WRITE_OPEN: &str = "<dyad-write";
const WRITE_CLOSE: &str = "</dyad-write>";

/// Returns true when the last `<dyad-write` opening has no closing tag after it.
#[must_use]
pub fn has_unclosed_write(text: &str) -> bool {
    match text.rfind(WRITE_OPEN) {
        Some(start) => !text[start..].contains(WRITE_CLOSE),
        None => false,
    }
}

/// Extracts every complete `dyad-*` directive from `text` in order of appearance.
///
/// Incomplete tags (opening without closing) are ignored, as are output
/// wrappers such as `dyad-output` and `dyad-problem-report`, whose bodies are
/// skipped so nothing nested inside them is mistaken for a directive.
#[must_use]
pub fn parse_tags(text: &str) -> Vec<Tag> {
    let text = normalize_response(text);
    let mut tags = Vec::new();
    let mut cursor = 0;

    while let Some(captures) = opening_tag_regex().captures_at(&text, cursor) {
        let Some(whole) = captures.get(0) else {
            break;
        };
        let name = captures.get(1).map_or("", |m| m.as_str());
        let attrs = parse_attrs(captures.get(2).map_or("", |m| m.as_str()));
        let self_closing = captures.get(3).is_some_and(|m| !m.as_str().is_empty());

        let (body, next) = if self_closing {
            (Some(""), whole.end())
        } else {
            let close = format!("</dyad-{name}>");
            match text[whole.end()..].find(&close) {
                Some(offset) => {
                    let body_end = whole.end() + offset;
                    (Some(&text[whole.end()..body_end]), body_end + close.len())
                }
                None => (None, whole.end()),
            }
        };

        if let Some(body) = body {
            if let Some(tag) = build_tag(name, &attrs, body) {
                tags.push(tag);
            }
        }
        cursor = next;
    }

    tags
}

fn build_tag(name: &str, attrs: &HashMap<String, String>, body: &str) -> Option<Tag> {
    let attr = |key: &str| attrs.get(key).cloned();

    let tag = match name {
        "write" => Tag::Write {
            path: attr("path")?,
            content: clean_file_content(body),
            description: attr("description"),
        },
        "rename" => Tag::Rename {
            from: attr("from")?,
            to: attr("to")?,
        },
        "delete" => Tag::Delete {
            path: attr("path")?,
        },
        "add-dependency" => Tag::AddDependency {
            packages: attr("packages")?
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        },
        "execute-sql" => Tag::ExecuteSql {
            content: strip_fences(body.trim()).trim().to_string(),
            description: attr("description"),
        },
        "search-replace" => Tag::SearchReplace {
            path: attr("path")?,
            content: trim_one_newline(body).to_string(),
            description: attr("description"),
        },
        "mcp-tool-call" => Tag::ToolCall {
            server: attr("server").unwrap_or_default(),
            tool: attr("tool").unwrap_or_default(),
            payload: body.trim().to_string(),
        },
        "mcp-tool-result" => Tag::ToolResult {
            server: attr("server").unwrap_or_default(),
            tool: attr("tool").unwrap_or_default(),
            payload: body.trim().to_string(),
        },
        "chat-summary" => Tag::ChatSummary {
            text: body.trim().to_string(),
        },
        _ => return None,
    };

    Some(tag)
}

fn parse_attrs(raw: &str) -> HashMap<String, String> {
    attr_regex()
        .captures_iter(raw)
        .filter_map(|captures| {
            let key = captures.get(1)?.as_str().to_string();
            let value = unescape_attr(captures.get(2)?.as_str());
            Some((key, value))
        })
        .collect()
}

fn trim_one_newline(body: &str) -> &str {
    let body = body.strip_prefix('\n').unwrap_or(body);
    body.strip_suffix('\n').unwrap_or(body)
}

fn clean_file_content(body: &str) -> String {
    strip_fences(trim_one_newline(body)).to_string()
}

/// Drops a leading ```lang line and a trailing ``` line when both are present.
fn strip_fences(body: &str) -> &str {
    if !body.trim_start().starts_with("```") {
        return body;
    }
    let Some(first_newline) = body.find('\n') else {
        return body;
    };
    let inner = &body[first_newline + 1..];
    let trimmed = inner.trim_end();
    match trimmed.strip_suffix("```") {
        Some(without_close) => without_close.strip_suffix('\n').unwrap_or(without_close),
        None => body,
    }
}

fn opening_tag_regex() -> &'static Regex {
    static OPENING_TAG: OnceLock<Regex> = OnceLock::new();
    OPENING_TAG.get_or_init(|| {
        Regex::new(r#"<dyad-([a-z][a-z-]*)((?:\s+[A-Za-z_][\w-]*\s*=\s*"[^"]*")*)\s*(/?)>"#)
            .expect("opening tag regex must compile")
    })
}

fn attr_regex() -> &'static Regex {
    static ATTR: OnceLock<Regex> = OnceLock::new();
    ATTR.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][\w-]*)\s*=\s*"([^"]*)""#)
            .expect("attribute regex must compile")
    })
}
