//! Directive protocol parser
//!
//! Models are instructed to reply with a small sub-language:
//!
//! ```text
//! <think>optional private reasoning</think>
//! Action: local_files.write_local_file
//! Action Input: {"file_path": "notes.md", "content": ""}
//! [CONTENT_START]
//! any literal text, no escaping needed
//! [CONTENT_END]
//! ```
//!
//! Parsing is a marker search plus bounded brace matching. Exactly one
//! directive is recognized per message: the first valid `Action:` wins.

use serde_json::Value;
use std::collections::HashMap;

pub const THINK_START: &str = "<think>";
pub const THINK_END: &str = "</think>";
pub const ACTION_MARKER: &str = "Action:";
pub const INPUT_MARKER: &str = "Action Input:";
pub const PAYLOAD_START: &str = "[CONTENT_START]";
pub const PAYLOAD_END: &str = "[CONTENT_END]";
pub const DEFAULT_PAYLOAD_KEY: &str = "content";

const FRAGMENT_PREVIEW: usize = 120;

/// Named arguments of a directive. `Value` is the tagged union
/// (string/number/bool/list/map) that capabilities validate against.
pub type Arguments = serde_json::Map<String, Value>;

/// A parsed action request
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    /// Short (unqualified) capability name; dispatch always has this
    pub action: String,
    /// Package part when the model wrote `package.action`
    pub qualifier: Option<String>,
    pub arguments: Arguments,
    pub raw_payload: Option<String>,
}

impl Directive {
    pub fn new(action: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            action: action.into(),
            qualifier: None,
            arguments,
            raw_payload: None,
        }
    }

    /// `package.action` when a qualifier was written
    pub fn qualified_name(&self) -> Option<String> {
        self.qualifier
            .as_ref()
            .map(|q| format!("{}.{}", q, self.action))
    }
}

/// The model wrote an action but its arguments could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed Action Input for '{action}': {reason} (near `{fragment}`)")]
pub struct DirectiveParseError {
    pub action: String,
    pub fragment: String,
    pub reason: String,
}

/// Remove reasoning-trace spans.
///
/// Every closed `<think>...</think>` span is removed. A `</think>` with no
/// start marker before it (the start was consumed by the backend) removes
/// everything before it. An unclosed `<think>` is left in place.
pub fn strip_reasoning(text: &str) -> String {
    let mut rest = text;
    if let Some(end) = rest.find(THINK_END) {
        match rest.find(THINK_START) {
            Some(start) if start < end => {}
            _ => rest = &rest[end + THINK_END.len()..],
        }
    }

    let mut out = String::with_capacity(rest.len());
    loop {
        let Some(start) = rest.find(THINK_START) else {
            out.push_str(rest);
            break;
        };
        let body = start + THINK_START.len();
        let Some(rel_end) = rest[body..].find(THINK_END) else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        rest = &rest[body + rel_end + THINK_END.len()..];
    }
    out
}

/// Payload block contents plus the text with that block cut out
fn extract_payload(text: &str) -> (Option<String>, String) {
    let Some(start) = text.find(PAYLOAD_START) else {
        return (None, text.to_string());
    };
    let body_start = start + PAYLOAD_START.len();
    let Some(rel_end) = text[body_start..].find(PAYLOAD_END) else {
        return (None, text.to_string());
    };
    let body_end = body_start + rel_end;

    let mut body = &text[body_start..body_end];
    body = body
        .strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body);
    body = body
        .strip_suffix("\r\n")
        .or_else(|| body.strip_suffix('\n'))
        .unwrap_or(body);

    let mut remainder = String::with_capacity(text.len() - (body_end - start));
    remainder.push_str(&text[..start]);
    remainder.push_str(&text[body_end + PAYLOAD_END.len()..]);
    (Some(body.to_string()), remainder)
}

/// A located `Action:` marker with a usable name
struct ActionMatch {
    qualifier: Option<String>,
    action: String,
    /// Offset of the marker itself
    start: usize,
    /// Offset just past the name
    end: usize,
}

/// Find the first `Action:` at or after `from` followed by a usable name
fn find_action(text: &str, from: usize) -> Option<ActionMatch> {
    let mut search_from = from;
    while let Some(rel) = text[search_from..].find(ACTION_MARKER) {
        let start = search_from + rel;
        let after_marker = start + ACTION_MARKER.len();
        search_from = after_marker;

        let rest = &text[after_marker..];
        // Name must be on the marker's own line
        let trimmed = rest.trim_start_matches([' ', '\t']);
        let token_start = after_marker + (rest.len() - trimmed.len());
        let token_len: usize = trimmed
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
            .map(char::len_utf8)
            .sum();

        let name = trimmed[..token_len].trim_matches('.');
        if name.is_empty() {
            continue;
        }

        let (qualifier, action) = match name.rsplit_once('.') {
            Some((q, s)) => (Some(q.to_string()), s.to_string()),
            None => (None, name.to_string()),
        };
        return Some(ActionMatch {
            qualifier,
            action,
            start,
            end: token_start + token_len,
        });
    }
    None
}

/// Byte length of the object starting at `s[0] == '{'`, quotes respected
fn object_extent(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Rewrite single-quoted strings as JSON double-quoted strings
fn normalize_quotes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut quote: Option<char> = None;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match quote {
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                    out.push('"');
                } else {
                    out.push(c);
                }
            }
            Some('"') => {
                out.push(c);
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else if c == '"' {
                    quote = None;
                }
            }
            Some(_) => match c {
                '\\' => match chars.next() {
                    Some('\'') => out.push('\''),
                    Some(next) => {
                        out.push('\\');
                        out.push(next);
                    }
                    None => out.push('\\'),
                },
                '"' => out.push_str("\\\""),
                '\'' => {
                    quote = None;
                    out.push('"');
                }
                _ => out.push(c),
            },
        }
    }
    out
}

fn preview(fragment: &str) -> String {
    let fragment = fragment.trim();
    match fragment.char_indices().nth(FRAGMENT_PREVIEW) {
        Some((idx, _)) => format!("{}...", &fragment[..idx]),
        None => fragment.to_string(),
    }
}

fn decode_object(fragment: &str) -> Result<Arguments, String> {
    let strict_err = match serde_json::from_str::<Value>(fragment) {
        Ok(Value::Object(map)) => return Ok(map),
        Ok(_) => return Err("arguments must be a JSON object".to_string()),
        Err(e) => e,
    };

    match serde_json::from_str::<Value>(&normalize_quotes(fragment)) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("arguments must be a JSON object".to_string()),
        Err(_) => Err(strict_err.to_string()),
    }
}

/// Does this text contain an action marker the parser would act on?
pub fn contains_directive(text: &str) -> bool {
    let (_, text) = extract_payload(&strip_reasoning(text));
    find_action(&text, 0).is_some()
}

/// Directive parser with per-action payload key overrides
#[derive(Debug, Clone, Default)]
pub struct DirectiveParser {
    payload_keys: HashMap<String, String>,
}

impl DirectiveParser {
    pub fn new(payload_keys: HashMap<String, String>) -> Self {
        Self { payload_keys }
    }

    /// Argument key receiving the raw payload for `action`
    pub fn payload_key(&self, action: &str) -> &str {
        self.payload_keys
            .get(action)
            .map(String::as_str)
            .unwrap_or(DEFAULT_PAYLOAD_KEY)
    }

    /// Parse the directive out of raw assistant output.
    ///
    /// `Ok(None)` means the message carries no directive: the model is done.
    pub fn parse(&self, raw: &str) -> Result<Option<Directive>, DirectiveParseError> {
        let stripped = strip_reasoning(raw);
        let (raw_payload, text) = extract_payload(&stripped);

        let Some(ActionMatch {
            qualifier,
            action,
            end: action_end,
            ..
        }) = find_action(&text, 0)
        else {
            return Ok(None);
        };

        // Arguments belong to this action only: stop looking at the next one
        let input_window = find_action(&text, action_end)
            .map(|next| next.start)
            .unwrap_or(text.len());

        let mut arguments = match text[action_end..input_window].find(INPUT_MARKER) {
            None => Arguments::new(),
            Some(rel) => {
                let after = action_end + rel + INPUT_MARKER.len();
                let rest = text[after..].trim_start();
                if !rest.starts_with('{') {
                    return Err(DirectiveParseError {
                        action,
                        fragment: preview(rest.lines().next().unwrap_or_default()),
                        reason: "expected a JSON object after 'Action Input:'".to_string(),
                    });
                }
                let Some(len) = object_extent(rest) else {
                    return Err(DirectiveParseError {
                        action,
                        fragment: preview(rest),
                        reason: "unterminated JSON object".to_string(),
                    });
                };
                let fragment = &rest[..len];
                decode_object(fragment).map_err(|reason| DirectiveParseError {
                    action: action.clone(),
                    fragment: preview(fragment),
                    reason,
                })?
            }
        };

        if let Some(payload) = &raw_payload {
            let key = self.payload_key(&action).to_string();
            arguments.insert(key, Value::String(payload.clone()));
        }

        Ok(Some(Directive {
            action,
            qualifier,
            arguments,
            raw_payload,
        }))
    }
}
