//! Parsing of tool commands out of agent replies.
//!
//! Agents issue commands inside fenced blocks tagged `tool`:
//!
//! ````text
//! ```tool
//! read src/app.py
//! ```
//! ````
//!
//! A `write` command owns the rest of its block (the content may start on the
//! next line); any other block holds one command per line. Replies without
//! fenced blocks are scanned for a JSON object `{"tool": ..., "arguments": ...}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const FENCE_OPEN: &str = "```tool";
const FENCE_CLOSE: &str = "```";

/// A parsed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Trait for parsing tool calls from LLM responses.
pub trait ToolCallParser: Send + Sync {
    /// All tool calls in a response, in order of appearance.
    fn parse(&self, response: &str) -> Vec<ToolCall>;
}

/// Default parser: fenced command blocks first, JSON objects as fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandParser;

impl ToolCallParser for CommandParser {
    fn parse(&self, response: &str) -> Vec<ToolCall> {
        let fenced = fenced_calls(response);
        if !fenced.is_empty() {
            return fenced;
        }
        json_calls(response)
    }
}

/// Parse a single command line such as `read src/a.py`.
pub fn parse_command(command: &str) -> Option<ToolCall> {
    let command = command.trim_start();
    let (word, rest) = match command.find(char::is_whitespace) {
        Some(idx) => (&command[..idx], &command[idx..]),
        None => (command, ""),
    };
    if word.is_empty() {
        return None;
    }

    let call = match word {
        "read" => ToolCall::new("read", serde_json::json!({ "path": rest.trim() })),
        "ls" => {
            let path = rest.trim();
            let path = if path.is_empty() { "." } else { path };
            ToolCall::new("ls", serde_json::json!({ "path": path }))
        }
        "write" => {
            let rest = rest.trim_start_matches([' ', '\t']);
            let (path, content) = match rest.find(char::is_whitespace) {
                Some(idx) => {
                    let sep_len = rest[idx..].chars().next().map_or(1, char::len_utf8);
                    (&rest[..idx], &rest[idx + sep_len..])
                }
                None => (rest, ""),
            };
            ToolCall::new(
                "write",
                serde_json::json!({ "path": path.trim(), "content": content }),
            )
        }
        "git" | "exec" => ToolCall::new(word, serde_json::json!({ "command": rest.trim() })),
        other => ToolCall::new(other, serde_json::json!({ "raw": rest.trim() })),
    };
    Some(call)
}

fn fenced_calls(response: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut remaining = response;

    while let Some(start) = remaining.find(FENCE_OPEN) {
        let after_tag = &remaining[start + FENCE_OPEN.len()..];
        // Tag must end the fence line (rejects ```toolkit).
        let Some(newline) = after_tag.find('\n') else {
            break;
        };
        if !after_tag[..newline].trim().is_empty() {
            remaining = after_tag;
            continue;
        }

        let body_and_rest = &after_tag[newline + 1..];
        let write = is_write_block(body_and_rest);
        let (body, next) = match closing_fence(body_and_rest, write) {
            Some((end, resume)) => (&body_and_rest[..end], &body_and_rest[resume..]),
            None => (body_and_rest, ""),
        };
        calls.extend(block_calls(body, write));
        remaining = next;
    }

    calls
}

fn is_write_block(body: &str) -> bool {
    body.trim_start()
        .strip_prefix("write")
        .is_some_and(|rest| rest.starts_with([' ', '\t']))
}

/// Locate the fence line closing a block: returns where the body ends and
/// where scanning resumes.
///
/// With `nested` set (file content), a fence carrying an info string such as
/// ```` ```bash ```` opens an inner block that its own bare fence closes.
fn closing_fence(text: &str, nested: bool) -> Option<(usize, usize)> {
    let mut depth = 0usize;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if let Some(info) = trimmed.strip_prefix(FENCE_CLOSE) {
            if nested && !info.trim().is_empty() {
                depth += 1;
            } else if nested && depth > 0 {
                depth -= 1;
            } else {
                let fence = line.find(FENCE_CLOSE).unwrap_or(0);
                return Some((offset, offset + fence + FENCE_CLOSE.len()));
            }
        }
        offset += line.len();
    }
    None
}

fn block_calls(body: &str, write: bool) -> Vec<ToolCall> {
    if write {
        return parse_command(body.trim_start()).into_iter().collect();
    }
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(parse_command)
        .collect()
}

fn json_calls(response: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut depth = 0usize;
    let mut start = None;

    for (i, c) in response.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Some(call) = json_call(&response[s..=i]) {
                            calls.push(call);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    calls
}

fn json_call(candidate: &str) -> Option<ToolCall> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let name = value.get("tool").and_then(Value::as_str)?;
    let arguments = value
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    Some(ToolCall::new(name, arguments))
}
