// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Incremental parsing of the line-oriented chat-completions event stream.
//!
//! Lines beginning `data: ` carry a JSON chunk; `data: [DONE]` terminates the
//! stream.  Chunks may be split across TCP packets, so a persistent line
//! buffer is maintained and only complete `\n`-terminated lines are parsed.
//! Invalid JSON chunks are skipped — never fatal.

use serde_json::Value;

use crate::{error::ProviderError, Usage};

/// A single parsed event from the provider stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A text delta from `choices[0].delta.content`.
    TextDelta(String),
    /// A tool-call fragment.  OpenAI interleaves chunks for parallel tool
    /// calls by `index`; id/name arrive on the first fragment, arguments
    /// accumulate across fragments.
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    /// `choices[0].finish_reason` when present (`stop`, `tool_calls`, …).
    FinishReason(String),
    /// Final usage statistics.
    Usage(Usage),
    /// The `data: [DONE]` sentinel.
    Done,
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line is left in `buf` so it can be extended by the
/// next TCP chunk.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<Result<StreamEvent, ProviderError>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        // Strip the optional Windows-style \r before \n.
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

/// Parse a single complete SSE `data:` line.
///
/// Returns `None` for empty lines, comment lines, or unparseable data.
fn parse_sse_data_line(line: &str) -> Option<Result<StreamEvent, ProviderError>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(StreamEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    Some(Ok(parse_chunk(&v)))
}

fn parse_chunk(v: &Value) -> StreamEvent {
    // Usage-only chunk (final stats).
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return StreamEvent::Usage(Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
        });
    }

    let choice = &v["choices"][0];
    let delta = &choice["delta"];

    // Tool call delta — each chunk carries one fragment; the index routes
    // accumulation in the router.
    if let Some(tool_calls) = delta.get("tool_calls") {
        if let Some(tc) = tool_calls.get(0) {
            return StreamEvent::ToolCallDelta {
                index: tc["index"].as_u64().unwrap_or(0) as u32,
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
            };
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            return StreamEvent::TextDelta(text.to_string());
        }
    }

    if let Some(reason) = choice["finish_reason"].as_str() {
        return StreamEvent::FinishReason(reason.to_string());
    }

    StreamEvent::TextDelta(String::new())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
