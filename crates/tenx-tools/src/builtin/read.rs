// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{require_str, Tool, ToolCtx, ToolResult};

/// Default number of lines returned when the caller does not specify a limit.
const DEFAULT_LINE_LIMIT: usize = 2_000;

/// Single lines longer than this are cut with an ellipsis so one minified
/// file cannot flood the context.
const MAX_LINE_CHARS: usize = 2_048;

pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a file. Lines are returned as L{n}:content (1-indexed); single lines \
         longer than 2048 chars are cut with an ellipsis. offset (1-indexed start \
         line) and limit (max lines) page through large files. The total line \
         count is always reported."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: &Value, ctx: &ToolCtx) -> ToolResult {
        let path = match require_str(input, "path") {
            Ok(p) => p.to_string(),
            Err(e) => return e,
        };
        let offset = input.get("offset").and_then(|v| v.as_u64()).unwrap_or(1).max(1) as usize;
        let limit = input
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

        debug!(path = %path, offset, limit, "read tool");

        let resolved = ctx.resolve(&path);
        if resolved.is_dir() {
            return ToolResult::err(format!("{path} is a directory, not a file"));
        }
        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return ToolResult::err(format!("read error: {e}")),
        };

        let all_lines: Vec<&str> = text.lines().collect();
        let total = all_lines.len();
        let start = offset - 1;

        let selected: Vec<String> = all_lines
            .iter()
            .enumerate()
            .skip(start)
            .take(limit)
            .map(|(i, line)| format!("L{}:{}", i + 1, clip_line(line)))
            .collect();

        let content = if selected.is_empty() {
            format!("(0 lines)\n({total} lines total)")
        } else {
            format!("{}\n({total} lines total)", selected.join("\n"))
        };
        ToolResult::ok(content)
    }
}

/// Cut one overlong line at a char boundary, appending an ellipsis.
fn clip_line(line: &str) -> String {
    if line.chars().count() <= MAX_LINE_CHARS {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(MAX_LINE_CHARS).collect();
    cut.push('…');
    cut
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
