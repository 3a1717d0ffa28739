// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{require_str, Tool, ToolCtx, ToolResult};

/// Exact-string file editor.  `old_string` must occur exactly once; zero
/// matches and multiple matches both fail so a stale or ambiguous edit can
/// never land in the wrong place.
pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing exactly one occurrence of old_string with \
         new_string. Fails when old_string is absent or ambiguous (matches \
         more than once) — include enough surrounding context to make it \
         unique. Reports the line delta."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file to edit"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to replace; must occur exactly once"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_string", "new_string"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: &Value, ctx: &ToolCtx) -> ToolResult {
        let path = match require_str(input, "path") {
            Ok(p) => p.to_string(),
            Err(e) => return e,
        };
        let old_string = match require_str(input, "old_string") {
            Ok(s) => s.to_string(),
            Err(e) => return e,
        };
        let new_string = match require_str(input, "new_string") {
            Ok(s) => s.to_string(),
            Err(e) => return e,
        };
        if old_string.is_empty() {
            return ToolResult::err("old_string must not be empty");
        }

        debug!(path = %path, "edit tool");

        let resolved = ctx.resolve(&path);
        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return ToolResult::err(format!("read error: {e}")),
        };

        let matches = content.matches(&old_string).count();
        if matches == 0 {
            return ToolResult::err(format!("old_string not found in {path}"));
        }
        if matches > 1 {
            return ToolResult::err(format!(
                "old_string found {matches} times in {path}, must be unique — \
                 add surrounding context to disambiguate"
            ));
        }

        let new_content = content.replacen(&old_string, &new_string, 1);
        let delta = new_content.lines().count() as i64 - content.lines().count() as i64;

        match tokio::fs::write(&resolved, &new_content).await {
            Ok(_) => ToolResult::ok(format!("Edited {path} ({delta:+} lines)")),
            Err(e) => ToolResult::err(format!("write error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
