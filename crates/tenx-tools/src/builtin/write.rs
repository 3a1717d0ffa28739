// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{require_str, Tool, ToolCtx, ToolResult};

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write a file, overwriting any existing content. Parent directories \
         are created as needed. Reports the resulting line count."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "content": {
                    "type": "string",
                    "description": "Full file content to write"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: &Value, ctx: &ToolCtx) -> ToolResult {
        let path = match require_str(input, "path") {
            Ok(p) => p.to_string(),
            Err(e) => return e,
        };
        let content = match require_str(input, "content") {
            Ok(c) => c.to_string(),
            Err(e) => return e,
        };

        debug!(path = %path, bytes = content.len(), "write tool");

        let resolved = ctx.resolve(&path);
        if let Some(parent) = resolved.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolResult::err(format!("mkdir error: {e}"));
                }
            }
        }

        match tokio::fs::write(&resolved, &content).await {
            Ok(_) => {
                let lines = content.lines().count();
                ToolResult::ok(format!("Wrote {path} ({lines} lines)"))
            }
            Err(e) => ToolResult::err(format!("write error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
