// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::builtin::is_ignored_dir;
use crate::permissions::glob_to_regex;
use crate::tool::{require_str, Tool, ToolCtx, ToolResult};

/// Cap on emitted match lines.
const MAX_MATCHES: usize = 1_000;

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Regex search across files, emitting file:line:content matches. \
         node_modules/, .git/, and build-output directories are skipped; \
         binary files are ignored. An optional glob narrows the file set."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search in (default: working directory)"
                },
                "glob": {
                    "type": "string",
                    "description": "Glob filter on file names or relative paths, e.g. '*.rs'"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: &Value, ctx: &ToolCtx) -> ToolResult {
        let pattern = match require_str(input, "pattern") {
            Ok(p) => p.to_string(),
            Err(e) => return e,
        };
        let root = input
            .get("path")
            .and_then(|v| v.as_str())
            .map(|p| ctx.resolve(p))
            .unwrap_or_else(|| ctx.working_dir.clone());
        let glob_filter = input
            .get("glob")
            .and_then(|v| v.as_str())
            .and_then(glob_to_regex);

        debug!(pattern = %pattern, root = %root.display(), "grep tool");

        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => return ToolResult::err(format!("invalid regex: {e}")),
        };

        let mut lines: Vec<String> = Vec::new();
        let mut truncated = false;
        let walker = WalkDir::new(&root).into_iter().filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name().to_str().is_some_and(is_ignored_dir))
        });
        'outer: for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            if let Some(filter) = &glob_filter {
                let name = entry.file_name().to_string_lossy();
                if !filter.is_match(&rel) && !filter.is_match(&name) {
                    continue;
                }
            }
            // Binary or unreadable files are skipped, never fatal.
            let content = match std::fs::read_to_string(entry.path()) {
                Ok(c) => c,
                Err(_) => continue,
            };
            for (i, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    lines.push(format!("{rel}:{}:{line}", i + 1));
                    if lines.len() >= MAX_MATCHES {
                        truncated = true;
                        break 'outer;
                    }
                }
            }
        }

        if lines.is_empty() {
            return ToolResult::ok("(no matches)".to_string());
        }
        let mut out = lines.join("\n");
        if truncated {
            out.push_str("\n...[match cap reached — narrow with path or glob to see the rest]");
        }
        ToolResult::ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
