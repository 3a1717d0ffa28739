// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::builtin::is_ignored_dir;
use crate::permissions::glob_to_regex;
use crate::tool::{require_str, Tool, ToolCtx, ToolResult};

/// Cap on returned paths so one broad pattern cannot flood the context.
const MAX_RESULTS: usize = 1_000;

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern (*, ?, […]), e.g. '*.rs' or \
         'src/**/*.ts'. node_modules/, .git/, and build-output directories \
         are skipped. Reports the match count."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern matched against relative paths and file names"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in (default: working directory)"
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

        debug!(pattern = %pattern, root = %root.display(), "glob tool");

        let re = match glob_to_regex(&pattern) {
            Some(re) => re,
            None => return ToolResult::err(format!("invalid glob pattern: {pattern}")),
        };

        let mut matches: Vec<String> = Vec::new();
        let walker = WalkDir::new(&root).into_iter().filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name().to_str().is_some_and(is_ignored_dir))
        });
        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            let name = entry.file_name().to_string_lossy();
            if re.is_match(&rel) || re.is_match(&name) {
                matches.push(rel);
                if matches.len() >= MAX_RESULTS {
                    break;
                }
            }
        }
        matches.sort();

        let count = matches.len();
        if count == 0 {
            return ToolResult::ok("(0 files)".to_string());
        }
        let mut out = matches.join("\n");
        if count >= MAX_RESULTS {
            out.push_str("\n...[result cap reached — narrow the pattern to see the rest]");
        }
        out.push_str(&format!("\n({count} files)"));
        ToolResult::ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
