// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// The result of executing a tool.
///
/// Tool failures are data, never panics or `Err` returns: the router feeds
/// the error text back to the model, which may recover.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub ok: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { ok: true, output: Some(output.into()), error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { ok: false, output: None, error: Some(message.into()) }
    }

    /// The text carried by this result, whichever side it is on.
    pub fn text(&self) -> &str {
        self.output
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or("")
    }
}

/// Per-call execution context threaded from the router.
#[derive(Debug, Clone)]
pub struct ToolCtx {
    pub working_dir: PathBuf,
    pub cancel: CancellationToken,
    pub bash_timeout_ms: u64,
}

impl Default for ToolCtx {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            cancel: CancellationToken::new(),
            bash_timeout_ms: 120_000,
        }
    }
}

impl ToolCtx {
    /// Resolve a possibly-relative tool path against the working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.working_dir.join(p)
        }
    }
}

/// Trait that every built-in tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// Execute the tool.  Failures are wrapped in [`ToolResult::err`].
    async fn execute(&self, input: &Value, ctx: &ToolCtx) -> ToolResult;
}

/// Extract a required string parameter, reporting the received arguments on
/// failure so the model can correct itself.
pub(crate) fn require_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolResult> {
    match input.get(field).and_then(|v| v.as_str()) {
        Some(s) => Ok(s),
        None => {
            let preview = serde_json::to_string(input).unwrap_or_else(|_| "null".to_string());
            Err(ToolResult::err(format!(
                "missing required parameter '{field}'. Received: {preview}"
            )))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_result_has_output_only() {
        let r = ToolResult::ok("fine");
        assert!(r.ok);
        assert_eq!(r.output.as_deref(), Some("fine"));
        assert!(r.error.is_none());
        assert_eq!(r.text(), "fine");
    }

    #[test]
    fn err_result_has_error_only() {
        let r = ToolResult::err("boom");
        assert!(!r.ok);
        assert!(r.output.is_none());
        assert_eq!(r.text(), "boom");
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        let ctx = ToolCtx { working_dir: PathBuf::from("/work"), ..ToolCtx::default() };
        assert_eq!(ctx.resolve("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn resolve_joins_relative_paths() {
        let ctx = ToolCtx { working_dir: PathBuf::from("/work"), ..ToolCtx::default() };
        assert_eq!(ctx.resolve("src/main.rs"), PathBuf::from("/work/src/main.rs"));
    }

    #[test]
    fn require_str_reports_received_args() {
        let err = require_str(&json!({"other": 1}), "path").unwrap_err();
        assert!(err.text().contains("path"));
        assert!(err.text().contains("other"));
    }
}
