// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;

use async_trait::async_trait;
#[cfg(unix)]
use libc;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::tool::{require_str, Tool, ToolCtx, ToolResult};

/// Built-in tool that runs a shell command.
pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return combined stdout/stderr plus the \
         exit status. Default timeout 120 s (override with timeout_ms). \
         Prefer non-interactive commands; avoid commands that require a TTY."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The complete shell command line to execute"
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Execution timeout in milliseconds (default 120000)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: &Value, ctx: &ToolCtx) -> ToolResult {
        let command = match require_str(input, "command") {
            Ok(c) => c.to_string(),
            Err(e) => return e,
        };
        let timeout_ms = input
            .get("timeout_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(ctx.bash_timeout_ms);

        debug!(cmd = %command, timeout_ms, "bash tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&command);
        cmd.current_dir(&ctx.working_dir);
        // Isolate the subprocess from the host terminal.
        //
        // `stdin(Stdio::null())` prevents the subprocess from reading the
        // controlling terminal via fd 0.  `kill_on_drop(true)` ensures that
        // when the timeout or cancellation fires and the future is dropped,
        // tokio sends SIGKILL before releasing the process handle.
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        // setsid() detaches the child from the controlling terminal, so it
        // cannot open /dev/tty and corrupt host terminal state.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let timeout = std::time::Duration::from_millis(timeout_ms);
        let run = tokio::time::timeout(timeout, cmd.output());
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return ToolResult::err("command cancelled");
            }
            r = run => r,
        };

        match result {
            Ok(Ok(output)) => {
                let mut content = String::new();
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                if !stdout.is_empty() {
                    content.push_str(&stdout);
                }
                if !stderr.is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str("[stderr]\n");
                    content.push_str(&stderr);
                }

                let code = output.status.code().unwrap_or(-1);
                if !content.is_empty() && !content.ends_with('\n') {
                    content.push('\n');
                }
                content.push_str(&format!("[exit {code}]"));

                if code == 0 {
                    ToolResult::ok(content)
                } else if code == 1 {
                    // Exit code 1 is the Unix convention for "no matches"
                    // (grep/rg) and "condition false" (test/[).  Flagging it
                    // as an error confuses the model into believing the
                    // command itself failed.
                    ToolResult::ok(content)
                } else {
                    ToolResult::err(content)
                }
            }
            Ok(Err(e)) => ToolResult::err(format!("spawn error: {e}")),
            Err(_) => ToolResult::err(format!("timeout after {timeout_ms}ms")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
