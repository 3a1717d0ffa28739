// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::permissions::PermissionManager;
use crate::tool::{Tool, ToolCtx, ToolResult};

/// Central registry holding all available tools.
///
/// Names are unique (re-registration overwrites) and registration is
/// monotonic: nothing unregisters mid-turn.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    permissions: Option<Arc<PermissionManager>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new(), permissions: None }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// Register a shared tool instance.  Used when building restricted
    /// sub-agent registries from an existing one.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn size(&self) -> usize {
        self.tools.len()
    }

    pub fn set_permission_manager(&mut self, pm: Arc<PermissionManager>) {
        self.permissions = Some(pm);
    }

    pub fn permission_manager(&self) -> Option<Arc<PermissionManager>> {
        self.permissions.clone()
    }

    /// Wire-format tool schemas, sorted by name for a stable request body.
    pub fn wire_schemas(&self) -> Vec<Value> {
        let mut tools: Vec<&Arc<dyn Tool>> = self.tools.values().collect();
        tools.sort_by_key(|t| t.name().to_string());
        tools
            .into_iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.parameters_schema(),
                    }
                })
            })
            .collect()
    }

    /// Dispatch one tool call through the permission gate.
    ///
    /// Denials and unknown tools come back as error envelopes; tool failures
    /// never propagate past the envelope either.
    pub async fn execute(&self, name: &str, input: &Value, ctx: &ToolCtx) -> ToolResult {
        let tool = match self.tools.get(name) {
            Some(t) => Arc::clone(t),
            None => return ToolResult::err(format!("unknown tool: {name}")),
        };

        if let Some(pm) = &self.permissions {
            let key = permission_key(name, input);
            if !pm.check(name, &key).await {
                debug!(tool = name, key = %key, "permission denied");
                return ToolResult::err("Permission denied");
            }
        }

        tool.execute(input, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The string a tool call is permission-matched on.
///
/// File tools match on the path, bash on the full command string so rules
/// may glob-match, search tools on the pattern; anything else falls back to
/// the stable serialization of the whole input object.
pub fn permission_key(tool: &str, input: &Value) -> String {
    let field = match tool {
        "read" | "write" | "edit" => "path",
        "bash" => "command",
        "glob" | "grep" => "pattern",
        _ => return input.to_string(),
    };
    input
        .get(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
