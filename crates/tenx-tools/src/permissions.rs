// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Pattern-rule engine gating every tool execution.
//!
//! Evaluation is deny-first: all `deny` rules are scanned before any `allow`
//! rule, and all `allow` rules before any `ask` rule, regardless of the order
//! they appear in the config.  The first pattern match in that scan wins; an
//! unmatched key falls back to the tool's default action.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use regex::Regex;
use tracing::debug;

use tenx_config::{default_permissions, PermissionAction, ToolPermissions};

/// Request handed to the host's prompt callback on an `ask` decision.
#[derive(Debug, Clone)]
pub struct PermissionPrompt {
    pub tool: String,
    pub key: String,
    pub reason: Option<String>,
}

/// Asynchronous host callback: `true` permits and records a session
/// allowance, `false` refuses.
pub type PromptCallback = Arc<dyn Fn(PermissionPrompt) -> BoxFuture<'static, bool> + Send + Sync>;

/// Result of a pure rule evaluation.  `allowed` is `true` only for `allow`;
/// an `ask` outcome still needs the allowance cache or the prompt callback.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub action: PermissionAction,
    pub allowed: bool,
    pub matched_rule: Option<String>,
    pub reason: String,
}

pub struct PermissionManager {
    config: Mutex<HashMap<String, ToolPermissions>>,
    allowances: Mutex<HashSet<String>>,
    prompt: Mutex<Option<PromptCallback>>,
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new(default_permissions())
    }
}

impl PermissionManager {
    /// Build a manager from per-tool config, layered over the built-in
    /// defaults so a partial config never drops a tool's default action.
    pub fn new(config: HashMap<String, ToolPermissions>) -> Self {
        let mut merged = default_permissions();
        for (tool, perms) in config {
            merged.insert(tool, perms);
        }
        Self {
            config: Mutex::new(merged),
            allowances: Mutex::new(HashSet::new()),
            prompt: Mutex::new(None),
        }
    }

    /// Install the host prompt callback.  Set once at startup.
    pub fn set_prompt_callback(&self, cb: PromptCallback) {
        *self.prompt.lock().unwrap() = Some(cb);
    }

    /// Merge per-tool entries into the current config.
    pub fn update_config(&self, partial: HashMap<String, ToolPermissions>) {
        let mut config = self.config.lock().unwrap();
        for (tool, perms) in partial {
            config.insert(tool, perms);
        }
    }

    /// Pure inspector — never prompts and never touches the allowance cache.
    pub fn evaluate(&self, tool: &str, key: &str) -> Evaluation {
        let config = self.config.lock().unwrap();
        let perms = match config.get(tool) {
            Some(p) => p,
            None => {
                return Evaluation {
                    action: PermissionAction::Ask,
                    allowed: false,
                    matched_rule: None,
                    reason: format!("no permission config for tool {tool:?}"),
                }
            }
        };

        if !key.is_empty() {
            for pass in [
                PermissionAction::Deny,
                PermissionAction::Allow,
                PermissionAction::Ask,
            ] {
                for rule in perms.rules.iter().filter(|r| r.action == pass) {
                    if glob_match(&rule.pattern, key) {
                        return Evaluation {
                            action: rule.action,
                            allowed: rule.action == PermissionAction::Allow,
                            matched_rule: Some(rule.pattern.clone()),
                            reason: format!("rule {:?} matched", rule.pattern),
                        };
                    }
                }
            }
        }

        Evaluation {
            action: perms.default_action,
            allowed: perms.default_action == PermissionAction::Allow,
            matched_rule: None,
            reason: "tool default".into(),
        }
    }

    /// Full decision for one tool call.  `ask` outcomes consult the session
    /// allowance cache, then the prompt callback; absent a callback the call
    /// is refused.
    pub async fn check(&self, tool: &str, key: &str) -> bool {
        let eval = self.evaluate(tool, key);
        debug!(tool, key, action = ?eval.action, "permission check");
        match eval.action {
            PermissionAction::Allow => true,
            PermissionAction::Deny => false,
            PermissionAction::Ask => {
                let session_key = session_key(tool, key);
                if self.allowances.lock().unwrap().contains(&session_key) {
                    return true;
                }
                let cb = self.prompt.lock().unwrap().clone();
                match cb {
                    Some(cb) => {
                        let granted = cb(PermissionPrompt {
                            tool: tool.to_string(),
                            key: key.to_string(),
                            reason: eval.matched_rule.clone(),
                        })
                        .await;
                        if granted {
                            self.allowances.lock().unwrap().insert(session_key);
                        }
                        granted
                    }
                    None => false,
                }
            }
        }
    }

    /// Force-add one session allowance.
    pub fn allow_for_session(&self, tool: &str, key: &str) {
        self.allowances
            .lock()
            .unwrap()
            .insert(session_key(tool, key));
    }

    /// Drop all cached session allowances.
    pub fn clear_session(&self) {
        self.allowances.lock().unwrap().clear();
    }
}

/// Session-allowance cache key.
///
/// For `bash` the key is coarse (`bash:<argv0>[:<argv1>]`) so one approval of
/// `npm test` also covers `npm test --watch`; other tools cache the full
/// input key.
fn session_key(tool: &str, key: &str) -> String {
    if tool == "bash" {
        let mut words = key.split_whitespace();
        match (words.next(), words.next()) {
            (Some(a0), Some(a1)) => format!("bash:{a0}:{a1}"),
            (Some(a0), None) => format!("bash:{a0}"),
            _ => "bash:".to_string(),
        }
    } else {
        format!("{tool}:{key}")
    }
}

/// Glob match with `*`, `?`, and `[…]` classes; dot-files included,
/// case-sensitive.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    glob_to_regex(pattern).is_some_and(|re| re.is_match(key))
}

/// Convert a shell glob pattern to a [`Regex`].
/// `*` matches anything, `?` one char, `[abc]` / `[!abc]` a class.
pub(crate) fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                let mut class = String::new();
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    class.push(c);
                }
                if closed && !class.is_empty() {
                    re.push('[');
                    re.push_str(&class);
                    re.push(']');
                } else {
                    // Unterminated class — treat the bracket literally.
                    re.push_str(&regex::escape("["));
                    re.push_str(&regex::escape(&class.replace('^', "!")));
                }
            }
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
