// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The router drives a single user turn end-to-end: tier selection, the
//! provider stream, and the tool-call loop.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tenx_config::{Config, ModelTier, RoutingMode, TierModels};
use tenx_model::{
    ChatProvider, ChatRequest, Message, ProviderError, Role, StreamEvent, ToolCall,
    ToolCallOutput, ToolCallStatus, Usage,
};
use tenx_tools::{ToolCtx, ToolRegistry};

use crate::events::RouterEvent;
use crate::session::Session;

/// User-text markers that select the `smart` tier under auto routing.
const COMPLEX_MARKERS: &[&str] = &[
    "implement",
    "refactor",
    "debug",
    "analyze",
    "design",
    "architecture",
    "migrate",
    "complex",
    "multi-step",
];

/// User-text markers for simple lookups; short ones go `superfast`,
/// long ones `fast`.
const SIMPLE_MARKERS: &[&str] = &["what is", "how do", "explain", "define", "list", "show"];

/// Boundary between a short and a long simple query, in characters.
const SHORT_QUERY_CHARS: usize = 80;

/// Pure tier classification for one user text.
pub fn classify_tier(text: &str, default_tier: ModelTier) -> ModelTier {
    let lower = text.to_lowercase();
    if COMPLEX_MARKERS.iter().any(|m| lower.contains(m)) {
        return ModelTier::Smart;
    }
    if SIMPLE_MARKERS.iter().any(|m| lower.contains(m)) {
        return if text.chars().count() <= SHORT_QUERY_CHARS {
            ModelTier::Superfast
        } else {
            ModelTier::Fast
        };
    }
    default_tier
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Prepended as a leading system message when present.
    pub system_prompt: Option<String>,
    pub default_tier: ModelTier,
    pub routing: RoutingMode,
    /// Maximum provider round-trips within one turn.
    pub max_hops: u32,
    pub models: TierModels,
    pub bash_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            default_tier: ModelTier::Smart,
            routing: RoutingMode::Auto,
            max_hops: 25,
            models: TierModels::default(),
            bash_timeout_ms: 120_000,
        }
    }
}

impl RouterConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            system_prompt: cfg.system_prompt.clone(),
            default_tier: cfg.routing.default_tier,
            routing: cfg.routing.mode,
            max_hops: cfg.max_tool_hops,
            models: cfg.models.clone(),
            bash_timeout_ms: cfg.bash_timeout_ms,
        }
    }
}

/// Non-streaming turn result.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub tier: ModelTier,
    pub usage: Option<Usage>,
}

/// Orchestrates one user turn: classification, provider streaming, and the
/// tool-call loop.  Holds shared (non-owning) handles to the provider, the
/// tool registry, and the session log.
pub struct Router {
    provider: Arc<dyn ChatProvider>,
    tools: Arc<ToolRegistry>,
    session: Arc<Mutex<Session>>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        tools: Arc<ToolRegistry>,
        session: Arc<Mutex<Session>>,
        config: RouterConfig,
    ) -> Self {
        Self { provider, tools, session, config }
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.config.system_prompt = Some(prompt.into());
    }

    pub fn set_default_tier(&mut self, tier: ModelTier) {
        self.config.default_tier = tier;
    }

    pub fn session(&self) -> Arc<Mutex<Session>> {
        Arc::clone(&self.session)
    }

    /// Classify one user text against this router's default tier.
    pub fn classify(&self, text: &str) -> ModelTier {
        classify_tier(text, self.config.default_tier)
    }

    /// Tier for this turn: caller override, then image forcing, then the
    /// routing mode.
    fn select_tier(&self, turn: &[Message], forced: Option<ModelTier>) -> ModelTier {
        if let Some(t) = forced {
            return t;
        }
        if turn.iter().any(Message::has_images) {
            return ModelTier::Smart;
        }
        match self.config.routing {
            RoutingMode::Fixed(t) => t,
            RoutingMode::Auto => {
                let text = turn
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .and_then(|m| m.as_text())
                    .unwrap_or("");
                classify_tier(text, self.config.default_tier)
            }
        }
    }

    fn build_request(&self, tier: ModelTier) -> ChatRequest {
        let mut messages: Vec<Message> = Vec::new();
        if let Some(prompt) = &self.config.system_prompt {
            messages.push(Message::system(prompt));
        }
        messages.extend(self.session.lock().unwrap().messages.iter().cloned());
        ChatRequest {
            model: self.config.models.id_for(tier).to_string(),
            messages,
            tools: self.tools.wire_schemas(),
            stream: true,
        }
    }

    fn tool_ctx(&self, cancel: &CancellationToken) -> ToolCtx {
        ToolCtx {
            working_dir: self.session.lock().unwrap().working_directory.clone(),
            cancel: cancel.clone(),
            bash_timeout_ms: self.config.bash_timeout_ms,
        }
    }

    /// Retain the partial assistant text (or a `(cancelled)` marker) and emit
    /// the terminal event.  Cancellation is an outcome, never an error.
    async fn finish_cancelled(
        &self,
        tx: &mpsc::Sender<RouterEvent>,
        tier: ModelTier,
        partial: String,
    ) {
        let content = if partial.is_empty() {
            "(cancelled)".to_string()
        } else {
            partial
        };
        {
            let mut session = self.session.lock().unwrap();
            let mut msg = Message::assistant(content);
            msg.model_tier = Some(tier);
            session.push(msg);
        }
        let _ = tx
            .send(RouterEvent::Done { tier, usage: None, cancelled: true })
            .await;
    }

    /// Stream one user turn.  The turn messages are appended to the session,
    /// then the provider ↔ tool loop runs until a plain stop, the hop limit,
    /// cancellation, or a terminal provider error.
    ///
    /// Events arrive strictly ordered on `tx`; a single `Done` is always
    /// last unless the call returns `Err`.
    pub async fn stream(
        &self,
        turn: Vec<Message>,
        forced_tier: Option<ModelTier>,
        cancel: CancellationToken,
        tx: mpsc::Sender<RouterEvent>,
    ) -> anyhow::Result<()> {
        let tier = self.select_tier(&turn, forced_tier);
        {
            let mut session = self.session.lock().unwrap();
            for mut m in turn {
                if m.role == Role::User {
                    m.model_tier = Some(tier);
                }
                session.push(m);
            }
        }

        let mut total_usage = Usage::default();
        let mut saw_usage = false;
        let mut hops: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                self.finish_cancelled(&tx, tier, String::new()).await;
                return Ok(());
            }
            hops += 1;

            let request = self.build_request(tier);
            let mut stream = match self.provider.chat_stream(request, cancel.clone()).await {
                Ok(s) => s,
                Err(ProviderError::Cancelled) => {
                    self.finish_cancelled(&tx, tier, String::new()).await;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let mut text = String::new();
            let mut pending: BTreeMap<u32, PendingToolCall> = BTreeMap::new();
            let mut finish_reason: Option<String> = None;
            let mut cancelled = false;

            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    ev = stream.next() => ev,
                };
                let Some(event) = event else { break };
                match event {
                    Ok(StreamEvent::TextDelta(delta)) if !delta.is_empty() => {
                        text.push_str(&delta);
                        let _ = tx.send(RouterEvent::Text { content: delta, tier }).await;
                    }
                    Ok(StreamEvent::TextDelta(_)) => {}
                    Ok(StreamEvent::ToolCallDelta { index, id, name, arguments }) => {
                        let ptc = pending.entry(index).or_default();
                        if !id.is_empty() {
                            ptc.id = id;
                        }
                        if !name.is_empty() {
                            ptc.name = name;
                        }
                        ptc.args_buf.push_str(&arguments);
                    }
                    Ok(StreamEvent::FinishReason(reason)) => finish_reason = Some(reason),
                    Ok(StreamEvent::Usage(u)) => {
                        total_usage.add(u);
                        saw_usage = true;
                    }
                    Ok(StreamEvent::Done) => break,
                    Err(ProviderError::Cancelled) => {
                        cancelled = true;
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if cancelled || cancel.is_cancelled() {
                self.finish_cancelled(&tx, tier, text).await;
                return Ok(());
            }

            debug!(hop = hops, finish_reason = ?finish_reason, "hop complete");

            // Flush accumulated tool calls ordered by wire index.  Calls with
            // an empty name cannot be dispatched and are dropped; an empty id
            // gets a synthetic one, stable for the duration of this stream.
            let mut calls: Vec<ToolCall> = Vec::new();
            for (index, ptc) in pending {
                if ptc.name.is_empty() {
                    warn!(index, "dropping tool call with empty name from provider");
                    continue;
                }
                calls.push(ptc.finish(hops, index));
            }

            if calls.is_empty() {
                // Plain stop (or EOF without a sentinel): the turn is done.
                {
                    let mut session = self.session.lock().unwrap();
                    if !text.is_empty() {
                        let mut msg = Message::assistant(&text);
                        msg.model_tier = Some(tier);
                        session.push(msg);
                    }
                }
                let _ = tx
                    .send(RouterEvent::Done {
                        tier,
                        usage: saw_usage.then_some(total_usage),
                        cancelled: false,
                    })
                    .await;
                return Ok(());
            }

            // Dispatch sequentially in provider order: later calls may
            // reference earlier results textually.
            let ctx = self.tool_ctx(&cancel);
            let mut results: Vec<(String, String)> = Vec::new();
            let mut aborted = false;
            for call in &mut calls {
                call.status = ToolCallStatus::Running;
                let _ = tx.send(RouterEvent::ToolCall { call: call.clone(), tier }).await;

                let result = self.tools.execute(&call.name, &call.input, &ctx).await;
                if result.ok {
                    call.status = ToolCallStatus::Success;
                    call.output = Some(ToolCallOutput {
                        text: result.output.clone(),
                        error: None,
                    });
                } else {
                    call.status = ToolCallStatus::Error;
                    call.output = Some(ToolCallOutput {
                        text: None,
                        error: result.error.clone(),
                    });
                }
                results.push((call.id.clone(), result.text().to_string()));
                let _ = tx
                    .send(RouterEvent::ToolResult { call: call.clone(), tier })
                    .await;

                if cancel.is_cancelled() {
                    aborted = true;
                    break;
                }
            }

            // One assistant message bearing the completed tool calls, then
            // one tool message per result, in dispatch order.
            {
                let mut session = self.session.lock().unwrap();
                let mut msg = Message::assistant_with_tool_calls(&text, calls.clone());
                msg.model_tier = Some(tier);
                session.push(msg);
                for (id, output) in &results {
                    session.push(Message::tool_result(id, output));
                }
            }

            if aborted {
                self.finish_cancelled(&tx, tier, String::new()).await;
                return Ok(());
            }

            if hops >= self.config.max_hops {
                warn!(hops, "tool-hop limit reached, emitting synthetic stop");
                let _ = tx
                    .send(RouterEvent::Done {
                        tier,
                        usage: saw_usage.then_some(total_usage),
                        cancelled: false,
                    })
                    .await;
                return Ok(());
            }
        }
    }

    /// Non-streaming convenience: run the turn and collect the final text.
    pub async fn complete(
        &self,
        turn: Vec<Message>,
        forced_tier: Option<ModelTier>,
    ) -> anyhow::Result<Completion> {
        let tier = self.select_tier(&turn, forced_tier);
        let (tx, mut rx) = mpsc::channel::<RouterEvent>(256);
        let collector = tokio::spawn(async move {
            let mut content = String::new();
            let mut usage = None;
            while let Some(ev) = rx.recv().await {
                match ev {
                    RouterEvent::Text { content: delta, .. } => content.push_str(&delta),
                    RouterEvent::Done { usage: u, .. } => usage = u,
                    _ => {}
                }
            }
            (content, usage)
        });
        self.stream(turn, forced_tier, CancellationToken::new(), tx)
            .await?;
        let (content, usage) = collector.await?;
        Ok(Completion { content, tier, usage })
    }
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    /// Resolve the accumulated fragments into a dispatchable call.  Invalid
    /// or empty argument JSON becomes `{}` so the turn can still complete.
    fn finish(self, hop: u32, index: u32) -> ToolCall {
        let input: Value = if self.args_buf.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&self.args_buf) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        tool_name = %self.name,
                        error = %e,
                        "provider sent invalid JSON tool arguments; substituting {{}}"
                    );
                    Value::Object(Default::default())
                }
            }
        };
        let id = if self.id.is_empty() {
            format!("call_{hop}_{index}")
        } else {
            self.id
        };
        ToolCall::new(id, self.name, input)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
