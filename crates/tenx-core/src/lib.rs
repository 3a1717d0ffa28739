// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agents;
mod compact;
mod events;
mod hooks;
mod router;
mod session;
mod sessions;
mod superpowers;

pub use agents::{
    agent_spec, AgentExecutor, AgentOutcome, AgentParams, AgentSpec, AgentStatus, AgentType,
};
pub use compact::{serialize_history, SUMMARIZE_PROMPT};
pub use events::{RouterEvent, SuperpowerEvent, SuperpowerResult};
pub use hooks::{AskQuestionFn, EnterPlanModeFn, ExitPlanModeFn, Hooks, PlanEntry, PlanExit};
pub use router::{classify_tier, Completion, Router, RouterConfig};
pub use session::{Session, SessionState, TokenUsage};
pub use sessions::{SessionManager, SessionSummary, Summarizer};
pub use superpowers::{
    parse_superpower, Superpower, SuperpowerEngine, SuperpowerLoader, SuperpowerStep,
};
