// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tenx_config::ModelTier;
use tenx_model::{Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Compacted,
}

/// Coarse token accounting, split by direction.  Counters are monotonic
/// while the session is `Active`; compaction resets them to the summary
/// plus the retained tail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

/// One conversation: the message log plus its accounting and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub name: Option<String>,
    pub parent_id: Option<String>,
    pub model_tier: ModelTier,
    pub working_directory: PathBuf,
    pub messages: Vec<Message>,
    pub token_usage: TokenUsage,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(model_tier: ModelTier, working_directory: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: None,
            parent_id: None,
            model_tier,
            working_directory,
            messages: Vec::new(),
            token_usage: TokenUsage::default(),
            state: SessionState::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message, accounting its estimated tokens: assistant output
    /// counts toward `output`, everything else toward `input`.
    pub fn push(&mut self, msg: Message) {
        let tokens = msg.approx_tokens() as u64;
        match msg.role {
            Role::Assistant => self.token_usage.output += tokens,
            _ => self.token_usage.input += tokens,
        }
        self.messages.push(msg);
        self.updated_at = Utc::now();
    }

    pub fn token_count(&self) -> u64 {
        self.token_usage.input + self.token_usage.output
    }

    pub fn context_window(&self) -> usize {
        self.model_tier.context_window()
    }

    /// True when the log approaches the tier's context window.
    pub fn needs_compaction(&self) -> bool {
        self.token_count() as f64 >= 0.8 * self.context_window() as f64
    }

    /// Recompute both counters from the message list (call after compaction
    /// or any wholesale message replacement).
    pub fn recalculate_tokens(&mut self) {
        let mut usage = TokenUsage::default();
        for m in &self.messages {
            let tokens = m.approx_tokens() as u64;
            match m.role {
                Role::Assistant => usage.output += tokens,
                _ => usage.input += tokens,
            }
        }
        self.token_usage = usage;
    }

    /// Drop the whole log and reset accounting.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.token_usage = TokenUsage::default();
        self.state = SessionState::Active;
        self.updated_at = Utc::now();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(ModelTier::Smart, PathBuf::from("/tmp"))
    }

    #[test]
    fn new_session_has_unique_id() {
        assert_ne!(session().id, session().id);
    }

    #[test]
    fn new_session_starts_empty_and_active() {
        let s = session();
        assert!(s.messages.is_empty());
        assert_eq!(s.token_count(), 0);
        assert_eq!(s.state, SessionState::Active);
    }

    #[test]
    fn push_accounts_user_tokens_as_input() {
        let mut s = session();
        // "12345678" = 8 chars → ceil(8/4) = 2 tokens
        s.push(Message::user("12345678"));
        assert_eq!(s.token_usage.input, 2);
        assert_eq!(s.token_usage.output, 0);
    }

    #[test]
    fn push_accounts_assistant_tokens_as_output() {
        let mut s = session();
        s.push(Message::assistant("123456789")); // ceil(9/4) = 3
        assert_eq!(s.token_usage.output, 3);
        assert_eq!(s.token_usage.input, 0);
    }

    #[test]
    fn tool_messages_count_as_input() {
        let mut s = session();
        s.push(Message::tool_result("c1", "12345678"));
        assert_eq!(s.token_usage.input, 2);
    }

    #[test]
    fn token_count_matches_sum_of_ceil_estimates() {
        let mut s = session();
        s.push(Message::user("12345"));      // ceil(5/4) = 2
        s.push(Message::assistant("123"));   // ceil(3/4) = 1
        s.push(Message::system("1234"));     // ceil(4/4) = 1
        assert_eq!(s.token_count(), 4);
    }

    #[test]
    fn counters_are_monotonic_while_active() {
        let mut s = session();
        let mut last = 0;
        for i in 0..10 {
            s.push(Message::user(format!("message number {i}")));
            assert!(s.token_count() >= last);
            last = s.token_count();
        }
    }

    #[test]
    fn recalculate_matches_push_accounting() {
        let mut s = session();
        s.push(Message::user("hello world"));
        s.push(Message::assistant("reply text"));
        let accounted = s.token_usage;
        s.recalculate_tokens();
        assert_eq!(s.token_usage, accounted);
    }

    #[test]
    fn needs_compaction_at_eighty_percent() {
        let mut s = session();
        assert!(!s.needs_compaction());
        // smart window = 200k tokens; 0.8 · 200k = 160k tokens = 640k chars.
        let big = "x".repeat(200_000);
        for _ in 0..13 {
            s.push(Message::user(big.clone()));
        }
        assert!(s.needs_compaction());
    }

    #[test]
    fn clear_resets_log_and_counters() {
        let mut s = session();
        s.push(Message::user("text"));
        s.state = SessionState::Compacted;
        s.clear();
        assert!(s.messages.is_empty());
        assert_eq!(s.token_count(), 0);
        assert_eq!(s.state, SessionState::Active);
    }

    #[test]
    fn session_serde_round_trip_is_structurally_equal() {
        let mut s = session();
        s.name = Some("feature-work".into());
        s.push(Message::user("hi"));
        s.push(Message::assistant("hello"));
        let json = serde_json::to_string_pretty(&s).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
