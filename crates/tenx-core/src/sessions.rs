// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session persistence and lifecycle: one JSON file per session under a
//! per-user directory, plus the compaction entry point.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use tenx_config::ModelTier;
use tenx_model::Message;

use crate::compact::{MIN_MESSAGES, RETAIN_TAIL};
use crate::session::{Session, SessionState};

/// Produces the replacement summary for a compacted prefix.  Hosts wire this
/// to a router turn; tests use a canned implementation.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, prefix: &[Message]) -> anyhow::Result<String>;
}

/// One row of `list()`.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: String,
    pub name: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Owns the session store directory and the current session handle.
pub struct SessionManager {
    dir: PathBuf,
    current: Option<Arc<Mutex<Session>>>,
}

impl SessionManager {
    pub fn new(dir: PathBuf) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating session dir {}", dir.display()))?;
        Ok(Self { dir, current: None })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn persist(&self, session: &Session) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(self.path_for(&session.id), json)
            .with_context(|| format!("writing session {}", session.id))
    }

    fn install(&mut self, session: Session) -> anyhow::Result<Arc<Mutex<Session>>> {
        self.persist(&session)?;
        let handle = Arc::new(Mutex::new(session));
        self.current = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Create a fresh session and make it current.
    pub fn create(
        &mut self,
        name: Option<String>,
        tier: ModelTier,
        working_directory: PathBuf,
    ) -> anyhow::Result<Arc<Mutex<Session>>> {
        let mut session = Session::new(tier, working_directory);
        session.name = name;
        debug!(id = %session.id, "created session");
        self.install(session)
    }

    pub fn get_current(&self) -> Option<Arc<Mutex<Session>>> {
        self.current.clone()
    }

    pub fn get_or_create(
        &mut self,
        tier: ModelTier,
        working_directory: PathBuf,
    ) -> anyhow::Result<Arc<Mutex<Session>>> {
        match &self.current {
            Some(s) => Ok(Arc::clone(s)),
            None => self.create(None, tier, working_directory),
        }
    }

    /// Load a session by id and make it current.
    pub fn load(&mut self, id: &str) -> anyhow::Result<Arc<Mutex<Session>>> {
        let path = self.path_for(id);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("no session {id} at {}", path.display()))?;
        let session: Session =
            serde_json::from_str(&text).with_context(|| format!("parsing session {id}"))?;
        self.install(session)
    }

    /// Load the most recently updated session whose name matches.
    pub fn load_by_name(&mut self, name: &str) -> anyhow::Result<Arc<Mutex<Session>>> {
        let id = self
            .list()?
            .into_iter()
            .find(|s| s.name.as_deref() == Some(name))
            .map(|s| s.id)
            .with_context(|| format!("no session named {name:?}"))?;
        self.load(&id)
    }

    /// Summaries of all stored sessions, most recently updated first.
    /// Unparseable files are skipped.
    pub fn list(&self) -> anyhow::Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            let Ok(session) = serde_json::from_str::<Session>(&text) else {
                continue;
            };
            summaries.push(SessionSummary {
                id: session.id,
                name: session.name,
                updated_at: session.updated_at,
                message_count: session.messages.len(),
            });
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Resume the most recently updated stored session.
    pub fn resume_last(&mut self) -> anyhow::Result<Arc<Mutex<Session>>> {
        let id = self
            .list()?
            .first()
            .map(|s| s.id.clone())
            .context("no stored sessions to resume")?;
        self.load(&id)
    }

    /// Append one message to the current session and persist.
    pub fn add_message(&self, msg: Message) -> anyhow::Result<()> {
        let handle = self.current.as_ref().context("no current session")?;
        let snapshot = {
            let mut session = handle.lock().unwrap();
            session.push(msg);
            session.clone()
        };
        self.persist(&snapshot)
    }

    /// Persist the current session's present state.
    pub fn save_current(&self) -> anyhow::Result<()> {
        let handle = self.current.as_ref().context("no current session")?;
        let snapshot = handle.lock().unwrap().clone();
        self.persist(&snapshot)
    }

    pub fn rename(&self, name: impl Into<String>) -> anyhow::Result<()> {
        let handle = self.current.as_ref().context("no current session")?;
        let snapshot = {
            let mut session = handle.lock().unwrap();
            session.name = Some(name.into());
            session.updated_at = Utc::now();
            session.clone()
        };
        self.persist(&snapshot)
    }

    /// Copy the current session into a new one with a fresh id and
    /// `parent_id` set; the fork becomes current, the original is untouched.
    pub fn fork(&mut self, name: Option<String>) -> anyhow::Result<Arc<Mutex<Session>>> {
        let parent = {
            let handle = self.current.as_ref().context("no current session")?;
            handle.lock().unwrap().clone()
        };
        let mut fork = parent.clone();
        fork.id = Uuid::new_v4().to_string();
        fork.parent_id = Some(parent.id);
        fork.name = name;
        fork.created_at = Utc::now();
        fork.updated_at = fork.created_at;
        self.install(fork)
    }

    /// Empty the current session's log.
    pub fn clear(&self) -> anyhow::Result<()> {
        let handle = self.current.as_ref().context("no current session")?;
        let snapshot = {
            let mut session = handle.lock().unwrap();
            session.clear();
            session.clone()
        };
        self.persist(&snapshot)
    }

    /// Delete a stored session; dropping the current one leaves no current.
    pub fn delete(&mut self, id: &str) -> anyhow::Result<()> {
        std::fs::remove_file(self.path_for(id))
            .with_context(|| format!("deleting session {id}"))?;
        if let Some(current) = &self.current {
            if current.lock().unwrap().id == id {
                self.current = None;
            }
        }
        Ok(())
    }

    pub fn token_count(&self) -> u64 {
        self.current
            .as_ref()
            .map(|s| s.lock().unwrap().token_count())
            .unwrap_or(0)
    }

    pub fn context_window(&self) -> usize {
        self.current
            .as_ref()
            .map(|s| s.lock().unwrap().context_window())
            .unwrap_or(ModelTier::Smart.context_window())
    }

    pub fn needs_compaction(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|s| s.lock().unwrap().needs_compaction())
    }

    /// Compact the current session: the last [`RETAIN_TAIL`] messages are
    /// retained verbatim, the preceding prefix is replaced by one system
    /// message holding the summary, counters reset accordingly, and the
    /// session transitions to `Compacted`.
    pub async fn compact(&self, summarizer: &dyn Summarizer) -> anyhow::Result<()> {
        let handle = self.current.as_ref().context("no current session")?;

        // Split under the lock, summarize outside it.
        let (prefix, tail) = {
            let session = handle.lock().unwrap();
            if session.messages.len() < MIN_MESSAGES {
                bail!(
                    "compaction requires at least {MIN_MESSAGES} messages, session has {}",
                    session.messages.len()
                );
            }
            let split = session.messages.len() - RETAIN_TAIL;
            (
                session.messages[..split].to_vec(),
                session.messages[split..].to_vec(),
            )
        };

        let summary = summarizer.summarize(&prefix).await?;

        let snapshot = {
            let mut session = handle.lock().unwrap();
            let mut messages = vec![Message::system(summary)];
            messages.extend(tail);
            session.messages = messages;
            session.state = SessionState::Compacted;
            session.recalculate_tokens();
            session.updated_at = Utc::now();
            session.clone()
        };
        debug!(id = %snapshot.id, tokens = snapshot.token_count(), "session compacted");
        self.persist(&snapshot)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedSummarizer;

    #[async_trait]
    impl Summarizer for CannedSummarizer {
        async fn summarize(&self, prefix: &[Message]) -> anyhow::Result<String> {
            Ok(format!("summary of {} messages", prefix.len()))
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _prefix: &[Message]) -> anyhow::Result<String> {
            bail!("model unavailable")
        }
    }

    fn manager() -> (SessionManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(dir.path().to_path_buf()).unwrap();
        (mgr, dir)
    }

    fn seed_messages(mgr: &SessionManager, n: usize) {
        for i in 0..n {
            let msg = if i % 2 == 0 {
                Message::user(format!("user message {i}"))
            } else {
                Message::assistant(format!("assistant message {i}"))
            };
            mgr.add_message(msg).unwrap();
        }
    }

    // ── Create / load round-trip ──────────────────────────────────────────────

    #[test]
    fn create_persists_a_json_file() {
        let (mut mgr, dir) = manager();
        let session = mgr
            .create(Some("work".into()), ModelTier::Fast, "/tmp".into())
            .unwrap();
        let id = session.lock().unwrap().id.clone();
        assert!(dir.path().join(format!("{id}.json")).exists());
    }

    #[test]
    fn save_and_reload_yields_structurally_equal_session() {
        let (mut mgr, _dir) = manager();
        mgr.create(Some("round-trip".into()), ModelTier::Smart, "/tmp".into())
            .unwrap();
        seed_messages(&mgr, 3);
        let original = mgr.get_current().unwrap().lock().unwrap().clone();

        let mut mgr2 = SessionManager::new(mgr.dir.clone()).unwrap();
        let reloaded = mgr2.load(&original.id).unwrap();
        assert_eq!(*reloaded.lock().unwrap(), original);
    }

    #[test]
    fn load_by_name_finds_the_named_session() {
        let (mut mgr, _dir) = manager();
        mgr.create(Some("alpha".into()), ModelTier::Smart, "/tmp".into())
            .unwrap();
        mgr.create(Some("beta".into()), ModelTier::Smart, "/tmp".into())
            .unwrap();
        let found = mgr.load_by_name("alpha").unwrap();
        assert_eq!(found.lock().unwrap().name.as_deref(), Some("alpha"));
    }

    #[test]
    fn load_missing_session_is_error() {
        let (mut mgr, _dir) = manager();
        assert!(mgr.load("no-such-id").is_err());
    }

    #[test]
    fn get_or_create_reuses_current() {
        let (mut mgr, _dir) = manager();
        let a = mgr.get_or_create(ModelTier::Smart, "/tmp".into()).unwrap();
        let b = mgr.get_or_create(ModelTier::Smart, "/tmp".into()).unwrap();
        let a_id = a.lock().unwrap().id.clone();
        let b_id = b.lock().unwrap().id.clone();
        assert_eq!(a_id, b_id);
    }

    #[test]
    fn list_orders_by_most_recent_update() {
        let (mut mgr, _dir) = manager();
        mgr.create(Some("old".into()), ModelTier::Smart, "/tmp".into())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        mgr.create(Some("new".into()), ModelTier::Smart, "/tmp".into())
            .unwrap();
        let list = mgr.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name.as_deref(), Some("new"));
    }

    #[test]
    fn resume_last_loads_most_recent() {
        let (mut mgr, _dir) = manager();
        mgr.create(Some("old".into()), ModelTier::Smart, "/tmp".into())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        mgr.create(Some("new".into()), ModelTier::Smart, "/tmp".into())
            .unwrap();
        mgr.current = None;
        let resumed = mgr.resume_last().unwrap();
        assert_eq!(resumed.lock().unwrap().name.as_deref(), Some("new"));
    }

    #[test]
    fn delete_removes_file_and_current() {
        let (mut mgr, dir) = manager();
        let session = mgr.create(None, ModelTier::Smart, "/tmp".into()).unwrap();
        let id = session.lock().unwrap().id.clone();
        mgr.delete(&id).unwrap();
        assert!(!dir.path().join(format!("{id}.json")).exists());
        assert!(mgr.get_current().is_none());
    }

    // ── Fork ──────────────────────────────────────────────────────────────────

    #[test]
    fn fork_copies_log_and_sets_parent() {
        let (mut mgr, _dir) = manager();
        mgr.create(Some("base".into()), ModelTier::Smart, "/tmp".into())
            .unwrap();
        seed_messages(&mgr, 4);
        let parent_id = mgr.get_current().unwrap().lock().unwrap().id.clone();

        let fork = mgr.fork(Some("branch".into())).unwrap();
        let fork = fork.lock().unwrap();
        assert_ne!(fork.id, parent_id);
        assert_eq!(fork.parent_id.as_deref(), Some(parent_id.as_str()));
        assert_eq!(fork.messages.len(), 4);
        assert_eq!(fork.name.as_deref(), Some("branch"));
    }

    #[test]
    fn fork_leaves_original_unchanged() {
        let (mut mgr, _dir) = manager();
        mgr.create(Some("base".into()), ModelTier::Smart, "/tmp".into())
            .unwrap();
        seed_messages(&mgr, 2);
        let parent_id = mgr.get_current().unwrap().lock().unwrap().id.clone();
        mgr.fork(None).unwrap();

        // Messages added to the fork must not appear in the stored parent.
        mgr.add_message(Message::user("only in fork")).unwrap();
        let mut mgr2 = SessionManager::new(mgr.dir.clone()).unwrap();
        let parent = mgr2.load(&parent_id).unwrap();
        assert_eq!(parent.lock().unwrap().messages.len(), 2);
    }

    // ── Compaction ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn compact_requires_six_messages() {
        let (mut mgr, _dir) = manager();
        mgr.create(None, ModelTier::Smart, "/tmp".into()).unwrap();
        seed_messages(&mgr, 5);
        assert!(mgr.compact(&CannedSummarizer).await.is_err());
    }

    #[tokio::test]
    async fn compact_leaves_summary_plus_four_tail_messages() {
        let (mut mgr, _dir) = manager();
        mgr.create(None, ModelTier::Smart, "/tmp".into()).unwrap();
        seed_messages(&mgr, 10);
        let tail_before: Vec<Message> = {
            let handle = mgr.get_current().unwrap();
            let s = handle.lock().unwrap();
            s.messages[6..].to_vec()
        };

        mgr.compact(&CannedSummarizer).await.unwrap();

        let handle = mgr.get_current().unwrap();
        let session = handle.lock().unwrap();
        assert_eq!(session.messages.len(), 5, "1 summary + 4 tail");
        assert_eq!(session.messages[0].role, tenx_model::Role::System);
        assert_eq!(
            session.messages[0].as_text(),
            Some("summary of 6 messages")
        );
        // Tail preserved byte-for-byte.
        assert_eq!(&session.messages[1..], &tail_before[..]);
        assert_eq!(session.state, SessionState::Compacted);
    }

    #[tokio::test]
    async fn compact_resets_token_counters() {
        let (mut mgr, _dir) = manager();
        mgr.create(None, ModelTier::Smart, "/tmp".into()).unwrap();
        seed_messages(&mgr, 10);
        let before = mgr.token_count();
        mgr.compact(&CannedSummarizer).await.unwrap();
        let after = mgr.token_count();
        assert!(after < before, "counters must reset: {after} >= {before}");

        // Counters equal a fresh recalculation over summary + tail.
        let handle = mgr.get_current().unwrap();
        let mut session = handle.lock().unwrap().clone();
        let recorded = session.token_usage;
        session.recalculate_tokens();
        assert_eq!(session.token_usage, recorded);
    }

    #[tokio::test]
    async fn failed_summarizer_leaves_session_intact() {
        let (mut mgr, _dir) = manager();
        mgr.create(None, ModelTier::Smart, "/tmp".into()).unwrap();
        seed_messages(&mgr, 8);
        let before = mgr.get_current().unwrap().lock().unwrap().messages.len();
        assert!(mgr.compact(&FailingSummarizer).await.is_err());
        let handle = mgr.get_current().unwrap();
        let session = handle.lock().unwrap();
        assert_eq!(session.messages.len(), before);
        assert_eq!(session.state, SessionState::Active);
    }
}
