use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use tenx_config::{ModelTier, RoutingMode};
use tenx_model::{ChatProvider, Message};
use tenx_tools::ToolRegistry;

use crate::compact::serialize_history;
use crate::events::RouterEvent;
use crate::router::{Router, RouterConfig};
use crate::session::Session;

/// The closed set of spawnable sub-agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Explore,
    Summarize,
    ReviewPr,
    TitleGen,
    Plan,
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "explore" => Ok(AgentType::Explore),
            "summarize" => Ok(AgentType::Summarize),
            "review_pr" | "reviewpr" => Ok(AgentType::ReviewPr),
            "title_gen" | "titlegen" => Ok(AgentType::TitleGen),
            "plan" => Ok(AgentType::Plan),
            other => Err(format!("unknown subagent type: {other:?}")),
        }
    }
}

/// Static description of one agent: prompt, tool subset, tier, mutability.
#[derive(Debug, Clone, Copy)]
pub struct AgentSpec {
    pub system_prompt: &'static str,
    pub tools: &'static [&'static str],
    pub tier: ModelTier,
    pub read_only: bool,
}

const READ_TOOLS: &[&str] = &["read", "glob", "grep"];
const EXPLORE_TOOLS: &[&str] = &["read", "glob", "grep", "bash"];

/// The authoritative agent table.
pub fn agent_spec(agent: AgentType) -> AgentSpec {
    match agent {
        AgentType::Explore => AgentSpec {
            system_prompt: "You are a codebase exploration agent. Investigate the question \
                            using the available tools and report your findings concisely. \
                            Never modify any file.",
            tools: EXPLORE_TOOLS,
            tier: ModelTier::Fast,
            read_only: true,
        },
        AgentType::Summarize => AgentSpec {
            system_prompt: "You are a summarization agent. Produce a concise, \
                            information-dense summary of the provided conversation, \
                            preserving technical details, file names, and decisions.",
            tools: &[],
            tier: ModelTier::Fast,
            read_only: true,
        },
        AgentType::ReviewPr => AgentSpec {
            system_prompt: "You are a code review agent. Examine the referenced changes \
                            with the available tools and report defects, risks, and \
                            concrete improvement suggestions.",
            tools: EXPLORE_TOOLS,
            tier: ModelTier::Smart,
            read_only: false,
        },
        AgentType::TitleGen => AgentSpec {
            system_prompt: "Generate a short descriptive title (at most eight words) for \
                            the given conversation. Reply with the title only.",
            tools: &[],
            tier: ModelTier::Superfast,
            read_only: true,
        },
        AgentType::Plan => AgentSpec {
            system_prompt: "You are a planning agent. Read the relevant code and produce \
                            a step-by-step implementation plan. Never modify any file.",
            tools: READ_TOOLS,
            tier: ModelTier::Smart,
            read_only: true,
        },
    }
}

/// Parameters of one `executeAgent` invocation.
#[derive(Debug, Clone, Default)]
pub struct AgentParams {
    pub subagent_type: String,
    pub prompt: String,
    pub model: Option<ModelTier>,
    /// Id of a completed invocation whose cached result should be returned
    /// without re-executing.
    pub resume: Option<String>,
}

/// Terminal result of one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub ok: bool,
    pub output: String,
    pub agent_id: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Running,
    Completed,
    Error,
}

#[derive(Clone)]
enum AgentState {
    Running,
    Completed(AgentOutcome),
    Error(String),
}

/// Spawns restricted child routers for bounded tasks.  Agents are spawned
/// per-call and do not persist; the in-memory state table tracks each
/// invocation by id for `resume`.
pub struct AgentExecutor {
    provider: Arc<dyn ChatProvider>,
    base_tools: Arc<ToolRegistry>,
    config: RouterConfig,
    working_dir: PathBuf,
    states: Mutex<HashMap<String, AgentState>>,
}

impl AgentExecutor {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        base_tools: Arc<ToolRegistry>,
        config: RouterConfig,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            provider,
            base_tools,
            config,
            working_dir,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn status(&self, agent_id: &str) -> Option<AgentStatus> {
        self.states.lock().unwrap().get(agent_id).map(|s| match s {
            AgentState::Running => AgentStatus::Running,
            AgentState::Completed(_) => AgentStatus::Completed,
            AgentState::Error(_) => AgentStatus::Error,
        })
    }

    /// Build a registry holding only the agent's allowed tools, sharing the
    /// parent's tool instances and permission manager.
    fn restricted_registry(&self, allowed: &[&str]) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for name in allowed {
            if let Some(tool) = self.base_tools.get(name) {
                registry.register_arc(tool);
            }
        }
        if let Some(pm) = self.base_tools.permission_manager() {
            registry.set_permission_manager(pm);
        }
        registry
    }

    /// Run one sub-agent to completion, collecting only its text deltas.
    /// Tool events are not propagated to the parent.
    pub async fn execute(
        &self,
        params: AgentParams,
        context: Option<Vec<Message>>,
        cancel: CancellationToken,
    ) -> AgentOutcome {
        // A completed invocation can be replayed from the state table.
        if let Some(resume_id) = &params.resume {
            let cached = self.states.lock().unwrap().get(resume_id).cloned();
            if let Some(AgentState::Completed(outcome)) = cached {
                debug!(agent_id = %resume_id, "returning cached agent result");
                return outcome;
            }
        }

        let agent_type = match params.subagent_type.parse::<AgentType>() {
            Ok(t) => t,
            Err(e) => {
                return AgentOutcome {
                    ok: false,
                    output: String::new(),
                    agent_id: String::new(),
                    error: Some(e),
                }
            }
        };
        let spec = agent_spec(agent_type);
        let agent_id = Uuid::new_v4().to_string();
        self.states
            .lock()
            .unwrap()
            .insert(agent_id.clone(), AgentState::Running);

        let tier = params.model.unwrap_or(spec.tier);
        debug!(agent = ?agent_type, %agent_id, %tier, "spawning sub-agent");

        let mut config = self.config.clone();
        config.system_prompt = Some(spec.system_prompt.to_string());
        config.routing = RoutingMode::Fixed(tier);

        // Context messages are folded into the task prompt; Summarize is the
        // canonical consumer.
        let prompt = match &context {
            Some(messages) if !messages.is_empty() => {
                format!("{}\n\n{}", params.prompt, serialize_history(messages))
            }
            _ => params.prompt.clone(),
        };

        let session = Arc::new(Mutex::new(Session::new(tier, self.working_dir.clone())));
        let router = Router::new(
            Arc::clone(&self.provider),
            Arc::new(self.restricted_registry(spec.tools)),
            session,
            config,
        );

        let (tx, mut rx) = mpsc::channel::<RouterEvent>(256);
        let collector = tokio::spawn(async move {
            let mut output = String::new();
            while let Some(event) = rx.recv().await {
                if let RouterEvent::Text { content, .. } = event {
                    output.push_str(&content);
                }
            }
            output
        });

        let run = router
            .stream(vec![Message::user(prompt)], Some(tier), cancel, tx)
            .await;
        let output = collector.await.unwrap_or_default();

        match run {
            Ok(()) => {
                let outcome = AgentOutcome {
                    ok: true,
                    output,
                    agent_id: agent_id.clone(),
                    error: None,
                };
                self.states
                    .lock()
                    .unwrap()
                    .insert(agent_id, AgentState::Completed(outcome.clone()));
                outcome
            }
            Err(e) => {
                let message = e.to_string();
                self.states
                    .lock()
                    .unwrap()
                    .insert(agent_id.clone(), AgentState::Error(message.clone()));
                AgentOutcome {
                    ok: false,
                    output: String::new(),
                    agent_id,
                    error: Some(message),
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tenx_model::ScriptedMockProvider;

    use super::*;

    fn executor(provider: Arc<dyn ChatProvider>) -> AgentExecutor {
        AgentExecutor::new(
            provider,
            Arc::new(ToolRegistry::new()),
            RouterConfig::default(),
            PathBuf::from("/tmp"),
        )
    }

    fn params(agent: &str, prompt: &str) -> AgentParams {
        AgentParams {
            subagent_type: agent.into(),
            prompt: prompt.into(),
            ..AgentParams::default()
        }
    }

    // ── Agent table ───────────────────────────────────────────────────────────

    #[test]
    fn explore_gets_read_tools_plus_bash_at_fast() {
        let spec = agent_spec(AgentType::Explore);
        assert_eq!(spec.tools, &["read", "glob", "grep", "bash"]);
        assert_eq!(spec.tier, ModelTier::Fast);
        assert!(spec.read_only);
    }

    #[test]
    fn summarize_and_titlegen_have_no_tools() {
        assert!(agent_spec(AgentType::Summarize).tools.is_empty());
        assert!(agent_spec(AgentType::TitleGen).tools.is_empty());
        assert_eq!(agent_spec(AgentType::TitleGen).tier, ModelTier::Superfast);
    }

    #[test]
    fn plan_is_read_only_without_bash_at_smart() {
        let spec = agent_spec(AgentType::Plan);
        assert_eq!(spec.tools, &["read", "glob", "grep"]);
        assert_eq!(spec.tier, ModelTier::Smart);
        assert!(spec.read_only);
    }

    #[test]
    fn review_pr_runs_at_smart() {
        assert_eq!(agent_spec(AgentType::ReviewPr).tier, ModelTier::Smart);
    }

    #[test]
    fn agent_type_parses_wire_strings() {
        assert_eq!("explore".parse::<AgentType>().unwrap(), AgentType::Explore);
        assert_eq!("review_pr".parse::<AgentType>().unwrap(), AgentType::ReviewPr);
        assert_eq!("titlegen".parse::<AgentType>().unwrap(), AgentType::TitleGen);
        assert!("archaeologist".parse::<AgentType>().is_err());
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn collects_text_output_from_child_router() {
        let exec = executor(Arc::new(ScriptedMockProvider::always_text("findings here")));
        let outcome = exec
            .execute(
                params("explore", "map the codebase"),
                None,
                CancellationToken::new(),
            )
            .await;
        assert!(outcome.ok, "{:?}", outcome.error);
        assert_eq!(outcome.output, "findings here");
        assert!(!outcome.agent_id.is_empty());
        assert_eq!(exec.status(&outcome.agent_id), Some(AgentStatus::Completed));
    }

    #[tokio::test]
    async fn unknown_agent_type_fails_without_spawning() {
        let exec = executor(Arc::new(ScriptedMockProvider::always_text("x")));
        let outcome = exec
            .execute(params("archaeologist", "dig"), None, CancellationToken::new())
            .await;
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("unknown subagent type"));
    }

    #[tokio::test]
    async fn resume_returns_cached_result_without_reexecuting() {
        let provider = Arc::new(ScriptedMockProvider::always_text("first run"));
        let calls = provider.calls.clone();
        let exec = executor(provider);

        let first = exec
            .execute(params("titlegen", "name this"), None, CancellationToken::new())
            .await;
        assert!(first.ok);
        let calls_after_first = *calls.lock().unwrap();

        let mut replay = params("titlegen", "ignored");
        replay.resume = Some(first.agent_id.clone());
        let second = exec.execute(replay, None, CancellationToken::new()).await;

        assert_eq!(second.output, first.output);
        assert_eq!(second.agent_id, first.agent_id);
        assert_eq!(
            *calls.lock().unwrap(),
            calls_after_first,
            "resume must not re-invoke the provider"
        );
    }

    #[tokio::test]
    async fn summarize_folds_context_into_the_prompt() {
        let provider = Arc::new(ScriptedMockProvider::always_text("a summary"));
        let last_request = provider.last_request.clone();
        let exec = executor(provider);

        let context = vec![
            Message::user("What is Rust?"),
            Message::assistant("A systems language."),
        ];
        let outcome = exec
            .execute(
                params("summarize", "Summarize this conversation."),
                Some(context),
                CancellationToken::new(),
            )
            .await;
        assert!(outcome.ok);

        let req = last_request.lock().unwrap();
        let messages = &req.as_ref().unwrap().messages;
        // system prompt + single user message carrying the formatted context
        let user_text = messages
            .iter()
            .find(|m| m.role == tenx_model::Role::User)
            .and_then(|m| m.as_text())
            .unwrap();
        assert!(user_text.contains("What is Rust?"));
        assert!(user_text.contains("A systems language."));
    }

    #[tokio::test]
    async fn child_registry_contains_only_allowed_tools() {
        let provider = Arc::new(ScriptedMockProvider::always_text("planned"));
        let last_request = provider.last_request.clone();

        let mut base = ToolRegistry::new();
        base.register(tenx_tools::ReadTool);
        base.register(tenx_tools::GlobTool);
        base.register(tenx_tools::GrepTool);
        base.register(tenx_tools::BashTool);
        base.register(tenx_tools::WriteTool);
        let exec = AgentExecutor::new(
            provider,
            Arc::new(base),
            RouterConfig::default(),
            PathBuf::from("/tmp"),
        );

        exec.execute(params("plan", "plan it"), None, CancellationToken::new())
            .await;

        let req = last_request.lock().unwrap();
        let tools = &req.as_ref().unwrap().tools;
        let names: Vec<&str> = tools
            .iter()
            .map(|t| t["function"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["glob", "grep", "read"]);
    }
}
