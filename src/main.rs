// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use tenx_config::{Config, RoutingMode, TierModels};
use tenx_core::{
    serialize_history, Router, RouterConfig, RouterEvent, SessionManager, Summarizer,
    SuperpowerEngine, SuperpowerLoader, SUMMARIZE_PROMPT,
};
use tenx_model::{ChatProvider, ChatRequest, Message, ProviderClient, ProviderError};
use tenx_tools::{
    BashTool, EditTool, GlobTool, GrepTool, PermissionManager, PermissionPrompt, PromptCallback,
    ReadTool, ToolRegistry, WriteTool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Arc::new(tenx_config::load(cli.config.as_deref())?);

    let credential = config.resolve_credential();
    if cli.byok && credential.is_none() {
        anyhow::bail!(
            "--byok requires auth.api_key in the config or TENX_API_KEY in the environment"
        );
    }

    let provider: Arc<dyn ChatProvider> = Arc::new(ProviderClient::new(
        credential,
        config.auth.base_url.clone(),
        &config.retry,
    ));

    let permissions = Arc::new(PermissionManager::new(config.permissions.clone()));
    if cli.execute.is_none() {
        permissions.set_prompt_callback(stdin_prompt_callback());
    }

    let mut registry = ToolRegistry::new();
    registry.register(ReadTool);
    registry.register(WriteTool);
    registry.register(EditTool);
    registry.register(GlobTool);
    registry.register(GrepTool);
    registry.register(BashTool);
    registry.set_permission_manager(Arc::clone(&permissions));
    let registry = Arc::new(registry);

    let cwd = std::env::current_dir().context("reading working directory")?;
    let mut sessions = SessionManager::new(config.session_dir())?;
    let session = if let Some(name) = &cli.resume {
        sessions.load_by_name(name)?
    } else if cli.continue_last {
        sessions.resume_last()?
    } else {
        sessions.create(None, config.routing.default_tier, cwd.clone())?
    };

    let mut router_config = RouterConfig::from_config(&config);
    if let Some(mode) = &cli.model {
        router_config.routing = mode
            .parse::<RoutingMode>()
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    let router = Router::new(
        Arc::clone(&provider),
        Arc::clone(&registry),
        session,
        router_config.clone(),
    );

    if let Some(prompt) = &cli.execute {
        run_turn(&router, &sessions, &provider, &config, prompt, cli.quiet).await?;
        return Ok(());
    }

    let loader = SuperpowerLoader::new(&config.superpowers);
    let engine = SuperpowerEngine::new(
        Arc::clone(&provider),
        Arc::clone(&registry),
        router_config.clone(),
    );
    repl(ReplState {
        cli,
        config,
        router_config,
        router,
        sessions,
        provider,
        registry,
        permissions,
        loader,
        engine,
        cwd,
    })
    .await
}

// ── Logging ───────────────────────────────────────────────────────────────────

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

// ── Permission prompt ─────────────────────────────────────────────────────────

fn stdin_prompt_callback() -> PromptCallback {
    Arc::new(|prompt: PermissionPrompt| {
        Box::pin(async move {
            let question = format!("\nallow {}({})? [y/N] ", prompt.tool, prompt.key);
            tokio::task::spawn_blocking(move || {
                let mut out = std::io::stdout();
                let _ = write!(out, "{question}");
                let _ = out.flush();
                let mut line = String::new();
                if std::io::stdin().read_line(&mut line).is_err() {
                    return false;
                }
                matches!(line.trim(), "y" | "Y" | "yes")
            })
            .await
            .unwrap_or(false)
        })
    })
}

// ── Compaction summarizer ─────────────────────────────────────────────────────

/// Wires `SessionManager::compact` to a tool-free provider turn at the fast
/// tier.
struct TurnSummarizer {
    provider: Arc<dyn ChatProvider>,
    models: TierModels,
}

#[async_trait::async_trait]
impl Summarizer for TurnSummarizer {
    async fn summarize(&self, prefix: &[Message]) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: self.models.fast.clone(),
            messages: vec![
                Message::system(SUMMARIZE_PROMPT),
                Message::user(serialize_history(prefix)),
            ],
            tools: vec![],
            stream: true,
        };
        let response = self
            .provider
            .chat(request, CancellationToken::new())
            .await?;
        Ok(response.content)
    }
}

// ── Turn driver ───────────────────────────────────────────────────────────────

async fn run_turn(
    router: &Router,
    sessions: &SessionManager,
    provider: &Arc<dyn ChatProvider>,
    config: &Config,
    prompt: &str,
    quiet: bool,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let (tx, mut rx) = mpsc::channel::<RouterEvent>(256);
    let printer = tokio::spawn(async move {
        let mut out = std::io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                RouterEvent::Text { content, .. } => {
                    let _ = write!(out, "{content}");
                    let _ = out.flush();
                }
                RouterEvent::ToolCall { call, .. } if !quiet => {
                    let _ = writeln!(out, "\n→ {}({})", call.name, call.input);
                }
                RouterEvent::ToolResult { call, .. } if !quiet => {
                    let status = if call.output.as_ref().is_some_and(|o| o.error.is_some()) {
                        "error"
                    } else {
                        "ok"
                    };
                    let _ = writeln!(out, "← {} [{status}]", call.name);
                }
                RouterEvent::Done { usage, cancelled, .. } => {
                    let _ = writeln!(out);
                    if cancelled {
                        let _ = writeln!(out, "(cancelled)");
                    } else if let (Some(u), false) = (usage, quiet) {
                        let _ = writeln!(
                            out,
                            "[tokens: {} in / {} out]",
                            u.input_tokens, u.output_tokens
                        );
                    }
                }
                _ => {}
            }
        }
    });

    let result = router
        .stream(vec![Message::user(prompt)], None, cancel, tx)
        .await;
    interrupt.abort();
    let _ = printer.await;

    if let Err(e) = result {
        report_error(&e);
        return Err(e);
    }
    sessions.save_current()?;

    if sessions.needs_compaction() {
        let summarizer = TurnSummarizer {
            provider: Arc::clone(provider),
            models: config.models.clone(),
        };
        if let Err(e) = sessions.compact(&summarizer).await {
            tracing::warn!(error = %e, "compaction failed");
        }
    }
    Ok(())
}

/// One concise line per failure; the usage-limit case adds an upgrade hint.
fn report_error(e: &anyhow::Error) {
    if let Some(ProviderError::UsageLimit(msg)) = e.downcast_ref::<ProviderError>() {
        eprintln!("error: {msg}");
        eprintln!("hint: your monthly token allowance is exhausted — upgrade your plan to continue");
    } else {
        eprintln!("error: {e}");
    }
}

// ── Interactive loop ──────────────────────────────────────────────────────────

struct ReplState {
    cli: Cli,
    config: Arc<Config>,
    router_config: RouterConfig,
    router: Router,
    sessions: SessionManager,
    provider: Arc<dyn ChatProvider>,
    registry: Arc<ToolRegistry>,
    permissions: Arc<PermissionManager>,
    loader: SuperpowerLoader,
    engine: SuperpowerEngine,
    cwd: std::path::PathBuf,
}

impl ReplState {
    /// Point the router at the manager's current session (after resume/fork).
    fn rebind_router(&mut self) {
        if let Some(session) = self.sessions.get_current() {
            self.router = Router::new(
                Arc::clone(&self.provider),
                Arc::clone(&self.registry),
                session,
                self.router_config.clone(),
            );
        }
    }
}

async fn repl(mut state: ReplState) -> anyhow::Result<()> {
    if !state.cli.quiet {
        println!("10x — type /help for commands, /quit to exit");
    }

    loop {
        let line = match read_line("> ").await {
            Some(l) => l,
            None => return Ok(()),
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let mut parts = command.splitn(2, ' ');
            let verb = parts.next().unwrap_or_default();
            let arg = parts.next().map(str::trim).map(str::to_string);
            match verb {
                "quit" | "exit" => return Ok(()),
                "help" => print_help(),
                "clear" => {
                    state.sessions.clear()?;
                    state.permissions.clear_session();
                    println!("session cleared");
                }
                "resume" => {
                    let loaded = match arg {
                        Some(name) => state.sessions.load_by_name(&name),
                        None => state.sessions.resume_last(),
                    };
                    match loaded {
                        Ok(_) => {
                            state.rebind_router();
                            println!("session resumed");
                        }
                        Err(e) => eprintln!("error: {e}"),
                    }
                }
                "rename" => match arg {
                    Some(name) => state.sessions.rename(name)?,
                    None => eprintln!("usage: /rename <name>"),
                },
                "fork" => {
                    state.sessions.fork(arg)?;
                    state.rebind_router();
                    println!("forked");
                }
                "model" => match arg {
                    Some(mode) => match mode.parse::<RoutingMode>() {
                        Ok(parsed) => {
                            state.router_config.routing = parsed;
                            state.rebind_router();
                            println!("routing: {parsed}");
                        }
                        Err(e) => eprintln!("error: {e}"),
                    },
                    None => println!("routing: {}", state.router_config.routing),
                },
                "superpowers" | "skills" => {
                    for sp in state.loader.load(&state.cwd).iter() {
                        println!("/{} — {}", sp.trigger, sp.description);
                    }
                }
                trigger => {
                    // Any other slash word may name a superpower trigger.
                    match state.loader.find(&state.cwd, trigger) {
                        Some(sp) => {
                            run_superpower(
                                &state.engine,
                                &sp,
                                arg.as_deref().unwrap_or(""),
                                &state.cwd,
                            )
                            .await;
                        }
                        None => eprintln!("unknown command: /{trigger}"),
                    }
                }
            }
            continue;
        }

        if let Err(e) = run_turn(
            &state.router,
            &state.sessions,
            &state.provider,
            &state.config,
            &line,
            state.cli.quiet,
        )
        .await
        {
            tracing::debug!(error = %e, "turn failed");
        }
    }
}

async fn run_superpower(
    engine: &SuperpowerEngine,
    superpower: &tenx_core::Superpower,
    input: &str,
    cwd: &std::path::Path,
) {
    let (tx, mut rx) = mpsc::channel(256);
    let printer = tokio::spawn(async move {
        let mut out = std::io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                tenx_core::SuperpowerEvent::StepStart { number, name, tier } => {
                    let _ = writeln!(out, "[step {number}: {name} ({tier})]");
                }
                tenx_core::SuperpowerEvent::StepText { content, .. } => {
                    let _ = write!(out, "{content}");
                    let _ = out.flush();
                }
                tenx_core::SuperpowerEvent::StepComplete { .. } => {
                    let _ = writeln!(out);
                }
                tenx_core::SuperpowerEvent::StepError { number, error } => {
                    let _ = writeln!(out, "step {number} failed: {error}");
                }
                tenx_core::SuperpowerEvent::Complete { .. } => {}
            }
        }
    });
    let result = engine
        .run(superpower, input, &[], cwd, CancellationToken::new(), tx)
        .await;
    let _ = printer.await;
    if let Err(e) = result {
        eprintln!("error: {e}");
    }
}

async fn read_line(prompt: &str) -> Option<String> {
    let prompt = prompt.to_string();
    tokio::task::spawn_blocking(move || {
        let mut out = std::io::stdout();
        let _ = write!(out, "{prompt}");
        let _ = out.flush();
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(_) => None,
        }
    })
    .await
    .ok()
    .flatten()
}

fn print_help() {
    println!(
        "commands:\n\
         /help              this help\n\
         /clear             clear the current session\n\
         /resume [name]     resume a session (latest when unnamed)\n\
         /rename <name>     name the current session\n\
         /fork [name]       fork the current session\n\
         /model [mode]      show or switch the routing mode\n\
         /superpowers       list available superpowers\n\
         /<trigger> [input] run a superpower\n\
         /quit              exit"
    );
}
