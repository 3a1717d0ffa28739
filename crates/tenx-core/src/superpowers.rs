// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Superpower discovery, parsing, and execution.
//!
//! A superpower is a markdown document with YAML frontmatter (`name?`,
//! `description?`, `trigger?`, `multimodal?`) whose steps are delimited by
//! `## Step N: <name> (model: <tier>)` headings.  Each step body is a prompt
//! template; `{{…}}` variables are substituted before the step runs through
//! the router at its declared tier.
//!
//! Discovery searches three roots in precedence order (lowest to highest):
//! bundled built-ins, the global user directory, and the project directory.
//! Later definitions with the same trigger override earlier ones.  Loading is
//! cached per working directory and idempotent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use regex::Regex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tenx_config::{ModelTier, RoutingMode, SuperpowerRoots};
use tenx_model::{ChatProvider, Message};
use tenx_tools::ToolRegistry;

use crate::events::{RouterEvent, SuperpowerEvent, SuperpowerResult};
use crate::router::{Router, RouterConfig};
use crate::session::Session;

// ─── Data model ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SuperpowerStep {
    pub number: u32,
    pub name: String,
    pub tier: ModelTier,
    pub prompt_template: String,
    pub uses_previous: bool,
    /// Optional tool restriction from a `<!-- tools: a,b,c -->` marker.
    pub tools: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Superpower {
    pub trigger: String,
    pub description: String,
    pub multimodal: bool,
    pub steps: Vec<SuperpowerStep>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFrontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    trigger: Option<String>,
    #[serde(default)]
    multimodal: Option<bool>,
}

// ─── Parsing ──────────────────────────────────────────────────────────────────

/// Split an optional YAML frontmatter fence off the document.
fn split_frontmatter(raw: &str) -> (RawFrontmatter, String) {
    let rest = raw.trim_start_matches('\n');
    if let Some(after_open) = rest.strip_prefix("---") {
        if let Some(close) = after_open.find("\n---") {
            let yaml_block = &after_open[..close];
            let body = after_open[close + 4..].trim_start_matches('\n').to_string();
            let fm = serde_yaml::from_str(yaml_block).unwrap_or_default();
            return (fm, body);
        }
    }
    (RawFrontmatter::default(), rest.to_string())
}

fn step_heading_re() -> Regex {
    // ## Step N: <name> (model: <tier>)
    Regex::new(r"(?m)^## Step (\d+):\s*(.+?)\s*\(model:\s*([a-zA-Z_-]+)\s*\)\s*$")
        .expect("static regex")
}

fn tools_marker_re() -> Regex {
    Regex::new(r"<!--\s*tools:\s*([^>]+?)\s*-->").expect("static regex")
}

/// Parse one superpower document.  `fallback_trigger` (normally the file
/// stem) is used when the frontmatter names no trigger.
pub fn parse_superpower(raw: &str, fallback_trigger: &str) -> anyhow::Result<Superpower> {
    let (fm, body) = split_frontmatter(raw);
    let trigger = fm
        .trigger
        .or(fm.name)
        .unwrap_or_else(|| fallback_trigger.to_string());
    if trigger.trim().is_empty() {
        bail!("superpower has an empty trigger");
    }

    let heading_re = step_heading_re();
    let marker_re = tools_marker_re();

    let headings: Vec<(usize, usize, u32, String, String)> = heading_re
        .captures_iter(&body)
        .map(|cap| {
            let m = cap.get(0).expect("whole match");
            (
                m.start(),
                m.end(),
                cap[1].parse::<u32>().unwrap_or(0),
                cap[2].to_string(),
                cap[3].to_string(),
            )
        })
        .collect();
    if headings.is_empty() {
        bail!("superpower {trigger:?} has no '## Step N: <name> (model: <tier>)' headings");
    }

    let mut steps = Vec::with_capacity(headings.len());
    let mut multimodal = fm.multimodal.unwrap_or(false);
    for (i, (_, body_start, number, name, tier_str)) in headings.iter().enumerate() {
        let body_end = headings
            .get(i + 1)
            .map(|next| next.0)
            .unwrap_or(body.len());
        let raw_body = body[*body_start..body_end].trim();

        let tier: ModelTier = tier_str
            .parse()
            .with_context(|| format!("step {number} of superpower {trigger:?}"))?;

        let tools = marker_re.captures(raw_body).map(|cap| {
            cap[1]
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        });
        let template = marker_re.replace_all(raw_body, "").trim().to_string();

        let uses_previous = template.contains("{{previous}}") || template.contains("{{output}}");
        if template.contains("{{image}}") || template.contains("{{images}}") {
            multimodal = true;
        }

        steps.push(SuperpowerStep {
            number: *number,
            name: name.clone(),
            tier,
            prompt_template: template,
            uses_previous,
            tools,
        });
    }

    Ok(Superpower {
        trigger,
        description: fm.description.unwrap_or_default(),
        multimodal,
        steps,
    })
}

// ─── Variable substitution ────────────────────────────────────────────────────

fn substitute_vars(
    template: &str,
    input: &str,
    cwd: &Path,
    previous: Option<&str>,
    step_outputs: &HashMap<u32, String>,
    images: &[String],
) -> String {
    let mut text = template
        .replace("{{input}}", input)
        .replace("{{user_input}}", input)
        .replace("{{cwd}}", &cwd.to_string_lossy());
    if let Some(prev) = previous {
        text = text.replace("{{previous}}", prev).replace("{{output}}", prev);
    }
    // {{images}} first: plain replace of {{image}} would otherwise eat the
    // prefix of {{images}}.
    text = text
        .replace("{{images}}", &images.join(", "))
        .replace("{{image}}", images.first().map(String::as_str).unwrap_or(""));

    let step_re = Regex::new(r"\{\{step(\d+)\}\}").expect("static regex");
    step_re
        .replace_all(&text, |cap: &regex::Captures<'_>| {
            cap[1]
                .parse::<u32>()
                .ok()
                .and_then(|n| step_outputs.get(&n).cloned())
                .unwrap_or_default()
        })
        .into_owned()
}

// ─── Loader ───────────────────────────────────────────────────────────────────

/// Discovers superpower definitions, cached per working directory.
pub struct SuperpowerLoader {
    builtin_dir: Option<PathBuf>,
    global_dir: Option<PathBuf>,
    project_rel: PathBuf,
    cache: Mutex<HashMap<PathBuf, Arc<Vec<Superpower>>>>,
}

impl SuperpowerLoader {
    pub fn new(roots: &SuperpowerRoots) -> Self {
        Self {
            builtin_dir: None,
            global_dir: roots.global_dir().map(|d| d.join("superpowers")),
            project_rel: roots.project_dir.join("superpowers"),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Point the loader at a bundled built-ins directory (lowest precedence).
    pub fn with_builtin_dir(mut self, dir: PathBuf) -> Self {
        self.builtin_dir = Some(dir);
        self
    }

    /// Load all superpowers visible from `cwd`, later roots overriding
    /// earlier ones on trigger collision.  Idempotent per directory.
    pub fn load(&self, cwd: &Path) -> Arc<Vec<Superpower>> {
        if let Some(cached) = self.cache.lock().unwrap().get(cwd) {
            return Arc::clone(cached);
        }

        let mut by_trigger: HashMap<String, Superpower> = HashMap::new();
        let roots = [
            self.builtin_dir.clone(),
            self.global_dir.clone(),
            Some(cwd.join(&self.project_rel)),
        ];
        for root in roots.into_iter().flatten() {
            for sp in load_dir(&root) {
                by_trigger.insert(sp.trigger.clone(), sp);
            }
        }

        let mut list: Vec<Superpower> = by_trigger.into_values().collect();
        list.sort_by(|a, b| a.trigger.cmp(&b.trigger));
        let shared = Arc::new(list);
        self.cache
            .lock()
            .unwrap()
            .insert(cwd.to_path_buf(), Arc::clone(&shared));
        shared
    }

    pub fn find(&self, cwd: &Path, trigger: &str) -> Option<Superpower> {
        self.load(cwd).iter().find(|s| s.trigger == trigger).cloned()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }
}

/// Parse every `*.md` file in one root; malformed files are skipped with a
/// warning rather than failing the whole load.
fn load_dir(dir: &Path) -> Vec<Superpower> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
        .collect();
    paths.sort();

    let mut out = Vec::new();
    for path in paths {
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("superpower");
        match parse_superpower(&raw, stem) {
            Ok(sp) => out.push(sp),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed superpower"),
        }
    }
    out
}

// ─── Engine ───────────────────────────────────────────────────────────────────

/// Runs an ordered multi-step workflow against the router.  Steps are not
/// retried here; the provider client handles transient failures.
pub struct SuperpowerEngine {
    provider: Arc<dyn ChatProvider>,
    tools: Arc<ToolRegistry>,
    config: RouterConfig,
}

impl SuperpowerEngine {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        tools: Arc<ToolRegistry>,
        config: RouterConfig,
    ) -> Self {
        Self { provider, tools, config }
    }

    fn registry_for(&self, step: &SuperpowerStep) -> Arc<ToolRegistry> {
        match &step.tools {
            None => Arc::clone(&self.tools),
            Some(names) => {
                let mut registry = ToolRegistry::new();
                for name in names {
                    if let Some(tool) = self.tools.get(name) {
                        registry.register_arc(tool);
                    }
                }
                if let Some(pm) = self.tools.permission_manager() {
                    registry.set_permission_manager(pm);
                }
                Arc::new(registry)
            }
        }
    }

    /// Execute every step in order, emitting step events and the final
    /// `Complete`.  The first step failure ends the run with
    /// `success = false`.
    pub async fn run(
        &self,
        superpower: &Superpower,
        input: &str,
        images: &[String],
        cwd: &Path,
        cancel: CancellationToken,
        tx: mpsc::Sender<SuperpowerEvent>,
    ) -> anyhow::Result<SuperpowerResult> {
        let mut step_outputs: HashMap<u32, String> = HashMap::new();
        let mut previous: Option<String> = None;

        for step in &superpower.steps {
            debug!(trigger = %superpower.trigger, step = step.number, "running superpower step");
            let _ = tx
                .send(SuperpowerEvent::StepStart {
                    number: step.number,
                    name: step.name.clone(),
                    tier: step.tier,
                })
                .await;

            let prompt = substitute_vars(
                &step.prompt_template,
                input,
                cwd,
                previous.as_deref(),
                &step_outputs,
                images,
            );

            let mut config = self.config.clone();
            config.routing = RoutingMode::Fixed(step.tier);
            let session = Arc::new(Mutex::new(Session::new(step.tier, cwd.to_path_buf())));
            let router = Router::new(
                Arc::clone(&self.provider),
                self.registry_for(step),
                session,
                config,
            );

            let (rtx, mut rrx) = mpsc::channel::<RouterEvent>(256);
            let forward = tx.clone();
            let number = step.number;
            let collector = tokio::spawn(async move {
                let mut output = String::new();
                while let Some(event) = rrx.recv().await {
                    if let RouterEvent::Text { content, .. } = event {
                        output.push_str(&content);
                        let _ = forward
                            .send(SuperpowerEvent::StepText { number, content })
                            .await;
                    }
                }
                output
            });

            let run = router
                .stream(
                    vec![Message::user(prompt)],
                    Some(step.tier),
                    cancel.clone(),
                    rtx,
                )
                .await;
            let output = collector.await.unwrap_or_default();

            match run {
                Ok(()) => {
                    let _ = tx
                        .send(SuperpowerEvent::StepComplete {
                            number: step.number,
                            output: output.clone(),
                        })
                        .await;
                    step_outputs.insert(step.number, output.clone());
                    previous = Some(output);
                }
                Err(e) => {
                    let _ = tx
                        .send(SuperpowerEvent::StepError {
                            number: step.number,
                            error: e.to_string(),
                        })
                        .await;
                    let result = SuperpowerResult {
                        success: false,
                        output: previous.unwrap_or_default(),
                        step_outputs,
                    };
                    let _ = tx
                        .send(SuperpowerEvent::Complete { result: result.clone() })
                        .await;
                    return Ok(result);
                }
            }
        }

        let result = SuperpowerResult {
            success: true,
            output: previous.unwrap_or_default(),
            step_outputs,
        };
        let _ = tx
            .send(SuperpowerEvent::Complete { result: result.clone() })
            .await;
        Ok(result)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
