// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Async callbacks crossing the boundary between the core and a host UI.
//!
//! The permission prompt lives on the `PermissionManager`; the hooks here
//! cover the remaining host surface: free-form questions and the plan-mode
//! pair.  Cancellation propagates into every wait.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// Host reply to `enter_plan_mode`: where the model should write its plan.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub approved: bool,
    pub plan_file_path: PathBuf,
}

/// Host reply to `exit_plan_mode`: the submitted plan content.
#[derive(Debug, Clone)]
pub struct PlanExit {
    pub approved: bool,
    pub plan_content: String,
}

pub type EnterPlanModeFn =
    Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<PlanEntry>> + Send + Sync>;
pub type ExitPlanModeFn =
    Arc<dyn Fn(PathBuf) -> BoxFuture<'static, anyhow::Result<PlanExit>> + Send + Sync>;
pub type AskQuestionFn =
    Arc<dyn Fn(Vec<String>) -> BoxFuture<'static, HashMap<String, String>> + Send + Sync>;

/// Host callback bundle, set once at startup.  Every hook is optional; an
/// absent hook resolves to `None`.
#[derive(Default, Clone)]
pub struct Hooks {
    pub enter_plan_mode: Option<EnterPlanModeFn>,
    pub exit_plan_mode: Option<ExitPlanModeFn>,
    pub ask_question: Option<AskQuestionFn>,
}

impl Hooks {
    pub async fn enter_plan(
        &self,
        task: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<PlanEntry>> {
        let Some(hook) = &self.enter_plan_mode else {
            return Ok(None);
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            entry = hook(task.to_string()) => entry.map(Some),
        }
    }

    pub async fn exit_plan(
        &self,
        plan_file_path: PathBuf,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<PlanExit>> {
        let Some(hook) = &self.exit_plan_mode else {
            return Ok(None);
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            exit = hook(plan_file_path) => exit.map(Some),
        }
    }

    pub async fn ask(
        &self,
        questions: Vec<String>,
        cancel: &CancellationToken,
    ) -> Option<HashMap<String, String>> {
        let hook = self.ask_question.as_ref()?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            answers = hook(questions) => Some(answers),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
