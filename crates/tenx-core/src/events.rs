// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use tenx_config::ModelTier;
use tenx_model::{ToolCall, Usage};

/// Events emitted by the router during a single turn.
/// Consumers (CLI host, sub-agent collector, superpower engine) subscribe to
/// these to drive their output.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// A text delta streamed from the model.
    Text { content: String, tier: ModelTier },
    /// A newly-observed tool call, after its streamed arguments completed.
    ToolCall { call: ToolCall, tier: ModelTier },
    /// The same tool call updated with terminal status and output.
    ToolResult { call: ToolCall, tier: ModelTier },
    /// Terminal event — exactly one per turn.  `cancelled` distinguishes a
    /// user abort from normal completion; cancellation is never an error.
    Done {
        tier: ModelTier,
        usage: Option<Usage>,
        cancelled: bool,
    },
}

/// Outcome of a full superpower run.
#[derive(Debug, Clone)]
pub struct SuperpowerResult {
    pub success: bool,
    /// The final step's output (or the last successful step's on failure).
    pub output: String,
    pub step_outputs: HashMap<u32, String>,
}

/// Events emitted while executing a superpower.
#[derive(Debug, Clone)]
pub enum SuperpowerEvent {
    StepStart {
        number: u32,
        name: String,
        tier: ModelTier,
    },
    StepText {
        number: u32,
        content: String,
    },
    StepComplete {
        number: u32,
        output: String,
    },
    StepError {
        number: u32,
        error: String,
    },
    Complete {
        result: SuperpowerResult,
    },
}
