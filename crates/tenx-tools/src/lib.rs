// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod permissions;
pub mod registry;
pub mod tool;

pub use permissions::{Evaluation, PermissionManager, PermissionPrompt, PromptCallback};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolCtx, ToolResult};

pub use builtin::bash::BashTool;
pub use builtin::edit::EditTool;
pub use builtin::glob::GlobTool;
pub use builtin::grep::GrepTool;
pub use builtin::read::ReadTool;
pub use builtin::write::WriteTool;
