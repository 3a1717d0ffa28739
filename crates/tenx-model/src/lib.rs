// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod client;
mod error;
mod mock;
mod provider;
mod retry;
mod sse;
mod types;

pub use client::ProviderClient;
pub use error::ProviderError;
pub use mock::{MockProvider, ScriptedMockProvider};
pub use provider::{ChatProvider, EventStream};
pub use sse::StreamEvent;
pub use types::*;
