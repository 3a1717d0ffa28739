// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

/// Upstream HTTP or wire failure.
///
/// `Cancelled` is a distinct terminal signal, not a failure; callers must
/// never report it as an error to the user.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("provider returned {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retryable: bool,
        retry_after: Option<Duration>,
    },

    #[error("network error: {0}")]
    Network(String),

    /// Hosted-mode proxy refused the request: HTTP 402 or an error body
    /// containing `usage_limit_exceeded` / `Monthly token limit exceeded`.
    #[error("usage limit exceeded: {0}")]
    UsageLimit(String),

    #[error("request cancelled")]
    Cancelled,

    /// Mid-stream failure after bytes were already yielded; never retried.
    #[error("stream error: {0}")]
    Stream(String),
}

impl ProviderError {
    pub fn retryable(&self) -> bool {
        match self {
            ProviderError::Http { retryable, .. } => *retryable,
            ProviderError::Network(_) => true,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            ProviderError::UsageLimit(_) => Some(402),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
