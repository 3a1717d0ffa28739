// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Failure classification and delay selection for the provider retry loop.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Backoff ceiling regardless of attempt count.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Error-body markers that always indicate a transient condition.
const RETRYABLE_MARKERS: &[&str] = &[
    "overloaded",
    "too_many_requests",
    "rate_limit",
    "temporarily unavailable",
    "service unavailable",
    "server_error",
    "exhausted",
    "unavailable",
    "no_kv_space",
];

/// Error-body markers that always indicate a permanent condition.
const NON_RETRYABLE_MARKERS: &[&str] = &[
    "invalid_request_error",
    "authentication_error",
    "invalid api key",
    "insufficient_quota",
    "billing",
];

/// Markers surfaced by the hosted-mode proxy when the subscription cap is hit.
const USAGE_LIMIT_MARKERS: &[&str] = &["usage_limit_exceeded", "monthly token limit exceeded"];

pub(crate) fn is_usage_limit(status: u16, body: &str) -> bool {
    if status == 402 {
        return true;
    }
    let lower = body.to_ascii_lowercase();
    USAGE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Classify a failed response.  Body markers win over status codes; an
/// unmatched body falls back to the 429/5xx rule.
pub(crate) fn is_retryable(status: u16, body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    if NON_RETRYABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        return false;
    }
    if matches!(status, 401 | 402 | 403) {
        return false;
    }
    if RETRYABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    status == 429 || (500..600).contains(&status)
}

/// Delay hint from response headers.
///
/// `retry-after-ms` (milliseconds) wins; otherwise `Retry-After` is parsed as
/// seconds, falling back to an HTTP date converted to a positive delta.
pub(crate) fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    if let Some(ms) = headers
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_millis(ms));
    }
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().to_string();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = chrono::DateTime::parse_from_rfc2822(&raw).ok()?;
    let delta = when.with_timezone(&Utc) - Utc::now();
    if delta > chrono::Duration::zero() {
        delta.to_std().ok()
    } else {
        None
    }
}

/// Exponential backoff `base · 2^attempt` with 0–30% additive jitter,
/// capped at [`MAX_BACKOFF`].
pub(crate) fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let base = base_ms.saturating_mul(1u64 << attempt.min(16));
    let jitter = (base as f64 * 0.3 * rand::random::<f64>()) as u64;
    Duration::from_millis(base.saturating_add(jitter)).min(MAX_BACKOFF)
}

/// Delay for the next attempt: header hint first, backoff otherwise.
pub(crate) fn retry_delay(attempt: u32, headers: Option<&HeaderMap>, base_ms: u64) -> Duration {
    headers
        .and_then(retry_after_from_headers)
        .unwrap_or_else(|| backoff_delay(attempt, base_ms))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
