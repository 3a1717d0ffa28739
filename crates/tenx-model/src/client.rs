// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! HTTP client for the OpenAI/OpenRouter-compatible chat-completions wire
//! protocol: streaming deltas, cancellation, and transient-failure retry.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tenx_config::RetryConfig;

use crate::{
    error::ProviderError,
    provider::{ChatProvider, EventStream},
    retry::{is_retryable, is_usage_limit, retry_delay},
    sse::drain_complete_sse_lines,
    ChatRequest, ChatResponse, Usage,
};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Attribution headers sent with every request.
const REFERER: &str = "https://github.com/tenx-dev/tenx";
const TITLE: &str = "10x";

pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    credential: Option<String>,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl ProviderClient {
    pub fn new(credential: Option<String>, base_url: Option<String>, retry: &RetryConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            credential,
            max_retries: retry.max_retries,
            retry_delay_ms: retry.retry_delay_ms,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn apply_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(key) = &self.credential {
            req = req.bearer_auth(key);
        }
        req.header("HTTP-Referer", REFERER).header("X-Title", TITLE)
    }

    /// Sleep that aborts promptly when the caller cancels.
    async fn sleep_cancellable(
        delay: std::time::Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// POST the request body, retrying transient failures.
    ///
    /// Returns the successful response; all classification and delay
    /// selection lives in the retry module.  Only connection establishment is
    /// covered here — stream consumption failures are terminal.
    async fn send_with_retry(
        &self,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = self.url("chat/completions");
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            debug!(url = %url, attempt, "sending completion request");
            let send = self.apply_headers(self.http.post(&url).json(body)).send();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                r = send => r,
            };

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let headers = resp.headers().clone();
                    let text = resp.text().await.unwrap_or_default();

                    if is_usage_limit(status, &text) {
                        return Err(ProviderError::UsageLimit(text));
                    }

                    let retryable = is_retryable(status, &text);
                    if retryable && attempt < self.max_retries {
                        let delay = retry_delay(attempt, Some(&headers), self.retry_delay_ms);
                        warn!(status, ?delay, attempt, "retryable provider error");
                        Self::sleep_cancellable(delay, cancel).await?;
                        attempt += 1;
                        continue;
                    }
                    return Err(ProviderError::Http {
                        status,
                        message: text,
                        retryable,
                        retry_after: crate::retry::retry_after_from_headers(&headers),
                    });
                }
                Err(e) => {
                    // Network-layer failure — always retryable.
                    if attempt < self.max_retries {
                        let delay = retry_delay(attempt, None, self.retry_delay_ms);
                        warn!(error = %e, ?delay, attempt, "network error, retrying");
                        Self::sleep_cancellable(delay, cancel).await?;
                        attempt += 1;
                        continue;
                    }
                    return Err(ProviderError::Network(e.to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl ChatProvider for ProviderClient {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn chat_stream(
        &self,
        mut req: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, ProviderError> {
        req.stream = true;
        let body = req.to_body();
        let resp = self.send_with_retry(&body, &cancel).await?;

        // SSE events can be split across TCP packets.  Maintain a line buffer
        // across chunks; emit events only for complete lines.  Cancellation
        // terminates the sequence promptly and drops the underlying reader.
        let byte_stream = resp.bytes_stream();
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<Result<crate::StreamEvent, ProviderError>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(ProviderError::Stream(e.to_string()))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter)
            .take_until(cancel.cancelled_owned());

        Ok(Box::pin(event_stream))
    }

    /// Non-streaming completion via the same retry path.
    async fn chat(
        &self,
        mut req: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatResponse, ProviderError> {
        req.stream = false;
        let body = req.to_body();
        let resp = self.send_with_retry(&body, &cancel).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Stream(e.to_string()))?;
        let content = v["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let usage = v.get("usage").filter(|u| !u.is_null()).map(|u| Usage {
            input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
        });
        Ok(ChatResponse { content, usage })
    }

    /// List models via `GET /models`.
    async fn get_models(&self) -> Result<Vec<String>, ProviderError> {
        let req = self.apply_headers(self.http.get(self.url("models")));
        let resp = req
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status,
                message: text.clone(),
                retryable: is_retryable(status, &text),
                retry_after: None,
            });
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Stream(e.to_string()))?;
        let mut ids: Vec<String> = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
