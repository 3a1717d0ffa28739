// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{error::ProviderError, ChatRequest, ChatResponse, StreamEvent, Usage};

/// A finite, single-pass stream of provider events.  The consumer is
/// obligated to drain it or cancel.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// The provider seam.  The HTTP client implements it for production; the
/// scripted mocks implement it for tests and the router is written against
/// the trait only.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Issue a streaming chat completion.
    ///
    /// Retries apply only to connection establishment; once bytes have been
    /// yielded, failures surface as terminal stream errors.  The cancel token
    /// aborts in-flight connections, backoff sleeps, and the stream itself.
    async fn chat_stream(
        &self,
        req: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, ProviderError>;

    /// Non-streaming convenience: drain the stream into a single response.
    async fn chat(
        &self,
        mut req: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatResponse, ProviderError> {
        req.stream = true;
        let mut stream = self.chat_stream(req, cancel).await?;
        let mut content = String::new();
        let mut usage: Option<Usage> = None;
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta(t) => content.push_str(&t),
                StreamEvent::Usage(u) => usage = Some(u),
                StreamEvent::Done => break,
                _ => {}
            }
        }
        Ok(ChatResponse { content, usage })
    }

    /// List model ids available upstream.
    async fn get_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}
