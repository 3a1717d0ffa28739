// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::{provider::EventStream, ChatRequest, Role, StreamEvent, Usage};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl crate::ChatProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
        _cancel: CancellationToken,
    ) -> Result<EventStream, crate::ProviderError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();

        let events: Vec<Result<StreamEvent, crate::ProviderError>> = vec![
            Ok(StreamEvent::TextDelta(format!("MOCK: {reply}"))),
            Ok(StreamEvent::Usage(Usage { input_tokens: 10, output_tokens: 10 })),
            Ok(StreamEvent::FinishReason("stop".into())),
            Ok(StreamEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted mock provider.  Each call to `chat_stream` pops the next
/// response script from the front of the queue.  This lets tests specify
/// exact event sequences — including tool calls — without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Vec<StreamEvent>>>>,
    /// The last `ChatRequest` seen by this provider.
    /// Written on each call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<ChatRequest>>>,
    /// Total number of `chat_stream` calls served.
    pub calls: Arc<Mutex<usize>>,
}

impl ScriptedMockProvider {
    /// Build a provider from a list of response scripts.  The outer `Vec` is
    /// the ordered list of calls; the inner `Vec` the event sequence for
    /// that call.
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![vec![
            StreamEvent::TextDelta(r),
            StreamEvent::Usage(Usage { input_tokens: 5, output_tokens: 5 }),
            StreamEvent::FinishReason("stop".into()),
            StreamEvent::Done,
        ]])
    }

    /// Convenience: provider that returns a tool call followed by a text
    /// reply on the next round.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            // Round 1 – model emits a tool call
            vec![
                StreamEvent::ToolCallDelta {
                    index: 0,
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments: args_json.into(),
                },
                StreamEvent::FinishReason("tool_calls".into()),
                StreamEvent::Done,
            ],
            // Round 2 – model responds after the tool result
            vec![
                StreamEvent::TextDelta(final_text.into()),
                StreamEvent::FinishReason("stop".into()),
                StreamEvent::Done,
            ],
        ])
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl crate::ChatProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
        _cancel: CancellationToken,
    ) -> Result<EventStream, crate::ProviderError> {
        *self.last_request.lock().unwrap() = Some(req);
        *self.calls.lock().unwrap() += 1;
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                vec![
                    StreamEvent::TextDelta("[no more scripts]".into()),
                    StreamEvent::Done,
                ]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<Result<StreamEvent, crate::ProviderError>> =
            events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::{ChatProvider, Message};

    fn req() -> ChatRequest {
        ChatRequest {
            model: "test".into(),
            messages: vec![Message::user("hi")],
            tools: vec![],
            stream: true,
        }
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let p = MockProvider;
        let mut stream = p.chat_stream(req(), CancellationToken::new()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        match first {
            StreamEvent::TextDelta(t) => assert!(t.contains("MOCK: hi")),
            other => panic!("unexpected first event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_default_impl_drains_stream() {
        let p = ScriptedMockProvider::always_text("hello world");
        let resp = p.chat(req(), CancellationToken::new()).await.unwrap();
        assert_eq!(resp.content, "hello world");
        assert_eq!(resp.usage.unwrap().input_tokens, 5);
    }

    #[tokio::test]
    async fn scripted_tool_then_text_two_rounds() {
        let p = ScriptedMockProvider::tool_then_text(
            "call-1",
            "bash",
            r#"{"command":"ls"}"#,
            "done",
        );

        let mut events = Vec::new();
        let mut stream = p.chat_stream(req(), CancellationToken::new()).await.unwrap();
        while let Some(ev) = stream.next().await {
            events.push(ev.unwrap());
        }
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::ToolCallDelta { name, .. } if name == "bash")));

        let resp = p.chat(req(), CancellationToken::new()).await.unwrap();
        assert_eq!(resp.content, "done");
        assert_eq!(p.call_count(), 2);
    }

    #[tokio::test]
    async fn scripted_records_last_request() {
        let p = ScriptedMockProvider::always_text("x");
        let _ = p.chat(req(), CancellationToken::new()).await.unwrap();
        let last = p.last_request.lock().unwrap();
        assert_eq!(last.as_ref().unwrap().model, "test");
    }

    #[tokio::test]
    async fn scripted_fallback_when_scripts_exhausted() {
        let p = ScriptedMockProvider::new(vec![]);
        let mut stream = p.chat_stream(req(), CancellationToken::new()).await.unwrap();
        let ev = stream.next().await.unwrap().unwrap();
        assert!(matches!(ev, StreamEvent::TextDelta(t) if t.contains("no more scripts")));
    }
}
