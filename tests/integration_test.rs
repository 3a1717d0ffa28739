// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! End-to-end turns through the full stack: scripted provider → router →
//! registry → permission manager → session log.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tenx_config::{ModelTier, PermissionAction, PermissionRule, ToolPermissions};
use tenx_core::{Router, RouterConfig, RouterEvent, Session};
use tenx_model::{
    ChatProvider, Message, Role, ScriptedMockProvider, StreamEvent, ToolCallStatus,
};
use tenx_tools::{BashTool, PermissionManager, ReadTool, ToolRegistry};

fn tool_call_script(id: &str, name: &str, args: &str, final_text: &str) -> ScriptedMockProvider {
    ScriptedMockProvider::new(vec![
        vec![
            StreamEvent::ToolCallDelta {
                index: 0,
                id: id.into(),
                name: name.into(),
                arguments: args.into(),
            },
            StreamEvent::FinishReason("tool_calls".into()),
            StreamEvent::Done,
        ],
        vec![
            StreamEvent::TextDelta(final_text.into()),
            StreamEvent::FinishReason("stop".into()),
            StreamEvent::Done,
        ],
    ])
}

fn session() -> Arc<Mutex<Session>> {
    Arc::new(Mutex::new(Session::new(
        ModelTier::Smart,
        PathBuf::from("/tmp"),
    )))
}

async fn drive(
    router: &Router,
    prompt: &str,
    cancel: CancellationToken,
) -> (Vec<RouterEvent>, anyhow::Result<()>) {
    let (tx, mut rx) = mpsc::channel(256);
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    });
    let result = router
        .stream(vec![Message::user(prompt)], None, cancel, tx)
        .await;
    (collector.await.unwrap(), result)
}

// ── Full tool-call round trip ────────────────────────────────────────────────

#[tokio::test]
async fn tool_call_turn_round_trips_through_registry_and_session() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "alpha\nbeta\n").unwrap();

    let provider = Arc::new(tool_call_script(
        "call_1",
        "read",
        &format!(r#"{{"path":"{}"}}"#, file.path().display()),
        "the file says alpha",
    ));

    let mut registry = ToolRegistry::new();
    registry.register(ReadTool);

    let router = Router::new(
        provider,
        Arc::new(registry),
        session(),
        RouterConfig::default(),
    );

    let (events, result) = drive(&router, "read that file", CancellationToken::new()).await;
    result.unwrap();

    // Exactly one ToolCall and one ToolResult for the call, result after call.
    let call_pos = events
        .iter()
        .position(|e| matches!(e, RouterEvent::ToolCall { .. }))
        .expect("tool_call event");
    let result_pos = events
        .iter()
        .position(|e| matches!(e, RouterEvent::ToolResult { .. }))
        .expect("tool_result event");
    assert!(result_pos > call_pos);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, RouterEvent::ToolCall { .. }))
            .count(),
        1
    );
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, RouterEvent::ToolResult { .. }))
            .count(),
        1
    );

    // The result carries the executed call with terminal status and output.
    match &events[result_pos] {
        RouterEvent::ToolResult { call, .. } => {
            assert_eq!(call.id, "call_1");
            assert_eq!(call.status, ToolCallStatus::Success);
            let text = call.output.as_ref().unwrap().text.as_ref().unwrap();
            assert!(text.contains("L1:alpha"), "{text}");
        }
        _ => unreachable!(),
    }

    // A single terminal Done, last.
    assert!(matches!(
        events.last(),
        Some(RouterEvent::Done { cancelled: false, .. })
    ));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, RouterEvent::Done { .. }))
            .count(),
        1
    );

    // Session log: user, assistant (tool_calls), tool, assistant — with the
    // tool message answering the assistant call id.
    let handle = router.session();
    let log = handle.lock().unwrap();
    let roles: Vec<Role> = log.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    let calls = log.messages[1].tool_calls.as_ref().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(log.messages[2].tool_call_id.as_deref(), Some(calls[0].id.as_str()));
    assert_eq!(log.messages[3].as_text(), Some("the file says alpha"));
}

// ── Permission gating ────────────────────────────────────────────────────────

#[tokio::test]
async fn denied_bash_call_feeds_permission_error_back_to_model() {
    let provider = Arc::new(tool_call_script(
        "call_1",
        "bash",
        r#"{"command":"sudo rm -rf /opt"}"#,
        "understood, not running that",
    ));

    let mut config = HashMap::new();
    config.insert(
        "bash".to_string(),
        ToolPermissions {
            default_action: PermissionAction::Ask,
            rules: vec![PermissionRule {
                pattern: "sudo *".into(),
                action: PermissionAction::Deny,
            }],
        },
    );
    let mut registry = ToolRegistry::new();
    registry.register(BashTool);
    registry.set_permission_manager(Arc::new(PermissionManager::new(config)));

    let router = Router::new(
        provider,
        Arc::new(registry),
        session(),
        RouterConfig::default(),
    );

    let (events, result) = drive(&router, "clean up /opt", CancellationToken::new()).await;
    result.unwrap();

    let denial = events.iter().find_map(|e| match e {
        RouterEvent::ToolResult { call, .. } => Some(call.clone()),
        _ => None,
    });
    let call = denial.expect("tool result event");
    assert_eq!(call.status, ToolCallStatus::Error);
    assert_eq!(
        call.output.unwrap().error.as_deref(),
        Some("Permission denied")
    );

    // The denial is offered back to the model as a tool message and the turn
    // still completes normally.
    let handle = router.session();
    let log = handle.lock().unwrap();
    assert!(log
        .messages
        .iter()
        .any(|m| m.role == Role::Tool && m.as_text() == Some("Permission denied")));
    assert!(matches!(
        events.last(),
        Some(RouterEvent::Done { cancelled: false, .. })
    ));
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn pre_cancelled_turn_leaves_marker_and_done_event() {
    let provider = Arc::new(ScriptedMockProvider::always_text("never seen"));
    let router = Router::new(
        provider,
        Arc::new(ToolRegistry::new()),
        session(),
        RouterConfig::default(),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let (events, result) = drive(&router, "do something", cancel).await;
    result.unwrap();

    assert!(
        matches!(events.last(), Some(RouterEvent::Done { cancelled: true, .. })),
        "cancellation must surface as a Done outcome, not an error"
    );
    let handle = router.session();
    let log = handle.lock().unwrap();
    // User message retained; assistant slot carries the marker.
    assert_eq!(log.messages[0].role, Role::User);
    assert_eq!(log.messages.last().unwrap().as_text(), Some("(cancelled)"));
}

// ── Hop limit ────────────────────────────────────────────────────────────────

struct AlwaysToolCalls {
    calls: std::sync::atomic::AtomicUsize,
}

#[async_trait::async_trait]
impl ChatProvider for AlwaysToolCalls {
    fn name(&self) -> &str {
        "always-tool-calls"
    }
    async fn chat_stream(
        &self,
        _req: tenx_model::ChatRequest,
        _cancel: CancellationToken,
    ) -> Result<tenx_model::EventStream, tenx_model::ProviderError> {
        let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let events = vec![
            Ok(StreamEvent::ToolCallDelta {
                index: 0,
                id: format!("loop_{n}"),
                name: "read".into(),
                arguments: r#"{"path":"/tmp/tenx_missing.txt"}"#.into(),
            }),
            Ok(StreamEvent::FinishReason("tool_calls".into())),
            Ok(StreamEvent::Done),
        ];
        Ok(Box::pin(futures_stream(events)))
    }
}

fn futures_stream(
    events: Vec<Result<StreamEvent, tenx_model::ProviderError>>,
) -> impl futures::Stream<Item = Result<StreamEvent, tenx_model::ProviderError>> {
    futures::stream::iter(events)
}

#[tokio::test]
async fn hop_limit_forces_a_synthetic_stop() {
    let provider = Arc::new(AlwaysToolCalls {
        calls: std::sync::atomic::AtomicUsize::new(0),
    });
    let call_counter = Arc::clone(&provider);

    let mut registry = ToolRegistry::new();
    registry.register(ReadTool);

    let config = RouterConfig {
        max_hops: 3,
        ..RouterConfig::default()
    };
    let router = Router::new(provider, Arc::new(registry), session(), config);

    let (events, result) = drive(&router, "loop forever", CancellationToken::new()).await;
    result.unwrap();

    assert!(matches!(
        events.last(),
        Some(RouterEvent::Done { cancelled: false, .. })
    ));
    assert_eq!(
        call_counter
            .calls
            .load(std::sync::atomic::Ordering::SeqCst),
        3,
        "provider must be called exactly max_hops times"
    );
    let tool_calls = events
        .iter()
        .filter(|e| matches!(e, RouterEvent::ToolCall { .. }))
        .count();
    assert_eq!(tool_calls, 3, "one dispatched call per hop");
}

// ── Classification through the public surface ────────────────────────────────

#[tokio::test]
async fn classify_covers_all_three_tiers() {
    let router = Router::new(
        Arc::new(ScriptedMockProvider::always_text("x")),
        Arc::new(ToolRegistry::new()),
        session(),
        RouterConfig::default(),
    );
    assert_eq!(router.classify("implement a new feature"), ModelTier::Smart);
    assert_eq!(router.classify("what is X"), ModelTier::Superfast);
    let long = "what is the difference between an enum discriminant and a tagged union \
                representation in the compiled output of rustc";
    assert!(long.chars().count() > 80);
    assert_eq!(router.classify(long), ModelTier::Fast);
}
