// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use tenx_model::{Message, MessageContent, Role};

/// Instruction handed to the summarizer alongside the serialised prefix.
pub const SUMMARIZE_PROMPT: &str =
    "You are a context compaction assistant. Summarise the following conversation history \
     in a concise, information-dense way. Preserve all technical details, decisions, file \
     names, code snippets, and tool outputs that may be relevant to future work. \
     The summary will replace the original history to free up context space.";

/// Number of trailing messages preserved verbatim by compaction.
pub(crate) const RETAIN_TAIL: usize = 4;

/// Minimum session length before compaction is allowed.
pub(crate) const MIN_MESSAGES: usize = 6;

/// Serialise a message list into plain text for inclusion in a summarization
/// prompt.  System messages are excluded; tool traffic is rendered inline.
pub fn serialize_history(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| !matches!(m.role, Role::System))
        .map(|m| {
            let role = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
                Role::System => "System",
            };
            let mut text = match &m.content {
                MessageContent::Text(t) => t.clone(),
                MessageContent::Parts(parts) => parts
                    .iter()
                    .map(|p| match p {
                        tenx_model::ContentPart::Text { text } => text.clone(),
                        tenx_model::ContentPart::Image { .. } => "[image]".to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
            };
            if let Some(calls) = &m.tool_calls {
                for c in calls {
                    text.push_str(&format!("\n[tool_call: {}({})]", c.name, c.input));
                }
            }
            format!("{role}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tenx_model::ToolCall;

    use super::*;

    #[test]
    fn history_includes_user_and_assistant_text() {
        let msgs = vec![
            Message::user("What is Rust?"),
            Message::assistant("A systems programming language."),
        ];
        let text = serialize_history(&msgs);
        assert!(text.contains("User: What is Rust?"));
        assert!(text.contains("Assistant: A systems programming language."));
    }

    #[test]
    fn system_messages_are_excluded() {
        let msgs = vec![Message::system("secret prompt"), Message::user("hi")];
        let text = serialize_history(&msgs);
        assert!(!text.contains("secret prompt"));
    }

    #[test]
    fn tool_calls_are_rendered_inline() {
        let call = ToolCall::new("c1", "bash", json!({"command": "ls"}));
        let msgs = vec![Message::assistant_with_tool_calls("", vec![call])];
        let text = serialize_history(&msgs);
        assert!(text.contains("bash"), "{text}");
        assert!(text.contains("ls"), "{text}");
    }

    #[test]
    fn tool_results_are_labelled() {
        let msgs = vec![Message::tool_result("c1", "file1.txt\nfile2.txt")];
        let text = serialize_history(&msgs);
        assert!(text.starts_with("Tool: "));
        assert!(text.contains("file1.txt"));
    }

    #[test]
    fn image_parts_become_placeholders() {
        let msgs = vec![Message::user_with_parts(vec![
            tenx_model::ContentPart::text("look"),
            tenx_model::ContentPart::image("data:image/png;base64,AAAA"),
        ])];
        let text = serialize_history(&msgs);
        assert!(text.contains("[image]"));
        assert!(!text.contains("base64"));
    }

    #[test]
    fn empty_history_is_empty_string() {
        assert_eq!(serialize_history(&[]), "");
    }
}
