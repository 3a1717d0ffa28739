use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tenx_config::ModelTier;

// ─── Content part types ───────────────────────────────────────────────────────

/// A single content part in a multi-part message.
///
/// Images are carried as data URLs (`data:<mime>;base64,<b64>`) or HTTPS URLs;
/// the provider accepts both through the same `image_url` wire field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::Image { url: url.into(), media_type: None }
    }
}

/// The content of a message: a plain string or an ordered part sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

// ─── Tool calls ───────────────────────────────────────────────────────────────

/// Lifecycle of one tool call: created on the first provider delta, running
/// at registry dispatch, terminal on registry return.  Never reused across
/// turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Success,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCallOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A provider-requested tool invocation, stable within one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Parsed JSON argument object.
    pub input: Value,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ToolCallOutput>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            status: ToolCallStatus::Pending,
            output: None,
        }
    }
}

// ─── Messages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in the conversation log.
///
/// Invariant: `tool` messages always carry a `tool_call_id` matching a prior
/// assistant `tool_calls[i].id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_tier: Option<ModelTier>,
}

impl Message {
    fn base(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
            timestamp: Utc::now(),
            model_tier: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::base(Role::System, MessageContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::base(Role::User, MessageContent::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::base(Role::Assistant, MessageContent::Text(text.into()))
    }

    /// Assistant message carrying the completed tool calls of one step.
    pub fn assistant_with_tool_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut m = Self::assistant(text);
        m.tool_calls = Some(calls);
        m
    }

    /// Tool-result message answering a prior assistant tool call.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut m = Self::base(Role::Tool, MessageContent::Text(content.into()));
        m.tool_call_id = Some(call_id.into());
        m
    }

    /// User message built from content parts (text + images).
    /// A single text part collapses to plain text for cleaner serialization.
    pub fn user_with_parts(parts: Vec<ContentPart>) -> Self {
        let content = if parts.is_empty() {
            MessageContent::Text(String::new())
        } else if parts.len() == 1 {
            if let ContentPart::Text { text } = &parts[0] {
                MessageContent::Text(text.clone())
            } else {
                MessageContent::Parts(parts)
            }
        } else {
            MessageContent::Parts(parts)
        };
        Self::base(Role::User, content)
    }

    /// Plain text of this message, if it is a single text block.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            MessageContent::Parts(parts) if parts.len() == 1 => match &parts[0] {
                ContentPart::Text { text } => Some(text),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn has_images(&self) -> bool {
        matches!(&self.content, MessageContent::Parts(parts)
            if parts.iter().any(|p| matches!(p, ContentPart::Image { .. })))
    }

    /// Total characters of textual content.
    pub fn text_len(&self) -> usize {
        match &self.content {
            MessageContent::Text(t) => t.len(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.len(),
                    ContentPart::Image { .. } => 0,
                })
                .sum(),
        }
    }

    /// Coarse token estimate: `ceil(chars / 4)` over textual content.
    /// Exposed purely as a compaction trigger, never for billing.
    pub fn approx_tokens(&self) -> usize {
        self.text_len().div_ceil(4)
    }
}

// ─── Usage ────────────────────────────────────────────────────────────────────

/// Token usage reported by the provider for one or more hops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

// ─── Requests ─────────────────────────────────────────────────────────────────

/// A chat-completions request as handed to the provider client.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Upstream model id (resolved from the tier at the call site).
    pub model: String,
    pub messages: Vec<Message>,
    /// Wire-format tool schemas: `[{type:"function", function:{…}}]`.
    pub tools: Vec<Value>,
    pub stream: bool,
}

impl ChatRequest {
    /// Serialise to the OpenAI-compatible request body.
    pub fn to_body(&self) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": build_wire_messages(&self.messages),
            "stream": self.stream,
        });
        if !self.tools.is_empty() {
            body["tools"] = json!(self.tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

/// Non-streaming chat result.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

fn role_str(r: Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert messages into the OpenAI chat-completions wire array.
///
/// Extracted as a free function so it can be unit-tested without HTTP.
pub fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let content: Value = match &m.content {
                MessageContent::Text(t) => json!(t),
                MessageContent::Parts(parts) => {
                    let arr: Vec<Value> = parts
                        .iter()
                        .map(|p| match p {
                            ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                            ContentPart::Image { url, .. } => json!({
                                "type": "image_url",
                                "image_url": { "url": url },
                            }),
                        })
                        .collect();
                    json!(arr)
                }
            };

            let mut v = json!({ "role": role_str(m.role), "content": content });

            if let Some(calls) = &m.tool_calls {
                let wire_calls: Vec<Value> = calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": c.input.to_string(),
                            }
                        })
                    })
                    .collect();
                v["tool_calls"] = json!(wire_calls);
            }
            if let Some(id) = &m.tool_call_id {
                v["tool_call_id"] = json!(id);
            }
            v
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
