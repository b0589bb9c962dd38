use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use pricebot_core::{ChatTurn, Role, ToolCallRequest, ToolSpec};

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion transport error: {0}")]
    Transport(String),
    #[error("completion API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },
    #[error("completion response could not be decoded: {0}")]
    Decode(String),
    #[error("completion response carried no choices")]
    MissingChoice,
}

/// What one completion round produced: assistant text, tool-call requests,
/// or both.
#[derive(Clone, Debug, Default)]
pub struct CompletionReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl CompletionReply {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// The Completion Service seam. The orchestrator only sees this trait;
/// tests script replies through it.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        turns: &[ChatTurn],
        tools: &[ToolSpec],
    ) -> Result<CompletionReply, CompletionError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint with tool
/// calling. One request per call, no retries at this layer.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireToolDecl<'a>>>,
}

#[derive(Debug, Serialize)]
struct WireToolDecl<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSpec,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

// The wire format carries tool arguments as a JSON-encoded *string*.
#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

impl OpenAiClient {
    pub fn new(
        client: reqwest::Client,
        api_key: SecretString,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self { client, api_key, base_url: base_url.into(), model: model.into() }
    }

    fn wire_messages(turns: &[ChatTurn]) -> Vec<WireMessage> {
        turns.iter().map(Self::wire_message).collect()
    }

    fn wire_message(turn: &ChatTurn) -> WireMessage {
        let role = match turn.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let tool_calls = if turn.tool_calls.is_empty() {
            None
        } else {
            Some(turn.tool_calls.iter().map(Self::wire_tool_call).collect())
        };
        let content = if turn.content.is_empty() && tool_calls.is_some() {
            None
        } else {
            Some(turn.content.clone())
        };
        WireMessage { role, content, tool_call_id: turn.tool_call_id.clone(), tool_calls }
    }

    fn wire_tool_call(call: &ToolCallRequest) -> WireToolCall {
        WireToolCall {
            id: call.id.clone(),
            kind: "function".to_string(),
            function: WireFunction {
                name: call.name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }

    fn reply_from_response(response: WireResponse) -> Result<CompletionReply, CompletionError> {
        let choice = response.choices.into_iter().next().ok_or(CompletionError::MissingChoice)?;
        let mut tool_calls = Vec::with_capacity(choice.message.tool_calls.len());
        for call in choice.message.tool_calls {
            let arguments: Value = if call.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.function.arguments).map_err(|error| {
                    CompletionError::Decode(format!(
                        "tool call `{}` carried invalid arguments: {error}",
                        call.function.name
                    ))
                })?
            };
            tool_calls.push(ToolCallRequest { id: call.id, name: call.function.name, arguments });
        }
        let content = choice.message.content.filter(|text| !text.is_empty());
        Ok(CompletionReply { content, tool_calls })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(
        &self,
        turns: &[ChatTurn],
        tools: &[ToolSpec],
    ) -> Result<CompletionReply, CompletionError> {
        let declarations = if tools.is_empty() {
            None
        } else {
            Some(tools.iter().map(|spec| WireToolDecl { kind: "function", function: spec }).collect())
        };
        let request = WireRequest {
            model: &self.model,
            messages: Self::wire_messages(turns),
            tools: declarations,
        };

        debug!(
            event_name = "llm.request",
            model = %self.model,
            turn_count = turns.len(),
            tool_count = tools.len(),
            "requesting completion"
        );

        let endpoint = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|error| CompletionError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { status: status.as_u16(), body });
        }

        let payload: WireResponse = response
            .json()
            .await
            .map_err(|error| CompletionError::Decode(error.to_string()))?;
        Self::reply_from_response(payload)
    }
}
