use crate::client::{PromptAdapter, Provider, outgoing_history};
use crate::error::{PromptError, Result};
use crate::transport::Transport;
use crate::types::{Content, History, Request, Response, Role, Usage};
use crate::xml::{PromptSerializer, RolePlacement};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Messages API adapter. The request role travels as the top-level `system`
/// field and message content is always a list of typed blocks.
#[derive(Clone)]
pub struct AnthropicAdapter {
    transport: Arc<dyn Transport>,
    serializer: PromptSerializer,
    api_key: String,
    model: String,
    url: String,
}

impl AnthropicAdapter {
    pub fn new(
        transport: Arc<dyn Transport>,
        serializer: PromptSerializer,
        api_key: &str,
        model: &str,
    ) -> Self {
        Self {
            transport,
            serializer,
            api_key: api_key.to_string(),
            model: model.to_string(),
            url: ANTHROPIC_MESSAGES_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn headers(&self) -> [(&'static str, String); 4] {
        [
            ("Accept", "application/json".to_string()),
            ("Content-Type", "application/json".to_string()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ("x-api-key", self.api_key.clone()),
        ]
    }
}

#[async_trait]
impl PromptAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn send(&self, request: &Request) -> Result<Response> {
        let document = self.serializer.serialize(request, RolePlacement::Omitted)?;
        let history = outgoing_history(request, document);

        let body = AnthropicRequest::new(&self.model, request, &history);
        let body = serde_json::to_value(&body)
            .map_err(|e| PromptError::InvalidRequest(format!("anthropic request body: {e}")))?;

        let reply = self
            .transport
            .post(&self.url, &self.headers(), &body)
            .await
            .map_err(|e| {
                tracing::error!(%e, "anthropic request failed without a response");
                PromptError::Connectivity {
                    provider: Provider::Anthropic,
                    message: e.to_string(),
                }
            })?;
        tracing::debug!(status = reply.status, "anthropic reply received");

        let parsed = decode(&reply.body)?;
        Ok(parsed.into_response(history))
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

impl<'a> AnthropicRequest<'a> {
    fn new(model: &'a str, request: &'a Request, history: &'a [History]) -> Self {
        Self {
            model,
            max_tokens: request.maximum_tokens,
            temperature: request.temperature,
            messages: history.iter().map(AnthropicMessage::from).collect(),
            system: request.system_role(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a [Content],
}

impl<'a> From<&'a History> for AnthropicMessage<'a> {
    fn from(h: &'a History) -> Self {
        Self {
            role: h.role.as_str(),
            content: &h.contents,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    role: Role,
    model: String,
    content: Vec<Content>,
    stop_reason: String,
    #[serde(default)]
    stop_sequence: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicResponse {
    fn into_response(self, mut history: Vec<History>) -> Response {
        history.push(History::new(self.role, self.content.clone()));
        Response {
            id: self.id,
            response_type: self.kind,
            model: self.model,
            role: self.role,
            contents: self.content,
            stop_reason: self.stop_reason,
            stop_sequence: self.stop_sequence,
            usage: Usage {
                input_tokens: self.usage.input_tokens,
                output_tokens: self.usage.output_tokens,
            },
            history,
        }
    }
}

/// `{"type": "error", "error": {"type": ..., "message": ...}}`
#[derive(Debug, Deserialize)]
struct AnthropicErrorEnvelope {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

fn decode(body: &str) -> Result<AnthropicResponse> {
    let format_error = |e: serde_json::Error| {
        PromptError::response_format(Provider::Anthropic, e.to_string())
    };

    let value: serde_json::Value = serde_json::from_str(body).map_err(format_error)?;
    if value.get("type").and_then(serde_json::Value::as_str) == Some("error") {
        let envelope: AnthropicErrorEnvelope =
            serde_json::from_value(value).map_err(format_error)?;
        tracing::warn!(
            error_type = %envelope.error.kind,
            "anthropic returned an error envelope"
        );
        return Err(PromptError::Provider {
            provider: Provider::Anthropic,
            message: format!("{} ({})", envelope.error.kind, envelope.error.message),
        });
    }

    let parsed: AnthropicResponse = serde_json::from_value(value).map_err(format_error)?;
    if parsed.content.is_empty() {
        return Err(PromptError::response_format(
            Provider::Anthropic,
            "reply has no content blocks",
        ));
    }
    Ok(parsed)
}
