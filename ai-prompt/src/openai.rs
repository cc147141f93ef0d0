use crate::client::{PromptAdapter, Provider, outgoing_history};
use crate::error::{PromptError, Result};
use crate::transport::Transport;
use crate::types::{Content, History, Request, Response, Role, Usage};
use crate::xml::{PromptSerializer, RolePlacement};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const OPENAI_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Chat Completions adapter. The request role is embedded in the prompt
/// document and every message carries its content as one flat string.
#[derive(Clone)]
pub struct OpenAiAdapter {
    transport: Arc<dyn Transport>,
    serializer: PromptSerializer,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAiAdapter {
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
            url: OPENAI_CHAT_COMPLETIONS_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn headers(&self) -> [(&'static str, String); 3] {
        [
            ("Accept", "application/json".to_string()),
            ("Content-Type", "application/json".to_string()),
            ("Authorization", format!("Bearer {}", self.api_key)),
        ]
    }
}

#[async_trait]
impl PromptAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn send(&self, request: &Request) -> Result<Response> {
        let document = self.serializer.serialize(request, RolePlacement::Document)?;
        let history = outgoing_history(request, document);

        let body = OpenAiChatRequest::new(&self.model, request, &history);
        let body = serde_json::to_value(&body)
            .map_err(|e| PromptError::InvalidRequest(format!("openai request body: {e}")))?;

        let reply = self
            .transport
            .post(&self.url, &self.headers(), &body)
            .await
            .map_err(|e| {
                tracing::error!(%e, "openai request failed without a response");
                PromptError::Connectivity {
                    provider: Provider::OpenAI,
                    message: e.to_string(),
                }
            })?;
        tracing::debug!(status = reply.status, "openai reply received");

        let parsed = decode(&reply.body)?;
        parsed.into_response(history)
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<OpenAiMessage>,
}

impl<'a> OpenAiChatRequest<'a> {
    fn new(model: &'a str, request: &Request, history: &[History]) -> Self {
        Self {
            model,
            max_tokens: request.maximum_tokens,
            temperature: request.temperature,
            messages: history.iter().map(OpenAiMessage::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

impl From<&History> for OpenAiMessage {
    fn from(h: &History) -> Self {
        Self {
            role: h.role.as_str(),
            content: h.joined_text(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    id: String,
    object: String,
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: OpenAiUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    role: Role,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl OpenAiChatResponse {
    fn into_response(self, mut history: Vec<History>) -> Result<Response> {
        let Some(choice) = self.choices.into_iter().next() else {
            return Err(PromptError::response_format(
                Provider::OpenAI,
                "response contained no choices",
            ));
        };

        let role = choice.message.role;
        let contents = vec![Content::text(choice.message.content)];
        history.push(History::new(role, contents.clone()));

        Ok(Response {
            id: self.id,
            response_type: self.object,
            model: self.model,
            role,
            contents,
            stop_reason: choice.finish_reason,
            stop_sequence: None,
            usage: Usage {
                input_tokens: self.usage.prompt_tokens,
                output_tokens: self.usage.completion_tokens,
            },
            history,
        })
    }
}

/// `{"error": {"type": ..., "message": ..., ...}}`
#[derive(Debug, Deserialize)]
struct OpenAiErrorEnvelope {
    error: OpenAiErrorBody,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

fn decode(body: &str) -> Result<OpenAiChatResponse> {
    let format_error =
        |e: serde_json::Error| PromptError::response_format(Provider::OpenAI, e.to_string());

    let value: serde_json::Value = serde_json::from_str(body).map_err(format_error)?;
    if value.get("error").is_some() {
        let envelope: OpenAiErrorEnvelope = serde_json::from_value(value).map_err(format_error)?;
        tracing::warn!(
            error_type = %envelope.error.kind,
            "openai returned an error envelope"
        );
        return Err(PromptError::Provider {
            provider: Provider::OpenAI,
            message: format!("{} ({})", envelope.error.kind, envelope.error.message),
        });
    }

    serde_json::from_value(value).map_err(format_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedTransport;
    use crate::types::Example;
    use serde_json::json;

    const MODEL: &str = "gpt-4o-mini";
    const ANSWER: &str = "PHP will likely outlive humanity.";

    fn success_body() -> String {
        json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1677652288,
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": ANSWER},
                "logprobs": null,
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120}
        })
        .to_string()
    }

    fn adapter(transport: Arc<ScriptedTransport>) -> OpenAiAdapter {
        OpenAiAdapter::new(
            transport,
            PromptSerializer::bundled().unwrap(),
            "API KEY",
            MODEL,
        )
    }

    fn language_request() -> Request {
        Request::new()
            .with_role("You are an expert in software development")
            .with_input("Which programming language will outlive humanity?")
            .with_temperature(0.5)
            .with_maximum_tokens(300)
            .with_example(Example::new(
                "Which programming language do you think will still be used in the year 3125?",
                "I think PHP will be around for at least another 7 million years.",
            ))
    }

    #[tokio::test]
    async fn sends_prompt_as_single_flat_user_message_with_role_in_document() {
        let transport = Arc::new(ScriptedTransport::reply(200, &success_body()));
        adapter(transport.clone())
            .send(&language_request())
            .await
            .unwrap();

        let expected_xml = "<?xml version=\"1.0\"?>\n<prompt xmlns=\"https://static.elliotjreed.com\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:schemaLocation=\"https://static.elliotjreed.com https://static.elliotjreed.com/prompt.xsd\"><role><![CDATA[You are an expert in software development]]></role><user_input><![CDATA[Which programming language will outlive humanity?]]></user_input><examples><example><example_prompt><![CDATA[Which programming language do you think will still be used in the year 3125?]]></example_prompt><example_response><![CDATA[I think PHP will be around for at least another 7 million years.]]></example_response></example></examples></prompt>\n";
        assert_eq!(
            transport.last_body(),
            json!({
                "model": MODEL,
                "max_tokens": 300,
                "temperature": 0.5,
                "messages": [{"role": "user", "content": expected_xml}]
            })
        );
    }

    #[tokio::test]
    async fn posts_with_bearer_authorization() {
        let transport = Arc::new(ScriptedTransport::reply(200, &success_body()));
        adapter(transport.clone())
            .send(&Request::new().with_input("hi"))
            .await
            .unwrap();

        let post = &transport.posts()[0];
        assert_eq!(post.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(post.header("authorization"), Some("Bearer API KEY"));
        assert_eq!(post.header("accept"), Some("application/json"));
        assert_eq!(post.header("x-api-key"), None);
    }

    #[tokio::test]
    async fn block_history_is_flattened_in_order() {
        let transport = Arc::new(ScriptedTransport::reply(200, &success_body()));
        let prior = vec![
            History::user("Is X any good?"),
            History::new(
                Role::Assistant,
                vec![Content::text("X is a "), Content::text("good language.")],
            ),
        ];
        adapter(transport.clone())
            .send(&language_request().with_history(prior))
            .await
            .unwrap();

        let body = transport.last_body();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], json!({"role": "user", "content": "Is X any good?"}));
        assert_eq!(
            messages[1],
            json!({"role": "assistant", "content": "X is a good language."})
        );
        assert_eq!(messages[2]["role"], "user");
        assert!(messages[2]["content"].as_str().unwrap().starts_with("<?xml"));
    }

    #[tokio::test]
    async fn maps_choice_and_usage_into_response() {
        let transport = Arc::new(ScriptedTransport::reply(200, &success_body()));
        let request = language_request().with_history(vec![History::assistant("X is a good language.")]);
        let response = adapter(transport).send(&request).await.unwrap();

        assert_eq!(response.id, "chatcmpl-123");
        assert_eq!(response.response_type, "chat.completion");
        assert_eq!(response.model, "gpt-4o-mini-2024-07-18");
        assert_eq!(response.role, Role::Assistant);
        assert_eq!(response.text(), ANSWER);
        assert_eq!(response.stop_reason, "stop");
        assert_eq!(response.stop_sequence, None);
        assert_eq!(
            response.usage,
            Usage {
                input_tokens: 100,
                output_tokens: 20
            }
        );
        assert_eq!(response.history.len(), 3);
        assert_eq!(response.history[0], History::assistant("X is a good language."));
        assert_eq!(response.history[1].role, Role::User);
        assert_eq!(response.history[2], History::assistant(ANSWER));
        assert_eq!(request.history.len(), 1);
    }

    #[tokio::test]
    async fn error_envelope_becomes_provider_error() {
        let body = json!({
            "error": {
                "message": "You exceeded your current quota, please check your plan and billing details.",
                "type": "insufficient_quota",
                "param": null,
                "code": "insufficient_quota"
            }
        })
        .to_string();
        let transport = Arc::new(ScriptedTransport::reply(429, &body));
        let err = adapter(transport)
            .send(&Request::new().with_input("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::Provider { provider: Provider::OpenAI, .. }));
        assert_eq!(
            err.to_string(),
            "insufficient_quota (You exceeded your current quota, please check your plan and billing details.)"
        );
    }

    #[tokio::test]
    async fn empty_choices_is_a_format_error() {
        let body = json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "model": MODEL,
            "choices": [],
            "usage": {"prompt_tokens": 1, "completion_tokens": 0}
        })
        .to_string();
        let transport = Arc::new(ScriptedTransport::reply(200, &body));
        let err = adapter(transport)
            .send(&Request::new().with_input("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::ResponseFormat { provider: Provider::OpenAI, .. }));
        assert!(err.to_string().contains("no choices"));
    }

    #[tokio::test]
    async fn non_json_body_is_a_format_error() {
        let transport = Arc::new(ScriptedTransport::reply(200, "Service Unavailable"));
        let err = adapter(transport)
            .send(&Request::new().with_input("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::ResponseFormat { .. }));
        assert!(!matches!(err, PromptError::Provider { .. }));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connectivity_error() {
        let transport = Arc::new(ScriptedTransport::unreachable("connection refused"));
        let err = adapter(transport)
            .send(&Request::new().with_input("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::Connectivity { provider: Provider::OpenAI, .. }));
    }

    #[tokio::test]
    async fn anthropic_history_replays_through_openai() {
        let anthropic_turn = History::new(Role::Assistant, vec![Content::text("Hello from blocks")]);
        let transport = Arc::new(ScriptedTransport::reply(200, &success_body()));
        adapter(transport.clone())
            .send(&Request::new().with_input("hi").with_history(vec![anthropic_turn]))
            .await
            .unwrap();
        assert_eq!(
            transport.last_body()["messages"][0],
            json!({"role": "assistant", "content": "Hello from blocks"})
        );
    }
}
