use crate::anthropic::AnthropicAdapter;
use crate::config::PromptConfig;
use crate::error::{PromptError, Result};
use crate::openai::OpenAiAdapter;
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{History, Request, Response};
use crate::xml::PromptSerializer;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAI,
    Anthropic,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAI => f.write_str("openai"),
            Self::Anthropic => f.write_str("anthropic"),
        }
    }
}

/// Sends one structured prompt to a chat provider and normalizes the reply.
#[async_trait]
pub trait PromptAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Serializes `request`, posts it together with its history, and returns
    /// the reply with the extended conversation in [`Response::history`].
    async fn send(&self, request: &Request) -> Result<Response>;
}

/// Caller history followed by the new user turn carrying the prompt document.
pub(crate) fn outgoing_history(request: &Request, document: String) -> Vec<History> {
    let mut history = Vec::with_capacity(request.history.len() + 2);
    history.extend(request.history.iter().cloned());
    history.push(History::user(document));
    history
}

/// The adapter for one provider, chosen once from the model name or config.
#[derive(Clone)]
pub struct PromptClient {
    provider: Provider,
    model: String,
    adapter: Arc<dyn PromptAdapter>,
}

impl PromptClient {
    /// Client over HTTPS with the bundled prompt schema.
    ///
    /// The bundled schema is located through the crate's source directory at
    /// build time, so a binary deployed elsewhere should use
    /// [`PromptClient::from_config`] with `PromptConfig::schema_path` set
    /// (or `PROMPT_SCHEMA_PATH` in the environment).
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        let serializer = PromptSerializer::bundled()?;
        Ok(Self::with_transport(
            Arc::new(ReqwestTransport::new()),
            serializer,
            api_key,
            model,
        ))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        serializer: PromptSerializer,
        api_key: &str,
        model: &str,
    ) -> Self {
        Self::build(transport, serializer, api_key, model, None)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = %config.model))]
    pub fn from_config(config: &PromptConfig) -> Result<Self> {
        let api_key = config.api_key_for_model().ok_or_else(|| {
            PromptError::Config(format!("no {} api key configured", config.provider()))
        })?;
        let serializer = PromptSerializer::from_schema_path(config.schema_path())?;
        let transport = ReqwestTransport::with_timeout(Duration::from_secs(config.timeout_secs));
        Ok(Self::build(
            Arc::new(transport),
            serializer,
            &api_key,
            &config.model,
            config.endpoint.as_deref(),
        ))
    }

    fn build(
        transport: Arc<dyn Transport>,
        serializer: PromptSerializer,
        api_key: &str,
        model: &str,
        endpoint: Option<&str>,
    ) -> Self {
        let provider = detect_provider(model);
        let adapter: Arc<dyn PromptAdapter> = match provider {
            Provider::OpenAI => {
                let mut a = OpenAiAdapter::new(transport, serializer, api_key, model);
                if let Some(url) = endpoint {
                    a = a.with_endpoint(url);
                }
                Arc::new(a)
            }
            Provider::Anthropic => {
                let mut a = AnthropicAdapter::new(transport, serializer, api_key, model);
                if let Some(url) = endpoint {
                    a = a.with_endpoint(url);
                }
                Arc::new(a)
            }
        };
        tracing::debug!(%provider, model, "prompt adapter selected");
        Self {
            provider,
            model: model.to_string(),
            adapter,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl PromptAdapter for PromptClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn send(&self, request: &Request) -> Result<Response> {
        self.adapter.send(request).await
    }
}

pub fn detect_provider(model: &str) -> Provider {
    let m = model.trim().to_ascii_lowercase();
    if m.starts_with("claude-") {
        return Provider::Anthropic;
    }
    Provider::OpenAI
}
