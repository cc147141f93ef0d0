use crate::client::Provider;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PromptError>;

#[derive(Debug, Error)]
pub enum PromptError {
    /// The serialized prompt did not satisfy the prompt schema.
    #[error("invalid prompt document")]
    InvalidPrompt,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No response was obtained from the provider at all.
    #[error("{provider} request failed: {message}")]
    Connectivity { provider: Provider, message: String },

    #[error("unexpected {provider} response format: {message}")]
    ResponseFormat { provider: Provider, message: String },

    /// The provider answered with its own error envelope, rendered as `"<type> (<message>)"`.
    #[error("{message}")]
    Provider { provider: Provider, message: String },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PromptError {
    /// The provider the failure is attributed to, if the failure happened past serialization.
    pub fn provider(&self) -> Option<Provider> {
        match self {
            Self::Connectivity { provider, .. }
            | Self::ResponseFormat { provider, .. }
            | Self::Provider { provider, .. } => Some(*provider),
            _ => None,
        }
    }

    pub(crate) fn response_format(provider: Provider, message: impl Into<String>) -> Self {
        Self::ResponseFormat {
            provider,
            message: message.into(),
        }
    }
}

impl From<quick_xml::Error> for PromptError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Schema(e.to_string())
    }
}
