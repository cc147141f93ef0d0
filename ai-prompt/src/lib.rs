//! Structured XML prompts for LLM chat APIs.
//!
//! A [`Request`] is rendered into a schema-checked XML prompt document, sent
//! through a provider adapter (Anthropic Messages or OpenAI Chat Completions),
//! and the reply is normalized into a [`Response`] whose `history` can be fed
//! into the next request to continue the conversation.

mod anthropic;
mod client;
mod config;
mod error;
mod openai;
mod schema;
mod transport;
mod types;
mod xml;

pub use anthropic::AnthropicAdapter;
pub use client::{PromptAdapter, PromptClient, Provider, detect_provider};
pub use config::{KeysConfig, PromptConfig, default_config_path};
pub use error::{PromptError, Result};
pub use openai::OpenAiAdapter;
pub use schema::{PromptSchema, bundled_schema_path};
pub use transport::{HttpReply, ReqwestTransport, Transport, TransportError};
pub use types::{
    Content, ContentType, DEFAULT_MAXIMUM_TOKENS, DEFAULT_TEMPERATURE, Example, History, Request,
    Response, Role, Usage,
};
pub use xml::{PROMPT_NAMESPACE, PromptSerializer, RolePlacement};
