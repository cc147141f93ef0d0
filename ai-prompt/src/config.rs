//! Prompt client configuration loader.

use crate::client::{Provider, detect_provider};
use crate::error::{PromptError, Result};
use crate::schema::bundled_schema_path;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct PromptConfig {
    pub model: String,
    #[serde(default)]
    pub keys: KeysConfig,
    /// Prompt schema to validate against. Defaults to the bundled `schema/prompt.xsd`.
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
    /// Replaces the provider's public endpoint, e.g. for a compatible gateway.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

fn default_timeout_secs() -> u64 {
    60
}

impl PromptConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            keys: KeysConfig::default(),
            schema_path: None,
            endpoint: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| PromptError::Config(format!("read config {}: {e}", path.display())))?;

        let mut cfg = Self::from_toml_str(&contents)
            .map_err(|e| PromptError::Config(format!("parse config {}: {e}", path.display())))?;

        cfg.apply_env_overrides();
        cfg.validate()?;
        tracing::debug!(path = %path.display(), model = %cfg.model, "prompt config loaded");
        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("PROMPT_MODEL") {
            self.model = v;
        }
        if let Some(v) = non_empty("OPENAI_API_KEY") {
            self.keys.openai_api_key = Some(v);
        }
        if let Some(v) = non_empty("ANTHROPIC_API_KEY") {
            self.keys.anthropic_api_key = Some(v);
        }
        if let Some(v) = non_empty("PROMPT_SCHEMA_PATH") {
            self.schema_path = Some(PathBuf::from(v));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(PromptError::Config("model is required".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(PromptError::Config("timeout_secs must be > 0".to_string()));
        }
        if let Some(endpoint) = &self.endpoint {
            if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
                return Err(PromptError::Config(format!(
                    "endpoint must be an http(s) url, got {endpoint:?}"
                )));
            }
        }
        Ok(())
    }

    pub fn provider(&self) -> Provider {
        detect_provider(&self.model)
    }

    pub fn api_key_for_model(&self) -> Option<String> {
        let key = match self.provider() {
            Provider::Anthropic => &self.keys.anthropic_api_key,
            Provider::OpenAI => &self.keys.openai_api_key,
        };
        key.clone().filter(|s| !s.is_empty())
    }

    pub fn schema_path(&self) -> PathBuf {
        self.schema_path.clone().unwrap_or_else(bundled_schema_path)
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".ai-prompt").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_minimal_toml_with_defaults() {
        let cfg = PromptConfig::from_toml_str(r#"model = "gpt-4o-mini""#).unwrap();
        assert_eq!(cfg.model, "gpt-4o-mini");
        assert_eq!(cfg.timeout_secs, 60);
        assert!(cfg.endpoint.is_none());
        assert_eq!(cfg.schema_path(), bundled_schema_path());
        assert_eq!(cfg.provider(), Provider::OpenAI);
    }

    #[test]
    fn overrides_replace_only_non_empty_values() {
        let mut cfg = PromptConfig::from_toml_str(
            r#"
            model = "gpt-4o"

            [keys]
            openai_api_key = "from-file"
            "#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = HashMap::from([
            ("PROMPT_MODEL", "claude-3-haiku-20240307"),
            ("OPENAI_API_KEY", "  "),
            ("ANTHROPIC_API_KEY", "sk-ant"),
        ]);
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.model, "claude-3-haiku-20240307");
        assert_eq!(cfg.keys.openai_api_key.as_deref(), Some("from-file"));
        assert_eq!(cfg.provider(), Provider::Anthropic);
        assert_eq!(cfg.api_key_for_model().as_deref(), Some("sk-ant"));
    }

    #[test]
    fn schema_path_can_point_outside_the_build_tree() {
        let mut cfg = PromptConfig::new("gpt-4o");
        let env: HashMap<&str, &str> =
            HashMap::from([("PROMPT_SCHEMA_PATH", "/opt/ai-prompt/prompt.xsd")]);
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.schema_path(), PathBuf::from("/opt/ai-prompt/prompt.xsd"));
    }

    #[test]
    fn api_key_follows_model_prefix() {
        let mut cfg = PromptConfig::new("gpt-4o");
        cfg.keys.anthropic_api_key = Some("sk-ant".to_string());
        assert_eq!(cfg.api_key_for_model(), None);
        cfg.keys.openai_api_key = Some(String::new());
        assert_eq!(cfg.api_key_for_model(), None);
        cfg.keys.openai_api_key = Some("sk-openai".to_string());
        assert_eq!(cfg.api_key_for_model().as_deref(), Some("sk-openai"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(PromptConfig::new(" ").validate().is_err());

        let mut cfg = PromptConfig::new("gpt-4o");
        cfg.timeout_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PromptConfig::new("gpt-4o");
        cfg.endpoint = Some("ftp://example.com".to_string());
        assert!(cfg.validate().is_err());

        cfg.endpoint = Some("http://localhost:8080/v1/chat/completions".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[tokio::test]
    async fn load_reads_file_and_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("config.toml");
        std::fs::write(
            &good,
            "model = \"claude-3-haiku-20240307\"\ntimeout_secs = 5\n",
        )
        .unwrap();
        let cfg = PromptConfig::load(Some(good)).await.unwrap();
        assert_eq!(cfg.timeout_secs, 5);

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "model = [").unwrap();
        let err = PromptConfig::load(Some(bad)).await.unwrap_err();
        assert!(matches!(err, PromptError::Config(_)));
        assert!(err.to_string().contains("parse config"));

        let missing = PromptConfig::load(Some(dir.path().join("missing.toml")))
            .await
            .unwrap_err();
        assert!(missing.to_string().contains("read config"));
    }
}
