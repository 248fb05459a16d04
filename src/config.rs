use std::{
    env, fmt, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::{ollama, openai, Transport};

/// Persisted backend selection. Read once at startup, replaced wholesale on save.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_owned(),
            api_key: String::new(),
            model: "gpt-3.5-turbo".to_owned(),
            endpoint: Some(ollama::DEFAULT_ENDPOINT.to_owned()),
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted record, falling back to [`LlmConfig::default`] when
    /// the file is missing or unreadable.
    pub fn load_or_default(&self) -> LlmConfig {
        match self.load() {
            Ok(config) => {
                info!(path = %self.path.display(), provider = %config.provider, "loaded llm config");
                config
            }
            Err(error) => {
                warn!(path = %self.path.display(), error = %error, "failed to load llm config, using defaults");
                LlmConfig::default()
            }
        }
    }

    pub fn load(&self) -> io::Result<LlmConfig> {
        let raw = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw).map_err(io::Error::other)
    }

    pub async fn save(&self, config: &LlmConfig) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(config).map_err(io::Error::other)?;
        tokio::fs::write(&self.path, contents).await?;
        info!(path = %self.path.display(), provider = %config.provider, "saved llm config");
        Ok(())
    }
}

/// Process-level settings read from `AI_TUNE_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_addr: SocketAddr,
    pub config_path: PathBuf,
    pub openai_base_url: String,
    pub http_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7878)),
            config_path: PathBuf::from("config.json"),
            openai_base_url: openai::DEFAULT_BASE_URL.to_owned(),
            http_timeout: Duration::from_secs(60),
        }
    }
}

impl ServerSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let bind_addr = env::var("AI_TUNE_BIND_ADDR")
            .ok()
            .and_then(|value| value.parse::<SocketAddr>().ok())
            .unwrap_or(defaults.bind_addr);
        let config_path = env::var("AI_TUNE_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.config_path);
        let openai_base_url = env::var("AI_TUNE_OPENAI_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(defaults.openai_base_url);
        let timeout_secs = env::var("AI_TUNE_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0);

        Self {
            bind_addr,
            config_path,
            openai_base_url,
            http_timeout: timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
        }
    }

    pub fn transport(&self) -> Result<Transport, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()?;
        Ok(Transport {
            client,
            openai_base_url: self.openai_base_url.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_record_matches_first_run_values() {
        let config = LlmConfig::default();
        assert_eq!(config.provider, "openai");
        assert!(config.api_key.is_empty());
        assert_eq!(config.model, "gpt-3.5-turbo");
        assert_eq!(
            config.endpoint.as_deref(),
            Some("http://localhost:11434/api/generate")
        );
    }

    #[test]
    fn persisted_keys_are_camel_case() {
        let config: LlmConfig = serde_json::from_str(
            r#"{"provider":"ollama","apiKey":"k","model":"mistral","endpoint":"http://box:11434/api/generate"}"#,
        )
        .expect("valid config");
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.api_key, "k");

        let json = serde_json::to_string(&config).expect("serializable");
        assert!(json.contains("\"apiKey\":\"k\""));
    }

    #[test]
    fn missing_optional_keys_default() {
        let config: LlmConfig =
            serde_json::from_str(r#"{"provider":"lmstudio"}"#).expect("valid config");
        assert!(config.api_key.is_empty());
        assert!(config.model.is_empty());
        assert_eq!(config.endpoint, None);
    }

    #[test]
    fn debug_output_redacts_key() {
        let config = LlmConfig {
            api_key: "sk-live-123".to_owned(),
            ..LlmConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-live-123"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn unreadable_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = ConfigStore::new(dir.path().join("missing.json"));
        assert_eq!(store.load_or_default(), LlmConfig::default());

        std::fs::write(dir.path().join("broken.json"), "{ not json").expect("write");
        let store = ConfigStore::new(dir.path().join("broken.json"));
        assert_eq!(store.load_or_default(), LlmConfig::default());
    }

    #[tokio::test]
    async fn save_overwrites_wholesale() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = ConfigStore::new(dir.path().join("nested").join("config.json"));
        let first = LlmConfig {
            provider: "ollama".to_owned(),
            api_key: "old".to_owned(),
            model: "llama2".to_owned(),
            endpoint: None,
        };
        let second = LlmConfig {
            provider: "lmstudio".to_owned(),
            api_key: String::new(),
            model: "qwen".to_owned(),
            endpoint: Some("http://127.0.0.1:1234/api/v0/chat/completions".to_owned()),
        };

        store.save(&first).await.expect("first save");
        store.save(&second).await.expect("second save");

        assert_eq!(store.load().expect("reload"), second);
    }
}
