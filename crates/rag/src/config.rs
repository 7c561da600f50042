use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use datachat_core::DocumentConfig;
use datachat_llm::{BackendConfig, BackendSpec, Language, DEFAULT_PERSONA, LOCAL_INFERENCE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_CONTEXT_BUDGET: usize = 1000;
pub const DEFAULT_MAX_RESPONSE_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Engine settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub embedding: EmbeddingConfig,
    pub backends: Vec<BackendConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
            embedding: EmbeddingConfig::default(),
            backends: BackendConfig::defaults(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Characters of retrieved text allowed into a prompt.
    pub context_budget: usize,
    pub preview_rows: usize,
    #[serde(flatten)]
    pub document: DocumentConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            context_budget: DEFAULT_CONTEXT_BUDGET,
            preview_rows: 10,
            document: DocumentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub default_backend: String,
    pub language: Language,
    pub max_response_chars: usize,
    pub persona: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let default_backend = if LOCAL_INFERENCE { "phi3-local" } else { "extractive" };
        Self {
            default_backend: default_backend.to_string(),
            language: Language::En,
            max_response_chars: DEFAULT_MAX_RESPONSE_CHARS,
            persona: DEFAULT_PERSONA.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Hash,
    OpenAi,
}

impl FromStr for EmbeddingProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "hash" => Ok(EmbeddingProvider::Hash),
            "openai" => Ok(EmbeddingProvider::OpenAi),
            other => Err(format!("unknown embedding provider '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    /// Hash embedder vector length.
    pub dimensions: usize,
    pub seed: u64,
    pub model: String,
    /// Vector length requested from the remote embeddings API.
    pub remote_dimensions: usize,
    pub api_key_env: String,
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hash,
            dimensions: 64,
            seed: 1337,
            model: "text-embedding-3-small".to_string(),
            remote_dimensions: 1536,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Defaults with `DATACHAT_*` overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Applies overrides from `lookup`. Unparsable values are logged and
    /// ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("DATACHAT_BACKEND") {
            self.generation.default_backend = backend;
        }
        override_parsed(&lookup, "DATACHAT_LANGUAGE", &mut self.generation.language);
        override_parsed(&lookup, "DATACHAT_TOP_K", &mut self.retrieval.top_k);
        override_parsed(&lookup, "DATACHAT_CONTEXT_BUDGET", &mut self.retrieval.context_budget);
        override_parsed(
            &lookup,
            "DATACHAT_MAX_RESPONSE_CHARS",
            &mut self.generation.max_response_chars,
        );
        override_parsed(&lookup, "DATACHAT_EMBEDDING_PROVIDER", &mut self.embedding.provider);
        override_parsed(&lookup, "DATACHAT_EMBEDDING_DIMENSIONS", &mut self.embedding.dimensions);

        let model = lookup("DATACHAT_LOCAL_MODEL").map(PathBuf::from);
        let tokenizer = lookup("DATACHAT_LOCAL_TOKENIZER").map(PathBuf::from);
        for backend in &mut self.backends {
            if let BackendSpec::LocalQuantized(local) = &mut backend.spec {
                if let Some(path) = &model {
                    local.quantized_weights = Some(path.clone());
                }
                if let Some(path) = &tokenizer {
                    local.tokenizer = Some(path.clone());
                }
            }
        }
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datachat_llm::{BackendKind, MarkerSetting, RemoteProvider};
    use std::collections::HashMap;

    #[test]
    fn empty_file_is_valid() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.context_budget, 1000);
        assert_eq!(config.generation.max_response_chars, 500);
        assert_eq!(config.retrieval.document.chunk.max_size, 1000);
        assert_eq!(config.retrieval.document.chunk.overlap, 200);
        assert_eq!(config.backends.len(), 3);
    }

    #[test]
    fn parses_sections_and_backends() {
        let text = r#"
            [retrieval]
            top_k = 3
            rows_per_group = 4

            [retrieval.chunk]
            max_size = 400

            [generation]
            default_backend = "claude"
            language = "hi"

            [[backends]]
            id = "claude"
            kind = "remote_api"
            provider = "anthropic"
            api_key_env = "MY_CLAUDE_KEY"

            [[backends]]
            id = "offline"
            kind = "extractive"
            markers = { system = "S:", user = "U:", assistant = "A:", end = "\n" }
        "#;
        let config = EngineConfig::from_toml_str(text).unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.retrieval.document.rows_per_group, 4);
        assert_eq!(config.retrieval.document.chunk.max_size, 400);
        assert_eq!(config.retrieval.document.chunk.overlap, 200);
        assert_eq!(config.generation.language, Language::Hi);
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].spec.kind(), BackendKind::RemoteApi);
        match &config.backends[0].spec {
            BackendSpec::RemoteApi(remote) => {
                assert_eq!(remote.provider, RemoteProvider::Anthropic);
                assert_eq!(remote.key_env(), "MY_CLAUDE_KEY");
            }
            other => panic!("unexpected spec {other:?}"),
        }
        assert!(matches!(config.backends[1].markers, Some(MarkerSetting::Custom(_))));
    }

    #[test]
    fn rejects_unknown_backend_kind() {
        let text = "[[backends]]\nid = \"x\"\nkind = \"telepathy\"\n";
        assert!(matches!(
            EngineConfig::from_toml_str(text),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn environment_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("DATACHAT_BACKEND", "openai"),
            ("DATACHAT_LANGUAGE", "ta"),
            ("DATACHAT_TOP_K", "8"),
            ("DATACHAT_CONTEXT_BUDGET", "not-a-number"),
            ("DATACHAT_EMBEDDING_PROVIDER", "openai"),
            ("DATACHAT_LOCAL_MODEL", "/models/phi3-q4.gguf"),
        ]
        .into_iter()
        .collect();
        let mut config = EngineConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.generation.default_backend, "openai");
        assert_eq!(config.generation.language, Language::Ta);
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.retrieval.context_budget, DEFAULT_CONTEXT_BUDGET);
        assert_eq!(config.embedding.provider, EmbeddingProvider::OpenAi);
        let local = config
            .backends
            .iter()
            .find_map(|b| match &b.spec {
                BackendSpec::LocalQuantized(local) => Some(local),
                _ => None,
            })
            .unwrap();
        assert_eq!(local.quantized_weights, Some(PathBuf::from("/models/phi3-q4.gguf")));
    }
}
