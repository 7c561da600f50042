use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Hosted chat-completion services a remote backend can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteProvider {
    #[default]
    OpenAi,
    Anthropic,
    Gemini,
    Deepseek,
}

impl RemoteProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteProvider::OpenAi => "openai",
            RemoteProvider::Anthropic => "anthropic",
            RemoteProvider::Gemini => "gemini",
            RemoteProvider::Deepseek => "deepseek",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            RemoteProvider::OpenAi => "gpt-4o-mini",
            RemoteProvider::Anthropic => "claude-3-5-haiku-latest",
            RemoteProvider::Gemini => "gemini-1.5-flash",
            RemoteProvider::Deepseek => "deepseek-chat",
        }
    }

    /// Environment variable the credential is read from unless overridden.
    pub fn default_key_env(&self) -> &'static str {
        match self {
            RemoteProvider::OpenAi => "OPENAI_API_KEY",
            RemoteProvider::Anthropic => "ANTHROPIC_API_KEY",
            RemoteProvider::Gemini => "GEMINI_API_KEY",
            RemoteProvider::Deepseek => "DEEPSEEK_API_KEY",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            RemoteProvider::OpenAi => "https://api.openai.com/v1",
            RemoteProvider::Anthropic => "https://api.anthropic.com/v1",
            RemoteProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            RemoteProvider::Deepseek => "https://api.deepseek.com/v1",
        }
    }

    /// Checks the key has the provider's prefix.
    pub fn validate_key(&self, key: &str) -> Result<(), String> {
        let prefix = match self {
            RemoteProvider::OpenAi | RemoteProvider::Deepseek => "sk-",
            RemoteProvider::Anthropic => "sk-ant-",
            RemoteProvider::Gemini => "AI",
        };
        if key.trim().is_empty() {
            return Err("key is empty".to_string());
        }
        if !key.starts_with(prefix) {
            return Err(format!("{} keys start with '{prefix}'", self.as_str()));
        }
        Ok(())
    }
}

impl fmt::Display for RemoteProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoteProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "openai" => Ok(RemoteProvider::OpenAi),
            "anthropic" => Ok(RemoteProvider::Anthropic),
            "gemini" => Ok(RemoteProvider::Gemini),
            "deepseek" => Ok(RemoteProvider::Deepseek),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}
