use std::env;
use std::fmt;
use std::time::Duration;

use reqwest::{header::HeaderValue, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tokio::time::sleep;

use crate::error::{GenError, InitError};
use crate::provider::RemoteProvider;

/// Settings for a hosted chat-completion backend.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub provider: RemoteProvider,
    pub model: Option<String>,
    /// Overrides the provider's default credential variable.
    pub api_key_env: Option<String>,
    /// Inline credential; takes precedence over the environment.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub max_retries: usize,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            provider: RemoteProvider::OpenAi,
            model: None,
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: 512,
            max_retries: 3,
            timeout_secs: 60,
        }
    }
}

impl RemoteConfig {
    pub fn for_provider(provider: RemoteProvider) -> Self {
        Self {
            provider,
            ..Self::default()
        }
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn key_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.provider.default_key_env())
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("provider", &self.provider)
            .field("model", &self.model())
            .field("api_key_env", &self.key_env())
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl ChatResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// HTTP client bound to one provider, model and credential.
pub struct RemoteClient {
    http: Client,
    provider: RemoteProvider,
    model: String,
    base_url: String,
    api_key: SecretString,
    max_tokens: u32,
    max_retries: usize,
}

impl RemoteClient {
    /// Resolves the credential and builds the HTTP client. No request is made.
    pub fn new(config: &RemoteConfig) -> Result<Self, InitError> {
        Self::with_env(config, &|name: &str| env::var(name).ok())
    }

    /// Like [`RemoteClient::new`], reading variables through `lookup`.
    pub fn with_env(config: &RemoteConfig, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, InitError> {
        let api_key = resolve_api_key(config, lookup)?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|err| InitError::Runtime(err.to_string()))?;
        Ok(Self {
            http,
            provider: config.provider,
            model: config.model().to_string(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| config.provider.default_base_url().to_string()),
            api_key,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    pub fn provider(&self) -> RemoteProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, GenError> {
        match self.provider {
            RemoteProvider::OpenAi | RemoteProvider::Deepseek => self.chat_completions(req).await,
            RemoteProvider::Anthropic => self.chat_anthropic(req).await,
            RemoteProvider::Gemini => self.chat_gemini(req).await,
        }
    }

    pub fn chat_blocking(&self, runtime: &Runtime, req: &ChatRequest) -> Result<ChatResponse, GenError> {
        runtime.block_on(self.chat(req))
    }

    /// OpenAI-compatible `/chat/completions`, retrying on 429 and transport errors.
    async fn chat_completions(&self, req: &ChatRequest) -> Result<ChatResponse, GenError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": req.user }));
        let payload = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
        });
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match self
                .http
                .post(&url)
                .bearer_auth(self.api_key.expose_secret())
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt > self.max_retries {
                        return Err(self.request_error(err));
                    }
                    tracing::debug!(provider = %self.provider, attempt, "retrying after transport error");
                    sleep(backoff_delay(attempt, None)).await;
                    continue;
                }
            };
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt > self.max_retries {
                    return Err(GenError::RateLimited {
                        provider: self.provider.to_string(),
                        retries: self.max_retries,
                    });
                }
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                tracing::warn!(provider = %self.provider, attempt, wait_secs = wait.as_secs(), "rate limited");
                sleep(wait).await;
                continue;
            }
            let value = self.decode_body(response).await?;
            let content = extract_chat_text(&value).ok_or_else(|| self.malformed("missing message text"))?;
            let usage: ChatUsage = value
                .get("usage")
                .and_then(|usage| serde_json::from_value(usage.clone()).ok())
                .unwrap_or_default();
            return Ok(ChatResponse {
                content,
                prompt_tokens: usage.prompt_tokens.unwrap_or(0),
                completion_tokens: usage.completion_tokens.unwrap_or(0),
            });
        }
    }

    async fn chat_anthropic(&self, req: &ChatRequest) -> Result<ChatResponse, GenError> {
        let mut payload = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [ { "role": "user", "content": req.user } ],
        });
        if let Some(system) = &req.system {
            payload["system"] = json!(system);
        }
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .map_err(|err| self.request_error(err))?;
        let value = self.decode_body(response).await?;
        let response: AnthropicResponse =
            serde_json::from_value(value).map_err(|err| self.malformed(&err.to_string()))?;
        let content = response
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or_else(|| self.malformed("missing text block"))?;
        let usage = response.usage.unwrap_or_default();
        Ok(ChatResponse {
            content,
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
        })
    }

    async fn chat_gemini(&self, req: &ChatRequest) -> Result<ChatResponse, GenError> {
        let mut payload = json!({
            "contents": [ { "role": "user", "parts": [ { "text": req.user } ] } ],
            "generationConfig": { "maxOutputTokens": self.max_tokens },
        });
        if let Some(system) = &req.system {
            payload["systemInstruction"] = json!({ "parts": [ { "text": system } ] });
        }
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|err| self.request_error(err))?;
        let value = self.decode_body(response).await?;
        let response: GeminiResponse =
            serde_json::from_value(value).map_err(|err| self.malformed(&err.to_string()))?;
        let content = response
            .candidates
            .and_then(|mut candidates| candidates.pop())
            .and_then(|candidate| candidate.content.parts.into_iter().find_map(|part| part.text))
            .ok_or_else(|| self.malformed("missing candidate text"))?;
        let usage = response.usage.unwrap_or_default();
        Ok(ChatResponse {
            content,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }

    async fn decode_body(&self, response: reqwest::Response) -> Result<Value, GenError> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GenError::Status {
                provider: self.provider.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|err| self.malformed(&err.to_string()))
    }

    fn request_error(&self, err: reqwest::Error) -> GenError {
        GenError::Request {
            provider: self.provider.to_string(),
            reason: err.to_string(),
        }
    }

    fn malformed(&self, reason: &str) -> GenError {
        GenError::Malformed {
            provider: self.provider.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Inline key first, then the configured environment variable.
fn resolve_api_key(
    config: &RemoteConfig,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<SecretString, InitError> {
    let var = config.key_env().to_string();
    let value = match &config.api_key {
        Some(key) => key.clone(),
        None => lookup(&var).ok_or_else(|| InitError::MissingCredential(var.clone()))?,
    };
    config
        .provider
        .validate_key(&value)
        .map_err(|reason| InitError::InvalidCredential { var, reason })?;
    Ok(SecretString::new(value))
}

fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(value) = retry_after {
        if let Ok(text) = value.to_str() {
            if let Ok(secs) = text.parse::<u64>() {
                return Duration::from_secs(secs.clamp(1, 60));
            }
        }
    }
    let capped = attempt.min(6) as u32;
    Duration::from_secs(1u64 << capped)
}

fn extract_chat_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(str::to_string)
}

#[derive(Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    #[serde(rename = "usageMetadata")]
    usage: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_tokens: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    completion_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credential_names_the_variable() {
        let config = RemoteConfig {
            api_key_env: Some("DATACHAT_TEST_REMOTE_UNSET_KEY".to_string()),
            ..RemoteConfig::default()
        };
        match RemoteClient::new(&config) {
            Err(InitError::MissingCredential(var)) => {
                assert_eq!(var, "DATACHAT_TEST_REMOTE_UNSET_KEY")
            }
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn key_is_read_through_lookup() {
        let config = RemoteConfig::for_provider(RemoteProvider::Deepseek);
        let lookup = |name: &str| (name == "DEEPSEEK_API_KEY").then(|| "sk-from-lookup".to_string());
        let client = RemoteClient::with_env(&config, &lookup).unwrap();
        assert_eq!(client.provider(), RemoteProvider::Deepseek);
        assert!(matches!(
            RemoteClient::with_env(&config, &|_: &str| None),
            Err(InitError::MissingCredential(var)) if var == "DEEPSEEK_API_KEY"
        ));
    }

    #[test]
    fn inline_key_is_validated() {
        let config = RemoteConfig {
            api_key: Some("not-a-key".to_string()),
            ..RemoteConfig::for_provider(RemoteProvider::Anthropic)
        };
        assert!(matches!(
            RemoteClient::new(&config),
            Err(InitError::InvalidCredential { .. })
        ));
        let config = RemoteConfig {
            api_key: Some("sk-ant-test".to_string()),
            ..RemoteConfig::for_provider(RemoteProvider::Anthropic)
        };
        let client = RemoteClient::new(&config).unwrap();
        assert_eq!(client.model(), "claude-3-5-haiku-latest");
    }

    #[test]
    fn debug_redacts_inline_key() {
        let config = RemoteConfig {
            api_key: Some("sk-secret-value".to_string()),
            ..RemoteConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret-value"));
        assert!(rendered.contains("[redacted]"));
    }

    #[test]
    fn extracts_chat_text_variants() {
        let plain = json!({ "choices": [ { "message": { "content": "hello" } } ] });
        assert_eq!(extract_chat_text(&plain).as_deref(), Some("hello"));
        let parts = json!({ "choices": [ { "message": { "content": [ { "type": "text", "text": "hi" } ] } } ] });
        assert_eq!(extract_chat_text(&parts).as_deref(), Some("hi"));
        assert_eq!(extract_chat_text(&json!({ "choices": [] })), None);
    }

    #[test]
    fn backoff_honours_retry_after() {
        let header = HeaderValue::from_static("3");
        assert_eq!(backoff_delay(1, Some(&header)), Duration::from_secs(3));
        assert_eq!(backoff_delay(2, None), Duration::from_secs(4));
        assert_eq!(backoff_delay(20, None), Duration::from_secs(64));
    }
}
