use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::runtime::{Builder, Runtime};

use crate::error::{GenError, InitError};
use crate::extractive::{ExtractiveConfig, ExtractiveModel};
use crate::local::{LocalModel, LocalModelConfig};
use crate::prompt::{FormattedPrompt, MarkerSetting, RoleMarkers};
use crate::remote::{ChatRequest, RemoteClient, RemoteConfig};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(String);

impl BackendId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    LocalQuantized,
    RemoteApi,
    Extractive,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::LocalQuantized => "local_quantized",
            BackendKind::RemoteApi => "remote_api",
            BackendKind::Extractive => "extractive",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a backend: `Uninitialized -> Initializing -> Ready | Failed`.
/// A failed backend goes back through `Initializing` on the next attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum BackendStatus {
    Uninitialized,
    Initializing,
    Ready,
    Failed(String),
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendStatus::Uninitialized => f.write_str("uninitialized"),
            BackendStatus::Initializing => f.write_str("initializing"),
            BackendStatus::Ready => f.write_str("ready"),
            BackendStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendDescriptor {
    pub id: BackendId,
    pub kind: BackendKind,
    pub status: BackendStatus,
    pub model: String,
    pub init_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendSpec {
    LocalQuantized(LocalModelConfig),
    RemoteApi(RemoteConfig),
    Extractive(ExtractiveConfig),
}

impl BackendSpec {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendSpec::LocalQuantized(_) => BackendKind::LocalQuantized,
            BackendSpec::RemoteApi(_) => BackendKind::RemoteApi,
            BackendSpec::Extractive(_) => BackendKind::Extractive,
        }
    }

    pub fn model(&self) -> String {
        match self {
            BackendSpec::LocalQuantized(config) => config.model_name.clone(),
            BackendSpec::RemoteApi(config) => format!("{}/{}", config.provider, config.model()),
            BackendSpec::Extractive(_) => "extractive".to_string(),
        }
    }

    /// Local models are trained on the Phi-3 chat template; chat APIs and
    /// the extractive backend see plain labels.
    pub fn default_markers(&self) -> RoleMarkers {
        match self {
            BackendSpec::LocalQuantized(_) => RoleMarkers::phi3(),
            _ => RoleMarkers::plain(),
        }
    }
}

/// One `[[backends]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: BackendId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markers: Option<MarkerSetting>,
    #[serde(flatten)]
    pub spec: BackendSpec,
}

impl BackendConfig {
    pub fn new(id: impl Into<String>, spec: BackendSpec) -> Self {
        Self {
            id: BackendId::new(id),
            markers: None,
            spec,
        }
    }

    /// The stock registry: an on-device Phi-3, OpenAI, and the offline
    /// extractive fallback.
    pub fn defaults() -> Vec<BackendConfig> {
        vec![
            BackendConfig::new("phi3-local", BackendSpec::LocalQuantized(LocalModelConfig::default())),
            BackendConfig::new("openai", BackendSpec::RemoteApi(RemoteConfig::default())),
            BackendConfig::new("extractive", BackendSpec::Extractive(ExtractiveConfig::default())),
        ]
    }
}

/// Reads environment variables for credentials at initialization.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

fn process_env() -> EnvLookup {
    Arc::new(|name: &str| std::env::var(name).ok())
}

enum Engine {
    Local(LocalModel),
    Remote { client: RemoteClient, runtime: Runtime },
    Extractive(ExtractiveModel),
}

impl Engine {
    fn load(spec: &BackendSpec, env: &EnvLookup) -> Result<Self, InitError> {
        match spec {
            BackendSpec::LocalQuantized(config) => LocalModel::load(config).map(Engine::Local),
            BackendSpec::RemoteApi(config) => {
                let client = RemoteClient::with_env(config, env.as_ref())?;
                let runtime = Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|err| InitError::Runtime(err.to_string()))?;
                Ok(Engine::Remote { client, runtime })
            }
            BackendSpec::Extractive(config) => Ok(Engine::Extractive(ExtractiveModel::new(config.clone()))),
        }
    }

    fn generate(&mut self, prompt: &FormattedPrompt) -> Result<String, GenError> {
        match self {
            Engine::Local(model) => model.generate(&prompt.text),
            Engine::Remote { client, runtime } => {
                let request = ChatRequest {
                    system: Some(prompt.system.clone()),
                    user: prompt.user.clone(),
                };
                let response = client.chat_blocking(runtime, &request)?;
                tracing::debug!(
                    provider = %client.provider(),
                    total_tokens = response.total_tokens(),
                    "remote completion"
                );
                Ok(response.content)
            }
            Engine::Extractive(model) => Ok(model.answer(prompt)),
        }
    }
}

/// A registered generation backend.
///
/// Construction never loads anything. `initialize` does the expensive work
/// once; concurrent callers block on the same guard and observe its result.
pub struct Backend {
    id: BackendId,
    spec: BackendSpec,
    markers: RoleMarkers,
    status: RwLock<BackendStatus>,
    engine: Mutex<Option<Engine>>,
    init_attempts: AtomicU32,
    env: EnvLookup,
}

impl Backend {
    pub fn new(config: BackendConfig) -> Self {
        Self::with_env(config, process_env())
    }

    /// Backend whose credentials come from `env` instead of the process
    /// environment.
    pub fn with_env(config: BackendConfig, env: EnvLookup) -> Self {
        let markers = config
            .markers
            .as_ref()
            .map(MarkerSetting::resolve)
            .unwrap_or_else(|| config.spec.default_markers());
        Self {
            id: config.id,
            spec: config.spec,
            markers,
            status: RwLock::new(BackendStatus::Uninitialized),
            engine: Mutex::new(None),
            init_attempts: AtomicU32::new(0),
            env,
        }
    }

    pub fn id(&self) -> &BackendId {
        &self.id
    }

    pub fn kind(&self) -> BackendKind {
        self.spec.kind()
    }

    pub fn spec(&self) -> &BackendSpec {
        &self.spec
    }

    pub fn markers(&self) -> &RoleMarkers {
        &self.markers
    }

    pub fn status(&self) -> BackendStatus {
        self.status.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.status.read(), BackendStatus::Ready)
    }

    pub fn init_attempts(&self) -> u32 {
        self.init_attempts.load(Ordering::SeqCst)
    }

    pub fn describe(&self) -> BackendDescriptor {
        BackendDescriptor {
            id: self.id.clone(),
            kind: self.kind(),
            status: self.status(),
            model: self.spec.model(),
            init_attempts: self.init_attempts(),
        }
    }

    /// Brings the backend to `Ready`. A no-op once ready; after a failure
    /// the next call tries again.
    pub fn initialize(&self) -> Result<(), InitError> {
        let mut engine = self.engine.lock();
        if engine.is_some() {
            return Ok(());
        }
        let attempt = self.init_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        *self.status.write() = BackendStatus::Initializing;
        let started = Instant::now();
        match Engine::load(&self.spec, &self.env) {
            Ok(loaded) => {
                *engine = Some(loaded);
                *self.status.write() = BackendStatus::Ready;
                tracing::info!(
                    backend = %self.id,
                    kind = %self.kind(),
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "backend ready"
                );
                Ok(())
            }
            Err(err) => {
                *self.status.write() = BackendStatus::Failed(err.to_string());
                tracing::warn!(backend = %self.id, attempt, error = %err, "backend initialization failed");
                Err(err)
            }
        }
    }

    /// Runs one completion. Fails with `NotReady` unless `initialize`
    /// has succeeded.
    pub fn generate(&self, prompt: &FormattedPrompt) -> Result<String, GenError> {
        let mut engine = self.engine.lock();
        let engine = engine
            .as_mut()
            .ok_or_else(|| GenError::NotReady(self.id.to_string()))?;
        let started = Instant::now();
        let output = engine.generate(prompt)?;
        tracing::debug!(
            backend = %self.id,
            prompt_tokens = prompt.token_estimate,
            output_chars = output.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation finished"
        );
        Ok(output)
    }

    /// Drops any loaded model and returns to `Uninitialized`.
    pub fn reset(&self) {
        let mut engine = self.engine.lock();
        *engine = None;
        *self.status.write() = BackendStatus::Uninitialized;
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("status", &self.status())
            .finish()
    }
}
