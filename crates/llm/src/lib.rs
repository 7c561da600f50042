//! Generation backends for DataChat.
//!
//! A [`BackendRegistry`] holds a closed set of backend variants: an
//! on-device Phi-3 model (behind the `local-inference` feature), hosted
//! chat APIs, and an offline extractive responder. Backends load lazily
//! on first use and report their lifecycle through [`BackendStatus`].

pub mod backend;
pub mod error;
pub mod extractive;
pub mod local;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod remote;

pub use backend::{
    Backend, BackendConfig, BackendDescriptor, BackendId, BackendKind, BackendSpec, BackendStatus,
    EnvLookup,
};
pub use error::{GenError, InitError, RegistryError};
pub use extractive::{ExtractiveConfig, ExtractiveModel};
pub use local::{LocalModel, LocalModelConfig, Precision, DEFAULT_LOCAL_MODEL};
pub use prompt::{
    estimate_tokens, truncate_chars, FormattedPrompt, GenerationRequest, Language, MarkerPreset,
    MarkerSetting, PromptFormatter, RoleMarkers, DEFAULT_PERSONA, GROUNDING_INSTRUCTION,
};
pub use provider::RemoteProvider;
pub use registry::BackendRegistry;
pub use remote::{ChatRequest, ChatResponse, RemoteClient, RemoteConfig};

/// Whether this build can run local models.
pub const LOCAL_INFERENCE: bool = cfg!(feature = "local-inference");
