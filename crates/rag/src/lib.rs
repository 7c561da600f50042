//! Retrieval-augmented question answering over a loaded table.
//!
//! [`Session`] is the entry point: load a table, ask questions, inspect and
//! switch backends. Every user-facing outcome is a displayable string;
//! failures carry the [`ERROR_PREFIX`].

pub mod config;
pub mod embedding;
pub mod orchestrator;
pub mod retriever;
pub mod session;

pub use config::{
    ConfigError, EmbeddingConfig, EmbeddingProvider, EngineConfig, GenerationConfig, RetrievalConfig,
    DEFAULT_CONTEXT_BUDGET, DEFAULT_MAX_RESPONSE_CHARS, DEFAULT_TOP_K,
};
pub use embedding::{EmbeddingBackend, EmbeddingClient, OpenAiEmbeddingClient};
pub use orchestrator::{clean_output, is_error_message, Orchestrator, EMPTY_ANSWER, ERROR_PREFIX};
pub use retriever::{assemble_context, Retrieval, RetrievedUnit, Retriever, NO_DATA_LOADED};
pub use session::{Role, Session, SessionError, Turn, EMPTY_QUESTION};

pub use datachat_core::{Table, NO_DATA_PREVIEW};
pub use datachat_llm::{BackendDescriptor, BackendKind, BackendStatus, Language};
