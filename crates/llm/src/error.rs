use thiserror::Error;

/// Why a backend could not be brought to the ready state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InitError {
    #[error("missing credential: {0} is not set")]
    MissingCredential(String),
    #[error("invalid credential in {var}: {reason}")]
    InvalidCredential { var: String, reason: String },
    #[error("missing model resource: {0}")]
    MissingResource(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("failed to start runtime: {0}")]
    Runtime(String),
    #[error("failed to load model: {0}")]
    Model(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenError {
    #[error("backend {0} is not initialized")]
    NotReady(String),
    #[error("{provider} request failed: {reason}")]
    Request { provider: String, reason: String },
    #[error("{provider} returned status {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("{provider} rate limited after {retries} retries")]
    RateLimited { provider: String, retries: usize },
    #[error("malformed {provider} response: {reason}")]
    Malformed { provider: String, reason: String },
    #[error("inference failed: {0}")]
    Inference(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("backend id {0} is registered twice")]
    DuplicateBackend(String),
    #[error("unknown backend {0}")]
    UnknownBackend(String),
}
