use std::path::PathBuf;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },
}

/// Validation failures from the execution guard.
///
/// These are data, not exceptions: the guard folds them into a
/// [`crate::delegation::TaskResult`] so a caller fanning out N delegations
/// always gets N results. The variant order mirrors the check order --
/// unknown > orchestrator > no-tools > depth > self > cycle -- and the guard
/// short-circuits on the first violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DelegationError {
    #[error("unknown worker: '{name}'")]
    UnknownWorker { name: String },

    #[error("'{name}' is an orchestrator and cannot be a delegation target")]
    OrchestratorTarget { name: String },

    #[error("worker '{name}' exposes no tools and cannot be delegated to")]
    NoTools { name: String },

    #[error("delegation depth limit reached ({max}); chain: {chain}")]
    DepthExceeded { max: usize, chain: String },

    #[error("worker '{name}' cannot delegate to itself")]
    SelfDelegation { name: String },

    #[error("delegation cycle: '{name}' already appears in chain {chain}")]
    DelegationCycle { name: String, chain: String },
}

/// Failures from the generation oracle (provider/network).
///
/// Unlike [`DelegationError`], these are true errors: a single top-level
/// generation call has no meaningful partial result, so they propagate with
/// `?` and are rendered at the orchestration boundary.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle not reachable at {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("Model '{model}' not available: {message}")]
    ModelNotAvailable { model: String, message: String },

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Malformed oracle response: {0}")]
    MalformedResponse(String),
}

/// Failures at the transport layer (SSE adapter, WebSocket bridge, client).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("endpoint '{endpoint}' is not allow-listed")]
    EndpointNotAllowed { endpoint: String },

    #[error("authentication failed")]
    AuthFailed,

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("connection error: {0}")]
    Connection(String),
}
