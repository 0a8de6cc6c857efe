//! Typed error hierarchy for the pageforge service.
//!
//! The enums follow the lifecycle of a task:
//! - `IntakeError`: rejected at the HTTP boundary, before any background work
//! - `SynthesisError`, `AssemblyError`, `ProviderError`: stage failures inside a run
//! - `PipelineError`: what a run reports when it ends in `FAILED`
//! - `CallbackError`: delivery failures, logged only
//! - `CacheError`: file cache failures, never fatal to a run

use std::fmt;

use thiserror::Error;

/// Errors surfaced synchronously by task intake.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid secret")]
    Unauthorized,

    #[error("A run for repository {repo_name} is already in progress")]
    AlreadyRunning { repo_name: String },
}

/// Errors from the code synthesis collaborator.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Model credential is not configured")]
    MissingCredential,

    #[error("No response from the code model")]
    EmptyResponse,

    #[error("Code model returned no files")]
    NoFiles,

    #[error("Code model API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Code model request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

/// Errors from merging generated and synthesized files into a FileSet.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Synthesized files contain no application entry point (got: {found})")]
    NoEntryPoint { found: String },

    #[error("Invalid file path in synthesized output: '{0}'")]
    InvalidPath(String),
}

/// Errors from the repository host.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Source-hosting credential is not configured")]
    MissingCredential,

    #[error("Authentication rejected by repository host: {0}")]
    Unauthorized(String),

    #[error("Repository host rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Repository host reported a conflict: {0}")]
    Conflict(String),

    #[error("Not found on repository host: {0}")]
    NotFound(String),

    #[error("Repository host API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected response from repository host: {0}")]
    InvalidResponse(String),

    #[error("Invalid repository host URL: {0}")]
    InvalidUrl(String),

    #[error("Request to repository host failed: {0}")]
    Network(#[source] reqwest::Error),
}

/// The repository-host call a `ProviderError` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOperation {
    CreateRepository,
    CommitFiles,
    EnableStaticHosting,
    ListRuns,
}

impl fmt::Display for HostOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            HostOperation::CreateRepository => "create repository",
            HostOperation::CommitFiles => "add files to repository",
            HostOperation::EnableStaticHosting => "enable static hosting",
            HostOperation::ListRuns => "list workflow runs",
        };
        f.write_str(verb)
    }
}

/// Unrecoverable failure of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Code generation failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("File assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Failed to {operation}: {source}")]
    Provider {
        operation: HostOperation,
        #[source]
        source: ProviderError,
    },
}

impl PipelineError {
    pub fn provider(operation: HostOperation, source: ProviderError) -> Self {
        PipelineError::Provider { operation, source }
    }
}

/// Errors from delivering a callback to the caller's evaluation URL.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Callback URL is empty")]
    MissingUrl,

    #[error("Callback rejected with status {status}")]
    Rejected { status: u16 },

    #[error("Callback request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

/// Errors from the on-disk response cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache entry at {path} is malformed: {source}")]
    Malformed {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cache value could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
}
