//! Error types for the Storage Cluster Operator
//!
//! Provides structured error types for the reconciliation engine, the
//! deletion pipeline, multisite resolution and the storage daemon adapters.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An error annotated with the operation and resource that produced it
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    // =========================================================================
    // Reconciliation Invariant Violations
    // =========================================================================
    #[error("Cluster {existing} already owns namespace {namespace}, rejecting {rejected}")]
    DuplicateCluster {
        namespace: String,
        existing: String,
        rejected: String,
    },

    #[error("Stop signal for {owner} was already fired")]
    SignalAlreadyFired { owner: String },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // Storage Daemon Errors
    // =========================================================================
    #[error("Storage daemon unavailable: {endpoint}")]
    DaemonUnavailable { endpoint: String },

    #[error("Storage daemon operation failed: {operation}: {reason}")]
    DaemonOperationFailed { operation: String, reason: String },

    /// The daemon does not know a resource the operator already created
    #[error("Storage daemon has no {kind} {name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Rendering Errors
    // =========================================================================
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Wrap this error with the operation and resource that produced it
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through context wrapping
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self.root() {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::Http(_)
            | Error::DaemonUnavailable { .. }
            | Error::DaemonOperationFailed { .. } => ErrorAction::RequeueWithBackoff,

            // The daemon may not have caught up with a freshly created resource
            Error::ResourceNotFound { .. } => ErrorAction::RequeueAfter(Duration::from_secs(10)),

            // Invariant violations and bad specs - wait for the user to change something
            Error::DuplicateCluster { .. }
            | Error::Validation(_)
            | Error::MissingField(_)
            | Error::Configuration(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root(),
            Error::Kube(_) | Error::Http(_) | Error::DaemonUnavailable { .. }
        )
    }

    /// Check if the Kubernetes API reported the object as gone
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

/// Context wrapping for results crossing a stage boundary
pub trait ResultExt<T> {
    /// Wrap the error with a static description
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Wrap the error with a lazily built description
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}
