//! Error types for the operator.
//!
//! Errors fall into three classes that the reconcilers handle differently:
//! not-found (already converged, never retried), skip-one-entity (metadata
//! and archive lookups for a single job URL), and everything else, which is
//! returned so the dispatcher re-delivers the key with backoff.

use kube::runtime::finalizer;
use thiserror::Error;

/// Result type alias for operator operations.
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors that can occur while converging metrics clusters.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// The object does not exist.
    #[error("{kind} {key} not found")]
    NotFound {
        /// Resource kind
        kind: String,
        /// `namespace/name` of the object
        key: String,
    },

    /// The object already exists.
    #[error("{kind} {key} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// `namespace/name` of the object
        key: String,
    },

    /// A call against the orchestration API failed.
    #[error("couldn't {verb} {kind} {key}: {message}")]
    Api {
        /// Operation that failed (get, list, create, update, delete)
        verb: &'static str,
        /// Resource kind
        kind: String,
        /// `namespace/name` of the object, or the namespace for lists
        key: String,
        /// Underlying failure
        message: String,
    },

    /// An HTTP fetch for job metadata or an artifact listing failed.
    #[error("couldn't fetch {url}: {message}")]
    Fetch {
        /// URL that was requested
        url: String,
        /// Underlying failure
        message: String,
    },

    /// No metric archive was found for a job.
    #[error("no prometheus archive found for job {0}")]
    ArchiveNotFound(String),

    /// A job URL does not sit under the configured source base URL.
    #[error("job url {url} is not under source base url {base}")]
    ForeignJobUrl {
        /// Declared job URL
        url: String,
        /// Configured source base URL
        base: String,
    },

    /// A metrics cluster cannot be converged as declared.
    #[error("invalid metrics cluster {name}: {reason}")]
    InvalidCluster {
        /// Cluster name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Object (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Adding, running or removing the metrics cluster finalizer failed.
    ///
    /// Boxed because the finalizer error embeds this type.
    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<finalizer::Error<OperatorError>>),

    /// One or more convergence steps failed; the rest were applied.
    #[error("{} convergence step(s) failed: {}", .0.len(), summarize(.0))]
    Steps(Vec<OperatorError>),
}

impl OperatorError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: impl Into<String>, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.to_string(),
        }
    }

    /// Creates an API error.
    #[must_use]
    pub fn api(
        verb: &'static str,
        kind: impl Into<String>,
        key: impl std::fmt::Display,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Api {
            verb,
            kind: kind.into(),
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    /// Creates a fetch error.
    #[must_use]
    pub fn fetch(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error means the object is already gone.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether re-delivering the same key could succeed.
    ///
    /// Invalid clusters and configuration errors stay broken until a human
    /// changes something, so retrying them only burns API calls.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotFound { .. }
            | Self::InvalidCluster { .. }
            | Self::ForeignJobUrl { .. }
            | Self::Config(_) => false,
            Self::Steps(errors) => errors.iter().any(Self::is_retryable),
            Self::Finalizer(error) => match error.as_ref() {
                finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => {
                    e.is_retryable()
                }
                _ => true,
            },
            _ => true,
        }
    }
}

fn summarize(errors: &[OperatorError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
