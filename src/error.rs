use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgoraError {
    #[error("Failed to read namespace from {path} (probably not running in Kubernetes): {reason}")]
    NamespaceUnavailable { path: PathBuf, reason: String },

    #[error("Invalid Kubernetes service name {0:?}: must be an RFC 1123 DNS label")]
    InvalidServiceName(String),

    #[error("Invalid endpoint URL {url:?}: {reason}")]
    InvalidEndpointUrl { url: String, reason: String },

    #[error("Kubernetes error: {0}")]
    KubernetesError(String),

    #[error("Request to {url} failed: {source}")]
    EndpointRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Endpoint {url} returned status {status}")]
    EndpointStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Gave up counting queries for {workload} after {elapsed:?}: {source}")]
    RetriesExhausted {
        workload: String,
        elapsed: Duration,
        #[source]
        source: Box<AgoraError>,
    },

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AgoraError {
    /// Errors from a single endpoint that warrant re-running the whole round.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgoraError::EndpointRequest { .. } | AgoraError::EndpointStatus { .. }
        )
    }
}

impl From<prometheus::Error> for AgoraError {
    fn from(e: prometheus::Error) -> Self {
        AgoraError::MetricsError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgoraError>;
