use crate::{AgoraError, Result};
use k8s_openapi::api::core::v1::Endpoints;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Namespace file mounted into every pod by the service account admission controller.
pub const NAMESPACE_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// A Kubernetes service, identified by name within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub namespace: String,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Resolve the namespace from the given file, read once.
    pub fn from_namespace_file(name: impl Into<String>, path: &Path) -> Result<Self> {
        let namespace = read_namespace(path)?;
        Ok(Self::new(name, namespace))
    }

    /// Resolve the namespace of the pod this process runs in.
    pub fn in_cluster(name: impl Into<String>) -> Result<Self> {
        Self::from_namespace_file(name, Path::new(NAMESPACE_PATH))
    }

    /// Field selector matching only this service's `Endpoints` object.
    pub fn field_selector(&self) -> String {
        format!("metadata.name={}", self.name)
    }

    pub fn matches(&self, endpoints: &Endpoints) -> bool {
        endpoints.metadata.name.as_deref() == Some(self.name.as_str())
    }
}

impl std::fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

pub fn read_namespace(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path).map_err(|e| AgoraError::NamespaceUnavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let namespace = raw.trim();
    if namespace.is_empty() {
        return Err(AgoraError::NamespaceUnavailable {
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        });
    }

    Ok(namespace.to_string())
}

/// Flatten the ready addresses of every subset, in feed order.
pub fn endpoint_addresses(endpoints: &Endpoints) -> Vec<String> {
    endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.addresses.iter().flatten())
        .filter(|address| !address.ip.is_empty())
        .map(|address| address.ip.clone())
        .collect()
}
