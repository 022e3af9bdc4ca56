pub mod client;
pub mod directory;
pub mod types;
pub mod watcher;

pub use client::K8sClient;
pub use directory::{EndpointDirectory, EndpointSet};
pub use types::{endpoint_addresses, read_namespace, ServiceIdentity, NAMESPACE_PATH};
pub use watcher::EndpointsWatcher;
