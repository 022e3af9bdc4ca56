pub mod cli;
pub mod error;
pub mod k8s;
pub mod metrics;

pub use error::{AgoraError, Result};
pub use k8s::{EndpointDirectory, ServiceIdentity};
pub use metrics::{EndpointResolver, QueryCounter, RetrySettings, Telemetry};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
