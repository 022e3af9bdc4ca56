pub mod aggregator;
pub mod exposition;
pub mod resolver;
pub mod telemetry;

pub use aggregator::{QueryCounter, RetrySettings, RoundCount, DEFAULT_REQUEST_TIMEOUT};
pub use exposition::{MetricSample, SampleMatcher};
pub use resolver::EndpointResolver;
pub use telemetry::Telemetry;
