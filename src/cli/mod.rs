pub mod commands;

use crate::k8s::NAMESPACE_PATH;
use crate::metrics::{
    EndpointResolver, QueryCounter, RetrySettings, Telemetry, DEFAULT_REQUEST_TIMEOUT,
};
use crate::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "agora-metrics")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Query volume metrics for indexer services, with Kubernetes endpoint discovery", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, env = "LOG_LEVEL", default_value = "warn", global = true, help = "Log filter (trace, debug, info, warn, error or an env-filter directive)")]
    pub log_level: String,

    #[arg(long, env = "JSON_LOGS", global = true, help = "Output logs in JSON format")]
    pub json_logs: bool,

    #[command(flatten)]
    pub target: EndpointTarget,

    #[command(flatten)]
    pub scrape: ScrapeOptions,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Where the indexer-service metrics live
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct EndpointTarget {
    #[arg(
        long,
        env = "INDEXER_SERVICE_METRICS_ENDPOINT",
        help = "Comma-separated indexer-service metrics URLs"
    )]
    pub metrics_endpoints: Option<String>,

    #[arg(
        long,
        env = "INDEXER_SERVICE_METRICS_K8S_SERVICE",
        help = "Metrics URL whose host is the Kubernetes service to discover, e.g. http://indexer-service:7300/metrics"
    )]
    pub metrics_k8s_service: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ScrapeOptions {
    #[arg(long, default_value = NAMESPACE_PATH, help = "File holding the pod's namespace")]
    pub namespace_file: PathBuf,

    #[arg(long, env = "METRICS_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs(), help = "Timeout of a single metrics request")]
    pub request_timeout_secs: u64,

    #[arg(long, env = "METRICS_RETRY_MAX_ELAPSED_SECS", default_value_t = 30, help = "Time budget for retrying a failed count")]
    pub retry_max_elapsed_secs: u64,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Count queries served for deployments")]
    Count {
        #[arg(required = true, help = "Deployment IDs (IPFS hashes)")]
        deployments: Vec<String>,

        #[arg(short, long, value_enum, default_value = "text", help = "Output format")]
        format: OutputFormat,
    },
    #[command(about = "List the metrics endpoints currently resolved")]
    Endpoints {
        #[arg(long, default_value_t = 5, help = "Seconds to wait for discovery to find endpoints")]
        wait_secs: u64,
    },
    #[command(about = "Count queries periodically until interrupted")]
    Watch {
        #[arg(required = true, help = "Deployment IDs (IPFS hashes)")]
        deployments: Vec<String>,

        #[arg(short, long, env = "MEASUREMENT_PERIOD", default_value_t = 60, help = "Seconds between counts")]
        interval_secs: u64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl EndpointTarget {
    pub async fn resolver(&self, options: &ScrapeOptions, telemetry: Telemetry) -> Result<EndpointResolver> {
        match (&self.metrics_endpoints, &self.metrics_k8s_service) {
            (Some(endpoints), _) => EndpointResolver::from_static(endpoints),
            (None, Some(template)) => {
                EndpointResolver::kubernetes(template, &options.namespace_file, telemetry).await
            }
            (None, None) => Err(crate::AgoraError::ConfigError(
                "either --metrics-endpoints or --metrics-k8s-service is required".to_string(),
            )),
        }
    }
}

impl ScrapeOptions {
    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings {
            max_elapsed_time: Duration::from_secs(self.retry_max_elapsed_secs),
            ..Default::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Build the counter for the configured target
pub async fn query_counter(target: &EndpointTarget, options: &ScrapeOptions) -> Result<QueryCounter> {
    let telemetry = Telemetry::new()?;
    let resolver = target.resolver(options, telemetry.clone()).await?;

    QueryCounter::new(
        resolver,
        options.request_timeout(),
        options.retry_settings(),
        telemetry,
    )
}
