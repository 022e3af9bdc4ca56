//! Query counting across all resolved metrics endpoints
//!
//! A round scrapes every endpoint and sums the deployment's samples. Any
//! endpoint failure fails the round, and the whole round is retried with
//! exponential backoff until the elapsed time budget runs out.

use crate::metrics::exposition::SampleMatcher;
use crate::metrics::resolver::EndpointResolver;
use crate::metrics::Telemetry;
use crate::{AgoraError, Result};
use backoff::future::retry_notify;
use backoff::ExponentialBackoff;
use futures::future::try_join_all;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub max_elapsed_time: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
            max_elapsed_time: Duration::from_secs(30),
        }
    }
}

impl RetrySettings {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: Some(self.max_elapsed_time),
            ..Default::default()
        }
    }
}

/// Outcome of one successful aggregation round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundCount {
    pub queries: u64,
    pub endpoints: usize,
}

pub struct QueryCounter {
    resolver: EndpointResolver,
    client: reqwest::Client,
    retry: RetrySettings,
    telemetry: Telemetry,
}

impl QueryCounter {
    pub fn new(
        resolver: EndpointResolver,
        request_timeout: Duration,
        retry: RetrySettings,
        telemetry: Telemetry,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AgoraError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            resolver,
            client,
            retry,
            telemetry,
        })
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Total queries served for `workload_id` across all endpoints.
    ///
    /// Zero when there are no endpoints or none reports the deployment yet.
    pub async fn count(&self, workload_id: &str) -> Result<u64> {
        Ok(self.count_round_result(workload_id).await?.queries)
    }

    /// Like [`QueryCounter::count`], also reporting how many endpoints the
    /// successful round scraped.
    pub async fn count_round_result(&self, workload_id: &str) -> Result<RoundCount> {
        let matcher = SampleMatcher::new(workload_id)?;
        let matcher = &matcher;
        let started = Instant::now();

        let result = retry_notify(
            self.retry.backoff(),
            move || async move {
                self.count_round(matcher).await.map_err(|e| {
                    if e.is_transient() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            },
            |e: AgoraError, wait: Duration| {
                self.telemetry.record_retry();
                warn!(
                    deployment = workload_id,
                    retry_in_ms = wait.as_millis() as u64,
                    "Query count round failed: {}",
                    e
                );
            },
        )
        .await;

        result.map_err(|e| {
            self.telemetry.record_failure();
            if e.is_transient() {
                AgoraError::RetriesExhausted {
                    workload: workload_id.to_string(),
                    elapsed: started.elapsed(),
                    source: Box::new(e),
                }
            } else {
                e
            }
        })
    }

    async fn count_round(&self, matcher: &SampleMatcher) -> Result<RoundCount> {
        self.telemetry.record_round();

        let endpoints = self.resolver.resolve();
        if endpoints.is_empty() {
            debug!(
                deployment = matcher.workload_id(),
                "No metrics endpoints resolved"
            );
            return Ok(RoundCount::default());
        }

        let counts = try_join_all(
            endpoints
                .iter()
                .map(|endpoint| self.endpoint_count(endpoint, matcher)),
        )
        .await?;

        Ok(RoundCount {
            queries: counts.into_iter().fold(0u64, u64::saturating_add),
            endpoints: endpoints.len(),
        })
    }

    async fn endpoint_count(&self, endpoint: &Url, matcher: &SampleMatcher) -> Result<u64> {
        let response = self
            .client
            .get(endpoint.clone())
            .send()
            .await
            .map_err(|source| AgoraError::EndpointRequest {
                url: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgoraError::EndpointStatus {
                url: endpoint.to_string(),
                status,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| AgoraError::EndpointRequest {
                url: endpoint.to_string(),
                source,
            })?;

        let count = matcher.sum(&body);
        debug!(
            deployment = matcher.workload_id(),
            endpoint = %endpoint,
            count,
            "Number of queries reported by endpoint"
        );

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_budget() {
        let settings = RetrySettings::default();
        let backoff = settings.backoff();

        assert_eq!(backoff.max_elapsed_time, Some(Duration::from_secs(30)));
        assert_eq!(backoff.initial_interval, Duration::from_millis(100));
        assert_eq!(backoff.current_interval, Duration::from_millis(100));
        assert_eq!(backoff.multiplier, 2.0);
    }

    #[tokio::test]
    async fn test_count_without_endpoints_is_zero() {
        let directory = crate::k8s::EndpointDirectory::new();
        let resolver = EndpointResolver::with_directory(
            "http://indexer-service:7300/metrics",
            "default",
            directory,
        )
        .unwrap();
        let counter = QueryCounter::new(
            resolver,
            DEFAULT_REQUEST_TIMEOUT,
            RetrySettings::default(),
            Telemetry::new().unwrap(),
        )
        .unwrap();

        assert_eq!(
            counter.count_round_result("Qm123").await.unwrap(),
            RoundCount {
                queries: 0,
                endpoints: 0
            }
        );
        assert_eq!(counter.telemetry().rounds_total(), 1);
        assert_eq!(counter.telemetry().retries_total(), 0);
    }

    #[test]
    fn test_only_endpoint_errors_are_transient() {
        assert!(AgoraError::EndpointStatus {
            url: "http://10.0.0.1:7300/metrics".to_string(),
            status: reqwest::StatusCode::BAD_GATEWAY,
        }
        .is_transient());
        assert!(!AgoraError::InvalidServiceName("My_Service".to_string()).is_transient());
    }
}
