use crate::Result;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Self-observability for discovery and aggregation, kept in a private registry.
#[derive(Clone)]
pub struct Telemetry {
    registry: Registry,
    discovery_events: IntCounter,
    skipped_events: IntCounter,
    endpoints: IntGauge,
    rounds: IntCounter,
    retries: IntCounter,
    failures: IntCounter,
}

impl Telemetry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("agora_metrics".to_string()), None)?;

        let discovery_events = IntCounter::new(
            "discovery_events_total",
            "Endpoint sets published by the endpoints watcher",
        )?;
        let skipped_events = IntCounter::new(
            "discovery_skipped_events_total",
            "Watch events or errors that left the endpoint set unchanged",
        )?;
        let endpoints = IntGauge::new(
            "discovered_endpoints",
            "Addresses in the current endpoint set",
        )?;
        let rounds = IntCounter::new(
            "aggregation_rounds_total",
            "Query count rounds attempted, including retries",
        )?;
        let retries = IntCounter::new(
            "aggregation_retries_total",
            "Query count rounds retried after an endpoint failure",
        )?;
        let failures = IntCounter::new(
            "aggregation_failures_total",
            "Query counts that failed after exhausting retries",
        )?;

        registry.register(Box::new(discovery_events.clone()))?;
        registry.register(Box::new(skipped_events.clone()))?;
        registry.register(Box::new(endpoints.clone()))?;
        registry.register(Box::new(rounds.clone()))?;
        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(failures.clone()))?;

        Ok(Self {
            registry,
            discovery_events,
            skipped_events,
            endpoints,
            rounds,
            retries,
            failures,
        })
    }

    pub fn record_discovery_event(&self, endpoint_count: usize) {
        self.discovery_events.inc();
        self.endpoints.set(endpoint_count as i64);
    }

    pub fn record_skipped_event(&self) {
        self.skipped_events.inc();
    }

    pub fn record_round(&self) {
        self.rounds.inc();
    }

    pub fn record_retry(&self) {
        self.retries.inc();
    }

    pub fn record_failure(&self) {
        self.failures.inc();
    }

    pub fn discovery_events_total(&self) -> u64 {
        self.discovery_events.get()
    }

    pub fn skipped_events_total(&self) -> u64 {
        self.skipped_events.get()
    }

    pub fn rounds_total(&self) -> u64 {
        self.rounds.get()
    }

    pub fn retries_total(&self) -> u64 {
        self.retries.get()
    }

    pub fn failures_total(&self) -> u64 {
        self.failures.get()
    }

    /// Render in the Prometheus text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::AgoraError::MetricsError(e.to_string()))
    }
}
