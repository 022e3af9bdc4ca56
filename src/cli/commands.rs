use crate::cli::{query_counter, Commands, EndpointTarget, OutputFormat, ScrapeOptions};
use crate::metrics::QueryCounter;
use crate::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::pin;
use std::time::Duration;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct CountReport {
    pub deployment: String,
    pub queries: u64,
    pub endpoints: usize,
}

pub async fn handle_command(
    target: &EndpointTarget,
    options: &ScrapeOptions,
    command: Commands,
) -> Result<()> {
    let counter = query_counter(target, options).await?;

    match command {
        Commands::Count {
            deployments,
            format,
        } => handle_count(&counter, &deployments, format).await,
        Commands::Endpoints { wait_secs } => handle_endpoints(&counter, wait_secs).await,
        Commands::Watch {
            deployments,
            interval_secs,
        } => handle_watch(&counter, &deployments, interval_secs).await,
    }
}

pub async fn handle_count(
    counter: &QueryCounter,
    deployments: &[String],
    format: OutputFormat,
) -> Result<()> {
    let mut reports = Vec::with_capacity(deployments.len());

    for deployment in deployments {
        let round = counter.count_round_result(deployment).await?;
        reports.push(CountReport {
            deployment: deployment.clone(),
            queries: round.queries,
            endpoints: round.endpoints,
        });
    }

    match format {
        OutputFormat::Text => {
            for report in &reports {
                println!("{} {}", report.deployment, report.queries);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }

    Ok(())
}

async fn handle_endpoints(counter: &QueryCounter, wait_secs: u64) -> Result<()> {
    let resolver = counter.resolver();

    if let Some(directory) = resolver.directory() {
        info!(
            "Waiting up to {}s for endpoints of service {:?}",
            wait_secs,
            resolver.service()
        );
        directory
            .wait_populated(Duration::from_secs(wait_secs))
            .await;
    }

    let endpoints = resolver.resolve();
    if endpoints.is_empty() {
        warn!("No metrics endpoints resolved");
    }
    for endpoint in endpoints {
        println!("{}", endpoint);
    }

    Ok(())
}

async fn handle_watch(
    counter: &QueryCounter,
    deployments: &[String],
    interval_secs: u64,
) -> Result<()> {
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    watch_until(counter, deployments, interval_secs, shutdown).await;

    print!("{}", counter.telemetry().render()?);
    Ok(())
}

/// Count on every tick and log the change since the previous observation,
/// until `shutdown` completes. A failed count skips that deployment for the
/// tick.
pub async fn watch_until<F>(
    counter: &QueryCounter,
    deployments: &[String],
    interval_secs: u64,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut previous: HashMap<String, u64> = HashMap::new();
    let mut shutdown = pin!(shutdown);

    info!(
        "Counting queries for {} deployments every {}s",
        deployments.len(),
        interval_secs
    );

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            _ = interval.tick() => {
                for deployment in deployments {
                    observe(counter, deployment, &mut previous).await;
                }
            }
        }
    }
}

async fn observe(counter: &QueryCounter, deployment: &str, previous: &mut HashMap<String, u64>) {
    let queries = match counter.count(deployment).await {
        Ok(queries) => queries,
        Err(e) => {
            warn!(deployment, "Skipping observation: {}", e);
            return;
        }
    };

    match previous.insert(deployment.to_string(), queries) {
        Some(last) if queries < last => warn!(
            deployment,
            queries, last, "Query count went backwards, an indexer-service probably restarted"
        ),
        Some(last) => info!(deployment, queries, delta = queries - last, "Observed queries"),
        None => info!(deployment, queries, "Observed queries"),
    }
}
