//! Kubernetes endpoints watcher for a single service
//!
//! Watches the service's `Endpoints` object and republishes the full address
//! list into an [`EndpointDirectory`] on every change.

use crate::k8s::directory::EndpointDirectory;
use crate::k8s::types::{endpoint_addresses, ServiceIdentity};
use crate::metrics::Telemetry;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Endpoints;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::Api;
use std::fmt::Display;
use std::pin::pin;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Long-lived watch on one service's endpoints
pub struct EndpointsWatcher {
    api: Api<Endpoints>,
    handler: EndpointsEventHandler,
}

impl EndpointsWatcher {
    pub fn new(
        api: Api<Endpoints>,
        service: ServiceIdentity,
        directory: EndpointDirectory,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            api,
            handler: EndpointsEventHandler::new(service, directory, telemetry),
        }
    }

    /// Start watching on a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Watch until the stream ends. The kube watcher re-lists and re-watches
    /// on its own after errors, so in practice this never returns.
    pub async fn run(mut self) {
        let service = self.handler.service.clone();
        info!("Starting endpoints watcher for service {}", service);

        let config = watcher::Config::default().fields(&service.field_selector());
        let stream = watcher::watcher(self.api.clone(), config).default_backoff();

        self.handler.consume(stream).await;

        error!(
            "Endpoints watch for service {} ended, endpoint set is frozen at {:?}",
            service,
            self.handler.directory.snapshot()
        );
    }
}

/// Applies watch events to the directory
pub struct EndpointsEventHandler {
    service: ServiceIdentity,
    directory: EndpointDirectory,
    telemetry: Telemetry,
    seen_during_relist: bool,
}

impl EndpointsEventHandler {
    pub fn new(service: ServiceIdentity, directory: EndpointDirectory, telemetry: Telemetry) -> Self {
        Self {
            service,
            directory,
            telemetry,
            seen_during_relist: false,
        }
    }

    /// Drain a watch stream. Stream errors are logged and skipped; the last
    /// good endpoint set stays published.
    pub async fn consume<S, E>(&mut self, stream: S)
    where
        S: Stream<Item = Result<Event<Endpoints>, E>>,
        E: Display,
    {
        let mut stream = pin!(stream);

        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => self.handle(event),
                Err(e) => {
                    self.telemetry.record_skipped_event();
                    warn!("Endpoints watch error for service {}: {}", self.service, e);
                }
            }
        }
    }

    pub fn handle(&mut self, event: Event<Endpoints>) {
        match event {
            Event::Init => {
                debug!("Endpoints watcher (re)listing for service {}", self.service);
                self.seen_during_relist = false;
            }
            Event::InitApply(endpoints) => {
                self.seen_during_relist = true;
                self.apply(&endpoints);
            }
            Event::InitDone => {
                // Relist found no Endpoints object: the service is gone.
                if !self.seen_during_relist {
                    self.replace(Vec::new());
                }
            }
            Event::Apply(endpoints) => self.apply(&endpoints),
            Event::Delete(endpoints) => {
                if self.accepts(&endpoints) {
                    info!("Endpoints for service {} deleted", self.service);
                    self.replace(Vec::new());
                }
            }
        }
    }

    fn apply(&self, endpoints: &Endpoints) {
        if self.accepts(endpoints) {
            self.replace(endpoint_addresses(endpoints));
        }
    }

    fn accepts(&self, endpoints: &Endpoints) -> bool {
        if self.service.matches(endpoints) {
            return true;
        }

        self.telemetry.record_skipped_event();
        warn!(
            "Ignoring Endpoints {:?} received while watching service {}",
            endpoints.metadata.name, self.service
        );
        false
    }

    fn replace(&self, addresses: Vec<String>) {
        let set = self.directory.publish(addresses);
        self.telemetry.record_discovery_event(set.len());

        debug!(
            "Found new endpoint IPs for service {}: {:?}",
            self.service, set
        );
    }
}
