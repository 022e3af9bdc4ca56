//! Resolution of the metrics endpoints to scrape
//!
//! Either a fixed list of URLs, or a URL template whose host names a
//! Kubernetes service; in the latter case one URL is produced per address
//! currently backing the service, keeping the template's scheme, port and path.

use crate::k8s::{EndpointDirectory, EndpointsWatcher, K8sClient, ServiceIdentity};
use crate::metrics::Telemetry;
use crate::{AgoraError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use std::path::Path;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

const DNS_LABEL_MAX_LEN: usize = 63;

static DNS_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid DNS label pattern"));

#[derive(Debug)]
pub enum EndpointResolver {
    Static(Vec<Url>),
    Discovery(DiscoveryEndpoints),
}

/// Endpoints backing a Kubernetes service, kept current by a watcher task
#[derive(Debug)]
pub struct DiscoveryEndpoints {
    template: Url,
    service: ServiceIdentity,
    directory: EndpointDirectory,
    watcher: Option<JoinHandle<()>>,
}

impl EndpointResolver {
    /// Parse a comma-separated list of metrics URLs.
    ///
    /// Entries are trimmed and parsed as URLs, so `resolve()` returns them in
    /// normalized form: `http://host:7300` becomes `http://host:7300/` and a
    /// scheme's default port such as `:80` is dropped.
    pub fn from_static(comma_separated: &str) -> Result<Self> {
        let urls = comma_separated
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                Url::parse(entry).map_err(|e| AgoraError::InvalidEndpointUrl {
                    url: entry.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if urls.is_empty() {
            return Err(AgoraError::ConfigError(
                "no metrics endpoints configured".to_string(),
            ));
        }

        Ok(Self::Static(urls))
    }

    /// Watch the service named by the template's host in the namespace read
    /// from `namespace_file`. The watcher starts immediately.
    pub async fn kubernetes(
        template: &str,
        namespace_file: &Path,
        telemetry: Telemetry,
    ) -> Result<Self> {
        let (template, service_name) = parse_service_template(template)?;
        let service = ServiceIdentity::from_namespace_file(service_name, namespace_file)?;

        let client = K8sClient::try_default().await?;
        let directory = EndpointDirectory::new();
        let watcher = EndpointsWatcher::new(
            client.endpoints(&service.namespace),
            service.clone(),
            directory.clone(),
            telemetry,
        )
        .spawn();

        info!("Discovering metrics endpoints of service {}", service);

        Ok(Self::Discovery(DiscoveryEndpoints {
            template,
            service,
            directory,
            watcher: Some(watcher),
        }))
    }

    /// Discovery resolver reading from a directory fed by the caller
    pub fn with_directory(
        template: &str,
        namespace: &str,
        directory: EndpointDirectory,
    ) -> Result<Self> {
        let (template, service_name) = parse_service_template(template)?;

        Ok(Self::Discovery(DiscoveryEndpoints {
            template,
            service: ServiceIdentity::new(service_name, namespace),
            directory,
            watcher: None,
        }))
    }

    /// URLs to scrape right now. Empty while discovery has not yet seen the
    /// service.
    pub fn resolve(&self) -> Vec<Url> {
        match self {
            EndpointResolver::Static(urls) => urls.clone(),
            EndpointResolver::Discovery(discovery) => discovery.resolve(),
        }
    }

    pub fn directory(&self) -> Option<&EndpointDirectory> {
        match self {
            EndpointResolver::Static(_) => None,
            EndpointResolver::Discovery(discovery) => Some(&discovery.directory),
        }
    }

    pub fn service(&self) -> Option<&ServiceIdentity> {
        match self {
            EndpointResolver::Static(_) => None,
            EndpointResolver::Discovery(discovery) => Some(&discovery.service),
        }
    }
}

impl DiscoveryEndpoints {
    fn resolve(&self) -> Vec<Url> {
        self.directory
            .snapshot()
            .iter()
            .filter_map(|address| match substitute_host(&self.template, address) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!("Skipping endpoint {} of service {}: {}", address, self.service, e);
                    None
                }
            })
            .collect()
    }
}

impl Drop for DiscoveryEndpoints {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// Check that `name` is a valid RFC 1123 DNS label, as Kubernetes requires
/// for service names.
pub fn validate_service_name(name: &str) -> Result<()> {
    if name.len() > DNS_LABEL_MAX_LEN || !DNS_LABEL.is_match(name) {
        return Err(AgoraError::InvalidServiceName(name.to_string()));
    }

    Ok(())
}

/// Split a discovery template into the parsed URL and its service name.
fn parse_service_template(template: &str) -> Result<(Url, String)> {
    // Url lowercases hosts, so validate the host as written.
    let host = raw_host(template).ok_or_else(|| AgoraError::InvalidEndpointUrl {
        url: template.to_string(),
        reason: "missing host".to_string(),
    })?;
    validate_service_name(host)?;

    let url = Url::parse(template).map_err(|e| AgoraError::InvalidEndpointUrl {
        url: template.to_string(),
        reason: e.to_string(),
    })?;

    Ok((url, host.to_string()))
}

fn raw_host(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();

    let host = if host_port.starts_with('[') {
        host_port.split_inclusive(']').next().unwrap_or_default()
    } else {
        host_port.split(':').next().unwrap_or_default()
    };

    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Replace only the host of `template` with `address`.
pub fn substitute_host(template: &Url, address: &str) -> Result<Url> {
    let mut url = template.clone();

    let replaced = match address.parse::<IpAddr>() {
        Ok(ip) => url.set_ip_host(ip),
        Err(_) => url.set_host(Some(address)).map_err(|_| ()),
    };

    replaced.map_err(|_| AgoraError::InvalidEndpointUrl {
        url: template.to_string(),
        reason: format!("cannot use {:?} as host", address),
    })?;

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_host_keeps_scheme_port_and_path() {
        let template = Url::parse("http://svc:9090/metrics").unwrap();
        let url = substitute_host(&template, "10.0.0.5").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.5:9090/metrics");
    }

    #[test]
    fn test_substitute_host_ipv6() {
        let template = Url::parse("https://svc:7300/metrics?format=text").unwrap();
        let url = substitute_host(&template, "fd00::5").unwrap();
        assert_eq!(url.as_str(), "https://[fd00::5]:7300/metrics?format=text");
    }

    #[test]
    fn test_substitute_host_without_port() {
        let template = Url::parse("http://svc/metrics").unwrap();
        let url = substitute_host(&template, "10.0.0.5").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.5/metrics");
    }

    #[test]
    fn test_validate_service_name() {
        assert!(validate_service_name("indexer-service").is_ok());
        assert!(validate_service_name("svc0").is_ok());
        assert!(validate_service_name("a").is_ok());

        for invalid in ["My_Service", "Indexer", "-svc", "svc-", "svc.ns", ""] {
            assert!(
                matches!(
                    validate_service_name(invalid),
                    Err(AgoraError::InvalidServiceName(_))
                ),
                "{:?} should be rejected",
                invalid
            );
        }

        assert!(validate_service_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_raw_host() {
        assert_eq!(raw_host("http://svc:9090/metrics"), Some("svc"));
        assert_eq!(raw_host("http://user@My_Service:9090"), Some("My_Service"));
        assert_eq!(raw_host("http://[::1]:9090/metrics"), Some("[::1]"));
        assert_eq!(raw_host("http://svc?x=1"), Some("svc"));
        assert_eq!(raw_host("svc:9090"), None);
        assert_eq!(raw_host("http:///metrics"), None);
    }

    #[test]
    fn test_invalid_host_rejected_before_discovery() {
        let err = EndpointResolver::with_directory(
            "http://My_Service:9090/metrics",
            "default",
            EndpointDirectory::new(),
        )
        .unwrap_err();
        assert!(matches!(err, AgoraError::InvalidServiceName(ref name) if name == "My_Service"));
    }

    #[test]
    fn test_static_resolver_returns_configured_list() {
        let resolver = EndpointResolver::from_static(
            "http://indexer-0:7300/metrics, http://indexer-1:7300/metrics,",
        )
        .unwrap();

        let urls: Vec<String> = resolver.resolve().iter().map(Url::to_string).collect();
        assert_eq!(
            urls,
            vec!["http://indexer-0:7300/metrics", "http://indexer-1:7300/metrics"]
        );
        assert!(resolver.directory().is_none());
    }

    #[test]
    fn test_static_resolver_normalizes_entries() {
        let resolver =
            EndpointResolver::from_static("http://indexer-0:7300,http://indexer-1:80/metrics")
                .unwrap();

        let urls: Vec<String> = resolver.resolve().iter().map(Url::to_string).collect();
        assert_eq!(
            urls,
            vec!["http://indexer-0:7300/", "http://indexer-1/metrics"]
        );
    }

    #[test]
    fn test_static_resolver_rejects_bad_input() {
        assert!(matches!(
            EndpointResolver::from_static(" , "),
            Err(AgoraError::ConfigError(_))
        ));
        assert!(matches!(
            EndpointResolver::from_static("http://ok:1/metrics,not a url"),
            Err(AgoraError::InvalidEndpointUrl { .. })
        ));
    }

    #[test]
    fn test_discovery_resolver_follows_directory() {
        let directory = EndpointDirectory::new();
        let resolver = EndpointResolver::with_directory(
            "http://indexer-service:7300/metrics",
            "default",
            directory.clone(),
        )
        .unwrap();

        assert!(resolver.resolve().is_empty());
        assert_eq!(
            resolver.service(),
            Some(&ServiceIdentity::new("indexer-service", "default"))
        );

        directory.publish(vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
        let urls: Vec<String> = resolver.resolve().iter().map(Url::to_string).collect();
        assert_eq!(
            urls,
            vec!["http://10.0.0.1:7300/metrics", "http://10.0.0.2:7300/metrics"]
        );
    }

    #[tokio::test]
    async fn test_kubernetes_resolver_requires_namespace_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EndpointResolver::kubernetes(
            "http://indexer-service:7300/metrics",
            &dir.path().join("namespace"),
            Telemetry::new().unwrap(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AgoraError::NamespaceUnavailable { .. }));
    }
}
