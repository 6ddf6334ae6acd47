//! Censorship-resistant HTTP transport.
//!
//! [`build_client`] produces a `reqwest` client whose hostname resolution goes
//! through an [`AntiCensorshipDialer`]. The dialer answers from the shared
//! [`ResolutionCache`], resolves hosts that are known targets of DNS
//! tampering over DNS-over-HTTPS, and otherwise dials the literal hostname.
//! TLS still verifies certificates against the original hostname.

use crate::cache::ResolutionCache;
use crate::dns::{DEFAULT_DOH_ENDPOINT, DOH_TIMEOUT, DohResolver};
use crate::types::{TarnhelmError, TarnhelmResult};
use reqwest::Client;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Browser user agent sent with every search and fetch request
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Default TCP connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default TCP keep-alive interval
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Default overall request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Redirects followed before a request fails
pub const MAX_REDIRECTS: usize = 10;

/// Configuration for the resilient transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// DoH JSON endpoint, addressed by IP
    pub doh_endpoint: String,

    /// Timeout for a single DoH lookup
    pub doh_timeout: Duration,

    /// Hosts containing any of these strings are resolved over DoH
    pub doh_domains: Vec<String>,

    /// TCP connect timeout
    pub connect_timeout: Duration,

    /// TCP keep-alive interval
    pub keep_alive: Duration,

    /// Overall timeout for one request, redirects included
    pub request_timeout: Duration,

    /// Redirect limit per request
    pub max_redirects: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            doh_endpoint: DEFAULT_DOH_ENDPOINT.to_string(),
            doh_timeout: DOH_TIMEOUT,
            doh_domains: vec!["duckduckgo.com".to_string()],
            connect_timeout: CONNECT_TIMEOUT,
            keep_alive: KEEP_ALIVE,
            request_timeout: REQUEST_TIMEOUT,
            max_redirects: MAX_REDIRECTS,
        }
    }
}

/// Resolution hook consulted for every new connection.
#[derive(Clone, Debug)]
pub struct AntiCensorshipDialer {
    cache: ResolutionCache,
    doh: DohResolver,
    doh_domains: Arc<[String]>,
}

impl AntiCensorshipDialer {
    /// Create a dialer sharing `cache`
    pub fn new(config: &TransportConfig, cache: ResolutionCache) -> TarnhelmResult<Self> {
        Ok(Self {
            cache,
            doh: DohResolver::new(config.doh_endpoint.clone(), config.doh_timeout)?,
            doh_domains: config.doh_domains.clone().into(),
        })
    }

    /// Whether `host` should be resolved over DoH
    pub fn needs_doh(&self, host: &str) -> bool {
        self.doh_domains
            .iter()
            .any(|domain| host.contains(domain.as_str()))
    }

    /// The address to dial for `host`: a cached or DoH-resolved IP, or the
    /// hostname itself. DoH failures fall back to the hostname.
    pub async fn dial_target(&self, host: &str) -> String {
        if let Some(ip) = self.cache.get(host).await {
            debug!(host = %host, ip = %ip, "Resolution cache hit");
            return ip.to_string();
        }

        if !self.needs_doh(host) {
            return host.to_string();
        }

        match self.doh.resolve(host).await {
            Ok(ip) => {
                self.cache.set(host, ip).await;
                ip.to_string()
            },
            Err(e) => {
                warn!(host = %host, error = %e, "DoH resolution failed, dialing hostname");
                host.to_string()
            },
        }
    }

    /// Socket addresses for `host`, with port 0 left for the connector to fill
    pub async fn dial(&self, host: &str) -> std::io::Result<Vec<SocketAddr>> {
        let target = self.dial_target(host).await;

        if let Ok(ip) = target.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, 0)]);
        }

        let addrs = tokio::net::lookup_host((target.as_str(), 0)).await?;
        Ok(addrs.collect())
    }
}

impl Resolve for AntiCensorshipDialer {
    fn resolve(&self, name: Name) -> Resolving {
        let dialer = self.clone();
        Box::pin(async move {
            let addrs = dialer.dial(name.as_str()).await?;
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

/// Build an HTTP client dialing through an [`AntiCensorshipDialer`] on `cache`
pub fn build_client(config: &TransportConfig, cache: ResolutionCache) -> TarnhelmResult<Client> {
    let dialer = AntiCensorshipDialer::new(config, cache)?;

    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .tcp_keepalive(config.keep_alive)
        .gzip(true)
        .brotli(true)
        .no_proxy()
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        .dns_resolver(Arc::new(dialer))
        .build()
        .map_err(TarnhelmError::HttpError)
}

/// Run `fut`, failing with [`TarnhelmError::Timeout`] once `deadline` passes
pub(crate) async fn with_deadline<F, T>(deadline: Option<Instant>, fut: F) -> TarnhelmResult<T>
where
    F: Future<Output = TarnhelmResult<T>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| TarnhelmError::Timeout)?,
        None => fut.await,
    }
}
