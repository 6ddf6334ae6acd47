//! DNS-over-HTTPS bootstrap resolver.
//!
//! Looks up the A record of a hostname through a DoH JSON endpoint addressed
//! by IP, so the lookup itself does not depend on the system resolver.
//!
//! The bootstrap client does not verify the endpoint's certificate. Trust is
//! anchored by the fixed endpoint address rather than by the certificate
//! chain; every other connection made by this crate validates certificates.

use crate::types::{TarnhelmError, TarnhelmResult};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Cloudflare's DoH JSON endpoint
pub const DEFAULT_DOH_ENDPOINT: &str = "https://1.1.1.1/dns-query";

/// Timeout for a single DoH lookup
pub const DOH_TIMEOUT: Duration = Duration::from_secs(5);

/// DNS record type for IPv4 address records
pub const RECORD_TYPE_A: u16 = 1;

const DNS_JSON_MEDIA_TYPE: &str = "application/dns-json";

/// One record of the `Answer` section
#[derive(Debug, Clone, Deserialize)]
pub struct DohAnswer {
    /// Record data; an IPv4 address for A records
    pub data: String,

    /// Numeric record type
    #[serde(rename = "type")]
    pub record_type: u16,
}

/// The subset of a DoH JSON response this resolver reads
#[derive(Debug, Clone, Deserialize)]
pub struct DohResponse {
    /// Answer records, absent when the name has none
    #[serde(rename = "Answer", default)]
    pub answer: Vec<DohAnswer>,
}

impl DohResponse {
    /// Data of the first A record, in response order
    pub fn first_a_record(&self) -> Option<&str> {
        self.answer
            .iter()
            .find(|answer| answer.record_type == RECORD_TYPE_A)
            .map(|answer| answer.data.as_str())
    }
}

/// Resolver issuing DoH JSON queries against a fixed endpoint
#[derive(Clone, Debug)]
pub struct DohResolver {
    client: Client,
    endpoint: String,
}

impl DohResolver {
    /// Create a resolver for `endpoint` with the given lookup timeout
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> TarnhelmResult<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(TarnhelmError::HttpError)?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Endpoint this resolver queries
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Resolve the A record of `host`
    #[instrument(skip(self))]
    pub async fn resolve(&self, host: &str) -> TarnhelmResult<IpAddr> {
        debug!(endpoint = %self.endpoint, "Querying DoH endpoint");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("name", host), ("type", "A")])
            .header(reqwest::header::ACCEPT, DNS_JSON_MEDIA_TYPE)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            warn!(status = %response.status(), "DoH endpoint returned non-OK status");
            return Err(TarnhelmError::DohError(format!(
                "DoH status: {}",
                response.status().as_u16()
            )));
        }

        let body = response.bytes().await?;
        let decoded: DohResponse = serde_json::from_slice(&body)?;

        let data = decoded
            .first_a_record()
            .ok_or_else(|| TarnhelmError::DohError(format!("no A record: {}", host)))?;

        let ip = data.trim().parse::<IpAddr>().map_err(|_| {
            TarnhelmError::DohError(format!("A record is not an address: {}", data))
        })?;

        debug!(host = %host, ip = %ip, "DoH lookup succeeded");
        Ok(ip)
    }
}
