//! Adapters for IP-intelligence services
//!
//! Every adapter returns its own wire payload wrapped in [`ProviderPayload`];
//! [`ProviderPayload::into_report`] validates it into the canonical
//! [`ProviderReport`]. Nothing past this module sees provider field names.

pub mod ipapi;
pub mod ipinfo;
pub mod local_asn;

use async_trait::async_trait;
use std::net::IpAddr;
use thiserror::Error;

pub use ipapi::{IpApiProvider, IpApiResponse};
pub use ipinfo::{IpInfoProvider, IpInfoResponse};
pub use local_asn::{AsnRecord, LocalAsnProvider};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider call timed out")]
    Timeout,
    #[error("provider rate limited the call")]
    RateLimited,
    #[error("provider answered with HTTP {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider could not resolve the address: {0}")]
    Rejected(String),
    #[error("malformed provider payload: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Rate limits, server errors, transport failures and timeouts are worth
    /// another attempt; anything else moves on to the next provider
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::RateLimited | ProviderError::Transport(_) => {
                true
            }
            ProviderError::Status(code) => *code >= 500,
            ProviderError::Rejected(_) | ProviderError::Malformed(_) => false,
        }
    }

    pub fn from_status(status: reqwest::StatusCode) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ProviderError::RateLimited
        } else {
            ProviderError::Status(status.as_u16())
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Network characteristics a provider vouched for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkFlags {
    pub hosting: bool,
    pub proxy: bool,
    pub vpn: bool,
    pub mobile: bool,
    /// The provider itself classifies the network as a consumer ISP
    pub isp: bool,
}

/// Canonical lookup result shared by every provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderReport {
    pub provider: &'static str,
    /// Organization the address is registered to
    pub organization: Option<String>,
    pub asn: Option<u32>,
    pub asn_organization: Option<String>,
    pub isp: Option<String>,
    pub domain: Option<String>,
    pub hostname: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub flags: NetworkFlags,
}

impl ProviderReport {
    /// "City, Region, Country" from whatever parts are known
    pub fn location(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.city, &self.region, &self.country]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

/// Raw payload of one provider
#[derive(Debug, Clone)]
pub enum ProviderPayload {
    IpApi(IpApiResponse),
    IpInfo(IpInfoResponse),
    LocalAsn(AsnRecord),
}

impl ProviderPayload {
    pub fn into_report(self) -> Result<ProviderReport, ProviderError> {
        match self {
            ProviderPayload::IpApi(payload) => payload.into_report(),
            ProviderPayload::IpInfo(payload) => payload.into_report(),
            ProviderPayload::LocalAsn(record) => Ok(record.into_report()),
        }
    }
}

#[async_trait]
pub trait IpIntelProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// One attempt, no retries. Callers bound the duration.
    async fn lookup(&self, ip: IpAddr) -> Result<ProviderPayload, ProviderError>;
}

/// Empty strings from providers mean "unknown"
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split "AS15169 Google LLC" into its number and organization
pub(crate) fn split_as_field(raw: &str) -> (Option<u32>, Option<String>) {
    let raw = raw.trim();
    let (head, rest) = raw.split_once(' ').unwrap_or((raw, ""));
    match head
        .strip_prefix("AS")
        .or_else(|| head.strip_prefix("as"))
        .and_then(|n| n.parse::<u32>().ok())
    {
        Some(asn) => (Some(asn), non_empty(Some(rest.to_string()))),
        None => (None, non_empty(Some(raw.to_string()))),
    }
}

/// Fill `{ip}` in an endpoint template, or append the address to the path
pub(crate) fn endpoint_for(template: &str, ip: IpAddr) -> String {
    if template.contains("{ip}") {
        template.replace("{ip}", &ip.to_string())
    } else {
        format!("{}/{}", template.trim_end_matches('/'), ip)
    }
}
