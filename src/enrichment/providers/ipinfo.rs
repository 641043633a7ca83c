//! Provider B: ipinfo.io JSON endpoint
//!
//! The free tier only returns `org` ("AS15169 Google LLC"); paid plans add
//! the `company`, `asn` and `privacy` objects, which take precedence.

use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;

use super::{
    endpoint_for, non_empty, split_as_field, IpIntelProvider, NetworkFlags, ProviderError,
    ProviderPayload, ProviderReport,
};

pub const NAME: &str = "ipinfo";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpInfoCompany {
    pub name: Option<String>,
    pub domain: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpInfoAsn {
    pub asn: Option<String>,
    pub name: Option<String>,
    pub domain: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpInfoPrivacy {
    #[serde(default)]
    pub vpn: bool,
    #[serde(default)]
    pub proxy: bool,
    #[serde(default)]
    pub tor: bool,
    #[serde(default)]
    pub relay: bool,
    #[serde(default)]
    pub hosting: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpInfoErrorBody {
    pub title: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpInfoResponse {
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub org: Option<String>,
    pub company: Option<IpInfoCompany>,
    pub asn: Option<IpInfoAsn>,
    pub privacy: Option<IpInfoPrivacy>,
    pub carrier: Option<serde_json::Value>,
    #[serde(default)]
    pub bogon: bool,
    pub error: Option<IpInfoErrorBody>,
}

fn is_kind(kind: &Option<String>, wanted: &str) -> bool {
    kind.as_deref().is_some_and(|k| k.eq_ignore_ascii_case(wanted))
}

impl IpInfoResponse {
    pub fn into_report(self) -> Result<ProviderReport, ProviderError> {
        if let Some(error) = self.error {
            return Err(ProviderError::Rejected(
                error
                    .message
                    .or(error.title)
                    .unwrap_or_else(|| "error payload".to_string()),
            ));
        }
        if self.bogon {
            return Err(ProviderError::Rejected("bogon address".to_string()));
        }

        let (org_asn, org_name) = self
            .org
            .as_deref()
            .map(split_as_field)
            .unwrap_or((None, None));

        let company = self.company.unwrap_or_default();
        let asn = self.asn.unwrap_or_default();
        let privacy = self.privacy.unwrap_or_default();

        let asn_number = asn
            .asn
            .as_deref()
            .and_then(|raw| split_as_field(raw).0)
            .or(org_asn);
        let asn_organization = non_empty(asn.name).or_else(|| org_name.clone());

        let flags = NetworkFlags {
            hosting: privacy.hosting
                || is_kind(&company.kind, "hosting")
                || is_kind(&asn.kind, "hosting"),
            proxy: privacy.proxy || privacy.tor || privacy.relay,
            vpn: privacy.vpn,
            mobile: self.carrier.is_some(),
            isp: is_kind(&company.kind, "isp"),
        };

        Ok(ProviderReport {
            provider: NAME,
            organization: non_empty(company.name).or(org_name),
            asn: asn_number,
            asn_organization,
            isp: None,
            domain: non_empty(company.domain).or(non_empty(asn.domain)),
            hostname: non_empty(self.hostname),
            country: non_empty(self.country),
            region: non_empty(self.region),
            city: non_empty(self.city),
            flags,
        })
    }
}

pub struct IpInfoProvider {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl IpInfoProvider {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token,
        }
    }
}

#[async_trait]
impl IpIntelProvider for IpInfoProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn lookup(&self, ip: IpAddr) -> Result<ProviderPayload, ProviderError> {
        let mut request = self.client.get(endpoint_for(&self.endpoint, ip));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(status));
        }

        let payload = response.json::<IpInfoResponse>().await?;
        Ok(ProviderPayload::IpInfo(payload))
    }
}
