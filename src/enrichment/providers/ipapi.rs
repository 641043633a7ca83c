//! Provider A: ip-api.com JSON endpoint

use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;

use super::{
    endpoint_for, non_empty, split_as_field, IpIntelProvider, NetworkFlags, ProviderError,
    ProviderPayload, ProviderReport,
};

pub const NAME: &str = "ip-api";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpApiResponse {
    pub status: String,
    pub message: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region_name: Option<String>,
    pub city: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
    #[serde(rename = "as")]
    pub as_field: Option<String>,
    pub asname: Option<String>,
    pub reverse: Option<String>,
    #[serde(default)]
    pub mobile: bool,
    #[serde(default)]
    pub proxy: bool,
    #[serde(default)]
    pub hosting: bool,
}

impl IpApiResponse {
    pub fn into_report(self) -> Result<ProviderReport, ProviderError> {
        if self.status != "success" {
            return Err(ProviderError::Rejected(
                self.message.unwrap_or_else(|| format!("status '{}'", self.status)),
            ));
        }

        let (asn, as_org) = self
            .as_field
            .as_deref()
            .map(split_as_field)
            .unwrap_or((None, None));
        let hostname = non_empty(self.reverse);

        Ok(ProviderReport {
            provider: NAME,
            organization: non_empty(self.org),
            asn,
            asn_organization: as_org.or(non_empty(self.asname)),
            isp: non_empty(self.isp),
            domain: None,
            hostname,
            country: non_empty(self.country_code).or(non_empty(self.country)),
            region: non_empty(self.region_name),
            city: non_empty(self.city),
            flags: NetworkFlags {
                hosting: self.hosting,
                // ip-api folds VPNs and Tor exits into the proxy flag
                proxy: self.proxy,
                vpn: false,
                mobile: self.mobile,
                isp: false,
            },
        })
    }
}

pub struct IpApiProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl IpApiProvider {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl IpIntelProvider for IpApiProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn lookup(&self, ip: IpAddr) -> Result<ProviderPayload, ProviderError> {
        let response = self.client.get(endpoint_for(&self.endpoint, ip)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(status));
        }

        let payload = response.json::<IpApiResponse>().await?;
        Ok(ProviderPayload::IpApi(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> IpApiProvider {
        IpApiProvider::new(
            reqwest::Client::new(),
            format!("{}/json/{{ip}}", server.uri()),
        )
    }

    #[tokio::test]
    async fn test_success_payload_becomes_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/8.8.4.4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "country": "Germany",
                "countryCode": "DE",
                "regionName": "Berlin",
                "city": "Berlin",
                "isp": "Acme Networks",
                "org": "Acme GmbH",
                "as": "AS64501 Acme GmbH",
                "asname": "ACME-AS",
                "reverse": "gw.acme.de",
                "mobile": false,
                "proxy": false,
                "hosting": false
            })))
            .mount(&server)
            .await;

        let payload = provider(&server)
            .lookup("8.8.4.4".parse().unwrap())
            .await
            .unwrap();
        let report = payload.into_report().unwrap();

        assert_eq!(report.provider, NAME);
        assert_eq!(report.organization.as_deref(), Some("Acme GmbH"));
        assert_eq!(report.asn, Some(64501));
        assert_eq!(report.asn_organization.as_deref(), Some("Acme GmbH"));
        assert_eq!(report.hostname.as_deref(), Some("gw.acme.de"));
        assert_eq!(report.country.as_deref(), Some("DE"));
        assert_eq!(report.flags, NetworkFlags::default());
    }

    #[tokio::test]
    async fn test_fail_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "fail",
                "message": "reserved range"
            })))
            .mount(&server)
            .await;

        let payload = provider(&server)
            .lookup("8.8.4.4".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(
            payload.into_report(),
            Err(ProviderError::Rejected("reserved range".to_string()))
        );
    }

    #[tokio::test]
    async fn test_rate_limit_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = provider(&server)
            .lookup("8.8.4.4".parse().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::RateLimited);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_flags_are_carried() {
        let response = IpApiResponse {
            status: "success".to_string(),
            hosting: true,
            mobile: true,
            ..Default::default()
        };
        let report = response.into_report().unwrap();
        assert!(report.flags.hosting);
        assert!(report.flags.mobile);
        assert!(!report.flags.proxy);
    }
}
