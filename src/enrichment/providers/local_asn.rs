//! Offline fallback backed by the MaxMind ASN database

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;

use super::{IpIntelProvider, ProviderError, ProviderPayload, ProviderReport};
use crate::enrichment::geoip::GeoIpService;

pub const NAME: &str = "local-asn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsnRecord {
    pub asn: Option<u32>,
    pub organization: Option<String>,
}

impl AsnRecord {
    pub fn into_report(self) -> ProviderReport {
        ProviderReport {
            provider: NAME,
            // The registrant of the AS is all this database knows
            organization: self.organization.clone(),
            asn: self.asn,
            asn_organization: self.organization,
            ..Default::default()
        }
    }
}

pub struct LocalAsnProvider {
    geoip: Arc<GeoIpService>,
}

impl LocalAsnProvider {
    pub fn new(geoip: Arc<GeoIpService>) -> Self {
        Self { geoip }
    }
}

#[async_trait]
impl IpIntelProvider for LocalAsnProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn lookup(&self, ip: IpAddr) -> Result<ProviderPayload, ProviderError> {
        let record = self
            .geoip
            .asn(ip)
            .ok_or_else(|| ProviderError::Rejected("no ASN record".to_string()))?;
        Ok(ProviderPayload::LocalAsn(AsnRecord {
            asn: record.asn,
            organization: record.organization,
        }))
    }
}
