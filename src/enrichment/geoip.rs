//! Offline lookups against MaxMind GeoLite2/GeoIP2 databases
//!
//! The City database fills `country`/`city` on logged events; the ASN
//! database backs the last provider in the enrichment chain.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoLocation {
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsnLookup {
    pub asn: Option<u32>,
    pub organization: Option<String>,
}

/// Memory-mapped readers, cheap to clone
#[derive(Clone, Default)]
pub struct GeoIpService {
    city_reader: Option<Arc<Reader<Mmap>>>,
    asn_reader: Option<Arc<Reader<Mmap>>>,
}

fn open(path: &str, kind: &str) -> Result<Arc<Reader<Mmap>>> {
    let reader = unsafe { Reader::open_mmap(path) }
        .with_context(|| format!("Failed to open GeoIP {kind} database at {path}"))?;
    Ok(Arc::new(reader))
}

impl GeoIpService {
    pub fn new(city_path: Option<&str>, asn_path: Option<&str>) -> Result<Self> {
        Ok(Self {
            city_reader: city_path.map(|p| open(p, "City")).transpose()?,
            asn_reader: asn_path.map(|p| open(p, "ASN")).transpose()?,
        })
    }

    pub fn has_city(&self) -> bool {
        self.city_reader.is_some()
    }

    pub fn has_asn(&self) -> bool {
        self.asn_reader.is_some()
    }

    /// Geographic location, empty when unknown or no City database is loaded
    pub fn locate(&self, ip: IpAddr) -> GeoLocation {
        let mut location = GeoLocation::default();
        let Some(reader) = &self.city_reader else {
            return location;
        };
        let Ok(result) = reader.lookup(ip) else {
            return location;
        };

        if let Ok(Some(city)) = result.decode::<geoip2::City>() {
            location.country_code = city.country.iso_code.map(|s| s.to_string());
            location.region = city
                .subdivisions
                .first()
                .and_then(|s| s.names.english)
                .map(|s| s.to_string());
            location.city = city.city.names.english.map(|s| s.to_string());
        } else if let Ok(Some(country)) = result.decode::<geoip2::Country>() {
            // Country-only databases share the layout
            location.country_code = country.country.iso_code.map(|s| s.to_string());
        }

        location
    }

    /// Autonomous system of the address, `None` without an ASN database or record
    pub fn asn(&self, ip: IpAddr) -> Option<AsnLookup> {
        let reader = self.asn_reader.as_ref()?;
        let result = reader.lookup(ip).ok()?;
        let asn = result.decode::<geoip2::Asn>().ok()??;
        Some(AsnLookup {
            asn: asn.autonomous_system_number,
            organization: asn.autonomous_system_organization.map(|s| s.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_path_is_an_error() {
        assert!(GeoIpService::new(Some("/nonexistent/city.mmdb"), None).is_err());
        assert!(GeoIpService::new(None, Some("/nonexistent/asn.mmdb")).is_err());
    }

    #[test]
    fn test_no_databases_yields_empty_lookups() {
        let geoip = GeoIpService::new(None, None).unwrap();
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        assert!(!geoip.has_city());
        assert_eq!(geoip.locate(ip), GeoLocation::default());
        assert_eq!(geoip.asn(ip), None);
    }
}
