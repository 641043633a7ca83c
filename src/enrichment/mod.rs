//! Company enrichment: which company, if any, is behind an IP address
//!
//! `enrich` never fails. Whatever goes wrong (deadline, every provider
//! erroring, non-routable address) the caller gets an unknown, ambiguous
//! inference with a reason attached.

pub mod classifier;
pub mod geoip;
pub mod ip_ranges;
pub mod providers;
pub mod retry;

use anyhow::{Context, Result};
use moka::future::Cache;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::EnrichmentConfig;
use crate::models::{now_ts, CompanyInference};
use geoip::GeoIpService;
use providers::{
    IpApiProvider, IpInfoProvider, IpIntelProvider, LocalAsnProvider, ProviderError,
    ProviderReport,
};
use retry::{RetryPolicy, RetryState};

/// Why no inference could be produced; neither outcome is cached
#[derive(Debug, Clone, Error)]
enum EnrichFailure {
    #[error("enrichment deadline exceeded")]
    DeadlineExceeded,
    #[error("no provider could resolve the address")]
    AllProvidersFailed,
}

pub struct EnrichmentEngine {
    providers: Vec<Arc<dyn IpIntelProvider>>,
    policy: RetryPolicy,
    timeout: Duration,
    cache: Cache<IpAddr, CompanyInference>,
}

impl EnrichmentEngine {
    pub fn new(
        providers: Vec<Arc<dyn IpIntelProvider>>,
        policy: RetryPolicy,
        timeout: Duration,
        cache_max_entries: u64,
        cache_ttl: Duration,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(cache_max_entries)
            .time_to_live(cache_ttl)
            .build();

        Self {
            providers,
            policy,
            timeout,
            cache,
        }
    }

    /// Provider chain A, B, then the local ASN database when one is loaded
    pub fn from_config(config: &EnrichmentConfig, geoip: Arc<GeoIpService>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("naano/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build provider HTTP client")?;

        let mut chain: Vec<Arc<dyn IpIntelProvider>> = Vec::new();
        if let Some(url) = &config.ipapi_url {
            chain.push(Arc::new(IpApiProvider::new(client.clone(), url.clone())));
        }
        if let Some(url) = &config.ipinfo_url {
            chain.push(Arc::new(IpInfoProvider::new(
                client.clone(),
                url.clone(),
                config.ipinfo_token.clone(),
            )));
        }
        if geoip.has_asn() {
            chain.push(Arc::new(LocalAsnProvider::new(geoip)));
        }
        if chain.is_empty() {
            warn!("No IP-intelligence providers configured, every visit will be unknown");
        }

        let policy = RetryPolicy {
            base_delay: Duration::from_millis(config.base_backoff_ms),
            max_retries: config.max_retries,
            call_timeout: Duration::from_millis(config.provider_call_timeout_ms),
        };

        Ok(Self::new(
            chain,
            policy,
            config.timeout(),
            config.cache_max_entries,
            Duration::from_secs(config.cache_ttl_secs),
        ))
    }

    /// Enrich with the configured deadline
    pub async fn enrich(&self, ip: IpAddr) -> CompanyInference {
        self.enrich_with_timeout(ip, self.timeout).await
    }

    pub async fn enrich_with_timeout(&self, ip: IpAddr, timeout: Duration) -> CompanyInference {
        if ip_ranges::is_non_routable(ip) {
            return CompanyInference::unknown(0, "non-routable address", now_ts());
        }

        let deadline = Instant::now() + timeout;
        let lookup = self.cache.try_get_with(ip, self.resolve(ip, deadline));

        match tokio::time::timeout_at(deadline, lookup).await {
            Ok(Ok(inference)) => CompanyInference {
                created_at: now_ts(),
                ..inference
            },
            Ok(Err(failure)) => {
                debug!(ip = %ip, reason = %failure, "Enrichment produced no identity");
                CompanyInference::unknown(0, failure.to_string(), now_ts())
            }
            Err(_) => {
                debug!(ip = %ip, "Enrichment deadline exceeded");
                CompanyInference::unknown(0, EnrichFailure::DeadlineExceeded.to_string(), now_ts())
            }
        }
    }

    async fn resolve(&self, ip: IpAddr, deadline: Instant) -> Result<CompanyInference, EnrichFailure> {
        for provider in &self.providers {
            match self.call_with_retry(provider.as_ref(), ip, deadline).await {
                Ok(report) => return Ok(classifier::classify(&report)),
                Err(err) => {
                    debug!(
                        ip = %ip,
                        provider = provider.name(),
                        error = %err,
                        "Provider gave up, trying the next one"
                    );
                    if Instant::now() >= deadline {
                        return Err(EnrichFailure::DeadlineExceeded);
                    }
                }
            }
        }
        Err(EnrichFailure::AllProvidersFailed)
    }

    async fn call_with_retry(
        &self,
        provider: &dyn IpIntelProvider,
        ip: IpAddr,
        deadline: Instant,
    ) -> Result<ProviderReport, ProviderError> {
        let mut state = RetryState::start();
        let mut last_error = ProviderError::Timeout;

        loop {
            match state {
                RetryState::Attempting(attempt) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ProviderError::Timeout);
                    }
                    let budget = self.policy.call_timeout.min(remaining);

                    let result = match tokio::time::timeout(budget, provider.lookup(ip)).await {
                        Ok(result) => result.and_then(|payload| payload.into_report()),
                        Err(_) => Err(ProviderError::Timeout),
                    };

                    match result {
                        Ok(report) => return Ok(report),
                        Err(err) => {
                            debug!(
                                provider = provider.name(),
                                attempt,
                                error = %err,
                                "Provider attempt failed"
                            );
                            state = state.on_failure(&err, &self.policy);
                            last_error = err;
                        }
                    }
                }
                RetryState::Backoff { delay, .. } => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if delay >= remaining {
                        return Err(last_error);
                    }
                    tokio::time::sleep(delay).await;
                    state = state.after_backoff();
                }
                RetryState::Exhausted => return Err(last_error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NetworkType;
    use async_trait::async_trait;
    use super::providers::{AsnRecord, ProviderPayload};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted provider that counts its calls
    struct ScriptedProvider {
        calls: AtomicUsize,
        failures_before_success: usize,
        failure: ProviderError,
        organization: &'static str,
        delay: Duration,
    }

    impl ScriptedProvider {
        fn succeeding(organization: &'static str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures_before_success: 0,
                failure: ProviderError::Timeout,
                organization,
                delay: Duration::ZERO,
            }
        }

        fn failing(failure: ProviderError) -> Self {
            Self {
                failures_before_success: usize::MAX,
                failure,
                ..Self::succeeding("")
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IpIntelProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn lookup(&self, _ip: IpAddr) -> Result<ProviderPayload, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if n < self.failures_before_success {
                return Err(self.failure.clone());
            }
            Ok(ProviderPayload::LocalAsn(AsnRecord {
                asn: Some(64500),
                organization: Some(self.organization.to_string()),
            }))
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(5),
            max_retries: 2,
            call_timeout: Duration::from_millis(200),
        }
    }

    fn engine(providers: &[&Arc<ScriptedProvider>]) -> EnrichmentEngine {
        EnrichmentEngine::new(
            providers
                .iter()
                .map(|p| Arc::clone(p) as Arc<dyn IpIntelProvider>)
                .collect(),
            fast_policy(),
            Duration::from_secs(2),
            100,
            Duration::from_secs(60),
        )
    }

    const PUBLIC_IP: &str = "81.2.69.142";

    #[tokio::test]
    async fn test_private_addresses_make_no_calls() {
        let provider = Arc::new(ScriptedProvider::succeeding("Acme Corp"));
        let engine = engine(&[&provider]);

        for ip in ["10.0.0.1", "192.168.1.20", "127.0.0.1", "::1", "::ffff:10.1.1.1", "100.64.3.3"] {
            let inference = engine.enrich(ip.parse().unwrap()).await;
            assert!(inference.is_unknown());
            assert!(inference.is_ambiguous);
            assert_eq!(inference.confidence_score, 0.0);
        }
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let provider = Arc::new(ScriptedProvider {
            failures_before_success: 2,
            failure: ProviderError::Status(503),
            ..ScriptedProvider::succeeding("Acme Corp")
        });
        let engine = engine(&[&provider]);

        let inference = engine.enrich(PUBLIC_IP.parse().unwrap()).await;
        assert_eq!(provider.calls(), 3);
        assert_eq!(inference.network_type, NetworkType::Corporate);
        assert_eq!(inference.inferred_company_name.as_deref(), Some("Acme Corp"));
    }

    #[tokio::test]
    async fn test_client_errors_fall_through_to_next_provider() {
        let first = Arc::new(ScriptedProvider::failing(ProviderError::Status(403)));
        let second = Arc::new(ScriptedProvider::succeeding("Globex LLC"));
        let engine = engine(&[&first, &second]);

        let inference = engine.enrich(PUBLIC_IP.parse().unwrap()).await;
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(inference.inferred_company_name.as_deref(), Some("Globex LLC"));
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let first = Arc::new(ScriptedProvider::failing(ProviderError::RateLimited));
        let engine = engine(&[&first]);

        let inference = engine.enrich(PUBLIC_IP.parse().unwrap()).await;
        assert_eq!(first.calls(), 3);
        assert!(inference.is_unknown());
    }

    #[tokio::test]
    async fn test_deadline_returns_unknown() {
        let slow = Arc::new(ScriptedProvider {
            delay: Duration::from_millis(500),
            ..ScriptedProvider::succeeding("Acme Corp")
        });
        let engine = engine(&[&slow]);

        let started = std::time::Instant::now();
        let inference = engine
            .enrich_with_timeout(PUBLIC_IP.parse().unwrap(), Duration::from_millis(50))
            .await;
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(inference.is_unknown());
        assert!(inference.is_ambiguous);
    }

    #[tokio::test]
    async fn test_results_are_cached_but_failures_are_not() {
        let provider = Arc::new(ScriptedProvider::succeeding("Acme Corp"));
        let engine = engine(&[&provider]);
        let ip: IpAddr = PUBLIC_IP.parse().unwrap();

        engine.enrich(ip).await;
        engine.enrich(ip).await;
        assert_eq!(provider.calls(), 1);

        let failing = Arc::new(ScriptedProvider::failing(ProviderError::Status(404)));
        let engine = self::engine(&[&failing]);
        engine.enrich(ip).await;
        engine.enrich(ip).await;
        assert_eq!(failing.calls(), 2);
    }

    #[tokio::test]
    async fn test_no_providers_is_unknown() {
        let engine = engine(&[]);
        let inference = engine.enrich(PUBLIC_IP.parse().unwrap()).await;
        assert!(inference.is_unknown());
    }
}
