use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub redirect_server: ServerConfig,
    pub redirect: RedirectConfig,
    pub enrichment: EnrichmentConfig,
    pub client_ip: ClientIpConfig,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
    pub billing: BillingConfig,
    pub pagination: PaginationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Settings for the visitor-facing redirect path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectConfig {
    /// Where unknown hashes and corrupt destinations are sent
    pub default_redirect_url: String,
    /// Upper bound on time spent on the link lookup, session resolution and
    /// event insertion. The lookup gets a third of it.
    pub budget_ms: u64,
    /// Add the `Secure` attribute to the attribution cookie
    pub cookie_secure: bool,
    /// Price applied to leads whose tracked link carries no price of its own
    pub default_cost_per_lead_cents: i64,
}

impl RedirectConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            default_redirect_url: "https://naano.xyz".to_string(),
            budget_ms: 150,
            cookie_secure: false,
            default_cost_per_lead_cents: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    pub timeout_ms: u64,
    pub provider_call_timeout_ms: u64,
    pub base_backoff_ms: u64,
    pub max_retries: u32,
    /// Provider A endpoint, `{ip}` is substituted
    pub ipapi_url: Option<String>,
    /// Provider B endpoint, `{ip}` is substituted
    pub ipinfo_url: Option<String>,
    pub ipinfo_token: Option<String>,
    pub geoip_city_db_path: Option<String>,
    pub geoip_asn_db_path: Option<String>,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,
}

impl EnrichmentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            provider_call_timeout_ms: 800,
            base_backoff_ms: 400,
            max_retries: 2,
            ipapi_url: Some(
                "http://ip-api.com/json/{ip}?fields=status,message,country,countryCode,regionName,city,isp,org,as,asname,reverse,mobile,proxy,hosting"
                    .to_string(),
            ),
            ipinfo_url: Some("https://ipinfo.io/{ip}/json".to_string()),
            ipinfo_token: None,
            geoip_city_db_path: None,
            geoip_asn_db_path: None,
            cache_ttl_secs: 3600,
            cache_max_entries: 50_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    None,
    Standard,
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIpConfig {
    pub trusted_proxy_mode: TrustedProxyMode,
    #[serde(default)]
    pub trusted_proxies: Vec<IpNet>,
    #[serde(default)]
    pub num_trusted_proxies: Option<usize>,
}

impl Default for ClientIpConfig {
    fn default() -> Self {
        Self {
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: vec![],
            num_trusted_proxies: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub queue_size: usize,
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_size: 10_000,
            workers: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    pub webhook_url: Option<String>,
    pub flush_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Secret used to sign lead list cursors; random per process when unset
    pub cursor_hmac_secret: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

/// Empty string disables an optional endpoint
fn env_optional_url(key: &str, default: Option<String>) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if v.trim().is_empty() => None,
        Ok(v) => Some(v),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str = env_or("DATABASE_BACKEND", "sqlite");
        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url = env_or("DATABASE_URL", "sqlite://./naano.db?mode=rwc");
        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let api_host = env_or("API_HOST", "127.0.0.1");
        let api_port = env_parse("API_PORT", 8080u16)?;
        let redirect_host = env_or("REDIRECT_HOST", "127.0.0.1");
        let redirect_port = env_parse("REDIRECT_PORT", 3000u16)?;

        let redirect_defaults = RedirectConfig::default();
        let redirect = RedirectConfig {
            default_redirect_url: env_or(
                "DEFAULT_REDIRECT_URL",
                &redirect_defaults.default_redirect_url,
            ),
            budget_ms: env_parse("REDIRECT_BUDGET_MS", redirect_defaults.budget_ms)?,
            cookie_secure: env_flag("COOKIE_SECURE"),
            default_cost_per_lead_cents: env_parse(
                "DEFAULT_COST_PER_LEAD_CENTS",
                redirect_defaults.default_cost_per_lead_cents,
            )?,
        };
        url::Url::parse(&redirect.default_redirect_url)
            .context("DEFAULT_REDIRECT_URL must be an absolute URL")?;

        let enrichment_defaults = EnrichmentConfig::default();
        let enrichment = EnrichmentConfig {
            timeout_ms: env_parse("ENRICHMENT_TIMEOUT_MS", enrichment_defaults.timeout_ms)?,
            provider_call_timeout_ms: env_parse(
                "PROVIDER_CALL_TIMEOUT_MS",
                enrichment_defaults.provider_call_timeout_ms,
            )?,
            base_backoff_ms: env_parse(
                "PROVIDER_BASE_BACKOFF_MS",
                enrichment_defaults.base_backoff_ms,
            )?,
            max_retries: env_parse("PROVIDER_MAX_RETRIES", enrichment_defaults.max_retries)?,
            ipapi_url: env_optional_url("IPAPI_URL", enrichment_defaults.ipapi_url),
            ipinfo_url: env_optional_url("IPINFO_URL", enrichment_defaults.ipinfo_url),
            ipinfo_token: std::env::var("IPINFO_TOKEN").ok(),
            geoip_city_db_path: std::env::var("GEOIP_CITY_DB_PATH").ok(),
            geoip_asn_db_path: std::env::var("GEOIP_ASN_DB_PATH").ok(),
            cache_ttl_secs: env_parse(
                "ENRICHMENT_CACHE_TTL_SECS",
                enrichment_defaults.cache_ttl_secs,
            )?,
            cache_max_entries: env_parse(
                "ENRICHMENT_CACHE_MAX_ENTRIES",
                enrichment_defaults.cache_max_entries,
            )?,
        };

        let trusted_proxy_mode = match env_or("TRUSTED_PROXY_MODE", "none")
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };

        let trusted_proxies = std::env::var("TRUSTED_PROXIES")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<IpNet>()
                            .or_else(|_| s.parse::<std::net::IpAddr>().map(IpNet::from))
                            .with_context(|| format!("TRUSTED_PROXIES entry '{s}' is not a CIDR"))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let num_trusted_proxies = std::env::var("NUM_TRUSTED_PROXIES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok());

        let pipeline_defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            queue_size: env_parse("PIPELINE_QUEUE_SIZE", pipeline_defaults.queue_size)?,
            workers: env_parse("PIPELINE_WORKERS", pipeline_defaults.workers)?.max(1),
        };

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            max_entries: env_parse("LINK_CACHE_MAX_ENTRIES", cache_defaults.max_entries)?,
            ttl_secs: env_parse("LINK_CACHE_TTL_SECS", cache_defaults.ttl_secs)?,
        };

        let billing = BillingConfig {
            webhook_url: env_optional_url("BILLING_WEBHOOK_URL", None),
            flush_interval_secs: env_parse("BILLING_FLUSH_INTERVAL_SECS", 30u64)?,
        };

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            redirect_server: ServerConfig {
                host: redirect_host,
                port: redirect_port,
            },
            redirect,
            enrichment,
            client_ip: ClientIpConfig {
                trusted_proxy_mode,
                trusted_proxies,
                num_trusted_proxies,
            },
            pipeline,
            cache,
            billing,
            pagination: PaginationConfig {
                cursor_hmac_secret: std::env::var("CURSOR_HMAC_SECRET").ok(),
            },
        })
    }
}
