use anyhow::{Context, Result};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use naano::api::{self, AppState};
use naano::billing::{BillingBuffer, BillingFlusher, BillingSink, LogBillingSink, WebhookBillingSink};
use naano::config::{Config, DatabaseBackend};
use naano::cursor::init_cursor_hmac_key;
use naano::enrichment::{geoip::GeoIpService, EnrichmentEngine};
use naano::events::EventLogger;
use naano::leads::LeadRecorder;
use naano::pipeline::{Attributor, Pipeline};
use naano::redirect::{self, handlers::GatewayState};
use naano::storage::{CachedStorage, PostgresStorage, SqliteStorage, Storage};

/// How long queued attribution jobs may keep running after the servers stop
const PIPELINE_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, waiting for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    let backend: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!(url = %config.database.url, "Using SQLite storage");
            Arc::new(SqliteStorage::new(&config.database.url, config.database.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStorage::new(&config.database.url, config.database.max_connections).await?)
        }
    };
    backend.init().await.context("Failed to initialize database")?;
    info!("Database initialized");

    let storage: Arc<dyn Storage> = Arc::new(CachedStorage::new(
        backend,
        config.cache.max_entries,
        config.cache.ttl_secs,
    ));

    init_cursor_hmac_key(config.pagination.cursor_hmac_secret.as_deref());
    if config.pagination.cursor_hmac_secret.is_none() {
        warn!("CURSOR_HMAC_SECRET not set, lead cursors will not survive a restart");
    }

    let geoip = Arc::new(GeoIpService::new(
        config.enrichment.geoip_city_db_path.as_deref(),
        config.enrichment.geoip_asn_db_path.as_deref(),
    )?);
    info!(
        city = geoip.has_city(),
        asn = geoip.has_asn(),
        "GeoIP databases loaded"
    );

    let enrichment = Arc::new(EnrichmentEngine::from_config(
        &config.enrichment,
        Arc::clone(&geoip),
    )?);

    let billing = Arc::new(BillingBuffer::new());
    let sink: Arc<dyn BillingSink> = match &config.billing.webhook_url {
        Some(url) => {
            info!(url = %url, "Billing deltas go to webhook");
            Arc::new(WebhookBillingSink::new(reqwest::Client::new(), url.clone()))
        }
        None => Arc::new(LogBillingSink),
    };
    let flusher = BillingFlusher::spawn(
        Arc::clone(&billing),
        sink,
        config.billing.flush_interval_secs,
    );

    let leads = Arc::new(LeadRecorder::new(
        Arc::clone(&storage),
        billing,
        config.redirect.default_cost_per_lead_cents,
    ));
    let attributor = Arc::new(Attributor::new(Arc::clone(&storage), enrichment, leads));
    let (pipeline, dispatcher) = Pipeline::start(
        attributor,
        config.pipeline.queue_size,
        config.pipeline.workers,
    );
    info!(
        queue_size = config.pipeline.queue_size,
        workers = config.pipeline.workers,
        "Attribution pipeline started"
    );

    let events = EventLogger::new(Arc::clone(&storage), geoip);

    let api_router = api::create_api_router(Arc::new(AppState {
        storage: Arc::clone(&storage),
        events: events.clone(),
        pipeline: pipeline.clone(),
    }));
    let redirect_router = redirect::create_redirect_router(Arc::new(GatewayState {
        storage,
        events,
        pipeline,
        redirect: config.redirect.clone(),
        client_ip: config.client_ip.clone(),
    }));

    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("Failed to bind API server to {api_addr}"))?;
    info!("Internal API listening on http://{}", api_addr);

    let redirect_addr = format!(
        "{}:{}",
        config.redirect_server.host, config.redirect_server.port
    );
    let redirect_listener = tokio::net::TcpListener::bind(&redirect_addr)
        .await
        .with_context(|| format!("Failed to bind redirect server to {redirect_addr}"))?;
    info!("Redirect gateway listening on http://{}", redirect_addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received, draining servers...");
        let _ = shutdown_tx.send(true);
    });
    let stopped = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.changed().await;
    };

    tokio::try_join!(
        axum::serve(
            api_listener,
            api_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(stopped(shutdown_rx.clone()))
        .into_future(),
        axum::serve(
            redirect_listener,
            redirect_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(stopped(shutdown_rx))
        .into_future(),
    )?;

    // The routers held the last pipeline handles, so the dispatcher now
    // finishes what is queued and exits
    match tokio::time::timeout(PIPELINE_DRAIN_TIMEOUT, dispatcher).await {
        Ok(Ok(())) => info!("Attribution pipeline drained"),
        Ok(Err(e)) => warn!(error = %e, "Attribution dispatcher failed"),
        Err(_) => warn!("Attribution pipeline did not drain in time"),
    }

    flusher.shutdown().await;
    Ok(())
}
