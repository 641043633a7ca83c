//! Shared harness for the integration tests

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::connect_info::ConnectInfo,
    http::{Request, Response},
    Router,
};
use naano::api::{self, AppState};
use naano::billing::BillingBuffer;
use naano::config::{ClientIpConfig, RedirectConfig};
use naano::enrichment::{geoip::GeoIpService, retry::RetryPolicy, EnrichmentEngine};
use naano::events::EventLogger;
use naano::leads::LeadRecorder;
use naano::models::{
    AttributionSession, AttributionState, CompanyInference, IntentScore, LeadOutcome, LeadView,
    LinkEvent, LinkToggles, NewIntentScore, NewLead, NewLinkEvent, NewTrackedLink, TrackedLink,
};
use naano::pipeline::{Attributor, Pipeline};
use naano::redirect::{self, handlers::GatewayState};
use naano::storage::{
    CachedStorage, LeadFilter, SessionVisit, SqliteStorage, Storage, StorageResult,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower::Layer;
use uuid::Uuid;

pub const DEFAULT_REDIRECT: &str = "https://naano.xyz/";
pub const BROWSER_UA: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// One connection, so every handle sees the same in-memory database
pub async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

pub async fn create_link(
    storage: &dyn Storage,
    hash: &str,
    destination: &str,
    toggles: LinkToggles,
) -> TrackedLink {
    storage
        .create_link(&NewTrackedLink {
            hash: hash.to_string(),
            destination_url: destination.to_string(),
            creator_id: "creator-7".to_string(),
            saas_id: "saas-1".to_string(),
            collaboration_id: "collab-42".to_string(),
            cost_per_lead_cents: Some(250),
            toggles,
        })
        .await
        .unwrap()
}

pub struct TestApp {
    pub storage: Arc<dyn Storage>,
    pub redirect: Router,
    pub api: Router,
    pub billing: Arc<BillingBuffer>,
    dispatcher: JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_client_addr(SocketAddr::from(([127, 0, 0, 1], 40_000))).await
    }

    pub async fn with_client_addr(addr: SocketAddr) -> Self {
        // Generous, the single test connection is shared with the pipeline
        Self::build(create_test_storage().await, addr, 5_000)
    }

    /// App over the given backend with a real redirect budget
    pub async fn with_storage(inner: Arc<dyn Storage>, budget_ms: u64) -> Self {
        Self::build(inner, SocketAddr::from(([127, 0, 0, 1], 40_000)), budget_ms)
    }

    fn build(inner: Arc<dyn Storage>, addr: SocketAddr, budget_ms: u64) -> Self {
        let storage: Arc<dyn Storage> = Arc::new(CachedStorage::new(inner, 100, 60));
        let geoip = Arc::new(GeoIpService::default());

        let enrichment = Arc::new(EnrichmentEngine::new(
            vec![],
            RetryPolicy::default(),
            Duration::from_millis(200),
            100,
            Duration::from_secs(60),
        ));
        let billing = Arc::new(BillingBuffer::new());
        let leads = Arc::new(LeadRecorder::new(storage.clone(), billing.clone(), 100));
        let attributor = Arc::new(Attributor::new(storage.clone(), enrichment, leads));
        let (pipeline, dispatcher) = Pipeline::start(attributor, 64, 4);

        let events = EventLogger::new(storage.clone(), geoip);
        let redirect = redirect::create_redirect_router(Arc::new(GatewayState {
            storage: storage.clone(),
            events: events.clone(),
            pipeline: pipeline.clone(),
            redirect: RedirectConfig {
                default_redirect_url: DEFAULT_REDIRECT.to_string(),
                budget_ms,
                cookie_secure: false,
                default_cost_per_lead_cents: 100,
            },
            client_ip: ClientIpConfig::default(),
        }))
        .layer(TestConnectInfoLayer(addr));
        let api = api::create_api_router(Arc::new(AppState {
            storage: storage.clone(),
            events,
            pipeline,
        }));

        Self {
            storage,
            redirect,
            api,
            billing,
            dispatcher,
        }
    }

    /// Drop both routers and wait until every queued job has run
    pub async fn drain(self) -> (Arc<dyn Storage>, Arc<BillingBuffer>) {
        let Self {
            storage,
            redirect,
            api,
            billing,
            dispatcher,
        } = self;
        drop(redirect);
        drop(api);
        tokio::time::timeout(Duration::from_secs(10), dispatcher)
            .await
            .expect("pipeline drains")
            .unwrap();
        (storage, billing)
    }
}

/// SQLite backend whose link lookups and visitor writes can be made to
/// stall. Counts session writes.
pub struct SlowStorage {
    inner: Arc<dyn Storage>,
    lookup_delay: Duration,
    write_delay: Duration,
    pub session_touches: AtomicUsize,
}

impl SlowStorage {
    pub fn new(inner: Arc<dyn Storage>, lookup_delay: Duration, write_delay: Duration) -> Self {
        Self {
            inner,
            lookup_delay,
            write_delay,
            session_touches: AtomicUsize::new(0),
        }
    }

    pub fn touches(&self) -> usize {
        self.session_touches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Storage for SlowStorage {
    async fn init(&self) -> anyhow::Result<()> {
        self.inner.init().await
    }

    async fn create_link(&self, link: &NewTrackedLink) -> StorageResult<TrackedLink> {
        self.inner.create_link(link).await
    }

    async fn get_link(&self, hash: &str) -> anyhow::Result<Option<TrackedLink>> {
        tokio::time::sleep(self.lookup_delay).await;
        self.inner.get_link(hash).await
    }

    async fn get_link_by_id(&self, id: i64) -> anyhow::Result<Option<TrackedLink>> {
        self.inner.get_link_by_id(id).await
    }

    async fn update_toggles(&self, hash: &str, toggles: LinkToggles) -> anyhow::Result<bool> {
        self.inner.update_toggles(hash, toggles).await
    }

    async fn list_links(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<TrackedLink>> {
        self.inner.list_links(limit, offset).await
    }

    async fn touch_session(&self, id: Uuid, now: i64) -> anyhow::Result<AttributionSession> {
        self.session_touches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.write_delay).await;
        self.inner.touch_session(id, now).await
    }

    async fn insert_event(&self, event: &NewLinkEvent) -> anyhow::Result<LinkEvent> {
        tokio::time::sleep(self.write_delay).await;
        self.inner.insert_event(event).await
    }

    async fn get_event(&self, id: i64) -> anyhow::Result<Option<LinkEvent>> {
        self.inner.get_event(id).await
    }

    async fn set_time_on_site(&self, event_id: i64, seconds: i64) -> anyhow::Result<bool> {
        self.inner.set_time_on_site(event_id, seconds).await
    }

    async fn session_visits(&self, session_id: Uuid) -> anyhow::Result<Vec<SessionVisit>> {
        self.inner.session_visits(session_id).await
    }

    async fn insert_inference(&self, inference: &CompanyInference) -> StorageResult<()> {
        self.inner.insert_inference(inference).await
    }

    async fn get_inference(&self, event_id: i64) -> anyhow::Result<Option<CompanyInference>> {
        self.inner.get_inference(event_id).await
    }

    async fn transition_attribution(
        &self,
        event_id: i64,
        from: AttributionState,
        to: AttributionState,
        now: i64,
    ) -> anyhow::Result<bool> {
        self.inner
            .transition_attribution(event_id, from, to, now)
            .await
    }

    async fn insert_intent_score(&self, score: &NewIntentScore) -> StorageResult<IntentScore> {
        self.inner.insert_intent_score(score).await
    }

    async fn company_intent_scores(&self, company_name: &str) -> anyhow::Result<Vec<IntentScore>> {
        self.inner.company_intent_scores(company_name).await
    }

    async fn insert_lead(&self, lead: &NewLead) -> anyhow::Result<LeadOutcome> {
        self.inner.insert_lead(lead).await
    }

    async fn list_leads(&self, filter: &LeadFilter, now: i64) -> anyhow::Result<Vec<LeadView>> {
        self.inner.list_leads(filter, now).await
    }

    async fn count_leads(&self, tracked_link_id: i64) -> anyhow::Result<i64> {
        self.inner.count_leads(tracked_link_id).await
    }
}

/// Injects the peer address the real server gets from the listener
#[derive(Clone)]
pub struct TestConnectInfoLayer(pub SocketAddr);

impl<S> Layer<S> for TestConnectInfoLayer {
    type Service = TestConnectInfoMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TestConnectInfoMiddleware {
            inner,
            addr: self.0,
        }
    }
}

#[derive(Clone)]
pub struct TestConnectInfoMiddleware<S> {
    inner: S,
    addr: SocketAddr,
}

impl<S, B> tower::Service<Request<B>> for TestConnectInfoMiddleware<S>
where
    S: tower::Service<Request<B>> + Clone,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        req.extensions_mut().insert(ConnectInfo(self.addr));
        self.inner.call(req)
    }
}

/// A browser following the link from a LinkedIn post
pub fn click_request(hash: &str, cookie: Option<Uuid>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(format!("/c/{hash}"))
        .header("host", "go.naano.xyz")
        .header("user-agent", BROWSER_UA)
        .header("referer", "https://www.linkedin.com/feed/")
        .header("sec-fetch-dest", "document")
        .header("sec-fetch-mode", "navigate");
    if let Some(id) = cookie {
        builder = builder.header("cookie", format!("theme=dark; naano_attribution={id}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

pub fn session_cookie<B>(response: &Response<B>) -> Option<Uuid> {
    let raw = response.headers().get("set-cookie")?.to_str().ok()?;
    let value = raw.split(';').next()?.strip_prefix("naano_attribution=")?;
    Uuid::parse_str(value).ok()
}

/// Event id embedded in the interstitial script
pub fn event_id_in_page(page: &str) -> Option<i64> {
    let start = page.find("var eventID = ")? + "var eventID = ".len();
    let end = start + page[start..].find(';')?;
    page[start..end].parse().ok()
}

pub async fn wait_for<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
