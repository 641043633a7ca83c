use crate::models::{
    AttributionSession, AttributionState, CompanyInference, IntentScore, LeadOutcome, LeadView,
    LinkEvent, LinkToggles, NewIntentScore, NewLead, NewLinkEvent, NewTrackedLink, TrackedLink,
};
use crate::storage::{
    LeadFilter, LookupMetadata, LookupResult, SessionVisit, Storage, StorageResult,
};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Storage wrapper that keeps tracked link lookups off the database on the
/// redirect path. Misses are cached too, so probing unknown hashes stays cheap.
pub struct CachedStorage {
    inner: Arc<dyn Storage>,
    links: Cache<String, Option<TrackedLink>>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, max_cache_entries: u64, ttl_secs: u64) -> Self {
        let links = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self { inner, links }
    }

    async fn invalidate(&self, hash: &str) {
        self.links.invalidate(hash).await;
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn create_link(&self, link: &NewTrackedLink) -> StorageResult<TrackedLink> {
        let created = self.inner.create_link(link).await?;

        // Replaces a cached miss for the same hash
        self.links
            .insert(created.hash.clone(), Some(created.clone()))
            .await;

        Ok(created)
    }

    async fn get_link(&self, hash: &str) -> Result<Option<TrackedLink>> {
        Ok(self.get_link_with_metadata(hash).await?.link)
    }

    async fn get_link_with_metadata(&self, hash: &str) -> Result<LookupResult> {
        if let Some(cached) = self.links.get(hash).await {
            return Ok(LookupResult {
                link: cached,
                metadata: LookupMetadata { cache_hit: true },
            });
        }

        let link = self.inner.get_link(hash).await?;
        self.links.insert(hash.to_string(), link.clone()).await;

        Ok(LookupResult {
            link,
            metadata: LookupMetadata { cache_hit: false },
        })
    }

    async fn get_link_by_id(&self, id: i64) -> Result<Option<TrackedLink>> {
        self.inner.get_link_by_id(id).await
    }

    async fn update_toggles(&self, hash: &str, toggles: LinkToggles) -> Result<bool> {
        let updated = self.inner.update_toggles(hash, toggles).await?;
        if updated {
            self.invalidate(hash).await;
        }
        Ok(updated)
    }

    async fn list_links(&self, limit: i64, offset: i64) -> Result<Vec<TrackedLink>> {
        self.inner.list_links(limit, offset).await
    }

    async fn touch_session(&self, id: Uuid, now: i64) -> Result<AttributionSession> {
        self.inner.touch_session(id, now).await
    }

    async fn insert_event(&self, event: &NewLinkEvent) -> Result<LinkEvent> {
        self.inner.insert_event(event).await
    }

    async fn get_event(&self, id: i64) -> Result<Option<LinkEvent>> {
        self.inner.get_event(id).await
    }

    async fn set_time_on_site(&self, event_id: i64, seconds: i64) -> Result<bool> {
        self.inner.set_time_on_site(event_id, seconds).await
    }

    async fn session_visits(&self, session_id: Uuid) -> Result<Vec<SessionVisit>> {
        self.inner.session_visits(session_id).await
    }

    async fn insert_inference(&self, inference: &CompanyInference) -> StorageResult<()> {
        self.inner.insert_inference(inference).await
    }

    async fn get_inference(&self, event_id: i64) -> Result<Option<CompanyInference>> {
        self.inner.get_inference(event_id).await
    }

    async fn transition_attribution(
        &self,
        event_id: i64,
        from: AttributionState,
        to: AttributionState,
        now: i64,
    ) -> Result<bool> {
        self.inner
            .transition_attribution(event_id, from, to, now)
            .await
    }

    async fn insert_intent_score(&self, score: &NewIntentScore) -> StorageResult<IntentScore> {
        self.inner.insert_intent_score(score).await
    }

    async fn company_intent_scores(&self, company_name: &str) -> Result<Vec<IntentScore>> {
        self.inner.company_intent_scores(company_name).await
    }

    async fn insert_lead(&self, lead: &NewLead) -> Result<LeadOutcome> {
        self.inner.insert_lead(lead).await
    }

    async fn list_leads(&self, filter: &LeadFilter, now: i64) -> Result<Vec<LeadView>> {
        self.inner.list_leads(filter, now).await
    }

    async fn count_leads(&self, tracked_link_id: i64) -> Result<i64> {
        self.inner.count_leads(tracked_link_id).await
    }
}
