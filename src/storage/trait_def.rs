use crate::models::{
    AttributionSession, AttributionState, CompanyInference, EventType, IntentScore, LeadOutcome,
    LeadView, LinkEvent, LinkToggles, NewIntentScore, NewLead, NewLinkEvent, NewTrackedLink,
    TrackedLink,
};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Copy, Default)]
pub struct LookupMetadata {
    pub cache_hit: bool,
}

#[derive(Debug, Clone)]
pub struct LookupResult {
    pub link: Option<TrackedLink>,
    pub metadata: LookupMetadata,
}

/// One earlier visit in a session, with the destination it led to
#[derive(Debug, Clone)]
pub struct SessionVisit {
    pub event_id: i64,
    pub tracked_link_id: i64,
    pub destination_url: String,
    pub event_type: EventType,
    pub time_on_site_seconds: Option<i64>,
    pub occurred_at: i64,
}

/// Keyset position for lead listings, newest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadCursor {
    pub created_at: i64,
    pub id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct LeadFilter {
    pub saas_id: Option<String>,
    pub creator_id: Option<String>,
    pub tracked_link_id: Option<i64>,
    pub after: Option<LeadCursor>,
    pub limit: i64,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Create a tracked link; `Conflict` when the hash is taken
    async fn create_link(&self, link: &NewTrackedLink) -> StorageResult<TrackedLink>;

    /// Get a tracked link by hash
    async fn get_link(&self, hash: &str) -> Result<Option<TrackedLink>>;

    /// Get a tracked link by hash along with cache metadata
    async fn get_link_with_metadata(&self, hash: &str) -> Result<LookupResult> {
        Ok(LookupResult {
            link: self.get_link(hash).await?,
            metadata: LookupMetadata::default(),
        })
    }

    async fn get_link_by_id(&self, id: i64) -> Result<Option<TrackedLink>>;

    /// Toggles are the only mutable part of a tracked link
    async fn update_toggles(&self, hash: &str, toggles: LinkToggles) -> Result<bool>;

    async fn list_links(&self, limit: i64, offset: i64) -> Result<Vec<TrackedLink>>;

    /// Register a session (or refresh `last_seen_at` of an existing one)
    /// and return the stored row, whose `created_at` is the first issuance
    async fn touch_session(&self, id: Uuid, now: i64) -> Result<AttributionSession>;

    async fn insert_event(&self, event: &NewLinkEvent) -> Result<LinkEvent>;

    async fn get_event(&self, id: i64) -> Result<Option<LinkEvent>>;

    /// Write-once: only succeeds while the engagement time is unset
    async fn set_time_on_site(&self, event_id: i64, seconds: i64) -> Result<bool>;

    /// All events of a session, oldest first, with their destinations
    async fn session_visits(&self, session_id: Uuid) -> Result<Vec<SessionVisit>>;

    /// One inference per event; `Conflict` when the event already has one
    async fn insert_inference(&self, inference: &CompanyInference) -> StorageResult<()>;

    async fn get_inference(&self, event_id: i64) -> Result<Option<CompanyInference>>;

    /// Compare-and-swap of the attribution state. Returns false when the
    /// stored state is no longer `from`.
    async fn transition_attribution(
        &self,
        event_id: i64,
        from: AttributionState,
        to: AttributionState,
        now: i64,
    ) -> Result<bool>;

    /// One score per event; `Conflict` when the event was already scored
    async fn insert_intent_score(&self, score: &NewIntentScore) -> StorageResult<IntentScore>;

    /// Scores of every event attributed to the company, excluding
    /// inferences a human marked as a mismatch
    async fn company_intent_scores(&self, company_name: &str) -> Result<Vec<IntentScore>>;

    /// Atomic insert-or-nothing on the lead dedup keys
    async fn insert_lead(&self, lead: &NewLead) -> Result<LeadOutcome>;

    /// Leads joined with engagement and inference, newest first. The
    /// effective confidence is computed at `now`.
    async fn list_leads(&self, filter: &LeadFilter, now: i64) -> Result<Vec<LeadView>>;

    async fn count_leads(&self, tracked_link_id: i64) -> Result<i64>;
}
