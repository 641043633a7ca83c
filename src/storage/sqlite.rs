use crate::models::{
    AttributionSession, AttributionState, CompanyInference, IntentScore, LeadOutcome, LeadView,
    LinkEvent, LinkToggles, NewIntentScore, NewLead, NewLinkEvent, NewTrackedLink, TrackedLink,
};
use crate::storage::rows::{
    InferenceRow, LeadViewRow, LinkEventRow, SessionRow, SessionVisitRow, LEAD_VIEW_SELECT,
};
use crate::storage::{LeadFilter, SessionVisit, Storage, StorageError, StorageResult};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const LINK_COLUMNS: &str = "id, hash, destination_url, creator_id, saas_id, collaboration_id, \
     cost_per_lead_cents, track_impressions, track_clicks, track_revenue, created_at";

const EVENT_COLUMNS: &str = "id, tracked_link_id, event_type, session_id, ip_address, user_agent, \
     referrer, country, city, time_on_site_seconds, occurred_at";

const INFERENCE_COLUMNS: &str = "event_id, inferred_company_name, domain, industry, size, location, \
     confidence_score, confidence_reasons, network_type, asn_organization, is_ambiguous, \
     attribution_state, created_at, confirmed_at";

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid SQLite URL {database_url}"))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracked_links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash TEXT NOT NULL UNIQUE,
                destination_url TEXT NOT NULL,
                creator_id TEXT NOT NULL,
                saas_id TEXT NOT NULL,
                collaboration_id TEXT NOT NULL,
                cost_per_lead_cents INTEGER,
                track_impressions INTEGER NOT NULL DEFAULT 1,
                track_clicks INTEGER NOT NULL DEFAULT 1,
                track_revenue INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attribution_sessions (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                last_seen_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS link_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tracked_link_id INTEGER NOT NULL REFERENCES tracked_links(id),
                event_type TEXT NOT NULL,
                session_id TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                user_agent TEXT,
                referrer TEXT,
                country TEXT,
                city TEXT,
                time_on_site_seconds INTEGER,
                occurred_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_link_events_session ON link_events(session_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_link_events_link ON link_events(tracked_link_id, occurred_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS company_inferences (
                event_id INTEGER PRIMARY KEY REFERENCES link_events(id),
                inferred_company_name TEXT,
                domain TEXT,
                industry TEXT,
                size TEXT,
                location TEXT,
                confidence_score REAL NOT NULL,
                confidence_reasons TEXT NOT NULL,
                network_type TEXT NOT NULL,
                asn_organization TEXT,
                is_ambiguous INTEGER NOT NULL,
                attribution_state TEXT NOT NULL DEFAULT 'inferred',
                created_at INTEGER NOT NULL,
                confirmed_at INTEGER
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_inferences_company ON company_inferences(inferred_company_name)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS intent_scores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id INTEGER NOT NULL UNIQUE REFERENCES link_events(id),
                session_id TEXT NOT NULL,
                score INTEGER NOT NULL,
                is_repeat_visit INTEGER NOT NULL,
                visit_count INTEGER NOT NULL,
                viewed_pricing INTEGER NOT NULL,
                viewed_security INTEGER NOT NULL,
                viewed_integrations INTEGER NOT NULL,
                signals TEXT NOT NULL,
                recency_weight REAL NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        // Both unique constraints back the lead dedup contract
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS leads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tracked_link_id INTEGER NOT NULL REFERENCES tracked_links(id),
                creator_id TEXT NOT NULL,
                saas_id TEXT NOT NULL,
                cost_per_lead_cents INTEGER NOT NULL,
                session_id TEXT NOT NULL,
                visitor_fingerprint TEXT NOT NULL,
                fingerprint_window INTEGER NOT NULL,
                event_id INTEGER,
                created_at INTEGER NOT NULL,
                UNIQUE (tracked_link_id, session_id),
                UNIQUE (tracked_link_id, visitor_fingerprint, fingerprint_window)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_leads_saas ON leads(saas_id, created_at)")
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn create_link(&self, link: &NewTrackedLink) -> StorageResult<TrackedLink> {
        let created_at = crate::models::now_ts();

        let row = sqlx::query_as::<_, TrackedLink>(&format!(
            r#"
            INSERT INTO tracked_links (hash, destination_url, creator_id, saas_id, collaboration_id,
                cost_per_lead_cents, track_impressions, track_clicks, track_revenue, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(hash) DO NOTHING
            RETURNING {LINK_COLUMNS}
            "#
        ))
        .bind(&link.hash)
        .bind(&link.destination_url)
        .bind(&link.creator_id)
        .bind(&link.saas_id)
        .bind(&link.collaboration_id)
        .bind(link.cost_per_lead_cents)
        .bind(link.toggles.track_impressions)
        .bind(link.toggles.track_clicks)
        .bind(link.toggles.track_revenue)
        .bind(created_at)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        row.ok_or(StorageError::Conflict)
    }

    async fn get_link(&self, hash: &str) -> Result<Option<TrackedLink>> {
        let link = sqlx::query_as::<_, TrackedLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM tracked_links WHERE hash = ?"
        ))
        .bind(hash)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn get_link_by_id(&self, id: i64) -> Result<Option<TrackedLink>> {
        let link = sqlx::query_as::<_, TrackedLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM tracked_links WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn update_toggles(&self, hash: &str, toggles: LinkToggles) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tracked_links
            SET track_impressions = ?, track_clicks = ?, track_revenue = ?
            WHERE hash = ?
            "#,
        )
        .bind(toggles.track_impressions)
        .bind(toggles.track_clicks)
        .bind(toggles.track_revenue)
        .bind(hash)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_links(&self, limit: i64, offset: i64) -> Result<Vec<TrackedLink>> {
        let links = sqlx::query_as::<_, TrackedLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM tracked_links ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(links)
    }

    async fn touch_session(&self, id: Uuid, now: i64) -> Result<AttributionSession> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            INSERT INTO attribution_sessions (id, created_at, last_seen_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET last_seen_at = excluded.last_seen_at
            RETURNING id, created_at, last_seen_at
            "#,
        )
        .bind(id.to_string())
        .bind(now)
        .bind(now)
        .fetch_one(self.pool.as_ref())
        .await?;

        row.try_into()
    }

    async fn insert_event(&self, event: &NewLinkEvent) -> Result<LinkEvent> {
        let row = sqlx::query_as::<_, LinkEventRow>(&format!(
            r#"
            INSERT INTO link_events (tracked_link_id, event_type, session_id, ip_address,
                user_agent, referrer, country, city, occurred_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(event.tracked_link_id)
        .bind(event.event_type.as_ref())
        .bind(event.session_id.to_string())
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.referrer)
        .bind(&event.country)
        .bind(&event.city)
        .bind(event.occurred_at)
        .fetch_one(self.pool.as_ref())
        .await?;

        row.try_into()
    }

    async fn get_event(&self, id: i64) -> Result<Option<LinkEvent>> {
        let row = sqlx::query_as::<_, LinkEventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM link_events WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(LinkEvent::try_from).transpose()
    }

    async fn set_time_on_site(&self, event_id: i64, seconds: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE link_events
            SET time_on_site_seconds = ?
            WHERE id = ? AND time_on_site_seconds IS NULL
            "#,
        )
        .bind(seconds)
        .bind(event_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn session_visits(&self, session_id: Uuid) -> Result<Vec<SessionVisit>> {
        let rows = sqlx::query_as::<_, SessionVisitRow>(
            r#"
            SELECT e.id AS event_id, e.tracked_link_id, l.destination_url, e.event_type,
                   e.time_on_site_seconds, e.occurred_at
            FROM link_events e
            JOIN tracked_links l ON l.id = e.tracked_link_id
            WHERE e.session_id = ?
            ORDER BY e.occurred_at ASC, e.id ASC
            "#,
        )
        .bind(session_id.to_string())
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.into_iter().map(SessionVisit::try_from).collect()
    }

    async fn insert_inference(&self, inference: &CompanyInference) -> StorageResult<()> {
        let reasons = serde_json::to_string(&inference.confidence_reasons)
            .map_err(|e| StorageError::Other(e.into()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO company_inferences (event_id, inferred_company_name, domain, industry,
                size, location, confidence_score, confidence_reasons, network_type,
                asn_organization, is_ambiguous, attribution_state, created_at, confirmed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(event_id) DO NOTHING
            "#,
        )
        .bind(inference.event_id)
        .bind(&inference.inferred_company_name)
        .bind(&inference.domain)
        .bind(&inference.industry)
        .bind(&inference.size)
        .bind(&inference.location)
        .bind(inference.confidence_score)
        .bind(reasons)
        .bind(inference.network_type.as_ref())
        .bind(&inference.asn_organization)
        .bind(inference.is_ambiguous)
        .bind(inference.attribution_state.as_ref())
        .bind(inference.created_at)
        .bind(inference.confirmed_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }
        Ok(())
    }

    async fn get_inference(&self, event_id: i64) -> Result<Option<CompanyInference>> {
        let row = sqlx::query_as::<_, InferenceRow>(&format!(
            "SELECT {INFERENCE_COLUMNS} FROM company_inferences WHERE event_id = ?"
        ))
        .bind(event_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(CompanyInference::try_from).transpose()
    }

    async fn transition_attribution(
        &self,
        event_id: i64,
        from: AttributionState,
        to: AttributionState,
        now: i64,
    ) -> Result<bool> {
        let confirmed_at = (to == AttributionState::Confirmed).then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE company_inferences
            SET attribution_state = ?, confirmed_at = COALESCE(confirmed_at, ?)
            WHERE event_id = ? AND attribution_state = ?
            "#,
        )
        .bind(to.as_ref())
        .bind(confirmed_at)
        .bind(event_id)
        .bind(from.as_ref())
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_intent_score(&self, score: &NewIntentScore) -> StorageResult<IntentScore> {
        let signals =
            serde_json::to_string(&score.signals).map_err(|e| StorageError::Other(e.into()))?;

        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO intent_scores (event_id, session_id, score, is_repeat_visit, visit_count,
                viewed_pricing, viewed_security, viewed_integrations, signals, recency_weight,
                created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(score.event_id)
        .bind(score.session_id.to_string())
        .bind(score.score)
        .bind(score.is_repeat_visit)
        .bind(score.visit_count)
        .bind(score.viewed_pricing)
        .bind(score.viewed_security)
        .bind(score.viewed_integrations)
        .bind(signals)
        .bind(score.recency_weight)
        .bind(score.created_at)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        let id = id.ok_or(StorageError::Conflict)?;
        Ok(IntentScore::from_new(id, score))
    }

    async fn company_intent_scores(&self, company_name: &str) -> Result<Vec<IntentScore>> {
        let rows = sqlx::query_as::<_, crate::storage::rows::IntentScoreRow>(
            r#"
            SELECT s.id, s.event_id, s.session_id, i.inferred_company_name AS company_name,
                   s.score, s.is_repeat_visit, s.visit_count, s.viewed_pricing, s.viewed_security,
                   s.viewed_integrations, s.signals, s.recency_weight, s.created_at
            FROM intent_scores s
            JOIN company_inferences i ON i.event_id = s.event_id
            WHERE i.inferred_company_name = ? AND i.attribution_state <> 'mismatch'
            ORDER BY s.created_at ASC, s.id ASC
            "#,
        )
        .bind(company_name)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.into_iter().map(IntentScore::try_from).collect()
    }

    async fn insert_lead(&self, lead: &NewLead) -> Result<LeadOutcome> {
        // Single statement: the unique constraints decide, no read-then-write
        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO leads (tracked_link_id, creator_id, saas_id, cost_per_lead_cents,
                session_id, visitor_fingerprint, fingerprint_window, event_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(lead.tracked_link_id)
        .bind(&lead.creator_id)
        .bind(&lead.saas_id)
        .bind(lead.cost_per_lead_cents)
        .bind(&lead.session_id)
        .bind(&lead.visitor_fingerprint)
        .bind(lead.fingerprint_window)
        .bind(lead.event_id)
        .bind(lead.created_at)
        .fetch_optional(self.pool.as_ref())
        .await?;

        if let Some(id) = inserted {
            return Ok(LeadOutcome::Created(id));
        }

        let existing: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM leads
            WHERE tracked_link_id = ?
              AND (session_id = ? OR (visitor_fingerprint = ? AND fingerprint_window = ?))
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(lead.tracked_link_id)
        .bind(&lead.session_id)
        .bind(&lead.visitor_fingerprint)
        .bind(lead.fingerprint_window)
        .fetch_optional(self.pool.as_ref())
        .await?;

        existing
            .map(LeadOutcome::Duplicate)
            .ok_or_else(|| anyhow!("lead insert was ignored but no conflicting lead exists"))
    }

    async fn list_leads(&self, filter: &LeadFilter, now: i64) -> Result<Vec<LeadView>> {
        let mut query = QueryBuilder::<Sqlite>::new(LEAD_VIEW_SELECT);

        if let Some(saas_id) = filter.saas_id.as_deref() {
            query.push(" AND l.saas_id = ").push_bind(saas_id);
        }
        if let Some(creator_id) = filter.creator_id.as_deref() {
            query.push(" AND l.creator_id = ").push_bind(creator_id);
        }
        if let Some(link_id) = filter.tracked_link_id {
            query.push(" AND l.tracked_link_id = ").push_bind(link_id);
        }
        if let Some(cursor) = filter.after {
            query
                .push(" AND (l.created_at < ")
                .push_bind(cursor.created_at)
                .push(" OR (l.created_at = ")
                .push_bind(cursor.created_at)
                .push(" AND l.id < ")
                .push_bind(cursor.id)
                .push("))");
        }
        query
            .push(" ORDER BY l.created_at DESC, l.id DESC LIMIT ")
            .push_bind(filter.limit);

        let rows = query
            .build_query_as::<LeadViewRow>()
            .fetch_all(self.pool.as_ref())
            .await?;

        rows.into_iter().map(|row| row.into_view(now)).collect()
    }

    async fn count_leads(&self, tracked_link_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM leads WHERE tracked_link_id = ?",
        )
        .bind(tracked_link_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }
}
