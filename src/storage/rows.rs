//! Raw database rows and their conversion into domain models
//!
//! Enums, UUIDs and JSON payloads are stored as TEXT so the same schema
//! works on SQLite and PostgreSQL.

use anyhow::{Context, Result};
use sqlx::FromRow;
use uuid::Uuid;

use super::SessionVisit;
use crate::models::{
    is_qualified_engagement, AttributionSession, AttributionState, CompanyInference, EventType,
    IntentScore, Lead, LeadView, LinkEvent, NetworkType,
};
use crate::scoring::decay::effective_confidence;

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("stored session id '{raw}' is not a UUID"))
}

#[derive(Debug, FromRow)]
pub(crate) struct SessionRow {
    pub id: String,
    pub created_at: i64,
    pub last_seen_at: i64,
}

impl TryFrom<SessionRow> for AttributionSession {
    type Error = anyhow::Error;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            created_at: row.created_at,
            last_seen_at: row.last_seen_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct LinkEventRow {
    pub id: i64,
    pub tracked_link_id: i64,
    pub event_type: String,
    pub session_id: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub time_on_site_seconds: Option<i64>,
    pub occurred_at: i64,
}

impl TryFrom<LinkEventRow> for LinkEvent {
    type Error = anyhow::Error;

    fn try_from(row: LinkEventRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            tracked_link_id: row.tracked_link_id,
            event_type: row
                .event_type
                .parse()
                .with_context(|| format!("unknown event type '{}'", row.event_type))?,
            session_id: parse_uuid(&row.session_id)?,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            referrer: row.referrer,
            country: row.country,
            city: row.city,
            time_on_site_seconds: row.time_on_site_seconds,
            occurred_at: row.occurred_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct SessionVisitRow {
    pub event_id: i64,
    pub tracked_link_id: i64,
    pub destination_url: String,
    pub event_type: String,
    pub time_on_site_seconds: Option<i64>,
    pub occurred_at: i64,
}

impl TryFrom<SessionVisitRow> for SessionVisit {
    type Error = anyhow::Error;

    fn try_from(row: SessionVisitRow) -> Result<Self> {
        Ok(Self {
            event_id: row.event_id,
            tracked_link_id: row.tracked_link_id,
            destination_url: row.destination_url,
            event_type: row
                .event_type
                .parse()
                .with_context(|| format!("unknown event type '{}'", row.event_type))?,
            time_on_site_seconds: row.time_on_site_seconds,
            occurred_at: row.occurred_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct InferenceRow {
    pub event_id: i64,
    pub inferred_company_name: Option<String>,
    pub domain: Option<String>,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub location: Option<String>,
    pub confidence_score: f64,
    pub confidence_reasons: String,
    pub network_type: String,
    pub asn_organization: Option<String>,
    pub is_ambiguous: bool,
    pub attribution_state: String,
    pub created_at: i64,
    pub confirmed_at: Option<i64>,
}

impl TryFrom<InferenceRow> for CompanyInference {
    type Error = anyhow::Error;

    fn try_from(row: InferenceRow) -> Result<Self> {
        Ok(Self {
            event_id: row.event_id,
            inferred_company_name: row.inferred_company_name,
            domain: row.domain,
            industry: row.industry,
            size: row.size,
            location: row.location,
            confidence_score: row.confidence_score,
            confidence_reasons: serde_json::from_str(&row.confidence_reasons)
                .context("confidence reasons are not a JSON string list")?,
            network_type: row
                .network_type
                .parse()
                .with_context(|| format!("unknown network type '{}'", row.network_type))?,
            asn_organization: row.asn_organization,
            is_ambiguous: row.is_ambiguous,
            attribution_state: row
                .attribution_state
                .parse()
                .with_context(|| format!("unknown attribution state '{}'", row.attribution_state))?,
            created_at: row.created_at,
            confirmed_at: row.confirmed_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct IntentScoreRow {
    pub id: i64,
    pub event_id: i64,
    pub session_id: String,
    pub company_name: Option<String>,
    pub score: i64,
    pub is_repeat_visit: bool,
    pub visit_count: i64,
    pub viewed_pricing: bool,
    pub viewed_security: bool,
    pub viewed_integrations: bool,
    pub signals: String,
    pub recency_weight: f64,
    pub created_at: i64,
}

impl TryFrom<IntentScoreRow> for IntentScore {
    type Error = anyhow::Error;

    fn try_from(row: IntentScoreRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            event_id: row.event_id,
            session_id: parse_uuid(&row.session_id)?,
            company_name: row.company_name,
            score: row.score,
            is_repeat_visit: row.is_repeat_visit,
            visit_count: row.visit_count,
            viewed_pricing: row.viewed_pricing,
            viewed_security: row.viewed_security,
            viewed_integrations: row.viewed_integrations,
            signals: serde_json::from_str(&row.signals).context("intent signals are not valid JSON")?,
            recency_weight: row.recency_weight,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct LeadViewRow {
    pub id: i64,
    pub tracked_link_id: i64,
    pub creator_id: String,
    pub saas_id: String,
    pub cost_per_lead_cents: i64,
    pub session_id: String,
    pub visitor_fingerprint: String,
    pub fingerprint_window: i64,
    pub event_id: Option<i64>,
    pub created_at: i64,
    pub event_type: Option<String>,
    pub time_on_site_seconds: Option<i64>,
    pub inferred_company_name: Option<String>,
    pub network_type: Option<String>,
    pub confidence_score: Option<f64>,
    pub attribution_state: Option<String>,
    pub inference_created_at: Option<i64>,
}

impl LeadViewRow {
    pub fn into_view(self, now: i64) -> Result<LeadView> {
        let network_type: Option<NetworkType> = self
            .network_type
            .as_deref()
            .map(str::parse)
            .transpose()
            .context("unknown network type on joined inference")?;
        let attribution_state: Option<AttributionState> = self
            .attribution_state
            .as_deref()
            .map(str::parse)
            .transpose()
            .context("unknown attribution state on joined inference")?;

        let effective = match (self.confidence_score, attribution_state, self.inference_created_at) {
            (Some(score), Some(state), Some(created_at)) => {
                effective_confidence(score, state, created_at, now)
            }
            _ => 0.0,
        };

        let event_type: Option<EventType> = self
            .event_type
            .as_deref()
            .map(str::parse)
            .transpose()
            .context("unknown event type on joined click")?;
        let qualified = event_type
            .is_some_and(|t| is_qualified_engagement(t, self.time_on_site_seconds));

        Ok(LeadView {
            lead: Lead {
                id: self.id,
                tracked_link_id: self.tracked_link_id,
                creator_id: self.creator_id,
                saas_id: self.saas_id,
                cost_per_lead_cents: self.cost_per_lead_cents,
                session_id: self.session_id,
                visitor_fingerprint: self.visitor_fingerprint,
                fingerprint_window: self.fingerprint_window,
                event_id: self.event_id,
                created_at: self.created_at,
            },
            time_on_site_seconds: self.time_on_site_seconds,
            qualified,
            company_name: self.inferred_company_name,
            network_type,
            confidence_score: self.confidence_score,
            attribution_state,
            inference_created_at: self.inference_created_at,
            effective_confidence: effective,
        })
    }
}

/// Backend-agnostic head of the lead listing query; filters are appended
/// with a query builder.
pub(crate) const LEAD_VIEW_SELECT: &str = r#"
    SELECT l.id, l.tracked_link_id, l.creator_id, l.saas_id, l.cost_per_lead_cents,
           l.session_id, l.visitor_fingerprint, l.fingerprint_window, l.event_id, l.created_at,
           e.event_type, e.time_on_site_seconds,
           i.inferred_company_name, i.network_type, i.confidence_score, i.attribution_state,
           i.created_at AS inference_created_at
    FROM leads l
    LEFT JOIN link_events e ON e.id = l.event_id
    LEFT JOIN company_inferences i ON i.event_id = l.event_id
    WHERE 1 = 1
"#;
