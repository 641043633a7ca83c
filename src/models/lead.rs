use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{AttributionState, NetworkType};

/// The billable unit
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lead {
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
}

#[derive(Debug, Clone)]
pub struct NewLead {
    pub tracked_link_id: i64,
    pub creator_id: String,
    pub saas_id: String,
    pub cost_per_lead_cents: i64,
    pub session_id: String,
    pub visitor_fingerprint: String,
    pub fingerprint_window: i64,
    pub event_id: Option<i64>,
    pub created_at: i64,
}

/// Result of an atomic lead insert. A duplicate is a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadOutcome {
    Created(i64),
    Duplicate(i64),
}

impl LeadOutcome {
    pub fn lead_id(&self) -> i64 {
        match self {
            LeadOutcome::Created(id) | LeadOutcome::Duplicate(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, LeadOutcome::Created(_))
    }
}

/// Lead joined with its click and company inference, as read by dashboards
#[derive(Debug, Clone, Serialize)]
pub struct LeadView {
    pub lead: Lead,
    pub time_on_site_seconds: Option<i64>,
    pub qualified: bool,
    pub company_name: Option<String>,
    pub network_type: Option<NetworkType>,
    pub confidence_score: Option<f64>,
    pub attribution_state: Option<AttributionState>,
    pub inference_created_at: Option<i64>,
    /// Filled at read time from the decay rule
    pub effective_confidence: f64,
}
