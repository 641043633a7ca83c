use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Inputs that went into a session score, persisted alongside it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentSignals {
    pub event_type: String,
    pub visit_count: i64,
    pub distinct_links: i64,
    pub viewed_pricing: bool,
    pub viewed_security: bool,
    pub viewed_integrations: bool,
    pub business_hours: bool,
    pub engaged: bool,
    pub session_age_days: i64,
    /// Score contribution per signal, in evaluation order
    pub contributions: Vec<(String, i64)>,
}

/// Per-session intent score attached to one event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentScore {
    pub id: i64,
    pub event_id: i64,
    pub session_id: Uuid,
    /// Joined from the event's company inference, when one exists
    pub company_name: Option<String>,
    pub score: i64,
    pub is_repeat_visit: bool,
    pub visit_count: i64,
    pub viewed_pricing: bool,
    pub viewed_security: bool,
    pub viewed_integrations: bool,
    pub signals: IntentSignals,
    /// Weight at scoring time; read paths recompute it from `created_at`
    pub recency_weight: f64,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewIntentScore {
    pub event_id: i64,
    pub session_id: Uuid,
    pub score: i64,
    pub is_repeat_visit: bool,
    pub visit_count: i64,
    pub viewed_pricing: bool,
    pub viewed_security: bool,
    pub viewed_integrations: bool,
    pub signals: IntentSignals,
    pub recency_weight: f64,
    pub created_at: i64,
}

impl IntentScore {
    pub fn from_new(id: i64, score: &NewIntentScore) -> Self {
        Self {
            id,
            event_id: score.event_id,
            session_id: score.session_id,
            company_name: None,
            score: score.score,
            is_repeat_visit: score.is_repeat_visit,
            visit_count: score.visit_count,
            viewed_pricing: score.viewed_pricing,
            viewed_security: score.viewed_security,
            viewed_integrations: score.viewed_integrations,
            signals: score.signals.clone(),
            recency_weight: score.recency_weight,
            created_at: score.created_at,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IntentTrend {
    Increasing,
    Stable,
    Decreasing,
}

/// Company-level view folded from stored intent scores, never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyIntent {
    pub company_name: String,
    pub avg_score: f64,
    pub weighted_score: f64,
    pub max_score: i64,
    pub session_count: usize,
    pub repeat_visit_count: usize,
    pub last_high_intent_at: Option<i64>,
    pub trend: IntentTrend,
}
