use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Minimum engagement, in seconds, for a click to count as qualified
pub const QUALIFIED_ENGAGEMENT_SECS: i64 = 3;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventType {
    Impression,
    Click,
}

/// One observed impression or click
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkEvent {
    pub id: i64,
    pub tracked_link_id: i64,
    pub event_type: EventType,
    pub session_id: Uuid,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    /// Write-once, filled by the engagement confirmation
    pub time_on_site_seconds: Option<i64>,
    pub occurred_at: i64,
}

impl LinkEvent {
    pub fn is_qualified(&self) -> bool {
        is_qualified_engagement(self.event_type, self.time_on_site_seconds)
    }
}

/// A qualified click is a click with a confirmed engagement of at least
/// three seconds. An unreported engagement time never qualifies.
pub fn is_qualified_engagement(event_type: EventType, time_on_site_seconds: Option<i64>) -> bool {
    event_type == EventType::Click
        && time_on_site_seconds.is_some_and(|secs| secs >= QUALIFIED_ENGAGEMENT_SECS)
}

#[derive(Debug, Clone)]
pub struct NewLinkEvent {
    pub tracked_link_id: i64,
    pub event_type: EventType,
    pub session_id: Uuid,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub occurred_at: i64,
}
