mod event;
mod inference;
mod intent;
mod lead;
mod link;
mod session;

pub use event::{
    is_qualified_engagement, EventType, LinkEvent, NewLinkEvent, QUALIFIED_ENGAGEMENT_SECS,
};
pub use inference::{AttributionState, CompanyInference, NetworkType, TransitionError};
pub use intent::{CompanyIntent, IntentScore, IntentSignals, IntentTrend, NewIntentScore};
pub use lead::{Lead, LeadOutcome, LeadView, NewLead};
pub use link::{generate_hash, is_valid_hash, LinkToggles, NewTrackedLink, TrackedLink};
pub use session::{AttributionSession, SESSION_TTL_SECS};

/// Current Unix timestamp in seconds
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
