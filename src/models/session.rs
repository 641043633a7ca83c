use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sessions expire thirty days after first issuance
pub const SESSION_TTL_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionSession {
    pub id: Uuid,
    pub created_at: i64,
    pub last_seen_at: i64,
}

impl AttributionSession {
    pub fn expires_at(&self) -> i64 {
        self.created_at + SESSION_TTL_SECS
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at()
    }

    /// Seconds left before expiry, used as the cookie Max-Age
    pub fn remaining_secs(&self, now: i64) -> i64 {
        (self.expires_at() - now).max(0)
    }
}
