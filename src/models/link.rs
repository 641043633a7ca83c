use rand::RngExt;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::EventType;

const HASH_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_HASH_LEN: usize = 64;

/// A redirect URL bound to one creator/company collaboration
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TrackedLink {
    pub id: i64,
    pub hash: String,
    pub destination_url: String,
    pub creator_id: String,
    pub saas_id: String,
    pub collaboration_id: String,
    /// Per-link lead price; the configured default applies when absent
    pub cost_per_lead_cents: Option<i64>,
    pub track_impressions: bool,
    pub track_clicks: bool,
    pub track_revenue: bool,
    pub created_at: i64,
}

impl TrackedLink {
    /// Whether the link's toggles allow logging this event type
    pub fn tracks(&self, event_type: EventType) -> bool {
        match event_type {
            EventType::Impression => self.track_impressions,
            EventType::Click => self.track_clicks,
        }
    }

    pub fn toggles(&self) -> LinkToggles {
        LinkToggles {
            track_impressions: self.track_impressions,
            track_clicks: self.track_clicks,
            track_revenue: self.track_revenue,
        }
    }

    pub fn lead_price_cents(&self, default_cents: i64) -> i64 {
        self.cost_per_lead_cents.unwrap_or(default_cents)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkToggles {
    pub track_impressions: bool,
    pub track_clicks: bool,
    pub track_revenue: bool,
}

impl Default for LinkToggles {
    fn default() -> Self {
        Self {
            track_impressions: true,
            track_clicks: true,
            track_revenue: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTrackedLink {
    pub hash: String,
    pub destination_url: String,
    pub creator_id: String,
    pub saas_id: String,
    pub collaboration_id: String,
    pub cost_per_lead_cents: Option<i64>,
    #[serde(default)]
    pub toggles: LinkToggles,
}

/// Hashes are URL-safe and bounded so they can be embedded in paths verbatim
pub fn is_valid_hash(hash: &str) -> bool {
    !hash.is_empty()
        && hash.len() <= MAX_HASH_LEN
        && hash
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Generate a random alphanumeric hash
pub fn generate_hash(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len.clamp(1, MAX_HASH_LEN))
        .map(|_| HASH_ALPHABET[rng.random_range(0..HASH_ALPHABET.len())] as char)
        .collect()
}
