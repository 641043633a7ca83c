//! At most one lead per (tracked link, visitor)
//!
//! A visitor is identified twice over: by attribution session, and by a
//! fingerprint of IP and user agent within a ten-minute window. The second
//! key catches concurrent first visits that were each issued their own
//! session. Both keys are unique constraints, so creation is a single
//! insert-or-nothing statement with no locking.

use anyhow::Result;
use base64::prelude::*;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::billing::BillingBuffer;
use crate::models::{now_ts, LeadOutcome, LinkEvent, NewLead, TrackedLink};
use crate::storage::Storage;

pub const FINGERPRINT_WINDOW_SECS: i64 = 600;

/// base64url(SHA-256(ip | user agent))
pub fn visitor_fingerprint(ip: &str, user_agent: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.as_bytes());
    hasher.update(b"|");
    hasher.update(user_agent.unwrap_or_default().as_bytes());
    BASE64_URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Ten-minute bucket a timestamp falls into
pub fn fingerprint_window(ts: i64) -> i64 {
    ts.div_euclid(FINGERPRINT_WINDOW_SECS)
}

pub struct LeadRecorder {
    storage: Arc<dyn Storage>,
    billing: Arc<BillingBuffer>,
    default_cost_per_lead_cents: i64,
}

impl LeadRecorder {
    pub fn new(
        storage: Arc<dyn Storage>,
        billing: Arc<BillingBuffer>,
        default_cost_per_lead_cents: i64,
    ) -> Self {
        Self {
            storage,
            billing,
            default_cost_per_lead_cents,
        }
    }

    /// Create the lead for a click, or report the one that already exists.
    /// A duplicate is a success, only created leads are billed.
    pub async fn create_lead(
        &self,
        link: &TrackedLink,
        session_id: &str,
        fingerprint: &str,
        event: Option<&LinkEvent>,
    ) -> Result<LeadOutcome> {
        let created_at = event.map_or_else(now_ts, |e| e.occurred_at);
        let cost = link.lead_price_cents(self.default_cost_per_lead_cents);

        let lead = NewLead {
            tracked_link_id: link.id,
            creator_id: link.creator_id.clone(),
            saas_id: link.saas_id.clone(),
            cost_per_lead_cents: cost,
            session_id: session_id.to_string(),
            visitor_fingerprint: fingerprint.to_string(),
            fingerprint_window: fingerprint_window(created_at),
            event_id: event.map(|e| e.id),
            created_at,
        };

        let outcome = self.storage.insert_lead(&lead).await?;
        match outcome {
            LeadOutcome::Created(id) => {
                self.billing.record(&link.saas_id, &link.creator_id, 1, cost);
                tracing::debug!(lead_id = id, link_id = link.id, "Lead created");
            }
            LeadOutcome::Duplicate(id) => {
                tracing::debug!(lead_id = id, link_id = link.id, "Lead already exists");
            }
        }
        Ok(outcome)
    }

    /// Lead for a logged click, fingerprinted from the click itself
    pub async fn create_lead_for_event(
        &self,
        link: &TrackedLink,
        event: &LinkEvent,
    ) -> Result<LeadOutcome> {
        let fingerprint = visitor_fingerprint(&event.ip_address, event.user_agent.as_deref());
        self.create_lead(link, &event.session_id.to_string(), &fingerprint, Some(event))
            .await
    }
}
