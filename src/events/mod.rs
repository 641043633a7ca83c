//! Impression and click logging, plus the write-once engagement time

use anyhow::Result;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::enrichment::geoip::GeoIpService;
use crate::models::{now_ts, EventType, LinkEvent, NewLinkEvent, TrackedLink};
use crate::storage::Storage;

#[derive(Debug, Error)]
pub enum EngagementError {
    #[error("time on site cannot be negative")]
    NegativeDuration,
    #[error("event {0} does not exist")]
    UnknownEvent(i64),
    #[error("event {0} is not a click")]
    NotAClick(i64),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Request details recorded with every event
#[derive(Debug, Clone)]
pub struct Visit {
    pub ip: IpAddr,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

#[derive(Clone)]
pub struct EventLogger {
    storage: Arc<dyn Storage>,
    geoip: Arc<GeoIpService>,
}

impl EventLogger {
    pub fn new(storage: Arc<dyn Storage>, geoip: Arc<GeoIpService>) -> Self {
        Self { storage, geoip }
    }

    pub async fn log(
        &self,
        link: &TrackedLink,
        event_type: EventType,
        session_id: Uuid,
        visit: &Visit,
    ) -> Result<LinkEvent> {
        let location = self.geoip.locate(visit.ip);

        let event = NewLinkEvent {
            tracked_link_id: link.id,
            event_type,
            session_id,
            ip_address: visit.ip.to_string(),
            user_agent: visit.user_agent.clone(),
            referrer: visit.referrer.clone(),
            country: location.country_code,
            city: location.city,
            occurred_at: now_ts(),
        };

        self.storage.insert_event(&event).await
    }

    /// Record how long the visitor stayed. Returns false when the time was
    /// already reported; the first report wins. Only clicks can qualify, so
    /// reports for impressions are refused.
    pub async fn confirm_engagement(
        &self,
        event_id: i64,
        time_on_site_seconds: i64,
    ) -> Result<bool, EngagementError> {
        if time_on_site_seconds < 0 {
            return Err(EngagementError::NegativeDuration);
        }
        match self.storage.get_event(event_id).await? {
            None => return Err(EngagementError::UnknownEvent(event_id)),
            Some(event) if event.event_type != EventType::Click => {
                return Err(EngagementError::NotAClick(event_id))
            }
            Some(_) => {}
        }

        Ok(self
            .storage
            .set_time_on_site(event_id, time_on_site_seconds)
            .await?)
    }
}
