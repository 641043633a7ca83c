use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NetworkType {
    Corporate,
    Residential,
    Mobile,
    Hosting,
    Vpn,
    Proxy,
    Unknown,
}

impl NetworkType {
    /// Networks whose traffic cannot be tied to the visitor's employer
    pub fn is_masking(&self) -> bool {
        matches!(self, NetworkType::Hosting | NetworkType::Vpn | NetworkType::Proxy)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AttributionState {
    Inferred,
    Confirmed,
    Mismatch,
    Disputed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot move attribution from {from} to {to}")]
pub struct TransitionError {
    pub from: AttributionState,
    pub to: AttributionState,
}

impl AttributionState {
    pub fn can_transition_to(&self, next: AttributionState) -> bool {
        use AttributionState::*;
        matches!(
            (self, next),
            (Inferred, Confirmed | Mismatch | Disputed)
                | (Disputed, Confirmed | Mismatch)
                | (Confirmed, Disputed)
                | (Mismatch, Disputed)
        )
    }

    pub fn transition(&self, next: AttributionState) -> Result<AttributionState, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError { from: *self, to: next })
        }
    }
}

/// Best-effort guess of which company a visit came from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompanyInference {
    pub event_id: i64,
    pub inferred_company_name: Option<String>,
    pub domain: Option<String>,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub location: Option<String>,
    pub confidence_score: f64,
    pub confidence_reasons: Vec<String>,
    pub network_type: NetworkType,
    pub asn_organization: Option<String>,
    pub is_ambiguous: bool,
    pub attribution_state: AttributionState,
    pub created_at: i64,
    pub confirmed_at: Option<i64>,
}

impl CompanyInference {
    /// The result returned whenever nothing can be said about the visitor
    pub fn unknown(event_id: i64, reason: impl Into<String>, created_at: i64) -> Self {
        Self {
            event_id,
            inferred_company_name: None,
            domain: None,
            industry: None,
            size: None,
            location: None,
            confidence_score: 0.0,
            confidence_reasons: vec![reason.into()],
            network_type: NetworkType::Unknown,
            asn_organization: None,
            is_ambiguous: true,
            attribution_state: AttributionState::Inferred,
            created_at,
            confirmed_at: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.network_type == NetworkType::Unknown && self.inferred_company_name.is_none()
    }

    pub fn with_event_id(mut self, event_id: i64) -> Self {
        self.event_id = event_id;
        self
    }
}
