//! Read-side views: ranked leads and company intent

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::handlers::{api_error, internal_error, ApiError, AppState};
use crate::cursor::{decode_cursor, encode_cursor};
use crate::models::{now_ts, CompanyIntent, LeadView};
use crate::scoring::aggregate;
use crate::storage::{LeadCursor, LeadFilter};

const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct LeadQueryParams {
    pub saas_id: Option<String>,
    pub creator_id: Option<String>,
    /// Compared against the effective confidence, not the stored score
    pub min_confidence: Option<f64>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub cursor: Option<String>,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct LeadsResponse {
    pub leads: Vec<LeadView>,
    /// Absent on the last page
    pub next_cursor: Option<String>,
}

/// Leads newest first. The confidence filter applies after paging, so a
/// page can hold fewer than `limit` leads while a next cursor exists.
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LeadQueryParams>,
) -> Result<Json<LeadsResponse>, ApiError> {
    let limit = params.limit.clamp(1, MAX_PAGE_SIZE);
    let after = params
        .cursor
        .as_deref()
        .map(decode_cursor)
        .transpose()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let filter = LeadFilter {
        saas_id: params.saas_id,
        creator_id: params.creator_id,
        tracked_link_id: None,
        after,
        limit,
    };

    let mut leads = state
        .storage
        .list_leads(&filter, now_ts())
        .await
        .map_err(|e| internal_error("Failed to list leads", e))?;

    let next_cursor = match leads.last() {
        Some(last) if leads.len() as i64 == limit => Some(
            encode_cursor(&LeadCursor {
                created_at: last.lead.created_at,
                id: last.lead.id,
            })
            .map_err(|e| internal_error("Failed to sign cursor", e))?,
        ),
        _ => None,
    };

    if let Some(min) = params.min_confidence {
        leads.retain(|lead| lead.effective_confidence >= min);
    }

    Ok(Json(LeadsResponse { leads, next_cursor }))
}

pub async fn company_intent(
    State(state): State<Arc<AppState>>,
    Path(company_name): Path<String>,
) -> Result<Json<CompanyIntent>, ApiError> {
    let scores = state
        .storage
        .company_intent_scores(&company_name)
        .await
        .map_err(|e| internal_error("Failed to load intent scores", e))?;

    if scores.is_empty() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "No scored visits for this company",
        ));
    }

    Ok(Json(aggregate(&company_name, &scores, now_ts())))
}
