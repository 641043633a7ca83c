//! Time-based weighting of stored scores
//!
//! Both functions are evaluated at read time from `created_at`, never from a
//! value stored alongside the row.

use crate::models::AttributionState;

/// Floor applied to decayed, unconfirmed confidence
pub const CONFIDENCE_FLOOR: f64 = 0.30;
/// Confidence lost per whole day of age
pub const DAILY_DECAY: f64 = 0.001;
/// Upper bound on the total decay
pub const MAX_DECAY: f64 = 0.30;

/// Intent half-life in days
pub const RECENCY_HALF_LIFE_DAYS: f64 = 14.0;
/// Old intent still counts for something
pub const MIN_RECENCY_WEIGHT: f64 = 0.05;

const SECS_PER_DAY: i64 = 86_400;

/// Whole days between `created_at` and `now`; future timestamps count as zero
pub fn days_old(created_at: i64, now: i64) -> i64 {
    (now - created_at).max(0) / SECS_PER_DAY
}

/// Confidence of an inference as seen at `now`.
///
/// Confirmed inferences are certain. Everything else loses a little every
/// day down to the floor, and a score already under the floor stays where
/// it is, so decay never raises a confidence.
pub fn effective_confidence(
    score: f64,
    state: AttributionState,
    created_at: i64,
    now: i64,
) -> f64 {
    if state == AttributionState::Confirmed {
        return 1.0;
    }

    let decay = (days_old(created_at, now) as f64 * DAILY_DECAY).min(MAX_DECAY);
    let floor = CONFIDENCE_FLOOR.min(score);
    (score - decay).max(floor)
}

/// `0.5^(age_days / 14)`, never below the minimum weight
pub fn recency_weight(created_at: i64, now: i64) -> f64 {
    let age_days = (now - created_at).max(0) as f64 / SECS_PER_DAY as f64;
    0.5_f64
        .powf(age_days / RECENCY_HALF_LIFE_DAYS)
        .max(MIN_RECENCY_WEIGHT)
}
