//! Company-level intent, folded from stored session scores

use std::collections::HashSet;

use super::decay::recency_weight;
use crate::models::{CompanyIntent, IntentScore, IntentTrend};

/// Scores at or above this mark count as high intent
pub const HIGH_INTENT_SCORE: i64 = 60;
/// Width of the "recent" side of the trend comparison
pub const TREND_WINDOW_SECS: i64 = 7 * 86_400;
/// Relative change inside which the trend is stable
pub const TREND_BAND: f64 = 0.10;

fn mean(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<i64>() as f64 / values.len() as f64)
}

/// Recent average against older average, stable inside the band or when
/// either side has no data
pub fn trend(scores: &[IntentScore], now: i64) -> IntentTrend {
    let cutoff = now - TREND_WINDOW_SECS;
    let (recent, older): (Vec<&IntentScore>, Vec<&IntentScore>) =
        scores.iter().partition(|s| s.created_at >= cutoff);

    let recent: Vec<i64> = recent.iter().map(|s| s.score).collect();
    let older: Vec<i64> = older.iter().map(|s| s.score).collect();

    match (mean(&recent), mean(&older)) {
        (Some(recent), Some(older)) => {
            if recent > older * (1.0 + TREND_BAND) {
                IntentTrend::Increasing
            } else if recent < older * (1.0 - TREND_BAND) {
                IntentTrend::Decreasing
            } else {
                IntentTrend::Stable
            }
        }
        _ => IntentTrend::Stable,
    }
}

/// Pure fold; recency weights come from `created_at` at `now`, not from
/// the weight stored with each score
pub fn aggregate(company_name: &str, scores: &[IntentScore], now: i64) -> CompanyIntent {
    let values: Vec<i64> = scores.iter().map(|s| s.score).collect();

    let (weighted_sum, weight_total) = scores.iter().fold((0.0, 0.0), |(sum, total), s| {
        let w = recency_weight(s.created_at, now);
        (sum + s.score as f64 * w, total + w)
    });
    let weighted_score = if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        0.0
    };

    CompanyIntent {
        company_name: company_name.to_string(),
        avg_score: mean(&values).unwrap_or(0.0),
        weighted_score,
        max_score: values.iter().copied().max().unwrap_or(0),
        session_count: scores
            .iter()
            .map(|s| s.session_id)
            .collect::<HashSet<_>>()
            .len(),
        repeat_visit_count: scores.iter().filter(|s| s.is_repeat_visit).count(),
        last_high_intent_at: scores
            .iter()
            .filter(|s| s.score >= HIGH_INTENT_SCORE)
            .map(|s| s.created_at)
            .max(),
        trend: trend(scores, now),
    }
}
