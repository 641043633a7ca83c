pub mod aggregate;
pub mod decay;
pub mod intent;

pub use aggregate::aggregate;
pub use decay::{effective_confidence, recency_weight};
pub use intent::{score_session, PageViews, ScoredEvent};
