//! Hotness: a monotone blend of use count and recency, clamped to [0, 1].

use chrono::{DateTime, Utc};

/// Half-saturation point of the use-count term.
const COUNT_SATURATION: f64 = 10.0;
/// Recency decay constant in days.
const RECENCY_DECAY_DAYS: f64 = 30.0;

/// Score how "hot" a context is from its use counter and last update time.
///
/// Monotone in both inputs: more uses never lower the score, and a more
/// recent update never lowers it either. Records with no timestamp get no
/// recency credit.
pub fn hotness_score(active_count: i64, updated_at: Option<DateTime<Utc>>) -> f64 {
    let count = active_count.max(0) as f64;
    let usage = count / (count + COUNT_SATURATION);

    let recency = match updated_at {
        Some(updated_at) => {
            let age_days = (Utc::now() - updated_at).num_seconds().max(0) as f64 / 86_400.0;
            (-age_days / RECENCY_DECAY_DAYS).exp()
        }
        None => 0.0,
    };

    (0.5 * usage + 0.5 * recency).clamp(0.0, 1.0)
}
