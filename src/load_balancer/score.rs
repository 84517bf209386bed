//! Fairness scoring.
//!
//! Maps a backend's live load to a signed score; larger is more preferred.
//!
//! ```text
//! score = (1 - pending) * time_scale + ms_since_active
//! ```
//!
//! An idle backend scores highest, every in-flight request costs one
//! `time_scale`, and time since the last dispatch slowly earns preference
//! back.

use serde::{Deserialize, Serialize};

/// Signed, comparable preference.
pub type Score = i64;

/// Expected order of magnitude of request processing time.
pub const DEFAULT_TIME_SCALE_MS: i64 = 1000;

/// Substitute for a negative time delta.
pub const DEFAULT_SKEW_FALLBACK_MS: i64 = 1000;

/// Scores are kept inside the range a 32-bit score would hold.
pub const MAX_SCORE: Score = i32::MAX as Score;

/// Pending counts above this are treated as a corrupted counter.
pub const PENDING_CEILING: u64 = i32::MAX as u64;

/// Score given to a backend whose counter looks corrupted. Far below any
/// score a sane counter can produce, but still comparable.
pub const CORRUPT_COUNTER_SCORE: Score = i64::MIN / 2;

/// Tunables of the scoring function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScoreParams {
    /// Cost of one in-flight request, in milliseconds of idleness.
    pub time_scale_ms: i64,
    /// Delta used in place of a negative `ms_since_active`.
    pub skew_fallback_ms: i64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            time_scale_ms: DEFAULT_TIME_SCALE_MS,
            skew_fallback_ms: DEFAULT_SKEW_FALLBACK_MS,
        }
    }
}

/// Score a backend from its pending count and time since last dispatch,
/// before any weight adjustment.
pub fn raw_score(pending: u64, ms_since_active: i64, params: &ScoreParams) -> Score {
    let ms_since_active = if ms_since_active < 0 {
        tracing::warn!(
            delta_ms = ms_since_active,
            fallback_ms = params.skew_fallback_ms,
            "Negative time since last activity, clock skew between workers?"
        );
        params.skew_fallback_ms
    } else {
        ms_since_active
    };

    if pending > PENDING_CEILING {
        return CORRUPT_COUNTER_SCORE;
    }

    let pending = pending as i64;
    let scale = params.time_scale_ms;

    if pending > 1 && MAX_SCORE / ms_since_active.saturating_add(scale).max(1) < pending - 1 {
        // Too busy for too long: the normal formula would leave the score
        // range. Rank purely by load, below every sane score.
        return -pending * scale;
    }

    ((1 - pending) * scale).saturating_add(ms_since_active)
}

/// Adjust a raw score by a weight: negative scores shrink towards zero and
/// non-negative scores grow, so heavier backends absorb more load before
/// losing preference.
pub fn apply_weight(raw: Score, weight: u32) -> Score {
    let weight = Score::from(weight.max(1));
    if raw < 0 {
        raw / weight
    } else {
        raw.saturating_mul(weight)
    }
}

/// Weighted score of a backend.
pub fn score(pending: u64, ms_since_active: i64, weight: u32, params: &ScoreParams) -> Score {
    apply_weight(raw_score(pending, ms_since_active, params), weight)
}
