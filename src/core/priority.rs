//! Priority bands and dynamic priority scoring.
//!
//! Scores are numeric with lower meaning more urgent. Every score lives in
//! `[MIN_SCORE, MAX_SCORE]` and maps onto exactly one of four bands.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::task::TaskMetadata;
use crate::util::clock::{signed_until, whole_minutes_since};

/// Base priority assumed when a task does not declare one.
pub const DEFAULT_BASE_PRIORITY: f64 = 50.0;
/// Most urgent score.
pub const MIN_SCORE: f64 = 0.0;
/// Least urgent score.
pub const MAX_SCORE: f64 = 99.0;
/// Scores below this value may trigger preemption.
pub const PREEMPTOR_CEILING: f64 = 50.0;
/// Active tasks at or above this score may be preempted.
pub const PREEMPTIBLE_FLOOR: f64 = 75.0;
/// Boost applied to a task each time it is preempted.
pub const PREEMPTION_BOOST: f64 = 10.0;

const MINUTE_MS: i128 = 60_000;
const FIVE_MINUTES_MS: i128 = 5 * MINUTE_MS;
const HOUR_MS: i128 = 60 * MINUTE_MS;

/// One of the four discrete priority tiers, each backed by its own queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBand {
    /// Scores in `[0, 25)`.
    Critical,
    /// Scores in `[25, 50)`.
    High,
    /// Scores in `[50, 75)`.
    Normal,
    /// Scores in `[75, 99]`.
    Low,
}

impl PriorityBand {
    /// All bands in service order.
    pub const ALL: [Self; 4] = [Self::Critical, Self::High, Self::Normal, Self::Low];

    /// Band owning the given score.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score < 25.0 {
            Self::Critical
        } else if score < 50.0 {
            Self::High
        } else if score < 75.0 {
            Self::Normal
        } else {
            Self::Low
        }
    }

    /// Position in service order, usable as an array index.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for PriorityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a score into the valid range.
#[must_use]
pub fn clamp_score(score: f64) -> f64 {
    score.clamp(MIN_SCORE, MAX_SCORE)
}

/// Compute the dynamic priority of a task at `now`.
///
/// Starts from the base priority and subtracts one point per whole minute of
/// age, the deadline boosts (which accumulate as the deadline approaches), 30
/// for tasks owned by an end user and 100 for system tasks. The result is
/// floored and clamped to `[0, 99]`.
#[must_use]
pub fn calculate_priority(meta: &TaskMetadata, now: SystemTime) -> f64 {
    let mut score = meta.base_priority;

    let origin = meta.created_at.or(meta.submitted_at).unwrap_or(now);
    #[allow(clippy::cast_precision_loss)]
    {
        score -= whole_minutes_since(origin, now) as f64;
    }

    if let Some(deadline) = meta.deadline {
        let remaining = signed_until(deadline, now);
        if remaining < MINUTE_MS {
            score -= 50.0;
        }
        if remaining < FIVE_MINUTES_MS {
            score -= 20.0;
        }
        if remaining < HOUR_MS {
            score -= 5.0;
        }
    }

    if meta.user_id.is_some() {
        score -= 30.0;
    }
    if meta.is_system {
        score -= 100.0;
    }

    clamp_score(score.floor())
}
