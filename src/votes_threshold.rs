//! Acceptance-ratio threshold used by [`crate::vote_tally::VoteTally`].

use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "votes_threshold_test.rs"]
mod votes_threshold_test;

/// Represents the fraction of a rep roster that must vote accept for a
/// candidate block to reach quorum. A ratio of `0.67` means that at least
/// `ceil(0.67 * reps)` accept votes are required; the roster-relative count
/// is always rounded up, so a total of 3 reps at ratio 0.67 requires 2
/// accepts, not a fractional 2.01.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VotesThreshold {
    ratio: f64,
}

/// Errors constructing a [`VotesThreshold`] from a misconfigured ratio.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum ThresholdError {
    #[error("acceptance ratio must satisfy 0 < ratio <= 1, got {0}")]
    OutOfRange(f64),
}

impl VotesThreshold {
    pub fn new(ratio: f64) -> Result<Self, ThresholdError> {
        if ratio > 0.0 && ratio <= 1.0 {
            Ok(Self { ratio })
        } else {
            Err(ThresholdError::OutOfRange(ratio))
        }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// The minimum number of accept votes required to meet quorum out of
    /// `total` reps: `ceil(ratio * total)`.
    pub fn required_accepts(&self, total: u64) -> u64 {
        if total == 0 {
            return 0;
        }
        (self.ratio * total as f64).ceil() as u64
    }

    /// True when `accepts` out of `total` reps meets or exceeds quorum.
    pub fn is_met(&self, accepts: u64, total: u64) -> bool {
        if total == 0 {
            return false;
        }
        accepts >= self.required_accepts(total)
    }

    /// True when `rejects` out of `total` reps makes quorum unreachable even
    /// if every remaining rep voted accept.
    pub fn is_foreclosed(&self, rejects: u64, total: u64) -> bool {
        if total == 0 {
            return false;
        }
        let required = self.required_accepts(total);
        let max_possible_accepts = total.saturating_sub(rejects);
        max_possible_accepts < required
    }
}
