//! Configuration for the consensus core (spec §6): validator identity,
//! quorum ratio, round timeouts, and the rebroadcast/slot cadence the
//! Siever loop runs on. Loaded from TOML with `serde` and validated with
//! `validator`, the way the teacher's crates load their configuration,
//! substituting the teacher's internal `apollo_config::SerializeConfig`
//! machinery (not a published crate) for plain `serde`/`toml`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::types::Address;

fn deserialize_millis_to_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

fn serialize_duration_as_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Top-level configuration for the consensus core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ConsensusConfig {
    /// This node's own rep address.
    pub validator_address: Address,
    /// The height consensus should start running from.
    #[validate(range(min = 0))]
    pub start_height: u64,
    /// Fraction of the rep roster that must vote accept for a candidate to
    /// reach quorum. Must be in `(0, 1]`.
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub acceptance_ratio: f64,
    /// Timeouts governing round progression.
    #[validate(nested)]
    pub timeouts: TimeoutsConfig,
    /// How long a candidate with no activity is kept before being garbage
    /// collected.
    #[serde(
        deserialize_with = "deserialize_millis_to_duration",
        serialize_with = "serialize_duration_as_millis"
    )]
    pub candidate_stale_after: Duration,
    /// When `false`, a proposal whose builder has no pending transactions
    /// is suppressed if the prior unconfirmed block was also empty
    /// (spec §4.4 step 7, §6 `ALLOW_MAKE_EMPTY_BLOCK`).
    pub allow_make_empty_block: bool,
}

/// Timing parameters for the Siever loop's deadlines and periodic tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct TimeoutsConfig {
    /// How long, after a block's declared timestamp, the loop waits for a
    /// quorum of votes before declaring [`crate::types::ConsensusError::NotEnoughVotes`].
    #[serde(
        deserialize_with = "deserialize_millis_to_duration",
        serialize_with = "serialize_duration_as_millis"
    )]
    pub block_vote_timeout: Duration,
    /// Interval between checks of the current round's slot timer.
    #[serde(
        deserialize_with = "deserialize_millis_to_duration",
        serialize_with = "serialize_duration_as_millis"
    )]
    pub slot_interval: Duration,
    /// Interval at which an unconfirmed proposal or vote set is
    /// rebroadcast to the roster.
    #[serde(
        deserialize_with = "deserialize_millis_to_duration",
        serialize_with = "serialize_duration_as_millis"
    )]
    pub rebroadcast_interval: Duration,
    /// Number of blocks a single leader may propose consecutively before
    /// handing off to the next rep in roster order, mirroring the Python
    /// original's `MAX_MADE_BLOCK_COUNT` turn-taking limit.
    #[validate(range(min = 1))]
    pub max_made_block_count: u32,
    /// Polling interval inside `_wait_for_voting` (spec §6
    /// `WAIT_SECONDS_FOR_VOTE`), capping how long each quorum-poll
    /// iteration sleeps for before re-checking the tally.
    #[serde(
        deserialize_with = "deserialize_millis_to_duration",
        serialize_with = "serialize_duration_as_millis"
    )]
    pub wait_seconds_for_vote: Duration,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            block_vote_timeout: Duration::from_secs(5),
            slot_interval: Duration::from_millis(500),
            rebroadcast_interval: Duration::from_secs(2),
            max_made_block_count: 10,
            wait_seconds_for_vote: Duration::from_millis(50),
        }
    }
}

impl ConsensusConfig {
    /// Loads and validates a [`ConsensusConfig`] from a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ConsensusConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }
}

/// Errors loading or validating a [`ConsensusConfig`].
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse consensus config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid consensus config: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[cfg(test)]
mod config_test {
    use super::*;

    #[test]
    fn rejects_acceptance_ratio_above_one() {
        let raw = r#"
            validator_address = [0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0]
            start_height = 0
            acceptance_ratio = 1.5
            candidate_stale_after = 60000
            allow_make_empty_block = true

            [timeouts]
            block_vote_timeout = 5000
            slot_interval = 500
            rebroadcast_interval = 2000
            max_made_block_count = 10
            wait_seconds_for_vote = 50
        "#;
        assert!(ConsensusConfig::from_toml_str(raw).is_err());
    }

    #[test]
    fn accepts_well_formed_config() {
        let raw = r#"
            validator_address = [0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0]
            start_height = 0
            acceptance_ratio = 0.67
            candidate_stale_after = 60000
            allow_make_empty_block = true

            [timeouts]
            block_vote_timeout = 5000
            slot_interval = 500
            rebroadcast_interval = 2000
            max_made_block_count = 10
            wait_seconds_for_vote = 50
        "#;
        let config = ConsensusConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.timeouts.max_made_block_count, 10);
    }
}
