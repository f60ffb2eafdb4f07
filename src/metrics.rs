//! Observability counters and gauges for the Siever loop. The teacher
//! registers these through its internal `apollo_metrics::define_metrics!`
//! macro, which is workspace-private and not a published crate; we record
//! the same shape of measurements directly through the `metrics` crate's
//! `counter!`/`gauge!` macros instead.

use crate::types::Height;

/// Names of the metrics this crate emits, collected in one place so call
/// sites never hand-type a metric string.
pub const HEIGHT: &str = "siever_consensus_height";
pub const ROUND: &str = "siever_consensus_round";
pub const CANDIDATES_TRACKED: &str = "siever_consensus_candidates_tracked";
pub const BLOCKS_COMMITTED: &str = "siever_consensus_blocks_committed_total";
pub const VOTES_RECEIVED: &str = "siever_consensus_votes_received_total";
pub const VOTES_REJECTED: &str = "siever_consensus_votes_rejected_total";
pub const ROUNDS_ADVANCED: &str = "siever_consensus_rounds_advanced_total";
pub const QUORUM_TIMEOUTS: &str = "siever_consensus_quorum_timeouts_total";
pub const LEADER_HANDOFFS: &str = "siever_consensus_leader_handoffs_total";

/// Registers every metric this crate emits with an initial value of zero so
/// dashboards don't show a gap before the first event, the same rationale
/// the teacher's `register_metrics` step documents for its own counters.
pub fn register_metrics() {
    metrics::counter!(BLOCKS_COMMITTED).absolute(0);
    metrics::counter!(VOTES_RECEIVED).absolute(0);
    metrics::counter!(VOTES_REJECTED).absolute(0);
    metrics::counter!(ROUNDS_ADVANCED).absolute(0);
    metrics::counter!(QUORUM_TIMEOUTS).absolute(0);
    metrics::counter!(LEADER_HANDOFFS).absolute(0);
}

pub fn set_height_and_round(height: Height, round: crate::types::Round) {
    metrics::gauge!(HEIGHT).set(height as f64);
    metrics::gauge!(ROUND).set(round as f64);
}

pub fn set_candidates_tracked(count: usize) {
    metrics::gauge!(CANDIDATES_TRACKED).set(count as f64);
}

pub fn block_committed() {
    metrics::counter!(BLOCKS_COMMITTED).increment(1);
}

pub fn vote_received() {
    metrics::counter!(VOTES_RECEIVED).increment(1);
}

pub fn vote_rejected() {
    metrics::counter!(VOTES_REJECTED).increment(1);
}

pub fn round_advanced() {
    metrics::counter!(ROUNDS_ADVANCED).increment(1);
}

pub fn quorum_timeout() {
    metrics::counter!(QUORUM_TIMEOUTS).increment(1);
}

pub fn leader_handoff() {
    metrics::counter!(LEADER_HANDOFFS).increment(1);
}
