#![warn(missing_docs)]
//! Leader-driven consensus core for a permissioned, loopchain-family node.
//!
//! This crate owns four things: the epoch/round state machine, the
//! per-candidate vote tally, the candidate block store, and the Siever
//! loop that ties them together into a single rep's view of consensus.
//! Everything touching the network, persistent storage, or block contents
//! lives behind the [`context`] traits this crate is generic over.
//!
//! This crate does not implement Byzantine fault tolerance against
//! arbitrary equivocation, dynamic rep-set reconfiguration mid-round, or
//! smart-contract semantics; it assumes a crash-fault-tolerant,
//! permissioned rep set fixed for the duration of a height.

pub mod candidate_store;
pub mod config;
pub mod context;
pub mod epoch;
#[allow(missing_docs)]
pub mod metrics;
pub mod siever;
#[allow(missing_docs)]
pub mod types;
pub mod vote_tally;
pub mod votes_threshold;
