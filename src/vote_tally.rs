//! Per-proposal accumulation of rep votes against a known rep roster (spec
//! §4.1). Grounded in the round/weight bookkeeping of the teacher's
//! `state_machine.rs` vote maps, simplified to this protocol's single
//! accept/reject vote instead of Tendermint's prevote/precommit pair.

#[cfg(test)]
#[path = "vote_tally_test.rs"]
mod vote_tally_test;

use std::collections::HashMap;

use crate::types::{Address, Height, Round, Vote, VoteError, VoteResult};
use crate::votes_threshold::VotesThreshold;

/// The decided outcome of a tally, or `Undecided` while votes are still
/// being collected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::IntoStaticStr)]
pub enum TallyResult {
    Accept,
    Reject,
    Undecided,
}

/// Vote counts for observability; not used in quorum decisions directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TallySummary {
    pub accept: u64,
    pub reject: u64,
    pub total_reps: u64,
}

/// Accumulates votes for one candidate block. Pure: holds no locks, touches
/// no I/O. Once constructed, the rep roster backing it is immutable for its
/// lifetime (spec invariant).
#[derive(Debug, Clone)]
pub struct VoteTally {
    reps: Vec<Address>,
    threshold: VotesThreshold,
    height: Height,
    round: Round,
    block_hash: crate::types::Hash,
    votes: HashMap<Address, Vote>,
}

impl VoteTally {
    pub fn new(
        reps: Vec<Address>,
        threshold: VotesThreshold,
        height: Height,
        round: Round,
        block_hash: crate::types::Hash,
    ) -> Self {
        Self { reps, threshold, height, round, block_hash, votes: HashMap::new() }
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn block_hash(&self) -> crate::types::Hash {
        self.block_hash
    }

    /// Appends a valid vote at the voter's positional slot.
    ///
    /// Fails with [`VoteError::DuplicateVote`], [`VoteError::UnknownVoter`],
    /// [`VoteError::HeightMismatch`], or [`VoteError::RoundMismatch`]. A
    /// rejected vote is never recorded; votes are final once accepted
    /// (quorum monotonicity, spec testable property 3).
    pub fn add(&mut self, vote: Vote) -> Result<(), VoteError> {
        if vote.block_height != self.height {
            return Err(VoteError::HeightMismatch {
                vote_height: vote.block_height,
                tally_height: self.height,
            });
        }
        if vote.round != self.round {
            return Err(VoteError::RoundMismatch { vote_round: vote.round, tally_round: self.round });
        }
        if !self.reps.contains(&vote.voter_address) {
            return Err(VoteError::UnknownVoter(vote.voter_address));
        }
        if self.votes.contains_key(&vote.voter_address) {
            return Err(VoteError::DuplicateVote(vote.voter_address, vote.round));
        }
        self.votes.insert(vote.voter_address, vote);
        Ok(())
    }

    fn accept_count(&self) -> u64 {
        self.votes.values().filter(|v| matches!(v.result, VoteResult::Accept)).count() as u64
    }

    fn reject_count(&self) -> u64 {
        self.votes.values().filter(|v| matches!(v.result, VoteResult::Reject)).count() as u64
    }

    /// True once either accept-votes meet quorum or reject-votes have made
    /// quorum unreachable.
    pub fn is_completed(&self) -> bool {
        let total = self.reps.len() as u64;
        self.threshold.is_met(self.accept_count(), total)
            || self.threshold.is_foreclosed(self.reject_count(), total)
    }

    pub fn result(&self) -> TallyResult {
        let total = self.reps.len() as u64;
        if self.threshold.is_met(self.accept_count(), total) {
            TallyResult::Accept
        } else if self.threshold.is_foreclosed(self.reject_count(), total) {
            TallyResult::Reject
        } else {
            TallyResult::Undecided
        }
    }

    pub fn summary(&self) -> TallySummary {
        TallySummary {
            accept: self.accept_count(),
            reject: self.reject_count(),
            total_reps: self.reps.len() as u64,
        }
    }

    /// The recorded votes, in arrival order is not preserved (stored by
    /// voter slot); used to build [`crate::types::ConfirmInfo`] for a
    /// committed block.
    pub fn votes(&self) -> Vec<Vote> {
        self.votes.values().cloned().collect()
    }
}
