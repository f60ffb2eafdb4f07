//! Hash-indexed store of in-flight candidate blocks and their vote tallies
//! (spec §4.2). Grounded in `original_source/loopchain/blockchain/candidate_blocks.py`:
//! a candidate may accumulate votes before its block body ever arrives
//! (`votes_buffer`), and garbage collection happens only by pruning siblings
//! of a just-committed block plus anything that has gone stale, never by an
//! independent sweep.

#[cfg(test)]
#[path = "candidate_store_test.rs"]
mod candidate_store_test;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace, warn};

use crate::types::{BlockHeader, ConsensusError, Hash, Vote, VoteError};
use crate::vote_tally::VoteTally;
use crate::votes_threshold::VotesThreshold;

/// One block under consideration: its header (once known), the vote tally
/// backing it (built lazily once the header and rep roster are known), and
/// any votes that arrived before the header did.
struct CandidateBlock {
    block_hash: Hash,
    prev_hash: Option<Hash>,
    header: Option<BlockHeader>,
    tally: Option<VoteTally>,
    votes_buffer: Vec<Vote>,
    first_seen: Instant,
}

impl CandidateBlock {
    fn from_hash(block_hash: Hash) -> Self {
        Self { block_hash, prev_hash: None, header: None, tally: None, votes_buffer: Vec::new(), first_seen: Instant::now() }
    }

    fn from_header(header: BlockHeader) -> Self {
        Self {
            block_hash: header.hash,
            prev_hash: Some(header.prev_hash),
            header: Some(header),
            tally: None,
            votes_buffer: Vec::new(),
            first_seen: Instant::now(),
        }
    }

    /// Attaches a block header to a hash-only candidate, or validates that
    /// an already-attached header agrees with the one supplied. Building a
    /// fresh tally and replaying any buffered votes is the caller's job
    /// (needs the rep roster).
    fn set_header(&mut self, header: BlockHeader) -> Result<(), ConsensusError> {
        if header.hash != self.block_hash {
            return Err(ConsensusError::CandidateBlockSetBlock { indexed: self.block_hash, actual: header.hash });
        }
        if let Some(existing) = &self.header {
            if existing.hash != header.hash {
                return Err(ConsensusError::CandidateBlockSetBlock { indexed: existing.hash, actual: header.hash });
            }
            return Ok(());
        }
        self.prev_hash = Some(header.prev_hash);
        self.header = Some(header);
        Ok(())
    }

    /// Installs the tally for this candidate and flushes any buffered votes
    /// into it, logging and discarding (never propagating) any vote that
    /// fails to apply.
    fn install_tally(&mut self, mut tally: VoteTally) {
        for vote in self.votes_buffer.drain(..) {
            if let Err(err) = tally.add(vote) {
                debug!(block_hash = %self.block_hash, error = %err, "discarding buffered vote");
            }
        }
        self.tally = Some(tally);
    }

    fn record_vote(&mut self, vote: Vote) -> Result<(), VoteError> {
        match &mut self.tally {
            Some(tally) => tally.add(vote),
            None => {
                trace!(block_hash = %self.block_hash, voter = %vote.voter_address, "buffering vote ahead of block");
                self.votes_buffer.push(vote);
                Ok(())
            }
        }
    }
}

/// Staleness window past which a candidate is collected even without a
/// sibling commit pruning it, matching the Python original's timed-out
/// check in `remove_block`.
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

/// Thread-safe store of candidate blocks, keyed by block hash. A single
/// [`Mutex`] guards the whole index; per spec §5 at most one task mutates a
/// given candidate's tally at a time, so a full-operation lock is
/// equivalent to (and simpler than) splitting index and tally locking, as
/// the teacher's `proposer_cache.rs` does for its own single-lock cache.
pub struct CandidateBlockStore {
    candidates: Mutex<HashMap<Hash, CandidateBlock>>,
    stale_after: Duration,
}

impl Default for CandidateBlockStore {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER)
    }
}

impl CandidateBlockStore {
    pub fn new(stale_after: Duration) -> Self {
        Self { candidates: Mutex::new(HashMap::new()), stale_after }
    }

    /// Records a vote for `block_hash`. If `block_hash` is the empty
    /// sentinel, the vote targets every candidate currently known at
    /// `vote.block_height` (height-wide complaint votes, per the Python
    /// original's empty-hash broadcast rule).
    #[instrument(skip_all, fields(block_hash = %block_hash, height = vote.block_height))]
    pub fn add_vote(&self, block_hash: Hash, vote: Vote) -> Result<(), ConsensusError> {
        let mut candidates = self.candidates.lock().expect("candidate store lock poisoned");
        if block_hash.is_empty() {
            let mut applied = false;
            for candidate in candidates.values_mut().filter(|c| c.header.as_ref().map(|h| h.height) == Some(vote.block_height)) {
                applied = true;
                if let Err(err) = candidate.record_vote(vote.clone()) {
                    debug!(error = %err, "vote rejected while fanning out height-wide vote");
                }
            }
            if !applied {
                trace!("no candidates at this height yet to receive height-wide vote");
            }
            return Ok(());
        }
        let candidate = candidates.entry(block_hash).or_insert_with(|| CandidateBlock::from_hash(block_hash));
        candidate.record_vote(vote).map_err(|_| ConsensusError::NoCandidate(block_hash))
    }

    /// Creates (or attaches to) the candidate for `header.hash`, installing a
    /// freshly built tally scoped to `reps`/`threshold` and flushing any
    /// votes buffered ahead of it.
    #[instrument(skip_all, fields(block_hash = %header.hash, height = header.height))]
    pub fn add_block(
        &self,
        header: BlockHeader,
        reps: Vec<crate::types::Address>,
        threshold: VotesThreshold,
        round: crate::types::Round,
    ) -> Result<(), ConsensusError> {
        let mut candidates = self.candidates.lock().expect("candidate store lock poisoned");
        let block_hash = header.hash;
        let height = header.height;
        let candidate = candidates.entry(block_hash).or_insert_with(|| CandidateBlock::from_hash(block_hash));
        candidate.set_header(header)?;
        if candidate.tally.is_none() {
            let tally = VoteTally::new(reps, threshold, height, round, block_hash);
            candidate.install_tally(tally);
        }
        Ok(())
    }

    /// Returns the tally for a candidate (spec §4.2's `get_votes`):
    /// `Err(NoCandidate)` if no candidate at all is indexed under this
    /// hash, `Ok(None)` if the candidate exists but is still hash-only (no
    /// block attached yet, so no tally has been constructed), `Ok(Some(_))`
    /// once a tally is backing it.
    pub fn get_votes(&self, block_hash: Hash) -> Result<Option<VoteTally>, ConsensusError> {
        let candidates = self.candidates.lock().expect("candidate store lock poisoned");
        let candidate = candidates.get(&block_hash).ok_or(ConsensusError::NoCandidate(block_hash))?;
        Ok(candidate.tally.clone())
    }

    /// Convenience wrapper over [`CandidateBlockStore::get_votes`] for
    /// callers that only need the decided outcome.
    pub fn tally_result(&self, block_hash: Hash) -> Result<Option<crate::vote_tally::TallyResult>, ConsensusError> {
        Ok(self.get_votes(block_hash)?.map(|t| t.result()))
    }

    /// Prunes the store after `committed` has been finalized: every sibling
    /// sharing `committed`'s `prev_hash` is removed (they can never be
    /// committed now), plus any candidate whose `first_seen` exceeds the
    /// staleness window. This is the *only* garbage-collection path; there
    /// is no independent sweep.
    #[instrument(skip_all, fields(block_hash = %committed))]
    pub fn remove_block(&self, committed: Hash) {
        let mut candidates = self.candidates.lock().expect("candidate store lock poisoned");
        let prev_hash = candidates.get(&committed).and_then(|c| c.prev_hash);
        let now = Instant::now();
        candidates.retain(|hash, candidate| {
            if *hash == committed {
                return false;
            }
            if let Some(prev_hash) = prev_hash {
                if candidate.prev_hash == Some(prev_hash) {
                    debug!(sibling = %hash, "pruning sibling of committed block");
                    return false;
                }
            }
            if now.duration_since(candidate.first_seen) > self.stale_after {
                debug!(stale = %hash, "pruning stale candidate");
                return false;
            }
            true
        });
    }

    /// Number of candidates currently indexed; for observability/tests.
    pub fn len(&self) -> usize {
        self.candidates.lock().expect("candidate store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
