//! Core data types shared across the consensus core: identifiers, the
//! header-only block view, votes, and the rep roster.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 32-byte opaque block identifier. The all-zero hash is the "empty"
/// sentinel meaning "unspecified block".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const EMPTY: Hash = Hash([0u8; 32]);

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// A 20-byte peer/validator identifier, derivable from a signing key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Height of a block; non-negative by construction (`u64`).
pub type Height = u64;

/// Sub-counter within an epoch, incremented per leader-complaint.
pub type Round = u32;

/// Microseconds since the Unix epoch.
pub type TimestampMicros = u64;

/// Header-only view of a block, sufficient for consensus bookkeeping. The
/// full block body (transactions, state root, etc.) is opaque to this
/// crate; it flows through [`crate::context::BlockChain`] instead.
///
/// Invariant: a block's hash is a deterministic function of its header
/// fields; two blocks with identical hashes are identical.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: Hash,
    pub height: Height,
    pub prev_hash: Hash,
    pub proposer_address: Address,
    pub next_leader_address: Address,
    pub reps_hash: Hash,
    pub next_reps_hash: Hash,
    pub timestamp: TimestampMicros,
    pub version: String,
}

/// Outcome a rep recorded for a candidate block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteResult {
    Accept,
    Reject,
}

/// A single rep's vote on a candidate block.
///
/// A vote is valid iff the voter belongs to the rep roster for `block_height`,
/// the signature verifies, and `(block_hash, block_height)` are mutually
/// consistent with each other and the round the tally was opened for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub voter_address: Address,
    pub block_hash: Hash,
    pub block_height: Height,
    pub round: Round,
    pub result: VoteResult,
    pub signature: Vec<u8>,
}

/// An ordered sequence of validator addresses fixed for a given height; used
/// to compute quorum thresholds and to assign leader turns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepRoster {
    reps: Vec<Address>,
}

impl RepRoster {
    pub fn new(reps: Vec<Address>) -> Self {
        Self { reps }
    }

    pub fn len(&self) -> usize {
        self.reps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reps.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.reps.contains(address)
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.reps
    }

    /// The rep that comes after `address` in roster order, wrapping around.
    /// Returns `None` if `address` is not in the roster.
    pub fn next_after(&self, address: &Address) -> Option<Address> {
        let position = self.reps.iter().position(|a| a == address)?;
        Some(self.reps[(position + 1) % self.reps.len()])
    }
}

/// Evidence persisted alongside a committed block: the votes that committed
/// it. The legacy version stores this as opaque bytes; from `0.1a` onward it
/// is a structured, JSON-serializable vote list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmInfo {
    /// Legacy encoding: opaque bytes, stored and replayed verbatim.
    Legacy(Vec<u8>),
    /// Structured encoding: the vote list backing a completed tally.
    Structured(Vec<Vote>),
}

pub const LEGACY_VERSION: &str = "0.1a";

/// Errors raised while validating or recording an individual vote. These are
/// always local: logged and dropped, never propagated past the call that
/// produced them (spec error-handling policy).
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum VoteError {
    #[error("voter {0} is not a member of the rep roster for this height")]
    UnknownVoter(Address),
    #[error("duplicate vote from {0} for round {1}")]
    DuplicateVote(Address, Round),
    #[error("vote height {vote_height} does not match tally height {tally_height}")]
    HeightMismatch { vote_height: Height, tally_height: Height },
    #[error("vote round {vote_round} does not match tally round {tally_round}")]
    RoundMismatch { vote_round: Round, tally_round: Round },
    #[error("signature verification failed for voter {0}")]
    BadSignature(Address),
}

/// Consensus-flow errors. These unwind to the top of a Siever tick, which
/// decides reschedule vs. handoff (spec §7).
#[derive(thiserror::Error, Debug)]
pub enum ConsensusError {
    /// No candidate is indexed under the requested hash.
    #[error("no candidate block for hash {0}")]
    NoCandidate(Hash),
    /// The proposal the tick was tracking disappeared (stale tick).
    #[error("no candidate block survives for this tick")]
    ThereIsNoCandidateBlock,
    /// The vote-wait deadline passed without reaching quorum.
    #[error("quorum deadline missed, not enough votes")]
    NotEnoughVotes,
    /// The tally decided reject.
    #[error("tally decided reject for this proposal")]
    InvalidBlock,
    /// A block's hash disagrees with the hash it was indexed under. This is
    /// a programming-level invariant violation; it is never swallowed.
    #[error("candidate indexed under {indexed} but block reports hash {actual}")]
    CandidateBlockSetBlock { indexed: Hash, actual: Hash },
    /// The collaborator (`BlockChain`, `ChannelService`, ...) reported a
    /// failure this crate cannot reason about further.
    #[error("external collaborator error: {0}")]
    Collaborator(String),
    /// A height was committed out of order; height monotonicity violated.
    #[error("committed height {attempted} is not exactly one greater than {previous}")]
    NonMonotonicHeight { previous: Height, attempted: Height },
}
