//! External collaborator traits (spec §6). This crate owns consensus
//! bookkeeping only; everything touching the network, storage, or block
//! contents is expressed as an async trait the [`crate::siever::Siever`]
//! loop is generic over, the way the teacher's `types.rs` defines
//! `ConsensusContext` as the seam between `SingleHeightConsensus` and the
//! rest of the node. The Python original reached these through global
//! `ObjectManager`/`ChannelProperty` singletons; replacing that with an
//! explicitly constructed, dependency-injected context is the Design Note's
//! redesign decision for this crate.

use async_trait::async_trait;

use crate::types::{Address, BlockHeader, ConfirmInfo, ConsensusError, Hash, Height, RepRoster, Vote};

/// Read/write access to committed and in-flight chain state, block
/// construction, and the node's own turn-taking bookkeeping (spec §6).
/// Block (de)serialization, transaction selection, and state-root
/// computation are entirely this trait implementor's concern; this crate
/// only ever sees [`BlockHeader`]s.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BlockChain: Send + Sync {
    /// Builds a new candidate block header extending `prev_hash` at
    /// `height`, proposed by `proposer`, with `next_leader` already
    /// stamped in (spec §4.4 step 10).
    async fn build_block(
        &self,
        height: Height,
        prev_hash: Hash,
        proposer: Address,
        next_leader: Address,
    ) -> Result<BlockHeader, ConsensusError>;

    /// Invokes the scoring/execution hook to enrich a built header with
    /// state-root data before it is broadcast (spec §4.4 step 10). Treated
    /// as an external blocking call by the spec's concurrency model; this
    /// crate awaits it like any other collaborator call.
    async fn score_invoke(&self, header: BlockHeader) -> Result<BlockHeader, ConsensusError>;

    /// Persists `header` as the committed block for its height, alongside
    /// the votes (or legacy opaque bytes) that confirmed it.
    async fn commit_block(&self, header: BlockHeader, confirm_info: ConfirmInfo) -> Result<(), ConsensusError>;

    /// Looks up the confirm info recorded for a previously committed block,
    /// used to recover the votes that confirmed it across a restart.
    async fn find_confirm_info_by_hash(&self, block_hash: Hash) -> Result<Option<ConfirmInfo>, ConsensusError>;

    /// The rep roster and quorum-relevant hash in effect for `height`.
    async fn reps_for_height(&self, height: Height) -> Result<RepRoster, ConsensusError>;

    /// The last block this node has committed, if any.
    async fn last_block(&self) -> Result<Option<BlockHeader>, ConsensusError>;

    /// The proposal this node currently considers unconfirmed (broadcast
    /// but not yet committed), if any.
    async fn last_unconfirmed_block(&self) -> Result<Option<BlockHeader>, ConsensusError>;

    /// Replaces the tracked unconfirmed block, or clears it with `None`
    /// once it has been committed or discarded.
    async fn set_last_unconfirmed_block(&self, header: Option<BlockHeader>) -> Result<(), ConsensusError>;

    /// The rep that should lead `height`'s next round (spec §4.4 step 9),
    /// the element following this node in roster order, wrapping.
    async fn get_next_leader(&self, height: Height) -> Result<Address, ConsensusError>;

    /// Number of transactions currently pending for proposal; used for the
    /// empty-block-suppression check (spec §4.4 step 7, §6
    /// `ALLOW_MAKE_EMPTY_BLOCK`).
    async fn pending_tx_count(&self) -> usize;

    /// This node's own rep address.
    fn peer_address(&self) -> Address;

    /// An opaque handle identifying this node's signing identity; this
    /// crate never inspects it, only threads it through to collaborators
    /// that need to attribute a signature.
    fn peer_auth(&self) -> String;

    /// How many blocks in a row this node has produced as leader.
    async fn my_made_block_count(&self) -> u32;

    /// How many blocks in a row the current leader (self or otherwise) has
    /// produced.
    async fn leader_made_block_count(&self) -> u32;

    /// Records that a block was just made, incrementing both counters
    /// above; `made_by_self` distinguishes which counter this node should
    /// attribute the block to when it isn't the leader.
    async fn record_block_made(&self, made_by_self: bool) -> Result<(), ConsensusError>;

    /// Resets both turn counters to zero on a leader handoff.
    async fn reset_turn_counters(&self) -> Result<(), ConsensusError>;
}

/// Sends and receives consensus messages (proposals, votes, complaints) over
/// whatever transport the node uses; this crate never opens a socket.
#[async_trait]
pub trait ChannelService: Send + Sync {
    /// Broadcasts a vote to every rep in the current roster.
    async fn broadcast_vote(&self, vote: Vote) -> Result<(), ConsensusError>;

    /// Broadcasts a freshly built proposal header to every rep.
    async fn broadcast_proposal(&self, header: BlockHeader) -> Result<(), ConsensusError>;
}

/// Wall-clock facilities the Siever loop needs: "now", and a way to wait
/// for an absolute deadline. Kept as a trait (rather than calling
/// `tokio::time` directly) so tests can substitute a fake clock, the way
/// the teacher's `storage.rs`/`test_utils.rs` substitute mock
/// collaborators instead of real I/O.
#[async_trait]
pub trait TimerService: Send + Sync {
    /// Microseconds since the Unix epoch, as observed by this node.
    fn now_micros(&self) -> crate::types::TimestampMicros;

    /// Suspends the calling task until `deadline_micros` has passed.
    async fn sleep_until_micros(&self, deadline_micros: crate::types::TimestampMicros);
}

/// Default [`TimerService`] backed by the system clock and `tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimerService;

#[async_trait]
impl TimerService for SystemTimerService {
    fn now_micros(&self) -> crate::types::TimestampMicros {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }

    async fn sleep_until_micros(&self, deadline_micros: crate::types::TimestampMicros) {
        let now = self.now_micros();
        if deadline_micros <= now {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_micros(deadline_micros - now)).await;
    }
}
