//! The Siever consensus loop (spec §4.4): a cooperative, single-height-at-a-
//! time leader-proposal cycle. Grounded directly in
//! `original_source/loopchain/peer/consensus_siever.py`'s `consensus()`
//! tick and `_wait_for_voting` deadline logic, restructured around
//! `tokio::select!` the way the teacher's `manager.rs` drives
//! `MultiHeightManager::run_height`.

#[cfg(test)]
#[path = "siever_test.rs"]
mod siever_test;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::candidate_store::CandidateBlockStore;
use crate::config::ConsensusConfig;
use crate::context::{BlockChain, ChannelService, TimerService};
use crate::epoch::Epoch;
use crate::metrics;
use crate::types::{Address, ConfirmInfo, ConsensusError, Hash, Height, Vote, VoteResult};
use crate::vote_tally::TallyResult;
use crate::votes_threshold::VotesThreshold;

/// Bound on the vote-wake channel; a full channel just means the loop will
/// notice the backlog on its next slot tick instead of waking early, never
/// a dropped vote (votes still land in the candidate store's tally).
const VOTE_WAKE_CHANNEL_CAPACITY: usize = 256;

/// Bookkeeping for how many blocks in a row this rep, and the current
/// leader, have produced — mirrors the Python original's
/// `my_made_block_count`/`leader_made_block_count` pair, checked at
/// `MAX - 2` and `MAX - 1` respectively so a leader yields one block ahead
/// of actually exhausting its turn. The counts themselves live on the
/// [`BlockChain`] collaborator (spec §6); this struct is just the pure
/// comparison logic against a snapshot of them.
#[derive(Debug, Default, Clone, Copy)]
struct TurnCounters {
    my_made_block_count: u32,
    leader_made_block_count: u32,
}

impl TurnCounters {
    fn should_yield_turn(&self, max: u32) -> bool {
        self.my_made_block_count + 2 >= max
    }

    fn leader_exhausted(&self, max: u32) -> bool {
        self.leader_made_block_count + 1 >= max
    }
}

/// Drives one rep's participation in consensus: proposing when it is this
/// rep's turn to lead, voting otherwise, and restarting the round on a
/// quorum timeout or a rejected candidate.
pub struct Siever<B, C, T> {
    config: ConsensusConfig,
    validator_address: Address,
    chain: Arc<B>,
    channel: Arc<C>,
    timer: Arc<T>,
    store: CandidateBlockStore,
    epoch: Mutex<Epoch>,
    tick_lock: Mutex<()>,
    vote_wake_tx: mpsc::Sender<Vote>,
    vote_wake_rx: Mutex<mpsc::Receiver<Vote>>,
    shutdown: Mutex<watch::Receiver<bool>>,
}

impl<B, C, T> Siever<B, C, T>
where
    B: BlockChain + 'static,
    C: ChannelService + 'static,
    T: TimerService + 'static,
{
    /// Builds a `Siever` loop over the given collaborators, starting from
    /// `epoch`. `shutdown` is a [`watch::Receiver`] rather than a
    /// single-consumer channel so an in-flight quorum wait can observe it
    /// alongside the loop's own `select!` without consuming the signal.
    pub fn new(
        config: ConsensusConfig,
        epoch: Epoch,
        chain: Arc<B>,
        channel: Arc<C>,
        timer: Arc<T>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (vote_wake_tx, vote_wake_rx) = mpsc::channel(VOTE_WAKE_CHANNEL_CAPACITY);
        let validator_address = config.validator_address;
        Self {
            config,
            validator_address,
            chain,
            channel,
            timer,
            store: CandidateBlockStore::default(),
            epoch: Mutex::new(epoch),
            tick_lock: Mutex::new(()),
            vote_wake_tx,
            vote_wake_rx: Mutex::new(vote_wake_rx),
            shutdown: Mutex::new(shutdown),
        }
    }

    /// A handle callers can use to feed inbound votes to this loop without
    /// holding a reference to the `Siever` itself.
    pub fn vote_sender(&self) -> mpsc::Sender<Vote> {
        self.vote_wake_tx.clone()
    }

    /// Runs the consensus loop until the shutdown signal is set. Wakes on
    /// four events: shutdown, the periodic slot timer, an inbound vote, and
    /// the periodic rebroadcast timer — the same multi-way `select!` shape
    /// as the teacher's height-manager loop, collapsed to this protocol's
    /// simpler event set.
    pub async fn run(&self) {
        metrics::register_metrics();
        let mut slot_timer = tokio::time::interval(self.config.timeouts.slot_interval);
        let mut rebroadcast_timer = tokio::time::interval(self.config.timeouts.rebroadcast_interval);
        loop {
            if *self.shutdown.lock().await.borrow() {
                info!("siever loop shutting down");
                return;
            }
            tokio::select! {
                changed = async { self.shutdown.lock().await.changed().await } => {
                    if changed.is_ok() && *self.shutdown.lock().await.borrow() {
                        info!("siever loop shutting down");
                        return;
                    }
                }
                _ = slot_timer.tick() => {
                    self.tick().await;
                }
                _ = rebroadcast_timer.tick() => {
                    self.rebroadcast().await;
                }
                vote = async {
                    let mut rx = self.vote_wake_rx.lock().await;
                    rx.recv().await
                } => {
                    if let Some(vote) = vote {
                        self.handle_inbound_vote(vote).await;
                    }
                }
            }
        }
    }

    async fn handle_inbound_vote(&self, vote: Vote) {
        let block_hash = vote.block_hash;
        match self.store.add_vote(block_hash, vote) {
            Ok(()) => metrics::vote_received(),
            Err(err) => {
                metrics::vote_rejected();
                debug!(error = %err, "vote could not be recorded");
            }
        }
    }

    /// Drains any vote-wake entries left over from a previous tick (spec
    /// §4.4 step 2). Votes themselves are already durable in the candidate
    /// store the instant they arrive on this channel (see [`Self::run`]);
    /// this only clears a backlog so a slow tick doesn't see a pile of
    /// stale wake-ups it no longer needs to react to.
    async fn drain_pending_votes(&self) {
        let mut rx = self.vote_wake_rx.lock().await;
        while rx.try_recv().is_ok() {}
    }

    async fn broadcast_votes(&self, votes: Vec<Vote>) {
        use futures::StreamExt;
        // Fan the rebroadcast out concurrently rather than awaiting each
        // send in turn, the way the teacher drives its own multi-recipient
        // broadcasts in `manager.rs`.
        let mut sends: futures::stream::FuturesUnordered<_> =
            votes.into_iter().map(|vote| self.channel.broadcast_vote(vote)).collect();
        while let Some(result) = sends.next().await {
            if let Err(err) = result {
                warn!(error = %err, "rebroadcast failed");
            }
        }
    }

    async fn rebroadcast(&self) {
        let block_hash = {
            let epoch = self.epoch.lock().await;
            match epoch.state() {
                crate::epoch::EpochState::Voting { block_hash } => Some(block_hash),
                _ => None,
            }
        };
        let Some(block_hash) = block_hash else { return };
        if let Ok(Some(tally)) = self.store.get_votes(block_hash) {
            self.broadcast_votes(tally.votes()).await;
        }
    }

    /// One full pass of the consensus tick: reentrancy-guarded so a slow
    /// tick is never re-entered by an overlapping timer fire (the teacher's
    /// `MultiHeightManager` gets the same property for free from owning its
    /// loop state; the Python original enforces it with an explicit lock,
    /// which we keep).
    #[instrument(skip(self))]
    async fn tick(&self) {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            debug!("tick already in progress, skipping this slot");
            return;
        };
        if let Err(err) = self.tick_inner().await {
            warn!(error = %err, "consensus tick failed");
            self.advance_round_on_failure(&err).await;
        }
    }

    /// Exception policy for a failed tick (spec §4.4 step 8 / §7):
    /// `NotEnoughVotes`/`InvalidBlock` reschedule by advancing the round so
    /// the next tick tries a fresh leader turn; `NoCandidate`/
    /// `ThereIsNoCandidateBlock` do the same — the next tick's new-term/
    /// complained-result check then rebuilds atop the last committed block
    /// once the round has advanced.
    async fn advance_round_on_failure(&self, err: &ConsensusError) {
        let mut epoch = self.epoch.lock().await;
        match epoch.advance_round() {
            Ok(round) => {
                metrics::round_advanced();
                info!(round, cause = %err, "advanced to next round after tick failure");
                let _ = epoch.reopen_round();
            }
            Err(transition_err) => {
                debug!(error = %transition_err, cause = %err, "could not advance round from current state");
            }
        }
    }

    async fn tick_inner(&self) -> Result<(), ConsensusError> {
        self.drain_pending_votes().await;

        let (height, round, reps, is_leader) = {
            let epoch = self.epoch.lock().await;
            (epoch.height(), epoch.round(), epoch.reps().clone(), epoch.current_leader() == Some(self.validator_address))
        };
        metrics::set_height_and_round(height, round);
        metrics::set_candidates_tracked(self.store.len());

        // Step 1: leader check.
        if !is_leader {
            return Ok(());
        }

        let threshold =
            VotesThreshold::new(self.config.acceptance_ratio).map_err(|e| ConsensusError::Collaborator(e.to_string()))?;

        // Step 3: locate highest known block.
        let last_committed = self.chain.last_block().await?;
        let last_unconfirmed = self.chain.last_unconfirmed_block().await?;

        let complain_votes = { self.epoch.lock().await.complaint_votes_for_previous_round().to_vec() };
        let complained_result = self.epoch.lock().await.complained_result();

        // Step 4: previous-vote collection, with a fallback to persisted
        // confirm-info if no tally was ever built for the prior proposal.
        let mut prev_votes: Vec<Vote> = Vec::new();
        if let Some(ref unconfirmed) = last_unconfirmed {
            match self.store.get_votes(unconfirmed.hash) {
                Ok(Some(tally)) if tally.is_completed() => prev_votes = tally.votes(),
                Ok(Some(tally)) => self.broadcast_votes(tally.votes()).await,
                Ok(None) | Err(ConsensusError::NoCandidate(_)) => {
                    if let Some(ConfirmInfo::Structured(votes)) = self.chain.find_confirm_info_by_hash(unconfirmed.hash).await? {
                        prev_votes = votes;
                    }
                }
                Err(other) => return Err(other),
            }
        }

        // Step 5: new-term detection.
        let new_term = last_committed.as_ref().map(|b| b.reps_hash != b.next_reps_hash).unwrap_or(false)
            && last_unconfirmed.as_ref().map(|u| u.proposer_address != self.validator_address).unwrap_or(true);

        // Step 6: early return — wait for the network to catch up.
        if last_unconfirmed.is_some() && prev_votes.is_empty() && !new_term {
            debug!("previous proposal has no votes yet and this is not a new term; waiting");
            return Ok(());
        }

        // Step 7, first branch: a stalled leader or a rep-set rotation
        // discards the outstanding proposal and rebuilds atop the last
        // committed block, at a new round of the same height.
        if complained_result || new_term {
            self.chain.set_last_unconfirmed_block(None).await?;
            let mut epoch = self.epoch.lock().await;
            epoch.advance_round().map_err(|e| ConsensusError::Collaborator(e.to_string()))?;
            epoch.reopen_round().map_err(|e| ConsensusError::Collaborator(e.to_string()))?;
            drop(epoch);
            let (base_height, base_hash) = match last_committed {
                Some(ref b) => (b.height, b.hash),
                None => (height.saturating_sub(1), Hash::EMPTY),
            };
            return self.propose_and_drive(base_height, base_hash, &complain_votes, &[], &reps, threshold, round + 1).await;
        }

        // Step 7, second branch: made-block cap — commit what's
        // outstanding and hand off without proposing again.
        let my_made = self.chain.my_made_block_count().await;
        let leader_made = self.chain.leader_made_block_count().await;
        let max = self.config.timeouts.max_made_block_count;
        let turns = TurnCounters { my_made_block_count: my_made, leader_made_block_count: leader_made };

        if turns.should_yield_turn(max) {
            if let Some(ref unconfirmed) = last_unconfirmed {
                self.commit_header(unconfirmed, prev_votes).await?;
            }
            metrics::leader_handoff();
            info!("made-block cap reached; handing off without proposing again");
            return Ok(());
        }

        if let Some(ref unconfirmed) = last_unconfirmed {
            self.commit_header(unconfirmed, prev_votes.clone()).await?;
        }

        // Step 7, third branch: empty-block suppression.
        let pending_tx_count = self.chain.pending_tx_count().await;
        if pending_tx_count == 0 && !self.config.allow_make_empty_block {
            debug!("suppressing empty-block proposal; slot timer rearmed");
            return Ok(());
        }

        let (base_height, base_hash) = match last_unconfirmed {
            Some(ref u) => (u.height, u.hash),
            None => match last_committed {
                Some(ref b) => (b.height, b.hash),
                None => (height.saturating_sub(1), Hash::EMPTY),
            },
        };
        self.propose_and_drive(base_height, base_hash, &complain_votes, &prev_votes, &reps, threshold, round).await
    }

    /// Steps 9 through 13: build atop `(base_height, base_hash)`, broadcast,
    /// self-vote, wait for quorum, and commit.
    #[allow(clippy::too_many_arguments)]
    async fn propose_and_drive(
        &self,
        base_height: Height,
        base_hash: Hash,
        complain_votes: &[Vote],
        prev_votes: &[Vote],
        reps: &crate::types::RepRoster,
        threshold: VotesThreshold,
        round: crate::types::Round,
    ) -> Result<(), ConsensusError> {
        let next_height = base_height + 1;
        let next_leader = self.chain.get_next_leader(next_height).await?;

        let header = self.chain.build_block(next_height, base_hash, self.validator_address, next_leader).await?;
        let header = self.chain.score_invoke(header).await?;
        let header = {
            let epoch = self.epoch.lock().await;
            epoch.makeup_block(header, complain_votes, prev_votes)?
        };

        self.store.add_block(header.clone(), reps.as_slice().to_vec(), threshold, round)?;
        self.chain.set_last_unconfirmed_block(Some(header.clone())).await?;
        {
            let mut epoch = self.epoch.lock().await;
            epoch.record_proposal(header.hash).map_err(|e| ConsensusError::Collaborator(e.to_string()))?;
            epoch.begin_voting().map_err(|e| ConsensusError::Collaborator(e.to_string()))?;
        }

        self.channel.broadcast_proposal(header.clone()).await?;
        self.cast_self_vote(&header, round).await?;

        self.wait_for_quorum(&header).await?;

        self.finalize(&header).await
    }

    async fn cast_self_vote(&self, header: &crate::types::BlockHeader, round: crate::types::Round) -> Result<(), ConsensusError> {
        let vote = Vote {
            voter_address: self.validator_address,
            block_hash: header.hash,
            block_height: header.height,
            round,
            result: VoteResult::Accept,
            signature: Vec::new(),
        };
        self.store.add_vote(header.hash, vote.clone())?;
        self.channel.broadcast_vote(vote).await
    }

    /// Polls the candidate store for quorum until `header`'s declared
    /// timestamp plus the configured vote timeout passes. The deadline is
    /// anchored to the block's own timestamp, not the task clock that
    /// started waiting, so resuming after a restart still respects the
    /// original window (spec §5). Each poll iteration also watches the
    /// shutdown signal so an in-flight wait returns `NotEnoughVotes`
    /// promptly instead of riding out the full deadline (spec §5's
    /// cancellation guarantee).
    async fn wait_for_quorum(&self, header: &crate::types::BlockHeader) -> Result<(), ConsensusError> {
        let deadline = header.timestamp.saturating_add(self.config.timeouts.block_vote_timeout.as_micros() as u64);
        let poll_interval_micros = self.config.timeouts.wait_seconds_for_vote.as_micros().max(1) as u64;
        loop {
            match self.store.tally_result(header.hash)? {
                Some(result @ TallyResult::Accept) | Some(result @ TallyResult::Reject) => {
                    let label: &'static str = result.into();
                    debug!(block_hash = %header.hash, result = label, "quorum reached");
                    return if matches!(result, TallyResult::Accept) { Ok(()) } else { Err(ConsensusError::InvalidBlock) };
                }
                Some(TallyResult::Undecided) | None => {}
            }
            let now = self.timer.now_micros();
            if now >= deadline {
                metrics::quorum_timeout();
                return Err(ConsensusError::NotEnoughVotes);
            }
            let poll_budget = Duration::from_micros((deadline - now).min(poll_interval_micros));
            let mut shutdown = self.shutdown.lock().await;
            tokio::select! {
                _ = tokio::time::sleep(poll_budget) => {}
                changed = shutdown.changed() => {
                    if changed.is_ok() && *shutdown.borrow() {
                        metrics::quorum_timeout();
                        return Err(ConsensusError::NotEnoughVotes);
                    }
                }
            }
        }
    }

    /// Commits `header` (either this tick's freshly-quorate proposal or an
    /// outstanding unconfirmed one carried over from a prior tick),
    /// advances the epoch to the next height, and resets turn counters on
    /// a handoff.
    async fn commit_header(&self, header: &crate::types::BlockHeader, confirm_votes: Vec<Vote>) -> Result<(), ConsensusError> {
        self.chain.commit_block(header.clone(), ConfirmInfo::Structured(confirm_votes)).await?;
        self.store.remove_block(header.hash);
        self.chain.set_last_unconfirmed_block(None).await?;
        metrics::block_committed();

        let made_by_self = header.proposer_address == self.validator_address;
        self.chain.record_block_made(made_by_self).await?;

        {
            let mut epoch = self.epoch.lock().await;
            if epoch.height() == header.height {
                let _ = epoch.commit();
            }
        }

        let my_made = self.chain.my_made_block_count().await;
        let leader_made = self.chain.leader_made_block_count().await;
        let max = self.config.timeouts.max_made_block_count;
        let turns = TurnCounters { my_made_block_count: my_made, leader_made_block_count: leader_made };
        if turns.should_yield_turn(max) || turns.leader_exhausted(max) {
            self.chain.reset_turn_counters().await?;
        }

        let next_leader = self.chain.get_next_leader(header.height + 1).await?;
        let mut epoch = self.epoch.lock().await;
        *epoch = epoch.new_epoch(next_leader);
        Ok(())
    }

    async fn finalize(&self, header: &crate::types::BlockHeader) -> Result<(), ConsensusError> {
        let tally = self.store.get_votes(header.hash)?.ok_or(ConsensusError::ThereIsNoCandidateBlock)?;
        self.commit_header(header, tally.votes()).await
    }

    /// Reconstructs the votes that confirmed a previously committed block,
    /// decoding per the legacy `0.1a` opaque-bytes format or the structured
    /// JSON-equivalent vote list depending on the block's declared version
    /// (spec supplement: confirm-info round trip).
    pub async fn recover_previous_votes(&self, block_hash: Hash) -> Result<Vec<Vote>, ConsensusError> {
        match self.chain.find_confirm_info_by_hash(block_hash).await? {
            Some(ConfirmInfo::Structured(votes)) => Ok(votes),
            Some(ConfirmInfo::Legacy(_)) => {
                warn!(%block_hash, "legacy confirm info is opaque; no structured votes to recover");
                Ok(Vec::new())
            }
            None => Err(ConsensusError::NoCandidate(block_hash)),
        }
    }

    /// Current tracked height, for external observability.
    pub async fn current_height(&self) -> Height {
        self.epoch.lock().await.height()
    }
}
