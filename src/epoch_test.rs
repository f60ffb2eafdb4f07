use assert_matches::assert_matches;
use rstest::{fixture, rstest};

use crate::epoch::{leader_for_round, Epoch, EpochState};
use crate::types::{Address, BlockHeader, Hash, RepRoster, Vote, VoteResult};
use crate::votes_threshold::VotesThreshold;

fn addr(byte: u8) -> Address {
    Address([byte; 20])
}

fn roster(n: u8) -> RepRoster {
    RepRoster::new((0..n).map(addr).collect())
}

fn epoch(n: u8) -> Epoch {
    Epoch::start(10, roster(n), VotesThreshold::new(0.67).unwrap())
}

fn complaint(voter: Address, round: u32) -> Vote {
    Vote { voter_address: voter, block_hash: Hash::EMPTY, block_height: 10, round, result: VoteResult::Reject, signature: vec![] }
}

#[fixture]
fn four_rep_epoch() -> Epoch {
    epoch(4)
}

#[rstest]
fn new_epoch_starts_awaiting_proposal_at_round_zero(four_rep_epoch: Epoch) {
    assert_eq!(four_rep_epoch.round(), 0);
    assert_eq!(four_rep_epoch.state(), EpochState::AwaitingProposal);
}

#[test]
fn happy_path_transitions_to_committed() {
    let mut e = epoch(4);
    let hash = Hash([1u8; 32]);
    e.record_proposal(hash).unwrap();
    assert_eq!(e.begin_voting().unwrap(), hash);
    assert_eq!(e.commit().unwrap(), hash);
    assert_eq!(e.state(), EpochState::Committed { block_hash: hash });
}

#[test]
fn cannot_begin_voting_without_a_proposal() {
    let mut e = epoch(4);
    let err = e.begin_voting().unwrap_err();
    assert_matches!(err.from, EpochState::AwaitingProposal);
}

#[test]
fn cannot_advance_round_once_committed() {
    let mut e = epoch(4);
    let hash = Hash([1u8; 32]);
    e.record_proposal(hash).unwrap();
    e.begin_voting().unwrap();
    e.commit().unwrap();
    assert!(e.advance_round().is_err());
}

#[test]
fn advance_round_then_reopen_allows_new_proposal() {
    let mut e = epoch(4);
    assert_eq!(e.advance_round().unwrap(), 1);
    assert_eq!(e.state(), EpochState::LeaderComplaint { round: 1 });
    e.reopen_round().unwrap();
    assert_eq!(e.state(), EpochState::AwaitingProposal);
    e.record_proposal(Hash([2u8; 32])).unwrap();
}

#[test]
fn complaint_votes_for_previous_round_is_empty_at_round_zero() {
    let e = epoch(4);
    assert!(e.complaint_votes_for_previous_round().is_empty());
}

#[test]
fn complaint_votes_for_previous_round_reads_round_minus_one() {
    let mut e = epoch(4);
    e.record_complaint(complaint(addr(0), 0)).unwrap();
    e.advance_round().unwrap();
    assert_eq!(e.complaint_votes_for_previous_round().len(), 1);
}

#[test]
fn duplicate_complaint_from_same_rep_replaces_not_accumulates() {
    let mut e = epoch(4);
    e.record_complaint(complaint(addr(0), 0)).unwrap();
    e.record_complaint(complaint(addr(0), 0)).unwrap();
    e.advance_round().unwrap();
    assert_eq!(e.complaint_votes_for_previous_round().len(), 1);
}

#[test]
fn complained_result_reaches_quorum() {
    let mut e = epoch(3);
    assert!(!e.complained_result());
    e.record_complaint(complaint(addr(0), 0)).unwrap();
    e.record_complaint(complaint(addr(1), 0)).unwrap();
    assert!(e.complained_result());
}

#[test]
fn makeup_block_rejects_wrong_height() {
    let e = epoch(4);
    let mut header = sample_header();
    header.height = 999;
    assert!(e.makeup_block(header, &[], &[]).is_err());
}

#[test]
fn makeup_block_preserves_header_and_accepts_evidence() {
    let e = epoch(4);
    let header = sample_header();
    let complain_votes = vec![complaint(addr(0), 0)];
    let prev_votes = vec![complaint(addr(1), 0)];
    let stamped = e.makeup_block(header.clone(), &complain_votes, &prev_votes).unwrap();
    assert_eq!(stamped, header);
}

#[test]
fn remove_duplicate_tx_filters_already_included() {
    let pending = vec![Hash([1u8; 32]), Hash([2u8; 32]), Hash([3u8; 32])];
    let already = [Hash([2u8; 32])];
    let remaining = Epoch::remove_duplicate_tx_when_turn_to_leader(pending, &already);
    assert_eq!(remaining, vec![Hash([1u8; 32]), Hash([3u8; 32])]);
}

#[test]
fn leader_for_round_rotates() {
    let r = roster(3);
    assert_eq!(leader_for_round(&r, 0, 0), Some(addr(0)));
    assert_eq!(leader_for_round(&r, 1, 0), Some(addr(1)));
    assert_eq!(leader_for_round(&r, 3, 0), Some(addr(0)));
}

#[test]
fn leader_for_round_honors_offset_carried_from_prior_height() {
    let r = roster(3);
    assert_eq!(leader_for_round(&r, 0, 2), Some(addr(2)));
    assert_eq!(leader_for_round(&r, 1, 2), Some(addr(0)));
}

#[test]
fn new_epoch_advances_height_resets_round_and_starts_leader_at_next_leader() {
    let mut e = epoch(3);
    e.record_complaint(complaint(addr(0), 0)).unwrap();
    e.advance_round().unwrap();

    let next = e.new_epoch(addr(2));
    assert_eq!(next.height(), e.height() + 1);
    assert_eq!(next.round(), 0);
    assert_eq!(next.state(), EpochState::AwaitingProposal);
    assert!(next.complaint_votes_for_previous_round().is_empty());
    assert_eq!(next.current_leader(), Some(addr(2)));
}

fn sample_header() -> BlockHeader {
    BlockHeader {
        hash: Hash([9u8; 32]),
        height: 10,
        prev_hash: Hash::EMPTY,
        proposer_address: addr(0),
        next_leader_address: Address([0u8; 20]),
        reps_hash: Hash::EMPTY,
        next_reps_hash: Hash::EMPTY,
        timestamp: 0,
        version: "1.0".to_string(),
    }
}
