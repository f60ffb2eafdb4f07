use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::candidate_store::CandidateBlockStore;
use crate::types::{Address, BlockHeader, Hash, VoteResult};
use crate::vote_tally::TallyResult;
use crate::votes_threshold::VotesThreshold;

fn addr(byte: u8) -> Address {
    Address([byte; 20])
}

fn hash(byte: u8) -> Hash {
    Hash([byte; 32])
}

fn header(hash_byte: u8, height: u64, prev_byte: u8) -> BlockHeader {
    BlockHeader {
        hash: hash(hash_byte),
        height,
        prev_hash: hash(prev_byte),
        proposer_address: addr(0),
        next_leader_address: addr(1),
        reps_hash: Hash::EMPTY,
        next_reps_hash: Hash::EMPTY,
        timestamp: 0,
        version: "1.0".to_string(),
    }
}

fn vote(voter: Address, block_hash: Hash, height: u64, result: VoteResult) -> crate::types::Vote {
    crate::types::Vote { voter_address: voter, block_hash, block_height: height, round: 0, result, signature: vec![] }
}

#[test]
fn vote_buffers_ahead_of_block() {
    let store = CandidateBlockStore::default();
    store.add_vote(hash(1), vote(addr(0), hash(1), 5, VoteResult::Accept)).unwrap();
    // No tally yet, so no result; the vote is buffered, not lost.
    assert_eq!(store.tally_result(hash(1)).unwrap(), None);

    let threshold = VotesThreshold::new(0.67).unwrap();
    store.add_block(header(1, 5, 0), vec![addr(0), addr(1), addr(2)], threshold, 0).unwrap();
    assert_eq!(store.get_votes(hash(1)).unwrap().unwrap().votes().len(), 1);
}

#[test]
fn block_then_votes_reach_quorum() {
    let store = CandidateBlockStore::default();
    let threshold = VotesThreshold::new(0.67).unwrap();
    store.add_block(header(1, 5, 0), vec![addr(0), addr(1), addr(2)], threshold, 0).unwrap();

    store.add_vote(hash(1), vote(addr(0), hash(1), 5, VoteResult::Accept)).unwrap();
    store.add_vote(hash(1), vote(addr(1), hash(1), 5, VoteResult::Accept)).unwrap();
    assert_eq!(store.tally_result(hash(1)).unwrap(), Some(TallyResult::Accept));
}

#[test]
fn mismatched_header_is_hard_error() {
    let store = CandidateBlockStore::default();
    let threshold = VotesThreshold::new(0.5).unwrap();
    store.add_block(header(1, 5, 0), vec![addr(0)], threshold, 0).unwrap();

    let mut bad = header(1, 5, 0);
    bad.timestamp = 99;
    bad.hash = hash(2);
    let err = store.add_block(bad, vec![addr(0)], threshold, 0).unwrap_err();
    assert!(matches!(err, crate::types::ConsensusError::CandidateBlockSetBlock { .. }));
}

#[test]
fn height_wide_vote_fans_out_to_all_candidates_at_height() {
    let store = CandidateBlockStore::default();
    let threshold = VotesThreshold::new(0.5).unwrap();
    store.add_block(header(1, 5, 0), vec![addr(0), addr(1)], threshold, 0).unwrap();
    store.add_block(header(2, 5, 0), vec![addr(0), addr(1)], threshold, 0).unwrap();

    store.add_vote(Hash::EMPTY, vote(addr(0), Hash::EMPTY, 5, VoteResult::Reject)).unwrap();

    assert_eq!(store.get_votes(hash(1)).unwrap().unwrap().votes().len(), 1);
    assert_eq!(store.get_votes(hash(2)).unwrap().unwrap().votes().len(), 1);
}

#[test]
fn remove_block_prunes_siblings_sharing_prev_hash() {
    let store = CandidateBlockStore::default();
    let threshold = VotesThreshold::new(0.5).unwrap();
    store.add_block(header(1, 5, 0), vec![addr(0)], threshold, 0).unwrap();
    store.add_block(header(2, 5, 0), vec![addr(0)], threshold, 0).unwrap();
    store.add_block(header(3, 6, 1), vec![addr(0)], threshold, 0).unwrap();

    store.remove_block(hash(1));

    assert!(store.get_votes(hash(1)).is_err());
    assert!(store.get_votes(hash(2)).is_err(), "sibling sharing prev_hash must be pruned");
    assert!(store.get_votes(hash(3)).is_ok(), "descendant of the committed block survives");
}

#[test]
fn remove_block_prunes_stale_candidates() {
    let store = CandidateBlockStore::new(Duration::from_millis(0));
    let threshold = VotesThreshold::new(0.5).unwrap();
    store.add_block(header(1, 5, 0), vec![addr(0)], threshold, 0).unwrap();
    store.add_block(header(9, 12, 8), vec![addr(0)], threshold, 0).unwrap();

    std::thread::sleep(Duration::from_millis(5));
    store.remove_block(hash(1));

    assert!(store.get_votes(hash(9)).is_err(), "unrelated but stale candidate is collected too");
}

#[test]
fn quorum_is_reached_regardless_of_vote_arrival_order() {
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    let store = CandidateBlockStore::default();
    let threshold = VotesThreshold::new(0.67).unwrap();
    let reps: Vec<Address> = (0..6).map(addr).collect();
    store.add_block(header(1, 5, 0), reps.clone(), threshold, 0).unwrap();

    let mut voters = reps.clone();
    voters.shuffle(&mut rand::rngs::StdRng::seed_from_u64(42));
    for voter in voters {
        store.add_vote(hash(1), vote(voter, hash(1), 5, VoteResult::Accept)).unwrap();
    }

    assert_eq!(store.tally_result(hash(1)).unwrap(), Some(TallyResult::Accept));
}
