use assert_matches::assert_matches;

use crate::types::{Address, Hash, Vote, VoteError, VoteResult};
use crate::vote_tally::{TallyResult, VoteTally};
use crate::votes_threshold::VotesThreshold;

fn addr(byte: u8) -> Address {
    Address([byte; 20])
}

fn reps(n: u8) -> Vec<Address> {
    (0..n).map(addr).collect()
}

fn vote(voter: Address, height: u64, round: u32, result: VoteResult) -> Vote {
    Vote { voter_address: voter, block_hash: Hash([7u8; 32]), block_height: height, round, result, signature: vec![] }
}

fn tally(rep_count: u8, ratio: f64) -> VoteTally {
    VoteTally::new(reps(rep_count), VotesThreshold::new(ratio).unwrap(), 10, 0, Hash([7u8; 32]))
}

#[test]
fn accepts_vote_from_known_rep() {
    let mut t = tally(4, 0.67);
    assert!(t.add(vote(addr(0), 10, 0, VoteResult::Accept)).is_ok());
    assert_eq!(t.summary().accept, 1);
}

#[test]
fn rejects_unknown_voter() {
    let mut t = tally(4, 0.67);
    let err = t.add(vote(addr(99), 10, 0, VoteResult::Accept)).unwrap_err();
    assert_matches!(err, VoteError::UnknownVoter(a) if a == addr(99));
}

#[test]
fn rejects_duplicate_vote() {
    let mut t = tally(4, 0.67);
    t.add(vote(addr(0), 10, 0, VoteResult::Accept)).unwrap();
    let err = t.add(vote(addr(0), 10, 0, VoteResult::Reject)).unwrap_err();
    assert_matches!(err, VoteError::DuplicateVote(a, 0) if a == addr(0));
}

#[test]
fn rejects_height_mismatch() {
    let mut t = tally(4, 0.67);
    let err = t.add(vote(addr(0), 11, 0, VoteResult::Accept)).unwrap_err();
    assert_matches!(err, VoteError::HeightMismatch { vote_height: 11, tally_height: 10 });
}

#[test]
fn rejects_round_mismatch() {
    let mut t = tally(4, 0.67);
    let err = t.add(vote(addr(0), 10, 1, VoteResult::Accept)).unwrap_err();
    assert_matches!(err, VoteError::RoundMismatch { vote_round: 1, tally_round: 0 });
}

#[test]
fn undecided_until_quorum() {
    let mut t = tally(4, 0.67);
    t.add(vote(addr(0), 10, 0, VoteResult::Accept)).unwrap();
    assert_eq!(t.result(), TallyResult::Undecided);
    assert!(!t.is_completed());
}

#[test]
fn accept_once_quorum_met() {
    let mut t = tally(4, 0.67);
    t.add(vote(addr(0), 10, 0, VoteResult::Accept)).unwrap();
    t.add(vote(addr(1), 10, 0, VoteResult::Accept)).unwrap();
    t.add(vote(addr(2), 10, 0, VoteResult::Accept)).unwrap();
    assert!(t.is_completed());
    assert_eq!(t.result(), TallyResult::Accept);
}

#[test]
fn reject_once_foreclosed() {
    let mut t = tally(4, 0.67);
    t.add(vote(addr(0), 10, 0, VoteResult::Reject)).unwrap();
    t.add(vote(addr(1), 10, 0, VoteResult::Reject)).unwrap();
    assert!(t.is_completed());
    assert_eq!(t.result(), TallyResult::Reject);
}

#[test]
fn votes_once_accepted_are_final() {
    let mut t = tally(4, 0.67);
    t.add(vote(addr(0), 10, 0, VoteResult::Accept)).unwrap();
    t.add(vote(addr(1), 10, 0, VoteResult::Accept)).unwrap();
    t.add(vote(addr(2), 10, 0, VoteResult::Accept)).unwrap();
    assert_eq!(t.result(), TallyResult::Accept);
    // A late reject from an untallied rep cannot undo a reached decision.
    t.add(vote(addr(3), 10, 0, VoteResult::Reject)).unwrap();
    assert_eq!(t.result(), TallyResult::Accept);
}
