//! Head selection, punishment, ancestor requests and pruning.

mod common;

use std::collections::HashMap;

use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use sharechain::{Item, NetworkKind, NetworkParams, TrackerConfig, Verdict};

use common::*;

fn stale_block() -> BlockHash {
    BlockHash::from_byte_array([9; 32])
}

#[test]
fn test_punished_head_loses_to_heavier_clean_head() {
    let mut tracker = regtest_tracker();
    let chain = extend_chain(&mut tracker, None, 5, 1);
    let fork_point = chain[4];
    let timestamp = tracker.shares().get(&fork_point).unwrap().timestamp() + 30;

    let clean = mine_with(
        &tracker,
        Mining {
            desired_target: NetworkParams::regtest().max_target >> 2,
            time_seen: now() - 10,
            ..Mining::on(Some(fork_point), 2, timestamp)
        },
    );
    // seen first, so it would win on recency alone
    let stale = mine_with(
        &tracker,
        Mining {
            previous_block: stale_block(),
            time_seen: now() - 5000,
            ..Mining::on(Some(fork_point), 3, timestamp)
        },
    );
    let (clean_hash, stale_hash) = (clean.hash(), stale.hash());
    tracker.add(clean).unwrap();
    tracker.add(stale).unwrap();

    let result = tracker.think(&oracle, &snapshot(), &HashMap::new(), now());

    assert_eq!(result.best, Some(clean_hash));
    assert_eq!(result.heads.len(), 2);
    let (stale_score, _) = result
        .heads
        .iter()
        .find(|(_, hash)| *hash == stale_hash)
        .unwrap();
    assert_eq!(stale_score.punish, -1);
    assert_eq!(result.heads.last().map(|(_, hash)| *hash), Some(clean_hash));
}

#[test]
fn test_stale_best_retreats_to_its_parent() {
    let mut tracker = regtest_tracker();
    let chain = extend_chain(&mut tracker, None, 4, 1);
    let parent = chain[3];
    let timestamp = tracker.shares().get(&parent).unwrap().timestamp() + 30;
    let stale = mine_with(
        &tracker,
        Mining {
            previous_block: stale_block(),
            ..Mining::on(Some(parent), 2, timestamp)
        },
    );
    let stale_hash = stale.hash();
    assert!(stale
        .should_punish_reason(&snapshot(), &tracker, &HashMap::new())
        .is_punishable());
    tracker.add(stale).unwrap();

    let result = tracker.think(&oracle, &snapshot(), &HashMap::new(), now());

    assert_eq!(result.best, Some(parent));
    assert!(tracker.verified().contains(&stale_hash));
}

#[test]
fn test_local_share_on_old_block_is_not_punished() {
    let mut tracker = regtest_tracker();
    let chain = extend_chain(&mut tracker, None, 4, 1);
    let parent = chain[3];
    let timestamp = tracker.shares().get(&parent).unwrap().timestamp() + 30;
    let local = mine_with(
        &tracker,
        Mining {
            previous_block: stale_block(),
            peer: None,
            ..Mining::on(Some(parent), 2, timestamp)
        },
    );
    let local_hash = local.hash();
    assert_eq!(
        local.should_punish_reason(&snapshot(), &tracker, &HashMap::new()),
        Verdict::Clean
    );
    tracker.add(local).unwrap();

    let result = tracker.think(&oracle, &snapshot(), &HashMap::new(), now());
    assert_eq!(result.best, Some(local_hash));
}

#[test]
fn test_missing_ancestor_is_requested_from_the_child_sender() {
    let mut source = regtest_tracker();
    let chain = extend_chain(&mut source, None, 8, 1);

    let mut tracker = regtest_tracker();
    for hash in &chain[3..] {
        tracker.add(source.shares().get(hash).unwrap().clone()).unwrap();
    }
    let fresh = u64::from(BASE_TIME) + 1000;
    let result = tracker.think(&oracle, &snapshot(), &HashMap::new(), fresh);

    assert_eq!(result.best, None);
    assert_eq!(result.desired.len(), 1);
    let wanted = &result.desired[0];
    assert_eq!(wanted.hash, chain[2]);
    assert_eq!(wanted.peer_addr, Some(peer(1)));
    assert_eq!(
        wanted.timestamp,
        source.shares().get(&chain[7]).unwrap().timestamp()
    );

    // a day later nobody asks for it any more
    let stale = tracker.think(&oracle, &snapshot(), &HashMap::new(), fresh + 2 * 86_400);
    assert!(stale.desired.is_empty());
}

#[test]
fn test_clean_tracker_drops_old_losing_heads() {
    let mut tracker = regtest_tracker_with(TrackerConfig {
        network: NetworkKind::Regtest,
        top_heads_kept: 1,
        ..TrackerConfig::default()
    });
    let chain = extend_chain(&mut tracker, None, 10, 1);
    let fork_point = chain[5];
    let timestamp = tracker.shares().get(&fork_point).unwrap().timestamp() + 30;
    let late_seen = tracker.shares().get(&chain[9]).unwrap().time_seen() + 1;
    let fork = mine_with(
        &tracker,
        Mining {
            time_seen: late_seen,
            ..Mining::on(Some(fork_point), 2, timestamp)
        },
    );
    let fork_hash = fork.hash();
    tracker.add(fork).unwrap();

    let summary = tracker.clean_tracker(&oracle, &snapshot(), &HashMap::new(), now());

    assert_eq!(summary.heads_removed, 1);
    assert_eq!(summary.roots_removed, 0);
    assert!(!tracker.shares().contains(&fork_hash));
    assert!(!tracker.verified().contains(&fork_hash));
    assert!(tracker.shares().contains(&chain[9]));
}

#[test]
fn test_clean_tracker_keeps_young_heads() {
    let mut tracker = regtest_tracker_with(TrackerConfig {
        network: NetworkKind::Regtest,
        top_heads_kept: 1,
        ..TrackerConfig::default()
    });
    let chain = extend_chain(&mut tracker, None, 10, 1);
    let timestamp = tracker.shares().get(&chain[5]).unwrap().timestamp() + 30;
    let fork = mine_with(
        &tracker,
        Mining {
            time_seen: now() - 10,
            ..Mining::on(Some(chain[5]), 2, timestamp)
        },
    );
    tracker.add(fork).unwrap();

    let summary = tracker.clean_tracker(&oracle, &snapshot(), &HashMap::new(), now());
    assert_eq!(summary.heads_removed, 0);
    assert_eq!(tracker.shares().heads().len(), 2);
}

#[test]
fn test_clean_tracker_trims_deep_history_and_mining_continues() {
    let mut tracker = regtest_tracker();
    let chain = extend_chain(&mut tracker, None, 105, 1);
    let head = chain[104];

    let summary = tracker.clean_tracker(&oracle, &snapshot(), &HashMap::new(), now());

    assert_eq!(summary.heads_removed, 0);
    assert_eq!(summary.roots_removed, 6);
    assert_eq!(tracker.shares().get_height_and_last(Some(head)), (99, Some(chain[5])));
    assert!(chain[..6].iter().all(|hash| !tracker.shares().contains(hash)));

    let next = extend_chain(&mut tracker, Some(head), 1, 2);
    let result = tracker.think(&oracle, &snapshot(), &HashMap::new(), now());
    assert_eq!(result.best, Some(next[0]));
}
