//! Property tests over simulated replica histories and file trees.

use driftsync_engine::DatabaseReconciliator;
use driftsync_protocol::{causal_order, Branch, DatabaseVersionHeader, VectorClockComparison};
use driftsync_testkit::prelude::*;
use proptest::prelude::*;

fn clocks_strictly_increase(branch: &Branch) -> bool {
    branch.headers().windows(2).all(|pair| {
        pair[1].vector_clock.compare(&pair[0].vector_clock) == VectorClockComparison::Greater
    })
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn causal_order_ignores_input_order(branches in branches_strategy()) {
        let headers: Vec<DatabaseVersionHeader> = branches.all_headers().cloned().collect();
        let mut reversed = headers.clone();
        reversed.reverse();
        prop_assert_eq!(causal_order(headers), causal_order(reversed));
    }

    #[test]
    fn winner_is_deterministic_and_strictly_increasing(branches in branches_strategy()) {
        let first = DatabaseReconciliator::find_winner_branch(&branches).unwrap();
        let second = DatabaseReconciliator::find_winner_branch(&branches.clone()).unwrap();
        prop_assert_eq!(&first, &second);

        if let Some((client, winner)) = first {
            prop_assert!(clocks_strictly_increase(&winner));
            prop_assert_eq!(branches.get(&client).and_then(Branch::last), winner.last());
        }
    }

    #[test]
    fn prune_and_apply_partition_every_branch(branches in branches_strategy()) {
        let Some((_, winner)) = DatabaseReconciliator::find_winner_branch(&branches).unwrap() else {
            return Ok(());
        };
        for (_, loser) in branches.iter() {
            let prune = DatabaseReconciliator::find_losers_prune_branch(loser, &winner);
            let apply = DatabaseReconciliator::find_winners_apply_branch(loser, &winner);

            let prefix = &loser.headers()[..loser.len() - prune.len()];
            let mut rebuilt = prefix.to_vec();
            rebuilt.extend(apply.iter().cloned());
            prop_assert_eq!(rebuilt.as_slice(), winner.headers());
            prop_assert!(prefix.iter().all(|h| !prune.contains(h) && !apply.contains(h)));
        }
    }

    #[test]
    fn fresh_replica_reproduces_any_tree(tree in file_tree_strategy(12)) {
        let cloud = Cloud::new();
        let a = cloud.replica("A");
        for (path, content) in &tree {
            a.write(path, content);
        }
        a.up();

        let b = cloud.replica("B");
        b.down().unwrap();
        prop_assert_eq!(b.tree(), a.tree());
        prop_assert_eq!(b.branch(), a.branch());
        prop_assert!(b.up().is_none());
    }

    #[test]
    fn deletions_propagate(
        tree in file_tree_strategy(12),
        mask in prop::collection::vec(any::<bool>(), 12),
    ) {
        let cloud = Cloud::new();
        let a = cloud.replica("A");
        let b = cloud.replica("B");
        for (path, content) in &tree {
            a.write(path, content);
        }
        a.up();
        b.down().unwrap();

        for ((path, _), remove) in tree.iter().zip(&mask) {
            if *remove {
                a.remove(path);
            }
        }
        a.up();
        b.down().unwrap();
        prop_assert_eq!(b.tree(), a.tree());
        prop_assert!(b.up().is_none());
    }
}
