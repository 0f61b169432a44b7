//! Property-based test generators using proptest.
//!
//! Provides strategies for vector clocks, replica histories and file
//! trees that keep the invariants real replicas produce.

use driftsync_protocol::{Branches, DatabaseVersionHeader, VectorClock};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Replica ids used by the generators.
pub const REPLICAS: [&str; 4] = ["A", "B", "C", "D"];

/// Strategy for arbitrary vector clocks over [`REPLICAS`].
pub fn vector_clock_strategy() -> impl Strategy<Value = VectorClock> {
    prop::collection::btree_map(prop::sample::select(REPLICAS.to_vec()), 1u64..6, 0..4).prop_map(
        |entries| {
            entries
                .into_iter()
                .fold(VectorClock::new(), |clock, (client, value)| clock.with(client, value))
        },
    )
}

/// One step of a simulated multi-replica history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStep {
    /// Replica `0` commits a new version.
    Commit(usize),
    /// Replica `0` learns everything replica `1` committed so far.
    Learn(usize, usize),
}

/// Strategy for a sequence of history steps over `replicas` replicas.
pub fn history_steps_strategy(replicas: usize, max_steps: usize) -> impl Strategy<Value = Vec<HistoryStep>> {
    let replicas = replicas.clamp(1, REPLICAS.len());
    prop::collection::vec(
        prop_oneof![
            3 => (0..replicas).prop_map(HistoryStep::Commit),
            1 => (0..replicas, 0..replicas).prop_map(|(r, s)| HistoryStep::Learn(r, s)),
        ],
        1..max_steps.max(2),
    )
}

/// Plays `steps` and returns each replica's committed headers.
///
/// Every commit gets a distinct timestamp, so replica branches are
/// strictly increasing chains the way real replicas produce them.
pub fn play_history(steps: &[HistoryStep]) -> Branches {
    let mut knowledge: Vec<VectorClock> = vec![VectorClock::new(); REPLICAS.len()];
    let mut branches = Branches::new();

    for (time, step) in steps.iter().enumerate() {
        match *step {
            HistoryStep::Commit(r) => {
                let client = REPLICAS[r];
                knowledge[r].increment(client);
                let header = DatabaseVersionHeader::new(client, knowledge[r].clone(), 10 + time as u64);
                branches.get_or_create(client).add(header);
            }
            HistoryStep::Learn(r, s) => {
                let learned: Vec<(String, u64)> = knowledge[s]
                    .iter()
                    .map(|(client, value)| (client.to_string(), value))
                    .collect();
                for (client, value) in learned {
                    if knowledge[r].get(&client) < value {
                        knowledge[r].set(client, value);
                    }
                }
            }
        }
    }

    branches
}

/// Strategy for replica histories of up to four replicas.
pub fn branches_strategy() -> impl Strategy<Value = Branches> {
    history_steps_strategy(REPLICAS.len(), 16).prop_map(|steps| play_history(&steps))
}

/// Strategy for relative paths up to three levels deep.
pub fn relative_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-d]{1,2}", 1..4).prop_map(|parts| parts.join("/"))
}

/// Strategy for file trees: path to content, with no path below a file.
pub fn file_tree_strategy(max_files: usize) -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(
        relative_path_strategy(),
        prop::collection::vec(any::<u8>(), 0..64),
        0..max_files.max(1),
    )
    .prop_map(|tree| {
        let files: Vec<String> = tree.keys().cloned().collect();
        tree.into_iter()
            .filter(|(path, _)| {
                !files
                    .iter()
                    .any(|other| path.starts_with(&format!("{other}/")))
            })
            .collect()
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
