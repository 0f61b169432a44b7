//! Winner selection among diverging replica histories.

use crate::error::{SyncError, SyncResult};
use driftsync_protocol::{causal_order, Branch, Branches, HeaderComparator};
use std::cmp::Ordering;
use tracing::debug;

/// Picks the authoritative branch and derives what to prune and apply.
pub struct DatabaseReconciliator;

impl DatabaseReconciliator {
    /// Determines the winning replica and its branch.
    ///
    /// All headers are ordered causally with time as tie-breaker, then
    /// scanned: a header joins the winner branch only if it is strictly
    /// causally greater than the branch's current last header. The winner
    /// is the replica whose own branch ends in that last header.
    ///
    /// Returns `Ok(None)` when there are no headers at all.
    ///
    /// # Errors
    ///
    /// Returns a consistency violation if no replica's branch ends in the
    /// winning header.
    pub fn find_winner_branch(all: &Branches) -> SyncResult<Option<(String, Branch)>> {
        let sorted = causal_order(all.all_headers().cloned());
        let strict = HeaderComparator::new(false);

        let mut winner_branch = Branch::new();
        for candidate in sorted {
            let accept = match winner_branch.last() {
                None => true,
                Some(last) => strict.compare(&candidate, last) == Ordering::Greater,
            };
            if accept {
                winner_branch.add(candidate);
            } else {
                debug!(header = %candidate, "dropping header that does not extend the winner");
            }
        }

        let Some(last) = winner_branch.last() else {
            return Ok(None);
        };

        let ends_with = |client: &str| {
            all.get(client)
                .and_then(Branch::last)
                .is_some_and(|h| h == last)
        };

        let winner = if ends_with(&last.client) {
            Some(last.client.clone())
        } else {
            all.clients().find(|c| ends_with(c)).map(str::to_string)
        };

        match winner {
            Some(client) => Ok(Some((client, winner_branch))),
            None => Err(SyncError::consistency(format!(
                "no branch ends in winning header {last}"
            ))),
        }
    }

    /// Returns the suffix of `loser` that diverges from `winner`.
    pub fn find_losers_prune_branch(loser: &Branch, winner: &Branch) -> Branch {
        let diverge = (0..loser.len())
            .find(|&i| winner.get(i) != loser.get(i))
            .unwrap_or(loser.len());
        suffix(loser, diverge)
    }

    /// Returns the suffix of `winner` that `loser` does not have.
    pub fn find_winners_apply_branch(loser: &Branch, winner: &Branch) -> Branch {
        let diverge = (0..winner.len())
            .find(|&i| loser.get(i) != winner.get(i))
            .unwrap_or(winner.len());
        suffix(winner, diverge)
    }
}

fn suffix(branch: &Branch, from: usize) -> Branch {
    branch
        .headers()
        .get(from..)
        .unwrap_or_default()
        .iter()
        .cloned()
        .collect()
}
