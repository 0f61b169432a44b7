//! Database version headers and their ordering.

use crate::vector_clock::{VectorClock, VectorClockComparison};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::fmt;

/// Identity of one committed change-set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseVersionHeader {
    /// Authoring replica.
    pub client: String,
    /// Clock snapshot at commit time.
    pub vector_clock: VectorClock,
    /// Wall-clock commit time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl DatabaseVersionHeader {
    /// Creates a new header.
    pub fn new(client: impl Into<String>, vector_clock: VectorClock, timestamp: u64) -> Self {
        Self {
            client: client.into(),
            vector_clock,
            timestamp,
        }
    }

    /// The author's own counter in this header's clock.
    pub fn own_counter(&self) -> u64 {
        self.vector_clock.get(&self.client)
    }
}

impl fmt::Display for DatabaseVersionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/T={}", self.client, self.vector_clock, self.timestamp)
    }
}

/// Orders headers by causality, optionally breaking ties by time.
///
/// Causally ordered pairs map to `Less`/`Greater`. Equal or simultaneous
/// pairs are `Equal` unless `consider_time` is set, in which case the
/// earlier timestamp and then the smaller replica id come first.
#[derive(Debug, Clone, Copy)]
pub struct HeaderComparator {
    consider_time: bool,
}

impl HeaderComparator {
    /// Creates a comparator.
    pub fn new(consider_time: bool) -> Self {
        Self { consider_time }
    }

    /// Compares two headers.
    pub fn compare(&self, a: &DatabaseVersionHeader, b: &DatabaseVersionHeader) -> Ordering {
        match a.vector_clock.compare(&b.vector_clock) {
            VectorClockComparison::Smaller => Ordering::Less,
            VectorClockComparison::Greater => Ordering::Greater,
            VectorClockComparison::Equal | VectorClockComparison::Simultaneous => {
                if self.consider_time {
                    a.timestamp
                        .cmp(&b.timestamp)
                        .then_with(|| a.client.cmp(&b.client))
                } else {
                    Ordering::Equal
                }
            }
        }
    }
}

/// Deduplicates headers and returns them in a deterministic causal order.
///
/// Every header follows all headers whose clock is causally smaller. Among
/// headers whose predecessors are all placed, the one with the earliest
/// timestamp goes next, then the smallest replica id, then the smallest
/// clock rendering. The result is the same for any permutation of the input.
pub fn causal_order(
    headers: impl IntoIterator<Item = DatabaseVersionHeader>,
) -> Vec<DatabaseVersionHeader> {
    let mut seen = HashSet::new();
    let unique: Vec<DatabaseVersionHeader> = headers
        .into_iter()
        .filter(|h| seen.insert(h.clone()))
        .collect();

    let count = unique.len();
    let mut successors = vec![Vec::new(); count];
    let mut pending = vec![0usize; count];

    for (i, left) in unique.iter().enumerate() {
        for (j, right) in unique.iter().enumerate() {
            if i != j
                && left.vector_clock.compare(&right.vector_clock) == VectorClockComparison::Smaller
            {
                successors[i].push(j);
                pending[j] += 1;
            }
        }
    }

    let key = |i: usize| {
        let h = &unique[i];
        Reverse((h.timestamp, h.client.clone(), h.vector_clock.to_string(), i))
    };

    let mut ready: BinaryHeap<_> = (0..count).filter(|&i| pending[i] == 0).map(key).collect();
    let mut order = Vec::with_capacity(count);

    while let Some(Reverse((_, _, _, i))) = ready.pop() {
        order.push(i);
        for &next in &successors[i] {
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.push(key(next));
            }
        }
    }

    let mut slots: Vec<Option<DatabaseVersionHeader>> = unique.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(client: &str, clock: &str, timestamp: u64) -> DatabaseVersionHeader {
        DatabaseVersionHeader::new(client, clock.parse().unwrap(), timestamp)
    }

    #[test]
    fn causal_order_beats_time() {
        let cmp = HeaderComparator::new(true);
        let a = header("A", "A1", 50);
        let b = header("B", "A1,B1", 10);
        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
        assert_eq!(cmp.compare(&b, &a), Ordering::Greater);
    }

    #[test]
    fn simultaneous_without_time_is_equal() {
        let cmp = HeaderComparator::new(false);
        let a = header("A", "A1", 10);
        let b = header("B", "B1", 20);
        assert_eq!(cmp.compare(&a, &b), Ordering::Equal);
    }

    #[test]
    fn simultaneous_with_time_uses_timestamp() {
        let cmp = HeaderComparator::new(true);
        let a = header("A", "A1,B1", 20);
        let b = header("B", "A2", 10);
        assert_eq!(cmp.compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn equal_clock_and_time_falls_back_to_client() {
        let cmp = HeaderComparator::new(true);
        let a = header("A", "A1,B1", 10);
        let b = header("B", "A1,B1", 10);
        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
        assert_eq!(HeaderComparator::new(false).compare(&a, &b), Ordering::Equal);
    }

    #[test]
    fn causal_order_dedupes_and_respects_causality() {
        let headers = vec![
            header("A", "A2", 5),
            header("A", "A1", 10),
            header("B", "A1,B1", 3),
            header("A", "A1", 10),
        ];
        let ordered = causal_order(headers);
        let rendered: Vec<String> = ordered.iter().map(|h| h.vector_clock.to_string()).collect();
        assert_eq!(rendered, vec!["(A1)", "(A1,B1)", "(A2)"]);
    }

    #[test]
    fn causal_order_is_permutation_independent() {
        let headers = vec![
            header("A", "A1", 10),
            header("C", "C1", 10),
            header("B", "B1", 10),
            header("A", "A2", 11),
        ];
        let mut reversed = headers.clone();
        reversed.reverse();
        assert_eq!(causal_order(headers), causal_order(reversed));
    }
}
