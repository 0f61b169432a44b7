//! Vector clocks and causal comparison.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Causal relation between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorClockComparison {
    /// Both clocks carry the same counters.
    Equal,
    /// The left clock happened before the right one.
    Smaller,
    /// The left clock happened after the right one.
    Greater,
    /// Neither clock dominates the other.
    Simultaneous,
}

impl VectorClockComparison {
    /// Returns the relation seen from the other side.
    pub fn reverse(self) -> Self {
        match self {
            Self::Smaller => Self::Greater,
            Self::Greater => Self::Smaller,
            other => other,
        }
    }
}

/// Mapping replica id to a monotonically increasing counter.
///
/// Absent entries read as zero. Zero counters are never stored, so two
/// clocks are structurally equal exactly when they compare `Equal`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<String, u64>);

impl VectorClock {
    /// Creates an empty clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter for a replica, zero if absent.
    pub fn get(&self, client: &str) -> u64 {
        self.0.get(client).copied().unwrap_or(0)
    }

    /// Sets the counter for a replica.
    pub fn set(&mut self, client: impl Into<String>, value: u64) {
        let client = client.into();
        if value == 0 {
            self.0.remove(&client);
        } else {
            self.0.insert(client, value);
        }
    }

    /// Increments the counter of one replica and returns the new value.
    pub fn increment(&mut self, client: &str) -> u64 {
        let next = self.get(client) + 1;
        self.0.insert(client.to_string(), next);
        next
    }

    /// Builder-style variant of [`VectorClock::set`].
    #[must_use]
    pub fn with(mut self, client: impl Into<String>, value: u64) -> Self {
        self.set(client, value);
        self
    }

    /// Returns true if no replica has a non-zero counter.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(replica, counter)` pairs in replica order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Compares two clocks over the union of their replicas.
    pub fn compare(&self, other: &VectorClock) -> VectorClockComparison {
        let mut smaller = false;
        let mut greater = false;

        for client in self.0.keys().chain(other.0.keys()) {
            let left = self.get(client);
            let right = other.get(client);
            if left < right {
                smaller = true;
            } else if left > right {
                greater = true;
            }
        }

        match (smaller, greater) {
            (false, false) => VectorClockComparison::Equal,
            (true, false) => VectorClockComparison::Smaller,
            (false, true) => VectorClockComparison::Greater,
            (true, true) => VectorClockComparison::Simultaneous,
        }
    }

    /// Returns true if `self` lies causally within `[from, to]`.
    pub fn is_within(&self, from: &VectorClock, to: &VectorClock) -> bool {
        matches!(
            self.compare(from),
            VectorClockComparison::Equal | VectorClockComparison::Greater
        ) && matches!(
            self.compare(to),
            VectorClockComparison::Equal | VectorClockComparison::Smaller
        )
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, (client, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{client}{value}")?;
        }
        f.write_str(")")
    }
}

/// Parses `A1,B2` or `(A1,B2)`. Replica ids must not end in a digit.
impl FromStr for VectorClock {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        let inner = s.trim().trim_start_matches('(').trim_end_matches(')');
        let mut clock = VectorClock::new();

        for entry in inner.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let split = entry
                .rfind(|c: char| !c.is_ascii_digit())
                .map(|i| i + 1)
                .ok_or_else(|| ProtocolError::InvalidVectorClock(s.to_string()))?;
            let (client, counter) = entry.split_at(split);
            let counter = counter
                .parse::<u64>()
                .map_err(|_| ProtocolError::InvalidVectorClock(s.to_string()))?;
            clock.set(client, counter);
        }

        Ok(clock)
    }
}
