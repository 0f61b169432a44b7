//! Per-replica header sequences.

use crate::header::{causal_order, DatabaseVersionHeader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered headers of one replica, oldest first.
///
/// Append order is causal order; a branch never goes backwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Branch {
    headers: Vec<DatabaseVersionHeader>,
}

impl Branch {
    /// Creates an empty branch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header.
    pub fn add(&mut self, header: DatabaseVersionHeader) {
        self.headers.push(header);
    }

    /// Returns the header at `index`.
    pub fn get(&self, index: usize) -> Option<&DatabaseVersionHeader> {
        self.headers.get(index)
    }

    /// Returns the newest header.
    pub fn last(&self) -> Option<&DatabaseVersionHeader> {
        self.headers.last()
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Returns true if the branch has no headers.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Returns true if the branch holds `header`.
    pub fn contains(&self, header: &DatabaseVersionHeader) -> bool {
        self.headers.contains(header)
    }

    /// Iterates over the headers, oldest first.
    pub fn iter(&self) -> std::slice::Iter<'_, DatabaseVersionHeader> {
        self.headers.iter()
    }

    /// Returns the headers as a slice.
    pub fn headers(&self) -> &[DatabaseVersionHeader] {
        &self.headers
    }

    /// Folds `other` into this branch, keeping causal order.
    pub fn merge(&mut self, other: &Branch) {
        if other.headers.iter().all(|h| self.contains(h)) {
            return;
        }
        let combined = self.headers.drain(..).chain(other.headers.iter().cloned());
        self.headers = causal_order(combined);
    }
}

impl FromIterator<DatabaseVersionHeader> for Branch {
    fn from_iter<I: IntoIterator<Item = DatabaseVersionHeader>>(iter: I) -> Self {
        Self {
            headers: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Branch {
    type Item = DatabaseVersionHeader;
    type IntoIter = std::vec::IntoIter<DatabaseVersionHeader>;

    fn into_iter(self) -> Self::IntoIter {
        self.headers.into_iter()
    }
}

impl<'a> IntoIterator for &'a Branch {
    type Item = &'a DatabaseVersionHeader;
    type IntoIter = std::slice::Iter<'a, DatabaseVersionHeader>;

    fn into_iter(self) -> Self::IntoIter {
        self.headers.iter()
    }
}

/// All known branches, keyed by replica id.
///
/// `Clone` is a deep copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Branches {
    branches: BTreeMap<String, Branch>,
}

impl Branches {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the branch of `client`, creating it if missing.
    pub fn get_or_create(&mut self, client: &str) -> &mut Branch {
        self.branches.entry(client.to_string()).or_default()
    }

    /// Returns the branch of `client`.
    pub fn get(&self, client: &str) -> Option<&Branch> {
        self.branches.get(client)
    }

    /// Replaces the branch of `client`.
    pub fn put(&mut self, client: impl Into<String>, branch: Branch) {
        self.branches.insert(client.into(), branch);
    }

    /// Removes and returns the branch of `client`.
    pub fn remove(&mut self, client: &str) -> Option<Branch> {
        self.branches.remove(client)
    }

    /// Replica ids in lexicographic order.
    pub fn clients(&self) -> impl Iterator<Item = &str> {
        self.branches.keys().map(String::as_str)
    }

    /// Iterates over `(replica, branch)` pairs in replica order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Branch)> {
        self.branches.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of branches.
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// Returns true if there are no branches.
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Every header of every branch.
    pub fn all_headers(&self) -> impl Iterator<Item = &DatabaseVersionHeader> {
        self.branches.values().flat_map(|b| b.iter())
    }
}
