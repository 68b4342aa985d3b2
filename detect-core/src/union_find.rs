//! Disjoint-set with path compression and union-by-rank.
//!
//! Retained as a utility (candidate pre-grouping, diagnostics); final group
//! formation uses the strict-clique grouper instead, which does not promote
//! transitively.

use std::collections::HashMap;
use std::hash::Hash;

use crate::errors::DetectError;

/// Disjoint-set over arbitrary hashable elements.
#[derive(Debug, Default)]
pub struct UnionFind<T: Clone + Eq + Hash> {
    index: HashMap<T, usize>,
    elements: Vec<T>,
    parent: Vec<usize>,
    rank: Vec<u32>,
}

impl<T: Clone + Eq + Hash> UnionFind<T> {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            elements: Vec::new(),
            parent: Vec::new(),
            rank: Vec::new(),
        }
    }

    /// Adds an element as its own singleton set; no-op when present.
    pub fn add(&mut self, element: T) {
        if self.index.contains_key(&element) {
            return;
        }
        let i = self.parent.len();
        self.index.insert(element.clone(), i);
        self.elements.push(element);
        self.parent.push(i);
        self.rank.push(0);
    }

    /// Representative element of `element`'s set.
    ///
    /// # Errors
    /// [`DetectError::ElementNotFound`] for unknown elements.
    pub fn find(&mut self, element: &T) -> Result<T, DetectError>
    where
        T: std::fmt::Display,
    {
        let i = *self
            .index
            .get(element)
            .ok_or_else(|| DetectError::ElementNotFound(element.to_string()))?;
        let root = self.find_root(i);
        Ok(self.elements[root].clone())
    }

    /// Merges the sets of `a` and `b` (adding either if missing).
    pub fn union(&mut self, a: T, b: T) {
        self.add(a.clone());
        self.add(b.clone());
        let ra = self.find_root(self.index[&a]);
        let rb = self.find_root(self.index[&b]);
        if ra == rb {
            return;
        }
        // Union by rank: attach the shallower tree under the deeper one.
        if self.rank[ra] < self.rank[rb] {
            self.parent[ra] = rb;
        } else if self.rank[ra] > self.rank[rb] {
            self.parent[rb] = ra;
        } else {
            self.parent[rb] = ra;
            self.rank[ra] += 1;
        }
    }

    /// Whether two elements share a set.
    pub fn connected(&mut self, a: &T, b: &T) -> Result<bool, DetectError>
    where
        T: std::fmt::Display,
    {
        Ok(self.find(a)? == self.find(b)?)
    }

    /// Enumerates the components, filtered to size ≥ `min_size`.
    pub fn get_groups(&mut self, min_size: usize) -> Vec<Vec<T>> {
        let mut by_root: HashMap<usize, Vec<T>> = HashMap::new();
        for i in 0..self.parent.len() {
            let root = self.find_root(i);
            by_root
                .entry(root)
                .or_default()
                .push(self.elements[i].clone());
        }
        let mut groups: Vec<Vec<T>> = by_root
            .into_values()
            .filter(|g| g.len() >= min_size)
            .collect();
        groups.sort_by_key(|g| std::cmp::Reverse(g.len()));
        groups
    }

    fn find_root(&mut self, mut i: usize) -> usize {
        // Path halving keeps the amortised cost near-constant.
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_iff_same_representative() {
        let mut uf = UnionFind::new();
        for n in [1i64, 2, 3, 4, 5] {
            uf.add(n);
        }
        uf.union(1, 2);
        uf.union(2, 3);

        assert!(uf.connected(&1, &3).unwrap());
        assert!(!uf.connected(&1, &4).unwrap());
        assert_eq!(uf.find(&1).unwrap(), uf.find(&3).unwrap());
        assert_ne!(uf.find(&1).unwrap(), uf.find(&5).unwrap());
    }

    #[test]
    fn groups_partition_added_elements() {
        let mut uf = UnionFind::new();
        for n in 0i64..10 {
            uf.add(n);
        }
        uf.union(0, 1);
        uf.union(1, 2);
        uf.union(5, 6);

        let all = uf.get_groups(1);
        let total: usize = all.iter().map(|g| g.len()).sum();
        assert_eq!(total, 10, "every element appears in exactly one group");

        let big = uf.get_groups(2);
        assert_eq!(big.len(), 2);
        assert_eq!(big[0].len(), 3);
        assert_eq!(big[1].len(), 2);
    }

    #[test]
    fn find_unknown_element_fails() {
        let mut uf: UnionFind<String> = UnionFind::new();
        uf.add("known".to_string());
        let err = uf.find(&"ghost".to_string()).unwrap_err();
        assert_eq!(err, DetectError::ElementNotFound("ghost".into()));
    }

    #[test]
    fn union_inserts_missing_elements() {
        let mut uf = UnionFind::new();
        uf.union("a", "b");
        assert!(uf.connected(&"a", &"b").unwrap());
    }
}
