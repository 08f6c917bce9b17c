use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Members share an identical normalized image reference.
    ExactUrl,
    /// Members' images have identical content digests.
    ExactHash,
    /// Members' images were judged visually similar by pixel difference.
    Perceptual,
}

/// A maximal set of records judged to represent the same underlying item.
/// Always has at least two members; singletons are never emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Derived identifier, not stable across runs.
    pub id: String,
    pub kind: GroupKind,
    /// Human-readable description of why the members were grouped.
    pub match_basis: String,
    /// Representative score: 1.0 for exact groups, the minimum matched
    /// pairwise similarity for perceptual groups.
    pub similarity: f64,
    pub members: Vec<Record>,
}

impl DuplicateGroup {
    pub fn new(
        kind: GroupKind,
        match_basis: String,
        similarity: f64,
        members: Vec<Record>,
    ) -> Self {
        Self {
            id: format!("grp_{}", Uuid::new_v4().simple()),
            kind,
            match_basis,
            similarity,
            members,
        }
    }

    pub fn member_ids(&self) -> Vec<&str> {
        self.members.iter().map(|r| r.id.as_str()).collect()
    }
}

/// Disjoint-set over indices `0..len`, used to merge pairwise matches into
/// connected components. Guarantees full transitive closure: if A~B and
/// B~C, all three land in one component even when A and C were never
/// compared directly.
#[derive(Debug)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl DisjointSet {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    /// Find with path compression.
    pub fn find(&mut self, index: usize) -> usize {
        let mut root = index;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = index;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Union by rank.
    pub fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Less => self.parent[root_a] = root_b,
            std::cmp::Ordering::Greater => self.parent[root_b] = root_a,
            std::cmp::Ordering::Equal => {
                self.parent[root_b] = root_a;
                self.rank[root_a] += 1;
            }
        }
    }

    /// Connected components, each sorted ascending, ordered by their
    /// smallest member so output is deterministic.
    pub fn components(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for index in 0..self.parent.len() {
            let root = self.find(index);
            by_root.entry(root).or_default().push(index);
        }

        let mut components: Vec<Vec<usize>> = by_root.into_values().collect();
        components.sort_by_key(|component| component[0]);
        components
    }
}
