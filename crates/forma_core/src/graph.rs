//! Dependency graph and deterministic topological ordering.
//!
//! Kahn's algorithm with a min-heap keyed on insertion order: when several
//! nodes are ready, the one added first goes first. Unchanged input always
//! yields the same order.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::hash::Hash;

/// A dependency cycle, as an ordered list of nodes: each depends on the next,
/// and the last depends on the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle<K>(pub Vec<K>);

/// Directed graph where an edge `a -> b` means "a depends on b".
#[derive(Debug, Clone)]
pub struct DependencyGraph<K> {
    keys: Vec<K>,
    index: HashMap<K, usize>,
    dependencies: Vec<BTreeSet<usize>>,
    dependents: Vec<BTreeSet<usize>>,
}

impl<K> Default for DependencyGraph<K> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            index: HashMap::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }
}

impl<K: Clone + Eq + Hash> DependencyGraph<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; adding an existing node keeps its original position.
    pub fn add_node(&mut self, key: K) -> usize {
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.keys.len();
        self.keys.push(key.clone());
        self.index.insert(key, idx);
        self.dependencies.push(BTreeSet::new());
        self.dependents.push(BTreeSet::new());
        idx
    }

    /// Record that `from` depends on `on`, adding either node if missing.
    ///
    /// Self-edges are ignored.
    pub fn add_dependency(&mut self, from: K, on: K) {
        let from = self.add_node(from);
        let on = self.add_node(on);
        if from == on {
            return;
        }
        self.dependencies[from].insert(on);
        self.dependents[on].insert(from);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Direct dependencies of `key`, in insertion order of the targets.
    pub fn dependencies_of(&self, key: &K) -> Vec<K> {
        self.index
            .get(key)
            .map(|&idx| {
                self.dependencies[idx]
                    .iter()
                    .map(|&d| self.keys[d].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Nodes ordered so that every node comes after everything it depends on.
    pub fn topological_order(&self) -> Result<Vec<K>, Cycle<K>> {
        let n = self.keys.len();
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(BTreeSet::len).collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(idx, _)| Reverse(idx))
            .collect();

        let mut order = Vec::with_capacity(n);
        let mut emitted = vec![false; n];
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            emitted[idx] = true;
            for &dependent in &self.dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() == n {
            return Ok(order.into_iter().map(|i| self.keys[i].clone()).collect());
        }

        Err(Cycle(
            self.find_cycle(&emitted)
                .into_iter()
                .map(|i| self.keys[i].clone())
                .collect(),
        ))
    }

    /// Walk unemitted nodes along their first unemitted dependency until a
    /// node repeats. Every unemitted node has at least one unemitted
    /// dependency, so the walk always closes a loop.
    fn find_cycle(&self, emitted: &[bool]) -> Vec<usize> {
        let Some(start) = emitted.iter().position(|done| !done) else {
            return Vec::new();
        };

        let mut path: Vec<usize> = Vec::new();
        let mut position: HashMap<usize, usize> = HashMap::new();
        let mut current = start;
        loop {
            if let Some(&at) = position.get(&current) {
                return path.split_off(at);
            }
            position.insert(current, path.len());
            path.push(current);
            match self.dependencies[current].iter().find(|&&d| !emitted[d]) {
                Some(&next) => current = next,
                None => return path,
            }
        }
    }
}
