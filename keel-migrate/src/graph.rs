//! Revision graph: a DAG of revisions with branch and merge support.
//!
//! Revisions live in an arena; parent and child links are index lists. A
//! deterministic topological order is computed once at construction (ties
//! broken by insertion order) and every traversal is read off that order, so
//! the graph is never mutated after it is built.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use tracing::debug;

use crate::error::{MigrateResult, MigrationError};
use crate::revision::Revision;

/// Symbolic spec for "no revision".
pub const BASE: &str = "base";

/// Symbolic spec for the latest revision(s).
pub const HEAD: &str = "head";

/// Plural form of [`HEAD`].
pub const HEADS: &str = "heads";

/// A set of revision identifiers.
pub type RevisionSet = BTreeSet<String>;

/// Split a `start:end` range spec. Either side may be empty.
pub fn parse_range(spec: &str) -> Option<(&str, &str)> {
    spec.split_once(':')
}

/// The DAG of migration revisions.
#[derive(Debug, Clone, Default)]
pub struct RevisionGraph {
    revisions: Vec<Revision>,
    index: HashMap<String, usize>,
    parents: Vec<Vec<usize>>,
    children: Vec<Vec<usize>>,
    topo: Vec<usize>,
}

impl RevisionGraph {
    /// Build a graph, validating parent links and rejecting cycles.
    pub fn new(revisions: impl IntoIterator<Item = Revision>) -> MigrateResult<Self> {
        let revisions: Vec<Revision> = revisions.into_iter().collect();

        let mut index = HashMap::with_capacity(revisions.len());
        for (i, rev) in revisions.iter().enumerate() {
            if index.insert(rev.id.clone(), i).is_some() {
                return Err(MigrationError::DuplicateRevision(rev.id.clone()));
            }
        }

        let mut parents = vec![Vec::new(); revisions.len()];
        let mut children = vec![Vec::new(); revisions.len()];
        for (i, rev) in revisions.iter().enumerate() {
            for parent in rev.parents.iter().filter(|p| p.as_str() != BASE) {
                let &p = index
                    .get(parent)
                    .ok_or_else(|| MigrationError::unknown_parent(parent, &rev.id))?;
                if !parents[i].contains(&p) {
                    parents[i].push(p);
                    children[p].push(i);
                }
            }
        }

        let topo = topological_order(&parents, &children).map_err(|stuck| {
            MigrationError::CycleDetected {
                revisions: stuck.iter().map(|&i| revisions[i].id.clone()).collect(),
            }
        })?;

        debug!(count = revisions.len(), "loaded revision graph");

        Ok(Self {
            revisions,
            index,
            parents,
            children,
            topo,
        })
    }

    /// Number of revisions.
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    /// Check if the graph has no revisions.
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Get a revision by exact identifier.
    pub fn get(&self, id: &str) -> Option<&Revision> {
        self.index.get(id).map(|&i| &self.revisions[i])
    }

    /// Iterate revisions in topological order, parents first.
    pub fn iter(&self) -> impl Iterator<Item = &Revision> {
        self.topo.iter().map(|&i| &self.revisions[i])
    }

    /// Revisions with no children.
    pub fn heads(&self) -> RevisionSet {
        self.ids_where(|i| self.children[i].is_empty())
    }

    /// Revisions with no parents.
    pub fn bases(&self) -> RevisionSet {
        self.ids_where(|i| self.parents[i].is_empty())
    }

    /// Revisions with more than one child.
    pub fn branch_points(&self) -> RevisionSet {
        self.ids_where(|i| self.children[i].len() > 1)
    }

    /// Child identifiers of a revision.
    pub fn children_of(&self, id: &str) -> MigrateResult<Vec<&str>> {
        let i = self.lookup(id)?;
        Ok(self.children[i]
            .iter()
            .map(|&c| self.revisions[c].id.as_str())
            .collect())
    }

    /// Resolve a revision spec into a set of identifiers.
    ///
    /// Accepts an identifier or unambiguous prefix, `head`/`heads`, `base`,
    /// or a `start:end` range (both ends inclusive, empty ends meaning
    /// `base` and `heads`).
    pub fn resolve(&self, spec: &str) -> MigrateResult<RevisionSet> {
        let spec = spec.trim();
        if let Some((start, end)) = parse_range(spec) {
            let start = if start.is_empty() { BASE } else { start };
            let end = if end.is_empty() { HEADS } else { end };
            let lower = self.resolve_indices(start)?;
            let upper = self.resolve_indices(end)?;
            let below = self.ancestor_mask(&upper);
            let above = self.descendant_mask(&lower);
            let from_base = lower.is_empty();
            return Ok(self.ids_where(|i| below[i] && (from_base || above[i])));
        }
        let indices = self.resolve_indices(spec)?;
        Ok(indices
            .into_iter()
            .map(|i| self.revisions[i].id.clone())
            .collect())
    }

    /// All ancestors of the given revisions, the revisions themselves included.
    pub fn ancestors(&self, ids: &RevisionSet) -> MigrateResult<RevisionSet> {
        let start = self.lookup_all(ids)?;
        let mask = self.ancestor_mask(&start);
        Ok(self.ids_where(|i| mask[i]))
    }

    /// All descendants of the given revisions, the revisions themselves included.
    pub fn descendants(&self, ids: &RevisionSet) -> MigrateResult<RevisionSet> {
        let start = self.lookup_all(ids)?;
        let mask = self.descendant_mask(&start);
        Ok(self.ids_where(|i| mask[i]))
    }

    /// Members of an applied set that have no applied children.
    ///
    /// This is the marker to persist for that set: one id per unmerged head.
    pub fn heads_of(&self, applied: &RevisionSet) -> MigrateResult<RevisionSet> {
        let members = self.lookup_all(applied)?;
        let mut mask = vec![false; self.len()];
        for &i in &members {
            mask[i] = true;
        }
        Ok(members
            .into_iter()
            .filter(|&i| !self.children[i].iter().any(|&c| mask[c]))
            .map(|i| self.revisions[i].id.clone())
            .collect())
    }

    /// Revisions to apply, parents first, to move from `current` to `target`.
    ///
    /// Every ancestor of the target that is not already applied is included
    /// exactly once. A merge revision appears only after all of its parents.
    pub fn iterate_upgrade(
        &self,
        current: &RevisionSet,
        target: &RevisionSet,
    ) -> MigrateResult<Vec<&Revision>> {
        let applied = self.ancestor_mask(&self.lookup_all(current)?);
        let wanted = self.ancestor_mask(&self.lookup_all(target)?);
        Ok(self
            .topo
            .iter()
            .filter(|&&i| wanted[i] && !applied[i])
            .map(|&i| &self.revisions[i])
            .collect())
    }

    /// Revisions to undo, children first, to move from `current` to `target`.
    ///
    /// Fails with [`MigrationError::InvalidTarget`] if the target is not
    /// part of the applied history.
    pub fn iterate_downgrade(
        &self,
        current: &RevisionSet,
        target: &RevisionSet,
    ) -> MigrateResult<Vec<&Revision>> {
        let applied = self.ancestor_mask(&self.lookup_all(current)?);
        let target_idx = self.lookup_all(target)?;
        if let Some(&missing) = target_idx.iter().find(|&&i| !applied[i]) {
            return Err(MigrationError::invalid_target(format!(
                "revision '{}' is not applied; cannot downgrade to it",
                self.revisions[missing].id
            )));
        }
        let keep = self.ancestor_mask(&target_idx);
        Ok(self
            .topo
            .iter()
            .rev()
            .filter(|&&i| applied[i] && !keep[i])
            .map(|&i| &self.revisions[i])
            .collect())
    }

    /// Revisions in a range, newest first. `None` lists the whole graph.
    pub fn history(&self, range: Option<&str>) -> MigrateResult<Vec<&Revision>> {
        let selected = match range {
            Some(spec) => self.resolve(spec)?,
            None => self.ids_where(|_| true),
        };
        Ok(self
            .topo
            .iter()
            .rev()
            .map(|&i| &self.revisions[i])
            .filter(|r| selected.contains(&r.id))
            .collect())
    }

    fn resolve_indices(&self, spec: &str) -> MigrateResult<Vec<usize>> {
        match spec {
            BASE => Ok(Vec::new()),
            HEAD | HEADS => Ok(self
                .topo
                .iter()
                .copied()
                .filter(|&i| self.children[i].is_empty())
                .collect()),
            _ => self.lookup(spec).map(|i| vec![i]),
        }
    }

    /// Exact match first, then unique prefix.
    fn lookup(&self, id: &str) -> MigrateResult<usize> {
        if let Some(&i) = self.index.get(id) {
            return Ok(i);
        }
        if id.is_empty() {
            return Err(MigrationError::unknown_revision(id));
        }
        let mut matches: Vec<usize> = (0..self.revisions.len())
            .filter(|&i| self.revisions[i].id.starts_with(id))
            .collect();
        match matches.len() {
            0 => Err(MigrationError::unknown_revision(id)),
            1 => Ok(matches[0]),
            _ => {
                matches.sort_by(|a, b| self.revisions[*a].id.cmp(&self.revisions[*b].id));
                Err(MigrationError::ambiguous(
                    id,
                    matches
                        .into_iter()
                        .map(|i| self.revisions[i].id.clone())
                        .collect(),
                ))
            }
        }
    }

    fn lookup_all(&self, ids: &RevisionSet) -> MigrateResult<Vec<usize>> {
        ids.iter()
            .filter(|id| id.as_str() != BASE)
            .map(|id| self.lookup(id))
            .collect()
    }

    fn ancestor_mask(&self, start: &[usize]) -> Vec<bool> {
        self.reach(start, &self.parents)
    }

    fn descendant_mask(&self, start: &[usize]) -> Vec<bool> {
        self.reach(start, &self.children)
    }

    fn reach(&self, start: &[usize], edges: &[Vec<usize>]) -> Vec<bool> {
        let mut seen = vec![false; self.revisions.len()];
        let mut stack: Vec<usize> = start.to_vec();
        while let Some(i) = stack.pop() {
            if seen[i] {
                continue;
            }
            seen[i] = true;
            stack.extend(edges[i].iter().copied().filter(|&n| !seen[n]));
        }
        seen
    }

    fn ids_where(&self, pred: impl Fn(usize) -> bool) -> RevisionSet {
        (0..self.revisions.len())
            .filter(|&i| pred(i))
            .map(|i| self.revisions[i].id.clone())
            .collect()
    }
}

/// Kahn's algorithm with a min-heap on arena index for deterministic ties.
/// On a cycle, returns the indices that could not be placed.
fn topological_order(parents: &[Vec<usize>], children: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let mut in_degree: Vec<usize> = parents.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(parents.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &c in &children[i] {
            in_degree[c] -= 1;
            if in_degree[c] == 0 {
                ready.push(Reverse(c));
            }
        }
    }

    if order.len() == parents.len() {
        Ok(order)
    } else {
        Err((0..parents.len()).filter(|&i| in_degree[i] > 0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn set(ids: &[&str]) -> RevisionSet {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn ids(revs: &[&Revision]) -> Vec<String> {
        revs.iter().map(|r| r.id.clone()).collect()
    }

    /// r1 <- r2 <- {r3a, r3b} <- r4
    fn diamond() -> RevisionGraph {
        RevisionGraph::new([
            Revision::new("r1", Vec::<String>::new()),
            Revision::new("r2", ["r1"]),
            Revision::new("r3a", ["r2"]),
            Revision::new("r3b", ["r2"]),
            Revision::new("r4", ["r3a", "r3b"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_upgrade_full_path() {
        let graph = diamond();
        let path = graph.iterate_upgrade(&set(&[]), &set(&["r4"])).unwrap();
        assert_eq!(ids(&path), vec!["r1", "r2", "r3a", "r3b", "r4"]);
    }

    #[test]
    fn test_downgrade_is_exact_reverse() {
        let graph = diamond();
        let up = ids(&graph.iterate_upgrade(&set(&[]), &set(&["r4"])).unwrap());
        let mut down = ids(&graph.iterate_downgrade(&set(&["r4"]), &set(&[])).unwrap());
        down.reverse();
        assert_eq!(down, up);
    }

    #[test]
    fn test_upgrade_from_branch() {
        let graph = diamond();
        let heads = graph.resolve("heads").unwrap();
        let path = graph.iterate_upgrade(&set(&["r3a"]), &heads).unwrap();
        assert_eq!(ids(&path), vec!["r3b", "r4"]);
    }

    #[test]
    fn test_partial_downgrade() {
        let graph = diamond();
        let path = graph.iterate_downgrade(&set(&["r4"]), &set(&["r3a"])).unwrap();
        assert_eq!(ids(&path), vec!["r4", "r3b"]);
    }

    #[test]
    fn test_downgrade_to_unapplied_target() {
        let graph = diamond();
        let err = graph.iterate_downgrade(&set(&["r3a"]), &set(&["r3b"])).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidTarget(_)));
    }

    #[test]
    fn test_upgrade_to_current_is_empty() {
        let graph = diamond();
        assert!(graph.iterate_upgrade(&set(&["r4"]), &set(&["r2"])).unwrap().is_empty());
    }

    #[test]
    fn test_heads_bases_branch_points() {
        let graph = diamond();
        assert_eq!(graph.heads(), set(&["r4"]));
        assert_eq!(graph.bases(), set(&["r1"]));
        assert_eq!(graph.branch_points(), set(&["r2"]));
        assert_eq!(graph.children_of("r2").unwrap(), vec!["r3a", "r3b"]);
    }

    #[test]
    fn test_multiple_heads() {
        let graph = RevisionGraph::new([
            Revision::new("a1", Vec::<String>::new()),
            Revision::new("b1", ["a1"]),
            Revision::new("c1", ["a1"]),
        ])
        .unwrap();
        assert_eq!(graph.resolve("head").unwrap(), set(&["b1", "c1"]));
        assert_eq!(graph.resolve("heads").unwrap(), set(&["b1", "c1"]));
    }

    #[test]
    fn test_resolve_prefix() {
        let graph = RevisionGraph::new([
            Revision::new("ae1027a6acf", Vec::<String>::new()),
            Revision::new("ae1f8e3b11c", ["ae1027a6acf"]),
            Revision::new("27c6a30d7c24", ["ae1f8e3b11c"]),
        ])
        .unwrap();

        assert_eq!(graph.resolve("27c").unwrap(), set(&["27c6a30d7c24"]));
        assert_eq!(graph.resolve("ae10").unwrap(), set(&["ae1027a6acf"]));
        assert_eq!(graph.resolve("base").unwrap(), set(&[]));

        match graph.resolve("ae1").unwrap_err() {
            MigrationError::AmbiguousRevision { spec, candidates } => {
                assert_eq!(spec, "ae1");
                assert_eq!(candidates, vec!["ae1027a6acf", "ae1f8e3b11c"]);
            }
            other => panic!("Expected AmbiguousRevision, got {other:?}"),
        }

        assert!(matches!(
            graph.resolve("zz").unwrap_err(),
            MigrationError::UnknownRevision { .. }
        ));
    }

    #[test]
    fn test_resolve_range() {
        let graph = diamond();
        assert_eq!(graph.resolve("r2:r3a").unwrap(), set(&["r2", "r3a"]));
        assert_eq!(
            graph.resolve("r3b:").unwrap(),
            set(&["r3b", "r4"])
        );
        assert_eq!(graph.resolve(":r2").unwrap(), set(&["r1", "r2"]));
        assert_eq!(graph.resolve("base:heads").unwrap().len(), 5);
    }

    #[test]
    fn test_history_newest_first() {
        let graph = diamond();
        let all = graph.history(None).unwrap();
        assert_eq!(ids(&all), vec!["r4", "r3b", "r3a", "r2", "r1"]);

        let some = graph.history(Some("r2:r3a")).unwrap();
        assert_eq!(ids(&some), vec!["r3a", "r2"]);
    }

    #[test]
    fn test_heads_of_applied_set() {
        let graph = diamond();
        assert_eq!(
            graph.heads_of(&set(&["r1", "r2", "r3a", "r3b"])).unwrap(),
            set(&["r3a", "r3b"])
        );
        assert_eq!(graph.heads_of(&set(&["r1", "r2"])).unwrap(), set(&["r2"]));
        assert_eq!(graph.heads_of(&set(&[])).unwrap(), set(&[]));
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let graph = diamond();
        assert_eq!(
            graph.ancestors(&set(&["r3b"])).unwrap(),
            set(&["r1", "r2", "r3b"])
        );
        assert_eq!(
            graph.descendants(&set(&["r3a"])).unwrap(),
            set(&["r3a", "r4"])
        );
    }

    #[test]
    fn test_cycle_detected() {
        let err = RevisionGraph::new([
            Revision::new("r1", Vec::<String>::new()),
            Revision::new("r2", ["r1", "r3"]),
            Revision::new("r3", ["r2"]),
        ])
        .unwrap_err();
        match err {
            MigrationError::CycleDetected { revisions } => {
                assert_eq!(revisions, vec!["r2", "r3"]);
            }
            other => panic!("Expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_self_cycle_detected() {
        let err = RevisionGraph::new([Revision::new("r1", ["r1"])]).unwrap_err();
        assert!(matches!(err, MigrationError::CycleDetected { .. }));
    }

    #[test]
    fn test_unknown_parent() {
        let err = RevisionGraph::new([Revision::new("r2", ["r1"])]).unwrap_err();
        match err {
            MigrationError::UnknownRevision { id, referenced_by } => {
                assert_eq!(id, "r1");
                assert_eq!(referenced_by.as_deref(), Some("r2"));
            }
            other => panic!("Expected UnknownRevision, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_revision() {
        let err = RevisionGraph::new([
            Revision::new("r1", Vec::<String>::new()),
            Revision::new("r1", Vec::<String>::new()),
        ])
        .unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateRevision(_)));
    }

    #[test]
    fn test_empty_graph() {
        let graph = RevisionGraph::new(Vec::new()).unwrap();
        assert!(graph.is_empty());
        assert_eq!(graph.resolve("heads").unwrap(), set(&[]));
        assert!(graph.iterate_upgrade(&set(&[]), &set(&[])).unwrap().is_empty());
    }
}
