//! Dependency graph over cell ids.
//!
//! Edges point from the cell that declares a name to every cell reading it.
//! The graph never sees cells themselves, only ids, positions and name sets.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use rustc_hash::{FxHashMap, FxHashSet};

use super::types::{CellId, CellNames};

#[derive(Debug, Clone)]
struct Node {
    position: usize,
    /// `None` for a cell whose text does not parse.
    names: Option<CellNames>,
}

/// Incrementally maintained dependency graph.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraphMap<CellId, ()>,
    nodes: FxHashMap<CellId, Node>,
    /// name -> cells declaring it
    providers: FxHashMap<String, Vec<CellId>>,
    /// name -> cells reading it
    readers: FxHashMap<String, FxHashSet<CellId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a cell.
    ///
    /// `names` is `None` for a syntax-error cell, which becomes an isolated
    /// node. Only edges touching this cell or the names it declared before
    /// or after the change are recomputed. Returns the other cells whose
    /// incoming edges were rewired.
    pub fn upsert(&mut self, id: CellId, position: usize, names: Option<&CellNames>) -> Vec<CellId> {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.position = position;
            if node.names.as_ref() == names {
                return Vec::new();
            }
        }

        let old = self.detach(id);
        let node = Node {
            position,
            names: names.cloned(),
        };
        self.graph.add_node(id);

        // names whose provider set changes; readers of the others keep their edges
        let mut touched: FxHashSet<String> = old
            .and_then(|n| n.names)
            .map(|n| n.declared.into_iter().collect())
            .unwrap_or_default();
        if let Some(names) = &node.names {
            for name in &names.declared {
                self.providers.entry(name.clone()).or_default().push(id);
                if !touched.remove(name) {
                    touched.insert(name.clone());
                }
            }
            for name in &names.free {
                self.readers.entry(name.clone()).or_default().insert(id);
            }
        }
        self.nodes.insert(id, node);

        self.rewire(id);
        self.rewire_readers(&touched, id)
    }

    /// Remove a cell; returns the cells whose incoming edges were rewired.
    pub fn remove(&mut self, id: CellId) -> Vec<CellId> {
        let Some(old) = self.detach(id) else {
            return Vec::new();
        };
        self.graph.remove_node(id);
        let touched: FxHashSet<String> = old
            .names
            .map(|n| n.declared.into_iter().collect())
            .unwrap_or_default();
        self.rewire_readers(&touched, id)
    }

    /// Update a cell's source position without touching edges.
    pub fn set_position(&mut self, id: CellId, position: usize) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.position = position;
        }
    }

    pub fn contains(&self, id: CellId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn position(&self, id: CellId) -> Option<usize> {
        self.nodes.get(&id).map(|n| n.position)
    }

    pub fn names(&self, id: CellId) -> Option<&CellNames> {
        self.nodes.get(&id).and_then(|n| n.names.as_ref())
    }

    /// All cell ids in source order.
    pub fn cell_ids(&self) -> Vec<CellId> {
        let mut ids: Vec<CellId> = self.nodes.keys().copied().collect();
        self.sort_by_position(&mut ids);
        ids
    }

    /// The cell supplying `name`, if exactly one live cell declares it.
    pub fn provider(&self, name: &str) -> Option<CellId> {
        match self.providers.get(name).map(Vec::as_slice) {
            Some([only]) => Some(*only),
            _ => None,
        }
    }

    /// Every cell declaring `name`, in source order.
    pub fn providers_of(&self, name: &str) -> Vec<CellId> {
        let mut ids = self.providers.get(name).cloned().unwrap_or_default();
        self.sort_by_position(&mut ids);
        ids
    }

    /// Names declared by more than one cell, with the declaring cells.
    pub fn conflicts(&self) -> Vec<(String, Vec<CellId>)> {
        let mut out: Vec<(String, Vec<CellId>)> = self
            .providers
            .iter()
            .filter(|(_, cells)| cells.len() > 1)
            .map(|(name, _)| (name.clone(), self.providers_of(name)))
            .collect();
        out.sort();
        out
    }

    /// Cells this cell reads from, in source order.
    pub fn edges_into(&self, id: CellId) -> Vec<CellId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Cells reading from this cell, in source order.
    pub fn edges_from(&self, id: CellId) -> Vec<CellId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Cells reading `name` from `provider`, in source order.
    ///
    /// Empty when `provider` is not the sole supplier of `name`.
    pub fn readers_of(&self, provider: CellId, name: &str) -> Vec<CellId> {
        if self.provider(name) != Some(provider) {
            return Vec::new();
        }
        let mut ids: Vec<CellId> = self
            .readers
            .get(name)
            .map(|r| r.iter().copied().collect())
            .unwrap_or_default();
        self.sort_by_position(&mut ids);
        ids
    }

    /// Strongly connected components forming cycles, each in source order.
    ///
    /// A cell reading a name it declares itself is a cycle of one.
    pub fn cycles(&self) -> Vec<Vec<CellId>> {
        let mut cycles: Vec<Vec<CellId>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| match scc.as_slice() {
                [only] => self.graph.contains_edge(*only, *only),
                _ => true,
            })
            .map(|mut scc| {
                self.sort_by_position(&mut scc);
                scc
            })
            .collect();
        cycles.sort_by_key(|scc| scc.first().and_then(|id| self.position(*id)));
        cycles
    }

    /// All cells taking part in a dependency cycle, in source order.
    pub fn detect_cycles(&self) -> Vec<CellId> {
        let mut ids: Vec<CellId> = self.cycles().into_iter().flatten().collect();
        self.sort_by_position(&mut ids);
        ids
    }

    /// The first cycle, in source order, that `id` depends on without
    /// being part of it.
    pub fn upstream_cycle(&self, id: CellId) -> Option<Vec<CellId>> {
        self.cycles()
            .into_iter()
            .find(|cycle| !cycle.contains(&id) && self.downstream(cycle).contains(&id))
    }

    /// Seeds plus every cell reachable from them.
    pub fn downstream(&self, seeds: &[CellId]) -> FxHashSet<CellId> {
        let mut seen: FxHashSet<CellId> = FxHashSet::default();
        let mut queue: VecDeque<CellId> = VecDeque::new();
        for &seed in seeds {
            if self.contains(seed) && seen.insert(seed) {
                queue.push_back(seed);
            }
        }
        while let Some(id) = queue.pop_front() {
            for next in self.graph.neighbors_directed(id, Direction::Outgoing) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Affected cells in execution order.
    ///
    /// Every cell reachable from `seeds` appears after all of its upstream
    /// cells within the affected set; unrelated cells keep source order.
    /// Cycle members and anything downstream of a cycle are left out.
    pub fn topo_order(&self, seeds: &[CellId]) -> Vec<CellId> {
        let affected = self.downstream(seeds);

        let mut indegree: FxHashMap<CellId, usize> = FxHashMap::default();
        for &id in &affected {
            let count = self
                .graph
                .neighbors_directed(id, Direction::Incoming)
                .filter(|up| affected.contains(up))
                .count();
            indegree.insert(id, count);
        }

        let mut ready: BinaryHeap<Reverse<(usize, CellId)>> = indegree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&id, _)| Reverse((self.position(id).unwrap_or(usize::MAX), id)))
            .collect();

        let mut order = Vec::with_capacity(affected.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            order.push(id);
            for next in self.graph.neighbors_directed(id, Direction::Outgoing) {
                if let Some(deg) = indegree.get_mut(&next) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(Reverse((self.position(next).unwrap_or(usize::MAX), next)));
                    }
                }
            }
        }
        order
    }

    fn neighbors(&self, id: CellId, direction: Direction) -> Vec<CellId> {
        if !self.graph.contains_node(id) {
            return Vec::new();
        }
        let mut ids: Vec<CellId> = self.graph.neighbors_directed(id, direction).collect();
        self.sort_by_position(&mut ids);
        ids
    }

    fn sort_by_position(&self, ids: &mut [CellId]) {
        ids.sort_by_key(|id| (self.position(*id).unwrap_or(usize::MAX), *id));
    }

    /// Drop a cell's name registrations and incoming edges.
    fn detach(&mut self, id: CellId) -> Option<Node> {
        let old = self.nodes.remove(&id)?;
        if let Some(names) = &old.names {
            for name in &names.declared {
                if let Some(cells) = self.providers.get_mut(name) {
                    cells.retain(|c| *c != id);
                    if cells.is_empty() {
                        self.providers.remove(name);
                    }
                }
            }
            for name in &names.free {
                if let Some(cells) = self.readers.get_mut(name) {
                    cells.remove(&id);
                    if cells.is_empty() {
                        self.readers.remove(name);
                    }
                }
            }
        }
        self.clear_incoming(id);
        Some(old)
    }

    fn clear_incoming(&mut self, id: CellId) {
        if !self.graph.contains_node(id) {
            return;
        }
        let upstream: Vec<CellId> = self
            .graph
            .neighbors_directed(id, Direction::Incoming)
            .collect();
        for up in upstream {
            self.graph.remove_edge(up, id);
        }
    }

    /// Recompute the incoming edges of one cell from its free names.
    fn rewire(&mut self, id: CellId) {
        self.clear_incoming(id);
        let free = match self.nodes.get(&id).and_then(|n| n.names.as_ref()) {
            Some(names) => names.free.clone(),
            None => return,
        };
        for name in &free {
            if let Some(provider) = self.provider(name) {
                self.graph.add_edge(provider, id, ());
            }
        }
    }

    fn rewire_readers(&mut self, names: &FxHashSet<String>, except: CellId) -> Vec<CellId> {
        let mut affected: FxHashSet<CellId> = FxHashSet::default();
        for name in names {
            if let Some(readers) = self.readers.get(name) {
                affected.extend(readers.iter().copied().filter(|r| *r != except));
            }
        }
        let mut affected: Vec<CellId> = affected.into_iter().collect();
        for &reader in &affected {
            self.rewire(reader);
        }
        self.sort_by_position(&mut affected);
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(declared: &[&str], free: &[&str]) -> CellNames {
        let mut free: Vec<String> = free.iter().map(|s| s.to_string()).collect();
        free.sort();
        CellNames {
            declared: declared.iter().map(|s| s.to_string()).collect(),
            free,
        }
    }

    fn id(n: usize) -> CellId {
        CellId::new(n)
    }

    #[test]
    fn test_edge_from_provider_to_reader() {
        let mut graph = DependencyGraph::new();
        graph.upsert(id(0), 0, Some(&names(&["a"], &[])));
        graph.upsert(id(1), 1, Some(&names(&[], &["a"])));

        assert_eq!(graph.edges_into(id(1)), vec![id(0)]);
        assert_eq!(graph.edges_from(id(0)), vec![id(1)]);
        assert_eq!(graph.provider("a"), Some(id(0)));
    }

    #[test]
    fn test_reader_before_provider() {
        let mut graph = DependencyGraph::new();
        graph.upsert(id(1), 1, Some(&names(&[], &["a"])));
        let rewired = graph.upsert(id(0), 0, Some(&names(&["a"], &[])));

        assert_eq!(rewired, vec![id(1)]);
        assert_eq!(graph.edges_into(id(1)), vec![id(0)]);
    }

    #[test]
    fn test_conflict_removes_edges() {
        let mut graph = DependencyGraph::new();
        graph.upsert(id(0), 0, Some(&names(&["a"], &[])));
        graph.upsert(id(1), 1, Some(&names(&[], &["a"])));
        graph.upsert(id(2), 2, Some(&names(&["a"], &[])));

        assert_eq!(graph.provider("a"), None);
        assert!(graph.edges_into(id(1)).is_empty());
        assert_eq!(graph.conflicts(), vec![("a".to_string(), vec![id(0), id(2)])]);

        let rewired = graph.remove(id(2));
        assert_eq!(rewired, vec![id(1)]);
        assert_eq!(graph.edges_into(id(1)), vec![id(0)]);
        assert!(graph.conflicts().is_empty());
    }

    #[test]
    fn test_unchanged_names_keep_edges() {
        let mut graph = DependencyGraph::new();
        graph.upsert(id(0), 0, Some(&names(&["a"], &[])));
        graph.upsert(id(1), 1, Some(&names(&[], &["a"])));
        let rewired = graph.upsert(id(0), 3, Some(&names(&["a"], &[])));

        assert!(rewired.is_empty());
        assert_eq!(graph.position(id(0)), Some(3));
        assert_eq!(graph.edges_from(id(0)), vec![id(1)]);
    }

    #[test]
    fn test_rename_moves_edge() {
        let mut graph = DependencyGraph::new();
        graph.upsert(id(0), 0, Some(&names(&["a"], &[])));
        graph.upsert(id(1), 1, Some(&names(&[], &["a"])));

        graph.upsert(id(0), 0, Some(&names(&["b"], &[])));
        assert!(graph.edges_into(id(1)).is_empty());

        graph.upsert(id(1), 1, Some(&names(&[], &["b"])));
        assert_eq!(graph.edges_into(id(1)), vec![id(0)]);
        assert!(graph.conflicts().is_empty());
    }

    #[test]
    fn test_syntax_error_is_isolated() {
        let mut graph = DependencyGraph::new();
        graph.upsert(id(0), 0, Some(&names(&["a"], &[])));
        graph.upsert(id(1), 1, Some(&names(&[], &["a"])));
        let rewired = graph.upsert(id(0), 0, None);

        assert_eq!(rewired, vec![id(1)]);
        assert!(graph.edges_from(id(0)).is_empty());
        assert!(graph.edges_into(id(0)).is_empty());
        assert!(graph.contains(id(0)));
    }

    #[test]
    fn test_detect_cycles() {
        let mut graph = DependencyGraph::new();
        graph.upsert(id(0), 0, Some(&names(&["a"], &["b"])));
        graph.upsert(id(1), 1, Some(&names(&["b"], &["a"])));
        graph.upsert(id(2), 2, Some(&names(&["c"], &["a"])));
        graph.upsert(id(3), 3, Some(&names(&["d"], &[])));

        assert_eq!(graph.detect_cycles(), vec![id(0), id(1)]);
        // cycle members and their downstream are not ordered
        assert_eq!(graph.topo_order(&[id(0), id(3)]), vec![id(3)]);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.upsert(id(0), 0, Some(&names(&["a"], &["a"])));
        graph.upsert(id(1), 1, Some(&names(&["b"], &["a"])));

        assert_eq!(graph.cycles(), vec![vec![id(0)]]);
        assert!(graph.topo_order(&[id(0), id(1)]).is_empty());
        assert_eq!(graph.upstream_cycle(id(1)), Some(vec![id(0)]));

        graph.upsert(id(0), 0, Some(&names(&["a"], &[])));
        assert!(graph.cycles().is_empty());
        assert_eq!(graph.upstream_cycle(id(1)), None);
    }

    #[test]
    fn test_upstream_cycle() {
        let mut graph = DependencyGraph::new();
        graph.upsert(id(0), 0, Some(&names(&["a"], &["b"])));
        graph.upsert(id(1), 1, Some(&names(&["b"], &["a"])));
        graph.upsert(id(2), 2, Some(&names(&["c"], &["a"])));
        graph.upsert(id(3), 3, Some(&names(&["d"], &["c"])));
        graph.upsert(id(4), 4, Some(&names(&["e"], &[])));

        assert_eq!(graph.upstream_cycle(id(2)), Some(vec![id(0), id(1)]));
        assert_eq!(graph.upstream_cycle(id(3)), Some(vec![id(0), id(1)]));
        assert_eq!(graph.upstream_cycle(id(0)), None);
        assert_eq!(graph.upstream_cycle(id(4)), None);
    }

    #[test]
    fn test_topo_order_respects_dependencies() {
        let mut graph = DependencyGraph::new();
        // the reader sits above its provider in source order
        graph.upsert(id(0), 0, Some(&names(&["total"], &["x", "y"])));
        graph.upsert(id(1), 1, Some(&names(&["x"], &[])));
        graph.upsert(id(2), 2, Some(&names(&["y"], &["x"])));
        graph.upsert(id(3), 3, Some(&names(&["z"], &[])));

        assert_eq!(
            graph.topo_order(&[id(0), id(1), id(2), id(3)]),
            vec![id(1), id(2), id(0), id(3)]
        );
        assert_eq!(graph.topo_order(&[id(2)]), vec![id(2), id(0)]);
    }

    #[test]
    fn test_topo_order_ties_by_position() {
        let mut graph = DependencyGraph::new();
        graph.upsert(id(5), 2, Some(&names(&["b"], &[])));
        graph.upsert(id(9), 0, Some(&names(&["a"], &[])));
        graph.upsert(id(1), 1, Some(&names(&["c"], &[])));

        assert_eq!(graph.topo_order(&[id(5), id(9), id(1)]), vec![id(9), id(1), id(5)]);
        assert_eq!(graph.cell_ids(), vec![id(9), id(1), id(5)]);
    }

    #[test]
    fn test_readers_of() {
        let mut graph = DependencyGraph::new();
        graph.upsert(id(0), 0, Some(&names(&["a", "b"], &[])));
        graph.upsert(id(1), 1, Some(&names(&[], &["a"])));
        graph.upsert(id(2), 2, Some(&names(&[], &["b"])));

        assert_eq!(graph.readers_of(id(0), "a"), vec![id(1)]);
        assert_eq!(graph.readers_of(id(0), "b"), vec![id(2)]);
        assert!(graph.readers_of(id(1), "a").is_empty());
    }
}
