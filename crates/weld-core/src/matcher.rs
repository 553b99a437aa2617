//! Greedy role-walk matching.
//!
//! Both matchers share one primitive: bind the primary root to a seed node,
//! then follow the pattern's precomputed walk, binding each role to the first
//! admissible node that sits on a real graph edge in the declared position.
//! A failed seed is abandoned; there is no backtracking across alternatives.

use crate::pattern::WalkStep;
use crate::{Graph, HashSet, InAnchor, Mapping, Node, NodeId, OutAnchor, Pattern, RoleId};
use std::collections::BTreeMap;

/// Candidate nodes per op type, as produced by [`Graph::partition_by_op_type`].
pub type Candidates = BTreeMap<String, Vec<NodeId>>;

struct RoleWalk<'a, F> {
    pattern: &'a Pattern,
    graph: &'a Graph,
    filter: F,
}

impl<'a, F> RoleWalk<'a, F>
where
    F: Fn(NodeId, &Node) -> bool,
{
    fn admits(&self, id: NodeId, role: RoleId, used: &HashSet<NodeId>) -> bool {
        if used.contains(&id) {
            return false;
        }
        match self.graph.node(id) {
            Some(node) => self.pattern.role(role).accepts(node.op_type()) && (self.filter)(id, node),
            None => false,
        }
    }

    /// Extend a chain downstream through nodes with exactly one consumer.
    fn chain_down(&self, role: RoleId, start: NodeId, used: &HashSet<NodeId>) -> Vec<NodeId> {
        let max = self.pattern.role(role).max_repeat;
        let mut chain = vec![start];
        while chain.len() < max {
            let last = chain[chain.len() - 1];
            match self.graph.out_nodes(last).as_slice() {
                [next] if !chain.contains(next) && self.admits(*next, role, used) => {
                    chain.push(*next)
                }
                _ => break,
            }
        }
        chain
    }

    /// Extend a chain upstream through producers whose only consumer is the chain head.
    fn chain_up(&self, role: RoleId, start: NodeId, used: &HashSet<NodeId>) -> Vec<NodeId> {
        let max = self.pattern.role(role).max_repeat;
        let mut chain = vec![start];
        while chain.len() < max {
            let head = chain[0];
            let prev = self.graph.in_nodes(head).into_iter().find(|p| {
                !chain.contains(p)
                    && self.admits(*p, role, used)
                    && self.graph.out_nodes(*p) == [head]
            });
            match prev {
                Some(p) => chain.insert(0, p),
                None => break,
            }
        }
        chain
    }

    fn first_free(&self, role: RoleId, used: &HashSet<NodeId>) -> Option<NodeId> {
        self.graph
            .nodes()
            .map(|(id, _)| id)
            .find(|id| self.admits(*id, role, used))
    }

    fn commit(
        &self,
        role: RoleId,
        chain: Option<Vec<NodeId>>,
        bound: &mut [Vec<NodeId>],
        used: &mut HashSet<NodeId>,
    ) -> bool {
        let r = self.pattern.role(role);
        match chain {
            Some(chain) if chain.len() >= r.min_repeat => {
                used.extend(chain.iter().copied());
                bound[role.0] = chain;
                true
            }
            _ => r.min_count() == 0,
        }
    }

    fn bind(&self, seed: NodeId) -> Option<Vec<Vec<NodeId>>> {
        let pattern = self.pattern;
        let mut bound: Vec<Vec<NodeId>> = vec![Vec::new(); pattern.roles().len()];
        let mut used = HashSet::default();

        for step in pattern.walk() {
            let (role, chain) = match *step {
                WalkStep::Seed(role) => {
                    let start = if role == pattern.seed_role() {
                        Some(seed).filter(|s| self.admits(*s, role, &used))
                    } else {
                        self.first_free(role, &used)
                    };
                    (role, start.map(|s| self.chain_down(role, s, &used)))
                }
                WalkStep::Follow { edge, forward } => {
                    let e = pattern.edges()[edge];
                    if forward {
                        let chain = bound[e.src.0].last().and_then(|&from| {
                            self.graph
                                .consumers(OutAnchor::new(from, e.src_output))
                                .iter()
                                .filter(|a| e.dst_input.map_or(true, |i| i == a.index))
                                .map(|a| a.node)
                                .find(|n| self.admits(*n, e.dst, &used))
                                .map(|n| self.chain_down(e.dst, n, &used))
                        });
                        (e.dst, chain)
                    } else {
                        let chain = bound[e.dst.0].first().and_then(|&to| {
                            self.producers_into(to, e.src_output, e.dst_input)
                                .into_iter()
                                .find(|n| self.admits(*n, e.src, &used))
                                .map(|n| self.chain_up(e.src, n, &used))
                        });
                        (e.src, chain)
                    }
                }
            };
            if !self.commit(role, chain, &mut bound, &mut used) {
                log::trace!(
                    "pattern '{}': role '{}' unbound",
                    pattern.name(),
                    pattern.role(role).name
                );
                return None;
            }
        }

        if self.edges_line_up(&bound) {
            Some(bound)
        } else {
            None
        }
    }

    fn producers_into(&self, to: NodeId, src_output: usize, dst_input: Option<usize>) -> Vec<NodeId> {
        let num_inputs = self.graph.node(to).map_or(0, |n| n.num_inputs());
        let slots: Vec<usize> = match dst_input {
            Some(i) => vec![i],
            None => (0..num_inputs).collect(),
        };
        slots
            .into_iter()
            .filter_map(|i| self.graph.producer(InAnchor::new(to, i)))
            .filter(|src| src.index == src_output)
            .map(|src| src.node)
            .collect()
    }

    /// Every pattern edge between bound roles must exist in the graph.
    fn edges_line_up(&self, bound: &[Vec<NodeId>]) -> bool {
        self.pattern.edges().iter().all(|e| {
            let (Some(&src), Some(&dst)) = (bound[e.src.0].last(), bound[e.dst.0].first()) else {
                return true;
            };
            self.graph
                .consumers(OutAnchor::new(src, e.src_output))
                .iter()
                .any(|a| a.node == dst && e.dst_input.map_or(true, |i| i == a.index))
        })
    }
}

/// Whether a node of the match feeds a consumer outside it, other than through
/// the last node of an output role.
fn escapes(pattern: &Pattern, graph: &Graph, bound: &[Vec<NodeId>]) -> Option<NodeId> {
    let sinks: Vec<RoleId> = match pattern.output() {
        Some(out) => vec![out],
        None => (0..pattern.roles().len())
            .map(RoleId)
            .filter(|r| !pattern.edges().iter().any(|e| e.src == *r))
            .collect(),
    };
    let exits: HashSet<NodeId> = sinks
        .iter()
        .filter_map(|r| bound[r.0].last().copied())
        .collect();
    let matched: HashSet<NodeId> = bound.iter().flatten().copied().collect();

    matched
        .iter()
        .copied()
        .filter(|n| !exits.contains(n))
        .find(|n| {
            graph
                .output_consumers(*n)
                .iter()
                .any(|a| !matched.contains(&a.node))
        })
}

/// Graph-fusion matching: candidates are discovered by scanning the graph.
pub struct GraphMatcher<'a> {
    pattern: &'a Pattern,
}

impl<'a> GraphMatcher<'a> {
    pub fn new(pattern: &'a Pattern) -> Self {
        Self { pattern }
    }

    /// Whether any live node could seed this pattern.
    pub fn has_root_candidate(&self, graph: &Graph) -> bool {
        let root = self.pattern.role(self.pattern.seed_role());
        graph.nodes().any(|(_, n)| root.accepts(n.op_type()))
    }

    /// The first match, in insertion order of its root, that avoids `consumed`.
    pub fn next_match(&self, graph: &Graph, consumed: &HashSet<NodeId>) -> Option<Mapping> {
        let root = self.pattern.role(self.pattern.seed_role());
        let walk = RoleWalk {
            pattern: self.pattern,
            graph,
            filter: |id: NodeId, _: &Node| !consumed.contains(&id),
        };

        for (id, node) in graph.nodes() {
            if consumed.contains(&id) || !root.accepts(node.op_type()) {
                continue;
            }
            let Some(bound) = walk.bind(id) else {
                continue;
            };
            if let Some(leak) = escapes(self.pattern, graph, &bound) {
                log::debug!(
                    "pattern '{}' at '{}': '{}' has consumers outside the match",
                    self.pattern.name(),
                    node.name(),
                    graph.node(leak).map_or("?", |n| n.name())
                );
                continue;
            }
            let mapping = Mapping::new(self.pattern, graph.generation(), bound);
            log::debug!("matched {}", mapping.describe(graph));
            return Some(mapping);
        }
        None
    }

    /// All non-overlapping matches against the current graph.
    pub fn find_matches(&self, graph: &Graph) -> Vec<Mapping> {
        let mut consumed = HashSet::default();
        let mut matches = Vec::new();
        while let Some(mapping) = self.next_match(graph, &consumed) {
            consumed.extend(mapping.all_nodes());
            matches.push(mapping);
        }
        matches
    }
}

/// Buffer-fusion matching over caller-supplied candidates.
///
/// Optional roles may come back empty. Interior outputs may escape the match,
/// since nothing is collapsed.
pub struct BufferMatcher<'a> {
    pattern: &'a Pattern,
}

impl<'a> BufferMatcher<'a> {
    pub fn new(pattern: &'a Pattern) -> Self {
        Self { pattern }
    }

    pub fn find_matches(&self, graph: &Graph, candidates: &Candidates) -> Vec<Mapping> {
        let allowed: HashSet<NodeId> = candidates.values().flatten().copied().collect();
        let root = self.pattern.role(self.pattern.seed_role());
        let mut consumed: HashSet<NodeId> = HashSet::default();
        let mut matches = Vec::new();

        for id in graph.node_ids() {
            let Some(node) = graph.node(id) else { continue };
            if !allowed.contains(&id) || consumed.contains(&id) || !root.accepts(node.op_type()) {
                continue;
            }
            let walk = RoleWalk {
                pattern: self.pattern,
                graph,
                filter: |n: NodeId, _: &Node| allowed.contains(&n) && !consumed.contains(&n),
            };
            if let Some(bound) = walk.bind(id) {
                let mapping = Mapping::new(self.pattern, graph.generation(), bound);
                log::debug!("buffer match {}", mapping.describe(graph));
                consumed.extend(mapping.all_nodes());
                matches.push(mapping);
            }
        }
        matches
    }
}
