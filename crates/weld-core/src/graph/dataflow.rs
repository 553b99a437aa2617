//! Dataflow graph representation.

use super::{GraphError, InAnchor, Node, NodeId, OutAnchor};
use crate::{HashMap, HashSet};
use slotmap::SlotMap;
use std::collections::BTreeMap;

/// A typed DAG of operator nodes.
///
/// Nodes live in a slot arena: removing one vacates its slot and invalidates
/// its [`NodeId`], so ids collected before a mutation can be checked with
/// [`Graph::contains`] instead of dangling. Iteration follows insertion order.
///
/// Data edges connect an output slot to an input slot and must stay acyclic.
/// Control edges only order execution and may close cycles.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    name: String,

    nodes: SlotMap<NodeId, Node>,

    /// Live node ids in insertion order.
    order: Vec<NodeId>,

    names: HashMap<String, NodeId>,

    /// Bumped by every mutation.
    generation: u64,
}

/// Structural fingerprint of a graph, for before/after comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSummary {
    /// `(name, op_type)` in insertion order.
    pub nodes: Vec<(String, String)>,
    /// `(src, src_output, dst, dst_input)`, sorted.
    pub data_edges: Vec<(String, usize, String, usize)>,
    /// `(src, dst)`, sorted.
    pub ctrl_edges: Vec<(String, String)>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mutation counter. Anything computed against an older generation is stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn bump(&mut self) {
        self.generation += 1;
    }

    /// Add a node. Any connectivity the node carried is discarded.
    pub fn add_node(&mut self, mut node: Node) -> Result<NodeId, GraphError> {
        if self.names.contains_key(node.name()) {
            return Err(GraphError::DuplicateName(node.name().to_string()));
        }
        node.reset_connectivity();
        let name = node.name().to_string();
        let id = self.nodes.insert(node);
        log::trace!("add node '{}' as {:?}", name, id);
        self.names.insert(name, id);
        self.order.push(id);
        self.bump();
        Ok(id)
    }

    /// Remove a node and return it detached.
    ///
    /// Fails while edges are attached unless `force` is set, in which case the
    /// attached edges are removed with it.
    pub fn remove_node(&mut self, id: NodeId, force: bool) -> Result<Node, GraphError> {
        let node = self.nodes.get(id).ok_or(GraphError::NodeNotFound(id))?;
        let edges = node.edge_count();
        if edges > 0 && !force {
            return Err(GraphError::NodeConnected {
                node: node.name().to_string(),
                edges,
            });
        }
        self.detach_node(id).ok_or(GraphError::NodeNotFound(id))
    }

    /// Unlink every edge touching `id`, then drop it from the arena.
    pub(crate) fn detach_node(&mut self, id: NodeId) -> Option<Node> {
        if !self.nodes.contains_key(id) {
            return None;
        }
        self.disconnect_all(id);
        let node = self.nodes.remove(id)?;
        self.names.remove(node.name());
        self.order.retain(|&n| n != id);
        self.bump();
        log::trace!("removed node '{}'", node.name());
        Some(node)
    }

    fn disconnect_all(&mut self, id: NodeId) {
        let (in_data, out_data, in_ctrl, out_ctrl) = {
            let node = &mut self.nodes[id];
            (
                std::mem::take(&mut node.in_data),
                std::mem::take(&mut node.out_data),
                std::mem::take(&mut node.in_ctrl),
                std::mem::take(&mut node.out_ctrl),
            )
        };

        for (index, src) in in_data.iter().enumerate() {
            let Some(src) = src else { continue };
            if let Some(consumers) = self
                .nodes
                .get_mut(src.node)
                .and_then(|p| p.out_data.get_mut(src.index))
            {
                consumers.retain(|a| *a != InAnchor::new(id, index));
            }
        }
        for dst in out_data.iter().flatten() {
            if let Some(slot) = self
                .nodes
                .get_mut(dst.node)
                .and_then(|c| c.in_data.get_mut(dst.index))
            {
                *slot = None;
            }
        }
        for src in in_ctrl {
            if let Some(p) = self.nodes.get_mut(src) {
                p.out_ctrl.retain(|n| *n != id);
            }
        }
        for dst in out_ctrl {
            if let Some(c) = self.nodes.get_mut(dst) {
                c.in_ctrl.retain(|n| *n != id);
            }
        }

        self.nodes[id].reset_connectivity();
    }

    fn anchor_label(&self, node: NodeId, index: usize) -> String {
        match self.nodes.get(node) {
            Some(n) => format!("{}:{}", n.name(), index),
            None => format!("{node:?}:{index}"),
        }
    }

    fn node_label(&self, node: NodeId) -> String {
        self.nodes
            .get(node)
            .map(|n| n.name().to_string())
            .unwrap_or_else(|| format!("{node:?}"))
    }

    fn check_output(&self, src: OutAnchor) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get(src.node)
            .ok_or(GraphError::NodeNotFound(src.node))?;
        if src.index >= node.out_data.len() {
            return Err(GraphError::OutputOutOfRange {
                node: node.name().to_string(),
                index: src.index,
                available: node.out_data.len(),
            });
        }
        Ok(())
    }

    fn check_input(&self, dst: InAnchor) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get(dst.node)
            .ok_or(GraphError::NodeNotFound(dst.node))?;
        if dst.index >= node.in_data.len() {
            return Err(GraphError::InputOutOfRange {
                node: node.name().to_string(),
                index: dst.index,
                available: node.in_data.len(),
            });
        }
        Ok(())
    }

    /// Connect output `src` to input `dst`.
    ///
    /// Outputs may fan out; each input takes exactly one producer.
    pub fn add_data_edge(&mut self, src: OutAnchor, dst: InAnchor) -> Result<(), GraphError> {
        self.check_output(src)?;
        self.check_input(dst)?;

        if let Some(existing) = self.nodes[dst.node].in_data[dst.index] {
            return Err(if existing == src {
                GraphError::DuplicateEdge {
                    src: self.anchor_label(src.node, src.index),
                    dst: self.anchor_label(dst.node, dst.index),
                }
            } else {
                GraphError::InputOccupied {
                    node: self.node_label(dst.node),
                    index: dst.index,
                    producer: self.anchor_label(existing.node, existing.index),
                }
            });
        }

        if src.node == dst.node || self.reaches(dst.node, src.node) {
            return Err(GraphError::DataCycle {
                src: self.anchor_label(src.node, src.index),
                dst: self.anchor_label(dst.node, dst.index),
            });
        }

        self.connect_unchecked(src, dst);
        Ok(())
    }

    /// Connect without validation. Callers guarantee the slot is free and no cycle forms.
    pub(crate) fn connect_unchecked(&mut self, src: OutAnchor, dst: InAnchor) {
        self.nodes[src.node].out_data[src.index].push(dst);
        self.nodes[dst.node].in_data[dst.index] = Some(src);
        self.bump();
        log::trace!(
            "connect {} -> {}",
            self.anchor_label(src.node, src.index),
            self.anchor_label(dst.node, dst.index)
        );
    }

    pub fn remove_data_edge(&mut self, src: OutAnchor, dst: InAnchor) -> Result<(), GraphError> {
        self.check_output(src)?;
        self.check_input(dst)?;
        if self.nodes[dst.node].in_data[dst.index] != Some(src) {
            return Err(GraphError::EdgeNotFound {
                src: self.anchor_label(src.node, src.index),
                dst: self.anchor_label(dst.node, dst.index),
            });
        }
        self.nodes[dst.node].in_data[dst.index] = None;
        self.nodes[src.node].out_data[src.index].retain(|a| *a != dst);
        self.bump();
        Ok(())
    }

    /// Add an ordering constraint. No cycle check; duplicates are ignored.
    pub fn add_ctrl_edge(&mut self, src: NodeId, dst: NodeId) -> Result<(), GraphError> {
        if !self.nodes.contains_key(src) {
            return Err(GraphError::NodeNotFound(src));
        }
        if !self.nodes.contains_key(dst) {
            return Err(GraphError::NodeNotFound(dst));
        }
        if self.nodes[src].out_ctrl.contains(&dst) {
            return Ok(());
        }
        self.nodes[src].out_ctrl.push(dst);
        self.nodes[dst].in_ctrl.push(src);
        self.bump();
        Ok(())
    }

    pub fn remove_ctrl_edge(&mut self, src: NodeId, dst: NodeId) -> Result<(), GraphError> {
        let present = self
            .nodes
            .get(src)
            .map_or(false, |n| n.out_ctrl.contains(&dst));
        if !present {
            return Err(GraphError::EdgeNotFound {
                src: self.node_label(src),
                dst: self.node_label(dst),
            });
        }
        self.nodes[src].out_ctrl.retain(|n| *n != dst);
        if let Some(d) = self.nodes.get_mut(dst) {
            d.in_ctrl.retain(|n| *n != src);
        }
        self.bump();
        Ok(())
    }

    /// Whether a data path leads from `from` to `to`.
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = HashSet::default();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(id) {
                stack.extend(node.out_data.iter().flatten().map(|a| a.node));
            }
        }
        false
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Mutable access to a node's descriptors and attributes.
    ///
    /// Counts as a mutation: mappings computed before this call become stale.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if self.nodes.contains_key(id) {
            self.bump();
        }
        self.nodes.get_mut(id)
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// Live nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.order
            .iter()
            .filter_map(move |&id| self.nodes.get(id).map(|n| (id, n)))
    }

    /// Snapshot of live node ids in insertion order, safe to hold across mutations.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().map(|(id, _)| id).collect()
    }

    pub fn nodes_of_type(&self, op_type: &str) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| n.op_type() == op_type)
            .map(|(id, _)| id)
            .collect()
    }

    /// Live nodes grouped by op type, each group in insertion order.
    pub fn partition_by_op_type(&self) -> BTreeMap<String, Vec<NodeId>> {
        let mut partition: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        for (id, node) in self.nodes() {
            partition
                .entry(node.op_type().to_string())
                .or_default()
                .push(id);
        }
        partition
    }

    pub fn producer(&self, dst: InAnchor) -> Option<OutAnchor> {
        self.nodes
            .get(dst.node)
            .and_then(|n| n.in_data.get(dst.index).copied().flatten())
    }

    pub fn consumers(&self, src: OutAnchor) -> &[InAnchor] {
        self.nodes
            .get(src.node)
            .and_then(|n| n.out_data.get(src.index))
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }

    /// Every consumer of every output of `id`, output by output.
    pub fn output_consumers(&self, id: NodeId) -> Vec<InAnchor> {
        self.nodes
            .get(id)
            .map(|n| n.out_data.iter().flatten().copied().collect())
            .unwrap_or_default()
    }

    /// Distinct data producers of `id`, in input order.
    pub fn in_nodes(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if let Some(n) = self.nodes.get(id) {
            for src in n.in_data.iter().flatten() {
                if !out.contains(&src.node) {
                    out.push(src.node);
                }
            }
        }
        out
    }

    /// Distinct data consumers of `id`, in output order.
    pub fn out_nodes(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        for dst in self.output_consumers(id) {
            if !out.contains(&dst.node) {
                out.push(dst.node);
            }
        }
        out
    }

    pub fn in_ctrl(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.in_ctrl.as_slice())
            .unwrap_or(&[])
    }

    pub fn out_ctrl(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.out_ctrl.as_slice())
            .unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn data_edge_count(&self) -> usize {
        self.nodes
            .values()
            .map(|n| n.in_data.iter().filter(|p| p.is_some()).count())
            .sum()
    }

    pub fn ctrl_edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.out_ctrl.len()).sum()
    }

    /// Nodes ordered so every data producer precedes its consumers.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut result = Vec::with_capacity(self.nodes.len());
        let mut visited = HashMap::default();

        for id in self.node_ids() {
            self.topo_visit(id, &mut visited, &mut result)?;
        }

        Ok(result)
    }

    fn topo_visit(
        &self,
        node_id: NodeId,
        visited: &mut HashMap<NodeId, bool>,
        result: &mut Vec<NodeId>,
    ) -> Result<(), GraphError> {
        if let Some(&done) = visited.get(&node_id) {
            if !done {
                return Err(GraphError::CycleDetected(self.node_label(node_id)));
            }
            return Ok(());
        }

        visited.insert(node_id, false);

        let node = &self.nodes[node_id];
        for src in node.in_data.iter().flatten() {
            self.topo_visit(src.node, visited, result)?;
        }

        visited.insert(node_id, true);
        result.push(node_id);
        Ok(())
    }

    /// Check every structural invariant: slot tables match descriptor counts,
    /// both ends of every edge agree, names are indexed, and data edges are acyclic.
    pub fn validate(&self) -> Result<(), GraphError> {
        let invariant = |msg: String| Err(GraphError::Invariant(msg));

        if self.order.len() != self.nodes.len() || self.names.len() != self.nodes.len() {
            return invariant("node index out of sync with arena".to_string());
        }

        for (id, node) in self.nodes() {
            if node.in_data.len() != node.num_inputs() || node.out_data.len() != node.num_outputs()
            {
                return invariant(format!("slot table size mismatch on '{}'", node.name()));
            }
            if self.names.get(node.name()) != Some(&id) {
                return invariant(format!("name index stale for '{}'", node.name()));
            }
            for (index, src) in node.in_data.iter().enumerate() {
                let Some(src) = src else { continue };
                let back = self.consumers(*src);
                if !back.contains(&InAnchor::new(id, index)) {
                    return invariant(format!(
                        "input {} of '{}' not mirrored on its producer",
                        index,
                        node.name()
                    ));
                }
            }
            for (index, consumers) in node.out_data.iter().enumerate() {
                for dst in consumers {
                    if self.producer(*dst) != Some(OutAnchor::new(id, index)) {
                        return invariant(format!(
                            "output {} of '{}' not mirrored on its consumer",
                            index,
                            node.name()
                        ));
                    }
                }
            }
            for dst in &node.out_ctrl {
                if !self.in_ctrl(*dst).contains(&id) {
                    return invariant(format!(
                        "control edge from '{}' not mirrored",
                        node.name()
                    ));
                }
            }
            for src in &node.in_ctrl {
                if !self.out_ctrl(*src).contains(&id) {
                    return invariant(format!("control edge into '{}' not mirrored", node.name()));
                }
            }
        }

        self.topological_order().map(|_| ())
    }

    pub fn summary(&self) -> GraphSummary {
        let nodes = self
            .nodes()
            .map(|(_, n)| (n.name().to_string(), n.op_type().to_string()))
            .collect();

        let mut data_edges = Vec::new();
        let mut ctrl_edges = Vec::new();
        for (id, node) in self.nodes() {
            for (index, src) in node.in_data.iter().enumerate() {
                if let Some(src) = src {
                    data_edges.push((
                        self.node_label(src.node),
                        src.index,
                        self.node_label(id),
                        index,
                    ));
                }
            }
            for dst in &node.out_ctrl {
                ctrl_edges.push((node.name().to_string(), self.node_label(*dst)));
            }
        }
        data_edges.sort();
        ctrl_edges.sort();

        GraphSummary {
            nodes,
            data_edges,
            ctrl_edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shape, DType, Format, TensorDesc};

    fn desc() -> TensorDesc {
        TensorDesc::new(shape![2, 2], Format::ND, DType::F32)
    }

    fn unary(name: &str, op_type: &str) -> Node {
        Node::new(name, op_type).with_input(desc()).with_output(desc())
    }

    fn chain() -> (Graph, NodeId, NodeId, NodeId) {
        let mut g = Graph::named("chain");
        let a = g.add_node(Node::new("a", "Data").with_output(desc())).unwrap();
        let b = g.add_node(unary("b", "Relu")).unwrap();
        let c = g.add_node(unary("c", "Abs")).unwrap();
        g.add_data_edge(OutAnchor::new(a, 0), InAnchor::new(b, 0))
            .unwrap();
        g.add_data_edge(OutAnchor::new(b, 0), InAnchor::new(c, 0))
            .unwrap();
        (g, a, b, c)
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut g = Graph::new();
        g.add_node(unary("x", "Relu")).unwrap();
        let err = g.add_node(unary("x", "Abs")).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateName(name) if name == "x"));
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn remove_connected_requires_force() {
        let (mut g, _, b, c) = chain();
        assert!(matches!(
            g.remove_node(b, false),
            Err(GraphError::NodeConnected { edges: 2, .. })
        ));

        let removed = g.remove_node(b, true).unwrap();
        assert_eq!(removed.name(), "b");
        assert!(!g.contains(b));
        assert_eq!(g.data_edge_count(), 0);
        assert_eq!(g.producer(InAnchor::new(c, 0)), None);
        g.validate().unwrap();
    }

    #[test]
    fn occupied_input_rejected() {
        let (mut g, a, _, c) = chain();
        let err = g
            .add_data_edge(OutAnchor::new(a, 0), InAnchor::new(c, 0))
            .unwrap_err();
        assert!(matches!(err, GraphError::InputOccupied { .. }));
    }

    #[test]
    fn duplicate_edge_rejected() {
        let (mut g, a, b, _) = chain();
        let err = g
            .add_data_edge(OutAnchor::new(a, 0), InAnchor::new(b, 0))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateEdge { .. }));
    }

    #[test]
    fn outputs_fan_out() {
        let (mut g, a, _, _) = chain();
        let d = g.add_node(unary("d", "Neg")).unwrap();
        g.add_data_edge(OutAnchor::new(a, 0), InAnchor::new(d, 0))
            .unwrap();
        assert_eq!(g.consumers(OutAnchor::new(a, 0)).len(), 2);
        g.validate().unwrap();
    }

    #[test]
    fn data_cycle_rejected_control_cycle_allowed() {
        let (mut g, _, b, c) = chain();
        let err = g
            .add_data_edge(OutAnchor::new(c, 0), InAnchor::new(b, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::InputOccupied { .. } | GraphError::DataCycle { .. }
        ));

        let e = g
            .add_node(Node::new("e", "Add").with_inputs([desc(), desc()]).with_output(desc()))
            .unwrap();
        g.add_data_edge(OutAnchor::new(c, 0), InAnchor::new(e, 0))
            .unwrap();
        let err = g
            .add_data_edge(OutAnchor::new(e, 0), InAnchor::new(e, 1))
            .unwrap_err();
        assert!(matches!(err, GraphError::DataCycle { .. }));

        g.add_ctrl_edge(e, b).unwrap();
        g.add_ctrl_edge(e, b).unwrap();
        assert_eq!(g.ctrl_edge_count(), 1);
        g.validate().unwrap();
    }

    #[test]
    fn insertion_order_survives_removal() {
        let (mut g, a, b, c) = chain();
        let d = g.add_node(unary("d", "Neg")).unwrap();
        g.remove_node(b, true).unwrap();
        assert_eq!(g.node_ids(), vec![a, c, d]);

        let e = g.add_node(unary("e", "Exp")).unwrap();
        assert_eq!(g.node_ids(), vec![a, c, d, e]);
        assert!(g.node(b).is_none());
    }

    #[test]
    fn topological_order_respects_edges() {
        let mut g = Graph::new();
        let c = g.add_node(unary("c", "Abs")).unwrap();
        let b = g.add_node(unary("b", "Relu")).unwrap();
        let a = g.add_node(Node::new("a", "Data").with_output(desc())).unwrap();
        g.add_data_edge(OutAnchor::new(a, 0), InAnchor::new(b, 0))
            .unwrap();
        g.add_data_edge(OutAnchor::new(b, 0), InAnchor::new(c, 0))
            .unwrap();
        assert_eq!(g.topological_order().unwrap(), vec![a, b, c]);
    }

    #[test]
    fn generation_tracks_mutations() {
        let (mut g, a, b, _) = chain();
        let before = g.generation();
        let _ = g.node(a);
        let _ = g.consumers(OutAnchor::new(a, 0));
        assert_eq!(g.generation(), before);

        g.remove_data_edge(OutAnchor::new(a, 0), InAnchor::new(b, 0))
            .unwrap();
        assert!(g.generation() > before);
    }

    #[test]
    fn remove_missing_edge_fails() {
        let (mut g, a, _, c) = chain();
        assert!(matches!(
            g.remove_data_edge(OutAnchor::new(a, 0), InAnchor::new(c, 0)),
            Err(GraphError::EdgeNotFound { .. })
        ));
        assert!(matches!(
            g.remove_ctrl_edge(a, c),
            Err(GraphError::EdgeNotFound { .. })
        ));
    }

    #[test]
    fn summary_is_name_based() {
        let (g, _, _, _) = chain();
        let summary = g.summary();
        assert_eq!(
            summary.nodes,
            vec![
                ("a".to_string(), "Data".to_string()),
                ("b".to_string(), "Relu".to_string()),
                ("c".to_string(), "Abs".to_string()),
            ]
        );
        assert_eq!(
            summary.data_edges,
            vec![
                ("a".to_string(), 0, "b".to_string(), 0),
                ("b".to_string(), 0, "c".to_string(), 0),
            ]
        );
        assert_eq!(g.clone().summary(), summary);
    }

    #[test]
    fn partition_groups_by_type() {
        let (mut g, _, _, _) = chain();
        g.add_node(unary("r2", "Relu")).unwrap();
        let partition = g.partition_by_op_type();
        assert_eq!(partition["Relu"].len(), 2);
        assert_eq!(partition["Data"].len(), 1);
        assert!(!partition.contains_key("MatMul"));
    }
}
