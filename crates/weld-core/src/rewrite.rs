//! Replacing a matched subgraph with one fused node.
//!
//! A rewrite is planned against an immutable graph first. Only a plan that has
//! passed every check touches the graph, so a failed rewrite never leaves the
//! graph half-edited.

use crate::{
    Attrs, Graph, GraphError, HashSet, InAnchor, Mapping, Node, NodeId, OutAnchor, PatternError,
};

#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("Pattern '{pattern}' left required role '{role}' unbound.")]
    UnboundRole { pattern: String, role: String },
    #[error("Pass '{0}' produced no fusion nodes.")]
    EmptyFusionNodes(String),
    #[error("Output {index} of '{node}' has consumers outside the match that no fused output covers.")]
    UncoveredOutput { node: String, index: usize },
    #[error("Input {index} of '{node}' is fed from outside the match but no fused input covers it.")]
    UncoveredInput { node: String, index: usize },
    #[error("Fused slot references '{0}', which is not part of the match.")]
    ForeignAnchor(String),
    #[error("Match is not convex: a path leaves it and re-enters at '{0}'.")]
    NonConvex(String),
    #[error("No pass '{name}' registered as {pass_type}.")]
    UnknownPass { name: String, pass_type: String },
    #[error("Capability check returned {actual}, expected {expected}.")]
    SupportMismatch { expected: bool, actual: bool },
    #[error(transparent)]
    Hook(#[from] anyhow::Error),
}

/// What a graph-fusion pass wants a match replaced with.
///
/// Fused inputs and outputs are slots of matched nodes, listed in the order
/// the fused node should expose them. Their descriptors are copied over.
#[derive(Debug, Clone)]
pub struct FusedNodeSpec {
    pub name: String,
    pub op_type: String,
    pub attrs: Attrs,
    pub inputs: Vec<InAnchor>,
    pub outputs: Vec<OutAnchor>,
}

impl FusedNodeSpec {
    pub fn new(name: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            attrs: Attrs::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn input(mut self, anchor: InAnchor) -> Self {
        self.inputs.push(anchor);
        self
    }

    pub fn inputs(mut self, anchors: impl IntoIterator<Item = InAnchor>) -> Self {
        self.inputs.extend(anchors);
        self
    }

    pub fn output(mut self, anchor: OutAnchor) -> Self {
        self.outputs.push(anchor);
        self
    }

    /// A detached node with descriptors copied from the referenced slots.
    pub fn to_node(&self, graph: &Graph) -> Result<Node, GraphError> {
        let mut inputs = Vec::with_capacity(self.inputs.len());
        for a in &self.inputs {
            let node = graph.node(a.node).ok_or(GraphError::NodeNotFound(a.node))?;
            let desc = node.input(a.index).ok_or_else(|| GraphError::InputOutOfRange {
                node: node.name().to_string(),
                index: a.index,
                available: node.num_inputs(),
            })?;
            inputs.push(desc.clone());
        }

        let mut outputs = Vec::with_capacity(self.outputs.len());
        for a in &self.outputs {
            let node = graph.node(a.node).ok_or(GraphError::NodeNotFound(a.node))?;
            let desc = node.output(a.index).ok_or_else(|| GraphError::OutputOutOfRange {
                node: node.name().to_string(),
                index: a.index,
                available: node.num_outputs(),
            })?;
            outputs.push(desc.clone());
        }

        Ok(Node::new(self.name.clone(), self.op_type.clone())
            .with_inputs(inputs)
            .with_outputs(outputs)
            .with_attrs(self.attrs.clone()))
    }
}

/// Attributes of `nodes` merged in order; the first node to set a key wins.
pub fn merge_attrs(graph: &Graph, nodes: &[NodeId]) -> Attrs {
    let mut merged = Attrs::new();
    for node in nodes.iter().filter_map(|id| graph.node(*id)) {
        merged.merge_missing(node.attrs());
    }
    merged
}

/// A validated rewrite, ready to apply to the graph it was planned against.
#[derive(Debug)]
pub struct RewritePlan {
    node: Node,
    generation: u64,
    removed: Vec<NodeId>,
    /// Fused input slot fed by an external producer.
    in_edges: Vec<(usize, OutAnchor)>,
    /// Fused output slot feeding an external consumer.
    out_edges: Vec<(usize, InAnchor)>,
    ctrl_in: Vec<NodeId>,
    ctrl_out: Vec<NodeId>,
}

impl RewritePlan {
    pub fn new(graph: &Graph, mapping: &Mapping, spec: &FusedNodeSpec) -> Result<Self, FusionError> {
        mapping.check_fresh(graph)?;

        let removed = mapping.all_nodes();
        for id in &removed {
            if !graph.contains(*id) {
                return Err(GraphError::NodeNotFound(*id).into());
            }
        }
        let matched: HashSet<NodeId> = removed.iter().copied().collect();
        let label = |id: NodeId| graph.node(id).map_or_else(|| format!("{id:?}"), |n| n.name().to_string());

        if let Some(existing) = graph.find_node(&spec.name) {
            if !matched.contains(&existing) {
                return Err(GraphError::DuplicateName(spec.name.clone()).into());
            }
        }

        let mut in_edges = Vec::new();
        for (slot, anchor) in spec.inputs.iter().enumerate() {
            if !matched.contains(&anchor.node) {
                return Err(FusionError::ForeignAnchor(label(anchor.node)));
            }
            if let Some(src) = graph.producer(*anchor) {
                if matched.contains(&src.node) {
                    return Err(GraphError::Invariant(format!(
                        "fused input {} is fed from inside the match by '{}'",
                        slot,
                        label(src.node)
                    ))
                    .into());
                }
                in_edges.push((slot, src));
            }
        }

        let mut out_edges = Vec::new();
        for (slot, anchor) in spec.outputs.iter().enumerate() {
            if !matched.contains(&anchor.node) {
                return Err(FusionError::ForeignAnchor(label(anchor.node)));
            }
            for dst in graph.consumers(*anchor) {
                if !matched.contains(&dst.node) {
                    out_edges.push((slot, *dst));
                }
            }
        }

        for &id in &removed {
            let Some(node) = graph.node(id) else { continue };
            for index in 0..node.num_inputs() {
                let anchor = InAnchor::new(id, index);
                let external = graph
                    .producer(anchor)
                    .is_some_and(|src| !matched.contains(&src.node));
                if external && !spec.inputs.contains(&anchor) {
                    return Err(FusionError::UncoveredInput {
                        node: node.name().to_string(),
                        index,
                    });
                }
            }
            for index in 0..node.num_outputs() {
                let anchor = OutAnchor::new(id, index);
                let leaks = graph
                    .consumers(anchor)
                    .iter()
                    .any(|dst| !matched.contains(&dst.node));
                if leaks && !spec.outputs.contains(&anchor) {
                    return Err(FusionError::UncoveredOutput {
                        node: node.name().to_string(),
                        index,
                    });
                }
            }
        }

        if let Some(reentry) = reentry_point(graph, &removed, &matched) {
            return Err(FusionError::NonConvex(label(reentry)));
        }

        let mut ctrl_in = Vec::new();
        let mut ctrl_out = Vec::new();
        for &id in &removed {
            for &src in graph.in_ctrl(id) {
                if !matched.contains(&src) && !ctrl_in.contains(&src) {
                    ctrl_in.push(src);
                }
            }
            for &dst in graph.out_ctrl(id) {
                if !matched.contains(&dst) && !ctrl_out.contains(&dst) {
                    ctrl_out.push(dst);
                }
            }
        }

        Ok(Self {
            node: spec.to_node(graph)?,
            generation: graph.generation(),
            removed,
            in_edges,
            out_edges,
            ctrl_in,
            ctrl_out,
        })
    }

    pub fn fused_node(&self) -> &Node {
        &self.node
    }

    pub fn removed(&self) -> &[NodeId] {
        &self.removed
    }

    /// Perform the rewrite and return the fused node's id.
    pub fn apply(self, graph: &mut Graph) -> Result<NodeId, FusionError> {
        if graph.generation() != self.generation {
            return Err(GraphError::StaleMapping {
                mapping: self.generation,
                graph: graph.generation(),
            }
            .into());
        }

        let RewritePlan {
            node,
            removed,
            in_edges,
            out_edges,
            ctrl_in,
            ctrl_out,
            ..
        } = self;

        let name = node.name().to_string();
        for id in &removed {
            graph.detach_node(*id);
        }
        let fused = graph.add_node(node)?;

        for (slot, src) in in_edges {
            graph.connect_unchecked(src, InAnchor::new(fused, slot));
        }
        for (slot, dst) in out_edges {
            graph.connect_unchecked(OutAnchor::new(fused, slot), dst);
        }
        for src in ctrl_in {
            graph.add_ctrl_edge(src, fused)?;
        }
        for dst in ctrl_out {
            graph.add_ctrl_edge(fused, dst)?;
        }

        log::debug!("fused {} nodes into '{}'", removed.len(), name);
        Ok(fused)
    }
}

/// First matched node reachable from outside the match through a path that
/// starts at a matched node.
fn reentry_point(graph: &Graph, removed: &[NodeId], matched: &HashSet<NodeId>) -> Option<NodeId> {
    let mut stack: Vec<NodeId> = removed
        .iter()
        .flat_map(|id| graph.out_nodes(*id))
        .filter(|n| !matched.contains(n))
        .collect();
    let mut visited = HashSet::default();
    while let Some(id) = stack.pop() {
        if matched.contains(&id) {
            return Some(id);
        }
        if visited.insert(id) {
            stack.extend(graph.out_nodes(id));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shape, DType, Format, GraphBuilder, GraphMatcher, Pattern, TensorDesc};

    fn desc() -> TensorDesc {
        TensorDesc::new(shape![8, 16], Format::ND, DType::F16)
    }

    fn op(name: &str, op_type: &str, inputs: usize) -> Node {
        Node::new(name, op_type)
            .with_inputs(vec![desc(); inputs])
            .with_output(desc())
    }

    fn bias_pattern() -> Pattern {
        Pattern::builder("MatMulBiasAdd")
            .role("matmul", ["MatMul"])
            .role("bias_add", ["BiasAdd"])
            .edge("matmul", "bias_add", 0)
            .output("bias_add")
            .build()
            .unwrap()
    }

    fn graph() -> Graph {
        GraphBuilder::new("g")
            .data("x", desc())
            .constant("w", desc())
            .constant("b", desc())
            .node(op("mm", "MatMul", 2).with_attr("transpose_x1", false))
            .node(op("ba", "BiasAdd", 2).with_attr("data_format", "NHWC"))
            .node(op("relu", "Relu", 1))
            .node(op("neg", "Neg", 1))
            .connect("x", 0, "mm", 0)
            .connect("w", 0, "mm", 1)
            .connect("mm", 0, "ba", 0)
            .connect("b", 0, "ba", 1)
            .connect("ba", 0, "relu", 0)
            .connect("ba", 0, "neg", 0)
            .ctrl("x", "ba")
            .build()
            .unwrap()
    }

    fn spec(g: &Graph, m: &Mapping) -> FusedNodeSpec {
        let mm = m.node("matmul").unwrap();
        let ba = m.node("bias_add").unwrap();
        FusedNodeSpec::new("mm", "MatMul")
            .with_attrs(merge_attrs(g, &[mm, ba]).with("has_bias", true))
            .inputs([InAnchor::new(mm, 0), InAnchor::new(mm, 1), InAnchor::new(ba, 1)])
            .output(OutAnchor::new(ba, 0))
    }

    #[test]
    fn rewrite_rewires_external_edges() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut g = graph();
        let p = bias_pattern();
        let m = GraphMatcher::new(&p).find_matches(&g).remove(0);

        let plan = RewritePlan::new(&g, &m, &spec(&g, &m)).unwrap();
        assert_eq!(plan.fused_node().num_inputs(), 3);
        let fused = plan.apply(&mut g).unwrap();

        g.validate().unwrap();
        assert!(g.nodes_of_type("BiasAdd").is_empty());
        assert_eq!(g.node_count(), 6);

        let node = g.node(fused).unwrap();
        assert_eq!(node.name(), "mm");
        assert_eq!(node.attrs().get_bool("has_bias"), Some(true));
        assert_eq!(node.attrs().get_str("data_format"), Some("NHWC"));

        let b = g.find_node("b").unwrap();
        assert_eq!(g.producer(InAnchor::new(fused, 2)), Some(OutAnchor::new(b, 0)));
        let fanout: Vec<&str> = g
            .consumers(OutAnchor::new(fused, 0))
            .iter()
            .map(|a| g.node(a.node).unwrap().name())
            .collect();
        assert_eq!(fanout, ["relu", "neg"]);
        assert_eq!(g.in_ctrl(fused), &[g.find_node("x").unwrap()]);
    }

    #[test]
    fn stale_mapping_refused() {
        let mut g = graph();
        let p = bias_pattern();
        let m = GraphMatcher::new(&p).find_matches(&g).remove(0);
        let s = spec(&g, &m);

        g.add_node(op("late", "Abs", 1)).unwrap();
        let err = RewritePlan::new(&g, &m, &s).unwrap_err();
        assert!(matches!(err, FusionError::Graph(GraphError::StaleMapping { .. })));
    }

    #[test]
    fn plan_goes_stale_before_apply() {
        let mut g = graph();
        let p = bias_pattern();
        let m = GraphMatcher::new(&p).find_matches(&g).remove(0);
        let plan = RewritePlan::new(&g, &m, &spec(&g, &m)).unwrap();
        let before = g.summary();

        let relu = g.find_node("relu").unwrap();
        let _ = g.node_mut(relu);
        assert!(plan.apply(&mut g).is_err());
        assert_eq!(g.summary(), before);
    }

    #[test]
    fn uncovered_output_rejected_without_mutation() {
        let g = graph();
        let p = bias_pattern();
        let m = GraphMatcher::new(&p).find_matches(&g).remove(0);
        let mut s = spec(&g, &m);
        s.outputs.clear();

        let before = g.summary();
        let err = RewritePlan::new(&g, &m, &s).unwrap_err();
        assert!(matches!(err, FusionError::UncoveredOutput { index: 0, .. }));
        assert_eq!(g.summary(), before);
    }

    #[test]
    fn uncovered_input_rejected_without_mutation() {
        let g = GraphBuilder::new("g")
            .data("x", desc())
            .data("y", desc())
            .node(op("a", "Relu", 1))
            .node(op("b", "Add", 2))
            .connect("x", 0, "a", 0)
            .connect("a", 0, "b", 0)
            .connect("y", 0, "b", 1)
            .build()
            .unwrap();
        let p = Pattern::builder("relu_add")
            .role("a", ["Relu"])
            .role("b", ["Add"])
            .edge("a", "b", 0)
            .output("b")
            .build()
            .unwrap();
        let m = GraphMatcher::new(&p).find_matches(&g).remove(0);
        let (a, b) = (m.node("a").unwrap(), m.node("b").unwrap());

        let dropped = FusedNodeSpec::new("ab", "ReluAdd")
            .input(InAnchor::new(a, 0))
            .output(OutAnchor::new(b, 0));
        let before = g.summary();
        let err = RewritePlan::new(&g, &m, &dropped).unwrap_err();
        assert!(matches!(err, FusionError::UncoveredInput { ref node, index: 1 } if node == "b"));
        assert_eq!(g.summary(), before);

        let mut g = g;
        let covered = dropped.input(InAnchor::new(b, 1));
        let fused = RewritePlan::new(&g, &m, &covered).unwrap().apply(&mut g).unwrap();
        g.validate().unwrap();
        let y = g.find_node("y").unwrap();
        assert_eq!(g.producer(InAnchor::new(fused, 1)), Some(OutAnchor::new(y, 0)));
    }

    #[test]
    fn duplicate_fused_name_rejected() {
        let g = graph();
        let p = bias_pattern();
        let m = GraphMatcher::new(&p).find_matches(&g).remove(0);
        let mut s = spec(&g, &m);
        s.name = "relu".to_string();
        let err = RewritePlan::new(&g, &m, &s).unwrap_err();
        assert!(matches!(err, FusionError::Graph(GraphError::DuplicateName(_))));
    }

    #[test]
    fn non_convex_match_detected() {
        // a feeds b directly and through c; fusing {a, b} would leave c in a cycle.
        let g = GraphBuilder::new("g")
            .data("x", desc())
            .node(op("a", "Relu", 1))
            .node(op("c", "Neg", 1))
            .node(op("b", "Add", 2))
            .connect("x", 0, "a", 0)
            .connect("a", 0, "b", 0)
            .connect("a", 0, "c", 0)
            .connect("c", 0, "b", 1)
            .build()
            .unwrap();
        let p = Pattern::builder("relu_add")
            .role("a", ["Relu"])
            .role("b", ["Add"])
            .edge("a", "b", 0)
            .output("b")
            .build()
            .unwrap();
        let (a, b) = (g.find_node("a").unwrap(), g.find_node("b").unwrap());
        let m = Mapping::new(&p, g.generation(), vec![vec![a], vec![b]]);

        let s = FusedNodeSpec::new("ab", "ReluAdd")
            .inputs([InAnchor::new(a, 0), InAnchor::new(b, 1)])
            .output(OutAnchor::new(b, 0))
            .output(OutAnchor::new(a, 0));
        let err = RewritePlan::new(&g, &m, &s).unwrap_err();
        assert!(matches!(err, FusionError::NonConvex(n) if n == "b"));
    }
}
