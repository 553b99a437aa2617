//! Shape, format and dtype inference.

use crate::{Graph, GraphError, HashMap, InAnchor, Node, NodeId, RVec, TensorDesc};
use anyhow::Context;

/// Computes a node's output descriptors from its (already propagated) inputs.
pub type InferFn = fn(&Node) -> anyhow::Result<RVec<TensorDesc>>;

/// Populates every edge's tensor descriptor. Run before any pass whose
/// patterns look at shapes, formats or dtypes.
pub trait InferShapeAndType {
    fn infer_shape_and_type(&self, graph: &mut Graph) -> anyhow::Result<()>;
}

/// Output equals input 0.
pub fn same_as_input(node: &Node) -> anyhow::Result<RVec<TensorDesc>> {
    let desc = node
        .input(0)
        .with_context(|| format!("'{}' has no input to copy", node.name()))?;
    Ok(crate::rvec![desc.clone(); node.num_outputs()])
}

/// Inference rules keyed by op type. Ops without a rule keep their outputs.
#[derive(Debug, Clone, Default)]
pub struct InferenceRegistry {
    rules: HashMap<String, InferFn>,
}

impl InferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, op_type: &str, rule: InferFn) -> &mut Self {
        self.rules.insert(op_type.to_string(), rule);
        self
    }

    pub fn with(mut self, op_type: &str, rule: InferFn) -> Self {
        self.register(op_type, rule);
        self
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.rules.contains_key(op_type)
    }

    fn infer_node(&self, graph: &mut Graph, id: NodeId) -> anyhow::Result<()> {
        let node = graph.node(id).ok_or(GraphError::NodeNotFound(id))?;
        let incoming: Vec<(usize, TensorDesc)> = (0..node.num_inputs())
            .filter_map(|i| {
                let src = graph.producer(InAnchor::new(id, i))?;
                let desc = graph.node(src.node)?.output(src.index)?.clone();
                Some((i, desc))
            })
            .collect();
        let rule = self.rules.get(node.op_type()).copied();

        let node = graph.node_mut(id).ok_or(GraphError::NodeNotFound(id))?;
        for (i, desc) in incoming {
            node.set_input_desc(i, desc);
        }
        if let Some(rule) = rule {
            let outputs = rule(node).with_context(|| format!("inferring '{}'", node.name()))?;
            anyhow::ensure!(
                outputs.len() == node.num_outputs(),
                "rule for {} produced {} outputs, '{}' has {}",
                node.op_type(),
                outputs.len(),
                node.name(),
                node.num_outputs()
            );
            node.replace_outputs(outputs);
        }
        Ok(())
    }
}

impl InferShapeAndType for InferenceRegistry {
    fn infer_shape_and_type(&self, graph: &mut Graph) -> anyhow::Result<()> {
        for id in graph.topological_order()? {
            self.infer_node(graph, id)?;
        }
        log::debug!("inferred descriptors for {} nodes", graph.node_count());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shape, DType, Format, GraphBuilder};

    fn double_last(node: &Node) -> anyhow::Result<RVec<TensorDesc>> {
        let mut desc = node.input(0).context("no input")?.clone();
        let rank = desc.shape.rank().context("unknown rank")?;
        let last = desc.shape.last_dim().context("unknown last dim")?;
        desc.shape.set(rank - 1, last * 2);
        Ok(crate::rvec![desc])
    }

    #[test]
    fn propagates_in_topological_order() {
        let x = TensorDesc::new(shape![2, 3], Format::ND, DType::F32);
        let mut g = GraphBuilder::new("g")
            .node(Node::new("c", "Relu").with_input(TensorDesc::undefined()).with_output(TensorDesc::undefined()))
            .node(Node::new("b", "Dup").with_input(TensorDesc::undefined()).with_output(TensorDesc::undefined()))
            .data("x", x)
            .connect("x", 0, "b", 0)
            .connect("b", 0, "c", 0)
            .build()
            .unwrap();

        let registry = InferenceRegistry::new()
            .with("Relu", same_as_input)
            .with("Dup", double_last);
        registry.infer_shape_and_type(&mut g).unwrap();

        let c = g.node(g.find_node("c").unwrap()).unwrap();
        assert_eq!(c.input(0).unwrap().shape, shape![2, 6]);
        assert_eq!(c.output(0).unwrap().shape, shape![2, 6]);
        assert_eq!(c.output(0).unwrap().dtype, DType::F32);
    }

    #[test]
    fn rule_failure_names_node() {
        let mut g = GraphBuilder::new("g")
            .data("x", TensorDesc::new(crate::Shape::unknown_rank(), Format::ND, DType::F32))
            .node(Node::new("d", "Dup").with_input(TensorDesc::undefined()).with_output(TensorDesc::undefined()))
            .connect("x", 0, "d", 0)
            .build()
            .unwrap();
        let err = InferenceRegistry::new()
            .with("Dup", double_last)
            .infer_shape_and_type(&mut g)
            .unwrap_err();
        assert!(format!("{err:#}").contains("inferring 'd'"));
    }
}
