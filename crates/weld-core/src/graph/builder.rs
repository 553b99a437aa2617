use super::{Graph, GraphError, InAnchor, Node, OutAnchor};
use crate::TensorDesc;

/// Fluent construction of a [`Graph`] by node name.
///
/// The first error is kept and returned from [`GraphBuilder::build`]; later
/// calls become no-ops.
///
/// ```ignore
/// let graph = GraphBuilder::new("conv_bias")
///     .data("x", x_desc)
///     .node(conv)
///     .node(bias_add)
///     .connect("x", 0, "conv", 0)
///     .connect("conv", 0, "bias_add", 0)
///     .build()?;
/// ```
pub struct GraphBuilder {
    graph: Graph,
    error: Option<GraphError>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: Graph::named(name),
            error: None,
        }
    }

    fn apply(mut self, f: impl FnOnce(&mut Graph) -> Result<(), GraphError>) -> Self {
        if self.error.is_none() {
            if let Err(e) = f(&mut self.graph) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn node(self, node: Node) -> Self {
        self.apply(|g| g.add_node(node).map(|_| ()))
    }

    /// Add a graph input: a `Data` node with one output.
    pub fn data(self, name: &str, desc: TensorDesc) -> Self {
        self.node(Node::new(name, "Data").with_output(desc))
    }

    /// Add a weight: a `Const` node with one output.
    pub fn constant(self, name: &str, desc: TensorDesc) -> Self {
        self.node(Node::new(name, "Const").with_output(desc))
    }

    pub fn connect(self, src: &str, src_output: usize, dst: &str, dst_input: usize) -> Self {
        self.apply(|g| {
            let s = lookup(g, src)?;
            let d = lookup(g, dst)?;
            g.add_data_edge(OutAnchor::new(s, src_output), InAnchor::new(d, dst_input))
        })
    }

    pub fn ctrl(self, src: &str, dst: &str) -> Self {
        self.apply(|g| {
            let s = lookup(g, src)?;
            let d = lookup(g, dst)?;
            g.add_ctrl_edge(s, d)
        })
    }

    pub fn build(self) -> Result<Graph, GraphError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.graph),
        }
    }
}

fn lookup(g: &Graph, name: &str) -> Result<super::NodeId, GraphError> {
    g.find_node(name)
        .ok_or_else(|| GraphError::UnknownName(name.to_string()))
}
