mod concat;
mod conv2d_bias_add;
mod matmul_bias_add;

pub use concat::*;
pub use conv2d_bias_add::*;
pub use matmul_bias_add::*;

use weld::{Graph, Mapping, Node, NodeId};

/// The node bound to a required role, with its id.
pub(crate) fn bound<'g>(graph: &'g Graph, mapping: &Mapping, role: &str) -> anyhow::Result<(NodeId, &'g Node)> {
    let id = mapping
        .node(role)
        .ok_or_else(|| anyhow::anyhow!("role '{}' unbound in {}", role, mapping.pattern_name()))?;
    let node = graph
        .node(id)
        .ok_or_else(|| anyhow::anyhow!("role '{}' bound to a removed node", role))?;
    Ok((id, node))
}

/// Length of a rank-1 bias, when its shape is fully known.
pub(crate) fn bias_len(bias_add: &Node) -> Option<i64> {
    let shape = &bias_add.input(1)?.shape;
    if shape.rank()? != 1 {
        return None;
    }
    shape.known_dim(0)
}
