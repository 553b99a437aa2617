use super::bound;
use derive_new::new;
use weld::{FusedNodeSpec, Graph, GraphFusionPass, InAnchor, Mapping, Node, OpAliases, OutAnchor, Pattern};

/// Most inputs a single `ConcatV2D` kernel accepts.
pub const MAX_CONCAT_INPUTS: usize = 63;

/// Flattens a `ConcatV2D` whose only consumer is another `ConcatV2D` on the
/// same `concat_dim`: the inner inputs are spliced into the outer input list
/// where the inner result used to enter.
#[derive(Debug, Clone, new)]
pub struct ZConcatv2dFusionPass {
    #[new(value = "MAX_CONCAT_INPUTS")]
    max_inputs: usize,
}

impl Default for ZConcatv2dFusionPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ZConcatv2dFusionPass {
    pub const NAME: &'static str = "ZConcatv2dFusionPass";

    pub fn with_max_inputs(max_inputs: usize) -> Self {
        Self { max_inputs }
    }
}

/// `concat_dim` resolved against the rank of input 0, when that rank is known.
fn resolved_axis(node: &Node) -> Option<usize> {
    let dim = node.attrs().get_int("concat_dim")?;
    node.input(0)?.shape.resolve_axis(dim)
}

fn same_axis(inner: &Node, outer: &Node) -> bool {
    match (resolved_axis(inner), resolved_axis(outer)) {
        (Some(a), Some(b)) => a == b,
        _ => {
            let dim = inner.attrs().get_int("concat_dim");
            dim.is_some() && dim == outer.attrs().get_int("concat_dim")
        }
    }
}

impl GraphFusionPass for ZConcatv2dFusionPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn define_patterns(&self) -> anyhow::Result<Vec<Pattern>> {
        let aliases = OpAliases::new().with("ConcatV2D", ["ConcatD"]);
        Ok(vec![Pattern::builder("NestedConcat")
            .role("inner", ["ConcatV2D"])
            .role("outer", ["ConcatV2D"])
            .edge_any("inner", "outer")
            .output("outer")
            .aliases(&aliases)
            .build()?])
    }

    fn replacement(&self, graph: &Graph, mapping: &Mapping) -> anyhow::Result<Option<FusedNodeSpec>> {
        let (inner_id, inner) = bound(graph, mapping, "inner")?;
        let (outer_id, outer) = bound(graph, mapping, "outer")?;

        if !same_axis(inner, outer) {
            log::debug!("'{}' and '{}' concatenate along different axes", inner.name(), outer.name());
            return Ok(None);
        }

        let [entry] = graph.consumers(OutAnchor::new(inner_id, 0)) else {
            return Ok(None);
        };
        let splice_at = entry.index;

        let fused_count = outer.num_inputs() - 1 + inner.num_inputs();
        if fused_count > self.max_inputs {
            log::debug!(
                "flattening '{}' into '{}' needs {} inputs, limit is {}",
                inner.name(),
                outer.name(),
                fused_count,
                self.max_inputs
            );
            return Ok(None);
        }

        let inputs = (0..splice_at)
            .map(|i| InAnchor::new(outer_id, i))
            .chain((0..inner.num_inputs()).map(|i| InAnchor::new(inner_id, i)))
            .chain((splice_at + 1..outer.num_inputs()).map(|i| InAnchor::new(outer_id, i)));

        let mut attrs = outer.attrs().clone();
        attrs.set("N", fused_count as i64);

        Ok(Some(
            FusedNodeSpec::new(outer.name(), outer.op_type())
                .with_attrs(attrs)
                .inputs(inputs)
                .output(OutAnchor::new(outer_id, 0)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weld::{shape, DType, Format, TensorDesc};

    fn concat(dim: i64, input: TensorDesc) -> Node {
        Node::new("c", "ConcatV2D")
            .with_input(input)
            .with_attr("concat_dim", dim)
    }

    #[test]
    fn negative_and_positive_dims_name_one_axis() {
        let rank2 = TensorDesc::new(shape![2, 3], Format::ND, DType::F32);
        assert!(same_axis(&concat(-1, rank2.clone()), &concat(1, rank2.clone())));
        assert!(!same_axis(&concat(0, rank2.clone()), &concat(-1, rank2.clone())));

        let unknown = TensorDesc::undefined();
        assert!(same_axis(&concat(1, unknown.clone()), &concat(1, rank2)));
        assert!(!same_axis(&concat(-1, unknown.clone()), &concat(1, unknown)));
    }
}
