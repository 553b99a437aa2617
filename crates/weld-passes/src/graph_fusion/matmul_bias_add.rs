use super::{bias_len, bound};
use derive_new::new;
use weld::{merge_attrs, FusedNodeSpec, Graph, GraphFusionPass, InAnchor, Mapping, OutAnchor, Pattern};

/// `MatMul -> BiasAdd` becomes one matmul carrying the bias as input 2.
#[derive(Debug, Clone, Default, new)]
pub struct MatMulBiasAddFusionPass;

impl MatMulBiasAddFusionPass {
    pub const NAME: &'static str = "MatMulBiasAddFusionPass";
}

impl GraphFusionPass for MatMulBiasAddFusionPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn define_patterns(&self) -> anyhow::Result<Vec<Pattern>> {
        let pattern = Pattern::builder("MatMulBiasAdd")
            .role("matmul", ["MatMul", "MatMulV2"])
            .role("bias_add", ["BiasAdd"])
            .edge("matmul", "bias_add", 0)
            .output("bias_add")
            .build()?;
        Ok(vec![pattern])
    }

    fn replacement(&self, graph: &Graph, mapping: &Mapping) -> anyhow::Result<Option<FusedNodeSpec>> {
        let (mm_id, matmul) = bound(graph, mapping, "matmul")?;
        let (ba_id, bias_add) = bound(graph, mapping, "bias_add")?;

        if matmul.num_inputs() != 2 || matmul.attrs().get_bool("has_bias") == Some(true) {
            log::debug!("'{}' already carries a bias", matmul.name());
            return Ok(None);
        }
        let out_dim = matmul.output(0).and_then(|d| d.shape.last_dim());
        match (bias_len(bias_add), out_dim) {
            (Some(bias), Some(out)) if bias == out => {}
            (bias, out) => {
                log::debug!(
                    "'{}': bias length {:?} does not fit output dim {:?}",
                    bias_add.name(),
                    bias,
                    out
                );
                return Ok(None);
            }
        }

        let mut attrs = merge_attrs(graph, &[mm_id]);
        attrs.set("has_bias", true);
        Ok(Some(
            FusedNodeSpec::new(matmul.name(), matmul.op_type())
                .with_attrs(attrs)
                .inputs([
                    InAnchor::new(mm_id, 0),
                    InAnchor::new(mm_id, 1),
                    InAnchor::new(ba_id, 1),
                ])
                .output(OutAnchor::new(ba_id, 0)),
        ))
    }
}
