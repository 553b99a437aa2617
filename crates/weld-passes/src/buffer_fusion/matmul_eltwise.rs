use derive_new::new;
use weld::{BufferFusionPass, Graph, Mapping, NodeId, Pattern};

/// Schedules a matmul and the elementwise op consuming it on one buffer.
///
/// The elementwise op's other operand is matched as an optional role so the
/// group is found whether or not that operand comes from a plain input.
#[derive(Debug, Clone, Default, new)]
pub struct MatmulEltwiseBufferFusionPass;

impl MatmulEltwiseBufferFusionPass {
    pub const NAME: &'static str = "MatmulEltwiseBufferFusionPass";
}

impl BufferFusionPass for MatmulEltwiseBufferFusionPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn define_patterns(&self) -> anyhow::Result<Vec<Pattern>> {
        Ok(vec![Pattern::builder("MatmulEltwise")
            .role("matmul", ["MatMul", "MatMulV2", "BatchMatMul"])
            .role("eltwise", ["Add", "Mul", "Relu", "LeakyRelu"])
            .optional_role("other_input", ["Data", "Const"])
            .edge_any("matmul", "eltwise")
            .edge_any("other_input", "eltwise")
            .build()?])
    }

    fn fusion_nodes(&self, _: &Graph, mapping: &Mapping) -> anyhow::Result<Vec<NodeId>> {
        Ok(mapping
            .nodes("matmul")
            .iter()
            .chain(mapping.nodes("eltwise"))
            .copied()
            .collect())
    }
}
