use super::{bias_len, bound};
use derive_new::new;
use weld::{merge_attrs, FusedNodeSpec, Graph, GraphFusionPass, InAnchor, Mapping, OutAnchor, Pattern};

/// `Conv2D -> BiasAdd` becomes one `Conv2D` with the bias as input 2.
///
/// The bias must have one entry per output channel, read at the channel axis
/// of the convolution's output format.
#[derive(Debug, Clone, Default, new)]
pub struct Conv2DBiasAddFusionPass;

impl Conv2DBiasAddFusionPass {
    pub const NAME: &'static str = "Conv2DBiasAddFusionPass";
}

impl GraphFusionPass for Conv2DBiasAddFusionPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn define_patterns(&self) -> anyhow::Result<Vec<Pattern>> {
        Ok(vec![Pattern::builder("Conv2DBiasAdd")
            .role("conv", ["Conv2D"])
            .role("bias_add", ["BiasAdd"])
            .edge("conv", "bias_add", 0)
            .output("bias_add")
            .build()?])
    }

    fn replacement(&self, graph: &Graph, mapping: &Mapping) -> anyhow::Result<Option<FusedNodeSpec>> {
        let (conv_id, conv) = bound(graph, mapping, "conv")?;
        let (ba_id, bias_add) = bound(graph, mapping, "bias_add")?;

        if conv.num_inputs() != 2 {
            return Ok(None);
        }
        let channels = conv.output(0).and_then(|d| d.channels());
        if channels.is_none() || bias_len(bias_add) != channels {
            log::debug!(
                "'{}': bias does not match {:?} output channels of '{}'",
                bias_add.name(),
                channels,
                conv.name()
            );
            return Ok(None);
        }

        Ok(Some(
            FusedNodeSpec::new(conv.name(), "Conv2D")
                .with_attrs(merge_attrs(graph, &[conv_id]))
                .inputs([
                    InAnchor::new(conv_id, 0),
                    InAnchor::new(conv_id, 1),
                    InAnchor::new(ba_id, 1),
                ])
                .output(OutAnchor::new(ba_id, 0)),
        ))
    }
}
