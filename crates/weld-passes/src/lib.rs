//! Built-in fusion passes for weld.
//!
//! - [`MatMulBiasAddFusionPass`] folds a `BiasAdd` into the preceding matmul
//! - [`Conv2DBiasAddFusionPass`] folds a `BiasAdd` into the preceding `Conv2D`
//! - [`ZConcatv2dFusionPass`] flattens nested `ConcatV2D` along one axis (second round)
//! - [`MatmulEltwiseBufferFusionPass`] groups a matmul with its elementwise consumer
//!
//! [`register_builtin_passes`] makes all of them available to a [`PassRegistry`].

mod buffer_fusion;
mod catalog;
mod graph_fusion;
mod infer;

pub use buffer_fusion::*;
pub use catalog::*;
pub use graph_fusion::*;
pub use infer::*;

use weld::{PassRegistry, PassType};

pub fn register_builtin_passes(registry: &PassRegistry) {
    registry.register_graph_pass(
        MatMulBiasAddFusionPass::NAME,
        PassType::GraphFusion,
        MatMulBiasAddFusionPass::new,
    );
    registry.register_graph_pass(
        Conv2DBiasAddFusionPass::NAME,
        PassType::GraphFusion,
        Conv2DBiasAddFusionPass::new,
    );
    registry.register_graph_pass(
        ZConcatv2dFusionPass::NAME,
        PassType::SecondRoundGraphFusion,
        ZConcatv2dFusionPass::new,
    );
    registry.register_buffer_pass(
        MatmulEltwiseBufferFusionPass::NAME,
        MatmulEltwiseBufferFusionPass::new,
    );
}
