#![allow(dead_code)]

use std::sync::Arc;
use weld::{shape, CatalogKernelInfoStore, DType, Format, Graph, GraphBuilder, GraphError, Node, PassRegistry, Shape, TensorDesc};
use weld_passes::{builtin_catalog, register_builtin_passes};

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn f32_desc(shape: Shape, format: Format) -> TensorDesc {
    TensorDesc::new(shape, format, DType::F32)
}

pub fn registry() -> PassRegistry {
    let registry = PassRegistry::new();
    register_builtin_passes(&registry);
    registry
}

pub fn oracle() -> anyhow::Result<CatalogKernelInfoStore> {
    Ok(CatalogKernelInfoStore::new(Arc::new(builtin_catalog()?)))
}

pub fn count(graph: &Graph, op_type: &str) -> usize {
    graph.nodes_of_type(op_type).len()
}

/// `x -> Conv2D -> BiasAdd`, with the bias result read by two `Relu`s.
pub fn conv_bias_fanout(channels: i64) -> Result<Graph, GraphError> {
    let out = f32_desc(shape![1, channels, 8, 8], Format::NCHW);
    GraphBuilder::new("conv_bias")
        .data("x", f32_desc(shape![1, 3, 8, 8], Format::NCHW))
        .constant("filter", f32_desc(shape![channels, 3, 3, 3], Format::NCHW))
        .constant("bias", f32_desc(shape![channels], Format::ND))
        .node(
            Node::new("conv", "Conv2D")
                .with_inputs([f32_desc(shape![1, 3, 8, 8], Format::NCHW), f32_desc(shape![channels, 3, 3, 3], Format::NCHW)])
                .with_output(out.clone())
                .with_attr("strides", vec![1i64, 1, 1, 1])
                .with_attr("data_format", "NCHW"),
        )
        .node(
            Node::new("conv_bias", "BiasAdd")
                .with_inputs([out.clone(), f32_desc(shape![channels], Format::ND)])
                .with_output(out.clone()),
        )
        .node(Node::new("left", "Relu").with_input(out.clone()).with_output(out.clone()))
        .node(Node::new("right", "Relu").with_input(out.clone()).with_output(out))
        .connect("x", 0, "conv", 0)
        .connect("filter", 0, "conv", 1)
        .connect("conv", 0, "conv_bias", 0)
        .connect("bias", 0, "conv_bias", 1)
        .connect("conv_bias", 0, "left", 0)
        .connect("conv_bias", 0, "right", 0)
        .build()
}

/// `x[4, 8] * w[8, n] -> BiasAdd(bias[bias_len])`, consumed by one `Relu`.
pub fn matmul_bias(out_shape: Shape, bias_len: i64) -> Result<Graph, GraphError> {
    let out = f32_desc(out_shape, Format::ND);
    let bias = f32_desc(shape![bias_len], Format::ND);
    GraphBuilder::new("matmul_bias")
        .data("x", f32_desc(shape![4, 8], Format::ND))
        .constant("w", f32_desc(shape![8, 16], Format::ND))
        .constant("bias", bias.clone())
        .node(
            Node::new("mm", "MatMulV2")
                .with_inputs([f32_desc(shape![4, 8], Format::ND), f32_desc(shape![8, 16], Format::ND)])
                .with_output(out.clone()),
        )
        .node(Node::new("mm_bias", "BiasAdd").with_inputs([out.clone(), bias]).with_output(out.clone()))
        .node(Node::new("act", "Relu").with_input(out.clone()).with_output(out))
        .connect("x", 0, "mm", 0)
        .connect("w", 0, "mm", 1)
        .connect("mm", 0, "mm_bias", 0)
        .connect("bias", 0, "mm_bias", 1)
        .connect("mm_bias", 0, "act", 0)
        .build()
}

/// An `inner_inputs`-way `ConcatV2D` entering an `outer_others + 1`-way one
/// at input 0, both along axis 1.
pub fn nested_concat(inner_inputs: usize, outer_others: usize) -> Result<Graph, GraphError> {
    let piece = f32_desc(shape![2, 1], Format::ND);
    let inner_out = f32_desc(shape![2, inner_inputs], Format::ND);
    let outer_out = f32_desc(shape![2, inner_inputs + outer_others], Format::ND);

    let inner_in = vec![piece.clone(); inner_inputs];
    let mut outer_in = vec![inner_out.clone()];
    outer_in.extend(vec![piece.clone(); outer_others]);

    let mut b = GraphBuilder::new("nested_concat")
        .node(
            Node::new("inner", "ConcatV2D")
                .with_inputs(inner_in)
                .with_output(inner_out)
                .with_attr("concat_dim", 1i64)
                .with_attr("N", inner_inputs as i64),
        )
        .node(
            Node::new("outer", "ConcatV2D")
                .with_inputs(outer_in)
                .with_output(outer_out.clone())
                .with_attr("concat_dim", 1i64)
                .with_attr("N", (outer_others + 1) as i64),
        )
        .node(Node::new("sink", "Relu").with_input(outer_out.clone()).with_output(outer_out))
        .connect("inner", 0, "outer", 0)
        .connect("outer", 0, "sink", 0);
    for i in 0..inner_inputs {
        let name = format!("a{i}");
        b = b.data(&name, piece.clone()).connect(&name, 0, "inner", i);
    }
    for i in 0..outer_others {
        let name = format!("b{i}");
        b = b.data(&name, piece.clone()).connect(&name, 0, "outer", i + 1);
    }
    b.build()
}

/// `x * w -> Add(y)`, the shape the matmul/elementwise buffer pass looks for.
pub fn matmul_add() -> Result<Graph, GraphError> {
    let d = f32_desc(shape![4, 4], Format::ND);
    GraphBuilder::new("matmul_add")
        .data("x", d.clone())
        .constant("w", d.clone())
        .data("y", d.clone())
        .node(Node::new("mm", "MatMul").with_inputs([d.clone(), d.clone()]).with_output(d.clone()))
        .node(Node::new("add", "Add").with_inputs([d.clone(), d.clone()]).with_output(d))
        .connect("x", 0, "mm", 0)
        .connect("w", 0, "mm", 1)
        .connect("mm", 0, "add", 0)
        .connect("y", 0, "add", 1)
        .build()
}

/// A chain of `n` `Relu`s: nothing any built-in pass can seed on.
pub fn relu_chain(n: usize) -> Result<Graph, GraphError> {
    let d = f32_desc(shape![4], Format::ND);
    let mut b = GraphBuilder::new("relus").data("x", d.clone());
    let mut prev = "x".to_string();
    for i in 0..n {
        let name = format!("r{i}");
        b = b
            .node(Node::new(&name, "Relu").with_input(d.clone()).with_output(d.clone()))
            .connect(&prev, 0, &name, 0);
        prev = name;
    }
    b.build()
}
