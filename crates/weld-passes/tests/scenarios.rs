mod common;

use anyhow::Context;
use common::*;
use weld::test_utils::{fresh_session, run_buffer_fusion_pass, run_graph_fusion_pass};
use weld::{
    shape, Candidates, Format, FusionConfig, FusionEngine, FusionInfo, FusionKind, FusionStatsRegistry, GraphBuilder,
    InferShapeAndType, Node, OutAnchor, PassType, Status, TensorDesc,
};
use weld_passes::{
    builtin_inference, Conv2DBiasAddFusionPass, MatMulBiasAddFusionPass, MatmulEltwiseBufferFusionPass,
    ZConcatv2dFusionPass,
};

#[test]
fn conv2d_absorbs_bias_and_keeps_fanout() -> anyhow::Result<()> {
    init();
    let registry = registry();
    let oracle = oracle()?;
    let mut graph = conv_bias_fanout(16)?;
    assert_eq!(count(&graph, "BiasAdd"), 1);

    let run = run_graph_fusion_pass(
        &registry,
        &oracle,
        Conv2DBiasAddFusionPass::NAME,
        PassType::GraphFusion,
        &mut graph,
    );
    assert_eq!(run.status, Status::Success);
    assert_eq!(
        run.stats.get(FusionKind::Graph, Conv2DBiasAddFusionPass::NAME),
        FusionInfo {
            match_times: 1,
            effect_times: 1
        }
    );

    graph.validate()?;
    assert_eq!(count(&graph, "BiasAdd"), 0);
    let conv_id = graph.find_node("conv").context("fused conv")?;
    let conv = graph.node(conv_id).context("fused conv")?;
    assert_eq!(conv.op_type(), "Conv2D");
    assert_eq!(conv.num_inputs(), 3);
    assert_eq!(conv.attrs().get_str("data_format"), Some("NCHW"));

    let bias = graph.find_node("bias").context("bias")?;
    assert_eq!(graph.in_nodes(conv_id)[2], bias);
    let readers: Vec<_> = graph
        .consumers(OutAnchor::new(conv_id, 0))
        .iter()
        .filter_map(|a| graph.node(a.node).map(|n| n.name().to_string()))
        .collect();
    assert_eq!(readers.len(), 2);
    assert!(readers.contains(&"left".to_string()) && readers.contains(&"right".to_string()));
    Ok(())
}

#[test]
fn conv2d_bias_length_mismatch_is_left_alone() -> anyhow::Result<()> {
    init();
    let registry = registry();
    let oracle = oracle()?;
    let mut graph = conv_bias_fanout(16)?;
    let bias_add = graph.find_node("conv_bias").context("bias_add")?;
    graph
        .node_mut(bias_add)
        .context("bias_add")?
        .set_input_desc(1, f32_desc(shape![8], weld::Format::ND));
    let before = graph.summary();

    let run = run_graph_fusion_pass(
        &registry,
        &oracle,
        Conv2DBiasAddFusionPass::NAME,
        PassType::GraphFusion,
        &mut graph,
    );
    assert_eq!(run.status, Status::NotChanged);
    assert_eq!(graph.summary(), before);
    Ok(())
}

#[test]
fn matmul_absorbs_bias() -> anyhow::Result<()> {
    init();
    let registry = registry();
    let oracle = oracle()?;
    let mut graph = matmul_bias(shape![4, 16], 16)?;

    let run = run_graph_fusion_pass(
        &registry,
        &oracle,
        MatMulBiasAddFusionPass::NAME,
        PassType::GraphFusion,
        &mut graph,
    );
    assert_eq!(run.status, Status::Success);
    graph.validate()?;
    assert_eq!(count(&graph, "BiasAdd"), 0);

    let mm = graph.node(graph.find_node("mm").context("mm")?).context("mm")?;
    assert_eq!(mm.op_type(), "MatMulV2");
    assert_eq!(mm.num_inputs(), 3);
    assert_eq!(mm.attrs().get_bool("has_bias"), Some(true));
    assert_eq!(mm.output(0).context("output")?.shape, shape![4, 16]);

    let act = graph.find_node("act").context("act")?;
    assert_eq!(graph.in_nodes(act), [graph.find_node("mm").context("mm")?]);

    let again = run_graph_fusion_pass(
        &registry,
        &oracle,
        MatMulBiasAddFusionPass::NAME,
        PassType::GraphFusion,
        &mut graph,
    );
    assert_eq!(again.status, Status::NotChanged);
    Ok(())
}

#[test]
fn nested_concat_flattens_into_one() -> anyhow::Result<()> {
    init();
    let registry = registry();
    let oracle = oracle()?;
    let mut graph = nested_concat(30, 30)?;
    assert_eq!(count(&graph, "ConcatV2D"), 2);

    let run = run_graph_fusion_pass(
        &registry,
        &oracle,
        ZConcatv2dFusionPass::NAME,
        PassType::SecondRoundGraphFusion,
        &mut graph,
    );
    assert_eq!(run.status, Status::Success);
    graph.validate()?;
    assert_eq!(count(&graph, "ConcatV2D"), 1);

    let outer_id = graph.find_node("outer").context("outer")?;
    let outer = graph.node(outer_id).context("outer")?;
    assert_eq!(outer.num_inputs(), 60);
    assert_eq!(outer.attrs().get_int("N"), Some(60));
    assert_eq!(outer.attrs().get_int("concat_dim"), Some(1));

    let producers: Vec<String> = graph
        .in_nodes(outer_id)
        .into_iter()
        .filter_map(|id| graph.node(id).map(|n| n.name().to_string()))
        .collect();
    assert_eq!(producers.first().map(String::as_str), Some("a0"));
    assert_eq!(producers.get(29).map(String::as_str), Some("a29"));
    assert_eq!(producers.get(30).map(String::as_str), Some("b0"));
    Ok(())
}

#[test]
fn nested_concat_over_the_input_limit_is_kept() -> anyhow::Result<()> {
    init();
    let registry = registry();
    let oracle = oracle()?;
    let mut graph = nested_concat(40, 30)?;
    let before = graph.summary();

    let run = run_graph_fusion_pass(
        &registry,
        &oracle,
        ZConcatv2dFusionPass::NAME,
        PassType::SecondRoundGraphFusion,
        &mut graph,
    );
    assert_eq!(run.status, Status::NotChanged);
    assert_eq!(
        run.stats.get(FusionKind::Graph, ZConcatv2dFusionPass::NAME),
        FusionInfo {
            match_times: 1,
            effect_times: 0
        }
    );
    assert_eq!(graph.summary(), before);
    Ok(())
}

#[test]
fn buffer_fusion_groups_matmul_with_eltwise() -> anyhow::Result<()> {
    init();
    let registry = registry();
    let oracle = oracle()?;
    let graph = matmul_add()?;
    let mm = graph.find_node("mm").context("mm")?;
    let add = graph.find_node("add").context("add")?;

    let candidates = graph.partition_by_op_type();
    let run = run_buffer_fusion_pass(
        &registry,
        &oracle,
        MatmulEltwiseBufferFusionPass::NAME,
        &graph,
        &candidates,
    );
    assert_eq!(run.outcome.status, Status::Success);
    assert_eq!(run.outcome.groups, [vec![mm, add]]);
    assert_eq!(
        run.stats.get(FusionKind::Buffer, MatmulEltwiseBufferFusionPass::NAME),
        FusionInfo {
            match_times: 1,
            effect_times: 1
        }
    );

    for emptied in ["MatMul", "Add"] {
        let mut narrowed: Candidates = candidates.clone();
        narrowed.insert(emptied.to_string(), Vec::new());
        let run = run_buffer_fusion_pass(
            &registry,
            &oracle,
            MatmulEltwiseBufferFusionPass::NAME,
            &graph,
            &narrowed,
        );
        assert_eq!(run.outcome.status, Status::Failed, "without {emptied}");
        assert!(run.outcome.fusion_nodes().is_empty());
    }
    Ok(())
}

#[test]
fn one_session_accumulates_across_graphs() -> anyhow::Result<()> {
    init();
    let registry = registry();
    let oracle = oracle()?;
    let stats = FusionStatsRegistry::new();
    let session = fresh_session("two_graphs");
    let engine = FusionEngine::new(&registry, &oracle, &stats, FusionConfig::with_session(&session));

    for _ in 0..2 {
        let mut graph = matmul_bias(shape![4, 16], 16)?;
        let status = engine.run_pass(MatMulBiasAddFusionPass::NAME, PassType::GraphFusion, &mut graph);
        assert_eq!(status, Status::Success);
    }

    let counts = stats.snapshot(&session).get(FusionKind::Graph, MatMulBiasAddFusionPass::NAME);
    assert_eq!(counts.match_times, 2);
    assert_eq!(counts.effect_times, 2);

    let drained = stats.get_and_clear(&session);
    assert!(!drained.is_empty());
    assert!(stats.get_and_clear(&session).is_empty());
    Ok(())
}

#[test]
fn run_all_drives_every_round() -> anyhow::Result<()> {
    init();
    let registry = registry();
    let oracle = oracle()?;
    let stats = FusionStatsRegistry::new();
    let session = fresh_session("run_all");
    let engine = FusionEngine::new(&registry, &oracle, &stats, FusionConfig::with_session(&session));

    let mut graph = matmul_bias(shape![4, 16], 16)?;
    assert_eq!(engine.run_all(&mut graph), Status::Success);
    graph.validate()?;
    assert_eq!(count(&graph, "BiasAdd"), 0);

    let mut concat = nested_concat(3, 2)?;
    assert_eq!(engine.run_all(&mut concat), Status::Success);
    concat.validate()?;
    assert_eq!(count(&concat, "ConcatV2D"), 1);

    let session_stats = stats.get_and_clear(&session);
    assert_eq!(
        session_stats
            .get(FusionKind::Graph, MatMulBiasAddFusionPass::NAME)
            .effect_times,
        1
    );
    assert_eq!(
        session_stats
            .get(FusionKind::Graph, ZConcatv2dFusionPass::NAME)
            .effect_times,
        1
    );
    Ok(())
}

fn pending(name: &str, op_type: &str, inputs: usize) -> Node {
    Node::new(name, op_type)
        .with_inputs(vec![TensorDesc::undefined(); inputs])
        .with_output(TensorDesc::undefined())
}

#[test]
fn inferred_descriptors_drive_bias_fusion() -> anyhow::Result<()> {
    init();
    let registry = registry();
    let oracle = oracle()?;
    let mut graph = GraphBuilder::new("inferred_matmul_bias")
        .data("x", f32_desc(shape![4, 8], Format::ND))
        .constant("w", f32_desc(shape![16, 8], Format::ND))
        .constant("bias", f32_desc(shape![16], Format::ND))
        .node(pending("mm", "MatMul", 2).with_attr("transpose_b", true))
        .node(pending("mm_bias", "BiasAdd", 2))
        .node(pending("act", "Relu", 1))
        .connect("x", 0, "mm", 0)
        .connect("w", 0, "mm", 1)
        .connect("mm", 0, "mm_bias", 0)
        .connect("bias", 0, "mm_bias", 1)
        .connect("mm_bias", 0, "act", 0)
        .build()?;

    let untouched = run_graph_fusion_pass(
        &registry,
        &oracle,
        MatMulBiasAddFusionPass::NAME,
        PassType::GraphFusion,
        &mut graph,
    );
    assert_eq!(untouched.status, Status::NotChanged);

    builtin_inference().infer_shape_and_type(&mut graph)?;
    let run = run_graph_fusion_pass(
        &registry,
        &oracle,
        MatMulBiasAddFusionPass::NAME,
        PassType::GraphFusion,
        &mut graph,
    );
    assert_eq!(run.status, Status::Success);
    graph.validate()?;
    assert_eq!(count(&graph, "BiasAdd"), 0);

    let mm = graph.node(graph.find_node("mm").context("mm")?).context("mm")?;
    assert_eq!(mm.num_inputs(), 3);
    assert_eq!(mm.output(0).context("output")?.shape, shape![4, 16]);
    assert_eq!(mm.input(2).context("bias input")?.shape, shape![16]);
    Ok(())
}

#[test]
fn inferred_descriptors_drive_concat_flattening() -> anyhow::Result<()> {
    init();
    let registry = registry();
    let oracle = oracle()?;
    let piece = f32_desc(shape![2, 3], Format::ND);
    let mut graph = GraphBuilder::new("inferred_concat")
        .data("a", piece.clone())
        .data("b", piece.clone())
        .data("c", piece)
        .node(pending("inner", "ConcatV2D", 2).with_attr("concat_dim", 1i64))
        .node(pending("outer", "ConcatV2D", 2).with_attr("concat_dim", -1i64))
        .node(pending("sink", "Relu", 1))
        .connect("a", 0, "inner", 0)
        .connect("b", 0, "inner", 1)
        .connect("inner", 0, "outer", 0)
        .connect("c", 0, "outer", 1)
        .connect("outer", 0, "sink", 0)
        .build()?;

    builtin_inference().infer_shape_and_type(&mut graph)?;
    let outer_id = graph.find_node("outer").context("outer")?;
    assert_eq!(
        graph.node(outer_id).context("outer")?.output(0).context("output")?.shape,
        shape![2, 9]
    );

    let run = run_graph_fusion_pass(
        &registry,
        &oracle,
        ZConcatv2dFusionPass::NAME,
        PassType::SecondRoundGraphFusion,
        &mut graph,
    );
    assert_eq!(run.status, Status::Success);
    graph.validate()?;
    assert_eq!(count(&graph, "ConcatV2D"), 1);

    let outer = graph.node(graph.find_node("outer").context("outer")?).context("outer")?;
    assert_eq!(outer.num_inputs(), 3);
    assert_eq!(outer.attrs().get_int("N"), Some(3));
    assert_eq!(outer.output(0).context("output")?.shape, shape![2, 9]);
    Ok(())
}
