//! Helpers for pass tests: run one pass in a fresh statistics session and hand
//! back the status together with that session's counters.

use crate::{
    BufferFusionOutcome, Candidates, FusionConfig, FusionEngine, FusionStatsRegistry, Graph,
    OpsKernelInfoStore, PassRegistry, PassType, SessionStats, Status,
};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(0);

/// A session id no other caller of this function has seen.
pub fn fresh_session(prefix: &str) -> String {
    format!("{}-{}", prefix, NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug)]
pub struct PassRun {
    pub status: Status,
    pub stats: SessionStats,
}

#[derive(Debug)]
pub struct BufferPassRun {
    pub outcome: BufferFusionOutcome,
    pub stats: SessionStats,
}

fn engine<'a>(registry: &'a PassRegistry, oracle: &'a dyn OpsKernelInfoStore, session: &str) -> FusionEngine<'a> {
    FusionEngine::new(
        registry,
        oracle,
        FusionStatsRegistry::global(),
        FusionConfig::with_session(session),
    )
}

pub fn run_graph_fusion_pass(
    registry: &PassRegistry,
    oracle: &dyn OpsKernelInfoStore,
    name: &str,
    pass_type: PassType,
    graph: &mut Graph,
) -> PassRun {
    let session = fresh_session(name);
    let status = engine(registry, oracle, &session).run_pass(name, pass_type, graph);
    PassRun {
        status,
        stats: FusionStatsRegistry::global().get_and_clear(&session),
    }
}

pub fn run_graph_fusion_pass_expect_support(
    registry: &PassRegistry,
    oracle: &dyn OpsKernelInfoStore,
    name: &str,
    pass_type: PassType,
    graph: &mut Graph,
    expect_supported: bool,
) -> PassRun {
    let session = fresh_session(name);
    let status = engine(registry, oracle, &session).run_pass_expect_support(
        name,
        pass_type,
        graph,
        expect_supported,
    );
    PassRun {
        status,
        stats: FusionStatsRegistry::global().get_and_clear(&session),
    }
}

pub fn run_buffer_fusion_pass(
    registry: &PassRegistry,
    oracle: &dyn OpsKernelInfoStore,
    name: &str,
    graph: &Graph,
    candidates: &Candidates,
) -> BufferPassRun {
    let session = fresh_session(name);
    let outcome = engine(registry, oracle, &session).run_buffer_fusion(name, graph, candidates);
    BufferPassRun {
        outcome,
        stats: FusionStatsRegistry::global().get_and_clear(&session),
    }
}
