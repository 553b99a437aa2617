//! Resolving passes by name and running them against a graph.
//!
//! Every pass runs against a working copy of the graph. The copy replaces the
//! caller's graph only when the pass changed something and did not fail, so a
//! pass is applied entirely or not at all. Errors stop here: callers only ever
//! see a [`Status`].

use crate::{
    BufferFusionPass, BufferMatcher, Candidates, FusionConfig, FusionError, FusionInfo, FusionPass, FusionStatsRegistry, Graph, GraphFusionPass, GraphMatcher, HashSet, NodeId,
    OpsKernelInfoStore, PartialAcceptPolicy, PassRegistry, PassType, RecordingOracle, RewritePlan,
    Support,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
    Success,
    NotChanged,
    Failed,
}

impl Status {
    /// Failure dominates, then success.
    pub fn combine(self, other: Status) -> Status {
        match (self, other) {
            (Status::Failed, _) | (_, Status::Failed) => Status::Failed,
            (Status::Success, _) | (_, Status::Success) => Status::Success,
            _ => Status::NotChanged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferFusionOutcome {
    pub status: Status,
    /// One entry per accepted match: the nodes to schedule on a shared buffer.
    pub groups: Vec<Vec<NodeId>>,
}

impl BufferFusionOutcome {
    /// Every fusion node across all groups.
    pub fn fusion_nodes(&self) -> Vec<NodeId> {
        self.groups.iter().flatten().copied().collect()
    }
}

/// Result of running one pass, before anything is committed.
struct Execution {
    status: Status,
    graph: Option<Graph>,
    counts: FusionInfo,
    groups: Vec<Vec<NodeId>>,
}

impl Execution {
    fn unchanged(status: Status) -> Self {
        Self {
            status,
            graph: None,
            counts: FusionInfo::default(),
            groups: Vec::new(),
        }
    }
}

pub struct FusionEngine<'a> {
    registry: &'a PassRegistry,
    oracle: &'a dyn OpsKernelInfoStore,
    stats: &'a FusionStatsRegistry,
    config: FusionConfig,
}

impl<'a> FusionEngine<'a> {
    pub fn new(
        registry: &'a PassRegistry,
        oracle: &'a dyn OpsKernelInfoStore,
        stats: &'a FusionStatsRegistry,
        config: FusionConfig,
    ) -> Self {
        Self {
            registry,
            oracle,
            stats,
            config,
        }
    }

    /// An engine over the process-wide pass and statistics registries.
    pub fn with_globals(oracle: &'a dyn OpsKernelInfoStore, config: FusionConfig) -> Self {
        Self::new(PassRegistry::global(), oracle, FusionStatsRegistry::global(), config)
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn session(&self) -> &str {
        &self.config.session_id
    }

    /// Run the pass registered as `(name, pass_type)` against `graph`.
    pub fn run_pass(&self, name: &str, pass_type: PassType, graph: &mut Graph) -> Status {
        let execution = self.execute(name, pass_type, graph, None, self.oracle, self.config.check_support);
        self.commit(name, pass_type, execution, graph)
    }

    /// Like [`FusionEngine::run_pass`], but always consults the oracle and
    /// fails, committing nothing, if any verdict differs from `expect_supported`.
    pub fn run_pass_expect_support(
        &self,
        name: &str,
        pass_type: PassType,
        graph: &mut Graph,
        expect_supported: bool,
    ) -> Status {
        let recorder = RecordingOracle::new(self.oracle);
        let execution = self.execute(name, pass_type, graph, None, &recorder, true);
        if execution.status == Status::Failed {
            return Status::Failed;
        }
        if let Some((node, actual)) = recorder
            .verdicts()
            .into_iter()
            .find(|(_, supported)| *supported != expect_supported)
        {
            let err = FusionError::SupportMismatch {
                expected: expect_supported,
                actual,
            };
            log::error!("pass '{}' at '{}': {}", name, node, err);
            return Status::Failed;
        }
        self.commit(name, pass_type, execution, graph)
    }

    /// Run a buffer-fusion pass over caller-chosen candidates.
    ///
    /// Reports `Failed` when no fusion group results.
    pub fn run_buffer_fusion(&self, name: &str, graph: &Graph, candidates: &Candidates) -> BufferFusionOutcome {
        let execution = self.execute(
            name,
            PassType::BufferFusion,
            graph,
            Some(candidates),
            self.oracle,
            self.config.check_support,
        );
        self.record(name, PassType::BufferFusion, execution.counts);
        BufferFusionOutcome {
            status: execution.status,
            groups: execution.groups,
        }
    }

    /// First-round passes to a fixed point, second-round passes once, then
    /// buffer fusion over the resulting graph.
    pub fn run_all(&self, graph: &mut Graph) -> Status {
        let mut overall = Status::NotChanged;

        let first_round = self.registry.names(PassType::GraphFusion);
        let mut converged = first_round.is_empty();
        for iteration in 0..self.config.max_first_round_iterations {
            let mut changed = false;
            for name in &first_round {
                let status = self.run_pass(name, PassType::GraphFusion, graph);
                changed |= status == Status::Success;
                overall = overall.combine(status);
            }
            if !changed {
                log::debug!("first round converged after {} sweeps", iteration + 1);
                converged = true;
                break;
            }
        }
        if !converged {
            log::warn!(
                "first round still changing after {} sweeps",
                self.config.max_first_round_iterations
            );
        }

        for name in self.registry.names(PassType::SecondRoundGraphFusion) {
            overall = overall.combine(self.run_pass(&name, PassType::SecondRoundGraphFusion, graph));
        }

        let candidates = graph.partition_by_op_type();
        for name in self.registry.names(PassType::BufferFusion) {
            let outcome = self.run_buffer_fusion(&name, graph, &candidates);
            // An empty group list only means the pattern is absent here.
            if !outcome.groups.is_empty() {
                overall = overall.combine(Status::Success);
            }
        }

        log::info!("fusion session '{}' finished: {:?}", self.session(), overall);
        overall
    }

    fn execute(
        &self,
        name: &str,
        pass_type: PassType,
        graph: &Graph,
        candidates: Option<&Candidates>,
        oracle: &dyn OpsKernelInfoStore,
        check: bool,
    ) -> Execution {
        let Some(pass) = self.registry.create(name, pass_type) else {
            let err = FusionError::UnknownPass {
                name: name.to_string(),
                pass_type: pass_type.to_string(),
            };
            log::error!("{}", err);
            return Execution::unchanged(Status::Failed);
        };
        if !self.config.switch.is_enabled(pass_type.fusion_kind(), name) {
            log::info!("pass '{}' is switched off", name);
            return Execution::unchanged(Status::NotChanged);
        }

        match pass {
            FusionPass::Graph(pass) => {
                let mut work = graph.clone();
                match self.fuse_graph(pass.as_ref(), &mut work, oracle, check) {
                    Ok(counts) if counts.effect_times > 0 => Execution {
                        status: Status::Success,
                        graph: Some(work),
                        counts,
                        groups: Vec::new(),
                    },
                    Ok(counts) => Execution {
                        counts,
                        ..Execution::unchanged(Status::NotChanged)
                    },
                    Err(e) => {
                        log::error!("pass '{}' failed: {}", name, e);
                        Execution::unchanged(Status::Failed)
                    }
                }
            }
            FusionPass::Buffer(pass) => {
                let partition;
                let candidates = match candidates {
                    Some(c) => c,
                    None => {
                        partition = graph.partition_by_op_type();
                        &partition
                    }
                };
                match self.fuse_buffers(pass.as_ref(), graph, candidates, oracle, check) {
                    Ok((counts, groups)) if groups.is_empty() => {
                        log::error!("{}", FusionError::EmptyFusionNodes(name.to_string()));
                        Execution {
                            counts,
                            ..Execution::unchanged(Status::Failed)
                        }
                    }
                    Ok((counts, groups)) => Execution {
                        status: Status::Success,
                        graph: None,
                        counts,
                        groups,
                    },
                    Err(e) => {
                        log::error!("pass '{}' failed: {}", name, e);
                        Execution::unchanged(Status::Failed)
                    }
                }
            }
        }
    }

    fn commit(&self, name: &str, pass_type: PassType, execution: Execution, graph: &mut Graph) -> Status {
        self.record(name, pass_type, execution.counts);
        if let Some(work) = execution.graph {
            *graph = work;
        }
        execution.status
    }

    fn record(&self, name: &str, pass_type: PassType, counts: FusionInfo) {
        if counts.match_times > 0 || counts.effect_times > 0 {
            self.stats
                .accumulate(self.session(), pass_type.fusion_kind(), name, counts);
            log::info!(
                "pass '{}': matched {}, effected {}",
                name,
                counts.match_times,
                counts.effect_times
            );
        }
    }

    fn fuse_graph(
        &self,
        pass: &dyn GraphFusionPass,
        graph: &mut Graph,
        oracle: &dyn OpsKernelInfoStore,
        check: bool,
    ) -> Result<FusionInfo, FusionError> {
        let patterns = pass.define_patterns()?;
        let mut counts = FusionInfo::default();
        let mut consumed: HashSet<NodeId> = HashSet::default();

        for pattern in &patterns {
            let matcher = GraphMatcher::new(pattern);
            while let Some(mapping) = matcher.next_match(graph, &consumed) {
                consumed.extend(mapping.all_nodes());
                counts.match_times += 1;

                let Some(spec) = pass.replacement(graph, &mapping)? else {
                    log::debug!("{}: rewrite skipped for {}", pass.name(), mapping.describe(graph));
                    continue;
                };
                if check {
                    if let Support::Unsupported { reason } = oracle.check_supported(&spec.to_node(graph)?) {
                        log::warn!("{}: '{}' rejected: {}", pass.name(), spec.name, reason);
                        continue;
                    }
                }
                let plan = match RewritePlan::new(graph, &mapping, &spec) {
                    Ok(plan) => plan,
                    Err(FusionError::NonConvex(at)) => {
                        log::warn!("{}: match re-enters at '{}', skipped", pass.name(), at);
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let fused = plan.apply(graph)?;
                consumed.insert(fused);
                counts.effect_times += 1;
            }
        }
        Ok(counts)
    }

    fn fuse_buffers(
        &self,
        pass: &dyn BufferFusionPass,
        graph: &Graph,
        candidates: &Candidates,
        oracle: &dyn OpsKernelInfoStore,
        check: bool,
    ) -> Result<(FusionInfo, Vec<Vec<NodeId>>), FusionError> {
        let patterns = pass.define_patterns()?;
        let mut counts = FusionInfo::default();
        let mut groups = Vec::new();
        let mut remaining = candidates.clone();

        for pattern in &patterns {
            let matches = BufferMatcher::new(pattern).find_matches(graph, &remaining);
            for mapping in &matches {
                counts.match_times += 1;
                let nodes = pass.fusion_nodes(graph, mapping)?;
                let accepted = if check {
                    self.accept_group(pass.name(), graph, nodes, oracle)
                } else {
                    nodes
                };
                if accepted.is_empty() {
                    continue;
                }
                counts.effect_times += 1;
                groups.push(accepted);
            }
            let used: HashSet<NodeId> = matches.iter().flat_map(|m| m.all_nodes()).collect();
            for ids in remaining.values_mut() {
                ids.retain(|id| !used.contains(id));
            }
        }
        Ok((counts, groups))
    }

    /// Apply the partial-acceptance policy to one fusion group.
    fn accept_group(
        &self,
        pass: &str,
        graph: &Graph,
        nodes: Vec<NodeId>,
        oracle: &dyn OpsKernelInfoStore,
    ) -> Vec<NodeId> {
        let mut accepted = Vec::with_capacity(nodes.len());
        for id in nodes {
            let Some(node) = graph.node(id) else { continue };
            match oracle.check_supported(node) {
                Support::Supported => accepted.push(id),
                Support::Unsupported { reason } => {
                    log::warn!("{}: '{}' rejected: {}", pass, node.name(), reason);
                    if self.config.partial_accept == PartialAcceptPolicy::RejectGroup {
                        return Vec::new();
                    }
                }
            }
        }
        accepted
    }
}
