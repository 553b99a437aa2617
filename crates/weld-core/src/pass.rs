//! Fusion pass interfaces and the pass registry.

use crate::{FusedNodeSpec, FusionKind, Graph, Mapping, NodeId, Pattern};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PassType {
    GraphFusion,
    /// Runs once all first-round graph fusion has reached a fixed point.
    SecondRoundGraphFusion,
    BufferFusion,
}

impl PassType {
    pub fn fusion_kind(&self) -> FusionKind {
        match self {
            PassType::GraphFusion | PassType::SecondRoundGraphFusion => FusionKind::Graph,
            PassType::BufferFusion => FusionKind::Buffer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PassType::GraphFusion => "graph fusion",
            PassType::SecondRoundGraphFusion => "second-round graph fusion",
            PassType::BufferFusion => "buffer fusion",
        }
    }
}

impl fmt::Display for PassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pass that collapses each match into one node.
pub trait GraphFusionPass: Send + Sync {
    fn name(&self) -> &str;

    fn define_patterns(&self) -> anyhow::Result<Vec<Pattern>>;

    /// The node replacing `mapping`, or `None` to leave this match alone.
    /// A skipped match still counts as matched.
    fn replacement(&self, graph: &Graph, mapping: &Mapping) -> anyhow::Result<Option<FusedNodeSpec>>;
}

/// A pass that groups matched nodes for shared on-chip scheduling.
pub trait BufferFusionPass: Send + Sync {
    fn name(&self) -> &str;

    fn define_patterns(&self) -> anyhow::Result<Vec<Pattern>>;

    /// Nodes of `mapping` that form the fusion group.
    fn fusion_nodes(&self, _graph: &Graph, mapping: &Mapping) -> anyhow::Result<Vec<NodeId>> {
        Ok(mapping.all_nodes())
    }
}

pub enum FusionPass {
    Graph(Box<dyn GraphFusionPass>),
    Buffer(Box<dyn BufferFusionPass>),
}

impl FusionPass {
    pub fn name(&self) -> &str {
        match self {
            FusionPass::Graph(p) => p.name(),
            FusionPass::Buffer(p) => p.name(),
        }
    }
}

impl fmt::Debug for FusionPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FusionPass::Graph(p) => write!(f, "FusionPass::Graph({})", p.name()),
            FusionPass::Buffer(p) => write!(f, "FusionPass::Buffer({})", p.name()),
        }
    }
}

/// Builds a fresh pass instance per invocation.
pub type PassFactory = Arc<dyn Fn() -> FusionPass + Send + Sync>;

static GLOBAL_PASSES: Lazy<PassRegistry> = Lazy::new(PassRegistry::new);

/// Pass factories keyed by `(name, pass type)`, filled by explicit registration.
#[derive(Default)]
pub struct PassRegistry {
    passes: RwLock<BTreeMap<(String, PassType), PassFactory>>,
}

impl PassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry for callers that do not keep their own.
    pub fn global() -> &'static PassRegistry {
        &GLOBAL_PASSES
    }

    fn insert(&self, name: &str, pass_type: PassType, factory: PassFactory) {
        let key = (name.to_string(), pass_type);
        if self.passes.write().insert(key, factory).is_some() {
            log::warn!("pass '{}' ({}) re-registered, replacing factory", name, pass_type);
        } else {
            log::debug!("registered pass '{}' ({})", name, pass_type);
        }
    }

    /// Register a graph-fusion pass for the first or second round.
    pub fn register_graph_pass<P, F>(&self, name: &str, pass_type: PassType, factory: F)
    where
        P: GraphFusionPass + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        if pass_type == PassType::BufferFusion {
            log::error!("'{}' is a graph-fusion pass and cannot register as {}", name, pass_type);
            return;
        }
        self.insert(
            name,
            pass_type,
            Arc::new(move || FusionPass::Graph(Box::new(factory()))),
        );
    }

    pub fn register_buffer_pass<P, F>(&self, name: &str, factory: F)
    where
        P: BufferFusionPass + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.insert(
            name,
            PassType::BufferFusion,
            Arc::new(move || FusionPass::Buffer(Box::new(factory()))),
        );
    }

    pub fn create(&self, name: &str, pass_type: PassType) -> Option<FusionPass> {
        let factory = self
            .passes
            .read()
            .get(&(name.to_string(), pass_type))
            .cloned()?;
        Some(factory())
    }

    pub fn contains(&self, name: &str, pass_type: PassType) -> bool {
        self.passes
            .read()
            .contains_key(&(name.to_string(), pass_type))
    }

    /// Registered names of `pass_type`, sorted.
    pub fn names(&self, pass_type: PassType) -> Vec<String> {
        self.passes
            .read()
            .keys()
            .filter(|(_, t)| *t == pass_type)
            .map(|(name, _)| name.clone())
            .collect()
    }
}
