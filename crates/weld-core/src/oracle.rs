//! Capability oracle: may this node run on the target?

use crate::{HashMap, ImplKind, Node, OpCatalog};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Support {
    Supported,
    Unsupported { reason: String },
}

impl Support {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Support::Unsupported {
            reason: reason.into(),
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Support::Supported)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpInfo {
    pub op_type: String,
    pub impl_kind: ImplKind,
    pub framework_names: Vec<String>,
}

/// The target's kernel-info store. Verdicts must be pure.
pub trait OpsKernelInfoStore: Send + Sync {
    fn check_supported(&self, node: &Node) -> Support;

    /// Every op type the store knows about.
    fn all_ops_kernel_info(&self) -> BTreeMap<String, OpInfo>;
}

/// Accepts every node.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl OpsKernelInfoStore for AcceptAll {
    fn check_supported(&self, _: &Node) -> Support {
        Support::Supported
    }

    fn all_ops_kernel_info(&self) -> BTreeMap<String, OpInfo> {
        BTreeMap::new()
    }
}

/// Per-op-type refinement on top of the catalog answer, e.g. a dtype or rank limit.
pub type SupportPredicate = Arc<dyn Fn(&Node) -> Support + Send + Sync>;

/// Answers from an [`OpCatalog`]: an op type is supported when a compiled
/// kernel is registered for it and its predicate, if any, accepts the node.
#[derive(Clone)]
pub struct CatalogKernelInfoStore {
    catalog: Arc<OpCatalog>,
    predicates: HashMap<String, SupportPredicate>,
}

impl CatalogKernelInfoStore {
    pub fn new(catalog: Arc<OpCatalog>) -> Self {
        Self {
            catalog,
            predicates: HashMap::default(),
        }
    }

    pub fn with_predicate<F>(mut self, op_type: &str, f: F) -> Self
    where
        F: Fn(&Node) -> Support + Send + Sync + 'static,
    {
        self.predicates.insert(op_type.to_string(), Arc::new(f));
        self
    }

    pub fn catalog(&self) -> &OpCatalog {
        &self.catalog
    }
}

impl OpsKernelInfoStore for CatalogKernelInfoStore {
    fn check_supported(&self, node: &Node) -> Support {
        if !self.catalog.supports_op_type(node.op_type()) {
            return Support::unsupported(format!("no compiled kernel for {}", node.op_type()));
        }
        match self.predicates.get(node.op_type()) {
            Some(predicate) => predicate(node),
            None => Support::Supported,
        }
    }

    fn all_ops_kernel_info(&self) -> BTreeMap<String, OpInfo> {
        let mut infos = BTreeMap::new();
        for reg in self.catalog.registrations() {
            for op_type in &reg.op_types {
                let info = infos.entry(op_type.clone()).or_insert_with(|| OpInfo {
                    op_type: op_type.clone(),
                    impl_kind: reg.impl_kind,
                    framework_names: Vec::new(),
                });
                if reg.impl_kind == ImplKind::CompiledKernel {
                    info.impl_kind = ImplKind::CompiledKernel;
                }
                info.framework_names.extend(reg.framework_names.iter().cloned());
            }
        }
        infos
    }
}

/// Wraps another store and remembers every verdict it hands out.
pub struct RecordingOracle<'a> {
    inner: &'a dyn OpsKernelInfoStore,
    verdicts: Mutex<Vec<(String, bool)>>,
}

impl<'a> RecordingOracle<'a> {
    pub fn new(inner: &'a dyn OpsKernelInfoStore) -> Self {
        Self {
            inner,
            verdicts: Mutex::new(Vec::new()),
        }
    }

    /// `(node name, supported)` in call order.
    pub fn verdicts(&self) -> Vec<(String, bool)> {
        self.verdicts.lock().clone()
    }
}

impl OpsKernelInfoStore for RecordingOracle<'_> {
    fn check_supported(&self, node: &Node) -> Support {
        let verdict = self.inner.check_supported(node);
        self.verdicts
            .lock()
            .push((node.name().to_string(), verdict.is_supported()));
        verdict
    }

    fn all_ops_kernel_info(&self) -> BTreeMap<String, OpInfo> {
        self.inner.all_ops_kernel_info()
    }
}
