use crate::{Graph, GraphError, NodeId, Pattern};

/// Pattern roles bound to concrete graph nodes.
///
/// A mapping is only meaningful against the graph generation it was computed
/// at. Any later mutation makes it stale; see [`Mapping::check_fresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pattern: String,
    generation: u64,
    /// Indexed by role id. Repeated roles hold their chain upstream first.
    bindings: Vec<(String, Vec<NodeId>)>,
}

impl Mapping {
    pub(crate) fn new(pattern: &Pattern, generation: u64, bound: Vec<Vec<NodeId>>) -> Self {
        let bindings = pattern
            .roles()
            .iter()
            .zip(bound)
            .map(|(role, nodes)| (role.name.clone(), nodes))
            .collect();
        Self {
            pattern: pattern.name().to_string(),
            generation,
            bindings,
        }
    }

    pub fn pattern_name(&self) -> &str {
        &self.pattern
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Nodes bound to `role`. Empty for unbound optional roles and unknown names.
    pub fn nodes(&self, role: &str) -> &[NodeId] {
        self.bindings
            .iter()
            .find(|(name, _)| name == role)
            .map(|(_, nodes)| nodes.as_slice())
            .unwrap_or(&[])
    }

    /// First node bound to `role`.
    pub fn node(&self, role: &str) -> Option<NodeId> {
        self.nodes(role).first().copied()
    }

    /// Last node bound to `role`. Differs from [`Mapping::node`] only for repeated roles.
    pub fn last(&self, role: &str) -> Option<NodeId> {
        self.nodes(role).last().copied()
    }

    pub fn roles(&self) -> impl Iterator<Item = (&str, &[NodeId])> {
        self.bindings
            .iter()
            .map(|(name, nodes)| (name.as_str(), nodes.as_slice()))
    }

    /// Every bound node, in role declaration order.
    pub fn all_nodes(&self) -> Vec<NodeId> {
        self.bindings
            .iter()
            .flat_map(|(_, nodes)| nodes.iter().copied())
            .collect()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.bindings.iter().any(|(_, nodes)| nodes.contains(&id))
    }

    /// Number of bound nodes.
    pub fn len(&self) -> usize {
        self.bindings.iter().map(|(_, nodes)| nodes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_fresh(&self, graph: &Graph) -> bool {
        self.generation == graph.generation()
    }

    pub fn check_fresh(&self, graph: &Graph) -> Result<(), GraphError> {
        if self.is_fresh(graph) {
            Ok(())
        } else {
            Err(GraphError::StaleMapping {
                mapping: self.generation,
                graph: graph.generation(),
            })
        }
    }

    /// `role=[name, ...]` pairs, for logging.
    pub fn describe(&self, graph: &Graph) -> String {
        let parts: Vec<String> = self
            .bindings
            .iter()
            .map(|(role, nodes)| {
                let names: Vec<&str> = nodes
                    .iter()
                    .map(|id| graph.node(*id).map_or("<removed>", |n| n.name()))
                    .collect();
                format!("{}=[{}]", role, names.join(", "))
            })
            .collect();
        format!("{}{{{}}}", self.pattern, parts.join(" "))
    }
}
