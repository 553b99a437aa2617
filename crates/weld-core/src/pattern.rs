//! Declarative subgraph patterns.
//!
//! A [`Pattern`] is a small DAG over named roles. Each role accepts a set of op
//! types; edges say "role A produces input I of role B". Patterns are cheap to
//! build and are rebuilt for every pass invocation.

use crate::HashMap;
use std::collections::{BTreeSet, VecDeque};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("Pattern '{0}' declares no roles.")]
    Empty(String),
    #[error("Role '{0}' declared twice.")]
    DuplicateRole(String),
    #[error("Role '{0}' accepts no op types.")]
    EmptyOpTypes(String),
    #[error("Role '{role}' has invalid repeat bounds {min}..={max}.")]
    BadRepeat { role: String, min: usize, max: usize },
    #[error("Edge references undeclared role '{0}'.")]
    UnknownRole(String),
    #[error("Role '{0}' has an edge to itself.")]
    SelfEdge(String),
    #[error("Pattern '{0}' has no root role.")]
    NoRoot(String),
    #[error("Required role '{0}' is not reachable from any root.")]
    Unreachable(String),
    #[error("Output role '{0}' is not declared.")]
    UnknownOutput(String),
}

/// Index of a role within its [`Pattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleId(pub(crate) usize);

impl RoleId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A named slot in a pattern, filled by graph nodes of an acceptable op type.
#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub op_types: BTreeSet<String>,
    /// Optional roles may bind to zero nodes.
    pub required: bool,
    pub min_repeat: usize,
    pub max_repeat: usize,
}

impl Role {
    pub fn accepts(&self, op_type: &str) -> bool {
        self.op_types.contains(op_type)
    }

    /// Fewest nodes this role may bind to in a successful match.
    pub fn min_count(&self) -> usize {
        if self.required {
            self.min_repeat
        } else {
            0
        }
    }

    pub fn is_repeated(&self) -> bool {
        self.max_repeat > 1
    }
}

/// `src` output `src_output` feeds `dst` input `dst_input`.
///
/// A `dst_input` of `None` accepts any input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternEdge {
    pub src: RoleId,
    pub src_output: usize,
    pub dst: RoleId,
    pub dst_input: Option<usize>,
}

/// One step of the matcher's walk over the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WalkStep {
    /// Bind a root that no earlier step reaches, from scratch.
    Seed(RoleId),
    /// Bind the unbound end of `edge`. `forward` means the source is already bound.
    Follow { edge: usize, forward: bool },
}

/// Op types that are the same operator under different historical names.
#[derive(Debug, Clone, Default)]
pub struct OpAliases {
    groups: Vec<BTreeSet<String>>,
    index: HashMap<String, usize>,
}

impl OpAliases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `aliases` as spellings of `canonical`. Overlapping groups merge.
    pub fn insert<I, S>(&mut self, canonical: &str, aliases: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: BTreeSet<String> = aliases.into_iter().map(Into::into).collect();
        names.insert(canonical.to_string());

        let mut merged = BTreeSet::new();
        let mut absorbed: BTreeSet<usize> = names
            .iter()
            .filter_map(|n| self.index.get(n).copied())
            .collect();
        for &g in &absorbed {
            merged.extend(std::mem::take(&mut self.groups[g]));
        }
        merged.extend(names);

        let target = match absorbed.pop_first() {
            Some(g) => g,
            None => {
                self.groups.push(BTreeSet::new());
                self.groups.len() - 1
            }
        };
        for name in &merged {
            self.index.insert(name.clone(), target);
        }
        self.groups[target] = merged;
        self
    }

    pub fn with<I, S>(mut self, canonical: &str, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(canonical, aliases);
        self
    }

    /// Every spelling of `op_type`, including itself.
    pub fn expand(&self, op_type: &str) -> BTreeSet<String> {
        match self.index.get(op_type) {
            Some(&g) => self.groups[g].clone(),
            None => BTreeSet::from([op_type.to_string()]),
        }
    }
}

struct PendingEdge {
    src: String,
    src_output: usize,
    dst: String,
    dst_input: Option<usize>,
}

/// Incremental pattern declaration. Roles and edges may be declared in any
/// order; everything is checked in [`PatternBuilder::build`].
pub struct PatternBuilder {
    name: String,
    roles: Vec<Role>,
    edges: Vec<PendingEdge>,
    output: Option<String>,
    aliases: Option<OpAliases>,
}

impl PatternBuilder {
    fn push_role<I, S>(mut self, name: &str, op_types: I, required: bool, min: usize, max: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.push(Role {
            name: name.to_string(),
            op_types: op_types.into_iter().map(Into::into).collect(),
            required,
            min_repeat: min,
            max_repeat: max,
        });
        self
    }

    /// A required role bound to exactly one node.
    pub fn role<I, S>(self, name: &str, op_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_role(name, op_types, true, 1, 1)
    }

    /// A role bound to one node when present, to none otherwise.
    pub fn optional_role<I, S>(self, name: &str, op_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_role(name, op_types, false, 1, 1)
    }

    /// A required role bound to a chain of `min..=max` same-role nodes.
    pub fn repeated_role<I, S>(self, name: &str, op_types: I, min: usize, max: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_role(name, op_types, true, min, max)
    }

    /// `src` output 0 feeds input `dst_input` of `dst`.
    pub fn edge(self, src: &str, dst: &str, dst_input: usize) -> Self {
        self.edge_from(src, 0, dst, dst_input)
    }

    /// `src` output 0 feeds any input of `dst`.
    pub fn edge_any(mut self, src: &str, dst: &str) -> Self {
        self.edges.push(PendingEdge {
            src: src.to_string(),
            src_output: 0,
            dst: dst.to_string(),
            dst_input: None,
        });
        self
    }

    pub fn edge_from(mut self, src: &str, src_output: usize, dst: &str, dst_input: usize) -> Self {
        self.edges.push(PendingEdge {
            src: src.to_string(),
            src_output,
            dst: dst.to_string(),
            dst_input: Some(dst_input),
        });
        self
    }

    /// Mark the role whose outputs leave the matched subgraph.
    pub fn output(mut self, role: &str) -> Self {
        self.output = Some(role.to_string());
        self
    }

    /// Expand every role's op types to all known spellings at build time.
    pub fn aliases(mut self, aliases: &OpAliases) -> Self {
        self.aliases = Some(aliases.clone());
        self
    }

    pub fn build(self) -> Result<Pattern, PatternError> {
        let PatternBuilder {
            name,
            mut roles,
            edges,
            output,
            aliases,
        } = self;

        if roles.is_empty() {
            return Err(PatternError::Empty(name));
        }

        let mut role_index = HashMap::default();
        for (i, role) in roles.iter().enumerate() {
            if role_index.insert(role.name.clone(), RoleId(i)).is_some() {
                return Err(PatternError::DuplicateRole(role.name.clone()));
            }
            if role.op_types.is_empty() {
                return Err(PatternError::EmptyOpTypes(role.name.clone()));
            }
            if role.max_repeat == 0 || role.min_repeat > role.max_repeat {
                return Err(PatternError::BadRepeat {
                    role: role.name.clone(),
                    min: role.min_repeat,
                    max: role.max_repeat,
                });
            }
        }

        if let Some(aliases) = &aliases {
            for role in roles.iter_mut() {
                role.op_types = role
                    .op_types
                    .iter()
                    .flat_map(|t| aliases.expand(t))
                    .collect();
            }
        }

        let resolve = |role: &str| {
            role_index
                .get(role)
                .copied()
                .ok_or_else(|| PatternError::UnknownRole(role.to_string()))
        };

        let mut resolved = Vec::with_capacity(edges.len());
        for e in &edges {
            let src = resolve(&e.src)?;
            let dst = resolve(&e.dst)?;
            if src == dst {
                return Err(PatternError::SelfEdge(e.src.clone()));
            }
            resolved.push(PatternEdge {
                src,
                src_output: e.src_output,
                dst,
                dst_input: e.dst_input,
            });
        }

        let output = match output {
            Some(o) => Some(role_index.get(&o).copied().ok_or(PatternError::UnknownOutput(o))?),
            None => None,
        };

        let roots: Vec<RoleId> = (0..roles.len())
            .map(RoleId)
            .filter(|r| !resolved.iter().any(|e| e.dst == *r))
            .collect();
        if roots.is_empty() {
            return Err(PatternError::NoRoot(name));
        }

        let mut reachable = vec![false; roles.len()];
        let mut stack: Vec<RoleId> = roots.clone();
        while let Some(r) = stack.pop() {
            if std::mem::replace(&mut reachable[r.0], true) {
                continue;
            }
            stack.extend(resolved.iter().filter(|e| e.src == r).map(|e| e.dst));
        }
        if let Some(role) = roles
            .iter()
            .enumerate()
            .find(|(i, role)| role.required && !reachable[*i])
            .map(|(_, role)| role)
        {
            return Err(PatternError::Unreachable(role.name.clone()));
        }

        // Required roles seed before optional ones, so an absent optional
        // root is reached backwards and binds empty.
        let needed = |r: &RoleId| roles[r.0].min_count() > 0;
        let seeds: Vec<RoleId> = roots
            .iter()
            .copied()
            .filter(needed)
            .chain((0..roles.len()).map(RoleId).filter(needed))
            .chain(roots.iter().copied())
            .collect();
        let walk = plan_walk(roles.len(), &resolved, &seeds);
        let seed = match walk.first() {
            Some(WalkStep::Seed(role)) => *role,
            _ => roots[0],
        };

        Ok(Pattern {
            name,
            roles,
            edges: resolved,
            roots,
            seed,
            output,
            role_index,
            walk,
        })
    }
}

/// Breadth-first order over undirected pattern edges, seeding each of `seeds`
/// that no earlier step reached.
fn plan_walk(num_roles: usize, edges: &[PatternEdge], seeds: &[RoleId]) -> Vec<WalkStep> {
    let mut visited = vec![false; num_roles];
    let mut steps = Vec::with_capacity(num_roles);

    for &root in seeds {
        if visited[root.0] {
            continue;
        }
        visited[root.0] = true;
        steps.push(WalkStep::Seed(root));

        let mut queue = VecDeque::from([root]);
        while let Some(r) = queue.pop_front() {
            for (i, e) in edges.iter().enumerate() {
                if e.src == r && !visited[e.dst.0] {
                    visited[e.dst.0] = true;
                    steps.push(WalkStep::Follow {
                        edge: i,
                        forward: true,
                    });
                    queue.push_back(e.dst);
                } else if e.dst == r && !visited[e.src.0] {
                    visited[e.src.0] = true;
                    steps.push(WalkStep::Follow {
                        edge: i,
                        forward: false,
                    });
                    queue.push_back(e.src);
                }
            }
        }
    }
    steps
}

/// A validated pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    name: String,
    roles: Vec<Role>,
    edges: Vec<PatternEdge>,
    roots: Vec<RoleId>,
    seed: RoleId,
    output: Option<RoleId>,
    role_index: HashMap<String, RoleId>,
    walk: Vec<WalkStep>,
}

impl Pattern {
    pub fn builder(name: impl Into<String>) -> PatternBuilder {
        PatternBuilder {
            name: name.into(),
            roles: Vec::new(),
            edges: Vec::new(),
            output: None,
            aliases: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn role(&self, id: RoleId) -> &Role {
        &self.roles[id.0]
    }

    pub fn role_id(&self, name: &str) -> Option<RoleId> {
        self.role_index.get(name).copied()
    }

    pub fn edges(&self) -> &[PatternEdge] {
        &self.edges
    }

    /// Roles with no incoming pattern edge, in declaration order.
    pub fn roots(&self) -> &[RoleId] {
        &self.roots
    }

    /// Role whose candidates start a match: the first required root, else the
    /// first required role, else the first root.
    pub fn seed_role(&self) -> RoleId {
        self.seed
    }

    pub fn output(&self) -> Option<RoleId> {
        self.output
    }

    pub(crate) fn walk(&self) -> &[WalkStep] {
        &self.walk
    }

    /// Whether any root role accepts `op_type`.
    pub fn is_root_type(&self, op_type: &str) -> bool {
        self.roots.iter().any(|r| self.roles[r.0].accepts(op_type))
    }
}
