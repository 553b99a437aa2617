//! Read-only operator registration table.
//!
//! Maps framework operator names onto internal op types, together with the
//! function that translates framework attributes and the kind of
//! implementation backing the op on the target.

use crate::{Attrs, HashMap};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImplKind {
    /// Generic host implementation; never a fusion target.
    CpuFallback,
    /// Specialized kernel compiled for the target.
    CompiledKernel,
}

/// Translates framework attributes into the internal op's attributes.
pub type ParamMapFn = fn(&Attrs) -> anyhow::Result<Attrs>;

/// Attributes pass through unchanged.
pub fn identity_params(attrs: &Attrs) -> anyhow::Result<Attrs> {
    Ok(attrs.clone())
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Framework op '{0}' registered twice.")]
    DuplicateFrameworkName(String),
    #[error("Registration for '{0}' maps to no op type.")]
    NoOpType(String),
    #[error("Framework op '{0}' is not registered.")]
    Unregistered(String),
}

#[derive(Debug, Clone)]
pub struct OpRegistration {
    pub framework_names: Vec<String>,
    pub op_types: Vec<String>,
    pub param_map: ParamMapFn,
    pub impl_kind: ImplKind,
}

impl OpRegistration {
    /// `framework_name` maps to `op_type`, backed by a compiled kernel.
    pub fn new(framework_name: &str, op_type: &str) -> Self {
        Self {
            framework_names: vec![framework_name.to_string()],
            op_types: vec![op_type.to_string()],
            param_map: identity_params,
            impl_kind: ImplKind::CompiledKernel,
        }
    }

    /// Another framework spelling for the same registration.
    pub fn alias(mut self, framework_name: &str) -> Self {
        self.framework_names.push(framework_name.to_string());
        self
    }

    pub fn op_type(mut self, op_type: &str) -> Self {
        self.op_types.push(op_type.to_string());
        self
    }

    pub fn param_map(mut self, f: ParamMapFn) -> Self {
        self.param_map = f;
        self
    }

    pub fn impl_kind(mut self, kind: ImplKind) -> Self {
        self.impl_kind = kind;
        self
    }
}

/// Registrations indexed by framework name. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct OpCatalog {
    registrations: Vec<OpRegistration>,
    by_framework: HashMap<String, usize>,
}

impl OpCatalog {
    pub fn new<I>(registrations: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = OpRegistration>,
    {
        let mut catalog = Self::default();
        for reg in registrations {
            let first = reg.framework_names.first().cloned().unwrap_or_default();
            if reg.op_types.is_empty() {
                return Err(CatalogError::NoOpType(first));
            }
            let index = catalog.registrations.len();
            for name in &reg.framework_names {
                if catalog.by_framework.insert(name.clone(), index).is_some() {
                    return Err(CatalogError::DuplicateFrameworkName(name.clone()));
                }
            }
            catalog.registrations.push(reg);
        }
        log::debug!("op catalog holds {} registrations", catalog.registrations.len());
        Ok(catalog)
    }

    pub fn lookup(&self, framework_name: &str) -> Option<&OpRegistration> {
        self.by_framework
            .get(framework_name)
            .map(|&i| &self.registrations[i])
    }

    pub fn registrations(&self) -> &[OpRegistration] {
        &self.registrations
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Registrations that map onto `op_type`.
    pub fn registrations_for<'a>(&'a self, op_type: &'a str) -> impl Iterator<Item = &'a OpRegistration> {
        self.registrations
            .iter()
            .filter(move |r| r.op_types.iter().any(|t| t == op_type))
    }

    /// Whether some registration backs `op_type` with a compiled kernel.
    pub fn supports_op_type(&self, op_type: &str) -> bool {
        self.registrations_for(op_type)
            .any(|r| r.impl_kind == ImplKind::CompiledKernel)
    }

    /// Every internal op type named by any registration.
    pub fn op_types(&self) -> BTreeSet<String> {
        self.registrations
            .iter()
            .flat_map(|r| r.op_types.iter().cloned())
            .collect()
    }

    /// Run the parameter mapping registered for `framework_name`.
    pub fn map_params(&self, framework_name: &str, attrs: &Attrs) -> anyhow::Result<Attrs> {
        let reg = self
            .lookup(framework_name)
            .ok_or_else(|| CatalogError::Unregistered(framework_name.to_string()))?;
        (reg.param_map)(attrs).with_context(|| format!("mapping parameters of '{framework_name}'"))
    }
}
