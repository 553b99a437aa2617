//! # weld
//!
//! A pattern-based fusion engine for tensor dataflow graphs.
//!
//! ## Overview
//!
//! - [`Graph`] - arena-backed DAG of operator nodes with data and control edges
//! - [`Pattern`] - declarative description of a subgraph shape, built from named roles
//! - [`GraphMatcher`] / [`BufferMatcher`] - find [`Mapping`]s from roles to concrete nodes
//! - [`RewritePlan`] - validate-then-apply replacement of a matched subgraph with one node
//! - [`FusionStatsRegistry`] - per-session match/effect counters
//! - [`PassRegistry`] / [`FusionEngine`] - resolve passes by name and run them against a graph
//! - [`OpsKernelInfoStore`] - capability oracle consulted before a rewrite is applied
//!
//! ## Typical flow
//!
//! 1. Run shape/type inference ([`InferShapeAndType`]) so every edge carries a [`TensorDesc`].
//! 2. Ask a [`FusionEngine`] to run a named pass of a given [`PassType`].
//! 3. Read the session's counters back with [`FusionStatsRegistry::get_and_clear`].

mod attr;
mod catalog;
mod config;
mod dispatch;
mod dtype;
mod graph;
mod infer;
mod mapping;
mod matcher;
mod oracle;
mod pass;
mod pattern;
mod rewrite;
mod shape;
mod stats;
mod tensor_desc;
pub mod test_utils;

pub use attr::*;
pub use catalog::*;
pub use config::*;
pub use dispatch::*;
pub use dtype::*;
pub use graph::*;
pub use infer::*;
pub use mapping::*;
pub use matcher::*;
pub use oracle::*;
pub use pass::*;
pub use pattern::*;
pub use rewrite::*;
pub use shape::*;
pub use stats::*;
pub use tensor_desc::*;

use smallvec::SmallVec;

pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type HashSet<K> = rustc_hash::FxHashSet<K>;

/// Short inline vector used for per-node slot lists.
pub type RVec<T> = SmallVec<[T; 4]>;

#[macro_export]
macro_rules! rvec {
    ($elem:expr; $n:expr) => ($crate::RVec::from_elem($elem, $n));
    ($($x:expr),*$(,)*) => ($crate::RVec::from_iter([$($x),*]));
}
