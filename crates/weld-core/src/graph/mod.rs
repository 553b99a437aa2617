//! # Dataflow graph
//!
//! - [`Node`] - an operator with input/output tensor descriptors and attributes
//! - [`Graph`] - slot-arena DAG owning nodes and the edge relation
//! - [`GraphBuilder`] - name-based construction helper

mod builder;
mod dataflow;
mod error;
mod node;

pub use builder::*;
pub use dataflow::*;
pub use error::*;
pub use node::*;
