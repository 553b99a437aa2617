use super::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Node named '{0}' already exists.")]
    DuplicateName(String),
    #[error("Node {0:?} is not in the graph.")]
    NodeNotFound(NodeId),
    #[error("No node named '{0}'.")]
    UnknownName(String),
    #[error("Output {index} out of range on '{node}', which has {available}.")]
    OutputOutOfRange {
        node: String,
        index: usize,
        available: usize,
    },
    #[error("Input {index} out of range on '{node}', which has {available}.")]
    InputOutOfRange {
        node: String,
        index: usize,
        available: usize,
    },
    #[error("Input {index} of '{node}' is already fed by '{producer}'.")]
    InputOccupied {
        node: String,
        index: usize,
        producer: String,
    },
    #[error("Edge {src} -> {dst} already exists.")]
    DuplicateEdge { src: String, dst: String },
    #[error("Edge {src} -> {dst} would close a data cycle.")]
    DataCycle { src: String, dst: String },
    #[error("Cycle detected through '{0}'.")]
    CycleDetected(String),
    #[error("Node '{node}' still has {edges} attached edges.")]
    NodeConnected { node: String, edges: usize },
    #[error("No edge {src} -> {dst}.")]
    EdgeNotFound { src: String, dst: String },
    #[error("Mapping was computed at generation {mapping}, graph is at {graph}.")]
    StaleMapping { mapping: u64, graph: u64 },
    #[error("Graph invariant violated: {0}")]
    Invariant(String),
}
