use crate::{AttrValue, Attrs, RVec, TensorDesc};
use derive_new::new;
use slotmap::new_key_type;

new_key_type! {
    /// Unique identifier for a node in a [`Graph`](crate::Graph).
    ///
    /// Keys are versioned: an id of a removed node never resolves to a later node.
    pub struct NodeId;
}

/// Output slot `index` of `node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, new)]
pub struct OutAnchor {
    pub node: NodeId,
    pub index: usize,
}

/// Input slot `index` of `node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, new)]
pub struct InAnchor {
    pub node: NodeId,
    pub index: usize,
}

/// An operator in the dataflow graph.
///
/// The descriptor lists fix the node's slot counts. Connectivity is owned and
/// kept symmetric by the graph; a detached `Node` (not yet added, or removed)
/// carries no edges.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    op_type: String,
    inputs: RVec<TensorDesc>,
    outputs: RVec<TensorDesc>,
    attrs: Attrs,

    /// Producer feeding each input slot.
    pub(crate) in_data: RVec<Option<OutAnchor>>,
    /// Consumers of each output slot, in connection order.
    pub(crate) out_data: RVec<RVec<InAnchor>>,
    pub(crate) in_ctrl: RVec<NodeId>,
    pub(crate) out_ctrl: RVec<NodeId>,
}

impl Node {
    pub fn new(name: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            inputs: RVec::new(),
            outputs: RVec::new(),
            attrs: Attrs::new(),
            in_data: RVec::new(),
            out_data: RVec::new(),
            in_ctrl: RVec::new(),
            out_ctrl: RVec::new(),
        }
    }

    pub fn with_input(mut self, desc: TensorDesc) -> Self {
        self.inputs.push(desc);
        self
    }

    pub fn with_inputs(mut self, descs: impl IntoIterator<Item = TensorDesc>) -> Self {
        self.inputs.extend(descs);
        self
    }

    pub fn with_output(mut self, desc: TensorDesc) -> Self {
        self.outputs.push(desc);
        self
    }

    pub fn with_outputs(mut self, descs: impl IntoIterator<Item = TensorDesc>) -> Self {
        self.outputs.extend(descs);
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.set(name, value);
        self
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn inputs(&self) -> &[TensorDesc] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorDesc] {
        &self.outputs
    }

    pub fn input(&self, index: usize) -> Option<&TensorDesc> {
        self.inputs.get(index)
    }

    pub fn output(&self, index: usize) -> Option<&TensorDesc> {
        self.outputs.get(index)
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut Attrs {
        &mut self.attrs
    }

    /// Replace the descriptor of input `index`. Out-of-range indices are ignored.
    pub fn set_input_desc(&mut self, index: usize, desc: TensorDesc) {
        if let Some(slot) = self.inputs.get_mut(index) {
            *slot = desc;
        }
    }

    /// Replace the descriptor of output `index`. Out-of-range indices are ignored.
    pub fn set_output_desc(&mut self, index: usize, desc: TensorDesc) {
        if let Some(slot) = self.outputs.get_mut(index) {
            *slot = desc;
        }
    }

    /// Replace every output descriptor, keeping the slot count.
    pub(crate) fn replace_outputs(&mut self, descs: RVec<TensorDesc>) {
        for (slot, desc) in self.outputs.iter_mut().zip(descs) {
            *slot = desc;
        }
    }

    /// Number of data and control edges attached to this node.
    pub fn edge_count(&self) -> usize {
        self.in_data.iter().filter(|p| p.is_some()).count()
            + self.out_data.iter().map(|c| c.len()).sum::<usize>()
            + self.in_ctrl.len()
            + self.out_ctrl.len()
    }

    /// Drop all connectivity and size the slot tables to the descriptor counts.
    pub(crate) fn reset_connectivity(&mut self) {
        self.in_data = crate::rvec![None; self.inputs.len()];
        self.out_data = crate::rvec![RVec::new(); self.outputs.len()];
        self.in_ctrl.clear();
        self.out_ctrl.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shape, DType, Format};

    #[test]
    fn detached_node_has_no_edges() {
        let desc = TensorDesc::new(shape![2, 2], Format::ND, DType::F32);
        let mut node = Node::new("relu", "Relu")
            .with_input(desc.clone())
            .with_output(desc);
        node.reset_connectivity();
        assert_eq!(node.in_data.len(), 1);
        assert_eq!(node.out_data.len(), 1);
        assert_eq!(node.edge_count(), 0);
    }

    #[test]
    fn set_desc_ignores_out_of_range() {
        let desc = TensorDesc::new(shape![4], Format::ND, DType::F16);
        let mut node = Node::new("a", "Abs").with_input(desc.clone());
        node.set_input_desc(3, TensorDesc::undefined());
        assert_eq!(node.input(0), Some(&desc));
        assert_eq!(node.num_inputs(), 1);
    }
}
