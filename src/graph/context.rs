//! Arena op graph
//!
//! `OpGraph` is the real graph the matcher reads and the rewriter mutates.
//! Node and value ids are stable for the lifetime of the graph: a retired
//! node keeps its id (and stays readable) until [`OpGraph::compact`] drops it.

use super::maps::{NodeId, Op, OpEntry, OpMap, Value, ValueId, ValueMap};
use super::op_kind::OpKind;

/// Directed graph of operator nodes connected through logical tensors
#[derive(Debug, Clone, Default)]
pub struct OpGraph {
    /// Node arena (insertion order preserved)
    pub(crate) ops: OpMap,

    /// Logical tensors
    pub(crate) values: ValueMap,

    /// Values fed from outside the graph, in declaration order
    pub(crate) inputs: Vec<ValueId>,

    next_node: u32,
    next_value: u32,
}

impl OpGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Id allocation
    // ========================================================================

    pub(crate) fn allocate_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    pub(crate) fn allocate_value_id(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    // ========================================================================
    // Node accessors
    // ========================================================================

    /// Get an op by id (retired ops stay readable until compaction)
    pub fn op(&self, id: NodeId) -> Option<&Op> {
        self.ops.get(&id).map(|e| &e.op)
    }

    pub(crate) fn op_mut(&mut self, id: NodeId) -> Option<&mut Op> {
        self.ops.get_mut(&id).map(|e| &mut e.op)
    }

    /// Get the arena entry
    pub fn entry(&self, id: NodeId) -> Option<&OpEntry> {
        self.ops.get(&id)
    }

    /// Node exists and has not been retired
    pub fn is_live(&self, id: NodeId) -> bool {
        self.ops.get(&id).map(|e| !e.retired).unwrap_or(false)
    }

    /// Node exists and was retired by a commit
    pub fn is_retired(&self, id: NodeId) -> bool {
        self.ops.get(&id).map(|e| e.retired).unwrap_or(false)
    }

    /// Op kind of a node
    pub fn kind(&self, id: NodeId) -> Option<OpKind> {
        self.op(id).map(|op| op.kind)
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.ops.values().filter(|e| !e.retired).count()
    }

    /// Number of arena entries, retired ones included
    pub fn arena_len(&self) -> usize {
        self.ops.len()
    }

    /// Iterate over live ops in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Op> {
        self.ops.values().filter(|e| !e.retired).map(|e| &e.op)
    }

    /// Iterate over live node ids in insertion order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ops
            .values()
            .filter(|e| !e.retired)
            .map(|e| e.op.id)
    }

    /// Insertion position of a node in the arena
    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.ops.get_index_of(&id)
    }

    // ========================================================================
    // Value accessors
    // ========================================================================

    /// Get a logical tensor by id
    pub fn value(&self, id: ValueId) -> Option<&Value> {
        self.values.get(&id)
    }

    pub(crate) fn value_mut(&mut self, id: ValueId) -> Option<&mut Value> {
        self.values.get_mut(&id)
    }

    /// Iterate over all values
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.values()
    }

    /// Number of values
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Graph input values, in declaration order
    pub fn graph_inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    /// Values observed outside the graph
    pub fn graph_outputs(&self) -> Vec<ValueId> {
        self.values
            .values()
            .filter(|v| v.is_graph_output)
            .map(|v| v.id)
            .collect()
    }

    /// Check if a value is a graph input
    pub fn is_graph_input(&self, id: ValueId) -> bool {
        self.inputs.contains(&id)
    }

    /// Check if a value is a graph output
    pub fn is_graph_output(&self, id: ValueId) -> bool {
        self.values
            .get(&id)
            .map(|v| v.is_graph_output)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DataType;

    #[test]
    fn test_empty_graph() {
        let g = OpGraph::new();
        assert_eq!(g.node_count(), 0);
        assert_eq!(g.value_count(), 0);
        assert!(g.graph_inputs().is_empty());
    }

    #[test]
    fn test_live_and_retired() {
        let mut g = OpGraph::new();
        let x = g.add_input(DataType::F32);
        let relu = g.add_op(OpKind::Relu, &[x], &[DataType::F32]).unwrap();

        assert!(g.is_live(relu));
        g.retire(relu).unwrap();
        assert!(!g.is_live(relu));
        assert!(g.is_retired(relu));
        // Still readable until compaction
        assert_eq!(g.kind(relu), Some(OpKind::Relu));
        assert_eq!(g.node_count(), 0);
        assert_eq!(g.arena_len(), 1);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut g = OpGraph::new();
        let x = g.add_input(DataType::F32);
        let a = g.add_op(OpKind::Relu, &[x], &[DataType::F32]).unwrap();
        let b = g.add_op(OpKind::Tanh, &[x], &[DataType::F32]).unwrap();
        assert!(a < b);
        assert_eq!(g.position(a), Some(0));
        assert_eq!(g.position(b), Some(1));
    }
}
