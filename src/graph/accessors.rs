//! Graph query methods
//!
//! The read side of the op-graph boundary: ports, producers, consumers,
//! dtypes and topological order.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::attrs::{AttrValue, Attributes};
use super::context::OpGraph;
use super::dtype::DataType;
use super::maps::{Endpoint, NodeId, ValueId};
use super::op_kind::OpKind;

impl OpGraph {
    // ========================================================================
    // Ports
    // ========================================================================

    /// Input values of a node
    pub fn input_values(&self, node: NodeId) -> &[ValueId] {
        self.op(node).map(|op| op.inputs.as_slice()).unwrap_or(&[])
    }

    /// Output values of a node
    pub fn output_values(&self, node: NodeId) -> &[ValueId] {
        self.op(node).map(|op| op.outputs.as_slice()).unwrap_or(&[])
    }

    /// Value feeding input `port`
    pub fn input_value(&self, node: NodeId, port: usize) -> Option<ValueId> {
        self.input_values(node).get(port).copied()
    }

    /// Value produced on output `port`
    pub fn output_value(&self, node: NodeId, port: usize) -> Option<ValueId> {
        self.output_values(node).get(port).copied()
    }

    /// Number of inputs
    pub fn num_inputs(&self, node: NodeId) -> usize {
        self.input_values(node).len()
    }

    /// Number of outputs
    pub fn num_outputs(&self, node: NodeId) -> usize {
        self.output_values(node).len()
    }

    // ========================================================================
    // Graph traversal
    // ========================================================================

    /// Producer of a value (`None` for graph inputs)
    pub fn producer(&self, value: ValueId) -> Option<Endpoint> {
        self.value(value).and_then(|v| v.producer)
    }

    /// Producer feeding input `port` of `node`
    pub fn input_producer(&self, node: NodeId, port: usize) -> Option<Endpoint> {
        self.input_value(node, port).and_then(|v| self.producer(v))
    }

    /// Consumers of a value
    pub fn consumers(&self, value: ValueId) -> &[Endpoint] {
        self.value(value)
            .map(|v| v.consumers.as_slice())
            .unwrap_or(&[])
    }

    /// Consumers of output `port` of `node`
    pub fn output_consumers(&self, node: NodeId, port: usize) -> &[Endpoint] {
        match self.output_value(node, port) {
            Some(v) => self.consumers(v),
            None => &[],
        }
    }

    /// Value has exactly one consumer and is not observed outside
    pub fn is_single_use(&self, value: ValueId) -> bool {
        self.consumers(value).len() == 1 && !self.is_graph_output(value)
    }

    /// Distinct consumer nodes of all outputs
    pub fn successors(&self, node: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut result: SmallVec<[NodeId; 4]> = SmallVec::new();
        for &out in self.output_values(node) {
            for c in self.consumers(out) {
                if !result.contains(&c.node) {
                    result.push(c.node);
                }
            }
        }
        result
    }

    /// Distinct producer nodes of all inputs
    pub fn predecessors(&self, node: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut result: SmallVec<[NodeId; 4]> = SmallVec::new();
        for &input in self.input_values(node) {
            if let Some(p) = self.producer(input) {
                if !result.contains(&p.node) {
                    result.push(p.node);
                }
            }
        }
        result
    }

    // ========================================================================
    // Types and attributes
    // ========================================================================

    /// Dtype of the value feeding input `port`
    pub fn input_dtype(&self, node: NodeId, port: usize) -> Option<DataType> {
        self.input_value(node, port)
            .and_then(|v| self.value(v))
            .map(|v| v.dtype)
    }

    /// Dtype of output `port`
    pub fn output_dtype(&self, node: NodeId, port: usize) -> Option<DataType> {
        self.output_value(node, port)
            .and_then(|v| self.value(v))
            .map(|v| v.dtype)
    }

    /// Rank of the value feeding input `port`, if its shape is known
    pub fn input_rank(&self, node: NodeId, port: usize) -> Option<usize> {
        self.input_value(node, port)
            .and_then(|v| self.value(v))
            .and_then(|v| v.rank())
    }

    /// Rank of output `port`, if its shape is known
    pub fn output_rank(&self, node: NodeId, port: usize) -> Option<usize> {
        self.output_value(node, port)
            .and_then(|v| self.value(v))
            .and_then(|v| v.rank())
    }

    /// Attribute bag of a node
    pub fn attrs(&self, node: NodeId) -> Option<&Attributes> {
        self.op(node).map(|op| &op.attrs)
    }

    /// Attribute lookup by name
    pub fn attr(&self, node: NodeId, name: &str) -> Option<&AttrValue> {
        self.attrs(node).and_then(|a| a.get(name))
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Live nodes of a kind, in insertion order
    pub fn find_nodes_by_kind(&self, kind: OpKind) -> Vec<NodeId> {
        self.nodes()
            .filter(|op| op.kind == kind)
            .map(|op| op.id)
            .collect()
    }

    /// Live nodes matching any of the given kinds
    pub fn find_nodes_by_kinds(&self, kinds: &[OpKind]) -> Vec<NodeId> {
        self.nodes()
            .filter(|op| kinds.contains(&op.kind))
            .map(|op| op.id)
            .collect()
    }

    /// Count live nodes of a kind
    pub fn count_kind(&self, kind: OpKind) -> usize {
        self.nodes().filter(|op| op.kind == kind).count()
    }

    /// Live node ids in topological order
    ///
    /// Kahn's algorithm seeded in insertion order, so the result is
    /// deterministic. Nodes on a cycle are left out.
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut in_degree: FxHashMap<NodeId, usize> = FxHashMap::default();
        for op in self.nodes() {
            let degree = self
                .predecessors(op.id)
                .iter()
                .filter(|p| self.is_live(**p))
                .count();
            in_degree.insert(op.id, degree);
        }

        let mut queue: VecDeque<NodeId> = self
            .node_ids()
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);
            for succ in self.successors(id) {
                if let Some(d) = in_degree.get_mut(&succ) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(succ);
                    }
                }
            }
        }

        order
    }

    /// Kinds of live nodes in topological order
    pub fn kinds_in_order(&self) -> Vec<OpKind> {
        self.topological_order()
            .into_iter()
            .filter_map(|id| self.kind(id))
            .collect()
    }
}
