//! Graph mutation operations
//!
//! Methods for building the graph and for the rewriter's commit step:
//! adding ops, wiring edges, retiring matched nodes and compacting the arena.

use smallvec::SmallVec;

use crate::error::{FuseError, FuseResult};

use super::attrs::{AttrValue, Attributes};
use super::context::OpGraph;
use super::dtype::DataType;
use super::maps::{Endpoint, NodeId, Op, OpEntry, Value, ValueId};
use super::op_kind::OpKind;

impl OpGraph {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Declare a graph input value
    pub fn add_input(&mut self, dtype: DataType) -> ValueId {
        let id = self.allocate_value_id();
        self.values.insert(id, Value::new(id, dtype));
        self.inputs.push(id);
        id
    }

    /// Declare a graph input value with a static shape
    pub fn add_input_with_shape(&mut self, dtype: DataType, shape: &[i64]) -> ValueId {
        let id = self.add_input(dtype);
        if let Some(v) = self.values.get_mut(&id) {
            v.shape = Some(SmallVec::from_slice(shape));
        }
        id
    }

    /// Append an op consuming `inputs` and producing one fresh value per
    /// entry of `output_dtypes`
    pub fn add_op(
        &mut self,
        kind: OpKind,
        inputs: &[ValueId],
        output_dtypes: &[DataType],
    ) -> FuseResult<NodeId> {
        self.add_op_with_attrs(kind, inputs, output_dtypes, Attributes::new())
    }

    /// [`OpGraph::add_op`] with an initial attribute bag
    pub fn add_op_with_attrs(
        &mut self,
        kind: OpKind,
        inputs: &[ValueId],
        output_dtypes: &[DataType],
        attrs: Attributes,
    ) -> FuseResult<NodeId> {
        for input in inputs {
            if !self.values.contains_key(input) {
                return Err(FuseError::UnknownValue(input.to_string()));
            }
        }

        let mut outputs: SmallVec<[ValueId; 2]> = SmallVec::new();
        for &dtype in output_dtypes {
            outputs.push(self.new_value(dtype));
        }

        self.insert_op(kind, attrs, inputs, &outputs)
    }

    /// Create an op whose outputs are existing values
    ///
    /// Each output value is re-pointed at the new node; each input gains a
    /// consumer entry. Unknown values are rejected before any link is made.
    pub(crate) fn insert_op(
        &mut self,
        kind: OpKind,
        attrs: Attributes,
        inputs: &[ValueId],
        outputs: &[ValueId],
    ) -> FuseResult<NodeId> {
        if let Some(missing) = inputs
            .iter()
            .chain(outputs)
            .find(|v| !self.values.contains_key(*v))
        {
            return Err(FuseError::UnknownValue(missing.to_string()));
        }

        let id = self.allocate_node_id();
        for (port, input) in inputs.iter().enumerate() {
            if let Some(value) = self.values.get_mut(input) {
                value.consumers.push(Endpoint::new(id, port));
            }
        }
        for (port, output) in outputs.iter().enumerate() {
            if let Some(value) = self.values.get_mut(output) {
                value.producer = Some(Endpoint::new(id, port));
            }
        }

        let op = Op {
            id,
            kind,
            name: format!("{}_{}", kind.as_str().to_lowercase(), id.0),
            inputs: SmallVec::from_slice(inputs),
            outputs: SmallVec::from_slice(outputs),
            attrs,
        };
        self.ops.insert(id, OpEntry::new(op));
        Ok(id)
    }

    /// Allocate an unconnected value
    pub(crate) fn new_value(&mut self, dtype: DataType) -> ValueId {
        let id = self.allocate_value_id();
        self.values.insert(id, Value::new(id, dtype));
        id
    }

    /// Connect output `out_port` of `producer` to input `in_port` of
    /// `consumer`
    ///
    /// `in_port` may replace an existing input or append one past the end.
    pub fn connect(
        &mut self,
        producer: NodeId,
        out_port: usize,
        consumer: NodeId,
        in_port: usize,
    ) -> FuseResult<()> {
        let value = self
            .output_value(producer, out_port)
            .ok_or_else(|| FuseError::UnknownNode(format!("{}:{}", producer, out_port)))?;
        self.set_input(consumer, in_port, value)
    }

    /// Point input `port` of `node` at `value`
    pub fn set_input(&mut self, node: NodeId, port: usize, value: ValueId) -> FuseResult<()> {
        if !self.values.contains_key(&value) {
            return Err(FuseError::UnknownValue(value.to_string()));
        }
        let op = self
            .op_mut(node)
            .ok_or_else(|| FuseError::UnknownNode(node.to_string()))?;

        let previous = match port.cmp(&op.inputs.len()) {
            std::cmp::Ordering::Less => Some(std::mem::replace(&mut op.inputs[port], value)),
            std::cmp::Ordering::Equal => {
                op.inputs.push(value);
                None
            }
            std::cmp::Ordering::Greater => {
                return Err(FuseError::InvalidGraph(format!(
                    "input port {} of {} skips ports (has {})",
                    port,
                    node,
                    op.inputs.len()
                )))
            }
        };

        if let Some(old) = previous {
            if let Some(v) = self.values.get_mut(&old) {
                v.consumers.retain(|c| !(c.node == node && c.port == port));
            }
        }
        if let Some(v) = self.values.get_mut(&value) {
            v.consumers.push(Endpoint::new(node, port));
        }
        Ok(())
    }

    /// Mark a value as observed outside the graph
    pub fn mark_output(&mut self, value: ValueId) -> FuseResult<()> {
        let v = self
            .value_mut(value)
            .ok_or_else(|| FuseError::UnknownValue(value.to_string()))?;
        v.is_graph_output = true;
        Ok(())
    }

    /// Set an attribute on a node
    pub fn set_attr(
        &mut self,
        node: NodeId,
        name: &str,
        value: impl Into<AttrValue>,
    ) -> FuseResult<()> {
        let op = self
            .op_mut(node)
            .ok_or_else(|| FuseError::UnknownNode(node.to_string()))?;
        op.attrs.set(name, value);
        Ok(())
    }

    /// Rename a node
    pub fn set_name(&mut self, node: NodeId, name: &str) -> FuseResult<()> {
        let op = self
            .op_mut(node)
            .ok_or_else(|| FuseError::UnknownNode(node.to_string()))?;
        op.name = name.to_string();
        Ok(())
    }

    /// Set the static shape of a value
    pub fn set_shape(&mut self, value: ValueId, shape: &[i64]) -> FuseResult<()> {
        let v = self
            .value_mut(value)
            .ok_or_else(|| FuseError::UnknownValue(value.to_string()))?;
        v.shape = Some(SmallVec::from_slice(shape));
        Ok(())
    }

    // ========================================================================
    // Rewriting
    // ========================================================================

    /// Retire a node: detach it from its inputs and flag it for compaction
    ///
    /// Output values keep pointing at the retired producer until the caller
    /// re-points or drops them.
    pub fn retire(&mut self, node: NodeId) -> FuseResult<()> {
        let entry = self
            .ops
            .get_mut(&node)
            .ok_or_else(|| FuseError::UnknownNode(node.to_string()))?;
        if entry.retired {
            return Err(FuseError::RetiredNode(node.to_string()));
        }
        entry.retire();
        let inputs = entry.op.inputs.clone();

        for input in inputs {
            if let Some(v) = self.values.get_mut(&input) {
                v.consumers.retain(|c| c.node != node);
            }
        }
        Ok(())
    }

    /// Drop a value that no live op references
    pub(crate) fn remove_value(&mut self, value: ValueId) {
        self.values.shift_remove(&value);
    }

    /// Remove retired nodes and orphaned values
    ///
    /// Ids of surviving nodes and values are unchanged. Returns the number
    /// of nodes removed.
    pub fn compact(&mut self) -> usize {
        let before = self.ops.len();
        self.ops.retain(|_, e| !e.retired);
        let removed = before - self.ops.len();

        let ops = &self.ops;
        let inputs = &self.inputs;
        self.values.retain(|id, v| {
            let produced = v.producer.map(|p| ops.contains_key(&p.node)).unwrap_or(false);
            produced || inputs.contains(id) || v.is_graph_output || !v.consumers.is_empty()
        });
        for v in self.values.values_mut() {
            if let Some(p) = v.producer {
                if !ops.contains_key(&p.node) {
                    v.producer = None;
                }
            }
            v.consumers.retain(|c| ops.contains_key(&c.node));
        }

        removed
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check producer/consumer cross-links and acyclicity of live nodes
    pub fn validate(&self) -> FuseResult<()> {
        for op in self.nodes() {
            for (port, input) in op.inputs.iter().enumerate() {
                let v = self
                    .value(*input)
                    .ok_or_else(|| FuseError::UnknownValue(input.to_string()))?;
                if !v.consumers.contains(&Endpoint::new(op.id, port)) {
                    return Err(FuseError::InvalidGraph(format!(
                        "{} input {} ({}) missing consumer link",
                        op.id, port, input
                    )));
                }
                if let Some(p) = v.producer {
                    if !self.is_live(p.node) {
                        return Err(FuseError::InvalidGraph(format!(
                            "{} consumes {} produced by retired {}",
                            op.id, input, p.node
                        )));
                    }
                }
            }
            for (port, output) in op.outputs.iter().enumerate() {
                let v = self
                    .value(*output)
                    .ok_or_else(|| FuseError::UnknownValue(output.to_string()))?;
                if v.producer != Some(Endpoint::new(op.id, port)) {
                    return Err(FuseError::InvalidGraph(format!(
                        "{} output {} ({}) has producer {:?}",
                        op.id, port, output, v.producer
                    )));
                }
            }
        }

        for v in self.values.values() {
            for c in &v.consumers {
                if !self.is_live(c.node) || self.input_value(c.node, c.port) != Some(v.id) {
                    return Err(FuseError::InvalidGraph(format!(
                        "{} lists stale consumer {}:{}",
                        v.id, c.node, c.port
                    )));
                }
            }
        }

        if self.topological_order().len() != self.node_count() {
            return Err(FuseError::InvalidGraph("graph contains a cycle".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_chain() -> (OpGraph, ValueId, NodeId, NodeId) {
        let mut g = OpGraph::new();
        let x = g.add_input(DataType::F32);
        let relu = g.add_op(OpKind::Relu, &[x], &[DataType::F32]).unwrap();
        let r_out = g.output_value(relu, 0).unwrap();
        let tanh = g.add_op(OpKind::Tanh, &[r_out], &[DataType::F32]).unwrap();
        let t_out = g.output_value(tanh, 0).unwrap();
        g.mark_output(t_out).unwrap();
        (g, x, relu, tanh)
    }

    #[test]
    fn test_add_op_links() {
        let (g, x, relu, tanh) = make_chain();
        assert_eq!(g.consumers(x), &[Endpoint::new(relu, 0)]);
        assert_eq!(g.input_producer(tanh, 0), Some(Endpoint::new(relu, 0)));
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_add_op_unknown_input() {
        let mut g = OpGraph::new();
        let result = g.add_op(OpKind::Relu, &[ValueId(42)], &[DataType::F32]);
        assert!(matches!(result, Err(FuseError::UnknownValue(_))));
    }

    #[test]
    fn test_insert_op_unknown_output_links_nothing() {
        let (mut g, x, relu, _) = make_chain();
        let before = g.node_count();

        let result = g.insert_op(OpKind::Abs, Attributes::new(), &[x], &[ValueId(42)]);
        assert!(matches!(result, Err(FuseError::UnknownValue(_))));
        assert_eq!(g.consumers(x), &[Endpoint::new(relu, 0)]);
        assert_eq!(g.node_count(), before);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_connect_replaces_input() {
        let (mut g, x, relu, tanh) = make_chain();
        let other = g.add_op(OpKind::Abs, &[x], &[DataType::F32]).unwrap();

        g.connect(other, 0, tanh, 0).unwrap();

        assert_eq!(g.input_producer(tanh, 0), Some(Endpoint::new(other, 0)));
        assert!(g.output_consumers(relu, 0).is_empty());
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_connect_rejects_gap() {
        let (mut g, _, relu, tanh) = make_chain();
        assert!(g.connect(relu, 0, tanh, 5).is_err());
    }

    #[test]
    fn test_retire_and_compact() {
        let (mut g, x, relu, tanh) = make_chain();
        let r_out = g.output_value(relu, 0).unwrap();

        // Bypass both ops with a fresh Abs producing the graph output
        let t_out = g.output_value(tanh, 0).unwrap();
        g.retire(relu).unwrap();
        g.retire(tanh).unwrap();
        g.insert_op(OpKind::Abs, Attributes::new(), &[x], &[t_out])
            .unwrap();

        assert!(g.retire(relu).is_err());
        assert_eq!(g.compact(), 2);
        assert!(g.value(r_out).is_none());
        assert!(g.value(t_out).is_some());
        assert_eq!(g.node_count(), 1);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_validate_detects_dangling_producer() {
        let (mut g, _, relu, _) = make_chain();
        g.retire(relu).unwrap();
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_set_attr() {
        let (mut g, _, relu, _) = make_chain();
        g.set_attr(relu, "alpha", 0.1f32).unwrap();
        assert_eq!(g.attrs(relu).unwrap().get_float("alpha"), Some(0.1));
        assert!(g.set_attr(NodeId(99), "alpha", 0.1f32).is_err());
    }
}
