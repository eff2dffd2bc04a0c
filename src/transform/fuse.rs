//! Fused-op construction and the commit step
//!
//! A fused-op factory turns a [`MatchBinding`] into a [`Replacement`]; the
//! rewriter hands both to [`fuse_match`], which retires the matched nodes
//! and inserts the replacement with the boundary values re-pointed at it.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::{FuseError, FuseResult};
use crate::graph::{AttrValue, Attributes, DataType, NodeId, OpGraph, OpKind, ValueId};
use crate::pattern::MatchBinding;

/// Attribute naming the backend that implements a fused op
pub const BACKEND_ATTR: &str = "backend";

// ============================================================================
// Replacement description
// ============================================================================

/// One op of a replacement
#[derive(Debug, Clone, PartialEq)]
pub struct FusedOp {
    /// Kind of the new op
    pub kind: OpKind,
    /// Attributes of the new op
    pub attrs: Attributes,
    /// Explicit inputs, each a boundary input of the match
    ///
    /// `None` on the first op means "all boundary inputs in order". On a
    /// later chain op these are extra inputs after the previous op's output.
    pub inputs: Option<Vec<ValueId>>,
    /// Dtype of the intermediate value when this op is not last in a chain
    pub output_dtype: Option<DataType>,
}

impl FusedOp {
    /// New op with empty attributes
    pub fn new(kind: OpKind) -> Self {
        Self {
            kind,
            attrs: Attributes::new(),
            inputs: None,
            output_dtype: None,
        }
    }

    /// Set one attribute
    pub fn with_attr(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.set(name, value);
        self
    }

    /// Replace the attribute bag
    pub fn with_attrs(mut self, attrs: Attributes) -> Self {
        self.attrs = attrs;
        self
    }

    /// Wire explicit inputs
    pub fn with_inputs(mut self, inputs: Vec<ValueId>) -> Self {
        self.inputs = Some(inputs);
        self
    }

    /// Dtype of the intermediate output
    pub fn with_output_dtype(mut self, dtype: DataType) -> Self {
        self.output_dtype = Some(dtype);
        self
    }
}

/// What a matched region is replaced with
#[derive(Debug, Clone, PartialEq)]
pub enum Replacement {
    /// One fused node (the common case)
    Single(FusedOp),
    /// A short chain: op `k + 1` consumes output 0 of op `k`, the last op
    /// produces every boundary output
    Chain(Vec<FusedOp>),
}

impl Replacement {
    /// Ops in chain order
    pub fn ops(&self) -> &[FusedOp] {
        match self {
            Replacement::Single(op) => std::slice::from_ref(op),
            Replacement::Chain(ops) => ops,
        }
    }

    fn into_ops(self) -> Vec<FusedOp> {
        match self {
            Replacement::Single(op) => vec![op],
            Replacement::Chain(ops) => ops,
        }
    }
}

impl From<FusedOp> for Replacement {
    fn from(op: FusedOp) -> Self {
        Replacement::Single(op)
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Signature of a fused-op factory
pub type FusedOpFn = dyn Fn(&OpGraph, &MatchBinding) -> FuseResult<Replacement> + Send + Sync;

/// Shared fused-op factory
#[derive(Clone)]
pub struct FusedOpFactory(Arc<FusedOpFn>);

impl FusedOpFactory {
    /// Wrap a closure
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&OpGraph, &MatchBinding) -> FuseResult<Replacement> + Send + Sync + 'static,
    {
        Self(Arc::new(func))
    }

    /// Replace the match with one op of `kind` taking every boundary input
    pub fn kind(kind: OpKind) -> Self {
        Self::new(move |_, _| Ok(FusedOp::new(kind).into()))
    }

    /// Build the replacement for one match
    pub fn create(&self, graph: &OpGraph, binding: &MatchBinding) -> FuseResult<Replacement> {
        (self.0)(graph, binding)
    }
}

impl fmt::Debug for FusedOpFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FusedOpFactory(..)")
    }
}

// ============================================================================
// Commit
// ============================================================================

/// Result of a fusion operation
#[derive(Debug, Clone, PartialEq)]
pub struct FusionResult {
    /// Rule that produced the fusion
    pub rule: String,
    /// Inserted nodes in chain order
    pub fused_nodes: SmallVec<[NodeId; 2]>,
    /// Retired nodes
    pub replaced_nodes: Vec<NodeId>,
}

impl FusionResult {
    /// Last inserted node (the one producing the boundary outputs)
    pub fn fused_node(&self) -> Option<NodeId> {
        self.fused_nodes.last().copied()
    }
}

/// Replace the matched region with `replacement`
///
/// Boundary output values keep their ids and are re-pointed at the last
/// replacement op, so every outside consumer observes the same value.
/// Dead-end values of the region (no consumers, not graph outputs) stay
/// outputs of the last op so its signature matches the region.
/// Nothing is mutated when the replacement is malformed.
pub fn fuse_match(
    graph: &mut OpGraph,
    binding: &MatchBinding,
    replacement: Replacement,
    rule: &str,
    backend: &str,
) -> FuseResult<FusionResult> {
    let ops = replacement.into_ops();
    check_replacement(graph, binding, &ops, rule)?;

    let mut outputs: Vec<ValueId> = Vec::new();
    let mut internal: Vec<ValueId> = Vec::new();
    for &node in &binding.nodes {
        for &value in graph.output_values(node) {
            let dead_end = graph.consumers(value).is_empty() && !graph.is_graph_output(value);
            if binding.outputs.contains(&value) || dead_end {
                outputs.push(value);
            } else {
                internal.push(value);
            }
        }
    }

    for &node in &binding.nodes {
        graph.retire(node)?;
    }
    for value in internal {
        if graph.consumers(value).is_empty() && !graph.is_graph_output(value) {
            graph.remove_value(value);
        }
    }

    let last = ops.len() - 1;
    let mut fused_nodes: SmallVec<[NodeId; 2]> = SmallVec::new();
    let mut previous: Option<ValueId> = None;

    for (i, op) in ops.into_iter().enumerate() {
        let inputs: Vec<ValueId> = match previous {
            None => op.inputs.unwrap_or_else(|| binding.inputs.clone()),
            Some(prev) => std::iter::once(prev)
                .chain(op.inputs.unwrap_or_default())
                .collect(),
        };
        let op_outputs: Vec<ValueId> = if i == last {
            outputs.clone()
        } else {
            vec![graph.new_value(op.output_dtype.unwrap_or(DataType::F32))]
        };

        let mut attrs = op.attrs;
        if !attrs.contains(BACKEND_ATTR) {
            attrs.set(BACKEND_ATTR, backend);
        }

        let id = graph.insert_op(op.kind, attrs, &inputs, &op_outputs)?;
        previous = op_outputs.first().copied();
        fused_nodes.push(id);
    }

    Ok(FusionResult {
        rule: rule.to_string(),
        fused_nodes,
        replaced_nodes: binding.nodes.clone(),
    })
}

/// Everything `fuse_match` relies on, checked before the first mutation
fn check_replacement(
    graph: &OpGraph,
    binding: &MatchBinding,
    ops: &[FusedOp],
    rule: &str,
) -> FuseResult<()> {
    let invalid = |reason: String| FuseError::InvalidReplacement {
        rule: rule.to_string(),
        reason,
    };

    if ops.is_empty() {
        return Err(invalid("empty replacement".to_string()));
    }
    for &node in &binding.nodes {
        if !graph.is_live(node) {
            return Err(FuseError::RetiredNode(node.to_string()));
        }
    }
    for value in binding.inputs.iter().chain(&binding.outputs) {
        if graph.value(*value).is_none() {
            return Err(FuseError::UnknownValue(value.to_string()));
        }
    }
    for value in &binding.outputs {
        let produced_inside = graph
            .producer(*value)
            .map(|p| binding.nodes.contains(&p.node))
            .unwrap_or(false);
        if !produced_inside {
            return Err(invalid(format!("output {} is not produced by the match", value)));
        }
    }
    for op in ops {
        for value in op.inputs.iter().flatten() {
            if !binding.inputs.contains(value) {
                return Err(invalid(format!(
                    "{} input {} is not a boundary input",
                    op.kind, value
                )));
            }
        }
    }
    Ok(())
}

/// Check if a set of nodes can be replaced by one node
///
/// Every node must be live and the region convex.
pub fn can_fuse(graph: &OpGraph, nodes: &[NodeId]) -> bool {
    if nodes.is_empty() || nodes.iter().any(|n| !graph.is_live(*n)) {
        return false;
    }
    let region = nodes.iter().copied().collect();
    crate::pattern::is_convex(graph, &region)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{in_edge, PatternGraph, PatternMatcher};

    fn make_test_graph() -> (OpGraph, Vec<NodeId>, ValueId, ValueId) {
        // x -> Dequantize -> ReLU -> Quantize -> Tanh
        let mut g = OpGraph::new();
        let x = g.add_input(DataType::U8);
        let dq = g.add_op(OpKind::Dequantize, &[x], &[DataType::F32]).unwrap();
        let v = g.output_value(dq, 0).unwrap();
        let relu = g.add_op(OpKind::Relu, &[v], &[DataType::F32]).unwrap();
        let v = g.output_value(relu, 0).unwrap();
        let q = g.add_op(OpKind::Quantize, &[v], &[DataType::S8]).unwrap();
        let q_out = g.output_value(q, 0).unwrap();
        let tanh = g.add_op(OpKind::Tanh, &[q_out], &[DataType::F32]).unwrap();
        (g, vec![dq, relu, q, tanh], x, q_out)
    }

    fn match_int8_relu(g: &OpGraph, anchor: NodeId) -> MatchBinding {
        let mut pg = PatternGraph::new("int8_relu");
        let dq = pg.append_op(OpKind::Dequantize, &[]).unwrap();
        let relu = pg.append_op(OpKind::Relu, &[in_edge(0, dq, 0)]).unwrap();
        pg.append_op(OpKind::Quantize, &[in_edge(0, relu, 0)]).unwrap();
        PatternMatcher::new(g).match_at(&pg, anchor).unwrap()
    }

    #[test]
    fn test_fuse_single_op() {
        let (mut g, ids, x, q_out) = make_test_graph();
        let binding = match_int8_relu(&g, ids[0]);

        let result = fuse_match(
            &mut g,
            &binding,
            FusedOp::new(OpKind::Int8Relu).into(),
            "int8_relu_fusion",
            "dnnl",
        )
        .unwrap();
        let fused = result.fused_node().unwrap();

        assert_eq!(result.replaced_nodes, ids[..3].to_vec());
        assert_eq!(g.kind(fused), Some(OpKind::Int8Relu));
        assert_eq!(g.input_values(fused), &[x]);
        assert_eq!(g.output_values(fused), &[q_out]);
        assert_eq!(g.input_producer(ids[3], 0).map(|p| p.node), Some(fused));
        assert_eq!(
            g.attr(fused, BACKEND_ATTR),
            Some(&AttrValue::Str("dnnl".to_string()))
        );

        g.compact();
        g.validate().unwrap();
        assert_eq!(g.kinds_in_order(), vec![OpKind::Int8Relu, OpKind::Tanh]);
    }

    #[test]
    fn test_fuse_chain() {
        let (mut g, ids, x, q_out) = make_test_graph();
        let binding = match_int8_relu(&g, ids[0]);

        let replacement = Replacement::Chain(vec![
            FusedOp::new(OpKind::SubZps).with_output_dtype(DataType::F32),
            FusedOp::new(OpKind::MulScales).with_attr(BACKEND_ATTR, "ref"),
        ]);
        let result = fuse_match(&mut g, &binding, replacement, "split", "dnnl").unwrap();
        assert_eq!(result.fused_nodes.len(), 2);

        let first = result.fused_nodes[0];
        let second = result.fused_nodes[1];
        assert_eq!(g.input_values(first), &[x]);
        assert_eq!(g.input_producer(second, 0).map(|p| p.node), Some(first));
        assert_eq!(g.output_values(second), &[q_out]);
        assert_eq!(
            g.attrs(second).and_then(|a| a.get_str(BACKEND_ATTR)),
            Some("ref")
        );

        g.compact();
        g.validate().unwrap();
        assert_eq!(g.node_count(), 3);
    }

    #[test]
    fn test_explicit_inputs_must_be_boundary() {
        let (mut g, ids, _, _) = make_test_graph();
        let binding = match_int8_relu(&g, ids[0]);
        let internal = g.output_value(ids[0], 0).unwrap();

        let bad = FusedOp::new(OpKind::Int8Relu).with_inputs(vec![internal]);
        let err = fuse_match(&mut g, &binding, bad.into(), "r", "dnnl").unwrap_err();
        assert!(matches!(err, FuseError::InvalidReplacement { .. }));

        // Nothing was touched
        assert_eq!(g.node_count(), 4);
        g.validate().unwrap();
    }

    #[test]
    fn test_unknown_boundary_value_leaves_graph_untouched() {
        let (mut g, ids, _, _) = make_test_graph();
        let mut binding = match_int8_relu(&g, ids[0]);
        let bogus = ValueId(9_999);
        binding.inputs.push(bogus);
        binding.outputs.push(bogus);

        let chain = Replacement::Chain(vec![
            FusedOp::new(OpKind::SubZps),
            FusedOp::new(OpKind::MulScales).with_inputs(vec![bogus]),
        ]);
        let err = fuse_match(&mut g, &binding, chain, "r", "dnnl").unwrap_err();
        assert!(matches!(err, FuseError::UnknownValue(_)));

        assert!(ids.iter().all(|n| g.is_live(*n)));
        assert_eq!(g.node_count(), 4);
        g.validate().unwrap();
    }

    #[test]
    fn test_dead_end_output_is_kept() {
        // x -> Dequantize -> ReLU -> Quantize, quantized value unused
        let mut g = OpGraph::new();
        let x = g.add_input(DataType::U8);
        let dq = g.add_op(OpKind::Dequantize, &[x], &[DataType::F32]).unwrap();
        let v = g.output_value(dq, 0).unwrap();
        let relu = g.add_op(OpKind::Relu, &[v], &[DataType::F32]).unwrap();
        let v = g.output_value(relu, 0).unwrap();
        let q = g.add_op(OpKind::Quantize, &[v], &[DataType::S8]).unwrap();
        let q_out = g.output_value(q, 0).unwrap();

        let binding = match_int8_relu(&g, dq);
        assert!(binding.outputs.is_empty());

        let result = fuse_match(&mut g, &binding, FusedOp::new(OpKind::Int8Relu).into(), "r", "dnnl")
            .unwrap();
        let fused = result.fused_node().unwrap();
        assert_eq!(g.num_outputs(fused), 1);
        assert_eq!(g.output_values(fused), &[q_out]);
        assert_eq!(g.output_dtype(fused, 0), Some(DataType::S8));

        g.compact();
        g.validate().unwrap();
        assert_eq!(g.kinds_in_order(), vec![OpKind::Int8Relu]);
    }

    #[test]
    fn test_empty_chain_rejected() {
        let (mut g, ids, _, _) = make_test_graph();
        let binding = match_int8_relu(&g, ids[0]);
        let err = fuse_match(&mut g, &binding, Replacement::Chain(vec![]), "r", "dnnl").unwrap_err();
        assert!(matches!(err, FuseError::InvalidReplacement { .. }));
    }

    #[test]
    fn test_can_fuse() {
        let (g, ids, _, _) = make_test_graph();
        assert!(can_fuse(&g, &ids[..3]));
        assert!(!can_fuse(&g, &[ids[0], ids[2]]));
        assert!(!can_fuse(&g, &[]));
    }

    #[test]
    fn test_factory_kind() {
        let (g, ids, _, _) = make_test_graph();
        let binding = match_int8_relu(&g, ids[0]);
        let replacement = FusedOpFactory::kind(OpKind::Int8Relu)
            .create(&g, &binding)
            .unwrap();
        assert_eq!(replacement.ops().len(), 1);
        assert_eq!(replacement.ops()[0].kind, OpKind::Int8Relu);
    }
}
