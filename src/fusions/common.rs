//! Building blocks shared by the rule sets
//!
//! Pattern fragments that several families reuse (post-op chains, the
//! optional batch norm) and helpers that fold quantization parameters of
//! matched nodes into fused-op attributes.

use crate::error::{FuseError, FuseResult};
use crate::graph::{Attributes, NodeId, OpGraph, OpKind};
use crate::pattern::{MatchBinding, PatternGraph, POST_OPS};
use crate::transform::{FusedOp, FusedOpFactory};

/// Label of post ops inside a chain body
pub const POST_OP: &str = "post_op";
/// Label of the compute op anchoring a chain
pub const COMPUTE: &str = "compute";
/// Label of an optional batch norm
pub const BATCH_NORM: &str = "batch_norm";

/// Attribute: per-channel scales of a quantize/dequantize op
pub const SCALES: &str = "scales";
/// Attribute: zero points of a quantize/dequantize op
pub const ZPS: &str = "zps";
/// Attribute: compute op carries a bias input
pub const WITH_BIAS: &str = "with_bias";
/// Attribute: post ops folded into a compute op, in execution order
pub const POST_OPS_ATTR: &str = "post_ops";

/// Body matching one post op; input 0 chains into output 0
pub fn post_op_body(name: &str, kinds: &[OpKind]) -> FuseResult<PatternGraph> {
    let mut body = PatternGraph::new(name);
    let op = body.append_alternation(kinds, &[])?;
    body.set_node_name(op, POST_OP)?;
    body.create_input_port(0, op, 0)?;
    body.create_output_port(0, op, 0)?;
    Ok(body)
}

/// Body of the default eltwise/binary post-op chain
pub fn default_post_op_body() -> FuseResult<PatternGraph> {
    post_op_body("post_op_chain", POST_OPS)
}

/// Body matching an optional BatchNormInference on input/output 0
pub fn optional_bn_body() -> FuseResult<PatternGraph> {
    let mut body = PatternGraph::new("optional_bn");
    let bn = body.append_op(OpKind::BatchNormInference, &[])?;
    body.set_node_name(bn, BATCH_NORM)?;
    body.create_input_port(0, bn, 0)?;
    body.create_output_port(0, bn, 0)?;
    Ok(body)
}

/// Kinds bound as post ops, in chain order
pub fn post_op_names(graph: &OpGraph, binding: &MatchBinding) -> Vec<String> {
    binding
        .get_all(POST_OP)
        .into_iter()
        .filter_map(|n| graph.kind(n))
        .map(|k| k.as_str().to_string())
        .collect()
}

/// Copy `scales`/`zps` of `node` into `attrs` as `<prefix>_scales`/`<prefix>_zps`
pub fn copy_quant_params(
    graph: &OpGraph,
    node: NodeId,
    prefix: &str,
    attrs: &mut Attributes,
) -> FuseResult<()> {
    let source = match graph.attrs(node) {
        Some(a) => a,
        None => return Ok(()),
    };
    if let Some(value) = source.get(SCALES) {
        let scales = source.get_floats(SCALES).ok_or_else(|| FuseError::InvalidAttribute {
            name: SCALES.to_string(),
            reason: format!("expected floats on {}, found {:?}", node, value),
        })?;
        attrs.set(&format!("{}_scales", prefix), scales.to_vec());
    }
    if let Some(value) = source.get(ZPS) {
        let zps = source.get_ints(ZPS).ok_or_else(|| FuseError::InvalidAttribute {
            name: ZPS.to_string(),
            reason: format!("expected ints on {}, found {:?}", node, value),
        })?;
        attrs.set(&format!("{}_zps", prefix), zps.to_vec());
    }
    Ok(())
}

/// Factory for a compute op fused with a post-op chain
///
/// Records `with_bias` when the match contains a BiasAdd or the compute
/// op already takes a third input, and lists the chain in `post_ops`.
pub fn post_ops_chain_factory(kind: OpKind) -> FusedOpFactory {
    FusedOpFactory::new(move |graph, binding| {
        let with_bias = binding
            .nodes
            .iter()
            .any(|n| graph.kind(*n) == Some(OpKind::BiasAdd))
            || binding
                .get(COMPUTE)
                .map(|c| graph.num_inputs(c) == 3)
                .unwrap_or(false);

        let mut op = FusedOp::new(kind).with_attr(WITH_BIAS, with_bias);
        if let Some(attrs) = binding.get(COMPUTE).and_then(|c| graph.attrs(c)) {
            op.attrs.merge_missing(attrs);
        }
        if binding.get(BATCH_NORM).is_some() {
            op = op.with_attr("with_bn", true);
        }
        let post_ops = post_op_names(graph, binding);
        if !post_ops.is_empty() {
            op = op.with_attr(POST_OPS_ATTR, post_ops);
        }
        Ok(op.into())
    })
}

/// Factory stamping the quantization parameters of labelled nodes
///
/// `params` maps a pattern label to the attribute prefix its scales and
/// zero points are stored under.
pub fn quantized_factory(
    kind: OpKind,
    with_bias: bool,
    params: &'static [(&'static str, &'static str)],
) -> FusedOpFactory {
    FusedOpFactory::new(move |graph, binding| {
        let mut op = FusedOp::new(kind);
        if with_bias {
            op = op.with_attr(WITH_BIAS, true);
        }
        for (label, prefix) in params {
            if let Some(node) = binding.get(label) {
                copy_quant_params(graph, node, prefix, &mut op.attrs)?;
            }
        }
        Ok(op.into())
    })
}
