//! Float matmul fusions
//!
//! Swish, bias and post-op chains fused onto a MatMul. Bias is either an
//! explicit BiasAdd or the optional third MatMul input; both shapes are
//! registered as variants of one rule.

use crate::error::FuseResult;
use crate::graph::OpKind;
use crate::pattern::predicate::check_input_num;
use crate::pattern::{in_edge, PatternGraph, PatternNodeId, PortMap, MAX_REPETITION};
use crate::transform::{FusedOp, FusedOpFactory, FusionRule, PassRegistry};

use super::common::{
    default_post_op_body, optional_bn_body, post_ops_chain_factory, COMPUTE, WITH_BIAS,
};

/// Register the float matmul rule set
pub fn register(registry: &mut PassRegistry) -> FuseResult<()> {
    registry.add(matmul_bias_swish_fusion()?)?;
    registry.add(matmul_post_ops_chain_fusion()?)?;
    registry.add(matmul_bias_post_ops_chain_fusion()?)?;
    Ok(())
}

/// `x * sigmoid(x)` on a biased matmul
pub fn matmul_bias_swish_fusion() -> FuseResult<FusionRule> {
    FusionRule::builder("matmul_bias_swish_fusion")
        .priority(9.0)
        .pattern(|pg| {
            let matmul = pg.append_op(OpKind::MatMul, &[])?;
            pg.append_decision_function(matmul, check_input_num(2))?;
            let bias = pg.append_op(OpKind::BiasAdd, &[in_edge(0, matmul, 0)])?;
            let sigmoid = pg.append_op(OpKind::Sigmoid, &[in_edge(0, bias, 0)])?;
            pg.append_op(
                OpKind::Multiply,
                &[in_edge(0, bias, 0), in_edge(1, sigmoid, 0)],
            )?;
            Ok(())
        })?
        .pattern(|pg| {
            let matmul = pg.append_op(OpKind::MatMul, &[])?;
            pg.append_decision_function(matmul, check_input_num(3))?;
            let sigmoid = pg.append_op(OpKind::Sigmoid, &[in_edge(0, matmul, 0)])?;
            pg.append_op(
                OpKind::Multiply,
                &[in_edge(0, matmul, 0), in_edge(1, sigmoid, 0)],
            )?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|_, _| {
            Ok(FusedOp::new(OpKind::MatmulBiasSwish)
                .with_attr(WITH_BIAS, true)
                .into())
        }))
        .build()
}

/// Append `optional BN -> post-op repetition [0, MAX]` after `tail`
pub(crate) fn append_post_ops_tail(pg: &mut PatternGraph, tail: PatternNodeId) -> FuseResult<()> {
    let bn = pg.append_optional(optional_bn_body()?, &[in_edge(0, tail, 0)])?;
    pg.append_repetition(
        default_post_op_body()?,
        PortMap::new(0, 0),
        0,
        MAX_REPETITION,
        &[in_edge(0, bn, 0)],
    )?;
    Ok(())
}

/// Append a compute op with `inputs` inputs labelled as the chain's compute
pub(crate) fn append_compute(
    pg: &mut PatternGraph,
    kind: OpKind,
    inputs: usize,
) -> FuseResult<PatternNodeId> {
    let compute = pg.append_op(kind, &[])?;
    pg.append_decision_function(compute, check_input_num(inputs))?;
    pg.set_node_name(compute, COMPUTE)?;
    Ok(compute)
}

/// Unbiased matmul followed by an optional BN and any post ops
pub fn matmul_post_ops_chain_fusion() -> FuseResult<FusionRule> {
    FusionRule::builder("matmul_post_ops_chain_fusion")
        .priority(8.8)
        .pattern(|pg| {
            let matmul = append_compute(pg, OpKind::MatMul, 2)?;
            append_post_ops_tail(pg, matmul)
        })?
        .fused_op(post_ops_chain_factory(OpKind::MatmulPostOpsChain))
        .build()
}

/// Biased matmul followed by an optional BN and any post ops
pub fn matmul_bias_post_ops_chain_fusion() -> FuseResult<FusionRule> {
    FusionRule::builder("matmul_bias_post_ops_chain_fusion")
        .priority(8.9)
        .pattern(|pg| {
            let matmul = append_compute(pg, OpKind::MatMul, 2)?;
            let bias = pg.append_op(OpKind::BiasAdd, &[in_edge(0, matmul, 0)])?;
            append_post_ops_tail(pg, bias)
        })?
        .pattern(|pg| {
            let matmul = append_compute(pg, OpKind::MatMul, 3)?;
            append_post_ops_tail(pg, matmul)
        })?
        .fused_op(post_ops_chain_factory(OpKind::MatmulBiasPostOpsChain))
        .build()
}
