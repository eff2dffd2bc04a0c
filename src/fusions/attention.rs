//! Multi-head attention fusions
//!
//! Recognizes the scaled dot-product attention block
//!
//! ```text
//! Q: Reshape -> Transpose ------------------.
//! K: Reshape -> Transpose -> Transpose -----+-> MatMul -> Divide -> Add -> SoftMax --.
//! V: Reshape -> Transpose ------------------------------------------------------------+-> MatMul -> Transpose -> Reshape
//! ```
//!
//! with or without int8 quantization steps on every MatMul operand. The
//! whole block becomes a single attention op.

use crate::error::FuseResult;
use crate::graph::{DataType, OpKind};
use crate::pattern::predicate::{check_input_dtype, check_output_dtype};
use crate::pattern::{in_edge, PatternGraph, PatternNodeId};
use crate::transform::{FusedOpFactory, FusionRule, PassRegistry};

/// Quantization flavour of an attention block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MhaPrecision {
    /// Plain f32
    F32,
    /// Quantize -> Dequantize on each MatMul operand
    Int8,
    /// Int8 with bf16 compute: TypeCast around every quantization step
    Int8Bf16,
}

impl MhaPrecision {
    fn is_quantized(self) -> bool {
        self != MhaPrecision::F32
    }

    fn is_bf16(self) -> bool {
        self == MhaPrecision::Int8Bf16
    }
}

/// Priority of every attention rule
///
/// Above every matmul, conv and quantized-matmul rule: the block contains
/// two MatMuls that those rules would otherwise claim first.
pub const MHA_PRIORITY: f32 = 20.0;

/// Register the attention rule set
pub fn register(registry: &mut PassRegistry) -> FuseResult<()> {
    registry.add(mha_fusion("int8_mha_fusion", MhaPrecision::Int8, OpKind::Int8Mha)?)?;
    registry.add(mha_fusion("f32_mha_fusion", MhaPrecision::F32, OpKind::F32Mha)?)?;
    registry.add(mha_fusion(
        "int8_bf16_mha_fusion",
        MhaPrecision::Int8Bf16,
        OpKind::Int8Bf16Mha,
    )?)?;
    Ok(())
}

/// One attention rule at [`MHA_PRIORITY`]
pub fn mha_fusion(name: &str, precision: MhaPrecision, kind: OpKind) -> FuseResult<FusionRule> {
    FusionRule::builder(name)
        .priority(MHA_PRIORITY)
        .pattern(|pg| mha_pattern(pg, precision))?
        .fused_op(FusedOpFactory::kind(kind))
        .build()
}

/// `[TypeCast(f32) ->] Quantize -> Dequantize [-> TypeCast(bf16)]`
fn quant_step(
    pg: &mut PatternGraph,
    producer: PatternNodeId,
    name: &str,
    precision: MhaPrecision,
) -> FuseResult<PatternNodeId> {
    if !precision.is_quantized() {
        return Ok(producer);
    }
    let mut tail = producer;
    if precision.is_bf16() {
        tail = pg.append_op(OpKind::TypeCast, &[in_edge(0, tail, 0)])?;
        pg.append_decision_function(tail, check_input_dtype(DataType::Bf16))?;
    }
    let q = pg.append_op(OpKind::Quantize, &[in_edge(0, tail, 0)])?;
    pg.set_node_name(q, format!("quantize_{}", name))?;
    let dq = pg.append_op(OpKind::Dequantize, &[in_edge(0, q, 0)])?;
    pg.set_node_name(dq, format!("dequantize_{}", name))?;
    tail = dq;
    if precision.is_bf16() {
        tail = pg.append_op(OpKind::TypeCast, &[in_edge(0, tail, 0)])?;
        pg.append_decision_function(tail, check_output_dtype(DataType::Bf16))?;
    }
    Ok(tail)
}

/// `Reshape -> Transpose` head of a query/key/value path
fn projection(pg: &mut PatternGraph, name: &str) -> FuseResult<PatternNodeId> {
    let reshape = pg.append_op(OpKind::StaticReshape, &[])?;
    pg.set_node_name(reshape, format!("{}_reshape", name))?;
    let transpose = pg.append_op(OpKind::StaticTranspose, &[in_edge(0, reshape, 0)])?;
    pg.set_node_name(transpose, format!("{}_transpose", name))?;
    Ok(transpose)
}

fn mha_pattern(pg: &mut PatternGraph, precision: MhaPrecision) -> FuseResult<()> {
    let query = projection(pg, "query")?;
    let query = quant_step(pg, query, "query", precision)?;

    let key = projection(pg, "key")?;
    let key = pg.append_op(OpKind::StaticTranspose, &[in_edge(0, key, 0)])?;
    pg.set_node_name(key, "key_transpose2")?;
    let key = quant_step(pg, key, "key", precision)?;

    let matmul_qk = pg.append_op(OpKind::MatMul, &[in_edge(0, query, 0), in_edge(1, key, 0)])?;
    pg.set_node_name(matmul_qk, "matmul_qk")?;
    let scale = pg.append_op(OpKind::Divide, &[in_edge(0, matmul_qk, 0)])?;
    pg.set_node_name(scale, "fscore_scale")?;
    let mask = pg.append_op(OpKind::Add, &[in_edge(0, scale, 0)])?;
    pg.set_node_name(mask, "fscore_add")?;
    let softmax = pg.append_op(OpKind::SoftMax, &[in_edge(0, mask, 0)])?;
    pg.set_node_name(softmax, "softmax")?;
    let probs = quant_step(pg, softmax, "softmax", precision)?;

    let value = projection(pg, "value")?;
    let value = quant_step(pg, value, "value", precision)?;

    let matmul_v = pg.append_op(OpKind::MatMul, &[in_edge(0, probs, 0), in_edge(1, value, 0)])?;
    pg.set_node_name(matmul_v, "matmul_v")?;
    let transpose = pg.append_op(OpKind::StaticTranspose, &[in_edge(0, matmul_v, 0)])?;
    pg.set_node_name(transpose, "transpose_output")?;
    let mut tail = pg.append_op(OpKind::StaticReshape, &[in_edge(0, transpose, 0)])?;
    pg.set_node_name(tail, "reshape_output")?;

    if precision.is_quantized() {
        if precision.is_bf16() {
            tail = pg.append_op(OpKind::TypeCast, &[in_edge(0, tail, 0)])?;
            pg.append_decision_function(tail, check_input_dtype(DataType::Bf16))?;
        }
        let q = pg.append_op(OpKind::Quantize, &[in_edge(0, tail, 0)])?;
        pg.set_node_name(q, "quantize_output")?;
    }
    Ok(())
}
