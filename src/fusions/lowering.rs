//! Lowering pipeline
//!
//! Rewrites the primitive ops left around (or inside) fused regions into
//! the canonical form a backend kernel consumes: casts folded into compute
//! ops, quantize/dequantize split into scale and zero-point steps, scales
//! folded into `output_scales`, and elementwise tails folded into
//! `post_ops`.
//!
//! Every stage is an ordinary [`PassRegistry`] run to a fixed point by a
//! [`Rewriter`]; stages run in order.
//!
//! | Stage | Rules |
//! |-------|-------|
//! | `fuse_typecast` | `fuse_typecast_to_matmul`, `fuse_typecast_to_add`, `fuse_post_typecast_to_matmul`, `fuse_post_typecast_to_quantize` |
//! | `fuse_bias_add` | `fuse_bias_add` |
//! | `split_quant_dequant` | `split_quant_dequant` |
//! | `fold_mul_scales` | `fold_mul_scales` |
//! | `fuse_to_int8_compute` | `fuse_to_int8_compute` |
//! | `fuse_output_scales` | `fuse_output_scales` |
//! | `fuse_zero_points` | `fuse_src_zero_points`, `fuse_dst_zero_points` |
//! | `fuse_mul_scales_add_zps` | `fuse_mul_scales_add_zps` |
//! | `fuse_mul_sigmoid_to_swish` | `fuse_mul_sigmoid_to_swish` |
//! | `fuse_post_ops` | `fuse_post_ops` |

use std::sync::Arc;

use crate::error::{FuseError, FuseResult};
use crate::graph::{DataType, NodeId, OpGraph, OpKind, ValueId};
use crate::pattern::predicate::{
    check_input_dtype, check_input_num, check_output_dtype, check_producer_kind,
};
use crate::pattern::{
    in_edge, InEdge, MatchBinding, PatternGraph, PatternNodeId, PortMap, Predicate, COMPUTE_OPS,
    ELTWISE_OPS, MAX_REPETITION, POST_OPS, QUANT_OPS,
};
use crate::traits::{GraphPass, PassChain};
use crate::transform::{
    FusedOp, FusedOpFactory, FusionRule, PassRegistry, Replacement, RewriteConfig, RewriteStats,
    Rewriter, DEFAULT_BACKEND,
};

use super::common::{
    post_op_body, post_op_names, COMPUTE, POST_OP, POST_OPS_ATTR, SCALES, WITH_BIAS, ZPS,
};

/// Attribute: combined output scales of a compute op
pub const OUTPUT_SCALES: &str = "output_scales";
/// Attribute: zero points subtracted from input 0
pub const SRC_ZPS: &str = "src_zps";
/// Attribute: zero points added to the output
pub const DST_ZPS: &str = "dst_zps";
/// Attribute: dtype the compute op writes
pub const DST_DTYPE: &str = "dst_dtype";

const PRIORITY: f32 = 1.0;
const DEQUANTIZE: &[OpKind] = &[OpKind::Dequantize];
const CAST_COMPUTE_OPS: &[OpKind] = &[OpKind::MatMul, OpKind::Convolution];

// ============================================================================
// Pipeline
// ============================================================================

/// One named stage of the pipeline
#[derive(Debug, Clone)]
pub struct LoweringStage {
    name: String,
    registry: Arc<PassRegistry>,
}

impl LoweringStage {
    /// Build a stage from its rules
    pub fn new(name: &str, backend: &str, rules: Vec<FusionRule>) -> FuseResult<Self> {
        let mut registry = PassRegistry::new(backend);
        for rule in rules {
            registry.add(rule)?;
        }
        Ok(Self {
            name: name.to_string(),
            registry: Arc::new(registry),
        })
    }

    /// Stage name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rules of this stage
    pub fn registry(&self) -> &PassRegistry {
        &self.registry
    }
}

/// Ordered lowering stages
#[derive(Debug, Clone)]
pub struct LoweringPipeline {
    stages: Vec<LoweringStage>,
    config: RewriteConfig,
}

impl LoweringPipeline {
    /// The default stage list stamping the default backend
    pub fn new() -> FuseResult<Self> {
        Self::with_backend(DEFAULT_BACKEND)
    }

    /// The default stage list stamping `backend`
    pub fn with_backend(backend: &str) -> FuseResult<Self> {
        let stages = vec![
            LoweringStage::new(
                "fuse_typecast",
                backend,
                vec![
                    fuse_typecast_to_matmul()?,
                    fuse_typecast_to_add()?,
                    fuse_post_typecast_to_matmul()?,
                    fuse_post_typecast_to_quantize()?,
                ],
            )?,
            LoweringStage::new("fuse_bias_add", backend, vec![fuse_bias_add()?])?,
            LoweringStage::new("split_quant_dequant", backend, vec![split_quant_dequant()?])?,
            LoweringStage::new("fold_mul_scales", backend, vec![fold_mul_scales()?])?,
            LoweringStage::new("fuse_to_int8_compute", backend, vec![fuse_to_int8_compute()?])?,
            LoweringStage::new("fuse_output_scales", backend, vec![fuse_output_scales()?])?,
            LoweringStage::new(
                "fuse_zero_points",
                backend,
                vec![fuse_src_zero_points()?, fuse_dst_zero_points()?],
            )?,
            LoweringStage::new(
                "fuse_mul_scales_add_zps",
                backend,
                vec![fuse_mul_scales_add_zps()?],
            )?,
            LoweringStage::new(
                "fuse_mul_sigmoid_to_swish",
                backend,
                vec![fuse_mul_sigmoid_to_swish()?],
            )?,
            LoweringStage::new("fuse_post_ops", backend, vec![fuse_post_ops()?])?,
        ];
        Ok(Self {
            stages,
            config: RewriteConfig::default(),
        })
    }

    /// Use `config` for every stage
    pub fn with_config(mut self, config: RewriteConfig) -> Self {
        self.config = config;
        self
    }

    /// Stages in run order
    pub fn stages(&self) -> &[LoweringStage] {
        &self.stages
    }

    /// Stage names in run order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// One rewriter per stage, chained
    pub fn to_chain(&self) -> PassChain {
        let mut chain = PassChain::new("lowering");
        for stage in &self.stages {
            let rewriter = Rewriter::new(stage.registry.clone())
                .with_config(self.config.clone())
                .with_name(stage.name.clone());
            chain.push(Box::new(rewriter));
        }
        chain
    }
}

impl GraphPass for LoweringPipeline {
    fn name(&self) -> &str {
        "lowering"
    }

    fn run(&self, graph: &mut OpGraph) -> FuseResult<RewriteStats> {
        self.to_chain().run(graph)
    }
}

// ============================================================================
// Factory helpers
// ============================================================================

fn bound(binding: &MatchBinding, label: &str) -> FuseResult<NodeId> {
    binding
        .get(label)
        .ok_or_else(|| FuseError::InvalidReplacement {
            rule: binding.pattern.clone(),
            reason: format!("label '{}' is not bound", label),
        })
}

fn input_of(graph: &OpGraph, node: NodeId, port: usize) -> FuseResult<ValueId> {
    graph
        .input_value(node, port)
        .ok_or_else(|| FuseError::UnknownValue(format!("{} input {}", node, port)))
}

fn kind_of(graph: &OpGraph, node: NodeId) -> FuseResult<OpKind> {
    graph
        .kind(node)
        .ok_or_else(|| FuseError::UnknownNode(node.to_string()))
}

/// Same kind and attributes as `node`
fn rebuild(graph: &OpGraph, node: NodeId) -> FuseResult<FusedOp> {
    let mut op = FusedOp::new(kind_of(graph, node)?);
    if let Some(attrs) = graph.attrs(node) {
        op.attrs.merge_missing(attrs);
    }
    Ok(op)
}

/// Scales of a quantization op; must be present and non-zero
pub fn scales_of(graph: &OpGraph, node: NodeId) -> FuseResult<Vec<f32>> {
    let scales = graph
        .attrs(node)
        .and_then(|a| a.get_floats(SCALES))
        .ok_or_else(|| FuseError::InvalidAttribute {
            name: SCALES.to_string(),
            reason: format!("{} has no float scales", node),
        })?;
    if scales.is_empty() || scales.iter().any(|s| *s == 0.0) {
        return Err(FuseError::InvalidAttribute {
            name: SCALES.to_string(),
            reason: format!("{} has empty or zero scales {:?}", node, scales),
        });
    }
    Ok(scales.to_vec())
}

/// Zero points of a quantization op, empty when absent
pub fn zps_of(graph: &OpGraph, node: NodeId) -> Vec<i64> {
    graph
        .attrs(node)
        .and_then(|a| a.get_ints(ZPS))
        .map(|z| z.to_vec())
        .unwrap_or_default()
}

/// Element-wise product; a single-element side broadcasts
pub fn broadcast_mul(a: &[f32], b: &[f32]) -> FuseResult<Vec<f32>> {
    match (a, b) {
        ([s], _) => Ok(b.iter().map(|x| x * s).collect()),
        (_, [s]) => Ok(a.iter().map(|x| x * s).collect()),
        _ if a.len() == b.len() => Ok(a.iter().zip(b).map(|(x, y)| x * y).collect()),
        _ => Err(FuseError::InvalidAttribute {
            name: SCALES.to_string(),
            reason: format!("cannot combine {} scales with {}", a.len(), b.len()),
        }),
    }
}

fn labelled(
    pg: &mut PatternGraph,
    kinds: &[OpKind],
    in_edges: &[InEdge],
    label: &str,
) -> FuseResult<PatternNodeId> {
    let id = pg.append_alternation(kinds, in_edges)?;
    pg.set_node_name(id, label)?;
    Ok(id)
}

// ============================================================================
// Stage 1: casts
// ============================================================================

/// `Dequantize -> TypeCast(bf16)`
fn bf16_cast_of_dequantize(pg: &mut PatternGraph, label: &str) -> FuseResult<PatternNodeId> {
    let cast = labelled(pg, &[OpKind::TypeCast], &[], label)?;
    pg.append_decision_function(cast, check_output_dtype(DataType::Bf16))?;
    pg.append_decision_function(cast, check_producer_kind(0, DEQUANTIZE))?;
    Ok(cast)
}

/// bf16 casts of both dequantized operands fold into the compute op
pub fn fuse_typecast_to_matmul() -> FuseResult<FusionRule> {
    FusionRule::builder("fuse_typecast_to_matmul")
        .priority(PRIORITY)
        .pattern(|pg| {
            let src = bf16_cast_of_dequantize(pg, "src_cast")?;
            let wei = bf16_cast_of_dequantize(pg, "wei_cast")?;
            labelled(
                pg,
                CAST_COMPUTE_OPS,
                &[in_edge(0, src, 0), in_edge(1, wei, 0)],
                COMPUTE,
            )?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let compute = bound(binding, COMPUTE)?;
            let mut inputs = vec![
                input_of(graph, bound(binding, "src_cast")?, 0)?,
                input_of(graph, bound(binding, "wei_cast")?, 0)?,
            ];
            inputs.extend(graph.input_values(compute).iter().skip(2).copied());

            let mut op = rebuild(graph, compute)?.with_inputs(inputs);
            if let Some(dtype) = graph.output_dtype(compute, 0) {
                op = op.with_attr(DST_DTYPE, dtype.as_str());
            }
            Ok(op.into())
        }))
        .build()
}

/// bf16 cast of a dequantized addend folds into the Add
pub fn fuse_typecast_to_add() -> FuseResult<FusionRule> {
    FusionRule::builder("fuse_typecast_to_add")
        .priority(PRIORITY)
        .pattern(|pg| {
            let cast = bf16_cast_of_dequantize(pg, "other_cast")?;
            labelled(pg, &[OpKind::Add], &[in_edge(1, cast, 0)], "add")?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let add = bound(binding, "add")?;
            let inputs = vec![
                input_of(graph, add, 0)?,
                input_of(graph, bound(binding, "other_cast")?, 0)?,
            ];
            Ok(rebuild(graph, add)?.with_inputs(inputs).into())
        }))
        .build()
}

/// Body matching one single-input eltwise op of a bf16 tail
fn bf16_tail_body() -> FuseResult<PatternGraph> {
    let mut body = PatternGraph::new("bf16_tail_op");
    let op = labelled(&mut body, ELTWISE_OPS, &[], POST_OP)?;
    body.append_decision_function(op, check_input_num(1))?;
    body.create_input_port(0, op, 0)?;
    body.create_output_port(0, op, 0)?;
    Ok(body)
}

/// A compute op over dequantized operands writing bf16, followed by
/// optional eltwise ops and a bf16 -> f32 cast into a Quantize, computes
/// in f32 instead and the cast is dropped
///
/// Registered ahead of `fuse_post_typecast_to_quantize` so the whole tail
/// wins the tie.
pub fn fuse_post_typecast_to_matmul() -> FuseResult<FusionRule> {
    let variant = |with_tail: bool| {
        move |pg: &mut PatternGraph| -> FuseResult<()> {
            let compute = labelled(pg, CAST_COMPUTE_OPS, &[], COMPUTE)?;
            pg.append_decision_function(compute, check_producer_kind(0, DEQUANTIZE))?;
            pg.append_decision_function(compute, check_producer_kind(1, DEQUANTIZE))?;
            pg.append_decision_function(compute, check_output_dtype(DataType::Bf16))?;
            let mut tail = compute;
            if with_tail {
                tail = pg.append_repetition(
                    bf16_tail_body()?,
                    PortMap::new(0, 0),
                    1,
                    MAX_REPETITION,
                    &[in_edge(0, compute, 0)],
                )?;
            }
            let cast = labelled(pg, &[OpKind::TypeCast], &[in_edge(0, tail, 0)], "cast")?;
            pg.append_decision_function(cast, check_input_dtype(DataType::Bf16))?;
            pg.append_decision_function(cast, check_output_dtype(DataType::F32))?;
            labelled(pg, &[OpKind::Quantize], &[in_edge(0, cast, 0)], "quantize")?;
            Ok(())
        }
    };
    FusionRule::builder("fuse_post_typecast_to_matmul")
        .priority(PRIORITY)
        .pattern(variant(false))?
        .pattern(variant(true))?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let compute = bound(binding, COMPUTE)?;
            let inputs = graph.input_values(compute).to_vec();
            let mut ops = vec![rebuild(graph, compute)?
                .with_attr(DST_DTYPE, DataType::F32.as_str())
                .with_inputs(inputs)];
            for node in binding.get_all(POST_OP) {
                ops.push(rebuild(graph, node)?);
            }
            ops.push(rebuild(graph, bound(binding, "quantize")?)?);
            Ok(Replacement::Chain(ops))
        }))
        .build()
}

/// bf16 -> f32 cast right before a Quantize is dropped
pub fn fuse_post_typecast_to_quantize() -> FuseResult<FusionRule> {
    FusionRule::builder("fuse_post_typecast_to_quantize")
        .priority(PRIORITY)
        .pattern(|pg| {
            let cast = labelled(pg, &[OpKind::TypeCast], &[], "cast")?;
            pg.append_decision_function(cast, check_input_dtype(DataType::Bf16))?;
            labelled(pg, &[OpKind::Quantize], &[in_edge(0, cast, 0)], "quantize")?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let inputs = vec![input_of(graph, bound(binding, "cast")?, 0)?];
            Ok(rebuild(graph, bound(binding, "quantize")?)?
                .with_inputs(inputs)
                .into())
        }))
        .build()
}

// ============================================================================
// Stage 2: bias
// ============================================================================

/// Two-input compute followed by BiasAdd becomes a three-input compute
pub fn fuse_bias_add() -> FuseResult<FusionRule> {
    FusionRule::builder("fuse_bias_add")
        .priority(PRIORITY)
        .pattern(|pg| {
            let compute = labelled(pg, COMPUTE_OPS, &[], COMPUTE)?;
            pg.append_decision_function(compute, check_input_num(2))?;
            pg.append_op(OpKind::BiasAdd, &[in_edge(0, compute, 0)])?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let compute = bound(binding, COMPUTE)?;
            Ok(rebuild(graph, compute)?.with_attr(WITH_BIAS, true).into())
        }))
        .build()
}

// ============================================================================
// Stage 3: quantization split
// ============================================================================

/// Quantize and Dequantize become scale and zero-point steps
///
/// - `Quantize`: `MulScales(1 / scale)` then `AddZps(zps)`
/// - `Dequantize`: `SubZps(zps)` then `MulScales(scale)`
///
/// The zero-point step is left out when every zero point is 0.
pub fn split_quant_dequant() -> FuseResult<FusionRule> {
    FusionRule::builder("split_quant_dequant")
        .priority(PRIORITY)
        .pattern(|pg| {
            labelled(pg, QUANT_OPS, &[], "quant")?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let node = bound(binding, "quant")?;
            let scales = scales_of(graph, node)?;
            let zps = zps_of(graph, node);
            let axis = graph.attrs(node).and_then(|a| a.get_int("axis"));

            let with_axis = |op: FusedOp| match axis {
                Some(axis) => op.with_attr("axis", axis),
                None => op,
            };
            let zp_step = if zps.iter().any(|z| *z != 0) {
                Some(zps)
            } else {
                None
            };

            let ops = match kind_of(graph, node)? {
                OpKind::Quantize => {
                    let inverse: Vec<f32> = scales.iter().map(|s| 1.0 / s).collect();
                    let mut ops =
                        vec![with_axis(FusedOp::new(OpKind::MulScales).with_attr(SCALES, inverse))];
                    if let Some(zps) = zp_step {
                        ops.push(with_axis(FusedOp::new(OpKind::AddZps).with_attr(ZPS, zps)));
                    }
                    ops
                }
                _ => {
                    let mut ops = Vec::with_capacity(2);
                    if let Some(zps) = zp_step {
                        ops.push(with_axis(FusedOp::new(OpKind::SubZps).with_attr(ZPS, zps)));
                    }
                    ops.push(with_axis(FusedOp::new(OpKind::MulScales).with_attr(SCALES, scales)));
                    ops
                }
            };
            Ok(Replacement::Chain(ops))
        }))
        .build()
}

// ============================================================================
// Stage 4: scale folding
// ============================================================================

/// Two or more back-to-back MulScales collapse into one
pub fn fold_mul_scales() -> FuseResult<FusionRule> {
    FusionRule::builder("fold_mul_scales")
        .priority(PRIORITY)
        .pattern(|pg| {
            let mut body = PatternGraph::new("mul_scales_unit");
            let unit = labelled(&mut body, &[OpKind::MulScales], &[], "scale")?;
            body.create_input_port(0, unit, 0)?;
            body.create_output_port(0, unit, 0)?;
            pg.append_repetition(body, PortMap::new(0, 0), 2, MAX_REPETITION, &[])?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let mut product = vec![1.0f32];
            for node in binding.get_all("scale") {
                let scales = graph
                    .attrs(node)
                    .and_then(|a| a.get_floats(SCALES))
                    .unwrap_or(&[1.0]);
                product = broadcast_mul(&product, scales)?;
            }
            Ok(FusedOp::new(OpKind::MulScales)
                .with_attr(SCALES, product)
                .into())
        }))
        .build()
}

// ============================================================================
// Stages 5-8: int8 compute
// ============================================================================

fn scales_attr(graph: &OpGraph, node: NodeId) -> Vec<f32> {
    graph
        .attrs(node)
        .and_then(|a| a.get_floats(SCALES))
        .map(|s| s.to_vec())
        .unwrap_or_else(|| vec![1.0])
}

/// Scaled operands of a compute op: the scales move behind it
///
/// Only for computes without a bias: `(a * s) x (w * t) + b` is not
/// `((a x w) + b) * s * t`, and rescaling the bias tensor is not a graph
/// rewrite. A biased compute keeps its operand scales.
pub fn fuse_to_int8_compute() -> FuseResult<FusionRule> {
    FusionRule::builder("fuse_to_int8_compute")
        .priority(PRIORITY)
        .pattern(|pg| {
            let src = labelled(pg, &[OpKind::MulScales], &[], "src_scales")?;
            let wei = labelled(pg, &[OpKind::MulScales], &[], "wei_scales")?;
            let compute = labelled(
                pg,
                COMPUTE_OPS,
                &[in_edge(0, src, 0), in_edge(1, wei, 0)],
                COMPUTE,
            )?;
            pg.append_decision_function(compute, check_input_num(2))?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let compute = bound(binding, COMPUTE)?;
            let src = bound(binding, "src_scales")?;
            let wei = bound(binding, "wei_scales")?;

            let inputs = vec![input_of(graph, src, 0)?, input_of(graph, wei, 0)?];
            let scales = broadcast_mul(&scales_attr(graph, src), &scales_attr(graph, wei))?;

            Ok(Replacement::Chain(vec![
                rebuild(graph, compute)?.with_inputs(inputs),
                FusedOp::new(OpKind::MulScales).with_attr(SCALES, scales),
            ]))
        }))
        .build()
}

/// A MulScales right after a compute op becomes its `output_scales`
pub fn fuse_output_scales() -> FuseResult<FusionRule> {
    FusionRule::builder("fuse_output_scales")
        .priority(PRIORITY)
        .pattern(|pg| {
            let compute = labelled(pg, COMPUTE_OPS, &[], COMPUTE)?;
            labelled(pg, &[OpKind::MulScales], &[in_edge(0, compute, 0)], "scale")?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let compute = bound(binding, COMPUTE)?;
            let scale = scales_attr(graph, bound(binding, "scale")?);
            let combined = match graph.attrs(compute).and_then(|a| a.get_floats(OUTPUT_SCALES)) {
                Some(existing) => broadcast_mul(existing, &scale)?,
                None => scale,
            };
            Ok(rebuild(graph, compute)?
                .with_attr(OUTPUT_SCALES, combined)
                .into())
        }))
        .build()
}

/// SubZps on input 0 of a compute op becomes its `src_zps`
pub fn fuse_src_zero_points() -> FuseResult<FusionRule> {
    FusionRule::builder("fuse_src_zero_points")
        .priority(PRIORITY)
        .pattern(|pg| {
            let zps = labelled(pg, &[OpKind::SubZps], &[], "zps")?;
            labelled(pg, COMPUTE_OPS, &[in_edge(0, zps, 0)], COMPUTE)?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let compute = bound(binding, COMPUTE)?;
            let zps = bound(binding, "zps")?;
            let mut inputs = vec![input_of(graph, zps, 0)?];
            inputs.extend(graph.input_values(compute).iter().skip(1).copied());
            Ok(rebuild(graph, compute)?
                .with_attr(SRC_ZPS, zps_of(graph, zps))
                .with_inputs(inputs)
                .into())
        }))
        .build()
}

/// AddZps right after a compute op becomes its `dst_zps`
pub fn fuse_dst_zero_points() -> FuseResult<FusionRule> {
    FusionRule::builder("fuse_dst_zero_points")
        .priority(PRIORITY)
        .pattern(|pg| {
            let compute = labelled(pg, COMPUTE_OPS, &[], COMPUTE)?;
            labelled(pg, &[OpKind::AddZps], &[in_edge(0, compute, 0)], "zps")?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let compute = bound(binding, COMPUTE)?;
            let zps = zps_of(graph, bound(binding, "zps")?);
            Ok(rebuild(graph, compute)?.with_attr(DST_ZPS, zps).into())
        }))
        .build()
}

/// A standalone `MulScales -> AddZps` (a quantize left outside any compute)
/// becomes one MulScales carrying `dst_zps`
pub fn fuse_mul_scales_add_zps() -> FuseResult<FusionRule> {
    FusionRule::builder("fuse_mul_scales_add_zps")
        .priority(PRIORITY)
        .pattern(|pg| {
            let scale = labelled(pg, &[OpKind::MulScales], &[], "scale")?;
            labelled(pg, &[OpKind::AddZps], &[in_edge(0, scale, 0)], "zps")?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let scale = bound(binding, "scale")?;
            let zps = zps_of(graph, bound(binding, "zps")?);
            Ok(rebuild(graph, scale)?
                .with_attr(DST_ZPS, zps)
                .with_inputs(vec![input_of(graph, scale, 0)?])
                .into())
        }))
        .build()
}

// ============================================================================
// Stages 9-10: activations
// ============================================================================

/// The Multiply is gated by a Sigmoid of its other operand
fn check_gated_by_own_sigmoid(gate_port: usize) -> Predicate {
    let data_port = 1 - gate_port;
    Predicate::new(
        format!("input[{}]==sigmoid(input[{}]).input[0]", data_port, gate_port),
        move |g, node| {
            let gate = match g.input_producer(node, gate_port) {
                Some(p) => p.node,
                None => return false,
            };
            let x = g.input_value(gate, 0);
            g.kind(gate) == Some(OpKind::Sigmoid) && x.is_some() && x == g.input_value(node, data_port)
        },
    )
}

/// `x * sigmoid(x)` (either operand order) becomes Swish
pub fn fuse_mul_sigmoid_to_swish() -> FuseResult<FusionRule> {
    let variant = |gate_port: usize| {
        move |pg: &mut PatternGraph| -> FuseResult<()> {
            let sigmoid = labelled(pg, &[OpKind::Sigmoid], &[], "sigmoid")?;
            let mul = pg.append_op(OpKind::Multiply, &[in_edge(gate_port, sigmoid, 0)])?;
            pg.append_decision_function(mul, check_gated_by_own_sigmoid(gate_port))?;
            Ok(())
        }
    };
    FusionRule::builder("fuse_mul_sigmoid_to_swish")
        .priority(PRIORITY)
        .pattern(variant(1))?
        .pattern(variant(0))?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let x = input_of(graph, bound(binding, "sigmoid")?, 0)?;
            Ok(FusedOp::new(OpKind::Swish).with_inputs(vec![x]).into())
        }))
        .build()
}

/// Elementwise tail of a compute op becomes its `post_ops`
pub fn fuse_post_ops() -> FuseResult<FusionRule> {
    FusionRule::builder("fuse_post_ops")
        .priority(PRIORITY)
        .pattern(|pg| {
            let compute = labelled(pg, COMPUTE_OPS, &[], COMPUTE)?;
            let kinds: Vec<OpKind> = POST_OPS
                .iter()
                .copied()
                .chain(std::iter::once(OpKind::Swish))
                .collect();
            let body = post_op_body("lowered_post_op", &kinds)?;
            pg.append_repetition(
                body,
                PortMap::new(0, 0),
                1,
                MAX_REPETITION,
                &[in_edge(0, compute, 0)],
            )?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let compute = bound(binding, COMPUTE)?;
            let mut post_ops: Vec<String> = graph
                .attrs(compute)
                .and_then(|a| a.get_strs(POST_OPS_ATTR))
                .map(|p| p.to_vec())
                .unwrap_or_default();
            post_ops.extend(post_op_names(graph, binding));
            Ok(rebuild(graph, compute)?
                .with_attr(POST_OPS_ATTR, post_ops)
                .into())
        }))
        .build()
}
