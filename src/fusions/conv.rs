//! Convolution and pooling fusions

use crate::error::FuseResult;
use crate::graph::{DataType, OpKind};
use crate::pattern::predicate::{check_input_dtype, check_input_num};
use crate::pattern::{in_edge, PatternGraph, BINARY_OPS, POOL_OPS};
use crate::transform::{FusedOp, FusedOpFactory, FusionRule, PassRegistry};

use super::common::{post_ops_chain_factory, quantized_factory, POST_OPS_ATTR};
use super::matmul::{append_compute, append_post_ops_tail};
use super::quantized_matmul::{Bias, Post};

/// Register the conv and pool rule set
pub fn register(registry: &mut PassRegistry) -> FuseResult<()> {
    registry.add(conv_post_ops_chain_fusion()?)?;
    registry.add(conv_bias_post_ops_chain_fusion()?)?;
    for &(name, priority, kind, bias, post) in INT8_CONV_RULES {
        registry.add(int8_conv_rule(name, priority, kind, bias, post)?)?;
    }
    registry.add(pool_binary_fusion()?)?;
    registry.add(int8_pool_fusion()?)?;
    Ok(())
}

/// Unbiased convolution followed by an optional BN and any post ops
pub fn conv_post_ops_chain_fusion() -> FuseResult<FusionRule> {
    FusionRule::builder("conv_post_ops_chain_fusion")
        .priority(8.8)
        .pattern(|pg| {
            let conv = append_compute(pg, OpKind::Convolution, 2)?;
            append_post_ops_tail(pg, conv)
        })?
        .fused_op(post_ops_chain_factory(OpKind::ConvPostOpsChain))
        .build()
}

/// Biased convolution followed by an optional BN and any post ops
pub fn conv_bias_post_ops_chain_fusion() -> FuseResult<FusionRule> {
    FusionRule::builder("conv_bias_post_ops_chain_fusion")
        .priority(8.9)
        .pattern(|pg| {
            let conv = append_compute(pg, OpKind::Convolution, 2)?;
            let bias = pg.append_op(OpKind::BiasAdd, &[in_edge(0, conv, 0)])?;
            append_post_ops_tail(pg, bias)
        })?
        .pattern(|pg| {
            let conv = append_compute(pg, OpKind::Convolution, 3)?;
            append_post_ops_tail(pg, conv)
        })?
        .fused_op(post_ops_chain_factory(OpKind::ConvBiasPostOpsChain))
        .build()
}

type Int8ConvRow = (&'static str, f32, OpKind, Bias, Post);

#[rustfmt::skip]
const INT8_CONV_RULES: &[Int8ConvRow] = &[
    ("int8_conv_fusion", 9.9, OpKind::Int8Conv, Bias::None, Post::None),
    ("int8_conv_bias_fusion", 10.0, OpKind::Int8ConvBias, Bias::Either, Post::None),
    ("int8_conv_relu_fusion", 10.0, OpKind::Int8ConvRelu, Bias::None, Post::Eltwise(OpKind::Relu)),
    ("int8_conv_bias_relu_fusion", 10.1, OpKind::Int8ConvBiasRelu, Bias::Either, Post::Eltwise(OpKind::Relu)),
    ("int8_conv_add_fusion", 10.1, OpKind::Int8ConvAdd, Bias::None, Post::Add),
    ("int8_conv_bias_add_fusion", 10.2, OpKind::Int8ConvBiasAdd, Bias::Either, Post::Add),
];

const CONV_PARAMS: &[(&str, &str)] = &[
    ("dequant_data", "src"),
    ("dequant_weight", "wei"),
    ("dequant_other", "other"),
    ("quantize_dst", "dst"),
];

fn int8_conv_rule(
    name: &str,
    priority: f32,
    kind: OpKind,
    bias: Bias,
    post: Post,
) -> FuseResult<FusionRule> {
    let mut builder = FusionRule::builder(name).priority(priority);
    match bias {
        Bias::None => {
            builder = builder.pattern(|pg| int8_conv_pattern(pg, 2, false, post))?;
        }
        _ => {
            builder = builder
                .pattern(|pg| int8_conv_pattern(pg, 2, true, post))?
                .pattern(|pg| int8_conv_pattern(pg, 3, false, post))?;
        }
    }
    builder
        .fused_op(quantized_factory(kind, bias != Bias::None, CONV_PARAMS))
        .build()
}

fn int8_conv_pattern(
    pg: &mut PatternGraph,
    inputs: usize,
    bias_add: bool,
    post: Post,
) -> FuseResult<()> {
    let dq_data = pg.append_op(OpKind::Dequantize, &[])?;
    pg.set_node_name(dq_data, "dequant_data")?;
    let dq_weight = pg.append_op(OpKind::Dequantize, &[])?;
    pg.set_node_name(dq_weight, "dequant_weight")?;
    pg.append_decision_function(dq_weight, check_input_dtype(DataType::S8))?;

    let conv = pg.append_op(
        OpKind::Convolution,
        &[in_edge(0, dq_data, 0), in_edge(1, dq_weight, 0)],
    )?;
    pg.append_decision_function(conv, check_input_num(inputs))?;

    let mut tail = conv;
    if bias_add {
        tail = pg.append_op(OpKind::BiasAdd, &[in_edge(0, tail, 0)])?;
    }
    match post {
        Post::Eltwise(kind) => {
            tail = pg.append_op(kind, &[in_edge(0, tail, 0)])?;
        }
        Post::Add => {
            let dq_other = pg.append_op(OpKind::Dequantize, &[])?;
            pg.set_node_name(dq_other, "dequant_other")?;
            tail = pg.append_op(OpKind::Add, &[in_edge(0, tail, 0), in_edge(1, dq_other, 0)])?;
        }
        _ => {}
    }
    let q = pg.append_op(OpKind::Quantize, &[in_edge(0, tail, 0)])?;
    pg.set_node_name(q, "quantize_dst")?;
    Ok(())
}

/// Pooling feeding input 0 of a binary op
pub fn pool_binary_fusion() -> FuseResult<FusionRule> {
    FusionRule::builder("pool_binary_fusion")
        .priority(9.9)
        .pattern(|pg| {
            let pool = pg.append_alternation(POOL_OPS, &[])?;
            pg.set_node_name(pool, "pool")?;
            let binary = pg.append_alternation(BINARY_OPS, &[in_edge(0, pool, 0)])?;
            pg.set_node_name(binary, "binary")?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let mut op = FusedOp::new(OpKind::PoolBinary);
            if let Some(attrs) = binding.get("pool").and_then(|n| graph.attrs(n)) {
                op.attrs.merge_missing(attrs);
            }
            if let Some(kind) = binding.get("pool").and_then(|n| graph.kind(n)) {
                op = op.with_attr("kind", kind.as_str());
            }
            if let Some(kind) = binding.get("binary").and_then(|n| graph.kind(n)) {
                op = op.with_attr(POST_OPS_ATTR, vec![kind.as_str().to_string()]);
            }
            Ok(op.into())
        }))
        .build()
}

const POOL_PARAMS: &[(&str, &str)] = &[("dequant_data", "src"), ("quantize_dst", "dst")];

/// Quantized pooling
pub fn int8_pool_fusion() -> FuseResult<FusionRule> {
    FusionRule::builder("int8_pool_fusion")
        .priority(10.0)
        .pattern(|pg| {
            let dq = pg.append_op(OpKind::Dequantize, &[])?;
            pg.set_node_name(dq, "dequant_data")?;
            let pool = pg.append_alternation(POOL_OPS, &[in_edge(0, dq, 0)])?;
            let q = pg.append_op(OpKind::Quantize, &[in_edge(0, pool, 0)])?;
            pg.set_node_name(q, "quantize_dst")?;
            Ok(())
        })?
        .fused_op(quantized_factory(OpKind::Int8Pool, false, POOL_PARAMS))
        .build()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fusions::common::WITH_BIAS;
    use crate::graph::{Attributes, OpGraph, ValueId};
    use crate::transform::Rewriter;

    fn make_registry() -> Arc<PassRegistry> {
        let mut registry = PassRegistry::default();
        register(&mut registry).unwrap();
        Arc::new(registry)
    }

    fn dequantize(g: &mut OpGraph, dtype: DataType) -> ValueId {
        let x = g.add_input(dtype);
        let attrs = Attributes::new().with("scales", vec![0.5f32]);
        let dq = g
            .add_op_with_attrs(OpKind::Dequantize, &[x], &[DataType::F32], attrs)
            .unwrap();
        g.output_value(dq, 0).unwrap()
    }

    fn quantize_out(g: &mut OpGraph, v: ValueId) {
        let q = g.add_op(OpKind::Quantize, &[v], &[DataType::U8]).unwrap();
        let out = g.output_value(q, 0).unwrap();
        g.mark_output(out).unwrap();
    }

    #[test]
    fn test_int8_conv_bias_add() {
        let mut g = OpGraph::new();
        let a = dequantize(&mut g, DataType::U8);
        let w = dequantize(&mut g, DataType::S8);
        let conv = g.add_op(OpKind::Convolution, &[a, w], &[DataType::F32]).unwrap();
        let v = g.output_value(conv, 0).unwrap();
        let b = g.add_input(DataType::F32);
        let bias = g.add_op(OpKind::BiasAdd, &[v, b], &[DataType::F32]).unwrap();
        let v = g.output_value(bias, 0).unwrap();
        let other = dequantize(&mut g, DataType::U8);
        let add = g.add_op(OpKind::Add, &[v, other], &[DataType::F32]).unwrap();
        let v = g.output_value(add, 0).unwrap();
        quantize_out(&mut g, v);

        let stats = Rewriter::new(make_registry()).run_all(&mut g).unwrap();
        assert_eq!(stats.commits_of("int8_conv_bias_add_fusion"), 1);
        assert_eq!(g.kinds_in_order(), vec![OpKind::Int8ConvBiasAdd]);

        let fused = g.find_nodes_by_kind(OpKind::Int8ConvBiasAdd)[0];
        let attrs = g.attrs(fused).unwrap();
        assert_eq!(attrs.get_bool(WITH_BIAS), Some(true));
        assert!(attrs.contains("other_scales"));
        assert_eq!(g.num_inputs(fused), 4);
    }

    #[test]
    fn test_u8_weight_falls_back_to_float_chain() {
        let mut g = OpGraph::new();
        let a = dequantize(&mut g, DataType::U8);
        let w = dequantize(&mut g, DataType::U8);
        let conv = g.add_op(OpKind::Convolution, &[a, w], &[DataType::F32]).unwrap();
        let v = g.output_value(conv, 0).unwrap();
        quantize_out(&mut g, v);

        let stats = Rewriter::new(make_registry()).run_all(&mut g).unwrap();
        assert_eq!(stats.commits_of("int8_conv_fusion"), 0);
        assert_eq!(stats.commits_of("conv_post_ops_chain_fusion"), 1);
        assert_eq!(g.count_kind(OpKind::ConvPostOpsChain), 1);
        assert_eq!(g.count_kind(OpKind::Dequantize), 2);
    }

    #[test]
    fn test_pool_binary_and_int8_pool() {
        let mut g = OpGraph::new();
        let x = g.add_input(DataType::F32);
        let y = g.add_input(DataType::F32);
        let pool = g.add_op(OpKind::MaxPool, &[x], &[DataType::F32]).unwrap();
        let p = g.output_value(pool, 0).unwrap();
        let add = g.add_op(OpKind::Add, &[p, y], &[DataType::F32]).unwrap();
        let out = g.output_value(add, 0).unwrap();
        g.mark_output(out).unwrap();

        let a = dequantize(&mut g, DataType::U8);
        let pool = g.add_op(OpKind::AvgPool, &[a], &[DataType::F32]).unwrap();
        let v = g.output_value(pool, 0).unwrap();
        quantize_out(&mut g, v);

        let stats = Rewriter::new(make_registry()).run_all(&mut g).unwrap();
        assert_eq!(stats.commits_of("pool_binary_fusion"), 1);
        assert_eq!(stats.commits_of("int8_pool_fusion"), 1);

        let fused = g.find_nodes_by_kind(OpKind::PoolBinary)[0];
        assert_eq!(g.attrs(fused).and_then(|a| a.get_str("kind")), Some("MaxPool"));
        assert_eq!(g.input_values(fused), &[x, y]);
    }
}
