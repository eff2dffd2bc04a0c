//! Eltwise fusions
//!
//! - `eltwise_binary_fusion`: eltwise -> binary (port 0)
//! - `chained_relu_fusion`: one or more back-to-back ReLUs
//! - `int8_relu_fusion`: Dequantize -> ReLU -> Quantize
//! - `int8_relu_add_fusion`: Dequantize -> ReLU -> Add(Dequantize) -> Quantize

use crate::error::FuseResult;
use crate::graph::OpKind;
use crate::pattern::{in_edge, PortMap, BINARY_OPS, ELTWISE_OPS, MAX_REPETITION};
use crate::transform::{FusedOp, FusedOpFactory, FusionRule, PassRegistry};

use super::common::{post_op_body, quantized_factory, POST_OPS_ATTR};

/// Register the eltwise rule set
pub fn register(registry: &mut PassRegistry) -> FuseResult<()> {
    registry.add(eltwise_binary_fusion()?)?;
    registry.add(chained_relu_fusion()?)?;
    registry.add(int8_relu_fusion()?)?;
    registry.add(int8_relu_add_fusion()?)?;
    Ok(())
}

/// Eltwise op feeding input 0 of a binary op
pub fn eltwise_binary_fusion() -> FuseResult<FusionRule> {
    FusionRule::builder("eltwise_binary_fusion")
        .priority(8.2)
        .pattern(|pg| {
            let eltwise = pg.append_alternation(ELTWISE_OPS, &[])?;
            pg.set_node_name(eltwise, "eltwise")?;
            let binary = pg.append_alternation(BINARY_OPS, &[in_edge(0, eltwise, 0)])?;
            pg.set_node_name(binary, "binary")?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|graph, binding| {
            let kinds: Vec<String> = ["eltwise", "binary"]
                .iter()
                .filter_map(|label| binding.get(label))
                .filter_map(|n| graph.kind(n))
                .map(|k| k.as_str().to_string())
                .collect();
            Ok(FusedOp::new(OpKind::EltwiseBinary)
                .with_attr(POST_OPS_ATTR, kinds)
                .into())
        }))
        .build()
}

/// Back-to-back ReLUs collapse into one node
pub fn chained_relu_fusion() -> FuseResult<FusionRule> {
    FusionRule::builder("chained_relu_fusion")
        .priority(5.0)
        .pattern(|pg| {
            let body = post_op_body("chained_relu", &[OpKind::Relu])?;
            pg.append_repetition(body, PortMap::new(0, 0), 1, MAX_REPETITION, &[])?;
            Ok(())
        })?
        .fused_op(FusedOpFactory::new(|_, binding| {
            Ok(FusedOp::new(OpKind::ChainedRelu)
                .with_attr("count", binding.len() as i64)
                .into())
        }))
        .build()
}

const INT8_RELU_PARAMS: &[(&str, &str)] = &[("dequant_data", "src"), ("quantize", "dst")];

/// Quantized ReLU
pub fn int8_relu_fusion() -> FuseResult<FusionRule> {
    FusionRule::builder("int8_relu_fusion")
        .priority(9.9)
        .pattern(|pg| {
            let dq = pg.append_op(OpKind::Dequantize, &[])?;
            pg.set_node_name(dq, "dequant_data")?;
            let relu = pg.append_op(OpKind::Relu, &[in_edge(0, dq, 0)])?;
            let q = pg.append_op(OpKind::Quantize, &[in_edge(0, relu, 0)])?;
            pg.set_node_name(q, "quantize")?;
            Ok(())
        })?
        .fused_op(quantized_factory(OpKind::Int8Relu, false, INT8_RELU_PARAMS))
        .build()
}

const INT8_RELU_ADD_PARAMS: &[(&str, &str)] = &[
    ("dequant_data", "src"),
    ("dequant_other", "other"),
    ("quantize", "dst"),
];

/// Quantized ReLU followed by a residual add of another dequantized input
pub fn int8_relu_add_fusion() -> FuseResult<FusionRule> {
    FusionRule::builder("int8_relu_add_fusion")
        .priority(10.0)
        .pattern(|pg| {
            let dq = pg.append_op(OpKind::Dequantize, &[])?;
            pg.set_node_name(dq, "dequant_data")?;
            let dq_other = pg.append_op(OpKind::Dequantize, &[])?;
            pg.set_node_name(dq_other, "dequant_other")?;
            let relu = pg.append_op(OpKind::Relu, &[in_edge(0, dq, 0)])?;
            let add = pg.append_op(
                OpKind::Add,
                &[in_edge(0, relu, 0), in_edge(1, dq_other, 0)],
            )?;
            let q = pg.append_op(OpKind::Quantize, &[in_edge(0, add, 0)])?;
            pg.set_node_name(q, "quantize")?;
            Ok(())
        })?
        .fused_op(quantized_factory(OpKind::Int8ReluAdd, false, INT8_RELU_ADD_PARAMS))
        .build()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::{Attributes, DataType, OpGraph};
    use crate::transform::{Rewriter, BACKEND_ATTR};

    fn make_registry() -> Arc<PassRegistry> {
        let mut registry = PassRegistry::default();
        register(&mut registry).unwrap();
        Arc::new(registry)
    }

    fn make_relu_add_graph() -> OpGraph {
        let mut g = OpGraph::new();
        let x = g.add_input(DataType::U8);
        let y = g.add_input(DataType::U8);
        let dq_attrs = Attributes::new().with("scales", vec![0.1f32]);
        let dq = g
            .add_op_with_attrs(OpKind::Dequantize, &[x], &[DataType::F32], dq_attrs)
            .unwrap();
        let dq_other = g.add_op(OpKind::Dequantize, &[y], &[DataType::F32]).unwrap();
        let a = g.output_value(dq, 0).unwrap();
        let relu = g.add_op(OpKind::Relu, &[a], &[DataType::F32]).unwrap();
        let r = g.output_value(relu, 0).unwrap();
        let b = g.output_value(dq_other, 0).unwrap();
        let add = g.add_op(OpKind::Add, &[r, b], &[DataType::F32]).unwrap();
        let s = g.output_value(add, 0).unwrap();
        let q = g.add_op(OpKind::Quantize, &[s], &[DataType::U8]).unwrap();
        let out = g.output_value(q, 0).unwrap();
        g.mark_output(out).unwrap();
        g
    }

    #[test]
    fn test_int8_relu_add_wins() {
        let mut g = make_relu_add_graph();
        let stats = Rewriter::new(make_registry()).run_all(&mut g).unwrap();

        assert_eq!(stats.commits_of("int8_relu_add_fusion"), 1);
        assert_eq!(g.kinds_in_order(), vec![OpKind::Int8ReluAdd]);

        let fused = g.find_nodes_by_kind(OpKind::Int8ReluAdd)[0];
        assert_eq!(g.num_inputs(fused), 2);
        let attrs = g.attrs(fused).unwrap();
        assert_eq!(attrs.get_floats("src_scales"), Some(&[0.1f32][..]));
        assert_eq!(attrs.get_str(BACKEND_ATTR), Some("dnnl"));
    }

    #[test]
    fn test_eltwise_binary() {
        let mut g = OpGraph::new();
        let x = g.add_input(DataType::F32);
        let y = g.add_input(DataType::F32);
        let tanh = g.add_op(OpKind::Tanh, &[x], &[DataType::F32]).unwrap();
        let t = g.output_value(tanh, 0).unwrap();
        let mul = g.add_op(OpKind::Multiply, &[t, y], &[DataType::F32]).unwrap();
        let out = g.output_value(mul, 0).unwrap();
        g.mark_output(out).unwrap();

        Rewriter::new(make_registry()).run_all(&mut g).unwrap();

        assert_eq!(g.kinds_in_order(), vec![OpKind::EltwiseBinary]);
        let fused = g.find_nodes_by_kind(OpKind::EltwiseBinary)[0];
        let post_ops = g.attrs(fused).and_then(|a| a.get_strs(POST_OPS_ATTR)).unwrap();
        assert_eq!(post_ops, &["Tanh".to_string(), "Multiply".to_string()]);
        assert_eq!(g.input_values(fused), &[x, y]);
    }

    #[test]
    fn test_binary_on_port_one_is_not_fused() {
        let mut g = OpGraph::new();
        let x = g.add_input(DataType::F32);
        let y = g.add_input(DataType::F32);
        let tanh = g.add_op(OpKind::Tanh, &[x], &[DataType::F32]).unwrap();
        let t = g.output_value(tanh, 0).unwrap();
        let sub = g.add_op(OpKind::Subtract, &[y, t], &[DataType::F32]).unwrap();
        let out = g.output_value(sub, 0).unwrap();
        g.mark_output(out).unwrap();

        let stats = Rewriter::new(make_registry()).run_all(&mut g).unwrap();
        assert!(!stats.is_changed());
    }

    #[test]
    fn test_chained_relu_counts() {
        let mut g = OpGraph::new();
        let mut v = g.add_input(DataType::F32);
        for _ in 0..3 {
            let relu = g.add_op(OpKind::Relu, &[v], &[DataType::F32]).unwrap();
            v = g.output_value(relu, 0).unwrap();
        }
        g.mark_output(v).unwrap();

        Rewriter::new(make_registry()).run_all(&mut g).unwrap();

        let fused = g.find_nodes_by_kind(OpKind::ChainedRelu);
        assert_eq!(fused.len(), 1);
        assert_eq!(g.attrs(fused[0]).and_then(|a| a.get_int("count")), Some(3));
    }
}
