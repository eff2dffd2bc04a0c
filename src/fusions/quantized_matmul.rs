//! Quantized matmul fusions
//!
//! The int8/x8x8 matmul family differs only along a few axes (weight
//! path, bias style, post op, output quantization, bf16 casts), so the
//! rules are generated from [`QUANT_MATMUL_RULES`] instead of being
//! written out one by one.
//!
//! | Axis | Values |
//! |------|--------|
//! | weight | any dequantized, s8 dequantized, re-quantized (`quant_wei`) |
//! | bias | none, BiasAdd or third input, third input only |
//! | post op | none, eltwise, Add of a dequantized tensor, Divide, Divide -> Add |
//! | output | Quantize, float |
//! | casts | f32 only, bf16 only, both |

use crate::error::FuseResult;
use crate::graph::{DataType, OpKind};
use crate::pattern::predicate::{check_input_dtype, check_input_num, check_output_dtype};
use crate::pattern::{in_edge, PatternGraph, PatternNodeId};
use crate::transform::{FusionRule, PassRegistry};

use super::common::quantized_factory;

/// Weight path of a quantized matmul
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weight {
    /// Dequantize of any integer dtype
    Any,
    /// Dequantize of an s8 tensor
    S8,
    /// Quantize -> Dequantize(s8), the weight quantized in-graph
    QuantWei,
}

/// How the bias enters the matmul
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    /// No bias: exactly two inputs
    None,
    /// BiasAdd after the matmul, or a third matmul input
    Either,
    /// Third matmul input only
    Input,
}

/// Op fused after the matmul (and bias)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Post {
    /// Nothing
    None,
    /// One eltwise op
    Eltwise(OpKind),
    /// Add with a dequantized tensor on port 1
    Add,
    /// Add with any tensor on port 1
    AddAny,
    /// Divide
    Div,
    /// Divide -> Add
    DivAdd,
}

/// Dtype handling around the matmul
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cast {
    /// Dequantized operands feed the matmul directly
    F32,
    /// Operands go through TypeCast(bf16)
    Bf16,
    /// One variant of each
    Both,
}

/// One row of the quantized matmul table
#[derive(Debug, Clone, Copy)]
pub struct QuantMatmulRule {
    /// Rule name
    pub name: &'static str,
    /// Priority
    pub priority: f32,
    /// Fused kind
    pub kind: OpKind,
    /// Weight path
    pub weight: Weight,
    /// Bias style
    pub bias: Bias,
    /// Post op
    pub post: Post,
    /// Output ends in a Quantize
    pub quantized: bool,
    /// Dtype variants
    pub cast: Cast,
}

#[allow(clippy::too_many_arguments)]
const fn row(
    name: &'static str,
    priority: f32,
    kind: OpKind,
    weight: Weight,
    bias: Bias,
    post: Post,
    quantized: bool,
    cast: Cast,
) -> QuantMatmulRule {
    QuantMatmulRule {
        name,
        priority,
        kind,
        weight,
        bias,
        post,
        quantized,
        cast,
    }
}

use Bias::{Either, Input};
use Cast::{Both, Bf16, F32};
use OpKind::{Gelu, Relu, Sigmoid};
use Weight::{Any, QuantWei, S8};

/// Every quantized matmul rule, in registration order
#[rustfmt::skip]
pub const QUANT_MATMUL_RULES: &[QuantMatmulRule] = &[
    // int8 in, int8 out
    row("int8_matmul_fusion", 9.9, OpKind::Int8Matmul, Any, Bias::None, Post::None, true, Both),
    row("int8_quant_wei_matmul_fusion", 10.0, OpKind::Int8QuantWeiMatmul, QuantWei, Bias::None, Post::None, true, F32),
    row("int8_matmul_bias_fusion", 10.5, OpKind::Int8MatmulBias, S8, Either, Post::None, true, Both),
    row("int8_quant_wei_matmul_bias_fusion", 10.6, OpKind::Int8QuantWeiMatmulBias, QuantWei, Either, Post::None, true, F32),
    row("int8_matmul_relu_fusion", 9.9, OpKind::Int8MatmulRelu, Any, Bias::None, Post::Eltwise(Relu), true, Both),
    row("int8_quant_wei_matmul_relu_fusion", 10.6, OpKind::Int8QuantWeiMatmulRelu, QuantWei, Bias::None, Post::Eltwise(Relu), true, F32),
    row("int8_matmul_bias_relu_fusion", 9.9, OpKind::Int8MatmulBiasRelu, S8, Either, Post::Eltwise(Relu), true, Both),
    row("int8_quant_wei_matmul_bias_relu_fusion", 10.6, OpKind::Int8QuantWeiMatmulBiasRelu, QuantWei, Either, Post::Eltwise(Relu), true, F32),
    row("int8_matmul_sigmoid_fusion", 9.9, OpKind::Int8MatmulSigmoid, Any, Bias::None, Post::Eltwise(Sigmoid), true, Both),
    row("int8_quant_wei_matmul_sigmoid_fusion", 10.6, OpKind::Int8QuantWeiMatmulSigmoid, QuantWei, Bias::None, Post::Eltwise(Sigmoid), true, F32),
    row("int8_matmul_bias_sigmoid_fusion", 9.9, OpKind::Int8MatmulBiasSigmoid, S8, Either, Post::Eltwise(Sigmoid), true, Both),
    row("int8_quant_wei_matmul_bias_sigmoid_fusion", 10.6, OpKind::Int8QuantWeiMatmulBiasSigmoid, QuantWei, Either, Post::Eltwise(Sigmoid), true, F32),
    row("int8_matmul_gelu_fusion", 9.9, OpKind::Int8MatmulGelu, Any, Bias::None, Post::Eltwise(Gelu), true, Both),
    row("int8_quant_wei_matmul_gelu_fusion", 10.6, OpKind::Int8QuantWeiMatmulGelu, QuantWei, Bias::None, Post::Eltwise(Gelu), true, F32),
    row("int8_matmul_bias_gelu_fusion", 10.5, OpKind::Int8MatmulBiasGelu, S8, Either, Post::Eltwise(Gelu), true, Both),
    row("int8_quant_wei_matmul_bias_gelu_fusion", 10.6, OpKind::Int8QuantWeiMatmulBiasGelu, QuantWei, Either, Post::Eltwise(Gelu), true, F32),
    row("int8_matmul_add_fusion", 10.5, OpKind::Int8MatmulAdd, Any, Bias::None, Post::Add, true, Both),
    row("int8_quant_wei_matmul_add_fusion", 10.6, OpKind::Int8QuantWeiMatmulAdd, QuantWei, Bias::None, Post::Add, true, F32),
    row("int8_matmul_bias_add_fusion", 10.5, OpKind::Int8MatmulBiasAdd, S8, Either, Post::Add, true, Both),
    row("int8_quant_wei_matmul_bias_add_fusion", 10.6, OpKind::Int8QuantWeiMatmulBiasAdd, QuantWei, Either, Post::Add, true, F32),
    // int8 in, f32 out
    row("x8x8f32_matmul_fusion", 9.5, OpKind::X8x8FloatMatmul, Any, Bias::None, Post::None, false, F32),
    row("x8s8f32_matmul_bias_fusion", 9.6, OpKind::X8s8FloatMatmulBias, S8, Either, Post::None, false, F32),
    row("x8s8f32_matmul_relu_fusion", 9.6, OpKind::X8s8F32MatmulRelu, S8, Bias::None, Post::Eltwise(Relu), false, F32),
    row("x8s8f32_matmul_bias_relu_fusion", 9.7, OpKind::X8s8F32MatmulBiasRelu, S8, Either, Post::Eltwise(Relu), false, F32),
    row("x8s8f32_matmul_sigmoid_fusion", 9.6, OpKind::X8s8F32MatmulSigmoid, S8, Bias::None, Post::Eltwise(Sigmoid), false, F32),
    row("x8s8f32_matmul_bias_sigmoid_fusion", 9.7, OpKind::X8s8F32MatmulBiasSigmoid, S8, Either, Post::Eltwise(Sigmoid), false, F32),
    row("x8s8f32_matmul_gelu_fusion", 9.6, OpKind::X8s8F32MatmulGelu, S8, Bias::None, Post::Eltwise(Gelu), false, F32),
    row("x8s8f32_matmul_bias_gelu_fusion", 9.7, OpKind::X8s8F32MatmulBiasGelu, S8, Either, Post::Eltwise(Gelu), false, F32),
    row("x8s8f32_quant_wei_matmul_fusion", 9.6, OpKind::X8s8F32QuantWeiMatmul, QuantWei, Bias::None, Post::None, false, F32),
    row("x8s8f32_quant_wei_matmul_bias_fusion", 9.7, OpKind::X8s8F32QuantWeiMatmulBias, QuantWei, Either, Post::None, false, F32),
    row("x8s8f32_quant_wei_matmul_relu_fusion", 9.7, OpKind::X8s8F32QuantWeiMatmulRelu, QuantWei, Bias::None, Post::Eltwise(Relu), false, F32),
    row("x8s8f32_quant_wei_matmul_bias_relu_fusion", 9.8, OpKind::X8s8F32QuantWeiMatmulBiasRelu, QuantWei, Either, Post::Eltwise(Relu), false, F32),
    row("x8s8f32_quant_wei_matmul_sigmoid_fusion", 9.7, OpKind::X8s8F32QuantWeiMatmulSigmoid, QuantWei, Bias::None, Post::Eltwise(Sigmoid), false, F32),
    row("x8s8f32_quant_wei_matmul_bias_sigmoid_fusion", 9.8, OpKind::X8s8F32QuantWeiMatmulBiasSigmoid, QuantWei, Either, Post::Eltwise(Sigmoid), false, F32),
    row("x8s8f32_quant_wei_matmul_gelu_fusion", 9.7, OpKind::X8s8F32QuantWeiMatmulGelu, QuantWei, Bias::None, Post::Eltwise(Gelu), false, F32),
    row("x8s8f32_quant_wei_matmul_bias_gelu_fusion", 9.8, OpKind::X8s8F32QuantWeiMatmulBiasGelu, QuantWei, Either, Post::Eltwise(Gelu), false, F32),
    row("x8s8f32_matmul_add_fusion", 10.4, OpKind::X8s8FloatMatmulAdd, S8, Bias::None, Post::Add, false, F32),
    row("x8x8f32_matmul_div_fusion", 10.4, OpKind::X8x8FloatMatmulDiv, Any, Bias::None, Post::Div, false, F32),
    row("x8x8f32_matmul_div_add_fusion", 10.5, OpKind::X8x8FloatMatmulDivAdd, Any, Bias::None, Post::DivAdd, false, F32),
    row("x8s8f32_matmul_bias_add_fusion", 10.4, OpKind::X8s8FloatMatmulBiasAdd, S8, Either, Post::Add, false, F32),
    row("x8s8f32_quant_wei_matmul_add_fusion", 10.5, OpKind::X8s8F32QuantWeiMatmulAdd, QuantWei, Bias::None, Post::Add, false, F32),
    row("x8s8f32_quant_wei_matmul_bias_add_fusion", 10.5, OpKind::X8s8F32QuantWeiMatmulBiasAdd, QuantWei, Either, Post::Add, false, F32),
    // int8 in, bf16 compute
    row("x8x8bf16_matmul_fusion", 9.8, OpKind::X8x8FloatMatmul, Any, Bias::None, Post::None, false, Bf16),
    row("x8x8bf16_matmul_div_fusion", 10.4, OpKind::X8x8FloatMatmulDiv, Any, Bias::None, Post::Div, false, Bf16),
    row("x8x8bf16_matmul_div_add_fusion", 10.5, OpKind::X8x8FloatMatmulDivAdd, Any, Bias::None, Post::DivAdd, false, Bf16),
    row("x8s8bf16_matmul_bias_fusion", 10.4, OpKind::X8s8FloatMatmulBias, S8, Input, Post::None, false, Bf16),
    row("x8s8bf16_matmul_bias_add_fusion", 10.5, OpKind::X8s8FloatMatmulBiasAdd, S8, Input, Post::Add, false, Bf16),
    row("x8s8bf16_matmul_bias_add_bf16_fusion", 10.49, OpKind::X8s8FloatMatmulBiasAdd, S8, Input, Post::AddAny, false, Bf16),
    row("x8s8bf16_matmul_add_fusion", 10.3, OpKind::X8s8FloatMatmulAdd, S8, Bias::None, Post::Add, false, Bf16),
];

const PARAMS: &[(&str, &str)] = &[
    ("dequant_data", "src"),
    ("dequant_weight", "wei"),
    ("dequant_other", "other"),
    ("quantize_dst", "dst"),
];

/// Register every row of [`QUANT_MATMUL_RULES`]
pub fn register(registry: &mut PassRegistry) -> FuseResult<()> {
    for entry in QUANT_MATMUL_RULES {
        registry.add(build_rule(entry)?)?;
    }
    Ok(())
}

/// Expand one table row into a rule with all its pattern variants
pub fn build_rule(entry: &QuantMatmulRule) -> FuseResult<FusionRule> {
    let casts: &[bool] = match entry.cast {
        Cast::F32 => &[false],
        Cast::Bf16 => &[true],
        Cast::Both => &[false, true],
    };
    let biases: &[BiasShape] = match entry.bias {
        Bias::None => &[BiasShape::None],
        Bias::Either => &[BiasShape::BiasAdd, BiasShape::Input],
        Bias::Input => &[BiasShape::Input],
    };

    let mut builder = FusionRule::builder(entry.name).priority(entry.priority);
    for &bf16 in casts {
        for &bias in biases {
            builder = builder.pattern(|pg| build_pattern(pg, entry, bias, bf16))?;
        }
    }
    builder
        .fused_op(quantized_factory(entry.kind, entry.bias != Bias::None, PARAMS))
        .build()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BiasShape {
    None,
    BiasAdd,
    Input,
}

fn append_cast(
    pg: &mut PatternGraph,
    producer: PatternNodeId,
    bf16: bool,
) -> FuseResult<PatternNodeId> {
    if !bf16 {
        return Ok(producer);
    }
    let cast = pg.append_op(OpKind::TypeCast, &[in_edge(0, producer, 0)])?;
    pg.append_decision_function(cast, check_output_dtype(DataType::Bf16))?;
    Ok(cast)
}

fn build_pattern(
    pg: &mut PatternGraph,
    entry: &QuantMatmulRule,
    bias: BiasShape,
    bf16: bool,
) -> FuseResult<()> {
    let dq_data = pg.append_op(OpKind::Dequantize, &[])?;
    pg.set_node_name(dq_data, "dequant_data")?;

    let dq_weight = match entry.weight {
        Weight::QuantWei => {
            let q_weight = pg.append_op(OpKind::Quantize, &[])?;
            pg.append_op(OpKind::Dequantize, &[in_edge(0, q_weight, 0)])?
        }
        _ => pg.append_op(OpKind::Dequantize, &[])?,
    };
    pg.set_node_name(dq_weight, "dequant_weight")?;
    // bf16 variants always take an s8 weight
    if entry.weight != Weight::Any || bf16 {
        pg.append_decision_function(dq_weight, check_input_dtype(DataType::S8))?;
    }

    let src = append_cast(pg, dq_data, bf16)?;
    let wei = append_cast(pg, dq_weight, bf16)?;
    let matmul = pg.append_op(OpKind::MatMul, &[in_edge(0, src, 0), in_edge(1, wei, 0)])?;
    let inputs = if bias == BiasShape::Input { 3 } else { 2 };
    pg.append_decision_function(matmul, check_input_num(inputs))?;

    let mut tail = matmul;
    if bias == BiasShape::BiasAdd {
        tail = pg.append_op(OpKind::BiasAdd, &[in_edge(0, tail, 0)])?;
    }

    match entry.post {
        Post::None => {}
        Post::Eltwise(kind) => {
            tail = pg.append_op(kind, &[in_edge(0, tail, 0)])?;
        }
        Post::Add => {
            let dq_other = pg.append_op(OpKind::Dequantize, &[])?;
            pg.set_node_name(dq_other, "dequant_other")?;
            let other = append_cast(pg, dq_other, bf16)?;
            tail = pg.append_op(OpKind::Add, &[in_edge(0, tail, 0), in_edge(1, other, 0)])?;
        }
        Post::AddAny => {
            tail = pg.append_op(OpKind::Add, &[in_edge(0, tail, 0)])?;
        }
        Post::Div => {
            tail = pg.append_op(OpKind::Divide, &[in_edge(0, tail, 0)])?;
        }
        Post::DivAdd => {
            let div = pg.append_op(OpKind::Divide, &[in_edge(0, tail, 0)])?;
            tail = pg.append_op(OpKind::Add, &[in_edge(0, div, 0)])?;
        }
    }

    if entry.quantized {
        if bf16 {
            let cast = pg.append_op(OpKind::TypeCast, &[in_edge(0, tail, 0)])?;
            pg.append_decision_function(cast, check_input_dtype(DataType::Bf16))?;
            tail = cast;
        }
        let q = pg.append_op(OpKind::Quantize, &[in_edge(0, tail, 0)])?;
        pg.set_node_name(q, "quantize_dst")?;
    }
    Ok(())
}
