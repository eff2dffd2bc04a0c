//! Operator kinds
//!
//! The closed set of operator kinds the engine understands. Three groups
//! share one enum:
//!
//! - framework primitives (`Convolution`, `MatMul`, `Relu`, `Quantize`, ...)
//! - internal lowering primitives (`MulScales`, `AddZps`, `SubZps`, `Swish`)
//! - fused kinds produced by the rule catalogue (`Int8Relu`, `ChainedRelu`, ...)

use std::fmt;
use std::str::FromStr;

use crate::error::FuseError;

/// Broad classification of an [`OpKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    /// Operator exposed by the framework opset
    Primitive,
    /// Operator introduced by lowering, never produced by a framework
    Internal,
    /// Operator produced by a fusion rule
    Fused,
}

macro_rules! op_kinds {
    (
        $( $class:ident { $( $variant:ident => $name:literal ),+ $(,)? } )+
    ) => {
        /// Operator kind
        #[allow(missing_docs)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum OpKind {
            $( $( $variant, )+ )+
        }

        impl OpKind {
            /// Every kind, in declaration order
            pub const ALL: &'static [OpKind] = &[ $( $( OpKind::$variant, )+ )+ ];

            /// Canonical name
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $( OpKind::$variant => $name, )+ )+
                }
            }

            /// Look up a kind by its canonical name
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( $( $name => Some(OpKind::$variant), )+ )+
                    _ => None,
                }
            }

            /// Classification of this kind
            pub fn class(self) -> OpClass {
                match self {
                    $( $( OpKind::$variant => OpClass::$class, )+ )+
                }
            }
        }
    };
}

op_kinds! {
    Primitive {
        Abs => "Abs",
        AbsBackprop => "AbsBackprop",
        Add => "Add",
        AvgPool => "AvgPool",
        AvgPoolBackprop => "AvgPoolBackprop",
        BatchNormForwardTraining => "BatchNormForwardTraining",
        BatchNormInference => "BatchNormInference",
        BatchNormTrainingBackprop => "BatchNormTrainingBackprop",
        BiasAdd => "BiasAdd",
        BiasAddBackprop => "BiasAddBackprop",
        Clamp => "Clamp",
        ClampBackprop => "ClampBackprop",
        Concat => "Concat",
        Convolution => "Convolution",
        ConvolutionBackpropData => "ConvolutionBackpropData",
        ConvolutionBackpropFilters => "ConvolutionBackpropFilters",
        ConvTranspose => "ConvTranspose",
        ConvTransposeBackpropData => "ConvTransposeBackpropData",
        ConvTransposeBackpropFilters => "ConvTransposeBackpropFilters",
        Dequantize => "Dequantize",
        Divide => "Divide",
        DynamicDequantize => "DynamicDequantize",
        DynamicQuantize => "DynamicQuantize",
        DynamicReshape => "DynamicReshape",
        DynamicTranspose => "DynamicTranspose",
        Elu => "Elu",
        EluBackprop => "EluBackprop",
        End => "End",
        Erf => "Erf",
        Exp => "Exp",
        Gelu => "GELU",
        GeluBackprop => "GELUBackprop",
        HardSwish => "HardSwish",
        HardSwishBackprop => "HardSwishBackprop",
        HardTanh => "HardTanh",
        HardTanhBackprop => "HardTanhBackprop",
        Index => "Index",
        Interpolate => "Interpolate",
        InterpolateBackprop => "InterpolateBackprop",
        LayerNorm => "LayerNorm",
        LayerNormBackprop => "LayerNormBackprop",
        Log => "Log",
        LogSoftmax => "LogSoftmax",
        LogSoftmaxBackprop => "LogSoftmaxBackprop",
        MatMul => "MatMul",
        Maximum => "Maximum",
        MaxPool => "MaxPool",
        MaxPoolBackprop => "MaxPoolBackprop",
        Minimum => "Minimum",
        Mish => "Mish",
        MishBackprop => "MishBackprop",
        Multiply => "Multiply",
        Pow => "Pow",
        PowBackprop => "PowBackprop",
        PowBackpropExponent => "PowBackpropExponent",
        PRelu => "PReLU",
        PReluBackprop => "PReLUBackprop",
        Quantize => "Quantize",
        Reciprocal => "Reciprocal",
        ReduceL1 => "ReduceL1",
        ReduceL2 => "ReduceL2",
        ReduceMax => "ReduceMax",
        ReduceMean => "ReduceMean",
        ReduceMin => "ReduceMin",
        ReduceProd => "ReduceProd",
        ReduceSum => "ReduceSum",
        Relu => "ReLU",
        ReluBackprop => "ReLUBackprop",
        Reorder => "Reorder",
        Round => "Round",
        Rsqrt => "Rsqrt",
        Select => "Select",
        Sigmoid => "Sigmoid",
        SigmoidBackprop => "SigmoidBackprop",
        SoftMax => "SoftMax",
        SoftMaxBackprop => "SoftMaxBackprop",
        SoftPlus => "SoftPlus",
        SoftPlusBackprop => "SoftPlusBackprop",
        Sqrt => "Sqrt",
        SqrtBackprop => "SqrtBackprop",
        Square => "Square",
        SquaredDifference => "SquaredDifference",
        StaticReshape => "StaticReshape",
        StaticTranspose => "StaticTranspose",
        Subtract => "Subtract",
        Tanh => "Tanh",
        TanhBackprop => "TanhBackprop",
        TypeCast => "TypeCast",
        Wildcard => "Wildcard",
    }
    Internal {
        MulScales => "mul_scales",
        AddZps => "add_zps",
        SubZps => "sub_zps",
        Swish => "swish",
    }
    Fused {
        EltwiseBinary => "eltwise_binary",
        ChainedRelu => "chained_relu",
        Int8Relu => "int8_relu",
        Int8ReluAdd => "int8_relu_add",
        MatmulBiasSwish => "matmul_bias_swish",
        MatmulPostOpsChain => "matmul_post_ops_chain",
        MatmulBiasPostOpsChain => "matmul_bias_post_ops_chain",
        Int8Matmul => "int8_matmul",
        Int8QuantWeiMatmul => "int8_quant_wei_matmul",
        Int8MatmulBias => "int8_matmul_bias",
        Int8QuantWeiMatmulBias => "int8_quant_wei_matmul_bias",
        Int8MatmulRelu => "int8_matmul_relu",
        Int8QuantWeiMatmulRelu => "int8_quant_wei_matmul_relu",
        Int8MatmulBiasRelu => "int8_matmul_bias_relu",
        Int8QuantWeiMatmulBiasRelu => "int8_quant_wei_matmul_bias_relu",
        Int8MatmulSigmoid => "int8_matmul_sigmoid",
        Int8QuantWeiMatmulSigmoid => "int8_quant_wei_matmul_sigmoid",
        Int8MatmulBiasSigmoid => "int8_matmul_bias_sigmoid",
        Int8QuantWeiMatmulBiasSigmoid => "int8_quant_wei_matmul_bias_sigmoid",
        Int8MatmulGelu => "int8_matmul_gelu",
        Int8QuantWeiMatmulGelu => "int8_quant_wei_matmul_gelu",
        Int8MatmulBiasGelu => "int8_matmul_bias_gelu",
        Int8QuantWeiMatmulBiasGelu => "int8_quant_wei_matmul_bias_gelu",
        Int8MatmulAdd => "int8_matmul_add",
        Int8QuantWeiMatmulAdd => "int8_quant_wei_matmul_add",
        Int8MatmulBiasAdd => "int8_matmul_bias_add",
        Int8QuantWeiMatmulBiasAdd => "int8_quant_wei_matmul_bias_add",
        X8x8FloatMatmul => "x8x8float_matmul",
        X8s8FloatMatmulBias => "x8s8float_matmul_bias",
        X8s8F32MatmulRelu => "x8s8f32_matmul_relu",
        X8s8F32MatmulBiasRelu => "x8s8f32_matmul_bias_relu",
        X8s8F32MatmulSigmoid => "x8s8f32_matmul_sigmoid",
        X8s8F32MatmulBiasSigmoid => "x8s8f32_matmul_bias_sigmoid",
        X8s8F32MatmulGelu => "x8s8f32_matmul_gelu",
        X8s8F32MatmulBiasGelu => "x8s8f32_matmul_bias_gelu",
        X8s8F32QuantWeiMatmul => "x8s8f32_quant_wei_matmul",
        X8s8F32QuantWeiMatmulBias => "x8s8f32_quant_wei_matmul_bias",
        X8s8F32QuantWeiMatmulRelu => "x8s8f32_quant_wei_matmul_relu",
        X8s8F32QuantWeiMatmulBiasRelu => "x8s8f32_quant_wei_matmul_bias_relu",
        X8s8F32QuantWeiMatmulSigmoid => "x8s8f32_quant_wei_matmul_sigmoid",
        X8s8F32QuantWeiMatmulBiasSigmoid => "x8s8f32_quant_wei_matmul_bias_sigmoid",
        X8s8F32QuantWeiMatmulGelu => "x8s8f32_quant_wei_matmul_gelu",
        X8s8F32QuantWeiMatmulBiasGelu => "x8s8f32_quant_wei_matmul_bias_gelu",
        X8s8FloatMatmulAdd => "x8s8float_matmul_add",
        X8s8FloatMatmulBiasAdd => "x8s8float_matmul_bias_add",
        X8s8F32QuantWeiMatmulAdd => "x8s8f32_quant_wei_matmul_add",
        X8s8F32QuantWeiMatmulBiasAdd => "x8s8f32_quant_wei_matmul_bias_add",
        X8x8FloatMatmulDiv => "x8x8float_matmul_div",
        X8x8FloatMatmulDivAdd => "x8x8float_matmul_div_add",
        Int8Mha => "int8_MHA",
        F32Mha => "f32_MHA",
        Int8Bf16Mha => "int8_bf16_MHA",
        ConvPostOpsChain => "conv_post_ops_chain",
        ConvBiasPostOpsChain => "conv_bias_post_ops_chain",
        Int8Conv => "int8_conv",
        Int8ConvBias => "int8_conv_bias",
        Int8ConvRelu => "int8_conv_relu",
        Int8ConvBiasRelu => "int8_conv_bias_relu",
        Int8ConvAdd => "int8_conv_add",
        Int8ConvBiasAdd => "int8_conv_bias_add",
        PoolBinary => "pool_binary",
        Int8Pool => "int8_pool",
    }
}

impl OpKind {
    /// Whether this kind is produced by a fusion rule
    pub fn is_fused(self) -> bool {
        self.class() == OpClass::Fused
    }

    /// Whether this kind is a framework opset primitive
    pub fn is_primitive(self) -> bool {
        self.class() == OpClass::Primitive
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = FuseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpKind::from_name(s).ok_or_else(|| FuseError::InvalidAttribute {
            name: "op_kind".to_string(),
            reason: format!("unknown op kind '{}'", s),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn test_name_roundtrip_is_unique() {
        let mut seen = FxHashSet::default();
        for kind in OpKind::ALL {
            assert!(seen.insert(kind.as_str()), "duplicate name {}", kind);
            assert_eq!(OpKind::from_name(kind.as_str()), Some(*kind));
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(OpKind::Relu.class(), OpClass::Primitive);
        assert_eq!(OpKind::MulScales.class(), OpClass::Internal);
        assert!(OpKind::Int8Relu.is_fused());
        assert!(!OpKind::MatMul.is_fused());
    }

    #[test]
    fn test_display_and_parse() {
        assert_eq!(OpKind::Gelu.to_string(), "GELU");
        assert_eq!("chained_relu".parse::<OpKind>().unwrap(), OpKind::ChainedRelu);
        assert!("NotAnOp".parse::<OpKind>().is_err());
    }

    #[test]
    fn test_catalogue_size() {
        assert!(OpKind::ALL.len() >= 150);
    }
}
