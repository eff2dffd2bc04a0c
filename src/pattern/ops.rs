//! Op-kind groups used by the rule catalogue
//!
//! Alternations in the catalogue are built from these slices so that every
//! rule agrees on what counts as an eltwise or binary post op.

use crate::graph::OpKind;

/// Unary elementwise ops that can be fused as post ops
pub const ELTWISE_OPS: &[OpKind] = &[
    OpKind::Abs,
    OpKind::Clamp,
    OpKind::Elu,
    OpKind::Exp,
    OpKind::Gelu,
    OpKind::HardSwish,
    OpKind::HardTanh,
    OpKind::Log,
    OpKind::Sigmoid,
    OpKind::SoftPlus,
    OpKind::Pow,
    OpKind::Relu,
    OpKind::Round,
    OpKind::Sqrt,
    OpKind::Square,
    OpKind::Tanh,
];

/// Binary elementwise ops that can be fused as post ops
pub const BINARY_OPS: &[OpKind] = &[
    OpKind::Add,
    OpKind::Multiply,
    OpKind::Maximum,
    OpKind::Minimum,
    OpKind::Divide,
    OpKind::Subtract,
];

/// Post-op alternation: eltwise and binary ops in one set
pub const POST_OPS: &[OpKind] = &[
    OpKind::Abs,
    OpKind::Clamp,
    OpKind::Elu,
    OpKind::Exp,
    OpKind::Gelu,
    OpKind::HardSwish,
    OpKind::HardTanh,
    OpKind::Log,
    OpKind::Sigmoid,
    OpKind::SoftPlus,
    OpKind::Pow,
    OpKind::Relu,
    OpKind::Round,
    OpKind::Sqrt,
    OpKind::Square,
    OpKind::Tanh,
    OpKind::Add,
    OpKind::Multiply,
    OpKind::Maximum,
    OpKind::Minimum,
    OpKind::Divide,
    OpKind::Subtract,
];

/// Compute ops that absorb bias, scales and post ops
pub const COMPUTE_OPS: &[OpKind] = &[OpKind::MatMul, OpKind::Convolution, OpKind::ConvTranspose];

/// Pooling operations
pub const POOL_OPS: &[OpKind] = &[OpKind::MaxPool, OpKind::AvgPool];

/// Quantization boundary ops
pub const QUANT_OPS: &[OpKind] = &[OpKind::Quantize, OpKind::Dequantize];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_ops_is_union() {
        assert_eq!(POST_OPS.len(), ELTWISE_OPS.len() + BINARY_OPS.len());
        for kind in ELTWISE_OPS.iter().chain(BINARY_OPS) {
            assert!(POST_OPS.contains(kind));
        }
    }

    #[test]
    fn test_groups_are_disjoint() {
        for kind in ELTWISE_OPS {
            assert!(!BINARY_OPS.contains(kind));
        }
    }
}
