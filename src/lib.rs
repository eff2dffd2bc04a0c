//! # Graph Fuser
//!
//! Pattern-based subgraph matching and operator fusion for deep-learning
//! op graphs.
//!
//! A fusion rule is a small pattern graph (concrete ops, alternations,
//! optional blocks, bounded repetitions and decision predicates) plus a
//! factory that builds the fused op. A registry orders rules by priority;
//! the rewriter enumerates matches, commits non-overlapping ones and repeats
//! until the graph stops changing.
//!
//! ## Features
//!
//! - **Pattern Graphs**: declarative motifs with exact port wiring
//! - **Matching**: anchored, bidirectional, no backtracking across alternations
//! - **Rewriting**: priority-ordered, non-overlapping commits to a fixed point
//! - **Catalogue**: int8/bf16 matmul, convolution, attention and eltwise rules
//! - **Lowering**: quantization split, scale folding and post-op fusion stages
//!
//! ## Example
//!
//! ```
//! use graph_fuser::prelude::*;
//!
//! let mut g = OpGraph::new();
//! let x = g.add_input(DataType::U8);
//! let dq = g.add_op(OpKind::Dequantize, &[x], &[DataType::F32]).unwrap();
//! let v = g.output_value(dq, 0).unwrap();
//! let relu = g.add_op(OpKind::Relu, &[v], &[DataType::F32]).unwrap();
//! let v = g.output_value(relu, 0).unwrap();
//! let q = g.add_op(OpKind::Quantize, &[v], &[DataType::U8]).unwrap();
//! let out = g.output_value(q, 0).unwrap();
//! g.mark_output(out).unwrap();
//!
//! let stats = FusionPipeline::fuse_only().run(&mut g).unwrap();
//! assert_eq!(stats.commits_of("int8_relu_fusion"), 1);
//! assert_eq!(g.kinds_in_order(), vec![OpKind::Int8Relu]);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// ============================================================================
// Module declarations
// ============================================================================

pub mod error;
pub mod fusions;
pub mod graph;
pub mod pattern;
pub mod traits;
pub mod transform;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Prelude module - import commonly used types with `use graph_fuser::prelude::*`
pub mod prelude {
    pub use crate::error::{FuseError, FuseResult};
    pub use crate::fusions::{default_registry, FusionPipeline, LoweringPipeline};
    pub use crate::graph::{Attributes, DataType, NodeId, OpGraph, OpKind, ValueId};
    pub use crate::pattern::{in_edge, MatchBinding, PatternGraph, PatternMatcher, PortMap};
    pub use crate::traits::{GraphPass, PassChain};
    pub use crate::transform::{
        FusedOp, FusedOpFactory, FusionRule, PassRegistry, RewriteConfig, RewriteStats, Rewriter,
    };
}

// ============================================================================
// Crate-level re-exports
// ============================================================================

pub use error::{FuseError, FuseResult};
pub use traits::GraphPass;

// ============================================================================
// Version information
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
