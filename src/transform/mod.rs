//! Pass registry and rewriter
//!
//! - [`PassRegistry`]: ordered fusion rules (pattern variants, priority,
//!   fused-op factory)
//! - [`Rewriter`]: enumerate/sort/commit loop run to a fixed point
//! - [`fuse`]: replacement description and the commit step
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use graph_fuser::graph::{DataType, OpGraph, OpKind};
//! use graph_fuser::pattern::in_edge;
//! use graph_fuser::transform::{FusedOpFactory, FusionRule, PassRegistry, Rewriter};
//!
//! let mut registry = PassRegistry::default();
//! let rule = FusionRule::builder("int8_relu_fusion")
//!     .priority(9.9)
//!     .pattern(|pg| {
//!         let dq = pg.append_op(OpKind::Dequantize, &[])?;
//!         let relu = pg.append_op(OpKind::Relu, &[in_edge(0, dq, 0)])?;
//!         pg.append_op(OpKind::Quantize, &[in_edge(0, relu, 0)])?;
//!         Ok(())
//!     })
//!     .unwrap()
//!     .fused_op(FusedOpFactory::kind(OpKind::Int8Relu))
//!     .build()
//!     .unwrap();
//! registry.add(rule).unwrap();
//!
//! let mut g = OpGraph::new();
//! let x = g.add_input(DataType::U8);
//! let dq = g.add_op(OpKind::Dequantize, &[x], &[DataType::F32]).unwrap();
//! let v = g.output_value(dq, 0).unwrap();
//! let relu = g.add_op(OpKind::Relu, &[v], &[DataType::F32]).unwrap();
//! let v = g.output_value(relu, 0).unwrap();
//! let q = g.add_op(OpKind::Quantize, &[v], &[DataType::S8]).unwrap();
//! let out = g.output_value(q, 0).unwrap();
//! g.mark_output(out).unwrap();
//!
//! let stats = Rewriter::new(Arc::new(registry)).run_all(&mut g).unwrap();
//! assert_eq!(stats.committed, 1);
//! assert_eq!(g.kinds_in_order(), vec![OpKind::Int8Relu]);
//! ```

pub mod core;
pub mod fuse;
pub mod registry;

// Re-export main types and functions
pub use core::{rewrite, Candidate, RewriteConfig, RewriteStats, Rewriter};

pub use fuse::{
    can_fuse, fuse_match, FusedOp, FusedOpFactory, FusedOpFn, FusionResult, Replacement,
    BACKEND_ATTR,
};

pub use registry::{FusionRule, FusionRuleBuilder, PassRegistry, DEFAULT_BACKEND};
