//! Pattern graphs and the matcher
//!
//! A motif is described once as a [`PatternGraph`] and matched many times
//! against an [`OpGraph`](crate::graph::OpGraph).
//!
//! # Overview
//!
//! 1. Build a pattern graph from concrete matchers, alternations, optional
//!    blocks and bounded repetitions
//! 2. Attach decision predicates to disambiguate same-kind nodes
//! 3. Seed a [`PatternMatcher`] at an anchor node and read back a
//!    [`MatchBinding`] with the matched nodes and boundary values
//!
//! # Example
//!
//! ```
//! use graph_fuser::graph::{DataType, OpGraph, OpKind};
//! use graph_fuser::pattern::{in_edge, PatternGraph, PatternMatcher};
//!
//! let mut g = OpGraph::new();
//! let x = g.add_input(DataType::U8);
//! let dq = g.add_op(OpKind::Dequantize, &[x], &[DataType::F32]).unwrap();
//! let v = g.output_value(dq, 0).unwrap();
//! let relu = g.add_op(OpKind::Relu, &[v], &[DataType::F32]).unwrap();
//!
//! let mut pg = PatternGraph::new("dq_relu");
//! let p_dq = pg.append_op(OpKind::Dequantize, &[]).unwrap();
//! pg.append_op(OpKind::Relu, &[in_edge(0, p_dq, 0)]).unwrap();
//!
//! let m = PatternMatcher::new(&g).match_at(&pg, dq).unwrap();
//! assert_eq!(m.nodes, vec![dq, relu]);
//! ```
//!
//! # Convexity
//!
//! [`traversal::is_convex`] rejects regions that a path leaves and
//! re-enters; both the matcher and the rewriter rely on it.

pub mod graph;
pub mod matcher;
pub mod ops;
pub mod predicate;
pub mod traversal;

// Re-export main types
pub use graph::{
    in_edge, Branch, InEdge, OpMatcher, PatternEdge, PatternGraph, PatternNode, PatternNodeId,
    PatternNodeKind, PortMap, PortRef, Repetition, MAX_REPETITION,
};
pub use matcher::{MatchBinding, PatternMatcher};
pub use predicate::Predicate;
pub use traversal::is_convex;

// Re-export op groups
pub use ops::{BINARY_OPS, COMPUTE_OPS, ELTWISE_OPS, POOL_OPS, POST_OPS, QUANT_OPS};
