//! Op graph model
//!
//! The real graph the engine matches against and rewrites:
//!
//! - [`OpGraph`]: arena of operator nodes keyed by stable [`NodeId`]s
//! - [`Value`]: logical tensor with one producer and ordered consumers
//! - [`OpKind`], [`DataType`], [`Attributes`]: node and tensor metadata
//!
//! # Example
//!
//! ```
//! use graph_fuser::graph::{DataType, OpGraph, OpKind};
//!
//! let mut g = OpGraph::new();
//! let x = g.add_input(DataType::U8);
//! let dq = g.add_op(OpKind::Dequantize, &[x], &[DataType::F32]).unwrap();
//! let dq_out = g.output_value(dq, 0).unwrap();
//! let relu = g.add_op(OpKind::Relu, &[dq_out], &[DataType::F32]).unwrap();
//!
//! assert_eq!(g.input_producer(relu, 0).map(|p| p.node), Some(dq));
//! ```
//!
//! # Arena
//!
//! | Map | Description |
//! |-----|-------------|
//! | `ops` | node id → OpEntry (insertion order, retired flag) |
//! | `values` | value id → logical tensor (producer + consumers) |
//! | `inputs` | graph input values |

pub mod accessors;
pub mod attrs;
pub mod context;
pub mod dtype;
pub mod maps;
pub mod mutators;
pub mod op_kind;

// Re-export main types
pub use attrs::{AttrValue, Attributes};
pub use context::OpGraph;
pub use dtype::DataType;
pub use maps::{Consumers, Endpoint, NodeId, Op, OpEntry, OpMap, Value, ValueId, ValueMap};
pub use op_kind::{OpClass, OpKind};
