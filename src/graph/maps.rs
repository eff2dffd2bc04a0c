//! Graph arena types
//!
//! Nodes and values live in insertion-ordered maps keyed by stable ids.
//! Retiring a node only flips a flag; the entry disappears on the next
//! [`OpGraph::compact`](super::OpGraph::compact).

use std::fmt;
use std::hash::BuildHasherDefault;

use indexmap::IndexMap;
use rustc_hash::FxHasher;
use smallvec::SmallVec;

use super::attrs::Attributes;
use super::dtype::DataType;
use super::op_kind::OpKind;

/// Stable node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Raw index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Stable logical tensor identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub(crate) u32);

impl ValueId {
    /// Raw index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// One side of an edge: a node and one of its ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Node
    pub node: NodeId,
    /// Input port for consumers, output port for producers
    pub port: usize,
}

impl Endpoint {
    /// Create an endpoint
    pub fn new(node: NodeId, port: usize) -> Self {
        Self { node, port }
    }
}

/// Consumer list; most values feed one to four ops
pub type Consumers = SmallVec<[Endpoint; 4]>;

/// An operator node
#[derive(Debug, Clone)]
pub struct Op {
    /// Node id
    pub id: NodeId,
    /// Operator kind
    pub kind: OpKind,
    /// Debug name
    pub name: String,
    /// Ordered input values
    pub inputs: SmallVec<[ValueId; 4]>,
    /// Ordered output values
    pub outputs: SmallVec<[ValueId; 2]>,
    /// Attribute bag
    pub attrs: Attributes,
}

/// A logical tensor: the value flowing along an edge
#[derive(Debug, Clone)]
pub struct Value {
    /// Value id
    pub id: ValueId,
    /// Element type
    pub dtype: DataType,
    /// Static shape if known (rank is `shape.len()`)
    pub shape: Option<SmallVec<[i64; 4]>>,
    /// Producing node and output port; `None` for graph inputs
    pub producer: Option<Endpoint>,
    /// Consuming nodes and input ports, in connection order
    pub consumers: Consumers,
    /// Observed outside the graph
    pub is_graph_output: bool,
}

impl Value {
    pub(crate) fn new(id: ValueId, dtype: DataType) -> Self {
        Self {
            id,
            dtype,
            shape: None,
            producer: None,
            consumers: SmallVec::new(),
            is_graph_output: false,
        }
    }

    /// Rank if the shape is known
    pub fn rank(&self) -> Option<usize> {
        self.shape.as_ref().map(|s| s.len())
    }
}

/// Entry in the node arena - tracks the op and its state
#[derive(Debug, Clone)]
pub struct OpEntry {
    /// The op itself
    pub op: Op,
    /// Replaced by a commit; dropped on the next compaction
    pub retired: bool,
}

impl OpEntry {
    /// Create a live entry
    pub fn new(op: Op) -> Self {
        Self { op, retired: false }
    }

    /// Mark this node as replaced
    pub fn retire(&mut self) {
        self.retired = true;
    }
}

/// Fx-hashed build hasher used by the arenas
pub type FxBuild = BuildHasherDefault<FxHasher>;

/// Node arena: id → entry (insertion order preserved)
pub type OpMap = IndexMap<NodeId, OpEntry, FxBuild>;

/// Value table: id → logical tensor (insertion order preserved)
pub type ValueMap = IndexMap<ValueId, Value, FxBuild>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_ids() {
        assert_eq!(NodeId(3).to_string(), "n3");
        assert_eq!(ValueId(7).to_string(), "v7");
    }

    #[test]
    fn test_value_rank() {
        let mut v = Value::new(ValueId(0), DataType::F32);
        assert_eq!(v.rank(), None);
        v.shape = Some(SmallVec::from_slice(&[1, 3, 224, 224]));
        assert_eq!(v.rank(), Some(4));
    }

    #[test]
    fn test_op_entry_retire() {
        let op = Op {
            id: NodeId(0),
            kind: OpKind::Relu,
            name: "relu".to_string(),
            inputs: SmallVec::new(),
            outputs: SmallVec::new(),
            attrs: Attributes::new(),
        };
        let mut entry = OpEntry::new(op);
        assert!(!entry.retired);
        entry.retire();
        assert!(entry.retired);
    }
}
