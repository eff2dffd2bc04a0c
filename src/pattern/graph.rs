//! Pattern graph builder
//!
//! A pattern graph mirrors the real op graph: nodes are concrete matchers
//! (one kind or an alternation of kinds), optional blocks or bounded
//! repetitions of a nested pattern graph. Edges are recorded on the consumer
//! side as [`InEdge`]s, and declared input/output ports let a pattern graph
//! be nested inside a parent.
//!
//! Producers must be appended before their consumers, so every pattern
//! graph is acyclic by construction.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::warn;

use super::predicate::Predicate;
use crate::error::{FuseError, FuseResult};
use crate::graph::{NodeId, OpGraph, OpKind};

/// Upper bound applied to every repetition `max`
pub const MAX_REPETITION: usize = 128;

// ============================================================================
// Handles and edges
// ============================================================================

/// Handle of a node inside one pattern graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternNodeId(usize);

impl PatternNodeId {
    /// Position in the pattern graph
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for PatternNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Edge `(producer, producer_port) -> (this node, port)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InEdge {
    /// Input port on the consuming pattern node
    pub port: usize,
    /// Producing pattern node
    pub producer: PatternNodeId,
    /// Output port on the producing pattern node
    pub producer_port: usize,
}

/// Shorthand for building an [`InEdge`]
pub fn in_edge(port: usize, producer: PatternNodeId, producer_port: usize) -> InEdge {
    InEdge {
        port,
        producer,
        producer_port,
    }
}

/// A full pattern edge, as walked by the matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternEdge {
    /// Producing pattern node
    pub producer: PatternNodeId,
    /// Output port on the producer
    pub producer_port: usize,
    /// Consuming pattern node
    pub consumer: PatternNodeId,
    /// Input port on the consumer
    pub consumer_port: usize,
}

/// A port of an internal pattern node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRef {
    /// Pattern node
    pub node: PatternNodeId,
    /// Port on that node
    pub port: usize,
}

// ============================================================================
// Node variants
// ============================================================================

/// One accepted kind of a concrete matcher, with predicates local to it
#[derive(Debug, Clone)]
pub struct Branch {
    /// Accepted op kind
    pub kind: OpKind,
    /// Predicates that only apply when the real node has this kind
    pub predicates: Vec<Predicate>,
}

/// Concrete matcher: a single kind or an alternation
#[derive(Debug, Clone)]
pub struct OpMatcher {
    /// Candidate kinds in declaration order
    pub branches: SmallVec<[Branch; 2]>,
    /// Predicates that apply whatever the branch
    pub predicates: Vec<Predicate>,
}

impl OpMatcher {
    fn new(kinds: &[OpKind]) -> Self {
        Self {
            branches: kinds
                .iter()
                .map(|&kind| Branch {
                    kind,
                    predicates: Vec::new(),
                })
                .collect(),
            predicates: Vec::new(),
        }
    }

    /// Accepted kinds
    pub fn kinds(&self) -> impl Iterator<Item = OpKind> + '_ {
        self.branches.iter().map(|b| b.kind)
    }

    /// Whether a kind is listed at all
    pub fn accepts_kind(&self, kind: OpKind) -> bool {
        self.branches.iter().any(|b| b.kind == kind)
    }

    /// Check a real node against this matcher
    ///
    /// Branches are tried in declaration order and the first one whose kind
    /// and predicates pass wins. Shared predicates are checked afterwards.
    pub fn accepts(&self, graph: &OpGraph, node: NodeId) -> bool {
        let kind = match graph.kind(node) {
            Some(kind) => kind,
            None => return false,
        };
        let branch_ok = self
            .branches
            .iter()
            .filter(|b| b.kind == kind)
            .any(|b| b.predicates.iter().all(|p| p.eval(graph, node)));
        branch_ok && self.predicates.iter().all(|p| p.eval(graph, node))
    }
}

/// Which nested output feeds which nested input across consecutive repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMap {
    /// Output port of repeat `k`
    pub output: usize,
    /// Input port of repeat `k + 1`
    pub input: usize,
}

impl PortMap {
    /// Chain output `output` into input `input`
    pub fn new(output: usize, input: usize) -> Self {
        Self { output, input }
    }
}

impl Default for PortMap {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// Bounded repetition of a nested pattern graph
#[derive(Debug, Clone)]
pub struct Repetition {
    /// Repeated unit
    pub body: Arc<PatternGraph>,
    /// Chaining between repeats
    pub port_map: PortMap,
    /// Minimum count (inclusive)
    pub min: usize,
    /// Maximum count (inclusive, at most [`MAX_REPETITION`])
    pub max: usize,
}

/// Pattern node variants
#[derive(Debug, Clone)]
pub enum PatternNodeKind {
    /// Concrete matcher
    Op(OpMatcher),
    /// Nested graph that may be absent
    Optional(Arc<PatternGraph>),
    /// Nested graph matched `min..=max` times
    Repetition(Repetition),
}

/// A node of a pattern graph
#[derive(Debug, Clone)]
pub struct PatternNode {
    /// Handle
    pub id: PatternNodeId,
    /// Optional label reported in match bindings
    pub name: Option<String>,
    /// Variant
    pub kind: PatternNodeKind,
    /// Incoming edges, one per wired input port
    pub in_edges: SmallVec<[InEdge; 4]>,
}

impl PatternNode {
    /// Number of input ports a block declares (`None` for concrete matchers)
    pub fn input_port_count(&self) -> Option<usize> {
        match &self.kind {
            PatternNodeKind::Op(_) => None,
            PatternNodeKind::Optional(body) => Some(body.inputs.len()),
            PatternNodeKind::Repetition(rep) => Some(rep.body.inputs.len()),
        }
    }

    /// Number of output ports a block declares (`None` for concrete matchers)
    pub fn output_port_count(&self) -> Option<usize> {
        match &self.kind {
            PatternNodeKind::Op(_) => None,
            PatternNodeKind::Optional(body) => Some(body.outputs.len()),
            PatternNodeKind::Repetition(rep) => Some(rep.body.outputs.len()),
        }
    }

    /// Concrete matcher, if this node is one
    pub fn as_op(&self) -> Option<&OpMatcher> {
        match &self.kind {
            PatternNodeKind::Op(m) => Some(m),
            _ => None,
        }
    }

    /// Check if this node is an optional or repetition block
    pub fn is_block(&self) -> bool {
        !matches!(self.kind, PatternNodeKind::Op(_))
    }
}

// ============================================================================
// Pattern graph
// ============================================================================

/// Declarative motif description
#[derive(Debug, Clone)]
pub struct PatternGraph {
    name: String,
    nodes: Vec<PatternNode>,
    pub(crate) inputs: BTreeMap<usize, PortRef>,
    pub(crate) outputs: BTreeMap<usize, PortRef>,
}

impl PatternGraph {
    /// Create an empty pattern graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Pattern graph name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All nodes in append order
    pub fn nodes(&self) -> &[PatternNode] {
        &self.nodes
    }

    /// Node by handle
    pub fn node(&self, id: PatternNodeId) -> Option<&PatternNode> {
        self.nodes.get(id.0)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if no node was appended
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Declared input ports
    pub fn input_ports(&self) -> &BTreeMap<usize, PortRef> {
        &self.inputs
    }

    /// Declared output ports
    pub fn output_ports(&self) -> &BTreeMap<usize, PortRef> {
        &self.outputs
    }

    /// All edges, in consumer append order
    pub fn edges(&self) -> impl Iterator<Item = PatternEdge> + '_ {
        self.nodes.iter().flat_map(|node| {
            node.in_edges.iter().map(move |e| PatternEdge {
                producer: e.producer,
                producer_port: e.producer_port,
                consumer: node.id,
                consumer_port: e.port,
            })
        })
    }

    // ========================================================================
    // Appending nodes
    // ========================================================================

    /// Append a concrete matcher for one kind
    pub fn append_op(&mut self, kind: OpKind, in_edges: &[InEdge]) -> FuseResult<PatternNodeId> {
        self.append_alternation(&[kind], in_edges)
    }

    /// Append a concrete matcher accepting any of `kinds`
    pub fn append_alternation(
        &mut self,
        kinds: &[OpKind],
        in_edges: &[InEdge],
    ) -> FuseResult<PatternNodeId> {
        if kinds.is_empty() {
            return Err(FuseError::EmptyAlternation(self.name.clone()));
        }
        for (i, kind) in kinds.iter().enumerate() {
            if kinds[..i].contains(kind) {
                warn!(
                    pattern = %self.name,
                    kind = %kind,
                    "alternation lists the same kind twice; only the first branch can win"
                );
            }
        }
        self.push_node(PatternNodeKind::Op(OpMatcher::new(kinds)), in_edges)
    }

    /// Append an optional block wrapping `body`
    ///
    /// The body must declare the same number of input and output ports
    /// (at least one): when the block is absent, input `i` passes through
    /// to output `i`.
    pub fn append_optional(
        &mut self,
        body: PatternGraph,
        in_edges: &[InEdge],
    ) -> FuseResult<PatternNodeId> {
        body.validate()?;
        if body.inputs.is_empty() || body.inputs.len() != body.outputs.len() {
            return Err(FuseError::InvalidOptional {
                graph: self.name.clone(),
                reason: format!(
                    "body '{}' declares {} inputs and {} outputs",
                    body.name,
                    body.inputs.len(),
                    body.outputs.len()
                ),
            });
        }
        self.push_node(PatternNodeKind::Optional(Arc::new(body)), in_edges)
    }

    /// Append a repetition of `body` matched between `min` and `max` times
    ///
    /// `max` is clamped to [`MAX_REPETITION`].
    pub fn append_repetition(
        &mut self,
        body: PatternGraph,
        port_map: PortMap,
        min: usize,
        max: usize,
        in_edges: &[InEdge],
    ) -> FuseResult<PatternNodeId> {
        body.validate()?;
        let max = max.min(MAX_REPETITION);
        if min > max {
            return Err(FuseError::InvalidRepetition {
                graph: self.name.clone(),
                reason: format!("min {} exceeds max {}", min, max),
            });
        }
        if max == 0 {
            return Err(FuseError::InvalidRepetition {
                graph: self.name.clone(),
                reason: "max must be at least 1".to_string(),
            });
        }
        if !body.outputs.contains_key(&port_map.output) || !body.inputs.contains_key(&port_map.input)
        {
            return Err(FuseError::InvalidRepetition {
                graph: self.name.clone(),
                reason: format!(
                    "port map {} -> {} not declared by body '{}'",
                    port_map.output, port_map.input, body.name
                ),
            });
        }
        let rep = Repetition {
            body: Arc::new(body),
            port_map,
            min,
            max,
        };
        self.push_node(PatternNodeKind::Repetition(rep), in_edges)
    }

    fn push_node(
        &mut self,
        kind: PatternNodeKind,
        in_edges: &[InEdge],
    ) -> FuseResult<PatternNodeId> {
        let id = PatternNodeId(self.nodes.len());
        let mut node = PatternNode {
            id,
            name: None,
            kind,
            in_edges: SmallVec::new(),
        };

        for edge in in_edges {
            let producer = self.check_node(edge.producer)?;
            if let Some(available) = producer.output_port_count() {
                if edge.producer_port >= available {
                    return Err(self.port_out_of_range(edge.producer, edge.producer_port, available));
                }
            }
            if let Some(available) = node.input_port_count() {
                if edge.port >= available {
                    return Err(self.port_out_of_range(id, edge.port, available));
                }
            }
            if node.in_edges.iter().any(|e| e.port == edge.port) {
                return Err(FuseError::DuplicateInEdge {
                    graph: self.name.clone(),
                    node: id.0,
                    port: edge.port,
                });
            }
            node.in_edges.push(*edge);
        }

        self.nodes.push(node);
        Ok(id)
    }

    // ========================================================================
    // Predicates and labels
    // ========================================================================

    /// Attach a predicate that must hold whatever the branch (ANDed)
    pub fn append_decision_function(
        &mut self,
        id: PatternNodeId,
        predicate: Predicate,
    ) -> FuseResult<()> {
        let matcher = self.op_matcher_mut(id)?;
        matcher.predicates.push(predicate);
        Ok(())
    }

    /// Attach a predicate to the branch of one kind in an alternation
    pub fn append_kind_decision_function(
        &mut self,
        id: PatternNodeId,
        kind: OpKind,
        predicate: Predicate,
    ) -> FuseResult<()> {
        let name = self.name.clone();
        let matcher = self.op_matcher_mut(id)?;
        let branch = matcher
            .branches
            .iter_mut()
            .find(|b| b.kind == kind)
            .ok_or(FuseError::NotAnOpMatcher {
                graph: name,
                node: id.0,
            })?;
        branch.predicates.push(predicate);
        Ok(())
    }

    /// Label a node so match bindings can report it by name
    pub fn set_node_name(&mut self, id: PatternNodeId, name: impl Into<String>) -> FuseResult<()> {
        self.check_node(id)?;
        self.nodes[id.0].name = Some(name.into());
        Ok(())
    }

    fn op_matcher_mut(&mut self, id: PatternNodeId) -> FuseResult<&mut OpMatcher> {
        self.check_node(id)?;
        match &mut self.nodes[id.0].kind {
            PatternNodeKind::Op(m) => Ok(m),
            _ => Err(FuseError::NotAnOpMatcher {
                graph: self.name.clone(),
                node: id.0,
            }),
        }
    }

    // ========================================================================
    // Ports
    // ========================================================================

    /// Expose input `node_port` of `node` as this graph's input port `index`
    pub fn create_input_port(
        &mut self,
        index: usize,
        node: PatternNodeId,
        node_port: usize,
    ) -> FuseResult<()> {
        let target = self.check_node(node)?;
        if let Some(available) = target.input_port_count() {
            if node_port >= available {
                return Err(self.port_out_of_range(node, node_port, available));
            }
        }
        if target.in_edges.iter().any(|e| e.port == node_port) {
            return Err(FuseError::DuplicateInEdge {
                graph: self.name.clone(),
                node: node.0,
                port: node_port,
            });
        }
        let port = PortRef {
            node,
            port: node_port,
        };
        if self.inputs.contains_key(&index) || self.inputs.values().any(|p| *p == port) {
            return Err(FuseError::DuplicatePort {
                graph: self.name.clone(),
                direction: "input",
                index,
            });
        }
        self.inputs.insert(index, port);
        Ok(())
    }

    /// Expose output `node_port` of `node` as this graph's output port `index`
    pub fn create_output_port(
        &mut self,
        index: usize,
        node: PatternNodeId,
        node_port: usize,
    ) -> FuseResult<()> {
        let target = self.check_node(node)?;
        if let Some(available) = target.output_port_count() {
            if node_port >= available {
                return Err(self.port_out_of_range(node, node_port, available));
            }
        }
        if self.outputs.contains_key(&index) {
            return Err(FuseError::DuplicatePort {
                graph: self.name.clone(),
                direction: "output",
                index,
            });
        }
        self.outputs.insert(
            index,
            PortRef {
                node,
                port: node_port,
            },
        );
        Ok(())
    }

    // ========================================================================
    // Anchor and validation
    // ========================================================================

    /// Node a match attempt is seeded at
    ///
    /// The first concrete matcher, or the first node when the graph only
    /// holds blocks.
    pub fn anchor(&self) -> Option<PatternNodeId> {
        self.nodes
            .iter()
            .find(|n| !n.is_block())
            .or_else(|| self.nodes.first())
            .map(|n| n.id)
    }

    /// Real kinds that can be bound to the anchor, each listed once in
    /// first-seen order
    pub fn anchor_kinds(&self) -> Vec<OpKind> {
        let found: Vec<OpKind> = match self.anchor().and_then(|id| self.node(id)) {
            Some(node) => match &node.kind {
                PatternNodeKind::Op(m) => m.kinds().collect(),
                PatternNodeKind::Optional(body) => body.anchor_kinds(),
                PatternNodeKind::Repetition(rep) => rep.body.anchor_kinds(),
            },
            None => Vec::new(),
        };
        let mut kinds = Vec::with_capacity(found.len());
        for kind in found {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    }

    /// Check the graph is usable for matching
    ///
    /// Non-empty, and declared ports numbered `0..n` without gaps.
    pub fn validate(&self) -> FuseResult<()> {
        if self.nodes.is_empty() {
            return Err(FuseError::EmptyPattern(self.name.clone()));
        }
        for (direction, ports) in [("input", &self.inputs), ("output", &self.outputs)] {
            for (expected, index) in ports.keys().enumerate() {
                if *index != expected {
                    return Err(FuseError::DuplicatePort {
                        graph: self.name.clone(),
                        direction,
                        index: expected,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_node(&self, id: PatternNodeId) -> FuseResult<&PatternNode> {
        self.nodes.get(id.0).ok_or(FuseError::UnknownPatternNode {
            graph: self.name.clone(),
            node: id.0,
        })
    }

    fn port_out_of_range(&self, node: PatternNodeId, port: usize, available: usize) -> FuseError {
        FuseError::PortOutOfRange {
            graph: self.name.clone(),
            node: node.0,
            port,
            available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DataType;
    use crate::pattern::predicate::{check_input_dtype, check_input_num};

    fn relu_body() -> PatternGraph {
        let mut body = PatternGraph::new("relu_unit");
        let relu = body.append_op(OpKind::Relu, &[]).unwrap();
        body.create_input_port(0, relu, 0).unwrap();
        body.create_output_port(0, relu, 0).unwrap();
        body
    }

    #[test]
    fn test_append_op_and_edges() {
        let mut pg = PatternGraph::new("int8_relu");
        let dq = pg.append_op(OpKind::Dequantize, &[]).unwrap();
        let relu = pg.append_op(OpKind::Relu, &[in_edge(0, dq, 0)]).unwrap();
        let q = pg.append_op(OpKind::Quantize, &[in_edge(0, relu, 0)]).unwrap();

        let edges: Vec<_> = pg.edges().collect();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].producer, dq);
        assert_eq!(edges[1].consumer, q);
        assert_eq!(pg.anchor(), Some(dq));
        assert_eq!(pg.anchor_kinds(), vec![OpKind::Dequantize]);
    }

    #[test]
    fn test_empty_alternation_rejected() {
        let mut pg = PatternGraph::new("bad");
        let err = pg.append_alternation(&[], &[]).unwrap_err();
        assert_eq!(err, FuseError::EmptyAlternation("bad".to_string()));
    }

    #[test]
    fn test_duplicate_in_edge_rejected() {
        let mut pg = PatternGraph::new("bad");
        let a = pg.append_op(OpKind::Relu, &[]).unwrap();
        let err = pg
            .append_op(OpKind::Add, &[in_edge(0, a, 0), in_edge(0, a, 0)])
            .unwrap_err();
        assert!(matches!(err, FuseError::DuplicateInEdge { port: 0, .. }));
    }

    #[test]
    fn test_unknown_producer_rejected() {
        let mut pg = PatternGraph::new("bad");
        let err = pg
            .append_op(OpKind::Relu, &[in_edge(0, PatternNodeId(4), 0)])
            .unwrap_err();
        assert!(matches!(err, FuseError::UnknownPatternNode { node: 4, .. }));
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let mut pg = PatternGraph::new("bad");
        let a = pg.append_op(OpKind::Add, &[]).unwrap();
        pg.create_input_port(0, a, 0).unwrap();
        let err = pg.create_input_port(0, a, 1).unwrap_err();
        assert!(matches!(err, FuseError::DuplicatePort { direction: "input", .. }));
        let err = pg.create_input_port(1, a, 0).unwrap_err();
        assert!(matches!(err, FuseError::DuplicatePort { .. }));
    }

    #[test]
    fn test_block_port_out_of_range() {
        let mut pg = PatternGraph::new("outer");
        let mm = pg.append_op(OpKind::MatMul, &[]).unwrap();
        let rep = pg
            .append_repetition(relu_body(), PortMap::default(), 0, 4, &[in_edge(0, mm, 0)])
            .unwrap();
        let err = pg.append_op(OpKind::Add, &[in_edge(0, rep, 1)]).unwrap_err();
        assert!(matches!(
            err,
            FuseError::PortOutOfRange {
                port: 1,
                available: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_anchor_kinds_drop_repeated_branches() {
        let mut pg = PatternGraph::new("relu_tanh_relu");
        pg.append_alternation(&[OpKind::Relu, OpKind::Tanh, OpKind::Relu], &[])
            .unwrap();
        assert_eq!(pg.anchor_kinds(), vec![OpKind::Relu, OpKind::Tanh]);

        let mut g = OpGraph::new();
        let x = g.add_input(DataType::F32);
        let relu = g.add_op(OpKind::Relu, &[x], &[DataType::F32]).unwrap();
        let matches = crate::pattern::PatternMatcher::new(&g).find_all_matches(&pg);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].nodes, vec![relu]);
    }

    #[test]
    fn test_repetition_bounds() {
        let mut pg = PatternGraph::new("chain");
        let rep = pg
            .append_repetition(relu_body(), PortMap::default(), 1, usize::MAX, &[])
            .unwrap();
        match &pg.node(rep).unwrap().kind {
            PatternNodeKind::Repetition(r) => assert_eq!(r.max, MAX_REPETITION),
            other => panic!("unexpected node kind {:?}", other),
        }
        assert_eq!(pg.anchor(), Some(rep));
        assert_eq!(pg.anchor_kinds(), vec![OpKind::Relu]);

        let err = pg
            .append_repetition(relu_body(), PortMap::default(), 5, 2, &[])
            .unwrap_err();
        assert!(matches!(err, FuseError::InvalidRepetition { .. }));

        let err = pg
            .append_repetition(relu_body(), PortMap::new(1, 0), 0, 2, &[])
            .unwrap_err();
        assert!(matches!(err, FuseError::InvalidRepetition { .. }));
    }

    #[test]
    fn test_optional_requires_matching_ports() {
        let mut body = PatternGraph::new("bn");
        let bn = body.append_op(OpKind::BatchNormInference, &[]).unwrap();
        body.create_input_port(0, bn, 0).unwrap();

        let mut pg = PatternGraph::new("outer");
        let err = pg.append_optional(body, &[]).unwrap_err();
        assert!(matches!(err, FuseError::InvalidOptional { .. }));

        let err = pg.append_optional(PatternGraph::new("empty"), &[]).unwrap_err();
        assert_eq!(err, FuseError::EmptyPattern("empty".to_string()));
    }

    #[test]
    fn test_decision_functions() {
        let mut pg = PatternGraph::new("preds");
        let alt = pg
            .append_alternation(&[OpKind::MatMul, OpKind::Convolution], &[])
            .unwrap();
        pg.append_decision_function(alt, check_input_num(2)).unwrap();
        pg.append_kind_decision_function(alt, OpKind::Convolution, check_input_dtype(DataType::U8))
            .unwrap();

        let m = pg.node(alt).unwrap().as_op().unwrap();
        assert_eq!(m.predicates.len(), 1);
        assert_eq!(m.branches[1].predicates.len(), 1);
        assert!(m.branches[0].predicates.is_empty());

        let err = pg
            .append_kind_decision_function(alt, OpKind::Relu, check_input_num(1))
            .unwrap_err();
        assert!(matches!(err, FuseError::NotAnOpMatcher { .. }));

        let rep = pg
            .append_repetition(relu_body(), PortMap::default(), 0, 2, &[in_edge(0, alt, 0)])
            .unwrap();
        let err = pg.append_decision_function(rep, check_input_num(1)).unwrap_err();
        assert!(matches!(err, FuseError::NotAnOpMatcher { .. }));
    }

    #[test]
    fn test_validate_port_gaps() {
        let mut pg = PatternGraph::new("gappy");
        let a = pg.append_op(OpKind::Relu, &[]).unwrap();
        pg.create_output_port(1, a, 0).unwrap();
        assert!(matches!(
            pg.validate().unwrap_err(),
            FuseError::DuplicatePort { direction: "output", .. }
        ));
    }
}
