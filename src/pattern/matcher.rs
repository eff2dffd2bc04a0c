//! Pattern matching engine
//!
//! Binds a [`PatternGraph`] to the real [`OpGraph`] starting from one anchor
//! node. The anchor pattern node is seeded first, then pattern edges are
//! walked in both directions, each time requiring the real graph to carry
//! the same edge on the same ports. Nested optional and repetition blocks
//! are matched recursively against their body graphs.
//!
//! Alternations keep the first branch that passes and never revisit the
//! choice. A failed attempt leaves nothing behind; matching only reads the
//! graph.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use super::graph::{PatternGraph, PatternNodeId, PatternNodeKind, Repetition};
use super::traversal::is_convex;
use crate::graph::{NodeId, OpGraph, ValueId};

/// Result of a successful pattern match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchBinding {
    /// Name of the matched pattern graph
    pub pattern: String,
    /// Real node the attempt was seeded at
    pub anchor: NodeId,
    /// Matched nodes in topological order
    pub nodes: Vec<NodeId>,
    /// Labelled pattern nodes and the real nodes bound to them
    pub named: Vec<(String, NodeId)>,
    /// Values entering the region, by node order then input port
    pub inputs: Vec<ValueId>,
    /// Values leaving the region, by node order then output port
    pub outputs: Vec<ValueId>,
}

impl MatchBinding {
    /// First real node bound under a label
    pub fn get(&self, name: &str) -> Option<NodeId> {
        self.named.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }

    /// Every real node bound under a label (repetitions bind several)
    pub fn get_all(&self, name: &str) -> Vec<NodeId> {
        self.named
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Check if a real node belongs to the match
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// Earliest matched node
    pub fn first(&self) -> Option<NodeId> {
        self.nodes.first().copied()
    }

    /// Latest matched node
    pub fn last(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    /// Number of matched nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Matched nodes as a set
    pub fn node_set(&self) -> FxHashSet<NodeId> {
        self.nodes.iter().copied().collect()
    }
}

// ============================================================================
// Internal binding state
// ============================================================================

/// What one pattern node resolved to
#[derive(Debug, Clone)]
enum Bound {
    Op(NodeId),
    /// Optional or repetition block, seen through its port values
    Block {
        inputs: Vec<Option<ValueId>>,
        outputs: Vec<Option<ValueId>>,
    },
}

/// Where a pattern graph level starts binding
#[derive(Debug, Clone, Copy)]
enum Seed {
    Anchor(NodeId),
    /// Declared input port `port` is fed by `value`
    Input { port: usize, value: ValueId },
    /// Declared output port `port` produces `value`
    Output { port: usize, value: ValueId },
}

/// Bindings of one pattern graph level
struct Level {
    bound: Vec<Option<Bound>>,
}

/// Nodes claimed so far across all levels of one attempt
#[derive(Debug, Default)]
struct MatchState {
    used: FxHashSet<NodeId>,
    order: Vec<NodeId>,
    named: Vec<(String, NodeId)>,
}

impl MatchState {
    fn checkpoint(&self) -> (usize, usize) {
        (self.order.len(), self.named.len())
    }

    fn rollback(&mut self, checkpoint: (usize, usize)) {
        for node in self.order.drain(checkpoint.0..) {
            self.used.remove(&node);
        }
        self.named.truncate(checkpoint.1);
    }

    fn claim(&mut self, node: NodeId, name: Option<&str>) {
        self.used.insert(node);
        self.order.push(node);
        if let Some(name) = name {
            self.named.push((name.to_string(), node));
        }
    }
}

// ============================================================================
// Matcher
// ============================================================================

/// Pattern matcher over one graph snapshot
pub struct PatternMatcher<'a> {
    graph: &'a OpGraph,
    order: Vec<NodeId>,
    rank: FxHashMap<NodeId, usize>,
}

impl<'a> PatternMatcher<'a> {
    /// Create a new pattern matcher
    pub fn new(graph: &'a OpGraph) -> Self {
        let order = graph.topological_order();
        let rank = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        Self { graph, order, rank }
    }

    /// Graph being matched
    pub fn graph(&self) -> &'a OpGraph {
        self.graph
    }

    /// Try to match `pattern` with its anchor bound to `anchor`
    pub fn match_at(&self, pattern: &PatternGraph, anchor: NodeId) -> Option<MatchBinding> {
        if !self.graph.is_live(anchor) {
            return None;
        }
        let mut state = MatchState::default();
        let level = self.match_level(pattern, Seed::Anchor(anchor), &mut state)?;
        if state.order.is_empty() {
            return None;
        }
        let declared: Vec<ValueId> = self
            .level_outputs(pattern, &level)
            .into_iter()
            .flatten()
            .collect();
        self.finalize(pattern, anchor, state, &declared)
    }

    /// Find every match of `pattern`, one attempt per candidate anchor
    ///
    /// Anchors are visited in topological order. Matches may overlap.
    pub fn find_all_matches(&self, pattern: &PatternGraph) -> Vec<MatchBinding> {
        let kinds = pattern.anchor_kinds();
        self.order
            .iter()
            .filter(|id| {
                self.graph
                    .kind(**id)
                    .map(|k| kinds.contains(&k))
                    .unwrap_or(false)
            })
            .filter_map(|&id| self.match_at(pattern, id))
            .collect()
    }

    fn rank(&self, node: NodeId) -> usize {
        self.rank.get(&node).copied().unwrap_or(usize::MAX)
    }

    // ========================================================================
    // Levels
    // ========================================================================

    fn match_level(
        &self,
        pattern: &PatternGraph,
        seed: Seed,
        state: &mut MatchState,
    ) -> Option<Level> {
        let checkpoint = state.checkpoint();
        let result = self.bind_level(pattern, seed, state);
        if result.is_none() {
            state.rollback(checkpoint);
        }
        result
    }

    fn bind_level(&self, pattern: &PatternGraph, seed: Seed, state: &mut MatchState) -> Option<Level> {
        let mut level = Level {
            bound: vec![None; pattern.len()],
        };

        let (start, bound) = match seed {
            Seed::Anchor(node) => {
                let id = pattern.anchor()?;
                (id, self.bind_anchor(pattern, id, node, state)?)
            }
            Seed::Input { port, value } => {
                let p = *pattern.input_ports().get(&port)?;
                (
                    p.node,
                    self.bind_forward(pattern, &level, p.node, value, p.port, state)?,
                )
            }
            Seed::Output { port, value } => {
                let p = *pattern.output_ports().get(&port)?;
                (
                    p.node,
                    self.bind_backward(pattern, &level, p.node, value, p.port, state)?,
                )
            }
        };
        level.bound[start.index()] = Some(bound);

        self.propagate(pattern, &mut level, state)?;
        Some(level)
    }

    /// Walk pattern edges until every node is bound or nothing moves
    fn propagate(&self, pattern: &PatternGraph, level: &mut Level, state: &mut MatchState) -> Option<()> {
        loop {
            let mut progressed = false;
            for edge in pattern.edges() {
                let producer = level.bound[edge.producer.index()].as_ref();
                let consumer = level.bound[edge.consumer.index()].as_ref();
                match (producer, consumer) {
                    (Some(p), None) => {
                        let value = self.out_value(p, edge.producer_port)?;
                        let bound = self.bind_forward(
                            pattern,
                            level,
                            edge.consumer,
                            value,
                            edge.consumer_port,
                            state,
                        )?;
                        level.bound[edge.consumer.index()] = Some(bound);
                        progressed = true;
                    }
                    (None, Some(c)) => {
                        let value = self.in_value(c, edge.consumer_port)?;
                        let bound = self.bind_backward(
                            pattern,
                            level,
                            edge.producer,
                            value,
                            edge.producer_port,
                            state,
                        )?;
                        level.bound[edge.producer.index()] = Some(bound);
                        progressed = true;
                    }
                    _ => {}
                }
            }
            if !progressed {
                break;
            }
        }

        if level.bound.iter().all(Option::is_some) {
            Some(())
        } else {
            trace!(pattern = pattern.name(), "pattern node left unbound");
            None
        }
    }

    // ========================================================================
    // Binding one pattern node
    // ========================================================================

    fn bind_anchor(
        &self,
        pattern: &PatternGraph,
        id: PatternNodeId,
        node: NodeId,
        state: &mut MatchState,
    ) -> Option<Bound> {
        let pnode = pattern.node(id)?;
        match &pnode.kind {
            PatternNodeKind::Op(m) => {
                if state.used.contains(&node) || !m.accepts(self.graph, node) {
                    return None;
                }
                state.claim(node, pnode.name.as_deref());
                Some(Bound::Op(node))
            }
            PatternNodeKind::Optional(body) => self.bind_optional(body, Seed::Anchor(node), state),
            PatternNodeKind::Repetition(rep) => {
                self.bind_repetition(pattern, rep, Seed::Anchor(node), state)
            }
        }
    }

    /// Bind `id` as a consumer of `value` on input `port`
    fn bind_forward(
        &self,
        pattern: &PatternGraph,
        level: &Level,
        id: PatternNodeId,
        value: ValueId,
        port: usize,
        state: &mut MatchState,
    ) -> Option<Bound> {
        let pnode = pattern.node(id)?;
        let seed = Seed::Input { port, value };
        match &pnode.kind {
            PatternNodeKind::Op(m) => {
                let candidate = self
                    .graph
                    .consumers(value)
                    .iter()
                    .filter(|c| c.port == port)
                    .map(|c| c.node)
                    .find(|&c| {
                        !state.used.contains(&c)
                            && m.accepts(self.graph, c)
                            && self.consistent(pattern, level, id, &Bound::Op(c))
                    })?;
                state.claim(candidate, pnode.name.as_deref());
                Some(Bound::Op(candidate))
            }
            PatternNodeKind::Optional(body) => {
                let checkpoint = state.checkpoint();
                let bound = self.bind_optional(body, seed, state)?;
                self.check_block(pattern, level, id, bound, checkpoint, state)
            }
            PatternNodeKind::Repetition(rep) => {
                let checkpoint = state.checkpoint();
                let bound = self.bind_repetition(pattern, rep, seed, state)?;
                self.check_block(pattern, level, id, bound, checkpoint, state)
            }
        }
    }

    /// Bind `id` as the producer of `value` on output `port`
    fn bind_backward(
        &self,
        pattern: &PatternGraph,
        level: &Level,
        id: PatternNodeId,
        value: ValueId,
        port: usize,
        state: &mut MatchState,
    ) -> Option<Bound> {
        let pnode = pattern.node(id)?;
        let seed = Seed::Output { port, value };
        match &pnode.kind {
            PatternNodeKind::Op(m) => {
                let producer = self.graph.producer(value)?;
                let node = producer.node;
                if producer.port != port
                    || !self.graph.is_live(node)
                    || state.used.contains(&node)
                    || !m.accepts(self.graph, node)
                    || !self.consistent(pattern, level, id, &Bound::Op(node))
                {
                    return None;
                }
                state.claim(node, pnode.name.as_deref());
                Some(Bound::Op(node))
            }
            PatternNodeKind::Optional(body) => {
                let checkpoint = state.checkpoint();
                let bound = self.bind_optional(body, seed, state)?;
                self.check_block(pattern, level, id, bound, checkpoint, state)
            }
            PatternNodeKind::Repetition(rep) => {
                let checkpoint = state.checkpoint();
                let bound = self.bind_repetition(pattern, rep, seed, state)?;
                self.check_block(pattern, level, id, bound, checkpoint, state)
            }
        }
    }

    fn check_block(
        &self,
        pattern: &PatternGraph,
        level: &Level,
        id: PatternNodeId,
        bound: Bound,
        checkpoint: (usize, usize),
        state: &mut MatchState,
    ) -> Option<Bound> {
        if self.consistent(pattern, level, id, &bound) {
            Some(bound)
        } else {
            state.rollback(checkpoint);
            None
        }
    }

    fn bind_optional(&self, body: &PatternGraph, seed: Seed, state: &mut MatchState) -> Option<Bound> {
        if self.may_extend(seed, state) {
            if let Some(sub) = self.match_level(body, seed, state) {
                return Some(Bound::Block {
                    inputs: self.level_inputs(body, &sub),
                    outputs: self.level_outputs(body, &sub),
                });
            }
        }

        // Absent: port i passes straight through to port i
        let n = body.input_ports().len();
        let mut inputs = vec![None; n];
        let mut outputs = vec![None; n];
        match seed {
            Seed::Input { port, value } | Seed::Output { port, value } if port < n => {
                inputs[port] = Some(value);
                outputs[port] = Some(value);
            }
            Seed::Anchor(_) => return None,
            _ => {}
        }
        trace!(body = body.name(), "optional block absent");
        Some(Bound::Block { inputs, outputs })
    }

    fn bind_repetition(
        &self,
        pattern: &PatternGraph,
        rep: &Repetition,
        seed: Seed,
        state: &mut MatchState,
    ) -> Option<Bound> {
        let body = rep.body.as_ref();
        let backward = matches!(seed, Seed::Output { .. });
        let mut inputs = vec![None; body.input_ports().len()];
        let mut outputs = vec![None; body.output_ports().len()];
        let mut next = Some(seed);
        let mut count = 0;

        while count < rep.max {
            let current = match next {
                Some(s) => s,
                None => break,
            };
            if !self.may_extend(current, state) {
                break;
            }
            let sub = match self.match_level(body, current, state) {
                Some(sub) => sub,
                None => break,
            };
            let sub_inputs = self.level_inputs(body, &sub);
            let sub_outputs = self.level_outputs(body, &sub);

            if backward {
                next = sub_inputs
                    .get(rep.port_map.input)
                    .copied()
                    .flatten()
                    .map(|value| Seed::Output {
                        port: rep.port_map.output,
                        value,
                    });
                if count == 0 {
                    outputs = sub_outputs;
                }
                inputs = sub_inputs;
            } else {
                next = sub_outputs
                    .get(rep.port_map.output)
                    .copied()
                    .flatten()
                    .map(|value| Seed::Input {
                        port: rep.port_map.input,
                        value,
                    });
                if count == 0 {
                    inputs = sub_inputs;
                }
                outputs = sub_outputs;
            }
            count += 1;
        }

        if count < rep.min {
            trace!(
                pattern = pattern.name(),
                count,
                min = rep.min,
                "repetition matched too few times"
            );
            return None;
        }

        if count == 0 {
            // Zero repeats: the chained ports pass straight through
            match seed {
                Seed::Input { port, value } => {
                    if let Some(slot) = inputs.get_mut(port) {
                        *slot = Some(value);
                    }
                    if port == rep.port_map.input {
                        outputs[rep.port_map.output] = Some(value);
                    }
                }
                Seed::Output { port, value } => {
                    if let Some(slot) = outputs.get_mut(port) {
                        *slot = Some(value);
                    }
                    if port == rep.port_map.output {
                        inputs[rep.port_map.input] = Some(value);
                    }
                }
                Seed::Anchor(_) => return None,
            }
        }

        Some(Bound::Block { inputs, outputs })
    }

    /// Blocks only grow through values that nothing else observes
    fn may_extend(&self, seed: Seed, state: &MatchState) -> bool {
        match seed {
            Seed::Anchor(_) => true,
            Seed::Input { value, .. } => match self.graph.producer(value) {
                Some(p) if state.used.contains(&p.node) => self.graph.is_single_use(value),
                _ => true,
            },
            Seed::Output { value, .. } => self.graph.is_single_use(value),
        }
    }

    /// Check every edge between `id` and an already-bound neighbour
    fn consistent(&self, pattern: &PatternGraph, level: &Level, id: PatternNodeId, bound: &Bound) -> bool {
        pattern.edges().all(|edge| {
            if edge.consumer == id {
                if let Some(p) = &level.bound[edge.producer.index()] {
                    return same_value(
                        self.out_value(p, edge.producer_port),
                        self.in_value(bound, edge.consumer_port),
                    );
                }
            }
            if edge.producer == id {
                if let Some(c) = &level.bound[edge.consumer.index()] {
                    return same_value(
                        self.out_value(bound, edge.producer_port),
                        self.in_value(c, edge.consumer_port),
                    );
                }
            }
            true
        })
    }

    // ========================================================================
    // Port values
    // ========================================================================

    fn in_value(&self, bound: &Bound, port: usize) -> Option<ValueId> {
        match bound {
            Bound::Op(node) => self.graph.input_value(*node, port),
            Bound::Block { inputs, .. } => inputs.get(port).copied().flatten(),
        }
    }

    fn out_value(&self, bound: &Bound, port: usize) -> Option<ValueId> {
        match bound {
            Bound::Op(node) => self.graph.output_value(*node, port),
            Bound::Block { outputs, .. } => outputs.get(port).copied().flatten(),
        }
    }

    fn level_inputs(&self, pattern: &PatternGraph, level: &Level) -> Vec<Option<ValueId>> {
        pattern
            .input_ports()
            .values()
            .map(|p| {
                level.bound[p.node.index()]
                    .as_ref()
                    .and_then(|b| self.in_value(b, p.port))
            })
            .collect()
    }

    fn level_outputs(&self, pattern: &PatternGraph, level: &Level) -> Vec<Option<ValueId>> {
        pattern
            .output_ports()
            .values()
            .map(|p| {
                level.bound[p.node.index()]
                    .as_ref()
                    .and_then(|b| self.out_value(b, p.port))
            })
            .collect()
    }

    // ========================================================================
    // Boundary
    // ========================================================================

    fn finalize(
        &self,
        pattern: &PatternGraph,
        anchor: NodeId,
        state: MatchState,
        declared: &[ValueId],
    ) -> Option<MatchBinding> {
        let MatchState {
            used: region,
            order: mut nodes,
            named,
        } = state;
        nodes.sort_by_key(|n| self.rank(*n));

        let mut inputs: Vec<ValueId> = Vec::new();
        for &node in &nodes {
            for &value in self.graph.input_values(node) {
                let inside = self
                    .graph
                    .producer(value)
                    .map(|p| region.contains(&p.node))
                    .unwrap_or(false);
                if !inside && !inputs.contains(&value) {
                    inputs.push(value);
                }
            }
        }

        let mut outputs: Vec<ValueId> = Vec::new();
        for &node in &nodes {
            for &value in self.graph.output_values(node) {
                let consumers = self.graph.consumers(value);
                let used_inside = consumers.iter().any(|c| region.contains(&c.node));
                let used_outside = consumers.iter().any(|c| !region.contains(&c.node))
                    || self.graph.is_graph_output(value);
                if used_inside && used_outside && !declared.contains(&value) {
                    trace!(
                        pattern = pattern.name(),
                        value = %value,
                        "internal value leaks out of the match"
                    );
                    return None;
                }
                if used_outside {
                    outputs.push(value);
                }
            }
        }

        if !is_convex(self.graph, &region) {
            trace!(pattern = pattern.name(), "match region is not convex");
            return None;
        }

        Some(MatchBinding {
            pattern: pattern.name().to_string(),
            anchor,
            nodes,
            named,
            inputs,
            outputs,
        })
    }
}

fn same_value(a: Option<ValueId>, b: Option<ValueId>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x == y)
}
