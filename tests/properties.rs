//! Property tests for matching and rewriting
//!
//! Random op chains are run through the default catalogue; hand-built
//! patterns check repetition bounds, alternation branches and optional
//! passthrough.

use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use graph_fuser::fusions::default_registry;
use graph_fuser::pattern::predicate::check_input_dtype;
use graph_fuser::prelude::*;

// ============================================================================
// Generators
// ============================================================================

/// One step appended to the tail of a chain
#[derive(Debug, Clone)]
enum Step {
    Unary(OpKind),
    Binary(OpKind),
    MatMul { quantized_weight: bool },
    BiasAdd,
    Quantize,
    Dequantize,
    /// Expose the current tail as an extra graph output
    Tap,
    /// `v -> op -> Add(v, op(v))`: a side branch rejoining the tail
    Branch(OpKind),
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => prop::sample::select(vec![
            OpKind::Relu,
            OpKind::Tanh,
            OpKind::Sigmoid,
            OpKind::Gelu,
            OpKind::Abs,
        ])
        .prop_map(Step::Unary),
        2 => prop::sample::select(vec![OpKind::Add, OpKind::Multiply]).prop_map(Step::Binary),
        2 => any::<bool>().prop_map(|quantized_weight| Step::MatMul { quantized_weight }),
        1 => Just(Step::BiasAdd),
        1 => Just(Step::Quantize),
        1 => Just(Step::Dequantize),
        1 => Just(Step::Tap),
        2 => prop::sample::select(vec![OpKind::Relu, OpKind::Sigmoid, OpKind::Quantize])
            .prop_map(Step::Branch),
    ]
}

fn arb_chain() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(arb_step(), 1..16)
}

fn op(g: &mut OpGraph, kind: OpKind, inputs: &[ValueId], dtype: DataType) -> ValueId {
    let n = g.add_op(kind, inputs, &[dtype]).unwrap();
    g.output_value(n, 0).unwrap()
}

fn build_chain(steps: &[Step]) -> OpGraph {
    let mut g = OpGraph::new();
    let mut v = g.add_input(DataType::F32);
    for step in steps {
        v = match step {
            Step::Unary(kind) => op(&mut g, *kind, &[v], DataType::F32),
            Step::Binary(kind) => {
                let other = g.add_input(DataType::F32);
                op(&mut g, *kind, &[v, other], DataType::F32)
            }
            Step::MatMul { quantized_weight } => {
                let w = if *quantized_weight {
                    let raw = g.add_input(DataType::S8);
                    op(&mut g, OpKind::Dequantize, &[raw], DataType::F32)
                } else {
                    g.add_input(DataType::F32)
                };
                op(&mut g, OpKind::MatMul, &[v, w], DataType::F32)
            }
            Step::BiasAdd => {
                let b = g.add_input(DataType::F32);
                op(&mut g, OpKind::BiasAdd, &[v, b], DataType::F32)
            }
            Step::Quantize => op(&mut g, OpKind::Quantize, &[v], DataType::U8),
            Step::Dequantize => op(&mut g, OpKind::Dequantize, &[v], DataType::F32),
            Step::Tap => {
                g.mark_output(v).unwrap();
                v
            }
            Step::Branch(kind) => {
                let side = if *kind == OpKind::Quantize {
                    let q = op(&mut g, OpKind::Quantize, &[v], DataType::U8);
                    op(&mut g, OpKind::Dequantize, &[q], DataType::F32)
                } else {
                    op(&mut g, *kind, &[v], DataType::F32)
                };
                op(&mut g, OpKind::Add, &[v, side], DataType::F32)
            }
        };
    }
    g.mark_output(v).unwrap();
    g
}

fn catalogue() -> Rewriter {
    Rewriter::new(Arc::new(default_registry().unwrap()))
}

type CommitLog = Arc<Mutex<Vec<Vec<NodeId>>>>;

/// The default catalogue with every factory recording the nodes of the
/// match it builds a replacement for
fn recording_catalogue() -> (Rewriter, CommitLog) {
    let log: CommitLog = Arc::default();
    let defaults = default_registry().unwrap();
    let mut registry = PassRegistry::new(defaults.backend());
    for rule in defaults.rules() {
        let inner = rule.fused_op().clone();
        let sink = Arc::clone(&log);
        let mut builder = FusionRule::builder(rule.name()).priority(rule.priority());
        for pattern in rule.patterns() {
            builder = builder.pattern_graph(PatternGraph::clone(pattern)).unwrap();
        }
        let factory = FusedOpFactory::new(move |graph, binding| {
            let replacement = inner.create(graph, binding)?;
            sink.lock().unwrap().push(binding.nodes.clone());
            Ok(replacement)
        });
        registry.add(builder.fused_op(factory).build().unwrap()).unwrap();
    }
    (Rewriter::new(Arc::new(registry)), log)
}

// ============================================================================
// Rewrite Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// A saturated rewrite finds nothing more to do
    #[test]
    fn rewrite_is_idempotent(steps in arb_chain()) {
        let mut g = build_chain(&steps);
        let rewriter = catalogue();

        rewriter.run_all(&mut g).unwrap();
        let kinds = g.kinds_in_order();
        let count = g.node_count();

        let again = rewriter.run_all(&mut g).unwrap();
        prop_assert_eq!(again.committed, 0, "second run committed on {:?}", steps);
        prop_assert_eq!(again.cycles, 1);
        prop_assert_eq!(g.kinds_in_order(), kinds);
        prop_assert_eq!(g.node_count(), count);
    }

    /// Commits of one cycle never share a node, and each one retires
    /// exactly the nodes it matched
    #[test]
    fn commits_in_a_cycle_are_disjoint(steps in arb_chain()) {
        let mut g = build_chain(&steps);
        let originals: FxHashSet<NodeId> = g.node_ids().collect();
        let (rewriter, log) = recording_catalogue();

        let mut stats = RewriteStats::default();
        let committed = rewriter.run_cycle(&mut g, &mut stats).unwrap();
        let commits = log.lock().unwrap().clone();
        prop_assert_eq!(commits.len(), committed);

        let mut seen: FxHashSet<NodeId> = FxHashSet::default();
        for nodes in &commits {
            for node in nodes {
                prop_assert!(originals.contains(node), "{:?} was created this cycle", node);
                prop_assert!(seen.insert(*node), "{:?} claimed twice in {:?}", node, steps);
                prop_assert!(!g.is_live(*node));
            }
        }
        prop_assert_eq!(seen.len(), stats.nodes_replaced);

        let retired = originals.iter().filter(|n| !g.is_live(**n)).count();
        prop_assert_eq!(retired, seen.len());
    }

    /// Graph inputs, graph outputs and the inputs of untouched nodes keep
    /// their value ids
    #[test]
    fn rewrite_preserves_boundary_edges(steps in arb_chain()) {
        let mut g = build_chain(&steps);
        let inputs = g.graph_inputs().to_vec();
        let outputs = g.graph_outputs();
        let wiring: FxHashMap<NodeId, Vec<ValueId>> = g
            .node_ids()
            .map(|n| (n, g.input_values(n).to_vec()))
            .collect();
        let before = g.node_count();

        catalogue().run_all(&mut g).unwrap();
        g.validate().unwrap();

        prop_assert_eq!(g.graph_inputs(), &inputs[..]);
        prop_assert_eq!(g.graph_outputs(), outputs.clone());
        prop_assert!(g.node_count() <= before);

        for (node, values) in &wiring {
            if g.is_live(*node) {
                prop_assert_eq!(g.input_values(*node), &values[..]);
            }
        }
        for v in &outputs {
            let producer = g.producer(*v).map(|p| p.node);
            prop_assert!(producer.map(|n| g.is_live(n)).unwrap_or(false));
        }
    }
}

// ============================================================================
// Pattern Properties
// ============================================================================

fn relu_unit() -> PatternGraph {
    let mut body = PatternGraph::new("relu_unit");
    let relu = body.append_op(OpKind::Relu, &[]).unwrap();
    body.set_node_name(relu, "relu").unwrap();
    body.create_input_port(0, relu, 0).unwrap();
    body.create_output_port(0, relu, 0).unwrap();
    body
}

fn make_relu_chain(n: usize) -> (OpGraph, NodeId, Vec<NodeId>) {
    let mut g = OpGraph::new();
    let x = g.add_input(DataType::F32);
    let head = g.add_op(OpKind::Tanh, &[x], &[DataType::F32]).unwrap();
    let mut v = g.output_value(head, 0).unwrap();
    let mut relus = Vec::with_capacity(n);
    for _ in 0..n {
        let id = g.add_op(OpKind::Relu, &[v], &[DataType::F32]).unwrap();
        v = g.output_value(id, 0).unwrap();
        relus.push(id);
    }
    g.mark_output(v).unwrap();
    (g, head, relus)
}

fn bounded_relu_rule(min: usize, max: usize) -> FusionRule {
    FusionRule::builder("bounded_relu")
        .priority(1.0)
        .pattern(|pg| {
            pg.append_repetition(relu_unit(), PortMap::default(), min, max, &[])?;
            Ok(())
        })
        .unwrap()
        .fused_op(FusedOpFactory::new(|_, binding| {
            Ok(FusedOp::new(OpKind::ChainedRelu)
                .with_attr("count", binding.len() as i64)
                .into())
        }))
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// `[1, 3]` spans at most three units and needs at least one
    #[test]
    fn repetition_span_is_bounded(n in 0usize..12) {
        let (g, head, relus) = make_relu_chain(n);
        let mut pg = PatternGraph::new("relu_span");
        pg.append_repetition(relu_unit(), PortMap::default(), 1, 3, &[]).unwrap();

        let matcher = PatternMatcher::new(&g);
        prop_assert!(matcher.match_at(&pg, head).is_none());
        match relus.first() {
            Some(first) => {
                let m = matcher.match_at(&pg, *first).unwrap();
                prop_assert_eq!(m.len(), n.min(3));
                prop_assert_eq!(&m.nodes[..], &relus[..n.min(3)]);
            }
            None => prop_assert!(matcher.find_all_matches(&pg).is_empty()),
        }
    }

    /// A long chain splits into maximal spans, the remainder last
    #[test]
    fn repetition_remainder_is_fused_separately(n in 1usize..12) {
        let (mut g, _, _) = make_relu_chain(n);
        let mut registry = PassRegistry::default();
        registry.add(bounded_relu_rule(1, 3)).unwrap();

        let stats = Rewriter::new(Arc::new(registry)).run_all(&mut g).unwrap();
        prop_assert_eq!(stats.committed, (n + 2) / 3);
        prop_assert_eq!(g.count_kind(OpKind::Relu), 0);

        let counts: Vec<i64> = g
            .topological_order()
            .into_iter()
            .filter_map(|node| g.attrs(node).and_then(|a| a.get_int("count")))
            .collect();
        let mut expected = vec![3i64; n / 3];
        if n % 3 != 0 {
            expected.push((n % 3) as i64);
        }
        prop_assert_eq!(counts, expected);
    }

    /// An alternation only evaluates the predicates of the branch whose
    /// kind the real node has
    #[test]
    fn alternation_checks_own_branch(tanh in any::<bool>(), bf16 in any::<bool>()) {
        let kind = if tanh { OpKind::Tanh } else { OpKind::Relu };
        let dtype = if bf16 { DataType::Bf16 } else { DataType::F32 };
        let mut g = OpGraph::new();
        let x = g.add_input(dtype);
        let node = g.add_op(kind, &[x], &[dtype]).unwrap();

        let mut pg = PatternGraph::new("relu_or_bf16_tanh");
        let alt = pg.append_alternation(&[OpKind::Relu, OpKind::Tanh], &[]).unwrap();
        pg.append_kind_decision_function(alt, OpKind::Tanh, check_input_dtype(DataType::Bf16))
            .unwrap();

        let matched = PatternMatcher::new(&g).match_at(&pg, node).is_some();
        prop_assert_eq!(matched, !tanh || bf16);
    }

    /// An absent optional block collapses to a direct edge
    #[test]
    fn optional_block_may_be_absent(with_bn in any::<bool>()) {
        let mut g = OpGraph::new();
        let a = g.add_input(DataType::F32);
        let b = g.add_input(DataType::F32);
        let mm = g.add_op(OpKind::MatMul, &[a, b], &[DataType::F32]).unwrap();
        let mut v = g.output_value(mm, 0).unwrap();
        let mut expected = vec![mm];
        if with_bn {
            let bn = g.add_op(OpKind::BatchNormInference, &[v], &[DataType::F32]).unwrap();
            v = g.output_value(bn, 0).unwrap();
            expected.push(bn);
        }
        let relu = g.add_op(OpKind::Relu, &[v], &[DataType::F32]).unwrap();
        expected.push(relu);

        let mut body = PatternGraph::new("optional_bn");
        let p_bn = body.append_op(OpKind::BatchNormInference, &[]).unwrap();
        body.create_input_port(0, p_bn, 0).unwrap();
        body.create_output_port(0, p_bn, 0).unwrap();

        let mut pg = PatternGraph::new("matmul_bn_relu");
        let p_mm = pg.append_op(OpKind::MatMul, &[]).unwrap();
        let opt = pg.append_optional(body, &[in_edge(0, p_mm, 0)]).unwrap();
        pg.append_op(OpKind::Relu, &[in_edge(0, opt, 0)]).unwrap();

        let m = PatternMatcher::new(&g).match_at(&pg, mm).unwrap();
        prop_assert_eq!(m.nodes, expected);
        prop_assert_eq!(&m.inputs[..], &[a, b][..]);
    }
}
