//! Decision predicates
//!
//! A predicate is a runtime closure evaluated against one candidate real
//! node. Predicates attached to the same pattern node are ANDed.

use std::fmt;
use std::sync::Arc;

use crate::graph::{DataType, NodeId, OpGraph, OpKind};

/// Signature of a decision function
pub type PredicateFn = dyn Fn(&OpGraph, NodeId) -> bool + Send + Sync;

/// A named decision function
#[derive(Clone)]
pub struct Predicate {
    name: String,
    func: Arc<PredicateFn>,
}

impl Predicate {
    /// Wrap a closure
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&OpGraph, NodeId) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Description used in trace output
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate against a real node
    pub fn eval(&self, graph: &OpGraph, node: NodeId) -> bool {
        (self.func)(graph, node)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.name).finish()
    }
}

/// Node has exactly `n` inputs
pub fn check_input_num(n: usize) -> Predicate {
    Predicate::new(format!("input_num=={}", n), move |g, node| {
        g.num_inputs(node) == n
    })
}

/// Node has exactly `n` outputs
pub fn check_output_num(n: usize) -> Predicate {
    Predicate::new(format!("output_num=={}", n), move |g, node| {
        g.num_outputs(node) == n
    })
}

/// Input 0 has dtype `dtype`
pub fn check_input_dtype(dtype: DataType) -> Predicate {
    check_input_dtype_at(0, dtype)
}

/// Input `port` has dtype `dtype`
pub fn check_input_dtype_at(port: usize, dtype: DataType) -> Predicate {
    Predicate::new(format!("input[{}].dtype=={}", port, dtype), move |g, node| {
        g.input_dtype(node, port) == Some(dtype)
    })
}

/// Output 0 has dtype `dtype`
pub fn check_output_dtype(dtype: DataType) -> Predicate {
    Predicate::new(format!("output[0].dtype=={}", dtype), move |g, node| {
        g.output_dtype(node, 0) == Some(dtype)
    })
}

/// Input `port` has a known shape of rank `rank`
pub fn check_input_rank(port: usize, rank: usize) -> Predicate {
    Predicate::new(format!("input[{}].rank=={}", port, rank), move |g, node| {
        g.input_rank(node, port) == Some(rank)
    })
}

/// Input `port` is produced by one of `kinds`
pub fn check_producer_kind(port: usize, kinds: &'static [OpKind]) -> Predicate {
    Predicate::new(format!("input[{}].producer in {:?}", port, kinds), move |g, node| {
        g.input_producer(node, port)
            .and_then(|p| g.kind(p.node))
            .map(|k| kinds.contains(&k))
            .unwrap_or(false)
    })
}

/// Inputs `a` and `b` carry the same value
pub fn check_same_input(a: usize, b: usize) -> Predicate {
    Predicate::new(format!("input[{}]==input[{}]", a, b), move |g, node| {
        match (g.input_value(node, a), g.input_value(node, b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    })
}

/// Logical negation
pub fn not(pred: Predicate) -> Predicate {
    let name = format!("!({})", pred.name());
    Predicate::new(name, move |g, node| !pred.eval(g, node))
}
