//! Core traits for graph-fuser
//!
//! Defines the interface every whole-graph pass implements.

use crate::error::FuseResult;
use crate::graph::OpGraph;
use crate::transform::RewriteStats;

/// A pass that rewrites an op graph in place
///
/// # Example
///
/// ```
/// use graph_fuser::error::FuseResult;
/// use graph_fuser::graph::OpGraph;
/// use graph_fuser::traits::GraphPass;
/// use graph_fuser::transform::RewriteStats;
///
/// struct NoOp;
///
/// impl GraphPass for NoOp {
///     fn name(&self) -> &str {
///         "noop"
///     }
///
///     fn run(&self, _graph: &mut OpGraph) -> FuseResult<RewriteStats> {
///         Ok(RewriteStats::default())
///     }
/// }
///
/// let mut g = OpGraph::new();
/// assert!(!NoOp.run(&mut g).unwrap().is_changed());
/// ```
pub trait GraphPass {
    /// Pass name used in logs
    fn name(&self) -> &str;

    /// Rewrite the graph
    fn run(&self, graph: &mut OpGraph) -> FuseResult<RewriteStats>;

    /// Check if running the pass could change the graph
    fn is_applicable(&self, graph: &OpGraph) -> bool {
        graph.node_count() > 0
    }
}

/// Passes applied in sequence
pub struct PassChain {
    name: String,
    passes: Vec<Box<dyn GraphPass>>,
}

impl PassChain {
    /// Create a new empty chain
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passes: Vec::new(),
        }
    }

    /// Add a pass to the chain
    #[allow(clippy::should_implement_trait)]
    pub fn add<P: GraphPass + 'static>(mut self, pass: P) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Add a boxed pass
    pub fn push(&mut self, pass: Box<dyn GraphPass>) {
        self.passes.push(pass);
    }

    /// Pass names in order
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Number of passes
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl GraphPass for PassChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, graph: &mut OpGraph) -> FuseResult<RewriteStats> {
        let mut stats = RewriteStats::default();
        for pass in &self.passes {
            if !pass.is_applicable(graph) {
                tracing::trace!(pass = pass.name(), "skipped");
                continue;
            }
            let pass_stats = pass.run(graph)?;
            tracing::debug!(
                pass = pass.name(),
                committed = pass_stats.committed,
                "pass finished"
            );
            stats.merge(&pass_stats);
        }
        Ok(stats)
    }

    fn is_applicable(&self, graph: &OpGraph) -> bool {
        self.passes.iter().any(|p| p.is_applicable(graph))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DataType, OpKind};

    struct CountingPass(&'static str);

    impl GraphPass for CountingPass {
        fn name(&self) -> &str {
            self.0
        }

        fn run(&self, _graph: &mut OpGraph) -> FuseResult<RewriteStats> {
            let mut stats = RewriteStats {
                committed: 1,
                ..Default::default()
            };
            stats.per_rule.insert(self.0.to_string(), 1);
            Ok(stats)
        }
    }

    #[test]
    fn test_pass_chain() {
        let chain = PassChain::new("chain")
            .add(CountingPass("a"))
            .add(CountingPass("b"));
        assert_eq!(chain.pass_names(), vec!["a", "b"]);

        let mut g = OpGraph::new();
        let x = g.add_input(DataType::F32);
        g.add_op(OpKind::Relu, &[x], &[DataType::F32]).unwrap();

        let stats = chain.run(&mut g).unwrap();
        assert_eq!(stats.committed, 2);
        assert_eq!(stats.commits_of("a"), 1);
    }

    #[test]
    fn test_empty_graph_skips_passes() {
        let chain = PassChain::new("chain").add(CountingPass("a"));
        let mut g = OpGraph::new();
        assert!(!chain.is_applicable(&g));
        assert_eq!(chain.run(&mut g).unwrap().committed, 0);
    }
}
