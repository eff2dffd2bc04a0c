//! Core rewrite loop
//!
//! Each cycle enumerates every match of every registered rule, sorts the
//! candidates by priority (descending, registration order on ties), commits
//! the ones that do not overlap an earlier commit, and compacts the arena.
//! Cycles repeat until one commits nothing.

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use tracing::{debug, trace, warn};

use super::fuse::fuse_match;
use super::registry::PassRegistry;
use crate::error::FuseResult;
use crate::graph::{NodeId, OpGraph};
use crate::pattern::{is_convex, MatchBinding, PatternMatcher};
use crate::traits::GraphPass;

/// Rewrite configuration
#[derive(Debug, Clone)]
pub struct RewriteConfig {
    /// Maximum enumerate/commit cycles
    pub max_cycles: usize,
    /// Skip fusions whose factory fails instead of aborting
    pub continue_on_error: bool,
    /// Validate the graph after every cycle
    pub verify: bool,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            max_cycles: 100,
            continue_on_error: false,
            verify: cfg!(debug_assertions),
        }
    }
}

impl RewriteConfig {
    /// Set the cycle limit
    pub fn with_max_cycles(mut self, max_cycles: usize) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    /// Skip failing factories
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Validate after every cycle
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }
}

/// Statistics from a rewrite run
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RewriteStats {
    /// Number of cycles performed
    pub cycles: usize,
    /// Number of matches found across all cycles
    pub candidates: usize,
    /// Number of fusions committed
    pub committed: usize,
    /// Candidates dropped because an earlier commit claimed one of their nodes
    pub overlap_rejections: usize,
    /// Candidates dropped because earlier commits made them non-convex
    pub convexity_rejections: usize,
    /// Candidates dropped because their factory failed
    pub factory_failures: usize,
    /// Number of real nodes replaced
    pub nodes_replaced: usize,
    /// Commits per rule, in first-commit order
    pub per_rule: IndexMap<String, usize>,
}

impl RewriteStats {
    /// Check if anything was committed
    pub fn is_changed(&self) -> bool {
        self.committed > 0
    }

    /// Commits of one rule
    pub fn commits_of(&self, rule: &str) -> usize {
        self.per_rule.get(rule).copied().unwrap_or(0)
    }

    /// Merge another run into this one
    pub fn merge(&mut self, other: &RewriteStats) {
        self.cycles += other.cycles;
        self.candidates += other.candidates;
        self.committed += other.committed;
        self.overlap_rejections += other.overlap_rejections;
        self.convexity_rejections += other.convexity_rejections;
        self.factory_failures += other.factory_failures;
        self.nodes_replaced += other.nodes_replaced;
        for (rule, count) in &other.per_rule {
            *self.per_rule.entry(rule.clone()).or_insert(0) += count;
        }
    }
}

/// A match tagged with the rule that found it
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Registration index of the rule
    pub rule: usize,
    /// Rule priority
    pub priority: f32,
    /// The match
    pub binding: MatchBinding,
}

/// Priority-driven rewriter over one registry
#[derive(Debug, Clone)]
pub struct Rewriter {
    name: String,
    registry: Arc<PassRegistry>,
    config: RewriteConfig,
}

impl Rewriter {
    /// Create a rewriter with the default configuration
    pub fn new(registry: Arc<PassRegistry>) -> Self {
        Self {
            name: "rewrite".to_string(),
            registry,
            config: RewriteConfig::default(),
        }
    }

    /// Configure the rewriter
    pub fn with_config(mut self, config: RewriteConfig) -> Self {
        self.config = config;
        self
    }

    /// Name reported through [`GraphPass`]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registry in use
    pub fn registry(&self) -> &PassRegistry {
        &self.registry
    }

    /// Configuration in use
    pub fn config(&self) -> &RewriteConfig {
        &self.config
    }

    /// Rewrite `graph` in place until a cycle commits nothing
    pub fn run_all(&self, graph: &mut OpGraph) -> FuseResult<RewriteStats> {
        let mut stats = RewriteStats::default();
        let mut saturated = false;

        while stats.cycles < self.config.max_cycles {
            stats.cycles += 1;
            let committed = self.run_cycle(graph, &mut stats)?;
            let removed = graph.compact();
            if self.config.verify {
                graph.validate()?;
            }
            debug!(
                pass = %self.name,
                cycle = stats.cycles,
                committed,
                removed,
                nodes = graph.node_count(),
                "rewrite cycle finished"
            );
            if committed == 0 {
                saturated = true;
                break;
            }
        }

        if !saturated {
            warn!(
                pass = %self.name,
                max_cycles = self.config.max_cycles,
                "rewrite stopped at the cycle limit"
            );
        }
        Ok(stats)
    }

    /// Every match of every rule against the current graph, sorted by
    /// priority descending and registration order on ties
    pub fn candidates(&self, graph: &OpGraph) -> Vec<Candidate> {
        let matcher = PatternMatcher::new(graph);
        let mut candidates = Vec::new();
        for (index, rule) in self.registry.rules().enumerate() {
            for pattern in rule.patterns() {
                for binding in matcher.find_all_matches(pattern) {
                    candidates.push(Candidate {
                        rule: index,
                        priority: rule.priority(),
                        binding,
                    });
                }
            }
        }

        // Stable: same-rule candidates keep anchor (topological) order
        candidates.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then_with(|| a.rule.cmp(&b.rule))
        });
        candidates
    }

    /// One enumerate/sort/commit cycle; returns the number of commits
    pub fn run_cycle(&self, graph: &mut OpGraph, stats: &mut RewriteStats) -> FuseResult<usize> {
        let candidates = self.candidates(graph);
        stats.candidates += candidates.len();

        let mut claimed: FxHashSet<NodeId> = FxHashSet::default();
        let mut committed = 0;

        for candidate in candidates {
            let binding = &candidate.binding;
            let rule = match self.registry.get_index(candidate.rule) {
                Some(rule) => rule,
                None => continue,
            };

            if binding.nodes.iter().any(|n| claimed.contains(n)) {
                trace!(rule = rule.name(), anchor = %binding.anchor, "overlaps an earlier commit");
                stats.overlap_rejections += 1;
                continue;
            }
            if committed > 0 && !is_convex(graph, &binding.node_set()) {
                trace!(rule = rule.name(), anchor = %binding.anchor, "no longer convex");
                stats.convexity_rejections += 1;
                continue;
            }

            let replacement = match rule.fused_op().create(graph, binding) {
                Ok(replacement) => replacement,
                Err(e) if self.config.continue_on_error => {
                    warn!(rule = rule.name(), error = %e, "fused op factory failed; skipping match");
                    stats.factory_failures += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let result = fuse_match(graph, binding, replacement, rule.name(), self.registry.backend())?;
            debug!(
                rule = rule.name(),
                priority = rule.priority(),
                nodes = binding.len(),
                fused = ?result.fused_node(),
                "committed fusion"
            );

            claimed.extend(binding.nodes.iter().copied());
            committed += 1;
            stats.committed += 1;
            stats.nodes_replaced += binding.len();
            *stats.per_rule.entry(rule.name().to_string()).or_insert(0) += 1;
        }

        Ok(committed)
    }
}

impl GraphPass for Rewriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, graph: &mut OpGraph) -> FuseResult<RewriteStats> {
        self.run_all(graph)
    }

    fn is_applicable(&self, graph: &OpGraph) -> bool {
        self.registry
            .rules()
            .flat_map(|rule| rule.anchor_kinds())
            .any(|kind| graph.count_kind(kind) > 0)
    }
}

/// Run `registry` over `graph` once with the default configuration
pub fn rewrite(graph: &mut OpGraph, registry: Arc<PassRegistry>) -> FuseResult<RewriteStats> {
    Rewriter::new(registry).run_all(graph)
}
