//! Fusion rules and the pass registry
//!
//! A [`FusionRule`] ties one or more pattern-graph variants to a priority
//! and a fused-op factory. A [`PassRegistry`] is an explicit, ordered
//! collection of rules built once and shared read-only by every rewrite.

use std::sync::Arc;

use indexmap::IndexMap;

use super::fuse::FusedOpFactory;
use crate::error::{FuseError, FuseResult};
use crate::graph::OpKind;
use crate::pattern::PatternGraph;

/// Backend tag stamped on fused ops when none is given
pub const DEFAULT_BACKEND: &str = "dnnl";

/// Pattern variants sharing one priority and one fused-op factory
#[derive(Debug, Clone)]
pub struct FusionRule {
    name: String,
    priority: f32,
    patterns: Vec<Arc<PatternGraph>>,
    fused_op: FusedOpFactory,
}

impl FusionRule {
    /// Start building a rule
    pub fn builder(name: impl Into<String>) -> FusionRuleBuilder {
        FusionRuleBuilder {
            name: name.into(),
            priority: 0.0,
            patterns: Vec::new(),
            fused_op: None,
        }
    }

    /// Rule name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Priority (higher wins)
    pub fn priority(&self) -> f32 {
        self.priority
    }

    /// Pattern variants in declaration order
    pub fn patterns(&self) -> &[Arc<PatternGraph>] {
        &self.patterns
    }

    /// Fused-op factory
    pub fn fused_op(&self) -> &FusedOpFactory {
        &self.fused_op
    }

    /// Kinds any variant can be anchored at
    pub fn anchor_kinds(&self) -> Vec<OpKind> {
        let mut kinds: Vec<OpKind> = Vec::new();
        for pattern in &self.patterns {
            for kind in pattern.anchor_kinds() {
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
        }
        kinds
    }
}

/// Builder for [`FusionRule`]
#[derive(Debug)]
pub struct FusionRuleBuilder {
    name: String,
    priority: f32,
    patterns: Vec<Arc<PatternGraph>>,
    fused_op: Option<FusedOpFactory>,
}

impl FusionRuleBuilder {
    /// Set the priority
    pub fn priority(mut self, priority: f32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a pattern variant built by `build`
    pub fn pattern<F>(mut self, build: F) -> FuseResult<Self>
    where
        F: FnOnce(&mut PatternGraph) -> FuseResult<()>,
    {
        let mut pg = PatternGraph::new(format!("{}#{}", self.name, self.patterns.len()));
        build(&mut pg)?;
        pg.validate()?;
        self.patterns.push(Arc::new(pg));
        Ok(self)
    }

    /// Add an already built pattern variant
    pub fn pattern_graph(mut self, pg: PatternGraph) -> FuseResult<Self> {
        pg.validate()?;
        self.patterns.push(Arc::new(pg));
        Ok(self)
    }

    /// Set the fused-op factory
    pub fn fused_op(mut self, factory: FusedOpFactory) -> Self {
        self.fused_op = Some(factory);
        self
    }

    /// Finish the rule
    pub fn build(self) -> FuseResult<FusionRule> {
        if !self.priority.is_finite() {
            return Err(FuseError::InvalidPriority {
                rule: self.name,
                priority: self.priority,
            });
        }
        if self.patterns.is_empty() {
            return Err(FuseError::NoPatterns(self.name));
        }
        let fused_op = self
            .fused_op
            .ok_or_else(|| FuseError::MissingFusedOp(self.name.clone()))?;
        Ok(FusionRule {
            name: self.name,
            priority: self.priority,
            patterns: self.patterns,
            fused_op,
        })
    }
}

/// Ordered collection of fusion rules
///
/// Registration order breaks priority ties.
#[derive(Debug, Clone)]
pub struct PassRegistry {
    backend: String,
    rules: IndexMap<String, FusionRule>,
}

impl PassRegistry {
    /// Create an empty registry stamping `backend` on fused ops
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            rules: IndexMap::new(),
        }
    }

    /// Backend tag
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Add a built rule
    pub fn add(&mut self, rule: FusionRule) -> FuseResult<()> {
        if self.rules.contains_key(rule.name()) {
            return Err(FuseError::DuplicateRule(rule.name().to_string()));
        }
        self.rules.insert(rule.name().to_string(), rule);
        Ok(())
    }

    /// Register `variants` under `name` with one priority and one factory
    pub fn register(
        &mut self,
        name: &str,
        variants: Vec<PatternGraph>,
        priority: f32,
        factory: FusedOpFactory,
    ) -> FuseResult<()> {
        let mut builder = FusionRule::builder(name).priority(priority);
        for pg in variants {
            builder = builder.pattern_graph(pg)?;
        }
        self.add(builder.fused_op(factory).build()?)
    }

    /// Rules in registration order
    pub fn rules(&self) -> impl Iterator<Item = &FusionRule> {
        self.rules.values()
    }

    /// Rule by name
    pub fn get(&self, name: &str) -> Option<&FusionRule> {
        self.rules.get(name)
    }

    /// Rule by registration index
    pub fn get_index(&self, index: usize) -> Option<&FusionRule> {
        self.rules.get_index(index).map(|(_, rule)| rule)
    }

    /// Rule names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(|k| k.as_str())
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if no rule is registered
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for PassRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND)
    }
}
