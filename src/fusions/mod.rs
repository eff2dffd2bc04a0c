//! Fusion rule catalogue and pipeline
//!
//! The default registry stamps backend `"dnnl"` and registers, in order:
//!
//! | Family | Module | Priorities |
//! |--------|--------|------------|
//! | eltwise, chained ReLU, int8 ReLU | [`eltwise`] | 5.0 - 10.0 |
//! | float matmul chains, swish | [`matmul`] | 8.8 - 9.0 |
//! | int8 / x8x8 / bf16 matmul | [`quantized_matmul`] | 9.5 - 10.6 |
//! | convolution and pooling | [`conv`] | 8.8 - 10.2 |
//! | multi-head attention | [`attention`] | 20.0 |
//!
//! [`lowering`] holds the staged pipeline run after fusion.
//!
//! # Example
//!
//! ```
//! use graph_fuser::fusions::FusionPipeline;
//! use graph_fuser::graph::{DataType, OpGraph, OpKind};
//!
//! let mut g = OpGraph::new();
//! let mut v = g.add_input(DataType::F32);
//! for _ in 0..5 {
//!     let relu = g.add_op(OpKind::Relu, &[v], &[DataType::F32]).unwrap();
//!     v = g.output_value(relu, 0).unwrap();
//! }
//! g.mark_output(v).unwrap();
//!
//! let stats = FusionPipeline::fuse_only().run(&mut g).unwrap();
//! assert_eq!(stats.commits_of("chained_relu_fusion"), 1);
//! assert_eq!(g.kinds_in_order(), vec![OpKind::ChainedRelu]);
//! ```

pub mod attention;
pub mod common;
pub mod conv;
pub mod eltwise;
pub mod lowering;
pub mod matmul;
pub mod quantized_matmul;

use std::sync::Arc;

use tracing::info;

use crate::error::FuseResult;
use crate::graph::OpGraph;
use crate::traits::GraphPass;
use crate::transform::{PassRegistry, RewriteConfig, RewriteStats, Rewriter, DEFAULT_BACKEND};

pub use lowering::{LoweringPipeline, LoweringStage};

/// Backend tag of the default catalogue
pub const BACKEND: &str = DEFAULT_BACKEND;

/// Register every family into `registry`
pub fn register_all(registry: &mut PassRegistry) -> FuseResult<()> {
    eltwise::register(registry)?;
    matmul::register(registry)?;
    quantized_matmul::register(registry)?;
    conv::register(registry)?;
    attention::register(registry)?;
    Ok(())
}

/// A fresh registry holding the whole catalogue
pub fn default_registry() -> FuseResult<PassRegistry> {
    let mut registry = PassRegistry::new(BACKEND);
    register_all(&mut registry)?;
    Ok(registry)
}

// ============================================================================
// Pipeline
// ============================================================================

/// Fusion then lowering over one graph
#[derive(Debug, Clone)]
pub struct FusionPipeline {
    /// Run the fusion catalogue
    pub fuse: bool,
    /// Run the lowering stages
    pub lower: bool,
    /// Rewriter configuration shared by every step
    pub config: RewriteConfig,
}

impl Default for FusionPipeline {
    fn default() -> Self {
        Self {
            fuse: true,
            lower: true,
            config: RewriteConfig::default(),
        }
    }
}

impl FusionPipeline {
    /// Create a pipeline with everything enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Fusion catalogue only
    pub fn fuse_only() -> Self {
        Self {
            lower: false,
            ..Default::default()
        }
    }

    /// Lowering stages only
    pub fn lower_only() -> Self {
        Self {
            fuse: false,
            ..Default::default()
        }
    }

    /// Set the rewriter configuration
    pub fn with_config(mut self, config: RewriteConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the enabled steps
    pub fn run(&self, graph: &mut OpGraph) -> FuseResult<RewriteStats> {
        let mut total = RewriteStats::default();
        let before = graph.node_count();

        if self.fuse {
            let rewriter = Rewriter::new(Arc::new(default_registry()?))
                .with_config(self.config.clone())
                .with_name("fusion");
            total.merge(&rewriter.run(graph)?);
        }

        if self.lower {
            let lowering = LoweringPipeline::new()?.with_config(self.config.clone());
            total.merge(&lowering.run(graph)?);
        }

        info!(
            before,
            after = graph.node_count(),
            committed = total.committed,
            "fusion pipeline finished"
        );
        Ok(total)
    }
}
