//! Matching and rewriting over synthetic transformer blocks
//!
//! Run with: `cargo bench`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use graph_fuser::prelude::*;

fn op(g: &mut OpGraph, kind: OpKind, inputs: &[ValueId]) -> ValueId {
    let n = g.add_op(kind, inputs, &[DataType::F32]).unwrap();
    g.output_value(n, 0).unwrap()
}

fn dense(g: &mut OpGraph, x: ValueId, post: Option<OpKind>) -> ValueId {
    let w = g.add_input(DataType::F32);
    let b = g.add_input(DataType::F32);
    let v = op(g, OpKind::MatMul, &[x, w]);
    let v = op(g, OpKind::BiasAdd, &[v, b]);
    match post {
        Some(kind) => op(g, kind, &[v]),
        None => v,
    }
}

/// `dense -> Reshape -> Transpose`
fn head(g: &mut OpGraph, x: ValueId) -> ValueId {
    let v = dense(g, x, None);
    let v = op(g, OpKind::StaticReshape, &[v]);
    op(g, OpKind::StaticTranspose, &[v])
}

/// Attention, output projection with residual, then a GELU feed-forward
fn transformer_block(g: &mut OpGraph, x: ValueId) -> ValueId {
    let q = head(g, x);
    let k = head(g, x);
    let k = op(g, OpKind::StaticTranspose, &[k]);
    let v = head(g, x);

    let scale = g.add_input(DataType::F32);
    let mask = g.add_input(DataType::F32);
    let s = op(g, OpKind::MatMul, &[q, k]);
    let s = op(g, OpKind::Divide, &[s, scale]);
    let s = op(g, OpKind::Add, &[s, mask]);
    let s = op(g, OpKind::SoftMax, &[s]);
    let o = op(g, OpKind::MatMul, &[s, v]);
    let o = op(g, OpKind::StaticTranspose, &[o]);
    let o = op(g, OpKind::StaticReshape, &[o]);

    let o = dense(g, o, None);
    let o = op(g, OpKind::Add, &[o, x]);
    let o = dense(g, o, Some(OpKind::Gelu));
    dense(g, o, Some(OpKind::Relu))
}

fn make_model(layers: usize) -> OpGraph {
    let mut g = OpGraph::new();
    let mut x = g.add_input(DataType::F32);
    for _ in 0..layers {
        x = transformer_block(&mut g, x);
    }
    g.mark_output(x).unwrap();
    g
}

fn bench_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("match");
    let rewriter = Rewriter::new(Arc::new(default_registry().unwrap()));

    for layers in [1, 4, 16] {
        let g = make_model(layers);
        group.bench_with_input(BenchmarkId::new("candidates", layers), &g, |b, g| {
            b.iter(|| black_box(rewriter.candidates(g).len()))
        });
    }
    group.finish();
}

fn bench_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("rewrite");
    let rewriter = Rewriter::new(Arc::new(default_registry().unwrap()))
        .with_config(RewriteConfig::default().with_verify(false));

    for layers in [1, 4, 16] {
        let g = make_model(layers);
        group.bench_with_input(BenchmarkId::new("run_all", layers), &g, |b, g| {
            b.iter_batched(
                || g.clone(),
                |mut g| black_box(rewriter.run_all(&mut g).unwrap().committed),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_registry(c: &mut Criterion) {
    c.bench_function("default_registry", |b| {
        b.iter(|| black_box(default_registry().unwrap().len()))
    });
}

criterion_group!(benches, bench_match, bench_rewrite, bench_registry);
criterion_main!(benches);
