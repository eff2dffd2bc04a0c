//! Region convexity
//!
//! A matched region may only collapse into one node when no path leaves it
//! and re-enters it. The matcher checks this before binding and the
//! rewriter again before each commit.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::graph::{NodeId, OpGraph};

/// Check that no path leaves `region` and re-enters it
///
/// Fusing a non-convex region into one node would create a cycle. The
/// search starts from every outside consumer of a region node and fails as
/// soon as it reaches a region node again.
pub fn is_convex(graph: &OpGraph, region: &FxHashSet<NodeId>) -> bool {
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    let mut visited: FxHashSet<NodeId> = FxHashSet::default();

    for &node in region {
        for succ in graph.successors(node) {
            if !region.contains(&succ) && visited.insert(succ) {
                queue.push_back(succ);
            }
        }
    }

    while let Some(current) = queue.pop_front() {
        for succ in graph.successors(current) {
            if region.contains(&succ) {
                return false;
            }
            if visited.insert(succ) {
                queue.push_back(succ);
            }
        }
    }

    true
}
