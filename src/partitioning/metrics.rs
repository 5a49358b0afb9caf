//! Partitioning metrics utilities.
//!
//! Edge cut and load balance of a cell assignment. Used for logging after
//! partitioning and in tests.

use super::PartitionId;
use crate::algs::dual_graph::DualGraph;

/// Computes the edge cut of a partitioning (O(E)).
///
/// The edge cut is the number of undirected edges that cross between
/// different parts, a proxy for halo traffic.
pub fn edge_cut(g: &DualGraph, parts: &[PartitionId]) -> usize {
    (0..g.vertex_count())
        .map(|u| {
            g.neighbors(u)
                .iter()
                .filter(|&&v| u < v && parts[u] != parts[v])
                .count()
        })
        .sum()
}

/// Sum of vertex weights per part.
pub fn part_weights(g: &DualGraph, parts: &[PartitionId], n_parts: usize) -> Vec<i64> {
    let mut w = vec![0i64; n_parts];
    for (v, &p) in parts.iter().enumerate() {
        w[p] += i64::from(g.vwgt[v]);
    }
    w
}

/// `max / average - 1` of the part weights; zero for a perfect split.
pub fn imbalance(weights: &[i64]) -> f64 {
    let total: i64 = weights.iter().sum();
    if weights.is_empty() || total == 0 {
        return 0.0;
    }
    let avg = total as f64 / weights.len() as f64;
    let max = weights.iter().copied().max().unwrap_or(0) as f64;
    max / avg - 1.0
}
