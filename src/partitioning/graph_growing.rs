//! Native deterministic partitioner: recursive bisection by greedy graph
//! growing, followed by a balance-preserving boundary refinement.
//!
//! Each bisection grows one side from a peripheral seed (lowest in-subset
//! degree, lowest id on ties), always absorbing the frontier vertex whose
//! move gains the most internal edges, until the side reaches its share of
//! the vertex weight. Refinement then moves single boundary vertices to the
//! neighbouring part they are most connected to, as long as the move strictly
//! lowers the cut and keeps every part non-empty and within the weight cap.

use super::{PartitionError, PartitionId, Partitioner, PartitionerConfig};
use crate::algs::dual_graph::DualGraph;
use std::cmp::Reverse;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct GraphGrowingPartitioner {
    pub config: PartitionerConfig,
}

impl GraphGrowingPartitioner {
    pub const NAME: &'static str = "graph-growing";

    pub fn new(config: PartitionerConfig) -> Self {
        Self { config }
    }
}

const OUTSIDE: u8 = 0;
const FREE: u8 = 1;
const TAKEN: u8 = 2;

fn weight(g: &DualGraph, v: usize) -> i64 {
    i64::from(g.vwgt[v])
}

/// Grow a connected-first region of `subset` up to `target` weight.
/// Returns the membership flags indexed by vertex.
fn grow(g: &DualGraph, subset: &[usize], target: i64, min_count: usize, max_count: usize) -> Vec<u8> {
    let mut state = vec![OUTSIDE; g.vertex_count()];
    for &v in subset {
        state[v] = FREE;
    }
    let in_degree = |v: usize, state: &[u8]| {
        g.neighbors(v).iter().filter(|&&u| state[u] != OUTSIDE).count()
    };

    let mut gain = vec![0i64; g.vertex_count()];
    let mut frontier: BTreeSet<(Reverse<i64>, usize)> = BTreeSet::new();
    let mut next_free = 0usize; // cursor into `subset` for disconnected restarts
    let (mut taken_weight, mut taken) = (0i64, 0usize);

    let seed = subset
        .iter()
        .copied()
        .min_by_key(|&v| (in_degree(v, &state), v));

    let mut pick = seed;
    while let Some(v) = pick {
        state[v] = TAKEN;
        taken_weight += weight(g, v);
        taken += 1;
        for &u in g.neighbors(v) {
            if state[u] != FREE {
                continue;
            }
            if frontier.remove(&(Reverse(gain[u]), u)) {
                // one neighbour moved from the other side to ours
                gain[u] += 2;
            } else {
                let (mut inside, mut outside) = (0i64, 0i64);
                for &w in g.neighbors(u) {
                    match state[w] {
                        TAKEN => inside += 1,
                        FREE => outside += 1,
                        _ => {}
                    }
                }
                gain[u] = inside - outside;
            }
            frontier.insert((Reverse(gain[u]), u));
        }

        if taken >= max_count || (taken_weight >= target && taken >= min_count) {
            break;
        }
        pick = match frontier.pop_first() {
            Some((_, u)) => Some(u),
            None => {
                while next_free < subset.len() && state[subset[next_free]] != FREE {
                    next_free += 1;
                }
                subset.get(next_free).copied()
            }
        };
    }
    state
}

fn bisect(g: &DualGraph, subset: &[usize], first_part: PartitionId, k: usize, part: &mut [PartitionId]) {
    if k == 1 {
        for &v in subset {
            part[v] = first_part;
        }
        return;
    }
    let kl = k / 2;
    let total: i64 = subset.iter().map(|&v| weight(g, v)).sum();
    let target = total * kl as i64 / k as i64;
    // Leave at least one vertex for every part on either side.
    let state = grow(g, subset, target, kl, subset.len() - (k - kl));

    let (left, right): (Vec<usize>, Vec<usize>) = subset.iter().partition(|&&v| state[v] == TAKEN);
    bisect(g, &left, first_part, kl, part);
    bisect(g, &right, first_part + kl, k - kl, part);
}

fn refine(g: &DualGraph, part: &mut [PartitionId], n_parts: usize, cfg: &PartitionerConfig) {
    let mut weights = super::part_weights(g, part, n_parts);
    let mut counts = vec![0usize; n_parts];
    for &p in part.iter() {
        counts[p] += 1;
    }
    let total: i64 = weights.iter().sum();
    let avg = total as f64 / n_parts as f64;
    let cap = (avg.ceil() as i64).max((avg * (1.0 + cfg.imbalance_tolerance)).floor() as i64);

    let mut conn = vec![0i64; n_parts];
    for _ in 0..cfg.refinement_passes {
        let mut moved = false;
        for v in 0..g.vertex_count() {
            let p = part[v];
            if counts[p] == 1 {
                continue;
            }
            for &u in g.neighbors(v) {
                conn[part[u]] += 1;
            }
            let w = weight(g, v);
            let best = g
                .neighbors(v)
                .iter()
                .map(|&u| part[u])
                .filter(|&q| q != p && weights[q] + w <= cap && conn[q] > conn[p])
                .max_by_key(|&q| (conn[q], Reverse(q)));
            for &u in g.neighbors(v) {
                conn[part[u]] = 0;
            }
            if let Some(q) = best {
                part[v] = q;
                weights[p] -= w;
                weights[q] += w;
                counts[p] -= 1;
                counts[q] += 1;
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }
}

impl Partitioner for GraphGrowingPartitioner {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn partition(&self, g: &DualGraph, n_parts: usize) -> Result<Vec<PartitionId>, PartitionError> {
        let n = g.vertex_count();
        if n_parts == 0 || n_parts > n {
            return Err(PartitionError::InvalidPartCount { n_parts, vertices: n });
        }
        let mut part = vec![0; n];
        let all: Vec<usize> = (0..n).collect();
        bisect(g, &all, 0, n_parts, &mut part);
        refine(g, &mut part, n_parts, &self.config);
        Ok(part)
    }
}
