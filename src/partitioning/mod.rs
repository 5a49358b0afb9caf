//! Entry-point for graph partitioning of the cell dual graph.
//!
//! Partitioners implement [`Partitioner`]; [`partition_collective`] runs one
//! on rank 0 and hands the identical assignment to every rank.

pub mod error;
pub mod graph_growing;
#[cfg(feature = "metis-support")]
pub mod metis;
pub mod metrics;

pub use error::PartitionError;
pub use graph_growing::GraphGrowingPartitioner;
#[cfg(feature = "metis-support")]
pub use self::metis::MetisPartitioner;
pub use metrics::{edge_cut, imbalance, part_weights};

use crate::algs::communicator::Communicator;
use crate::algs::dual_graph::DualGraph;
use crate::mesh_error::MeshError;
use serde::{Deserialize, Serialize};

pub type PartitionId = usize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartitionerConfig {
    /// Allowed `max / average - 1` of part weights before a warning.
    pub imbalance_tolerance: f64,
    /// Boundary refinement sweeps after bisection.
    pub refinement_passes: usize,
}

impl Default for PartitionerConfig {
    fn default() -> Self {
        Self {
            imbalance_tolerance: 0.05,
            refinement_passes: 4,
        }
    }
}

/// A graph partitioning primitive.
///
/// Implementations must be deterministic: the same graph and part count
/// always give the same assignment.
pub trait Partitioner {
    fn name(&self) -> &'static str;

    /// Assign each vertex of `graph` a part in `0..n_parts`.
    fn partition(&self, graph: &DualGraph, n_parts: usize)
    -> Result<Vec<PartitionId>, PartitionError>;
}

/// Check that `parts` assigns every vertex to exactly one part in range.
pub fn validate_assignment(
    parts: &[PartitionId],
    n_vertices: usize,
    n_parts: usize,
) -> Result<(), PartitionError> {
    if parts.len() != n_vertices {
        return Err(PartitionError::LengthMismatch {
            got: parts.len(),
            expected: n_vertices,
        });
    }
    if let Some((vertex, &part)) = parts.iter().enumerate().find(|&(_, &p)| p >= n_parts) {
        return Err(PartitionError::PartOutOfRange {
            vertex,
            part,
            n_parts,
        });
    }
    Ok(())
}

const STATUS_OK: u64 = 0;
const STATUS_FAILED: u64 = 1;

/// Collective partition into `comm.size()` parts.
///
/// Rank 0 runs `partitioner` and broadcasts `[status, parts...]` through an
/// all-gather-v; every rank validates the received assignment. A failure on
/// rank 0 is reported on the other ranks as [`PartitionError::Remote`].
pub fn partition_collective<C, P>(
    graph: &DualGraph,
    comm: &C,
    partitioner: &P,
    cfg: &PartitionerConfig,
) -> Result<Vec<PartitionId>, MeshError>
where
    C: Communicator + ?Sized,
    P: Partitioner + ?Sized,
{
    let n = graph.vertex_count();
    let size = comm.size();

    let mut local_err = None;
    let payload: Vec<u64> = if comm.rank() == 0 {
        match partitioner
            .partition(graph, size)
            .and_then(|p| validate_assignment(&p, n, size).map(|_| p))
        {
            Ok(parts) => {
                log_quality(graph, &parts, size, partitioner.name(), cfg);
                std::iter::once(STATUS_OK)
                    .chain(parts.iter().map(|&p| p as u64))
                    .collect()
            }
            Err(e) => {
                local_err = Some(e);
                vec![STATUS_FAILED]
            }
        }
    } else {
        Vec::new()
    };

    let gathered = comm.allgatherv_u64(&payload)?;
    if let Some(e) = local_err {
        return Err(e.into());
    }
    let root = gathered
        .first()
        .ok_or_else(|| MeshError::Comm("empty partition broadcast".into()))?;
    match root.split_first() {
        Some((&STATUS_OK, parts)) => {
            let parts: Vec<PartitionId> = parts.iter().map(|&p| p as usize).collect();
            validate_assignment(&parts, n, size)?;
            Ok(parts)
        }
        _ => Err(PartitionError::Remote(0).into()),
    }
}

fn log_quality(
    graph: &DualGraph,
    parts: &[PartitionId],
    n_parts: usize,
    name: &str,
    cfg: &PartitionerConfig,
) {
    let weights = part_weights(graph, parts, n_parts);
    let imb = imbalance(&weights);
    log::debug!(
        "{name}: {n_parts} parts, edge cut {}, weights {weights:?}, imbalance {:.3}",
        edge_cut(graph, parts),
        imb
    );
    if imb > cfg.imbalance_tolerance {
        log::warn!(
            "{name}: imbalance {:.3} exceeds tolerance {:.3}",
            imb,
            cfg.imbalance_tolerance
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, ThreadComm};

    fn path(n: usize) -> DualGraph {
        let adj = (0..n)
            .map(|v| {
                let mut nb = Vec::new();
                if v > 0 {
                    nb.push(v - 1);
                }
                if v + 1 < n {
                    nb.push(v + 1);
                }
                nb
            })
            .collect();
        DualGraph::from_adjacency(adj)
    }

    struct Broken;
    impl Partitioner for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn partition(&self, g: &DualGraph, n_parts: usize) -> Result<Vec<usize>, PartitionError> {
            Ok(vec![n_parts; g.vertex_count()])
        }
    }

    #[test]
    fn validate_catches_gaps_and_overflow() {
        assert!(validate_assignment(&[0, 1], 2, 2).is_ok());
        assert_eq!(
            validate_assignment(&[0], 2, 2),
            Err(PartitionError::LengthMismatch {
                got: 1,
                expected: 2
            })
        );
        assert!(matches!(
            validate_assignment(&[0, 2], 2, 2),
            Err(PartitionError::PartOutOfRange { vertex: 1, .. })
        ));
    }

    #[test]
    fn single_rank_owns_everything() {
        let g = path(5);
        let parts = partition_collective(
            &g,
            &NoComm,
            &GraphGrowingPartitioner::default(),
            &PartitionerConfig::default(),
        )
        .unwrap();
        assert_eq!(parts, vec![0; 5]);
    }

    #[test]
    fn every_rank_receives_the_same_assignment() {
        let g = path(9);
        let all = ThreadComm::run(3, |comm| {
            partition_collective(
                &g,
                &comm,
                &GraphGrowingPartitioner::default(),
                &PartitionerConfig::default(),
            )
            .unwrap()
        });
        assert_eq!(all[0], all[1]);
        assert_eq!(all[1], all[2]);
        assert_eq!(part_weights(&g, &all[0], 3), vec![3, 3, 3]);
    }

    #[test]
    fn root_failure_reaches_every_rank() {
        let g = path(4);
        let errs = ThreadComm::run(2, |comm| {
            partition_collective(&g, &comm, &Broken, &PartitionerConfig::default()).unwrap_err()
        });
        assert!(matches!(
            errs[0],
            MeshError::Partition(PartitionError::PartOutOfRange { .. })
        ));
        assert!(matches!(
            errs[1],
            MeshError::Partition(PartitionError::Remote(0))
        ));
    }
}
