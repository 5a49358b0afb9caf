//! k-way partitioning through METIS (`metis-support` feature).

use super::{PartitionError, PartitionId, Partitioner};
use crate::algs::dual_graph::DualGraph;
use metis::Idx;

/// Partitioner backed by `METIS_PartGraphKway`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetisPartitioner;

fn to_idx(values: &[usize]) -> Result<Vec<Idx>, PartitionError> {
    values
        .iter()
        .map(|&v| {
            Idx::try_from(v).map_err(|_| PartitionError::Backend(format!("{v} overflows idx_t")))
        })
        .collect()
}

impl Partitioner for MetisPartitioner {
    fn name(&self) -> &'static str {
        "metis"
    }

    fn partition(
        &self,
        graph: &DualGraph,
        n_parts: usize,
    ) -> Result<Vec<PartitionId>, PartitionError> {
        let n = graph.vertex_count();
        if n_parts == 0 || n_parts > n {
            return Err(PartitionError::InvalidPartCount {
                n_parts,
                vertices: n,
            });
        }
        // METIS rejects a single part
        if n_parts == 1 {
            return Ok(vec![0; n]);
        }

        let xadj = to_idx(&graph.xadj)?;
        let adjncy = to_idx(&graph.adjncy)?;
        let vwgt: Vec<Idx> = graph.vwgt.iter().map(|&w| w as Idx).collect();
        let nparts = Idx::try_from(n_parts)
            .map_err(|_| PartitionError::Backend(format!("{n_parts} parts overflow idx_t")))?;
        let mut part: Vec<Idx> = vec![0; n];

        metis::Graph::new(1, nparts, &xadj, &adjncy)
            .map_err(|e| PartitionError::Backend(e.to_string()))?
            .set_vwgt(&vwgt)
            .part_kway(&mut part)
            .map_err(|e| PartitionError::Backend(e.to_string()))?;

        part.into_iter()
            .enumerate()
            .map(|(vertex, p)| {
                usize::try_from(p).map_err(|_| PartitionError::PartOutOfRange {
                    vertex,
                    part: usize::MAX,
                    n_parts,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitioning::validate_assignment;

    #[test]
    fn path_graph_splits_in_two() {
        let g = DualGraph::from_adjacency((0..8).map(|v: usize| {
            let mut n = Vec::new();
            if v > 0 {
                n.push(v - 1);
            }
            if v < 7 {
                n.push(v + 1);
            }
            n
        }).collect());
        let parts = MetisPartitioner.partition(&g, 2).unwrap();
        validate_assignment(&parts, 8, 2).unwrap();
        assert_eq!(parts.iter().filter(|&&p| p == 0).count(), 4);
        assert_eq!(MetisPartitioner.partition(&g, 1).unwrap(), vec![0; 8]);
    }
}
