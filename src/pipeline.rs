//! One-shot construction of the distributed grid.
//!
//! Every rank holds the same global [`GridRawData`] and runs the same stage
//! sequence: dual graph, collective partition, index maps, local topology,
//! ghost layer, global counts, geometry, boundary totals and reconstruction
//! stencils. Stage failures are agreed on collectively, so a bad mesh ends
//! the build on every rank instead of leaving peers blocked in a later
//! exchange.

use crate::algs::boundary::boundary_stats;
use crate::algs::communicator::{Communicator, agree};
use crate::algs::dual_graph::build_dual;
use crate::algs::ghost_layer::build_ghost_layer;
use crate::algs::index_maps::IndexMaps;
use crate::algs::local_topology::build_local_topology;
use crate::config::GridConfig;
use crate::geometry::compute_geometry;
use crate::io::{GridRawData, read_mesh};
use crate::mesh_error::MeshError;
use crate::partitioning::{GraphGrowingPartitioner, Partitioner, partition_collective};
use crate::topology::grid::{FaceNeighbor, Grid};
use std::path::Path;

/// Builds a [`Grid`] on every rank of `comm`.
pub struct GridBuilder<'c, C: Communicator + ?Sized> {
    comm: &'c C,
    partitioner: Box<dyn Partitioner>,
    config: GridConfig,
}

impl<'c, C: Communicator + ?Sized> GridBuilder<'c, C> {
    /// Default configuration with the native partitioner.
    pub fn new(comm: &'c C) -> Self {
        let config = GridConfig::default();
        Self {
            comm,
            partitioner: Box::new(GraphGrowingPartitioner::new(config.partitioner.clone())),
            config,
        }
    }

    /// Replace the configuration; the native partitioner picks up its new
    /// settings unless a custom partitioner was set.
    pub fn with_config(mut self, config: GridConfig) -> Self {
        if self.partitioner.name() == GraphGrowingPartitioner::NAME {
            self.partitioner = Box::new(GraphGrowingPartitioner::new(config.partitioner.clone()));
        }
        self.config = config;
        self
    }

    pub fn with_partitioner(mut self, partitioner: impl Partitioner + 'static) -> Self {
        self.partitioner = Box::new(partitioner);
        self
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Read `path` on every rank and build from it.
    pub fn build_from_path(&self, path: impl AsRef<Path>) -> Result<Grid, MeshError> {
        let raw = agree(self.comm, "read mesh", read_mesh(path))?;
        self.build(raw)
    }

    /// Like [`build`](Self::build), but any failure is logged with the rank
    /// and terminates every rank.
    pub fn build_or_abort(&self, raw: GridRawData) -> Grid {
        match self.build(raw) {
            Ok(grid) => grid,
            Err(e) => e.abort(self.comm),
        }
    }

    /// Run the whole pipeline. Collective.
    pub fn build(&self, mut raw: GridRawData) -> Result<Grid, MeshError> {
        let comm = self.comm;
        let rank = comm.rank();
        let cfg = &self.config;

        agree(comm, "configuration", cfg.validate())?;
        if cfg.scale != 1.0 {
            raw.scale(cfg.scale);
        }
        agree(comm, "mesh validation", raw.validate("input"))?;

        let dual = agree(comm, "dual graph", build_dual(&raw))?;
        let owner = partition_collective(&dual, comm, self.partitioner.as_ref(), &cfg.partitioner)?;
        drop(dual);

        let mut maps = agree(comm, "index maps", IndexMaps::build(&raw, owner, rank))?;
        let (mut grid, partition_faces) =
            agree(comm, "local topology", build_local_topology(&raw, &maps))?;
        build_ghost_layer(&mut grid, &mut maps, &raw, partition_faces, comm)?;
        drop(maps);

        set_global_counts(&mut grid, raw.cell_count(), comm)?;
        drop(raw);

        agree(comm, "geometry", compute_geometry(&mut grid, cfg.closure_tolerance))?;
        grid.sync_ghost_geometry(comm)?;
        boundary_stats(&mut grid, comm)?;
        agree(comm, "reconstruction stencils", grid.prepare_reconstruction(cfg))?;

        if rank == 0 {
            log::info!(
                "grid ready on {} ranks: {} cells, {} faces, {} nodes, {} boundary regions",
                comm.size(),
                grid.n_global_cells,
                grid.n_global_faces,
                grid.n_global_nodes,
                grid.regions.len()
            );
        }
        log::debug!(
            "[rank {rank}] {} cells, {} ghosts, {} faces, {} nodes",
            grid.cells.len(),
            grid.ghosts.len(),
            grid.faces.len(),
            grid.nodes.len()
        );
        Ok(grid)
    }
}

/// Sum owned nodes, faces and cells over the ranks. A face shared with a
/// ghost is counted by the side with the lower global cell id; the owned
/// cell total must reproduce the mesh's cell count.
fn set_global_counts<C: Communicator + ?Sized>(
    grid: &mut Grid,
    n_cells: usize,
    comm: &C,
) -> Result<(), MeshError> {
    let faces = grid
        .faces
        .iter()
        .filter(|f| match f.neighbor {
            FaceNeighbor::Ghost(g) => grid.cells[f.parent].global_id < grid.ghosts[g].global_id,
            _ => true,
        })
        .count();
    let totals = comm.allreduce_sum_u64(&[
        grid.owned_nodes().count() as u64,
        faces as u64,
        grid.cells.len() as u64,
    ])?;
    grid.n_global_nodes = totals[0] as usize;
    grid.n_global_faces = totals[1] as usize;
    grid.n_global_cells = n_cells;
    if totals[2] as usize != n_cells {
        return Err(MeshError::PartitionInconsistency {
            rank: grid.rank,
            message: format!(
                "ranks own {} cells in total, mesh has {n_cells}",
                totals[2]
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::meshgen::structured_box;

    #[test]
    fn single_rank_build_has_no_ghosts() {
        let raw = structured_box([2, 2, 2], [0.0; 3], [1.0; 3]);
        let grid = GridBuilder::new(&NoComm).build(raw).unwrap();
        assert!(grid.ghosts.is_empty());
        assert!(grid.halo.links.is_empty());
        assert_eq!(grid.n_global_cells, 8);
        assert_eq!(grid.n_global_nodes, 27);
        assert_eq!(grid.n_global_faces, 36);
        assert!(grid.cells.iter().all(|c| !c.grad_map.is_empty()));
    }

    #[test]
    fn scaling_is_applied_before_geometry() {
        let raw = structured_box([1, 1, 1], [0.0; 3], [1.0; 3]);
        let cfg = GridConfig {
            scale: 2.0,
            ..Default::default()
        };
        let grid = GridBuilder::new(&NoComm).with_config(cfg).build(raw).unwrap();
        assert!((grid.cells[0].volume - 8.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let raw = structured_box([1, 1, 1], [0.0; 3], [1.0; 3]);
        let cfg = GridConfig {
            scale: -1.0,
            ..Default::default()
        };
        let err = GridBuilder::new(&NoComm).with_config(cfg).build(raw).unwrap_err();
        assert!(matches!(err, MeshError::Config(_)));
    }
}
