#![cfg_attr(docsrs, feature(doc_cfg))]
//! # fvmesh
//!
//! fvmesh is the distributed grid layer of a cell-centered finite-volume CFD
//! solver. Every process reads the same global mesh, the cells are split
//! across processes by a graph partitioner, and each process then owns a
//! compact local grid: nodes, faces and cells with local ids, a ghost layer
//! mirroring the neighbouring cells of other processes, face and cell
//! geometry, and precomputed stencils for node/face averages and gradients.
//!
//! ## Features
//! - Gmsh ASCII 2.2 and a plain tabular mesh format
//! - Native deterministic graph partitioner, METIS behind `metis-support`
//! - Pluggable communication: single rank, in-process threads, MPI behind
//!   `mpi-support`
//! - Green-Gauss and least-squares gradients with Barth-Jespersen,
//!   Venkatakrishnan and minmod limiters
//!
//! ## Usage
//!
//! ```no_run
//! use fvmesh::prelude::*;
//!
//! # fn main() -> Result<(), MeshError> {
//! let comm = NoComm;
//! let cfg = GridConfig::from_path("grid.json")?;
//! let mut grid = GridBuilder::new(&comm)
//!     .with_config(cfg.clone())
//!     .build_from_path("channel.msh")?;
//! grid.fill_state(|_| CellState { rho: 1.0, p: 1.0e5, ..Default::default() });
//! grid.reconstruct(&comm, &cfg)?;
//! # Ok(())
//! # }
//! ```
//!
//! Every function that takes a communicator is collective and must be
//! called in the same order on every rank.

pub mod algs;
pub mod config;
pub mod geometry;
pub mod io;
pub mod mesh_error;
pub mod partitioning;
pub mod pipeline;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::boundary::{BoundaryKind, BoundaryStats, boundary_stats, wall_distance};
    pub use crate::algs::communicator::{Communicator, NoComm, ThreadComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::config::{
        DivergencePolicy, FaceAveraging, GradientScheme, GridConfig, NodeAveraging, SlopeLimiter,
    };
    pub use crate::io::{GridRawData, MeshReader, read_mesh};
    pub use crate::mesh_error::MeshError;
    pub use crate::partitioning::{GraphGrowingPartitioner, Partitioner, PartitionerConfig};
    #[cfg(feature = "metis-support")]
    pub use crate::partitioning::MetisPartitioner;
    pub use crate::pipeline::GridBuilder;
    pub use crate::topology::{
        BC_GHOST, BC_INTERIOR, Cell, CellRef, CellState, CellType, Face, FaceNeighbor, Field,
        Ghost, Grid, Node,
    };
}
