//! Grid-building and reconstruction algorithms.

pub mod boundary;
pub mod communicator;
pub mod dual_graph;
pub mod ghost_layer;
pub mod index_maps;
pub mod local_topology;
pub mod meshgen;
pub mod reconstruct;
pub mod wire;

pub use boundary::{BoundaryKind, BoundaryStats, boundary_stats, wall_distance};
pub use communicator::{Communicator, NoComm, ThreadComm, agree};
pub use dual_graph::{DualGraph, build_dual};
pub use ghost_layer::{HaloLink, HaloPattern};
pub use reconstruct::{LimiterFunction, limiter_for};
