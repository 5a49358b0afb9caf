//! Grid-side view of boundary regions for the boundary-condition layer.
//!
//! Boundary faces already carry their region through `Face::bc()`; this
//! module adds the collective per-region totals and the wall distance
//! needed by turbulence closures.

use crate::algs::communicator::Communicator;
use crate::geometry::metrics::{Vec3, add, norm, sub};
use crate::mesh_error::MeshError;
use crate::topology::grid::Grid;
use serde::{Deserialize, Serialize};

/// Physical role of a boundary region, as assigned by the solver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    Symmetry,
    Slip,
    NoSlip,
    Inlet,
    Outlet,
}

impl BoundaryKind {
    pub fn is_wall(self) -> bool {
        self == BoundaryKind::NoSlip
    }
}

/// Global summary of one boundary region.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundaryStats {
    pub name: String,
    pub local_faces: usize,
    pub global_faces: usize,
    pub local_nodes: usize,
    pub global_nodes: usize,
    /// Integrated area over every rank.
    pub area: f64,
    /// Integrated outward area vector over every rank.
    pub area_vector: Vec3,
}

/// Sum face and node counts, areas and area vectors per region over all
/// ranks, and record the global counts in `grid.regions`. Collective.
pub fn boundary_stats<C: Communicator + ?Sized>(
    grid: &mut Grid,
    comm: &C,
) -> Result<Vec<BoundaryStats>, MeshError> {
    let n = grid.regions.len();
    let mut counts = Vec::with_capacity(2 * n);
    counts.extend(grid.regions.iter().map(|r| r.local_faces as u64));
    counts.extend(grid.regions.iter().map(|r| r.local_nodes as u64));
    let counts = comm.allreduce_sum_u64(&counts)?;

    // area then area vector, per region
    let mut sums = vec![0.0; 4 * n];
    for face in &grid.faces {
        if let Some(r) = face.region() {
            let a = face.area_vector();
            sums[4 * r] += face.area;
            sums[4 * r + 1] += a[0];
            sums[4 * r + 2] += a[1];
            sums[4 * r + 3] += a[2];
        }
    }
    let sums = comm.allreduce_sum_f64(&sums)?;

    let stats = grid
        .regions
        .iter_mut()
        .enumerate()
        .map(|(r, region)| {
            region.global_faces = counts[r] as usize;
            region.global_nodes = counts[n + r] as usize;
            BoundaryStats {
                name: region.name.clone(),
                local_faces: region.local_faces,
                global_faces: region.global_faces,
                local_nodes: region.local_nodes,
                global_nodes: region.global_nodes,
                area: sums[4 * r],
                area_vector: [sums[4 * r + 1], sums[4 * r + 2], sums[4 * r + 3]],
            }
        })
        .collect::<Vec<_>>();

    if grid.rank == 0 {
        for s in &stats {
            log::debug!(
                "region `{}`: {} faces, {} nodes, area {:e}",
                s.name,
                s.global_faces,
                s.global_nodes,
                s.area
            );
        }
    }
    Ok(stats)
}

/// Set `Cell::wall_distance` to the distance from each cell centroid to the
/// nearest no-slip face centroid on any rank; infinite when no region is a
/// wall. `kinds` is indexed by region. Collective.
pub fn wall_distance<C: Communicator + ?Sized>(
    grid: &mut Grid,
    kinds: &[BoundaryKind],
    comm: &C,
) -> Result<(), MeshError> {
    if kinds.len() != grid.regions.len() {
        return Err(MeshError::Config(format!(
            "{} boundary kinds given for {} regions",
            kinds.len(),
            grid.regions.len()
        )));
    }
    let local: Vec<f64> = grid
        .faces
        .iter()
        .filter(|f| f.region().is_some_and(|r| kinds[r].is_wall()))
        .flat_map(|f| f.centroid)
        .collect();
    let walls: Vec<Vec3> = comm
        .allgatherv_f64(&local)?
        .iter()
        .flat_map(|part| part.chunks_exact(3).map(|c| [c[0], c[1], c[2]]))
        .collect();

    for cell in &mut grid.cells {
        cell.wall_distance = walls
            .iter()
            .map(|&w| norm(sub(w, cell.centroid)))
            .fold(f64::INFINITY, f64::min);
    }
    log::debug!(
        "[rank {}] wall distance from {} wall faces",
        grid.rank,
        walls.len()
    );
    Ok(())
}

/// Sum of outward area vectors over every boundary face of this rank.
pub fn local_boundary_closure(grid: &Grid) -> Vec3 {
    grid.faces
        .iter()
        .filter(|f| f.region().is_some())
        .fold([0.0; 3], |acc, f| add(acc, f.area_vector()))
}
