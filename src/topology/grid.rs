//! The per-rank finite-volume grid.
//!
//! Nodes, faces, cells and ghosts live in flat vectors owned by [`Grid`] and
//! refer to each other by local index. A face's neighbor is exactly one of a
//! local cell, a ghost, or a boundary region, which [`FaceNeighbor`] encodes
//! directly. Value sources that may be local or mirrored are addressed with
//! [`CellRef`].

use crate::algs::communicator::{Communicator, agree};
use crate::algs::ghost_layer::HaloPattern;
use crate::config::{DivergencePolicy, GridConfig};
use crate::mesh_error::MeshError;
use crate::topology::cell_type::CellType;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// `Face::bc()` of an interior face.
pub const BC_INTERIOR: i32 = -1;
/// `Face::bc()` of a face shared with a ghost.
pub const BC_GHOST: i32 = -2;

pub const NUM_FIELDS: usize = 7;

/// Solver fields carried per cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Rho,
    Vx,
    Vy,
    Vz,
    P,
    K,
    Omega,
}

impl Field {
    pub const ALL: [Field; NUM_FIELDS] = [
        Field::Rho,
        Field::Vx,
        Field::Vy,
        Field::Vz,
        Field::P,
        Field::K,
        Field::Omega,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Rho => "rho",
            Field::Vx => "vx",
            Field::Vy => "vy",
            Field::Vz => "vz",
            Field::P => "p",
            Field::K => "k",
            Field::Omega => "omega",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle to a value source: an owned cell or a ghost mirror.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CellRef {
    Cell(usize),
    Ghost(usize),
}

/// What lies on the far side of a face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaceNeighbor {
    /// Locally owned cell.
    Cell(usize),
    /// Mirror of a cell owned by another rank.
    Ghost(usize),
    /// Physical boundary region index.
    Boundary(usize),
}

impl FaceNeighbor {
    pub fn as_cell_ref(self) -> Option<CellRef> {
        match self {
            FaceNeighbor::Cell(c) => Some(CellRef::Cell(c)),
            FaceNeighbor::Ghost(g) => Some(CellRef::Ghost(g)),
            FaceNeighbor::Boundary(_) => None,
        }
    }
}

/// Solver-owned primitive state of a cell.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CellState {
    pub rho: f64,
    pub p: f64,
    pub k: f64,
    pub omega: f64,
    /// Laminar viscosity.
    pub mu: f64,
    pub v: [f64; 3],
}

impl CellState {
    /// Number of `f64` slots in the halo encoding.
    pub const PACKED_LEN: usize = 8;

    pub fn get(&self, field: Field) -> f64 {
        match field {
            Field::Rho => self.rho,
            Field::Vx => self.v[0],
            Field::Vy => self.v[1],
            Field::Vz => self.v[2],
            Field::P => self.p,
            Field::K => self.k,
            Field::Omega => self.omega,
        }
    }

    pub fn set(&mut self, field: Field, value: f64) {
        match field {
            Field::Rho => self.rho = value,
            Field::Vx => self.v[0] = value,
            Field::Vy => self.v[1] = value,
            Field::Vz => self.v[2] = value,
            Field::P => self.p = value,
            Field::K => self.k = value,
            Field::Omega => self.omega = value,
        }
    }

    pub fn pack(&self, out: &mut Vec<f64>) {
        out.extend_from_slice(&[
            self.rho, self.p, self.k, self.omega, self.mu, self.v[0], self.v[1], self.v[2],
        ]);
    }

    /// Inverse of [`pack`](Self::pack). `buf` must hold `PACKED_LEN` values.
    pub fn unpack(buf: &[f64]) -> Self {
        Self {
            rho: buf[0],
            p: buf[1],
            k: buf[2],
            omega: buf[3],
            mu: buf[4],
            v: [buf[5], buf[6], buf[7]],
        }
    }
}

/// Per-field gradient vectors, indexed by [`Field::index`].
pub type Gradients = [[f64; 3]; NUM_FIELDS];

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: usize,
    pub global_id: usize,
    pub x: [f64; 3],
    pub cells: Vec<usize>,
    pub ghosts: Vec<usize>,
    /// Normalized averaging weights over incident cells and ghosts.
    pub average: BTreeMap<CellRef, f64>,
    /// Boundary regions with a face touching this node.
    pub bcs: BTreeSet<usize>,
    /// Lowest rank owning an incident cell.
    pub owner: usize,
}

impl Node {
    pub fn new(id: usize, global_id: usize, x: [f64; 3], owner: usize) -> Self {
        Self {
            id,
            global_id,
            x,
            cells: Vec::new(),
            ghosts: Vec::new(),
            average: BTreeMap::new(),
            bcs: BTreeSet::new(),
            owner,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Face {
    pub id: usize,
    pub parent: usize,
    pub neighbor: FaceNeighbor,
    pub nodes: Vec<usize>,
    pub centroid: [f64; 3],
    /// Unit normal pointing out of `parent`.
    pub normal: [f64; 3],
    pub area: f64,
    pub average: BTreeMap<CellRef, f64>,
}

impl Face {
    pub fn new(id: usize, parent: usize, neighbor: FaceNeighbor, nodes: Vec<usize>) -> Self {
        Self {
            id,
            parent,
            neighbor,
            nodes,
            centroid: [0.0; 3],
            normal: [0.0; 3],
            area: 0.0,
            average: BTreeMap::new(),
        }
    }

    /// Boundary region id, or [`BC_INTERIOR`] / [`BC_GHOST`].
    pub fn bc(&self) -> i32 {
        match self.neighbor {
            FaceNeighbor::Cell(_) => BC_INTERIOR,
            FaceNeighbor::Ghost(_) => BC_GHOST,
            FaceNeighbor::Boundary(r) => r as i32,
        }
    }

    pub fn region(&self) -> Option<usize> {
        match self.neighbor {
            FaceNeighbor::Boundary(r) => Some(r),
            _ => None,
        }
    }

    pub fn area_vector(&self) -> [f64; 3] {
        [
            self.normal[0] * self.area,
            self.normal[1] * self.area,
            self.normal[2] * self.area,
        ]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub id: usize,
    pub global_id: usize,
    pub cell_type: CellType,
    pub nodes: Vec<usize>,
    pub faces: Vec<usize>,
    pub neighbors: Vec<usize>,
    pub ghosts: Vec<usize>,
    pub volume: f64,
    pub centroid: [f64; 3],
    pub length_scale: f64,
    pub wall_distance: f64,
    /// Gradient coefficients: `grad = Σ coeff * value(source)`.
    pub grad_map: BTreeMap<CellRef, [f64; 3]>,
    pub state: CellState,
    pub grad: Gradients,
    pub limited_grad: Gradients,
    pub flux: [f64; NUM_FIELDS],
    pub update: [f64; NUM_FIELDS],
}

impl Cell {
    pub fn new(id: usize, global_id: usize, cell_type: CellType, nodes: Vec<usize>) -> Self {
        Self {
            id,
            global_id,
            cell_type,
            nodes,
            faces: Vec::with_capacity(cell_type.face_count()),
            neighbors: Vec::new(),
            ghosts: Vec::new(),
            volume: 0.0,
            centroid: [0.0; 3],
            length_scale: 0.0,
            wall_distance: f64::INFINITY,
            grad_map: BTreeMap::new(),
            state: CellState::default(),
            grad: [[0.0; 3]; NUM_FIELDS],
            limited_grad: [[0.0; 3]; NUM_FIELDS],
            flux: [0.0; NUM_FIELDS],
            update: [0.0; NUM_FIELDS],
        }
    }
}

/// Local mirror of a remotely owned cell that shares at least one node with
/// an owned cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Ghost {
    pub id: usize,
    /// Owning rank.
    pub partition: usize,
    pub global_id: usize,
    /// Local cells sharing a face with this ghost; empty for edge and corner
    /// neighbours.
    pub cells: Vec<usize>,
    /// Local nodes of the remote cell.
    pub nodes: Vec<usize>,
    pub state: CellState,
    pub centroid: [f64; 3],
    pub grad: Gradients,
    pub limited_grad: Gradients,
}

impl Ghost {
    pub fn new(id: usize, partition: usize, global_id: usize) -> Self {
        Self {
            id,
            partition,
            global_id,
            cells: Vec::new(),
            nodes: Vec::new(),
            state: CellState::default(),
            centroid: [0.0; 3],
            grad: [[0.0; 3]; NUM_FIELDS],
            limited_grad: [[0.0; 3]; NUM_FIELDS],
        }
    }
}

/// Face and node counts of one boundary region.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoundaryRegion {
    pub name: String,
    pub local_faces: usize,
    pub global_faces: usize,
    /// Owned nodes only, so the global sum counts each node once.
    pub local_nodes: usize,
    pub global_nodes: usize,
}

#[derive(Clone, Debug, Default)]
pub struct Grid {
    pub rank: usize,
    pub dim: usize,
    pub nodes: Vec<Node>,
    pub faces: Vec<Face>,
    pub cells: Vec<Cell>,
    pub ghosts: Vec<Ghost>,
    pub n_global_nodes: usize,
    pub n_global_faces: usize,
    pub n_global_cells: usize,
    pub regions: Vec<BoundaryRegion>,
    pub halo: HaloPattern,
}

impl Grid {
    pub fn state(&self, r: CellRef) -> &CellState {
        match r {
            CellRef::Cell(c) => &self.cells[c].state,
            CellRef::Ghost(g) => &self.ghosts[g].state,
        }
    }

    pub fn value(&self, r: CellRef, field: Field) -> f64 {
        self.state(r).get(field)
    }

    pub fn centroid(&self, r: CellRef) -> [f64; 3] {
        match r {
            CellRef::Cell(c) => self.cells[c].centroid,
            CellRef::Ghost(g) => self.ghosts[g].centroid,
        }
    }

    pub fn global_id(&self, r: CellRef) -> usize {
        match r {
            CellRef::Cell(c) => self.cells[c].global_id,
            CellRef::Ghost(g) => self.ghosts[g].global_id,
        }
    }

    /// Nodes this rank counts toward global totals.
    pub fn owned_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.owner == self.rank)
    }

    pub fn boundary_faces(&self, region: usize) -> impl Iterator<Item = &Face> {
        self.faces
            .iter()
            .filter(move |f| f.neighbor == FaceNeighbor::Boundary(region))
    }

    /// Set every owned cell's state.
    pub fn fill_state(&mut self, mut f: impl FnMut(&Cell) -> CellState) {
        for cell in &mut self.cells {
            cell.state = f(cell);
        }
    }

    /// First non-finite field of `cell` after adding its update.
    fn diverged_field(cell: &Cell) -> Option<Field> {
        Field::ALL.into_iter().find(|&f| {
            let next = cell.state.get(f) + cell.update[f.index()];
            !next.is_finite()
        })
    }

    /// Add every cell's `update` to its state and clear the accumulators.
    ///
    /// Collective: all ranks learn whether any rank diverged before state is
    /// touched, so either every rank applies its update or none does. A
    /// diverging rank reports [`MeshError::Divergence`] under
    /// [`DivergencePolicy::FailStep`] and aborts the run under
    /// [`DivergencePolicy::Abort`]; the other ranks get
    /// [`MeshError::PeerFailure`].
    pub fn apply_updates<C: Communicator + ?Sized>(
        &mut self,
        comm: &C,
        policy: DivergencePolicy,
    ) -> Result<(), MeshError> {
        let local = self
            .cells
            .iter()
            .find_map(|c| Self::diverged_field(c).map(|f| (c, f)))
            .map(|(c, field)| MeshError::Divergence {
                rank: self.rank,
                cell: c.id,
                global_cell: c.global_id,
                field,
            });

        let agreed = agree(comm, "apply_updates", local.map_or(Ok(()), Err));
        if let Err(err @ MeshError::Divergence { .. }) = &agreed {
            if policy == DivergencePolicy::Abort {
                err.abort(comm);
            }
        }
        agreed?;

        for cell in &mut self.cells {
            for f in Field::ALL {
                let next = cell.state.get(f) + cell.update[f.index()];
                cell.state.set(f, next);
            }
            cell.update = [0.0; NUM_FIELDS];
        }
        Ok(())
    }

    /// [`apply_updates`](Self::apply_updates) under the run's configured
    /// [`GridConfig::divergence_policy`]. Collective.
    pub fn apply_configured_updates<C: Communicator + ?Sized>(
        &mut self,
        comm: &C,
        cfg: &GridConfig,
    ) -> Result<(), MeshError> {
        self.apply_updates(comm, cfg.divergence_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    fn one_cell_grid() -> Grid {
        let mut grid = Grid {
            dim: 3,
            ..Default::default()
        };
        grid.cells
            .push(Cell::new(0, 42, CellType::Tetrahedron, vec![0, 1, 2, 3]));
        grid
    }

    #[test]
    fn state_pack_matches_unpack() {
        let s = CellState {
            rho: 1.2,
            p: 101325.0,
            k: 0.1,
            omega: 3.0,
            mu: 1.8e-5,
            v: [1.0, -2.0, 0.5],
        };
        let mut buf = Vec::new();
        s.pack(&mut buf);
        assert_eq!(buf.len(), CellState::PACKED_LEN);
        assert_eq!(CellState::unpack(&buf), s);
        assert_eq!(s.get(Field::Vy), -2.0);
    }

    #[test]
    fn bc_sentinels() {
        let mut f = Face::new(0, 0, FaceNeighbor::Cell(1), vec![0, 1]);
        assert_eq!(f.bc(), BC_INTERIOR);
        f.neighbor = FaceNeighbor::Ghost(0);
        assert_eq!(f.bc(), BC_GHOST);
        f.neighbor = FaceNeighbor::Boundary(3);
        assert_eq!(f.bc(), 3);
        assert_eq!(f.region(), Some(3));
    }

    #[test]
    fn finite_updates_are_applied_and_cleared() {
        let mut grid = one_cell_grid();
        grid.cells[0].update[Field::P.index()] = 2.5;
        grid.apply_updates(&NoComm, DivergencePolicy::FailStep).unwrap();
        assert_eq!(grid.cells[0].state.p, 2.5);
        assert_eq!(grid.cells[0].update, [0.0; NUM_FIELDS]);
    }

    #[test]
    fn non_finite_update_fails_step_without_touching_state() {
        let mut grid = one_cell_grid();
        grid.cells[0].update[Field::Rho.index()] = 1.0;
        grid.cells[0].update[Field::K.index()] = f64::NAN;
        let err = grid
            .apply_updates(&NoComm, DivergencePolicy::FailStep)
            .unwrap_err();
        assert!(matches!(
            err,
            MeshError::Divergence {
                cell: 0,
                global_cell: 42,
                field: Field::K,
                ..
            }
        ));
        assert_eq!(grid.cells[0].state.rho, 0.0);
    }

    #[test]
    fn configured_policy_governs_divergence() {
        let cfg = GridConfig::from_json(r#"{"divergence_policy": "fail_step"}"#).unwrap();
        let mut grid = one_cell_grid();
        grid.cells[0].update[Field::Omega.index()] = f64::INFINITY;
        let err = grid.apply_configured_updates(&NoComm, &cfg).unwrap_err();
        assert!(matches!(err, MeshError::Divergence { field: Field::Omega, .. }));
        assert_eq!(grid.cells[0].state.omega, 0.0);

        grid.cells[0].update[Field::Omega.index()] = 0.25;
        grid.apply_configured_updates(&NoComm, &cfg).unwrap();
        assert_eq!(grid.cells[0].state.omega, 0.25);
    }
}
