//! Field reconstruction on the local grid: node and face averages,
//! gradients and slope limiting.
//!
//! Averages and gradient coefficients are stencils over [`CellRef`]s,
//! computed once after geometry and reused every step. Evaluating them reads
//! owned cells and ghost mirrors alike, so ghost state must be current; see
//! [`Grid::reconstruct`] for the per-step sequence.

use crate::algs::communicator::Communicator;
use crate::config::{FaceAveraging, GradientScheme, GridConfig, NodeAveraging, SlopeLimiter};
use crate::geometry::metrics::{Vec3, add, dot, norm, scale, sub};
use crate::mesh_error::MeshError;
use crate::topology::grid::{Cell, CellRef, Face, Field, Ghost, Gradients, Grid, NUM_FIELDS, Node};
use std::collections::BTreeMap;

type Stencil = BTreeMap<CellRef, f64>;

fn centroid_of(cells: &[Cell], ghosts: &[Ghost], r: CellRef) -> Vec3 {
    match r {
        CellRef::Cell(c) => cells[c].centroid,
        CellRef::Ghost(g) => ghosts[g].centroid,
    }
}

/// Value source across `face` as seen from `cell`.
fn across(face: &Face, cell: usize) -> Option<CellRef> {
    if face.parent == cell {
        face.neighbor.as_cell_ref()
    } else {
        Some(CellRef::Cell(face.parent))
    }
}

/// Area vector of `face` pointing out of `cell`.
fn outward(face: &Face, cell: usize) -> Vec3 {
    if face.parent == cell {
        face.area_vector()
    } else {
        scale(face.area_vector(), -1.0)
    }
}

fn evaluate(stencil: &Stencil, values: impl Fn(CellRef) -> f64) -> f64 {
    stencil.iter().map(|(&r, &w)| w * values(r)).sum()
}

/// Inverse of the symmetric least-squares matrix, restricted to the leading
/// `dim` x `dim` block. `None` when that block is singular relative to its
/// diagonal.
fn invert(m: [[f64; 3]; 3], dim: usize) -> Option<[[f64; 3]; 3]> {
    let diag = (0..dim).map(|i| m[i][i].abs()).fold(0.0, f64::max);
    let tiny = 1e-12 * diag.powi(dim as i32);
    let mut inv = [[0.0; 3]; 3];
    if dim == 2 {
        let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
        if !(det.abs() > tiny) {
            return None;
        }
        inv[0][0] = m[1][1] / det;
        inv[0][1] = -m[0][1] / det;
        inv[1][0] = -m[1][0] / det;
        inv[1][1] = m[0][0] / det;
        return Some(inv);
    }
    let cof = |r0: usize, r1: usize, c0: usize, c1: usize| m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0];
    let det = m[0][0] * cof(1, 2, 1, 2) - m[0][1] * cof(1, 2, 0, 2) + m[0][2] * cof(1, 2, 0, 1);
    if !(det.abs() > tiny) {
        return None;
    }
    inv[0][0] = cof(1, 2, 1, 2) / det;
    inv[0][1] = -cof(0, 2, 1, 2) / det;
    inv[0][2] = cof(0, 1, 1, 2) / det;
    inv[1][0] = -cof(1, 2, 0, 2) / det;
    inv[1][1] = cof(0, 2, 0, 2) / det;
    inv[1][2] = -cof(0, 1, 0, 2) / det;
    inv[2][0] = cof(1, 2, 0, 1) / det;
    inv[2][1] = -cof(0, 2, 0, 1) / det;
    inv[2][2] = cof(0, 1, 0, 1) / det;
    Some(inv)
}

fn mat_vec(m: &[[f64; 3]; 3], v: Vec3) -> Vec3 {
    [dot(m[0], v), dot(m[1], v), dot(m[2], v)]
}

/// Reconstructed increment at one face of a cell, with the admissible
/// range it is limited against.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceIncrement {
    /// `grad · (x_f - x_c)`.
    pub delta: f64,
    /// `max(φ_c, φ_neighbours) - φ_c`, never negative.
    pub max: f64,
    /// `min(φ_c, φ_neighbours) - φ_c`, never positive.
    pub min: f64,
    /// `φ_across - φ_c` when the face has a cell or ghost on the far side.
    pub across: Option<f64>,
    pub length_scale: f64,
}

impl FaceIncrement {
    fn bound(&self) -> f64 {
        if self.delta > 0.0 { self.max } else { self.min }
    }
}

/// Per-face slope limiter. A cell's gradient is scaled by the smallest
/// factor over its faces.
pub trait LimiterFunction {
    /// Factor in `[0, 1]`.
    fn factor(&self, inc: &FaceIncrement) -> f64;
}

/// Strictly monotone: no face value leaves the neighbourhood range.
#[derive(Clone, Copy, Debug, Default)]
pub struct BarthJespersen;

impl LimiterFunction for BarthJespersen {
    fn factor(&self, inc: &FaceIncrement) -> f64 {
        if inc.delta == 0.0 {
            1.0
        } else {
            (inc.bound() / inc.delta).min(1.0)
        }
    }
}

/// Smooth variant; `k` sets the threshold `ε² = (k h)³` below which
/// variations are left unlimited.
#[derive(Clone, Copy, Debug)]
pub struct Venkatakrishnan {
    pub k: f64,
}

impl LimiterFunction for Venkatakrishnan {
    fn factor(&self, inc: &FaceIncrement) -> f64 {
        if inc.delta == 0.0 {
            return 1.0;
        }
        let eps_sq = (self.k * inc.length_scale).powi(3);
        let b = inc.bound();
        let d = inc.delta;
        let num = b * b + eps_sq + 2.0 * d * b;
        let den = b * b + 2.0 * d * d + d * b + eps_sq;
        if den == 0.0 {
            1.0
        } else {
            (num / den).clamp(0.0, 1.0)
        }
    }
}

/// Face-wise minmod: each face value stays between the cell value and the
/// value across that face.
#[derive(Clone, Copy, Debug, Default)]
pub struct MinMod;

impl LimiterFunction for MinMod {
    fn factor(&self, inc: &FaceIncrement) -> f64 {
        if inc.delta == 0.0 {
            return 1.0;
        }
        let bound = inc.across.unwrap_or_else(|| inc.bound());
        (bound / inc.delta).clamp(0.0, 1.0)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Unlimited;

impl LimiterFunction for Unlimited {
    fn factor(&self, _inc: &FaceIncrement) -> f64 {
        1.0
    }
}

pub fn limiter_for(kind: SlopeLimiter, k: f64) -> Box<dyn LimiterFunction> {
    match kind {
        SlopeLimiter::BarthJespersen => Box::new(BarthJespersen),
        SlopeLimiter::Venkatakrishnan => Box::new(Venkatakrishnan { k }),
        SlopeLimiter::MinMod => Box::new(MinMod),
        SlopeLimiter::Unlimited => Box::new(Unlimited),
    }
}

impl Grid {
    /// Normalized node stencils over incident cells and ghosts.
    ///
    /// Needs cell and ghost centroids. A source sitting exactly on the node
    /// takes the whole weight under the inverse-distance schemes. Weights are
    /// summed in global id order, so a seam node gets bit-identical weights
    /// on every rank that holds it.
    pub fn node_averages(&mut self, scheme: NodeAveraging) {
        let Grid {
            nodes,
            cells,
            ghosts,
            ..
        } = self;
        let cells: &[Cell] = cells;
        let ghosts: &[Ghost] = ghosts;
        for node in nodes.iter_mut() {
            let mut sources: Vec<(usize, CellRef, f64)> = node
                .cells
                .iter()
                .map(|&c| (cells[c].global_id, CellRef::Cell(c)))
                .chain(
                    node.ghosts
                        .iter()
                        .map(|&g| (ghosts[g].global_id, CellRef::Ghost(g))),
                )
                .map(|(id, r)| (id, r, norm(sub(centroid_of(cells, ghosts, r), node.x))))
                .collect();
            sources.sort_unstable_by_key(|&(id, _, _)| id);
            let exact = scheme != NodeAveraging::Arithmetic && sources.iter().any(|&(_, _, d)| d == 0.0);
            let weights: Vec<(CellRef, f64)> = sources
                .into_iter()
                .map(|(_, r, d)| {
                    let w = match scheme {
                        _ if exact => {
                            if d == 0.0 {
                                1.0
                            } else {
                                0.0
                            }
                        }
                        NodeAveraging::Arithmetic => 1.0,
                        NodeAveraging::InverseDistance => 1.0 / d,
                        NodeAveraging::InverseDistanceSquared => 1.0 / (d * d),
                    };
                    (r, w)
                })
                .collect();
            let total: f64 = weights.iter().map(|&(_, w)| w).sum();
            node.average = weights
                .into_iter()
                .map(|(r, w)| (r, if total > 0.0 { w / total } else { w }))
                .collect();
        }
    }

    pub fn node_value(&self, node: usize, values: impl Fn(CellRef) -> f64) -> f64 {
        evaluate(&self.nodes[node].average, values)
    }

    /// Face stencils, from node stencils or from the two adjacent cells.
    /// Node-based averaging needs [`node_averages`](Self::node_averages) first.
    pub fn face_averages(&mut self, scheme: FaceAveraging) {
        let Grid {
            nodes,
            faces,
            cells,
            ghosts,
            ..
        } = self;
        let nodes: &[Node] = nodes;
        let cells: &[Cell] = cells;
        let ghosts: &[Ghost] = ghosts;
        for face in faces.iter_mut() {
            let parent = CellRef::Cell(face.parent);
            face.average = match (scheme, face.neighbor.as_cell_ref()) {
                (FaceAveraging::NodeBased, _) => {
                    let share = 1.0 / face.nodes.len() as f64;
                    let mut stencil = Stencil::new();
                    for &n in &face.nodes {
                        for (&r, &w) in &nodes[n].average {
                            *stencil.entry(r).or_insert(0.0) += share * w;
                        }
                    }
                    stencil
                }
                (FaceAveraging::CellBased, None) => Stencil::from([(parent, 1.0)]),
                (FaceAveraging::CellBased, Some(other)) => {
                    let dp = norm(sub(face.centroid, centroid_of(cells, ghosts, parent)));
                    let dn = norm(sub(face.centroid, centroid_of(cells, ghosts, other)));
                    let (wp, wn) = if dp + dn > 0.0 {
                        (dn / (dp + dn), dp / (dp + dn))
                    } else {
                        (0.5, 0.5)
                    };
                    Stencil::from([(parent, wp), (other, wn)])
                }
            };
        }
    }

    pub fn face_value(&self, face: usize, values: impl Fn(CellRef) -> f64) -> f64 {
        evaluate(&self.faces[face].average, values)
    }

    /// Precompute every cell's gradient coefficients.
    ///
    /// Green-Gauss sums face stencils times outward area vectors over the
    /// volume. Least squares fits inverse-distance-squared weighted
    /// differences to the cells and ghosts across each face, and to the face
    /// stencil value at boundary face centroids. A least-squares system that
    /// is singular is [`MeshError::DegenerateGeometry`].
    pub fn grad_maps(&mut self, scheme: GradientScheme) -> Result<(), MeshError> {
        let Grid {
            rank,
            dim,
            faces,
            cells,
            ghosts,
            ..
        } = &*self;

        let maps: Vec<BTreeMap<CellRef, Vec3>> = match scheme {
            GradientScheme::GreenGauss => cells
                .iter()
                .map(|cell| {
                    let mut map = BTreeMap::new();
                    for &f in &cell.faces {
                        let face = &faces[f];
                        let a = scale(outward(face, cell.id), 1.0 / cell.volume);
                        for (&r, &w) in &face.average {
                            let e = map.entry(r).or_insert([0.0; 3]);
                            *e = add(*e, scale(a, w));
                        }
                    }
                    map
                })
                .collect(),
            GradientScheme::LeastSquares => cells
                .iter()
                .map(|cell| least_squares_map(cell, faces, cells, ghosts, *dim, *rank))
                .collect::<Result<_, _>>()?,
        };
        for (cell, map) in self.cells.iter_mut().zip(maps) {
            cell.grad_map = map;
        }
        Ok(())
    }

    /// Gradient of an arbitrary field at `cell` through its gradient map.
    pub fn gradient(&self, cell: usize, values: impl Fn(CellRef) -> f64) -> Vec3 {
        self.cells[cell]
            .grad_map
            .iter()
            .fold([0.0; 3], |acc, (&r, &c)| add(acc, scale(c, values(r))))
    }

    /// Fill `Cell::grad` for every solver field from the current state.
    pub fn gradients(&mut self) {
        let grads: Vec<Gradients> = self
            .cells
            .iter()
            .map(|cell| {
                let mut g = [[0.0; 3]; NUM_FIELDS];
                for (&r, coeff) in &cell.grad_map {
                    let state = self.state(r);
                    for field in Field::ALL {
                        let v = state.get(field);
                        let slot = &mut g[field.index()];
                        *slot = add(*slot, scale(*coeff, v));
                    }
                }
                g
            })
            .collect();
        for (cell, g) in self.cells.iter_mut().zip(grads) {
            cell.grad = g;
        }
    }

    /// Fill `Cell::limited_grad` by scaling each field's gradient with the
    /// smallest limiter factor over the cell's faces.
    pub fn limit_gradients(&mut self, limiter: &dyn LimiterFunction) {
        let limited: Vec<Gradients> = self
            .cells
            .iter()
            .map(|cell| {
                let mut out = cell.grad;
                for field in Field::ALL {
                    let i = field.index();
                    let phi = cell.state.get(field);
                    let (lo, hi) = cell
                        .faces
                        .iter()
                        .filter_map(|&f| across(&self.faces[f], cell.id))
                        .map(|r| self.value(r, field))
                        .fold((phi, phi), |(lo, hi), v| (lo.min(v), hi.max(v)));
                    let psi = cell
                        .faces
                        .iter()
                        .map(|&f| {
                            let face = &self.faces[f];
                            limiter.factor(&FaceIncrement {
                                delta: dot(cell.grad[i], sub(face.centroid, cell.centroid)),
                                max: hi - phi,
                                min: lo - phi,
                                across: across(face, cell.id).map(|r| self.value(r, field) - phi),
                                length_scale: cell.length_scale,
                            })
                        })
                        .fold(1.0, f64::min);
                    out[i] = scale(cell.grad[i], psi);
                }
                out
            })
            .collect();
        for (cell, g) in self.cells.iter_mut().zip(limited) {
            cell.limited_grad = g;
        }
    }

    /// Build node, face and gradient stencils. Needs local geometry and
    /// ghost centroids.
    pub fn prepare_reconstruction(&mut self, cfg: &GridConfig) -> Result<(), MeshError> {
        self.node_averages(cfg.node_averaging);
        self.face_averages(cfg.face_averaging);
        self.grad_maps(cfg.gradient_scheme)
    }

    /// Per-step reconstruction: refresh ghost state, compute and limit
    /// gradients, then mirror the gradients to the neighbours. Collective.
    pub fn reconstruct<C: Communicator + ?Sized>(
        &mut self,
        comm: &C,
        cfg: &GridConfig,
    ) -> Result<(), MeshError> {
        self.sync_ghost_state(comm)?;
        self.gradients();
        self.limit_gradients(limiter_for(cfg.limiter, cfg.venkatakrishnan_k).as_ref());
        self.sync_ghost_gradients(comm)
    }
}

fn least_squares_map(
    cell: &Cell,
    faces: &[Face],
    cells: &[Cell],
    ghosts: &[Ghost],
    dim: usize,
    rank: usize,
) -> Result<BTreeMap<CellRef, Vec3>, MeshError> {
    let mut m = [[0.0; 3]; 3];
    // weighted offset, value stencil at the far end
    let mut rows: Vec<(Vec3, Stencil)> = Vec::with_capacity(cell.faces.len());
    for &f in &cell.faces {
        let face = &faces[f];
        let (x, stencil) = match across(face, cell.id) {
            Some(r) => (centroid_of(cells, ghosts, r), Stencil::from([(r, 1.0)])),
            None => (face.centroid, face.average.clone()),
        };
        let mut dx = sub(x, cell.centroid);
        if dim == 2 {
            dx[2] = 0.0;
        }
        let d2 = dot(dx, dx);
        if !(d2 > 0.0) {
            continue;
        }
        let w = 1.0 / d2;
        for (i, row) in m.iter_mut().enumerate() {
            for (j, entry) in row.iter_mut().enumerate() {
                *entry += w * dx[i] * dx[j];
            }
        }
        rows.push((scale(dx, w), stencil));
    }

    let inv = invert(m, dim).ok_or_else(|| MeshError::DegenerateGeometry {
        rank,
        entity: format!("cell {} (global {})", cell.id, cell.global_id),
        detail: format!(
            "least-squares system over {} neighbours is singular",
            rows.len()
        ),
    })?;

    let mut map = BTreeMap::new();
    let this = CellRef::Cell(cell.id);
    for (wdx, stencil) in rows {
        let g = mat_vec(&inv, wdx);
        for (r, s) in stencil {
            let e = map.entry(r).or_insert([0.0; 3]);
            *e = add(*e, scale(g, s));
        }
        let e = map.entry(this).or_insert([0.0; 3]);
        *e = sub(*e, g);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::index_maps::IndexMaps;
    use crate::algs::local_topology::build_local_topology;
    use crate::algs::meshgen::{structured_box, structured_rect};
    use crate::geometry::compute_geometry;
    use crate::io::GridRawData;
    use approx::assert_relative_eq;

    fn prepared(raw: &GridRawData, cfg: &GridConfig) -> Grid {
        let maps = IndexMaps::build(raw, vec![0; raw.cell_count()], 0).unwrap();
        let (mut grid, _) = build_local_topology(raw, &maps).unwrap();
        compute_geometry(&mut grid, cfg.closure_tolerance).unwrap();
        grid.prepare_reconstruction(cfg).unwrap();
        grid
    }

    fn linear(x: Vec3) -> f64 {
        1.0 + 2.0 * x[0] - 3.0 * x[1] + 0.5 * x[2]
    }

    #[test]
    fn node_weights_are_normalized() {
        let raw = structured_box([2, 2, 2], [0.0; 3], [1.0; 3]);
        for scheme in [
            NodeAveraging::Arithmetic,
            NodeAveraging::InverseDistance,
            NodeAveraging::InverseDistanceSquared,
        ] {
            let cfg = GridConfig {
                node_averaging: scheme,
                ..Default::default()
            };
            let grid = prepared(&raw, &cfg);
            for node in &grid.nodes {
                let total: f64 = node.average.values().sum();
                assert_relative_eq!(total, 1.0, epsilon = 1e-14);
                assert_eq!(node.average.len(), node.cells.len());
            }
            // a constant field comes back unchanged
            for n in 0..grid.nodes.len() {
                assert_relative_eq!(grid.node_value(n, |_| 3.5), 3.5, epsilon = 1e-13);
            }
        }
    }

    #[test]
    fn cell_based_face_average_is_midpoint_on_uniform_grid() {
        let raw = structured_rect([2, 1], [0.0, 0.0], [2.0, 1.0]);
        let cfg = GridConfig {
            face_averaging: FaceAveraging::CellBased,
            ..Default::default()
        };
        let grid = prepared(&raw, &cfg);
        let interior = grid.faces.iter().position(|f| f.bc() < 0).unwrap();
        let v = grid.face_value(interior, |r| match r {
            CellRef::Cell(0) => 1.0,
            _ => 3.0,
        });
        assert_relative_eq!(v, 2.0);
    }

    #[test]
    fn gradients_are_exact_for_linear_fields_in_the_interior() {
        let raw = structured_box([3, 3, 3], [0.0; 3], [3.0, 3.0, 1.5]);
        for scheme in [GradientScheme::GreenGauss, GradientScheme::LeastSquares] {
            let cfg = GridConfig {
                gradient_scheme: scheme,
                ..Default::default()
            };
            let grid = prepared(&raw, &cfg);
            let centre = grid
                .cells
                .iter()
                .position(|c| c.faces.iter().all(|&f| grid.faces[f].bc() < 0))
                .unwrap();
            let g = grid.gradient(centre, |r| linear(grid.centroid(r)));
            assert_relative_eq!(g[0], 2.0, epsilon = 1e-10);
            assert_relative_eq!(g[1], -3.0, epsilon = 1e-10);
            assert_relative_eq!(g[2], 0.5, epsilon = 1e-10);
        }
    }

    #[test]
    fn least_squares_reproduces_constants() {
        let raw = structured_rect([3, 3], [0.0, 0.0], [3.0, 3.0]);
        let cfg = GridConfig {
            gradient_scheme: GradientScheme::LeastSquares,
            face_averaging: FaceAveraging::CellBased,
            ..Default::default()
        };
        let grid = prepared(&raw, &cfg);
        for c in 0..grid.cells.len() {
            let g = grid.gradient(c, |_| 4.0);
            assert_relative_eq!(norm(g), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn limited_face_values_stay_in_range() {
        let raw = structured_rect([4, 1], [0.0, 0.0], [4.0, 1.0]);
        for kind in [SlopeLimiter::BarthJespersen, SlopeLimiter::MinMod] {
            let cfg = GridConfig {
                limiter: kind,
                ..Default::default()
            };
            let mut grid = prepared(&raw, &cfg);
            // a step between cells 1 and 2
            grid.fill_state(|c| crate::topology::grid::CellState {
                rho: if c.centroid[0] < 2.0 { 1.0 } else { 2.0 },
                ..Default::default()
            });
            grid.gradients();
            grid.limit_gradients(limiter_for(kind, cfg.venkatakrishnan_k).as_ref());
            for cell in &grid.cells {
                let i = Field::Rho.index();
                let phi = cell.state.rho;
                for &f in &cell.faces {
                    let face = &grid.faces[f];
                    let recon = phi + dot(cell.limited_grad[i], sub(face.centroid, cell.centroid));
                    assert!((1.0 - 1e-12..=2.0 + 1e-12).contains(&recon), "{kind:?}: {recon}");
                }
            }
        }
    }

    #[test]
    fn limiter_factors() {
        let inc = FaceIncrement {
            delta: 2.0,
            max: 1.0,
            min: -0.5,
            across: Some(0.5),
            length_scale: 1.0,
        };
        assert_eq!(BarthJespersen.factor(&inc), 0.5);
        assert_eq!(MinMod.factor(&inc), 0.25);
        assert_eq!(Unlimited.factor(&inc), 1.0);
        let v = Venkatakrishnan { k: 0.0 }.factor(&inc);
        assert!(v > 0.0 && v <= 1.0);
        let flat = FaceIncrement { delta: 0.0, ..inc };
        assert_eq!(BarthJespersen.factor(&flat), 1.0);
    }

    #[test]
    fn singular_least_squares_is_degenerate_geometry() {
        let mut raw = GridRawData::new();
        for xyz in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            raw.push_node(xyz);
        }
        raw.push_cell(crate::topology::cell_type::CellType::Triangle, &[0, 1, 2]);
        let wall = raw.region("wall");
        for edge in [[0, 1], [1, 2], [2, 0]] {
            raw.push_boundary_face(wall, &edge);
        }
        let maps = IndexMaps::build(&raw, vec![0], 0).unwrap();
        let (mut grid, _) = build_local_topology(&raw, &maps).unwrap();
        compute_geometry(&mut grid, 1e-10).unwrap();
        grid.node_averages(NodeAveraging::Arithmetic);
        grid.face_averages(FaceAveraging::CellBased);
        // boundary faces are fine; remove them to leave no neighbours at all
        grid.cells[0].faces.clear();
        let err = grid.grad_maps(GradientScheme::LeastSquares).unwrap_err();
        assert!(matches!(err, MeshError::DegenerateGeometry { .. }));
    }
}
