//! Basic mesh generators for structured boxes and rectangles.
//!
//! Generators return [`GridRawData`] with one boundary region per side,
//! named `xmin`, `xmax`, `ymin`, `ymax` (and `zmin`, `zmax` in 3D), created
//! in that order. Nodes are numbered `i + (nx+1) * (j + (ny+1) * k)`, cells
//! `i + nx * (j + ny * k)`.

use crate::io::GridRawData;
use crate::topology::cell_type::CellType;

const SIDES_3D: [&str; 6] = ["xmin", "xmax", "ymin", "ymax", "zmin", "zmax"];
const SIDES_2D: [&str; 4] = ["xmin", "xmax", "ymin", "ymax"];

fn lerp(lo: f64, hi: f64, i: usize, n: usize) -> f64 {
    lo + (hi - lo) * i as f64 / n as f64
}

fn box_nodes(raw: &mut GridRawData, n: [usize; 3], min: [f64; 3], max: [f64; 3]) {
    for k in 0..=n[2] {
        for j in 0..=n[1] {
            for i in 0..=n[0] {
                raw.push_node([
                    lerp(min[0], max[0], i, n[0]),
                    lerp(min[1], max[1], j, n[1]),
                    lerp(min[2], max[2], k, n[2]),
                ]);
            }
        }
    }
}

/// Hex-ordered corners of box cell `(i, j, k)`.
fn corners(n: [usize; 3], i: usize, j: usize, k: usize) -> [usize; 8] {
    let id = |i: usize, j: usize, k: usize| i + (n[0] + 1) * (j + (n[1] + 1) * k);
    [
        id(i, j, k),
        id(i + 1, j, k),
        id(i + 1, j + 1, k),
        id(i, j + 1, k),
        id(i, j, k + 1),
        id(i + 1, j, k + 1),
        id(i + 1, j + 1, k + 1),
        id(i, j + 1, k + 1),
    ]
}

/// Push the boundary faces of every box cell touching a side. `faces_of`
/// maps the cell corners and a side index to the side's face node lists.
fn box_boundary(raw: &mut GridRawData, n: [usize; 3], faces_of: impl Fn(&[usize; 8], usize) -> Vec<Vec<usize>>) {
    let regions: Vec<usize> = SIDES_3D.iter().map(|s| raw.region(s)).collect();
    for k in 0..n[2] {
        for j in 0..n[1] {
            for i in 0..n[0] {
                let c = corners(n, i, j, k);
                let touches = [i == 0, i + 1 == n[0], j == 0, j + 1 == n[1], k == 0, k + 1 == n[2]];
                for side in (0..6).filter(|&s| touches[s]) {
                    for face in faces_of(&c, side) {
                        raw.push_boundary_face(regions[side], &face);
                    }
                }
            }
        }
    }
}

/// Structured hexahedral box over `[min, max]` with `n[0] × n[1] × n[2]` cells.
pub fn structured_box(n: [usize; 3], min: [f64; 3], max: [f64; 3]) -> GridRawData {
    let mut raw = GridRawData::new();
    box_nodes(&mut raw, n, min, max);
    for k in 0..n[2] {
        for j in 0..n[1] {
            for i in 0..n[0] {
                raw.push_cell(CellType::Hexahedron, &corners(n, i, j, k));
            }
        }
    }
    box_boundary(&mut raw, n, |c, side| {
        let quad: [usize; 4] = match side {
            0 => [0, 3, 7, 4],
            1 => [1, 2, 6, 5],
            2 => [0, 1, 5, 4],
            3 => [3, 2, 6, 7],
            4 => [0, 1, 2, 3],
            _ => [4, 5, 6, 7],
        };
        vec![quad.iter().map(|&l| c[l]).collect()]
    });
    raw
}

/// Same box, each hexahedron split into six tetrahedra around its
/// `0-6` diagonal. The split is conforming across neighbouring boxes.
pub fn structured_box_tets(n: [usize; 3], min: [f64; 3], max: [f64; 3]) -> GridRawData {
    const TETS: [[usize; 4]; 6] = [
        [0, 1, 2, 6],
        [0, 2, 3, 6],
        [0, 3, 7, 6],
        [0, 7, 4, 6],
        [0, 4, 5, 6],
        [0, 5, 1, 6],
    ];
    let mut raw = GridRawData::new();
    box_nodes(&mut raw, n, min, max);
    for k in 0..n[2] {
        for j in 0..n[1] {
            for i in 0..n[0] {
                let c = corners(n, i, j, k);
                for tet in TETS {
                    raw.push_cell(CellType::Tetrahedron, &tet.map(|l| c[l]));
                }
            }
        }
    }
    box_boundary(&mut raw, n, |c, side| {
        let tris: [[usize; 3]; 2] = match side {
            0 => [[0, 3, 7], [0, 7, 4]],
            1 => [[1, 2, 6], [1, 6, 5]],
            2 => [[0, 1, 5], [0, 5, 4]],
            3 => [[3, 2, 6], [3, 6, 7]],
            4 => [[0, 1, 2], [0, 2, 3]],
            _ => [[4, 5, 6], [4, 6, 7]],
        };
        tris.iter()
            .map(|t| t.iter().map(|&l| c[l]).collect())
            .collect()
    });
    raw
}

/// Structured quadrilateral rectangle over `[min, max]` with `n[0] × n[1]` cells.
pub fn structured_rect(n: [usize; 2], min: [f64; 2], max: [f64; 2]) -> GridRawData {
    let mut raw = GridRawData::new();
    for j in 0..=n[1] {
        for i in 0..=n[0] {
            raw.push_node([lerp(min[0], max[0], i, n[0]), lerp(min[1], max[1], j, n[1]), 0.0]);
        }
    }
    let id = |i: usize, j: usize| i + (n[0] + 1) * j;
    for j in 0..n[1] {
        for i in 0..n[0] {
            raw.push_cell(
                CellType::Quadrilateral,
                &[id(i, j), id(i + 1, j), id(i + 1, j + 1), id(i, j + 1)],
            );
        }
    }
    let regions: Vec<usize> = SIDES_2D.iter().map(|s| raw.region(s)).collect();
    for j in 0..n[1] {
        raw.push_boundary_face(regions[0], &[id(0, j), id(0, j + 1)]);
        raw.push_boundary_face(regions[1], &[id(n[0], j), id(n[0], j + 1)]);
    }
    for i in 0..n[0] {
        raw.push_boundary_face(regions[2], &[id(i, 0), id(i + 1, 0)]);
        raw.push_boundary_face(regions[3], &[id(i, n[1]), id(i + 1, n[1])]);
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::dual_graph::build_dual;

    #[test]
    fn box_counts() {
        let raw = structured_box([2, 3, 4], [0.0; 3], [1.0; 3]);
        assert_eq!(raw.node_count(), 3 * 4 * 5);
        assert_eq!(raw.cell_count(), 24);
        assert_eq!(raw.boco_names, SIDES_3D.map(String::from).to_vec());
        assert_eq!(raw.boundary_faces(0).count(), 12);
        assert_eq!(raw.boundary_faces(5).count(), 6);
        raw.validate("box").unwrap();
    }

    #[test]
    fn tet_box_is_conforming() {
        let raw = structured_box_tets([2, 2, 1], [0.0; 3], [1.0; 3]);
        raw.validate("tets").unwrap();
        let g = build_dual(&raw).unwrap();
        // 24 tets, each with 4 faces; 2 boundary triangles per box side face
        let boundary: usize = (0..6).map(|r| raw.boundary_faces(r).count()).sum();
        assert_eq!(boundary, 2 * (2 * 2 * 2 + 2 * 1 * 2 + 2 * 1 * 2));
        assert_eq!(2 * g.edge_count() + boundary, 4 * raw.cell_count());
    }

    #[test]
    fn rect_is_two_dimensional() {
        let raw = structured_rect([3, 2], [0.0, 0.0], [3.0, 1.0]);
        assert_eq!(raw.dimension(), 2);
        assert_eq!(raw.cell_nodes(4), &[5, 6, 10, 9]);
        assert_eq!(raw.coords[11], [3.0, 1.0, 0.0]);
        raw.validate("rect").unwrap();
    }
}
