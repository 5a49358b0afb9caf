//! Element types and their face templates.
//!
//! Vertex ordering follows the Gmsh convention:
//! - Triangle/Quadrilateral: counter-clockwise.
//! - Tetrahedron: `[v0, v1, v2]` base, `v3` apex.
//! - Hexahedron: `[v0..v3]` bottom, `[v4..v7]` top, `v(i+4)` above `v(i)`.
//! - Prism: `[v0, v1, v2]` bottom, `[v3, v4, v5]` top.
//! - Pyramid: `[v0..v3]` base, `v4` apex.
//!
//! Face templates list local vertex indices. 3D templates are wound so the
//! right-hand normal points out of the cell; orientation is re-checked
//! against geometry anyway, so a mirrored input element still works.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cell element types supported by the finite-volume grid.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum CellType {
    /// 2D simplex (triangle).
    Triangle,
    /// 2D tensor-product cell (quad).
    Quadrilateral,
    /// 3D simplex (tet).
    Tetrahedron,
    /// 3D tensor-product cell (hex).
    Hexahedron,
    /// 3D wedge/prism.
    Prism,
    /// 3D pyramid.
    Pyramid,
}

impl CellType {
    /// Returns the topological dimension of the cell.
    pub fn dimension(self) -> usize {
        match self {
            CellType::Triangle | CellType::Quadrilateral => 2,
            CellType::Tetrahedron | CellType::Hexahedron | CellType::Prism | CellType::Pyramid => 3,
        }
    }

    /// Number of corner nodes.
    pub fn node_count(self) -> usize {
        match self {
            CellType::Triangle => 3,
            CellType::Quadrilateral => 4,
            CellType::Tetrahedron => 4,
            CellType::Hexahedron => 8,
            CellType::Prism => 6,
            CellType::Pyramid => 5,
        }
    }

    /// Face templates in local vertex indices.
    pub fn faces(self) -> &'static [&'static [usize]] {
        match self {
            CellType::Triangle => &TRI_FACES,
            CellType::Quadrilateral => &QUAD_FACES,
            CellType::Tetrahedron => &TET_FACES,
            CellType::Hexahedron => &HEX_FACES,
            CellType::Prism => &PRISM_FACES,
            CellType::Pyramid => &PYRAMID_FACES,
        }
    }

    pub fn face_count(self) -> usize {
        self.faces().len()
    }

    /// Gmsh element type code, for volume/area elements only.
    pub fn from_gmsh(code: u32) -> Option<Self> {
        match code {
            2 => Some(CellType::Triangle),
            3 => Some(CellType::Quadrilateral),
            4 => Some(CellType::Tetrahedron),
            5 => Some(CellType::Hexahedron),
            6 => Some(CellType::Prism),
            7 => Some(CellType::Pyramid),
            _ => None,
        }
    }

    /// Short lowercase name used by the tabular mesh format.
    pub fn name(self) -> &'static str {
        match self {
            CellType::Triangle => "tri",
            CellType::Quadrilateral => "quad",
            CellType::Tetrahedron => "tet",
            CellType::Hexahedron => "hex",
            CellType::Prism => "prism",
            CellType::Pyramid => "pyramid",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "tri" | "triangle" => Some(CellType::Triangle),
            "quad" | "quadrilateral" => Some(CellType::Quadrilateral),
            "tet" | "tetra" | "tetrahedron" => Some(CellType::Tetrahedron),
            "hex" | "hexa" | "hexahedron" => Some(CellType::Hexahedron),
            "prism" | "wedge" | "penta" => Some(CellType::Prism),
            "pyramid" | "pyra" => Some(CellType::Pyramid),
            _ => None,
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Canonical, order-independent key of a face: its sorted node ids.
pub fn face_key(nodes: &[usize]) -> Vec<usize> {
    let mut key = nodes.to_vec();
    key.sort_unstable();
    key
}

const TRI_FACES: [&[usize]; 3] = [&[0, 1], &[1, 2], &[2, 0]];
const QUAD_FACES: [&[usize]; 4] = [&[0, 1], &[1, 2], &[2, 3], &[3, 0]];
const TET_FACES: [&[usize]; 4] = [&[0, 2, 1], &[0, 1, 3], &[1, 2, 3], &[0, 3, 2]];
const HEX_FACES: [&[usize]; 6] = [
    &[0, 3, 2, 1],
    &[4, 5, 6, 7],
    &[0, 1, 5, 4],
    &[1, 2, 6, 5],
    &[2, 3, 7, 6],
    &[3, 0, 4, 7],
];
const PRISM_FACES: [&[usize]; 5] = [
    &[0, 2, 1],
    &[3, 4, 5],
    &[0, 1, 4, 3],
    &[1, 2, 5, 4],
    &[2, 0, 3, 5],
];
const PYRAMID_FACES: [&[usize]; 5] = [
    &[0, 3, 2, 1],
    &[0, 1, 4],
    &[1, 2, 4],
    &[2, 3, 4],
    &[3, 0, 4],
];

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CellType; 6] = [
        CellType::Triangle,
        CellType::Quadrilateral,
        CellType::Tetrahedron,
        CellType::Hexahedron,
        CellType::Prism,
        CellType::Pyramid,
    ];

    #[test]
    fn every_vertex_appears_in_a_face() {
        for ct in ALL {
            let mut seen = vec![false; ct.node_count()];
            for face in ct.faces() {
                for &v in *face {
                    seen[v] = true;
                }
            }
            assert!(seen.iter().all(|&s| s), "{ct} has an unused vertex");
        }
    }

    #[test]
    fn every_edge_shared_by_two_faces_in_3d() {
        // A closed polyhedral surface uses each edge exactly twice, once per direction.
        for ct in ALL.into_iter().filter(|c| c.dimension() == 3) {
            let mut directed = Vec::new();
            for face in ct.faces() {
                for i in 0..face.len() {
                    directed.push((face[i], face[(i + 1) % face.len()]));
                }
            }
            for &(a, b) in &directed {
                assert!(directed.contains(&(b, a)), "{ct}: edge {a}->{b} not closed");
            }
        }
    }

    #[test]
    fn names_round_trip() {
        for ct in ALL {
            assert_eq!(CellType::from_name(ct.name()), Some(ct));
        }
        assert_eq!(CellType::from_name("HEXA"), Some(CellType::Hexahedron));
        assert_eq!(CellType::from_name("polyhedron"), None);
    }
}
