//! Mesh ingestion.
//!
//! Readers turn a mesh source into [`GridRawData`]: global node coordinates,
//! flattened cell connectivity with offsets, and flattened boundary-face
//! connectivity per named region. Raw data carries no partitioning
//! information and is dropped once the local topology has been built.

pub mod gmsh;
pub mod tabular;

use crate::mesh_error::MeshError;
use crate::topology::cell_type::CellType;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

pub use gmsh::GmshReader;
pub use tabular::TabularReader;

/// Transient global mesh arrays.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GridRawData {
    pub coords: Vec<[f64; 3]>,
    pub cell_types: Vec<CellType>,
    /// `cell_connectivity[cell_conn_index[c]..cell_conn_index[c + 1]]` are the nodes of cell `c`.
    pub cell_conn_index: Vec<usize>,
    pub cell_connectivity: Vec<usize>,
    /// Per region, same layout as the cell arrays.
    pub boco_conn_index: Vec<Vec<usize>>,
    pub boco_connectivity: Vec<Vec<usize>>,
    pub boco_names: Vec<String>,
    pub boco_name_map: BTreeMap<String, usize>,
}

impl GridRawData {
    pub fn new() -> Self {
        Self {
            cell_conn_index: vec![0],
            ..Default::default()
        }
    }

    pub fn node_count(&self) -> usize {
        self.coords.len()
    }

    pub fn cell_count(&self) -> usize {
        self.cell_types.len()
    }

    pub fn region_count(&self) -> usize {
        self.boco_names.len()
    }

    /// Mesh dimension, taken from the first cell (all cells agree after [`validate`](Self::validate)).
    pub fn dimension(&self) -> usize {
        self.cell_types.first().map_or(3, |ct| ct.dimension())
    }

    pub fn push_node(&mut self, xyz: [f64; 3]) -> usize {
        self.coords.push(xyz);
        self.coords.len() - 1
    }

    pub fn push_cell(&mut self, cell_type: CellType, nodes: &[usize]) -> usize {
        self.cell_types.push(cell_type);
        self.cell_connectivity.extend_from_slice(nodes);
        self.cell_conn_index.push(self.cell_connectivity.len());
        self.cell_types.len() - 1
    }

    /// Index of the region called `name`, creating it on first use.
    pub fn region(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.boco_name_map.get(name) {
            return idx;
        }
        let idx = self.boco_names.len();
        self.boco_names.push(name.to_string());
        self.boco_name_map.insert(name.to_string(), idx);
        self.boco_conn_index.push(vec![0]);
        self.boco_connectivity.push(Vec::new());
        idx
    }

    pub fn push_boundary_face(&mut self, region: usize, nodes: &[usize]) {
        self.boco_connectivity[region].extend_from_slice(nodes);
        let end = self.boco_connectivity[region].len();
        self.boco_conn_index[region].push(end);
    }

    pub fn cell_nodes(&self, cell: usize) -> &[usize] {
        &self.cell_connectivity[self.cell_conn_index[cell]..self.cell_conn_index[cell + 1]]
    }

    /// Global node lists of the faces of `cell`, in template order.
    pub fn cell_faces(&self, cell: usize) -> impl Iterator<Item = Vec<usize>> + '_ {
        let nodes = self.cell_nodes(cell);
        self.cell_types[cell]
            .faces()
            .iter()
            .map(move |tpl| tpl.iter().map(|&i| nodes[i]).collect())
    }

    /// Ordered nodes of the face of `cell` whose sorted node set equals `key`.
    pub fn find_face(&self, cell: usize, key: &[usize]) -> Option<Vec<usize>> {
        self.cell_faces(cell)
            .find(|f| crate::topology::cell_type::face_key(f) == key)
    }

    pub fn boundary_faces(&self, region: usize) -> impl Iterator<Item = &[usize]> + '_ {
        let conn = &self.boco_connectivity[region];
        self.boco_conn_index[region]
            .iter()
            .tuple_windows()
            .map(move |(&a, &b)| &conn[a..b])
    }

    /// Uniformly scale every coordinate.
    pub fn scale(&mut self, factor: f64) {
        for xyz in &mut self.coords {
            for v in xyz.iter_mut() {
                *v *= factor;
            }
        }
    }

    /// Structural checks shared by all readers.
    pub fn validate(&self, origin: &str) -> Result<(), MeshError> {
        if self.cell_count() == 0 {
            return Err(MeshError::format(origin, "cells", "mesh declares zero cells"));
        }
        if self.cell_conn_index.len() != self.cell_count() + 1 {
            return Err(MeshError::format(
                origin,
                "cells",
                "connectivity index does not delimit every cell",
            ));
        }
        let dim = self.dimension();
        for c in 0..self.cell_count() {
            let ct = self.cell_types[c];
            if ct.dimension() != dim {
                return Err(MeshError::format(
                    origin,
                    "cells",
                    format!("cell {c} is a {ct}, mixed {dim}D/{}D meshes are not supported", ct.dimension()),
                ));
            }
            let nodes = self.cell_nodes(c);
            if nodes.len() != ct.node_count() {
                return Err(MeshError::format(
                    origin,
                    "cells",
                    format!("cell {c} ({ct}) has {} nodes, expected {}", nodes.len(), ct.node_count()),
                ));
            }
            if let Some(&n) = nodes.iter().find(|&&n| n >= self.node_count()) {
                return Err(MeshError::format(
                    origin,
                    "cells",
                    format!("cell {c} references missing node {n}"),
                ));
            }
        }
        for r in 0..self.region_count() {
            for face in self.boundary_faces(r) {
                let ok_len = if dim == 2 {
                    face.len() == 2
                } else {
                    face.len() >= 3
                };
                if !ok_len {
                    return Err(MeshError::format(
                        origin,
                        "boundary",
                        format!(
                            "region `{}` has a {}-node face in a {dim}D mesh",
                            self.boco_names[r],
                            face.len()
                        ),
                    ));
                }
                if let Some(&n) = face.iter().find(|&&n| n >= self.node_count()) {
                    return Err(MeshError::format(
                        origin,
                        "boundary",
                        format!("region `{}` references missing node {n}", self.boco_names[r]),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Trait for mesh readers that produce raw global grid arrays.
pub trait MeshReader {
    /// Parse mesh data from a reader.
    fn read<R: Read>(&self, reader: R) -> Result<GridRawData, MeshError>;
}

/// Read a mesh file, choosing the reader from the extension (`.msh` is Gmsh,
/// anything else is the tabular format).
pub fn read_mesh(path: impl AsRef<Path>) -> Result<GridRawData, MeshError> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path)?);
    let is_gmsh = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("msh"));
    let result = if is_gmsh {
        GmshReader.read(file)
    } else {
        TabularReader.read(file)
    };
    result.map_err(|err| match err {
        MeshError::MeshFormat {
            section, message, ..
        } => MeshError::MeshFormat {
            origin: path.display().to_string(),
            section,
            message,
        },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_triangles() -> GridRawData {
        let mut raw = GridRawData::new();
        for xyz in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]] {
            raw.push_node(xyz);
        }
        raw.push_cell(CellType::Triangle, &[0, 1, 2]);
        raw.push_cell(CellType::Triangle, &[0, 2, 3]);
        let wall = raw.region("wall");
        for edge in [[0, 1], [1, 2], [2, 3], [3, 0]] {
            raw.push_boundary_face(wall, &edge);
        }
        raw
    }

    #[test]
    fn offsets_delimit_cells_and_faces() {
        let raw = two_triangles();
        assert_eq!(raw.cell_nodes(1), &[0, 2, 3]);
        assert_eq!(raw.boundary_faces(0).count(), 4);
        assert_eq!(raw.find_face(1, &[0, 2]), Some(vec![0, 2]));
        assert_eq!(raw.find_face(0, &[0, 2]), Some(vec![2, 0]));
        raw.validate("test").unwrap();
    }

    #[test]
    fn region_lookup_is_idempotent() {
        let mut raw = two_triangles();
        assert_eq!(raw.region("wall"), 0);
        assert_eq!(raw.region("inlet"), 1);
        assert_eq!(raw.boco_name_map["inlet"], 1);
    }

    #[test]
    fn rejects_zero_cells_and_bad_refs() {
        let raw = GridRawData::new();
        assert!(matches!(raw.validate("t"), Err(MeshError::MeshFormat { .. })));

        let mut raw = two_triangles();
        raw.push_cell(CellType::Triangle, &[0, 1, 9]);
        let err = raw.validate("t").unwrap_err();
        assert!(err.to_string().contains("missing node 9"));
    }

    #[test]
    fn rejects_mixed_dimensions() {
        let mut raw = two_triangles();
        raw.push_cell(CellType::Tetrahedron, &[0, 1, 2, 3]);
        assert!(raw.validate("t").is_err());
    }

    #[test]
    fn scale_multiplies_coordinates() {
        let mut raw = two_triangles();
        raw.scale(0.5);
        assert_eq!(raw.coords[2], [0.5, 0.5, 0.0]);
    }
}
