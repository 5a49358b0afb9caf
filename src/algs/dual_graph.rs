//! Build a CSR (compressed-sparse-row) *dual graph* of a mesh.
//
// Each *cell* is a vertex; an undirected edge joins two cells that share a
// face of their element templates (a triangle/quad in 3D, an edge in 2D).
// Faces are matched by their sorted node set, so mixed element types pair up
// whenever the shared face has the same corners.
//
// Returned in METIS-ready CSR triples:
//
// * `xadj[i] .. xadj[i+1]`   = neighbour list of cell *i*
// * `adjncy`                 = concatenated neighbour vertices
// * `vwgt[i]`                = vertex weight, default = 1
//
// The dual graph is **symmetrised** (i↔j appear in both lists),
// **self-free** (no loops) and every neighbour list is sorted.

use crate::io::GridRawData;
use crate::mesh_error::MeshError;
use crate::topology::cell_type::face_key;
use hashbrown::HashMap;

/// CSR triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualGraph {
    pub xadj: Vec<usize>,
    pub adjncy: Vec<usize>,
    pub vwgt: Vec<i32>, // METIS expects i32
}

impl DualGraph {
    pub fn vertex_count(&self) -> usize {
        self.xadj.len().saturating_sub(1)
    }

    pub fn edge_count(&self) -> usize {
        self.adjncy.len() / 2
    }

    pub fn neighbors(&self, v: usize) -> &[usize] {
        &self.adjncy[self.xadj[v]..self.xadj[v + 1]]
    }

    pub fn degree(&self, v: usize) -> usize {
        self.xadj[v + 1] - self.xadj[v]
    }

    /// Build from per-vertex neighbour lists; lists are sorted and deduplicated.
    pub fn from_adjacency(mut adj: Vec<Vec<usize>>) -> Self {
        let mut xadj = Vec::with_capacity(adj.len() + 1);
        let mut adjncy = Vec::new();
        xadj.push(0);
        for nbrs in &mut adj {
            nbrs.sort_unstable();
            nbrs.dedup();
            adjncy.extend_from_slice(nbrs);
            xadj.push(adjncy.len());
        }
        let vwgt = vec![1; adj.len()];
        DualGraph { xadj, adjncy, vwgt }
    }
}

/// Build the face-adjacency dual graph of every cell in `raw`.
///
/// A face shared by more than two cells, or a cell with no face-neighbour in
/// a mesh of more than one cell, is a [`MeshError::DegenerateMesh`].
pub fn build_dual(raw: &GridRawData) -> Result<DualGraph, MeshError> {
    let n = raw.cell_count();

    // 1. first-seen map: face key → (first cell, times seen)
    let mut face_owner: HashMap<Vec<usize>, (usize, u8)> = HashMap::new();
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];

    for cell in 0..n {
        for face in raw.cell_faces(cell) {
            let key = face_key(&face);
            match face_owner.get_mut(&key) {
                Some((first, seen)) => {
                    if *seen >= 2 {
                        return Err(MeshError::DegenerateMesh(format!(
                            "face with nodes {key:?} is shared by more than two cells (cell {cell} is the third)"
                        )));
                    }
                    if *first == cell {
                        return Err(MeshError::DegenerateMesh(format!(
                            "cell {cell} lists face {key:?} twice"
                        )));
                    }
                    *seen += 1;
                    // second time we see this face → undirected edge
                    adj[cell].push(*first);
                    adj[*first].push(cell);
                }
                None => {
                    face_owner.insert(key, (cell, 1));
                }
            }
        }
    }

    if n > 1 {
        if let Some(isolated) = adj.iter().position(Vec::is_empty) {
            return Err(MeshError::DegenerateMesh(format!(
                "cell {isolated} shares no face with any other cell"
            )));
        }
    }

    let graph = DualGraph::from_adjacency(adj);
    log::debug!(
        "dual graph: {} vertices, {} edges",
        graph.vertex_count(),
        graph.edge_count()
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::cell_type::CellType;

    // helper to build two triangles sharing an edge
    fn tiny_mesh() -> GridRawData {
        let mut raw = GridRawData::new();
        for xyz in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]] {
            raw.push_node(xyz);
        }
        raw.push_cell(CellType::Triangle, &[0, 1, 2]);
        raw.push_cell(CellType::Triangle, &[1, 3, 2]);
        raw
    }

    #[test]
    fn dual_graph_two_cells() {
        let dg = build_dual(&tiny_mesh()).unwrap();

        // should be 2 vertices with a single undirected edge
        assert_eq!(dg.xadj, vec![0, 1, 2]);
        assert_eq!(dg.adjncy, vec![1, 0]);
        assert_eq!(dg.vwgt, vec![1, 1]);
    }

    #[test]
    fn corner_contact_is_not_adjacency() {
        let mut raw = tiny_mesh();
        raw.push_node([2.0, 2.0, 0.0]);
        raw.push_node([2.0, 1.0, 0.0]);
        // touches cell 1 only at node 3
        raw.push_cell(CellType::Triangle, &[3, 5, 4]);
        let err = build_dual(&raw).unwrap_err();
        assert!(matches!(err, MeshError::DegenerateMesh(ref m) if m.contains("cell 2")));
    }

    #[test]
    fn non_manifold_face_is_rejected() {
        let mut raw = tiny_mesh();
        raw.push_node([0.5, -1.0, 0.0]);
        raw.push_cell(CellType::Triangle, &[1, 2, 4]);
        assert!(matches!(build_dual(&raw), Err(MeshError::DegenerateMesh(_))));
    }

    #[test]
    fn single_cell_mesh_is_fine() {
        let mut raw = GridRawData::new();
        for xyz in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            raw.push_node(xyz);
        }
        raw.push_cell(CellType::Triangle, &[0, 1, 2]);
        let dg = build_dual(&raw).unwrap();
        assert_eq!(dg.vertex_count(), 1);
        assert!(dg.adjncy.is_empty());
    }
}
