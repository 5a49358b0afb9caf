//! Materialize the owned part of the mesh as Node/Cell/Face records.
//!
//! Face classification, in order:
//! 1. the face is declared by exactly one boundary region: boundary face,
//!    even when a cell on the other side exists (logged as a warning);
//!    declared by several regions: [`MeshError::BcConflict`];
//! 2. the other cell sharing the face is owned here: interior face, stored
//!    once with the lower local id as parent;
//! 3. the other cell is owned elsewhere: partition face, returned for the
//!    ghost layer;
//! 4. nothing on the other side and no declaration: [`MeshError::BcConflict`]
//!    with no regions.

use crate::algs::index_maps::IndexMaps;
use crate::io::GridRawData;
use crate::mesh_error::MeshError;
use crate::topology::cell_type::face_key;
use crate::topology::grid::{BoundaryRegion, Cell, Face, FaceNeighbor, Grid, Node};
use hashbrown::HashMap;

/// A face whose neighbour is owned by another rank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionFace {
    /// Local owned cell.
    pub cell: usize,
    /// Global id of the remote cell.
    pub remote: usize,
    /// Local node ids, ordered as in the lower-global-id cell.
    pub nodes: Vec<usize>,
}

fn to_local(maps: &IndexMaps, global_nodes: &[usize]) -> Result<Vec<usize>, MeshError> {
    global_nodes
        .iter()
        .map(|&g| {
            maps.local_node(g).ok_or_else(|| MeshError::PartitionInconsistency {
                rank: maps.rank,
                message: format!("face node {g} has no local id"),
            })
        })
        .collect()
}

/// Build the grid of owned cells, with every face classified except the
/// partition faces, which are returned separately.
pub fn build_local_topology(
    raw: &GridRawData,
    maps: &IndexMaps,
) -> Result<(Grid, Vec<PartitionFace>), MeshError> {
    let rank = maps.rank;
    let mut grid = Grid {
        rank,
        dim: raw.dimension(),
        n_global_cells: raw.cell_count(),
        regions: raw
            .boco_names
            .iter()
            .map(|name| BoundaryRegion {
                name: name.clone(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };

    grid.nodes = maps
        .node_l2g
        .iter()
        .enumerate()
        .map(|(l, &g)| {
            let mut node = Node::new(l, g, raw.coords[g], maps.node_owner(g));
            if let Some(regions) = maps.node_bc_regions.get(&g) {
                node.bcs = regions.clone();
            }
            node
        })
        .collect();

    for (l, &g) in maps.cell_l2g.iter().enumerate() {
        let nodes = to_local(maps, raw.cell_nodes(g))?;
        for &n in &nodes {
            grid.nodes[n].cells.push(l);
        }
        grid.cells.push(Cell::new(l, g, raw.cell_types[g], nodes));
    }

    // sorted global face nodes → interior face id, waiting for its second cell
    let mut open_interior: HashMap<Vec<usize>, usize> = HashMap::new();
    let mut partition_faces = Vec::new();

    for (lc, &gc) in maps.cell_l2g.iter().enumerate() {
        for face in raw.cell_faces(gc) {
            let key = face_key(&face);
            let regions = maps.boundary_regions_of(&key);
            let neighbor = maps.neighbor_across(raw, gc, &key);

            match regions.as_slice() {
                [region] => {
                    if let Some(other) = neighbor {
                        log::warn!(
                            "[rank {rank}] face {key:?} of cell {gc} is declared in region `{}` but also borders cell {other}; treating it as boundary",
                            raw.boco_names[*region]
                        );
                    }
                    let id = grid.faces.len();
                    let nodes = to_local(maps, &face)?;
                    grid.faces
                        .push(Face::new(id, lc, FaceNeighbor::Boundary(*region), nodes));
                    grid.cells[lc].faces.push(id);
                    grid.regions[*region].local_faces += 1;
                }
                [] => match neighbor {
                    Some(gn) => match maps.local_cell(gn) {
                        Some(ln) if ln < lc => {
                            let id = open_interior.remove(&key).ok_or_else(|| {
                                MeshError::PartitionInconsistency {
                                    rank,
                                    message: format!(
                                        "interior face {key:?} between cells {gn} and {gc} was not created"
                                    ),
                                }
                            })?;
                            grid.cells[lc].faces.push(id);
                            grid.cells[lc].neighbors.push(ln);
                        }
                        Some(ln) => {
                            let id = grid.faces.len();
                            let nodes = to_local(maps, &face)?;
                            grid.faces.push(Face::new(id, lc, FaceNeighbor::Cell(ln), nodes));
                            grid.cells[lc].faces.push(id);
                            grid.cells[lc].neighbors.push(ln);
                            open_interior.insert(key, id);
                        }
                        None => {
                            let ordered = if gc < gn {
                                face
                            } else {
                                raw.find_face(gn, &key).unwrap_or(face)
                            };
                            partition_faces.push(PartitionFace {
                                cell: lc,
                                remote: gn,
                                nodes: to_local(maps, &ordered)?,
                            });
                        }
                    },
                    None => {
                        return Err(MeshError::BcConflict {
                            rank,
                            face_nodes: key,
                            regions,
                        });
                    }
                },
                _ => {
                    return Err(MeshError::BcConflict {
                        rank,
                        face_nodes: key,
                        regions,
                    });
                }
            }
        }
    }

    if let Some((key, _)) = open_interior.into_iter().next() {
        return Err(MeshError::PartitionInconsistency {
            rank,
            message: format!("interior face {key:?} was seen from one side only"),
        });
    }

    for region in &mut grid.regions {
        region.local_nodes = 0;
    }
    for node in grid.nodes.iter().filter(|n| n.owner == rank) {
        for &r in &node.bcs {
            grid.regions[r].local_nodes += 1;
        }
    }

    log::debug!(
        "[rank {rank}] local topology: {} cells, {} nodes, {} faces, {} partition faces",
        grid.cells.len(),
        grid.nodes.len(),
        grid.faces.len(),
        partition_faces.len()
    );
    Ok((grid, partition_faces))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::meshgen::{structured_box, structured_rect};
    use crate::topology::cell_type::CellType;

    fn local(raw: &GridRawData, owner: Vec<usize>, rank: usize) -> Result<(Grid, Vec<PartitionFace>), MeshError> {
        let maps = IndexMaps::build(raw, owner, rank)?;
        build_local_topology(raw, &maps)
    }

    #[test]
    fn single_rank_has_only_interior_and_boundary_faces() {
        let raw = structured_box([2, 2, 2], [0.0; 3], [1.0; 3]);
        let (grid, pfaces) = local(&raw, vec![0; 8], 0).unwrap();
        assert!(pfaces.is_empty());
        let interior = grid.faces.iter().filter(|f| f.bc() < 0).count();
        assert_eq!(interior, 12);
        assert_eq!(grid.faces.len(), 12 + 24);
        for cell in &grid.cells {
            assert_eq!(cell.faces.len(), 6);
            assert_eq!(cell.neighbors.len(), 3);
        }
        assert_eq!(grid.regions[4].local_faces, 4);
        // 9 nodes on each side of the cube
        assert!(grid.regions.iter().all(|r| r.local_nodes == 9));
    }

    #[test]
    fn remote_neighbours_become_partition_faces() {
        let raw = structured_rect([2, 1], [0.0, 0.0], [2.0, 1.0]);
        let (grid, pfaces) = local(&raw, vec![0, 1], 1).unwrap();
        assert_eq!(grid.cells.len(), 1);
        assert_eq!(grid.faces.len(), 3);
        assert_eq!(pfaces.len(), 1);
        let pf = &pfaces[0];
        assert_eq!(pf.remote, 0);
        // ordered as seen from global cell 0: nodes 1 -> 4
        let globals: Vec<usize> = pf.nodes.iter().map(|&n| grid.nodes[n].global_id).collect();
        assert_eq!(globals, vec![1, 4]);
    }

    #[test]
    fn face_in_two_regions_is_a_conflict() {
        let mut raw = structured_rect([1, 1], [0.0, 0.0], [1.0, 1.0]);
        let extra = raw.region("duplicate");
        // xmin is the edge 0-2
        raw.push_boundary_face(extra, &[2, 0]);
        let err = local(&raw, vec![0], 0).unwrap_err();
        match err {
            MeshError::BcConflict { face_nodes, regions, .. } => {
                assert_eq!(face_nodes, vec![0, 2]);
                assert_eq!(regions, vec![0, extra]);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn undeclared_boundary_is_a_conflict() {
        let mut raw = GridRawData::new();
        for xyz in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            raw.push_node(xyz);
        }
        raw.push_cell(CellType::Triangle, &[0, 1, 2]);
        let wall = raw.region("wall");
        raw.push_boundary_face(wall, &[0, 1]);
        raw.push_boundary_face(wall, &[1, 2]);
        let err = local(&raw, vec![0], 0).unwrap_err();
        assert!(matches!(err, MeshError::BcConflict { ref regions, .. } if regions.is_empty()));
    }

    #[test]
    fn declared_interior_face_is_boundary() {
        let mut raw = structured_rect([2, 1], [0.0, 0.0], [2.0, 1.0]);
        let baffle = raw.region("baffle");
        raw.push_boundary_face(baffle, &[1, 4]);
        let (grid, _) = local(&raw, vec![0, 0], 0).unwrap();
        let baffles: Vec<_> = grid.boundary_faces(baffle).collect();
        // one per side, no interior face left
        assert_eq!(baffles.len(), 2);
        assert!(grid.faces.iter().all(|f| f.bc() != crate::topology::grid::BC_INTERIOR));
    }
}
