//! Global ↔ local id translation for one rank.
//!
//! Built from the raw mesh and the partition result. Owned cells get dense
//! local ids in ascending global order; nodes are numbered on first
//! reference while walking the owned cells in that order; ghosts are added
//! by the ghost layer. The tables are build-time state and are dropped once
//! the ghost layer is complete.

use crate::io::GridRawData;
use crate::mesh_error::MeshError;
use crate::topology::cell_type::face_key;
use hashbrown::HashMap;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Default)]
pub struct IndexMaps {
    pub rank: usize,
    /// Global cell → owning rank, total over every global cell.
    pub cell_owner: Vec<usize>,
    pub cell_g2l: HashMap<usize, usize>,
    pub cell_l2g: Vec<usize>,
    pub node_g2l: HashMap<usize, usize>,
    pub node_l2g: Vec<usize>,
    pub ghost_g2l: HashMap<usize, usize>,
    pub ghost_l2g: Vec<usize>,
    /// Local node (by global id) → every global cell incident to it.
    pub node_cells: HashMap<usize, Vec<usize>>,
    /// Local node (by global id) → boundary regions of faces touching it.
    pub node_bc_regions: BTreeMap<usize, BTreeSet<usize>>,
    /// Lowest global node of a boundary face → (region, sorted face nodes),
    /// for every boundary face whose lowest node is local.
    pub node_bc_face_conn: BTreeMap<usize, Vec<(usize, Vec<usize>)>>,
}

impl IndexMaps {
    pub fn build(raw: &GridRawData, cell_owner: Vec<usize>, rank: usize) -> Result<Self, MeshError> {
        if cell_owner.len() != raw.cell_count() {
            return Err(MeshError::PartitionInconsistency {
                rank,
                message: format!(
                    "owner table covers {} cells, mesh has {}",
                    cell_owner.len(),
                    raw.cell_count()
                ),
            });
        }
        let mut maps = IndexMaps {
            rank,
            cell_owner,
            ..Default::default()
        };

        for cell in (0..raw.cell_count()).filter(|&c| maps.cell_owner[c] == rank) {
            maps.cell_g2l.insert(cell, maps.cell_l2g.len());
            maps.cell_l2g.push(cell);
            for &node in raw.cell_nodes(cell) {
                if !maps.node_g2l.contains_key(&node) {
                    maps.node_g2l.insert(node, maps.node_l2g.len());
                    maps.node_l2g.push(node);
                }
            }
        }

        for cell in 0..raw.cell_count() {
            for &node in raw.cell_nodes(cell) {
                if maps.node_g2l.contains_key(&node) {
                    maps.node_cells.entry(node).or_default().push(cell);
                }
            }
        }

        for region in 0..raw.region_count() {
            for face in raw.boundary_faces(region) {
                for node in face.iter().filter(|n| maps.node_g2l.contains_key(*n)) {
                    maps.node_bc_regions.entry(*node).or_default().insert(region);
                }
                let key = face_key(face);
                if maps.node_g2l.contains_key(&key[0]) {
                    maps.node_bc_face_conn
                        .entry(key[0])
                        .or_default()
                        .push((region, key));
                }
            }
        }

        log::debug!(
            "[rank {rank}] index maps: {} cells, {} nodes, {} boundary-adjacent nodes",
            maps.cell_l2g.len(),
            maps.node_l2g.len(),
            maps.node_bc_regions.len()
        );
        Ok(maps)
    }

    pub fn owner_of(&self, global_cell: usize) -> Option<usize> {
        self.cell_owner.get(global_cell).copied()
    }

    pub fn local_cell(&self, global: usize) -> Option<usize> {
        self.cell_g2l.get(&global).copied()
    }

    pub fn local_node(&self, global: usize) -> Option<usize> {
        self.node_g2l.get(&global).copied()
    }

    pub fn local_ghost(&self, global: usize) -> Option<usize> {
        self.ghost_g2l.get(&global).copied()
    }

    /// Local ghost id of `global`, allocating the next id on first use.
    pub fn add_ghost(&mut self, global: usize) -> usize {
        if let Some(&g) = self.ghost_g2l.get(&global) {
            return g;
        }
        let id = self.ghost_l2g.len();
        self.ghost_g2l.insert(global, id);
        self.ghost_l2g.push(global);
        id
    }

    /// Lowest rank owning a cell incident to the local node `global`.
    pub fn node_owner(&self, global: usize) -> usize {
        self.node_cells
            .get(&global)
            .and_then(|cells| cells.iter().map(|&c| self.cell_owner[c]).min())
            .unwrap_or(self.rank)
    }

    /// Distinct regions declaring a boundary face with exactly these nodes.
    pub fn boundary_regions_of(&self, face_nodes: &[usize]) -> Vec<usize> {
        let key = face_key(face_nodes);
        let Some(candidates) = key.first().and_then(|k| self.node_bc_face_conn.get(k)) else {
            return Vec::new();
        };
        candidates
            .iter()
            .filter(|(_, conn)| *conn == key)
            .map(|&(region, _)| region)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// The other global cell sharing the face `key` (sorted global nodes)
    /// of `cell`, if any. `key[0]` must be a local node.
    pub fn neighbor_across(&self, raw: &GridRawData, cell: usize, key: &[usize]) -> Option<usize> {
        self.node_cells
            .get(key.first()?)?
            .iter()
            .copied()
            .find(|&other| other != cell && raw.find_face(other, key).is_some())
    }
}
