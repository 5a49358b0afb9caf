//! Ghost cells and the halo communication pattern.
//!
//! Every remote cell sharing at least one node with an owned cell gets a
//! [`Ghost`], one per distinct remote global id, so node stencils at a seam
//! see the same incident cells on every rank. Only face neighbours carry
//! faces. The [`HaloPattern`] pairs, per neighbour rank, the local cells that
//! rank mirrors with the ghosts this rank mirrors from it, both in ascending
//! global id. The pairing is verified once with a handshake and reused for
//! every later exchange.

use crate::algs::communicator::{Communicator, agree};
use crate::algs::index_maps::IndexMaps;
use crate::algs::local_topology::PartitionFace;
use crate::algs::wire;
use crate::io::GridRawData;
use crate::mesh_error::MeshError;
use crate::topology::grid::{CellState, Face, FaceNeighbor, Ghost, Grid, NUM_FIELDS};
use std::collections::{BTreeMap, BTreeSet};

pub const TAG_HANDSHAKE: u16 = 9;
pub const TAG_STATE: u16 = 10;
pub const TAG_GRADIENTS: u16 = 11;
pub const TAG_GEOMETRY: u16 = 12;

/// Exchange lists with one neighbour rank.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HaloLink {
    pub rank: usize,
    /// Local cells mirrored on `rank`, ascending global id.
    pub send_cells: Vec<usize>,
    /// Local ghosts owned by `rank`, ascending global id.
    pub recv_ghosts: Vec<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HaloPattern {
    /// One link per neighbour rank, ascending rank.
    pub links: Vec<HaloLink>,
}

impl HaloPattern {
    pub fn neighbor_ranks(&self) -> impl Iterator<Item = usize> + '_ {
        self.links.iter().map(|l| l.rank)
    }

    /// One blocking exchange round over every link.
    ///
    /// `pack(cell, out)` appends exactly `width` values per send cell;
    /// `unpack(ghost, values)` receives `width` values per receive ghost.
    /// Within each pair the lower rank sends first, and links are visited
    /// in ascending rank, so the round cannot deadlock.
    pub fn exchange<C, P, U>(
        &self,
        comm: &C,
        tag: u16,
        width: usize,
        pack: P,
        mut unpack: U,
    ) -> Result<(), MeshError>
    where
        C: Communicator + ?Sized,
        P: Fn(usize, &mut Vec<f64>),
        U: FnMut(usize, &[f64]),
    {
        for link in &self.links {
            let send = || -> Result<(), MeshError> {
                let mut buf = Vec::with_capacity(width * link.send_cells.len());
                for &c in &link.send_cells {
                    pack(c, &mut buf);
                }
                wire::expect_exact_len(buf.len(), width * link.send_cells.len())?;
                comm.send(link.rank, tag, wire::encode_f64(&buf))
            };
            let recv = || -> Result<Vec<f64>, MeshError> {
                let values = wire::decode_f64(&comm.recv(link.rank, tag)?)?;
                wire::expect_exact_len(values.len(), width * link.recv_ghosts.len())?;
                Ok(values)
            };

            let values = if comm.rank() < link.rank {
                send()?;
                recv()?
            } else {
                let values = recv()?;
                send()?;
                values
            };
            if width > 0 {
                for (&g, chunk) in link.recv_ghosts.iter().zip(values.chunks_exact(width)) {
                    unpack(g, chunk);
                }
            }
        }
        Ok(())
    }
}

fn inconsistency(rank: usize, message: String) -> MeshError {
    MeshError::PartitionInconsistency { rank, message }
}

/// Create ghosts for `partition_faces`, attach their faces and build and
/// verify the halo pattern. Collective: a failure on any rank fails every
/// rank before the handshake starts.
pub fn build_ghost_layer<C: Communicator + ?Sized>(
    grid: &mut Grid,
    maps: &mut IndexMaps,
    raw: &GridRawData,
    partition_faces: Vec<PartitionFace>,
    comm: &C,
) -> Result<(), MeshError> {
    let attached = attach_ghosts(grid, maps, raw, partition_faces, comm.size());
    agree(comm, "ghost layer", attached)?;
    grid.halo = build_pattern(grid);
    verify_pattern(grid, comm)?;

    log::debug!(
        "[rank {}] ghost layer: {} ghosts, neighbours {:?}",
        grid.rank,
        grid.ghosts.len(),
        grid.halo.neighbor_ranks().collect::<Vec<_>>()
    );
    Ok(())
}

/// Local part of the ghost layer: ghosts, their nodes, and the faces that
/// point at them. Ghosts are ordered by (owner, global id).
fn attach_ghosts(
    grid: &mut Grid,
    maps: &mut IndexMaps,
    raw: &GridRawData,
    partition_faces: Vec<PartitionFace>,
    size: usize,
) -> Result<(), MeshError> {
    let rank = grid.rank;

    // face neighbours
    let mut remote: BTreeSet<(usize, usize)> = BTreeSet::new();
    for pf in &partition_faces {
        let owner = maps.owner_of(pf.remote).ok_or_else(|| {
            inconsistency(rank, format!("neighbour cell {} has no owner", pf.remote))
        })?;
        if owner == rank || owner >= size {
            return Err(inconsistency(
                rank,
                format!(
                    "neighbour cell {} of local cell {} claims owner {owner}",
                    pf.remote, pf.cell
                ),
            ));
        }
        remote.insert((owner, pf.remote));
    }
    // edge and corner neighbours
    for node in &maps.node_l2g {
        for &global in maps.node_cells.get(node).into_iter().flatten() {
            let owner = maps.owner_of(global).ok_or_else(|| {
                inconsistency(rank, format!("cell {global} at node {node} has no owner"))
            })?;
            if owner >= size {
                return Err(inconsistency(
                    rank,
                    format!("cell {global} at node {node} claims owner {owner}"),
                ));
            }
            if owner != rank {
                remote.insert((owner, global));
            }
        }
    }

    for &(owner, global) in &remote {
        let id = maps.add_ghost(global);
        let mut ghost = Ghost::new(id, owner, global);
        ghost.nodes = raw
            .cell_nodes(global)
            .iter()
            .filter_map(|&n| maps.local_node(n))
            .collect();
        for &n in &ghost.nodes {
            grid.nodes[n].ghosts.push(id);
        }
        grid.ghosts.push(ghost);
    }

    for pf in partition_faces {
        let g = maps.local_ghost(pf.remote).ok_or_else(|| {
            inconsistency(rank, format!("no ghost for neighbour cell {}", pf.remote))
        })?;
        let id = grid.faces.len();
        grid.faces
            .push(Face::new(id, pf.cell, FaceNeighbor::Ghost(g), pf.nodes));
        let cell = &mut grid.cells[pf.cell];
        cell.faces.push(id);
        if !cell.ghosts.contains(&g) {
            cell.ghosts.push(g);
        }
        let ghost = &mut grid.ghosts[g];
        if !ghost.cells.contains(&pf.cell) {
            ghost.cells.push(pf.cell);
        }
    }
    Ok(())
}

fn build_pattern(grid: &Grid) -> HaloPattern {
    // rank → (send cells by global id, recv ghosts by global id)
    let mut by_rank: BTreeMap<usize, (BTreeMap<usize, usize>, BTreeMap<usize, usize>)> =
        BTreeMap::new();
    for ghost in &grid.ghosts {
        let (_, recv) = by_rank.entry(ghost.partition).or_default();
        recv.insert(ghost.global_id, ghost.id);
    }
    // A local cell is mirrored by every rank owning a cell that shares one of
    // its nodes, which is exactly the ghost rule applied on the other side.
    for node in &grid.nodes {
        for &g in &node.ghosts {
            let (send, _) = by_rank.entry(grid.ghosts[g].partition).or_default();
            for &c in &node.cells {
                send.insert(grid.cells[c].global_id, c);
            }
        }
    }
    HaloPattern {
        links: by_rank
            .into_iter()
            .map(|(rank, (send, recv))| HaloLink {
                rank,
                send_cells: send.into_values().collect(),
                recv_ghosts: recv.into_values().collect(),
            })
            .collect(),
    }
}

/// Check that neighbour relations are mutual and that every send list
/// matches, id for id, the receive list on the other side.
fn verify_pattern<C: Communicator + ?Sized>(grid: &Grid, comm: &C) -> Result<(), MeshError> {
    let rank = comm.rank();
    let mine: Vec<u64> = grid.halo.neighbor_ranks().map(|r| r as u64).collect();
    let all = comm.allgatherv_u64(&mine)?;
    let mutual = all
        .iter()
        .enumerate()
        .find_map(|(other, theirs)| {
            let they_list_me = theirs.contains(&(rank as u64));
            let i_list_them = mine.contains(&(other as u64));
            (they_list_me != i_list_them).then(|| {
                inconsistency(
                    rank,
                    format!(
                        "halo neighbour relation with rank {other} is one-sided (mine: {i_list_them}, theirs: {they_list_me})"
                    ),
                )
            })
        })
        .map_or(Ok(()), Err);
    agree(comm, "halo neighbours", mutual)?;

    let send_ids = |link: &HaloLink| -> Vec<u64> {
        link.send_cells
            .iter()
            .map(|&c| grid.cells[c].global_id as u64)
            .collect()
    };
    // Every handshake completes before any list is judged.
    let mut mismatch = None;
    for link in &grid.halo.links {
        let received = if rank < link.rank {
            comm.send(link.rank, TAG_HANDSHAKE, wire::encode_u64(&send_ids(link)))?;
            wire::decode_u64(&comm.recv(link.rank, TAG_HANDSHAKE)?)?
        } else {
            let got = wire::decode_u64(&comm.recv(link.rank, TAG_HANDSHAKE)?)?;
            comm.send(link.rank, TAG_HANDSHAKE, wire::encode_u64(&send_ids(link)))?;
            got
        };
        let expected: Vec<u64> = link
            .recv_ghosts
            .iter()
            .map(|&g| grid.ghosts[g].global_id as u64)
            .collect();
        if mismatch.is_none() && received != expected {
            mismatch = Some(inconsistency(
                rank,
                format!(
                    "rank {} sends cells {received:?} but ghosts from it are {expected:?}",
                    link.rank
                ),
            ));
        }
    }
    agree(comm, "halo handshake", mismatch.map_or(Ok(()), Err))
}

impl Grid {
    /// Refresh every ghost's mirrored solver state.
    pub fn sync_ghost_state<C: Communicator + ?Sized>(&mut self, comm: &C) -> Result<(), MeshError> {
        let Grid {
            halo, cells, ghosts, ..
        } = self;
        halo.exchange(
            comm,
            TAG_STATE,
            CellState::PACKED_LEN,
            |c, out| cells[c].state.pack(out),
            |g, buf| ghosts[g].state = CellState::unpack(buf),
        )
    }

    /// Refresh ghost gradients and limited gradients.
    pub fn sync_ghost_gradients<C: Communicator + ?Sized>(
        &mut self,
        comm: &C,
    ) -> Result<(), MeshError> {
        const WIDTH: usize = 2 * NUM_FIELDS * 3;
        let Grid {
            halo, cells, ghosts, ..
        } = self;
        halo.exchange(
            comm,
            TAG_GRADIENTS,
            WIDTH,
            |c, out| {
                let cell = &cells[c];
                out.extend(cell.grad.iter().flatten());
                out.extend(cell.limited_grad.iter().flatten());
            },
            |g, buf| {
                let ghost = &mut ghosts[g];
                let (raw, limited) = buf.split_at(NUM_FIELDS * 3);
                for f in 0..NUM_FIELDS {
                    ghost.grad[f].copy_from_slice(&raw[3 * f..3 * f + 3]);
                    ghost.limited_grad[f].copy_from_slice(&limited[3 * f..3 * f + 3]);
                }
            },
        )
    }

    /// Fill ghost centroids from their owners.
    pub fn sync_ghost_geometry<C: Communicator + ?Sized>(
        &mut self,
        comm: &C,
    ) -> Result<(), MeshError> {
        let Grid {
            halo, cells, ghosts, ..
        } = self;
        halo.exchange(
            comm,
            TAG_GEOMETRY,
            3,
            |c, out| out.extend_from_slice(&cells[c].centroid),
            |g, buf| ghosts[g].centroid.copy_from_slice(buf),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::ThreadComm;
    use crate::algs::local_topology::build_local_topology;
    use crate::algs::meshgen::structured_rect;
    use crate::topology::cell_type::CellType;
    use crate::topology::grid::Cell;

    /// Two-cell strip split over two ranks; rank 0 edits its tables after
    /// the local topology is built.
    fn strip_ghost_layer(comm: &ThreadComm, edit: impl Fn(&mut IndexMaps)) -> Result<(), MeshError> {
        let raw = structured_rect([2, 1], [0.0, 0.0], [2.0, 1.0]);
        let mut maps = IndexMaps::build(&raw, vec![0, 1], comm.rank())?;
        let (mut grid, faces) = build_local_topology(&raw, &maps)?;
        if comm.rank() == 0 {
            edit(&mut maps);
        }
        build_ghost_layer(&mut grid, &mut maps, &raw, faces, comm)
    }

    fn assert_detected_on(got: &[Result<(), MeshError>], detecting: usize, stage: &str) {
        for (rank, r) in got.iter().enumerate() {
            if rank == detecting {
                assert!(
                    matches!(r, Err(MeshError::PartitionInconsistency { rank: x, .. }) if *x == rank),
                    "rank {rank}: {r:?}"
                );
            } else {
                assert!(
                    matches!(r, Err(MeshError::PeerFailure { peer, stage: s, .. }) if *peer == detecting && s == stage),
                    "rank {rank}: {r:?}"
                );
            }
        }
    }

    #[test]
    fn ghost_owned_out_of_range_fails_every_rank() {
        let got = ThreadComm::run(2, |comm| strip_ghost_layer(&comm, |m| m.cell_owner[1] = 5));
        assert_detected_on(&got, 0, "ghost layer");
    }

    #[test]
    fn ghost_owned_by_this_rank_fails_every_rank() {
        let got = ThreadComm::run(2, |comm| strip_ghost_layer(&comm, |m| m.cell_owner[1] = 0));
        assert_detected_on(&got, 0, "ghost layer");
    }

    #[test]
    fn one_sided_neighbour_relation_is_rejected() {
        let got = ThreadComm::run(3, |comm| {
            let mut grid = Grid {
                rank: comm.rank(),
                ..Default::default()
            };
            // rank 0 lists rank 1, which lists nobody
            if comm.rank() == 0 {
                grid.halo.links.push(HaloLink {
                    rank: 1,
                    ..Default::default()
                });
            }
            verify_pattern(&grid, &comm)
        });
        assert!(matches!(got[0], Err(MeshError::PartitionInconsistency { rank: 0, .. })));
        assert!(matches!(got[1], Err(MeshError::PartitionInconsistency { rank: 1, .. })));
        assert!(matches!(
            &got[2],
            Err(MeshError::PeerFailure { rank: 2, peer: 0, stage }) if stage == "halo neighbours"
        ));
    }

    #[test]
    fn handshake_id_mismatch_is_rejected() {
        let got = ThreadComm::run(2, |comm| {
            let rank = comm.rank();
            let other = 1 - rank;
            let mut grid = Grid {
                rank,
                ..Default::default()
            };
            grid.cells
                .push(Cell::new(0, rank, CellType::Quadrilateral, Vec::new()));
            // rank 1 mirrors a cell rank 0 never sends
            let mirrored = if rank == 1 { 7 } else { other };
            grid.ghosts.push(Ghost::new(0, other, mirrored));
            grid.halo.links.push(HaloLink {
                rank: other,
                send_cells: vec![0],
                recv_ghosts: vec![0],
            });
            verify_pattern(&grid, &comm)
        });
        assert_detected_on(&got, 1, "halo handshake");
    }

    #[test]
    fn corner_neighbours_become_ghosts_without_faces() {
        // 2x2 quads; cell 3 touches cell 0 only at the centre node
        let raw = structured_rect([2, 2], [0.0, 0.0], [2.0, 2.0]);
        let got = ThreadComm::run(2, |comm| {
            let owner = vec![0, 1, 1, 1];
            let mut maps = IndexMaps::build(&raw, owner, comm.rank()).unwrap();
            let (mut grid, faces) = build_local_topology(&raw, &maps).unwrap();
            build_ghost_layer(&mut grid, &mut maps, &raw, faces, &comm).unwrap();
            grid
        });
        let ghosts: Vec<usize> = got[0].ghosts.iter().map(|g| g.global_id).collect();
        assert_eq!(ghosts, vec![1, 2, 3]);
        assert!(got[0].ghosts[2].cells.is_empty());
        assert_eq!(got[0].faces.iter().filter(|f| matches!(f.neighbor, FaceNeighbor::Ghost(_))).count(), 2);
        let centre = got[0].nodes.iter().find(|n| n.x == [1.0, 1.0, 0.0]).unwrap();
        assert_eq!(centre.ghosts.len(), 3);

        let sent: Vec<usize> = got[1].halo.links[0]
            .send_cells
            .iter()
            .map(|&c| got[1].cells[c].global_id)
            .collect();
        assert_eq!(sent, ghosts);
        assert_eq!(got[0].halo.links[0].send_cells, vec![0]);
    }

    #[test]
    fn exchange_moves_values_between_paired_lists() {
        let got = ThreadComm::run(2, |comm| {
            let other = 1 - comm.rank();
            let pattern = HaloPattern {
                links: vec![HaloLink {
                    rank: other,
                    send_cells: vec![0, 1],
                    recv_ghosts: vec![1, 0],
                }],
            };
            let mine = [10.0 * comm.rank() as f64, 10.0 * comm.rank() as f64 + 1.0];
            let mut ghosts = [0.0; 2];
            pattern
                .exchange(&comm, 77, 1, |c, out| out.push(mine[c]), |g, v| ghosts[g] = v[0])
                .unwrap();
            ghosts
        });
        assert_eq!(got[0], [11.0, 10.0]);
        assert_eq!(got[1], [1.0, 0.0]);
    }
}
