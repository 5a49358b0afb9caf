//! MeshError: unified error type for fvmesh public APIs
//!
//! Every stage of the grid pipeline returns `Result<_, MeshError>`. None of
//! these errors is recoverable for a distributed run: callers either agree on
//! the failure collectively (see [`crate::pipeline`]) or terminate every rank
//! through [`MeshError::abort`].

use crate::algs::communicator::Communicator;
use crate::partitioning::PartitionError;
use crate::topology::grid::Field;
use thiserror::Error;

/// Unified error type for grid construction and reconstruction.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Malformed or incomplete mesh source.
    #[error("mesh format error in `{origin}` [{section}]: {message}")]
    MeshFormat {
        origin: String,
        section: String,
        message: String,
    },
    /// Topologically invalid mesh (isolated or non-manifold cells).
    #[error("degenerate mesh: {0}")]
    DegenerateMesh(String),
    /// Non-positive volume/area or an open cell surface.
    #[error("rank {rank}: degenerate geometry on {entity}: {detail}")]
    DegenerateGeometry {
        rank: usize,
        entity: String,
        detail: String,
    },
    /// Partition assignment and id resolution disagree. Always a logic bug.
    #[error("rank {rank}: partition inconsistency: {message}")]
    PartitionInconsistency { rank: usize, message: String },
    /// A face matched several boundary regions, or none while having no neighbor.
    #[error("rank {rank}: boundary conflict on face with global nodes {face_nodes:?}: {}", describe_regions(.regions))]
    BcConflict {
        rank: usize,
        face_nodes: Vec<usize>,
        regions: Vec<usize>,
    },
    /// A solver update produced a non-finite value.
    #[error("rank {rank}: divergence in cell {cell} (global {global_cell}), field {field}")]
    Divergence {
        rank: usize,
        cell: usize,
        global_cell: usize,
        field: Field,
    },
    /// Another rank failed at the same collective stage.
    #[error("rank {rank}: stage `{stage}` failed on rank {peer}")]
    PeerFailure {
        rank: usize,
        peer: usize,
        stage: String,
    },
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error("communication error: {0}")]
    Comm(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn describe_regions(regions: &[usize]) -> String {
    if regions.is_empty() {
        "face has no neighbor and matches no boundary region".to_string()
    } else {
        format!("face matches several boundary regions {regions:?}")
    }
}

impl MeshError {
    /// Shorthand for a [`MeshError::MeshFormat`] value.
    pub fn format(
        origin: impl Into<String>,
        section: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        MeshError::MeshFormat {
            origin: origin.into(),
            section: section.into(),
            message: message.into(),
        }
    }

    /// Report the error with the responsible rank and terminate every rank.
    pub fn abort<C: Communicator + ?Sized>(&self, comm: &C) -> ! {
        log::error!("[rank {}] fatal: {self}", comm.rank());
        comm.abort(1)
    }
}
