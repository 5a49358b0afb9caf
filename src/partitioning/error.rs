//! Partitioning errors for fvmesh

use thiserror::Error;

/// Errors from the graph partitioners and the collective partition step.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// Requested part count is zero or exceeds the number of vertices.
    #[error("cannot split {vertices} vertices into {n_parts} parts")]
    InvalidPartCount { n_parts: usize, vertices: usize },
    /// The assignment does not cover every vertex exactly once.
    #[error("partition has {got} entries, expected {expected}")]
    LengthMismatch { got: usize, expected: usize },
    /// A vertex was assigned to a part outside `0..n_parts`.
    #[error("vertex {vertex} assigned to part {part}, only {n_parts} parts exist")]
    PartOutOfRange {
        vertex: usize,
        part: usize,
        n_parts: usize,
    },
    /// The partitioning rank reported a failure.
    #[error("partitioner failed on rank {0}")]
    Remote(usize),
    /// Other errors (e.g. METIS wrapper failures)
    #[error("partitioner error: {0}")]
    Backend(String),
}
