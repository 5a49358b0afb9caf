//! Local grid entities and element templates.

pub mod cell_type;
pub mod grid;

pub use cell_type::CellType;
pub use grid::{
    BC_GHOST, BC_INTERIOR, BoundaryRegion, Cell, CellRef, CellState, Face, FaceNeighbor, Field,
    Ghost, Grid, NUM_FIELDS, Node,
};
