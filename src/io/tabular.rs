//! Plain-text tabular mesh format.
//!
//! ```text
//! # comment
//! nodes 4
//! 0.0 0.0 0.0
//! ...
//! cells 1
//! tet 0 1 2 3
//! boundary wall 4
//! 0 2 1
//! ...
//! ```
//!
//! Node ids are 0-based positions in the `nodes` block. Blocks may appear in
//! any order after `nodes`; a `boundary` block may be repeated for the same
//! region name. Blank lines and `#` comments are ignored.

use crate::io::{GridRawData, MeshReader};
use crate::mesh_error::MeshError;
use crate::topology::cell_type::CellType;
use std::io::{BufRead, BufReader, Read};

const ORIGIN: &str = "tabular";

#[derive(Debug, Default, Clone)]
pub struct TabularReader;

fn err(section: &str, line_no: usize, message: impl std::fmt::Display) -> MeshError {
    MeshError::format(ORIGIN, section, format!("line {line_no}: {message}"))
}

fn parse_count(token: Option<&str>, section: &str, line_no: usize) -> Result<usize, MeshError> {
    let token = token.ok_or_else(|| err(section, line_no, "missing count"))?;
    token
        .parse()
        .map_err(|_| err(section, line_no, format!("invalid count `{token}`")))
}

fn parse_ids<'a>(
    tokens: impl Iterator<Item = &'a str>,
    section: &str,
    line_no: usize,
) -> Result<Vec<usize>, MeshError> {
    tokens
        .map(|t| {
            t.parse::<usize>()
                .map_err(|_| err(section, line_no, format!("invalid node id `{t}`")))
        })
        .collect()
}

impl MeshReader for TabularReader {
    fn read<R: Read>(&self, reader: R) -> Result<GridRawData, MeshError> {
        // Strip comments and blank lines up front, keeping 1-based line numbers.
        let mut lines = Vec::new();
        for (i, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let content = line.split('#').next().unwrap_or("").trim().to_string();
            if !content.is_empty() {
                lines.push((i + 1, content));
            }
        }

        let mut raw = GridRawData::new();
        let mut saw_nodes = false;
        let mut cursor = lines.iter();
        while let Some((line_no, header)) = cursor.next() {
            let mut tokens = header.split_whitespace();
            match tokens.next() {
                Some("nodes") => {
                    if saw_nodes {
                        return Err(err("nodes", *line_no, "duplicate nodes block"));
                    }
                    saw_nodes = true;
                    let count = parse_count(tokens.next(), "nodes", *line_no)?;
                    for _ in 0..count {
                        let (n, row) = cursor
                            .next()
                            .ok_or_else(|| err("nodes", *line_no, "unexpected end of node block"))?;
                        let xyz: Vec<f64> = row
                            .split_whitespace()
                            .map(|t| {
                                t.parse::<f64>()
                                    .map_err(|_| err("nodes", *n, format!("invalid coordinate `{t}`")))
                            })
                            .collect::<Result<_, _>>()?;
                        match xyz.as_slice() {
                            [x, y] => raw.push_node([*x, *y, 0.0]),
                            [x, y, z] => raw.push_node([*x, *y, *z]),
                            _ => return Err(err("nodes", *n, "expected 2 or 3 coordinates")),
                        };
                    }
                }
                Some("cells") => {
                    if !saw_nodes {
                        return Err(err("cells", *line_no, "cells block before nodes block"));
                    }
                    let count = parse_count(tokens.next(), "cells", *line_no)?;
                    for _ in 0..count {
                        let (n, row) = cursor
                            .next()
                            .ok_or_else(|| err("cells", *line_no, "unexpected end of cell block"))?;
                        let mut parts = row.split_whitespace();
                        let name = parts.next().unwrap_or_default();
                        let ct = CellType::from_name(name)
                            .ok_or_else(|| err("cells", *n, format!("unknown cell type `{name}`")))?;
                        let ids = parse_ids(parts, "cells", *n)?;
                        raw.push_cell(ct, &ids);
                    }
                }
                Some("boundary") => {
                    if !saw_nodes {
                        return Err(err("boundary", *line_no, "boundary block before nodes block"));
                    }
                    let name = tokens
                        .next()
                        .ok_or_else(|| err("boundary", *line_no, "missing region name"))?;
                    let count = parse_count(tokens.next(), "boundary", *line_no)?;
                    let region = raw.region(name);
                    for _ in 0..count {
                        let (n, row) = cursor.next().ok_or_else(|| {
                            err("boundary", *line_no, "unexpected end of boundary block")
                        })?;
                        let ids = parse_ids(row.split_whitespace(), "boundary", *n)?;
                        raw.push_boundary_face(region, &ids);
                    }
                }
                Some(other) => {
                    return Err(err("header", *line_no, format!("unknown block `{other}`")));
                }
                None => {}
            }
        }

        if !saw_nodes {
            return Err(MeshError::format(ORIGIN, "nodes", "missing nodes block"));
        }
        raw.validate(ORIGIN)?;
        Ok(raw)
    }
}
