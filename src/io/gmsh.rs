//! Gmsh `.msh` reader.
//!
//! # Supported format
//! - ASCII `.msh` version **2.2**.
//! - Cell element types: 2 (triangle), 3 (quad), 4 (tet), 5 (hex),
//!   6 (prism), 7 (pyramid). Line (1) and point (15) elements are accepted
//!   as boundary entities of 2D meshes or ignored.
//!
//! # Boundary regions
//! Elements one dimension below the mesh dimension become boundary faces.
//! Their first tag is the physical group; the region is named from
//! `$PhysicalNames` when present, `BC_<tag>` otherwise. Regions are numbered
//! in ascending physical tag order.
//!
//! # Limitations
//! - Binary files are not supported.
//! - `.msh` v4.x (block-based) is not supported.
//! - Higher-order elements are not supported.

use crate::io::{GridRawData, MeshReader};
use crate::mesh_error::MeshError;
use crate::topology::cell_type::CellType;
use hashbrown::HashMap;
use std::collections::BTreeMap;
use std::io::Read;

const ORIGIN: &str = "gmsh";

/// Gmsh `.msh` reader for ASCII v2.2 meshes.
#[derive(Debug, Default, Clone)]
pub struct GmshReader;

struct Element {
    code: u32,
    physical: Option<u32>,
    nodes: Vec<u64>,
}

impl GmshReader {
    fn err(section: &str, message: impl Into<String>) -> MeshError {
        MeshError::format(ORIGIN, section, message)
    }

    fn parse_version(line: &str) -> Result<&str, MeshError> {
        let mut parts = line.split_whitespace();
        let version = parts
            .next()
            .ok_or_else(|| Self::err("MeshFormat", "missing mesh format version"))?;
        let file_type = parts
            .next()
            .ok_or_else(|| Self::err("MeshFormat", "missing mesh format type"))?;
        if file_type != "0" {
            return Err(Self::err("MeshFormat", "binary .msh files are not supported"));
        }
        Ok(version)
    }

    /// Node count and dimension of every element code we understand.
    fn element_shape(code: u32) -> Option<(usize, usize)> {
        match code {
            1 => Some((2, 1)),  // line
            2 => Some((3, 2)),  // triangle
            3 => Some((4, 2)),  // quad
            4 => Some((4, 3)),  // tet
            5 => Some((8, 3)),  // hex
            6 => Some((6, 3)),  // prism
            7 => Some((5, 3)),  // pyramid
            15 => Some((1, 0)), // point
            _ => None,
        }
    }

    fn parse<T: std::str::FromStr>(raw: Option<&str>, section: &str, what: &str) -> Result<T, MeshError> {
        let raw = raw.ok_or_else(|| Self::err(section, format!("missing {what}")))?;
        raw.parse::<T>()
            .map_err(|_| Self::err(section, format!("invalid {what}: {raw}")))
    }

    fn expect_end<'a>(
        lines: &mut impl Iterator<Item = &'a str>,
        section: &str,
    ) -> Result<(), MeshError> {
        let end = lines
            .next()
            .ok_or_else(|| Self::err(section, format!("missing $End{section}")))?;
        if end.trim() != format!("$End{section}") {
            return Err(Self::err(section, format!("missing $End{section}")));
        }
        Ok(())
    }
}

impl MeshReader for GmshReader {
    fn read<R: Read>(&self, mut reader: R) -> Result<GridRawData, MeshError> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        let mut lines = contents.lines();

        let mut version: Option<String> = None;
        let mut physical_names: BTreeMap<(usize, u32), String> = BTreeMap::new();
        let mut nodes: Vec<(u64, [f64; 3])> = Vec::new();
        let mut elements: Vec<Element> = Vec::new();
        let mut saw_nodes = false;
        let mut saw_elements = false;

        while let Some(line) = lines.next() {
            match line.trim() {
                "$MeshFormat" => {
                    let format_line = lines
                        .next()
                        .ok_or_else(|| Self::err("MeshFormat", "missing MeshFormat"))?;
                    version = Some(Self::parse_version(format_line)?.to_string());
                    Self::expect_end(&mut lines, "MeshFormat")?;
                }
                "$PhysicalNames" => {
                    let count: usize = Self::parse(lines.next(), "PhysicalNames", "name count")?;
                    for _ in 0..count {
                        let entry = lines
                            .next()
                            .ok_or_else(|| Self::err("PhysicalNames", "unexpected end of names"))?;
                        let mut parts = entry.splitn(3, char::is_whitespace);
                        let dim: usize = Self::parse(parts.next(), "PhysicalNames", "dimension")?;
                        let tag: u32 = Self::parse(parts.next(), "PhysicalNames", "tag")?;
                        let name = parts
                            .next()
                            .map(|s| s.trim().trim_matches('"').to_string())
                            .ok_or_else(|| Self::err("PhysicalNames", "missing name"))?;
                        physical_names.insert((dim, tag), name);
                    }
                    Self::expect_end(&mut lines, "PhysicalNames")?;
                }
                "$Nodes" => {
                    saw_nodes = true;
                    let count: usize = Self::parse(lines.next(), "Nodes", "node count")?;
                    for _ in 0..count {
                        let node_line = lines
                            .next()
                            .ok_or_else(|| Self::err("Nodes", "unexpected end of node list"))?;
                        let mut parts = node_line.split_whitespace();
                        let id: u64 = Self::parse(parts.next(), "Nodes", "node id")?;
                        let x: f64 = Self::parse(parts.next(), "Nodes", "x coordinate")?;
                        let y: f64 = Self::parse(parts.next(), "Nodes", "y coordinate")?;
                        let z: f64 = Self::parse(parts.next(), "Nodes", "z coordinate")?;
                        nodes.push((id, [x, y, z]));
                    }
                    Self::expect_end(&mut lines, "Nodes")?;
                }
                "$Elements" => {
                    saw_elements = true;
                    let count: usize = Self::parse(lines.next(), "Elements", "element count")?;
                    for _ in 0..count {
                        let elem_line = lines
                            .next()
                            .ok_or_else(|| Self::err("Elements", "unexpected end of element list"))?;
                        let mut parts = elem_line.split_whitespace();
                        let _id: u64 = Self::parse(parts.next(), "Elements", "element id")?;
                        let code: u32 = Self::parse(parts.next(), "Elements", "element type")?;
                        let (node_count, _) = Self::element_shape(code).ok_or_else(|| {
                            Self::err("Elements", format!("unsupported element type: {code}"))
                        })?;
                        let num_tags: usize = Self::parse(parts.next(), "Elements", "tag count")?;
                        let mut physical = None;
                        for t in 0..num_tags {
                            let tag: u32 = Self::parse(parts.next(), "Elements", "element tag")?;
                            if t == 0 {
                                physical = Some(tag);
                            }
                        }
                        let mut conn = Vec::with_capacity(node_count);
                        for _ in 0..node_count {
                            conn.push(Self::parse::<u64>(parts.next(), "Elements", "element node id")?);
                        }
                        elements.push(Element {
                            code,
                            physical,
                            nodes: conn,
                        });
                    }
                    Self::expect_end(&mut lines, "Elements")?;
                }
                _ => {
                    // ignore other sections
                }
            }
        }

        let version = version.unwrap_or_else(|| "2.2".to_string());
        if version != "2.2" {
            return Err(Self::err(
                "MeshFormat",
                format!("unsupported gmsh version: {version}"),
            ));
        }
        if !saw_nodes {
            return Err(Self::err("Nodes", "missing $Nodes section"));
        }
        if !saw_elements {
            return Err(Self::err("Elements", "missing $Elements section"));
        }

        let mut raw = GridRawData::new();
        let mut node_index: HashMap<u64, usize> = HashMap::with_capacity(nodes.len());
        for (id, xyz) in &nodes {
            if node_index.insert(*id, raw.push_node(*xyz)).is_some() {
                return Err(Self::err("Nodes", format!("duplicate node id {id}")));
            }
        }
        let resolve = |ids: &[u64]| -> Result<Vec<usize>, MeshError> {
            ids.iter()
                .map(|id| {
                    node_index
                        .get(id)
                        .copied()
                        .ok_or_else(|| Self::err("Elements", format!("unknown node id {id}")))
                })
                .collect()
        };

        let dim = elements
            .iter()
            .filter_map(|e| Self::element_shape(e.code).map(|(_, d)| d))
            .max()
            .unwrap_or(0);
        if dim < 2 {
            return Err(Self::err("Elements", "mesh declares zero cells"));
        }

        // Regions in ascending physical tag order.
        let mut tags: Vec<u32> = elements
            .iter()
            .filter(|e| Self::element_shape(e.code).map(|(_, d)| d) == Some(dim - 1))
            .filter_map(|e| e.physical)
            .collect();
        tags.sort_unstable();
        tags.dedup();
        let mut region_of_tag = HashMap::new();
        for tag in tags {
            let name = physical_names
                .get(&(dim - 1, tag))
                .cloned()
                .unwrap_or_else(|| format!("BC_{tag}"));
            region_of_tag.insert(tag, raw.region(&name));
        }

        for e in &elements {
            let Some((_, edim)) = Self::element_shape(e.code) else {
                continue;
            };
            if edim == dim {
                let ct = CellType::from_gmsh(e.code).ok_or_else(|| {
                    Self::err("Elements", format!("element type {} is not a cell", e.code))
                })?;
                let conn = resolve(&e.nodes)?;
                raw.push_cell(ct, &conn);
            } else if edim + 1 == dim {
                if let Some(&region) = e.physical.as_ref().and_then(|t| region_of_tag.get(t)) {
                    let conn = resolve(&e.nodes)?;
                    raw.push_boundary_face(region, &conn);
                }
            }
        }

        raw.validate(ORIGIN)?;
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_HEX: &str = "$MeshFormat
2.2 0 8
$EndMeshFormat
$PhysicalNames
2
2 1 \"wall\"
3 2 \"fluid\"
$EndPhysicalNames
$Nodes
12
1 0 0 0
2 1 0 0
3 1 1 0
4 0 1 0
5 0 0 1
6 1 0 1
7 1 1 1
8 0 1 1
9 0 0 2
10 1 0 2
11 1 1 2
12 0 1 2
$EndNodes
$Elements
4
1 5 2 2 1 1 2 3 4 5 6 7 8
2 5 2 2 1 5 6 7 8 9 10 11 12
3 3 2 1 1 1 4 3 2
4 3 2 7 1 9 10 11 12
$EndElements
";

    #[test]
    fn reads_cells_and_named_regions() {
        let raw = GmshReader.read(TWO_HEX.as_bytes()).unwrap();
        assert_eq!(raw.node_count(), 12);
        assert_eq!(raw.cell_count(), 2);
        assert_eq!(raw.cell_types, vec![CellType::Hexahedron; 2]);
        assert_eq!(raw.cell_nodes(1), &[4, 5, 6, 7, 8, 9, 10, 11]);
        assert_eq!(raw.boco_names, vec!["wall".to_string(), "BC_7".to_string()]);
        assert_eq!(raw.boundary_faces(0).next(), Some(&[0usize, 3, 2, 1][..]));
    }

    #[test]
    fn rejects_binary_and_missing_sections() {
        let binary = "$MeshFormat\n2.2 1 8\n$EndMeshFormat\n";
        assert!(GmshReader.read(binary.as_bytes()).is_err());

        let no_elements = "$MeshFormat\n2.2 0 8\n$EndMeshFormat\n$Nodes\n1\n1 0 0 0\n$EndNodes\n";
        let err = GmshReader.read(no_elements.as_bytes()).unwrap_err();
        assert!(matches!(err, MeshError::MeshFormat { ref section, .. } if section == "Elements"));
    }

    #[test]
    fn unknown_node_reference_is_a_format_error() {
        let bad = TWO_HEX.replace("2 5 2 2 1 5 6 7 8 9 10 11 12", "2 5 2 2 1 5 6 7 8 9 10 11 99");
        assert!(GmshReader.read(bad.as_bytes()).is_err());
    }
}
