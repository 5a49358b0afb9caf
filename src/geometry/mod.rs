//! Face and cell geometry for the local grid.
//!
//! [`compute_geometry`] is purely local. Ghost centroids come from their
//! owners afterwards through [`Grid::sync_ghost_geometry`].

pub mod metrics;

use crate::mesh_error::MeshError;
use crate::topology::grid::{Face, Grid};
use metrics::{FaceMetrics, Vec3, add, dot, edge_metrics, mean, norm, polygon_metrics, scale, sub};

fn degenerate(rank: usize, entity: String, detail: String) -> MeshError {
    MeshError::DegenerateGeometry {
        rank,
        entity,
        detail,
    }
}

/// Fill face centroids, normals and areas, then cell volumes, centroids and
/// length scales.
///
/// Face normals end up pointing out of the parent cell; a face whose node
/// order gave the opposite orientation has its node list reversed so the
/// order and the normal agree. Every cell must have positive volume and a
/// closed surface: `|Σ A_f| <= closure_tolerance * Σ |A_f|`.
pub fn compute_geometry(grid: &mut Grid, closure_tolerance: f64) -> Result<(), MeshError> {
    let rank = grid.rank;
    let two_d = grid.dim == 2;
    let Grid {
        nodes,
        faces,
        cells,
        ..
    } = grid;

    let points = |ids: &[usize]| -> Vec<Vec3> { ids.iter().map(|&n| nodes[n].x).collect() };
    let centers: Vec<Vec3> = cells.iter().map(|c| mean(&points(&c.nodes))).collect();

    for face in faces.iter_mut() {
        let pts = points(&face.nodes);
        let m = face_metrics(face, &pts, two_d).map_err(|detail| {
            degenerate(rank, format!("face {}", face.id), detail)
        })?;
        let area = m.area();
        if !(area > 0.0) {
            return Err(degenerate(
                rank,
                format!("face {}", face.id),
                format!("area {area:e} with nodes {:?}", face.nodes),
            ));
        }
        let mut area_vector = m.area_vector;
        if dot(area_vector, sub(m.centroid, centers[face.parent])) < 0.0 {
            area_vector = scale(area_vector, -1.0);
            face.nodes.reverse();
        }
        face.centroid = m.centroid;
        face.area = area;
        face.normal = scale(area_vector, 1.0 / area);
    }

    let (pyramid, apex_share) = if two_d {
        (0.5, 2.0 / 3.0)
    } else {
        (1.0 / 3.0, 0.75)
    };
    for (cell, &center) in cells.iter_mut().zip(&centers) {
        let mut volume = 0.0;
        let mut moment = [0.0; 3];
        let mut closure = [0.0; 3];
        let mut surface = 0.0;
        for &f in &cell.faces {
            let face = &faces[f];
            let outward = if face.parent == cell.id {
                face.area_vector()
            } else {
                scale(face.area_vector(), -1.0)
            };
            let arm = sub(face.centroid, center);
            let v = pyramid * dot(arm, outward);
            volume += v;
            moment = add(moment, scale(add(center, scale(arm, apex_share)), v));
            closure = add(closure, outward);
            surface += face.area;
        }

        if !(volume > 0.0) || !volume.is_finite() {
            return Err(degenerate(
                rank,
                format!("cell {} (global {})", cell.id, cell.global_id),
                format!("volume {volume:e}"),
            ));
        }
        let gap = norm(closure);
        if gap > closure_tolerance * surface {
            return Err(degenerate(
                rank,
                format!("cell {} (global {})", cell.id, cell.global_id),
                format!("surface is not closed: |sum A_f| = {gap:e}, sum |A_f| = {surface:e}"),
            ));
        }

        cell.volume = volume;
        cell.centroid = scale(moment, 1.0 / volume);
        cell.length_scale = if two_d { volume.sqrt() } else { volume.cbrt() };
    }

    if log::log_enabled!(log::Level::Debug) {
        let total: f64 = cells.iter().map(|c| c.volume).sum();
        let smallest = cells.iter().map(|c| c.volume).fold(f64::INFINITY, f64::min);
        log::debug!(
            "[rank {rank}] geometry: {} faces, {} cells, total volume {total:e}, smallest {smallest:e}",
            faces.len(),
            cells.len()
        );
    }
    Ok(())
}

fn face_metrics(face: &Face, pts: &[Vec3], two_d: bool) -> Result<FaceMetrics, String> {
    match (two_d, pts) {
        (true, &[a, b]) => Ok(edge_metrics(a, b)),
        (true, _) => Err(format!("2D face has {} nodes", pts.len())),
        (false, _) if pts.len() >= 3 => Ok(polygon_metrics(pts)),
        (false, _) => Err(format!("3D face has {} nodes {:?}", pts.len(), face.nodes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::index_maps::IndexMaps;
    use crate::algs::local_topology::build_local_topology;
    use crate::algs::meshgen::{structured_box, structured_box_tets, structured_rect};
    use crate::io::GridRawData;
    use approx::assert_relative_eq;

    fn single_rank(raw: &GridRawData) -> Grid {
        let maps = IndexMaps::build(raw, vec![0; raw.cell_count()], 0).unwrap();
        build_local_topology(raw, &maps).unwrap().0
    }

    #[test]
    fn hex_box_volumes_and_centroids() {
        let raw = structured_box([2, 2, 2], [0.0; 3], [2.0, 2.0, 1.0]);
        let mut grid = single_rank(&raw);
        compute_geometry(&mut grid, 1e-10).unwrap();
        for cell in &grid.cells {
            assert_relative_eq!(cell.volume, 0.5, epsilon = 1e-14);
            assert_relative_eq!(cell.length_scale, 0.5f64.cbrt(), epsilon = 1e-14);
        }
        let c = &grid.cells[0].centroid;
        assert_relative_eq!(c[0], 0.5, epsilon = 1e-14);
        assert_relative_eq!(c[2], 0.25, epsilon = 1e-14);
        for face in &grid.faces {
            assert_relative_eq!(norm(face.normal), 1.0, epsilon = 1e-14);
            let out = sub(face.centroid, grid.cells[face.parent].centroid);
            assert!(dot(out, face.normal) > 0.0);
        }
    }

    #[test]
    fn tet_box_fills_the_box() {
        let raw = structured_box_tets([2, 1, 1], [0.0; 3], [1.0; 3]);
        let mut grid = single_rank(&raw);
        compute_geometry(&mut grid, 1e-10).unwrap();
        let total: f64 = grid.cells.iter().map(|c| c.volume).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-13);
        assert!(grid.cells.iter().all(|c| c.volume > 0.0));
    }

    #[test]
    fn quad_rect_uses_areas() {
        let raw = structured_rect([2, 1], [0.0, 0.0], [4.0, 1.0]);
        let mut grid = single_rank(&raw);
        compute_geometry(&mut grid, 1e-10).unwrap();
        assert_relative_eq!(grid.cells[1].volume, 2.0);
        assert_relative_eq!(grid.cells[1].centroid[0], 3.0, epsilon = 1e-14);
        assert_relative_eq!(grid.cells[1].length_scale, 2.0f64.sqrt());
        let interior = grid.faces.iter().find(|f| f.bc() < 0).unwrap();
        assert_eq!(interior.normal, [1.0, 0.0, 0.0]);
        assert_relative_eq!(interior.area, 1.0);
    }

    #[test]
    fn collapsed_cell_is_rejected() {
        let mut raw = structured_box([1, 1, 1], [0.0; 3], [1.0; 3]);
        for xyz in &mut raw.coords {
            xyz[2] = 0.0;
        }
        let mut grid = single_rank(&raw);
        let err = compute_geometry(&mut grid, 1e-10).unwrap_err();
        assert!(matches!(err, MeshError::DegenerateGeometry { .. }));
    }

    #[test]
    fn open_surface_is_rejected() {
        let raw = structured_box([1, 1, 1], [0.0; 3], [1.0; 3]);
        let mut grid = single_rank(&raw);
        grid.cells[0].faces.pop();
        let err = compute_geometry(&mut grid, 1e-10).unwrap_err();
        match err {
            MeshError::DegenerateGeometry { detail, .. } => assert!(detail.contains("not closed")),
            other => panic!("unexpected {other}"),
        }
    }
}
