//! Vector helpers and face/cell metric primitives.
//!
//! Faces are polygons (3D) or segments (2D). Polygon metrics are taken from
//! the fan of sub-triangles around the node average, which is exact for
//! planar faces and gives a consistent area vector for warped ones.

pub type Vec3 = [f64; 3];

pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn scale(a: Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn norm(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

/// Arithmetic mean of `points`; the origin for an empty slice.
pub fn mean(points: &[Vec3]) -> Vec3 {
    if points.is_empty() {
        return [0.0; 3];
    }
    let sum = points.iter().fold([0.0; 3], |acc, &p| add(acc, p));
    scale(sum, 1.0 / points.len() as f64)
}

/// Metrics of a single face: area vector (normal times area, orientation
/// following the node order) and centroid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceMetrics {
    pub area_vector: Vec3,
    pub centroid: Vec3,
}

impl FaceMetrics {
    pub fn area(&self) -> f64 {
        norm(self.area_vector)
    }
}

/// Polygon face in 3D. Sub-triangle `i` spans the node average and the edge
/// `(i, i + 1)`; the centroid weights each sub-triangle centroid by its area.
pub fn polygon_metrics(points: &[Vec3]) -> FaceMetrics {
    let center = mean(points);
    let mut area_vector = [0.0; 3];
    let mut weighted = [0.0; 3];
    let mut total = 0.0;
    for (i, &a) in points.iter().enumerate() {
        let b = points[(i + 1) % points.len()];
        let tri = scale(cross(sub(a, center), sub(b, center)), 0.5);
        let w = norm(tri);
        area_vector = add(area_vector, tri);
        weighted = add(weighted, scale(add(add(center, a), b), w / 3.0));
        total += w;
    }
    let centroid = if total > 0.0 {
        scale(weighted, 1.0 / total)
    } else {
        center
    };
    FaceMetrics {
        area_vector,
        centroid,
    }
}

/// Edge face of a 2D mesh in the xy-plane: midpoint, length, and the in-plane
/// normal obtained by rotating the edge clockwise.
pub fn edge_metrics(a: Vec3, b: Vec3) -> FaceMetrics {
    let d = sub(b, a);
    FaceMetrics {
        area_vector: [d[1], -d[0], 0.0],
        centroid: scale(add(a, b), 0.5),
    }
}
