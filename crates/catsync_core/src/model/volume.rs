//! Triangle-mesh volumes used for pruning.
//!
//! # Invariants
//! - Every face indexes into `vertices`.
//! - Containment assumes a closed mesh; open meshes give best-effort answers.

use crate::model::neuron::Point3;
use serde::{Deserialize, Serialize};

/// Ray direction for containment tests, skewed off the axes so rays do not
/// graze shared triangle edges of axis-aligned meshes.
const RAY_DIRECTION: Point3 = [1.0, 0.000_123_7, 0.000_071_3];
const EPSILON: f64 = 1e-12;

/// Closed triangle mesh fetched from the volume manager of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub volume_id: u64,
    pub name: String,
    pub vertices: Vec<Point3>,
    pub faces: Vec<[usize; 3]>,
}

impl Volume {
    /// Axis-aligned box spanning `min`..`max`, as 12 triangles.
    pub fn axis_aligned_box(volume_id: u64, name: impl Into<String>, min: Point3, max: Point3) -> Self {
        let vertices = vec![
            [min[0], min[1], min[2]],
            [max[0], min[1], min[2]],
            [max[0], max[1], min[2]],
            [min[0], max[1], min[2]],
            [min[0], min[1], max[2]],
            [max[0], min[1], max[2]],
            [max[0], max[1], max[2]],
            [min[0], max[1], max[2]],
        ];
        let faces = vec![
            [0, 1, 2],
            [0, 2, 3],
            [4, 6, 5],
            [4, 7, 6],
            [0, 5, 1],
            [0, 4, 5],
            [3, 2, 6],
            [3, 6, 7],
            [0, 3, 7],
            [0, 7, 4],
            [1, 5, 6],
            [1, 6, 2],
        ];
        Self {
            volume_id,
            name: name.into(),
            vertices,
            faces,
        }
    }

    /// Axis-aligned bounding box as `(min, max)`.
    pub fn bounds(&self) -> Option<(Point3, Point3)> {
        let first = *self.vertices.first()?;
        let mut min = first;
        let mut max = first;
        for vertex in &self.vertices {
            for axis in 0..3 {
                min[axis] = min[axis].min(vertex[axis]);
                max[axis] = max[axis].max(vertex[axis]);
            }
        }
        Some((min, max))
    }

    /// Ray-parity containment test.
    pub fn contains(&self, point: Point3) -> bool {
        let Some((min, max)) = self.bounds() else {
            return false;
        };
        if (0..3).any(|axis| point[axis] < min[axis] || point[axis] > max[axis]) {
            return false;
        }

        let mut crossings = 0usize;
        for face in &self.faces {
            let (Some(a), Some(b), Some(c)) = (
                self.vertices.get(face[0]),
                self.vertices.get(face[1]),
                self.vertices.get(face[2]),
            ) else {
                continue;
            };
            if ray_hits_triangle(point, RAY_DIRECTION, *a, *b, *c) {
                crossings += 1;
            }
        }
        crossings % 2 == 1
    }
}

fn sub(a: Point3, b: Point3) -> Point3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: Point3, b: Point3) -> Point3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: Point3, b: Point3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

// Moller-Trumbore, counting only hits in front of the origin.
fn ray_hits_triangle(origin: Point3, direction: Point3, a: Point3, b: Point3, c: Point3) -> bool {
    let edge1 = sub(b, a);
    let edge2 = sub(c, a);
    let h = cross(direction, edge2);
    let det = dot(edge1, h);
    if det.abs() < EPSILON {
        return false;
    }
    let inv_det = 1.0 / det;
    let s = sub(origin, a);
    let u = inv_det * dot(s, h);
    if !(0.0..=1.0).contains(&u) {
        return false;
    }
    let q = cross(s, edge1);
    let v = inv_det * dot(direction, q);
    if v < 0.0 || u + v > 1.0 {
        return false;
    }
    inv_det * dot(edge2, q) > EPSILON
}

#[cfg(test)]
mod tests {
    use super::Volume;

    #[test]
    fn box_contains_interior_points_only() {
        let volume = Volume::axis_aligned_box(1, "box", [0.0, 0.0, 0.0], [10.0, 10.0, 10.0]);
        assert!(volume.contains([5.0, 5.0, 5.0]));
        assert!(volume.contains([0.5, 9.5, 2.0]));
        assert!(!volume.contains([11.0, 5.0, 5.0]));
        assert!(!volume.contains([5.0, -1.0, 5.0]));
    }

    #[test]
    fn empty_volume_contains_nothing() {
        let volume = Volume {
            volume_id: 2,
            name: "empty".to_string(),
            vertices: Vec::new(),
            faces: Vec::new(),
        };
        assert!(!volume.contains([0.0, 0.0, 0.0]));
    }
}
