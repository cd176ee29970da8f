//! Affine transforms from 4x4 text matrices.
//!
//! The file holds 4 rows of 4 whitespace-separated numbers and is applied as
//! `[x y z 1] · T`, so the translation lives in the last row. Example, a
//! reflection across `x = 160000`:
//!
//! ```text
//! -1 0 0 0
//!  0 1 0 0
//!  0 0 1 0
//! 320000 0 0 1
//! ```

use crate::model::neuron::{Neuron, Point3};
use crate::transform::{TransformError, TransformResult};
use nalgebra::{Matrix3, Matrix4, RowVector4, Vector3};
use std::path::Path;

/// Row-vector affine transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    matrix: Matrix4<f64>,
}

impl AffineTransform {
    pub fn from_matrix(matrix: Matrix4<f64>) -> Self {
        Self { matrix }
    }

    pub fn identity() -> Self {
        Self::from_matrix(Matrix4::identity())
    }

    /// Builds the transform `p' = A p + b`.
    pub fn from_linear_and_offset(linear: Matrix3<f64>, offset: Vector3<f64>) -> Self {
        let mut matrix = Matrix4::identity();
        // Row-vector convention stores the transpose of A.
        matrix
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&linear.transpose());
        matrix
            .fixed_view_mut::<1, 3>(3, 0)
            .copy_from(&offset.transpose());
        Self { matrix }
    }

    /// Reflection across the plane `x = plane_x`.
    pub fn reflect_x(plane_x: f64) -> Self {
        Self::from_linear_and_offset(
            Matrix3::new(-1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0),
            Vector3::new(2.0 * plane_x, 0.0, 0.0),
        )
    }

    pub fn parse(text: &str, path: &Path) -> TransformResult<Self> {
        let malformed = |message: String| TransformError::MalformedAffineFile {
            path: path.to_path_buf(),
            message,
        };
        let rows: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect();
        if rows.len() != 4 {
            return Err(malformed(format!("expected 4 rows, found {}", rows.len())));
        }
        let mut values = Vec::with_capacity(16);
        for (row_index, row) in rows.iter().enumerate() {
            let numbers: Vec<f64> = row
                .split_whitespace()
                .map(|token| {
                    token
                        .parse()
                        .map_err(|_| malformed(format!("row {}: `{token}` is not a number", row_index + 1)))
                })
                .collect::<TransformResult<_>>()?;
            if numbers.len() != 4 {
                return Err(malformed(format!(
                    "row {} has {} entries, expected 4",
                    row_index + 1,
                    numbers.len()
                )));
            }
            values.extend(numbers);
        }
        Ok(Self::from_matrix(Matrix4::from_row_slice(&values)))
    }

    pub fn from_file(path: &Path) -> TransformResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, path)
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    pub fn inverse(&self) -> TransformResult<Self> {
        self.matrix
            .try_inverse()
            .map(Self::from_matrix)
            .ok_or(TransformError::SingularMatrix)
    }

    /// `self` followed by `next`.
    pub fn then(&self, next: &Self) -> Self {
        Self::from_matrix(self.matrix * next.matrix)
    }

    pub fn apply(&self, point: Point3) -> Point3 {
        let row = RowVector4::new(point[0], point[1], point[2], 1.0) * self.matrix;
        [row[0], row[1], row[2]]
    }

    pub fn apply_all(&self, points: &mut [Point3]) {
        for point in points {
            *point = self.apply(*point);
        }
    }
}

/// Applies `transform` to nodes and connectors and records `transform_file`.
pub fn affine_transform_neuron(
    neuron: &mut Neuron,
    transform: &AffineTransform,
    transform_file: &str,
) -> TransformResult<()> {
    let mut nodes = neuron.node_locations();
    transform.apply_all(&mut nodes);
    neuron.set_node_locations(&nodes)?;

    let mut connectors = neuron.connector_locations();
    transform.apply_all(&mut connectors);
    neuron.set_connector_locations(&connectors)?;

    neuron.append_name_suffix(" - affine transform");
    neuron.add_annotation(format!("affine transformed using {transform_file}"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::AffineTransform;
    use nalgebra::{Matrix3, Vector3};
    use std::path::Path;

    #[test]
    fn file_layout_puts_offset_in_last_row() {
        let text = "-1 0 0 0\n0 1 0 0\n0 0 1 0\n320000 0 0 1\n";
        let transform = AffineTransform::parse(text, Path::new("reflect.txt")).unwrap();
        assert_eq!(transform.apply([100000.0, 5.0, 6.0]), [220000.0, 5.0, 6.0]);
        assert_eq!(transform, AffineTransform::reflect_x(160000.0));
    }

    #[test]
    fn linear_and_offset_matches_column_form() {
        let linear = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 2.0);
        let transform = AffineTransform::from_linear_and_offset(linear, Vector3::new(1.0, 2.0, 3.0));
        // A * (1, 0, 1) + b
        assert_eq!(transform.apply([1.0, 0.0, 1.0]), [1.0, 3.0, 5.0]);
    }

    #[test]
    fn short_rows_are_rejected() {
        let err = AffineTransform::parse("1 0 0\n0 1 0 0\n0 0 1 0\n0 0 0 1", Path::new("t.txt"))
            .unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        let transform = AffineTransform::parse("0 0 0 0\n0 1 0 0\n0 0 1 0\n0 0 0 1", Path::new("t.txt"))
            .unwrap();
        assert!(transform.inverse().is_err());
    }
}
