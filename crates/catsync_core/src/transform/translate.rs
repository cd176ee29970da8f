//! Constant-offset translation.

use crate::model::neuron::{Neuron, Point3};
use crate::transform::{TransformError, TransformResult};
use std::str::FromStr;

/// Default voxel size in nm, used for pixel translations.
pub const DEFAULT_PIXEL_SIZE: Point3 = [4.0, 4.0, 40.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranslationUnit {
    #[default]
    Nanometers,
    Pixels,
}

impl FromStr for TranslationUnit {
    type Err = TransformError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "nm" => Ok(Self::Nanometers),
            "pixel" | "pixels" | "px" => Ok(Self::Pixels),
            other => Err(TransformError::InvalidUnit(other.to_string())),
        }
    }
}

/// Converts a translation to nanometers.
pub fn translation_in_nm(translation: Point3, unit: TranslationUnit, pixel_size: Point3) -> Point3 {
    match unit {
        TranslationUnit::Nanometers => translation,
        TranslationUnit::Pixels => [
            translation[0] * pixel_size[0],
            translation[1] * pixel_size[1],
            translation[2] * pixel_size[2],
        ],
    }
}

pub fn translate_points(points: &mut [Point3], offset: Point3) {
    for point in points {
        for axis in 0..3 {
            point[axis] += offset[axis];
        }
    }
}

/// Shifts nodes and connectors by `offset_nm` and records it.
pub fn translate_neuron(neuron: &mut Neuron, offset_nm: Point3) -> TransformResult<()> {
    let mut nodes = neuron.node_locations();
    translate_points(&mut nodes, offset_nm);
    neuron.set_node_locations(&nodes)?;

    let mut connectors = neuron.connector_locations();
    translate_points(&mut connectors, offset_nm);
    neuron.set_connector_locations(&connectors)?;

    neuron.append_name_suffix(" - translated");
    neuron.add_annotation(format!(
        "translated by ({}, {}, {}) nm",
        offset_nm[0], offset_nm[1], offset_nm[2]
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{translate_neuron, translation_in_nm, TranslationUnit, DEFAULT_PIXEL_SIZE};
    use crate::model::neuron::{Neuron, Node};

    #[test]
    fn pixels_scale_by_voxel_size() {
        let offset = translation_in_nm([1.0, 2.0, 3.0], TranslationUnit::Pixels, DEFAULT_PIXEL_SIZE);
        assert_eq!(offset, [4.0, 8.0, 120.0]);
    }

    #[test]
    fn unknown_unit_is_rejected() {
        assert!("furlong".parse::<TranslationUnit>().is_err());
        assert_eq!("nm".parse::<TranslationUnit>().unwrap(), TranslationUnit::Nanometers);
    }

    #[test]
    fn renames_and_annotates() {
        let mut neuron = Neuron::new(1, "DN1");
        neuron.nodes.push(Node::new(1, None, [1.0, 1.0, 1.0], 1.0));
        translate_neuron(&mut neuron, [10.0, 0.0, -1.0]).unwrap();
        assert_eq!(neuron.name, "DN1 - translated");
        assert_eq!(neuron.nodes[0].location, [11.0, 1.0, 0.0]);
        assert!(neuron.annotations.contains("translated by (10, 0, -1) nm"));
    }
}
