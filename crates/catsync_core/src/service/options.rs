//! Option structs for the upload, transform and push entry points.
//!
//! # Invariants
//! - Options are validated once, at the entry point, before any remote call.
//! - Defaults are the safe choice: dry run on, refuse to update on.

use crate::model::link::VolumePruneMode;
use crate::model::neuron::Point3;
use crate::service::error::{ServiceError, ServiceResult};
use crate::transform::elastic::{PointUnits, FANC_Y_CUTOFF_NM};
use crate::transform::translate::{translation_in_nm, TranslationUnit, DEFAULT_PIXEL_SIZE};
use crate::transform::PRIMARY_NEURITE_RADIUS;

/// How neurons are written to the target project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Report planned actions without writing anything.
    pub dry_run: bool,
    /// Leave already-linked target neurons alone.
    pub refuse_to_update: bool,
    pub import_connectors: bool,
    pub reuse_existing_connectors: bool,
    /// Also write the reverse link onto the source neuron.
    pub annotate_source_neuron: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            refuse_to_update: true,
            import_connectors: false,
            reuse_existing_connectors: true,
            annotate_source_neuron: false,
        }
    }
}

impl UploadOptions {
    /// Options for a real run with every other setting at its default.
    pub fn live() -> Self {
        Self {
            dry_run: false,
            ..Self::default()
        }
    }

    /// One-line summary shown at the end of a dry run.
    pub fn describe(&self) -> String {
        format!(
            "annotate_source_neuron={}, import_connectors={}, reuse_existing_connectors={}, refuse_to_update={}",
            self.annotate_source_neuron,
            self.import_connectors,
            self.reuse_existing_connectors,
            self.refuse_to_update
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslateOptions {
    pub translation: Point3,
    pub unit: TranslationUnit,
    /// Voxel size in nm; only used with `TranslationUnit::Pixels`.
    pub pixel_size: Point3,
    pub upload: UploadOptions,
}

impl TranslateOptions {
    pub fn new(translation: Point3, unit: TranslationUnit) -> Self {
        Self {
            translation,
            unit,
            pixel_size: DEFAULT_PIXEL_SIZE,
            upload: UploadOptions::default(),
        }
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.translation.iter().any(|value| !value.is_finite()) {
            return Err(ServiceError::InvalidOptions(format!(
                "translation must be finite, got {:?}",
                self.translation
            )));
        }
        if self.unit == TranslationUnit::Pixels
            && self
                .pixel_size
                .iter()
                .any(|value| !value.is_finite() || *value <= 0.0)
        {
            return Err(ServiceError::InvalidOptions(format!(
                "pixel size must be 3 positive numbers, got {:?}",
                self.pixel_size
            )));
        }
        Ok(())
    }

    pub fn offset_nm(&self) -> Point3 {
        translation_in_nm(self.translation, self.unit, self.pixel_size)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumePruneOptions {
    pub volume_id: u64,
    pub mode: VolumePruneMode,
    pub only_keep_largest_fragment: bool,
    pub upload: UploadOptions,
}

impl VolumePruneOptions {
    pub fn new(volume_id: u64, mode: VolumePruneMode) -> Self {
        Self {
            volume_id,
            mode,
            only_keep_largest_fragment: false,
            upload: UploadOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RadiusPruneOptions {
    pub radius: f64,
    /// Keep `radius >= threshold` instead of `radius == threshold`.
    pub keep_larger_radii: bool,
    pub upload: UploadOptions,
}

impl Default for RadiusPruneOptions {
    fn default() -> Self {
        Self {
            radius: PRIMARY_NEURITE_RADIUS,
            keep_larger_radii: true,
            upload: UploadOptions::default(),
        }
    }
}

impl RadiusPruneOptions {
    pub fn validate(&self) -> ServiceResult<()> {
        if !self.radius.is_finite() || self.radius < 0.0 {
            return Err(ServiceError::InvalidOptions(format!(
                "radius must be a non-negative number, got {}",
                self.radius
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElasticOptions {
    /// Mirror across the template midplane.
    pub left_right_flip: bool,
    /// Drop nodes with `y` below this value (nm) before warping.
    pub y_cutoff: Option<f64>,
    /// Units of the source coordinates; `None` asks when they look like
    /// microns.
    pub input_units: Option<PointUnits>,
    pub upload: UploadOptions,
}

impl Default for ElasticOptions {
    fn default() -> Self {
        Self {
            left_right_flip: false,
            y_cutoff: Some(FANC_Y_CUTOFF_NM),
            input_units: None,
            upload: UploadOptions::default(),
        }
    }
}

impl ElasticOptions {
    pub fn validate(&self) -> ServiceResult<()> {
        match self.y_cutoff {
            Some(cutoff) if !cutoff.is_finite() => Err(ServiceError::InvalidOptions(format!(
                "y cutoff must be finite, got {cutoff}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Settings for replaying linked transforms.
#[derive(Debug, Clone, PartialEq)]
pub struct PushOptions {
    /// Keep pushing through chains of linked neurons in the target project.
    pub recurse: bool,
    /// Skip target neurons carrying an annotation that contains any of
    /// these strings.
    pub skip_dates: Vec<String>,
    /// Offset (nm) replayed for `translation of` links.
    pub translation_nm: Option<Point3>,
    /// Settings replayed for `radius pruned of` links.
    pub radius: RadiusPruneOptions,
    pub only_keep_largest_fragment: bool,
    pub upload: UploadOptions,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            recurse: false,
            skip_dates: Vec::new(),
            translation_nm: None,
            radius: RadiusPruneOptions::default(),
            only_keep_largest_fragment: false,
            upload: UploadOptions::default(),
        }
    }
}

impl PushOptions {
    pub fn validate(&self) -> ServiceResult<()> {
        if self.skip_dates.iter().any(|date| date.trim().is_empty()) {
            return Err(ServiceError::InvalidOptions(
                "skip dates must not be empty strings".to_string(),
            ));
        }
        if let Some(offset) = self.translation_nm {
            if offset.iter().any(|value| !value.is_finite()) {
                return Err(ServiceError::InvalidOptions(format!(
                    "translation must be finite, got {offset:?}"
                )));
            }
        }
        self.radius.validate()
    }

    /// Upload options used for every replayed link.
    ///
    /// Pushes only ever update, so refusing to update is turned off.
    pub fn replay_upload(&self) -> UploadOptions {
        UploadOptions {
            refuse_to_update: false,
            ..self.upload.clone()
        }
    }
}
