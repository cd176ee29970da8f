//! Fetch, transform and re-upload source neurons.
//!
//! # Responsibility
//! - One entry point per transform, by skeleton id and by annotation.
//! - `get_*` variants return the transformed neurons without uploading.
//!
//! # Invariants
//! - Source neurons are fetched fresh for every call.
//! - Annotation-based entry points always confirm the batch size first.
//! - Each transform uploads with the link relation that replays it.

use crate::connection::SyncContext;
use crate::model::link::LinkRelation;
use crate::model::neuron::{Neuron, SkeletonId};
use crate::service::error::ServiceResult;
use crate::service::options::{
    ElasticOptions, RadiusPruneOptions, TranslateOptions, UploadOptions, VolumePruneOptions,
};
use crate::service::upload_service::{UploadReport, UploadService};
use crate::transform::affine::{affine_transform_neuron, AffineTransform};
use crate::transform::elastic::{
    apply_y_cutoff, elastic_transform_neuron, looks_like_microns, FancTemplateWarp, FancToTemplate,
    PointUnits, PointWarp,
};
use crate::transform::prune::{radius_prune_neuron, volume_prune_neuron};
use crate::transform::translate::translate_neuron;
use log::info;
use std::path::Path;

/// Transform-and-upload use cases over one `SyncContext`.
pub struct ManipulateService<'a> {
    ctx: &'a SyncContext,
}

impl<'a> ManipulateService<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    fn source_neurons(&self, skeleton_ids: &[SkeletonId]) -> ServiceResult<Vec<Neuron>> {
        let source = &self.ctx.source;
        info!(
            "event=fetch_source module=manipulate status=start project_id={} count={}",
            source.project_id,
            skeleton_ids.len()
        );
        Ok(source.api.get_neurons(source.project_id, skeleton_ids)?)
    }

    /// Source skeletons carrying `annotations`, or `None` if the operator
    /// declines `"<verb> N neurons. Continue?"`.
    fn confirm_batch(&self, verb: &str, annotations: &[String]) -> ServiceResult<Option<Vec<SkeletonId>>> {
        let skeleton_ids = self.ctx.source.skeleton_ids_by_annotations(annotations)?;
        let noun = if skeleton_ids.len() == 1 { "neuron" } else { "neurons" };
        let prompt = format!("{verb} {} {noun}. Continue?", skeleton_ids.len());
        if self.ctx.operator().confirm(&prompt) {
            Ok(Some(skeleton_ids))
        } else {
            Ok(None)
        }
    }

    fn upload(
        &self,
        neurons: Vec<Neuron>,
        relation: LinkRelation,
        options: &UploadOptions,
    ) -> ServiceResult<UploadReport> {
        UploadService::new(self.ctx).upload_or_update_neurons(neurons, &relation, options)
    }

    pub fn copy_neurons_by_annotations(
        &self,
        annotations: &[String],
        options: &UploadOptions,
    ) -> ServiceResult<Option<UploadReport>> {
        match self.confirm_batch("Duplicating", annotations)? {
            Some(skeleton_ids) => self.copy_neurons_by_skid(&skeleton_ids, options).map(Some),
            None => Ok(None),
        }
    }

    /// Uploads unmodified copies.
    pub fn copy_neurons_by_skid(
        &self,
        skeleton_ids: &[SkeletonId],
        options: &UploadOptions,
    ) -> ServiceResult<UploadReport> {
        let neurons = self.source_neurons(skeleton_ids)?;
        self.upload(neurons, LinkRelation::Copy, options)
    }

    pub fn get_translated_neurons(
        &self,
        skeleton_ids: &[SkeletonId],
        options: &TranslateOptions,
    ) -> ServiceResult<Vec<Neuron>> {
        options.validate()?;
        let offset = options.offset_nm();
        let mut neurons = self.source_neurons(skeleton_ids)?;
        for neuron in &mut neurons {
            translate_neuron(neuron, offset)?;
        }
        Ok(neurons)
    }

    pub fn translate_neurons_by_annotations(
        &self,
        annotations: &[String],
        options: &TranslateOptions,
    ) -> ServiceResult<Option<UploadReport>> {
        options.validate()?;
        match self.confirm_batch("Translating", annotations)? {
            Some(skeleton_ids) => self.translate_neurons_by_skid(&skeleton_ids, options).map(Some),
            None => Ok(None),
        }
    }

    pub fn translate_neurons_by_skid(
        &self,
        skeleton_ids: &[SkeletonId],
        options: &TranslateOptions,
    ) -> ServiceResult<UploadReport> {
        let neurons = self.get_translated_neurons(skeleton_ids, options)?;
        self.upload(neurons, LinkRelation::Translation, &options.upload)
    }

    pub fn get_affine_transformed_neurons(
        &self,
        skeleton_ids: &[SkeletonId],
        transform: &AffineTransform,
        transform_file: &str,
    ) -> ServiceResult<Vec<Neuron>> {
        let mut neurons = self.source_neurons(skeleton_ids)?;
        for neuron in &mut neurons {
            affine_transform_neuron(neuron, transform, transform_file)?;
        }
        Ok(neurons)
    }

    pub fn affine_transform_by_annotations(
        &self,
        annotations: &[String],
        transform_file: &Path,
        options: &UploadOptions,
    ) -> ServiceResult<Option<UploadReport>> {
        let transform = AffineTransform::from_file(transform_file)?;
        match self.confirm_batch("Applying affine transformation to", annotations)? {
            Some(skeleton_ids) => self
                .upload_affine(&skeleton_ids, &transform, transform_file, options)
                .map(Some),
            None => Ok(None),
        }
    }

    /// Applies the 4x4 matrix in `transform_file`; the file name is kept in
    /// the link so pushes can replay it.
    pub fn affine_transform_by_skid(
        &self,
        skeleton_ids: &[SkeletonId],
        transform_file: &Path,
        options: &UploadOptions,
    ) -> ServiceResult<UploadReport> {
        let transform = AffineTransform::from_file(transform_file)?;
        self.upload_affine(skeleton_ids, &transform, transform_file, options)
    }

    fn upload_affine(
        &self,
        skeleton_ids: &[SkeletonId],
        transform: &AffineTransform,
        transform_file: &Path,
        options: &UploadOptions,
    ) -> ServiceResult<UploadReport> {
        let file = transform_file.display().to_string();
        let neurons = self.get_affine_transformed_neurons(skeleton_ids, transform, &file)?;
        self.upload(
            neurons,
            LinkRelation::Affine {
                transform_file: file,
            },
            options,
        )
    }

    fn cut_below(&self, neuron: &mut Neuron, cutoff: f64) {
        self.ctx
            .operator()
            .notify(&format!("Applying y coordinate cutoff of {cutoff}"));
        if apply_y_cutoff(neuron, cutoff) > 0 {
            self.ctx.operator().notify(&format!(
                "{} was fragmented by the cutoff and has been healed.",
                neuron.name
            ));
        }
    }

    /// Warps source neurons with an arbitrary point warper.
    pub fn get_elastic_transformed_neurons(
        &self,
        skeleton_ids: &[SkeletonId],
        warp: &dyn PointWarp,
        options: &ElasticOptions,
    ) -> ServiceResult<Vec<Neuron>> {
        options.validate()?;
        let mut neurons = self.source_neurons(skeleton_ids)?;
        for neuron in &mut neurons {
            if let Some(cutoff) = options.y_cutoff {
                self.cut_below(neuron, cutoff);
            }
            self.ctx
                .operator()
                .notify(&format!("Transforming {}", neuron.name));
            elastic_transform_neuron(
                neuron,
                warp,
                options.upload.import_connectors,
                options.left_right_flip,
            )?;
        }
        Ok(neurons)
    }

    pub fn elastic_transform_by_skid(
        &self,
        skeleton_ids: &[SkeletonId],
        warp: &dyn PointWarp,
        options: &ElasticOptions,
    ) -> ServiceResult<UploadReport> {
        let neurons = self.get_elastic_transformed_neurons(skeleton_ids, warp, options)?;
        self.upload(
            neurons,
            LinkRelation::Elastic {
                flipped: options.left_right_flip,
            },
            &options.upload,
        )
    }

    fn input_units(&self, neuron: &Neuron, options: &ElasticOptions) -> PointUnits {
        if let Some(units) = options.input_units {
            return units;
        }
        if looks_like_microns(&neuron.node_locations())
            && self.ctx.operator().confirm(&format!(
                "Coordinates of \"{}\" look like microns, not nanometers. Treat them as microns?",
                neuron.name
            ))
        {
            PointUnits::Microns
        } else {
            PointUnits::Nanometers
        }
    }

    /// FANC to VNC template warp, reflecting when `left_right_flip` is set.
    pub fn get_fanc_to_template_neurons(
        &self,
        skeleton_ids: &[SkeletonId],
        warp: &FancTemplateWarp,
        options: &ElasticOptions,
    ) -> ServiceResult<Vec<Neuron>> {
        options.validate()?;
        let mut neurons = self.source_neurons(skeleton_ids)?;
        for neuron in &mut neurons {
            let input_units = self.input_units(neuron, options);
            if let Some(cutoff) = options.y_cutoff {
                let cutoff = match input_units {
                    PointUnits::Microns => cutoff / 1000.0,
                    PointUnits::Nanometers => cutoff,
                };
                self.cut_below(neuron, cutoff);
            }
            let fanc_to_template = FancToTemplate {
                warp,
                input_units,
                reflect: options.left_right_flip,
            };
            self.ctx
                .operator()
                .notify(&format!("Transforming {}", neuron.name));
            elastic_transform_neuron(
                neuron,
                &fanc_to_template,
                options.upload.import_connectors,
                options.left_right_flip,
            )?;
        }
        Ok(neurons)
    }

    pub fn elastic_transform_fanc_by_annotations(
        &self,
        annotations: &[String],
        warp: &FancTemplateWarp,
        options: &ElasticOptions,
    ) -> ServiceResult<Option<UploadReport>> {
        options.validate()?;
        match self.confirm_batch("Elastically transforming", annotations)? {
            Some(skeleton_ids) => self
                .elastic_transform_fanc_by_skid(&skeleton_ids, warp, options)
                .map(Some),
            None => Ok(None),
        }
    }

    pub fn elastic_transform_fanc_by_skid(
        &self,
        skeleton_ids: &[SkeletonId],
        warp: &FancTemplateWarp,
        options: &ElasticOptions,
    ) -> ServiceResult<UploadReport> {
        let neurons = self.get_fanc_to_template_neurons(skeleton_ids, warp, options)?;
        self.upload(
            neurons,
            LinkRelation::Elastic {
                flipped: options.left_right_flip,
            },
            &options.upload,
        )
    }

    pub fn get_volume_pruned_neurons(
        &self,
        skeleton_ids: &[SkeletonId],
        options: &VolumePruneOptions,
    ) -> ServiceResult<Vec<Neuron>> {
        let source = &self.ctx.source;
        let volume = self
            .ctx
            .volumes
            .get_or_fetch(source.api.as_ref(), source.project_id, options.volume_id)?;
        let mut neurons = self.source_neurons(skeleton_ids)?;
        for neuron in &mut neurons {
            let report = volume_prune_neuron(
                neuron,
                &volume,
                options.mode,
                options.only_keep_largest_fragment,
            )?;
            for warning in &report.warnings {
                self.ctx.operator().acknowledge(warning);
            }
            if report.dropped_fragments > 0 {
                self.ctx.operator().notify(&format!(
                    "{}: kept the largest fragment, dropped {}.",
                    neuron.name, report.dropped_fragments
                ));
            }
        }
        Ok(neurons)
    }

    pub fn volume_prune_by_annotations(
        &self,
        annotations: &[String],
        options: &VolumePruneOptions,
    ) -> ServiceResult<Option<UploadReport>> {
        match self.confirm_batch("Volume pruning", annotations)? {
            Some(skeleton_ids) => self.volume_prune_by_skid(&skeleton_ids, options).map(Some),
            None => Ok(None),
        }
    }

    pub fn volume_prune_by_skid(
        &self,
        skeleton_ids: &[SkeletonId],
        options: &VolumePruneOptions,
    ) -> ServiceResult<UploadReport> {
        let neurons = self.get_volume_pruned_neurons(skeleton_ids, options)?;
        self.upload(
            neurons,
            LinkRelation::VolumePrune {
                volume_id: options.volume_id,
                mode: options.mode,
            },
            &options.upload,
        )
    }

    pub fn get_radius_pruned_neurons(
        &self,
        skeleton_ids: &[SkeletonId],
        options: &RadiusPruneOptions,
    ) -> ServiceResult<Vec<Neuron>> {
        options.validate()?;
        let mut neurons = self.source_neurons(skeleton_ids)?;
        for neuron in &mut neurons {
            radius_prune_neuron(neuron, options.radius, options.keep_larger_radii)?;
        }
        Ok(neurons)
    }

    pub fn radius_prune_by_annotations(
        &self,
        annotations: &[String],
        options: &RadiusPruneOptions,
    ) -> ServiceResult<Option<UploadReport>> {
        options.validate()?;
        match self.confirm_batch("Radius pruning", annotations)? {
            Some(skeleton_ids) => self.radius_prune_by_skid(&skeleton_ids, options).map(Some),
            None => Ok(None),
        }
    }

    pub fn radius_prune_by_skid(
        &self,
        skeleton_ids: &[SkeletonId],
        options: &RadiusPruneOptions,
    ) -> ServiceResult<UploadReport> {
        let neurons = self.get_radius_pruned_neurons(skeleton_ids, options)?;
        self.upload(neurons, LinkRelation::RadiusPrune, &options.upload)
    }
}
