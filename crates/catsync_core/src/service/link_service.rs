//! Linked-neuron resolution and push/pull of updates.
//!
//! # Responsibility
//! - Find the target neurons linked to a source neuron through
//!   `LINKED NEURON - ...` annotations.
//! - Replay the linked transform for each of them (push), or for each
//!   target neuron from its source (pull).
//!
//! # Invariants
//! - A linking annotation carried by more than one target neuron is reported
//!   and skipped, never resolved automatically.
//! - A recursive push restores the original source project on every exit
//!   path.

use crate::connection::{ProjectHandle, SyncContext};
use crate::model::link::{LinkRelation, LinkingAnnotation};
use crate::model::neuron::{ProjectId, SkeletonId};
use crate::service::error::{require_target, ServiceResult};
use crate::service::manipulate_service::ManipulateService;
use crate::service::options::{
    ElasticOptions, PushOptions, RadiusPruneOptions, TranslateOptions, VolumePruneOptions,
};
use crate::service::upload_service::UploadReport;
use crate::transform::elastic::FancTemplateWarp;
use crate::transform::translate::{TranslationUnit, DEFAULT_PIXEL_SIZE};
use log::{info, warn};
use std::collections::BTreeSet;
use std::path::Path;

/// One linking annotation, as stored and as parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCandidate {
    pub annotation: String,
    pub link: LinkingAnnotation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    NotLinked,
    /// More than one link matched.
    Ambiguous(Vec<LinkCandidate>),
}

/// Parses linking annotations out of annotation sets.
pub struct LinkResolver;

impl LinkResolver {
    /// Every parseable linking annotation; timestamps and unrelated
    /// annotations are ignored.
    pub fn links<I>(annotations: I) -> Vec<LinkCandidate>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        annotations
            .into_iter()
            .filter_map(|annotation| {
                let annotation = annotation.as_ref();
                LinkingAnnotation::parse(annotation)
                    .ok()
                    .map(|link| LinkCandidate {
                        annotation: annotation.to_string(),
                        link,
                    })
            })
            .collect()
    }

    /// Links pointing at source skeleton `source_skeleton_id` in
    /// `source_project_id`.
    pub fn candidates<I>(
        annotations: I,
        source_skeleton_id: SkeletonId,
        source_project_id: ProjectId,
    ) -> Vec<LinkCandidate>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self::links(annotations)
            .into_iter()
            .filter(|candidate| candidate.link.points_to(source_skeleton_id, source_project_id))
            .collect()
    }

    /// The single link to the given source neuron.
    pub fn resolve_unique<I>(
        annotations: I,
        source_skeleton_id: SkeletonId,
        source_project_id: ProjectId,
    ) -> Result<LinkCandidate, ResolveError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        exactly_one(Self::candidates(
            annotations,
            source_skeleton_id,
            source_project_id,
        ))
    }

    /// The single link of a neuron whose source is not known yet.
    pub fn sole_link<I>(annotations: I) -> Result<LinkCandidate, ResolveError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        exactly_one(Self::links(annotations))
    }
}

fn exactly_one(mut candidates: Vec<LinkCandidate>) -> Result<LinkCandidate, ResolveError> {
    match candidates.len() {
        0 => Err(ResolveError::NotLinked),
        1 => Ok(candidates.remove(0)),
        _ => Err(ResolveError::Ambiguous(candidates)),
    }
}

/// Outcome of a push or pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub uploads: UploadReport,
    /// Linking annotations that were found but not replayed.
    pub skipped_links: Vec<String>,
}

/// Push/pull use cases. Holds the context mutably because a recursive push
/// temporarily moves the source to the target project.
pub struct LinkService<'a> {
    ctx: &'a mut SyncContext,
    fanc_warp: Option<&'a FancTemplateWarp>,
}

impl<'a> LinkService<'a> {
    pub fn new(ctx: &'a mut SyncContext) -> Self {
        Self {
            ctx,
            fanc_warp: None,
        }
    }

    /// Warp used to replay elastic links; without one they are skipped.
    pub fn with_fanc_warp(mut self, warp: &'a FancTemplateWarp) -> Self {
        self.fanc_warp = Some(warp);
        self
    }

    pub fn push_all_updates_by_annotations(
        &mut self,
        annotations: &[String],
        options: &PushOptions,
    ) -> ServiceResult<Option<SyncReport>> {
        options.validate()?;
        let skeleton_ids = self.ctx.source.skeleton_ids_by_annotations(annotations)?;
        let prompt = format!(
            "Found {} source project neurons. Continue?",
            skeleton_ids.len()
        );
        if !self.ctx.operator().confirm(&prompt) {
            return Ok(None);
        }
        self.push_all_updates_by_skid(&skeleton_ids, options).map(Some)
    }

    /// Replays the linked transform onto every target neuron linked to one
    /// of `skeleton_ids`.
    ///
    /// With `recurse` (and dry run off) the updated target neurons are
    /// pushed on within the target project until no new links turn up.
    pub fn push_all_updates_by_skid(
        &mut self,
        skeleton_ids: &[SkeletonId],
        options: &PushOptions,
    ) -> ServiceResult<SyncReport> {
        options.validate()?;
        let target = require_target(&*self.ctx)?.clone();
        let original_source = self.ctx.source.clone();
        let result = self.push_rounds(&target, skeleton_ids.to_vec(), options);
        self.ctx.source = original_source;
        result
    }

    fn push_rounds(
        &mut self,
        target: &ProjectHandle,
        mut pending: Vec<SkeletonId>,
        options: &PushOptions,
    ) -> ServiceResult<SyncReport> {
        let recurse = options.recurse && !options.upload.dry_run;
        let mut visited: BTreeSet<(ProjectId, SkeletonId)> = BTreeSet::new();
        let mut report = SyncReport::default();

        while !pending.is_empty() {
            let all_target_annotations = target.api.annotation_list(target.project_id)?;
            let mut next = Vec::new();
            for source_skeleton_id in pending {
                if !visited.insert((self.ctx.source.project_id, source_skeleton_id)) {
                    continue;
                }
                let candidates = LinkResolver::candidates(
                    &all_target_annotations,
                    source_skeleton_id,
                    self.ctx.source.project_id,
                );
                for candidate in candidates {
                    if let Some(target_skeleton_id) =
                        self.push_one(target, source_skeleton_id, &candidate, options, &mut report)?
                    {
                        if recurse {
                            next.push(target_skeleton_id);
                        }
                    }
                }
            }
            if !recurse || next.is_empty() {
                break;
            }
            self.ctx.source = target.clone();
            self.ctx
                .operator()
                .notify(&format!("Recursing - now pushing updates to skids {next:?}"));
            info!(
                "event=push_recurse module=link status=ok count={} project_id={}",
                next.len(),
                target.project_id
            );
            pending = next;
        }
        Ok(report)
    }

    /// Handles one linking annotation; returns the linked target skeleton
    /// when exactly one exists and it is up to date after this call.
    fn push_one(
        &self,
        target: &ProjectHandle,
        source_skeleton_id: SkeletonId,
        candidate: &LinkCandidate,
        options: &PushOptions,
        report: &mut SyncReport,
    ) -> ServiceResult<Option<SkeletonId>> {
        let operator = self.ctx.operator();
        let target_skeleton_ids =
            target.skeleton_ids_by_annotations(std::slice::from_ref(&candidate.annotation))?;
        let target_skeleton_id = match target_skeleton_ids.as_slice() {
            [] => return Ok(None),
            [one] => *one,
            _ => {
                warn!(
                    "event=push_skipped module=link status=warn reason=multiple_targets skeleton_id={source_skeleton_id}"
                );
                operator.acknowledge(&format!(
                    "Multiple neurons in the target project with the same linking annotation. Skipping this push: {}",
                    candidate.annotation
                ));
                report.skipped_links.push(candidate.annotation.clone());
                return Ok(None);
            }
        };

        operator.notify(&format!(
            "Found in project id {}: '{}'",
            target.project_id, candidate.annotation
        ));
        if !options.skip_dates.is_empty()
            && self.recently_updated(target, target_skeleton_id, &options.skip_dates)?
        {
            operator.notify("Skipping upload because was already updated recently");
            report.skipped_links.push(candidate.annotation.clone());
            return Ok(Some(target_skeleton_id));
        }

        match self.dispatch(&candidate.link.relation, source_skeleton_id, options)? {
            Some(uploads) => {
                report.uploads.merge(uploads);
                Ok(Some(target_skeleton_id))
            }
            // Not replayed, so the target is stale and must not seed recursion.
            None => {
                report.skipped_links.push(candidate.annotation.clone());
                Ok(None)
            }
        }
    }

    fn recently_updated(
        &self,
        target: &ProjectHandle,
        target_skeleton_id: SkeletonId,
        skip_dates: &[String],
    ) -> ServiceResult<bool> {
        let annotations = target
            .api
            .annotations_for_skeletons(target.project_id, &[target_skeleton_id])?;
        Ok(annotations
            .get(&target_skeleton_id)
            .is_some_and(|names| {
                names
                    .iter()
                    .any(|name| skip_dates.iter().any(|date| name.contains(date.as_str())))
            }))
    }

    /// Runs the transform named by `relation` on one source skeleton.
    ///
    /// `None` when the relation cannot be replayed with the given options.
    fn dispatch(
        &self,
        relation: &LinkRelation,
        source_skeleton_id: SkeletonId,
        options: &PushOptions,
    ) -> ServiceResult<Option<UploadReport>> {
        let manipulate = ManipulateService::new(&*self.ctx);
        let operator = self.ctx.operator();
        let upload = options.replay_upload();
        let skeleton_ids = [source_skeleton_id];
        info!(
            "event=dispatch module=link status=start skeleton_id={source_skeleton_id} relation={relation}"
        );
        let report = match relation {
            LinkRelation::Copy => manipulate.copy_neurons_by_skid(&skeleton_ids, &upload)?,
            LinkRelation::Translation => {
                let Some(translation) = options.translation_nm else {
                    operator.notify(
                        "Translation link found but no translation was given; skipping.",
                    );
                    return Ok(None);
                };
                let translate = TranslateOptions {
                    translation,
                    unit: TranslationUnit::Nanometers,
                    pixel_size: DEFAULT_PIXEL_SIZE,
                    upload,
                };
                manipulate.translate_neurons_by_skid(&skeleton_ids, &translate)?
            }
            LinkRelation::Affine { transform_file } => {
                manipulate.affine_transform_by_skid(&skeleton_ids, Path::new(transform_file), &upload)?
            }
            LinkRelation::Elastic { flipped } => {
                let Some(warp) = self.fanc_warp else {
                    operator.notify("Elastic link found but no elastic transform is configured; skipping.");
                    return Ok(None);
                };
                let elastic = ElasticOptions {
                    left_right_flip: *flipped,
                    upload,
                    ..ElasticOptions::default()
                };
                manipulate.elastic_transform_fanc_by_skid(&skeleton_ids, warp, &elastic)?
            }
            LinkRelation::VolumePrune { volume_id, mode } => {
                let prune = VolumePruneOptions {
                    volume_id: *volume_id,
                    mode: *mode,
                    only_keep_largest_fragment: options.only_keep_largest_fragment,
                    upload,
                };
                manipulate.volume_prune_by_skid(&skeleton_ids, &prune)?
            }
            LinkRelation::RadiusPrune => {
                let prune = RadiusPruneOptions {
                    upload,
                    ..options.radius.clone()
                };
                manipulate.radius_prune_by_skid(&skeleton_ids, &prune)?
            }
            LinkRelation::Unspecified | LinkRelation::Other(_) => {
                operator.notify(&format!(
                    "No transform is known for link relation \"{relation}\"; skipping."
                ));
                return Ok(None);
            }
        };
        Ok(Some(report))
    }

    pub fn pull_all_updates_by_annotations(
        &mut self,
        annotations: &[String],
        options: &PushOptions,
    ) -> ServiceResult<Option<SyncReport>> {
        options.validate()?;
        let target = require_target(&*self.ctx)?;
        let skeleton_ids = target.skeleton_ids_by_annotations(annotations)?;
        let prompt = format!(
            "Found {} target project neurons. Continue?",
            skeleton_ids.len()
        );
        if !self.ctx.operator().confirm(&prompt) {
            return Ok(None);
        }
        self.pull_all_updates_by_skid(&skeleton_ids, options).map(Some)
    }

    /// For each target skeleton, replays its link from the source project.
    pub fn pull_all_updates_by_skid(
        &mut self,
        target_skeleton_ids: &[SkeletonId],
        options: &PushOptions,
    ) -> ServiceResult<SyncReport> {
        options.validate()?;
        let target = require_target(&*self.ctx)?;
        let annotations = target
            .api
            .annotations_for_skeletons(target.project_id, target_skeleton_ids)?;
        let operator = self.ctx.operator();
        let mut report = SyncReport::default();
        for target_skeleton_id in target_skeleton_ids {
            let names = annotations.get(target_skeleton_id).cloned().unwrap_or_default();
            let candidate = match LinkResolver::sole_link(&names) {
                Ok(candidate) => candidate,
                Err(ResolveError::NotLinked) => {
                    operator.notify(&format!(
                        "Skeleton {target_skeleton_id} has no linking annotation; skipping."
                    ));
                    continue;
                }
                Err(ResolveError::Ambiguous(candidates)) => {
                    operator.acknowledge(&format!(
                        "Skeleton {target_skeleton_id} has {} linking annotations; skipping.",
                        candidates.len()
                    ));
                    report
                        .skipped_links
                        .extend(candidates.into_iter().map(|candidate| candidate.annotation));
                    continue;
                }
            };
            if candidate.link.project_id != self.ctx.source.project_id {
                operator.notify(&format!(
                    "'{}' does not point into source project {}; skipping.",
                    candidate.annotation, self.ctx.source.project_id
                ));
                report.skipped_links.push(candidate.annotation);
                continue;
            }
            match self.dispatch(&candidate.link.relation, candidate.link.skeleton_id, options)? {
                Some(uploads) => report.uploads.merge(uploads),
                None => report.skipped_links.push(candidate.annotation),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::{LinkResolver, ResolveError};
    use crate::model::link::LinkRelation;

    const COPY: &str = "LINKED NEURON - copy of skeleton id 42 in project id 7 on server X";
    const TRANSLATION: &str =
        "LINKED NEURON - translation of skeleton id 42 in project id 7 on server X";

    #[test]
    fn candidates_filter_by_source_neuron() {
        let annotations = [
            COPY,
            "LINKED NEURON - copy of skeleton id 420 in project id 7 on server X",
            "LINKED NEURON - copy of skeleton id 42 in project id 70 on server X",
            "UPDATED FROM LINKED NEURON - 2024-01-01 10:00 AM",
        ];
        let found = LinkResolver::candidates(annotations, 42, 7);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].annotation, COPY);
        assert_eq!(found[0].link.relation, LinkRelation::Copy);
    }

    #[test]
    fn two_links_to_one_source_are_ambiguous() {
        let result = LinkResolver::resolve_unique([COPY, TRANSLATION], 42, 7);
        let Err(ResolveError::Ambiguous(candidates)) = result else {
            panic!("expected ambiguity, got {result:?}");
        };
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn sole_link_ignores_timestamps() {
        let found = LinkResolver::sole_link([
            "UPDATED FROM LINKED NEURON - 2024-01-01 10:00 AM",
            TRANSLATION,
        ])
        .unwrap();
        assert_eq!(found.link.relation, LinkRelation::Translation);
        assert_eq!(
            LinkResolver::sole_link(["descending"]),
            Err(ResolveError::NotLinked)
        );
    }
}
