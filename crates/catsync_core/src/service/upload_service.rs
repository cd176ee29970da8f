//! Upload-or-update of neurons into the target project.
//!
//! # Responsibility
//! - Decide per neuron whether to create a new target skeleton or overwrite
//!   the one already linked to it.
//! - Keep the linking annotation and the `UPDATED FROM LINKED NEURON`
//!   timestamp on every uploaded neuron.
//!
//! # Invariants
//! - A dry run issues read calls only.
//! - A neuron linked from more than one target skeleton is never uploaded.
//! - Overwriting manually edited nodes or renaming a target neuron always
//!   needs operator confirmation.

use crate::connection::{ProjectHandle, SyncContext};
use crate::model::link::{updated_from_annotation, LinkRelation, LinkingAnnotation, LINK_PREFIX};
use crate::model::neuron::{ConnectorId, Neuron, SkeletonId};
use crate::remote::api::{NodeDetail, UploadRequest};
use crate::service::error::{require_target, ServiceResult};
use crate::service::housekeeping_service::unlinked_connector_ids;
use crate::service::options::UploadOptions;
use chrono::Local;
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};

/// Why a neuron was not uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Several target skeletons carry the same linking annotation.
    MultipleLinkedNeurons(Vec<SkeletonId>),
    /// Operator declined renaming the linked neuron.
    NameMismatchDeclined,
    /// Operator declined overwriting manually edited nodes.
    EditedNodesDeclined,
    RefuseToUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadAction {
    Created { skeleton_id: SkeletonId },
    Updated { skeleton_id: SkeletonId },
    /// Dry run: would upload as a new skeleton.
    WouldCreate,
    /// Dry run: would overwrite `skeleton_id`.
    WouldUpdate { skeleton_id: SkeletonId },
    Skipped(SkipReason),
}

/// Result for one source neuron.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub source_skeleton_id: SkeletonId,
    pub name: String,
    pub action: UploadAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub outcomes: Vec<UploadOutcome>,
    /// Target connectors that lost every link during this batch.
    pub newly_unlinked_connectors: Vec<ConnectorId>,
    /// Source neurons whose reverse link could not be written.
    pub source_annotation_failures: Vec<SkeletonId>,
}

impl UploadReport {
    /// Target skeletons written by this batch.
    pub fn written_skeleton_ids(&self) -> Vec<SkeletonId> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match outcome.action {
                UploadAction::Created { skeleton_id } | UploadAction::Updated { skeleton_id } => {
                    Some(skeleton_id)
                }
                _ => None,
            })
            .collect()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.action, UploadAction::Skipped(_)))
            .count()
    }

    pub fn merge(&mut self, other: UploadReport) {
        self.outcomes.extend(other.outcomes);
        self.newly_unlinked_connectors
            .extend(other.newly_unlinked_connectors);
        self.source_annotation_failures
            .extend(other.source_annotation_failures);
    }
}

enum Plan {
    Create,
    Update { skeleton_id: SkeletonId, neuron_id: u64 },
}

/// Writes transformed neurons to the target project of a context.
pub struct UploadService<'a> {
    ctx: &'a SyncContext,
}

impl<'a> UploadService<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Uploads each neuron as new, or overwrites the target neuron linked to
    /// it by `relation`.
    ///
    /// Every neuron's `skeleton_id` must still be the id of the source
    /// neuron it came from.
    pub fn upload_or_update_neurons(
        &self,
        neurons: Vec<Neuron>,
        relation: &LinkRelation,
        options: &UploadOptions,
    ) -> ServiceResult<UploadReport> {
        let target = require_target(self.ctx)?;
        let operator = self.ctx.operator();
        let timestamp = Local::now().format("%Y-%m-%d %I:%M %p").to_string();

        let unlinked_before = if options.dry_run {
            BTreeSet::new()
        } else {
            unlinked_connector_ids(target)?.into_iter().collect()
        };

        let mut report = UploadReport::default();
        for mut neuron in neurons {
            let source_skeleton_id = neuron.skeleton_id;
            let link = LinkingAnnotation::new(
                relation.clone(),
                source_skeleton_id,
                self.ctx.source.project_id,
                self.ctx.source.server.clone(),
            )
            .to_annotation();
            let linked = target.skeleton_ids_by_annotations(std::slice::from_ref(&link))?;
            neuron.remove_annotations_containing(LINK_PREFIX);

            let plan = match linked.as_slice() {
                [] => {
                    operator.notify(&format!(
                        "Uploading \"{}\" to project {} as a new skeleton.",
                        neuron.name, target.project_id
                    ));
                    neuron.add_annotation(link.clone());
                    neuron.add_annotation(updated_from_annotation(&timestamp));
                    Plan::Create
                }
                [linked_skeleton_id] => {
                    match self.prepare_update(target, &mut neuron, *linked_skeleton_id, &timestamp, options)? {
                        Ok(plan) => plan,
                        Err(reason) => {
                            report.outcomes.push(skipped(&neuron, source_skeleton_id, reason));
                            continue;
                        }
                    }
                }
                many => {
                    operator.notify(&format!(
                        "Found multiple neurons annotated with \"{link}\" in target project. Go fix that! Skipping upload for this neuron."
                    ));
                    warn!(
                        "event=upload_skipped module=upload status=warn reason=multiple_links skeleton_id={source_skeleton_id}"
                    );
                    report.outcomes.push(skipped(
                        &neuron,
                        source_skeleton_id,
                        SkipReason::MultipleLinkedNeurons(many.to_vec()),
                    ));
                    continue;
                }
            };

            if options.dry_run {
                let action = match plan {
                    Plan::Create => {
                        operator.notify(&format!(
                            "Dry run: would create a new skeleton for \"{}\".",
                            neuron.name
                        ));
                        UploadAction::WouldCreate
                    }
                    Plan::Update { skeleton_id, .. } => {
                        operator.notify(&format!(
                            "Dry run: would update skeleton {skeleton_id} with \"{}\".",
                            neuron.name
                        ));
                        UploadAction::WouldUpdate { skeleton_id }
                    }
                };
                info!(
                    "event=upload_planned module=upload status=ok skeleton_id={source_skeleton_id}"
                );
                report.outcomes.push(UploadOutcome {
                    source_skeleton_id,
                    name: neuron.name.clone(),
                    action,
                });
                continue;
            }

            if neuron.n_fragments() > 1 {
                let joins = neuron.heal();
                info!(
                    "event=heal_fragments module=upload status=ok skeleton_id={source_skeleton_id} joins={joins}"
                );
            }
            let request = match plan {
                Plan::Create => UploadRequest {
                    import_tags: true,
                    import_annotations: true,
                    import_connectors: options.import_connectors,
                    reuse_existing_connectors: options.reuse_existing_connectors,
                    ..UploadRequest::default()
                },
                Plan::Update {
                    skeleton_id,
                    neuron_id,
                } => UploadRequest {
                    skeleton_id: Some(skeleton_id),
                    neuron_id: Some(neuron_id),
                    force_id: true,
                    import_tags: true,
                    import_annotations: true,
                    import_connectors: options.import_connectors,
                    reuse_existing_connectors: options.reuse_existing_connectors,
                },
            };
            let response = target.api.upload_neuron(target.project_id, &neuron, &request)?;
            info!(
                "event=upload_done module=upload status=ok source_skeleton_id={source_skeleton_id} target_skeleton_id={}",
                response.skeleton_id
            );

            if options.annotate_source_neuron
                && !self.annotate_source(target, relation, source_skeleton_id, response.skeleton_id)
            {
                report.source_annotation_failures.push(source_skeleton_id);
            }

            let action = if request.force_id {
                UploadAction::Updated {
                    skeleton_id: response.skeleton_id,
                }
            } else {
                UploadAction::Created {
                    skeleton_id: response.skeleton_id,
                }
            };
            operator.notify(&format!("{}: Done with upload or update.", neuron.name));
            report.outcomes.push(UploadOutcome {
                source_skeleton_id,
                name: neuron.name,
                action,
            });
        }

        if options.dry_run {
            operator.notify(&format!(
                "Dry run: nothing was uploaded. Turn dry run off to upload with settings: {}",
                options.describe()
            ));
            return Ok(report);
        }

        let newly_unlinked: Vec<ConnectorId> = unlinked_connector_ids(target)?
            .into_iter()
            .filter(|connector_id| !unlinked_before.contains(connector_id))
            .collect();
        if !newly_unlinked.is_empty() {
            warn!(
                "event=unlinked_connectors module=upload status=warn count={}",
                newly_unlinked.len()
            );
            operator.acknowledge(&format!(
                "This upload caused some connectors in the target project to become unlinked from any skeleton. \
                 (This can harmlessly result from deleting connectors from the source project, or it may indicate a bug.) \
                 You may want to clean up the new unlinked connectors: {newly_unlinked:?}"
            ));
        }
        report.newly_unlinked_connectors = newly_unlinked;
        Ok(report)
    }

    /// Checks a linked target neuron before it is overwritten.
    ///
    /// The inner `Err` is a skip, not a failure.
    fn prepare_update(
        &self,
        target: &ProjectHandle,
        neuron: &mut Neuron,
        linked_skeleton_id: SkeletonId,
        timestamp: &str,
        options: &UploadOptions,
    ) -> ServiceResult<Result<Plan, SkipReason>> {
        let operator = self.ctx.operator();
        let linked = target.api.get_neuron(target.project_id, linked_skeleton_id)?;
        let connectors = if options.import_connectors { ", connectors," } else { "" };
        operator.notify(&format!(
            "{}: Found linked neuron with skeleton ID {linked_skeleton_id} in target project. \
             Updating its treenodes{connectors} and annotations to match the source neuron.",
            neuron.name
        ));

        if neuron.name != linked.name {
            let prompt = format!(
                "WARNING: The linked neuron's name is \"{}\" but was expected to be \"{}\". \
                 Continuing will rename the linked neuron to the expected name. Proceed?",
                linked.name, neuron.name
            );
            if !operator.confirm(&prompt) {
                return Ok(Err(SkipReason::NameMismatchDeclined));
            }
        }

        let node_ids: Vec<_> = linked.nodes.iter().map(|node| node.node_id).collect();
        let details = target.api.node_details(target.project_id, &node_ids)?;
        let edited = edited_nodes(&details);
        if !edited.is_empty() {
            let logins: BTreeMap<u64, String> = target
                .api
                .user_list()?
                .into_iter()
                .map(|user| (user.user_id, user.login))
                .collect();
            let mut lines = vec![format!(
                "WARNING: The linked neuron has been manually edited, with {} nodes modified. \
                 Those changes will get thrown away if this update is allowed to continue.",
                edited.len()
            )];
            for detail in &edited {
                let editor = logins
                    .get(&detail.editor_id)
                    .cloned()
                    .unwrap_or_else(|| detail.editor_id.to_string());
                lines.push(format!(
                    "  node {}  edited {}  by {editor}",
                    detail.node_id,
                    detail.edition_time.format("%Y-%m-%d %H:%M:%S")
                ));
            }
            operator.notify(&lines.join("\n"));
            if !operator.confirm("OK to proceed and throw away the above changes?") {
                operator.notify(&format!("Skipping update for \"{}\"", neuron.name));
                return Ok(Err(SkipReason::EditedNodesDeclined));
            }
        }

        if options.refuse_to_update {
            operator.notify("refuse_to_update set to true. Skipping.");
            return Ok(Err(SkipReason::RefuseToUpdate));
        }

        neuron.add_annotation(updated_from_annotation(timestamp));
        neuron.annotations.extend(linked.annotations.iter().cloned());
        let neuron_id = target.api.neuron_id(target.project_id, linked_skeleton_id)?;
        Ok(Ok(Plan::Update {
            skeleton_id: linked_skeleton_id,
            neuron_id,
        }))
    }

    /// Writes the reverse link onto the source neuron; failures only warn.
    fn annotate_source(
        &self,
        target: &ProjectHandle,
        relation: &LinkRelation,
        source_skeleton_id: SkeletonId,
        target_skeleton_id: SkeletonId,
    ) -> bool {
        let reverse = LinkingAnnotation::new(
            relation.clone(),
            target_skeleton_id,
            target.project_id,
            target.server.clone(),
        )
        .to_annotation();
        let source = &self.ctx.source;
        match source
            .api
            .add_annotations(source.project_id, &[source_skeleton_id], &[reverse])
        {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "event=annotate_source module=upload status=error skeleton_id={source_skeleton_id} error={err}"
                );
                self.ctx.operator().acknowledge(
                    "annotate_source_neuron was requested, but failed. You may not have permissions \
                     to annotate the source project through the API",
                );
                false
            }
        }
    }
}

fn skipped(neuron: &Neuron, source_skeleton_id: SkeletonId, reason: SkipReason) -> UploadOutcome {
    info!(
        "event=upload_skipped module=upload status=ok skeleton_id={source_skeleton_id} reason={reason:?}"
    );
    UploadOutcome {
        source_skeleton_id,
        name: neuron.name.clone(),
        action: UploadAction::Skipped(reason),
    }
}

/// Nodes whose edition time differs from the oldest one in the skeleton.
fn edited_nodes(details: &[NodeDetail]) -> Vec<NodeDetail> {
    let Some(first_edit) = details.iter().map(|detail| detail.edition_time).min() else {
        return Vec::new();
    };
    details
        .iter()
        .filter(|detail| detail.edition_time != first_edit)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{edited_nodes, UploadAction, UploadService};
    use crate::connection::{ProjectHandle, SyncContext};
    use crate::model::link::{LinkRelation, UPDATED_FROM_PREFIX};
    use crate::model::neuron::{Neuron, Node};
    use crate::operator::ScriptedOperator;
    use crate::remote::api::NodeDetail;
    use crate::remote::memory::InMemoryCatmaid;
    use crate::service::options::UploadOptions;
    use chrono::{DateTime, Duration};
    use std::sync::Arc;

    fn neuron(skeleton_id: u64, name: &str) -> Neuron {
        let mut neuron = Neuron::new(skeleton_id, name);
        neuron.nodes = vec![
            Node::new(skeleton_id * 10, None, [0.0, 0.0, 0.0], 1.0),
            Node::new(skeleton_id * 10 + 1, Some(skeleton_id * 10), [1.0, 0.0, 0.0], 1.0),
        ];
        neuron
    }

    #[test]
    fn edited_nodes_are_the_ones_after_the_first_edit() {
        let base = DateTime::from_timestamp(1_000, 0).unwrap();
        let details = vec![
            NodeDetail {
                node_id: 1,
                skeleton_id: 9,
                edition_time: base,
                editor_id: 1,
            },
            NodeDetail {
                node_id: 2,
                skeleton_id: 9,
                edition_time: base + Duration::hours(1),
                editor_id: 2,
            },
        ];
        let edited = edited_nodes(&details);
        assert_eq!(edited.len(), 1);
        assert_eq!(edited[0].node_id, 2);
    }

    #[test]
    fn new_upload_carries_link_and_timestamp() {
        let server = Arc::new(InMemoryCatmaid::new());
        server.add_project(1, "source");
        server.add_project(2, "target");
        let mut source = neuron(5, "DN1");
        source.add_annotation("LINKED NEURON - stale link");
        server.insert_neuron(1, source.clone());
        let operator = Arc::new(ScriptedOperator::approving());
        let ctx = SyncContext::new(
            ProjectHandle::new("https://src", 1, server.clone()),
            Some(ProjectHandle::new("https://tgt", 2, server.clone())),
            operator,
        );

        let report = UploadService::new(&ctx)
            .upload_or_update_neurons(vec![source], &LinkRelation::Copy, &UploadOptions::live())
            .unwrap();
        let written = report.written_skeleton_ids();
        assert_eq!(written.len(), 1, "{report:?}");
        let skeleton_id = written[0];
        assert!(matches!(report.outcomes[0].action, UploadAction::Created { .. }));
        let uploaded = server.neuron(2, skeleton_id).unwrap();
        assert!(uploaded.annotations.contains(
            "LINKED NEURON - copy of skeleton id 5 in project id 1 on server https://src"
        ));
        assert!(uploaded
            .annotations
            .iter()
            .any(|annotation| annotation.starts_with(UPDATED_FROM_PREFIX)));
        assert!(!uploaded.annotations.contains("LINKED NEURON - stale link"));
    }
}
