//! Project clean-up and consistency checks.
//!
//! # Responsibility
//! - Find and delete connectors that no skeleton links to.
//! - Purge annotations nothing is annotated with.
//! - Compare linked target neurons against their source neurons.
//! - Add and remove dummy nodes on single-node skeletons.
//! - Replace a skeleton from an SWC file.
//!
//! # Invariants
//! - Destructive calls either confirm with the operator first or honour a
//!   `dry_run` flag.

use crate::connection::{ProjectHandle, SyncContext};
use crate::model::neuron::{distance, ConnectorId, NodeId, SkeletonId};
use crate::model::swc::read_swc;
use crate::remote::api::{ApiResult, UploadRequest};
use crate::service::error::{require_target, ServiceError, ServiceResult};
use crate::service::link_service::{LinkResolver, ResolveError};
use log::info;
use std::collections::BTreeMap;
use std::path::Path;

/// `(x, y)` of the nodes added by `add_dummy_nodes_by_skid`.
pub const DUMMY_NODE_XY: [f64; 2] = [-1.0, -1.0];
const DUMMY_NODE_TOLERANCE: f64 = 0.1;

/// Connectors in `project` without any skeleton link.
pub fn unlinked_connector_ids(project: &ProjectHandle) -> ApiResult<Vec<ConnectorId>> {
    Ok(project
        .api
        .list_connectors(project.project_id)?
        .into_iter()
        .filter(|connector| !connector.linked)
        .map(|connector| connector.connector_id)
        .collect())
}

/// Which side of the context a call works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectRole {
    #[default]
    Source,
    Target,
}

impl ProjectRole {
    fn label(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Target => "target",
        }
    }
}

/// Node or connector count mismatch between a target neuron and the
/// source neuron it links to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Desync {
    pub name: String,
    pub target_skeleton_id: SkeletonId,
    pub source_skeleton_id: SkeletonId,
    /// `(source, target)` node counts.
    pub nodes: (usize, usize),
    /// `(source, target)` connector counts.
    pub connectors: (usize, usize),
}

/// What `replace_skeleton_from_swc` found, and whether it uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonReplacement {
    pub name: String,
    /// Distance (nm) between the mean node positions of old and new.
    pub mean_distance: f64,
    pub lost_connectors: usize,
    pub lost_tags: usize,
    pub replaced: bool,
}

pub struct HousekeepingService<'a> {
    ctx: &'a SyncContext,
}

impl<'a> HousekeepingService<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    fn project(&self, role: ProjectRole) -> ServiceResult<&'a ProjectHandle> {
        match role {
            ProjectRole::Source => Ok(&self.ctx.source),
            ProjectRole::Target => require_target(self.ctx),
        }
    }

    pub fn find_unlinked_connectors(&self, role: ProjectRole) -> ServiceResult<Vec<ConnectorId>> {
        let project = self.project(role)?;
        self.ctx.operator().notify(&format!(
            "Searching for unlinked connectors in {} project.",
            role.label()
        ));
        Ok(unlinked_connector_ids(project)?)
    }

    /// Deletes every unlinked connector after one confirmation; returns how
    /// many were deleted.
    pub fn delete_unlinked_connectors(&self, role: ProjectRole) -> ServiceResult<usize> {
        let project = self.project(role)?;
        let operator = self.ctx.operator();
        let connector_ids = unlinked_connector_ids(project)?;
        if connector_ids.is_empty() {
            operator.notify("No unlinked connectors found to delete.");
            return Ok(0);
        }
        operator.notify(&format!("{connector_ids:?}"));
        if !operator.confirm(&format!(
            "Found {} unlinked connectors. Continue?",
            connector_ids.len()
        )) {
            return Ok(0);
        }
        for connector_id in &connector_ids {
            project
                .api
                .delete_connector(project.project_id, *connector_id)?;
        }
        info!(
            "event=unlinked_connectors_deleted module=housekeeping status=ok project_id={} count={}",
            project.project_id,
            connector_ids.len()
        );
        Ok(connector_ids.len())
    }

    /// Groups of two or more connectors at exactly the same coordinate.
    pub fn find_overlapping_connectors(&self, role: ProjectRole) -> ServiceResult<Vec<Vec<ConnectorId>>> {
        let project = self.project(role)?;
        self.ctx.operator().notify(&format!(
            "Searching for overlapping connectors in {} project.",
            role.label()
        ));
        let mut by_location: BTreeMap<[u64; 3], Vec<ConnectorId>> = BTreeMap::new();
        for connector in project.api.list_connectors(project.project_id)? {
            let key = connector.location.map(f64::to_bits);
            by_location.entry(key).or_default().push(connector.connector_id);
        }
        Ok(by_location
            .into_values()
            .filter(|group| group.len() > 1)
            .collect())
    }

    /// Removes annotations that annotate nothing by cycling them through
    /// `dummy_skeleton_id`; the server deletes unused annotations on removal.
    ///
    /// Without `force`, every annotation is confirmed separately.
    pub fn purge_unused_annotations(
        &self,
        role: ProjectRole,
        dummy_skeleton_id: SkeletonId,
        force: bool,
    ) -> ServiceResult<Vec<String>> {
        let project = self.project(role)?;
        let operator = self.ctx.operator();
        operator.notify(&format!(
            "Purging unused annotations from the {} project.",
            role.label()
        ));
        let mut purged = Vec::new();
        for name in project.api.annotation_list(project.project_id)? {
            if project.api.count_annotated(project.project_id, &name)? > 0 {
                continue;
            }
            operator.notify(&name);
            if !force && !operator.confirm("Purge me?") {
                continue;
            }
            let names = [name];
            project
                .api
                .add_annotations(project.project_id, &[dummy_skeleton_id], &names)?;
            project
                .api
                .remove_annotations(project.project_id, &[dummy_skeleton_id], &names)?;
            let [name] = names;
            purged.push(name);
        }
        info!(
            "event=annotations_purged module=housekeeping status=ok project_id={} count={}",
            project.project_id,
            purged.len()
        );
        Ok(purged)
    }

    /// Compares node and connector counts of target neurons carrying
    /// `annotations` with the source neurons they link to.
    pub fn find_desyncs(&self, annotations: &[String]) -> ServiceResult<Vec<Desync>> {
        let target = require_target(self.ctx)?;
        let source = &self.ctx.source;
        let operator = self.ctx.operator();
        let skeleton_ids = target.skeleton_ids_by_annotations(annotations)?;
        let mut desyncs = Vec::new();
        for target_neuron in target.api.get_neurons(target.project_id, &skeleton_ids)? {
            let link = match LinkResolver::sole_link(&target_neuron.annotations) {
                Ok(candidate) => candidate.link,
                Err(ResolveError::NotLinked) => {
                    operator.notify(&format!("{} has no linking annotation.", target_neuron.name));
                    continue;
                }
                Err(ResolveError::Ambiguous(candidates)) => {
                    operator.acknowledge(&format!(
                        "{} has {} linking annotations; skipping.",
                        target_neuron.name,
                        candidates.len()
                    ));
                    continue;
                }
            };
            let source_neuron = source.api.get_neuron(source.project_id, link.skeleton_id)?;
            let nodes = (source_neuron.n_nodes(), target_neuron.n_nodes());
            let connectors = (source_neuron.n_connectors(), target_neuron.n_connectors());
            if nodes.0 != nodes.1 {
                operator.notify(&format!("Node number mismatch for: {}", source_neuron.name));
            }
            if connectors.0 != connectors.1 {
                operator.notify(&format!(
                    "Connector number mismatch for: {}",
                    source_neuron.name
                ));
            }
            if nodes.0 != nodes.1 || connectors.0 != connectors.1 {
                desyncs.push(Desync {
                    name: source_neuron.name,
                    target_skeleton_id: target_neuron.skeleton_id,
                    source_skeleton_id: link.skeleton_id,
                    nodes,
                    connectors,
                });
            }
        }
        Ok(desyncs)
    }

    pub fn add_dummy_nodes_by_annotations(
        &self,
        role: ProjectRole,
        annotations: &[String],
        dry_run: bool,
    ) -> ServiceResult<Vec<NodeId>> {
        let skeleton_ids = self.project(role)?.skeleton_ids_by_annotations(annotations)?;
        self.add_dummy_nodes_by_skid(role, &skeleton_ids, dry_run)
    }

    /// Gives every single-node skeleton a second node at `(-1, -1, z)`.
    ///
    /// Returns the new node ids, or the parent node ids on a dry run.
    pub fn add_dummy_nodes_by_skid(
        &self,
        role: ProjectRole,
        skeleton_ids: &[SkeletonId],
        dry_run: bool,
    ) -> ServiceResult<Vec<NodeId>> {
        let project = self.project(role)?;
        let operator = self.ctx.operator();
        let mut touched = Vec::new();
        for neuron in project.api.get_neurons(project.project_id, skeleton_ids)? {
            let [node] = neuron.nodes.as_slice() else {
                operator.notify(&format!(
                    "Dummy node requested for a neuron with >1 node. Skipping \"{}\".",
                    neuron.name
                ));
                continue;
            };
            let location = [DUMMY_NODE_XY[0], DUMMY_NODE_XY[1], node.location[2]];
            if dry_run {
                operator.notify(&format!(
                    "Dry run: would add a node at {location:?} under node {}",
                    node.node_id
                ));
                touched.push(node.node_id);
                continue;
            }
            let node_id = project
                .api
                .add_node(project.project_id, location, Some(node.node_id), 1)?;
            touched.push(node_id);
        }
        Ok(touched)
    }

    pub fn delete_dummy_nodes_by_annotations(
        &self,
        role: ProjectRole,
        annotations: &[String],
        dry_run: bool,
    ) -> ServiceResult<Vec<NodeId>> {
        let skeleton_ids = self.project(role)?.skeleton_ids_by_annotations(annotations)?;
        self.delete_dummy_nodes_by_skid(role, &skeleton_ids, dry_run)
    }

    /// Deletes the dummy node of every two-node skeleton that has one.
    ///
    /// Fails with `NoDummyNodes` when none of the skeletons qualifies.
    pub fn delete_dummy_nodes_by_skid(
        &self,
        role: ProjectRole,
        skeleton_ids: &[SkeletonId],
        dry_run: bool,
    ) -> ServiceResult<Vec<NodeId>> {
        let project = self.project(role)?;
        let operator = self.ctx.operator();
        let mut to_delete = Vec::new();
        for neuron in project.api.get_neurons(project.project_id, skeleton_ids)? {
            if neuron.n_nodes() != 2 {
                operator.notify(&format!(
                    "\"{}\" doesn't have exactly 2 nodes. Skipping.",
                    neuron.name
                ));
                continue;
            }
            let dummies: Vec<NodeId> = neuron
                .nodes
                .iter()
                .filter(|node| is_dummy_location(node.location))
                .map(|node| node.node_id)
                .collect();
            if dummies.is_empty() {
                operator.notify(&format!(
                    "\"{}\" has no nodes at (x, y) = ({}, {}). Skipping.",
                    neuron.name, DUMMY_NODE_XY[0], DUMMY_NODE_XY[1]
                ));
                continue;
            }
            to_delete.extend(dummies);
        }
        if to_delete.is_empty() {
            return Err(ServiceError::NoDummyNodes);
        }
        if dry_run {
            operator.notify(&format!("Dry run: would delete treenodes {to_delete:?}"));
        } else {
            project.api.delete_nodes(project.project_id, &to_delete)?;
        }
        Ok(to_delete)
    }

    /// Overwrites skeleton `skeleton_id` with the SWC at `swc_path`, keeping
    /// its name and root radius.
    ///
    /// Works in the target project when one is configured, else in the
    /// source project. Connectors and tags of the old skeleton are lost.
    pub fn replace_skeleton_from_swc(
        &self,
        skeleton_id: SkeletonId,
        swc_path: &Path,
        dry_run: bool,
    ) -> ServiceResult<SkeletonReplacement> {
        let operator = self.ctx.operator();
        let project = match &self.ctx.target {
            Some(target) => {
                operator.notify("Performing skeleton replacement in TARGET project.");
                target
            }
            None => {
                operator.notify("Performing skeleton replacement in SOURCE project.");
                &self.ctx.source
            }
        };

        let mut new_neuron = read_swc(swc_path)?;
        let old_neuron = project.api.get_neuron(project.project_id, skeleton_id)?;
        let mean_distance = match (old_neuron.mean_location(), new_neuron.mean_location()) {
            (Some(old), Some(new)) => distance(old, new),
            _ => 0.0,
        };
        operator.notify(&format!("Neuron to be replaced: {}", old_neuron.name));
        operator.notify(&format!(
            "Distance between mean coordinate of old neuron and mean coordinate of new neuron: {mean_distance:.0}nm"
        ));
        if old_neuron.n_connectors() > 0 {
            operator.notify(
                "WARNING: connectors on old neuron will become unlinked (i.e. they will not be linked to the new neuron).",
            );
        }
        if !old_neuron.tags.is_empty() {
            operator.notify("WARNING: tags on old neuron will be deleted.");
        }

        let mut replacement = SkeletonReplacement {
            name: old_neuron.name.clone(),
            mean_distance,
            lost_connectors: old_neuron.n_connectors(),
            lost_tags: old_neuron.tags.len(),
            replaced: false,
        };
        if dry_run {
            return Ok(replacement);
        }

        let neuron_id = project.api.neuron_id(project.project_id, skeleton_id)?;
        let old_root_radius = old_neuron
            .root()
            .and_then(|root| old_neuron.node(root))
            .map(|node| node.radius);
        if let (Some(radius), Some(new_root)) = (old_root_radius, new_neuron.root()) {
            if let Some(node) = new_neuron
                .nodes
                .iter_mut()
                .find(|node| node.node_id == new_root)
            {
                node.radius = radius;
            }
        }
        new_neuron.name = old_neuron.name;
        new_neuron.skeleton_id = skeleton_id;
        let request = UploadRequest {
            skeleton_id: Some(skeleton_id),
            neuron_id: Some(neuron_id),
            force_id: true,
            ..UploadRequest::default()
        };
        project
            .api
            .upload_neuron(project.project_id, &new_neuron, &request)?;
        info!(
            "event=skeleton_replaced module=housekeeping status=ok project_id={} skeleton_id={skeleton_id}",
            project.project_id
        );
        replacement.replaced = true;
        Ok(replacement)
    }
}

fn is_dummy_location(location: [f64; 3]) -> bool {
    (location[0] - DUMMY_NODE_XY[0]).abs() < DUMMY_NODE_TOLERANCE
        && (location[1] - DUMMY_NODE_XY[1]).abs() < DUMMY_NODE_TOLERANCE
}
