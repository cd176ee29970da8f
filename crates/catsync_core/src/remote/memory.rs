//! In-memory annotation server.
//!
//! Backs tests and offline rehearsals. Every mutating call is recorded so
//! callers can assert that dry runs stay read-only.

use crate::model::neuron::{ConnectorId, Neuron, NodeId, Point3, ProjectId, SkeletonId};
use crate::model::volume::Volume;
use crate::remote::api::{
    ApiError, ApiResult, CatmaidApi, ConnectorRecord, NodeDetail, ProjectInfo, UploadRequest,
    UploadResponse, UserRecord,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

const BASE_EDITION_EPOCH_SECS: i64 = 1_700_000_000;

/// One recorded write against the in-memory server.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Upload {
        project_id: ProjectId,
        skeleton_id: SkeletonId,
        replaced: bool,
    },
    AddAnnotations {
        project_id: ProjectId,
        skeleton_ids: Vec<SkeletonId>,
        annotations: Vec<String>,
    },
    RemoveAnnotations {
        project_id: ProjectId,
        skeleton_ids: Vec<SkeletonId>,
        annotations: Vec<String>,
    },
    DeleteConnector {
        project_id: ProjectId,
        connector_id: ConnectorId,
    },
    AddNode {
        project_id: ProjectId,
        node_id: NodeId,
    },
    DeleteNodes {
        project_id: ProjectId,
        node_ids: Vec<NodeId>,
    },
}

#[derive(Debug, Default)]
struct MemoryProject {
    title: String,
    neurons: BTreeMap<SkeletonId, (u64, Neuron)>,
    connectors: BTreeMap<ConnectorId, Point3>,
    volumes: BTreeMap<u64, Volume>,
    edition_times: BTreeMap<NodeId, (DateTime<Utc>, u64)>,
    annotation_names: BTreeSet<String>,
}

#[derive(Debug)]
struct MemoryState {
    projects: BTreeMap<ProjectId, MemoryProject>,
    users: Vec<UserRecord>,
    next_id: u64,
    mutations: Vec<Mutation>,
    volume_fetches: usize,
}

/// Annotation server kept entirely in process memory.
#[derive(Debug)]
pub struct InMemoryCatmaid {
    state: Mutex<MemoryState>,
}

impl Default for InMemoryCatmaid {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatmaid {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                projects: BTreeMap::new(),
                users: Vec::new(),
                next_id: 1_000_000,
                mutations: Vec::new(),
                volume_fetches: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_project(&self, project_id: ProjectId, title: impl Into<String>) {
        let mut state = self.lock();
        state.projects.entry(project_id).or_default().title = title.into();
    }

    pub fn add_user(&self, user_id: u64, login: impl Into<String>) {
        self.lock().users.push(UserRecord {
            user_id,
            login: login.into(),
        });
    }

    /// Stores a neuron as-is, registering its connectors and annotations.
    ///
    /// All nodes share one edition time, i.e. they look untouched since
    /// creation.
    pub fn insert_neuron(&self, project_id: ProjectId, neuron: Neuron) {
        let mut state = self.lock();
        let neuron_id = next_id(&mut state);
        let project = state.projects.entry(project_id).or_default();
        let base = base_edition_time();
        for node in &neuron.nodes {
            project.edition_times.insert(node.node_id, (base, 0));
        }
        for connector in &neuron.connectors {
            project
                .connectors
                .insert(connector.connector_id, connector.location);
        }
        project
            .annotation_names
            .extend(neuron.annotations.iter().cloned());
        project
            .neurons
            .insert(neuron.skeleton_id, (neuron_id, neuron));
    }

    /// Adds a connector that no skeleton links to.
    pub fn insert_free_connector(&self, project_id: ProjectId, connector_id: ConnectorId, location: Point3) {
        let mut state = self.lock();
        state
            .projects
            .entry(project_id)
            .or_default()
            .connectors
            .insert(connector_id, location);
    }

    pub fn insert_volume(&self, project_id: ProjectId, volume: Volume) {
        let mut state = self.lock();
        state
            .projects
            .entry(project_id)
            .or_default()
            .volumes
            .insert(volume.volume_id, volume);
    }

    /// Registers an annotation name that no neuron carries.
    pub fn register_annotation(&self, project_id: ProjectId, name: impl Into<String>) {
        let mut state = self.lock();
        state
            .projects
            .entry(project_id)
            .or_default()
            .annotation_names
            .insert(name.into());
    }

    /// Simulates a manual edit of one node after its creation.
    pub fn mark_node_edited(&self, project_id: ProjectId, node_id: NodeId, editor_id: u64) {
        let mut state = self.lock();
        let project = state.projects.entry(project_id).or_default();
        project
            .edition_times
            .insert(node_id, (base_edition_time() + Duration::days(3), editor_id));
    }

    /// Drops a connector from whichever skeleton references it, leaving the
    /// connector itself in place.
    pub fn unlink_connector(&self, project_id: ProjectId, connector_id: ConnectorId) {
        let mut state = self.lock();
        if let Some(project) = state.projects.get_mut(&project_id) {
            for (_, neuron) in project.neurons.values_mut() {
                neuron
                    .connectors
                    .retain(|connector| connector.connector_id != connector_id);
            }
        }
    }

    /// Current stored copy of a neuron.
    pub fn neuron(&self, project_id: ProjectId, skeleton_id: SkeletonId) -> Option<Neuron> {
        self.lock()
            .projects
            .get(&project_id)?
            .neurons
            .get(&skeleton_id)
            .map(|(_, neuron)| neuron.clone())
    }

    pub fn skeleton_ids(&self, project_id: ProjectId) -> Vec<SkeletonId> {
        self.lock()
            .projects
            .get(&project_id)
            .map(|project| project.neurons.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every write issued so far, oldest first.
    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().mutations.clone()
    }

    /// Number of `get_volume` calls served, found or not.
    pub fn volume_fetches(&self) -> usize {
        self.lock().volume_fetches
    }

    fn with_project<T>(
        &self,
        project_id: ProjectId,
        f: impl FnOnce(&mut MemoryProject) -> ApiResult<T>,
    ) -> ApiResult<T> {
        let mut state = self.lock();
        let project = state
            .projects
            .get_mut(&project_id)
            .ok_or_else(|| ApiError::NotFound(format!("project {project_id}")))?;
        f(project)
    }
}

fn base_edition_time() -> DateTime<Utc> {
    DateTime::from_timestamp(BASE_EDITION_EPOCH_SECS, 0).unwrap_or_default()
}

fn next_id(state: &mut MemoryState) -> u64 {
    state.next_id += 1;
    state.next_id
}

impl CatmaidApi for InMemoryCatmaid {
    fn list_projects(&self) -> ApiResult<Vec<ProjectInfo>> {
        Ok(self
            .lock()
            .projects
            .iter()
            .map(|(project_id, project)| ProjectInfo {
                project_id: *project_id,
                title: project.title.clone(),
            })
            .collect())
    }

    fn skeleton_ids_by_annotations(
        &self,
        project_id: ProjectId,
        annotations: &[String],
    ) -> ApiResult<Vec<SkeletonId>> {
        let state = self.lock();
        let Some(project) = state.projects.get(&project_id) else {
            return Ok(Vec::new());
        };
        if annotations.is_empty() {
            return Ok(Vec::new());
        }
        Ok(project
            .neurons
            .iter()
            .filter(|(_, (_, neuron))| {
                annotations
                    .iter()
                    .all(|annotation| neuron.annotations.contains(annotation))
            })
            .map(|(skeleton_id, _)| *skeleton_id)
            .collect())
    }

    fn get_neuron(&self, project_id: ProjectId, skeleton_id: SkeletonId) -> ApiResult<Neuron> {
        self.neuron(project_id, skeleton_id)
            .ok_or_else(|| ApiError::NotFound(format!("skeleton {skeleton_id} in project {project_id}")))
    }

    fn annotation_list(&self, project_id: ProjectId) -> ApiResult<Vec<String>> {
        self.with_project(project_id, |project| {
            Ok(project.annotation_names.iter().cloned().collect())
        })
    }

    fn annotations_for_skeletons(
        &self,
        project_id: ProjectId,
        skeleton_ids: &[SkeletonId],
    ) -> ApiResult<BTreeMap<SkeletonId, Vec<String>>> {
        self.with_project(project_id, |project| {
            Ok(skeleton_ids
                .iter()
                .filter_map(|skeleton_id| {
                    project.neurons.get(skeleton_id).map(|(_, neuron)| {
                        (*skeleton_id, neuron.annotations.iter().cloned().collect())
                    })
                })
                .collect())
        })
    }

    fn count_annotated(&self, project_id: ProjectId, annotation: &str) -> ApiResult<usize> {
        self.with_project(project_id, |project| {
            Ok(project
                .neurons
                .values()
                .filter(|(_, neuron)| neuron.annotations.contains(annotation))
                .count())
        })
    }

    fn node_details(&self, project_id: ProjectId, node_ids: &[NodeId]) -> ApiResult<Vec<NodeDetail>> {
        self.with_project(project_id, |project| {
            let mut details = Vec::new();
            for node_id in node_ids {
                let skeleton_id = project
                    .neurons
                    .iter()
                    .find(|(_, (_, neuron))| neuron.contains_node(*node_id))
                    .map(|(skeleton_id, _)| *skeleton_id)
                    .ok_or_else(|| ApiError::NotFound(format!("treenode {node_id}")))?;
                let (edition_time, editor_id) = project
                    .edition_times
                    .get(node_id)
                    .copied()
                    .unwrap_or((base_edition_time(), 0));
                details.push(NodeDetail {
                    node_id: *node_id,
                    skeleton_id,
                    edition_time,
                    editor_id,
                });
            }
            Ok(details)
        })
    }

    fn user_list(&self) -> ApiResult<Vec<UserRecord>> {
        Ok(self.lock().users.clone())
    }

    fn neuron_id(&self, project_id: ProjectId, skeleton_id: SkeletonId) -> ApiResult<u64> {
        self.with_project(project_id, |project| {
            project
                .neurons
                .get(&skeleton_id)
                .map(|(neuron_id, _)| *neuron_id)
                .ok_or_else(|| ApiError::NotFound(format!("skeleton {skeleton_id}")))
        })
    }

    fn upload_neuron(
        &self,
        project_id: ProjectId,
        neuron: &Neuron,
        request: &UploadRequest,
    ) -> ApiResult<UploadResponse> {
        let mut state = self.lock();
        if !state.projects.contains_key(&project_id) {
            return Err(ApiError::NotFound(format!("project {project_id}")));
        }

        let replaced = request.force_id && request.skeleton_id.is_some();
        let skeleton_id = match request.skeleton_id {
            Some(skeleton_id) if replaced => skeleton_id,
            _ => next_id(&mut state),
        };
        let neuron_id = match request.neuron_id {
            Some(neuron_id) if replaced => neuron_id,
            _ => next_id(&mut state),
        };

        let mut node_id_map = BTreeMap::new();
        for node in &neuron.nodes {
            let new_id = next_id(&mut state);
            node_id_map.insert(node.node_id, new_id);
        }
        let mut stored = Neuron::new(skeleton_id, neuron.name.clone());
        for node in &neuron.nodes {
            let mut copy = node.clone();
            copy.node_id = node_id_map[&node.node_id];
            copy.parent_id = node.parent_id.and_then(|parent| node_id_map.get(&parent).copied());
            stored.nodes.push(copy);
        }

        let mut new_connectors = Vec::new();
        if request.import_connectors {
            for connector in &neuron.connectors {
                let Some(node_id) = node_id_map.get(&connector.node_id).copied() else {
                    continue;
                };
                let existing = if request.reuse_existing_connectors {
                    state.projects.get(&project_id).and_then(|project| {
                        project
                            .connectors
                            .iter()
                            .find(|(_, location)| **location == connector.location)
                            .map(|(connector_id, _)| *connector_id)
                    })
                } else {
                    None
                };
                let connector_id = match existing {
                    Some(connector_id) => connector_id,
                    None => next_id(&mut state),
                };
                let mut copy = connector.clone();
                copy.connector_id = connector_id;
                copy.node_id = node_id;
                new_connectors.push(copy);
            }
        }
        stored.connectors = new_connectors;
        if request.import_annotations {
            stored.annotations = neuron.annotations.clone();
        }
        if request.import_tags {
            stored.tags = neuron
                .tags
                .iter()
                .map(|(label, nodes)| {
                    let remapped = nodes
                        .iter()
                        .filter_map(|node_id| node_id_map.get(node_id).copied())
                        .collect();
                    (label.clone(), remapped)
                })
                .collect();
        }

        let edition = base_edition_time();
        let project = state
            .projects
            .get_mut(&project_id)
            .ok_or_else(|| ApiError::NotFound(format!("project {project_id}")))?;
        for node in &stored.nodes {
            project.edition_times.insert(node.node_id, (edition, 0));
        }
        for connector in &stored.connectors {
            project
                .connectors
                .insert(connector.connector_id, connector.location);
        }
        project
            .annotation_names
            .extend(stored.annotations.iter().cloned());
        project.neurons.insert(skeleton_id, (neuron_id, stored));

        state.mutations.push(Mutation::Upload {
            project_id,
            skeleton_id,
            replaced,
        });
        Ok(UploadResponse {
            skeleton_id,
            neuron_id,
            node_id_map,
        })
    }

    fn add_annotations(
        &self,
        project_id: ProjectId,
        skeleton_ids: &[SkeletonId],
        annotations: &[String],
    ) -> ApiResult<()> {
        let mut state = self.lock();
        {
            let project = state
                .projects
                .get_mut(&project_id)
                .ok_or_else(|| ApiError::NotFound(format!("project {project_id}")))?;
            for skeleton_id in skeleton_ids {
                let (_, neuron) = project
                    .neurons
                    .get_mut(skeleton_id)
                    .ok_or_else(|| ApiError::NotFound(format!("skeleton {skeleton_id}")))?;
                neuron.annotations.extend(annotations.iter().cloned());
            }
            project
                .annotation_names
                .extend(annotations.iter().cloned());
        }
        state.mutations.push(Mutation::AddAnnotations {
            project_id,
            skeleton_ids: skeleton_ids.to_vec(),
            annotations: annotations.to_vec(),
        });
        Ok(())
    }

    fn remove_annotations(
        &self,
        project_id: ProjectId,
        skeleton_ids: &[SkeletonId],
        annotations: &[String],
    ) -> ApiResult<()> {
        let mut state = self.lock();
        {
            let project = state
                .projects
                .get_mut(&project_id)
                .ok_or_else(|| ApiError::NotFound(format!("project {project_id}")))?;
            for skeleton_id in skeleton_ids {
                if let Some((_, neuron)) = project.neurons.get_mut(skeleton_id) {
                    for annotation in annotations {
                        neuron.annotations.remove(annotation);
                    }
                }
            }
            // Annotations nobody uses any more are deleted server-side.
            for annotation in annotations {
                let still_used = project
                    .neurons
                    .values()
                    .any(|(_, neuron)| neuron.annotations.contains(annotation));
                if !still_used {
                    project.annotation_names.remove(annotation);
                }
            }
        }
        state.mutations.push(Mutation::RemoveAnnotations {
            project_id,
            skeleton_ids: skeleton_ids.to_vec(),
            annotations: annotations.to_vec(),
        });
        Ok(())
    }

    fn list_connectors(&self, project_id: ProjectId) -> ApiResult<Vec<ConnectorRecord>> {
        self.with_project(project_id, |project| {
            let linked: BTreeSet<ConnectorId> = project
                .neurons
                .values()
                .flat_map(|(_, neuron)| neuron.connectors.iter().map(|c| c.connector_id))
                .collect();
            Ok(project
                .connectors
                .iter()
                .map(|(connector_id, location)| ConnectorRecord {
                    connector_id: *connector_id,
                    location: *location,
                    linked: linked.contains(connector_id),
                })
                .collect())
        })
    }

    fn delete_connector(&self, project_id: ProjectId, connector_id: ConnectorId) -> ApiResult<()> {
        let mut state = self.lock();
        {
            let project = state
                .projects
                .get_mut(&project_id)
                .ok_or_else(|| ApiError::NotFound(format!("project {project_id}")))?;
            if project.connectors.remove(&connector_id).is_none() {
                return Err(ApiError::NotFound(format!("connector {connector_id}")));
            }
        }
        state.mutations.push(Mutation::DeleteConnector {
            project_id,
            connector_id,
        });
        Ok(())
    }

    fn add_node(
        &self,
        project_id: ProjectId,
        location: Point3,
        parent_id: Option<NodeId>,
        confidence: u8,
    ) -> ApiResult<NodeId> {
        let mut state = self.lock();
        let node_id = next_id(&mut state);
        {
            let project = state
                .projects
                .get_mut(&project_id)
                .ok_or_else(|| ApiError::NotFound(format!("project {project_id}")))?;
            let parent = parent_id.ok_or_else(|| {
                ApiError::InvalidPayload("in-memory server only grows existing skeletons".to_string())
            })?;
            let (_, neuron) = project
                .neurons
                .values_mut()
                .find(|(_, neuron)| neuron.contains_node(parent))
                .ok_or_else(|| ApiError::NotFound(format!("treenode {parent}")))?;
            let mut node = crate::model::neuron::Node::new(node_id, Some(parent), location, -1.0);
            node.confidence = confidence;
            neuron.nodes.push(node);
            project
                .edition_times
                .insert(node_id, (base_edition_time(), 0));
        }
        state.mutations.push(Mutation::AddNode {
            project_id,
            node_id,
        });
        Ok(node_id)
    }

    fn delete_nodes(&self, project_id: ProjectId, node_ids: &[NodeId]) -> ApiResult<()> {
        let mut state = self.lock();
        {
            let project = state
                .projects
                .get_mut(&project_id)
                .ok_or_else(|| ApiError::NotFound(format!("project {project_id}")))?;
            for (_, neuron) in project.neurons.values_mut() {
                let keep: BTreeSet<NodeId> = neuron
                    .nodes
                    .iter()
                    .map(|node| node.node_id)
                    .filter(|node_id| !node_ids.contains(node_id))
                    .collect();
                if keep.len() != neuron.nodes.len() {
                    neuron.subset(&keep);
                }
            }
        }
        state.mutations.push(Mutation::DeleteNodes {
            project_id,
            node_ids: node_ids.to_vec(),
        });
        Ok(())
    }

    fn get_volume(&self, project_id: ProjectId, volume_id: u64) -> ApiResult<Volume> {
        self.lock().volume_fetches += 1;
        self.with_project(project_id, |project| {
            project
                .volumes
                .get(&volume_id)
                .cloned()
                .ok_or_else(|| ApiError::NotFound(format!("volume {volume_id}")))
        })
    }
}
