//! Remote annotation-server contract.
//!
//! # Responsibility
//! - Define the skeleton/annotation/connector operations the services need.
//! - Keep transport details (HTTP, auth, payload shapes) behind one trait.
//!
//! # Invariants
//! - Every call names the project it targets; implementations hold no
//!   "current project" state of their own.
//! - Lookups by an unknown annotation return an empty result, not an error.

use crate::model::neuron::{ConnectorId, Neuron, NodeId, Point3, ProjectId, SkeletonId};
use crate::model::volume::Volume;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ApiResult<T> = Result<T, ApiError>;

/// Error raised by remote API calls.
#[derive(Debug)]
pub enum ApiError {
    /// Request could not be sent or the response body could not be read.
    Transport(String),
    /// Server answered with a non-success status.
    Status { status: u16, url: String, body: String },
    /// Server answered with a body this client cannot interpret.
    InvalidPayload(String),
    /// Requested object does not exist on the server.
    NotFound(String),
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "request failed: {message}"),
            Self::Status { status, url, body } => {
                write!(f, "server returned status {status} for {url}: {}", body.trim())
            }
            Self::InvalidPayload(message) => write!(f, "unexpected server response: {message}"),
            Self::NotFound(what) => write!(f, "not found: {what}"),
        }
    }
}

impl Error for ApiError {}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidPayload(value.to_string())
    }
}

/// Project entry from the server's project list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub project_id: ProjectId,
    pub title: String,
}

/// Edit metadata for one treenode.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDetail {
    pub node_id: NodeId,
    pub skeleton_id: SkeletonId,
    pub edition_time: DateTime<Utc>,
    pub editor_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: u64,
    pub login: String,
}

/// One connector in a project, with whether any skeleton links to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorRecord {
    pub connector_id: ConnectorId,
    pub location: Point3,
    pub linked: bool,
}

/// How an upload should treat ids and the optional parts of a neuron.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UploadRequest {
    /// Skeleton to overwrite; `None` creates a new skeleton.
    pub skeleton_id: Option<SkeletonId>,
    /// Neuron entity to reuse when overwriting.
    pub neuron_id: Option<u64>,
    /// Replace an existing skeleton in place when ids are given.
    pub force_id: bool,
    pub import_tags: bool,
    pub import_annotations: bool,
    pub import_connectors: bool,
    /// Link to connectors already present at the same location instead of
    /// creating duplicates.
    pub reuse_existing_connectors: bool,
}

/// Server response for a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub skeleton_id: SkeletonId,
    pub neuron_id: u64,
    /// Source node id to newly assigned node id.
    pub node_id_map: BTreeMap<NodeId, NodeId>,
}

/// Operations the services need from an annotation server.
pub trait CatmaidApi {
    /// Projects visible to the configured account.
    fn list_projects(&self) -> ApiResult<Vec<ProjectInfo>>;

    /// Skeletons carrying all given annotations (logical AND). An empty
    /// filter matches nothing.
    fn skeleton_ids_by_annotations(
        &self,
        project_id: ProjectId,
        annotations: &[String],
    ) -> ApiResult<Vec<SkeletonId>>;

    /// Full neuron: nodes, connectors, annotations and tags.
    fn get_neuron(&self, project_id: ProjectId, skeleton_id: SkeletonId) -> ApiResult<Neuron>;

    /// Every annotation name used in the project.
    fn annotation_list(&self, project_id: ProjectId) -> ApiResult<Vec<String>>;

    /// Annotations per skeleton.
    fn annotations_for_skeletons(
        &self,
        project_id: ProjectId,
        skeleton_ids: &[SkeletonId],
    ) -> ApiResult<BTreeMap<SkeletonId, Vec<String>>>;

    /// Number of entities annotated with `annotation`.
    fn count_annotated(&self, project_id: ProjectId, annotation: &str) -> ApiResult<usize>;

    fn node_details(&self, project_id: ProjectId, node_ids: &[NodeId]) -> ApiResult<Vec<NodeDetail>>;

    fn user_list(&self) -> ApiResult<Vec<UserRecord>>;

    /// Neuron entity id that owns the skeleton.
    fn neuron_id(&self, project_id: ProjectId, skeleton_id: SkeletonId) -> ApiResult<u64>;

    fn upload_neuron(
        &self,
        project_id: ProjectId,
        neuron: &Neuron,
        request: &UploadRequest,
    ) -> ApiResult<UploadResponse>;

    fn add_annotations(
        &self,
        project_id: ProjectId,
        skeleton_ids: &[SkeletonId],
        annotations: &[String],
    ) -> ApiResult<()>;

    fn remove_annotations(
        &self,
        project_id: ProjectId,
        skeleton_ids: &[SkeletonId],
        annotations: &[String],
    ) -> ApiResult<()>;

    fn list_connectors(&self, project_id: ProjectId) -> ApiResult<Vec<ConnectorRecord>>;

    fn delete_connector(&self, project_id: ProjectId, connector_id: ConnectorId) -> ApiResult<()>;

    /// Adds one treenode; returns its id.
    fn add_node(
        &self,
        project_id: ProjectId,
        location: Point3,
        parent_id: Option<NodeId>,
        confidence: u8,
    ) -> ApiResult<NodeId>;

    fn delete_nodes(&self, project_id: ProjectId, node_ids: &[NodeId]) -> ApiResult<()>;

    fn get_volume(&self, project_id: ProjectId, volume_id: u64) -> ApiResult<Volume>;

    /// Fetches several neurons, in the order given.
    fn get_neurons(
        &self,
        project_id: ProjectId,
        skeleton_ids: &[SkeletonId],
    ) -> ApiResult<Vec<Neuron>> {
        skeleton_ids
            .iter()
            .map(|skeleton_id| self.get_neuron(project_id, *skeleton_id))
            .collect()
    }
}
