//! Blocking HTTP client for a CATMAID server.
//!
//! # Responsibility
//! - Translate `CatmaidApi` calls into REST requests and parse the JSON
//!   answers into model types.
//! - Attach the API token header and optional HTTP basic auth to every call.
//!
//! # Invariants
//! - A `200` answer carrying an `error` field is reported as an error.
//! - Unknown annotation names produce an empty skeleton list.

use crate::model::neuron::{
    Connector, ConnectorId, ConnectorRelation, Neuron, Node, NodeId, Point3, ProjectId, SkeletonId,
};
use crate::model::swc::to_swc;
use crate::model::volume::Volume;
use crate::remote::api::{
    ApiError, ApiResult, CatmaidApi, ConnectorRecord, NodeDetail, ProjectInfo, UploadRequest,
    UploadResponse, UserRecord,
};
use chrono::{DateTime, Utc};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::{multipart, Client, RequestBuilder};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 60;

static X3D_POINT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"point=['"]([^'"]*)['"]"#).expect("valid x3d point regex"));
static X3D_INDEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"index=['"]([^'"]*)['"]"#).expect("valid x3d index regex"));

/// Credentials for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCredentials {
    pub api_token: String,
    pub http_user: Option<String>,
    pub http_password: Option<String>,
}

/// `CatmaidApi` over the server's REST endpoints.
pub struct HttpCatmaidClient {
    base_url: String,
    credentials: ServerCredentials,
    client: Client,
}

impl HttpCatmaidClient {
    pub fn new(base_url: &str, credentials: ServerCredentials) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|err| ApiError::Transport(format!("could not build HTTP client: {err}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(
            "X-Authorization",
            format!("Token {}", self.credentials.api_token),
        );
        match &self.credentials.http_user {
            Some(user) => request.basic_auth(user, self.credentials.http_password.as_deref()),
            None => request,
        }
    }

    fn get(&self, path: &str, query: &[(String, String)]) -> ApiResult<Value> {
        let url = self.url(path);
        let request = self.authorize(self.client.get(&url).query(query));
        send(request, &url)
    }

    fn post(&self, path: &str, form: &[(String, String)]) -> ApiResult<Value> {
        let url = self.url(path);
        let request = self.authorize(self.client.post(&url).form(form));
        send(request, &url)
    }

    /// Annotation name to annotation id for the whole project.
    fn annotation_ids(&self, project_id: ProjectId) -> ApiResult<BTreeMap<String, u64>> {
        let value = self.get(&format!("{project_id}/annotations/"), &[])?;
        let mut ids = BTreeMap::new();
        for entry in array(&value["annotations"], "annotations")? {
            ids.insert(
                str_field(entry, "name")?.to_string(),
                u64_field(entry, "id")?,
            );
        }
        Ok(ids)
    }

    fn neuron_name(&self, project_id: ProjectId, skeleton_id: SkeletonId) -> ApiResult<String> {
        let value = self.get(&format!("{project_id}/skeleton/{skeleton_id}/neuronname"), &[])?;
        Ok(str_field(&value, "neuronname")?.to_string())
    }

    fn create_connector(&self, project_id: ProjectId, location: Point3) -> ApiResult<ConnectorId> {
        let form = vec![
            ("x".to_string(), location[0].to_string()),
            ("y".to_string(), location[1].to_string()),
            ("z".to_string(), location[2].to_string()),
        ];
        let value = self.post(&format!("{project_id}/connector/create"), &form)?;
        u64_field(&value, "connector_id")
    }

    fn link_connector(
        &self,
        project_id: ProjectId,
        node_id: NodeId,
        connector_id: ConnectorId,
        relation: ConnectorRelation,
    ) -> ApiResult<()> {
        let link_type = match relation {
            ConnectorRelation::Presynaptic => "presynaptic_to",
            ConnectorRelation::Postsynaptic => "postsynaptic_to",
            ConnectorRelation::Other => "abutting",
        };
        let form = vec![
            ("from_id".to_string(), node_id.to_string()),
            ("to_id".to_string(), connector_id.to_string()),
            ("link_type".to_string(), link_type.to_string()),
        ];
        self.post(&format!("{project_id}/link/create"), &form)?;
        Ok(())
    }

    fn add_tags(&self, project_id: ProjectId, node_id: NodeId, labels: &[String]) -> ApiResult<()> {
        let form = vec![
            ("tags".to_string(), labels.join(",")),
            ("delete_existing".to_string(), "false".to_string()),
        ];
        self.post(&format!("{project_id}/label/treenode/{node_id}/update"), &form)?;
        Ok(())
    }
}

fn send(request: RequestBuilder, url: &str) -> ApiResult<Value> {
    debug!("event=http_request module=remote status=start url={url}");
    let response = request
        .send()
        .map_err(|err| ApiError::Transport(format!("{url}: {err}")))?;
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| ApiError::Transport(format!("could not read response body from {url}: {err}")))?;
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        });
    }
    let value: Value = serde_json::from_str(&body)?;
    if let Some(message) = value.get("error").and_then(Value::as_str) {
        if message.contains("does not exist") || message.contains("not found") {
            return Err(ApiError::NotFound(message.to_string()));
        }
        return Err(ApiError::InvalidPayload(format!("{url}: {message}")));
    }
    Ok(value)
}

fn indexed(name: &str, values: impl IntoIterator<Item = String>) -> Vec<(String, String)> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| (format!("{name}[{index}]"), value))
        .collect()
}

fn array<'a>(value: &'a Value, what: &str) -> ApiResult<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| ApiError::InvalidPayload(format!("expected `{what}` to be a list")))
}

fn u64_field(value: &Value, key: &str) -> ApiResult<u64> {
    value
        .get(key)
        .and_then(as_u64_lenient)
        .ok_or_else(|| ApiError::InvalidPayload(format!("missing integer field `{key}`")))
}

fn str_field<'a>(value: &'a Value, key: &str) -> ApiResult<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::InvalidPayload(format!("missing string field `{key}`")))
}

// Ids arrive as numbers or as numeric strings depending on the endpoint.
fn as_u64_lenient(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|text| text.parse().ok()))
}

fn f64_at(row: &[Value], index: usize) -> ApiResult<f64> {
    row.get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| ApiError::InvalidPayload(format!("expected number at column {index}")))
}

fn u64_at(row: &[Value], index: usize) -> ApiResult<u64> {
    row.get(index)
        .and_then(as_u64_lenient)
        .ok_or_else(|| ApiError::InvalidPayload(format!("expected id at column {index}")))
}

fn parse_numbers(text: &str) -> ApiResult<Vec<f64>> {
    text.split_whitespace()
        .map(|token| {
            token
                .parse()
                .map_err(|_| ApiError::InvalidPayload(format!("bad mesh number `{token}`")))
        })
        .collect()
}

/// Parses the X3D `IndexedTriangleSet` mesh the volume endpoint returns.
pub fn parse_x3d_mesh(mesh: &str) -> ApiResult<(Vec<Point3>, Vec<[usize; 3]>)> {
    let points = X3D_POINT_RE
        .captures(mesh)
        .ok_or_else(|| ApiError::InvalidPayload("volume mesh has no points".to_string()))?;
    let indices = X3D_INDEX_RE
        .captures(mesh)
        .ok_or_else(|| ApiError::InvalidPayload("volume mesh has no faces".to_string()))?;

    let coords = parse_numbers(&points[1])?;
    if coords.len() % 3 != 0 {
        return Err(ApiError::InvalidPayload(
            "volume point count is not a multiple of 3".to_string(),
        ));
    }
    let vertices: Vec<Point3> = coords
        .chunks_exact(3)
        .map(|chunk| [chunk[0], chunk[1], chunk[2]])
        .collect();

    let raw = parse_numbers(&indices[1])?;
    if raw.len() % 3 != 0 {
        return Err(ApiError::InvalidPayload(
            "volume index count is not a multiple of 3".to_string(),
        ));
    }
    let mut faces = Vec::with_capacity(raw.len() / 3);
    for chunk in raw.chunks_exact(3) {
        let face = [chunk[0] as usize, chunk[1] as usize, chunk[2] as usize];
        if face.iter().any(|index| *index >= vertices.len()) {
            return Err(ApiError::InvalidPayload(
                "volume face references a missing vertex".to_string(),
            ));
        }
        faces.push(face);
    }
    Ok((vertices, faces))
}

impl CatmaidApi for HttpCatmaidClient {
    fn list_projects(&self) -> ApiResult<Vec<ProjectInfo>> {
        let value = self.get("projects/", &[])?;
        array(&value, "projects")?
            .iter()
            .map(|entry| {
                Ok(ProjectInfo {
                    project_id: u64_field(entry, "id")?,
                    title: str_field(entry, "title")?.to_string(),
                })
            })
            .collect()
    }

    fn skeleton_ids_by_annotations(
        &self,
        project_id: ProjectId,
        annotations: &[String],
    ) -> ApiResult<Vec<SkeletonId>> {
        // The query endpoint treats a missing filter as "every skeleton".
        if annotations.is_empty() {
            return Ok(Vec::new());
        }
        let known = self.annotation_ids(project_id)?;
        let mut ids = Vec::with_capacity(annotations.len());
        for annotation in annotations {
            match known.get(annotation) {
                Some(id) => ids.push(id.to_string()),
                None => return Ok(Vec::new()),
            }
        }
        let mut form = indexed("annotated_with", ids);
        form.push(("types[0]".to_string(), "neuron".to_string()));
        let value = self.post(&format!("{project_id}/annotations/query-targets"), &form)?;

        let mut skeleton_ids = BTreeSet::new();
        for entity in array(&value["entities"], "entities")? {
            if let Some(skids) = entity.get("skeleton_ids").and_then(Value::as_array) {
                skeleton_ids.extend(skids.iter().filter_map(as_u64_lenient));
            }
        }
        Ok(skeleton_ids.into_iter().collect())
    }

    fn get_neuron(&self, project_id: ProjectId, skeleton_id: SkeletonId) -> ApiResult<Neuron> {
        let query = vec![
            ("with_connectors".to_string(), "true".to_string()),
            ("with_tags".to_string(), "true".to_string()),
        ];
        let value = self.get(
            &format!("{project_id}/skeletons/{skeleton_id}/compact-detail"),
            &query,
        )?;
        let parts = array(&value, "compact-detail")?;
        let mut neuron = Neuron::new(skeleton_id, self.neuron_name(project_id, skeleton_id)?);

        // [id, parent, user, x, y, z, radius, confidence]
        let rows = parts
            .first()
            .ok_or_else(|| ApiError::InvalidPayload("skeleton without node table".to_string()))?;
        for row in array(rows, "nodes")? {
            let row = array(row, "node row")?;
            let parent_id = row.get(1).and_then(as_u64_lenient);
            let mut node = Node::new(
                u64_at(row, 0)?,
                parent_id,
                [f64_at(row, 3)?, f64_at(row, 4)?, f64_at(row, 5)?],
                f64_at(row, 6)?,
            );
            node.confidence = u64_at(row, 7).unwrap_or(5).min(5) as u8;
            neuron.nodes.push(node);
        }

        // [node, connector, relation, x, y, z]
        if let Some(rows) = parts.get(1) {
            for row in array(rows, "connectors")? {
                let row = array(row, "connector row")?;
                let relation = match u64_at(row, 2)? {
                    0 => ConnectorRelation::Presynaptic,
                    1 => ConnectorRelation::Postsynaptic,
                    _ => ConnectorRelation::Other,
                };
                neuron.connectors.push(Connector {
                    connector_id: u64_at(row, 1)?,
                    node_id: u64_at(row, 0)?,
                    location: [f64_at(row, 3)?, f64_at(row, 4)?, f64_at(row, 5)?],
                    relation,
                });
            }
        }

        if let Some(tags) = parts.get(2).and_then(Value::as_object) {
            for (label, nodes) in tags {
                let node_ids: BTreeSet<NodeId> = array(nodes, "tag nodes")?
                    .iter()
                    .filter_map(as_u64_lenient)
                    .collect();
                neuron.tags.insert(label.clone(), node_ids);
            }
        }

        if let Some(annotations) = self
            .annotations_for_skeletons(project_id, &[skeleton_id])?
            .remove(&skeleton_id)
        {
            neuron.annotations = annotations.into_iter().collect();
        }
        Ok(neuron)
    }

    fn annotation_list(&self, project_id: ProjectId) -> ApiResult<Vec<String>> {
        Ok(self.annotation_ids(project_id)?.into_keys().collect())
    }

    fn annotations_for_skeletons(
        &self,
        project_id: ProjectId,
        skeleton_ids: &[SkeletonId],
    ) -> ApiResult<BTreeMap<SkeletonId, Vec<String>>> {
        let form = indexed(
            "skeleton_ids",
            skeleton_ids.iter().map(|skeleton_id| skeleton_id.to_string()),
        );
        let value = self.post(&format!("{project_id}/annotations/forskeletons"), &form)?;
        let names = value
            .get("annotations")
            .and_then(Value::as_object)
            .ok_or_else(|| ApiError::InvalidPayload("missing annotation names".to_string()))?;
        let mut result = BTreeMap::new();
        if let Some(skeletons) = value.get("skeletons").and_then(Value::as_object) {
            for (skeleton_id, entries) in skeletons {
                let skeleton_id: SkeletonId = skeleton_id
                    .parse()
                    .map_err(|_| ApiError::InvalidPayload(format!("bad skeleton id `{skeleton_id}`")))?;
                let mut annotations = Vec::new();
                for entry in array(entries, "skeleton annotations")? {
                    let annotation_id = u64_field(entry, "id")?;
                    if let Some(name) = names.get(&annotation_id.to_string()).and_then(Value::as_str) {
                        annotations.push(name.to_string());
                    }
                }
                result.insert(skeleton_id, annotations);
            }
        }
        Ok(result)
    }

    fn count_annotated(&self, project_id: ProjectId, annotation: &str) -> ApiResult<usize> {
        let known = self.annotation_ids(project_id)?;
        let Some(annotation_id) = known.get(annotation) else {
            return Ok(0);
        };
        let form = vec![("annotated_with[0]".to_string(), annotation_id.to_string())];
        let value = self.post(&format!("{project_id}/annotations/query-targets"), &form)?;
        Ok(array(&value["entities"], "entities")?.len())
    }

    fn node_details(&self, project_id: ProjectId, node_ids: &[NodeId]) -> ApiResult<Vec<NodeDetail>> {
        let form = indexed("treenode_ids", node_ids.iter().map(|id| id.to_string()));
        let value = self.post(&format!("{project_id}/treenodes/compact-detail"), &form)?;
        // [id, parent, x, y, z, confidence, radius, skeleton, edition_time, user]
        array(&value, "treenode details")?
            .iter()
            .map(|row| {
                let row = array(row, "treenode row")?;
                let seconds = f64_at(row, 8)?;
                let edition_time = DateTime::<Utc>::from_timestamp(
                    seconds.trunc() as i64,
                    (seconds.fract() * 1e9) as u32,
                )
                .ok_or_else(|| ApiError::InvalidPayload(format!("bad edition time {seconds}")))?;
                Ok(NodeDetail {
                    node_id: u64_at(row, 0)?,
                    skeleton_id: u64_at(row, 7)?,
                    edition_time,
                    editor_id: u64_at(row, 9)?,
                })
            })
            .collect()
    }

    fn user_list(&self) -> ApiResult<Vec<UserRecord>> {
        let value = self.get("user-list", &[])?;
        array(&value, "users")?
            .iter()
            .map(|entry| {
                Ok(UserRecord {
                    user_id: u64_field(entry, "id")?,
                    login: str_field(entry, "login")?.to_string(),
                })
            })
            .collect()
    }

    fn neuron_id(&self, project_id: ProjectId, skeleton_id: SkeletonId) -> ApiResult<u64> {
        let value = self.get(&format!("{project_id}/skeleton/{skeleton_id}/neuronname"), &[])?;
        u64_field(&value, "neuronid")
    }

    fn upload_neuron(
        &self,
        project_id: ProjectId,
        neuron: &Neuron,
        request: &UploadRequest,
    ) -> ApiResult<UploadResponse> {
        let url = self.url(&format!("{project_id}/skeletons/import"));
        let file = multipart::Part::text(to_swc(neuron))
            .file_name("skeleton.swc")
            .mime_str("text/plain")
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        let mut form = multipart::Form::new()
            .part("file", file)
            .text("name", neuron.name.clone())
            .text("force", request.force_id.to_string())
            .text("auto_id", "true");
        if let Some(skeleton_id) = request.skeleton_id {
            form = form.text("skeleton_id", skeleton_id.to_string());
        }
        if let Some(neuron_id) = request.neuron_id {
            form = form.text("neuron_id", neuron_id.to_string());
        }
        let value = send(self.authorize(self.client.post(&url).multipart(form)), &url)?;

        let skeleton_id = u64_field(&value, "skeleton_id")?;
        let neuron_id = u64_field(&value, "neuron_id")?;
        let mut node_id_map = BTreeMap::new();
        if let Some(map) = value.get("node_id_map").and_then(Value::as_object) {
            for (old, new) in map {
                if let (Ok(old), Some(new)) = (old.parse::<NodeId>(), as_u64_lenient(new)) {
                    node_id_map.insert(old, new);
                }
            }
        }

        if request.import_connectors && !neuron.connectors.is_empty() {
            let existing = if request.reuse_existing_connectors {
                self.list_connectors(project_id)?
            } else {
                Vec::new()
            };
            for connector in &neuron.connectors {
                let Some(node_id) = node_id_map.get(&connector.node_id).copied() else {
                    continue;
                };
                let connector_id = match existing
                    .iter()
                    .find(|record| record.location == connector.location)
                {
                    Some(record) => record.connector_id,
                    None => self.create_connector(project_id, connector.location)?,
                };
                self.link_connector(project_id, node_id, connector_id, connector.relation)?;
            }
        }

        if request.import_tags {
            let mut by_node: BTreeMap<NodeId, Vec<String>> = BTreeMap::new();
            for (label, nodes) in &neuron.tags {
                for node in nodes {
                    if let Some(new_id) = node_id_map.get(node) {
                        by_node.entry(*new_id).or_default().push(label.clone());
                    }
                }
            }
            for (node_id, labels) in by_node {
                self.add_tags(project_id, node_id, &labels)?;
            }
        }

        if request.import_annotations && !neuron.annotations.is_empty() {
            let annotations: Vec<String> = neuron.annotations.iter().cloned().collect();
            self.add_annotations(project_id, &[skeleton_id], &annotations)?;
        }

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
        let mut form = indexed(
            "skeleton_ids",
            skeleton_ids.iter().map(|skeleton_id| skeleton_id.to_string()),
        );
        form.extend(indexed("annotations", annotations.iter().cloned()));
        self.post(&format!("{project_id}/annotations/add"), &form)?;
        Ok(())
    }

    fn remove_annotations(
        &self,
        project_id: ProjectId,
        skeleton_ids: &[SkeletonId],
        annotations: &[String],
    ) -> ApiResult<()> {
        let known = self.annotation_ids(project_id)?;
        let annotation_ids: Vec<String> = annotations
            .iter()
            .filter_map(|annotation| known.get(annotation))
            .map(|id| id.to_string())
            .collect();
        if annotation_ids.is_empty() {
            return Ok(());
        }
        let mut entity_ids = Vec::with_capacity(skeleton_ids.len());
        for skeleton_id in skeleton_ids {
            entity_ids.push(self.neuron_id(project_id, *skeleton_id)?.to_string());
        }
        let mut form = indexed("entity_ids", entity_ids);
        form.extend(indexed("annotation_ids", annotation_ids));
        self.post(&format!("{project_id}/annotations/remove"), &form)?;
        Ok(())
    }

    fn list_connectors(&self, project_id: ProjectId) -> ApiResult<Vec<ConnectorRecord>> {
        let query = vec![("with_partners".to_string(), "true".to_string())];
        let value = self.get(&format!("{project_id}/connectors/"), &query)?;
        let partners = value.get("partners").and_then(Value::as_object);
        array(&value["connectors"], "connectors")?
            .iter()
            .map(|row| {
                let row = array(row, "connector row")?;
                let connector_id = u64_at(row, 0)?;
                let linked = partners
                    .and_then(|partners| partners.get(&connector_id.to_string()))
                    .and_then(Value::as_array)
                    .is_some_and(|links| !links.is_empty());
                Ok(ConnectorRecord {
                    connector_id,
                    location: [f64_at(row, 1)?, f64_at(row, 2)?, f64_at(row, 3)?],
                    linked,
                })
            })
            .collect()
    }

    fn delete_connector(&self, project_id: ProjectId, connector_id: ConnectorId) -> ApiResult<()> {
        let form = vec![("connector_id".to_string(), connector_id.to_string())];
        self.post(&format!("{project_id}/connector/delete"), &form)?;
        Ok(())
    }

    fn add_node(
        &self,
        project_id: ProjectId,
        location: Point3,
        parent_id: Option<NodeId>,
        confidence: u8,
    ) -> ApiResult<NodeId> {
        let mut form = vec![
            ("x".to_string(), location[0].to_string()),
            ("y".to_string(), location[1].to_string()),
            ("z".to_string(), location[2].to_string()),
            ("radius".to_string(), "-1".to_string()),
            ("confidence".to_string(), confidence.to_string()),
        ];
        if let Some(parent_id) = parent_id {
            form.push(("parent_id".to_string(), parent_id.to_string()));
        }
        let value = self.post(&format!("{project_id}/treenode/create"), &form)?;
        u64_field(&value, "treenode_id")
    }

    fn delete_nodes(&self, project_id: ProjectId, node_ids: &[NodeId]) -> ApiResult<()> {
        for node_id in node_ids {
            let form = vec![("treenode_id".to_string(), node_id.to_string())];
            self.post(&format!("{project_id}/treenode/delete"), &form)?;
        }
        Ok(())
    }

    fn get_volume(&self, project_id: ProjectId, volume_id: u64) -> ApiResult<Volume> {
        let value = self.get(&format!("{project_id}/volumes/{volume_id}/"), &[])?;
        let (vertices, faces) = parse_x3d_mesh(str_field(&value, "mesh")?)?;
        Ok(Volume {
            volume_id,
            name: str_field(&value, "name")?.to_string(),
            vertices,
            faces,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_x3d_mesh, HttpCatmaidClient, ServerCredentials};
    use crate::remote::api::CatmaidApi;

    fn client(base_url: &str) -> HttpCatmaidClient {
        HttpCatmaidClient::new(
            base_url,
            ServerCredentials {
                api_token: "t".to_string(),
                http_user: None,
                http_password: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn parses_indexed_triangle_set() {
        let mesh = "<IndexedTriangleSet index='0 1 2 0 2 3'>\
                    <Coordinate point='0 0 0 1 0 0 1 1 0 0 1 0'/></IndexedTriangleSet>";
        let (vertices, faces) = parse_x3d_mesh(mesh).unwrap();
        assert_eq!(vertices.len(), 4);
        assert_eq!(faces, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn rejects_faces_past_vertex_table() {
        let mesh = "<IndexedTriangleSet index='0 1 9'><Coordinate point='0 0 0 1 0 0 1 1 0'/>";
        assert!(parse_x3d_mesh(mesh).is_err());
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        assert_eq!(
            client("https://catmaid.example.org/").base_url(),
            "https://catmaid.example.org"
        );
    }

    // Port 9 (discard) is never served; any request would fail with Transport.
    #[test]
    fn empty_annotation_filter_matches_nothing_without_a_request() {
        let hits = client("http://127.0.0.1:9")
            .skeleton_ids_by_annotations(1, &[])
            .unwrap();
        assert!(hits.is_empty());
    }
}
