//! Source/target project handles and the context passed to every operation.
//!
//! # Responsibility
//! - Build API clients from a validated connection config.
//! - Hold the source and optional target project, the operator and the
//!   volume cache for one run.
//!
//! # Invariants
//! - There is no process-wide connection state; every operation receives a
//!   `SyncContext`.
//! - A context always has a source; the target may be absent for read-only
//!   work.

use crate::cache::VolumeCache;
use crate::config::{load_connection_config, ConfigError, ProjectEndpoint};
use crate::model::neuron::{ProjectId, SkeletonId};
use crate::operator::Operator;
use crate::remote::api::{ApiError, ApiResult, CatmaidApi};
use crate::remote::http::HttpCatmaidClient;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;

/// One project on one server, plus the client used to reach it.
#[derive(Clone)]
pub struct ProjectHandle {
    pub server: String,
    pub project_id: ProjectId,
    pub api: Arc<dyn CatmaidApi>,
}

impl std::fmt::Debug for ProjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectHandle")
            .field("server", &self.server)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

impl ProjectHandle {
    pub fn new(server: impl Into<String>, project_id: ProjectId, api: Arc<dyn CatmaidApi>) -> Self {
        Self {
            server: server.into(),
            project_id,
            api,
        }
    }

    /// Skeletons carrying every given annotation.
    ///
    /// Annotations unknown to the server match nothing.
    pub fn skeleton_ids_by_annotations(&self, annotations: &[String]) -> ApiResult<Vec<SkeletonId>> {
        match self.api.skeleton_ids_by_annotations(self.project_id, annotations) {
            Err(ApiError::NotFound(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Title of the current project, `NotFound` when the account cannot see it.
    pub fn project_title(&self) -> ApiResult<String> {
        self.api
            .list_projects()?
            .into_iter()
            .find(|project| project.project_id == self.project_id)
            .map(|project| project.title)
            .ok_or_else(|| ApiError::NotFound(format!("project {}", self.project_id)))
    }

    fn describe(&self, label: &str) -> ApiResult<String> {
        Ok(format!(
            "{label}: {} {} {}",
            self.server,
            self.project_id,
            self.project_title()?
        ))
    }
}

/// Everything one run of the tools needs.
pub struct SyncContext {
    pub source: ProjectHandle,
    pub target: Option<ProjectHandle>,
    pub operator: Arc<dyn Operator>,
    pub volumes: VolumeCache,
}

impl SyncContext {
    pub fn new(
        source: ProjectHandle,
        target: Option<ProjectHandle>,
        operator: Arc<dyn Operator>,
    ) -> Self {
        Self {
            source,
            target,
            operator,
            volumes: VolumeCache::new(),
        }
    }

    pub fn operator(&self) -> &dyn Operator {
        self.operator.as_ref()
    }

    pub fn source_project_id(&self) -> ProjectId {
        self.source.project_id
    }

    pub fn target_project_id(&self) -> Option<ProjectId> {
        self.target.as_ref().map(|target| target.project_id)
    }

    /// Switches the source project; with `verbose` the new project is
    /// reported through the operator.
    pub fn set_source_project_id(&mut self, project_id: ProjectId, verbose: bool) -> ApiResult<ProjectId> {
        self.source.project_id = project_id;
        if verbose {
            let line = self.source.describe("Source project")?;
            self.operator.notify(&line);
        }
        Ok(project_id)
    }

    /// Switches the target project; `None` when no target is configured.
    pub fn set_target_project_id(
        &mut self,
        project_id: ProjectId,
        verbose: bool,
    ) -> ApiResult<Option<ProjectId>> {
        let Some(target) = self.target.as_mut() else {
            self.operator.notify("Target project not defined.");
            return Ok(None);
        };
        target.project_id = project_id;
        if verbose {
            let line = target.describe("Target project")?;
            self.operator.notify(&line);
        }
        Ok(Some(project_id))
    }

    /// Sets both projects; the target defaults to the source project id.
    pub fn set_project_ids(
        &mut self,
        source_id: ProjectId,
        target_id: Option<ProjectId>,
        verbose: bool,
    ) -> ApiResult<(ProjectId, Option<ProjectId>)> {
        let source = self.set_source_project_id(source_id, verbose)?;
        let target = self.set_target_project_id(target_id.unwrap_or(source_id), verbose)?;
        Ok((source, target))
    }

    pub fn project_ids(&self) -> (ProjectId, Option<ProjectId>) {
        (self.source_project_id(), self.target_project_id())
    }

    /// Drops cached volumes so the next prune refetches them.
    pub fn clear_cache(&self) {
        self.volumes.clear();
        info!("event=cache_cleared module=connection status=ok");
    }
}

fn http_handle(endpoint: &ProjectEndpoint) -> Result<ProjectHandle, ConfigError> {
    let client = HttpCatmaidClient::new(&endpoint.url, endpoint.credentials.clone()).map_err(
        |source| ConfigError::Client {
            url: endpoint.url.clone(),
            source,
        },
    )?;
    Ok(ProjectHandle::new(
        endpoint.url.clone(),
        endpoint.project_id,
        Arc::new(client),
    ))
}

fn verify_access(
    handle: &ProjectHandle,
    label: &str,
    config_name: &str,
    operator: &dyn Operator,
) -> Result<(), ConfigError> {
    let line = handle
        .describe(label)
        .map_err(|source| ConfigError::NoProjectAccess {
            config: config_name.to_string(),
            project_id: handle.project_id,
            source,
        })?;
    operator.notify(&line);
    Ok(())
}

/// Loads `config_name` from `config_dir`, connects to the configured
/// projects and verifies the API key can see them.
pub fn connect(
    config_name: &str,
    config_dir: &Path,
    operator: Arc<dyn Operator>,
) -> Result<SyncContext, ConfigError> {
    let (path, config) = load_connection_config(config_name, config_dir)?;
    let display_name = path.display().to_string();
    let resolved = config.resolve(&display_name)?;

    let source = http_handle(&resolved.source)?;
    verify_access(&source, "Source project", &display_name, operator.as_ref())?;

    let target = match &resolved.target {
        Some(endpoint) => {
            let target = http_handle(endpoint)?;
            verify_access(&target, "Target project", &display_name, operator.as_ref())?;
            Some(target)
        }
        None => None,
    };
    if let Some(message) = &resolved.target_warning {
        warn!("event=partial_target_config module=connection status=warn config={display_name}");
        operator.notify(&format!("WARNING: {message}"));
    }

    info!(
        "event=connected module=connection status=ok source_project_id={} target_project_id={}",
        source.project_id,
        target
            .as_ref()
            .map_or("none".to_string(), |target| target.project_id.to_string())
    );
    Ok(SyncContext::new(source, target, operator))
}

#[cfg(test)]
mod tests {
    use super::{ProjectHandle, SyncContext};
    use crate::operator::ScriptedOperator;
    use crate::remote::memory::InMemoryCatmaid;
    use std::sync::Arc;

    fn context() -> (Arc<ScriptedOperator>, SyncContext) {
        let server = Arc::new(InMemoryCatmaid::new());
        server.add_project(1, "left");
        server.add_project(2, "right");
        let operator = Arc::new(ScriptedOperator::approving());
        let source = ProjectHandle::new("https://s", 1, server.clone());
        let target = ProjectHandle::new("https://s", 1, server);
        (operator.clone(), SyncContext::new(source, Some(target), operator))
    }

    #[test]
    fn set_project_ids_defaults_target_to_source() {
        let (operator, mut ctx) = context();
        let ids = ctx.set_project_ids(2, None, true).unwrap();
        assert_eq!(ids, (2, Some(2)));
        assert_eq!(
            operator.messages(),
            vec![
                "Source project: https://s 2 right".to_string(),
                "Target project: https://s 2 right".to_string(),
            ]
        );
    }

    #[test]
    fn unknown_project_is_reported_as_error() {
        let (_, mut ctx) = context();
        assert!(ctx.set_source_project_id(9, true).is_err());
    }

    #[test]
    fn missing_target_is_reported() {
        let (operator, mut ctx) = context();
        ctx.target = None;
        assert_eq!(ctx.set_target_project_id(2, false).unwrap(), None);
        assert_eq!(operator.messages(), vec!["Target project not defined.".to_string()]);
    }

    #[test]
    fn unknown_annotation_matches_nothing() {
        let (_, ctx) = context();
        let skids = ctx
            .source
            .skeleton_ids_by_annotations(&["nothing here".to_string()])
            .unwrap();
        assert!(skids.is_empty());
    }
}
