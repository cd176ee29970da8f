//! Connection config file.
//!
//! # Invariants
//! - The three source fields are required and non-empty.
//! - A target is used only when all three target fields are present;
//!   a partial target is dropped with a warning.

use crate::config::ConfigError;
use crate::model::neuron::ProjectId;
use crate::remote::http::ServerCredentials;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Raw JSON shape of a connection config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub source_catmaid_url: Option<String>,
    pub source_catmaid_account_to_use: Option<String>,
    pub source_project_id: Option<ProjectId>,
    pub target_catmaid_url: Option<String>,
    pub target_catmaid_account_to_use: Option<String>,
    pub target_project_id: Option<ProjectId>,
    pub catmaid_account_api_keys: BTreeMap<String, String>,
    pub catmaid_http_username: Option<String>,
    pub catmaid_http_password: Option<String>,
}

/// One server/project pair with the credentials to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectEndpoint {
    pub url: String,
    pub project_id: ProjectId,
    pub credentials: ServerCredentials,
}

/// Config after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub source: ProjectEndpoint,
    pub target: Option<ProjectEndpoint>,
    /// Set when some but not all target fields were given.
    pub target_warning: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

impl ConnectionConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validates required fields and resolves account names to API keys.
    pub fn resolve(&self, config_name: &str) -> Result<ResolvedConfig, ConfigError> {
        let (Some(url), Some(account), Some(project_id)) = (
            present(&self.source_catmaid_url),
            present(&self.source_catmaid_account_to_use),
            self.source_project_id,
        ) else {
            return Err(ConfigError::MissingSourceFields {
                config: config_name.to_string(),
            });
        };
        let source = self.endpoint(url, account, project_id)?;

        let target_fields = (
            present(&self.target_catmaid_url),
            present(&self.target_catmaid_account_to_use),
            self.target_project_id,
        );
        let (target, target_warning) = match target_fields {
            (Some(url), Some(account), Some(project_id)) => {
                (Some(self.endpoint(url, account, project_id)?), None)
            }
            (None, None, None) => (None, None),
            _ => (
                None,
                Some(format!(
                    "You have configured some target project variables but not all. The \
                     following fields must appear in {config_name} and not be null: \
                     'target_catmaid_url', 'target_catmaid_account_to_use', and \
                     'target_project_id'. Continuing without a target project."
                )),
            ),
        };

        Ok(ResolvedConfig {
            source,
            target,
            target_warning,
        })
    }

    fn endpoint(
        &self,
        url: &str,
        account: &str,
        project_id: ProjectId,
    ) -> Result<ProjectEndpoint, ConfigError> {
        let api_token = self
            .catmaid_account_api_keys
            .get(account)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownAccount(account.to_string()))?;
        Ok(ProjectEndpoint {
            url: url.to_string(),
            project_id,
            credentials: ServerCredentials {
                api_token,
                http_user: present(&self.catmaid_http_username).map(str::to_string),
                http_password: self.catmaid_http_password.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionConfig;
    use crate::config::ConfigError;

    fn parse(json: &str) -> ConnectionConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn missing_source_field_lists_required_fields() {
        let config = parse(r#"{"source_catmaid_url": "https://a", "source_project_id": 1}"#);
        let err = config.resolve("cfg.json").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSourceFields { .. }));
        assert!(err.to_string().contains("source_catmaid_account_to_use"));
    }

    #[test]
    fn partial_target_is_dropped_with_warning() {
        let config = parse(
            r#"{
                "source_catmaid_url": "https://a",
                "source_catmaid_account_to_use": "me",
                "source_project_id": 1,
                "target_project_id": 2,
                "catmaid_account_api_keys": {"me": "token"}
            }"#,
        );
        let resolved = config.resolve("cfg.json").unwrap();
        assert!(resolved.target.is_none());
        assert!(resolved.target_warning.unwrap().contains("Continuing without"));
        assert_eq!(resolved.source.credentials.api_token, "token");
    }

    #[test]
    fn unknown_account_is_rejected() {
        let config = parse(
            r#"{
                "source_catmaid_url": "https://a",
                "source_catmaid_account_to_use": "ghost",
                "source_project_id": 1
            }"#,
        );
        assert!(matches!(
            config.resolve("cfg.json"),
            Err(ConfigError::UnknownAccount(account)) if account == "ghost"
        ));
    }
}
