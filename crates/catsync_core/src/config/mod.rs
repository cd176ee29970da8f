//! Connection configuration.
//!
//! # Responsibility
//! - Load the JSON connection config and validate it once.
//! - Expand config nicknames (`fafb`, `vnc`, ...) into file paths.
//!
//! # Invariants
//! - Config errors are fatal and name the file and fields involved.

pub mod connection_config;
pub mod nicknames;

use crate::model::neuron::ProjectId;
use crate::remote::api::ApiError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub use connection_config::{ConnectionConfig, ProjectEndpoint, ResolvedConfig};
pub use nicknames::{NicknameTable, CUSTOM_NICKNAMES_FILE, DEFAULT_CONFIG_FILE};

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "CATSYNC_CONFIG_DIR";
const DEFAULT_CONFIG_DIR: &str = "connection_configs";

/// Error raised while loading or applying configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    MissingSourceFields { config: String },
    UnknownAccount(String),
    /// HTTP client for a server could not be created.
    Client { url: String, source: ApiError },
    /// The API key cannot see the configured project.
    NoProjectAccess {
        config: String,
        project_id: ProjectId,
        source: ApiError,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(
                f,
                "no config file found at {}: {source}; see the example configs for the expected layout",
                path.display()
            ),
            Self::Parse { path, source } => {
                write!(f, "config file {} is improperly formatted: {source}", path.display())
            }
            Self::MissingSourceFields { config } => write!(
                f,
                "the following fields must appear in {config} and not be null: \
                 'source_catmaid_url', 'source_catmaid_account_to_use', and 'source_project_id'"
            ),
            Self::UnknownAccount(account) => {
                write!(f, "no API key configured for account `{account}`")
            }
            Self::Client { url, source } => write!(f, "cannot connect to {url}: {source}"),
            Self::NoProjectAccess {
                config, project_id, ..
            } => write!(
                f,
                "the API key provided in {config} does not appear to have access to project \
                 {project_id}; provide a different API key or project id"
            ),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Client { source, .. } => Some(source),
            Self::NoProjectAccess { source, .. } => Some(source),
            Self::MissingSourceFields { .. } | Self::UnknownAccount(_) => None,
        }
    }
}

/// Config directory from `CATSYNC_CONFIG_DIR`, else `./connection_configs`.
pub fn default_config_dir() -> PathBuf {
    std::env::var_os(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR))
}

/// Resolves `name` (nickname, path or filename) and loads the config.
///
/// Returns the path that was read next to the parsed config.
pub fn load_connection_config(
    name: &str,
    config_dir: &Path,
) -> Result<(PathBuf, ConnectionConfig), ConfigError> {
    let nicknames = NicknameTable::load(config_dir)?;
    let path = nicknames.resolve(name, config_dir);
    let config = ConnectionConfig::from_file(&path)?;
    Ok((path, config))
}
