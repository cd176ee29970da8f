//! Core logic for syncing, transforming and curating neurons between two
//! CATMAID projects.
//! This crate owns every invariant; the CLI is a thin front end.

pub mod cache;
pub mod config;
pub mod connection;
pub mod logging;
pub mod model;
pub mod operator;
pub mod remote;
pub mod service;
pub mod transform;

pub use config::{default_config_dir, load_connection_config, ConfigError, ConnectionConfig};
pub use connection::{connect, ProjectHandle, SyncContext};
pub use logging::{
    default_log_level, init_logging, init_logging_with_echo, logging_status, LoggingError,
};
pub use model::link::{LinkRelation, LinkingAnnotation, VolumePruneMode};
pub use model::neuron::{Neuron, Node, NodeId, Point3, ProjectId, SkeletonId};
pub use operator::{BatchOperator, ConsoleOperator, Operator, ScriptedOperator};
pub use remote::api::{ApiError, ApiResult, CatmaidApi};
pub use service::error::{ServiceError, ServiceResult};
pub use service::options::{
    ElasticOptions, PushOptions, RadiusPruneOptions, TranslateOptions, UploadOptions,
    VolumePruneOptions,
};
pub use transform::{TransformError, TransformResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
