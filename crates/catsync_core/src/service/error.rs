//! Error shared by every use-case service.

use crate::config::ConfigError;
use crate::connection::{ProjectHandle, SyncContext};
use crate::model::neuron::TreeError;
use crate::model::swc::SwcError;
use crate::remote::api::ApiError;
use crate::transform::TransformError;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service-level error.
#[derive(Debug)]
pub enum ServiceError {
    /// The operation uploads to a target project but none is configured.
    TargetNotConfigured,
    /// Options rejected before any remote call.
    InvalidOptions(String),
    /// Dummy-node cleanup found nothing to delete.
    NoDummyNodes,
    Api(ApiError),
    Transform(TransformError),
    Config(ConfigError),
    Tree(TreeError),
    Swc(SwcError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TargetNotConfigured => write!(
                f,
                "no target project configured; add target_* fields to the connection config"
            ),
            Self::InvalidOptions(message) => write!(f, "invalid options: {message}"),
            Self::NoDummyNodes => write!(f, "no neurons appear to have dummy nodes"),
            Self::Api(err) => write!(f, "{err}"),
            Self::Transform(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Tree(err) => write!(f, "{err}"),
            Self::Swc(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Api(err) => Some(err),
            Self::Transform(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Tree(err) => Some(err),
            Self::Swc(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ApiError> for ServiceError {
    fn from(value: ApiError) -> Self {
        Self::Api(value)
    }
}

impl From<TransformError> for ServiceError {
    fn from(value: TransformError) -> Self {
        Self::Transform(value)
    }
}

impl From<ConfigError> for ServiceError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TreeError> for ServiceError {
    fn from(value: TreeError) -> Self {
        Self::Tree(value)
    }
}

impl From<SwcError> for ServiceError {
    fn from(value: SwcError) -> Self {
        Self::Swc(value)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Target project of `ctx`, or `TargetNotConfigured`.
pub fn require_target(ctx: &SyncContext) -> ServiceResult<&ProjectHandle> {
    ctx.target.as_ref().ok_or(ServiceError::TargetNotConfigured)
}
