//! Geometric transforms and prunes applied to in-memory neurons.
//!
//! # Responsibility
//! - Move node and connector coordinates (translation, affine, elastic warp).
//! - Cut skeletons down by volume or by node radius.
//! - Record what was done in the neuron name and annotations.
//!
//! # Invariants
//! - Transforms only touch the neuron they are given; nothing is uploaded.
//! - Every transform appends a name suffix and an audit annotation.

pub mod affine;
pub mod elastic;
pub mod prune;
pub mod translate;

use crate::model::neuron::TreeError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Radius marking primary neurite nodes.
pub const PRIMARY_NEURITE_RADIUS: f64 = 500.0;

/// Error raised by a transform or prune.
#[derive(Debug)]
pub enum TransformError {
    /// Translation unit other than `nm` or `pixel`.
    InvalidUnit(String),
    /// Affine file is not 4 rows of 4 numbers.
    MalformedAffineFile { path: PathBuf, message: String },
    SingularMatrix,
    /// The neuron was already transformed this way.
    AlreadyTransformed { name: String, transform: &'static str },
    /// Primary neurite end is missing or not unique.
    PrimaryNeurite { name: String, message: String },
    /// The operation left the skeleton in several pieces.
    Fragmented { name: String, fragments: usize },
    ToolNotFound { executable: String },
    ToolFailed {
        executable: String,
        args: Vec<String>,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// Point warper returned output that cannot be used.
    WarpOutput(String),
    Tree(TreeError),
    Io(std::io::Error),
}

impl Display for TransformError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUnit(unit) => {
                write!(f, "expected unit to be 'nm' or 'pixel' but got `{unit}`")
            }
            Self::MalformedAffineFile { path, message } => {
                write!(f, "invalid affine transform file {}: {message}", path.display())
            }
            Self::SingularMatrix => write!(f, "affine matrix is not invertible"),
            Self::AlreadyTransformed { name, transform } => write!(
                f,
                "{transform} was requested for \"{name}\", which was already pruned; refusing"
            ),
            Self::PrimaryNeurite { name, message } => write!(f, "{name}: {message}"),
            Self::Fragmented { name, fragments } => write!(
                f,
                "{name} was cut into {fragments} fragments, which is not supposed to happen"
            ),
            Self::ToolNotFound { executable } => write!(
                f,
                "could not find executable `{executable}`; install elastix or set {}",
                elastic::TRANSFORMIX_ENV_BIN
            ),
            Self::ToolFailed {
                executable,
                args,
                status,
                stdout,
                stderr,
            } => write!(
                f,
                "{executable} {} failed (status={status:?}); stdout:\n{stdout}\nstderr:\n{stderr}",
                args.join(" ")
            ),
            Self::WarpOutput(message) => write!(f, "unusable warp output: {message}"),
            Self::Tree(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TransformError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Tree(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TreeError> for TransformError {
    fn from(value: TreeError) -> Self {
        Self::Tree(value)
    }
}

impl From<std::io::Error> for TransformError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

pub type TransformResult<T> = Result<T, TransformError>;
