//! Linking annotations between a target neuron and its source neuron.
//!
//! # Responsibility
//! - Encode the relation a target neuron has to its source as an enumerated
//!   tag instead of free text.
//! - Format and parse the `LINKED NEURON - ...` annotation string, which is
//!   the only persisted link between two projects.
//!
//! # Invariants
//! - `LinkingAnnotation::parse(a.to_annotation())` returns `a`.
//! - Keyword matching always prefers the longest keyword, so a relation that
//!   contains another relation's text is never mistaken for it.

use crate::model::neuron::{ProjectId, SkeletonId};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Prefix shared by every linking annotation.
pub const LINK_PREFIX: &str = "LINKED NEURON";
/// Prefix of the timestamp annotation written on every upload.
pub const UPDATED_FROM_PREFIX: &str = "UPDATED FROM LINKED NEURON";

static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^LINKED NEURON - (?:(?P<relation>.+?) )?skeleton id (?P<skid>\d+) in project id (?P<pid>\d+) on server (?P<server>\S+)$",
    )
    .expect("valid linking annotation regex")
});
static AFFINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^affine transformation using (?P<file>.+) of$").expect("valid affine regex")
});
static VOLUME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^pruned \((?P<mode>first entry, last exit|strict)\) by vol (?P<vol>\d+) of$")
        .expect("valid volume prune regex")
});

/// How the volume prune decides which nodes to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumePruneMode {
    /// Keep the primary neurite between its first entry and last exit.
    FirstEntryLastExit,
    /// Drop every node outside the volume.
    Strict,
}

impl VolumePruneMode {
    /// Text used inside annotations, e.g. `first entry, last exit`.
    pub fn label(self) -> &'static str {
        match self {
            Self::FirstEntryLastExit => "first entry, last exit",
            Self::Strict => "strict",
        }
    }

    /// Parses `fele` / `strict` as used on the command line.
    pub fn from_cli(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fele" => Some(Self::FirstEntryLastExit),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

/// Relation between a target neuron and the source neuron it was made from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRelation {
    /// Plain link with no relation text.
    Unspecified,
    Copy,
    Translation,
    Affine { transform_file: String },
    Elastic { flipped: bool },
    VolumePrune { volume_id: u64, mode: VolumePruneMode },
    RadiusPrune,
    /// Relation text this version does not know how to replay.
    Other(String),
}

impl LinkRelation {
    /// Relation text as it appears inside the annotation (empty for
    /// `Unspecified`).
    pub fn text(&self) -> String {
        match self {
            Self::Unspecified => String::new(),
            Self::Copy => "copy of".to_string(),
            Self::Translation => "translation of".to_string(),
            Self::Affine { transform_file } => {
                format!("affine transformation using {transform_file} of")
            }
            Self::Elastic { flipped: false } => "elastic transformation of".to_string(),
            Self::Elastic { flipped: true } => "elastic transformation and flipped of".to_string(),
            Self::VolumePrune { volume_id, mode } => {
                format!("pruned ({}) by vol {volume_id} of", mode.label())
            }
            Self::RadiusPrune => "radius pruned of".to_string(),
            Self::Other(text) => text.clone(),
        }
    }

    /// Maps relation text to a relation.
    ///
    /// Exact forms are tried first; otherwise the longest known keyword
    /// contained in the text wins; anything else is kept as `Other`.
    pub fn from_text(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Self::Unspecified;
        }
        if let Some(caps) = AFFINE_RE.captures(text) {
            return Self::Affine {
                transform_file: caps["file"].to_string(),
            };
        }
        if let Some(caps) = VOLUME_RE.captures(text) {
            if let Ok(volume_id) = caps["vol"].parse() {
                let mode = if &caps["mode"] == "strict" {
                    VolumePruneMode::Strict
                } else {
                    VolumePruneMode::FirstEntryLastExit
                };
                return Self::VolumePrune { volume_id, mode };
            }
        }
        Self::match_keyword(text).unwrap_or_else(|| Self::Other(text.to_string()))
    }

    /// Substring match against the fixed relation keywords, longest first.
    pub fn match_keyword(text: &str) -> Option<Self> {
        let mut keywords: Vec<(&str, LinkRelation)> = vec![
            ("copy of", Self::Copy),
            ("translation of", Self::Translation),
            ("elastic transformation of", Self::Elastic { flipped: false }),
            (
                "elastic transformation and flipped of",
                Self::Elastic { flipped: true },
            ),
            ("radius pruned of", Self::RadiusPrune),
        ];
        keywords.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        keywords
            .into_iter()
            .find(|(keyword, _)| text.contains(keyword))
            .map(|(_, relation)| relation)
    }

    /// Whether the push flow knows how to replay this relation.
    pub fn is_replayable(&self) -> bool {
        !matches!(self, Self::Unspecified | Self::Other(_))
    }
}

impl Display for LinkRelation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unspecified => write!(f, "link"),
            other => write!(f, "{}", other.text()),
        }
    }
}

/// Error for strings that are not linking annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkParseError(pub String);

impl Display for LinkParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "not a linking annotation: `{}`", self.0)
    }
}

impl Error for LinkParseError {}

/// Structured form of a `LINKED NEURON - ...` annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkingAnnotation {
    pub relation: LinkRelation,
    pub skeleton_id: SkeletonId,
    pub project_id: ProjectId,
    pub server: String,
}

impl LinkingAnnotation {
    pub fn new(
        relation: LinkRelation,
        skeleton_id: SkeletonId,
        project_id: ProjectId,
        server: impl Into<String>,
    ) -> Self {
        Self {
            relation,
            skeleton_id,
            project_id,
            server: server.into(),
        }
    }

    /// Serializes the link into its annotation text.
    pub fn to_annotation(&self) -> String {
        match self.relation {
            LinkRelation::Unspecified => format!(
                "{LINK_PREFIX} - skeleton id {} in project id {} on server {}",
                self.skeleton_id, self.project_id, self.server
            ),
            ref relation => format!(
                "{LINK_PREFIX} - {} skeleton id {} in project id {} on server {}",
                relation.text(),
                self.skeleton_id,
                self.project_id,
                self.server
            ),
        }
    }

    /// Parses an annotation string; `UPDATED FROM LINKED NEURON` timestamps
    /// and unrelated annotations are rejected.
    pub fn parse(annotation: &str) -> Result<Self, LinkParseError> {
        let caps = LINK_RE
            .captures(annotation.trim())
            .ok_or_else(|| LinkParseError(annotation.to_string()))?;
        let skeleton_id = caps["skid"]
            .parse()
            .map_err(|_| LinkParseError(annotation.to_string()))?;
        let project_id = caps["pid"]
            .parse()
            .map_err(|_| LinkParseError(annotation.to_string()))?;
        let relation = caps
            .name("relation")
            .map(|m| LinkRelation::from_text(m.as_str()))
            .unwrap_or(LinkRelation::Unspecified);
        Ok(Self {
            relation,
            skeleton_id,
            project_id,
            server: caps["server"].to_string(),
        })
    }

    /// Whether this link points at the given source neuron.
    pub fn points_to(&self, skeleton_id: SkeletonId, project_id: ProjectId) -> bool {
        self.skeleton_id == skeleton_id && self.project_id == project_id
    }
}

impl Display for LinkingAnnotation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_annotation())
    }
}

/// Timestamp annotation added on every upload, e.g.
/// `UPDATED FROM LINKED NEURON - 2024-03-01 02:15 PM`.
pub fn updated_from_annotation(timestamp: &str) -> String {
    format!("{UPDATED_FROM_PREFIX} - {timestamp}")
}
