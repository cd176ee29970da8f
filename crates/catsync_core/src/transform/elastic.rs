//! Elastic point warps through the `transformix` executable.
//!
//! # Responsibility
//! - Run transformix on a batch of points through its file interface.
//! - Convert between FANC project coordinates and VNC template coordinates.
//! - Apply a warp to a neuron, with the optional y cutoff used for FANC.
//!
//! # Invariants
//! - Transformix writes into a fresh temporary directory; nothing is written
//!   next to the parameter file.
//! - The child runs from the parameter file's directory, where chained
//!   `InitialTransformParametersFileName` entries resolve.
//! - A warp returns exactly one point per input point.

use crate::model::neuron::{Neuron, NodeId, Point3};
use crate::transform::{TransformError, TransformResult};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Environment variable overriding the transformix executable.
pub const TRANSFORMIX_ENV_BIN: &str = "CATSYNC_TRANSFORMIX_BIN";
const DEFAULT_TRANSFORMIX_BIN: &str = "transformix";
const INPUT_FILE: &str = "transformix_input.txt";
const OUTPUT_FILE: &str = "outputpoints.txt";

pub const FANC_TO_TEMPLATE_PARAMETERS: &str = "TransformParameters.FixedFANC.txt";
pub const TEMPLATE_TO_FANC_PARAMETERS: &str = "TransformParameters.FixedTemplate.Bspline.txt";

/// y cutoff (nm) applied before the default FANC warp; 300000 * 4.3 / 4.
pub const FANC_Y_CUTOFF_NM: f64 = 322_500.0;

// (1.24, 1.24, 2.1) voxels at (430, 430, 450) nm/voxel.
const FANC_OFFSET_NM: Point3 = [533.2, 533.2, 945.0];
const FANC_VOXEL_NM: Point3 = [430.0, 430.0, 450.0];
const TEMPLATE_VOXEL_NM: Point3 = [300.0, 300.0, 400.0];
// z flip of a 436-slice stack.
const TEMPLATE_Z_EXTENT_NM: f64 = 435.0 * 400.0;
const TEMPLATE_SYMMETRY_X_MICRONS: f64 = 329.0 * 0.400;

static OUTPUT_POINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"OutputPoint = \[\s*(\S+)\s+(\S+)\s+(\S+)\s*\]").expect("valid output point regex")
});

/// Maps a batch of points to new coordinates.
pub trait PointWarp {
    fn warp(&self, points: &[Point3]) -> TransformResult<Vec<Point3>>;
}

/// Warp that returns its input, for dry runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityWarp;

impl PointWarp for IdentityWarp {
    fn warp(&self, points: &[Point3]) -> TransformResult<Vec<Point3>> {
        Ok(points.to_vec())
    }
}

/// Runs `transformix -out <dir> -tp <parameters> -def <points>`.
#[derive(Debug, Clone)]
pub struct Transformix {
    executable: String,
    parameter_file: PathBuf,
}

impl Transformix {
    /// Uses `CATSYNC_TRANSFORMIX_BIN` if set, else `transformix` on `PATH`.
    pub fn new(parameter_file: impl Into<PathBuf>) -> Self {
        let executable = std::env::var(TRANSFORMIX_ENV_BIN)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TRANSFORMIX_BIN.to_string());
        Self::with_executable(executable, parameter_file)
    }

    pub fn with_executable(executable: impl Into<String>, parameter_file: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            parameter_file: parameter_file.into(),
        }
    }

    pub fn parameter_file(&self) -> &Path {
        &self.parameter_file
    }
}

fn input_file_text(points: &[Point3]) -> String {
    let mut text = format!("point\n{}\n", points.len());
    for point in points {
        let _ = writeln!(text, "{:.6} {:.6} {:.6}", point[0], point[1], point[2]);
    }
    text
}

/// Parses the `OutputPoint = [ x y z ]` entries of `outputpoints.txt`.
pub fn parse_output_points(text: &str) -> TransformResult<Vec<Point3>> {
    let mut points = Vec::new();
    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        let caps = OUTPUT_POINT_RE
            .captures(line)
            .ok_or_else(|| TransformError::WarpOutput(format!("no OutputPoint in `{line}`")))?;
        let mut point = [0.0; 3];
        for axis in 0..3 {
            point[axis] = caps[axis + 1]
                .parse()
                .map_err(|_| TransformError::WarpOutput(format!("bad coordinate in `{line}`")))?;
        }
        points.push(point);
    }
    Ok(points)
}

impl PointWarp for Transformix {
    fn warp(&self, points: &[Point3]) -> TransformResult<Vec<Point3>> {
        if points.is_empty() {
            return Ok(Vec::new());
        }
        let parameter_file = std::path::absolute(&self.parameter_file)?;
        let parameter_dir = parameter_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        if !parameter_dir.is_dir() {
            return Err(TransformError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("parameter directory {} does not exist", parameter_dir.display()),
            )));
        }
        // A relative executable path would otherwise resolve against the new cwd.
        let executable = if Path::new(&self.executable).components().count() > 1 {
            std::path::absolute(&self.executable)?
        } else {
            PathBuf::from(&self.executable)
        };
        let workdir = tempfile::tempdir()?;
        let out_dir = std::path::absolute(workdir.path())?;
        let input = out_dir.join(INPUT_FILE);
        std::fs::write(&input, input_file_text(points))?;

        let args = vec![
            "-out".to_string(),
            out_dir.display().to_string(),
            "-tp".to_string(),
            parameter_file.display().to_string(),
            "-def".to_string(),
            input.display().to_string(),
        ];
        debug!(
            "event=transformix_run module=transform status=start points={} parameters={}",
            points.len(),
            self.parameter_file.display()
        );
        let output = Command::new(&executable)
            .args(&args)
            .current_dir(&parameter_dir)
            .output()
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    TransformError::ToolNotFound {
                        executable: self.executable.clone(),
                    }
                } else {
                    TransformError::Io(err)
                }
            })?;

        let output_path = out_dir.join(OUTPUT_FILE);
        if !output_path.exists() {
            return Err(TransformError::ToolFailed {
                executable: self.executable.clone(),
                args,
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        let warped = parse_output_points(&std::fs::read_to_string(&output_path)?)?;
        if warped.len() != points.len() {
            return Err(TransformError::WarpOutput(format!(
                "expected {} points, got {}",
                points.len(),
                warped.len()
            )));
        }
        Ok(warped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointUnits {
    #[default]
    Nanometers,
    Microns,
}

/// Whether points given in nm look like they are actually in microns.
pub fn looks_like_microns(points: &[Point3]) -> bool {
    !points.is_empty()
        && points
            .iter()
            .all(|point| point.iter().all(|value| *value < 1000.0))
}

/// FANC <-> VNC template warp built from two point warpers.
pub struct FancTemplateWarp {
    to_template: Box<dyn PointWarp>,
    to_fanc: Box<dyn PointWarp>,
}

impl FancTemplateWarp {
    /// Transformix with the two parameter files found in `parameter_dir`.
    pub fn from_parameter_dir(parameter_dir: &Path) -> Self {
        Self::new(
            Box::new(Transformix::new(parameter_dir.join(FANC_TO_TEMPLATE_PARAMETERS))),
            Box::new(Transformix::new(parameter_dir.join(TEMPLATE_TO_FANC_PARAMETERS))),
        )
    }

    pub fn new(to_template: Box<dyn PointWarp>, to_fanc: Box<dyn PointWarp>) -> Self {
        Self {
            to_template,
            to_fanc,
        }
    }

    /// FANC coordinates to template coordinates.
    ///
    /// Without `reflect` the result is mirrored across the template plane of
    /// symmetry.
    pub fn fanc_to_template(
        &self,
        points: &[Point3],
        input_units: PointUnits,
        output_units: PointUnits,
        reflect: bool,
    ) -> TransformResult<Vec<Point3>> {
        if points.is_empty() {
            return Ok(Vec::new());
        }
        let input_scale = if input_units == PointUnits::Microns { 1000.0 } else { 1.0 };
        let prepared: Vec<Point3> = points
            .iter()
            .map(|point| {
                let mut p = [0.0; 3];
                for axis in 0..3 {
                    p[axis] = (point[axis] * input_scale - FANC_OFFSET_NM[axis])
                        / FANC_VOXEL_NM[axis]
                        * TEMPLATE_VOXEL_NM[axis];
                }
                p[2] = TEMPLATE_Z_EXTENT_NM - p[2];
                [p[0] / 1000.0, p[1] / 1000.0, p[2] / 1000.0]
            })
            .collect();

        let mut warped = self.to_template.warp(&prepared)?;
        let output_scale = if output_units == PointUnits::Nanometers { 1000.0 } else { 1.0 };
        for point in &mut warped {
            if !reflect {
                point[0] = TEMPLATE_SYMMETRY_X_MICRONS * 2.0 - point[0];
            }
            for value in point.iter_mut() {
                *value *= output_scale;
            }
        }
        Ok(warped)
    }

    /// Template coordinates to FANC coordinates; inverse of
    /// [`FancTemplateWarp::fanc_to_template`] for the same `reflect`.
    pub fn template_to_fanc(
        &self,
        points: &[Point3],
        input_units: PointUnits,
        output_units: PointUnits,
        reflect: bool,
    ) -> TransformResult<Vec<Point3>> {
        if points.is_empty() {
            return Ok(Vec::new());
        }
        let input_scale = if input_units == PointUnits::Nanometers { 1.0 / 1000.0 } else { 1.0 };
        let prepared: Vec<Point3> = points
            .iter()
            .map(|point| {
                let mut p = [point[0] * input_scale, point[1] * input_scale, point[2] * input_scale];
                if !reflect {
                    p[0] = TEMPLATE_SYMMETRY_X_MICRONS * 2.0 - p[0];
                }
                p
            })
            .collect();

        let mut warped = self.to_fanc.warp(&prepared)?;
        let output_scale = if output_units == PointUnits::Microns { 1.0 / 1000.0 } else { 1.0 };
        for point in &mut warped {
            for value in point.iter_mut() {
                *value *= 1000.0;
            }
            point[2] = TEMPLATE_Z_EXTENT_NM - point[2];
            for axis in 0..3 {
                point[axis] = (point[axis] / TEMPLATE_VOXEL_NM[axis] * FANC_VOXEL_NM[axis]
                    + FANC_OFFSET_NM[axis])
                    * output_scale;
            }
        }
        Ok(warped)
    }
}

/// The default elastic transform: FANC nm in, template nm out.
pub struct FancToTemplate<'a> {
    pub warp: &'a FancTemplateWarp,
    pub input_units: PointUnits,
    pub reflect: bool,
}

impl PointWarp for FancToTemplate<'_> {
    fn warp(&self, points: &[Point3]) -> TransformResult<Vec<Point3>> {
        self.warp
            .fanc_to_template(points, self.input_units, PointUnits::Nanometers, self.reflect)
    }
}

/// Drops nodes with `y < cutoff` and heals the rest into one tree.
///
/// Returns the number of joins made while healing.
pub fn apply_y_cutoff(neuron: &mut Neuron, cutoff: f64) -> usize {
    let keep: BTreeSet<NodeId> = neuron
        .nodes
        .iter()
        .filter(|node| node.location[1] >= cutoff)
        .map(|node| node.node_id)
        .collect();
    neuron.subset(&keep);
    if neuron.n_fragments() > 1 {
        info!(
            "event=heal_fragments module=transform status=start skeleton_id={} fragments={}",
            neuron.skeleton_id,
            neuron.n_fragments()
        );
        neuron.heal()
    } else {
        0
    }
}

/// Warps nodes (and optionally connectors) of `neuron`.
pub fn elastic_transform_neuron(
    neuron: &mut Neuron,
    warp: &dyn PointWarp,
    include_connectors: bool,
    left_right_flip: bool,
) -> TransformResult<()> {
    neuron.append_name_suffix(" - elastic transform");
    neuron.add_annotation("elastic transformed");
    if left_right_flip {
        neuron.append_name_suffix(" - flipped");
        neuron.add_annotation("left-right flipped");
    }

    let nodes = warp.warp(&neuron.node_locations())?;
    neuron.set_node_locations(&nodes)?;
    if include_connectors {
        let connectors = warp.warp(&neuron.connector_locations())?;
        neuron.set_connector_locations(&connectors)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        apply_y_cutoff, elastic_transform_neuron, input_file_text, looks_like_microns,
        parse_output_points, FancTemplateWarp, IdentityWarp, PointUnits,
    };
    use crate::model::neuron::{Neuron, Node};

    #[test]
    fn input_file_has_count_header() {
        let text = input_file_text(&[[1.0, 2.0, 3.0], [4.0, 5.5, 6.0]]);
        assert_eq!(text, "point\n2\n1.000000 2.000000 3.000000\n4.000000 5.500000 6.000000\n");
    }

    #[test]
    fn output_points_are_extracted_from_transformix_lines() {
        let text = "Point\t0\t; InputIndex = [ 1 2 3 ]\t; OutputPoint = [ 10.5 -2 3e2 ]\t; Deformation = [ 0 0 0 ]\n";
        assert_eq!(parse_output_points(text).unwrap(), vec![[10.5, -2.0, 300.0]]);
        assert!(parse_output_points("garbage\n").is_err());
    }

    #[test]
    fn fanc_template_round_trip_with_identity_warp() {
        let warp = FancTemplateWarp::new(Box::new(IdentityWarp), Box::new(IdentityWarp));
        let points = vec![[120_000.0, 350_000.0, 80_000.0], [45_000.0, 400_000.0, 2_000.0]];
        for reflect in [false, true] {
            let template = warp
                .fanc_to_template(&points, PointUnits::Nanometers, PointUnits::Nanometers, reflect)
                .unwrap();
            let back = warp
                .template_to_fanc(&template, PointUnits::Nanometers, PointUnits::Nanometers, reflect)
                .unwrap();
            for (original, restored) in points.iter().zip(&back) {
                for axis in 0..3 {
                    assert!((original[axis] - restored[axis]).abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn micron_guess_requires_all_small_values() {
        assert!(looks_like_microns(&[[1.0, 2.0, 3.0]]));
        assert!(!looks_like_microns(&[[1.0, 2.0, 3000.0]]));
        assert!(!looks_like_microns(&[]));
    }

    #[test]
    fn y_cutoff_drops_and_heals() {
        let mut neuron = Neuron::new(1, "n");
        neuron.nodes = vec![
            Node::new(1, None, [0.0, 10.0, 0.0], 1.0),
            Node::new(2, Some(1), [0.0, 1.0, 0.0], 1.0),
            Node::new(3, Some(2), [0.0, 12.0, 0.0], 1.0),
        ];
        let joins = apply_y_cutoff(&mut neuron, 5.0);
        assert_eq!(joins, 1);
        assert_eq!(neuron.n_nodes(), 2);
        assert_eq!(neuron.n_fragments(), 1);
    }

    #[test]
    fn flipped_transform_is_labelled() {
        let mut neuron = Neuron::new(1, "MN");
        neuron.nodes.push(Node::new(1, None, [1.0, 2.0, 3.0], 1.0));
        elastic_transform_neuron(&mut neuron, &IdentityWarp, true, true).unwrap();
        assert_eq!(neuron.name, "MN - elastic transform - flipped");
        assert!(neuron.annotations.contains("elastic transformed"));
        assert!(neuron.annotations.contains("left-right flipped"));
    }

    #[test]
    fn unflipped_transform_is_still_annotated() {
        let mut neuron = Neuron::new(1, "MN");
        neuron.nodes.push(Node::new(1, None, [1.0, 2.0, 3.0], 1.0));
        elastic_transform_neuron(&mut neuron, &IdentityWarp, false, false).unwrap();
        assert_eq!(neuron.name, "MN - elastic transform");
        assert!(neuron.annotations.contains("elastic transformed"));
        assert!(!neuron.annotations.contains("left-right flipped"));
    }

    #[cfg(unix)]
    #[test]
    fn transformix_runs_through_file_interface() {
        use super::{PointWarp, Transformix};
        use crate::transform::TransformError;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let echo = dir.path().join("fake_transformix.sh");
        std::fs::write(
            &echo,
            "#!/bin/sh\n\
             while [ $# -gt 0 ]; do case \"$1\" in -out) out=\"$2\"; shift 2;; -def) def=\"$2\"; shift 2;; *) shift;; esac; done\n\
             tail -n +3 \"$def\" | while read x y z; do echo \"Point ; OutputPoint = [ $x $y $z ] ; Deformation = [ 0 0 0 ]\"; done > \"$out/outputpoints.txt\"\n",
        )
        .unwrap();
        let broken = dir.path().join("broken_transformix.sh");
        std::fs::write(&broken, "#!/bin/sh\necho 'no parameters'\nexit 1\n").unwrap();
        for script in [&echo, &broken] {
            std::fs::set_permissions(script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let points = vec![[1.5, 2.0, 3.0], [4.0, 5.0, 6.25]];
        let warped = Transformix::with_executable(echo.display().to_string(), "params.txt")
            .warp(&points)
            .unwrap();
        assert_eq!(warped, points);

        let err = Transformix::with_executable(broken.display().to_string(), "params.txt")
            .warp(&points)
            .unwrap_err();
        match err {
            TransformError::ToolFailed { stdout, status, .. } => {
                assert!(stdout.contains("no parameters"));
                assert_eq!(status, Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }

        let missing = Transformix::with_executable(
            dir.path().join("not-installed").display().to_string(),
            "params.txt",
        )
        .warp(&points)
        .unwrap_err();
        assert!(matches!(missing, TransformError::ToolNotFound { .. }));
    }

    // Chained parameter files name their predecessor by a bare file name.
    #[cfg(unix)]
    #[test]
    fn transformix_runs_from_parameter_directory() {
        use super::{PointWarp, Transformix};
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let chain = dir.path().join("params");
        std::fs::create_dir(&chain).unwrap();
        std::fs::write(chain.join("TransformParameters.0.txt"), "(Transform \"AffineTransform\")\n").unwrap();
        let parameters = chain.join("TransformParameters.1.txt");
        std::fs::write(
            &parameters,
            "(InitialTransformParametersFileName \"TransformParameters.0.txt\")\n",
        )
        .unwrap();

        let tool = dir.path().join("chained_transformix.sh");
        std::fs::write(
            &tool,
            "#!/bin/sh\n\
             [ -f TransformParameters.0.txt ] || { echo 'initial transform not found'; exit 3; }\n\
             while [ $# -gt 0 ]; do case \"$1\" in -out) out=\"$2\"; shift 2;; -def) def=\"$2\"; shift 2;; *) shift;; esac; done\n\
             tail -n +3 \"$def\" | while read x y z; do echo \"OutputPoint = [ $x $y $z ]\"; done > \"$out/outputpoints.txt\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let points = vec![[7.0, 8.0, 9.0]];
        let warped = Transformix::with_executable(tool.display().to_string(), parameters.clone())
            .warp(&points)
            .unwrap();
        assert_eq!(warped, points);
    }
}
