//! SWC skeleton text format.
//!
//! Columns: `id type x y z radius parent`, `#` comments, parent `-1` for the
//! root. Only the geometry is read; the structure type column is ignored.

use crate::model::neuron::{Neuron, Node};
use std::error::Error;
use std::fmt::{Display, Formatter, Write as _};
use std::path::Path;

#[derive(Debug)]
pub enum SwcError {
    Io(std::io::Error),
    Malformed { line: usize, message: String },
}

impl Display for SwcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::Malformed { line, message } => write!(f, "invalid SWC line {line}: {message}"),
        }
    }
}

impl Error for SwcError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Malformed { .. } => None,
        }
    }
}

impl From<std::io::Error> for SwcError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Reads an SWC file into a neuron without annotations or connectors.
pub fn read_swc(path: &Path) -> Result<Neuron, SwcError> {
    let text = std::fs::read_to_string(path)?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    parse_swc(&text, name)
}

pub fn parse_swc(text: &str, name: impl Into<String>) -> Result<Neuron, SwcError> {
    let mut neuron = Neuron::new(0, name);
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let malformed = |message: &str| SwcError::Malformed {
            line: index + 1,
            message: message.to_string(),
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            return Err(malformed("expected 7 columns"));
        }
        let node_id: u64 = fields[0].parse().map_err(|_| malformed("bad node id"))?;
        let mut coords = [0.0; 3];
        for axis in 0..3 {
            coords[axis] = fields[2 + axis]
                .parse()
                .map_err(|_| malformed("bad coordinate"))?;
        }
        let radius: f64 = fields[5].parse().map_err(|_| malformed("bad radius"))?;
        let parent: i64 = fields[6].parse().map_err(|_| malformed("bad parent id"))?;
        let parent_id = if parent < 0 { None } else { Some(parent as u64) };
        neuron.nodes.push(Node::new(node_id, parent_id, coords, radius));
    }
    Ok(neuron)
}

/// Serializes the skeleton geometry as SWC text.
pub fn to_swc(neuron: &Neuron) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", neuron.name);
    for node in &neuron.nodes {
        let parent = node.parent_id.map_or(-1, |id| id as i64);
        let _ = writeln!(
            out,
            "{} 0 {} {} {} {} {}",
            node.node_id, node.location[0], node.location[1], node.location[2], node.radius, parent
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{parse_swc, to_swc};

    #[test]
    fn parses_nodes_and_skips_comments() {
        let text = "# comment\n1 1 0 0 0 500 -1\n2 3 10.5 0 0 -1 1\n";
        let neuron = parse_swc(text, "cell").unwrap();
        assert_eq!(neuron.n_nodes(), 2);
        assert_eq!(neuron.root(), Some(1));
        assert_eq!(neuron.node(2).unwrap().location[0], 10.5);
    }

    #[test]
    fn reports_line_of_bad_row() {
        let err = parse_swc("1 1 0 0\n", "cell").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn writer_output_parses_back() {
        let neuron = parse_swc("1 1 1 2 3 4 -1\n2 0 5 6 7 8 1\n", "cell").unwrap();
        let again = parse_swc(&to_swc(&neuron), "cell").unwrap();
        assert_eq!(again.nodes, neuron.nodes);
    }
}
