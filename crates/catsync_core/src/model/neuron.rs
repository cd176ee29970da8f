//! Neuron skeleton model.
//!
//! # Responsibility
//! - Hold the in-memory copy of one skeleton fetched from a project.
//! - Provide the tree edits used by transforms (subset, prune, reroot, heal).
//!
//! # Invariants
//! - Node ids are unique within a neuron.
//! - A `parent_id` either is `None` (fragment root) or names a node of the
//!   same neuron.
//! - Connectors and tags only reference nodes that still exist after an edit.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Skeleton identifier assigned by the annotation server.
pub type SkeletonId = u64;
/// Treenode identifier assigned by the annotation server.
pub type NodeId = u64;
/// Connector identifier assigned by the annotation server.
pub type ConnectorId = u64;
/// Numeric project identifier on one server.
pub type ProjectId = u64;

/// Project-space coordinate in nanometers unless stated otherwise.
pub type Point3 = [f64; 3];

/// Topological role of a node, derived from the tree shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Root,
    Slab,
    Branch,
    End,
}

/// One treenode of a skeleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub parent_id: Option<NodeId>,
    pub location: Point3,
    pub radius: f64,
    pub confidence: u8,
}

impl Node {
    pub fn new(node_id: NodeId, parent_id: Option<NodeId>, location: Point3, radius: f64) -> Self {
        Self {
            node_id,
            parent_id,
            location,
            radius,
            confidence: 5,
        }
    }
}

/// Role of the skeleton in a synapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorRelation {
    Presynaptic,
    Postsynaptic,
    Other,
}

/// Synapse marker attached to one node of the skeleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub connector_id: ConnectorId,
    pub node_id: NodeId,
    pub location: Point3,
    pub relation: ConnectorRelation,
}

/// Errors raised by tree edits.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeError {
    UnknownNode(NodeId),
    LengthMismatch { expected: usize, actual: usize },
}

impl Display for TreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownNode(node_id) => write!(f, "node {node_id} is not part of this skeleton"),
            Self::LengthMismatch { expected, actual } => write!(
                f,
                "coordinate count mismatch: expected {expected}, got {actual}"
            ),
        }
    }
}

impl Error for TreeError {}

/// In-memory copy of one neuron and its skeleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neuron {
    pub skeleton_id: SkeletonId,
    pub name: String,
    pub nodes: Vec<Node>,
    pub connectors: Vec<Connector>,
    pub annotations: BTreeSet<String>,
    pub tags: BTreeMap<String, BTreeSet<NodeId>>,
}

impl Neuron {
    /// Creates an empty neuron with the given identity.
    pub fn new(skeleton_id: SkeletonId, name: impl Into<String>) -> Self {
        Self {
            skeleton_id,
            name: name.into(),
            nodes: Vec::new(),
            connectors: Vec::new(),
            annotations: BTreeSet::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_connectors(&self) -> usize {
        self.connectors.len()
    }

    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| node.node_id == node_id)
    }

    pub fn contains_node(&self, node_id: NodeId) -> bool {
        self.node(node_id).is_some()
    }

    /// Returns every fragment root, in node order.
    pub fn roots(&self) -> Vec<NodeId> {
        let ids: BTreeSet<NodeId> = self.nodes.iter().map(|node| node.node_id).collect();
        self.nodes
            .iter()
            .filter(|node| match node.parent_id {
                None => true,
                Some(parent) => !ids.contains(&parent),
            })
            .map(|node| node.node_id)
            .collect()
    }

    /// Returns the first root, which is the skeleton root for a connected tree.
    pub fn root(&self) -> Option<NodeId> {
        self.roots().into_iter().next()
    }

    /// Parent id to sorted child ids.
    pub fn children(&self) -> BTreeMap<NodeId, Vec<NodeId>> {
        let mut children: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for node in &self.nodes {
            if let Some(parent) = node.parent_id {
                children.entry(parent).or_default().push(node.node_id);
            }
        }
        for ids in children.values_mut() {
            ids.sort_unstable();
        }
        children
    }

    /// Classifies every node as root, slab, branch or end.
    pub fn node_types(&self) -> BTreeMap<NodeId, NodeType> {
        let children = self.children();
        let roots: BTreeSet<NodeId> = self.roots().into_iter().collect();
        self.nodes
            .iter()
            .map(|node| {
                let n_children = children.get(&node.node_id).map_or(0, Vec::len);
                let kind = if roots.contains(&node.node_id) {
                    NodeType::Root
                } else if n_children == 0 {
                    NodeType::End
                } else if n_children > 1 {
                    NodeType::Branch
                } else {
                    NodeType::Slab
                };
                (node.node_id, kind)
            })
            .collect()
    }

    /// Returns `node_id` and every node distal to it.
    pub fn descendants(&self, node_id: NodeId) -> Result<BTreeSet<NodeId>, TreeError> {
        if !self.contains_node(node_id) {
            return Err(TreeError::UnknownNode(node_id));
        }
        let children = self.children();
        let mut found = BTreeSet::new();
        let mut stack = vec![node_id];
        while let Some(current) = stack.pop() {
            if found.insert(current) {
                if let Some(next) = children.get(&current) {
                    stack.extend(next.iter().copied());
                }
            }
        }
        Ok(found)
    }

    /// Connected components, one set of node ids per fragment root.
    pub fn fragments(&self) -> Vec<BTreeSet<NodeId>> {
        self.roots()
            .into_iter()
            .filter_map(|root| self.descendants(root).ok())
            .collect()
    }

    pub fn n_fragments(&self) -> usize {
        self.roots().len()
    }

    /// Keeps only the given nodes.
    ///
    /// Nodes whose parent was dropped become fragment roots; connectors and
    /// tags on dropped nodes are removed.
    pub fn subset(&mut self, keep: &BTreeSet<NodeId>) {
        self.nodes.retain(|node| keep.contains(&node.node_id));
        for node in &mut self.nodes {
            if let Some(parent) = node.parent_id {
                if !keep.contains(&parent) {
                    node.parent_id = None;
                }
            }
        }
        self.connectors
            .retain(|connector| keep.contains(&connector.node_id));
        for nodes in self.tags.values_mut() {
            nodes.retain(|node_id| keep.contains(node_id));
        }
        self.tags.retain(|_, nodes| !nodes.is_empty());
    }

    /// Removes everything distal to `node_id`, keeping the node itself.
    pub fn prune_distal_to(&mut self, node_id: NodeId) -> Result<(), TreeError> {
        let mut distal = self.descendants(node_id)?;
        distal.remove(&node_id);
        let keep: BTreeSet<NodeId> = self
            .nodes
            .iter()
            .map(|node| node.node_id)
            .filter(|id| !distal.contains(id))
            .collect();
        self.subset(&keep);
        Ok(())
    }

    /// Removes everything proximal to `node_id`, which becomes the new root.
    pub fn prune_proximal_to(&mut self, node_id: NodeId) -> Result<(), TreeError> {
        let keep = self.descendants(node_id)?;
        self.subset(&keep);
        Ok(())
    }

    /// Makes `node_id` the root of its fragment by reversing the path to the
    /// current root.
    pub fn reroot(&mut self, node_id: NodeId) -> Result<(), TreeError> {
        let index: HashMap<NodeId, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.node_id, i))
            .collect();
        let Some(&start) = index.get(&node_id) else {
            return Err(TreeError::UnknownNode(node_id));
        };

        let mut path = vec![start];
        let mut current = start;
        while let Some(parent) = self.nodes[current].parent_id {
            match index.get(&parent) {
                Some(&parent_index) => {
                    path.push(parent_index);
                    current = parent_index;
                }
                None => break,
            }
        }

        self.nodes[start].parent_id = None;
        for pair in path.windows(2) {
            let child_id = self.nodes[pair[0]].node_id;
            self.nodes[pair[1]].parent_id = Some(child_id);
        }
        Ok(())
    }

    /// Reconnects all fragments into one tree.
    ///
    /// Repeatedly attaches the fragment closest to the largest fragment at its
    /// nearest node pair. Returns the number of joins performed.
    pub fn heal(&mut self) -> usize {
        let mut joins = 0;
        loop {
            let fragments = self.fragments();
            if fragments.len() <= 1 {
                return joins;
            }
            let base_index = largest_fragment_index(&fragments);
            let locations: HashMap<NodeId, Point3> = self
                .nodes
                .iter()
                .map(|node| (node.node_id, node.location))
                .collect();

            let mut best: Option<(f64, NodeId, NodeId)> = None;
            for (i, fragment) in fragments.iter().enumerate() {
                if i == base_index {
                    continue;
                }
                for other in fragment {
                    for anchor in &fragments[base_index] {
                        let distance = distance(locations[anchor], locations[other]);
                        if best.map_or(true, |(d, _, _)| distance < d) {
                            best = Some((distance, *anchor, *other));
                        }
                    }
                }
            }

            let Some((_, anchor, other)) = best else {
                return joins;
            };
            if self.reroot(other).is_err() {
                return joins;
            }
            if let Some(node) = self.nodes.iter_mut().find(|node| node.node_id == other) {
                node.parent_id = Some(anchor);
            }
            joins += 1;
        }
    }

    /// Drops every fragment except the one with the most nodes.
    pub fn keep_largest_fragment(&mut self) {
        let fragments = self.fragments();
        if fragments.len() <= 1 {
            return;
        }
        let keep = fragments[largest_fragment_index(&fragments)].clone();
        self.subset(&keep);
    }

    pub fn node_locations(&self) -> Vec<Point3> {
        self.nodes.iter().map(|node| node.location).collect()
    }

    pub fn connector_locations(&self) -> Vec<Point3> {
        self.connectors
            .iter()
            .map(|connector| connector.location)
            .collect()
    }

    pub fn set_node_locations(&mut self, locations: &[Point3]) -> Result<(), TreeError> {
        if locations.len() != self.nodes.len() {
            return Err(TreeError::LengthMismatch {
                expected: self.nodes.len(),
                actual: locations.len(),
            });
        }
        for (node, location) in self.nodes.iter_mut().zip(locations) {
            node.location = *location;
        }
        Ok(())
    }

    pub fn set_connector_locations(&mut self, locations: &[Point3]) -> Result<(), TreeError> {
        if locations.len() != self.connectors.len() {
            return Err(TreeError::LengthMismatch {
                expected: self.connectors.len(),
                actual: locations.len(),
            });
        }
        for (connector, location) in self.connectors.iter_mut().zip(locations) {
            connector.location = *location;
        }
        Ok(())
    }

    /// Mean node coordinate, `None` for an empty skeleton.
    pub fn mean_location(&self) -> Option<Point3> {
        if self.nodes.is_empty() {
            return None;
        }
        let n = self.nodes.len() as f64;
        let mut sum = [0.0; 3];
        for node in &self.nodes {
            for axis in 0..3 {
                sum[axis] += node.location[axis];
            }
        }
        Some([sum[0] / n, sum[1] / n, sum[2] / n])
    }

    pub fn append_name_suffix(&mut self, suffix: &str) {
        self.name.push_str(suffix);
    }

    pub fn add_annotation(&mut self, annotation: impl Into<String>) {
        self.annotations.insert(annotation.into());
    }

    /// Removes annotations containing `pattern`; returns how many were removed.
    pub fn remove_annotations_containing(&mut self, pattern: &str) -> usize {
        let before = self.annotations.len();
        self.annotations.retain(|annotation| !annotation.contains(pattern));
        before - self.annotations.len()
    }
}

/// Euclidean distance between two points.
pub fn distance(a: Point3, b: Point3) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

fn largest_fragment_index(fragments: &[BTreeSet<NodeId>]) -> usize {
    let mut best = 0;
    for (i, fragment) in fragments.iter().enumerate() {
        if fragment.len() > fragments[best].len() {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::{Neuron, Node, NodeType};
    use std::collections::BTreeSet;

    // 1 - 2 - 3 - 4
    //         \
    //          5 - 6
    fn forked() -> Neuron {
        let mut neuron = Neuron::new(10, "fork");
        neuron.nodes = vec![
            Node::new(1, None, [0.0, 0.0, 0.0], 1.0),
            Node::new(2, Some(1), [1.0, 0.0, 0.0], 1.0),
            Node::new(3, Some(2), [2.0, 0.0, 0.0], 1.0),
            Node::new(4, Some(3), [3.0, 0.0, 0.0], 1.0),
            Node::new(5, Some(3), [2.0, 1.0, 0.0], 1.0),
            Node::new(6, Some(5), [2.0, 2.0, 0.0], 1.0),
        ];
        neuron
    }

    #[test]
    fn node_types_follow_topology() {
        let types = forked().node_types();
        assert_eq!(types[&1], NodeType::Root);
        assert_eq!(types[&2], NodeType::Slab);
        assert_eq!(types[&3], NodeType::Branch);
        assert_eq!(types[&4], NodeType::End);
        assert_eq!(types[&6], NodeType::End);
    }

    #[test]
    fn prune_distal_keeps_cut_node() {
        let mut neuron = forked();
        neuron.prune_distal_to(3).unwrap();
        let ids: Vec<u64> = neuron.nodes.iter().map(|n| n.node_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn prune_proximal_makes_cut_node_root() {
        let mut neuron = forked();
        neuron.prune_proximal_to(5).unwrap();
        assert_eq!(neuron.n_nodes(), 2);
        assert_eq!(neuron.root(), Some(5));
        assert_eq!(neuron.node(5).unwrap().parent_id, None);
    }

    #[test]
    fn subset_then_heal_restores_single_tree() {
        let mut neuron = forked();
        let keep: BTreeSet<u64> = [1, 2, 4, 5, 6].into_iter().collect();
        neuron.subset(&keep);
        assert_eq!(neuron.n_fragments(), 3);

        let joins = neuron.heal();
        assert_eq!(joins, 2);
        assert_eq!(neuron.n_fragments(), 1);
        assert_eq!(neuron.n_nodes(), 5);
    }

    #[test]
    fn reroot_reverses_path() {
        let mut neuron = forked();
        neuron.reroot(4).unwrap();
        assert_eq!(neuron.root(), Some(4));
        assert_eq!(neuron.node(3).unwrap().parent_id, Some(4));
        assert_eq!(neuron.node(1).unwrap().parent_id, Some(2));
        assert_eq!(neuron.n_fragments(), 1);
    }

    #[test]
    fn unknown_node_is_rejected() {
        let mut neuron = forked();
        assert!(neuron.prune_distal_to(99).is_err());
    }
}
