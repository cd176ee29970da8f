//! Volume and radius prunes.
//!
//! # Invariants
//! - A neuron is never pruned twice the same way; the name suffix is the
//!   marker checked before pruning.
//! - The first-entry/last-exit prune relies on a single primary neurite
//!   marked by `PRIMARY_NEURITE_RADIUS`.

use crate::model::link::VolumePruneMode;
use crate::model::neuron::{Neuron, NodeId, NodeType};
use crate::model::volume::Volume;
use crate::transform::{TransformError, TransformResult, PRIMARY_NEURITE_RADIUS};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Non-fatal findings of a volume prune.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumePruneReport {
    /// Messages the operator should acknowledge.
    pub warnings: Vec<String>,
    /// Fragments thrown away by `only_keep_largest_fragment`.
    pub dropped_fragments: usize,
}

/// Node ids kept by a radius prune, without touching the neuron.
pub fn radius_subset(neuron: &Neuron, radius: f64, keep_larger_radii: bool) -> BTreeSet<NodeId> {
    neuron
        .nodes
        .iter()
        .filter(|node| {
            if keep_larger_radii {
                node.radius >= radius
            } else {
                node.radius == radius
            }
        })
        .map(|node| node.node_id)
        .collect()
}

/// Keeps nodes with radius `>= radius` (or `== radius`).
///
/// Fails when the result is not one connected tree.
pub fn radius_prune_neuron(
    neuron: &mut Neuron,
    radius: f64,
    keep_larger_radii: bool,
) -> TransformResult<()> {
    if neuron.name.contains("radius") {
        return Err(TransformError::AlreadyTransformed {
            name: neuron.name.clone(),
            transform: "radius pruning",
        });
    }
    let keep = radius_subset(neuron, radius, keep_larger_radii);
    neuron.subset(&keep);
    if neuron.n_fragments() > 1 {
        return Err(TransformError::Fragmented {
            name: neuron.name.clone(),
            fragments: neuron.n_fragments(),
        });
    }
    neuron.add_annotation(format!("pruned to nodes with radius {radius}"));
    neuron.append_name_suffix(&format!(" - radius {radius}"));
    Ok(())
}

/// Prunes `neuron` to `volume` and records the prune.
pub fn volume_prune_neuron(
    neuron: &mut Neuron,
    volume: &Volume,
    mode: VolumePruneMode,
    only_keep_largest_fragment: bool,
) -> TransformResult<VolumePruneReport> {
    if neuron.name.contains("pruned by vol") {
        return Err(TransformError::AlreadyTransformed {
            name: neuron.name.clone(),
            transform: "volume pruning",
        });
    }

    let mut report = VolumePruneReport::default();
    match mode {
        VolumePruneMode::FirstEntryLastExit => {
            if let Some(warning) = prune_first_entry_last_exit(neuron, volume)? {
                report.warnings.push(warning);
            }
        }
        VolumePruneMode::Strict => {
            let keep: BTreeSet<NodeId> = neuron
                .nodes
                .iter()
                .filter(|node| volume.contains(node.location))
                .map(|node| node.node_id)
                .collect();
            neuron.subset(&keep);
        }
    }

    let fragments = neuron.n_fragments();
    if fragments > 1 && only_keep_largest_fragment {
        neuron.keep_largest_fragment();
        report.dropped_fragments = fragments - 1;
    }

    neuron.add_annotation(format!("pruned ({}) by vol {}", mode.label(), volume.volume_id));
    neuron.append_name_suffix(&format!(" - pruned by vol {}", volume.volume_id));
    Ok(report)
}

/// Distal end of the primary neurite: a marker-radius node with no
/// marker-radius child.
fn primary_neurite_end(neuron: &Neuron) -> TransformResult<NodeId> {
    let has_fat_child: BTreeSet<NodeId> = neuron
        .nodes
        .iter()
        .filter(|node| node.radius == PRIMARY_NEURITE_RADIUS)
        .filter_map(|node| node.parent_id)
        .collect();
    let ends: Vec<NodeId> = neuron
        .nodes
        .iter()
        .filter(|node| node.radius == PRIMARY_NEURITE_RADIUS && !has_fat_child.contains(&node.node_id))
        .map(|node| node.node_id)
        .collect();
    match ends.as_slice() {
        [end] => Ok(*end),
        [] => Err(TransformError::PrimaryNeurite {
            name: neuron.name.clone(),
            message: "doesn't look like a motor neuron: no primary neurite nodes".to_string(),
        }),
        many => Err(TransformError::PrimaryNeurite {
            name: neuron.name.clone(),
            message: format!("multiple primary neurite ends: {many:?}"),
        }),
    }
}

fn prune_first_entry_last_exit(neuron: &mut Neuron, volume: &Volume) -> TransformResult<Option<String>> {
    let end = primary_neurite_end(neuron)?;
    let in_volume: BTreeMap<NodeId, bool> = neuron
        .nodes
        .iter()
        .map(|node| (node.node_id, volume.contains(node.location)))
        .collect();
    let parents: BTreeMap<NodeId, Option<NodeId>> = neuron
        .nodes
        .iter()
        .map(|node| (node.node_id, node.parent_id))
        .collect();
    // Ids outside the node table (dangling parents) count as outside.
    let inside = |id: NodeId| in_volume.get(&id).copied().unwrap_or(false);

    // Walk back from the distal end until the parent is a branch point,
    // inside the volume or missing from the skeleton.
    let types = neuron.node_types();
    let mut current = end;
    while let Some(parent) = parents.get(&current).copied().flatten() {
        if !parents.contains_key(&parent)
            || types.get(&parent) == Some(&NodeType::Branch)
            || inside(parent)
        {
            break;
        }
        current = parent;
        debug!("event=fele_walk_back module=transform status=ok node_id={current}");
    }
    neuron.prune_distal_to(current)?;

    // Walk forward from the first primary neurite node after the root.
    let root = neuron.root().ok_or_else(|| TransformError::PrimaryNeurite {
        name: neuron.name.clone(),
        message: "skeleton has no root".to_string(),
    })?;
    let children = neuron.children();
    let types = neuron.node_types();
    let mut current = children
        .get(&root)
        .and_then(|ids| {
            ids.iter()
                .copied()
                .find(|id| neuron.node(*id).is_some_and(|node| node.radius > 0.0))
        })
        .ok_or_else(|| TransformError::PrimaryNeurite {
            name: neuron.name.clone(),
            message: "no primary neurite node downstream of the root".to_string(),
        })?;
    while !inside(current) && types.get(&current) == Some(&NodeType::Slab) {
        match children.get(&current).and_then(|ids| ids.first()) {
            Some(next) => current = *next,
            None => break,
        }
        debug!("event=fele_walk_forward module=transform status=ok node_id={current}");
    }
    let warning = (!inside(current)).then(|| {
        format!(
            "Hit a branch before hitting the volume for neuron {}. This is unusual.",
            neuron.name
        )
    });
    neuron.prune_proximal_to(current)?;
    Ok(warning)
}

#[cfg(test)]
mod tests {
    use super::{radius_prune_neuron, radius_subset, volume_prune_neuron};
    use crate::model::link::VolumePruneMode;
    use crate::model::neuron::{Neuron, Node};
    use crate::model::volume::Volume;
    use crate::transform::TransformError;

    fn trunk() -> Neuron {
        let mut neuron = Neuron::new(3, "MN3");
        neuron.nodes = vec![
            Node::new(1, None, [0.0, 0.0, 0.0], 500.0),
            Node::new(2, Some(1), [10.0, 0.0, 0.0], 500.0),
            Node::new(3, Some(2), [20.0, 0.0, 0.0], 100.0),
            Node::new(4, Some(2), [10.0, 10.0, 0.0], 500.0),
        ];
        neuron
    }

    #[test]
    fn radius_prune_keeps_marker_nodes() {
        let mut neuron = trunk();
        radius_prune_neuron(&mut neuron, 500.0, true).unwrap();
        assert_eq!(neuron.n_nodes(), 3);
        assert_eq!(neuron.name, "MN3 - radius 500");
        assert!(neuron.annotations.contains("pruned to nodes with radius 500"));
    }

    #[test]
    fn radius_prune_refuses_second_pass() {
        let mut neuron = trunk();
        radius_prune_neuron(&mut neuron, 500.0, true).unwrap();
        assert!(matches!(
            radius_prune_neuron(&mut neuron, 500.0, true),
            Err(TransformError::AlreadyTransformed { .. })
        ));
    }

    #[test]
    fn radius_prune_rejects_fragmenting_cut() {
        let mut neuron = trunk();
        neuron.nodes[1].radius = 10.0;
        assert!(matches!(
            radius_prune_neuron(&mut neuron, 500.0, true),
            Err(TransformError::Fragmented { fragments: 2, .. })
        ));
    }

    #[test]
    fn exact_radius_mode_drops_larger_nodes() {
        let mut neuron = trunk();
        neuron.nodes[3].radius = 800.0;
        let kept = radius_subset(&neuron, 500.0, false);
        assert_eq!(kept.into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn strict_prune_can_keep_largest_fragment() {
        let mut neuron = Neuron::new(9, "line");
        neuron.nodes = (1..=6)
            .map(|id| {
                let parent = if id == 1 { None } else { Some(id - 1) };
                Node::new(id, parent, [id as f64 * 10.0, 0.0, 0.0], 1.0)
            })
            .collect();
        // Node 3 (x = 30) falls outside both boxes.
        let mut volume = Volume::axis_aligned_box(4, "gap", [5.0, -1.0, -1.0], [25.0, 1.0, 1.0]);
        let right = Volume::axis_aligned_box(4, "right", [35.0, -1.0, -1.0], [65.0, 1.0, 1.0]);
        let offset = volume.vertices.len();
        volume.vertices.extend(right.vertices);
        volume
            .faces
            .extend(right.faces.iter().map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]));

        let report = volume_prune_neuron(&mut neuron, &volume, VolumePruneMode::Strict, true).unwrap();
        assert_eq!(report.dropped_fragments, 1);
        let ids: Vec<u64> = neuron.nodes.iter().map(|n| n.node_id).collect();
        assert_eq!(ids, vec![4, 5, 6]);
        assert_eq!(neuron.name, "line - pruned by vol 4");
        assert!(neuron.annotations.contains("pruned (strict) by vol 4"));
    }

    #[test]
    fn dangling_parent_stops_the_walk_back() {
        let mut neuron = Neuron::new(11, "MN11");
        neuron.nodes = vec![
            Node::new(10, Some(99), [0.0, 0.0, 0.0], 500.0),
            Node::new(11, Some(10), [10.0, 0.0, 0.0], 500.0),
        ];
        let far = Volume::axis_aligned_box(2, "far", [500.0; 3], [600.0; 3]);
        let result =
            volume_prune_neuron(&mut neuron, &far, VolumePruneMode::FirstEntryLastExit, false);
        assert!(matches!(result, Err(TransformError::PrimaryNeurite { .. })));
        assert_eq!(neuron.nodes.iter().map(|n| n.node_id).collect::<Vec<_>>(), vec![10]);
    }

    #[test]
    fn missing_primary_neurite_is_an_error() {
        let mut neuron = trunk();
        for node in &mut neuron.nodes {
            node.radius = 1.0;
        }
        let volume = Volume::axis_aligned_box(1, "box", [0.0; 3], [5.0; 3]);
        assert!(matches!(
            volume_prune_neuron(&mut neuron, &volume, VolumePruneMode::FirstEntryLastExit, false),
            Err(TransformError::PrimaryNeurite { .. })
        ));
    }
}
