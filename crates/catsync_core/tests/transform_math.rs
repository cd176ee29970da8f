use catsync_core::model::neuron::{Connector, ConnectorRelation, Neuron, Node};
use catsync_core::model::volume::Volume;
use catsync_core::transform::affine::{affine_transform_neuron, AffineTransform};
use catsync_core::transform::elastic::{
    apply_y_cutoff, elastic_transform_neuron, FancTemplateWarp, FancToTemplate, IdentityWarp,
    PointUnits, PointWarp,
};
use catsync_core::transform::prune::{radius_prune_neuron, radius_subset, volume_prune_neuron};
use catsync_core::transform::translate::translate_neuron;
use catsync_core::{Point3, TransformError, TransformResult, VolumePruneMode};
use nalgebra::{Matrix3, Vector3};
use std::collections::BTreeSet;

fn close(a: [f64; 3], b: [f64; 3]) -> bool {
    (0..3).all(|axis| (a[axis] - b[axis]).abs() < 1e-6)
}

fn sample_neuron() -> Neuron {
    let mut neuron = Neuron::new(11, "DNa02");
    neuron.nodes = vec![
        Node::new(1, None, [1000.0, 2000.0, 3000.0], 500.0),
        Node::new(2, Some(1), [1100.0, 2050.0, 3040.0], 500.0),
        Node::new(3, Some(2), [1250.0, 2200.0, 3080.0], 100.0),
        Node::new(4, Some(2), [900.0, 2400.0, 3120.0], -1.0),
    ];
    neuron.connectors = vec![Connector {
        connector_id: 90,
        node_id: 3,
        location: [1260.0, 2210.0, 3080.0],
        relation: ConnectorRelation::Presynaptic,
    }];
    neuron
}

#[test]
fn translations_compose_additively() {
    let original = sample_neuron();
    let mut twice = original.clone();
    translate_neuron(&mut twice, [10.0, -20.0, 40.0]).unwrap();
    translate_neuron(&mut twice, [5.0, 5.0, -40.0]).unwrap();
    let mut once = original.clone();
    translate_neuron(&mut once, [15.0, -15.0, 0.0]).unwrap();

    for (a, b) in twice.node_locations().iter().zip(once.node_locations()) {
        assert!(close(*a, b));
    }
    for (a, b) in twice
        .connector_locations()
        .iter()
        .zip(once.connector_locations())
    {
        assert!(close(*a, b));
    }
    assert_eq!(twice.n_nodes(), original.n_nodes());
}

#[test]
fn affine_then_inverse_restores_locations() {
    let original = sample_neuron();
    let linear = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 2.0);
    let forward = AffineTransform::from_linear_and_offset(linear, Vector3::new(50.0, -75.0, 10.0));
    let inverse = forward.inverse().unwrap();

    let mut neuron = original.clone();
    affine_transform_neuron(&mut neuron, &forward, "rotate.txt").unwrap();
    assert!(!close(neuron.nodes[0].location, original.nodes[0].location));
    affine_transform_neuron(&mut neuron, &inverse, "rotate_inverse.txt").unwrap();

    for (a, b) in neuron.node_locations().iter().zip(original.node_locations()) {
        assert!(close(*a, b), "{a:?} != {b:?}");
    }
    assert!(neuron
        .annotations
        .contains("affine transformed using rotate.txt"));
}

#[test]
fn singular_affine_has_no_inverse() {
    let flat = AffineTransform::from_linear_and_offset(
        Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0),
        Vector3::zeros(),
    );
    assert!(matches!(flat.inverse(), Err(TransformError::SingularMatrix)));
}

#[test]
fn identity_warp_keeps_geometry_and_renames() {
    let original = sample_neuron();
    let mut neuron = original.clone();
    elastic_transform_neuron(&mut neuron, &IdentityWarp, true, false).unwrap();

    assert_eq!(neuron.node_locations(), original.node_locations());
    assert_eq!(neuron.connector_locations(), original.connector_locations());
    assert!(neuron.name.ends_with(" - elastic transform"));
}

// Smooth warp in template microns with a closed-form inverse.
struct Bend;
struct Unbend;

impl PointWarp for Bend {
    fn warp(&self, points: &[Point3]) -> TransformResult<Vec<Point3>> {
        Ok(points
            .iter()
            .map(|p| [p[0] + 0.001 * p[1] * p[1], p[1] + 2.0, p[2] - 0.05 * p[0]])
            .collect())
    }
}

impl PointWarp for Unbend {
    fn warp(&self, points: &[Point3]) -> TransformResult<Vec<Point3>> {
        Ok(points
            .iter()
            .map(|p| {
                let y = p[1] - 2.0;
                let x = p[0] - 0.001 * y * y;
                [x, y, p[2] + 0.05 * x]
            })
            .collect())
    }
}

fn fanc_neuron() -> Neuron {
    let mut neuron = Neuron::new(21, "MN21");
    neuron.nodes = vec![
        Node::new(1, None, [120_000.0, 350_000.0, 80_000.0], 500.0),
        Node::new(2, Some(1), [121_500.0, 352_000.0, 81_000.0], 500.0),
        Node::new(3, Some(2), [125_000.0, 356_000.0, 84_000.0], 100.0),
    ];
    neuron.connectors = vec![Connector {
        connector_id: 900,
        node_id: 3,
        location: [125_200.0, 356_100.0, 84_050.0],
        relation: ConnectorRelation::Presynaptic,
    }];
    neuron
}

fn near(a: Point3, b: Point3, tolerance: f64) -> bool {
    (0..3).all(|axis| (a[axis] - b[axis]).abs() < tolerance)
}

#[test]
fn bent_warp_round_trips_through_template_space() {
    let warp = FancTemplateWarp::new(Box::new(Bend), Box::new(Unbend));
    let original = fanc_neuron();
    let mut mirrored_x = Vec::new();

    for reflect in [false, true] {
        let mut neuron = original.clone();
        let forward = FancToTemplate {
            warp: &warp,
            input_units: PointUnits::Nanometers,
            reflect,
        };
        elastic_transform_neuron(&mut neuron, &forward, true, !reflect).unwrap();
        assert!(!near(neuron.node_locations()[0], original.node_locations()[0], 1.0));
        mirrored_x.push(neuron.node_locations()[0][0]);

        let back = |points: &[Point3]| {
            warp.template_to_fanc(points, PointUnits::Nanometers, PointUnits::Nanometers, reflect)
                .unwrap()
        };
        let nodes = back(&neuron.node_locations());
        let connectors = back(&neuron.connector_locations());
        for (restored, expected) in nodes.iter().zip(original.node_locations()) {
            assert!(near(*restored, expected, 1e-3), "{restored:?} != {expected:?}");
        }
        assert!(near(connectors[0], original.connector_locations()[0], 1e-3));
    }

    // Unreflected output is the reflected one mirrored across x = 131.6 um.
    assert!((mirrored_x[0] + mirrored_x[1] - 2.0 * 131_600.0).abs() < 1e-3);
}

#[test]
fn y_cutoff_removes_middle_segment_and_heals() {
    let mut neuron = Neuron::new(22, "MN22");
    neuron.nodes = vec![
        Node::new(1, None, [0.0, 10.0, 0.0], 500.0),
        Node::new(2, Some(1), [1.0, 11.0, 0.0], 500.0),
        Node::new(3, Some(2), [2.0, 12.0, 0.0], 500.0),
        Node::new(4, Some(3), [3.0, 1.0, 0.0], 500.0),
        Node::new(5, Some(4), [4.0, 2.0, 0.0], 500.0),
        Node::new(6, Some(5), [5.0, 14.0, 0.0], 100.0),
        Node::new(7, Some(6), [6.0, 15.0, 0.0], 100.0),
    ];

    let joins = apply_y_cutoff(&mut neuron, 5.0);
    assert_eq!(joins, 1);
    assert_eq!(neuron.n_fragments(), 1);
    assert_eq!(neuron.roots(), vec![1]);
    let ids: Vec<u64> = neuron.nodes.iter().map(|n| n.node_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 6, 7]);
    assert_eq!(neuron.node(6).unwrap().parent_id, Some(3));

    elastic_transform_neuron(&mut neuron, &Bend, false, false).unwrap();
    assert_eq!(neuron.n_fragments(), 1);
    assert!(near(neuron.node(7).unwrap().location, [6.225, 17.0, -0.3], 1e-9));
}

#[test]
fn radius_subset_is_idempotent() {
    let neuron = sample_neuron();
    let kept = radius_subset(&neuron, 500.0, true);
    assert_eq!(kept, BTreeSet::from([1, 2]));

    let mut pruned = neuron.clone();
    pruned.subset(&kept);
    assert_eq!(radius_subset(&pruned, 500.0, true), kept);
}

#[test]
fn radius_prune_refuses_second_pass() {
    let mut neuron = sample_neuron();
    radius_prune_neuron(&mut neuron, 500.0, true).unwrap();
    assert_eq!(neuron.n_nodes(), 2);
    assert!(neuron.name.contains("radius"));

    let err = radius_prune_neuron(&mut neuron, 500.0, true).unwrap_err();
    assert!(matches!(err, TransformError::AlreadyTransformed { .. }));
}

/// Primary neurite along x with a side branch at x=20 that is proximal to
/// the volume, so the forward walk stops at the branch point.
fn motor_neuron_with_early_branch() -> Neuron {
    let at = |x: f64| [x, 1.3, 2.7];
    let mut neuron = Neuron::new(77, "MN1");
    neuron.nodes = vec![
        Node::new(1, None, at(0.0), 500.0),
        Node::new(2, Some(1), at(10.0), 500.0),
        Node::new(3, Some(2), at(20.0), 500.0),
        Node::new(4, Some(3), [22.0, 6.1, 2.7], 100.0),
        Node::new(5, Some(3), at(30.0), 500.0),
        Node::new(6, Some(5), at(50.0), 500.0),
        Node::new(7, Some(6), at(80.0), 500.0),
        Node::new(8, Some(7), at(90.0), 500.0),
    ];
    neuron
}

#[test]
fn first_entry_last_exit_stops_at_branch_and_warns() {
    let volume = Volume::axis_aligned_box(109, "T1 neuropil", [25.0, -10.0, -10.0], [75.0, 10.0, 10.0]);
    let mut neuron = motor_neuron_with_early_branch();

    let report =
        volume_prune_neuron(&mut neuron, &volume, VolumePruneMode::FirstEntryLastExit, false).unwrap();

    let kept: BTreeSet<u64> = neuron.nodes.iter().map(|node| node.node_id).collect();
    assert_eq!(kept, BTreeSet::from([3, 4, 5, 6, 7]));
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("Hit a branch before hitting the volume"));
    assert_eq!(neuron.name, "MN1 - pruned by vol 109");
    assert!(neuron
        .annotations
        .contains("pruned (first entry, last exit) by vol 109"));
}

#[test]
fn strict_prune_keeps_only_nodes_inside() {
    let volume = Volume::axis_aligned_box(5, "box", [25.0, -10.0, -10.0], [75.0, 10.0, 10.0]);
    let mut neuron = motor_neuron_with_early_branch();

    volume_prune_neuron(&mut neuron, &volume, VolumePruneMode::Strict, true).unwrap();

    let kept: BTreeSet<u64> = neuron.nodes.iter().map(|node| node.node_id).collect();
    assert_eq!(kept, BTreeSet::from([5, 6]));
    assert_eq!(neuron.n_fragments(), 1);
}
