use catsync_core::model::neuron::{Neuron, Node};
use catsync_core::remote::memory::{InMemoryCatmaid, Mutation};
use catsync_core::service::link_service::{LinkResolver, LinkService, ResolveError};
use catsync_core::service::manipulate_service::ManipulateService;
use catsync_core::service::upload_service::{SkipReason, UploadAction};
use catsync_core::{
    ProjectHandle, PushOptions, ScriptedOperator, SyncContext, UploadOptions,
};
use std::sync::Arc;

const SOURCE_SERVER: &str = "https://src";
const TARGET_SERVER: &str = "https://tgt";
const COPY_OF_5: &str = "LINKED NEURON - copy of skeleton id 5 in project id 1 on server https://src";
const RADIUS_OF_100: &str =
    "LINKED NEURON - radius pruned of skeleton id 100 in project id 2 on server https://tgt";

fn neuron(skeleton_id: u64, name: &str) -> Neuron {
    let base = skeleton_id * 10;
    let mut neuron = Neuron::new(skeleton_id, name);
    neuron.nodes = vec![
        Node::new(base, None, [0.0, 0.0, 0.0], 500.0),
        Node::new(base + 1, Some(base), [100.0, 0.0, 0.0], 500.0),
        Node::new(base + 2, Some(base + 1), [200.0, 50.0, 0.0], 100.0),
    ];
    neuron
}

fn linked(skeleton_id: u64, name: &str, annotations: &[&str]) -> Neuron {
    let mut neuron = neuron(skeleton_id, name);
    for annotation in annotations {
        neuron.add_annotation(*annotation);
    }
    neuron
}

fn setup(operator: Arc<ScriptedOperator>) -> (Arc<InMemoryCatmaid>, SyncContext) {
    let server = Arc::new(InMemoryCatmaid::new());
    server.add_project(1, "FANC");
    server.add_project(2, "VNC template");
    let ctx = SyncContext::new(
        ProjectHandle::new(SOURCE_SERVER, 1, server.clone()),
        Some(ProjectHandle::new(TARGET_SERVER, 2, server.clone())),
        operator,
    );
    (server, ctx)
}

fn uploads(server: &InMemoryCatmaid) -> Vec<Mutation> {
    server
        .mutations()
        .into_iter()
        .filter(|mutation| matches!(mutation, Mutation::Upload { .. }))
        .collect()
}

#[test]
fn two_targets_for_one_source_are_reported_not_resolved() {
    let annotations = [
        "LINKED NEURON - copy of skeleton id 42 in project id 7 on server X",
        "LINKED NEURON - translation of skeleton id 42 in project id 7 on server X",
        "LINKED NEURON - copy of skeleton id 43 in project id 7 on server X",
    ];
    match LinkResolver::resolve_unique(annotations, 42, 7) {
        Err(ResolveError::Ambiguous(candidates)) => assert_eq!(candidates.len(), 2),
        other => panic!("expected ambiguity, got {other:?}"),
    }
    let single = LinkResolver::resolve_unique(annotations, 43, 7).unwrap();
    assert_eq!(single.link.skeleton_id, 43);
}

#[test]
fn dry_run_plans_without_writing() {
    let operator = Arc::new(ScriptedOperator::approving());
    let (server, ctx) = setup(operator.clone());
    server.insert_neuron(1, neuron(5, "DNa01"));
    server.insert_neuron(1, neuron(6, "DNa02"));
    server.insert_neuron(2, linked(100, "DNa01", &[COPY_OF_5]));

    let service = ManipulateService::new(&ctx);
    let refused = service
        .copy_neurons_by_skid(&[5, 6], &UploadOptions::default())
        .unwrap();
    assert_eq!(
        refused.outcomes[0].action,
        UploadAction::Skipped(SkipReason::RefuseToUpdate)
    );
    assert_eq!(refused.outcomes[1].action, UploadAction::WouldCreate);

    let options = UploadOptions {
        refuse_to_update: false,
        ..UploadOptions::default()
    };
    let planned = service.copy_neurons_by_skid(&[5, 6], &options).unwrap();
    assert_eq!(
        planned.outcomes[0].action,
        UploadAction::WouldUpdate { skeleton_id: 100 }
    );
    assert_eq!(planned.outcomes[1].action, UploadAction::WouldCreate);

    assert!(server.mutations().is_empty());
    assert!(operator
        .messages()
        .iter()
        .any(|message| message.starts_with("Dry run: nothing was uploaded")));
}

#[test]
fn live_update_keeps_target_skeleton_id() {
    let operator = Arc::new(ScriptedOperator::approving());
    let (server, ctx) = setup(operator);
    server.insert_neuron(1, neuron(5, "DNa01"));
    let mut target = linked(100, "DNa01", &[COPY_OF_5, "proofread"]);
    target.nodes.truncate(1);
    server.insert_neuron(2, target);

    let options = UploadOptions {
        refuse_to_update: false,
        ..UploadOptions::live()
    };
    let report = ManipulateService::new(&ctx)
        .copy_neurons_by_skid(&[5], &options)
        .unwrap();

    assert_eq!(report.written_skeleton_ids(), vec![100]);
    let stored = server.neuron(2, 100).unwrap();
    assert_eq!(stored.n_nodes(), 3);
    assert!(stored.annotations.contains("proofread"));
    assert!(stored.annotations.contains(COPY_OF_5));
}

#[test]
fn edited_target_is_skipped_when_operator_declines() {
    let operator = Arc::new(ScriptedOperator::new([], false));
    let (server, ctx) = setup(operator.clone());
    server.add_user(3, "tracer");
    server.insert_neuron(1, neuron(5, "DNa01"));
    server.insert_neuron(2, linked(100, "DNa01", &[COPY_OF_5]));
    server.mark_node_edited(2, 1001, 3);

    let options = UploadOptions {
        refuse_to_update: false,
        ..UploadOptions::live()
    };
    let report = ManipulateService::new(&ctx)
        .copy_neurons_by_skid(&[5], &options)
        .unwrap();

    assert_eq!(
        report.outcomes[0].action,
        UploadAction::Skipped(SkipReason::EditedNodesDeclined)
    );
    assert!(uploads(&server).is_empty());
    assert!(operator
        .messages()
        .iter()
        .any(|message| message.contains("node 1001") && message.contains("tracer")));
}

#[test]
fn recursive_push_follows_links_inside_target() {
    let operator = Arc::new(ScriptedOperator::approving());
    let (server, mut ctx) = setup(operator.clone());
    server.insert_neuron(1, neuron(5, "DNa01"));
    server.insert_neuron(2, linked(100, "DNa01", &[COPY_OF_5]));
    server.insert_neuron(2, linked(200, "DNa01 - radius 500", &[RADIUS_OF_100]));

    let options = PushOptions {
        recurse: true,
        upload: UploadOptions::live(),
        ..PushOptions::default()
    };
    let report = LinkService::new(&mut ctx)
        .push_all_updates_by_skid(&[5], &options)
        .unwrap();

    assert_eq!(report.uploads.written_skeleton_ids(), vec![100, 200]);
    assert!(report.skipped_links.is_empty());
    let pruned = server.neuron(2, 200).unwrap();
    assert_eq!(pruned.n_nodes(), 2);
    assert!(operator
        .messages()
        .contains(&"Recursing - now pushing updates to skids [100]".to_string()));
    assert_eq!(ctx.source.project_id, 1);
    assert_eq!(ctx.source.server, SOURCE_SERVER);
}

#[test]
fn recursion_stops_at_links_that_were_not_replayed() {
    let operator = Arc::new(ScriptedOperator::approving());
    let (server, mut ctx) = setup(operator.clone());
    let translation_of_100 =
        "LINKED NEURON - translation of skeleton id 100 in project id 2 on server https://tgt";
    let radius_of_200 =
        "LINKED NEURON - radius pruned of skeleton id 200 in project id 2 on server https://tgt";
    server.insert_neuron(1, neuron(5, "DNa01"));
    server.insert_neuron(2, linked(100, "DNa01", &[COPY_OF_5]));
    server.insert_neuron(2, linked(200, "DNa01 - translated", &[translation_of_100]));
    server.insert_neuron(2, linked(300, "DNa01 - radius 500", &[radius_of_200]));

    let options = PushOptions {
        recurse: true,
        upload: UploadOptions::live(),
        ..PushOptions::default()
    };
    let report = LinkService::new(&mut ctx)
        .push_all_updates_by_skid(&[5], &options)
        .unwrap();

    assert_eq!(report.uploads.written_skeleton_ids(), vec![100]);
    assert_eq!(report.skipped_links, vec![translation_of_100.to_string()]);
    assert_eq!(server.neuron(2, 300).unwrap().n_nodes(), 3);
    assert!(!operator
        .messages()
        .iter()
        .any(|message| message.contains("skids [200]")));
    assert_eq!(ctx.source.project_id, 1);
}

#[test]
fn dry_run_push_does_not_recurse() {
    let operator = Arc::new(ScriptedOperator::approving());
    let (server, mut ctx) = setup(operator);
    server.insert_neuron(1, neuron(5, "DNa01"));
    server.insert_neuron(2, linked(100, "DNa01", &[COPY_OF_5]));
    server.insert_neuron(2, linked(200, "DNa01 - radius 500", &[RADIUS_OF_100]));

    let options = PushOptions {
        recurse: true,
        ..PushOptions::default()
    };
    let report = LinkService::new(&mut ctx)
        .push_all_updates_by_skid(&[5], &options)
        .unwrap();

    assert_eq!(report.uploads.outcomes.len(), 1);
    assert_eq!(
        report.uploads.outcomes[0].action,
        UploadAction::WouldUpdate { skeleton_id: 100 }
    );
    assert!(server.mutations().is_empty());
}

#[test]
fn push_skips_recently_updated_targets() {
    let operator = Arc::new(ScriptedOperator::approving());
    let (server, mut ctx) = setup(operator);
    server.insert_neuron(1, neuron(5, "DNa01"));
    server.insert_neuron(
        2,
        linked(
            100,
            "DNa01",
            &[COPY_OF_5, "UPDATED FROM LINKED NEURON - 2024-05-01 10:00 AM"],
        ),
    );

    let options = PushOptions {
        skip_dates: vec!["2024-05-01".to_string()],
        upload: UploadOptions::live(),
        ..PushOptions::default()
    };
    let report = LinkService::new(&mut ctx)
        .push_all_updates_by_skid(&[5], &options)
        .unwrap();

    assert_eq!(report.skipped_links, vec![COPY_OF_5.to_string()]);
    assert!(uploads(&server).is_empty());
}

#[test]
fn translation_link_without_offset_is_reported() {
    let operator = Arc::new(ScriptedOperator::approving());
    let (server, mut ctx) = setup(operator);
    let translation = "LINKED NEURON - translation of skeleton id 5 in project id 1 on server https://src";
    server.insert_neuron(1, neuron(5, "DNa01"));
    server.insert_neuron(2, linked(100, "DNa01", &[translation]));

    let options = PushOptions {
        upload: UploadOptions::live(),
        ..PushOptions::default()
    };
    let report = LinkService::new(&mut ctx)
        .push_all_updates_by_skid(&[5], &options)
        .unwrap();

    assert_eq!(report.skipped_links, vec![translation.to_string()]);
    assert!(server.mutations().is_empty());
}

#[test]
fn pull_refreshes_from_linked_source_only() {
    let operator = Arc::new(ScriptedOperator::approving());
    let (server, mut ctx) = setup(operator);
    let elsewhere = "LINKED NEURON - copy of skeleton id 5 in project id 99 on server https://other";
    server.insert_neuron(1, neuron(5, "DNa01"));
    let mut stale = linked(100, "DNa01", &[COPY_OF_5]);
    stale.nodes.truncate(1);
    server.insert_neuron(2, stale);
    server.insert_neuron(2, linked(300, "DNa01", &[elsewhere]));

    let options = PushOptions {
        upload: UploadOptions::live(),
        ..PushOptions::default()
    };
    let report = LinkService::new(&mut ctx)
        .pull_all_updates_by_skid(&[100, 300], &options)
        .unwrap();

    assert_eq!(report.uploads.written_skeleton_ids(), vec![100]);
    assert_eq!(report.skipped_links, vec![elsewhere.to_string()]);
    assert_eq!(server.neuron(2, 100).unwrap().n_nodes(), 3);
}

#[test]
fn volume_prune_fetches_volume_once_and_surfaces_warnings() {
    use catsync_core::model::volume::Volume;
    use catsync_core::{VolumePruneMode, VolumePruneOptions};

    let operator = Arc::new(ScriptedOperator::approving());
    let (server, ctx) = setup(operator.clone());
    let at = |x: f64| [x, 1.3, 2.7];
    let mut motor = Neuron::new(7, "MN1");
    motor.nodes = vec![
        Node::new(1, None, at(0.0), 500.0),
        Node::new(2, Some(1), at(20.0), 500.0),
        Node::new(3, Some(2), [22.0, 6.1, 2.7], 100.0),
        Node::new(4, Some(2), at(50.0), 500.0),
        Node::new(5, Some(4), at(90.0), 500.0),
    ];
    server.insert_neuron(1, motor);
    server.insert_volume(
        1,
        Volume::axis_aligned_box(109, "T1", [25.0, -10.0, -10.0], [75.0, 10.0, 10.0]),
    );

    let options = VolumePruneOptions::new(109, VolumePruneMode::FirstEntryLastExit);
    let service = ManipulateService::new(&ctx);
    let pruned = service.get_volume_pruned_neurons(&[7], &options).unwrap();
    service.get_volume_pruned_neurons(&[7], &options).unwrap();

    assert_eq!(pruned[0].name, "MN1 - pruned by vol 109");
    assert_eq!(ctx.volumes.len(), 1);
    assert_eq!(server.volume_fetches(), 1);
    assert_eq!(operator.warnings().len(), 2);
    assert!(operator.warnings()[0].contains("Hit a branch"));
}
