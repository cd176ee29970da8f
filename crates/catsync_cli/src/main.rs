use catsync_core::model::neuron::Point3;
use catsync_core::service::housekeeping_service::{HousekeepingService, ProjectRole};
use catsync_core::service::link_service::{LinkService, SyncReport};
use catsync_core::service::manipulate_service::ManipulateService;
use catsync_core::service::upload_service::{UploadAction, UploadReport};
use catsync_core::transform::elastic::{FancTemplateWarp, PointUnits, Transformix};
use catsync_core::transform::translate::{TranslationUnit, DEFAULT_PIXEL_SIZE};
use catsync_core::{
    connect, default_config_dir, init_logging_with_echo, BatchOperator, ConsoleOperator,
    ElasticOptions, Operator, PushOptions, RadiusPruneOptions, SkeletonId, SyncContext,
    TranslateOptions, UploadOptions, VolumePruneMode, VolumePruneOptions,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{error, info};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Sync, transform and curate neurons between two CATMAID projects.
#[derive(Parser, Debug)]
#[command(name = "catsync", version, about, long_about = None)]
struct Cli {
    /// Connection config: a nickname (fanc, brain, ...), a filename in the
    /// config directory, or a path.
    #[arg(short, long, global = true, default_value = catsync_core::config::DEFAULT_CONFIG_FILE)]
    config: String,

    /// Directory holding connection configs and custom_nicknames.json
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Log level: error, warn, info, debug or trace
    #[arg(long, global = true, default_value = catsync_core::default_log_level())]
    log_level: String,

    /// Directory for rotating log files (default: ./logs)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Answer every confirmation prompt with yes instead of asking
    #[arg(short = 'y', long, global = true, default_value_t = false)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

/// Which neurons an operation starts from.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct Selection {
    /// Neurons carrying all of these annotations (repeatable)
    #[arg(short, long = "annotation")]
    annotations: Vec<String>,

    /// Explicit skeleton ids (repeatable)
    #[arg(short, long = "skid")]
    skids: Vec<SkeletonId>,
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// Actually write to the target project; without this only a plan is shown
    #[arg(long, default_value_t = false)]
    live: bool,

    /// Overwrite target neurons that are already linked
    #[arg(long, default_value_t = false)]
    update: bool,

    /// Upload connectors along with the skeletons
    #[arg(long, default_value_t = false)]
    import_connectors: bool,

    /// Create fresh connectors instead of reusing linked ones
    #[arg(long, default_value_t = false)]
    no_reuse_connectors: bool,

    /// Write the reverse link onto the source neurons
    #[arg(long, default_value_t = false)]
    annotate_source: bool,
}

impl UploadArgs {
    fn options(&self) -> UploadOptions {
        UploadOptions {
            dry_run: !self.live,
            refuse_to_update: !self.update,
            import_connectors: self.import_connectors,
            reuse_existing_connectors: !self.no_reuse_connectors,
            annotate_source_neuron: self.annotate_source,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg {
    Source,
    Target,
}

impl From<RoleArg> for ProjectRole {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::Source => ProjectRole::Source,
            RoleArg::Target => ProjectRole::Target,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum UnitsArg {
    Nm,
    Microns,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload unmodified copies of source neurons to the target project
    Copy {
        #[command(flatten)]
        selection: Selection,
        #[command(flatten)]
        upload: UploadArgs,
    },
    /// Upload source neurons shifted by a constant offset
    Translate {
        #[command(flatten)]
        selection: Selection,
        /// Offset as x,y,z
        #[arg(long, value_parser = parse_point)]
        offset: Point3,
        /// Unit of the offset: nm or pixels
        #[arg(long, default_value = "nm")]
        unit: TranslationUnit,
        /// Voxel size as x,y,z in nm, for pixel offsets
        #[arg(long, value_parser = parse_point)]
        pixel_size: Option<Point3>,
        #[command(flatten)]
        upload: UploadArgs,
    },
    /// Upload source neurons mapped through a 4x4 affine matrix file
    Affine {
        #[command(flatten)]
        selection: Selection,
        #[arg(long)]
        transform_file: PathBuf,
        #[command(flatten)]
        upload: UploadArgs,
    },
    /// Upload source neurons warped between FANC and the VNC template
    Elastic {
        #[command(flatten)]
        selection: Selection,
        /// Directory holding the FANC/template transformix parameter files
        #[arg(long, conflicts_with = "parameter_file")]
        parameter_dir: Option<PathBuf>,
        /// Single transformix parameter file for a generic warp
        #[arg(long)]
        parameter_file: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        flip: bool,
        /// Keep nodes below the FANC y cutoff
        #[arg(long, default_value_t = false)]
        no_y_cutoff: bool,
        /// Units of the source coordinates; asked for when omitted and they
        /// look like microns
        #[arg(long, value_enum)]
        units: Option<UnitsArg>,
        #[command(flatten)]
        upload: UploadArgs,
    },
    /// Upload source neurons pruned to a volume
    VolumePrune {
        #[command(flatten)]
        selection: Selection,
        #[arg(long)]
        volume_id: u64,
        /// fele (first entry, last exit) or strict
        #[arg(long, default_value = "fele", value_parser = parse_prune_mode)]
        mode: VolumePruneMode,
        #[arg(long, default_value_t = false)]
        only_keep_largest_fragment: bool,
        #[command(flatten)]
        upload: UploadArgs,
    },
    /// Upload source neurons pruned to nodes of a given radius
    RadiusPrune {
        #[command(flatten)]
        selection: Selection,
        #[arg(long, default_value_t = catsync_core::transform::PRIMARY_NEURITE_RADIUS)]
        radius: f64,
        /// Keep only nodes with exactly this radius
        #[arg(long, default_value_t = false)]
        exact: bool,
        #[command(flatten)]
        upload: UploadArgs,
    },
    /// Replay linked transforms from source neurons onto their target copies
    Push(SyncArgs),
    /// Refresh target neurons from the source neurons they link to
    Pull(SyncArgs),
    /// List or delete connectors without any linked node
    UnlinkedConnectors {
        #[arg(long, value_enum, default_value = "source")]
        project: RoleArg,
        #[arg(long, default_value_t = false)]
        delete: bool,
    },
    /// List groups of connectors sharing the exact same location
    OverlappingConnectors {
        #[arg(long, value_enum, default_value = "source")]
        project: RoleArg,
    },
    /// Delete annotations that no longer annotate anything
    PurgeAnnotations {
        #[arg(long, value_enum, default_value = "source")]
        project: RoleArg,
        /// Neuron the annotations are cycled through
        #[arg(long)]
        dummy_skid: SkeletonId,
        /// Purge without asking per annotation
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Compare target neurons with the source neurons they link to
    Desyncs {
        #[arg(short, long = "annotation", required = true)]
        annotations: Vec<String>,
    },
    /// Add or delete placeholder nodes at (-1, -1)
    DummyNodes {
        #[command(subcommand)]
        action: DummyAction,
    },
    /// Replace a skeleton's nodes with the contents of an SWC file
    ReplaceSwc {
        #[arg(long)]
        skid: SkeletonId,
        #[arg(long)]
        swc: PathBuf,
        #[arg(long, default_value_t = false)]
        live: bool,
    },
}

#[derive(Args, Debug)]
struct SyncArgs {
    #[command(flatten)]
    selection: Selection,
    /// Keep pushing through chains of linked neurons in the target project
    #[arg(long, default_value_t = false)]
    recurse: bool,
    /// Skip target neurons with an annotation containing this text (repeatable)
    #[arg(long = "skip-date")]
    skip_dates: Vec<String>,
    /// Offset in nm replayed for translation links, as x,y,z
    #[arg(long, value_parser = parse_point)]
    translation: Option<Point3>,
    /// Radius replayed for radius-prune links
    #[arg(long, default_value_t = catsync_core::transform::PRIMARY_NEURITE_RADIUS)]
    radius: f64,
    #[arg(long, default_value_t = false)]
    only_keep_largest_fragment: bool,
    /// Directory holding the FANC/template parameter files, for elastic links
    #[arg(long)]
    parameter_dir: Option<PathBuf>,
    /// Actually write to the target project
    #[arg(long, default_value_t = false)]
    live: bool,
}

impl SyncArgs {
    fn options(&self) -> PushOptions {
        PushOptions {
            recurse: self.recurse,
            skip_dates: self.skip_dates.clone(),
            translation_nm: self.translation,
            radius: RadiusPruneOptions {
                radius: self.radius,
                ..RadiusPruneOptions::default()
            },
            only_keep_largest_fragment: self.only_keep_largest_fragment,
            upload: UploadOptions {
                dry_run: !self.live,
                ..UploadOptions::default()
            },
        }
    }
}

#[derive(Subcommand, Debug)]
enum DummyAction {
    Add {
        #[command(flatten)]
        selection: Selection,
        #[arg(long, value_enum, default_value = "source")]
        project: RoleArg,
        #[arg(long, default_value_t = false)]
        live: bool,
    },
    Delete {
        #[command(flatten)]
        selection: Selection,
        #[arg(long, value_enum, default_value = "source")]
        project: RoleArg,
        #[arg(long, default_value_t = false)]
        live: bool,
    },
}

fn parse_point(value: &str) -> Result<Point3, String> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|err| format!("expected x,y,z numbers: {err}"))?;
    match parts.as_slice() {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(format!("expected 3 comma-separated numbers, got {}", parts.len())),
    }
}

fn parse_prune_mode(value: &str) -> Result<VolumePruneMode, String> {
    VolumePruneMode::from_cli(value).ok_or_else(|| format!("unknown prune mode '{value}', use fele or strict"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=command_failed module=cli status=error error={err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let log_dir = absolute_dir(cli.log_dir.as_deref().unwrap_or(Path::new("logs")))?;
    init_logging_with_echo(&cli.log_level, &log_dir.to_string_lossy(), true)?;

    let operator: Arc<dyn Operator> = if cli.yes {
        Arc::new(BatchOperator { assume_yes: true })
    } else {
        Arc::new(ConsoleOperator)
    };
    let config_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);
    let mut ctx = connect(&cli.config, &config_dir, operator)?;
    info!(
        "event=command_started module=cli status=ok config={} command={:?}",
        cli.config, cli.command
    );

    match cli.command {
        Command::Copy { selection, upload } => {
            let service = ManipulateService::new(&ctx);
            let options = upload.options();
            let report = match skids_or_annotations(&selection) {
                Select::Skids(skids) => Some(service.copy_neurons_by_skid(skids, &options)?),
                Select::Annotations(annotations) => {
                    service.copy_neurons_by_annotations(annotations, &options)?
                }
            };
            print_upload_report(report.as_ref());
        }
        Command::Translate {
            selection,
            offset,
            unit,
            pixel_size,
            upload,
        } => {
            let service = ManipulateService::new(&ctx);
            let options = TranslateOptions {
                translation: offset,
                unit,
                pixel_size: pixel_size.unwrap_or(DEFAULT_PIXEL_SIZE),
                upload: upload.options(),
            };
            let report = match skids_or_annotations(&selection) {
                Select::Skids(skids) => Some(service.translate_neurons_by_skid(skids, &options)?),
                Select::Annotations(annotations) => {
                    service.translate_neurons_by_annotations(annotations, &options)?
                }
            };
            print_upload_report(report.as_ref());
        }
        Command::Affine {
            selection,
            transform_file,
            upload,
        } => {
            let service = ManipulateService::new(&ctx);
            let options = upload.options();
            let report = match skids_or_annotations(&selection) {
                Select::Skids(skids) => {
                    Some(service.affine_transform_by_skid(skids, &transform_file, &options)?)
                }
                Select::Annotations(annotations) => {
                    service.affine_transform_by_annotations(annotations, &transform_file, &options)?
                }
            };
            print_upload_report(report.as_ref());
        }
        Command::Elastic {
            selection,
            parameter_dir,
            parameter_file,
            flip,
            no_y_cutoff,
            units,
            upload,
        } => {
            let options = ElasticOptions {
                left_right_flip: flip,
                y_cutoff: if no_y_cutoff {
                    None
                } else {
                    ElasticOptions::default().y_cutoff
                },
                input_units: units.map(|units| match units {
                    UnitsArg::Nm => PointUnits::Nanometers,
                    UnitsArg::Microns => PointUnits::Microns,
                }),
                upload: upload.options(),
            };
            let report = run_elastic(
                &ctx,
                &selection,
                parameter_dir.as_deref(),
                parameter_file,
                &options,
            )?;
            print_upload_report(report.as_ref());
        }
        Command::VolumePrune {
            selection,
            volume_id,
            mode,
            only_keep_largest_fragment,
            upload,
        } => {
            let service = ManipulateService::new(&ctx);
            let options = VolumePruneOptions {
                only_keep_largest_fragment,
                upload: upload.options(),
                ..VolumePruneOptions::new(volume_id, mode)
            };
            let report = match skids_or_annotations(&selection) {
                Select::Skids(skids) => Some(service.volume_prune_by_skid(skids, &options)?),
                Select::Annotations(annotations) => {
                    service.volume_prune_by_annotations(annotations, &options)?
                }
            };
            print_upload_report(report.as_ref());
        }
        Command::RadiusPrune {
            selection,
            radius,
            exact,
            upload,
        } => {
            let service = ManipulateService::new(&ctx);
            let options = RadiusPruneOptions {
                radius,
                keep_larger_radii: !exact,
                upload: upload.options(),
            };
            let report = match skids_or_annotations(&selection) {
                Select::Skids(skids) => Some(service.radius_prune_by_skid(skids, &options)?),
                Select::Annotations(annotations) => {
                    service.radius_prune_by_annotations(annotations, &options)?
                }
            };
            print_upload_report(report.as_ref());
        }
        Command::Push(args) => {
            let warp = args.parameter_dir.as_deref().map(FancTemplateWarp::from_parameter_dir);
            let options = args.options();
            let mut service = LinkService::new(&mut ctx);
            if let Some(warp) = &warp {
                service = service.with_fanc_warp(warp);
            }
            let report = match skids_or_annotations(&args.selection) {
                Select::Skids(skids) => Some(service.push_all_updates_by_skid(skids, &options)?),
                Select::Annotations(annotations) => {
                    service.push_all_updates_by_annotations(annotations, &options)?
                }
            };
            print_sync_report(report.as_ref());
        }
        Command::Pull(args) => {
            let warp = args.parameter_dir.as_deref().map(FancTemplateWarp::from_parameter_dir);
            let options = args.options();
            let mut service = LinkService::new(&mut ctx);
            if let Some(warp) = &warp {
                service = service.with_fanc_warp(warp);
            }
            let report = match skids_or_annotations(&args.selection) {
                Select::Skids(skids) => Some(service.pull_all_updates_by_skid(skids, &options)?),
                Select::Annotations(annotations) => {
                    service.pull_all_updates_by_annotations(annotations, &options)?
                }
            };
            print_sync_report(report.as_ref());
        }
        Command::UnlinkedConnectors { project, delete } => {
            let service = HousekeepingService::new(&ctx);
            if delete {
                let deleted = service.delete_unlinked_connectors(project.into())?;
                println!("Deleted {deleted} unlinked connectors.");
            } else {
                let found = service.find_unlinked_connectors(project.into())?;
                println!("Found {} unlinked connectors: {found:?}", found.len());
            }
        }
        Command::OverlappingConnectors { project } => {
            let groups = HousekeepingService::new(&ctx).find_overlapping_connectors(project.into())?;
            println!("Found {} groups of overlapping connectors.", groups.len());
            for group in groups {
                println!("{group:?}");
            }
        }
        Command::PurgeAnnotations {
            project,
            dummy_skid,
            force,
        } => {
            let purged = HousekeepingService::new(&ctx).purge_unused_annotations(
                project.into(),
                dummy_skid,
                force,
            )?;
            println!("Purged {} annotations.", purged.len());
        }
        Command::Desyncs { annotations } => {
            let desyncs = HousekeepingService::new(&ctx).find_desyncs(&annotations)?;
            if desyncs.is_empty() {
                println!("No desyncs found.");
            }
            for desync in desyncs {
                println!(
                    "{} (target {} <- source {}): nodes {}/{}, connectors {}/{}",
                    desync.name,
                    desync.target_skeleton_id,
                    desync.source_skeleton_id,
                    desync.nodes.0,
                    desync.nodes.1,
                    desync.connectors.0,
                    desync.connectors.1
                );
            }
        }
        Command::DummyNodes { action } => {
            let service = HousekeepingService::new(&ctx);
            let (verb, nodes) = match action {
                DummyAction::Add {
                    selection,
                    project,
                    live,
                } => {
                    let nodes = match skids_or_annotations(&selection) {
                        Select::Skids(skids) => {
                            service.add_dummy_nodes_by_skid(project.into(), skids, !live)?
                        }
                        Select::Annotations(annotations) => {
                            service.add_dummy_nodes_by_annotations(project.into(), annotations, !live)?
                        }
                    };
                    ("Added", nodes)
                }
                DummyAction::Delete {
                    selection,
                    project,
                    live,
                } => {
                    let nodes = match skids_or_annotations(&selection) {
                        Select::Skids(skids) => {
                            service.delete_dummy_nodes_by_skid(project.into(), skids, !live)?
                        }
                        Select::Annotations(annotations) => service
                            .delete_dummy_nodes_by_annotations(project.into(), annotations, !live)?,
                    };
                    ("Deleted", nodes)
                }
            };
            println!("{verb} dummy nodes: {nodes:?}");
        }
        Command::ReplaceSwc { skid, swc, live } => {
            let replacement = HousekeepingService::new(&ctx).replace_skeleton_from_swc(skid, &swc, !live)?;
            println!(
                "{}: mean node distance {:.1} nm, {} connectors and {} tags lost, replaced={}",
                replacement.name,
                replacement.mean_distance,
                replacement.lost_connectors,
                replacement.lost_tags,
                replacement.replaced
            );
        }
    }
    info!("event=command_finished module=cli status=ok");
    Ok(())
}

enum Select<'a> {
    Skids(&'a [SkeletonId]),
    Annotations(&'a [String]),
}

fn skids_or_annotations(selection: &Selection) -> Select<'_> {
    if selection.skids.is_empty() {
        Select::Annotations(&selection.annotations)
    } else {
        Select::Skids(&selection.skids)
    }
}

fn run_elastic(
    ctx: &SyncContext,
    selection: &Selection,
    parameter_dir: Option<&Path>,
    parameter_file: Option<PathBuf>,
    options: &ElasticOptions,
) -> CliResult<Option<UploadReport>> {
    let service = ManipulateService::new(ctx);
    if let Some(parameter_file) = parameter_file {
        let skids = match skids_or_annotations(selection) {
            Select::Skids(skids) => skids.to_vec(),
            Select::Annotations(annotations) => ctx.source.skeleton_ids_by_annotations(annotations)?,
        };
        let warp = Transformix::new(parameter_file);
        return Ok(Some(service.elastic_transform_by_skid(&skids, &warp, options)?));
    }
    let parameter_dir = parameter_dir.ok_or("elastic needs --parameter-dir or --parameter-file")?;
    let warp = FancTemplateWarp::from_parameter_dir(parameter_dir);
    let report = match skids_or_annotations(selection) {
        Select::Skids(skids) => Some(service.elastic_transform_fanc_by_skid(skids, &warp, options)?),
        Select::Annotations(annotations) => {
            service.elastic_transform_fanc_by_annotations(annotations, &warp, options)?
        }
    };
    Ok(report)
}

fn absolute_dir(path: &Path) -> CliResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn print_upload_report(report: Option<&UploadReport>) {
    let Some(report) = report else {
        println!("Cancelled.");
        return;
    };
    for outcome in &report.outcomes {
        let action = match &outcome.action {
            UploadAction::Created { skeleton_id } => format!("created skeleton {skeleton_id}"),
            UploadAction::Updated { skeleton_id } => format!("updated skeleton {skeleton_id}"),
            UploadAction::WouldCreate => "would create a new skeleton".to_string(),
            UploadAction::WouldUpdate { skeleton_id } => {
                format!("would update skeleton {skeleton_id}")
            }
            UploadAction::Skipped(reason) => format!("skipped ({reason:?})"),
        };
        println!("{} [{}]: {action}", outcome.name, outcome.source_skeleton_id);
    }
    if !report.source_annotation_failures.is_empty() {
        println!(
            "Could not annotate source neurons: {:?}",
            report.source_annotation_failures
        );
    }
}

fn print_sync_report(report: Option<&SyncReport>) {
    print_upload_report(report.map(|report| &report.uploads));
    if let Some(report) = report {
        for link in &report.skipped_links {
            println!("Not replayed: {link}");
        }
    }
}
