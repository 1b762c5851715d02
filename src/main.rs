use anyhow::{anyhow, bail, Context, Result};
use crossbeam::channel::RecvTimeoutError;
use indicatif::{ProgressBar, ProgressStyle};
use skeleton_eval::{
    codec::{self, EncodeOptions},
    config::Settings,
    export::{BatchPlan, ExportEvent, ExportReport, ExportRequest},
    folders,
    joint::Joint,
    projection::PinholeProjection,
    render::{RenderOptions, Sensor},
    source::{AnnotationPlayback, RecordingController, USER_POSITIONS_FILE_NAME},
    statistics::{Marker, Statistics},
    store::{AnnotationStore, UserPositions},
};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use structopt::StructOpt;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long, default_value = "info", env = "RUST_LOG")]
    log_level: tracing_subscriber::filter::EnvFilter,

    /// Preferences kept between runs.
    #[structopt(
        short,
        long,
        default_value = "skeleton-eval.json",
        env = "SKELETON_EVAL_SETTINGS"
    )]
    settings: PathBuf,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Count the frames every user appears in.
    Users {
        /// An annotation file.
        file: PathBuf,

        /// Only count these frames.
        #[structopt(short, long, use_delimiter = true)]
        frames: Vec<u32>,
    },

    /// List the capture directories of a project.
    Takes {
        #[structopt(short, long)]
        project_dir: Option<PathBuf>,
    },

    /// List the result files exported for a capture directory.
    Results { take: PathBuf },

    /// Compare the joints of a result user against a ground truth user.
    Evaluate(EvaluateOpt),

    /// Convert a 3D annotation file to image coordinates.
    Project { input: PathBuf, output: PathBuf },

    /// Export a frame range of a capture as images plus index files.
    Export(ExportOpt),
}

#[derive(structopt::StructOpt)]
struct EvaluateOpt {
    /// A capture directory. Its recorded user positions are the ground
    /// truth and its result files the annotations under evaluation, unless
    /// `--truth` or `--results` is given.
    #[structopt(long)]
    take: Option<PathBuf>,

    /// Which of the take's result files to evaluate, counting from 1 in the
    /// order `results` lists them. The last one by default.
    #[structopt(long)]
    result_set: Option<usize>,

    /// Ground truth annotations.
    #[structopt(long)]
    truth: Option<PathBuf>,

    /// Annotations under evaluation.
    #[structopt(long)]
    results: Option<PathBuf>,

    #[structopt(long)]
    truth_user: u32,

    #[structopt(long)]
    result_user: u32,

    /// Joints below this confidence are not considered ground truth.
    #[structopt(short, long, default_value = "0.5")]
    threshold: f64,

    /// Joints to evaluate, all if none are given.
    #[structopt(short, long, use_delimiter = true)]
    joints: Vec<Joint>,

    /// The frame to report separately, the first compared frame by default.
    #[structopt(short, long)]
    frame: Option<u32>,

    /// Print every plotted point.
    #[structopt(short, long)]
    points: bool,
}

#[derive(structopt::StructOpt)]
struct ExportOpt {
    /// A capture directory holding the recorded user positions. Export
    /// directories are created inside it.
    take: PathBuf,

    /// First exported frame, the first annotated frame by default.
    #[structopt(long)]
    first: Option<u32>,

    /// Last exported frame, the last annotated frame by default.
    #[structopt(long)]
    last: Option<u32>,

    /// Users drawn in the foreground and listed in the indexes.
    #[structopt(short, long, use_delimiter = true)]
    users: Vec<u32>,

    /// Write an index with image coordinates.
    #[structopt(long)]
    two_d: bool,

    /// Write an index with sensor coordinates.
    #[structopt(long)]
    three_d: bool,

    /// Name images relative to the export directory in the indexes.
    #[structopt(long)]
    relative: bool,

    #[structopt(long)]
    depth: bool,

    #[structopt(long)]
    no_background: bool,

    #[structopt(long)]
    skeleton: bool,

    #[structopt(long)]
    highlight: bool,

    #[structopt(long)]
    labels: bool,

    /// Export the plain image, skeleton and background free passes in a row.
    #[structopt(long)]
    batch: bool,
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    tracing::subscriber::set_global_default(
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(opt.log_level),
    )?;

    let settings = Settings::load(&opt.settings).context("failed loading settings")?;

    match opt.command {
        Command::Users { file, frames } => users(&file, &frames),
        Command::Takes { project_dir } => {
            let project = match project_dir {
                Some(project) => project,
                None => settings.project_directory_or(
                    &std::env::current_dir().context("failed getting current directory")?,
                ),
            };
            for take in folders::takes(&project).context("failed listing takes")? {
                println!("{}", take);
            }
            Ok(())
        }
        Command::Results { take } => {
            for path in folders::result_sets(&take).context("failed listing result files")? {
                let shown = path.strip_prefix(&take).unwrap_or(path.as_path());
                println!("{}", shown.display());
            }
            Ok(())
        }
        Command::Evaluate(evaluate_opt) => evaluate(&evaluate_opt),
        Command::Project { input, output } => project(&input, &output),
        Command::Export(export_opt) => export(&export_opt, settings, &opt.settings),
    }
}

fn read_annotations(path: &Path) -> Result<AnnotationStore> {
    codec::read_file(path).with_context(|| format!("failed reading annotations {:?}", path))
}

fn users(file: &Path, frames: &[u32]) -> Result<()> {
    let store = read_annotations(file)?;
    let frames = frames.iter().copied().collect::<BTreeSet<_>>();
    let statistics = store.user_statistics(Some(&frames).filter(|frames| !frames.is_empty()));
    for (user, count) in statistics {
        println!("{}\t{}", user, count);
    }
    Ok(())
}

fn project(input: &Path, output: &Path) -> Result<()> {
    let store = read_annotations(input)?;
    if !store.is_3d() {
        bail!("{:?} already holds image coordinates", input);
    }

    let projection = PinholeProjection::default();
    let mut planar = AnnotationStore::new(false);
    for (&frame, users) in store.iter() {
        let users = users
            .iter()
            .map(|(&user, skeleton)| (user, skeleton.to_planar(&projection)))
            .collect::<UserPositions>();
        planar
            .add(frame, users)
            .with_context(|| format!("failed adding frame {}", frame))?;
    }

    codec::write_file(output, &planar, &EncodeOptions::default())
        .with_context(|| format!("failed writing {:?}", output))?;
    info!(message = "projected annotations", frames = planar.len());
    Ok(())
}

/// The ground truth and result files to compare.
fn evaluation_files(opt: &EvaluateOpt) -> Result<(PathBuf, PathBuf)> {
    let take = opt.take.as_deref();
    let truth = match (&opt.truth, take) {
        (Some(truth), _) => truth.clone(),
        (None, Some(take)) => take.join(USER_POSITIONS_FILE_NAME),
        (None, None) => bail!("either --truth or --take is required"),
    };
    let results = match (&opt.results, take) {
        (Some(results), _) => results.clone(),
        (None, Some(take)) => {
            let sets = folders::result_sets(take).context("failed listing result files")?;
            let chosen = match opt.result_set {
                Some(number) => number.checked_sub(1).and_then(|index| sets.get(index)),
                None => sets.last(),
            };
            chosen
                .cloned()
                .ok_or_else(|| anyhow!("no such result file in {:?}", take))?
        }
        (None, None) => bail!("either --results or --take is required"),
    };
    Ok((truth, results))
}

fn evaluate(opt: &EvaluateOpt) -> Result<()> {
    let (truth_path, results_path) = evaluation_files(opt)?;
    info!(
        message = "evaluating",
        truth = %truth_path.display(),
        results = %results_path.display()
    );
    let truth = read_annotations(&truth_path)?;
    let results = read_annotations(&results_path)?;

    let projection = PinholeProjection::default();
    let mut statistics = Statistics::new();
    statistics
        .set_data(
            &truth,
            &results,
            opt.truth_user,
            opt.result_user,
            Some(&projection),
        )
        .context("failed comparing annotations")?;

    let enabled = if opt.joints.is_empty() {
        Joint::ALL.iter().copied().collect()
    } else {
        opt.joints.iter().copied().collect::<BTreeSet<_>>()
    };
    let frame = opt
        .frame
        .or_else(|| statistics.frame_range().map(|(first, _)| first))
        .unwrap_or_default();

    let calculation = statistics
        .calculate(&enabled, opt.threshold, true, frame)
        .ok_or_else(|| anyhow!("no comparison data"))?;

    let summary = calculation.summary;
    println!("global mean\t{:.3}", summary.global_mean);
    println!("points\t{}", summary.number_of_points);
    println!("frame {} mean\t{:.3}", frame, summary.frame_mean);
    println!("frame {} value\t{:.3}", frame, summary.frame_value);

    let mut markers = BTreeMap::<Joint, [usize; 4]>::new();
    for point in &calculation.points {
        let counts = markers.entry(point.joint).or_default();
        let index = match point.marker {
            Marker::Normal => 0,
            Marker::FalsePositive => 1,
            Marker::FalseNegative => 2,
            Marker::NotAvailable => 3,
        };
        counts[index] += 1;
    }
    println!();
    println!("joint\tnormal\tfalse positive\tfalse negative\tnot available");
    for (joint, [normal, false_positive, false_negative, not_available]) in &markers {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            joint, normal, false_positive, false_negative, not_available
        );
    }

    println!();
    println!("confidence\tsamples");
    for (bound, count) in &calculation.cumulative_confidence {
        println!("{:.2}\t{}", bound, count);
    }

    if opt.points {
        println!();
        println!("joint\tframe\tvalue\tmarker");
        for point in calculation
            .points
            .iter()
            .filter(|point| enabled.contains(&point.joint))
        {
            println!(
                "{}\t{}\t{:.3}\t{:?}",
                point.joint, point.frame, point.value, point.marker
            );
        }
    }
    Ok(())
}

fn export(opt: &ExportOpt, mut settings: Settings, settings_path: &Path) -> Result<()> {
    let (controller, _source_events) =
        RecordingController::open(&opt.take, |annotations| {
            AnnotationPlayback::new(annotations)
        })
        .with_context(|| format!("failed opening capture {:?}", opt.take))?;

    let annotations = controller.annotations();
    let first = opt
        .first
        .or_else(|| annotations.first_frame())
        .ok_or_else(|| anyhow!("no first frame given and the capture has no annotations"))?;
    let last = opt
        .last
        .or_else(|| annotations.last_frame())
        .ok_or_else(|| anyhow!("no last frame given and the capture has no annotations"))?;
    if first > last {
        bail!("first frame {} is after last frame {}", first, last);
    }
    if !opt.two_d && !opt.three_d {
        warn!("no index requested, only images are exported");
    }

    let directory = folders::next_numbered_dir(&opt.take, folders::EXPORT_PREFIX)
        .context("failed creating export directory")?;

    let request = ExportRequest {
        frames: (first..=last).collect(),
        users: opt.users.iter().copied().collect(),
        annotations_2d: opt.two_d,
        annotations_3d: opt.three_d,
        relative_paths: opt.relative,
        options: RenderOptions {
            sensor: if opt.depth { Sensor::Depth } else { Sensor::Image },
            draw_sensor_data: true,
            background: !opt.no_background,
            skeleton: opt.skeleton,
            highlight: opt.highlight,
            labels: opt.labels,
        },
        directory,
    };
    let requests: Box<dyn Iterator<Item = ExportRequest>> = if opt.batch {
        Box::new(BatchPlan::new(request))
    } else {
        Box::new(std::iter::once(request))
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_ctrl_c = running.clone();
    ctrlc::set_handler(move || {
        running_ctrl_c.store(false, Ordering::SeqCst);
    })
    .context("failed setting Ctrl-C handler")?;

    let events = controller.export_events();
    for request in requests {
        let progress = ProgressBar::new(request.frames.len() as u64).with_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold.dim} [{bar:40}] {pos}/{len} {wide_msg}")
                .progress_chars("=> "),
        );
        progress.set_prefix(format!("export{}", request.options.suffix()));

        if !controller.export(request).context("failed starting export")? {
            bail!("an export is already running");
        }

        match wait_for_export(&controller, &events, &progress, &running)? {
            Some(report) => {
                progress.finish_with_message("done");
                for path in report.write_indexes().context("failed writing indexes")? {
                    info!(message = "wrote index", path = %path.display());
                }
                info!(
                    message = "export finished",
                    directory = %report.directory.display(),
                    frames = report.frames.len()
                );
            }
            None => {
                progress.abandon_with_message("cancelled");
                info!("export cancelled");
                return Ok(());
            }
        }
    }

    // the take lives in the project directory
    if let Some(project) = opt.take.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        settings.project_directory = Some(project.to_path_buf());
        settings
            .save(settings_path)
            .context("failed saving settings")?;
    }
    Ok(())
}

/// Follow the progress of a running export until it ends. Returns `None` if
/// it was cancelled.
fn wait_for_export(
    controller: &RecordingController<AnnotationPlayback>,
    events: &crossbeam::channel::Receiver<ExportEvent>,
    progress: &ProgressBar,
    running: &AtomicBool,
) -> Result<Option<ExportReport>> {
    loop {
        if !running.load(Ordering::SeqCst) && controller.is_exporting() {
            controller.cancel_export();
        }
        match events.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(ExportEvent::Progress { done, .. }) => progress.set_position(done as u64),
            Ok(ExportEvent::Completed(report)) => return Ok(Some(report)),
            Ok(ExportEvent::Cancelled) => return Ok(None),
            Ok(ExportEvent::Failed(message)) => {
                progress.abandon_with_message("failed");
                bail!("export failed: {}", message);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("export events disconnected"),
        }
    }
}
