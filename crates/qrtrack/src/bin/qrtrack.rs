use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::exit;

use clap::{ArgAction, Parser, Subcommand};
use log::info;
use qrtrack::calibrate::{calibrate_to_file, Calibrator, ConsoleConfirmation};
use qrtrack::detect::ChessCheckerboardFinder;
use qrtrack::markers::QrDecoder;
use qrtrack::publish::{LogSink, ParameterTreePublisher, PoseSink};
use qrtrack::source::{self, ImageFileSource};
use qrtrack::store;
use qrtrack::track::{
    decode_frame, CancelToken, FrameProcessor, Reprojector, StrategyMode, TrackError,
    TrackingSession,
};
use qrtrack::{FrameSource, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "qrtrack", version, about = "Workspace calibration and QR marker tracking")]
struct Cli {
    /// More log output (repeatable).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute the camera-to-scene transformation from a checkerboard.
    Calibrate {
        /// Reference grid file (Size, Origin, Step).
        grid: PathBuf,
        /// Scene extent file (Size or Width/Height).
        scene: PathBuf,
        /// Image file, .avi video or device index.
        source: String,
        /// Where to write the transformation.
        output: PathBuf,
        /// Skip sub-pixel corner refinement.
        #[arg(long)]
        no_subpix: bool,
        /// Write each candidate reprojection to this image before asking.
        #[arg(long, value_name = "PNG")]
        preview: Option<PathBuf>,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Track markers until interrupted.
    Track {
        transformation: PathBuf,
        scene: PathBuf,
        /// Image file, .avi video or device index.
        source: String,
        /// Reproject on the parallel worker pool.
        #[arg(long)]
        accelerate: bool,
        #[arg(long, value_name = "N")]
        threads: Option<usize>,
        /// Parameter tree address, `host:port`. Poses are logged when absent.
        #[arg(long, value_name = "ADDR")]
        publish: Option<String>,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Save one frame from a capture device.
    Capture {
        /// First device index to probe.
        device: String,
        image: PathBuf,
    },
    /// Decode markers in a single image and print their poses.
    Decode {
        transformation: PathBuf,
        scene: PathBuf,
        image: PathBuf,
        /// Heading convention is read from `tracking.heading`.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, Box<dyn Error>> {
    Ok(match path {
        Some(p) => PipelineConfig::load(p)?,
        None => PipelineConfig::default(),
    })
}

fn level_filter(verbose: u8, quiet: bool) -> log::LevelFilter {
    match (quiet, verbose) {
        (true, _) => log::LevelFilter::Error,
        (false, 0) => log::LevelFilter::Info,
        (false, 1) => log::LevelFilter::Debug,
        (false, _) => log::LevelFilter::Trace,
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = level_filter(verbose, quiet);
    #[cfg(feature = "tracing")]
    {
        // RUST_LOG still wins over -v/-q
        let _ = tracing_log::LogTracer::init();
        qrtrack::core::init_tracing(false, level);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = qrtrack::core::init_with_level(level);
    }
}

fn run_calibrate(
    grid: &Path,
    scene: &Path,
    source_arg: &str,
    output: &Path,
    no_subpix: bool,
    preview: Option<PathBuf>,
    config: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(config)?;
    if no_subpix {
        config.calibration.refine_subpix = false;
    }

    let descriptor = source::parse_descriptor(source_arg)?;
    let grid = store::load_reference_grid(grid, config.grid_convention)?;
    let extent = store::load_scene_extent(scene)?;

    let mut backend = source::default_backend();
    let mut opened = source::resolve(&descriptor, backend.as_mut())?;
    let frame = opened.source.next_frame()?;

    let calibrator = Calibrator::new(
        ChessCheckerboardFinder::new(config.chessboard),
        config.calibration,
    );
    let mut reviewer = ConsoleConfirmation::stdio().with_preview(preview);
    let outcome = calibrate_to_file(
        &calibrator,
        &frame,
        &grid,
        Some(extent),
        &mut reviewer,
        opened
            .descriptor
            .is_device()
            .then_some(Path::new(source::CAPTURE_FILE)),
        output,
    )?;
    info!("accepted {} corner order", outcome.order);
    Ok(())
}

fn run_track(
    transformation: &Path,
    scene: &Path,
    source_arg: &str,
    accelerate: bool,
    threads: Option<usize>,
    publish: Option<String>,
    config: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(config)?;
    if accelerate {
        config.tracking.strategy = StrategyMode::Accelerated;
    }
    if threads.is_some() {
        config.tracking.threads = threads;
    }
    if publish.is_some() {
        config.publisher.target = publish;
    }

    let descriptor = source::parse_descriptor(source_arg)?;
    let transformation = store::load_transformation(transformation)?;
    let extent = store::load_scene_extent(scene)?;
    if let Some(stamp) = &transformation.calib_time {
        info!("transformation calibrated {stamp}");
    }

    let plan = qrtrack::core::WarpPlan::new(&transformation.homography, extent.width, extent.height)
        .ok_or(TrackError::SingularTransformation)?;
    let reprojector = Reprojector::select(config.tracking.strategy, plan, config.tracking.threads);

    let mut sink: Box<dyn PoseSink> = match &config.publisher.target {
        Some(target) => Box::new(ParameterTreePublisher::connect(target, &config.publisher)?),
        None => Box::new(LogSink),
    };

    let mut backend = source::default_backend();
    let mut opened = source::resolve(&descriptor, backend.as_mut())?;

    let cancel = CancelToken::new();
    cancel.install_interrupt_handler()?;
    let mut session = TrackingSession::new(
        FrameProcessor::new(reprojector, config.tracking.heading),
        cancel,
    );
    let summary = session.run(opened.source.as_mut(), &mut QrDecoder::new(), sink.as_mut())?;
    info!(
        "{} frames ({} skipped), {} markers",
        summary.frames, summary.skipped_frames, summary.markers
    );
    Ok(())
}

fn run_decode(
    transformation: &Path,
    scene: &Path,
    image: &Path,
    config: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let config = load_config(config)?;
    let transformation = store::load_transformation(transformation)?;
    let extent = store::load_scene_extent(scene)?;
    let plan = qrtrack::core::WarpPlan::new(&transformation.homography, extent.width, extent.height)
        .ok_or(TrackError::SingularTransformation)?;

    let frame = ImageFileSource::open(image)?.next_frame()?;
    let mut processor = FrameProcessor::new(Reprojector::cpu(plan), config.tracking.heading);
    let poses = decode_frame(&mut processor, &frame, &mut QrDecoder::strict())?;
    for pose in poses {
        println!("{} {:.2} {:.2} {:.2}", pose.id, pose.x, pose.y, pose.angle);
    }
    Ok(())
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Calibrate {
            grid,
            scene,
            source,
            output,
            no_subpix,
            preview,
            config,
        } => run_calibrate(
            &grid,
            &scene,
            &source,
            &output,
            no_subpix,
            preview,
            config.as_deref(),
        ),
        Command::Track {
            transformation,
            scene,
            source,
            accelerate,
            threads,
            publish,
            config,
        } => run_track(
            &transformation,
            &scene,
            &source,
            accelerate,
            threads,
            publish,
            config.as_deref(),
        ),
        Command::Capture { device, image } => {
            let mut backend = source::default_backend();
            let used = source::capture_to_file(&device, &image, backend.as_mut())?;
            info!("device {used} captured to {}", image.display());
            Ok(())
        }
        Command::Decode {
            transformation,
            scene,
            image,
            config,
        } => run_decode(&transformation, &scene, &image, config.as_deref()),
    }
}

fn main() {
    if let Err(e) = try_main() {
        eprintln!("error: {e}");
        exit(1);
    }
}
