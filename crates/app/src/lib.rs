//! `slomo` CLI: loads the three ONNX sub-networks and runs the
//! interpolation pipeline over a pair of anchor frames supplied as raw
//! float32 tensors. Dataset handling (decoding, resizing, batching) is a
//! separate concern and lives outside this binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use ndarray::Array4;
use tracing::info;
use tracing_subscriber::prelude::*;

use slomo_core::backend::{resolve_trt_cache_dir, InferenceBackend};
use slomo_core::config::{config_path, data_dir, AppConfig};
use slomo_core::flow::{
    FlowEstimator, FlowInterpolator, FLOW_NET_IN_CHANNELS, FLOW_NET_OUT_CHANNELS,
    REFINE_NET_IN_CHANNELS, REFINE_NET_OUT_CHANNELS,
};
use slomo_core::logging::{
    self, FileSinkPlan, LoggingInitOptions, DEFAULT_LOG_FILTER,
};
use slomo_core::network::OnnxNetwork;
use slomo_core::pipeline::InterpolationPipeline;
use slomo_core::synthesis::{FrameSynthesizer, SYNTH_NET_IN_CHANNELS, SYNTH_NET_OUT_CHANNELS};
use slomo_core::time_grid::TimeGrid;
use slomo_core::types::Frame;

#[derive(Parser)]
#[command(name = "slomo", about = "Slow-motion video frame interpolation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize intermediate frames between two anchors.
    Interpolate(InterpolateArgs),
}

#[derive(Args)]
struct InterpolateArgs {
    #[arg(long, help = "Config TOML path (default: <data-dir>/config.toml)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Anchor frame A: raw little-endian f32, NCHW [1,3,H,W]")]
    frame_a: PathBuf,
    #[arg(long, help = "Anchor frame B: raw little-endian f32, NCHW [1,3,H,W]")]
    frame_b: PathBuf,
    #[arg(long)]
    width: usize,
    #[arg(long)]
    height: usize,
    #[arg(
        short = 'i',
        long = "index",
        required = true,
        help = "Intermediate frame index in 1..=n_frames (repeatable, order preserved)"
    )]
    indices: Vec<usize>,
    #[arg(short = 'o', long, default_value = "out")]
    out_dir: PathBuf,
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let resolved_data_dir = data_dir(cli.data_dir.as_deref());

    init_logging(
        Some(resolved_data_dir.as_path()),
        cli.verbose,
        cli.log_filter.as_deref(),
    );
    log_startup_metadata(&resolved_data_dir);

    match cli.command {
        Commands::Interpolate(args) => run_interpolate(&resolved_data_dir, args),
    }
}

fn init_logging(data_dir: Option<&Path>, verbose: u8, cli_log_filter: Option<&str>) {
    let init_options = LoggingInitOptions {
        data_dir: data_dir.map(Path::to_path_buf),
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
        ..Default::default()
    };
    let init_plan = logging::compose_logging_init_plan(&init_options);
    let env_filter = parse_env_filter_with_fallback(&init_plan.filter);

    match init_plan.file_sink {
        FileSinkPlan::Ready(ready) => {
            let subscriber = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_filter(env_filter),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(ready.appender)
                        .with_filter(parse_env_filter_with_fallback(&init_plan.filter)),
                );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
            }
        }
        FileSinkPlan::Fallback(fallback) => {
            let subscriber = tracing_subscriber::registry().with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(env_filter),
            );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
                return;
            }

            eprintln!(
                "Warning: persistent file logging unavailable ({}). Continuing with console-only logging.",
                fallback.reason
            );
        }
    }
}

fn parse_env_filter_with_fallback(filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!(
            "Invalid log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'."
        );
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn log_startup_metadata(data_dir: &Path) {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        data_dir = %data_dir.display(),
        config_path = %config_path(data_dir).display(),
        "Startup metadata"
    );
}

fn run_interpolate(data_dir: &Path, args: InterpolateArgs) -> Result<()> {
    let config_file = args
        .config
        .clone()
        .unwrap_or_else(|| config_path(data_dir));
    let config = AppConfig::load_from_path(&config_file)?;
    let backend = InferenceBackend::from_str_lossy(&config.inference.backend);

    info!(
        config = %config_file.display(),
        backend = %backend,
        n_frames = config.model.n_frames,
        indices = ?args.indices,
        "Loading sub-networks"
    );

    let load_started = Instant::now();
    let flow_net = OnnxNetwork::load(
        "flow_comp",
        &config.model.flow_model,
        &backend,
        Some(&resolve_trt_cache_dir(&config.paths.trt_cache_dir, Some("flow_comp"))),
        FLOW_NET_IN_CHANNELS,
        FLOW_NET_OUT_CHANNELS,
    )?;
    let refine_net = OnnxNetwork::load(
        "flow_refine",
        &config.model.refine_model,
        &backend,
        Some(&resolve_trt_cache_dir(&config.paths.trt_cache_dir, Some("flow_refine"))),
        REFINE_NET_IN_CHANNELS,
        REFINE_NET_OUT_CHANNELS,
    )?;
    let synth_net = OnnxNetwork::load(
        "synthesis",
        &config.model.synth_model,
        &backend,
        Some(&resolve_trt_cache_dir(&config.paths.trt_cache_dir, Some("synthesis"))),
        SYNTH_NET_IN_CHANNELS,
        SYNTH_NET_OUT_CHANNELS,
    )?;
    info!(
        load_ms = format!("{:.0}", load_started.elapsed().as_secs_f64() * 1000.0),
        "Sub-networks ready"
    );

    let pipeline = InterpolationPipeline::new(
        FlowEstimator::new(Arc::new(flow_net))?,
        FlowInterpolator::new(Arc::new(refine_net))?,
        FrameSynthesizer::new(Arc::new(synth_net))?,
        TimeGrid::new(config.model.n_frames)?,
    );

    let anchor_a = read_raw_frame(&args.frame_a, args.height, args.width)?;
    let anchor_b = read_raw_frame(&args.frame_b, args.height, args.width)?;

    let run_started = Instant::now();
    let (predictions, _auxiliary) = pipeline.interpolate(&anchor_a, &anchor_b, &args.indices)?;
    info!(
        predicted = predictions.len(),
        run_ms = format!("{:.0}", run_started.elapsed().as_secs_f64() * 1000.0),
        "Interpolation complete"
    );

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create output directory: {}", args.out_dir.display()))?;
    for (index, frame) in args.indices.iter().zip(predictions.frames()) {
        let path = args.out_dir.join(format!("frame_{index:03}.f32"));
        write_raw_frame(&path, frame)?;
        info!(path = %path.display(), "Wrote predicted frame");
    }

    Ok(())
}

/// Raw little-endian f32 NCHW planes, batch size 1.
fn read_raw_frame(path: &Path, height: usize, width: usize) -> Result<Frame> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read frame file: {}", path.display()))?;

    let expected = 3 * height * width * 4;
    if bytes.len() != expected {
        bail!(
            "frame file {} has {} bytes, expected {expected} (3x{height}x{width} f32)",
            path.display(),
            bytes.len()
        );
    }

    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    let data = Array4::from_shape_vec((1, 3, height, width), values)
        .context("failed to reshape frame data to [1,3,H,W]")?;
    Frame::new(data)
}

fn write_raw_frame(path: &Path, frame: &Frame) -> Result<()> {
    let contiguous = frame.data().as_standard_layout();
    let values = contiguous
        .as_slice()
        .expect("standard layout must be contiguous");

    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    fs::write(path, bytes)
        .with_context(|| format!("failed to write frame file: {}", path.display()))
}
