//! photomend: restore damaged photographs from the command line.
//!
//! Three modes:
//!
//! - `restore` runs the pipeline locally, optionally writing the
//!   intermediate maps and a per-stage diagnostics report.
//! - `serve` starts a TCP restoration server.
//! - `send` ships an image to a running server and saves the reply.
//!
//! # Usage
//!
//! ```text
//! photomend restore damaged.png restored.png --report
//! photomend serve --addr 0.0.0.0:8080
//! photomend send damaged.jpg --addr 127.0.0.1:8080 --output restored.jpg
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use image::ImageFormat;
use photomend_io::{DEFAULT_FRAME_LIMIT, Server, client, codec};
use photomend_pipeline::diagnostics::PipelineDiagnostics;
use photomend_pipeline::{RestoreConfig, StdClock, map_preview, mask_preview};

/// Restore damaged photographs with a parallel, deterministic pipeline.
#[derive(Parser)]
#[command(name = "photomend", version)]
struct Cli {
    /// Log filter (e.g. `info`, `debug`, `photomend_pipeline=trace`).
    ///
    /// `RUST_LOG` takes precedence when set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Restore an image file locally.
    Restore(RestoreArgs),
    /// Serve restoration requests over TCP.
    Serve(ServeArgs),
    /// Send an image to a restoration server.
    Send(SendArgs),
}

#[derive(Args)]
struct RestoreArgs {
    /// Path to the damaged image (PNG, JPEG, BMP, WebP).
    input: PathBuf,

    /// Where to write the restored image. The extension picks the format.
    output: PathBuf,

    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Write the damage mask (white = damaged) to this file.
    #[arg(long)]
    mask_out: Option<PathBuf>,

    /// Write the normalized edge map to this file.
    #[arg(long)]
    edges_out: Option<PathBuf>,

    /// Write the feathered mask to this file.
    #[arg(long)]
    feathered_out: Option<PathBuf>,

    /// Print a per-stage diagnostics report.
    #[arg(long)]
    report: bool,

    /// Print diagnostics as JSON instead of the text report.
    #[arg(long)]
    json: bool,

    /// Number of runs; timings are summarized when greater than one.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,
}

#[derive(Args)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Largest accepted request in bytes.
    #[arg(long, default_value_t = DEFAULT_FRAME_LIMIT)]
    frame_limit: u64,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Args)]
struct SendArgs {
    /// Path to the damaged image.
    input: PathBuf,

    /// Server address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Where to write the restored image.
    #[arg(long)]
    output: PathBuf,

    /// Largest accepted reply in bytes.
    #[arg(long, default_value_t = DEFAULT_FRAME_LIMIT)]
    frame_limit: u64,
}

/// Pipeline parameters shared by `restore` and `serve`.
#[derive(Args)]
struct PipelineArgs {
    /// Worker threads per stage (defaults to available parallelism).
    #[arg(long)]
    workers: Option<usize>,

    /// A pixel is damaged when R + G + B exceeds this value.
    #[arg(long, default_value_t = RestoreConfig::DEFAULT_DAMAGE_THRESHOLD)]
    damage_threshold: u32,

    /// Normalized gradients below this value are dropped (0.0-1.0).
    #[arg(long, default_value_t = RestoreConfig::DEFAULT_EDGE_THRESHOLD)]
    edge_threshold: f32,

    /// Feathering radius in pixels.
    #[arg(long, default_value_t = RestoreConfig::DEFAULT_FEATHER_RADIUS)]
    feather_radius: u32,

    /// Inpainting neighborhood radius away from the borders.
    #[arg(long, default_value_t = RestoreConfig::DEFAULT_INPAINT_RADIUS)]
    inpaint_radius: u32,

    /// Inpainting neighborhood radius near the borders.
    #[arg(long, default_value_t = RestoreConfig::DEFAULT_INPAINT_BORDER_RADIUS)]
    inpaint_border_radius: u32,

    /// Gaussian blur kernel size (odd).
    #[arg(long, default_value_t = RestoreConfig::DEFAULT_BLUR_KERNEL_SIZE)]
    blur_kernel_size: u32,

    /// Gaussian blur sigma.
    #[arg(long, default_value_t = RestoreConfig::DEFAULT_BLUR_SIGMA)]
    blur_sigma: f64,

    /// Skip histogram equalization.
    #[arg(long)]
    no_equalize: bool,

    /// Skip the blur + sharpen pass.
    #[arg(long)]
    no_sharpen: bool,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// Missing fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("error parsing --config-json: {0}")]
    ConfigJson(#[source] serde_json::Error),

    #[error("error reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error writing {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot infer an image format from {}", .0.display())]
    UnknownFormat(PathBuf),

    #[error("error encoding {}: {source}", path.display())]
    Save {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("error serializing diagnostics: {0}")]
    Diagnostics(#[source] serde_json::Error),

    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error(transparent)]
    Codec(#[from] photomend_io::CodecError),

    #[error(transparent)]
    Transport(#[from] photomend_io::TransportError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] photomend_pipeline::PipelineError),
}

/// Build a [`RestoreConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_args(args: &PipelineArgs) -> Result<RestoreConfig, CliError> {
    if let Some(ref json) = args.config_json {
        return serde_json::from_str(json).map_err(CliError::ConfigJson);
    }

    Ok(RestoreConfig {
        workers: args.workers.unwrap_or_else(RestoreConfig::default_workers),
        damage_threshold: args.damage_threshold,
        edge_threshold: args.edge_threshold,
        feather_radius: args.feather_radius,
        inpaint_radius: args.inpaint_radius,
        inpaint_border_radius: args.inpaint_border_radius,
        blur_kernel_size: args.blur_kernel_size,
        blur_sigma: args.blur_sigma,
        equalize_colors: !args.no_equalize,
        sharpen: !args.no_sharpen,
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // The handle flushes on drop, so it lives until the end of main.
    let _logger = match flexi_logger::Logger::try_with_env_or_str(&cli.log_level)
        .and_then(|logger| logger.log_to_stderr().start())
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Logger initialization failed: {e}");
            None
        }
    };

    let result = match cli.command {
        Command::Restore(args) => restore(&args),
        Command::Serve(args) => serve(args),
        Command::Send(args) => send(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn read(path: &Path) -> Result<Vec<u8>, CliError> {
    std::fs::read(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, bytes: &[u8]) -> Result<(), CliError> {
    std::fs::write(path, bytes).map_err(|source| CliError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn output_format(path: &Path) -> Result<ImageFormat, CliError> {
    codec::format_from_path(path).ok_or_else(|| CliError::UnknownFormat(path.to_path_buf()))
}

fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Runtime::new().map_err(CliError::Runtime)
}

fn restore(args: &RestoreArgs) -> Result<(), CliError> {
    let config = config_from_args(&args.pipeline)?;
    let format = output_format(&args.output)?;
    let bytes = read(&args.input)?;
    let image = codec::decode(&bytes)?;
    log::info!(
        "restoring {} ({}x{}, {} workers)",
        args.input.display(),
        image.width(),
        image.height(),
        config.workers,
    );
    log::debug!("config: {config:?}");

    let mut all_diagnostics = Vec::with_capacity(args.runs);
    let mut staged = None;
    for run in 0..args.runs {
        if args.runs > 1 {
            log::info!("run {}/{}", run + 1, args.runs);
        }
        let (result, diagnostics) =
            photomend_pipeline::restore_with_diagnostics(image.clone(), &config, &StdClock)?;
        staged.get_or_insert(result);
        all_diagnostics.push(diagnostics);
    }
    let Some(staged) = staged else {
        return Ok(());
    };

    write(&args.output, &codec::encode(&staged.restored, format)?)?;
    log::info!("restored image written to {}", args.output.display());

    if let Some(ref path) = args.mask_out {
        save_preview(path, |p| mask_preview(&staged.mask).save(p))?;
    }
    if let Some(ref path) = args.edges_out {
        save_preview(path, |p| map_preview(&staged.edges).save(p))?;
    }
    if let Some(ref path) = args.feathered_out {
        save_preview(path, |p| map_preview(&staged.feathered).save(p))?;
    }

    if args.json {
        let json =
            serde_json::to_string_pretty(&all_diagnostics).map_err(CliError::Diagnostics)?;
        println!("{json}");
    } else if args.report {
        for diagnostics in &all_diagnostics {
            println!("{}", diagnostics.report());
        }
        if all_diagnostics.len() > 1 {
            print_multi_run_summary(&all_diagnostics);
        }
    }
    Ok(())
}

fn save_preview<F>(path: &Path, save: F) -> Result<(), CliError>
where
    F: FnOnce(&Path) -> Result<(), image::ImageError>,
{
    save(path).map_err(|source| CliError::Save {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("preview written to {}", path.display());
    Ok(())
}

fn serve(args: ServeArgs) -> Result<(), CliError> {
    let config = config_from_args(&args.pipeline)?;
    runtime()?.block_on(async move {
        let server = Server::bind(&args.addr, config, args.frame_limit).await?;
        server.run().await?;
        Ok(())
    })
}

fn send(args: &SendArgs) -> Result<(), CliError> {
    let bytes = read(&args.input)?;
    let response =
        runtime()?.block_on(client::send(&args.addr, &bytes, args.frame_limit))?;
    if let Some(metadata) = response.metadata {
        log::info!("server: {metadata}");
    }
    write(&args.output, &response.image)?;
    log::info!("restored image written to {}", args.output.display());
    Ok(())
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let Some(first) = all_diagnostics.first() else {
        return;
    };
    for (index, (name, _)) in first.stages().iter().enumerate() {
        let total: f64 = all_diagnostics
            .iter()
            .map(|d| d.stages()[index].1.duration.as_secs_f64() * 1000.0)
            .sum();
        let stage_mean = total / all_diagnostics.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
