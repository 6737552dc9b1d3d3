//! `elevtile` command line: statistics and renders from a GeoTIFF tile pyramid.

use clap::{Args, Parser, Subcommand};
use elevtile_analytics::Palette;
use elevtile_server::metrics_export::InMemoryRecorder;
use elevtile_server::{init_tracing, ElevationService, RenderKind, ServerConfig, ServiceError};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "elevtile")]
#[command(author, version, about = "Elevation tile statistics and terrain rendering", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Tile pyramid root, overriding the configuration
    #[arg(long, global = true)]
    tile_dir: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (e.g. info, debug, elevtile_analytics=trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Write collected metrics as JSON to this file when the command finishes
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Tile address arguments.
#[derive(Args)]
struct TileArgs {
    /// Zoom level (0-15)
    zoom: u8,
    /// Tile column
    x: u32,
    /// Tile row
    y: u32,
}

#[derive(Subcommand)]
enum Command {
    /// Summary statistics of one tile
    Stats {
        #[command(flatten)]
        tile: TileArgs,
    },
    /// Summary statistics inside a WGS84 envelope
    StatsEnvelope {
        /// Zoom level of the tiles to read
        zoom: u8,
        #[arg(allow_negative_numbers = true)]
        x_min: f64,
        #[arg(allow_negative_numbers = true)]
        y_min: f64,
        #[arg(allow_negative_numbers = true)]
        x_max: f64,
        #[arg(allow_negative_numbers = true)]
        y_max: f64,
    },
    /// Equal-width histogram of one tile
    Histogram {
        #[command(flatten)]
        tile: TileArgs,
        /// Number of buckets (defaults to the configured value)
        #[arg(short, long)]
        bins: Option<usize>,
    },
    /// 0/25/50/75/100% quantiles of one tile
    Quantiles {
        #[command(flatten)]
        tile: TileArgs,
    },
    /// Render one tile to a PNG file
    Render {
        #[command(flatten)]
        tile: TileArgs,
        /// What to draw
        #[arg(short, long, value_enum, default_value_t = RenderKind::Elevation)]
        kind: RenderKind,
        /// Palette or ramp name
        #[arg(long)]
        colormap: Option<String>,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List available palettes and ramps
    Colormaps,
}

fn main() -> ExitCode {
    let Cli {
        config: config_path,
        tile_dir,
        log_level,
        metrics_file,
        command,
    } = Cli::parse();

    let mut config = match &config_path {
        Some(path) => match ServerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::from(2);
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(dir) = tile_dir {
        config.tile_dir = dir;
    }
    if let Some(level) = log_level {
        config.log_level = level;
    }
    init_tracing(&config.log_level);

    let recorder = metrics_file.as_ref().map(|_| InMemoryRecorder::new());
    if let Some(recorder) = &recorder {
        if metrics::set_global_recorder(recorder.clone()).is_ok() {
            elevtile_metrics::describe_metrics();
        } else {
            warn!("a metrics recorder is already installed");
        }
    }

    let status = match run(command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            eprintln!("Error: {err}");
            ExitCode::from(exit_status(&err))
        }
    };

    // Written even when the command failed, so error counters are kept
    if let (Some(recorder), Some(path)) = (&recorder, &metrics_file) {
        if let Err(e) = recorder.write_json(path) {
            eprintln!("Error: failed to write metrics to {}: {e}", path.display());
            return ExitCode::from(1);
        }
    }
    status
}

fn exit_status(err: &ServiceError) -> u8 {
    match err {
        ServiceError::Internal(_) => 1,
        ServiceError::InvalidParameter(_) => 2,
        ServiceError::NotFound(_) => 3,
    }
}

fn run(command: Command, config: ServerConfig) -> Result<(), ServiceError> {
    let service = ElevationService::from_config(config)?;

    match command {
        Command::Stats { tile } => print_json(&service.statistics(tile.zoom, tile.x, tile.y)?),
        Command::StatsEnvelope {
            zoom,
            x_min,
            y_min,
            x_max,
            y_max,
        } => print_json(&service.statistics_by_envelope(zoom, x_min, y_min, x_max, y_max)?),
        Command::Histogram { tile, bins } => print_json(&service.histogram(tile.zoom, tile.x, tile.y, bins)?),
        Command::Quantiles { tile } => print_json(&service.quantiles(tile.zoom, tile.x, tile.y)?),
        Command::Render {
            tile,
            kind,
            colormap,
            output,
        } => {
            let bytes = service.render(kind, tile.zoom, tile.x, tile.y, colormap.as_deref())?;
            std::fs::write(&output, &bytes).map_err(|e| ServiceError::Internal(e.into()))?;
            info!("wrote {} ({} bytes)", output.display(), bytes.len());
            Ok(())
        }
        Command::Colormaps => {
            #[derive(Serialize)]
            struct Listing<'a> {
                palettes: Vec<&'static str>,
                ramps: Vec<&'a str>,
            }
            print_json(&Listing {
                palettes: Palette::ALL.iter().map(|p| p.name()).collect(),
                ramps: service.ramps().names().collect(),
            })
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ServiceError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ServiceError::Internal(std::io::Error::other(e).into()))?;
    println!("{text}");
    Ok(())
}
