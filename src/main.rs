use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facecheck::capture::{CaptureController, Side};
use facecheck::grid::{AnsiGridRenderer, GridContainer, GridHandle, ImageGridRenderer};
use facecheck::session::{print_status, Session, StatusMessage};
use facecheck::verdict::{cell_color, cell_tooltip};
use facecheck::{analysis, config, OnnxFaceEngine};
use facecheck_vision::V4lCameras;
use log::info;

#[derive(Parser)]
#[command(name = "facecheck")]
#[command(version, about = "Compare the faces in two images, videos or camera captures")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare an original and a test input once
    Compare {
        /// Original image or video
        #[arg(short, long, required_unless_present = "capture_original")]
        original: Option<PathBuf>,
        /// Test image or video
        #[arg(short, long, required_unless_present = "capture_test")]
        test: Option<PathBuf>,
        /// Take the original from the camera instead of a file
        #[arg(long, conflicts_with = "original")]
        capture_original: bool,
        /// Take the test from the camera instead of a file
        #[arg(long, conflicts_with = "test")]
        capture_test: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Also write the verdict grid as a PNG
        #[arg(long, value_name = "PNG")]
        grid: Option<PathBuf>,
    },
    /// Interactive session: pick files, drive the cameras, analyze
    Session,
    /// Capture one camera frame to a JPEG file
    Snapshot {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Compare {
            original,
            test,
            capture_original,
            capture_test,
            json,
            grid,
        } => {
            let inputs = [
                (Side::Original, original, capture_original),
                (Side::Test, test, capture_test),
            ];
            compare(&cfg, inputs, json, grid.as_deref())
        }
        Commands::Session => session(&cfg),
        Commands::Snapshot { output } => snapshot(&cfg, &output),
        Commands::Config => open_config(cli.config.as_deref()),
    }
}

fn engine(cfg: &config::Config) -> OnnxFaceEngine {
    OnnxFaceEngine::new(cfg.model_paths(), cfg.engine_options())
}

fn controller(cfg: &config::Config) -> CaptureController<V4lCameras> {
    CaptureController::new(V4lCameras, cfg.stream_request(), cfg.capture_quality)
}

fn compare(
    cfg: &config::Config,
    inputs: [(Side, Option<PathBuf>, bool); 2],
    json: bool,
    grid_png: Option<&Path>,
) -> Result<()> {
    let mut capture = controller(cfg);
    for (side, path, from_camera) in inputs {
        if from_camera {
            info!("Capturing {} from camera {}", side, cfg.camera);
            capture.start(side)?;
            capture.capture(side)?;
            capture.stop(side);
        } else if let Some(path) = path {
            capture.select_file(side, &path)?;
        }
    }

    let mut engine = engine(cfg);
    let result = analysis::analyze(
        &mut engine,
        capture.resolve_input(Side::Original),
        capture.resolve_input(Side::Test),
        cfg.video_frame_stride,
    );
    let report = match result {
        Ok(report) => report,
        Err(err) => {
            print_status(&mut io::stdout(), &StatusMessage::from(&err))?;
            return Err(err.into());
        }
    };

    let cells = report.verdict.cells();
    if let Some(path) = grid_png {
        let mut container = GridContainer::new(ImageGridRenderer::default());
        container.render(&cells, &cell_color, &cell_tooltip)?.save(path)?;
        info!("Grid written to {}", path.display());
    }

    let mut out = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &report)?;
        writeln!(out)?;
    } else {
        print_status(
            &mut out,
            &StatusMessage {
                class: report.verdict.status(),
                text: report.message.clone(),
            },
        )?;
        let mut container = GridContainer::new(AnsiGridRenderer);
        container
            .render(&cells, &cell_color, &cell_tooltip)?
            .present(&mut out)?;
    }
    Ok(())
}

fn session(cfg: &config::Config) -> Result<()> {
    let mut session = Session::new(
        controller(cfg),
        engine(cfg),
        AnsiGridRenderer,
        cfg.video_frame_stride,
    );
    println!("{}", facecheck::session::HELP);
    session.run(io::stdin().lock(), io::stdout())
}

fn snapshot(cfg: &config::Config, output: &Path) -> Result<()> {
    let mut capture = controller(cfg);
    capture.start(Side::Original)?;
    let bytes = capture.capture(Side::Original)?.bytes.clone();
    capture.stop(Side::Original);

    std::fs::write(output, &bytes).with_context(|| format!("writing {}", output.display()))?;
    info!("✓ Saved {} bytes to {}", bytes.len(), output.display());
    Ok(())
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);
    if !config_path.exists() {
        config::save_config(&config::Config::default(), Some(config_path))
            .context("Failed to write default config")?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
