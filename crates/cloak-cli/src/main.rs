//! Thin command-line facade over the cloaking core: reads an image file,
//! runs it through the orchestrator, and writes the cloaked image (and,
//! optionally, the diagnostic analysis image) back to disk. Carries none of
//! the HTTP/auth/subscription machinery of the original backend — that
//! surface is out of scope; this binary only demonstrates the core.

use anyhow::{Context, Result};
use clap::Parser;
use cloak_common::{CloakConfig, OutputFormat, Strength};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(
    name = "cloak-cli",
    version,
    about = "Cloak faces in an image against face-recognition embedding models"
)]
struct Cli {
    /// Input image path (JPEG or PNG).
    input: PathBuf,

    /// Cloaking strength.
    #[arg(long, default_value = "standard")]
    strength: String,

    /// Output container format.
    #[arg(long, default_value = "jpeg")]
    format: String,

    /// Output quality, 50-100 (JPEG only; ignored for PNG).
    #[arg(long, default_value_t = 95)]
    quality: u8,

    /// Directory holding (or to cache) the detector/FR/font model files.
    #[arg(long, default_value = "models")]
    model_dir: PathBuf,

    /// Output image path.
    #[arg(short, long)]
    output: PathBuf,

    /// Optional path to also write the diagnostic analysis overlay.
    #[arg(long)]
    analysis: Option<PathBuf>,

    /// Seed the perturbation RNG for reproducible output.
    #[arg(long)]
    seed: Option<u64>,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let strength = Strength::from_str(&cli.strength)
        .map_err(|e| anyhow::anyhow!("invalid --strength: {e}"))?;
    let output_format = match cli.format.as_str() {
        "jpeg" | "jpg" => OutputFormat::Jpeg,
        "png" => OutputFormat::Png,
        other => anyhow::bail!("unknown --format: {other} (expected jpeg or png)"),
    };
    if !(50..=100).contains(&cli.quality) {
        anyhow::bail!("--quality must be between 50 and 100, got {}", cli.quality);
    }

    let config = CloakConfig {
        strength,
        output_format,
        output_quality: cli.quality,
        model_dir: cli.model_dir.clone(),
        seed: cli.seed,
    };

    let image_bytes =
        std::fs::read(&cli.input).with_context(|| format!("reading {}", cli.input.display()))?;

    let registry = cloak_orchestrator::ModelRegistry::new(cli.model_dir);
    let (output_bytes, metadata, analysis_bytes) =
        cloak_orchestrator::cloak(&image_bytes, &config, &registry)
            .context("cloaking failed")?;

    std::fs::write(&cli.output, &output_bytes)
        .with_context(|| format!("writing {}", cli.output.display()))?;

    if let Some(analysis_path) = &cli.analysis {
        match analysis_bytes {
            Some(bytes) => std::fs::write(analysis_path, bytes)
                .with_context(|| format!("writing {}", analysis_path.display()))?,
            None => tracing::warn!("analysis image was requested but unavailable for this run"),
        }
    }

    tracing::info!(
        faces_detected = metadata.faces_detected,
        faces_cloaked = metadata.faces_cloaked,
        model_guided = metadata.model_guided,
        avg_embedding_distance = metadata.avg_embedding_distance,
        processing_time_seconds = metadata.processing_time_seconds,
        "cloaking complete"
    );

    Ok(())
}
