use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use client_core::{load_settings, HttpGateway, Orchestrator, WorkflowEvent};
use shared::domain::{Config, Mode, UploadedArtifact};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Photos,
    Video,
}

impl From<CliMode> for Mode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Photos => Mode::Photos,
            CliMode::Video => Mode::Video,
        }
    }
}

#[derive(Parser, Debug)]
struct Args {
    /// Overrides the backend url from recon.toml and the environment.
    #[arg(long)]
    backend_url: Option<String>,
    #[arg(long, value_enum)]
    mode: CliMode,
    /// Video (mp4, avi, mov) or photo archive (zip) to reconstruct from.
    #[arg(long)]
    file: PathBuf,
    #[arg(long, default_value_t = 60)]
    frames: u32,
    #[arg(long, default_value_t = 0)]
    reduction: u32,
    #[arg(long)]
    segment: bool,
    /// Photos to keep; every ingested photo is kept when omitted.
    #[arg(long = "keep")]
    keep: Vec<String>,
    #[arg(long, default_value = "photogrammetry_result.zip")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings()?;
    if let Some(url) = args.backend_url.clone() {
        settings.backend_url = url;
    }
    info!(backend = %settings.backend_url, "using backend");

    let gateway = HttpGateway::new(&settings.backend_url)?;
    let orchestrator = Orchestrator::new(Arc::new(gateway), settings.timings);

    let mut events = orchestrator.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(WorkflowEvent::Updated(snapshot)) => {
                    if !snapshot.message.is_empty() {
                        info!(
                            step = %snapshot.step,
                            progress = snapshot.progress,
                            "{}",
                            snapshot.message
                        );
                    }
                }
                Ok(WorkflowEvent::OperationFailed { operation, error }) => {
                    warn!(%operation, %error, "operation failed");
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("failed to read '{}'", args.file.display()))?;
    let name = args
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .context("input file has no usable name")?
        .to_string();

    orchestrator.choose_mode(args.mode.into()).await?;
    orchestrator
        .update_config(Config {
            frame_count: args.frames,
            reduction_percentage: args.reduction,
            segment_objects: args.segment,
        })
        .await?;
    orchestrator
        .select_file(UploadedArtifact::new(name, bytes))
        .await?;

    let images = orchestrator.submit().await?;
    println!("Ingested {images} images");

    orchestrator.open_selector().await?;
    if !args.keep.is_empty() {
        orchestrator.deselect_all().await?;
        for filename in &args.keep {
            orchestrator.toggle_photo(filename).await?;
        }
    }
    if !orchestrator.snapshot().await.can_confirm() {
        bail!("no photos selected; check the --keep filenames");
    }
    let remaining = orchestrator.confirm_selection().await?;
    if remaining == 0 {
        bail!("none of the selected photos were kept by the backend");
    }
    println!("Kept {remaining} photos");

    let result = orchestrator.run_reconstruction().await?;
    if let Some(stats) = &result.mesh_statistics {
        println!("Mesh statistics: {}", serde_json::to_string_pretty(stats)?);
    }
    if let Some(textures) = &result.texture_info {
        println!("Textures: {}", serde_json::to_string_pretty(textures)?);
    }

    let archive = orchestrator.download_artifact().await?;
    tokio::fs::write(&args.output, &archive)
        .await
        .with_context(|| format!("failed to write '{}'", args.output.display()))?;
    println!(
        "Saved {} bytes to {}",
        archive.len(),
        args.output.display()
    );

    orchestrator.reset().await;
    Ok(())
}
