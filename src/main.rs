use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rust_photo_viewer::config::{Configuration, ImageEntry};
use rust_photo_viewer::tasks::viewer;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "photo-viewer",
    version,
    about = "GPU-accelerated pan and zoom image viewer"
)]
struct Args {
    /// Path to YAML config
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Index of the first image to show
    #[arg(long = "start-index", value_name = "N")]
    start_index: Option<usize>,
    /// Image URLs or paths, appended to the configured ones
    #[arg(value_name = "IMAGE")]
    images: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls level, default = info with quiet GPU crates
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wgpu=warn,naga=warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let Args {
        config,
        start_index,
        images,
    } = Args::parse();

    let mut cfg = match config.as_ref() {
        Some(path) => Configuration::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Configuration::default(),
    };
    cfg.images.extend(images.into_iter().map(ImageEntry::new));
    if let Some(index) = start_index {
        cfg.start_index = index;
    }
    let cfg = cfg.validated().context("invalid configuration values")?;
    tracing::info!(images = cfg.images.len(), "configuration loaded");
    tracing::debug!("{cfg:#?}");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let result = viewer::run_windowed(cfg, cancel.clone()).context("viewer failed");
    cancel.cancel();
    if let Err(err) = &result {
        tracing::error!("{err:?}");
    }
    result
}
