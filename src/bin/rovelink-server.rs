use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use rovelink::{CenterBiasDetector, Config, Rovelink, SyntheticCamera};

#[derive(Parser, Debug)]
#[command(name = "rovelink-server")]
#[command(author, version, about = "Vision server: turns edge camera frames into driving commands")]
struct Args {
    /// YAML configuration file; defaults apply when omitted
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Tracing filter used when RUST_LOG is not set
    #[arg(long, default_value = "rovelink=info")]
    log: String,

    /// Override the frame listen address (host:port)
    #[arg(long)]
    frame_bind: Option<String>,

    /// Override the command listen address (host:port)
    #[arg(long)]
    command_bind: Option<String>,

    /// Row width the brightness detector assumes for incoming frames
    #[arg(long, default_value_t = SyntheticCamera::DEFAULT_WIDTH)]
    image_width: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    rovelink::logging::init(&args.log);

    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(frame_bind) = args.frame_bind {
        config.server.frame_bind = frame_bind;
    }
    if let Some(command_bind) = args.command_bind {
        config.server.command_bind = command_bind;
    }
    config.validate().context("validating configuration")?;

    let server = Rovelink::server(&config, CenterBiasDetector::new(args.image_width))
        .await
        .context("starting vision server")?;

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutting down");

    let stats = server.shutdown().await;
    info!(
        "Vision server stopped: {} frames processed, {} commands issued",
        stats.processed, stats.emitted
    );
    Ok(())
}
