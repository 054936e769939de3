//! Robot-side entry point
//!
//! No joystick driver is bundled: manual input is wired to `IdleJoystick`, so
//! this binary drives autonomously or holds SafeStop. Embedders with a real
//! device pass their own `JoystickSource` to `Rovelink::edge`.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use rovelink::{Config, IdleJoystick, LoggingSink, Rovelink, SyntheticCamera};

#[derive(Parser, Debug)]
#[command(name = "rovelink-edge")]
#[command(author, version, about = "Robot-side controller: streams frames, arbitrates control, drives motors")]
struct Args {
    /// YAML configuration file; defaults apply when omitted
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Tracing filter used when RUST_LOG is not set
    #[arg(long, default_value = "rovelink=info")]
    log: String,

    /// Override the vision server frame endpoint (host:port)
    #[arg(long)]
    frame_server: Option<String>,

    /// Override the vision server command endpoint (host:port)
    #[arg(long)]
    command_server: Option<String>,

    /// Width of the synthetic camera image in pixels
    #[arg(long, default_value_t = SyntheticCamera::DEFAULT_WIDTH)]
    camera_width: usize,

    /// Height of the synthetic camera image in pixels
    #[arg(long, default_value_t = SyntheticCamera::DEFAULT_HEIGHT)]
    camera_height: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    rovelink::logging::init(&args.log);

    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(frame_server) = args.frame_server {
        config.edge.frame_server = frame_server;
    }
    if let Some(command_server) = args.command_server {
        config.edge.command_server = command_server;
    }
    config.validate().context("validating configuration")?;

    let camera = SyntheticCamera::with_size(config.edge.camera_fps, args.camera_width, args.camera_height);
    let edge = Rovelink::edge(&config, camera, IdleJoystick, LoggingSink::new())
        .context("starting edge controller")?;

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutting down");

    let last = edge.shutdown().await;
    info!("Edge stopped in {} after {} ticks", last.mode, last.ticks);
    Ok(())
}
