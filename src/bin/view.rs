//! relay-view - on-screen color stream viewer
//!
//! Free-running dispatch loop into a display window. Quit with `q`, Esc,
//! closing the window, or Ctrl-C; the device pipeline is released on every
//! one of those paths.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use color_relay::{
    CameraSource, Discipline, DispatchLoop, DisplaySink, RelayConfig, StopHandle,
};

#[derive(Parser, Debug)]
#[command(name = "relay-view", about = "View the camera color stream")]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "COLOR_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Device selector override (e.g. stub://color, realsense://).
    #[arg(long)]
    device: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = RelayConfig::load(args.config.as_deref())?;
    if let Some(device) = args.device {
        cfg.device = device;
    }

    let source = CameraSource::open(&cfg.device)?;
    let sink = DisplaySink::new(&cfg.view.window_title);

    let stop = StopHandle::new();
    stop.hook_interrupt()?;

    log::info!(
        "viewing {} ({}x{} {} @ {} fps)",
        cfg.device,
        cfg.stream.width,
        cfg.stream.height,
        cfg.stream.pixel_format,
        cfg.stream.target_fps
    );

    let mut dispatch = DispatchLoop::new(
        source,
        sink,
        cfg.stream,
        Discipline::FreeRunning {
            acquire_timeout: cfg.view.acquire_timeout,
        },
        stop,
    );
    dispatch.run()?;
    Ok(())
}
