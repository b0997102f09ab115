//! relay-publish - fixed-rate color stream publisher
//!
//! Timer-discipline dispatch loop: one acquisition per `1/target_fps` firing,
//! each valid frame published as a timestamped image message on an MQTT
//! topic. Stops on Ctrl-C with guaranteed pipeline teardown.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use color_relay::{
    CameraSource, Discipline, DispatchLoop, PublishSink, RelayConfig, StopHandle,
};

#[derive(Parser, Debug)]
#[command(name = "relay-publish", about = "Publish the camera color stream")]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "COLOR_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Device selector override (e.g. stub://color, realsense://).
    #[arg(long)]
    device: Option<String>,

    /// Publish topic override.
    #[arg(long, env = "COLOR_RELAY_TOPIC")]
    topic: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = RelayConfig::load(args.config.as_deref())?;
    if let Some(device) = args.device {
        cfg.device = device;
    }
    if let Some(topic) = args.topic {
        cfg.publish.topic = topic;
    }

    let source = CameraSource::open(&cfg.device)?;
    let sink = PublishSink::connect(&cfg.publish)?;

    let stop = StopHandle::new();
    stop.hook_interrupt()?;

    log::info!(
        "publishing {} ({}x{} {} @ {} fps) as '{}'",
        cfg.device,
        cfg.stream.width,
        cfg.stream.height,
        cfg.stream.pixel_format,
        cfg.stream.target_fps,
        cfg.publish.frame_id
    );

    let mut dispatch = DispatchLoop::new(
        source,
        sink,
        cfg.stream,
        Discipline::Timer {
            period: cfg.stream.frame_period(),
            acquire_timeout: cfg.publish.acquire_timeout,
        },
        stop,
    );
    let result = dispatch.run();

    let (_, sink) = dispatch.into_parts();
    log::info!("published {} frame(s)", sink.published());
    sink.disconnect()?;

    result.map(|_| ())
}
