//! librealsense2-backed frame source (feature `device-realsense`).
//!
//! Owns the device pipeline handle for its whole lifetime: negotiated in
//! `start`, polled in `acquire`, released in `stop`. A single fixed-format
//! color stream only; depth streams and multi-stream sync are out of scope.

use anyhow::{anyhow, Context as _, Result};
use std::time::{Duration, Instant};

use realsense_rust::{
    config::Config,
    context::Context,
    frame::{ColorFrame, PixelKind},
    kind::{Rs2Format, Rs2StreamKind},
    pipeline::{ActivePipeline, InactivePipeline},
};

use super::FrameSource;
use crate::config::{PixelFormat, StreamConfig};
use crate::frame::{AcquisitionResult, Frame};

pub struct RealSenseSource {
    context: Context,
    active: Option<ActiveStream>,
}

struct ActiveStream {
    pipeline: ActivePipeline,
    config: StreamConfig,
    started_at: Instant,
    seq: u64,
}

impl RealSenseSource {
    pub fn new() -> Result<Self> {
        let context = Context::new().context("create librealsense context")?;
        Ok(Self {
            context,
            active: None,
        })
    }
}

fn stream_format(format: PixelFormat) -> Rs2Format {
    match format {
        PixelFormat::Bgr8 => Rs2Format::Bgr8,
    }
}

impl FrameSource for RealSenseSource {
    fn start(&mut self, config: &StreamConfig) -> Result<()> {
        if self.active.is_some() {
            return Err(anyhow!("realsense pipeline already started; stop it first"));
        }
        config.validate()?;

        let pipeline =
            InactivePipeline::try_from(&self.context).context("create device pipeline")?;
        let mut stream_cfg = Config::new();
        stream_cfg
            .enable_stream(
                Rs2StreamKind::Color,
                None,
                config.width as usize,
                config.height as usize,
                stream_format(config.pixel_format),
                config.target_fps as usize,
            )
            .context("enable color stream")?;

        log::info!(
            "starting pipeline: realsense color {}x{} {} @ {} fps",
            config.width,
            config.height,
            config.pixel_format,
            config.target_fps
        );
        let pipeline = pipeline
            .start(Some(stream_cfg))
            .context("negotiate color stream")?;

        self.active = Some(ActiveStream {
            pipeline,
            config: *config,
            started_at: Instant::now(),
            seq: 0,
        });
        Ok(())
    }

    fn acquire(&mut self, timeout: Duration) -> AcquisitionResult {
        let Some(stream) = self.active.as_mut() else {
            return AcquisitionResult::DeviceError("source not started".to_string());
        };

        let frames = match stream.pipeline.wait(Some(timeout)) {
            Ok(frames) => frames,
            // The SDK reports an elapsed wait as an error; it is a routine
            // condition here, distinct from a device fault.
            Err(e) if is_timeout(&e) => return AcquisitionResult::TimedOut,
            Err(e) => return AcquisitionResult::DeviceError(e.to_string()),
        };

        let color_frames = frames.frames_of_type::<ColorFrame>();
        let Some(color) = color_frames.first() else {
            return AcquisitionResult::Empty;
        };

        let mut pixels = Vec::with_capacity(stream.config.frame_len());
        for px in color.iter() {
            match px {
                PixelKind::Bgr8 { b, g, r } => {
                    pixels.push(*b);
                    pixels.push(*g);
                    pixels.push(*r);
                }
                _ => {
                    return AcquisitionResult::DeviceError(
                        "device delivered an unexpected pixel format".to_string(),
                    )
                }
            }
        }

        stream.seq += 1;
        AcquisitionResult::Valid(Frame {
            pixels,
            width: stream.config.width,
            height: stream.config.height,
            encoding: stream.config.pixel_format,
            capture_timestamp: stream.started_at.elapsed(),
            seq: stream.seq,
        })
    }

    fn stop(&mut self) {
        if let Some(stream) = self.active.take() {
            log::info!("stopping pipeline: realsense");
            // Dropping the inactive pipeline releases the device handle.
            // Teardown of an already-gone device must not surface a second
            // fault that could mask the one that got us here.
            let _ = stream.pipeline.stop();
        }
    }
}

fn is_timeout(e: &impl std::fmt::Display) -> bool {
    let msg = e.to_string().to_ascii_lowercase();
    msg.contains("timeout") || msg.contains("didn't arrive")
}
