//! Synthetic frame source (`stub://`).
//!
//! Generates a moving BGR test pattern paced at the configured target rate.
//! Used by tests and by deployments without camera hardware. Models the real
//! device's observable behavior: a short warm-up window where frame sets
//! carry no usable color frame, then steadily paced valid frames, and a
//! `TimedOut` result when the caller's timeout elapses before the next frame
//! is due.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::FrameSource;
use crate::config::StreamConfig;
use crate::frame::{AcquisitionResult, Frame};

/// Number of leading acquisitions that return `Empty`, simulating device
/// warm-up before the color stream stabilizes.
const WARMUP_EMPTY_FRAMES: u64 = 2;

#[derive(Debug)]
pub struct SyntheticSource {
    name: String,
    stream: Option<RunningStream>,
}

#[derive(Debug)]
struct RunningStream {
    config: StreamConfig,
    started_at: Instant,
    acquisitions: u64,
    seq: u64,
}

impl SyntheticSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stream: None,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn start(&mut self, config: &StreamConfig) -> Result<()> {
        if self.stream.is_some() {
            return Err(anyhow!(
                "synthetic source '{}' already started; stop it first",
                self.name
            ));
        }
        config.validate()?;
        log::info!(
            "starting pipeline: stub://{} {}x{} {} @ {} fps",
            self.name,
            config.width,
            config.height,
            config.pixel_format,
            config.target_fps
        );
        self.stream = Some(RunningStream {
            config: *config,
            started_at: Instant::now(),
            acquisitions: 0,
            seq: 0,
        });
        Ok(())
    }

    fn acquire(&mut self, timeout: Duration) -> AcquisitionResult {
        let Some(stream) = self.stream.as_mut() else {
            return AcquisitionResult::DeviceError("source not started".to_string());
        };
        stream.acquisitions += 1;

        if stream.acquisitions <= WARMUP_EMPTY_FRAMES {
            return AcquisitionResult::Empty;
        }

        // Pace delivery to the target rate: the next frame is due one period
        // after the previous one (measured from stream start).
        let period = stream.config.frame_period();
        let due = period * (stream.seq as u32 + 1);
        let elapsed = stream.started_at.elapsed();
        if due > elapsed {
            let wait = due - elapsed;
            if wait > timeout {
                std::thread::sleep(timeout);
                return AcquisitionResult::TimedOut;
            }
            std::thread::sleep(wait);
        }

        stream.seq += 1;
        let frame = Frame {
            pixels: test_pattern(&stream.config, stream.seq),
            width: stream.config.width,
            height: stream.config.height,
            encoding: stream.config.pixel_format,
            capture_timestamp: stream.started_at.elapsed(),
            seq: stream.seq,
        };
        AcquisitionResult::Valid(frame)
    }

    fn stop(&mut self) {
        if self.stream.take().is_some() {
            log::info!("stopping pipeline: stub://{}", self.name);
        }
    }
}

/// Moving gradient so consecutive frames are visibly (and bytewise) distinct.
fn test_pattern(config: &StreamConfig, seq: u64) -> Vec<u8> {
    let bpp = config.pixel_format.bytes_per_pixel();
    let mut pixels = vec![0u8; config.frame_len()];
    let width = config.width as usize;
    for (i, px) in pixels.chunks_exact_mut(bpp).enumerate() {
        let x = (i % width) as u64;
        let y = (i / width) as u64;
        px[0] = ((x + seq) % 256) as u8; // B
        px[1] = ((y + seq / 2) % 256) as u8; // G
        px[2] = (seq % 256) as u8; // R
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PixelFormat;

    fn small_stream() -> StreamConfig {
        StreamConfig {
            width: 8,
            height: 4,
            pixel_format: PixelFormat::Bgr8,
            target_fps: 200,
        }
    }

    #[test]
    fn acquire_before_start_is_a_device_error() {
        let mut source = SyntheticSource::new("t");
        match source.acquire(Duration::from_millis(10)) {
            AcquisitionResult::DeviceError(reason) => {
                assert!(reason.contains("not started"))
            }
            other => panic!("expected DeviceError, got {:?}", other),
        }
    }

    #[test]
    fn double_start_fails_fast() {
        let mut source = SyntheticSource::new("t");
        source.start(&small_stream()).expect("first start");
        assert!(source.start(&small_stream()).is_err());
    }

    #[test]
    fn stop_is_idempotent_and_safe_without_start() {
        let mut source = SyntheticSource::new("t");
        source.stop();
        source.start(&small_stream()).expect("start");
        source.stop();
        source.stop();
        // Restart after stop is a fresh stream.
        source.start(&small_stream()).expect("restart");
    }

    #[test]
    fn warms_up_empty_then_delivers_valid_frames() {
        let mut source = SyntheticSource::new("t");
        source.start(&small_stream()).expect("start");

        for _ in 0..WARMUP_EMPTY_FRAMES {
            assert!(matches!(
                source.acquire(Duration::from_secs(1)),
                AcquisitionResult::Empty
            ));
        }
        match source.acquire(Duration::from_secs(1)) {
            AcquisitionResult::Valid(frame) => {
                assert!(frame.is_well_formed());
                assert_eq!(frame.seq, 1);
                assert_eq!(frame.width, 8);
                assert_eq!(frame.encoding, PixelFormat::Bgr8);
            }
            other => panic!("expected Valid, got {:?}", other),
        }
        match source.acquire(Duration::from_secs(1)) {
            AcquisitionResult::Valid(frame) => assert_eq!(frame.seq, 2),
            other => panic!("expected Valid, got {:?}", other),
        }
    }

    #[test]
    fn consecutive_frames_differ() {
        let cfg = small_stream();
        assert_ne!(test_pattern(&cfg, 1), test_pattern(&cfg, 2));
    }

    #[test]
    fn times_out_when_next_frame_not_due() {
        let mut source = SyntheticSource::new("t");
        // 1 fps: next frame is due a full second after start.
        let cfg = StreamConfig {
            target_fps: 1,
            ..small_stream()
        };
        source.start(&cfg).expect("start");
        for _ in 0..WARMUP_EMPTY_FRAMES {
            source.acquire(Duration::from_millis(1));
        }
        assert!(matches!(
            source.acquire(Duration::from_millis(5)),
            AcquisitionResult::TimedOut
        ));
    }

    #[test]
    fn timestamps_are_monotonic() {
        let mut source = SyntheticSource::new("t");
        source.start(&small_stream()).expect("start");
        for _ in 0..WARMUP_EMPTY_FRAMES {
            source.acquire(Duration::from_secs(1));
        }
        let mut last = Duration::ZERO;
        for _ in 0..3 {
            if let AcquisitionResult::Valid(frame) = source.acquire(Duration::from_secs(1)) {
                assert!(frame.capture_timestamp >= last);
                last = frame.capture_timestamp;
            } else {
                panic!("expected Valid frame");
            }
        }
    }
}
