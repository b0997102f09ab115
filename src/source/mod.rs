//! Frame sources.
//!
//! A source owns the device pipeline handle exclusively: it is started once,
//! polled for frames by exactly one caller at a time, and released in `stop`.
//!
//! The acquisition layer is responsible for:
//! - Negotiating the fixed-format color stream at start
//! - Blocking up to the caller's timeout for the next frame
//! - Classifying outcomes (valid / empty / timed out / device fault)
//! - Stamping monotonic capture timestamps and sequence numbers
//!
//! The acquisition layer MUST NOT:
//! - Be called concurrently from more than one execution context
//! - Convert pixel data (the configured format is delivered as-is)
//! - Retry fatal device faults internally

#[cfg(feature = "device-realsense")]
pub mod realsense;
pub mod synthetic;

pub use synthetic::SyntheticSource;

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::config::StreamConfig;
use crate::frame::AcquisitionResult;

/// Blocking single-stream frame producer.
///
/// Lifecycle: `start` once, `acquire` repeatedly from one caller, `stop` on
/// every exit path. A second `start` without an intervening `stop` must fail
/// fast rather than silently renegotiate the stream.
pub trait FrameSource {
    /// Negotiate the device stream at the configured resolution/format/rate.
    fn start(&mut self, config: &StreamConfig) -> Result<()>;

    /// Block up to `timeout` for the next color frame.
    ///
    /// `TimedOut` and `Empty` are routine; the caller retries. `DeviceError`
    /// is final; the caller must stop the source and surface the reason.
    fn acquire(&mut self, timeout: Duration) -> AcquisitionResult;

    /// Release device resources.
    ///
    /// Safe to call if `start` failed or never ran (no-op), and safe to call
    /// again after a prior stop. Teardown faults in a degraded state are
    /// swallowed and logged so they cannot mask an original error.
    fn stop(&mut self);
}

/// Device-backed frame source, selected by device URI.
///
/// `stub://<name>` runs the synthetic backend; `realsense://` opens the first
/// attached depth camera (feature `device-realsense`).
#[derive(Debug)]
pub struct CameraSource {
    backend: CameraBackend,
}

#[derive(Debug)]
enum CameraBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "device-realsense")]
    RealSense(realsense::RealSenseSource),
}

impl CameraSource {
    pub fn open(device: &str) -> Result<Self> {
        if let Some(name) = device.strip_prefix("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticSource::new(name)),
            });
        }
        if device.starts_with("realsense://") {
            #[cfg(feature = "device-realsense")]
            {
                return Ok(Self {
                    backend: CameraBackend::RealSense(realsense::RealSenseSource::new()?),
                });
            }
            #[cfg(not(feature = "device-realsense"))]
            {
                return Err(anyhow!(
                    "device '{}' requires the device-realsense feature",
                    device
                ));
            }
        }
        Err(anyhow!("unrecognized device selector '{}'", device))
    }
}

impl FrameSource for CameraSource {
    fn start(&mut self, config: &StreamConfig) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.start(config),
            #[cfg(feature = "device-realsense")]
            CameraBackend::RealSense(source) => source.start(config),
        }
    }

    fn acquire(&mut self, timeout: Duration) -> AcquisitionResult {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.acquire(timeout),
            #[cfg(feature = "device-realsense")]
            CameraBackend::RealSense(source) => source.acquire(timeout),
        }
    }

    fn stop(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.stop(),
            #[cfg(feature = "device-realsense")]
            CameraBackend::RealSense(source) => source.stop(),
        }
    }
}
