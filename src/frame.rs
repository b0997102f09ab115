//! Acquired color frames and acquisition outcomes.
//!
//! A `Frame` is owned by the dispatch loop for exactly one cycle and handed
//! to the sink by reference. Sinks must not retain it past their `consume`
//! call; the buffer's storage is recycled on the next acquisition.
//!
//! Routine conditions (`Empty`, `TimedOut`) are ordinary return values, not
//! errors, so callers can distinguish "retry" from "tear down" without
//! inspecting error types.

use crate::config::PixelFormat;
use std::time::Duration;

/// One acquired color image, decoded bytes in the configured pixel format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Raw pixel payload, `width * height * bytes_per_pixel` bytes, no
    /// padding rows. Delivered as-is from the device; never converted.
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub encoding: PixelFormat,
    /// Monotonic capture timestamp, measured from source start.
    pub capture_timestamp: Duration,
    /// Per-stream capture sequence number, starting at 1.
    pub seq: u64,
}

impl Frame {
    /// Check that the payload length matches the stated geometry.
    pub fn is_well_formed(&self) -> bool {
        self.pixels.len()
            == self.width as usize * self.height as usize * self.encoding.bytes_per_pixel()
    }
}

/// Outcome of a single `FrameSource::acquire` call.
///
/// `Empty` and `TimedOut` are expected steady-state conditions (device
/// warm-up, transient drops) and must never terminate the loop. `DeviceError`
/// is non-recoverable at the acquisition layer; the loop stops and surfaces
/// the reason after teardown.
#[derive(Debug)]
pub enum AcquisitionResult {
    /// A usable color frame in the configured format.
    Valid(Frame),
    /// The device delivered a frame set with no usable color frame.
    Empty,
    /// No frame arrived within the caller's timeout.
    TimedOut,
    /// Non-recoverable device-layer failure (disconnect, driver fault).
    DeviceError(String),
}

impl AcquisitionResult {
    pub fn is_routine(&self) -> bool {
        matches!(self, AcquisitionResult::Empty | AcquisitionResult::TimedOut)
    }
}
