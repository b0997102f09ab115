//! Image message wire format.
//!
//! One published message per frame, self-describing:
//!
//! ```text
//! { ...JSON header... }\n<raw pixel payload>
//! ```
//!
//! The header carries the encoding tag, geometry, monotonic capture timestamp
//! (microseconds since stream start), the fixed source frame identifier, and
//! the capture sequence number. The payload is the unconverted pixel buffer.
//! Consumers re-order or detect loss via `seq`; delivery is best-effort and
//! not required to be lossless.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// JSON header preceding the pixel payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHeader {
    pub encoding: String,
    pub width: u32,
    pub height: u32,
    /// Monotonic capture timestamp, microseconds since stream start.
    pub timestamp_us: u64,
    /// Fixed source identifier (e.g. `camera_color_optical_frame`).
    pub frame_id: String,
    /// Capture sequence number, starting at 1.
    pub seq: u64,
}

/// A decoded image message: header plus owned pixel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMessage {
    pub header: ImageHeader,
    pub pixels: Vec<u8>,
}

/// Encode one frame into a wire message.
pub fn encode(frame: &Frame, frame_id: &str) -> Result<Vec<u8>> {
    let header = ImageHeader {
        encoding: frame.encoding.encoding().to_string(),
        width: frame.width,
        height: frame.height,
        timestamp_us: frame.capture_timestamp.as_micros() as u64,
        frame_id: frame_id.to_string(),
        seq: frame.seq,
    };
    let mut out = serde_json::to_vec(&header)?;
    out.push(b'\n');
    out.extend_from_slice(&frame.pixels);
    Ok(out)
}

/// Parse a wire message back into header and payload.
///
/// Returns an error if:
/// - No header/payload separator is present
/// - The header is not valid JSON
/// - The payload length does not match the header geometry (for known
///   encodings)
pub fn parse(message: &[u8]) -> Result<ImageMessage> {
    let split = message
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| anyhow!("missing header separator"))?;
    let header: ImageHeader = serde_json::from_slice(&message[..split])
        .map_err(|e| anyhow!("invalid image header: {}", e))?;
    let pixels = message[split + 1..].to_vec();

    if let Some(bpp) = bytes_per_pixel(&header.encoding) {
        let expected = header.width as usize * header.height as usize * bpp;
        if pixels.len() != expected {
            return Err(anyhow!(
                "payload length {} does not match {}x{} {} ({} expected)",
                pixels.len(),
                header.width,
                header.height,
                header.encoding,
                expected
            ));
        }
    }

    Ok(ImageMessage { header, pixels })
}

fn bytes_per_pixel(encoding: &str) -> Option<usize> {
    match encoding {
        "bgr8" | "rgb8" => Some(3),
        "mono8" => Some(1),
        _ => None,
    }
}
