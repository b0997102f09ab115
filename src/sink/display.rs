//! On-screen display sink (feature `sink-display`).
//!
//! Shows each frame in a named window and reports the quit key (`q` or Esc)
//! or a closed window through `poll_stop_signal`. The window is created
//! lazily on the first frame, once the geometry is known.
//!
//! The framebuffer wants packed `0RGB` `u32` pixels, so each BGR8 frame is
//! repacked per cycle. That copy is the display boundary's price, not the
//! acquisition loop's; no conversion leaks into `Frame` itself.

use anyhow::{anyhow, Result};
use minifb::{Key, Window, WindowOptions};

use super::Sink;
use crate::config::PixelFormat;
use crate::frame::Frame;

pub struct DisplaySink {
    title: String,
    window: Option<Window>,
    scratch: Vec<u32>,
}

impl DisplaySink {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            window: None,
            scratch: Vec::new(),
        }
    }
}

impl Sink for DisplaySink {
    fn consume(&mut self, frame: &Frame) -> Result<()> {
        if !frame.is_well_formed() {
            return Err(anyhow!(
                "malformed frame: {} bytes for {}x{} {}",
                frame.pixels.len(),
                frame.width,
                frame.height,
                frame.encoding
            ));
        }
        repack_to_0rgb(frame, &mut self.scratch)?;

        let width = frame.width as usize;
        let height = frame.height as usize;
        if self.window.is_none() {
            let window = Window::new(&self.title, width, height, WindowOptions::default())
                .map_err(|e| anyhow!("failed to create window '{}': {}", self.title, e))?;
            self.window = Some(window);
        }
        if let Some(window) = self.window.as_mut() {
            window
                .update_with_buffer(&self.scratch, width, height)
                .map_err(|e| anyhow!("window update failed: {}", e))?;
        }
        Ok(())
    }

    fn poll_stop_signal(&mut self) -> bool {
        match &self.window {
            Some(window) => {
                !window.is_open() || window.is_key_down(Key::Q) || window.is_key_down(Key::Escape)
            }
            // No frame shown yet, nothing to poll.
            None => false,
        }
    }
}

/// Repack a BGR8 frame into the `0x00RRGGBB` layout minifb expects.
fn repack_to_0rgb(frame: &Frame, out: &mut Vec<u32>) -> Result<()> {
    match frame.encoding {
        PixelFormat::Bgr8 => {
            out.clear();
            out.reserve(frame.pixels.len() / 3);
            for px in frame.pixels.chunks_exact(3) {
                let (b, g, r) = (px[0] as u32, px[1] as u32, px[2] as u32);
                out.push((r << 16) | (g << 8) | b);
            }
            Ok(())
        }
    }
}
