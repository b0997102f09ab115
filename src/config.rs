//! Launch-time configuration.
//!
//! The stream geometry (width, height, pixel format, target rate) is fixed at
//! launch and never reconfigured mid-run. Settings come from, in order of
//! precedence:
//!
//! 1. Environment overrides (`COLOR_RELAY_*`)
//! 2. An optional JSON config file (`COLOR_RELAY_CONFIG` or `--config`)
//! 3. Built-in defaults matching the reference deployment (640x480 BGR8 @ 30)

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

const DEFAULT_DEVICE: &str = "stub://color";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
/// Free-running (viewer) acquire timeout. Generous because the display sink
/// itself paces the loop via its event poll.
const DEFAULT_VIEW_TIMEOUT_MS: u64 = 5000;
/// Timer-discipline acquire timeout. Kept under the tick horizon so a stalled
/// device delays at most one nominal firing at a time.
const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 1000;
const DEFAULT_WINDOW_TITLE: &str = "color-relay";
const DEFAULT_MQTT_HOST: &str = "localhost";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_TOPIC: &str = "camera/color/image_raw";
const DEFAULT_FRAME_ID: &str = "camera_color_optical_frame";

/// Pixel layout of the color stream. The device delivers this format as-is;
/// no color-space conversion happens anywhere in the relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit blue/green/red, packed, 3 bytes per pixel.
    Bgr8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Bgr8 => 3,
        }
    }

    /// Encoding tag used on the wire and in log lines.
    pub fn encoding(&self) -> &'static str {
        match self {
            PixelFormat::Bgr8 => "bgr8",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encoding())
    }
}

/// Immutable stream negotiation parameters, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub target_fps: u32,
}

impl StreamConfig {
    /// Size in bytes of one frame at this geometry.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }

    /// Nominal period between frames at the target rate.
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps as f64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("stream dimensions must be positive"));
        }
        if self.target_fps == 0 {
            return Err(anyhow!("target_fps must be positive"));
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            pixel_format: PixelFormat::Bgr8,
            target_fps: DEFAULT_FPS,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    device: Option<String>,
    stream: Option<StreamConfigFile>,
    view: Option<ViewConfigFile>,
    publish: Option<PublishConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    pixel_format: Option<PixelFormat>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ViewConfigFile {
    window_title: Option<String>,
    acquire_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PublishConfigFile {
    mqtt_host: Option<String>,
    mqtt_port: Option<u16>,
    topic: Option<String>,
    frame_id: Option<String>,
    acquire_timeout_ms: Option<u64>,
}

/// Viewer (free-running discipline) settings.
#[derive(Debug, Clone)]
pub struct ViewSettings {
    pub window_title: String,
    pub acquire_timeout: Duration,
}

/// Publisher (timer discipline) settings.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub topic: String,
    /// Fixed source identifier stamped on every outgoing message.
    pub frame_id: String,
    pub acquire_timeout: Duration,
}

/// Resolved launch configuration for either binary.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Device selector: `stub://<name>` for the synthetic backend,
    /// `realsense://` for the first attached device (feature-gated).
    pub device: String,
    pub stream: StreamConfig,
    pub view: ViewSettings,
    pub publish: PublishSettings,
}

impl RelayConfig {
    /// Load configuration from the optional file path plus env overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => read_config_file(path)?,
            None => match std::env::var("COLOR_RELAY_CONFIG").ok() {
                Some(path) => read_config_file(Path::new(&path))?,
                None => RelayConfigFile::default(),
            },
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Self {
        let stream = StreamConfig {
            width: file
                .stream
                .as_ref()
                .and_then(|s| s.width)
                .unwrap_or(DEFAULT_WIDTH),
            height: file
                .stream
                .as_ref()
                .and_then(|s| s.height)
                .unwrap_or(DEFAULT_HEIGHT),
            pixel_format: file
                .stream
                .as_ref()
                .and_then(|s| s.pixel_format)
                .unwrap_or(PixelFormat::Bgr8),
            target_fps: file
                .stream
                .as_ref()
                .and_then(|s| s.target_fps)
                .unwrap_or(DEFAULT_FPS),
        };
        let view = ViewSettings {
            window_title: file
                .view
                .as_ref()
                .and_then(|v| v.window_title.clone())
                .unwrap_or_else(|| DEFAULT_WINDOW_TITLE.to_string()),
            acquire_timeout: Duration::from_millis(
                file.view
                    .as_ref()
                    .and_then(|v| v.acquire_timeout_ms)
                    .unwrap_or(DEFAULT_VIEW_TIMEOUT_MS),
            ),
        };
        let publish = PublishSettings {
            mqtt_host: file
                .publish
                .as_ref()
                .and_then(|p| p.mqtt_host.clone())
                .unwrap_or_else(|| DEFAULT_MQTT_HOST.to_string()),
            mqtt_port: file
                .publish
                .as_ref()
                .and_then(|p| p.mqtt_port)
                .unwrap_or(DEFAULT_MQTT_PORT),
            topic: file
                .publish
                .as_ref()
                .and_then(|p| p.topic.clone())
                .unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            frame_id: file
                .publish
                .as_ref()
                .and_then(|p| p.frame_id.clone())
                .unwrap_or_else(|| DEFAULT_FRAME_ID.to_string()),
            acquire_timeout: Duration::from_millis(
                file.publish
                    .as_ref()
                    .and_then(|p| p.acquire_timeout_ms)
                    .unwrap_or(DEFAULT_PUBLISH_TIMEOUT_MS),
            ),
        };
        Self {
            device: file.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            stream,
            view,
            publish,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("COLOR_RELAY_DEVICE") {
            if !device.trim().is_empty() {
                self.device = device;
            }
        }
        if let Ok(topic) = std::env::var("COLOR_RELAY_TOPIC") {
            if !topic.trim().is_empty() {
                self.publish.topic = topic;
            }
        }
        if let Ok(host) = std::env::var("COLOR_RELAY_MQTT_HOST") {
            if !host.trim().is_empty() {
                self.publish.mqtt_host = host;
            }
        }
        if let Ok(port) = std::env::var("COLOR_RELAY_MQTT_PORT") {
            self.publish.mqtt_port = port
                .parse()
                .map_err(|_| anyhow!("COLOR_RELAY_MQTT_PORT must be a port number"))?;
        }
        if let Ok(fps) = std::env::var("COLOR_RELAY_FPS") {
            self.stream.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("COLOR_RELAY_FPS must be an integer frame rate"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.stream.validate()?;
        if self.device.trim().is_empty() {
            return Err(anyhow!("device selector must not be empty"));
        }
        if self.publish.topic.trim().is_empty() {
            return Err(anyhow!("publish topic must not be empty"));
        }
        if self.publish.frame_id.trim().is_empty() {
            return Err(anyhow!("frame_id must not be empty"));
        }
        if self.view.acquire_timeout.is_zero() || self.publish.acquire_timeout.is_zero() {
            return Err(anyhow!("acquire timeouts must be positive"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
