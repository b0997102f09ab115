//! color-relay
//!
//! Continuously pulls color frames from a depth-camera pipeline and delivers
//! each one to exactly one downstream sink: an interactive on-screen viewer,
//! or a timestamped publish topic consumed by other processes.
//!
//! The core of the crate is the bounded-latency acquisition loop: acquire
//! with a strict timeout, validate, dispatch, repeat until told to stop, and
//! release the device on every exit path.
//!
//! # Module Structure
//!
//! - `config`: launch-time stream geometry and sink settings
//! - `frame`: acquired frames and acquisition outcomes
//! - `source`: the blocking `FrameSource` contract and device backends
//! - `dispatch`: the loop, its two scheduling disciplines, stop handling
//! - `sink`: display and publish consumers plus the image wire format

pub mod config;
pub mod dispatch;
pub mod frame;
pub mod sink;
pub mod source;

pub use config::{PixelFormat, PublishSettings, RelayConfig, StreamConfig, ViewSettings};
pub use dispatch::{Discipline, DispatchLoop, LoopReport, LoopState, StopHandle};
pub use frame::{AcquisitionResult, Frame};
#[cfg(feature = "sink-display")]
pub use sink::DisplaySink;
pub use sink::{PublishSink, Sink};
pub use source::{CameraSource, FrameSource, SyntheticSource};
