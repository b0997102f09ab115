//! Frame sinks.
//!
//! A sink receives each valid frame by reference, synchronously, inside the
//! dispatch cycle. It must return promptly (sub-frame-period): a slow sink
//! throttles acquisition under the timer discipline and adds latency under
//! the free-running one. Sinks must not retain the frame past `consume`.
//!
//! A `consume` error is sink-fatal for that cycle only: the dispatch loop
//! logs it and keeps streaming (best-effort delivery).

#[cfg(feature = "sink-display")]
pub mod display;
pub mod publish;
pub mod wire;

#[cfg(feature = "sink-display")]
pub use display::DisplaySink;
pub use publish::PublishSink;
pub use wire::ImageMessage;

use anyhow::Result;

use crate::frame::Frame;

/// Downstream consumer of dispatched frames.
pub trait Sink {
    /// Deliver one frame. Runs synchronously inside the dispatch cycle.
    fn consume(&mut self, frame: &Frame) -> Result<()>;

    /// Cooperative stop signal, consulted once per free-running cycle.
    ///
    /// Display sinks report their quit key here; headless sinks keep the
    /// default and rely on the external stop handle.
    fn poll_stop_signal(&mut self) -> bool {
        false
    }
}
