// Frame transport: envelopes, the fan-out hub, buffering sinks and the
// capture thread that feeds them.
pub mod capture;
pub mod frame;
pub mod hub;
pub mod ring;

pub use capture::{CaptureLoop, CaptureState};
pub use frame::{FrameEnvelope, SharedFrame};
pub use hub::{BroadcastHub, FrameSink, SinkError, SinkHandle, StreamError};
pub use ring::FrameRing;
