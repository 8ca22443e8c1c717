//! Capability traits shared by the live-device and named-pipe backends.

use std::fmt;

use anyhow::Result;

use super::frame::PcmFrame;

/// Which way audio flows through a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamDirection {
    Capture,
    Playback,
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamDirection::Capture => f.write_str("capture"),
            StreamDirection::Playback => f.write_str("playback"),
        }
    }
}

/// A producer of whole PCM frames.
///
/// `read_frame` blocks until a full frame is available; the backend is
/// expected to enforce real-time pacing. An error means the source is
/// unusable and the reading loop should give up.
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<PcmFrame>;
}

/// A consumer of whole PCM frames.
pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: PcmFrame) -> Result<()>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn read_frame(&mut self) -> Result<PcmFrame> {
        (**self).read_frame()
    }
}

impl<T: FrameSink + ?Sized> FrameSink for Box<T> {
    fn write_frame(&mut self, frame: PcmFrame) -> Result<()> {
        (**self).write_frame(frame)
    }
}
