//! Named-pipe (FIFO) stand-ins for the audio device.
//!
//! Samples travel as raw little-endian S16 mono, one frame at a time.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::device::{FrameSink, FrameSource};
use super::frame::PcmFrame;

/// Reads frames from a FIFO, reopening it whenever the writer goes away.
pub struct PipeSource {
    path: PathBuf,
    file: Option<File>,
    buf: Vec<u8>,
}

impl PipeSource {
    pub fn new(path: impl AsRef<Path>, frame_size: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            buf: vec![0; frame_size * 2],
        }
    }
}

impl FrameSource for PipeSource {
    fn read_frame(&mut self) -> Result<PcmFrame> {
        loop {
            let file = match &mut self.file {
                Some(file) => file,
                // Opening a FIFO blocks until a writer shows up.
                slot @ None => slot.insert(
                    File::open(&self.path)
                        .with_context(|| format!("Failed to open pipe {}", self.path.display()))?,
                ),
            };
            match file.read_exact(&mut self.buf) {
                Ok(()) => return Ok(PcmFrame::from_le_bytes(&self.buf)),
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    log::debug!("pipe {} closed by writer, reopening", self.path.display());
                    self.file = None;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to read pipe {}", self.path.display()));
                }
            }
        }
    }
}

/// Writes frames into a FIFO. A vanished reader drops the frame and the
/// pipe is reopened on the next write.
pub struct PipeSink {
    path: PathBuf,
    file: Option<File>,
}

impl PipeSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
        }
    }
}

impl FrameSink for PipeSink {
    fn write_frame(&mut self, frame: PcmFrame) -> Result<()> {
        let file = match &mut self.file {
            Some(file) => file,
            slot @ None => slot.insert(
                OpenOptions::new()
                    .write(true)
                    .open(&self.path)
                    .with_context(|| format!("Failed to open pipe {}", self.path.display()))?,
            ),
        };
        match file.write_all(&frame.to_le_bytes()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                log::debug!("pipe {} has no reader, dropping frame", self.path.display());
                self.file = None;
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to write pipe {}", self.path.display())),
        }
    }
}
