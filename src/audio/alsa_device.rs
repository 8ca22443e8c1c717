//! ALSA PCM devices exposed as frame sources and sinks.

use std::collections::BTreeMap;

use alsa::device_name::HintIter;
use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

use super::device::{FrameSink, FrameSource, StreamDirection};
use super::frame::PcmFrame;
use crate::error::BridgeError;

/// Consecutive failed recoveries tolerated before a device is given up on.
const MAX_RECOVERY_RETRIES: u32 = 3;

/// PCM names known to ALSA, keyed by name, with their descriptions.
#[derive(Debug, Default)]
pub struct DeviceList {
    pub input: BTreeMap<String, String>,
    pub output: BTreeMap<String, String>,
}

/// List PCM devices from the ALSA name hints. Hints without an IOID work
/// in both directions.
pub fn enumerate_devices() -> Result<DeviceList> {
    let hints = HintIter::new_str(None, "pcm").context("Failed to read ALSA device hints")?;
    let mut list = DeviceList::default();
    for hint in hints {
        let Some(name) = hint.name else { continue };
        let desc = hint
            .desc
            .map(|d| d.replace('\n', " "))
            .unwrap_or_default();
        match hint.direction {
            Some(Direction::Capture) => {
                list.input.insert(name, desc);
            }
            Some(Direction::Playback) => {
                list.output.insert(name, desc);
            }
            None => {
                list.input.insert(name.clone(), desc.clone());
                list.output.insert(name, desc);
            }
        }
    }
    log::debug!("input: {:?}", list.input.keys().collect::<Vec<_>>());
    log::debug!("output: {:?}", list.output.keys().collect::<Vec<_>>());
    Ok(list)
}

fn open_pcm(
    device: &str,
    direction: StreamDirection,
    sample_rate: u32,
    frame_size: usize,
) -> Result<PCM, BridgeError> {
    let alsa_direction = match direction {
        StreamDirection::Capture => Direction::Capture,
        StreamDirection::Playback => Direction::Playback,
    };
    let device_err =
        |e: alsa::Error| BridgeError::Device(format!("{} device '{}': {}", direction, device, e));

    let pcm = PCM::new(device, alsa_direction, false).map_err(device_err)?;

    // Mono S16 at the session rate; one period per frame.
    {
        let hwp = HwParams::any(&pcm).map_err(device_err)?;
        hwp.set_access(Access::RWInterleaved).map_err(device_err)?;
        hwp.set_format(Format::S16LE).map_err(device_err)?;
        hwp.set_channels(1).map_err(device_err)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest).map_err(device_err)?;
        hwp.set_period_size_near(frame_size as alsa::pcm::Frames, ValueOr::Nearest)
            .map_err(device_err)?;
        pcm.hw_params(&hwp).map_err(device_err)?;
    }

    let (actual_rate, period_size) = {
        let hwp = pcm.hw_params_current().map_err(device_err)?;
        let rate = hwp.get_rate().map_err(device_err)?;
        let ps = hwp.get_period_size().map_err(device_err)? as usize;
        (rate, ps)
    };

    if actual_rate != sample_rate {
        return Err(BridgeError::Device(format!(
            "{} device '{}' runs at {}Hz, {}Hz required",
            direction, device, actual_rate, sample_rate
        )));
    }

    log::info!(
        "ALSA {}: device={}, rate={}, period_size={}, frame_size={}",
        direction,
        device,
        actual_rate,
        period_size,
        frame_size,
    );

    Ok(pcm)
}

/// Blocking microphone reader.
pub struct AlsaCapture {
    pcm: PCM,
    buf: Vec<i16>,
}

impl AlsaCapture {
    pub fn open(device: &str, sample_rate: u32, frame_size: usize) -> Result<Self, BridgeError> {
        let pcm = open_pcm(device, StreamDirection::Capture, sample_rate, frame_size)?;
        Ok(Self {
            pcm,
            buf: vec![0; frame_size],
        })
    }
}

impl FrameSource for AlsaCapture {
    fn read_frame(&mut self) -> Result<PcmFrame> {
        let io = self.pcm.io_i16()?;
        let mut filled = 0;
        let mut retry_count = 0u32;
        while filled < self.buf.len() {
            match io.readi(&mut self.buf[filled..]) {
                Ok(n) => {
                    filled += n;
                    retry_count = 0;
                }
                Err(e) => {
                    retry_count += 1;
                    log::warn!("ALSA capture error: {}, recovering...", e);
                    if retry_count > MAX_RECOVERY_RETRIES {
                        return Err(BridgeError::Device(format!(
                            "capture failed after {} recoveries: {}",
                            MAX_RECOVERY_RETRIES, e
                        ))
                        .into());
                    }
                    self.pcm
                        .prepare()
                        .context("Failed to recover PCM capture")?;
                }
            }
        }
        Ok(PcmFrame::new(self.buf.clone()))
    }
}

/// Blocking speaker writer.
pub struct AlsaPlayback {
    pcm: PCM,
}

impl AlsaPlayback {
    pub fn open(device: &str, sample_rate: u32, frame_size: usize) -> Result<Self, BridgeError> {
        let pcm = open_pcm(device, StreamDirection::Playback, sample_rate, frame_size)?;
        Ok(Self { pcm })
    }
}

impl FrameSink for AlsaPlayback {
    fn write_frame(&mut self, frame: PcmFrame) -> Result<()> {
        let io = self.pcm.io_i16()?;
        let samples = frame.samples();
        let mut written = 0;
        let mut retry_count = 0u32;
        // Short writes and XRUNs are retried so no part of the frame is lost.
        while written < samples.len() {
            match io.writei(&samples[written..]) {
                Ok(n) => {
                    written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    retry_count += 1;
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    if retry_count > MAX_RECOVERY_RETRIES {
                        return Err(BridgeError::Device(format!(
                            "playback failed after {} recoveries: {}",
                            MAX_RECOVERY_RETRIES, e
                        ))
                        .into());
                    }
                    self.pcm
                        .prepare()
                        .context("Failed to recover PCM playback")?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for AlsaPlayback {
    fn drop(&mut self) {
        if let Err(e) = self.pcm.drain() {
            log::debug!("ALSA playback drain: {}", e);
        }
    }
}
