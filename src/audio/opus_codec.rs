//! Opus encoder/decoder for mono voice frames.
//!
//! Both ends run at the session sample rate with one channel, so unlike a
//! general player there is no resampling or channel conversion here.

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::frame::PcmFrame;

/// Opus application profile requested for the outbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CodecProfile {
    #[default]
    Audio,
    Voip,
    #[value(name = "lowdelay")]
    LowDelay,
}

impl From<CodecProfile> for opus::Application {
    fn from(profile: CodecProfile) -> Self {
        match profile {
            CodecProfile::Audio => opus::Application::Audio,
            CodecProfile::Voip => opus::Application::Voip,
            CodecProfile::LowDelay => opus::Application::LowDelay,
        }
    }
}

// ======================== Opus Encoder ========================

pub struct OpusEncoder {
    encoder: opus::Encoder,
    frame_samples: usize,
    buf: Vec<u8>,
}

impl OpusEncoder {
    /// * `sample_rate`   - Session sample rate (8k/12k/16k/24k/48k)
    /// * `frame_samples` - Samples per frame (e.g. 960 for 20ms at 48kHz)
    /// * `profile`       - Opus application profile
    /// * `bitrate`       - Bitrate in bits/s (e.g. 48000)
    pub fn new(
        sample_rate: u32,
        frame_samples: usize,
        profile: CodecProfile,
        bitrate: i32,
    ) -> Result<Self> {
        let mut encoder =
            opus::Encoder::new(sample_rate, opus::Channels::Mono, profile.into())?;
        encoder.set_bitrate(opus::Bitrate::Bits(bitrate))?;
        Ok(Self {
            encoder,
            frame_samples,
            buf: vec![0u8; 4000],
        })
    }

    /// Encode one frame. Frames shorter than the configured size are padded
    /// with silence; longer ones are truncated.
    pub fn encode(&mut self, frame: &PcmFrame) -> Result<Vec<u8>> {
        let samples = frame.samples();
        let len = if samples.len() == self.frame_samples {
            self.encoder.encode(samples, &mut self.buf)?
        } else {
            let mut padded = samples.to_vec();
            padded.resize(self.frame_samples, 0);
            self.encoder.encode(&padded, &mut self.buf)?
        };
        Ok(self.buf[..len].to_vec())
    }
}

// ======================== Opus Decoder ========================

pub struct OpusDecoder {
    decoder: opus::Decoder,
    buf: Vec<i16>,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32) -> Result<Self> {
        let decoder = opus::Decoder::new(sample_rate, opus::Channels::Mono)?;
        // Max 120ms per packet.
        let max_frame_size = sample_rate as usize * 120 / 1000;
        Ok(Self {
            decoder,
            buf: vec![0i16; max_frame_size],
        })
    }

    /// Decode one packet into a frame of however many samples it carried.
    pub fn decode(&mut self, opus_data: &[u8]) -> Result<PcmFrame> {
        let decoded = self.decoder.decode(opus_data, &mut self.buf, false)?;
        Ok(PcmFrame::new(self.buf[..decoded].to_vec()))
    }
}
