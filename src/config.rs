use std::path::Path;
use std::time::Duration;

use ::config::{Environment, File, FileFormat};
use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::audio::frame_samples;
use crate::error::BridgeError;
use crate::ptt::PttActions;

/// Sample rates libopus accepts.
const OPUS_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];
/// Frame durations libopus accepts, in tenths of a millisecond.
const OPUS_FRAME_TENTHS_MS: [u32; 6] = [25, 50, 100, 200, 400, 600];

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub audio: AudioConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub ptt: PttConfig,
}

// 音频设备配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Seconds of audio per frame.
    pub packet_length: f64,
    pub input_device: String,
    pub output_device: String,
    /// PulseAudio source the capture stream is moved to.
    pub input_pulse_name: Option<String>,
    /// PulseAudio sink the playback stream is moved to.
    pub output_pulse_name: Option<String>,
    /// FIFO read instead of the input device.
    pub input_pipe: Option<String>,
    /// FIFO written instead of the output device.
    pub output_pipe: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    pub audio_threshold: u16,
    /// Seconds of silence before transmission stops.
    pub vox_silence_time: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    pub enabled: bool,
    /// Mix all speakers; `false` plays frames one by one as they arrive.
    pub mix: bool,
    pub audio_output_volume: f32,
    /// Seconds without audio before a speaker is dropped from the mix.
    pub speaker_timeout: f64,
}

/// A command given either as one shell line or as an argv list.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum CommandLine {
    Line(String),
    Argv(Vec<String>),
}

impl CommandLine {
    pub fn to_shell(&self) -> String {
        match self {
            CommandLine::Line(line) => line.clone(),
            CommandLine::Argv(argv) => argv.join(" "),
        }
    }
}

// PTT 配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PttConfig {
    pub on_command: Option<CommandLine>,
    pub off_command: Option<CommandLine>,
    /// Key up while local audio is being transmitted.
    pub on_capture: bool,
    /// Key up while remote audio is being received.
    pub on_playback: bool,
    pub receive_timeout: f64,
    pub poll_interval: f64,
}

impl PttConfig {
    /// Both commands, or `None` when PTT is not configured.
    pub fn actions(&self) -> Option<PttActions> {
        match (&self.on_command, &self.off_command) {
            (Some(on), Some(off)) => Some(PttActions {
                on: on.to_shell(),
                off: off.to_shell(),
            }),
            _ => None,
        }
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.receive_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            audio: AudioConfig::default(),
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            ptt: PttConfig::default(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            packet_length: 0.02,
            input_device: "default".to_string(),
            output_device: "default".to_string(),
            input_pulse_name: None,
            output_pulse_name: None,
            input_pipe: None,
            output_pipe: None,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            audio_threshold: 1000,
            vox_silence_time: 3.0,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mix: true,
            audio_output_volume: 1.0,
            speaker_timeout: 0.5,
        }
    }
}

impl Default for PttConfig {
    fn default() -> Self {
        Self {
            on_command: None,
            off_command: None,
            on_capture: false,
            on_playback: true,
            receive_timeout: 1.0,
            poll_interval: 0.1,
        }
    }
}

impl Config {
    /// Load `path` if it exists, then apply `VOXBRIDGE_*` environment
    /// overrides (`VOXBRIDGE_AUDIO__SAMPLE_RATE=16000`).
    pub fn load(path: &Path) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("VOXBRIDGE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = settings
            .try_deserialize()
            .map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = ::config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        let invalid = |msg: String| Err(BridgeError::Config(msg));

        if !OPUS_RATES.contains(&self.audio.sample_rate) {
            return invalid(format!(
                "audio.sample_rate {} is not one of {:?}",
                self.audio.sample_rate, OPUS_RATES
            ));
        }
        if !(self.audio.packet_length > 0.0) {
            return invalid(format!(
                "audio.packet_length must be positive, got {}",
                self.audio.packet_length
            ));
        }
        let tenths = (self.audio.packet_length * 10_000.0).round() as u32;
        if !OPUS_FRAME_TENTHS_MS.contains(&tenths) {
            return invalid(format!(
                "audio.packet_length {} is not an Opus frame size (0.0025, 0.005, 0.01, 0.02, 0.04, 0.06)",
                self.audio.packet_length
            ));
        }
        // Zero hang time would make every loud frame its own burst and
        // cycle PTT once per frame.
        if !(self.capture.vox_silence_time > 0.0) {
            return invalid(format!(
                "capture.vox_silence_time must be positive, got {}",
                self.capture.vox_silence_time
            ));
        }
        if !(self.playback.audio_output_volume >= 0.0) {
            return invalid(format!(
                "playback.audio_output_volume must not be negative, got {}",
                self.playback.audio_output_volume
            ));
        }
        for (key, value) in [
            ("playback.speaker_timeout", self.playback.speaker_timeout),
            ("ptt.receive_timeout", self.ptt.receive_timeout),
            ("ptt.poll_interval", self.ptt.poll_interval),
        ] {
            if !(value > 0.0) || !value.is_finite() {
                return invalid(format!("{} must be positive, got {}", key, value));
            }
        }
        self.level_filter().map(|_| ())
    }

    /// Settings that load fine but are probably not what was meant. Checked
    /// after the logger is up so the caller can report them.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.ptt.on_command.is_some() != self.ptt.off_command.is_some() {
            warnings.push("PTT needs both ptt.on_command and ptt.off_command; PTT disabled".to_string());
        }
        warnings
    }

    pub fn level_filter(&self) -> Result<LevelFilter, BridgeError> {
        match self.log_level.to_ascii_lowercase().as_str() {
            "warning" => Ok(LevelFilter::Warn),
            "critical" => Ok(LevelFilter::Error),
            other => other
                .parse()
                .map_err(|_| BridgeError::Config(format!("unknown log_level '{}'", self.log_level))),
        }
    }

    /// Samples per frame at the configured rate and packet length.
    pub fn frame_samples(&self) -> usize {
        frame_samples(self.audio.sample_rate, self.audio.packet_length)
    }

    pub fn speaker_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.playback.speaker_timeout)
    }
}
