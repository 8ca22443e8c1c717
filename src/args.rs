//! Command-line argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::audio::opus_codec::CodecProfile;
use crate::config::Config;

pub const DEFAULT_PORT: u16 = 64738;

/// Bridge a voice-chat channel to a local sound card or named pipe
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Voice server host name or address
    #[arg(short = 'H', long, required_unless_present = "list_devices")]
    pub host: Option<String>,

    /// Voice server port
    #[arg(short = 'P', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// User name to connect as
    #[arg(short, long, default_value = "voxbridge")]
    pub user: String,

    /// Server password
    #[arg(short, long)]
    pub password: Option<String>,

    /// Connect over TLS (wss://)
    #[arg(long, default_value = "false")]
    pub tls: bool,

    /// Channel to join after connecting
    #[arg(short = 'C', long)]
    pub channel: Option<String>,

    /// Outbound Opus bitrate in bits/s
    #[arg(short, long, default_value_t = 48000)]
    pub bandwidth: i32,

    /// Opus application profile
    #[arg(long, value_enum, default_value_t = CodecProfile::Audio)]
    pub codec_profile: CodecProfile,

    /// Configuration file
    #[arg(long, default_value = "voxbridge.toml")]
    pub config: PathBuf,

    /// Read microphone audio from this named pipe instead of a device
    #[arg(short, long)]
    pub fifo: Option<String>,

    /// Seconds of audio per packet (overrides audio.packet_length)
    #[arg(short = 's', long)]
    pub packet_length: Option<f64>,

    /// Do not transmit local audio
    #[arg(long, default_value = "false")]
    pub no_capture: bool,

    /// Do not play received audio
    #[arg(long, default_value = "false")]
    pub no_playback: bool,

    /// List audio devices and exit
    #[arg(long, default_value = "false")]
    pub list_devices: bool,
}

impl Args {
    /// Fold command-line overrides into the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(fifo) = &self.fifo {
            config.audio.input_pipe = Some(fifo.clone());
        }
        if let Some(packet_length) = self.packet_length {
            config.audio.packet_length = packet_length;
        }
        if self.no_capture {
            config.capture.enabled = false;
        }
        if self.no_playback {
            config.playback.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_invocation() {
        let args = Args::try_parse_from(["voxbridge", "-H", "voice.example.org"]).unwrap();
        assert_eq!(args.host.as_deref(), Some("voice.example.org"));
        assert_eq!(args.port, DEFAULT_PORT);
        assert_eq!(args.bandwidth, 48000);
        assert_eq!(args.codec_profile, CodecProfile::Audio);
        assert_eq!(args.config, PathBuf::from("voxbridge.toml"));
        assert!(!args.tls);
    }

    #[test]
    fn host_required_unless_listing() {
        assert!(Args::try_parse_from(["voxbridge"]).is_err());
        let args = Args::try_parse_from(["voxbridge", "--list-devices"]).unwrap();
        assert!(args.list_devices);
        assert!(args.host.is_none());
    }

    #[test]
    fn overrides_reach_config() {
        let args = Args::try_parse_from([
            "voxbridge",
            "-H",
            "10.0.0.2",
            "-f",
            "/tmp/mic.fifo",
            "-s",
            "0.01",
            "--no-playback",
            "--codec-profile",
            "lowdelay",
        ])
        .unwrap();
        assert_eq!(args.codec_profile, CodecProfile::LowDelay);

        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.audio.input_pipe.as_deref(), Some("/tmp/mic.fifo"));
        assert_eq!(config.audio.packet_length, 0.01);
        assert!(config.capture.enabled);
        assert!(!config.playback.enabled);
        assert_eq!(config.frame_samples(), 480);
    }
}
