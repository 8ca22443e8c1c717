//! Moving our own PulseAudio streams onto a named sink or source.

use std::process::Command;

use serde::Deserialize;

use crate::audio::StreamDirection;
use crate::error::BridgeError;

pub trait AudioRouter {
    /// Move this process's stream in `direction` to the device called `target`.
    fn relocate(&self, direction: StreamDirection, target: &str) -> Result<(), BridgeError>;
}

#[derive(Debug, Deserialize)]
struct PulseStream {
    index: u32,
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PulseDevice {
    index: u32,
    name: String,
}

/// Shells out to `pactl`.
pub struct PulseRouter {
    pid: u32,
}

impl PulseRouter {
    pub fn new() -> Self {
        Self {
            pid: std::process::id(),
        }
    }

    fn pactl(&self, args: &[&str]) -> Result<String, BridgeError> {
        let output = Command::new("pactl")
            .args(args)
            .output()
            .map_err(|e| BridgeError::Routing(format!("failed to run pactl: {}", e)))?;
        if !output.status.success() {
            return Err(BridgeError::Routing(format!(
                "pactl {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for PulseRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioRouter for PulseRouter {
    fn relocate(&self, direction: StreamDirection, target: &str) -> Result<(), BridgeError> {
        let (streams, devices, verb) = match direction {
            StreamDirection::Capture => ("source-outputs", "sources", "move-source-output"),
            StreamDirection::Playback => ("sink-inputs", "sinks", "move-sink-input"),
        };
        let stream_json = self.pactl(&["--format=json", "list", streams])?;
        let stream = find_stream(&stream_json, self.pid)?.ok_or_else(|| {
            BridgeError::Routing(format!("no {} stream owned by pid {}", direction, self.pid))
        })?;
        let device_json = self.pactl(&["--format=json", "list", devices])?;
        let device = find_device(&device_json, target)?
            .ok_or_else(|| BridgeError::Routing(format!("no PulseAudio device named '{}'", target)))?;

        self.pactl(&[verb, &stream.to_string(), &device.to_string()])?;
        log::info!("Moved {} stream {} to '{}'", direction, stream, target);
        Ok(())
    }
}

fn parse<T: for<'de> Deserialize<'de>>(json: &str) -> Result<Vec<T>, BridgeError> {
    serde_json::from_str(json).map_err(|e| BridgeError::Routing(format!("bad pactl output: {}", e)))
}

/// Index of the stream whose `application.process.id` is `pid`.
fn find_stream(json: &str, pid: u32) -> Result<Option<u32>, BridgeError> {
    let pid = pid.to_string();
    let streams: Vec<PulseStream> = parse(json)?;
    Ok(streams
        .iter()
        .find(|s| {
            s.properties
                .get("application.process.id")
                .and_then(|v| v.as_str())
                == Some(pid.as_str())
        })
        .map(|s| s.index))
}

fn find_device(json: &str, name: &str) -> Result<Option<u32>, BridgeError> {
    let devices: Vec<PulseDevice> = parse(json)?;
    Ok(devices.iter().find(|d| d.name == name).map(|d| d.index))
}
