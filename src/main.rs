mod args;
mod audio;
mod capture;
mod config;
mod error;
mod liveness;
mod net_link;
mod playback;
mod protocol;
mod ptt;
mod routing;
mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::signal::unix::{SignalKind, signal as unix_signal};

use args::Args;
use audio::{
    ActivityDetector, AlsaCapture, AlsaPlayback, FrameSink, FrameSource, PipeSink, PipeSource,
    StreamDirection,
};
use capture::{CaptureLoop, hang_frames};
use config::Config;
use error::BridgeError;
use net_link::{InboundFrame, LinkConfig, LinkSender, VoiceLink};
use playback::{PlaybackLoop, PlaybackMode};
use ptt::{PttController, ReceivePtt, ShellRunner};
use routing::{AudioRouter, PulseRouter};
use supervisor::Supervisor;

/// How often worker liveness is checked.
const HEALTH_INTERVAL: Duration = Duration::from_secs(1);
/// Status is logged every this many health checks.
const STATUS_EVERY: u32 = 60;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 加载配置，命令行参数优先
    let mut config = Config::load(&args.config)?;
    args.apply(&mut config);
    config.validate()?;

    // 初始化日志，RUST_LOG 覆盖配置文件
    env_logger::Builder::new()
        .filter_level(config.level_filter()?)
        .parse_default_env()
        .init();
    for warning in config.warnings() {
        log::warn!("{}", warning);
    }

    if args.list_devices {
        return list_devices();
    }

    let host = args.host.clone().context("--host is required")?;
    let frame_samples = config.frame_samples();
    let link_config = LinkConfig {
        host,
        port: args.port,
        tls: args.tls,
        user: args.user.clone(),
        password: args.password.clone(),
        sample_rate: config.audio.sample_rate,
        frame_samples,
    };

    let mut link = VoiceLink::connect(link_config).await?;
    if let Some(channel) = &args.channel {
        if let Err(e) = link.join_channel(channel).await {
            if let BridgeError::ChannelNotFound { available, .. } = &e {
                log::error!("Available channels: {}", available.join(", "));
            }
            return Err(e.into());
        }
    }
    link.configure(args.bandwidth, args.codec_profile);
    let (link_sender, inbound, mut link_task) = link.start()?;

    let ptt = Arc::new(PttController::new(config.ptt.actions(), Box::new(ShellRunner)));
    if ptt.is_enabled() {
        log::info!(
            "PTT enabled: on_capture={}, on_playback={}",
            config.ptt.on_capture,
            config.ptt.on_playback
        );
    }

    let mut supervisor = Supervisor::new();

    spawn_capture(&mut supervisor, &config, frame_samples, &link_sender, &ptt);
    spawn_playback(&mut supervisor, &config, frame_samples, inbound, &ptt);

    supervisor.start()?;
    if supervisor.status().0.is_empty() {
        bail!("neither capture nor playback could be started");
    }

    let mut sigterm = unix_signal(SignalKind::terminate())?;
    let mut health = tokio::time::interval(HEALTH_INTERVAL);
    let mut checks = 0u32;
    let mut all_dead = false;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Interrupted, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                log::info!("Terminated, shutting down");
                break;
            }
            _ = health.tick() => {
                let status = supervisor.status();
                checks += 1;
                if checks % STATUS_EVERY == 0 {
                    log::info!("{}ptt: {:?}", status, ptt.state());
                }
                if !status.any_alive() {
                    log::error!("All workers have stopped: {}", status);
                    all_dead = true;
                    break;
                }
            }
        }
    }

    supervisor.stop();
    drop(link_sender);
    let blocked = tokio::task::spawn_blocking(move || supervisor.shutdown(SHUTDOWN_GRACE)).await?;
    if !blocked.is_empty() {
        log::warn!("Exiting with workers still blocked: {}", blocked.join(", "));
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, &mut link_task).await.is_err() {
        link_task.abort();
    }

    if all_dead {
        bail!("all audio workers stopped");
    }
    Ok(())
}

// 发送方向：麦克风 -> VOX -> 服务器
fn spawn_capture(
    supervisor: &mut Supervisor,
    config: &Config,
    frame_samples: usize,
    link_sender: &LinkSender,
    ptt: &Arc<PttController>,
) {
    if !config.capture.enabled {
        return;
    }
    let source = match open_source(config, frame_samples) {
        Ok(source) => source,
        Err(e) => {
            log::error!("{}; capture disabled", e);
            return;
        }
    };
    let mut capture = CaptureLoop::new(
        source,
        Box::new(link_sender.clone()),
        ActivityDetector::new(config.capture.audio_threshold),
        hang_frames(config.capture.vox_silence_time, config.audio.packet_length),
    );
    if ptt.is_enabled() && config.ptt.on_capture {
        capture = capture.with_ptt(ptt.clone());
    }
    let pulse_target = pulse_target(config, StreamDirection::Capture);
    supervisor.add("capture", move |running| {
        relocate(StreamDirection::Capture, pulse_target);
        capture.run(running)
    });
}

// 接收方向：服务器 -> 混音 -> 扬声器
fn spawn_playback(
    supervisor: &mut Supervisor,
    config: &Config,
    frame_samples: usize,
    inbound: mpsc::Receiver<InboundFrame>,
    ptt: &Arc<PttController>,
) {
    if !config.playback.enabled {
        return;
    }
    let sink = match open_sink(config, frame_samples) {
        Ok(sink) => sink,
        Err(e) => {
            log::error!("{}; playback disabled", e);
            return;
        }
    };
    let mode = if config.playback.mix {
        PlaybackMode::Mix
    } else {
        PlaybackMode::Passthrough
    };
    let mut playback = PlaybackLoop::new(
        sink,
        inbound,
        mode,
        config.playback.audio_output_volume,
        config.speaker_timeout(),
    );
    let receive_ptt = (ptt.is_enabled() && config.ptt.on_playback)
        .then(|| Arc::new(ReceivePtt::new(ptt.clone(), config.ptt.receive_timeout())));
    if let Some(receive_ptt) = &receive_ptt {
        playback = playback.with_receive_ptt(receive_ptt.clone());
    }
    let pulse_target = pulse_target(config, StreamDirection::Playback);
    supervisor.add("playback", move |running| {
        relocate(StreamDirection::Playback, pulse_target);
        playback.run(running)
    });
    if let Some(receive_ptt) = receive_ptt {
        let interval = config.ptt.poll_interval();
        supervisor.add("ptt", move |running| receive_ptt.run(interval, running));
    }
}

fn list_devices() -> anyhow::Result<()> {
    let devices = audio::enumerate_devices()?;
    println!("Input devices:");
    for (name, desc) in &devices.input {
        println!("  {:<32} {}", name, desc);
    }
    println!("Output devices:");
    for (name, desc) in &devices.output {
        println!("  {:<32} {}", name, desc);
    }
    Ok(())
}

fn open_source(config: &Config, frame_samples: usize) -> Result<Box<dyn FrameSource>, BridgeError> {
    if let Some(pipe) = &config.audio.input_pipe {
        log::info!("Capturing from pipe {}", pipe);
        return Ok(Box::new(PipeSource::new(pipe, frame_samples)));
    }
    let capture = AlsaCapture::open(
        &config.audio.input_device,
        config.audio.sample_rate,
        frame_samples,
    )?;
    Ok(Box::new(capture))
}

fn open_sink(config: &Config, frame_samples: usize) -> Result<Box<dyn FrameSink>, BridgeError> {
    if let Some(pipe) = &config.audio.output_pipe {
        log::info!("Playing into pipe {}", pipe);
        return Ok(Box::new(PipeSink::new(pipe)));
    }
    let playback = AlsaPlayback::open(
        &config.audio.output_device,
        config.audio.sample_rate,
        frame_samples,
    )?;
    Ok(Box::new(playback))
}

/// PulseAudio device to move a direction's stream to. Pipes are not
/// PulseAudio streams, so they are never relocated.
fn pulse_target(config: &Config, direction: StreamDirection) -> Option<String> {
    match direction {
        StreamDirection::Capture if config.audio.input_pipe.is_none() => {
            config.audio.input_pulse_name.clone()
        }
        StreamDirection::Playback if config.audio.output_pipe.is_none() => {
            config.audio.output_pulse_name.clone()
        }
        _ => None,
    }
}

fn relocate(direction: StreamDirection, target: Option<String>) {
    let Some(target) = target else { return };
    if let Err(e) = PulseRouter::new().relocate(direction, &target) {
        log::warn!("{}", e);
    }
}
