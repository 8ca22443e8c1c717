//! Inbound path: network frames tagged by speaker -> mixer -> speaker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::audio::{FrameSink, Mixer, apply_volume};
use crate::liveness::SpeakerTracker;
use crate::net_link::InboundFrame;
use crate::ptt::ReceivePtt;

/// How often an idle loop looks at the inbound queue.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Sum every live speaker into one stream.
    Mix,
    /// Write each frame as it arrives, one speaker at a time.
    Passthrough,
}

pub struct PlaybackLoop {
    sink: Box<dyn FrameSink>,
    inbound: mpsc::Receiver<InboundFrame>,
    mode: PlaybackMode,
    mixer: Mixer,
    speakers: SpeakerTracker,
    receive_ptt: Option<Arc<ReceivePtt>>,
}

impl PlaybackLoop {
    pub fn new(
        sink: Box<dyn FrameSink>,
        inbound: mpsc::Receiver<InboundFrame>,
        mode: PlaybackMode,
        volume: f32,
        speaker_timeout: Duration,
    ) -> Self {
        Self {
            sink,
            inbound,
            mode,
            mixer: Mixer::new(volume),
            speakers: SpeakerTracker::new(speaker_timeout),
            receive_ptt: None,
        }
    }

    /// Report every inbound frame to receive-side PTT.
    pub fn with_receive_ptt(mut self, receive_ptt: Arc<ReceivePtt>) -> Self {
        self.receive_ptt = Some(receive_ptt);
        self
    }

    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        log::info!(
            "Playback started: mode={:?}, volume={}, speaker_timeout={:?}",
            self.mode,
            self.mixer.volume(),
            self.speakers.window()
        );
        while running.load(Ordering::Relaxed) {
            if self.step(Instant::now())? == 0 {
                thread::sleep(POLL_INTERVAL);
            }
        }
        log::info!("Playback stopped");
        Ok(())
    }

    /// One poll: drain the inbound queue, sweep stale speakers, write
    /// whatever is ready. Returns the number of frames written.
    pub fn step(&mut self, now: Instant) -> Result<usize> {
        let mut written = 0;
        loop {
            let InboundFrame { speaker, frame } = match self.inbound.try_recv() {
                Ok(inbound) => inbound,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => bail!("inbound audio channel closed"),
            };
            if self.speakers.touch(speaker, now) {
                log::debug!("speaker {} started talking", speaker);
            }
            if let Some(receive_ptt) = &self.receive_ptt {
                receive_ptt.observe(speaker, now);
            }
            match self.mode {
                PlaybackMode::Mix => self.mixer.push(speaker, frame),
                PlaybackMode::Passthrough => {
                    self.sink.write_frame(apply_volume(frame, self.mixer.volume()))?;
                    written += 1;
                }
            }
        }

        let evicted = self.speakers.evict(now);
        for &speaker in &evicted {
            log::debug!("speaker {} stopped talking", speaker);
            self.mixer.remove(speaker);
        }
        if !evicted.is_empty() {
            log::debug!("{} speakers still live", self.speakers.len());
        }

        if self.mode == PlaybackMode::Mix {
            if let Some(mixed) = self.mixer.mix_next() {
                self.sink.write_frame(mixed)?;
                written += 1;
            }
        }
        Ok(written)
    }
}
