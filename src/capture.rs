//! Outbound path: microphone -> VOX gate -> network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

use crate::audio::{ActivityDetector, FrameSink, FrameSource, PcmFrame};
use crate::ptt::{PttController, PttSource};

/// Number of quiet frames that make up `silence` seconds of hang time.
///
/// Ratios within floating-point noise of a whole number count as that
/// number, so 1.0 s of 0.02 s packets is 50 and not 51.
pub fn hang_frames(silence: f64, packet_length: f64) -> usize {
    let ratio = silence / packet_length;
    let nearest = ratio.round();
    if (ratio - nearest).abs() < 1e-6 {
        nearest as usize
    } else {
        ratio.ceil() as usize
    }
}

pub struct CaptureLoop {
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
    detector: ActivityDetector,
    hang_frames: usize,
    ptt: Option<Arc<PttController>>,
}

impl CaptureLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
        detector: ActivityDetector,
        hang_frames: usize,
    ) -> Self {
        Self {
            source,
            sink,
            detector,
            hang_frames,
            ptt: None,
        }
    }

    /// Key `ptt` around every transmission.
    pub fn with_ptt(mut self, ptt: Arc<PttController>) -> Self {
        self.ptt = Some(ptt);
        self
    }

    /// Poll the source until `running` clears or a read/send fails.
    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        log::info!(
            "Capture started: threshold={}, hang={} frames",
            self.detector.threshold(),
            self.hang_frames
        );
        while running.load(Ordering::Relaxed) {
            let frame = self.source.read_frame()?;
            if self.detector.classify(&frame).is_active() {
                self.transmit(frame, running)?;
            }
        }
        log::info!("Capture stopped");
        Ok(())
    }

    fn transmit(&mut self, first: PcmFrame, running: &AtomicBool) -> Result<()> {
        log::debug!("VOX open");
        if let Some(ptt) = &self.ptt {
            ptt.key_up(PttSource::Capture);
        }
        // Release even when the burst ends in an error.
        let result = self.forward_burst(first, running);
        if let Some(ptt) = &self.ptt {
            ptt.key_down(PttSource::Capture);
        }
        let forwarded = result?;
        log::debug!("VOX closed after {} frames", forwarded);
        Ok(())
    }

    fn forward_burst(&mut self, first: PcmFrame, running: &AtomicBool) -> Result<usize> {
        let mut frame = first;
        let mut quiet = 0;
        let mut forwarded = 0;
        loop {
            self.sink.write_frame(frame)?;
            forwarded += 1;
            if quiet >= self.hang_frames || !running.load(Ordering::Relaxed) {
                return Ok(forwarded);
            }
            frame = self.source.read_frame()?;
            if self.detector.classify(&frame).is_active() {
                quiet = 0;
            } else {
                quiet += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;
    use crate::ptt::{ActionRunner, PttActions};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Sent(i16),
        Command(String),
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    struct ScriptedSource(VecDeque<PcmFrame>);

    impl FrameSource for ScriptedSource {
        fn read_frame(&mut self) -> Result<PcmFrame> {
            self.0
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    struct RecordingSink(Log);

    impl FrameSink for RecordingSink {
        fn write_frame(&mut self, frame: PcmFrame) -> Result<()> {
            self.0.lock().push(Event::Sent(frame.samples()[0]));
            Ok(())
        }
    }

    struct RecordingRunner(Log);

    impl ActionRunner for RecordingRunner {
        fn run(&self, command: &str) -> Result<()> {
            self.0.lock().push(Event::Command(command.to_string()));
            Ok(())
        }
    }

    /// Clears the running flag once `remaining` frames have been read.
    struct StoppingSource {
        remaining: usize,
        running: Arc<AtomicBool>,
    }

    impl FrameSource for StoppingSource {
        fn read_frame(&mut self) -> Result<PcmFrame> {
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                self.running.store(false, Ordering::SeqCst);
            }
            Ok(PcmFrame::new(vec![2000; 4]))
        }
    }

    fn script(levels: &[(i16, usize)]) -> ScriptedSource {
        let frames = levels
            .iter()
            .flat_map(|&(level, count)| std::iter::repeat_n(PcmFrame::new(vec![level; 4]), count))
            .collect();
        ScriptedSource(frames)
    }

    fn capture(source: impl FrameSource + 'static, hang: usize, log: &Log) -> CaptureLoop {
        let ptt = PttController::new(
            Some(PttActions {
                on: "on".into(),
                off: "off".into(),
            }),
            Box::new(RecordingRunner(log.clone())),
        );
        CaptureLoop::new(
            Box::new(source),
            Box::new(RecordingSink(log.clone())),
            ActivityDetector::new(1000),
            hang,
        )
        .with_ptt(Arc::new(ptt))
    }

    fn sent(events: &[Event]) -> usize {
        events.iter().filter(|e| matches!(e, Event::Sent(_))).count()
    }

    #[test]
    fn hang_time_in_frames() {
        assert_eq!(hang_frames(1.0, 0.02), 50);
        assert_eq!(hang_frames(3.0, 0.02), 150);
        assert_eq!(hang_frames(0.05, 0.02), 3);
        assert_eq!(hang_frames(0.0, 0.02), 0);
    }

    #[test]
    fn ten_loud_then_sixty_quiet_sends_sixty() {
        let log = Log::default();
        let running = AtomicBool::new(true);
        let mut capture = capture(script(&[(2000, 10), (0, 60)]), hang_frames(1.0, 0.02), &log);

        // Ends when the script runs dry.
        assert!(capture.run(&running).is_err());

        let events = log.lock().clone();
        assert_eq!(sent(&events), 60);
        assert_eq!(events[0], Event::Command("on".into()));
        assert_eq!(events[1], Event::Sent(2000));
        assert_eq!(events[61], Event::Command("off".into()));
        assert_eq!(events.len(), 62);
    }

    #[test]
    fn short_silence_is_sent_in_full() {
        let log = Log::default();
        let running = AtomicBool::new(true);
        let mut capture = capture(script(&[(2000, 3), (0, 2), (0, 0)]), 5, &log);

        // The burst is still open when the source fails, so it is released.
        assert!(capture.run(&running).is_err());

        let events = log.lock().clone();
        assert_eq!(sent(&events), 5);
        assert_eq!(events.last(), Some(&Event::Command("off".into())));
    }

    #[test]
    fn loud_frame_resets_hang_counter() {
        let log = Log::default();
        let running = AtomicBool::new(true);
        let mut capture = capture(
            script(&[(2000, 1), (0, 2), (1500, 1), (0, 3), (0, 5)]),
            3,
            &log,
        );

        assert!(capture.run(&running).is_err());

        let events = log.lock().clone();
        // 1 loud + 2 quiet + 1 loud + 3 quiet
        assert_eq!(sent(&events), 7);
        let commands: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, Event::Command(_)))
            .collect();
        assert_eq!(commands.len(), 2);
    }

    #[test]
    fn silence_sends_nothing() {
        let log = Log::default();
        let running = AtomicBool::new(true);
        let mut capture = capture(script(&[(1000, 20)]), 5, &log);

        assert!(capture.run(&running).is_err());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn cleared_flag_stops_before_reading() {
        let log = Log::default();
        let running = AtomicBool::new(false);
        let mut capture = capture(script(&[(2000, 5)]), 5, &log);

        assert!(capture.run(&running).is_ok());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn stop_during_burst_releases_once() {
        let log = Log::default();
        let running = Arc::new(AtomicBool::new(true));
        let source = StoppingSource {
            remaining: 3,
            running: running.clone(),
        };
        let mut capture = capture(source, 50, &log);

        assert!(capture.run(&running).is_ok());

        let events = log.lock().clone();
        assert_eq!(sent(&events), 3);
        assert_eq!(events.first(), Some(&Event::Command("on".into())));
        assert_eq!(events.last(), Some(&Event::Command("off".into())));
        let offs = events
            .iter()
            .filter(|e| **e == Event::Command("off".into()))
            .count();
        assert_eq!(offs, 1);
    }
}
