//! Peak-level voice activity detection.

use super::frame::PcmFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Silent,
    Active,
}

impl Activity {
    pub fn is_active(self) -> bool {
        self == Activity::Active
    }
}

/// Largest absolute sample value. `i16::MIN` counts as 32768.
pub fn peak(samples: &[i16]) -> u16 {
    samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0)
}

/// Classifies frames by comparing their peak against a fixed threshold.
///
/// A frame is active only when its peak is strictly above the threshold,
/// so a frame sitting exactly on the threshold is silent.
#[derive(Debug, Clone, Copy)]
pub struct ActivityDetector {
    threshold: u16,
}

impl ActivityDetector {
    pub fn new(threshold: u16) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    pub fn classify(&self, frame: &PcmFrame) -> Activity {
        if peak(frame.samples()) > self.threshold {
            Activity::Active
        } else {
            Activity::Silent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: &[i16]) -> PcmFrame {
        PcmFrame::new(samples.to_vec())
    }

    #[test]
    fn all_zero_is_silent() {
        let det = ActivityDetector::new(0);
        assert_eq!(det.classify(&PcmFrame::silence(960)), Activity::Silent);
    }

    #[test]
    fn empty_frame_is_silent() {
        let det = ActivityDetector::new(0);
        assert_eq!(det.classify(&frame(&[])), Activity::Silent);
    }

    #[test]
    fn threshold_boundary() {
        let det = ActivityDetector::new(1000);
        assert_eq!(det.classify(&frame(&[0, 1000, -1000])), Activity::Silent);
        assert_eq!(det.classify(&frame(&[0, 1001])), Activity::Active);
        assert_eq!(det.classify(&frame(&[-1001, 3])), Activity::Active);
    }

    #[test]
    fn negative_peaks_count() {
        let det = ActivityDetector::new(2000);
        assert!(det.classify(&frame(&[10, -2500, 20])).is_active());
    }

    #[test]
    fn min_sample_does_not_overflow() {
        assert_eq!(peak(&[i16::MIN]), 32768);
        let det = ActivityDetector::new(i16::MAX as u16);
        assert_eq!(det.classify(&frame(&[i16::MIN])), Activity::Active);
        assert_eq!(det.classify(&frame(&[i16::MAX])), Activity::Silent);
    }

    #[test]
    fn any_peak_at_or_below_threshold_is_silent() {
        let det = ActivityDetector::new(500);
        for amplitude in [0i16, 1, 250, 499, 500] {
            let samples = vec![amplitude, -amplitude, amplitude / 2];
            assert_eq!(det.classify(&frame(&samples)), Activity::Silent, "{amplitude}");
        }
        for amplitude in [501i16, 1000, i16::MAX] {
            let samples = vec![0, -amplitude];
            assert_eq!(det.classify(&frame(&samples)), Activity::Active, "{amplitude}");
        }
    }
}
