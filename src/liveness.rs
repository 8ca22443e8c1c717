//! Last-seen bookkeeping for remote speakers.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Session id the server assigns to a remote speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpeakerId(pub u32);

impl fmt::Display for SpeakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One entry per speaker, dropped once it has been quiet for `window`.
#[derive(Debug)]
pub struct SpeakerTracker {
    window: Duration,
    last_seen: HashMap<SpeakerId, Instant>,
}

impl SpeakerTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a frame from `speaker` at `now`. Returns true when the speaker
    /// was not being tracked before.
    pub fn touch(&mut self, speaker: SpeakerId, now: Instant) -> bool {
        self.last_seen.insert(speaker, now).is_none()
    }

    pub fn is_live(&self, speaker: SpeakerId, now: Instant) -> bool {
        self.last_seen
            .get(&speaker)
            .is_some_and(|&seen| now.saturating_duration_since(seen) < self.window)
    }

    /// Drop every speaker whose last frame is at least `window` old and
    /// return the ones removed.
    pub fn evict(&mut self, now: Instant) -> Vec<SpeakerId> {
        let window = self.window;
        let mut expired = Vec::new();
        self.last_seen.retain(|&speaker, &mut seen| {
            let keep = now.saturating_duration_since(seen) < window;
            if !keep {
                expired.push(speaker);
            }
            keep
        });
        expired.sort();
        expired
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(500);

    #[test]
    fn present_inside_window_absent_after() {
        let t0 = Instant::now();
        let mut tracker = SpeakerTracker::new(WINDOW);
        assert!(tracker.touch(SpeakerId(7), t0));

        let at_400 = t0 + Duration::from_millis(400);
        assert!(tracker.evict(at_400).is_empty());
        assert!(tracker.is_live(SpeakerId(7), at_400));

        let at_600 = t0 + Duration::from_millis(600);
        assert!(!tracker.is_live(SpeakerId(7), at_600));
        assert_eq!(tracker.evict(at_600), vec![SpeakerId(7)]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn evicted_exactly_at_window() {
        let t0 = Instant::now();
        let mut tracker = SpeakerTracker::new(WINDOW);
        tracker.touch(SpeakerId(1), t0);
        assert_eq!(tracker.evict(t0 + WINDOW), vec![SpeakerId(1)]);
    }

    #[test]
    fn refresh_extends_lifetime() {
        let t0 = Instant::now();
        let mut tracker = SpeakerTracker::new(WINDOW);
        assert!(tracker.touch(SpeakerId(2), t0));
        assert!(!tracker.touch(SpeakerId(2), t0 + Duration::from_millis(300)));

        let later = t0 + Duration::from_millis(700);
        assert!(tracker.evict(later).is_empty());
        assert!(tracker.is_live(SpeakerId(2), later));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn one_entry_per_speaker() {
        let t0 = Instant::now();
        let mut tracker = SpeakerTracker::new(WINDOW);
        tracker.touch(SpeakerId(3), t0);
        tracker.touch(SpeakerId(3), t0);
        tracker.touch(SpeakerId(4), t0);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn only_stale_speakers_are_evicted() {
        let t0 = Instant::now();
        let mut tracker = SpeakerTracker::new(WINDOW);
        tracker.touch(SpeakerId(5), t0);
        tracker.touch(SpeakerId(6), t0 + Duration::from_millis(300));

        let now = t0 + Duration::from_millis(550);
        assert_eq!(tracker.evict(now), vec![SpeakerId(5)]);
        assert!(tracker.is_live(SpeakerId(6), now));
        assert_eq!(tracker.len(), 1);
    }
}
