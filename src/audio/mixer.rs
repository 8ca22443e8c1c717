use std::collections::{BTreeMap, VecDeque};

use super::frame::PcmFrame;
use crate::liveness::SpeakerId;

/// Frames buffered per speaker before the oldest ones are dropped.
const MAX_QUEUED_FRAMES: usize = 10;

/// Sum frames sample-by-sample, clipping to the i16 range.
///
/// Frames of different lengths are aligned at the start; missing samples
/// count as zero. Returns `None` when there is nothing to mix.
pub fn mix_frames<'a, I>(frames: I) -> Option<PcmFrame>
where
    I: IntoIterator<Item = &'a PcmFrame>,
{
    let mut frames = frames.into_iter();
    let mut mixed = frames.next()?.samples().to_vec();
    for frame in frames {
        if frame.len() > mixed.len() {
            mixed.resize(frame.len(), 0);
        }
        for (out, &sample) in mixed.iter_mut().zip(frame.samples()) {
            *out = out.saturating_add(sample);
        }
    }
    Some(PcmFrame::new(mixed))
}

/// Linear gain: multiply, round, then clip to the i16 range.
pub fn apply_volume(frame: PcmFrame, volume: f32) -> PcmFrame {
    if volume == 1.0 {
        return frame;
    }
    let scaled = frame
        .samples()
        .iter()
        .map(|&s| (s as f32 * volume).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect();
    PcmFrame::new(scaled)
}

/// Per-speaker frame queues combined into one output stream.
pub struct Mixer {
    queues: BTreeMap<SpeakerId, VecDeque<PcmFrame>>,
    volume: f32,
}

impl Mixer {
    pub fn new(volume: f32) -> Self {
        Self {
            queues: BTreeMap::new(),
            volume,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Queue a frame from a speaker, dropping its oldest frames on overflow.
    pub fn push(&mut self, speaker: SpeakerId, frame: PcmFrame) {
        let queue = self.queues.entry(speaker).or_default();
        queue.push_back(frame);
        while queue.len() > MAX_QUEUED_FRAMES {
            queue.pop_front();
        }
    }

    /// Forget a speaker and everything still queued for it.
    pub fn remove(&mut self, speaker: SpeakerId) {
        self.queues.remove(&speaker);
    }

    /// Pop the oldest frame of every speaker with audio queued and mix them,
    /// then apply the output volume. `None` when nobody has audio queued.
    pub fn mix_next(&mut self) -> Option<PcmFrame> {
        let heads: Vec<PcmFrame> = self
            .queues
            .values_mut()
            .filter_map(VecDeque::pop_front)
            .collect();
        self.queues.retain(|_, queue| !queue.is_empty());
        mix_frames(&heads).map(|frame| apply_volume(frame, self.volume))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: &[i16]) -> PcmFrame {
        PcmFrame::new(samples.to_vec())
    }

    #[test]
    fn two_speakers_sum() {
        let a = frame(&[100, -100, 100]);
        let b = frame(&[50, 50, 50]);
        let mixed = mix_frames([&a, &b]).unwrap();
        assert_eq!(mixed.samples(), &[150, -50, 150]);
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        let a = frame(&[30000, -30000, i16::MAX, i16::MIN]);
        let b = frame(&[10000, -10000, 1, -1]);
        let mixed = mix_frames([&a, &b]).unwrap();
        assert_eq!(mixed.samples(), &[i16::MAX, i16::MIN, i16::MAX, i16::MIN]);
    }

    #[test]
    fn single_frame_is_unchanged_at_unity() {
        let a = frame(&[1, -2, 3, i16::MIN, i16::MAX]);
        let mixed = apply_volume(mix_frames([&a]).unwrap(), 1.0);
        assert_eq!(mixed, a);
    }

    #[test]
    fn nothing_to_mix() {
        assert!(mix_frames(std::iter::empty::<&PcmFrame>()).is_none());
    }

    #[test]
    fn shorter_frames_pad_with_zero() {
        let a = frame(&[1, 1, 1, 1]);
        let b = frame(&[2, 2]);
        let mixed = mix_frames([&b, &a]).unwrap();
        assert_eq!(mixed.samples(), &[3, 3, 1, 1]);
    }

    #[test]
    fn volume_scales_and_clips() {
        let scaled = apply_volume(frame(&[100, -100, 20000, -20000]), 2.0);
        assert_eq!(scaled.samples(), &[200, -200, i16::MAX, i16::MIN]);

        let halved = apply_volume(frame(&[100, -101, 3]), 0.5);
        assert_eq!(halved.samples(), &[50, -51, 2]);

        let muted = apply_volume(frame(&[100, -100]), 0.0);
        assert_eq!(muted.samples(), &[0, 0]);
    }

    #[test]
    fn mixer_pops_one_frame_per_speaker() {
        let mut mixer = Mixer::new(1.0);
        mixer.push(SpeakerId(1), frame(&[100, -100, 100]));
        mixer.push(SpeakerId(1), frame(&[7, 7, 7]));
        mixer.push(SpeakerId(2), frame(&[50, 50, 50]));

        assert_eq!(mixer.mix_next().unwrap().samples(), &[150, -50, 150]);
        assert_eq!(mixer.mix_next().unwrap().samples(), &[7, 7, 7]);
        assert!(mixer.mix_next().is_none());
    }

    #[test]
    fn mixer_applies_volume_after_mixing() {
        let mut mixer = Mixer::new(0.5);
        mixer.push(SpeakerId(1), frame(&[30000]));
        mixer.push(SpeakerId(2), frame(&[30000]));
        // Saturates at i16::MAX before the gain is applied.
        assert_eq!(mixer.mix_next().unwrap().samples(), &[16384]);
    }

    #[test]
    fn mixer_bounds_each_queue() {
        let mut mixer = Mixer::new(1.0);
        for i in 0..(MAX_QUEUED_FRAMES as i16 + 5) {
            mixer.push(SpeakerId(3), frame(&[i]));
        }
        let mut drained = Vec::new();
        while let Some(frame) = mixer.mix_next() {
            drained.push(frame.samples()[0]);
        }
        assert_eq!(drained, (5..15).collect::<Vec<i16>>());
    }

    #[test]
    fn removed_speaker_is_not_mixed() {
        let mut mixer = Mixer::new(1.0);
        mixer.push(SpeakerId(1), frame(&[10]));
        mixer.push(SpeakerId(2), frame(&[20]));
        mixer.remove(SpeakerId(1));
        assert_eq!(mixer.mix_next().unwrap().samples(), &[20]);
    }
}
