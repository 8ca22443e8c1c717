//! Fixed-size blocks of signed 16-bit mono PCM.

/// One packet worth of mono samples.
///
/// Frames are never mutated after they are produced; each pipeline stage
/// takes ownership of the frame from the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    samples: Box<[i16]>,
}

impl PcmFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Decode little-endian S16 bytes. A trailing odd byte is ignored.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(samples)
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

impl From<Vec<i16>> for PcmFrame {
    fn from(samples: Vec<i16>) -> Self {
        Self::new(samples)
    }
}

impl AsRef<[i16]> for PcmFrame {
    fn as_ref(&self) -> &[i16] {
        &self.samples
    }
}

/// Samples per frame for a sample rate and a packet length in seconds.
pub fn frame_samples(sample_rate: u32, packet_length: f64) -> usize {
    (sample_rate as f64 * packet_length).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_at_default_rate() {
        assert_eq!(frame_samples(48000, 0.02), 960);
        assert_eq!(frame_samples(48000, 0.01), 480);
        assert_eq!(frame_samples(16000, 0.02), 320);
    }

    #[test]
    fn le_bytes_layout() {
        let frame = PcmFrame::new(vec![1, -2, i16::MAX]);
        let bytes = frame.to_le_bytes();
        assert_eq!(bytes, vec![0x01, 0x00, 0xfe, 0xff, 0xff, 0x7f]);
        assert_eq!(PcmFrame::from_le_bytes(&bytes), frame);
    }

    #[test]
    fn odd_trailing_byte_is_dropped() {
        let frame = PcmFrame::from_le_bytes(&[0x10, 0x00, 0x20]);
        assert_eq!(frame.samples(), &[16]);
    }
}
