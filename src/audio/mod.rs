//! audio - PCM frames, level detection, mixing and device I/O
//!
//! Everything here works on fixed-size frames of 16-bit mono samples. ALSA
//! and named pipes sit behind the same `FrameSource`/`FrameSink` traits so
//! the capture and playback loops never care which one they talk to.

pub mod alsa_device;
mod device;
mod frame;
mod level;
mod mixer;
pub mod opus_codec;
mod pipe;

pub use alsa_device::{AlsaCapture, AlsaPlayback, DeviceList, enumerate_devices};
pub use device::{FrameSink, FrameSource, StreamDirection};
pub use frame::{PcmFrame, frame_samples};
pub use level::{Activity, ActivityDetector, peak};
pub use mixer::{Mixer, apply_volume, mix_frames};
pub use pipe::{PipeSink, PipeSource};
