//! Audio pipeline
//!
//! Capture, sample/wire codec, playback scheduling, and the output
//! frequency tap. The session module routes between these and the remote
//! service.

pub mod codec;
mod dsp;
pub mod playback;
pub mod visualizer;

mod capture;

pub use capture::{
    samples_to_wav, voice_energy, AudioCapture, CAPTURE_FRAME_SAMPLES, CAPTURE_SAMPLE_RATE,
};
pub use codec::WirePayload;
pub use playback::{
    Mixer, OutputStream, OutputTap, PlaybackScheduler, ScheduledUnit, UnitId,
    PLAYBACK_SAMPLE_RATE,
};
pub use visualizer::{Visualizer, FREQUENCY_BINS};
