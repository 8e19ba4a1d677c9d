//! Nexus Voice - real-time voice session client for live conversational AI
//!
//! Streams microphone audio to a hosted conversational-AI service and plays
//! the synthesized replies back, reshaping playback (rate, volume, tonal
//! filtering) from a running sentiment read of the voice's own transcript.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Session Controller                    │
//! │  capture ─▸ codec ─▸ live session ─▸ codec ─▸ mixer  │
//! │                └─ transcript ─▸ prosody ─┘           │
//! └──────────────────────┬───────────────────────────────┘
//!                        │ tap
//! ┌──────────────────────▼───────────────────────────────┐
//! │                    Visualizer                         │
//! │          frequency bins for the front-end             │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod persona;
pub mod prosody;
pub mod session;

pub use audio::{
    AudioCapture, OutputStream, OutputTap, PlaybackScheduler, Visualizer, WirePayload,
    CAPTURE_SAMPLE_RATE, FREQUENCY_BINS, PLAYBACK_SAMPLE_RATE,
};
pub use config::Config;
pub use error::{Error, Result};
pub use persona::Persona;
pub use prosody::{analyze, ModulationProfile};
pub use session::{
    LiveSession, ServerEvent, SessionController, SessionSetup, SessionTransport, Status,
};
