//! Configuration management for the Nexus voice client

use std::time::Duration;

use crate::{Error, Result};

/// Default interval between idle nudges sent to the remote voice
const DEFAULT_IDLE_NUDGE_SECS: u64 = 25;

/// Default RMS energy above which captured audio counts as the user speaking
const DEFAULT_VOICE_ENERGY_THRESHOLD: f32 = 0.01;

/// Nexus voice client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the live session service (from `NEXUS_API_KEY` or
    /// `GEMINI_API_KEY`). Absence is not fatal at load time: the caller
    /// surfaces a disabled state and `connect` refuses to dial.
    pub api_key: Option<String>,

    /// Live model identifier
    pub model: String,

    /// Prebuilt voice name for synthesized speech
    pub voice_name: String,

    /// How long the session may sit silent before a nudge is sent
    pub idle_nudge_interval: Duration,

    /// RMS energy threshold that resets the idle timer
    pub voice_energy_threshold: f32,
}

impl Config {
    /// Load configuration from the process environment
    ///
    /// Never fails: every field has a default except the API key, which
    /// stays `None` and is checked at connect time.
    #[must_use]
    pub fn from_env() -> Self {
        let api_key = std::env::var("NEXUS_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .ok();

        let model = std::env::var("NEXUS_MODEL")
            .unwrap_or_else(|_| "gemini-2.5-flash-native-audio-preview-09-2025".to_string());

        let voice_name =
            std::env::var("NEXUS_VOICE").unwrap_or_else(|_| "Fenrir".to_string());

        let idle_nudge_interval = std::env::var("NEXUS_IDLE_NUDGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map_or(
                Duration::from_secs(DEFAULT_IDLE_NUDGE_SECS),
                Duration::from_secs,
            );

        Self {
            api_key,
            model,
            voice_name,
            idle_nudge_interval,
            voice_energy_threshold: DEFAULT_VOICE_ENERGY_THRESHOLD,
        }
    }

    /// Return the API key or a configuration error explaining how to set it
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no key is present in the environment.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            Error::Config(
                "no API key found; set NEXUS_API_KEY (or GEMINI_API_KEY)".to_string(),
            )
        })
    }
}
