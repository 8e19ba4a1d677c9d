//! Transcript-driven prosody analysis
//!
//! Maps the latest transcript fragment of the remote voice's speech to a
//! modulation profile for playback. Rules are ordered and first-match-wins;
//! a fragment that reads both secretive and hostile whispers, because the
//! whisper rule is checked first. The derived profile applies to the *next*
//! scheduled chunk: the transcript for a chunk arrives alongside or just
//! before its audio, so modulation intentionally lags one step.

use std::sync::LazyLock;

use regex::Regex;

/// Minimum length before an all-uppercase fragment counts as shouting
const SHOUT_MIN_CHARS: usize = 8;

static WHISPER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"secret|dark ?web|hacker|hacking|chupke|don't tell|quiet|shhh|khufiya|hidden")
        .expect("whisper pattern is valid")
});

static HOSTILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!{2,}|hate|kill|stupid|idiot|bawal|gussa|pagal|shut up|bakchodi|angry|jaldi")
        .expect("hostile pattern is valid")
});

static EXCITED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"haha|lol|mast|crazy|omg|wow|bhai").expect("excited pattern is valid")
});

static WEARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"sad|tired|sleep|boring|bekar|udaas|sigh|hmm").expect("weary pattern is valid")
});

/// How the next playback unit should be shaped
///
/// `rate` and `volume` are always strictly positive; `tonal_cutoff` of
/// `None` means unfiltered; `bass_gain_db` is a non-negative shelf gain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModulationProfile {
    /// Playback speed multiplier
    pub rate: f32,

    /// Gain applied after filtering
    pub volume: f32,

    /// Low-pass cutoff in Hz, or `None` for no filtering
    pub tonal_cutoff: Option<f32>,

    /// Low-shelf boost in dB around 200Hz
    pub bass_gain_db: f32,
}

impl Default for ModulationProfile {
    /// Neutral voice: near-unity rate, slightly boosted volume, light bass
    fn default() -> Self {
        Self {
            rate: 1.05,
            volume: 1.1,
            tonal_cutoff: None,
            bass_gain_db: 2.5,
        }
    }
}

impl ModulationProfile {
    /// Whispering: slow, quiet, muffled, with the low end kept warm
    #[must_use]
    pub const fn whisper() -> Self {
        Self {
            rate: 0.82,
            volume: 0.35,
            tonal_cutoff: Some(2200.0),
            bass_gain_db: 7.0,
        }
    }

    /// Shouting or roasting: fast, loud, unfiltered
    #[must_use]
    pub const fn aggressive() -> Self {
        Self {
            rate: 1.3,
            volume: 1.8,
            tonal_cutoff: None,
            bass_gain_db: 1.0,
        }
    }

    /// Laughing or hyped: energetic but not hostile
    #[must_use]
    pub const fn excited() -> Self {
        Self {
            rate: 1.15,
            volume: 1.25,
            tonal_cutoff: None,
            bass_gain_db: 2.0,
        }
    }

    /// Sad or sleepy: slow, slightly quiet, dulled highs, heavy lows
    #[must_use]
    pub const fn melancholic() -> Self {
        Self {
            rate: 0.9,
            volume: 0.85,
            tonal_cutoff: Some(4000.0),
            bass_gain_db: 6.0,
        }
    }
}

/// Derive the modulation profile for a transcript fragment
///
/// Empty or whitespace-only text yields the default profile.
#[must_use]
pub fn analyze(text: &str) -> ModulationProfile {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ModulationProfile::default();
    }

    let lowered = trimmed.to_lowercase();

    if WHISPER.is_match(&lowered) {
        return ModulationProfile::whisper();
    }

    if HOSTILE.is_match(&lowered) || is_shouted(trimmed) {
        return ModulationProfile::aggressive();
    }

    if EXCITED.is_match(&lowered) {
        return ModulationProfile::excited();
    }

    if trimmed.ends_with("...") || WEARY.is_match(&lowered) {
        return ModulationProfile::melancholic();
    }

    ModulationProfile::default()
}

/// All-caps text beyond a few words reads as shouting
fn is_shouted(text: &str) -> bool {
    text.chars().count() > SHOUT_MIN_CHARS
        && text.chars().any(char::is_alphabetic)
        && !text.chars().any(char::is_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_neutral() {
        assert_eq!(analyze(""), ModulationProfile::default());
        assert_eq!(analyze("   "), ModulationProfile::default());
    }

    #[test]
    fn secret_talk_whispers() {
        let profile = analyze("let me tell you about the dark web");
        assert_eq!(profile, ModulationProfile::whisper());
        assert!(profile.volume <= 0.4);
        assert!(profile.tonal_cutoff.unwrap() <= 2500.0);
    }

    #[test]
    fn whisper_outranks_aggression() {
        // Both vocabularies present: rule order resolves to whisper
        let profile = analyze("I HATE that this secret got out!!");
        assert_eq!(profile, ModulationProfile::whisper());
    }

    #[test]
    fn hostile_vocabulary_is_aggressive() {
        assert_eq!(analyze("shut up yaar"), ModulationProfile::aggressive());
        assert_eq!(analyze("kitna gussa hai"), ModulationProfile::aggressive());
    }

    #[test]
    fn repeated_exclamations_are_aggressive() {
        assert_eq!(analyze("no way!!"), ModulationProfile::aggressive());
        // A single exclamation mark is not shouting
        assert_ne!(analyze("no way!"), ModulationProfile::aggressive());
    }

    #[test]
    fn all_caps_is_aggressive() {
        assert_eq!(
            analyze("WHY WOULD YOU DO THAT"),
            ModulationProfile::aggressive()
        );
        // Too short to count as shouting
        assert_ne!(analyze("OK"), ModulationProfile::aggressive());
        // Digits and punctuation alone never shout
        assert_ne!(analyze("123456789!?"), ModulationProfile::aggressive());
    }

    #[test]
    fn laughter_is_excited() {
        assert_eq!(analyze("hahaha that's crazy"), ModulationProfile::excited());
    }

    #[test]
    fn trailing_ellipsis_is_melancholic() {
        assert_eq!(analyze("I don't know anymore..."), ModulationProfile::melancholic());
        assert_eq!(analyze("feeling so tired today"), ModulationProfile::melancholic());
    }

    #[test]
    fn plain_speech_is_neutral() {
        let profile = analyze("what do you want to talk about today");
        assert_eq!(profile, ModulationProfile::default());
        assert!(profile.rate > 0.0);
        assert!(profile.volume > 0.0);
    }

    #[test]
    fn every_profile_is_strictly_positive() {
        for text in ["", "secret", "hate!!", "lol", "tired...", "hello there"] {
            let profile = analyze(text);
            assert!(profile.rate > 0.0, "rate must stay positive for {text:?}");
            assert!(profile.volume > 0.0, "volume must stay positive for {text:?}");
            assert!(profile.bass_gain_db >= 0.0);
        }
    }
}
