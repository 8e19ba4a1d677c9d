//! Playback scheduling and audio output
//!
//! Decoded frames are scheduled back-to-back on the output device's clock:
//! each unit starts at the later of the previous unit's end or the current
//! clock, so playback is gap-free without overlap. Every unit is rendered
//! through a fixed chain before it reaches the mixer: bass shelf, tonal
//! cutoff, gain, then the playback-rate change. The bass shelf runs before
//! the cutoff so whisper-mode low-pass keeps the boosted low end.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;

use crate::audio::dsp::Biquad;
use crate::prosody::ModulationProfile;
use crate::{Error, Result};

/// Sample rate for playback (matches the service's synthesized audio)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Center frequency of the bass-boost shelf
const BASS_SHELF_HZ: f32 = 200.0;

/// Upper bound on concurrently scheduled units. The service sends one chunk
/// per message and chunks retire as they play, so a backlog this deep means
/// the remote has run far ahead; further chunks are refused until it drains.
const MAX_ACTIVE_UNITS: usize = 64;

/// Samples retained in the post-gain tap ring for the visualizer
const TAP_CAPACITY: usize = 4096;

/// Identifier for one scheduled playback unit
pub type UnitId = u64;

/// Handle describing a unit placed on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledUnit {
    /// Identifier usable with [`PlaybackScheduler::stop`]
    pub id: UnitId,

    /// Start position on the device clock, in seconds
    pub start_time: f64,

    /// Audible length in seconds (frame duration divided by playback rate)
    pub duration: f64,
}

struct ActiveUnit {
    id: UnitId,
    start_sample: u64,
    samples: Vec<f32>,
    cursor: usize,
}

/// The output timeline: device clock, active units, and the post-gain tap
///
/// `render` is the only mutation path once units are scheduled; the output
/// stream's callback drains it, and tests drive it directly.
pub struct Mixer {
    clock_samples: u64,
    units: Vec<ActiveUnit>,
    tap: VecDeque<f32>,
}

impl Mixer {
    fn new() -> Self {
        Self {
            clock_samples: 0,
            units: Vec::new(),
            tap: VecDeque::with_capacity(TAP_CAPACITY),
        }
    }

    /// Current device clock position in seconds
    #[must_use]
    pub fn now(&self) -> f64 {
        self.clock_samples as f64 / f64::from(PLAYBACK_SAMPLE_RATE)
    }

    /// Number of units still scheduled or playing
    #[must_use]
    pub fn active_units(&self) -> usize {
        self.units.len()
    }

    /// Mix the next `out.len()` samples of the timeline into `out`
    ///
    /// Units whose buffers are exhausted are retired afterwards, which is
    /// what removes them from the active set when playback finishes
    /// naturally.
    pub fn render(&mut self, out: &mut [f32]) {
        for (i, slot) in out.iter_mut().enumerate() {
            let position = self.clock_samples + i as u64;
            let mut mixed = 0.0f32;

            for unit in &mut self.units {
                if position >= unit.start_sample && unit.cursor < unit.samples.len() {
                    mixed += unit.samples[unit.cursor];
                    unit.cursor += 1;
                }
            }

            *slot = mixed;
            if self.tap.len() == TAP_CAPACITY {
                self.tap.pop_front();
            }
            self.tap.push_back(mixed);
        }

        self.clock_samples += out.len() as u64;
        self.units.retain(|u| u.cursor < u.samples.len());
    }

    fn read_tap(&self, out: &mut [f32]) {
        out.fill(0.0);
        let take = out.len().min(self.tap.len());
        let skip = self.tap.len() - take;
        let pad = out.len() - take;
        for (slot, &sample) in out[pad..].iter_mut().zip(self.tap.iter().skip(skip)) {
            *slot = sample;
        }
    }
}

/// Read-only view of the post-gain output signal
///
/// Cheap to clone; purely observational, never affects audio output.
#[derive(Clone)]
pub struct OutputTap {
    mixer: Arc<Mutex<Mixer>>,
}

impl OutputTap {
    /// Copy the most recent output samples into `out`, oldest first
    ///
    /// If fewer samples have been rendered than `out` holds, the front is
    /// zero-padded.
    pub fn read_latest(&self, out: &mut [f32]) {
        if let Ok(mixer) = self.mixer.lock() {
            mixer.read_tap(out);
        } else {
            out.fill(0.0);
        }
    }
}

/// Schedules decoded frames onto the mixer timeline
pub struct PlaybackScheduler {
    mixer: Arc<Mutex<Mixer>>,
    running_end_time: f64,
    next_unit_id: UnitId,
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackScheduler {
    /// Create a scheduler with a fresh output timeline
    #[must_use]
    pub fn new() -> Self {
        Self {
            mixer: Arc::new(Mutex::new(Mixer::new())),
            running_end_time: 0.0,
            next_unit_id: 0,
        }
    }

    /// Shared handle to the mixer, for an [`OutputStream`] to drain
    #[must_use]
    pub fn mixer(&self) -> Arc<Mutex<Mixer>> {
        Arc::clone(&self.mixer)
    }

    /// Read-only tap on the output chain, for the visualizer
    #[must_use]
    pub fn tap(&self) -> OutputTap {
        OutputTap {
            mixer: Arc::clone(&self.mixer),
        }
    }

    /// Current device clock position in seconds
    #[must_use]
    pub fn now(&self) -> f64 {
        self.mixer.lock().map_or(0.0, |m| m.now())
    }

    /// Number of units still scheduled or playing
    #[must_use]
    pub fn active_units(&self) -> usize {
        self.mixer.lock().map_or(0, |m| m.active_units())
    }

    /// End of the last scheduled unit on the device clock
    #[must_use]
    pub const fn running_end_time(&self) -> f64 {
        self.running_end_time
    }

    /// Schedule a decoded frame as the next playback unit
    ///
    /// The unit starts at `max(running_end_time, now)` and the frame is
    /// rendered through the modulation chain described in the module docs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] for an empty frame or when the active-unit
    /// cap is reached; the caller drops the chunk and continues.
    pub fn schedule_next(
        &mut self,
        frame: &[f32],
        profile: &ModulationProfile,
        now: f64,
    ) -> Result<ScheduledUnit> {
        if frame.is_empty() {
            return Err(Error::Audio("cannot schedule an empty frame".to_string()));
        }

        let start_time = self.running_end_time.max(now);
        let duration =
            frame.len() as f64 / f64::from(PLAYBACK_SAMPLE_RATE) / f64::from(profile.rate);
        let samples = render_unit(frame, profile);

        let id = self.next_unit_id;
        let unit = ScheduledUnit {
            id,
            start_time,
            duration,
        };

        {
            let mut mixer = self
                .mixer
                .lock()
                .map_err(|_| Error::Audio("mixer lock poisoned".to_string()))?;
            if mixer.units.len() >= MAX_ACTIVE_UNITS {
                return Err(Error::Audio(format!(
                    "playback backlog full ({MAX_ACTIVE_UNITS} units)"
                )));
            }
            mixer.units.push(ActiveUnit {
                id,
                start_sample: (start_time * f64::from(PLAYBACK_SAMPLE_RATE)).round() as u64,
                samples,
                cursor: 0,
            });
        }

        self.next_unit_id += 1;
        self.running_end_time = start_time + duration;

        tracing::trace!(
            id,
            start = start_time,
            duration,
            rate = profile.rate,
            volume = profile.volume,
            "scheduled playback unit"
        );

        Ok(unit)
    }

    /// Stop one unit early and remove it from the active set
    pub fn stop(&mut self, id: UnitId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.units.retain(|u| u.id != id);
        }
    }

    /// Stop every active unit immediately and clear the set
    ///
    /// `running_end_time` resets to the device clock's current value rather
    /// than zero; a zero reset would put the next unit's start time in the
    /// past and misorder the timeline. Idempotent: calling with an empty
    /// active set is a no-op.
    pub fn interrupt_all(&mut self, now: f64) {
        if let Ok(mut mixer) = self.mixer.lock() {
            if !mixer.units.is_empty() {
                tracing::debug!(stopped = mixer.units.len(), "interrupted playback");
            }
            mixer.units.clear();
        }
        self.running_end_time = now;
    }
}

/// Render a frame through the modulation chain
///
/// Chain order is fixed: bass shelf, tonal cutoff, gain, rate.
fn render_unit(frame: &[f32], profile: &ModulationProfile) -> Vec<f32> {
    let mut samples = frame.to_vec();

    if profile.bass_gain_db > 0.0 {
        Biquad::low_shelf(
            PLAYBACK_SAMPLE_RATE as f32,
            BASS_SHELF_HZ,
            profile.bass_gain_db,
        )
        .process(&mut samples);
    }

    if let Some(cutoff) = profile.tonal_cutoff {
        Biquad::low_pass(PLAYBACK_SAMPLE_RATE as f32, cutoff).process(&mut samples);
    }

    for sample in &mut samples {
        *sample *= profile.volume;
    }

    if (profile.rate - 1.0).abs() > f32::EPSILON {
        apply_rate(&samples, profile.rate)
    } else {
        samples
    }
}

/// Resample by linear interpolation to realize the playback-rate change
fn apply_rate(samples: &[f32], rate: f32) -> Vec<f32> {
    let out_len = ((samples.len() as f64 / f64::from(rate)).round() as usize).max(1);
    (0..out_len)
        .map(|i| {
            let position = i as f64 * f64::from(rate);
            let index = position as usize;
            let frac = (position - index as f64) as f32;
            let a = samples.get(index).copied().unwrap_or(0.0);
            let b = samples.get(index + 1).copied().unwrap_or(a);
            a + (b - a) * frac
        })
        .collect()
}

/// Plays the mixer timeline on the default output device
pub struct OutputStream {
    _stream: cpal::Stream,
}

impl OutputStream {
    /// Open the default output device and start draining the mixer
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if no output device is available or no
    /// 24kHz configuration can be negotiated.
    pub fn open(mixer: Arc<Mutex<Mixer>>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: stereo, duplicating the mono signal
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Device("no suitable output config found".to_string()))?;

        let config = supported
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();
        let channels = config.channels as usize;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio output initialized"
        );

        let mut mono: Vec<f32> = Vec::new();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    mono.resize(data.len() / channels, 0.0);
                    if let Ok(mut mixer) = mixer.lock() {
                        mixer.render(&mut mono);
                    }
                    for (frame, &sample) in data.chunks_mut(channels).zip(&mono) {
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio output error");
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        Ok(Self { _stream: stream })
    }
}
