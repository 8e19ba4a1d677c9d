//! Frequency-domain sampling of the output signal
//!
//! Pull-based consumer of the playback tap: each call to `sample` windows
//! the most recent output audio and returns per-bin spectral energy for
//! display. Reading never affects playback.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::audio::playback::OutputTap;

/// Number of frequency bins returned per sample
pub const FREQUENCY_BINS: usize = 128;

/// Analysis window length (two samples per bin)
const FFT_SIZE: usize = FREQUENCY_BINS * 2;

/// Samples instantaneous frequency-bin energies from an [`OutputTap`]
pub struct Visualizer {
    tap: OutputTap,
    fft: Arc<dyn Fft<f32>>,
}

impl Visualizer {
    /// Create a visualizer reading from the given output tap
    #[must_use]
    pub fn new(tap: OutputTap) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(FFT_SIZE);
        Self { tap, fft }
    }

    /// Read the latest output window and return its bin energies
    ///
    /// Energies are normalized amplitudes in roughly [0, 1] for full-scale
    /// audio. An empty or silent tap yields all-zero bins.
    #[must_use]
    pub fn sample(&self) -> [f32; FREQUENCY_BINS] {
        let mut window = [0.0f32; FFT_SIZE];
        self.tap.read_latest(&mut window);

        let mut buffer: Vec<Complex<f32>> = window
            .iter()
            .enumerate()
            .map(|(i, &s)| Complex {
                re: s * hann(i, FFT_SIZE),
                im: 0.0,
            })
            .collect();

        self.fft.process(&mut buffer);

        let scale = 2.0 / FFT_SIZE as f32;
        let mut bins = [0.0f32; FREQUENCY_BINS];
        for (bin, value) in bins.iter_mut().zip(&buffer[..FREQUENCY_BINS]) {
            *bin = value.norm() * scale;
        }
        bins
    }
}

/// Hann window coefficient for position `i` of `len`
fn hann(i: usize, len: usize) -> f32 {
    let phase = 2.0 * std::f32::consts::PI * i as f32 / len as f32;
    0.5 * (1.0 - phase.cos())
}
