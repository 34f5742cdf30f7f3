//! Base spectral feature stages: MFCC and log mel filterbank.
//!
//! Both share the same windowed short-time analysis: DC removal, Hamming
//! window, FFT power spectrum, mel filterbank integration. MFCC additionally
//! applies an orthonormal DCT-II and keeps the leading cepstra.

use crate::config::{FbankOptions, MfccOptions};
use crate::feat::stage::FeatureStage;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

const LOG_FLOOR: f32 = 1e-10;

fn hz_to_mel(hz: f32) -> f32 {
    1127.0 * (1.0 + hz / 700.0).ln()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * ((mel / 1127.0).exp() - 1.0)
}

/// Triangular mel filterbank over FFT power-spectrum bins.
struct MelBanks {
    /// Per mel bin: (first FFT bin, weights).
    filters: Vec<(usize, Vec<f32>)>,
}

impl MelBanks {
    fn new(num_bins: usize, fft_size: usize, sample_rate: u32, low_freq: f32, high_freq: f32) -> Self {
        let nyquist = sample_rate as f32 / 2.0;
        let high = if high_freq > 0.0 { high_freq } else { nyquist };
        let mel_low = hz_to_mel(low_freq);
        let mel_high = hz_to_mel(high);
        let mel_delta = (mel_high - mel_low) / (num_bins + 1) as f32;
        let num_fft_bins = fft_size / 2 + 1;
        let hz_per_bin = sample_rate as f32 / fft_size as f32;

        let mut filters = Vec::with_capacity(num_bins);
        for bin in 0..num_bins {
            let left = mel_low + bin as f32 * mel_delta;
            let center = left + mel_delta;
            let right = center + mel_delta;

            let mut first = None;
            let mut weights = Vec::new();
            for fft_bin in 0..num_fft_bins {
                let mel = hz_to_mel(fft_bin as f32 * hz_per_bin);
                if mel > left && mel < right {
                    let weight = if mel <= center {
                        (mel - left) / (center - left)
                    } else {
                        (right - mel) / (right - center)
                    };
                    if first.is_none() {
                        first = Some(fft_bin);
                    }
                    weights.push(weight);
                }
            }
            filters.push((first.unwrap_or(0), weights));
        }
        Self { filters }
    }

    fn apply(&self, power: &[f32]) -> Vec<f32> {
        self.filters
            .iter()
            .map(|(first, weights)| {
                weights
                    .iter()
                    .enumerate()
                    .map(|(i, w)| w * power[first + i])
                    .sum::<f32>()
            })
            .collect()
    }
}

/// Orthonormal DCT-II matrix rows (num_ceps x num_bins).
fn dct_matrix(num_ceps: usize, num_bins: usize) -> Vec<Vec<f32>> {
    let mut rows = Vec::with_capacity(num_ceps);
    let norm0 = (1.0 / num_bins as f32).sqrt();
    let norm = (2.0 / num_bins as f32).sqrt();
    for k in 0..num_ceps {
        let mut row = Vec::with_capacity(num_bins);
        for n in 0..num_bins {
            let angle = std::f32::consts::PI * k as f32 * (2 * n + 1) as f32 / (2 * num_bins) as f32;
            let scale = if k == 0 { norm0 } else { norm };
            row.push(scale * angle.cos());
        }
        rows.push(row);
    }
    rows
}

enum Post {
    /// Log mel energies.
    Fbank,
    /// DCT of log mel energies, leading coefficients.
    Mfcc { dct: Vec<Vec<f32>> },
}

/// Streaming windowed spectral extractor behind both base feature families.
pub struct SpectralStage {
    sample_rate: u32,
    frame_length: usize,
    frame_shift: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    mel: MelBanks,
    post: Post,
    dim: usize,

    waveform: Vec<f32>,
    frames: Vec<Vec<f32>>,
    finished: bool,
}

impl SpectralStage {
    pub fn mfcc(opts: &MfccOptions) -> Self {
        let frame_length = opts.frame.frame_length();
        let fft_size = frame_length.next_power_of_two();
        let mel = MelBanks::new(
            opts.num_mel_bins,
            fft_size,
            opts.frame.sample_rate,
            opts.low_freq,
            opts.high_freq,
        );
        Self::new(
            opts.frame.sample_rate,
            frame_length,
            opts.frame.frame_shift(),
            fft_size,
            mel,
            Post::Mfcc {
                dct: dct_matrix(opts.num_ceps, opts.num_mel_bins),
            },
            opts.num_ceps,
        )
    }

    pub fn fbank(opts: &FbankOptions) -> Self {
        let frame_length = opts.frame.frame_length();
        let fft_size = frame_length.next_power_of_two();
        let mel = MelBanks::new(
            opts.num_mel_bins,
            fft_size,
            opts.frame.sample_rate,
            opts.low_freq,
            opts.high_freq,
        );
        Self::new(
            opts.frame.sample_rate,
            frame_length,
            opts.frame.frame_shift(),
            fft_size,
            mel,
            Post::Fbank,
            opts.num_mel_bins,
        )
    }

    fn new(
        sample_rate: u32,
        frame_length: usize,
        frame_shift: usize,
        fft_size: usize,
        mel: MelBanks,
        post: Post,
        dim: usize,
    ) -> Self {
        let window = (0..frame_length)
            .map(|i| {
                0.54 - 0.46
                    * (2.0 * std::f32::consts::PI * i as f32 / (frame_length - 1) as f32).cos()
            })
            .collect();
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        Self {
            sample_rate,
            frame_length,
            frame_shift,
            window,
            fft,
            fft_size,
            mel,
            post,
            dim,
            waveform: Vec::new(),
            frames: Vec::new(),
            finished: false,
        }
    }

    /// Extract all frames whose full window is available.
    fn pump(&mut self) {
        loop {
            let start = self.frames.len() * self.frame_shift;
            if start + self.frame_length > self.waveform.len() {
                break;
            }
            let samples = &self.waveform[start..start + self.frame_length];
            let feature = self.compute_frame(samples);
            self.frames.push(feature);
        }
    }

    fn compute_frame(&self, samples: &[f32]) -> Vec<f32> {
        let mean = samples.iter().sum::<f32>() / samples.len() as f32;

        let mut buf: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); self.fft_size];
        for (i, (&s, &w)) in samples.iter().zip(self.window.iter()).enumerate() {
            buf[i] = Complex::new((s - mean) * w, 0.0);
        }
        self.fft.process(&mut buf);

        let power: Vec<f32> = buf[..self.fft_size / 2 + 1]
            .iter()
            .map(|c| c.norm_sqr())
            .collect();

        let log_mel: Vec<f32> = self
            .mel
            .apply(&power)
            .into_iter()
            .map(|e| e.max(LOG_FLOOR).ln())
            .collect();

        match &self.post {
            Post::Fbank => log_mel,
            Post::Mfcc { dct } => dct
                .iter()
                .map(|row| row.iter().zip(log_mel.iter()).map(|(a, b)| a * b).sum())
                .collect(),
        }
    }
}

impl FeatureStage for SpectralStage {
    fn dim(&self) -> usize {
        self.dim
    }

    fn frames_ready(&mut self) -> usize {
        self.pump();
        self.frames.len()
    }

    fn frame(&mut self, index: usize) -> Option<Vec<f32>> {
        self.pump();
        self.frames.get(index).cloned()
    }

    fn accept_waveform(&mut self, sample_rate: u32, samples: &[f32]) {
        debug_assert_eq!(sample_rate, self.sample_rate);
        if self.finished {
            return;
        }
        self.waveform.extend_from_slice(samples);
    }

    fn input_finished(&mut self) {
        // Trailing samples shorter than one window are discarded.
        self.finished = true;
        self.pump();
    }

    fn input_done(&self) -> bool {
        self.finished
    }
}
