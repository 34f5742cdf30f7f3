//! Streaming pitch extraction.
//!
//! Operates on raw waveform, independently of the base feature chain, and is
//! fused with the base feature by concatenation. Per frame it emits a
//! normalized cross-correlation peak (a voicing measure) and the log of the
//! corresponding fundamental frequency.

use crate::config::{FrameOptions, PitchOptions};
use crate::feat::stage::FeatureStage;

/// Output layout: `[nccf, log_f0]`.
pub const PITCH_DIM: usize = 2;

pub struct PitchStage {
    sample_rate: u32,
    frame_length: usize,
    frame_shift: usize,
    min_lag: usize,
    max_lag: usize,
    waveform: Vec<f32>,
    frames: Vec<Vec<f32>>,
    finished: bool,
}

impl PitchStage {
    pub fn new(opts: &PitchOptions, frame: &FrameOptions) -> Self {
        let rate = frame.sample_rate;
        // Lag bounds from the configured F0 search range.
        let min_lag = (rate as f32 / opts.max_f0).floor().max(1.0) as usize;
        let max_lag = (rate as f32 / opts.min_f0).ceil() as usize;
        Self {
            sample_rate: rate,
            frame_length: frame.frame_length(),
            frame_shift: frame.frame_shift(),
            min_lag,
            max_lag,
            waveform: Vec::new(),
            frames: Vec::new(),
            finished: false,
        }
    }

    fn pump(&mut self) {
        loop {
            let start = self.frames.len() * self.frame_shift;
            // The correlation window needs max_lag samples of look-ahead.
            let needed = start + self.frame_length + self.max_lag;
            if needed > self.waveform.len() {
                if !self.finished || start + self.frame_length > self.waveform.len() {
                    break;
                }
            }
            let feature = self.compute_frame(start);
            self.frames.push(feature);
        }
    }

    fn compute_frame(&self, start: usize) -> Vec<f32> {
        let window = &self.waveform[start..start + self.frame_length];
        let energy: f32 = window.iter().map(|x| x * x).sum();
        if energy <= f32::EPSILON {
            return vec![0.0, (self.sample_rate as f32 / self.max_lag as f32).ln()];
        }

        let mut best_nccf = 0.0f32;
        let mut best_lag = self.max_lag;
        for lag in self.min_lag..=self.max_lag {
            let end = (start + self.frame_length + lag).min(self.waveform.len());
            if end <= start + lag {
                break;
            }
            let n = end - start - lag;
            let mut cross = 0.0f32;
            let mut lag_energy = 0.0f32;
            for i in 0..n {
                let a = self.waveform[start + i];
                let b = self.waveform[start + lag + i];
                cross += a * b;
                lag_energy += b * b;
            }
            let denom = (energy * lag_energy).sqrt();
            if denom > f32::EPSILON {
                let nccf = cross / denom;
                if nccf > best_nccf {
                    best_nccf = nccf;
                    best_lag = lag;
                }
            }
        }

        let f0 = self.sample_rate as f32 / best_lag as f32;
        vec![best_nccf, f0.ln()]
    }
}

impl FeatureStage for PitchStage {
    fn dim(&self) -> usize {
        PITCH_DIM
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
        self.finished = true;
        self.pump();
    }

    fn input_done(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> (PitchOptions, FrameOptions) {
        (
            PitchOptions {
                enabled: true,
                min_f0: 50.0,
                max_f0: 400.0,
            },
            FrameOptions::default(),
        )
    }

    fn tone(freq: f32, secs: f32, rate: u32) -> Vec<f32> {
        (0..(secs * rate as f32) as usize)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_dim_is_two() {
        let (p, f) = opts();
        assert_eq!(PitchStage::new(&p, &f).dim(), PITCH_DIM);
    }

    #[test]
    fn test_lags_behind_base_until_finished() {
        // Pitch needs max_lag look-ahead, so with exactly one window of audio
        // no frame is ready until input_finished.
        let (p, f) = opts();
        let mut stage = PitchStage::new(&p, &f);
        stage.accept_waveform(16000, &tone(100.0, 0.025, 16000));
        assert_eq!(stage.frames_ready(), 0);
        stage.input_finished();
        assert_eq!(stage.frames_ready(), 1);
    }

    #[test]
    fn test_periodic_tone_recovers_f0() {
        let (p, f) = opts();
        let mut stage = PitchStage::new(&p, &f);
        stage.accept_waveform(16000, &tone(100.0, 0.5, 16000));
        let frame = stage.frame(0).unwrap();
        let nccf = frame[0];
        let f0 = frame[1].exp();
        assert!(nccf > 0.9, "tone should be strongly voiced, nccf={nccf}");
        assert!((f0 - 100.0).abs() < 10.0, "expected ~100Hz, got {f0}");
    }

    #[test]
    fn test_silence_is_unvoiced() {
        let (p, f) = opts();
        let mut stage = PitchStage::new(&p, &f);
        stage.accept_waveform(16000, &vec![0.0; 16000]);
        let frame = stage.frame(0).unwrap();
        assert_eq!(frame[0], 0.0);
    }

    #[test]
    fn test_frame_count_matches_base_framing_after_finish() {
        let (p, f) = opts();
        let mut stage = PitchStage::new(&p, &f);
        stage.accept_waveform(16000, &tone(150.0, 1.0, 16000));
        stage.input_finished();
        // Same framing as the base stage: (16000 - 400) / 160 + 1 = 98
        assert_eq!(stage.frames_ready(), 98);
    }
}
