//! Online cepstral mean/variance normalization.
//!
//! Normalization statistics start from global stats estimated offline and
//! are refined with the frames seen so far, so early frames are usable
//! before much speaker audio has arrived.

use crate::config::CmvnOptions;
use crate::feat::stage::{FeatureStage, StageHandle};
use crate::model::CmvnStats;

const VAR_FLOOR: f32 = 1e-8;

pub struct CmvnStage {
    source: StageHandle,
    opts: CmvnOptions,
    dim: usize,
    /// Prior statistics from the model bundle.
    global: CmvnStats,
    /// Accumulated first/second moments of frames consumed so far.
    sum: Vec<f32>,
    sum_sq: Vec<f32>,
    seen: usize,
    frames: Vec<Vec<f32>>,
}

impl CmvnStage {
    pub fn new(opts: CmvnOptions, global: CmvnStats, source: StageHandle) -> Self {
        let dim = source.borrow().dim();
        debug_assert_eq!(global.mean.len(), dim);
        Self {
            source,
            opts,
            dim,
            global,
            sum: vec![0.0; dim],
            sum_sq: vec![0.0; dim],
            seen: 0,
            frames: Vec::new(),
        }
    }

    /// Consume newly available upstream frames in order.
    fn pump(&mut self) {
        loop {
            let next = self.frames.len();
            let Some(raw) = self.source.borrow_mut().frame(next) else {
                break;
            };
            for (i, &x) in raw.iter().enumerate() {
                self.sum[i] += x;
                self.sum_sq[i] += x * x;
            }
            self.seen += 1;

            let count = self.global.count + self.seen as f32;
            let normalized: Vec<f32> = raw
                .iter()
                .enumerate()
                .map(|(i, &x)| {
                    let mean =
                        (self.global.mean[i] * self.global.count + self.sum[i]) / count;
                    let centered = x - mean;
                    if self.opts.normalize_variance {
                        let second =
                            (self.global.var[i] * self.global.count + self.sum_sq[i]) / count;
                        let var = (second - mean * mean).max(VAR_FLOOR);
                        centered / var.sqrt()
                    } else {
                        centered
                    }
                })
                .collect();
            self.frames.push(normalized);
        }
    }
}

impl FeatureStage for CmvnStage {
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

    fn input_done(&self) -> bool {
        self.source.borrow().input_done()
    }
}
