//! Online i-vector estimation.
//!
//! Summarizes speaker/channel characteristics as a fixed-length embedding:
//! a projection of the running mean of the *un-transformed* base feature.
//! The estimate at frame `t` uses every base frame up to and including `t`,
//! so it sharpens as the utterance progresses.

use crate::feat::stage::{FeatureStage, StageHandle};
use crate::model::IvectorExtractor;
use ndarray::Array2;

pub struct IvectorStage {
    /// The base feature stage, shared with the main chain.
    source: StageHandle,
    projection: Array2<f32>,
    base_dim: usize,
    /// Cumulative sums of base frames, one entry per frame consumed.
    cumulative: Vec<Vec<f32>>,
}

impl IvectorStage {
    pub fn new(extractor: &IvectorExtractor, source: StageHandle) -> Self {
        let base_dim = source.borrow().dim();
        debug_assert_eq!(extractor.projection.ncols(), base_dim);
        Self {
            source,
            projection: extractor.projection.clone(),
            base_dim,
            cumulative: Vec::new(),
        }
    }

    fn pump(&mut self) {
        loop {
            let next = self.cumulative.len();
            let Some(frame) = self.source.borrow_mut().frame(next) else {
                break;
            };
            let mut sum = frame;
            if let Some(prev) = self.cumulative.last() {
                for (s, p) in sum.iter_mut().zip(prev.iter()) {
                    *s += p;
                }
            }
            self.cumulative.push(sum);
        }
    }
}

impl FeatureStage for IvectorStage {
    fn dim(&self) -> usize {
        self.projection.nrows()
    }

    fn frames_ready(&mut self) -> usize {
        self.pump();
        self.cumulative.len()
    }

    fn frame(&mut self, index: usize) -> Option<Vec<f32>> {
        self.pump();
        let sum = self.cumulative.get(index)?;
        let count = (index + 1) as f32;
        let out = self
            .projection
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .zip(sum.iter())
                    .map(|(p, s)| p * (s / count))
                    .sum()
            })
            .collect();
        Some(out)
    }

    fn input_done(&self) -> bool {
        self.source.borrow().input_done()
    }
}
