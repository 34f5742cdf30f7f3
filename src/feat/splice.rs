//! Temporal context splicing.
//!
//! Stacks each frame with its left/right neighbours. Frames near the edges
//! of the utterance reuse the first/last available frame for the missing
//! context, matching the transform-estimation convention.

use crate::config::SpliceOptions;
use crate::feat::stage::{FeatureStage, StageHandle};

pub struct SpliceStage {
    source: StageHandle,
    left: usize,
    right: usize,
    dim: usize,
}

impl SpliceStage {
    pub fn new(opts: &SpliceOptions, source: StageHandle) -> Self {
        let in_dim = source.borrow().dim();
        Self {
            source,
            left: opts.left_context,
            right: opts.right_context,
            dim: in_dim * (opts.left_context + opts.right_context + 1),
        }
    }
}

impl FeatureStage for SpliceStage {
    fn dim(&self) -> usize {
        self.dim
    }

    fn frames_ready(&mut self) -> usize {
        let mut source = self.source.borrow_mut();
        let ready = source.frames_ready();
        if source.input_done() {
            ready
        } else {
            // Hold frames back until their right context exists.
            ready.saturating_sub(self.right)
        }
    }

    fn frame(&mut self, index: usize) -> Option<Vec<f32>> {
        if index >= self.frames_ready() {
            return None;
        }
        let mut source = self.source.borrow_mut();
        let last = source.frames_ready() - 1;

        let mut out = Vec::with_capacity(self.dim);
        for offset in -(self.left as isize)..=(self.right as isize) {
            let neighbour = (index as isize + offset).clamp(0, last as isize) as usize;
            out.extend(source.frame(neighbour)?);
        }
        Some(out)
    }

    fn input_done(&self) -> bool {
        self.source.borrow().input_done()
    }
}
