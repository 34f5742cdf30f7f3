//! Delta (and delta-delta) feature computation.
//!
//! Appends regression coefficients over a sliding window to each frame.
//! Order `n` output is `(n + 1) * input_dim` wide. Edge frames clamp the
//! regression window to the available range.

use crate::config::DeltaOptions;
use crate::feat::stage::{FeatureStage, StageHandle};

pub struct DeltaStage {
    source: StageHandle,
    order: usize,
    window: usize,
    in_dim: usize,
}

impl DeltaStage {
    pub fn new(opts: &DeltaOptions, source: StageHandle) -> Self {
        let in_dim = source.borrow().dim();
        Self {
            source,
            order: opts.order.max(1),
            window: opts.window.max(1),
            in_dim,
        }
    }

    /// Regression normalizer: 2 * sum of squared offsets.
    fn norm(&self) -> f32 {
        2.0 * (1..=self.window).map(|j| (j * j) as f32).sum::<f32>()
    }

    /// Order-`order` coefficients at `index`, clamping neighbours to
    /// `[0, last]`.
    fn compute(
        &self,
        source: &mut dyn FeatureStage,
        order: usize,
        index: isize,
        last: usize,
    ) -> Option<Vec<f32>> {
        let clamped = index.clamp(0, last as isize) as usize;
        if order == 0 {
            return source.frame(clamped);
        }
        let norm = self.norm();
        let mut out = vec![0.0; self.in_dim];
        for j in 1..=self.window as isize {
            let ahead = self.compute(source, order - 1, clamped as isize + j, last)?;
            let behind = self.compute(source, order - 1, clamped as isize - j, last)?;
            for ((o, a), b) in out.iter_mut().zip(ahead.iter()).zip(behind.iter()) {
                *o += j as f32 * (a - b) / norm;
            }
        }
        Some(out)
    }
}

impl FeatureStage for DeltaStage {
    fn dim(&self) -> usize {
        self.in_dim * (self.order + 1)
    }

    fn frames_ready(&mut self) -> usize {
        let mut source = self.source.borrow_mut();
        let ready = source.frames_ready();
        if source.input_done() {
            ready
        } else {
            ready.saturating_sub(self.order * self.window)
        }
    }

    fn frame(&mut self, index: usize) -> Option<Vec<f32>> {
        if index >= self.frames_ready() {
            return None;
        }
        let mut source = self.source.borrow_mut();
        let last = source.frames_ready() - 1;

        let mut out = Vec::with_capacity(self.dim());
        for order in 0..=self.order {
            out.extend(self.compute(&mut *source, order, index as isize, last)?);
        }
        Some(out)
    }

    fn input_done(&self) -> bool {
        self.source.borrow().input_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feat::stage::handle;
    use crate::feat::stage::testing::FixedStage;
    use approx::assert_relative_eq;

    fn delta_opts(order: usize, window: usize) -> DeltaOptions {
        DeltaOptions {
            enabled: true,
            order,
            window,
        }
    }

    fn ramp(n: usize) -> Vec<Vec<f32>> {
        (0..n).map(|i| vec![i as f32]).collect()
    }

    #[test]
    fn test_dim_scales_with_order() {
        let src = handle(FixedStage::new(13, vec![]));
        let stage = DeltaStage::new(&delta_opts(2, 2), src);
        assert_eq!(stage.dim(), 39);
    }

    #[test]
    fn test_holds_back_lookahead() {
        let src = handle(FixedStage::new(1, ramp(10)));
        let mut stage = DeltaStage::new(&delta_opts(2, 2), src);
        // order * window = 4 frames of look-ahead required
        assert_eq!(stage.frames_ready(), 6);
    }

    #[test]
    fn test_linear_ramp_has_unit_delta() {
        // For x(t) = t, the regression slope is exactly 1 away from edges.
        let src = handle(FixedStage::new(1, ramp(20)));
        let mut stage = DeltaStage::new(&delta_opts(1, 2), src);
        let frame = stage.frame(10).unwrap();
        assert_relative_eq!(frame[0], 10.0);
        assert_relative_eq!(frame[1], 1.0);
    }

    #[test]
    fn test_constant_input_has_zero_deltas() {
        let src = handle(FixedStage::new(1, vec![vec![3.0]; 12]));
        let mut stage = DeltaStage::new(&delta_opts(2, 2), src);
        let frame = stage.frame(4).unwrap();
        assert_relative_eq!(frame[0], 3.0);
        assert_relative_eq!(frame[1], 0.0);
        assert_relative_eq!(frame[2], 0.0);
    }

    #[test]
    fn test_tail_released_after_input_finished() {
        let src = handle(FixedStage::new(1, ramp(5)));
        let mut stage = DeltaStage::new(&delta_opts(1, 2), src.clone());
        assert_eq!(stage.frames_ready(), 3);
        src.borrow_mut().input_finished();
        assert_eq!(stage.frames_ready(), 5);
        assert!(stage.frame(4).is_some());
    }
}
