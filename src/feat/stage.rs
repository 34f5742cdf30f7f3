//! The streaming transform stage interface.
//!
//! Every feature computation in the pipeline is a [`FeatureStage`]: it
//! consumes input incrementally and can emit output frames before all input
//! has arrived. Derived stages pull frames from an upstream stage handle;
//! only stages that consume raw audio override [`FeatureStage::accept_waveform`].

use std::cell::RefCell;
use std::rc::Rc;

/// A streaming, re-enterable signal transform.
///
/// Frames are indexed from zero for the lifetime of the chain. A stage may
/// answer `None` from [`frame`](Self::frame) for indices it has not produced
/// yet; once produced, a frame's value never changes.
pub trait FeatureStage {
    /// Output dimensionality. A pure function of the stage's configuration
    /// and its inputs' dimensionality.
    fn dim(&self) -> usize;

    /// Number of frames currently available, given the input seen so far.
    fn frames_ready(&mut self) -> usize;

    /// The feature vector for `index`, or `None` if not yet available.
    fn frame(&mut self, index: usize) -> Option<Vec<f32>>;

    /// Feed raw waveform. Only stages that consume audio directly (the base
    /// spectral stage and the pitch stage) override this; derived stages
    /// ignore it and pull frames from upstream instead.
    fn accept_waveform(&mut self, sample_rate: u32, samples: &[f32]) {
        let _ = (sample_rate, samples);
    }

    /// Signal that no further waveform will arrive, letting the stage flush
    /// any buffered look-ahead. Idempotent.
    fn input_finished(&mut self) {}

    /// True once `input_finished` has been observed upstream of this stage.
    /// Stages with look-ahead use this to clamp context at the end of input.
    fn input_done(&self) -> bool {
        false
    }
}

/// Shared handle to a stage. The chain is single-threaded per session, so
/// interior mutability with `Rc<RefCell<..>>` gives each downstream link an
/// owned reference to its upstream output without aliasing hazards.
pub type StageHandle = Rc<RefCell<dyn FeatureStage>>;

/// Wrap a stage into a shareable handle.
pub fn handle<S: FeatureStage + 'static>(stage: S) -> StageHandle {
    Rc::new(RefCell::new(stage))
}
