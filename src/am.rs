//! Acoustic model and per-frame scoring.
//!
//! The model maps transition ids (the automaton's input labels) to
//! probability density functions and phones, and provides diagonal-Gaussian
//! log-likelihoods. The [`AcousticScorer`] wraps the model together with the
//! terminal feature source and applies the configured acoustic scale.

use crate::config::{ModelFamily, SearchOptions};
use crate::error::{LattixError, Result};
use crate::feat::stage::{FeatureStage, StageHandle};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Transition id bookkeeping: which pdf scores it and which phone it
/// belongs to. Transition ids are 1-based; 0 is the epsilon label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionInfo {
    pub pdf: usize,
    pub phone: i32,
}

/// On-disk acoustic model representation.
#[derive(Debug, Serialize, Deserialize)]
pub struct AcousticModelData {
    pub dim: usize,
    /// Per-pdf mean vectors.
    pub means: Vec<Vec<f32>>,
    /// Per-pdf diagonal variances.
    pub vars: Vec<Vec<f32>>,
    pub transitions: Vec<TransitionInfo>,
}

/// Loaded acoustic model with precomputed Gaussian normalizers.
#[derive(Debug)]
pub struct AcousticModel {
    dim: usize,
    means: Array2<f32>,
    inv_vars: Array2<f32>,
    gconsts: Vec<f32>,
    transitions: Vec<TransitionInfo>,
}

impl AcousticModel {
    pub fn from_data(data: AcousticModelData) -> Result<Self> {
        let num_pdfs = data.means.len();
        if data.vars.len() != num_pdfs {
            return Err(LattixError::ModelLoad {
                path: "acoustic model".to_string(),
                message: format!(
                    "{} mean vectors but {} variance vectors",
                    num_pdfs,
                    data.vars.len()
                ),
            });
        }
        let mut means = Array2::zeros((num_pdfs, data.dim));
        let mut inv_vars = Array2::zeros((num_pdfs, data.dim));
        let mut gconsts = Vec::with_capacity(num_pdfs);
        let log_2pi = (2.0 * std::f32::consts::PI).ln();

        for (pdf, (mean, var)) in data.means.iter().zip(data.vars.iter()).enumerate() {
            if mean.len() != data.dim || var.len() != data.dim {
                return Err(LattixError::ModelLoad {
                    path: "acoustic model".to_string(),
                    message: format!("pdf {pdf} has wrong dimensionality"),
                });
            }
            let mut log_det = 0.0f32;
            for d in 0..data.dim {
                let v = var[d].max(1e-6);
                means[(pdf, d)] = mean[d];
                inv_vars[(pdf, d)] = 1.0 / v;
                log_det += v.ln();
            }
            gconsts.push(-0.5 * (data.dim as f32 * log_2pi + log_det));
        }

        for (i, t) in data.transitions.iter().enumerate() {
            if t.pdf >= num_pdfs {
                return Err(LattixError::ModelLoad {
                    path: "acoustic model".to_string(),
                    message: format!("transition {} references pdf {} of {num_pdfs}", i + 1, t.pdf),
                });
            }
        }

        Ok(Self {
            dim: data.dim,
            means,
            inv_vars,
            gconsts,
            transitions: data.transitions,
        })
    }

    /// Feature dimensionality the model expects.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_pdfs(&self) -> usize {
        self.gconsts.len()
    }

    pub fn num_transitions(&self) -> usize {
        self.transitions.len()
    }

    /// Transition info for a 1-based transition id.
    pub fn transition(&self, transition_id: u32) -> Option<&TransitionInfo> {
        if transition_id == 0 {
            return None;
        }
        self.transitions.get(transition_id as usize - 1)
    }

    /// Phone of a transition id, or 0 for epsilon/unknown.
    pub fn phone_of(&self, transition_id: u32) -> i32 {
        self.transition(transition_id).map_or(0, |t| t.phone)
    }

    /// Diagonal-Gaussian log-likelihood of a feature vector under a pdf.
    pub fn log_likelihood(&self, pdf: usize, feature: &[f32]) -> f32 {
        debug_assert_eq!(feature.len(), self.dim);
        let mut exponent = 0.0f32;
        for d in 0..self.dim {
            let diff = feature[d] - self.means[(pdf, d)];
            exponent += diff * diff * self.inv_vars[(pdf, d)];
        }
        self.gconsts[pdf] - 0.5 * exponent
    }
}

/// Per-frame acoustic scores on demand.
pub trait AcousticScorer {
    /// Scaled log-likelihood of `transition_id` at `frame`.
    fn log_likelihood(&mut self, frame: usize, transition_id: u32) -> f32;

    /// Number of frames currently scoreable.
    fn frames_ready(&mut self) -> usize;
}

/// Scorer over the terminal feature source. One instance per session;
/// rebuilt together with the feature pipeline.
pub struct GaussianScorer {
    model: Arc<AcousticModel>,
    features: StageHandle,
    scale: f32,
    /// Feature frames consumed per score frame (chain models).
    subsampling: u32,
    cache: Vec<HashMap<usize, f32>>,
    feature_cache: Vec<Vec<f32>>,
}

impl GaussianScorer {
    pub fn new(
        model: Arc<AcousticModel>,
        features: StageHandle,
        family: ModelFamily,
        opts: &SearchOptions,
    ) -> Result<Self> {
        let pipeline_dim = features.borrow().dim();
        if pipeline_dim != model.dim() {
            return Err(LattixError::ModelDimMismatch {
                pipeline_dim,
                model_dim: model.dim(),
            });
        }
        let subsampling = match family {
            ModelFamily::NnetChain => opts.frame_subsampling.max(1),
            _ => 1,
        };
        Ok(Self {
            model,
            features,
            scale: opts.acoustic_scale,
            subsampling,
            cache: Vec::new(),
            feature_cache: Vec::new(),
        })
    }

    fn feature_at(&mut self, frame: usize) -> Option<Vec<f32>> {
        let feature_frame = frame * self.subsampling as usize;
        if let Some(cached) = self.feature_cache.get(frame) {
            return Some(cached.clone());
        }
        let feature = self.features.borrow_mut().frame(feature_frame)?;
        if frame == self.feature_cache.len() {
            self.feature_cache.push(feature.clone());
        }
        Some(feature)
    }
}

impl AcousticScorer for GaussianScorer {
    fn log_likelihood(&mut self, frame: usize, transition_id: u32) -> f32 {
        let pdf = match self.model.transition(transition_id) {
            Some(info) => info.pdf,
            None => return 0.0,
        };
        while self.cache.len() <= frame {
            self.cache.push(HashMap::new());
        }
        if let Some(&ll) = self.cache[frame].get(&pdf) {
            return ll;
        }
        let feature = match self.feature_at(frame) {
            Some(f) => f,
            None => return 0.0,
        };
        let ll = self.scale * self.model.log_likelihood(pdf, &feature);
        self.cache[frame].insert(pdf, ll);
        ll
    }

    fn frames_ready(&mut self) -> usize {
        self.features.borrow_mut().frames_ready() / self.subsampling as usize
    }
}
