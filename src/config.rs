//! Session configuration.
//!
//! A [`DecoderConfig`] is loaded once from `lattix.toml` inside a model
//! directory, validated, and treated as immutable for the lifetime of the
//! session. The single exception is the active speaker identity, which may
//! be swapped between utterances and forces a feature-pipeline rebuild.

use crate::defaults;
use crate::endpoint::EndpointConfig;
use crate::error::{LattixError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Acoustic model family.
///
/// `NnetChain` models carry their own temporal context, so splicing is
/// skipped for them even when enabled in the configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    #[default]
    Gmm,
    Nnet,
    NnetChain,
}

/// Base spectral feature family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFamily {
    #[default]
    Mfcc,
    Fbank,
}

/// Frame extraction options shared by windowed feature stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FrameOptions {
    pub sample_rate: u32,
    pub frame_length_ms: f32,
    pub frame_shift_ms: f32,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            frame_length_ms: defaults::FRAME_LENGTH_MS,
            frame_shift_ms: defaults::FRAME_SHIFT_MS,
        }
    }
}

impl FrameOptions {
    /// Window length in samples.
    pub fn frame_length(&self) -> usize {
        (self.sample_rate as f32 * self.frame_length_ms / 1000.0) as usize
    }

    /// Frame shift in samples.
    pub fn frame_shift(&self) -> usize {
        (self.sample_rate as f32 * self.frame_shift_ms / 1000.0) as usize
    }
}

/// MFCC options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MfccOptions {
    pub frame: FrameOptions,
    pub num_mel_bins: usize,
    pub num_ceps: usize,
    pub low_freq: f32,
    pub high_freq: f32,
}

impl Default for MfccOptions {
    fn default() -> Self {
        Self {
            frame: FrameOptions::default(),
            num_mel_bins: defaults::NUM_MEL_BINS,
            num_ceps: defaults::NUM_CEPS,
            low_freq: 20.0,
            high_freq: 0.0, // 0 means Nyquist
        }
    }
}

/// Filterbank options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FbankOptions {
    pub frame: FrameOptions,
    pub num_mel_bins: usize,
    pub low_freq: f32,
    pub high_freq: f32,
}

impl Default for FbankOptions {
    fn default() -> Self {
        Self {
            frame: FrameOptions::default(),
            num_mel_bins: defaults::NUM_MEL_BINS,
            low_freq: 20.0,
            high_freq: 0.0,
        }
    }
}

/// Cepstral mean/variance normalization options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CmvnOptions {
    pub enabled: bool,
    pub normalize_variance: bool,
}

impl Default for CmvnOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            normalize_variance: false,
        }
    }
}

/// Pitch extraction options. Pitch is computed from raw waveform,
/// independently of the base feature chain, and fused by concatenation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PitchOptions {
    pub enabled: bool,
    pub min_f0: f32,
    pub max_f0: f32,
}

impl Default for PitchOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            min_f0: 50.0,
            max_f0: 400.0,
        }
    }
}

/// Splicing (temporal context stacking) options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpliceOptions {
    pub enabled: bool,
    pub left_context: usize,
    pub right_context: usize,
}

impl Default for SpliceOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            left_context: 3,
            right_context: 3,
        }
    }
}

/// Delta feature options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeltaOptions {
    pub enabled: bool,
    /// Delta order: 1 adds deltas, 2 adds deltas and delta-deltas.
    pub order: usize,
    /// Half-width of the regression window per order.
    pub window: usize,
}

impl Default for DeltaOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            order: 2,
            window: 2,
        }
    }
}

/// Linear transform options: a global discriminative (LDA-style) transform
/// plus an optional per-speaker transform applied after it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TransformOptions {
    pub use_lda: bool,
    /// Active speaker key in the speaker transform registry.
    pub speaker: Option<String>,
}

/// I-vector options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct IvectorOptions {
    pub enabled: bool,
}

/// Beam search options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchOptions {
    pub beam: f32,
    pub lattice_beam: f32,
    pub max_active: usize,
    pub determinize: bool,
    pub acoustic_scale: f32,
    /// Frames consumed per acoustic score for chain models.
    pub frame_subsampling: u32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            beam: defaults::BEAM,
            lattice_beam: defaults::LATTICE_BEAM,
            max_active: defaults::MAX_ACTIVE,
            determinize: true,
            acoustic_scale: defaults::ACOUSTIC_SCALE,
            frame_subsampling: 1,
        }
    }
}

/// Paths to model bundle artifacts, relative to the model directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelPaths {
    pub acoustic_model: String,
    pub graph: String,
    pub words: String,
    pub word_boundary: Option<String>,
    pub cmvn_stats: Option<String>,
    pub lda_matrix: Option<String>,
    pub speaker_registry: Option<String>,
    pub ivector_extractor: Option<String>,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            acoustic_model: "am.json".to_string(),
            graph: "graph.json".to_string(),
            words: "words.txt".to_string(),
            word_boundary: None,
            cmvn_stats: None,
            lda_matrix: None,
            speaker_registry: None,
            ivector_extractor: None,
        }
    }
}

/// Root session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecoderConfig {
    pub model_family: ModelFamily,
    pub feature_family: FeatureFamily,
    pub bits_per_sample: u32,
    pub paths: ModelPaths,
    pub mfcc: MfccOptions,
    pub fbank: FbankOptions,
    pub cmvn: CmvnOptions,
    pub pitch: PitchOptions,
    pub splice: SpliceOptions,
    pub delta: DeltaOptions,
    pub transform: TransformOptions,
    pub ivector: IvectorOptions,
    pub endpoint: EndpointConfig,
    pub search: SearchOptions,

    /// Directory the configuration was loaded from; relative artifact
    /// paths resolve against it.
    #[serde(skip)]
    pub model_dir: PathBuf,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            model_family: ModelFamily::default(),
            feature_family: FeatureFamily::default(),
            bits_per_sample: defaults::BITS_PER_SAMPLE,
            paths: ModelPaths::default(),
            mfcc: MfccOptions::default(),
            fbank: FbankOptions::default(),
            cmvn: CmvnOptions::default(),
            pitch: PitchOptions::default(),
            splice: SpliceOptions::default(),
            delta: DeltaOptions::default(),
            transform: TransformOptions::default(),
            ivector: IvectorOptions::default(),
            endpoint: EndpointConfig::default(),
            search: SearchOptions::default(),
            model_dir: PathBuf::new(),
        }
    }
}

impl DecoderConfig {
    /// Load and validate configuration from `lattix.toml` in a model directory.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(defaults::CONFIG_FILE);
        if !path.exists() {
            return Err(LattixError::ConfigFileNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = fs::read_to_string(&path)?;
        let mut config: DecoderConfig = toml::from_str(&contents)?;
        config.model_dir = model_dir.to_path_buf();
        if config.bits_per_sample == 0 {
            config.bits_per_sample = defaults::BITS_PER_SAMPLE;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-option invariants. Called on load; callers that build
    /// a config programmatically should call it themselves.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> LattixError {
            LattixError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        if self.bits_per_sample != 8 && self.bits_per_sample != 16 {
            return Err(invalid("bits_per_sample", "must be 8 or 16"));
        }
        if self.paths.acoustic_model.is_empty() {
            return Err(invalid("paths.acoustic_model", "required"));
        }
        if self.paths.graph.is_empty() {
            return Err(invalid("paths.graph", "required"));
        }
        if self.paths.words.is_empty() {
            return Err(invalid("paths.words", "required"));
        }
        if self.cmvn.enabled && self.paths.cmvn_stats.is_none() {
            return Err(invalid(
                "paths.cmvn_stats",
                "required when cmvn is enabled",
            ));
        }
        if self.transform.use_lda && self.paths.lda_matrix.is_none() {
            return Err(invalid(
                "paths.lda_matrix",
                "required when use_lda is enabled",
            ));
        }
        if self.transform.speaker.is_some() && self.paths.speaker_registry.is_none() {
            return Err(invalid(
                "paths.speaker_registry",
                "required when a speaker is selected",
            ));
        }
        if self.ivector.enabled && self.paths.ivector_extractor.is_none() {
            return Err(invalid(
                "paths.ivector_extractor",
                "required when ivectors are enabled",
            ));
        }
        if self.delta.enabled && self.delta.order == 0 {
            return Err(invalid("delta.order", "must be at least 1"));
        }
        if self.search.frame_subsampling == 0 {
            return Err(invalid("search.frame_subsampling", "must be at least 1"));
        }
        if self.search.max_active == 0 {
            return Err(invalid("search.max_active", "must be at least 1"));
        }
        Ok(())
    }

    /// Frame options of the selected base feature family.
    pub fn frame_opts(&self) -> &FrameOptions {
        match self.feature_family {
            FeatureFamily::Mfcc => &self.mfcc.frame,
            FeatureFamily::Fbank => &self.fbank.frame,
        }
    }

    /// Input sampling frequency in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.frame_opts().sample_rate
    }

    /// Effective frame shift in seconds, accounting for frame subsampling
    /// in chain models.
    pub fn frame_shift_secs(&self) -> f32 {
        let subsampling = match self.model_family {
            ModelFamily::NnetChain => self.search.frame_subsampling,
            _ => 1,
        };
        self.frame_opts().frame_shift_ms * subsampling as f32 * 1.0e-3
    }

    /// Swap the active speaker identity.
    ///
    /// This is the one permitted post-load mutation. The feature pipeline and
    /// acoustic scorer must be rebuilt afterwards (`StreamingDecoder::reset`).
    pub fn set_speaker(&mut self, speaker: Option<String>) -> Result<()> {
        if speaker.is_some() && self.paths.speaker_registry.is_none() {
            return Err(LattixError::ConfigInvalidValue {
                key: "paths.speaker_registry".to_string(),
                message: "required when a speaker is selected".to_string(),
            });
        }
        self.transform.speaker = speaker;
        Ok(())
    }

    /// Resolve an artifact path against the model directory.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.model_dir.join(relative)
    }
}
