//! Streaming decode orchestration.
//!
//! A [`StreamingDecoder`] owns everything one decode session needs: the
//! configuration, a shared model bundle, the feature pipeline, the acoustic
//! scorer and the search. The session moves through an explicit state
//! machine: `Ready` accepts audio and decodes, `Idle` means a configuration
//! change (speaker swap) invalidated the pipeline and `reset` is required,
//! `Finalized` is terminal for audio intake but still serves result queries.
//!
//! The session is single-threaded; `advance(max_frames)` is the only
//! backpressure knob. The model bundle is immutable and may be shared across
//! sessions.

use crate::am::GaussianScorer;
use crate::config::{DecoderConfig, ModelFamily};
use crate::endpoint::EndpointState;
use crate::error::{LattixError, Result};
use crate::feat::FeaturePipeline;
use crate::model::{ModelBundle, SpeakerRegistry};
use crate::search::LatticeSearch;
use std::path::Path;
use std::sync::Arc;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// A configuration change invalidated the pipeline; `reset` is required.
    Idle,
    /// Accepting audio and decoding.
    Ready,
    /// Finalized: no more audio or frames, result queries only.
    Finalized,
}

pub struct StreamingDecoder {
    config: DecoderConfig,
    bundle: Arc<ModelBundle>,
    registry: Option<SpeakerRegistry>,
    pipeline: FeaturePipeline,
    scorer: GaussianScorer,
    pub(crate) search: LatticeSearch,
    state: DecodeState,
    input_finished: bool,
}

impl StreamingDecoder {
    /// Open a session on a model directory: load `lattix.toml`, the model
    /// bundle and the speaker registry, then build the session.
    pub fn new(model_dir: &Path) -> Result<Self> {
        Self::from_config(DecoderConfig::load(model_dir)?)
    }

    /// Build a session from an already validated configuration.
    pub fn from_config(config: DecoderConfig) -> Result<Self> {
        let bundle = Arc::new(ModelBundle::load(&config)?);
        let registry = match &config.paths.speaker_registry {
            Some(path) => Some(SpeakerRegistry::load(&config.resolve(path))?),
            None => None,
        };
        let (pipeline, scorer) = build_session(&config, &bundle, registry.as_ref())?;
        let search = LatticeSearch::new(bundle.graph.clone(), config.search.clone());
        Ok(Self {
            config,
            bundle,
            registry,
            pipeline,
            scorer,
            search,
            state: DecodeState::Ready,
            input_finished: false,
        })
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn bundle(&self) -> &Arc<ModelBundle> {
        &self.bundle
    }

    /// Rebuild the pipeline and scorer and restart the search at the start
    /// state. Required after `set_speaker`; valid in any state.
    pub fn reset(&mut self) -> Result<()> {
        let (pipeline, scorer) = build_session(&self.config, &self.bundle, self.registry.as_ref())?;
        self.pipeline = pipeline;
        self.scorer = scorer;
        self.search.init();
        self.state = DecodeState::Ready;
        self.input_finished = false;
        Ok(())
    }

    fn ensure_ready(&self, operation: &str) -> Result<()> {
        match self.state {
            DecodeState::Ready => Ok(()),
            DecodeState::Idle => Err(LattixError::InvalidState {
                operation: operation.to_string(),
                message: "session needs reset after a configuration change".to_string(),
            }),
            DecodeState::Finalized => Err(LattixError::InvalidState {
                operation: operation.to_string(),
                message: "session is finalized".to_string(),
            }),
        }
    }

    /// Feed 16-bit samples.
    pub fn accept_waveform(&mut self, samples: &[i16]) -> Result<()> {
        self.ensure_ready("accept_waveform")?;
        let samples: Vec<f32> = samples.iter().map(|&s| f32::from(s)).collect();
        self.pipeline.accept_waveform(&samples);
        Ok(())
    }

    /// Feed raw bytes, converted per the configured bits-per-sample.
    pub fn accept_waveform_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_ready("accept_waveform_bytes")?;
        let samples = samples_from_bytes(bytes, self.config.bits_per_sample)?;
        self.pipeline.accept_waveform(&samples);
        Ok(())
    }

    /// Decode up to `max_frames` frames of the audio fed so far. Bounded
    /// and non-blocking; returns the number of frames actually decoded,
    /// which is 0 whenever no scored frame is available yet.
    pub fn advance(&mut self, max_frames: usize) -> Result<usize> {
        self.ensure_ready("advance")?;
        Ok(self.search.advance(&mut self.scorer, max_frames))
    }

    /// Signal that no more audio will arrive, flushing look-ahead stages.
    /// Idempotent; a no-op once finalized.
    pub fn input_finished(&mut self) {
        if self.state == DecodeState::Finalized || self.input_finished {
            return;
        }
        self.input_finished = true;
        self.pipeline.input_finished();
    }

    /// Finalize the search so final-state costs apply. Idempotent and
    /// one-way; safe before or after `input_finished`.
    pub fn finalize(&mut self) {
        if self.state == DecodeState::Finalized {
            return;
        }
        self.search.finalize();
        self.state = DecodeState::Finalized;
    }

    pub fn frames_decoded(&self) -> u32 {
        self.search.num_frames_decoded() as u32
    }

    pub fn final_relative_cost(&self) -> f32 {
        self.search.final_relative_cost()
    }

    /// Trailing best-path frames whose phone is in the configured silence
    /// set. `None` with a warning when no silence phones are configured.
    pub fn trailing_silence_frames(&self) -> Option<u32> {
        if self.config.endpoint.silence_phones.is_empty() {
            log::warn!("trailing silence queried but no silence phones are configured");
            return None;
        }
        Some(self.trailing_silence_count())
    }

    fn trailing_silence_count(&self) -> u32 {
        let Some(path) = self.search.best_path(false) else {
            return 0;
        };
        let silence = &self.config.endpoint.silence_phones;
        path.alignment
            .iter()
            .rev()
            .take_while(|&&tid| silence.contains(&self.bundle.acoustic_model.phone_of(tid)))
            .count() as u32
    }

    /// Evaluate the endpoint rules against the current search state. Pure
    /// query; "no endpoint yet" is `false`, never an error.
    pub fn detect_endpoint(&self) -> bool {
        self.config.endpoint.detected(EndpointState {
            frames_decoded: self.frames_decoded(),
            trailing_silence_frames: self.trailing_silence_count(),
            final_relative_cost: self.final_relative_cost(),
            frame_shift_secs: self.config.frame_shift_secs(),
        })
    }

    /// Swap the active speaker. Validated against the registry; moves the
    /// session to `Idle` until `reset` rebuilds the pipeline.
    pub fn set_speaker(&mut self, speaker: Option<&str>) -> Result<()> {
        if let Some(key) = speaker {
            let registry = self.registry.as_ref().ok_or_else(|| {
                LattixError::ConfigInvalidValue {
                    key: "paths.speaker_registry".to_string(),
                    message: "required when a speaker is selected".to_string(),
                }
            })?;
            registry.lookup(key)?;
        }
        self.config.set_speaker(speaker.map(str::to_string))?;
        self.state = DecodeState::Idle;
        Ok(())
    }

    pub fn speaker(&self) -> Option<&str> {
        self.config.transform.speaker.as_deref()
    }

    pub fn speaker_list(&self) -> Vec<String> {
        self.registry.as_ref().map_or_else(Vec::new, |r| r.list_keys())
    }

    pub fn word_text(&self, id: u32) -> &str {
        self.bundle.words.word_text(id)
    }

    pub fn frame_shift_secs(&self) -> f32 {
        self.config.frame_shift_secs()
    }

    pub fn bits_per_sample(&self) -> u32 {
        self.config.bits_per_sample
    }

    pub fn set_bits_per_sample(&mut self, bits: u32) -> Result<()> {
        if bits != 8 && bits != 16 {
            return Err(LattixError::UnsupportedFormat { bits });
        }
        self.config.bits_per_sample = bits;
        Ok(())
    }

    pub(crate) fn search_finalized(&self) -> bool {
        self.state == DecodeState::Finalized
    }

    /// Feature frames consumed per decoded frame.
    pub(crate) fn frame_subsampling(&self) -> usize {
        match self.config.model_family {
            ModelFamily::NnetChain => self.config.search.frame_subsampling.max(1) as usize,
            _ => 1,
        }
    }

    pub(crate) fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }
}

fn build_session(
    config: &DecoderConfig,
    bundle: &Arc<ModelBundle>,
    registry: Option<&SpeakerRegistry>,
) -> Result<(FeaturePipeline, GaussianScorer)> {
    let speaker_transform = match (&config.transform.speaker, registry) {
        (Some(key), Some(registry)) => Some(registry.lookup(key)?),
        (Some(key), None) => return Err(LattixError::UnknownSpeaker { key: key.clone() }),
        (None, _) => None,
    };
    let pipeline = FeaturePipeline::build(config, &bundle.pipeline_resources(speaker_transform))?;
    let scorer = GaussianScorer::new(
        bundle.acoustic_model.clone(),
        pipeline.terminal(),
        config.model_family,
        &config.search,
    )?;
    Ok((pipeline, scorer))
}

/// Convert raw sample bytes per bits-per-sample: 8-bit unsigned, 16-bit
/// signed little-endian. Other widths are unsupported.
fn samples_from_bytes(bytes: &[u8], bits: u32) -> Result<Vec<f32>> {
    match bits {
        8 => Ok(bytes.iter().map(|&b| f32::from(b)).collect()),
        16 => {
            if bytes.len() % 2 != 0 {
                return Err(LattixError::Precondition {
                    operation: "accept_waveform_bytes".to_string(),
                    message: "odd byte count for 16-bit samples".to_string(),
                });
            }
            Ok(bytes
                .chunks_exact(2)
                .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])))
                .collect())
        }
        bits => Err(LattixError::UnsupportedFormat { bits }),
    }
}
