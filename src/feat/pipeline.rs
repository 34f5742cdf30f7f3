//! Feature pipeline builder.
//!
//! Assembles the configured transform stages into one terminal streaming
//! feature source. The stage order is fixed by the statistics the transforms
//! were estimated under and is not configurable:
//!
//! base feature -> CMVN -> pitch fusion -> splice -> delta -> global linear
//! transform -> speaker linear transform -> i-vector fusion
//!
//! Splicing is skipped entirely for model families with built-in temporal
//! context. The chain is always rebuilt whole; no stage is ever patched in
//! place, so dimensionalities stay mutually consistent.

use crate::config::{DecoderConfig, FeatureFamily, ModelFamily};
use crate::error::{LattixError, Result};
use crate::feat::base::SpectralStage;
use crate::feat::cmvn::CmvnStage;
use crate::feat::delta::DeltaStage;
use crate::feat::ivector::IvectorStage;
use crate::feat::pitch::PitchStage;
use crate::feat::splice::SpliceStage;
use crate::feat::stage::{FeatureStage, StageHandle, handle};
use crate::feat::transform::{AppendStage, TransformStage};
use crate::model::{CmvnStats, IvectorExtractor, ModelBundle};
use ndarray::Array2;

/// Loaded artifacts the builder needs, borrowed from the model bundle and
/// the speaker registry.
#[derive(Default)]
pub struct PipelineResources<'a> {
    pub cmvn_stats: Option<&'a CmvnStats>,
    pub lda: Option<&'a Array2<f32>>,
    pub ivector: Option<&'a IvectorExtractor>,
    pub speaker_transform: Option<&'a Array2<f32>>,
}

impl ModelBundle {
    /// Resources view for pipeline construction, with the active speaker
    /// transform resolved by the caller.
    pub fn pipeline_resources<'a>(
        &'a self,
        speaker_transform: Option<&'a Array2<f32>>,
    ) -> PipelineResources<'a> {
        PipelineResources {
            cmvn_stats: self.cmvn_stats.as_ref(),
            lda: self.lda.as_ref(),
            ivector: self.ivector.as_ref(),
            speaker_transform,
        }
    }
}

/// One assembled chain of transform stages.
///
/// Owns every stage through a single ordered handle list; waveform intake
/// fans out to the stages that consume raw audio (base and pitch).
pub struct FeaturePipeline {
    stages: Vec<StageHandle>,
    base: StageHandle,
    pitch: Option<StageHandle>,
    ivector: Option<StageHandle>,
    terminal: StageHandle,
    sample_rate: u32,
}

impl FeaturePipeline {
    /// Build the chain for a validated configuration.
    ///
    /// Fails with a configuration error when an enabled stage is missing its
    /// loaded artifact. All-or-nothing: on error nothing is retained.
    pub fn build(config: &DecoderConfig, res: &PipelineResources<'_>) -> Result<Self> {
        let mut stages: Vec<StageHandle> = Vec::new();

        let base = match config.feature_family {
            FeatureFamily::Mfcc => handle(SpectralStage::mfcc(&config.mfcc)),
            FeatureFamily::Fbank => handle(SpectralStage::fbank(&config.fbank)),
        };
        log::debug!(
            "feature pipeline: base {:?} dim {}",
            config.feature_family,
            base.borrow().dim()
        );
        stages.push(base.clone());
        let mut prev = base.clone();

        if config.cmvn.enabled {
            let stats = res.cmvn_stats.ok_or_else(|| missing("cmvn_stats"))?;
            prev = push(
                &mut stages,
                handle(CmvnStage::new(config.cmvn.clone(), stats.clone(), prev)),
            );
            log::debug!("feature pipeline: cmvn dim {}", prev.borrow().dim());
        }

        let mut pitch = None;
        if config.pitch.enabled {
            let stage = handle(PitchStage::new(&config.pitch, config.frame_opts()));
            stages.push(stage.clone());
            pitch = Some(stage.clone());
            prev = push(&mut stages, handle(AppendStage::new(prev, stage)));
            log::debug!("feature pipeline: pitch fused, dim {}", prev.borrow().dim());
        }

        // Chain-style models provide their own temporal context.
        if config.splice.enabled && config.model_family != ModelFamily::NnetChain {
            prev = push(&mut stages, handle(SpliceStage::new(&config.splice, prev)));
            log::debug!("feature pipeline: splice dim {}", prev.borrow().dim());
        }

        if config.delta.enabled {
            prev = push(&mut stages, handle(DeltaStage::new(&config.delta, prev)));
            log::debug!("feature pipeline: delta dim {}", prev.borrow().dim());
        }

        if config.transform.use_lda {
            let matrix = res.lda.ok_or_else(|| missing("lda_matrix"))?;
            prev = push(
                &mut stages,
                handle(TransformStage::new(matrix.clone(), prev)?),
            );
            log::debug!("feature pipeline: lda dim {}", prev.borrow().dim());
        }

        if let Some(matrix) = res.speaker_transform {
            prev = push(
                &mut stages,
                handle(TransformStage::new(matrix.clone(), prev)?),
            );
            log::debug!(
                "feature pipeline: speaker transform dim {}",
                prev.borrow().dim()
            );
        }

        let mut ivector = None;
        if config.ivector.enabled {
            let extractor = res.ivector.ok_or_else(|| missing("ivector_extractor"))?;
            // Computed from the un-transformed base feature, fused last.
            let stage = handle(IvectorStage::new(extractor, base.clone()));
            stages.push(stage.clone());
            ivector = Some(stage.clone());
            prev = push(&mut stages, handle(AppendStage::new(prev, stage)));
            log::debug!(
                "feature pipeline: ivector fused, dim {}",
                prev.borrow().dim()
            );
        }

        Ok(Self {
            stages,
            base,
            pitch,
            ivector,
            terminal: prev,
            sample_rate: config.sample_rate(),
        })
    }

    /// Terminal output dimensionality.
    pub fn dim(&self) -> usize {
        self.terminal.borrow().dim()
    }

    /// Number of stages in the chain, fusion and branch stages included.
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Shared handle to the terminal stage, for the acoustic scorer.
    pub fn terminal(&self) -> StageHandle {
        self.terminal.clone()
    }

    /// Feed raw waveform to the stages that consume it.
    pub fn accept_waveform(&mut self, samples: &[f32]) {
        self.base
            .borrow_mut()
            .accept_waveform(self.sample_rate, samples);
        if let Some(pitch) = &self.pitch {
            pitch.borrow_mut().accept_waveform(self.sample_rate, samples);
        }
    }

    /// Signal end of input. Idempotent.
    pub fn input_finished(&mut self) {
        self.base.borrow_mut().input_finished();
        if let Some(pitch) = &self.pitch {
            pitch.borrow_mut().input_finished();
        }
    }

    /// Frames available at the terminal stage.
    pub fn frames_ready(&self) -> usize {
        self.terminal.borrow_mut().frames_ready()
    }

    /// Terminal feature vector at `index`, if available.
    pub fn frame(&self, index: usize) -> Option<Vec<f32>> {
        self.terminal.borrow_mut().frame(index)
    }

    /// I-vector estimate at `frame`, when the stage exists and has reached
    /// that frame.
    pub fn ivector_at(&self, frame: usize) -> Option<Vec<f32>> {
        self.ivector.as_ref()?.borrow_mut().frame(frame)
    }
}

fn push(stages: &mut Vec<StageHandle>, stage: StageHandle) -> StageHandle {
    stages.push(stage.clone());
    stage
}

fn missing(artifact: &str) -> LattixError {
    LattixError::ConfigInvalidValue {
        key: format!("paths.{artifact}"),
        message: "stage enabled but artifact was not loaded".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CmvnOptions, DeltaOptions, IvectorOptions, SpliceOptions, TransformOptions,
    };
    use crate::feat::pitch::PITCH_DIM;
    use ndarray::Array2;

    fn cmvn_stats(dim: usize) -> CmvnStats {
        CmvnStats {
            mean: vec![0.0; dim],
            var: vec![1.0; dim],
            count: 10.0,
        }
    }

    fn tone(secs: f32) -> Vec<f32> {
        (0..(secs * 16000.0) as usize)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 16000.0).sin() * 500.0)
            .collect()
    }

    #[test]
    fn test_minimal_chain_is_base_only() {
        let config = DecoderConfig::default();
        let pipeline = FeaturePipeline::build(&config, &PipelineResources::default()).unwrap();
        assert_eq!(pipeline.dim(), 13);
        assert_eq!(pipeline.num_stages(), 1);
    }

    #[test]
    fn test_terminal_dim_predictable_per_stage_combination() {
        // Terminal dimensionality must be computable from configuration
        // alone, with no audio. Enumerate stage-enable combinations.
        let base_dim = 13;
        for cmvn in [false, true] {
            for pitch in [false, true] {
                for splice in [false, true] {
                    for delta in [false, true] {
                        let config = DecoderConfig {
                            cmvn: CmvnOptions {
                                enabled: cmvn,
                                ..Default::default()
                            },
                            pitch: crate::config::PitchOptions {
                                enabled: pitch,
                                ..Default::default()
                            },
                            splice: SpliceOptions {
                                enabled: splice,
                                left_context: 3,
                                right_context: 3,
                            },
                            delta: DeltaOptions {
                                enabled: delta,
                                order: 2,
                                window: 2,
                            },
                            ..Default::default()
                        };
                        let stats = cmvn_stats(base_dim);
                        let res = PipelineResources {
                            cmvn_stats: cmvn.then_some(&stats),
                            ..Default::default()
                        };
                        let pipeline = FeaturePipeline::build(&config, &res).unwrap();

                        let mut expected = base_dim;
                        if pitch {
                            expected += PITCH_DIM;
                        }
                        if splice {
                            expected *= 7;
                        }
                        if delta {
                            expected *= 3;
                        }
                        assert_eq!(
                            pipeline.dim(),
                            expected,
                            "cmvn={cmvn} pitch={pitch} splice={splice} delta={delta}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_splice_skipped_for_chain_family() {
        let config = DecoderConfig {
            model_family: ModelFamily::NnetChain,
            splice: SpliceOptions {
                enabled: true,
                left_context: 3,
                right_context: 3,
            },
            ..Default::default()
        };
        let pipeline = FeaturePipeline::build(&config, &PipelineResources::default()).unwrap();
        assert_eq!(pipeline.dim(), 13);
    }

    #[test]
    fn test_transforms_set_terminal_dim() {
        let config = DecoderConfig {
            transform: TransformOptions {
                use_lda: true,
                speaker: Some("spk".to_string()),
            },
            ..Default::default()
        };
        let lda = Array2::<f32>::zeros((20, 13));
        let speaker = Array2::<f32>::zeros((20, 20));
        let res = PipelineResources {
            lda: Some(&lda),
            speaker_transform: Some(&speaker),
            ..Default::default()
        };
        let pipeline = FeaturePipeline::build(&config, &res).unwrap();
        assert_eq!(pipeline.dim(), 20);
    }

    #[test]
    fn test_ivector_appends_embedding_dim() {
        let config = DecoderConfig {
            ivector: IvectorOptions { enabled: true },
            ..Default::default()
        };
        let extractor = IvectorExtractor {
            projection: Array2::zeros((5, 13)),
        };
        let res = PipelineResources {
            ivector: Some(&extractor),
            ..Default::default()
        };
        let pipeline = FeaturePipeline::build(&config, &res).unwrap();
        assert_eq!(pipeline.dim(), 18);
    }

    #[test]
    fn test_enabled_stage_without_artifact_fails() {
        let config = DecoderConfig {
            cmvn: CmvnOptions {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = FeaturePipeline::build(&config, &PipelineResources::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_streaming_produces_frames() {
        let config = DecoderConfig::default();
        let mut pipeline = FeaturePipeline::build(&config, &PipelineResources::default()).unwrap();
        assert_eq!(pipeline.frames_ready(), 0);

        pipeline.accept_waveform(&tone(0.5));
        assert!(pipeline.frames_ready() > 0);
        let frame = pipeline.frame(0).unwrap();
        assert_eq!(frame.len(), 13);
    }

    #[test]
    fn test_lookahead_stages_flush_on_input_finished() {
        let config = DecoderConfig {
            splice: SpliceOptions {
                enabled: true,
                left_context: 3,
                right_context: 3,
            },
            delta: DeltaOptions {
                enabled: true,
                order: 2,
                window: 2,
            },
            ..Default::default()
        };
        let mut pipeline = FeaturePipeline::build(&config, &PipelineResources::default()).unwrap();
        pipeline.accept_waveform(&tone(0.5));
        let before = pipeline.frames_ready();
        pipeline.input_finished();
        let after = pipeline.frames_ready();
        assert!(after > before, "flush should release held-back context");
    }

    #[test]
    fn test_ivector_unavailable_without_stage() {
        let config = DecoderConfig::default();
        let mut pipeline = FeaturePipeline::build(&config, &PipelineResources::default()).unwrap();
        pipeline.accept_waveform(&tone(0.2));
        assert!(pipeline.ivector_at(0).is_none());
    }

    #[test]
    fn test_ivector_tracks_decoded_frames() {
        let config = DecoderConfig {
            ivector: IvectorOptions { enabled: true },
            ..Default::default()
        };
        let extractor = IvectorExtractor {
            projection: Array2::eye(13),
        };
        let res = PipelineResources {
            ivector: Some(&extractor),
            ..Default::default()
        };
        let mut pipeline = FeaturePipeline::build(&config, &res).unwrap();
        pipeline.accept_waveform(&tone(0.5));
        let ready = pipeline.frames_ready();
        assert!(ready > 0);
        let iv = pipeline.ivector_at(ready - 1).unwrap();
        assert_eq!(iv.len(), 13);
    }
}
