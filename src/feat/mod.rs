//! Streaming feature extraction.
//!
//! Raw audio enters at the stages that consume it (the base spectral stage
//! and, when enabled, pitch); every other stage pulls frames from its
//! upstream handle. [`pipeline::FeaturePipeline`] assembles the configured
//! stages in their fixed order and exposes the terminal output.

pub mod base;
pub mod cmvn;
pub mod delta;
pub mod ivector;
pub mod pipeline;
pub mod pitch;
pub mod splice;
pub mod stage;
pub mod transform;

pub use pipeline::{FeaturePipeline, PipelineResources};
pub use stage::{FeatureStage, StageHandle, handle};
