//! lattix - Streaming speech-to-text decoding
//!
//! Online lattice decoding over a static graph: incremental feature
//! extraction, frame-synchronous beam search, endpoint detection and
//! lattice-based result extraction, driven one audio chunk at a time.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod am;
pub mod config;
pub mod decoder;
pub mod defaults;
pub mod endpoint;
pub mod error;
pub mod feat;
pub mod graph;
pub mod lattice;
pub mod model;
pub mod results;
pub mod search;

// Session surface
pub use decoder::{DecodeState, StreamingDecoder};
pub use results::{AlignedWord, BestPath};

// Configuration
pub use config::{DecoderConfig, FeatureFamily, ModelFamily};

// Model artifacts (shared read-only across sessions)
pub use model::{ModelBundle, SpeakerRegistry, SymbolTable};

// Lattices
pub use lattice::{CompactLattice, Lattice};

// Error handling
pub use error::{LattixError, Result};
