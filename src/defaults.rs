//! Default configuration constants shared across option groups.

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition models.
pub const SAMPLE_RATE: u32 = 16000;

/// Default bits per sample for raw byte intake.
pub const BITS_PER_SAMPLE: u32 = 16;

/// Default analysis window length in milliseconds.
pub const FRAME_LENGTH_MS: f32 = 25.0;

/// Default frame shift in milliseconds.
pub const FRAME_SHIFT_MS: f32 = 10.0;

/// Default number of mel filterbank bins.
pub const NUM_MEL_BINS: usize = 23;

/// Default number of cepstral coefficients for MFCC.
pub const NUM_CEPS: usize = 13;

/// Default acoustic scale applied to model log-likelihoods.
pub const ACOUSTIC_SCALE: f32 = 0.1;

/// Default decoding beam (relative cost pruning during search).
pub const BEAM: f32 = 16.0;

/// Default lattice beam (pruning width for lattice generation).
pub const LATTICE_BEAM: f32 = 10.0;

/// Default cap on simultaneously active search states.
pub const MAX_ACTIVE: usize = 7000;

/// Name of the session configuration file inside a model directory.
pub const CONFIG_FILE: &str = "lattix.toml";
