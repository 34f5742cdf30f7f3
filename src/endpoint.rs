//! Endpoint detection rules.
//!
//! An endpoint is declared when any configured rule fires. Each rule is a
//! conjunction of conditions on trailing silence, utterance length and the
//! relative cost of reaching a final state. Evaluation is a pure query over
//! search introspection; it never mutates decode state.

use serde::{Deserialize, Serialize};

/// A single endpointing rule. All conditions must hold for the rule to fire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointRule {
    /// Require that the utterance contains decoded non-silence.
    pub must_contain_nonsilence: bool,
    /// Minimum trailing silence, in seconds.
    pub min_trailing_silence_secs: f32,
    /// Maximum relative cost of final states for the rule to apply.
    pub max_relative_cost: f32,
    /// Minimum utterance length, in seconds.
    pub min_utterance_secs: f32,
}

impl Default for EndpointRule {
    fn default() -> Self {
        Self {
            must_contain_nonsilence: true,
            min_trailing_silence_secs: 1.0,
            max_relative_cost: f32::INFINITY,
            min_utterance_secs: 0.0,
        }
    }
}

impl EndpointRule {
    fn new(
        must_contain_nonsilence: bool,
        min_trailing_silence_secs: f32,
        max_relative_cost: f32,
        min_utterance_secs: f32,
    ) -> Self {
        Self {
            must_contain_nonsilence,
            min_trailing_silence_secs,
            max_relative_cost,
            min_utterance_secs,
        }
    }
}

/// Endpoint configuration: the silence phone set plus an OR-ed rule list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    /// Phone ids treated as silence. Empty means trailing-silence
    /// introspection is unavailable (soft failure, not an error).
    pub silence_phones: Vec<i32>,
    pub rules: Vec<EndpointRule>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        // Mirrors the usual online-decoding rule set: long absolute silence,
        // short silence after a confident final state, medium silence after a
        // less confident one, long silence regardless of cost, and a hard cap
        // on utterance length.
        Self {
            silence_phones: Vec::new(),
            rules: vec![
                EndpointRule::new(false, 5.0, f32::INFINITY, 0.0),
                EndpointRule::new(true, 0.5, 2.0, 0.0),
                EndpointRule::new(true, 1.0, 8.0, 0.0),
                EndpointRule::new(true, 2.0, f32::INFINITY, 0.0),
                EndpointRule::new(false, 0.0, f32::INFINITY, 20.0),
            ],
        }
    }
}

/// Snapshot of the search quantities endpoint rules are evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct EndpointState {
    pub frames_decoded: u32,
    pub trailing_silence_frames: u32,
    pub final_relative_cost: f32,
    pub frame_shift_secs: f32,
}

impl EndpointConfig {
    /// Returns true when any rule fires for the given search state.
    ///
    /// Never errors for "no endpoint yet": that is simply `false`.
    pub fn detected(&self, state: EndpointState) -> bool {
        if state.frames_decoded == 0 {
            return false;
        }
        let utterance_secs = state.frames_decoded as f32 * state.frame_shift_secs;
        let trailing_secs = state.trailing_silence_frames as f32 * state.frame_shift_secs;
        let contains_nonsilence = state.frames_decoded > state.trailing_silence_frames;

        self.rules.iter().any(|rule| {
            (contains_nonsilence || !rule.must_contain_nonsilence)
                && trailing_secs >= rule.min_trailing_silence_secs
                && state.final_relative_cost <= rule.max_relative_cost
                && utterance_secs >= rule.min_utterance_secs
        })
    }
}
