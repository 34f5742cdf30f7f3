//! End-to-end streaming decode against a synthetic two-phone model.
//!
//! The model lives in a temp directory the way a real bundle ships: a
//! `lattix.toml`, a diagonal-Gaussian acoustic model over filterbank
//! features, a three-state word graph and a symbol table. Phone 1 models
//! silence (all mel bins at the log floor), phone 2 a loud tone; the graph
//! accepts silence, then the word "beep" over tone frames, then trailing
//! silence.

use lattix::am::{AcousticModelData, TransitionInfo};
use lattix::graph::GraphBuilder;
use lattix::{DecodeState, LattixError, StreamingDecoder};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const RATE: u32 = 16000;
const DIM: usize = 23;

fn write_model(dir: &Path, silence_phones: &[i32]) {
    let am = AcousticModelData {
        dim: DIM,
        // Digital silence puts every log mel energy at the floor (~ -23);
        // the tone pdf is broad around zero.
        means: vec![vec![-23.0; DIM], vec![0.0; DIM]],
        vars: vec![vec![25.0; DIM], vec![400.0; DIM]],
        transitions: vec![
            TransitionInfo { pdf: 0, phone: 1 },
            TransitionInfo { pdf: 1, phone: 2 },
        ],
    };
    fs::write(dir.join("am.json"), serde_json::to_string(&am).unwrap()).unwrap();

    // s0: leading silence, word "beep" starts on the first tone frame.
    // s1: tone continues. s2: trailing silence. All states final.
    let mut b = GraphBuilder::new();
    let s0 = b.add_state();
    let s1 = b.add_state();
    let s2 = b.add_state();
    b.set_start(s0);
    b.add_arc(s0, 1, 0, 0.0, s0);
    b.add_arc(s0, 2, 1, 0.0, s1);
    b.add_arc(s1, 2, 0, 0.0, s1);
    b.add_arc(s1, 1, 0, 0.0, s2);
    b.add_arc(s2, 1, 0, 0.0, s2);
    b.set_final(s0, 0.0);
    b.set_final(s1, 0.0);
    b.set_final(s2, 0.0);
    fs::write(
        dir.join("graph.json"),
        serde_json::to_string(&b.build()).unwrap(),
    )
    .unwrap();

    fs::write(dir.join("words.txt"), "<eps> 0\nbeep 1\n").unwrap();

    fs::write(
        dir.join("word_boundary.json"),
        r#"{"positions": {"1": "silence", "2": "internal"}}"#,
    )
    .unwrap();

    let identity: Vec<Vec<f32>> = (0..DIM)
        .map(|i| (0..DIM).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();
    let half: Vec<Vec<f32>> = (0..DIM)
        .map(|i| (0..DIM).map(|j| if i == j { 0.5 } else { 0.0 }).collect())
        .collect();
    let speakers = serde_json::json!({ "unit": identity, "half": half });
    fs::write(dir.join("speakers.json"), speakers.to_string()).unwrap();

    let phones = silence_phones
        .iter()
        .map(i32::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let config = format!(
        r#"
feature_family = "fbank"

[endpoint]
silence_phones = [{phones}]

[paths]
speaker_registry = "speakers.json"
word_boundary = "word_boundary.json"
"#
    );
    fs::write(dir.join("lattix.toml"), config).unwrap();
}

fn open_decoder(dir: &TempDir) -> StreamingDecoder {
    StreamingDecoder::new(dir.path()).unwrap()
}

fn model_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_model(dir.path(), &[1]);
    dir
}

fn tone(secs: f32) -> Vec<i16> {
    (0..(secs * RATE as f32) as usize)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * 440.0 * i as f32 / RATE as f32;
            (phase.sin() * 10000.0) as i16
        })
        .collect()
}

fn silence(secs: f32) -> Vec<i16> {
    vec![0; (secs * RATE as f32) as usize]
}

#[test]
fn test_decodes_tone_utterance_to_word() {
    let dir = model_dir();
    let mut decoder = open_decoder(&dir);

    decoder.accept_waveform(&tone(1.0)).unwrap();
    decoder.accept_waveform(&silence(1.0)).unwrap();
    decoder.input_finished();
    decoder.advance(usize::MAX).unwrap();
    decoder.finalize();

    // 2s at a 10ms shift, minus the window tail
    assert_eq!(decoder.frames_decoded(), 198);
    let path = decoder.best_path().unwrap();
    assert_eq!(path.words, vec![1]);
    assert_eq!(decoder.word_text(1), "beep");
}

#[test]
fn test_frames_decoded_is_monotone_and_advance_is_bounded() {
    let dir = model_dir();
    let mut decoder = open_decoder(&dir);

    assert_eq!(decoder.frames_decoded(), 0);
    assert!(decoder.best_path().is_none());

    decoder.accept_waveform(&tone(0.5)).unwrap();
    assert_eq!(decoder.advance(0).unwrap(), 0);
    assert_eq!(decoder.frames_decoded(), 0);

    assert_eq!(decoder.advance(10).unwrap(), 10);
    assert_eq!(decoder.frames_decoded(), 10);

    let mut last = decoder.frames_decoded();
    while decoder.advance(7).unwrap() > 0 {
        assert!(decoder.frames_decoded() >= last);
        last = decoder.frames_decoded();
    }
    // 0.5s: (8000 - 400) / 160 + 1 = 48 full windows
    assert_eq!(decoder.frames_decoded(), 48);
}

#[test]
fn test_repeated_lattice_extraction_is_identical() {
    let dir = model_dir();
    let mut decoder = open_decoder(&dir);
    decoder.accept_waveform(&tone(0.5)).unwrap();
    decoder.advance(usize::MAX).unwrap();

    let (first, first_cost) = decoder.lattice(true).unwrap();
    let (second, second_cost) = decoder.lattice(true).unwrap();
    assert_eq!(first.num_hypotheses(), second.num_hypotheses());
    assert_eq!(first_cost, second_cost);
    let (a, b) = (first.best_path().unwrap(), second.best_path().unwrap());
    assert_eq!(a.words(), b.words());
    assert_eq!(a.total_cost, b.total_cost);
}

#[test]
fn test_lattice_forward_cost_bounds_best_hypothesis() {
    let dir = model_dir();
    let mut decoder = open_decoder(&dir);
    decoder.accept_waveform(&tone(0.5)).unwrap();
    decoder.input_finished();
    decoder.advance(usize::MAX).unwrap();
    decoder.finalize();

    let (lattice, forward_cost) = decoder.lattice(true).unwrap();
    let best = lattice.best_path().unwrap();
    assert!(forward_cost.is_finite());
    // Summing all paths can only add probability mass to the best one.
    assert!(forward_cost <= best.total_cost + 1e-3);
}

#[test]
fn test_endpoint_fires_only_after_trailing_silence() {
    let dir = model_dir();
    let mut decoder = open_decoder(&dir);

    decoder.accept_waveform(&tone(1.0)).unwrap();
    decoder.advance(usize::MAX).unwrap();
    assert!(!decoder.detect_endpoint(), "no endpoint during speech");

    decoder.accept_waveform(&silence(0.2)).unwrap();
    decoder.advance(usize::MAX).unwrap();
    assert!(!decoder.detect_endpoint(), "0.2s of silence is too little");

    decoder.accept_waveform(&silence(2.0)).unwrap();
    decoder.advance(usize::MAX).unwrap();
    assert!(decoder.detect_endpoint());

    let trailing = decoder.trailing_silence_frames().unwrap();
    assert!(trailing > 100, "expected over 1s of trailing silence, got {trailing}");
    assert!(decoder.final_relative_cost() < 1.0);
}

#[test]
fn test_trailing_silence_unavailable_without_silence_phones() {
    let dir = TempDir::new().unwrap();
    write_model(dir.path(), &[]);
    let mut decoder = StreamingDecoder::new(dir.path()).unwrap();
    decoder.accept_waveform(&tone(0.3)).unwrap();
    decoder.advance(usize::MAX).unwrap();
    assert_eq!(decoder.trailing_silence_frames(), None);
}

#[test]
fn test_word_alignment_covers_tone_span() {
    let dir = model_dir();
    let mut decoder = open_decoder(&dir);
    decoder.accept_waveform(&tone(1.0)).unwrap();
    decoder.accept_waveform(&silence(1.0)).unwrap();
    decoder.input_finished();
    decoder.advance(usize::MAX).unwrap();
    decoder.finalize();

    let aligned = decoder.word_alignment().unwrap();
    let words: Vec<u32> = aligned.iter().map(|w| w.word).filter(|&w| w != 0).collect();
    assert_eq!(words, vec![1]);

    let beep = aligned.iter().find(|w| w.word == 1).unwrap();
    // The word span should cover roughly the first second.
    assert!(beep.start_frame < 5);
    assert!(beep.num_frames > 80 && beep.num_frames < 120);

    // Spans are contiguous from frame 0.
    let mut next = 0;
    for span in &aligned {
        assert_eq!(span.start_frame, next);
        next += span.num_frames;
    }
    assert_eq!(next, decoder.frames_decoded());
}

#[test]
fn test_confidences_attach_to_same_words() {
    let dir = model_dir();
    let mut decoder = open_decoder(&dir);
    decoder.accept_waveform(&tone(1.0)).unwrap();
    decoder.accept_waveform(&silence(0.5)).unwrap();
    decoder.input_finished();
    decoder.advance(usize::MAX).unwrap();
    decoder.finalize();

    let plain = decoder.word_alignment().unwrap();
    let with_conf = decoder.word_alignment_with_confidence().unwrap();
    let strip = |spans: &[lattix::AlignedWord]| {
        spans
            .iter()
            .map(|w| (w.word, w.start_frame, w.num_frames))
            .collect::<Vec<_>>()
    };
    assert_eq!(strip(&plain), strip(&with_conf));

    for word in with_conf.iter().filter(|w| w.word != 0) {
        let confidence = word.confidence.unwrap();
        assert!((0.0..=1.0).contains(&confidence));
    }
}

#[test]
fn test_speaker_swap_changes_scores_after_reset() {
    let dir = model_dir();
    let audio = tone(0.5);

    let mut baseline = open_decoder(&dir);
    baseline.accept_waveform(&audio).unwrap();
    baseline.advance(usize::MAX).unwrap();
    baseline.finalize();
    let baseline_cost = baseline.best_path().unwrap().acoustic_cost;

    let mut swapped = open_decoder(&dir);
    assert_eq!(
        swapped.speaker_list(),
        vec!["half".to_string(), "unit".to_string()]
    );
    swapped.set_speaker(Some("half")).unwrap();

    // The pipeline is stale until reset.
    assert!(matches!(
        swapped.accept_waveform(&audio),
        Err(LattixError::InvalidState { .. })
    ));
    swapped.reset().unwrap();
    assert_eq!(swapped.state(), DecodeState::Ready);
    assert_eq!(swapped.speaker(), Some("half"));

    swapped.accept_waveform(&audio).unwrap();
    swapped.advance(usize::MAX).unwrap();
    swapped.finalize();
    let swapped_cost = swapped.best_path().unwrap().acoustic_cost;

    assert!((baseline_cost - swapped_cost).abs() > 1e-3);
}

#[test]
fn test_unknown_speaker_rejected() {
    let dir = model_dir();
    let mut decoder = open_decoder(&dir);
    assert!(matches!(
        decoder.set_speaker(Some("nobody")),
        Err(LattixError::UnknownSpeaker { .. })
    ));
    // A failed swap leaves the session usable.
    assert_eq!(decoder.state(), DecodeState::Ready);
}

#[test]
fn test_finalized_session_rejects_audio_but_serves_results() {
    let dir = model_dir();
    let mut decoder = open_decoder(&dir);
    decoder.accept_waveform(&tone(0.5)).unwrap();
    decoder.advance(usize::MAX).unwrap();

    decoder.input_finished();
    decoder.input_finished(); // idempotent
    decoder.finalize();
    decoder.finalize(); // idempotent
    assert_eq!(decoder.state(), DecodeState::Finalized);

    assert!(matches!(
        decoder.accept_waveform(&tone(0.1)),
        Err(LattixError::InvalidState { .. })
    ));
    assert!(matches!(
        decoder.advance(1),
        Err(LattixError::InvalidState { .. })
    ));
    assert!(decoder.best_path().is_some());
    assert!(decoder.lattice(true).is_ok());
}

#[test]
fn test_reset_starts_a_fresh_utterance() {
    let dir = model_dir();
    let mut decoder = open_decoder(&dir);
    decoder.accept_waveform(&tone(0.5)).unwrap();
    decoder.advance(usize::MAX).unwrap();
    decoder.finalize();
    assert!(decoder.frames_decoded() > 0);

    decoder.reset().unwrap();
    assert_eq!(decoder.state(), DecodeState::Ready);
    assert_eq!(decoder.frames_decoded(), 0);
    assert!(decoder.best_path().is_none());

    decoder.accept_waveform(&tone(0.2)).unwrap();
    assert!(decoder.advance(usize::MAX).unwrap() > 0);
}
