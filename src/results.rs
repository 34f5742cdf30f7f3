//! Result extraction.
//!
//! Everything here is read-only with respect to the search: each call
//! recomputes from the live raw lattice, so results reflect exactly the
//! frames decoded so far. Queries that cannot be answered yet distinguish
//! soft unavailability (`None`, possibly with a warning) from caller errors
//! (precondition and unsupported-operation variants).

use crate::decoder::StreamingDecoder;
use crate::error::{LattixError, Result};
use crate::lattice::{CompactLattice, WordSpan};
use crate::model::WordBoundaryTable;
use crate::am::AcousticModel;

/// Best-path transcript with its cost components.
#[derive(Debug, Clone, PartialEq)]
pub struct BestPath {
    pub words: Vec<u32>,
    pub graph_cost: f32,
    pub acoustic_cost: f32,
}

impl BestPath {
    pub fn weight(&self) -> f32 {
        self.graph_cost + self.acoustic_cost
    }
}

/// One aligned word span. Word 0 spans cover frames outside any word
/// (silence). Frame units are decoded frames; multiply by the session's
/// `frame_shift_secs` for time.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedWord {
    pub word: u32,
    pub start_frame: u32,
    pub num_frames: u32,
    pub confidence: Option<f32>,
}

impl StreamingDecoder {
    /// Best path through the frames decoded so far. `None` before the first
    /// frame: an unavailable result, not an error.
    pub fn best_path(&self) -> Option<BestPath> {
        let info = self.search.best_path(self.search_finalized())?;
        Some(BestPath {
            words: info.words,
            graph_cost: info.graph_cost,
            acoustic_cost: info.acoustic_cost,
        })
    }

    /// Determinized lattice of the current hypotheses, paired with the
    /// total forward cost of the raw lattice: the negated log of the summed
    /// path likelihoods, which never exceeds the best hypothesis cost.
    /// `end_of_utterance` applies final-state costs even before
    /// finalization.
    pub fn lattice(&self, end_of_utterance: bool) -> Result<(CompactLattice, f32)> {
        if self.frames_decoded() == 0 {
            return Err(LattixError::Precondition {
                operation: "lattice".to_string(),
                message: "no frames decoded".to_string(),
            });
        }
        if !self.config().search.determinize {
            return Err(LattixError::UnsupportedOperation {
                message: "lattice extraction requires determinization enabled".to_string(),
            });
        }
        let use_final = end_of_utterance || self.search_finalized();
        let raw = self.search.raw_lattice(use_final);
        let forward_cost = raw.forward_cost();
        let compact = CompactLattice::determinize(&raw, self.config().search.lattice_beam);
        Ok((compact, forward_cost))
    }

    /// Word alignment of the best hypothesis: word spans with start frames
    /// and lengths, silence spans included as word 0. Refined on phone
    /// boundaries when the bundle ships a word-boundary table.
    pub fn word_alignment(&self) -> Result<Vec<AlignedWord>> {
        Ok(self.aligned_spans()?.0)
    }

    /// Word alignment plus per-word confidences from the hypothesis
    /// posteriors of the determinized lattice. The word sequence is
    /// identical to [`word_alignment`](Self::word_alignment).
    pub fn word_alignment_with_confidence(&self) -> Result<Vec<AlignedWord>> {
        let (mut aligned, lattice) = self.aligned_spans()?;
        let confidences = lattice.best_path_confidences();
        let mut next = confidences.into_iter();
        for word in aligned.iter_mut().filter(|w| w.word != 0) {
            word.confidence = next.next();
        }
        Ok(aligned)
    }

    fn aligned_spans(&self) -> Result<(Vec<AlignedWord>, CompactLattice)> {
        let (lattice, _) = self.lattice(self.search_finalized())?;
        let Some(best) = lattice.best_path() else {
            return Ok((Vec::new(), lattice));
        };

        let spans = match &self.bundle().word_boundary {
            Some(table) => refine_spans(&best.spans, &self.bundle().acoustic_model, table),
            None => best.spans.clone(),
        };

        let mut aligned = Vec::with_capacity(spans.len());
        let mut start = 0u32;
        for span in &spans {
            let frames = span.alignment.len() as u32;
            if frames == 0 {
                continue;
            }
            aligned.push(AlignedWord {
                word: span.word,
                start_frame: start,
                num_frames: frames,
                confidence: None,
            });
            start += frames;
        }
        Ok((aligned, lattice))
    }

    /// Current i-vector estimate at the most recently decoded frame.
    /// `None` with a warning when i-vectors are not configured; `None`
    /// (silently) before the first frame.
    pub fn ivector_snapshot(&self) -> Option<Vec<f32>> {
        if !self.config().ivector.enabled {
            log::warn!("i-vector snapshot queried but i-vectors are not configured");
            return None;
        }
        let frames = self.frames_decoded() as usize;
        if frames == 0 {
            return None;
        }
        let base_frame = frames * self.frame_subsampling() - 1;
        self.pipeline().ivector_at(base_frame)
    }
}

/// Move word-span frames whose phone is silence into separate word-0 spans,
/// so word boundaries land on phone boundaries.
fn refine_spans(
    spans: &[WordSpan],
    model: &AcousticModel,
    table: &WordBoundaryTable,
) -> Vec<WordSpan> {
    let mut refined = Vec::with_capacity(spans.len());
    for span in spans {
        if span.word == 0 {
            refined.push(span.clone());
            continue;
        }
        let is_silence = |tid: u32| table.is_silence(model.phone_of(tid));

        let leading = span
            .alignment
            .iter()
            .take_while(|&&t| is_silence(t))
            .count();
        let trailing = span.alignment[leading..]
            .iter()
            .rev()
            .take_while(|&&t| is_silence(t))
            .count();
        let content = &span.alignment[leading..span.alignment.len() - trailing];

        if leading > 0 {
            refined.push(silence_span(&span.alignment[..leading]));
        }
        refined.push(WordSpan {
            word: span.word,
            graph_cost: span.graph_cost,
            acoustic_cost: span.acoustic_cost,
            alignment: content.to_vec(),
        });
        if trailing > 0 {
            refined.push(silence_span(&span.alignment[span.alignment.len() - trailing..]));
        }
    }
    refined
}

fn silence_span(alignment: &[u32]) -> WordSpan {
    WordSpan {
        word: 0,
        graph_cost: 0.0,
        acoustic_cost: 0.0,
        alignment: alignment.to_vec(),
    }
}
