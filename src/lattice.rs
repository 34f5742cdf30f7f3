//! Lattices and lattice post-processing.
//!
//! The search produces a *raw* lattice: an acyclic automaton over transition
//! ids (inputs) and word ids (outputs), one arc per surviving search step,
//! with the graph and acoustic cost components kept separate.
//! Determinization folds the raw lattice into a [`CompactLattice`] holding
//! one path per distinct word sequence within the lattice beam, each word
//! carrying the transition ids of its span. Confidences are minimum-Bayes-risk
//! style word posteriors of the best path against the other hypotheses.

use std::collections::BTreeMap;

/// Upper bound on the number of distinct paths enumerated from a raw
/// lattice. Paths beyond it are the least likely ones and contribute
/// negligibly to posteriors.
const MAX_PATHS: usize = 256;

/// Slack added to path-cost cutoffs. Forward accumulation and the backward
/// cost relaxation round differently over long paths, so an exact cutoff
/// can drop the best path itself.
const COST_SLACK: f32 = 1e-3;

/// A raw lattice arc. `ilabel` is a transition id (0 for epsilon), `olabel`
/// a word id (0 for none).
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeArc {
    pub ilabel: u32,
    pub olabel: u32,
    pub graph_cost: f32,
    pub acoustic_cost: f32,
    pub nextstate: u32,
}

/// Acyclic raw lattice extracted from the search.
#[derive(Debug)]
pub struct Lattice {
    start: u32,
    arcs: Vec<Vec<LatticeArc>>,
    finals: Vec<Option<f32>>,
}

/// One complete path through a raw lattice.
#[derive(Debug, Clone)]
pub struct LatticePath {
    pub arcs: Vec<LatticeArc>,
    /// Graph cost of the terminating final state.
    pub final_cost: f32,
}

impl LatticePath {
    pub fn total_cost(&self) -> f32 {
        self.final_cost
            + self
                .arcs
                .iter()
                .map(|a| a.graph_cost + a.acoustic_cost)
                .sum::<f32>()
    }

    pub fn words(&self) -> Vec<u32> {
        self.arcs.iter().map(|a| a.olabel).filter(|&w| w != 0).collect()
    }

    /// Emitting transition ids, one per frame the path spans.
    pub fn alignment(&self) -> Vec<u32> {
        self.arcs.iter().map(|a| a.ilabel).filter(|&t| t != 0).collect()
    }
}

impl Lattice {
    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn num_states(&self) -> usize {
        self.arcs.len()
    }

    pub fn arcs(&self, state: u32) -> &[LatticeArc] {
        &self.arcs[state as usize]
    }

    pub fn final_cost(&self, state: u32) -> Option<f32> {
        self.finals.get(state as usize).copied().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    /// Best remaining cost per state, infinity where no final state is
    /// reachable.
    fn backward_costs(&self) -> Vec<f32> {
        let mut beta: Vec<f32> = self
            .finals
            .iter()
            .map(|f| f.unwrap_or(f32::INFINITY))
            .collect();
        // The lattice is acyclic; relax arcs to a fixpoint.
        loop {
            let mut changed = false;
            for (state, arcs) in self.arcs.iter().enumerate() {
                for arc in arcs {
                    let cost =
                        arc.graph_cost + arc.acoustic_cost + beta[arc.nextstate as usize];
                    if cost < beta[state] {
                        beta[state] = cost;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        beta
    }

    /// Lowest-cost complete path, if any final state is reachable.
    pub fn shortest_path(&self) -> Option<LatticePath> {
        self.paths_within(0.0).into_iter().next()
    }

    /// All complete paths with total cost within `beam` of the best,
    /// best first, capped at an internal limit.
    pub fn paths_within(&self, beam: f32) -> Vec<LatticePath> {
        if self.is_empty() {
            return Vec::new();
        }
        let beta = self.backward_costs();
        let best = beta[self.start as usize];
        if best.is_infinite() {
            return Vec::new();
        }
        let cutoff = best + beam + COST_SLACK;

        let mut paths = Vec::new();
        let mut trail: Vec<LatticeArc> = Vec::new();
        self.collect_paths(self.start, 0.0, cutoff, &beta, &mut trail, &mut paths);
        paths.sort_by(|a, b| a.total_cost().total_cmp(&b.total_cost()));
        paths
    }

    fn collect_paths(
        &self,
        state: u32,
        cost: f32,
        cutoff: f32,
        beta: &[f32],
        trail: &mut Vec<LatticeArc>,
        paths: &mut Vec<LatticePath>,
    ) {
        if paths.len() >= MAX_PATHS {
            return;
        }
        if let Some(final_cost) = self.final_cost(state) {
            if cost + final_cost <= cutoff {
                paths.push(LatticePath {
                    arcs: trail.clone(),
                    final_cost,
                });
            }
        }
        for arc in self.arcs(state) {
            let arc_cost = cost + arc.graph_cost + arc.acoustic_cost;
            if arc_cost + beta[arc.nextstate as usize] > cutoff {
                continue;
            }
            trail.push(arc.clone());
            self.collect_paths(arc.nextstate, arc_cost, cutoff, beta, trail, paths);
            trail.pop();
        }
    }

    /// Total negated log-likelihood of the lattice: `-ln` of the summed
    /// path probabilities.
    pub fn forward_cost(&self) -> f32 {
        let paths = self.paths_within(f32::INFINITY);
        let Some(best) = paths.first().map(|p| p.total_cost()) else {
            return f32::INFINITY;
        };
        let sum: f32 = paths
            .iter()
            .map(|p| (-(p.total_cost() - best)).exp())
            .sum();
        best - sum.ln()
    }
}

/// Incremental raw lattice construction.
#[derive(Debug, Default)]
pub struct LatticeBuilder {
    start: u32,
    arcs: Vec<Vec<LatticeArc>>,
    finals: Vec<Option<f32>>,
}

impl LatticeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_state(&mut self) -> u32 {
        self.arcs.push(Vec::new());
        self.finals.push(None);
        (self.arcs.len() - 1) as u32
    }

    pub fn set_start(&mut self, state: u32) {
        self.start = state;
    }

    pub fn set_final(&mut self, state: u32, cost: f32) {
        self.finals[state as usize] = Some(cost);
    }

    pub fn add_arc(&mut self, from: u32, arc: LatticeArc) {
        self.arcs[from as usize].push(arc);
    }

    pub fn build(self) -> Lattice {
        Lattice {
            start: self.start,
            arcs: self.arcs,
            finals: self.finals,
        }
    }
}

/// One word span of a determinized path: the word, its cost components and
/// the transition ids of the frames it covers. Word 0 spans cover frames
/// emitted outside any word (leading or trailing silence).
#[derive(Debug, Clone, PartialEq)]
pub struct WordSpan {
    pub word: u32,
    pub graph_cost: f32,
    pub acoustic_cost: f32,
    pub alignment: Vec<u32>,
}

/// A full hypothesis of the compact lattice.
#[derive(Debug, Clone)]
pub struct CompactPath {
    pub spans: Vec<WordSpan>,
    pub total_cost: f32,
}

impl CompactPath {
    pub fn words(&self) -> Vec<u32> {
        self.spans.iter().map(|s| s.word).filter(|&w| w != 0).collect()
    }

    pub fn graph_cost(&self) -> f32 {
        self.spans.iter().map(|s| s.graph_cost).sum()
    }

    pub fn acoustic_cost(&self) -> f32 {
        self.spans.iter().map(|s| s.acoustic_cost).sum()
    }
}

/// Determinized lattice: one hypothesis per distinct word sequence within
/// the lattice beam, cheapest first.
#[derive(Debug)]
pub struct CompactLattice {
    hypotheses: Vec<CompactPath>,
}

impl CompactLattice {
    /// Fold a raw lattice into per-word-sequence hypotheses. Paths sharing
    /// a word sequence keep the cheapest realization.
    pub fn determinize(raw: &Lattice, lattice_beam: f32) -> Self {
        let mut by_words: BTreeMap<Vec<u32>, CompactPath> = BTreeMap::new();
        for path in raw.paths_within(lattice_beam) {
            let compact = segment_path(&path);
            let words = compact.words();
            match by_words.get(&words) {
                Some(existing) if existing.total_cost <= compact.total_cost => {}
                _ => {
                    by_words.insert(words, compact);
                }
            }
        }
        let mut hypotheses: Vec<CompactPath> = by_words.into_values().collect();
        hypotheses.sort_by(|a, b| a.total_cost.total_cmp(&b.total_cost));
        Self { hypotheses }
    }

    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }

    pub fn num_hypotheses(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn hypotheses(&self) -> &[CompactPath] {
        &self.hypotheses
    }

    /// The cheapest hypothesis.
    pub fn best_path(&self) -> Option<&CompactPath> {
        self.hypotheses.first()
    }

    /// Per-word confidences of the best hypothesis: for each of its words,
    /// the summed posterior of the hypotheses agreeing on that word at the
    /// aligned position. Clamped to `[0, 1]`.
    pub fn best_path_confidences(&self) -> Vec<f32> {
        let Some(best) = self.best_path() else {
            return Vec::new();
        };
        let reference = best.words();
        if reference.is_empty() {
            return Vec::new();
        }

        let best_cost = best.total_cost;
        let posteriors: Vec<f32> = self
            .hypotheses
            .iter()
            .map(|h| (-(h.total_cost - best_cost)).exp())
            .collect();
        let total: f32 = posteriors.iter().sum();

        let mut mass = vec![0.0f32; reference.len()];
        for (hyp, &posterior) in self.hypotheses.iter().zip(posteriors.iter()) {
            let aligned = align_to_reference(&reference, &hyp.words());
            for (position, matched) in aligned.iter().enumerate() {
                if *matched {
                    mass[position] += posterior;
                }
            }
        }
        mass.iter().map(|m| (m / total).clamp(0.0, 1.0)).collect()
    }
}

/// Segment a raw-lattice path into word spans. A word label marks the start
/// of its span: frames after it, up to the next label, belong to it. Frames
/// before the first label form a leading word-0 span.
fn segment_path(path: &LatticePath) -> CompactPath {
    let mut spans: Vec<WordSpan> = Vec::new();
    let mut current = WordSpan {
        word: 0,
        graph_cost: 0.0,
        acoustic_cost: 0.0,
        alignment: Vec::new(),
    };
    let mut saw_content = false;

    for arc in &path.arcs {
        if arc.olabel != 0 {
            if saw_content {
                spans.push(current.clone());
                current = WordSpan {
                    word: arc.olabel,
                    graph_cost: 0.0,
                    acoustic_cost: 0.0,
                    alignment: Vec::new(),
                };
            } else {
                // Costs of label-free arcs before the first word carry into
                // its span rather than being dropped.
                current.word = arc.olabel;
            }
            saw_content = true;
        }
        current.graph_cost += arc.graph_cost;
        current.acoustic_cost += arc.acoustic_cost;
        if arc.ilabel != 0 {
            current.alignment.push(arc.ilabel);
            saw_content = true;
        }
    }
    current.graph_cost += path.final_cost;
    if saw_content || spans.is_empty() {
        spans.push(current);
    }

    CompactPath {
        total_cost: path.total_cost(),
        spans,
    }
}

/// Levenshtein-align `hypothesis` to `reference`; per reference position,
/// whether the hypothesis carries the same word there.
fn align_to_reference(reference: &[u32], hypothesis: &[u32]) -> Vec<bool> {
    let n = reference.len();
    let m = hypothesis.len();
    // dp[i][j]: edit distance between reference[..i] and hypothesis[..j]
    let mut dp = vec![vec![0u32; m + 1]; n + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i as u32;
    }
    for j in 0..=m {
        dp[0][j] = j as u32;
    }
    for i in 1..=n {
        for j in 1..=m {
            let sub = dp[i - 1][j - 1] + u32::from(reference[i - 1] != hypothesis[j - 1]);
            dp[i][j] = sub.min(dp[i - 1][j] + 1).min(dp[i][j - 1] + 1);
        }
    }

    let mut matched = vec![false; n];
    let (mut i, mut j) = (n, m);
    while i > 0 || j > 0 {
        if i > 0
            && j > 0
            && dp[i][j] == dp[i - 1][j - 1] + u32::from(reference[i - 1] != hypothesis[j - 1])
        {
            matched[i - 1] = reference[i - 1] == hypothesis[j - 1];
            i -= 1;
            j -= 1;
        } else if i > 0 && dp[i][j] == dp[i - 1][j] + 1 {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    matched
}
