//! Frame-synchronous beam search over the decode graph.
//!
//! Classic token passing: one token per reachable graph state per frame,
//! expanded through emitting arcs (which consume a scored frame) and then
//! through an epsilon closure. Tokens and the arcs that created them are
//! retained for the whole utterance so a raw lattice can be extracted at any
//! point; Viterbi backpointers give the best path without touching the
//! lattice machinery.
//!
//! Pruning is two-level: a cost beam around the best token of each frame,
//! tightened further when the active set exceeds `max_active`. Lattice
//! extraction applies the narrower `lattice_beam` over forward plus backward
//! cost.

use crate::am::AcousticScorer;
use crate::config::SearchOptions;
use crate::graph::DecodeGraph;
use crate::lattice::{Lattice, LatticeArc, LatticeBuilder};
use std::collections::HashMap;
use std::sync::Arc;

/// Viterbi backpointer: the arc that last improved a token's cost.
#[derive(Debug, Clone, Copy)]
struct BackPointer {
    token: usize,
    ilabel: u32,
    olabel: u32,
    graph_cost: f32,
    acoustic_cost: f32,
}

#[derive(Debug)]
struct Token {
    state: u32,
    cost: f32,
    back: Option<BackPointer>,
}

/// A recorded search arc, kept for lattice extraction.
#[derive(Debug, Clone, Copy)]
struct ArcRec {
    from: usize,
    to: usize,
    ilabel: u32,
    olabel: u32,
    graph_cost: f32,
    acoustic_cost: f32,
}

/// Best path through the search so far.
#[derive(Debug, Clone, PartialEq)]
pub struct BestPathInfo {
    /// Emitted word ids, in time order.
    pub words: Vec<u32>,
    /// Emitting transition ids, one per decoded frame.
    pub alignment: Vec<u32>,
    /// Summed graph cost, final cost included when applied.
    pub graph_cost: f32,
    /// Summed (scaled) acoustic cost.
    pub acoustic_cost: f32,
}

pub struct LatticeSearch {
    graph: Arc<DecodeGraph>,
    opts: SearchOptions,
    tokens: Vec<Token>,
    arcs: Vec<ArcRec>,
    /// Active token ids entering frame `f`; entry 0 is the epsilon closure
    /// of the start state.
    frame_tokens: Vec<Vec<usize>>,
    finalized: bool,
}

impl LatticeSearch {
    pub fn new(graph: Arc<DecodeGraph>, opts: SearchOptions) -> Self {
        let mut search = Self {
            graph,
            opts,
            tokens: Vec::new(),
            arcs: Vec::new(),
            frame_tokens: Vec::new(),
            finalized: false,
        };
        search.init();
        search
    }

    /// Reset to the start state, discarding all tokens and recorded arcs.
    pub fn init(&mut self) {
        self.tokens.clear();
        self.arcs.clear();
        self.frame_tokens.clear();
        self.finalized = false;

        self.tokens.push(Token {
            state: self.graph.start(),
            cost: 0.0,
            back: None,
        });
        let mut frontier = HashMap::from([(self.graph.start(), 0usize)]);
        self.epsilon_closure(&mut frontier);
        let mut ids: Vec<usize> = frontier.into_values().collect();
        ids.sort_unstable();
        self.frame_tokens.push(ids);
    }

    /// Number of frames consumed so far.
    pub fn num_frames_decoded(&self) -> usize {
        self.frame_tokens.len() - 1
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Mark the search complete so final costs apply. Idempotent; no more
    /// frames may be decoded afterwards.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Decode up to `max_frames` frames the scorer has ready. Never blocks:
    /// returns as soon as the scorer runs out of frames. Returns the number
    /// of frames actually decoded.
    pub fn advance(&mut self, scorer: &mut dyn AcousticScorer, max_frames: usize) -> usize {
        if self.finalized {
            return 0;
        }
        let mut processed = 0;
        while processed < max_frames && self.num_frames_decoded() < scorer.frames_ready() {
            self.process_frame(scorer);
            processed += 1;
        }
        processed
    }

    fn process_frame(&mut self, scorer: &mut dyn AcousticScorer) {
        let frame = self.num_frames_decoded();
        let survivors = self.pruned_frontier();

        let graph = self.graph.clone();
        let mut frontier: HashMap<u32, usize> = HashMap::new();
        for tid in survivors {
            let (state, cost) = {
                let tok = &self.tokens[tid];
                (tok.state, tok.cost)
            };
            for arc in graph.arcs(state) {
                if arc.ilabel == 0 {
                    continue;
                }
                let acoustic = -scorer.log_likelihood(frame, arc.ilabel);
                let new_cost = cost + arc.weight + acoustic;
                let dest = self.token_for(&mut frontier, arc.nextstate, new_cost);
                if new_cost <= self.tokens[dest].cost {
                    self.tokens[dest].cost = new_cost;
                    self.tokens[dest].back = Some(BackPointer {
                        token: tid,
                        ilabel: arc.ilabel,
                        olabel: arc.olabel,
                        graph_cost: arc.weight,
                        acoustic_cost: acoustic,
                    });
                }
                self.arcs.push(ArcRec {
                    from: tid,
                    to: dest,
                    ilabel: arc.ilabel,
                    olabel: arc.olabel,
                    graph_cost: arc.weight,
                    acoustic_cost: acoustic,
                });
            }
        }

        self.epsilon_closure(&mut frontier);
        let mut ids: Vec<usize> = frontier.into_values().collect();
        ids.sort_unstable();
        if ids.is_empty() {
            log::warn!("no tokens survived frame {frame}; search is stuck");
        }
        self.frame_tokens.push(ids);
    }

    /// Current frontier after beam and max-active pruning.
    fn pruned_frontier(&self) -> Vec<usize> {
        let frontier = self.frame_tokens.last().map_or(&[][..], |v| &v[..]);
        let best = frontier
            .iter()
            .map(|&t| self.tokens[t].cost)
            .fold(f32::INFINITY, f32::min);
        let mut threshold = best + self.opts.beam;

        // Clamp so a degenerate max_active still keeps the best token.
        let max_active = self.opts.max_active.max(1);
        if frontier.len() > max_active {
            let mut costs: Vec<f32> = frontier.iter().map(|&t| self.tokens[t].cost).collect();
            costs.sort_unstable_by(f32::total_cmp);
            threshold = threshold.min(costs[max_active - 1]);
        }

        frontier
            .iter()
            .copied()
            .filter(|&t| self.tokens[t].cost <= threshold)
            .collect()
    }

    fn token_for(&mut self, frontier: &mut HashMap<u32, usize>, state: u32, cost: f32) -> usize {
        *frontier.entry(state).or_insert_with(|| {
            self.tokens.push(Token {
                state,
                cost,
                back: None,
            });
            self.tokens.len() - 1
        })
    }

    /// Relax epsilon arcs within the frontier to a fixpoint, recording
    /// traversed arcs. The decode graph is epsilon-acyclic, so the
    /// relaxation terminates.
    fn epsilon_closure(&mut self, frontier: &mut HashMap<u32, usize>) {
        let graph = self.graph.clone();
        let mut queue: Vec<usize> = frontier.values().copied().collect();
        let mut expanded: Vec<bool> = Vec::new();

        while let Some(tid) = queue.pop() {
            let (state, cost) = {
                let tok = &self.tokens[tid];
                (tok.state, tok.cost)
            };
            if expanded.len() <= tid {
                expanded.resize(tid + 1, false);
            }
            let first_visit = !expanded[tid];
            expanded[tid] = true;

            for arc in graph.arcs(state) {
                if arc.ilabel != 0 {
                    continue;
                }
                let new_cost = cost + arc.weight;
                let created = !frontier.contains_key(&arc.nextstate);
                let dest = self.token_for(frontier, arc.nextstate, new_cost);
                let improved = new_cost < self.tokens[dest].cost || created;
                if improved {
                    self.tokens[dest].cost = new_cost;
                    self.tokens[dest].back = Some(BackPointer {
                        token: tid,
                        ilabel: 0,
                        olabel: arc.olabel,
                        graph_cost: arc.weight,
                        acoustic_cost: 0.0,
                    });
                    queue.push(dest);
                }
                if improved || (first_visit && new_cost <= self.tokens[dest].cost + self.opts.lattice_beam)
                {
                    self.arcs.push(ArcRec {
                        from: tid,
                        to: dest,
                        ilabel: 0,
                        olabel: arc.olabel,
                        graph_cost: arc.weight,
                        acoustic_cost: 0.0,
                    });
                }
            }
        }
    }

    /// Cost gap between the best token and the best token that can
    /// terminate in a final state. Infinity when no final state is
    /// reachable; near zero when the best path already ends well.
    pub fn final_relative_cost(&self) -> f32 {
        let frontier = self.frame_tokens.last().map_or(&[][..], |v| &v[..]);
        let mut best = f32::INFINITY;
        let mut best_final = f32::INFINITY;
        for &tid in frontier {
            let tok = &self.tokens[tid];
            best = best.min(tok.cost);
            if let Some(final_cost) = self.graph.final_cost(tok.state) {
                best_final = best_final.min(tok.cost + final_cost);
            }
        }
        best_final - best
    }

    /// Best token in the current frontier, with its applied final cost.
    fn best_frontier_token(&self, use_final: bool) -> Option<(usize, f32)> {
        let frontier = self.frame_tokens.last()?;
        let any_final = use_final
            && frontier
                .iter()
                .any(|&t| self.graph.final_cost(self.tokens[t].state).is_some());

        let mut best: Option<(usize, f32, f32)> = None;
        for &tid in frontier {
            let tok = &self.tokens[tid];
            let final_cost = if any_final {
                match self.graph.final_cost(tok.state) {
                    Some(c) => c,
                    None => continue,
                }
            } else {
                0.0
            };
            let total = tok.cost + final_cost;
            if best.is_none_or(|(_, t, _)| total < t) {
                best = Some((tid, total, final_cost));
            }
        }
        best.map(|(tid, _, final_cost)| (tid, final_cost))
    }

    /// Viterbi traceback. `None` before any frame has been decoded.
    pub fn best_path(&self, use_final: bool) -> Option<BestPathInfo> {
        if self.num_frames_decoded() == 0 {
            return None;
        }
        let (mut tid, final_cost) = self.best_frontier_token(use_final)?;

        let mut words = Vec::new();
        let mut alignment = Vec::new();
        let mut graph_cost = final_cost;
        let mut acoustic_cost = 0.0;
        while let Some(back) = self.tokens[tid].back {
            if back.olabel != 0 {
                words.push(back.olabel);
            }
            if back.ilabel != 0 {
                alignment.push(back.ilabel);
            }
            graph_cost += back.graph_cost;
            acoustic_cost += back.acoustic_cost;
            tid = back.token;
        }
        words.reverse();
        alignment.reverse();
        Some(BestPathInfo {
            words,
            alignment,
            graph_cost,
            acoustic_cost,
        })
    }

    /// Extract the raw lattice of surviving search arcs, pruned to paths
    /// within `lattice_beam` of the best one.
    pub fn raw_lattice(&self, use_final: bool) -> Lattice {
        let frontier = self.frame_tokens.last().map_or(&[][..], |v| &v[..]);
        let any_final = use_final
            && frontier
                .iter()
                .any(|&t| self.graph.final_cost(self.tokens[t].state).is_some());

        // Backward cost per token, seeded at the frontier.
        let mut beta = vec![f32::INFINITY; self.tokens.len()];
        for &tid in frontier {
            beta[tid] = if any_final {
                self.graph
                    .final_cost(self.tokens[tid].state)
                    .unwrap_or(f32::INFINITY)
            } else {
                0.0
            };
        }
        // Relax to a fixpoint; the arc set is acyclic.
        loop {
            let mut changed = false;
            for arc in self.arcs.iter().rev() {
                let cost = arc.graph_cost + arc.acoustic_cost + beta[arc.to];
                if cost < beta[arc.from] {
                    beta[arc.from] = cost;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let best = beta[0];
        let cutoff = best + self.opts.lattice_beam;
        let keep = |tid: usize| self.tokens[tid].cost + beta[tid] <= cutoff;

        let mut builder = LatticeBuilder::new();
        let mut state_of: HashMap<usize, u32> = HashMap::new();
        let mut state_for = |builder: &mut LatticeBuilder, tid: usize| -> u32 {
            *state_of.entry(tid).or_insert_with(|| builder.add_state())
        };

        let start = state_for(&mut builder, 0);
        builder.set_start(start);

        for arc in &self.arcs {
            if !keep(arc.from) || !keep(arc.to) {
                continue;
            }
            let path_cost = self.tokens[arc.from].cost
                + arc.graph_cost
                + arc.acoustic_cost
                + beta[arc.to];
            if path_cost > cutoff {
                continue;
            }
            let from = state_for(&mut builder, arc.from);
            let to = state_for(&mut builder, arc.to);
            builder.add_arc(
                from,
                LatticeArc {
                    ilabel: arc.ilabel,
                    olabel: arc.olabel,
                    graph_cost: arc.graph_cost,
                    acoustic_cost: arc.acoustic_cost,
                    nextstate: to,
                },
            );
        }

        for &tid in frontier {
            if !keep(tid) || beta[tid].is_infinite() {
                continue;
            }
            let final_cost = if any_final {
                self.graph.final_cost(self.tokens[tid].state).unwrap_or(0.0)
            } else {
                0.0
            };
            let state = state_for(&mut builder, tid);
            builder.set_final(state, final_cost);
        }

        builder.build()
    }
}
