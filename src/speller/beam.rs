use ndarray::{Array2, ArrayView2};

use super::SpellerError;
use crate::nn::MASKED_SCORE;

/// A hypothesis that emitted EOS, or a live one promoted by [`Beam::sort_finished`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Finished {
    pub score: f32,
    /// Number of steps taken when the entry was recorded.
    pub time: usize,
    /// Beam slot at that time.
    pub k: usize,
}

#[derive(Debug, Clone)]
pub struct Hypothesis {
    pub tokens: Vec<usize>,
    /// Source beam slot of every step.
    pub beam_indices: Vec<usize>,
    /// `(steps, n_class)` distributions that produced `tokens`.
    pub log_probs: Array2<f32>,
}

/// k-best hypothesis tracker for a single sequence.
#[derive(Debug, Clone)]
pub struct Beam {
    size: usize,
    eos_id: usize,
    scores: Vec<f32>,
    prev_ks: Vec<Vec<usize>>,
    next_ys: Vec<Vec<usize>>,
    word_probs: Vec<Array2<f32>>,
    finished: Vec<Finished>,
    eos_top: bool,
}

impl Beam {
    pub fn new(size: usize, sos_id: usize, eos_id: usize) -> Self {
        Self {
            size,
            eos_id,
            scores: vec![0.0; size],
            prev_ks: Vec::new(),
            next_ys: vec![vec![sos_id; size]],
            word_probs: Vec::new(),
            finished: Vec::new(),
            eos_top: false,
        }
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    pub fn finished(&self) -> &[Finished] {
        &self.finished
    }

    /// Tokens to feed at the next step, one per slot.
    pub fn current_predictions(&self) -> &[usize] {
        self.next_ys.last().map(Vec::as_slice).unwrap_or_default()
    }

    /// Slot each current hypothesis was extended from.
    pub fn current_origin(&self) -> &[usize] {
        self.prev_ks.last().map(Vec::as_slice).unwrap_or_default()
    }

    /// Top hypothesis has ended and at least one hypothesis is finished.
    pub fn is_done(&self) -> bool {
        self.eos_top && !self.finished.is_empty()
    }

    /// Extends the beam with one step of `(size, n_class)` log-probabilities.
    ///
    /// On the first step every slot holds the same history, so only row 0 is
    /// scored. Later steps add each slot's running score and mask slots that
    /// already emitted EOS.
    pub fn advance(&mut self, word_probs: ArrayView2<f32>) -> Result<(), SpellerError> {
        let (rows, n_class) = word_probs.dim();
        if rows != self.size {
            return Err(SpellerError::ShapeMismatch {
                what: "beam rows",
                expected: self.size,
                actual: rows,
            });
        }
        if n_class < self.size {
            return Err(SpellerError::ShapeMismatch {
                what: "beam classes",
                expected: self.size,
                actual: n_class,
            });
        }

        let mut candidates: Vec<(f32, usize)> = if self.prev_ks.is_empty() {
            word_probs
                .row(0)
                .iter()
                .enumerate()
                .map(|(id, &p)| (p, id))
                .collect()
        } else {
            let last = self.current_predictions();
            let mut flat = Vec::with_capacity(rows * n_class);
            for (i, row) in word_probs.outer_iter().enumerate() {
                let ended = last[i] == self.eos_id;
                for (w, &p) in row.iter().enumerate() {
                    let score = if ended { MASKED_SCORE } else { self.scores[i] + p };
                    flat.push((score, i * n_class + w));
                }
            }
            flat
        };
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
        candidates.truncate(self.size);

        self.scores = candidates.iter().map(|&(score, _)| score).collect();
        let prev_k: Vec<usize> = candidates.iter().map(|&(_, id)| id / n_class).collect();
        let next_y: Vec<usize> = candidates.iter().map(|&(_, id)| id % n_class).collect();

        self.word_probs.push(word_probs.to_owned());
        self.prev_ks.push(prev_k);
        self.next_ys.push(next_y);

        let time = self.next_ys.len() - 1;
        let ended: Vec<usize> = self
            .current_predictions()
            .iter()
            .enumerate()
            .filter(|&(_, &token)| token == self.eos_id)
            .map(|(k, _)| k)
            .collect();
        for k in ended {
            self.finished.push(Finished {
                score: self.scores[k],
                time,
                k,
            });
        }
        if self.current_predictions().first() == Some(&self.eos_id) {
            self.eos_top = true;
        }
        Ok(())
    }

    /// Finished entries best-first, topped up with live slots to at least `minimum`.
    ///
    /// Returns the scores and matching `(time, k)` pairs.
    pub fn sort_finished(&self, minimum: usize) -> (Vec<f32>, Vec<(usize, usize)>) {
        let mut finished = self.finished.clone();
        let time = self.next_ys.len() - 1;
        let mut slot = 0;
        while finished.len() < minimum && slot < self.size {
            finished.push(Finished {
                score: self.scores[slot],
                time,
                k: slot,
            });
            slot += 1;
        }
        finished.sort_by(|a, b| b.score.total_cmp(&a.score));

        let scores = finished.iter().map(|f| f.score).collect();
        let ks = finished.iter().map(|f| (f.time, f.k)).collect();
        (scores, ks)
    }

    /// Walks back-pointers from slot `k` at step `time`.
    pub fn get_hyp(&self, time: usize, k: usize) -> Hypothesis {
        let steps = time.min(self.prev_ks.len());
        let mut tokens = Vec::with_capacity(steps);
        let mut beam_indices = Vec::with_capacity(steps);
        let mut rows = Vec::with_capacity(steps);

        let mut k = k;
        for j in (0..steps).rev() {
            tokens.push(self.next_ys[j + 1][k]);
            let source = self.prev_ks[j][k];
            beam_indices.push(source);
            rows.push(self.word_probs[j].row(source));
            k = source;
        }
        tokens.reverse();
        beam_indices.reverse();
        rows.reverse();

        let n_class = self.word_probs.first().map_or(0, |p| p.ncols());
        let log_probs = Array2::from_shape_fn((rows.len(), n_class), |(t, c)| rows[t][c]);
        Hypothesis {
            tokens,
            beam_indices,
            log_probs,
        }
    }

    /// Pads `(steps, n_class)` rows to `max_length` with distributions certain of EOS.
    pub fn fill_empty_sequence(&self, log_probs: &Array2<f32>, max_length: usize) -> Array2<f32> {
        let (steps, n_class) = log_probs.dim();
        Array2::from_shape_fn((max_length, n_class), |(t, c)| {
            if t < steps {
                log_probs[[t, c]]
            } else if c == self.eos_id {
                0.0
            } else {
                MASKED_SCORE
            }
        })
    }
}
