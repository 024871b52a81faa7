//! Dense layers the speller is assembled from.
//!
//! Everything here is forward-only and works on `f32` arrays in
//! `(batch, time, features)` order. Parameters are plain `ndarray` arrays so
//! they can be serialized straight into a checkpoint.

mod attention;
mod embedding;
mod linear;
mod rnn;

use ndarray::{Array, Array2, ArrayView1, Dimension};
use rand::Rng;

pub use attention::{AttentionOutput, MultiHeadAttention, DEFAULT_ATTENTION_DIM};
pub use embedding::Embedding;
pub use linear::Linear;
pub use rnn::{HiddenState, Rnn, RnnKind};

/// Score assigned to entries that must never be selected.
pub const MASKED_SCORE: f32 = -1e20;

/// Row-wise log-softmax of a `(rows, classes)` matrix.
pub fn log_softmax(x: &Array2<f32>) -> Array2<f32> {
    let mut out = x.clone();
    for mut row in out.outer_iter_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let log_sum = row.fold(0.0, |acc, &v| acc + (v - max).exp()).ln();
        row.mapv_inplace(|v| (v - max) - log_sum);
    }
    out
}

/// Row-wise softmax of a `(rows, columns)` matrix.
pub fn softmax(x: &Array2<f32>) -> Array2<f32> {
    let mut out = x.clone();
    for mut row in out.outer_iter_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
    out
}

/// Index of the largest entry; ties resolve to the lowest index.
pub fn argmax(row: ArrayView1<f32>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_v), (i, &v)| {
            if v > best_v {
                (i, v)
            } else {
                (best, best_v)
            }
        })
        .0
}

/// Inverted dropout: zeroes entries with probability `p`, rescales the rest.
pub fn dropout<D: Dimension, R: Rng>(x: &mut Array<f32, D>, p: f32, rng: &mut R) {
    if p <= 0.0 {
        return;
    }
    if p >= 1.0 {
        x.fill(0.0);
        return;
    }
    let scale = 1.0 / (1.0 - p);
    x.mapv_inplace(|v| if rng.random::<f32>() < p { 0.0 } else { v * scale });
}

pub(crate) fn uniform<D, Sh, R>(shape: Sh, bound: f32, rng: &mut R) -> Array<f32, D>
where
    D: Dimension,
    Sh: ndarray::ShapeBuilder<Dim = D>,
    R: Rng,
{
    Array::from_shape_fn(shape, |_| rng.random_range(-bound..=bound))
}
