use ndarray::{concatenate, s, Array3, Array4, ArrayView3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{softmax, Linear};
use crate::speller::SpellerError;

pub const DEFAULT_ATTENTION_DIM: usize = 128;

#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// `(batch, q_len, in_features)`
    pub output: Array3<f32>,
    /// `(n_head, batch, q_len, key_len)`, each row sums to one.
    pub alignment: Array4<f32>,
}

/// Multi-head dot-product attention over listener features.
///
/// Query and key are projected into `n_head` subspaces of width `dim`. The
/// projected key doubles as the value. Head contexts are concatenated with the
/// raw query and squeezed back to `in_features` through `tanh(fc(..))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiHeadAttention {
    pub in_features: usize,
    pub dim: usize,
    pub n_head: usize,
    pub linear_q: Linear,
    pub linear_k: Linear,
    pub fc: Linear,
}

impl MultiHeadAttention {
    pub fn new<R: Rng>(in_features: usize, dim: usize, n_head: usize, rng: &mut R) -> Self {
        Self {
            in_features,
            dim,
            n_head,
            linear_q: Linear::new(in_features, dim * n_head, rng),
            linear_k: Linear::new(in_features, dim * n_head, rng),
            fc: Linear::new(in_features + dim * n_head, in_features, rng),
        }
    }

    pub fn forward(
        &self,
        query: &ArrayView3<f32>,
        key: &ArrayView3<f32>,
    ) -> Result<Array3<f32>, SpellerError> {
        Ok(self.forward_with_alignment(query, key)?.output)
    }

    pub fn forward_with_alignment(
        &self,
        query: &ArrayView3<f32>,
        key: &ArrayView3<f32>,
    ) -> Result<AttentionOutput, SpellerError> {
        let (batch, q_len, q_features) = query.dim();
        let (key_batch, key_len, key_features) = key.dim();
        for (what, actual) in [
            ("attention query features", q_features),
            ("attention key features", key_features),
        ] {
            if actual != self.in_features {
                return Err(SpellerError::ShapeMismatch {
                    what,
                    expected: self.in_features,
                    actual,
                });
            }
        }
        if key_batch != batch {
            return Err(SpellerError::ShapeMismatch {
                what: "attention key batch",
                expected: batch,
                actual: key_batch,
            });
        }

        let q = self.linear_q.forward3(query)?;
        let k = self.linear_k.forward3(key)?;

        let mut context = Array3::<f32>::zeros((batch, q_len, self.n_head * self.dim));
        let mut alignment = Array4::<f32>::zeros((self.n_head, batch, q_len, key_len));
        for head in 0..self.n_head {
            let (lo, hi) = (head * self.dim, (head + 1) * self.dim);
            for b in 0..batch {
                let qh = q.slice(s![b, .., lo..hi]);
                let kh = k.slice(s![b, .., lo..hi]);
                let align = softmax(&qh.dot(&kh.t()));
                context.slice_mut(s![b, .., lo..hi]).assign(&align.dot(&kh));
                alignment.slice_mut(s![head, b, .., ..]).assign(&align);
            }
        }

        let combined = concatenate(Axis(2), &[context.view(), query.view()])?;
        let mut output = self.fc.forward3(&combined.view())?;
        output.mapv_inplace(f32::tanh);

        log::trace!(
            "attention batch={} q_len={} key_len={} heads={}",
            batch,
            q_len,
            key_len,
            self.n_head
        );
        Ok(AttentionOutput { output, alignment })
    }
}
