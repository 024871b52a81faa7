use ndarray::{Array2, Array3, ArrayView2};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::speller::SpellerError;

/// Lookup table from token id to a dense vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub weight: Array2<f32>,
}

impl Embedding {
    pub fn new<R: Rng>(n_class: usize, dim: usize, rng: &mut R) -> Self {
        Self {
            weight: Array2::from_shape_fn((n_class, dim), |_| rng.sample(StandardNormal)),
        }
    }

    pub fn n_class(&self) -> usize {
        self.weight.nrows()
    }

    pub fn dim(&self) -> usize {
        self.weight.ncols()
    }

    /// `(batch, time)` ids to `(batch, time, dim)` vectors.
    pub fn forward(&self, ids: &ArrayView2<usize>) -> Result<Array3<f32>, SpellerError> {
        let n_class = self.n_class();
        if let Some(&token) = ids.iter().find(|&&id| id >= n_class) {
            return Err(SpellerError::TokenOutOfRange { token, n_class });
        }
        let (batch, time) = ids.dim();
        Ok(Array3::from_shape_fn((batch, time, self.dim()), |(b, t, d)| {
            self.weight[[ids[[b, t]], d]]
        }))
    }
}
