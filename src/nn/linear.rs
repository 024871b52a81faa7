use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::uniform;
use crate::speller::SpellerError;

/// Affine map `y = x Wᵀ + b`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Linear {
    /// `(out_features, in_features)`
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl Linear {
    pub fn new<R: Rng>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        Self {
            weight: uniform((out_features, in_features), bound, rng),
            bias: uniform(out_features, bound, rng),
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>, SpellerError> {
        if x.ncols() != self.in_features() {
            return Err(SpellerError::ShapeMismatch {
                what: "linear input features",
                expected: self.in_features(),
                actual: x.ncols(),
            });
        }
        let mut y = x.dot(&self.weight.t());
        y += &self.bias;
        Ok(y)
    }

    /// Applies the map to every time step of a `(batch, time, in)` input.
    pub fn forward3(&self, x: &ArrayView3<f32>) -> Result<Array3<f32>, SpellerError> {
        let (batch, time, features) = x.dim();
        let flat = x.to_shape((batch * time, features))?;
        let y = self.forward(&flat.view())?;
        let y = y.to_shape((batch, time, self.out_features()))?.into_owned();
        Ok(y)
    }
}
