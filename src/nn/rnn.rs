use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, Array3, ArrayView3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{dropout, uniform};
use crate::speller::SpellerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RnnKind {
    Lstm,
    #[default]
    Gru,
    Rnn,
}

impl RnnKind {
    pub(crate) fn gate_count(self) -> usize {
        match self {
            Self::Lstm => 4,
            Self::Gru => 3,
            Self::Rnn => 1,
        }
    }
}

impl FromStr for RnnKind {
    type Err = SpellerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lstm" => Ok(Self::Lstm),
            "gru" => Ok(Self::Gru),
            "rnn" => Ok(Self::Rnn),
            _ => Err(SpellerError::UnsupportedRnn(s.to_string())),
        }
    }
}

impl fmt::Display for RnnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lstm => "lstm",
            Self::Gru => "gru",
            Self::Rnn => "rnn",
        };
        f.write_str(name)
    }
}

/// Recurrent state laid out as `(layers, batch, hidden)`.
#[derive(Debug, Clone, PartialEq)]
pub enum HiddenState {
    Plain(Array3<f32>),
    Lstm { h: Array3<f32>, c: Array3<f32> },
}

impl HiddenState {
    pub fn zeros(kind: RnnKind, layers: usize, batch: usize, hidden: usize) -> Self {
        let zeros = Array3::zeros((layers, batch, hidden));
        match kind {
            RnnKind::Lstm => Self::Lstm {
                h: zeros.clone(),
                c: zeros,
            },
            RnnKind::Gru | RnnKind::Rnn => Self::Plain(zeros),
        }
    }

    pub fn hidden(&self) -> &Array3<f32> {
        match self {
            Self::Plain(h) | Self::Lstm { h, .. } => h,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.hidden().len_of(Axis(1))
    }

    /// Gathers batch rows in the given order; rows may repeat.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        match self {
            Self::Plain(h) => Self::Plain(h.select(Axis(1), rows)),
            Self::Lstm { h, c } => Self::Lstm {
                h: h.select(Axis(1), rows),
                c: c.select(Axis(1), rows),
            },
        }
    }

    /// Repeats every batch row `k` times, keeping copies of one row adjacent.
    pub fn inflate(&self, k: usize) -> Self {
        let rows: Vec<usize> = (0..self.batch_size())
            .flat_map(|row| std::iter::repeat(row).take(k))
            .collect();
        self.select_rows(&rows)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RnnLayer {
    /// `(gates * hidden, input)`
    pub w_ih: Array2<f32>,
    /// `(gates * hidden, hidden)`
    pub w_hh: Array2<f32>,
    pub b_ih: Array1<f32>,
    pub b_hh: Array1<f32>,
}

impl RnnLayer {
    fn new<R: Rng>(kind: RnnKind, input: usize, hidden: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (hidden.max(1) as f32).sqrt();
        let rows = kind.gate_count() * hidden;
        Self {
            w_ih: uniform((rows, input), bound, rng),
            w_hh: uniform((rows, hidden), bound, rng),
            b_ih: uniform(rows, bound, rng),
            b_hh: uniform(rows, bound, rng),
        }
    }
}

/// Stacked batch-first recurrent network.
///
/// Gate layout per layer follows the usual convention: `i, f, g, o` for LSTM
/// and `r, z, n` for GRU. Dropout is applied between layers in training mode
/// only, never after the top layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rnn {
    pub kind: RnnKind,
    pub hidden_size: usize,
    pub dropout_p: f32,
    pub layers: Vec<RnnLayer>,
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl Rnn {
    pub fn new<R: Rng>(
        kind: RnnKind,
        input_size: usize,
        hidden_size: usize,
        n_layers: usize,
        dropout_p: f32,
        rng: &mut R,
    ) -> Self {
        let layers = (0..n_layers)
            .map(|l| {
                let input = if l == 0 { input_size } else { hidden_size };
                RnnLayer::new(kind, input, hidden_size, rng)
            })
            .collect();
        Self {
            kind,
            hidden_size,
            dropout_p,
            layers,
        }
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn init_state(&self, batch: usize) -> HiddenState {
        HiddenState::zeros(self.kind, self.n_layers(), batch, self.hidden_size)
    }

    fn check_state(&self, state: &HiddenState, batch: usize) -> Result<(), SpellerError> {
        let kind_matches = matches!(
            (self.kind, state),
            (RnnKind::Lstm, HiddenState::Lstm { .. })
                | (RnnKind::Gru | RnnKind::Rnn, HiddenState::Plain(_))
        );
        if !kind_matches {
            return Err(SpellerError::StateKind(self.kind));
        }
        let expected = (self.n_layers(), batch, self.hidden_size);
        let actual = state.hidden().dim();
        if expected != actual {
            return Err(SpellerError::StateShape { expected, actual });
        }
        Ok(())
    }

    /// Runs `(batch, time, input)` through every layer.
    ///
    /// Returns the top layer's outputs `(batch, time, hidden)` and the final state.
    pub fn forward<R: Rng>(
        &self,
        input: &ArrayView3<f32>,
        state: &HiddenState,
        training: bool,
        rng: &mut R,
    ) -> Result<(Array3<f32>, HiddenState), SpellerError> {
        let (batch, time, features) = input.dim();
        if let Some(first) = self.layers.first() {
            if first.w_ih.ncols() != features {
                return Err(SpellerError::ShapeMismatch {
                    what: "rnn input features",
                    expected: first.w_ih.ncols(),
                    actual: features,
                });
            }
        }
        self.check_state(state, batch)?;

        let hidden = self.hidden_size;
        let mut next_h = state.hidden().clone();
        let mut next_c = match state {
            HiddenState::Lstm { c, .. } => Some(c.clone()),
            HiddenState::Plain(_) => None,
        };
        let mut layer_input = input.to_owned();

        for (l, layer) in self.layers.iter().enumerate() {
            let projected = {
                let in_features = layer_input.len_of(Axis(2));
                let flat = layer_input.to_shape((batch * time, in_features))?;
                let mut projected = flat.dot(&layer.w_ih.t());
                projected += &layer.b_ih;
                let reshaped = projected
                    .to_shape((batch, time, layer.w_ih.nrows()))?
                    .into_owned();
                reshaped
            };

            let mut h = next_h.index_axis(Axis(0), l).to_owned();
            let mut c = next_c.as_ref().map(|c| c.index_axis(Axis(0), l).to_owned());
            let mut output = Array3::<f32>::zeros((batch, time, hidden));

            for step in 0..time {
                let gi = projected.index_axis(Axis(1), step);
                let mut gh = h.dot(&layer.w_hh.t());
                gh += &layer.b_hh;

                match (self.kind, c.as_mut()) {
                    (RnnKind::Rnn, _) => {
                        h = Array2::from_shape_fn((batch, hidden), |(b, j)| {
                            (gi[[b, j]] + gh[[b, j]]).tanh()
                        });
                    }
                    (RnnKind::Gru, _) => {
                        h = Array2::from_shape_fn((batch, hidden), |(b, j)| {
                            let r = sigmoid(gi[[b, j]] + gh[[b, j]]);
                            let z = sigmoid(gi[[b, hidden + j]] + gh[[b, hidden + j]]);
                            let n = (gi[[b, 2 * hidden + j]] + r * gh[[b, 2 * hidden + j]]).tanh();
                            (1.0 - z) * n + z * h[[b, j]]
                        });
                    }
                    (RnnKind::Lstm, Some(cell)) => {
                        let gate = |b: usize, g: usize, j: usize| {
                            gi[[b, g * hidden + j]] + gh[[b, g * hidden + j]]
                        };
                        *cell = Array2::from_shape_fn((batch, hidden), |(b, j)| {
                            let i = sigmoid(gate(b, 0, j));
                            let f = sigmoid(gate(b, 1, j));
                            let g = gate(b, 2, j).tanh();
                            f * cell[[b, j]] + i * g
                        });
                        h = Array2::from_shape_fn((batch, hidden), |(b, j)| {
                            sigmoid(gate(b, 3, j)) * cell[[b, j]].tanh()
                        });
                    }
                    (RnnKind::Lstm, None) => return Err(SpellerError::StateKind(self.kind)),
                }
                output.index_axis_mut(Axis(1), step).assign(&h);
            }

            next_h.index_axis_mut(Axis(0), l).assign(&h);
            if let (Some(all_c), Some(c)) = (next_c.as_mut(), c.as_ref()) {
                all_c.index_axis_mut(Axis(0), l).assign(c);
            }
            if training && l + 1 < self.n_layers() {
                dropout(&mut output, self.dropout_p, rng);
            }
            layer_input = output;
        }

        let state = match next_c {
            Some(c) => HiddenState::Lstm { h: next_h, c },
            None => HiddenState::Plain(next_h),
        };
        Ok((layer_input, state))
    }
}
