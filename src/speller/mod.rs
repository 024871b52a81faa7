mod beam;
mod checkpoint;
mod search;

use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::nn::{
    argmax, dropout, log_softmax, Embedding, HiddenState, Linear, MultiHeadAttention, RnnKind,
    Rnn,
};

pub use beam::{Beam, Finished, Hypothesis};
pub use crate::nn::DEFAULT_ATTENTION_DIM;

#[derive(Error, Debug)]
pub enum SpellerError {
    #[error("ndarray shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Hidden state shape mismatch: expected {expected:?}, got {actual:?}")]
    StateShape {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },
    #[error("Hidden state does not match RNN type {0}")]
    StateKind(RnnKind),
    #[error("RNN type not supported: {0}")]
    UnsupportedRnn(String),
    #[error("Token {token} out of range for {n_class} classes")]
    TokenOutOfRange { token: usize, n_class: usize },
    #[error("Input sequence too short: {0} column(s), need at least 2")]
    SequenceTooShort(usize),
    #[error("Listener outputs have no time steps")]
    EmptyListener,
    #[error("Teacher forcing row {row} has {actual} tokens after removing EOS, expected {expected}")]
    RaggedTeacherInputs {
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid speller configuration: {0}")]
    InvalidConfig(String),
    #[error("Checkpoint not found at {0}")]
    CheckpointNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Checkpoint JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpellerError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::CheckpointNotFound(_) => {
                "The speller checkpoint is missing. Check model_path in the configuration."
            }
            Self::Io(_) => "The speller could not read or write its checkpoint file.",
            Self::Json(_) => "The speller checkpoint is corrupted or from an incompatible version.",
            Self::InvalidConfig(_) | Self::UnsupportedRnn(_) => {
                "The speller configuration is invalid."
            }
            Self::TokenOutOfRange { .. }
            | Self::SequenceTooShort(_)
            | Self::EmptyListener
            | Self::RaggedTeacherInputs { .. } => "The decoder received malformed inputs.",
            Self::Shape(_)
            | Self::ShapeMismatch { .. }
            | Self::StateShape { .. }
            | Self::StateKind(_) => "The decoder encountered an internal shape error.",
        }
    }
}

/// Construction parameters of a [`Speller`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellerConfig {
    pub n_class: usize,
    pub max_length: usize,
    pub hidden_dim: usize,
    pub sos_id: usize,
    pub eos_id: usize,
    pub n_head: usize,
    pub n_layers: usize,
    pub rnn_type: RnnKind,
    pub dropout_p: f32,
    /// Beam width.
    pub k: usize,
    pub attention_dim: usize,
    pub seed: u64,
}

impl SpellerConfig {
    pub fn new(
        n_class: usize,
        max_length: usize,
        hidden_dim: usize,
        sos_id: usize,
        eos_id: usize,
        n_head: usize,
    ) -> Self {
        Self {
            n_class,
            max_length,
            hidden_dim,
            sos_id,
            eos_id,
            n_head,
            n_layers: 1,
            rnn_type: RnnKind::Gru,
            dropout_p: 0.5,
            k: 5,
            attention_dim: DEFAULT_ATTENTION_DIM,
            seed: 1,
        }
    }

    pub fn from_config(config: &Config, n_class: usize, sos_id: usize, eos_id: usize) -> Self {
        Self {
            n_layers: config.speller_layer_size,
            dropout_p: config.dropout as f32,
            seed: config.seed,
            ..Self::new(
                n_class,
                config.max_len,
                config.hidden_dim,
                sos_id,
                eos_id,
                config.n_head,
            )
        }
    }

    pub fn validate(&self) -> Result<(), SpellerError> {
        let invalid = |msg: String| Err(SpellerError::InvalidConfig(msg));
        if self.n_class < 2 {
            return invalid(format!("n_class must be at least 2, got {}", self.n_class));
        }
        for (name, value) in [
            ("hidden_dim", self.hidden_dim),
            ("n_head", self.n_head),
            ("n_layers", self.n_layers),
            ("k", self.k),
            ("attention_dim", self.attention_dim),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be positive"));
            }
        }
        if self.k > self.n_class {
            return invalid(format!(
                "beam width {} exceeds n_class {}",
                self.k, self.n_class
            ));
        }
        if self.sos_id >= self.n_class || self.eos_id >= self.n_class {
            return invalid(format!(
                "sos_id {} and eos_id {} must be below n_class {}",
                self.sos_id, self.eos_id, self.n_class
            ));
        }
        if !(0.0..1.0).contains(&self.dropout_p) {
            return invalid(format!("dropout_p must be in [0, 1), got {}", self.dropout_p));
        }
        Ok(())
    }
}

/// Result of one decoding call.
#[derive(Debug, Clone)]
pub struct SpellerOutput {
    /// `(batch, steps)` argmax of `logits`.
    pub y_hats: Array2<usize>,
    /// `(batch, steps, n_class)` log-probabilities.
    pub logits: Array3<f32>,
    /// Best beam hypothesis per item, only set by beam search.
    pub hypotheses: Option<Vec<Vec<usize>>>,
}

/// Attentional character decoder of a Listen-Attend-Spell model.
///
/// Turns listener features `(batch, time, hidden_dim)` into per-step
/// distributions over `n_class` symbols, decoding either teacher-forced,
/// greedily or with beam search.
pub struct Speller {
    config: SpellerConfig,
    embedding: Embedding,
    rnn: Rnn,
    attention: MultiHeadAttention,
    fc: Linear,
    training: bool,
    rng: StdRng,
}

impl Speller {
    pub fn new(config: SpellerConfig) -> Result<Self, SpellerError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let hidden = config.hidden_dim;

        let embedding = Embedding::new(config.n_class, hidden, &mut rng);
        let rnn = Rnn::new(
            config.rnn_type,
            hidden,
            hidden,
            config.n_layers,
            config.dropout_p,
            &mut rng,
        );
        let attention = MultiHeadAttention::new(hidden, config.attention_dim, config.n_head, &mut rng);
        let fc = Linear::new(hidden, config.n_class, &mut rng);

        log::info!(
            "Speller initialized: n_class={}, hidden_dim={}, rnn={}x{}, heads={}, beam={}",
            config.n_class,
            hidden,
            config.rnn_type,
            config.n_layers,
            config.n_head,
            config.k
        );

        Ok(Self {
            config,
            embedding,
            rnn,
            attention,
            fc,
            training: true,
            rng,
        })
    }

    pub fn config(&self) -> &SpellerConfig {
        &self.config
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn attention(&self) -> &MultiHeadAttention {
        &self.attention
    }

    pub fn init_state(&self, batch: usize) -> HiddenState {
        self.rnn.init_state(batch)
    }

    /// Repeats each state row `k` times, batch-major.
    pub fn inflate(state: &HiddenState, k: usize) -> HiddenState {
        state.inflate(k)
    }

    /// Repeats each listener sequence `k` times, batch-major.
    pub fn inflate_listener(listener_outputs: &ArrayView3<f32>, k: usize) -> Array3<f32> {
        let rows: Vec<usize> = (0..listener_outputs.len_of(Axis(0)))
            .flat_map(|row| std::iter::repeat(row).take(k))
            .collect();
        listener_outputs.select(Axis(0), &rows)
    }

    /// One decoder pass over `(batch, time)` input ids.
    ///
    /// Returns log-probabilities shaped `(batch * time, n_class)` and the next state.
    pub fn forward_step(
        &mut self,
        input_ids: &ArrayView2<usize>,
        state: &HiddenState,
        listener_outputs: &ArrayView3<f32>,
    ) -> Result<(Array2<f32>, HiddenState), SpellerError> {
        let mut embedded = self.embedding.forward(input_ids)?;
        if self.training {
            dropout(&mut embedded, self.config.dropout_p, &mut self.rng);
        }

        let (output, state) =
            self.rnn
                .forward(&embedded.view(), state, self.training, &mut self.rng)?;
        let context = self.attention.forward(&output.view(), listener_outputs)?;

        let (batch, time, hidden) = context.dim();
        let flat = context.to_shape((batch * time, hidden))?;
        let logits = self.fc.forward(&flat.view())?;
        Ok((log_softmax(&logits), state))
    }

    /// Decodes `inputs` (`(batch, seq_len)`, first column SOS) against the listener.
    ///
    /// Beam search wins over teacher forcing. Otherwise one uniform draw per
    /// call below `teacher_forcing_ratio` selects teacher forcing, else
    /// decoding feeds back its own top-1 prediction.
    pub fn forward(
        &mut self,
        inputs: &ArrayView2<usize>,
        listener_outputs: &ArrayView3<f32>,
        teacher_forcing_ratio: f32,
        use_beam_search: bool,
    ) -> Result<SpellerOutput, SpellerError> {
        let (batch, seq_len) = inputs.dim();
        if seq_len < 2 {
            return Err(SpellerError::SequenceTooShort(seq_len));
        }
        let (listener_batch, listener_len, listener_dim) = listener_outputs.dim();
        if listener_batch != batch {
            return Err(SpellerError::ShapeMismatch {
                what: "listener batch",
                expected: batch,
                actual: listener_batch,
            });
        }
        if listener_dim != self.config.hidden_dim {
            return Err(SpellerError::ShapeMismatch {
                what: "listener features",
                expected: self.config.hidden_dim,
                actual: listener_dim,
            });
        }
        if listener_len == 0 {
            return Err(SpellerError::EmptyListener);
        }

        let max_length = seq_len - 1;
        let use_teacher_forcing = self.rng.random::<f32>() < teacher_forcing_ratio;

        let (logits, hypotheses) = if use_beam_search {
            let (logits, hyps) = search::decode_beam(self, inputs, listener_outputs, max_length)?;
            (logits, Some(hyps))
        } else if use_teacher_forcing {
            (search::decode_teacher_forced(self, inputs, listener_outputs)?, None)
        } else {
            (search::decode_greedy(self, inputs, listener_outputs, max_length)?, None)
        };

        let (out_batch, steps, _) = logits.dim();
        let y_hats = Array2::from_shape_fn((out_batch, steps), |(b, t)| {
            argmax(logits.slice(s![b, t, ..]))
        });

        Ok(SpellerOutput {
            y_hats,
            logits,
            hypotheses,
        })
    }

    /// Decodes without targets, up to the configured `max_length` steps.
    pub fn recognize(
        &mut self,
        listener_outputs: &ArrayView3<f32>,
        use_beam_search: bool,
    ) -> Result<SpellerOutput, SpellerError> {
        let batch = listener_outputs.len_of(Axis(0));
        let inputs = Array2::from_elem((batch, self.config.max_length + 1), self.config.sos_id);
        self.forward(&inputs.view(), listener_outputs, 0.0, use_beam_search)
    }
}
