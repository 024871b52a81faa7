use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::{Speller, SpellerConfig, SpellerError};
use crate::config::Config;
use crate::nn::{Embedding, Linear, MultiHeadAttention, Rnn};

const CHECKPOINT_VERSION: u32 = 1;

#[derive(Serialize)]
struct CheckpointRef<'a> {
    version: u32,
    config: &'a SpellerConfig,
    embedding: &'a Embedding,
    rnn: &'a Rnn,
    attention: &'a MultiHeadAttention,
    fc: &'a Linear,
}

#[derive(Deserialize)]
struct Checkpoint {
    version: u32,
    config: SpellerConfig,
    embedding: Embedding,
    rnn: Rnn,
    attention: MultiHeadAttention,
    fc: Linear,
}

fn expect_dim(what: &'static str, expected: usize, actual: usize) -> Result<(), SpellerError> {
    if expected == actual {
        Ok(())
    } else {
        Err(SpellerError::ShapeMismatch {
            what,
            expected,
            actual,
        })
    }
}

/// Weight must be `(output, input)` and bias `output` long.
fn expect_linear(
    what: &'static str,
    linear: &Linear,
    input: usize,
    output: usize,
) -> Result<(), SpellerError> {
    expect_dim(what, input, linear.weight.ncols())?;
    expect_dim(what, output, linear.weight.nrows())?;
    expect_dim(what, output, linear.bias.len())
}

impl Checkpoint {
    fn validate(&self) -> Result<(), SpellerError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(SpellerError::InvalidConfig(format!(
                "unsupported checkpoint version {}",
                self.version
            )));
        }
        let config = &self.config;
        config.validate()?;
        if self.rnn.kind != config.rnn_type {
            return Err(SpellerError::StateKind(config.rnn_type));
        }

        let hidden = config.hidden_dim;
        expect_dim("embedding classes", config.n_class, self.embedding.n_class())?;
        expect_dim("embedding width", hidden, self.embedding.dim())?;
        expect_dim("rnn layers", config.n_layers, self.rnn.n_layers())?;
        expect_dim("rnn hidden size", hidden, self.rnn.hidden_size)?;
        let gates = self.rnn.kind.gate_count() * hidden;
        for layer in &self.rnn.layers {
            expect_dim("rnn w_ih rows", gates, layer.w_ih.nrows())?;
            expect_dim("rnn w_ih columns", hidden, layer.w_ih.ncols())?;
            expect_dim("rnn w_hh rows", gates, layer.w_hh.nrows())?;
            expect_dim("rnn w_hh columns", hidden, layer.w_hh.ncols())?;
            expect_dim("rnn b_ih", gates, layer.b_ih.len())?;
            expect_dim("rnn b_hh", gates, layer.b_hh.len())?;
        }

        let attention = &self.attention;
        expect_dim("attention features", hidden, attention.in_features)?;
        expect_dim("attention heads", config.n_head, attention.n_head)?;
        expect_dim("attention width", config.attention_dim, attention.dim)?;
        let projected = attention.dim * attention.n_head;
        expect_linear("attention linear_q", &attention.linear_q, hidden, projected)?;
        expect_linear("attention linear_k", &attention.linear_k, hidden, projected)?;
        expect_linear("attention fc", &attention.fc, hidden + projected, hidden)?;

        expect_linear("output fc", &self.fc, hidden, config.n_class)
    }
}

impl Speller {
    /// Writes parameters and configuration as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SpellerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let checkpoint = CheckpointRef {
            version: CHECKPOINT_VERSION,
            config: &self.config,
            embedding: &self.embedding,
            rnn: &self.rnn,
            attention: &self.attention,
            fc: &self.fc,
        };
        fs::write(path, serde_json::to_vec(&checkpoint)?)?;
        log::info!("Speller checkpoint saved to {}", path.display());
        Ok(())
    }

    /// Restores a speller written by [`Speller::save`], in training mode.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SpellerError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SpellerError::CheckpointNotFound(path.display().to_string()));
        }
        log::info!("Loading speller checkpoint from {}...", path.display());
        let bytes = fs::read(path)?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        checkpoint.validate()?;

        let Checkpoint {
            config,
            embedding,
            rnn,
            attention,
            fc,
            ..
        } = checkpoint;
        let rng = StdRng::seed_from_u64(config.seed);
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

    /// Loads `model_path` when `load_model` is set, otherwise builds a fresh speller.
    pub fn from_run_config(
        config: &Config,
        n_class: usize,
        sos_id: usize,
        eos_id: usize,
    ) -> Result<Self, SpellerError> {
        if config.load_model {
            let Some(path) = config.model_path.as_deref() else {
                return Err(SpellerError::InvalidConfig(
                    "load_model is set but model_path is missing".to_string(),
                ));
            };
            let speller = Self::load(path)?;
            let loaded = speller.config();
            if loaded.n_class != n_class || loaded.sos_id != sos_id || loaded.eos_id != eos_id {
                log::warn!(
                    "Checkpoint vocabulary (n_class={}, sos={}, eos={}) differs from labels (n_class={}, sos={}, eos={})",
                    loaded.n_class,
                    loaded.sos_id,
                    loaded.eos_id,
                    n_class,
                    sos_id,
                    eos_id
                );
            }
            return Ok(speller);
        }
        Self::new(SpellerConfig::from_config(config, n_class, sos_id, eos_id))
    }
}
