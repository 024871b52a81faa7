use std::fs;
use std::path::{Path, PathBuf};

use num_cpus::get_physical;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_PREFIX: &str = "LAS_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Io(_) => "Could not read the configuration file.",
            Self::Json(_) => "The configuration file is not valid JSON.",
            Self::Invalid { .. } => "The configuration contains an out-of-range value.",
        }
    }
}

/// Run configuration for the listener/speller pair.
///
/// Plateau learning rates only exist when `use_multistep_lr` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub use_bidirectional: bool,
    pub use_label_smooth: bool,
    pub input_reverse: bool,
    pub use_augment: bool,
    pub use_pickle: bool,
    pub use_cuda: bool,
    pub augment_ratio: f64,
    pub hidden_dim: usize,
    pub dropout: f64,
    pub listener_layer_size: usize,
    pub speller_layer_size: usize,
    pub n_head: usize,
    pub batch_size: usize,
    /// Number of loader workers, `0` means one per physical core.
    pub worker_num: usize,
    pub max_epochs: usize,
    pub use_multistep_lr: bool,
    pub init_lr: f64,
    pub high_plateau_lr: Option<f64>,
    pub low_plateau_lr: Option<f64>,
    pub teacher_forcing: f64,
    pub seed: u64,
    pub max_len: usize,
    pub load_model: bool,
    pub model_path: Option<PathBuf>,
    pub sr: u32,
    /// Analysis window in milliseconds.
    pub window_size: u32,
    /// Hop between windows in milliseconds.
    pub stride: u32,
}

pub const DEFAULT_HIGH_PLATEAU_LR: f64 = 0.0003;
pub const DEFAULT_LOW_PLATEAU_LR: f64 = 0.00001;

impl Default for Config {
    fn default() -> Self {
        Self {
            use_bidirectional: true,
            use_label_smooth: true,
            input_reverse: true,
            use_augment: true,
            use_pickle: false,
            use_cuda: true,
            augment_ratio: 1.0,
            hidden_dim: 256,
            dropout: 0.5,
            listener_layer_size: 5,
            speller_layer_size: 3,
            n_head: 12,
            batch_size: 32,
            worker_num: 1,
            max_epochs: 40,
            use_multistep_lr: false,
            init_lr: 0.0001,
            high_plateau_lr: None,
            low_plateau_lr: None,
            teacher_forcing: 0.90,
            seed: 1,
            max_len: 151,
            load_model: false,
            model_path: None,
            sr: 16000,
            window_size: 20,
            stride: 10,
        }
    }
}

impl Config {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.normalize_plateaus();
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides(ENV_PREFIX);
        config
    }

    /// Enabling multistep LR fills in missing plateau rates, disabling it drops them.
    pub fn set_multistep_lr(&mut self, enabled: bool) {
        self.use_multistep_lr = enabled;
        self.normalize_plateaus();
    }

    fn normalize_plateaus(&mut self) {
        if self.use_multistep_lr {
            self.high_plateau_lr.get_or_insert(DEFAULT_HIGH_PLATEAU_LR);
            self.low_plateau_lr.get_or_insert(DEFAULT_LOW_PLATEAU_LR);
        } else {
            self.high_plateau_lr = None;
            self.low_plateau_lr = None;
        }
    }

    pub fn apply_env_overrides(&mut self, prefix: &str) {
        fn apply<T: std::str::FromStr>(prefix: &str, suffix: &str, target: &mut T)
        where
            T::Err: std::fmt::Display,
        {
            let Ok(value) = std::env::var(format!("{prefix}{suffix}")) else {
                return;
            };
            match value.trim().parse::<T>() {
                Ok(parsed) => *target = parsed,
                Err(err) => {
                    log::warn!("Ignoring invalid {prefix}{suffix} value '{}': {}", value, err)
                }
            }
        }

        apply(prefix, "USE_BIDIRECTIONAL", &mut self.use_bidirectional);
        apply(prefix, "USE_LABEL_SMOOTH", &mut self.use_label_smooth);
        apply(prefix, "INPUT_REVERSE", &mut self.input_reverse);
        apply(prefix, "USE_AUGMENT", &mut self.use_augment);
        apply(prefix, "USE_PICKLE", &mut self.use_pickle);
        apply(prefix, "USE_CUDA", &mut self.use_cuda);
        apply(prefix, "AUGMENT_RATIO", &mut self.augment_ratio);
        apply(prefix, "HIDDEN_DIM", &mut self.hidden_dim);
        apply(prefix, "DROPOUT", &mut self.dropout);
        apply(prefix, "LISTENER_LAYER_SIZE", &mut self.listener_layer_size);
        apply(prefix, "SPELLER_LAYER_SIZE", &mut self.speller_layer_size);
        apply(prefix, "N_HEAD", &mut self.n_head);
        apply(prefix, "BATCH_SIZE", &mut self.batch_size);
        apply(prefix, "WORKER_NUM", &mut self.worker_num);
        apply(prefix, "MAX_EPOCHS", &mut self.max_epochs);
        apply(prefix, "INIT_LR", &mut self.init_lr);
        apply(prefix, "TEACHER_FORCING", &mut self.teacher_forcing);
        apply(prefix, "SEED", &mut self.seed);
        apply(prefix, "MAX_LEN", &mut self.max_len);
        apply(prefix, "LOAD_MODEL", &mut self.load_model);
        apply(prefix, "SR", &mut self.sr);
        apply(prefix, "WINDOW_SIZE", &mut self.window_size);
        apply(prefix, "STRIDE", &mut self.stride);

        let mut multistep = self.use_multistep_lr;
        apply(prefix, "USE_MULTISTEP_LR", &mut multistep);
        self.set_multistep_lr(multistep);
        if let Some(rate) = self.high_plateau_lr.as_mut() {
            apply(prefix, "HIGH_PLATEAU_LR", rate);
        }
        if let Some(rate) = self.low_plateau_lr.as_mut() {
            apply(prefix, "LOW_PLATEAU_LR", rate);
        }

        if let Ok(path) = std::env::var(format!("{prefix}MODEL_PATH")) {
            if !path.trim().is_empty() {
                self.model_path = Some(PathBuf::from(path.trim()));
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| ConfigError::Invalid {
            field,
            reason: reason.to_string(),
        };

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(invalid("dropout", "must be in [0, 1)"));
        }
        if !(0.0..=1.0).contains(&self.teacher_forcing) {
            return Err(invalid("teacher_forcing", "must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.augment_ratio) {
            return Err(invalid("augment_ratio", "must be in [0, 1]"));
        }

        let positive = [
            ("hidden_dim", self.hidden_dim),
            ("listener_layer_size", self.listener_layer_size),
            ("speller_layer_size", self.speller_layer_size),
            ("n_head", self.n_head),
            ("batch_size", self.batch_size),
            ("max_len", self.max_len),
        ];
        if let Some((field, _)) = positive.into_iter().find(|(_, v)| *v == 0) {
            return Err(invalid(field, "must be positive"));
        }
        if self.sr == 0 || self.window_size == 0 || self.stride == 0 {
            return Err(invalid("sr/window_size/stride", "must be positive"));
        }
        if self.init_lr <= 0.0 {
            return Err(invalid("init_lr", "must be positive"));
        }
        if self.load_model && self.model_path.is_none() {
            return Err(invalid("model_path", "required when load_model is set"));
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        if self.worker_num > 0 {
            return self.worker_num;
        }
        let physical = get_physical();
        log::info!("worker_num not set; defaulting to {} physical cores", physical);
        physical
    }

    pub fn log_summary(&self) {
        log::info!("use_bidirectional : {}", self.use_bidirectional);
        log::info!("use_label_smooth : {}", self.use_label_smooth);
        log::info!("use_pickle : {}", self.use_pickle);
        log::info!("use_augment : {}", self.use_augment);
        log::info!("augment_ratio : {:.2}", self.augment_ratio);
        log::info!("input_reverse : {}", self.input_reverse);
        log::info!("hidden_dim : {}", self.hidden_dim);
        log::info!("listener_layer_size : {}", self.listener_layer_size);
        log::info!("speller_layer_size : {}", self.speller_layer_size);
        log::info!("n_head : {}", self.n_head);
        log::info!("dropout : {:.2}", self.dropout);
        log::info!("batch_size : {}", self.batch_size);
        log::info!("worker_num : {}", self.worker_num);
        log::info!("max_epochs : {}", self.max_epochs);
        log::info!("initial learning rate : {:.4}", self.init_lr);
        log::info!("use_multistep_lr : {}", self.use_multistep_lr);
        if self.use_multistep_lr {
            if let (Some(high), Some(low)) = (self.high_plateau_lr, self.low_plateau_lr) {
                log::info!("high plateau learning rate : {:.4}", high);
                log::info!("low plateau learning rate : {:.4}", low);
            }
        }
        log::info!("teacher_forcing_ratio : {:.2}", self.teacher_forcing);
        log::info!("seed : {}", self.seed);
        log::info!("max_len : {}", self.max_len);
        log::info!("load_model : {}", self.load_model);
        match &self.model_path {
            Some(path) => log::info!("model_path : {}", path.display()),
            None => log::info!("model_path : (none)"),
        }
        log::info!("use_cuda : {}", self.use_cuda);
        log::info!("sr : {}", self.sr);
        log::info!("window_size : {}", self.window_size);
        log::info!("stride : {}", self.stride);
    }
}
