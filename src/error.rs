use thiserror::Error;

use crate::config::ConfigError;
use crate::data::DataError;
use crate::speller::SpellerError;

/// Unified crate errors.
#[derive(Error, Debug)]
pub enum LasError {
    #[error("Config: {0}")]
    Config(#[from] ConfigError),

    #[error("Data: {0}")]
    Data(#[from] DataError),

    #[error("Speller: {0}")]
    Speller(#[from] SpellerError),
}

impl LasError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Config(e) => e.user_message(),
            Self::Data(e) => e.user_message(),
            Self::Speller(e) => e.user_message(),
        }
    }
}

impl serde::Serialize for LasError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
