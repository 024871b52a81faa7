pub mod config;
pub mod data;
pub mod nn;
pub mod speller;

mod error;

pub use config::{Config, ConfigError};
pub use data::DataError;
pub use error::LasError;
pub use speller::{Speller, SpellerConfig, SpellerError, SpellerOutput};
