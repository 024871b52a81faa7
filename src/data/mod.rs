mod cache;
mod csv;
mod label;
mod load;
mod progress;

use thiserror::Error;

pub use cache::{load_cache, save_cache};
pub use label::{ids_to_sentence, pad_targets, parse_label_ids};
pub use load::{load_data_list, load_label, load_targets, TargetDict};
pub use progress::{current_load_progress, LoadProgress};

pub(crate) use self::csv::parse_csv;

pub const TARGET_KEY_PREFIX: &str = "KaiSpeech_label_";

#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error at line {line}: {reason}")]
    Csv { line: usize, reason: String },
    #[error("Column `{0}` not found in data list header")]
    MissingColumn(String),
    #[error("Invalid label id `{value}` at line {line}")]
    InvalidLabelId { line: usize, value: String },
    #[error("Cannot derive a file number from {0}")]
    InvalidFileName(String),
    #[error("Loader worker panicked")]
    Worker,
}

impl DataError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Io { .. } => {
                "The loader could not read or write its files. Check paths and permissions."
            }
            Self::Json(_) => "A cached data file is corrupted. Delete it and load again.",
            Self::Csv { .. } | Self::MissingColumn(_) => {
                "A data list is malformed. Check the CSV header and quoting."
            }
            Self::InvalidLabelId { .. } => "The character label file contains a bad id.",
            Self::InvalidFileName(_) => "A label file name does not end with a file number.",
            Self::Worker => "Loading was interrupted by an internal error.",
        }
    }
}
