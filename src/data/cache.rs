use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::DataError;

/// Reads a JSON cache written by [`save_cache`].
pub fn load_cache<T, P>(path: P, message: &str) -> Result<T, DataError>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
    let value = serde_json::from_str(&content)?;
    if !message.is_empty() {
        log::info!("{}", message);
    }
    Ok(value)
}

/// Writes `value` as JSON, creating parent directories as needed.
pub fn save_cache<T, P>(value: &T, path: P, message: &str) -> Result<(), DataError>
where
    T: Serialize + ?Sized,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| DataError::io(parent, e))?;
    }
    let content = serde_json::to_string(value)?;
    fs::write(path, content).map_err(|e| DataError::io(path, e))?;
    if !message.is_empty() {
        log::info!("{}", message);
    }
    Ok(())
}
