use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use super::{parse_csv, progress, save_cache, DataError, TARGET_KEY_PREFIX};

/// Utterance key (`KaiSpeech_label_<n>`) to raw label line.
pub type TargetDict = BTreeMap<String, String>;

fn target_key(label_path: &Path) -> Result<String, DataError> {
    let invalid = || DataError::InvalidFileName(label_path.display().to_string());
    let name = label_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(invalid)?;
    let stem = name.split('.').next().unwrap_or(name);
    let file_num = stem.rsplit('_').next().unwrap_or(stem);
    if file_num.is_empty() {
        return Err(invalid());
    }
    Ok(format!("{TARGET_KEY_PREFIX}{file_num}"))
}

fn read_first_line(path: &Path) -> Result<String, DataError> {
    let content = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
    Ok(content.lines().next().unwrap_or_default().to_string())
}

fn load_chunk(paths: &[PathBuf]) -> Result<Vec<(String, String)>, DataError> {
    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        entries.push((target_key(path)?, read_first_line(path)?));
        progress::advance(1);
    }
    Ok(entries)
}

/// Reads the first line of every label file, keyed by the file number.
///
/// Files are split across `workers` threads. When `cache_path` is given the
/// resulting dictionary is written there as JSON.
pub fn load_targets<P: AsRef<Path>>(
    label_paths: &[P],
    workers: usize,
    cache_path: Option<&Path>,
) -> Result<TargetDict, DataError> {
    let start = Instant::now();
    let paths: Vec<PathBuf> = label_paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
    progress::start_tracking(paths.len());

    let result = load_parallel(&paths, workers.max(1));
    let target_dict = match result {
        Ok(dict) => dict,
        Err(err) => {
            progress::record_failure(err.to_string());
            return Err(err);
        }
    };
    progress::mark_finished();

    log::info!(
        "Loaded {} targets from {} label files in {:?}",
        target_dict.len(),
        paths.len(),
        start.elapsed()
    );

    if let Some(cache_path) = cache_path {
        save_cache(&target_dict, cache_path, "target_dict save complete !!")?;
    }
    Ok(target_dict)
}

fn load_parallel(paths: &[PathBuf], workers: usize) -> Result<TargetDict, DataError> {
    if paths.is_empty() {
        return Ok(TargetDict::new());
    }
    let chunk_size = paths.len().div_ceil(workers);
    log::debug!(
        "Reading {} label files with {} worker(s)",
        paths.len(),
        paths.len().div_ceil(chunk_size)
    );

    let chunks: Vec<Result<Vec<(String, String)>, DataError>> = thread::scope(|scope| {
        let handles: Vec<_> = paths
            .chunks(chunk_size)
            .map(|chunk| scope.spawn(move || load_chunk(chunk)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(Err(DataError::Worker)))
            .collect()
    });

    let mut target_dict = TargetDict::new();
    for chunk in chunks {
        target_dict.extend(chunk?);
    }
    Ok(target_dict)
}

/// Reads a data list CSV with `audio` and `label` columns.
///
/// Each entry is prefixed with `dataset_path` verbatim, so the prefix should
/// carry its own trailing separator.
pub fn load_data_list<P: AsRef<Path>>(
    data_list_path: P,
    dataset_path: &str,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>), DataError> {
    let path = data_list_path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
    let rows = parse_csv(&content)?;
    let mut rows = rows.into_iter();

    let header = rows.next().unwrap_or_default();
    let column = |name: &str| {
        header
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| DataError::MissingColumn(name.to_string()))
    };
    let audio_col = column("audio")?;
    let label_col = column("label")?;

    let mut audio_paths = Vec::new();
    let mut label_paths = Vec::new();
    for (idx, row) in rows.enumerate() {
        let line = idx + 2;
        let field = |col: usize| {
            row.get(col).ok_or_else(|| DataError::Csv {
                line,
                reason: format!("expected at least {} fields, found {}", col + 1, row.len()),
            })
        };
        audio_paths.push(PathBuf::from(format!("{dataset_path}{}", field(audio_col)?)));
        label_paths.push(PathBuf::from(format!("{dataset_path}{}", field(label_col)?)));
    }

    log::info!(
        "Data list {} holds {} entries",
        path.display(),
        audio_paths.len()
    );
    Ok((audio_paths, label_paths))
}

/// Reads the character label CSV (`id,char,...` with a header row).
pub fn load_label<P: AsRef<Path>>(
    label_path: P,
) -> Result<(HashMap<String, usize>, HashMap<usize, String>), DataError> {
    let path = label_path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
    let rows = parse_csv(&content)?;

    let mut char2id = HashMap::new();
    let mut id2char = HashMap::new();
    for (idx, row) in rows.iter().enumerate().skip(1) {
        let line = idx + 1;
        let (Some(raw_id), Some(ch)) = (row.first(), row.get(1)) else {
            return Err(DataError::Csv {
                line,
                reason: "expected id and character columns".to_string(),
            });
        };
        let id = raw_id
            .trim()
            .parse::<usize>()
            .map_err(|_| DataError::InvalidLabelId {
                line,
                value: raw_id.clone(),
            })?;
        char2id.insert(ch.clone(), id);
        id2char.insert(id, ch.clone());
    }

    log::debug!("Loaded {} character labels from {}", id2char.len(), path.display());
    Ok((char2id, id2char))
}
