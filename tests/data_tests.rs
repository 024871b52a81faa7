use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use las_speller_lib::data::{
    ids_to_sentence, load_cache, load_data_list, load_label, load_targets, pad_targets,
    parse_label_ids, save_cache, DataError, TargetDict,
};

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "{}_{}",
        name,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write should succeed");
    path
}

#[test]
fn load_label_builds_both_directions() {
    let dir = temp_dir("las_label");
    let path = write(
        &dir,
        "labels.csv",
        "id,char,freq\n0,<s>,0\n1,</s>,0\n2,가,120\n3,\",\",4\n",
    );

    let (char2id, id2char) = load_label(&path).expect("labels should load");
    assert_eq!(char2id.len(), 4);
    assert_eq!(char2id["가"], 2);
    assert_eq!(char2id[","], 3);
    assert_eq!(id2char[&1], "</s>");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn load_label_rejects_bad_id() {
    let dir = temp_dir("las_label_bad");
    let path = write(&dir, "labels.csv", "id,char\nzero,<s>\n");
    let err = load_label(&path).unwrap_err();
    assert!(matches!(err, DataError::InvalidLabelId { line: 2, .. }));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn load_data_list_prefixes_dataset_path() {
    let dir = temp_dir("las_data_list");
    let path = write(
        &dir,
        "train_list.csv",
        "audio,label\r\nKaiSpeech_000001.pcm,KaiSpeech_label_000001.txt\r\nKaiSpeech_000002.pcm,KaiSpeech_label_000002.txt\r\n",
    );

    let (audio, labels) = load_data_list(&path, "/data/").expect("list should load");
    assert_eq!(
        audio,
        vec![
            PathBuf::from("/data/KaiSpeech_000001.pcm"),
            PathBuf::from("/data/KaiSpeech_000002.pcm")
        ]
    );
    assert_eq!(labels[1], PathBuf::from("/data/KaiSpeech_label_000002.txt"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn load_data_list_requires_columns() {
    let dir = temp_dir("las_data_list_header");
    let path = write(&dir, "list.csv", "wav,text\na.pcm,a.txt\n");
    let err = load_data_list(&path, "").unwrap_err();
    assert!(matches!(err, DataError::MissingColumn(ref col) if col == "audio"));
    assert!(err.user_message().contains("CSV"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn load_targets_keys_by_file_number_and_caches() {
    let dir = temp_dir("las_targets");
    let paths: Vec<PathBuf> = (1..=5)
        .map(|n| {
            write(
                &dir,
                &format!("KaiSpeech_label_{n:06}.txt"),
                &format!("{n} {}\nsecond line\n", n + 10),
            )
        })
        .collect();
    let cache = dir.join("cache").join("target_dict.json");

    let targets = load_targets(&paths, 2, Some(cache.as_path())).expect("targets should load");
    assert_eq!(targets.len(), 5);
    assert_eq!(targets["KaiSpeech_label_000003"], "3 13");

    let cached: TargetDict = load_cache(&cache, "").expect("cache should load");
    assert_eq!(cached, targets);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn load_targets_reports_missing_file() {
    let dir = temp_dir("las_targets_missing");
    let paths = vec![dir.join("KaiSpeech_label_000009.txt")];
    let err = load_targets(&paths, 1, None).unwrap_err();
    assert!(matches!(err, DataError::Io { .. }));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn cache_round_trips_nested_values() {
    let dir = temp_dir("las_cache");
    let path = dir.join("pairs.json");
    let value = vec![(String::from("a"), vec![1usize, 2]), (String::from("b"), vec![])];
    save_cache(&value, &path, "saved").expect("save should succeed");
    let loaded: Vec<(String, Vec<usize>)> = load_cache(&path, "").expect("load should succeed");
    assert_eq!(loaded, value);

    std::fs::write(&path, "{not json").expect("write should succeed");
    let err = load_cache::<Vec<(String, Vec<usize>)>, _>(&path, "").unwrap_err();
    assert!(matches!(err, DataError::Json(_)));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn targets_turn_into_padded_batch_and_back() {
    let id2char: HashMap<usize, String> = [(3usize, "안"), (4, "녕"), (5, " ")]
        .into_iter()
        .map(|(id, c)| (id, c.to_string()))
        .collect();
    let seqs = vec![
        parse_label_ids("3 4").unwrap(),
        parse_label_ids("3 5 4").unwrap(),
    ];
    let targets = pad_targets(&seqs, 1, 2, 0);
    assert_eq!(targets.dim(), (2, 5));

    let first: Vec<usize> = targets.row(0).iter().skip(1).copied().collect();
    assert_eq!(ids_to_sentence(&first, &id2char, 2), "안녕");
    let second: Vec<usize> = targets.row(1).iter().skip(1).copied().collect();
    assert_eq!(ids_to_sentence(&second, &id2char, 2), "안 녕");
}
