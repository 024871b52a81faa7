use std::time::{SystemTime, UNIX_EPOCH};

use ndarray::{array, s, Array2, Array3, Axis};

use las_speller_lib::nn::RnnKind;
use las_speller_lib::{Config, LasError, Speller, SpellerConfig, SpellerError};

const N_CLASS: usize = 6;
const SOS: usize = 1;
const EOS: usize = 2;
const HIDDEN: usize = 8;

fn small_config() -> SpellerConfig {
    SpellerConfig {
        attention_dim: 4,
        k: 3,
        dropout_p: 0.2,
        seed: 7,
        ..SpellerConfig::new(N_CLASS, 4, HIDDEN, SOS, EOS, 2)
    }
}

fn listener(batch: usize, len: usize) -> Array3<f32> {
    Array3::from_shape_fn((batch, len, HIDDEN), |(b, t, f)| {
        ((b * 13 + t * 5 + f) as f32 * 0.41).sin()
    })
}

fn sos_inputs(batch: usize, seq_len: usize) -> Array2<usize> {
    Array2::from_elem((batch, seq_len), SOS)
}

fn assert_log_prob_rows(logits: &Array3<f32>) {
    for row in logits.lanes(Axis(2)) {
        let total: f32 = row.iter().map(|v| v.exp()).sum();
        assert!((total - 1.0).abs() < 1e-4, "row sums to {total}");
    }
}

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "{}_{}",
        name,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

#[test]
fn greedy_decoding_shapes() {
    let mut speller = Speller::new(small_config()).unwrap();
    speller.eval();
    let out = speller
        .forward(&sos_inputs(2, 5).view(), &listener(2, 7).view(), 0.0, false)
        .unwrap();

    assert_eq!(out.logits.dim(), (2, 4, N_CLASS));
    assert_eq!(out.y_hats.dim(), (2, 4));
    assert!(out.hypotheses.is_none());
    assert!(out.y_hats.iter().all(|&id| id < N_CLASS));
    assert_log_prob_rows(&out.logits);
}

#[test]
fn teacher_forcing_drops_eos_columns() {
    let mut speller = Speller::new(small_config()).unwrap();
    let inputs = array![[SOS, 3, 4, EOS, 0], [SOS, 5, EOS, 0, 0]];
    let out = speller
        .forward(&inputs.view(), &listener(2, 3).view(), 1.0, false)
        .unwrap();

    assert_eq!(out.logits.dim(), (2, 4, N_CLASS));
    assert_eq!(out.y_hats.dim(), (2, 4));
    assert_log_prob_rows(&out.logits);
}

#[test]
fn teacher_forcing_rejects_ragged_rows() {
    let mut speller = Speller::new(small_config()).unwrap();
    let inputs = array![[SOS, 3, EOS, EOS], [SOS, 3, 4, EOS]];
    let err = speller
        .forward(&inputs.view(), &listener(2, 3).view(), 1.0, false)
        .unwrap_err();
    assert!(matches!(
        err,
        SpellerError::RaggedTeacherInputs {
            row: 1,
            expected: 2,
            actual: 3
        }
    ));
}

#[test]
fn teacher_forcing_rejects_unknown_token() {
    let mut speller = Speller::new(small_config()).unwrap();
    let inputs = array![[SOS, 9, EOS]];
    let err = speller
        .forward(&inputs.view(), &listener(1, 3).view(), 1.0, false)
        .unwrap_err();
    assert!(matches!(
        err,
        SpellerError::TokenOutOfRange {
            token: 9,
            n_class: N_CLASS
        }
    ));
}

#[test]
fn beam_search_pads_best_hypothesis() {
    let mut speller = Speller::new(small_config()).unwrap();
    speller.eval();
    let out = speller
        .forward(&sos_inputs(2, 5).view(), &listener(2, 6).view(), 0.0, true)
        .unwrap();

    assert_eq!(out.logits.dim(), (2, 4, N_CLASS));
    let hypotheses = out.hypotheses.expect("beam search returns hypotheses");
    assert_eq!(hypotheses.len(), 2);
    for (b, hyp) in hypotheses.iter().enumerate() {
        assert!(!hyp.is_empty() && hyp.len() <= 4);
        assert!(hyp.iter().all(|&id| id < N_CLASS));
        for t in hyp.len()..4 {
            assert_eq!(out.logits[[b, t, EOS]], 0.0);
            assert_eq!(out.y_hats[[b, t]], EOS);
        }
    }
    assert_log_prob_rows(&out.logits);
}

#[test]
fn beam_of_one_follows_greedy_path() {
    let config = SpellerConfig {
        k: 1,
        ..small_config()
    };
    let inputs = sos_inputs(3, 5);
    let features = listener(3, 5);

    let mut speller = Speller::new(config).unwrap();
    speller.eval();
    let greedy = speller
        .forward(&inputs.view(), &features.view(), 0.0, false)
        .unwrap();
    let beam = speller
        .forward(&inputs.view(), &features.view(), 0.0, true)
        .unwrap();

    for (b, hyp) in beam.hypotheses.unwrap().iter().enumerate() {
        let prefix: Vec<usize> = greedy.y_hats.row(b).iter().take(hyp.len()).copied().collect();
        assert_eq!(&prefix, hyp);
        let greedy_rows = greedy.logits.slice(s![b, ..hyp.len(), ..]);
        let beam_rows = beam.logits.slice(s![b, ..hyp.len(), ..]);
        for (g, k) in greedy_rows.iter().zip(beam_rows.iter()) {
            assert!((g - k).abs() < 1e-5);
        }
    }
}

#[test]
fn eval_mode_is_deterministic() {
    let mut speller = Speller::new(small_config()).unwrap();
    speller.eval();
    assert!(!speller.is_training());
    let inputs = array![[SOS, 3, 4, EOS]];
    let features = listener(1, 4);
    let a = speller.forward(&inputs.view(), &features.view(), 1.0, false).unwrap();
    let b = speller.forward(&inputs.view(), &features.view(), 1.0, false).unwrap();
    assert_eq!(a.logits, b.logits);
    speller.train();
    assert!(speller.is_training());
}

#[test]
fn forward_validates_shapes() {
    let mut speller = Speller::new(small_config()).unwrap();
    let err = speller
        .forward(&sos_inputs(2, 3).view(), &listener(3, 4).view(), 0.0, false)
        .unwrap_err();
    assert!(matches!(
        err,
        SpellerError::ShapeMismatch {
            what: "listener batch",
            ..
        }
    ));

    let err = speller
        .forward(&sos_inputs(1, 1).view(), &listener(1, 4).view(), 0.0, false)
        .unwrap_err();
    assert!(matches!(err, SpellerError::SequenceTooShort(1)));

    let empty = Array3::<f32>::zeros((1, 0, HIDDEN));
    let err = speller
        .forward(&sos_inputs(1, 3).view(), &empty.view(), 0.0, false)
        .unwrap_err();
    assert!(matches!(err, SpellerError::EmptyListener));

    let narrow = Array3::<f32>::zeros((1, 4, HIDDEN - 1));
    assert!(speller
        .forward(&sos_inputs(1, 3).view(), &narrow.view(), 0.0, false)
        .is_err());
}

#[test]
fn lstm_and_vanilla_rnn_decode() {
    for kind in [RnnKind::Lstm, RnnKind::Rnn] {
        let config = SpellerConfig {
            rnn_type: kind,
            n_layers: 2,
            ..small_config()
        };
        let mut speller = Speller::new(config).unwrap();
        let greedy = speller
            .forward(&sos_inputs(2, 4).view(), &listener(2, 5).view(), 0.0, false)
            .unwrap();
        assert_eq!(greedy.logits.dim(), (2, 3, N_CLASS));
        let beam = speller
            .forward(&sos_inputs(2, 4).view(), &listener(2, 5).view(), 0.0, true)
            .unwrap();
        assert_eq!(beam.logits.dim(), (2, 3, N_CLASS));
    }
}

#[test]
fn recognize_uses_configured_length() {
    let mut speller = Speller::new(small_config()).unwrap();
    speller.eval();
    let out = speller.recognize(&listener(2, 5).view(), false).unwrap();
    assert_eq!(out.logits.dim(), (2, 4, N_CLASS));
    let out = speller.recognize(&listener(2, 5).view(), true).unwrap();
    assert_eq!(out.hypotheses.map(|h| h.len()), Some(2));
}

#[test]
fn inflate_listener_repeats_batch_major() {
    let features = listener(2, 3);
    let inflated = Speller::inflate_listener(&features.view(), 3);
    assert_eq!(inflated.dim(), (6, 3, HIDDEN));
    assert_eq!(inflated.index_axis(Axis(0), 2), features.index_axis(Axis(0), 0));
    assert_eq!(inflated.index_axis(Axis(0), 3), features.index_axis(Axis(0), 1));
}

#[test]
fn checkpoint_round_trip_preserves_outputs() {
    let path = temp_path("las_speller_ckpt").join("speller.json");
    let mut speller = Speller::new(small_config()).unwrap();
    speller.eval();
    let before = speller.recognize(&listener(2, 5).view(), false).unwrap();
    speller.save(&path).expect("save should succeed");

    let mut restored = Speller::load(&path).expect("load should succeed");
    assert!(restored.is_training());
    assert_eq!(restored.config(), speller.config());
    restored.eval();
    let after = restored.recognize(&listener(2, 5).view(), false).unwrap();
    for (a, b) in before.logits.iter().zip(after.logits.iter()) {
        assert!((a - b).abs() < 1e-4);
    }

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[test]
fn load_missing_checkpoint_fails() {
    let err = Speller::load(temp_path("las_missing_ckpt")).err().unwrap();
    assert!(matches!(err, SpellerError::CheckpointNotFound(_)));
    assert!(err.user_message().contains("missing"));
}

#[test]
fn from_run_config_builds_or_loads() {
    let run = Config {
        hidden_dim: HIDDEN,
        n_head: 2,
        speller_layer_size: 1,
        max_len: 3,
        ..Config::default()
    };
    let fresh = Speller::from_run_config(&run, N_CLASS, SOS, EOS).unwrap();
    assert_eq!(fresh.config().max_length, 3);
    assert_eq!(fresh.config().attention_dim, 128);

    let path = temp_path("las_run_ckpt.json");
    fresh.save(&path).unwrap();
    let run = Config {
        load_model: true,
        model_path: Some(path.clone()),
        ..run
    };
    let loaded = Speller::from_run_config(&run, N_CLASS, SOS, EOS).unwrap();
    assert_eq!(loaded.config(), fresh.config());

    let run = Config {
        model_path: None,
        ..run
    };
    assert!(Speller::from_run_config(&run, N_CLASS, SOS, EOS).is_err());
    let _ = std::fs::remove_file(&path);
}

#[test]
fn invalid_config_is_rejected() {
    let config = SpellerConfig {
        k: N_CLASS + 1,
        ..small_config()
    };
    assert!(matches!(
        Speller::new(config).err(),
        Some(SpellerError::InvalidConfig(_))
    ));

    let config = SpellerConfig {
        eos_id: N_CLASS,
        ..small_config()
    };
    let err = LasError::from(Speller::new(config).err().unwrap());
    assert!(err.user_message().contains("configuration"));
    assert!(err.to_string().starts_with("Speller: "));
}

#[test]
fn teacher_forcing_single_utterance() {
    let mut speller = Speller::new(small_config()).unwrap();
    let inputs = array![[SOS, 3, 4, EOS]];
    let features = listener(1, 5);

    let out = speller
        .forward(&inputs.view(), &features.view(), 1.0, false)
        .unwrap();
    assert_eq!(out.logits.dim(), (1, 3, N_CLASS));
    assert_log_prob_rows(&out.logits);

    speller.eval();
    let out = speller
        .forward(&inputs.view(), &features.view(), 1.0, false)
        .unwrap();
    assert_eq!(out.y_hats.dim(), (1, 3));
}

#[test]
fn beam_rows_match_step_by_step_replay() {
    let config = SpellerConfig {
        k: 3,
        ..small_config()
    };
    let inputs = sos_inputs(2, 7);
    let features = listener(2, 5);

    let mut speller = Speller::new(config).unwrap();
    speller.eval();
    let beam = speller
        .forward(&inputs.view(), &features.view(), 0.0, true)
        .unwrap();
    let hypotheses = beam.hypotheses.expect("beam search returns hypotheses");

    for (b, hyp) in hypotheses.iter().enumerate() {
        let item = features.slice(s![b..b + 1, .., ..]);
        let mut state = speller.init_state(1);
        let mut token = SOS;
        for (t, &next) in hyp.iter().enumerate() {
            let input = Array2::from_elem((1, 1), token);
            let (row, next_state) = speller
                .forward_step(&input.view(), &state, &item)
                .unwrap();
            for (replayed, decoded) in row.row(0).iter().zip(beam.logits.slice(s![b, t, ..])) {
                assert!(
                    (replayed - decoded).abs() < 1e-4,
                    "item {b} step {t}: {replayed} vs {decoded}"
                );
            }
            state = next_state;
            token = next;
        }
    }
}
