use std::time::Instant;

use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis};

use super::{Beam, Speller, SpellerError};
use crate::nn::argmax;

/// Feeds the whole target sequence at once, with every EOS removed.
pub(super) fn decode_teacher_forced(
    speller: &mut Speller,
    inputs: &ArrayView2<usize>,
    listener_outputs: &ArrayView3<f32>,
) -> Result<Array3<f32>, SpellerError> {
    let eos = speller.config.eos_id;
    let batch = inputs.nrows();

    let rows: Vec<Vec<usize>> = inputs
        .outer_iter()
        .map(|row| row.iter().copied().filter(|&t| t != eos).collect())
        .collect();
    let steps = rows.first().map_or(0, Vec::len);
    if let Some((row, ragged)) = rows.iter().enumerate().find(|(_, r)| r.len() != steps) {
        return Err(SpellerError::RaggedTeacherInputs {
            row,
            expected: steps,
            actual: ragged.len(),
        });
    }
    if steps == 0 {
        return Err(SpellerError::SequenceTooShort(0));
    }

    log::debug!("Decoding (TeacherForcing) batch={} steps={}", batch, steps);
    let teacher = Array2::from_shape_fn((batch, steps), |(b, t)| rows[b][t]);
    let state = speller.init_state(batch);
    let (logits, _) = speller.forward_step(&teacher.view(), &state, listener_outputs)?;

    let n_class = logits.ncols();
    let logits = logits.to_shape((batch, steps, n_class))?.into_owned();
    Ok(logits)
}

/// Feeds back the top-1 prediction for `max_length` steps.
pub(super) fn decode_greedy(
    speller: &mut Speller,
    inputs: &ArrayView2<usize>,
    listener_outputs: &ArrayView3<f32>,
    max_length: usize,
) -> Result<Array3<f32>, SpellerError> {
    let batch = inputs.nrows();
    let n_class = speller.config.n_class;
    log::debug!("Decoding (Greedy) batch={} steps={}", batch, max_length);

    let mut input = inputs.slice(s![.., 0..1]).to_owned();
    let mut state = speller.init_state(batch);
    let mut logits = Array3::<f32>::zeros((batch, max_length, n_class));

    for step in 0..max_length {
        let (step_logits, next_state) =
            speller.forward_step(&input.view(), &state, listener_outputs)?;
        logits.slice_mut(s![.., step, ..]).assign(&step_logits);
        input = Array2::from_shape_fn((batch, 1), |(b, _)| argmax(step_logits.row(b)));
        state = next_state;
    }
    Ok(logits)
}

/// Beam search over `k` hypotheses per item.
///
/// Listener outputs and state are inflated batch-major, so rows
/// `b * k .. (b + 1) * k` belong to item `b`. After each step the state rows
/// are regathered along the back-pointers chosen by every beam. The winning
/// hypothesis is padded with EOS-certain rows up to `max_length`.
pub(super) fn decode_beam(
    speller: &mut Speller,
    inputs: &ArrayView2<usize>,
    listener_outputs: &ArrayView3<f32>,
    max_length: usize,
) -> Result<(Array3<f32>, Vec<Vec<usize>>), SpellerError> {
    let start = Instant::now();
    let batch = inputs.nrows();
    let k = speller.config.k;
    let n_class = speller.config.n_class;
    let (sos, eos) = (speller.config.sos_id, speller.config.eos_id);
    log::debug!(
        "Decoding (Beam={}) batch={} steps={}",
        k,
        batch,
        max_length
    );

    let listener = Speller::inflate_listener(listener_outputs, k);
    let mut state = Speller::inflate(&speller.init_state(batch), k);
    let mut beams: Vec<Beam> = (0..batch).map(|_| Beam::new(k, sos, eos)).collect();

    for _ in 0..max_length {
        let tokens: Vec<usize> = beams
            .iter()
            .flat_map(|beam| beam.current_predictions().iter().copied())
            .collect();
        let input = Array2::from_shape_vec((batch * k, 1), tokens)?;

        let (step_logits, next_state) =
            speller.forward_step(&input.view(), &state, &listener.view())?;

        let mut reorder = Vec::with_capacity(batch * k);
        for (b, beam) in beams.iter_mut().enumerate() {
            beam.advance(step_logits.slice(s![b * k..(b + 1) * k, ..]))?;
            reorder.extend(beam.current_origin().iter().map(|&origin| b * k + origin));
        }
        state = next_state.select_rows(&reorder);
    }

    let mut logits = Array3::<f32>::zeros((batch, max_length, n_class));
    let mut hypotheses = Vec::with_capacity(batch);
    for (b, beam) in beams.iter().enumerate() {
        let (_, ks) = beam.sort_finished(k);
        let Some(&(time, slot)) = ks.first() else {
            return Err(SpellerError::InvalidConfig(
                "beam width must be positive".to_string(),
            ));
        };
        let hyp = beam.get_hyp(time, slot);
        let filled = beam.fill_empty_sequence(&hyp.log_probs, max_length);
        logits.index_axis_mut(Axis(0), b).assign(&filled);
        hypotheses.push(hyp.tokens);
    }

    let done = beams.iter().filter(|beam| beam.is_done()).count();
    log::debug!(
        "Beam search finished in {:?} ({}/{} beams ended on EOS)",
        start.elapsed(),
        done,
        batch
    );
    Ok((logits, hypotheses))
}
