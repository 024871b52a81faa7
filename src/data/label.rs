use std::collections::HashMap;

use ndarray::Array2;

use super::DataError;

/// Parses a whitespace-separated id sequence such as `"5 12 7"`.
pub fn parse_label_ids(label: &str) -> Result<Vec<usize>, DataError> {
    label
        .split_whitespace()
        .map(|token| {
            token.parse::<usize>().map_err(|_| DataError::InvalidLabelId {
                line: 1,
                value: token.to_string(),
            })
        })
        .collect()
}

/// Builds a `(batch, longest + 2)` target matrix of `[sos, ids.., eos, pad..]` rows.
///
/// Every row carries exactly one `eos`, so stripping it leaves rows of equal length.
pub fn pad_targets(seqs: &[Vec<usize>], sos_id: usize, eos_id: usize, pad_id: usize) -> Array2<usize> {
    let longest = seqs.iter().map(Vec::len).max().unwrap_or(0);
    let width = longest + 2;
    let mut targets = Array2::from_elem((seqs.len(), width), pad_id);

    for (mut row, seq) in targets.outer_iter_mut().zip(seqs) {
        row[0] = sos_id;
        for (slot, &id) in row.iter_mut().skip(1).zip(seq) {
            *slot = id;
        }
        row[seq.len() + 1] = eos_id;
    }
    targets
}

/// Maps ids to characters up to the first `eos`, skipping ids with no entry.
pub fn ids_to_sentence(ids: &[usize], id2char: &HashMap<usize, String>, eos_id: usize) -> String {
    ids.iter()
        .take_while(|&&id| id != eos_id)
        .filter_map(|id| id2char.get(id))
        .map(String::as_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_targets_places_single_eos() {
        let targets = pad_targets(&[vec![4, 5, 6], vec![7]], 1, 2, 0);
        assert_eq!(targets.dim(), (2, 5));
        assert_eq!(targets.row(0).to_vec(), vec![1, 4, 5, 6, 2]);
        assert_eq!(targets.row(1).to_vec(), vec![1, 7, 2, 0, 0]);
    }

    #[test]
    fn pad_targets_empty_sequence() {
        let targets = pad_targets(&[vec![]], 1, 2, 0);
        assert_eq!(targets.row(0).to_vec(), vec![1, 2]);
    }

    #[test]
    fn parse_label_ids_rejects_text() {
        assert_eq!(parse_label_ids(" 5 12  7\n").unwrap(), vec![5, 12, 7]);
        assert!(parse_label_ids("5 x").is_err());
    }
}
