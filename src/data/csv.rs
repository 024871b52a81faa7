use super::DataError;

/// Splits comma-separated text into rows of fields.
///
/// Double-quoted fields may contain commas, newlines and `""` escapes.
/// Blank lines are skipped.
pub(crate) fn parse_csv(content: &str) -> Result<Vec<Vec<String>>, DataError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            '"' => {
                return Err(DataError::Csv {
                    line,
                    reason: "quote inside unquoted field".to_string(),
                })
            }
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                finish_row(&mut rows, &mut row, &mut field);
                line += 1;
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(DataError::Csv {
            line,
            reason: "unterminated quoted field".to_string(),
        });
    }
    finish_row(&mut rows, &mut row, &mut field);
    Ok(rows)
}

fn finish_row(rows: &mut Vec<Vec<String>>, row: &mut Vec<String>, field: &mut String) {
    if row.is_empty() && field.is_empty() {
        return;
    }
    row.push(std::mem::take(field));
    rows.push(std::mem::take(row));
}
