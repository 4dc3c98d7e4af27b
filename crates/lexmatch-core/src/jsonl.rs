use serde::de::DeserializeOwned;

use crate::error::LexMatchError;

#[derive(Debug, Clone)]
pub struct JsonlParseOutcome<T> {
    pub items: Vec<T>,
    pub skipped_lines: usize,
    pub first_error: Option<(usize, String)>,
}

/// Parses one JSON value per line, skipping blank and malformed lines.
pub fn parse_jsonl_tolerant<T>(raw: &str) -> JsonlParseOutcome<T>
where
    T: DeserializeOwned,
{
    let mut items = Vec::new();
    let mut skipped_lines = 0usize;
    let mut first_error = None::<(usize, String)>;

    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(value) => items.push(value),
            Err(err) => {
                skipped_lines += 1;
                if first_error.is_none() {
                    first_error = Some((line_no + 1, err.to_string()));
                }
            }
        }
    }

    JsonlParseOutcome {
        items,
        skipped_lines,
        first_error,
    }
}

pub fn jsonl_all_lines_invalid(
    label: &str,
    skipped_lines: usize,
    first_error: Option<&(usize, String)>,
) -> LexMatchError {
    match first_error {
        Some((line_no, message)) => LexMatchError::Validation(format!(
            "{label} parse failed: skipped {skipped_lines} invalid lines (first at line {line_no}: {message})"
        )),
        None => LexMatchError::Validation(format!(
            "{label} parse failed: skipped {skipped_lines} invalid lines"
        )),
    }
}
