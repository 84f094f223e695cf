/**
 * RECORD DECODER - Octets TCP -> lignes CSV -> `AlarmRecord`
 *
 * RÔLE :
 * Interprète le tampon de lecture comme du texte CSV et projette les champs
 * par position (name, password, id, message).
 *
 * FONCTIONNEMENT :
 * - Les octets nuls de fin de tampon sont retirés, l'UTF-8 invalide devient U+FFFD
 * - Guillemets stricts, pas de ligne d'en-tête
 * - Seule la dernière ligne est conservée
 */

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Alarm record as published on the bus
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRecord {
    /// Reporting device or operator
    pub name: String,
    /// Opaque credential, forwarded as is
    pub password: String,
    /// Device/alarm identifier, zero when the column is missing or not a number
    #[serde(rename = "asdid")]
    pub id: i64,
    /// Free-form payload
    pub message: String,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("bare \" in non-quoted field (line {line}, column {column})")]
    BareQuote { line: usize, column: usize },

    #[error("extraneous or missing \" in quoted field (line {line}, column {column})")]
    Quote { line: usize, column: usize },

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("payload contains no CSV rows")]
    Empty,
}

impl AlarmRecord {
    /// Project CSV rows onto a record. Every row builds a fresh record and the
    /// last one wins.
    pub fn from_rows<R: AsRef<[String]>>(rows: &[R]) -> Self {
        let mut record = AlarmRecord::default();
        for row in rows {
            let mut current = AlarmRecord::default();
            for (index, field) in row.as_ref().iter().enumerate() {
                match index {
                    0 => current.name = field.clone(),
                    1 => current.password = field.clone(),
                    2 => {
                        // unparsable ids stay at zero, the row goes on
                        current.id = field.parse().unwrap_or_default();
                    }
                    3 => current.message = field.clone(),
                    _ => {}
                }
            }
            record = current;
        }
        record
    }
}

/// Decode a read buffer into a record.
pub fn decode(bytes: &[u8]) -> Result<AlarmRecord, DecodeError> {
    let rows = decode_rows(bytes)?;
    Ok(AlarmRecord::from_rows(&rows))
}

/// Parse a (possibly zero padded) read buffer as CSV rows.
///
/// Invalid UTF-8 sequences become U+FFFD, the rest of the record survives.
pub fn decode_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, DecodeError> {
    let text = String::from_utf8_lossy(trim_padding(bytes));
    check_quoting(&text)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        // blank line
        if record.len() == 1 && record[0].is_empty() {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    if rows.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(rows)
}

/// Drop the zero bytes left at the end of a fixed-size read buffer.
fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Strict quoting rules: a quote may only open a field, and a quoted field
/// must be closed and followed by a delimiter, a line end or the end of input.
fn check_quoting(text: &str) -> Result<(), DecodeError> {
    let mut line = 1;
    let mut column = 0;
    let mut field_start = true;
    let mut in_quotes = false;
    let mut opened_at = (0, 0);
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        column += 1;

        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    column += 1;
                }
                '"' => {
                    in_quotes = false;
                    if !matches!(chars.peek(), None | Some(',') | Some('\n') | Some('\r')) {
                        return Err(DecodeError::Quote { line, column: column + 1 });
                    }
                }
                '\n' => {
                    line += 1;
                    column = 0;
                }
                _ => {}
            }
            continue;
        }

        match c {
            '"' if field_start => {
                in_quotes = true;
                field_start = false;
                opened_at = (line, column);
            }
            '"' => return Err(DecodeError::BareQuote { line, column }),
            ',' => field_start = true,
            '\n' => {
                line += 1;
                column = 0;
                field_start = true;
            }
            _ => field_start = false,
        }
    }

    if in_quotes {
        let (line, column) = opened_at;
        return Err(DecodeError::Quote { line, column });
    }
    Ok(())
}
