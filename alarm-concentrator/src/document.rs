/**
 * DOCUMENT ENCODER - `AlarmRecord` -> JSON, sans `\u0000` non échappé
 */

use crate::record::AlarmRecord;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;
use thiserror::Error;
use tracing::debug;

/// Escape emitted by the JSON encoder for a NUL character
const NULL_ESCAPE: &str = r"\u0000";

/// One JSON escape sequence: a backslash and the character it escapes, or a
/// whole `\u0000`. Scanning escapes left to right keeps `\\` pairs together so
/// an escaped backslash followed by `u0000` is never mistaken for a NUL.
static ESCAPE_SEQUENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:u0000|[\s\S])").expect("escape pattern is valid"));

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serialize a record and strip the NUL padding that leaked into its fields.
pub fn encode(record: &AlarmRecord) -> Result<String, EncodeError> {
    let json = serde_json::to_string(record)?;
    let clean = sanitize_nulls(&json);
    if clean.len() != json.len() {
        debug!("null unicode character detected in JSON value, removed unescaped occurrences");
    }
    Ok(clean.into_owned())
}

/// Remove every unescaped `\u0000` from JSON text, consecutive repeats
/// included. Escaped sequences (`\\u0000`) are kept.
pub fn sanitize_nulls(json: &str) -> Cow<'_, str> {
    if !json.contains(NULL_ESCAPE) {
        return Cow::Borrowed(json);
    }
    ESCAPE_SEQUENCE.replace_all(json, |caps: &Captures| {
        if &caps[0] == NULL_ESCAPE {
            String::new()
        } else {
            caps[0].to_string()
        }
    })
}
