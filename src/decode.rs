//! Best-effort recovery of truncated base64 cover payloads.
//!
//! The upstream producer occasionally cuts inline images at arbitrary
//! byte boundaries. A straight decode is tried first, then padding is
//! repaired, then up to five trailing characters are dropped. The result
//! is whatever bytes survive; it is written to disk without checking
//! that it still forms a valid image.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{AppError, Result};

/// How many trailing characters to shave off before giving up.
const MAX_TRUNCATE: usize = 5;

/// Decode a possibly-corrupted base64 payload.
///
/// Attempts, in order: a standard decode; a decode after padding with
/// `=` to a multiple of four; decodes after truncating 1..=5 trailing
/// characters (re-padding each candidate). The first success wins.
pub fn decode_cover(payload: &str) -> Result<Vec<u8>> {
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();

    if let Ok(bytes) = STANDARD.decode(&cleaned) {
        return Ok(bytes);
    }

    if let Ok(bytes) = STANDARD.decode(pad(&cleaned)) {
        return Ok(bytes);
    }

    // payloads are not guaranteed ASCII, so cut on char boundaries
    for cut in 1..=MAX_TRUNCATE {
        let Some(idx) = cleaned.char_indices().rev().nth(cut - 1).map(|(i, _)| i) else {
            break;
        };
        if idx == 0 {
            break;
        }
        if let Ok(bytes) = STANDARD.decode(pad(&cleaned[..idx])) {
            return Ok(bytes);
        }
    }

    Err(AppError::Decode(format!(
        "unrecoverable payload of {} chars",
        cleaned.len()
    )))
}

/// Pad a base64 string with `=` to a multiple of four characters.
fn pad(input: &str) -> String {
    let mut out = input.trim_end_matches('=').to_string();
    while out.len() % 4 != 0 {
        out.push('=');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_payload_roundtrips() {
        let encoded = STANDARD.encode(b"cover image bytes");
        assert_eq!(decode_cover(&encoded).unwrap(), b"cover image bytes");
    }

    #[test]
    fn missing_padding_is_repaired() {
        let encoded = STANDARD.encode(b"abcde"); // "YWJjZGU="
        let stripped = encoded.trim_end_matches('=');
        assert_eq!(decode_cover(stripped).unwrap(), b"abcde");
    }

    #[test]
    fn truncated_tail_is_salvaged() {
        let encoded = STANDARD.encode(vec![0u8; 64].as_slice());
        let cut = &encoded[..encoded.len() - 3];
        let bytes = decode_cover(cut).unwrap();
        assert!(!bytes.is_empty());
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    fn garbage_fails_gracefully() {
        // a character deleted in the middle leaves an illegal symbol stream
        assert!(decode_cover("@@not base64 at all@@").is_err());
        assert!(decode_cover("").unwrap().is_empty());
    }

    #[test]
    fn multibyte_garbage_fails_gracefully() {
        // Cyrillic text where an image should be; every truncation
        // candidate must land on a char boundary
        assert!(decode_cover("аааа").is_err());
        assert!(decode_cover("обложка не пришла").is_err());
    }
}
