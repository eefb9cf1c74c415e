//! Content fingerprinting.
//!
//! A fingerprint is a BLAKE3 digest over the embedding model identifier and
//! the normalized content. It is the only key the caches use; paths and
//! timestamps never participate.
//!
//! Normalization removes differences that do not change meaning:
//! - Unicode composition (NFC)
//! - a leading byte-order mark
//! - CRLF and lone CR line endings
//! - trailing whitespace on each line
//! - blank lines at either end of the document
//! - runs of more than one blank line
//!
//! Word order, punctuation, indentation and in-line spacing are preserved.

use std::fmt;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Hex-encoded BLAKE3 digest of normalized content plus model id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Length of the hex representation.
    pub const HEX_LEN: usize = 64;

    /// Wrap an already computed hex digest.
    ///
    /// Returns `None` if the string is not a 64 character lowercase hex digest.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = hex.len() == Self::HEX_LEN
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for logs.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize content so insignificant encoding and whitespace differences
/// produce identical bytes.
pub fn normalize(content: &str) -> String {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let composed: String = content.nfc().collect();
    let unified = composed.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut pending_blank = false;
    for line in unified.split('\n') {
        let line = line.trim_end();
        if line.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        pending_blank = false;
        out.push_str(line);
    }
    out
}

/// Compute the fingerprint of `content` under `model_id`.
pub fn fingerprint(content: &str, model_id: &str) -> Fingerprint {
    let normalized = normalize(content);
    let mut hasher = blake3::Hasher::new();
    hasher.update(model_id.as_bytes());
    hasher.update(&[0u8]);
    hasher.update(normalized.as_bytes());
    Fingerprint(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "all-MiniLM-L6-v2";

    #[test]
    fn test_deterministic() {
        let text = "Rust ownership makes aliasing explicit.";
        assert_eq!(fingerprint(text, MODEL), fingerprint(text, MODEL));
        assert_eq!(fingerprint(text, MODEL).as_str().len(), Fingerprint::HEX_LEN);
    }

    #[test]
    fn test_trailing_whitespace_ignored() {
        let a = "First line\nSecond line";
        let b = "First line   \nSecond line\t\n\n";
        assert_eq!(fingerprint(a, MODEL), fingerprint(b, MODEL));
    }

    #[test]
    fn test_line_endings_and_bom_ignored() {
        let a = "alpha\nbeta";
        let b = "\u{feff}alpha\r\nbeta\r\n";
        assert_eq!(fingerprint(a, MODEL), fingerprint(b, MODEL));
    }

    #[test]
    fn test_blank_line_runs_collapse() {
        let a = "para one\n\npara two";
        let b = "\n\npara one\n\n\n\n   \npara two";
        assert_eq!(normalize(b), a);
        assert_eq!(fingerprint(a, MODEL), fingerprint(b, MODEL));
    }

    #[test]
    fn test_paragraph_break_is_significant() {
        let a = "para one\npara two";
        let b = "para one\n\npara two";
        assert_ne!(fingerprint(a, MODEL), fingerprint(b, MODEL));
    }

    #[test]
    fn test_unicode_composition_ignored() {
        let composed = "caf\u{e9}";
        let decomposed = "cafe\u{301}";
        assert_eq!(fingerprint(composed, MODEL), fingerprint(decomposed, MODEL));
    }

    #[test]
    fn test_word_change_detected() {
        let a = "The cache stores embeddings.";
        let b = "The cache stores responses.";
        assert_ne!(fingerprint(a, MODEL), fingerprint(b, MODEL));
    }

    #[test]
    fn test_word_order_and_punctuation_significant() {
        assert_ne!(fingerprint("dog bites man", MODEL), fingerprint("man bites dog", MODEL));
        assert_ne!(fingerprint("Let's eat, grandma", MODEL), fingerprint("Let's eat grandma", MODEL));
    }

    #[test]
    fn test_indentation_preserved() {
        assert_ne!(fingerprint("- a\n  - b", MODEL), fingerprint("- a\n- b", MODEL));
    }

    #[test]
    fn test_model_id_participates() {
        let text = "same content";
        assert_ne!(fingerprint(text, "model-a"), fingerprint(text, "model-b"));
    }

    #[test]
    fn test_from_hex() {
        let fp = fingerprint("x", MODEL);
        assert_eq!(Fingerprint::from_hex(fp.as_str()), Some(fp.clone()));
        assert!(Fingerprint::from_hex("not-hex").is_none());
        assert_eq!(fp.short().len(), 12);
    }
}
