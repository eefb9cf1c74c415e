//! Vault documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::{fingerprint, Fingerprint};

/// A note as supplied by the vault collaborator, before fingerprinting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    /// Vault-relative path
    pub path: String,
    pub content: String,
    pub modified: DateTime<Utc>,
}

impl RawDocument {
    pub fn new(path: impl Into<String>, content: impl Into<String>, modified: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            modified,
        }
    }
}

/// A fingerprinted content version of a vault note.
///
/// A new content version yields a new `Document`; existing ones are never
/// mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub path: String,
    pub text: String,
    pub modified: DateTime<Utc>,
    pub fingerprint: Fingerprint,
}

impl Document {
    /// Fingerprint a raw document under the given embedding model.
    pub fn from_raw(raw: RawDocument, model_id: &str) -> Self {
        let fingerprint = fingerprint(&raw.content, model_id);
        Self {
            path: raw.path,
            text: raw.content,
            modified: raw.modified,
            fingerprint,
        }
    }

    /// True if the text contains anything besides whitespace.
    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty()
    }
}
