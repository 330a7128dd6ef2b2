use std::fmt;

use serde::{Deserialize, Serialize};

const CANONICAL_PUBKEY_HEX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
/// Public-key identity of a relay participant.
///
/// Compared byte for byte. No case folding, trimming or re-encoding is ever
/// applied, so callers must hand in the canonical form.
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// True for 64 lowercase hex characters, the form Nostr clients sign with.
    ///
    /// Informational only: authorization never consults this.
    pub fn is_canonical_hex(&self) -> bool {
        self.0.len() == CANONICAL_PUBKEY_HEX_LEN
            && self
                .0
                .chars()
                .all(|ch| ch.is_ascii_digit() || ('a'..='f').contains(&ch))
    }

    /// Shortened form for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(index, _)| index)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
