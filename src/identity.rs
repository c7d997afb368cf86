//! Content-addressed document identity.
//!
//! Every document is keyed by a SHA-256 digest of its bytes, computed once
//! at ingestion and used as the primary key for the tracker record and for
//! every blob the pipeline writes. Identical bytes always produce the same
//! id, which is how re-ingestion of a document we have already seen is
//! detected instead of silently duplicating work.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Deterministic, content-derived identity of a document.
///
/// Stored and displayed as 64 lowercase hex characters. The id is derived
/// exactly once at ingestion and never recomputed with a different
/// algorithm later in the pipeline.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Derive the id of a single-file document from its raw bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        DocumentId(hex_digest(Sha256::new().chain_update(bytes)))
    }

    /// Derive the id of a multi-part container (e.g. an archive of files).
    ///
    /// Parts are sorted by name before hashing so the id is independent of
    /// the order in which the caller enumerates them. Each part contributes
    /// its name and its own content digest, separated by a NUL byte so
    /// `("ab", …)` and `("a", "b…")` cannot collide.
    pub fn of_parts<'a, I>(parts: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut digests: Vec<(&str, [u8; 32])> = parts
            .into_iter()
            .map(|(name, bytes)| {
                let mut h = Sha256::new();
                h.update(bytes);
                (name, h.finalize().into())
            })
            .collect();
        digests.sort_by(|a, b| a.0.cmp(b.0));

        let mut outer = Sha256::new();
        for (name, digest) in &digests {
            outer.update(name.as_bytes());
            outer.update([0u8]);
            outer.update(digest);
        }
        DocumentId(hex_digest(outer))
    }

    /// Parse an id previously produced by this module (e.g. from a CLI
    /// argument or a blob metadata entry).
    pub fn parse(s: &str) -> Option<Self> {
        let ok = s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        ok.then(|| DocumentId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", &self.0[..12.min(self.0.len())])
    }
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use fmt::Write;
        // infallible for String
        let _ = write!(out, "{byte:02x}");
    }
    out
}
