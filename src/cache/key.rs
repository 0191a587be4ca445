//! Cache keys and their storage identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage identifier of the empty key; no escaped id is a lone `_`
const EMPTY_STORAGE_ID: &str = "_";

/// Normalized identifier of a describable discipline
///
/// Keys are slugs: `"Cycling Road"` becomes `"cycling-road"`. The storage
/// identifier derived from a key is reversible, so a key can be recovered
/// from a file name found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from a human-readable discipline name
    pub fn from_name(name: &str) -> Self {
        let slug = name
            .split_whitespace()
            .map(|part| part.to_lowercase())
            .collect::<Vec<_>>()
            .join("-");
        CacheKey(slug)
    }

    /// Wrap an already-normalized identifier verbatim
    pub fn from_slug(slug: impl Into<String>) -> Self {
        CacheKey(slug.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-system safe identifier for this key
    ///
    /// `[a-z0-9-]` pass through unchanged; every other byte is written as
    /// `_xx` (lowercase hex). The mapping is injective, `_` itself is escaped.
    /// The empty key maps to a lone `_` so its document is never a dotfile.
    pub fn storage_id(&self) -> String {
        if self.0.is_empty() {
            return EMPTY_STORAGE_ID.to_string();
        }

        let mut id = String::with_capacity(self.0.len());
        for byte in self.0.bytes() {
            match byte {
                b'a'..=b'z' | b'0'..=b'9' | b'-' => id.push(byte as char),
                other => id.push_str(&format!("_{:02x}", other)),
            }
        }
        id
    }

    /// Inverse of [`CacheKey::storage_id`]; `None` for names it never produces
    pub fn from_storage_id(id: &str) -> Option<Self> {
        if id == EMPTY_STORAGE_ID {
            return Some(CacheKey(String::new()));
        }
        if id.is_empty() {
            return None;
        }

        let bytes = id.as_bytes();
        let mut decoded = Vec::with_capacity(bytes.len());
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'a'..=b'z' | b'0'..=b'9' | b'-' => {
                    decoded.push(bytes[i]);
                    i += 1;
                }
                b'_' => {
                    let hex = id.get(i + 1..i + 3)?;
                    decoded.push(u8::from_str_radix(hex, 16).ok()?);
                    i += 3;
                }
                _ => return None,
            }
        }

        String::from_utf8(decoded).ok().map(CacheKey)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(name: &str) -> Self {
        CacheKey::from_name(name)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
