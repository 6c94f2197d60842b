//! Content digests used as cache keys.
//!
//! Every digest in KIS is a SHA-256 over a normalized byte stream. Composite
//! digests are built with [`Fingerprint`], which length-delimits components so
//! that `["ab", "c"]` and `["a", "bc"]` never collide.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// A hex-encoded SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Digest raw bytes.
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Digest(hex::encode(hasher.finalize()))
    }

    /// Digest a string.
    pub fn of_str(s: &str) -> Self {
        Self::of_bytes(s.as_bytes())
    }

    /// Digest the contents of a file.
    pub fn of_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

        let mut reader = BufReader::new(file);
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];

        loop {
            let read = reader
                .read(&mut buffer)
                .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(Digest(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental builder for composite digests.
pub struct Fingerprint {
    hasher: Sha256,
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new()
    }
}

impl Fingerprint {
    pub fn new() -> Self {
        Fingerprint {
            hasher: Sha256::new(),
        }
    }

    /// Start a fingerprint with a domain tag so different record kinds never
    /// share a digest.
    pub fn with_domain(domain: &str) -> Self {
        let mut fp = Self::new();
        fp.update_str(domain);
        fp
    }

    /// Add a length-delimited string component.
    pub fn update_str(&mut self, s: &str) -> &mut Self {
        self.hasher.update((s.len() as u64).to_le_bytes());
        self.hasher.update(s.as_bytes());
        self
    }

    /// Add an optional string component.
    pub fn update_opt(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(s) => {
                self.hasher.update([1u8]);
                self.update_str(s)
            }
            None => {
                self.hasher.update([0u8]);
                self
            }
        }
    }

    /// Add an ordered list. Order is significant.
    pub fn update_list<'a>(&mut self, items: impl IntoIterator<Item = &'a str>) -> &mut Self {
        let items: Vec<&str> = items.into_iter().collect();
        self.hasher.update((items.len() as u64).to_le_bytes());
        for item in items {
            self.update_str(item);
        }
        self
    }

    /// Add an unordered set. Items are sorted and deduplicated first.
    pub fn update_set<'a>(&mut self, items: impl IntoIterator<Item = &'a str>) -> &mut Self {
        let mut items: Vec<&str> = items.into_iter().collect();
        items.sort_unstable();
        items.dedup();
        self.update_list(items)
    }

    pub fn finish(self) -> Digest {
        Digest(hex::encode(self.hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_digest_of_str() {
        assert_eq!(
            Digest::of_str("hello").as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_digest_of_file_matches_bytes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kis.toml");
        std::fs::write(&path, "hello").unwrap();

        assert_eq!(Digest::of_file(&path).unwrap(), Digest::of_str("hello"));
    }

    #[test]
    fn test_fingerprint_components_are_delimited() {
        let a = {
            let mut fp = Fingerprint::new();
            fp.update_str("ab").update_str("c");
            fp.finish()
        };
        let b = {
            let mut fp = Fingerprint::new();
            fp.update_str("a").update_str("bc");
            fp.finish()
        };
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_set_ignores_order() {
        let a = {
            let mut fp = Fingerprint::new();
            fp.update_set(["linux", "unix"]);
            fp.finish()
        };
        let b = {
            let mut fp = Fingerprint::new();
            fp.update_set(["unix", "linux", "unix"]);
            fp.finish()
        };
        let c = {
            let mut fp = Fingerprint::new();
            fp.update_list(["unix", "linux"]);
            fp.finish()
        };
        assert_eq!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn test_update_opt_distinguishes_none_from_empty() {
        let none = {
            let mut fp = Fingerprint::new();
            fp.update_opt(None);
            fp.finish()
        };
        let empty = {
            let mut fp = Fingerprint::new();
            fp.update_opt(Some(""));
            fp.finish()
        };
        assert_ne!(none, empty);
    }
}
