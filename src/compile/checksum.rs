//! Content checksums for compiled rule specifications.
//!
//! checksum = blake3("ir:" || canonical_spec || NUL || compiler_version)
//!
//! The preimage is the typed canonical form of the specification (see
//! `RawSpec::canonical_json`), so whitespace and key-order variants of one
//! logical spec share a checksum, and a compiler upgrade mints new
//! identities instead of silently reusing stale artifacts.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::spec::RawSpec;

/// Compiler version baked into every checksum and IR artifact.
pub const COMPILER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A 32-byte BLAKE3 checksum identifying one compiled artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checksum(pub [u8; 32]);

impl Checksum {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("checksum must be 32 bytes of hex"))?;
        Ok(Checksum(arr))
    }
}

/// Compute the identity of a parsed specification under this compiler.
pub fn checksum_of(raw: &RawSpec) -> Checksum {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"ir:");
    hasher.update(raw.canonical_json().as_bytes());
    hasher.update(b"\x00");
    hasher.update(COMPILER_VERSION.as_bytes());
    Checksum(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::parse_spec;
    use pretty_assertions::assert_eq;

    #[test]
    fn stable_across_repeats() {
        let text = r#"
schema_version: 1
metadata: { marketplace: test, version: "1.0.0" }
mapping:
  - output: price
rules: []
"#;
        let raw = parse_spec(text).unwrap();
        assert_eq!(checksum_of(&raw), checksum_of(&raw));
    }

    #[test]
    fn hex_round_trip() {
        let sum = Checksum([7u8; 32]);
        let json = serde_json::to_string(&sum).unwrap();
        let back: Checksum = serde_json::from_str(&json).unwrap();
        assert_eq!(sum, back);
    }
}
