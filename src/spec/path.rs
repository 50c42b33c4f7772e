//! Field paths into catalog records.
//!
//! Example: "attributes.color" or "items[*].sku"  =>  dotted access with an
//! optional single-level array wildcard. Paths are parsed once at compile
//! time; deep or wildcard paths are flagged so the planner can keep them out
//! of vectorized execution.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One step of a field path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    /// Object key access.
    Key(String),
    /// Array wildcard: fan out over every element.
    Wildcard,
}

/// A parsed field path. Ordered and hashable so it can key BTreeMap/Set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath(pub Vec<Segment>);

impl FieldPath {
    /// Parse "a.b[*].c" into segments. Only object keys and a `[*]`
    /// suffix per key are legal; indices and bare wildcards are not.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("field path cannot be empty".to_string());
        }

        let mut segments = Vec::new();
        for part in text.split('.') {
            let part = part.trim();
            if part.is_empty() {
                return Err(format!("field path '{}' has an empty segment", text));
            }

            let (key, wildcard) = match part.strip_suffix("[*]") {
                Some(k) => (k, true),
                None => (part, false),
            };
            if key.is_empty() {
                return Err(format!(
                    "field path '{}' has a wildcard with no key before it",
                    text
                ));
            }
            if key.contains('[') || key.contains(']') {
                return Err(format!(
                    "field path '{}': only the [*] wildcard is supported, got '{}'",
                    text, part
                ));
            }

            segments.push(Segment::Key(key.to_string()));
            if wildcard {
                segments.push(Segment::Wildcard);
            }
        }

        Ok(FieldPath(segments))
    }

    /// First object key. Paths always start with a key, never a wildcard.
    pub fn head(&self) -> &str {
        match &self.0[0] {
            Segment::Key(k) => k,
            // parse() guarantees a leading key
            Segment::Wildcard => unreachable!("field path starts with a wildcard"),
        }
    }

    /// More than a single flat key.
    pub fn is_nested(&self) -> bool {
        self.0.len() > 1
    }

    pub fn has_wildcard(&self) -> bool {
        self.0.iter().any(|s| matches!(s, Segment::Wildcard))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for seg in &self.0 {
            match seg {
                Segment::Key(k) => {
                    if !first {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", k)?;
                    first = false;
                }
                Segment::Wildcard => write!(f, "[*]")?,
            }
        }
        Ok(())
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FieldPath::parse(&s).map_err(serde::de::Error::custom)
    }
}
