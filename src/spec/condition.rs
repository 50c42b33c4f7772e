//! Condition trees: a closed set of predicates combined by and/or/not.
//!
//! Conditions are parsed and validated once at compile time. Regex patterns
//! compile here, behind a size budget, so the runtime never re-parses a
//! pattern per call. Evaluation lives in `engine::eval`.

use std::collections::BTreeSet;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::spec::FieldPath;

/// Compile-time complexity budget for regex patterns. Passed to
/// `RegexBuilder::size_limit`; adversarial patterns that would blow up the
/// compiled program are rejected at compile time, not discovered at runtime.
pub const DEFAULT_REGEX_SIZE_LIMIT: usize = 1 << 20;

/// A regex compiled once at spec-compile time.
///
/// Serializes as its pattern string and recompiles on deserialize, so the IR
/// artifact stays a plain deterministic document.
#[derive(Debug, Clone)]
pub struct CompiledRegex {
    pattern: String,
    regex: Regex,
}

impl CompiledRegex {
    pub fn compile(pattern: &str, size_limit: usize) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).size_limit(size_limit).build()?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }

    pub fn replace_all(&self, haystack: &str, replacement: &str) -> String {
        self.regex.replace_all(haystack, replacement).into_owned()
    }
}

impl PartialEq for CompiledRegex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Serialize for CompiledRegex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.pattern)
    }
}

impl<'de> Deserialize<'de> for CompiledRegex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        CompiledRegex::compile(&pattern, DEFAULT_REGEX_SIZE_LIMIT).map_err(serde::de::Error::custom)
    }
}

/// Comparison operators over scalar values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Runtime value classes for the type-check predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

/// The fixed predicate set. Closed on purpose: exhaustive matches keep the
/// evaluator honest when an operator is added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateTest {
    Cmp { op: CmpOp, value: Value },
    InRange { min: f64, max: f64 },
    LenRange { min: usize, max: Option<usize> },
    Matches(CompiledRegex),
    InSet(Vec<Value>),
    Exists,
    IsType(ValueType),
}

/// A single predicate against one field of the mapped record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: FieldPath,
    pub test: PredicateTest,
}

/// Acyclic condition tree. `All` short-circuits on the first false branch,
/// `Any` on the first true one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionExpr {
    All(Vec<ConditionExpr>),
    Any(Vec<ConditionExpr>),
    Not(Box<ConditionExpr>),
    Leaf(Predicate),
}

impl ConditionExpr {
    /// Collect every field path this condition reads.
    pub fn referenced_fields(&self, out: &mut BTreeSet<FieldPath>) {
        match self {
            ConditionExpr::All(items) | ConditionExpr::Any(items) => {
                for item in items {
                    item.referenced_fields(out);
                }
            }
            ConditionExpr::Not(inner) => inner.referenced_fields(out),
            ConditionExpr::Leaf(p) => {
                out.insert(p.field.clone());
            }
        }
    }

    /// A condition is a "simple comparison" when it is a single leaf doing
    /// a scalar comparison or range test. Only these are eligible for the
    /// vectorized execution path.
    pub fn as_simple_comparison(&self) -> Option<&Predicate> {
        match self {
            ConditionExpr::Leaf(p) => match p.test {
                PredicateTest::Cmp { .. }
                | PredicateTest::InRange { .. }
                | PredicateTest::LenRange { .. } => Some(p),
                _ => None,
            },
            _ => None,
        }
    }
}
