//! Raw specification shapes as they appear on the wire (YAML or JSON).
//!
//! Spec shape (YAML):
//!
//! schema_version: 1
//! metadata:
//!   marketplace: "amazon-us"
//!   version: "1.2.0"
//! mapping:
//!   - output: price
//!     source: raw_price          # dotted path into the input record
//!     transform: parse_number    # optional
//!     required: true
//!   - output: title              # source defaults to the output name
//! rules:
//!   - id: price-positive
//!     target: price
//!     action: assert
//!     severity: error
//!     precedence: 10
//!     condition: { field: price, op: gt, value: 0 }
//! performance:
//!   batch_size: 1000
//!   parallel: true
//!
//! These structs are serde-facing only. `validate_and_build` (in
//! `spec::validate`) turns them into validated in-memory structures; the
//! typed round-trip through these structs is also what the checksum hashes,
//! so cosmetic differences (whitespace, key order, omitted defaults) never
//! produce a second identity.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CompileError;
use crate::spec::condition::ValueType;

/// The one specification contract this compiler speaks.
pub const SUPPORTED_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSpec {
    pub schema_version: u32,

    pub metadata: RawMetadata,

    #[serde(default)]
    pub mapping: Vec<RawMappingField>,

    #[serde(default)]
    pub rules: Vec<RawRule>,

    #[serde(default)]
    pub performance: RawPerformance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMetadata {
    pub marketplace: String,

    /// Semantic version of this specification, e.g. "1.2.0".
    pub version: String,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub breaking_changes: bool,
}

/// One field transformation: input path -> declared output field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMappingField {
    pub output: String,

    /// Source path in the input record, or the name of another output
    /// (which makes this entry depend on it). Defaults to `output`.
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub transform: Option<MapTransform>,

    #[serde(default)]
    pub required: bool,

    /// Fallback when an optional source is missing.
    #[serde(default)]
    pub default: Option<Value>,
}

/// Value-level transforms applied during the mapping phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapTransform {
    Trim,
    Lowercase,
    Uppercase,
    ParseNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Assert,
    Transform,
    Suggest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Row,
    Column,
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawScope {
    #[serde(default = "default_scope_kind")]
    pub kind: ScopeKind,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub brand: Option<String>,

    #[serde(default)]
    pub price_min: Option<f64>,

    #[serde(default)]
    pub price_max: Option<f64>,
}

fn default_scope_kind() -> ScopeKind {
    ScopeKind::Row
}

impl Default for RawScope {
    fn default() -> Self {
        Self {
            kind: ScopeKind::Row,
            category: None,
            brand: None,
            price_min: None,
            price_max: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRule {
    pub id: String,

    pub target: String,

    pub action: ActionKind,

    #[serde(default = "default_severity")]
    pub severity: Severity,

    /// Lower runs earlier among rules sharing a phase.
    #[serde(default)]
    pub precedence: i32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Free-form tags. "critical" marks the rule as a fail-fast candidate
    /// under the default policy.
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub scope: RawScope,

    /// Required for assert; optional for transform/suggest (absent means
    /// "apply whenever the target resolves").
    #[serde(default)]
    pub condition: Option<RawCondition>,

    /// Correction strategy; required for transform rules.
    #[serde(default)]
    pub strategy: Option<RawStrategy>,

    /// Suggestion candidates; required for suggest rules.
    #[serde(default)]
    pub candidates: Vec<RawCandidate>,
}

fn default_severity() -> Severity {
    Severity::Error
}

fn default_enabled() -> bool {
    true
}

/// Raw condition node. Exactly one of `all` / `any` / `not` / (`field` +
/// `op`) must be present; the rest of the fields parameterize the leaf op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCondition {
    #[serde(default)]
    pub all: Option<Vec<RawCondition>>,

    #[serde(default)]
    pub any: Option<Vec<RawCondition>>,

    #[serde(default)]
    pub not: Option<Box<RawCondition>>,

    #[serde(default)]
    pub field: Option<String>,

    #[serde(default)]
    pub op: Option<RawOp>,

    #[serde(default)]
    pub value: Option<Value>,

    #[serde(default)]
    pub min: Option<f64>,

    #[serde(default)]
    pub max: Option<f64>,

    #[serde(default)]
    pub pattern: Option<String>,

    #[serde(default)]
    pub values: Option<Vec<Value>>,

    #[serde(default)]
    pub value_type: Option<ValueType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    InRange,
    LenRange,
    Matches,
    InSet,
    Exists,
    IsType,
}

/// Correction strategies for transform rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawStrategy {
    Set { value: Value },
    Truncate { max_len: usize },
    Trim,
    Lowercase,
    Uppercase,
    RegexReplace { pattern: String, replacement: String },
    Round { decimals: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCandidate {
    pub value: Value,

    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

/// Optional performance hints; everything has an engine-side default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPerformance {
    #[serde(default)]
    pub batch_size: Option<usize>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    #[serde(default)]
    pub parallel: Option<bool>,
}

/// Probe used to reject unknown contract versions before the body is parsed.
#[derive(Debug, Deserialize)]
struct VersionProbe {
    schema_version: Option<u32>,
}

/// Parse specification text. JSON and YAML are both accepted; the
/// `schema_version` contract is checked before the body is interpreted so an
/// unknown version is rejected rather than best-effort parsed.
pub fn parse_spec(text: &str) -> Result<RawSpec, CompileError> {
    let looks_json = text.trim_start().starts_with('{');

    // 1) Probe schema_version only.
    let probe: VersionProbe = if looks_json {
        serde_json::from_str(text)
            .map_err(|e| CompileError::schema(format!("cannot parse specification: {}", e)))?
    } else {
        serde_yaml::from_str(text)
            .map_err(|e| CompileError::schema(format!("cannot parse specification: {}", e)))?
    };
    let found = probe
        .schema_version
        .ok_or_else(|| CompileError::schema("specification is missing schema_version"))?;
    if found != SUPPORTED_SCHEMA_VERSION {
        return Err(CompileError::UnsupportedSchemaVersion {
            found,
            supported: SUPPORTED_SCHEMA_VERSION,
        });
    }

    // 2) Full typed parse.
    if looks_json {
        serde_json::from_str(text)
            .map_err(|e| CompileError::schema(format!("invalid specification: {}", e)))
    } else {
        serde_yaml::from_str(text)
            .map_err(|e| CompileError::schema(format!("invalid specification: {}", e)))
    }
}

impl RawSpec {
    /// Canonical form used as the checksum preimage: the typed round-trip
    /// serialized as compact JSON. Struct field order is fixed, defaults are
    /// materialized, whitespace is gone — logically identical inputs
    /// collapse to one string.
    pub fn canonical_json(&self) -> String {
        // Serialization of these plain structs cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
