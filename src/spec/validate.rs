//! Semantic validation: raw spec -> validated in-memory structures.
//!
//! This performs three major phases:
//! 1) Normalize and check the mapping table (unique flat outputs, parsed
//!    source paths).
//! 2) Validate rules: unique ids, declared targets and condition fields,
//!    action-specific contracts, regex budget.
//! 3) Assemble the validated spec consumed by the compiler.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compat::SemVer;
use crate::error::CompileError;
use crate::spec::condition::{
    CmpOp, CompiledRegex, ConditionExpr, Predicate, PredicateTest,
};
use crate::spec::raw::{
    ActionKind, MapTransform, RawCondition, RawMappingField, RawOp, RawRule, RawScope, RawSpec,
    RawStrategy, ScopeKind, Severity, SUPPORTED_SCHEMA_VERSION,
};
use crate::spec::FieldPath;

/// Validated spec metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub marketplace: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub breaking_changes: bool,
}

/// Validated mapping entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingField {
    pub output: String,
    pub source: FieldPath,
    pub transform: Option<MapTransform>,
    pub required: bool,
    pub default: Option<Value>,
}

/// Validated rule scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    pub kind: ScopeKind,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
}

/// Transform strategy with pre-compiled regex.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformStrategy {
    Set { value: Value },
    Truncate { max_len: usize },
    Trim,
    Lowercase,
    Uppercase,
    RegexReplace { regex: CompiledRegex, replacement: String },
    Round { decimals: u32 },
}

impl TransformStrategy {
    /// Strategy name recorded on correction entries.
    pub fn name(&self) -> &'static str {
        match self {
            TransformStrategy::Set { .. } => "set",
            TransformStrategy::Truncate { .. } => "truncate",
            TransformStrategy::Trim => "trim",
            TransformStrategy::Lowercase => "lowercase",
            TransformStrategy::Uppercase => "uppercase",
            TransformStrategy::RegexReplace { .. } => "regex_replace",
            TransformStrategy::Round { .. } => "round",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub value: Value,
    pub confidence: f64,
}

/// Validated rule definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDef {
    pub id: String,
    pub target: FieldPath,
    pub action: ActionKind,
    pub severity: Severity,
    pub precedence: i32,
    pub enabled: bool,
    pub tags: Vec<String>,
    pub scope: Scope,
    pub condition: Option<ConditionExpr>,
    pub strategy: Option<TransformStrategy>,
    pub candidates: Vec<Candidate>,
}

impl RuleDef {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Engine-relevant performance hints with spec-level overrides applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerfHints {
    pub batch_size: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub cache_ttl_secs: Option<u64>,
    pub parallel: Option<bool>,
}

/// Fully validated specification, ready for planning.
#[derive(Debug, Clone)]
pub struct ValidatedSpec {
    pub metadata: Metadata,
    pub mapping: Vec<MappingField>,
    pub rules: Vec<RuleDef>,
    pub performance: PerfHints,
    /// Declared mapping outputs; the only names rules may reference.
    pub outputs: BTreeSet<String>,
}

impl RawSpec {
    /// Validate the raw spec and build the in-memory form.
    pub fn validate_and_build(&self, regex_size_limit: usize) -> Result<ValidatedSpec, CompileError> {
        if self.schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(CompileError::UnsupportedSchemaVersion {
                found: self.schema_version,
                supported: SUPPORTED_SCHEMA_VERSION,
            });
        }

        // 1) Metadata.
        if self.metadata.marketplace.trim().is_empty() {
            return Err(CompileError::schema("metadata.marketplace cannot be empty"));
        }
        SemVer::parse(&self.metadata.version).map_err(|e| {
            CompileError::schema(format!(
                "metadata.version '{}' is not a semantic version: {}",
                self.metadata.version, e
            ))
        })?;
        let metadata = Metadata {
            marketplace: self.metadata.marketplace.clone(),
            version: self.metadata.version.clone(),
            author: self.metadata.author.clone(),
            description: self.metadata.description.clone(),
            breaking_changes: self.metadata.breaking_changes,
        };

        // 2) Mapping table.
        if self.mapping.is_empty() {
            return Err(CompileError::schema("mapping must declare at least one output"));
        }
        let mut outputs: BTreeSet<String> = BTreeSet::new();
        let mut mapping = Vec::with_capacity(self.mapping.len());
        for raw in &self.mapping {
            mapping.push(validate_mapping_field(raw, &mut outputs)?);
        }

        // 3) Rules.
        let mut seen_ids: BTreeSet<&str> = BTreeSet::new();
        let mut rules = Vec::with_capacity(self.rules.len());
        for raw in &self.rules {
            let id = raw.id.trim();
            if id.is_empty() {
                return Err(CompileError::schema("rule id cannot be empty"));
            }
            if !seen_ids.insert(id) {
                return Err(CompileError::DuplicateRule {
                    rule_id: id.to_string(),
                });
            }
            rules.push(validate_rule(raw, &outputs, regex_size_limit)?);
        }

        // 4) Performance hints.
        if self.performance.batch_size == Some(0) {
            return Err(CompileError::schema("performance.batch_size must be > 0"));
        }
        let performance = PerfHints {
            batch_size: self.performance.batch_size,
            timeout_ms: self.performance.timeout_ms,
            cache_ttl_secs: self.performance.cache_ttl_secs,
            parallel: self.performance.parallel,
        };

        Ok(ValidatedSpec {
            metadata,
            mapping,
            rules,
            performance,
            outputs,
        })
    }
}

fn validate_mapping_field(
    raw: &RawMappingField,
    outputs: &mut BTreeSet<String>,
) -> Result<MappingField, CompileError> {
    let output = raw.output.trim();
    if output.is_empty() {
        return Err(CompileError::schema("mapping output cannot be empty"));
    }
    if output.contains('.') || output.contains('[') {
        return Err(CompileError::schema(format!(
            "mapping output '{}' must be a flat field name",
            output
        )));
    }
    if !outputs.insert(output.to_string()) {
        return Err(CompileError::schema(format!(
            "mapping declares output '{}' twice",
            output
        )));
    }

    let source_text = raw.source.as_deref().unwrap_or(output);
    let source = FieldPath::parse(source_text).map_err(CompileError::schema)?;
    if source.has_wildcard() {
        return Err(CompileError::schema(format!(
            "mapping source '{}' may not contain a wildcard",
            source
        )));
    }

    Ok(MappingField {
        output: output.to_string(),
        source,
        transform: raw.transform,
        required: raw.required,
        default: raw.default.clone(),
    })
}

fn validate_rule(
    raw: &RawRule,
    outputs: &BTreeSet<String>,
    regex_size_limit: usize,
) -> Result<RuleDef, CompileError> {
    let rule_id = raw.id.trim().to_string();

    let target = FieldPath::parse(&raw.target)
        .map_err(|e| CompileError::schema(format!("rule '{}': {}", rule_id, e)))?;
    if !outputs.contains(target.head()) {
        return Err(CompileError::FieldNotFound {
            rule_id,
            field: target.to_string(),
        });
    }
    if raw.action == ActionKind::Transform && target.has_wildcard() {
        return Err(CompileError::schema(format!(
            "rule '{}': transform target '{}' may not contain a wildcard",
            rule_id, target
        )));
    }

    let scope = validate_scope(&raw.scope, &rule_id)?;

    let condition = match &raw.condition {
        Some(raw_cond) => Some(build_condition(raw_cond, &rule_id, outputs, regex_size_limit)?),
        None => {
            if raw.action == ActionKind::Assert {
                return Err(CompileError::schema(format!(
                    "rule '{}': assert rules require a condition",
                    rule_id
                )));
            }
            None
        }
    };

    let strategy = match raw.action {
        ActionKind::Transform => {
            let raw_strategy = raw.strategy.as_ref().ok_or_else(|| {
                CompileError::schema(format!(
                    "rule '{}': transform rules require a strategy",
                    rule_id
                ))
            })?;
            Some(build_strategy(raw_strategy, &rule_id, regex_size_limit)?)
        }
        _ => {
            if raw.strategy.is_some() {
                return Err(CompileError::schema(format!(
                    "rule '{}': only transform rules take a strategy",
                    rule_id
                )));
            }
            None
        }
    };

    let candidates = match raw.action {
        ActionKind::Suggest => {
            if raw.candidates.is_empty() {
                return Err(CompileError::schema(format!(
                    "rule '{}': suggest rules require candidates",
                    rule_id
                )));
            }
            let mut out = Vec::with_capacity(raw.candidates.len());
            for c in &raw.candidates {
                if !(0.0..=1.0).contains(&c.confidence) {
                    return Err(CompileError::schema(format!(
                        "rule '{}': candidate confidence {} outside [0, 1]",
                        rule_id, c.confidence
                    )));
                }
                out.push(Candidate {
                    value: c.value.clone(),
                    confidence: c.confidence,
                });
            }
            out
        }
        _ => Vec::new(),
    };

    Ok(RuleDef {
        id: rule_id,
        target,
        action: raw.action,
        severity: raw.severity,
        precedence: raw.precedence,
        enabled: raw.enabled,
        tags: raw.tags.clone(),
        scope,
        condition,
        strategy,
        candidates,
    })
}

fn build_strategy(
    raw: &RawStrategy,
    rule_id: &str,
    regex_size_limit: usize,
) -> Result<TransformStrategy, CompileError> {
    Ok(match raw {
        RawStrategy::Set { value } => TransformStrategy::Set {
            value: value.clone(),
        },
        RawStrategy::Truncate { max_len } => TransformStrategy::Truncate { max_len: *max_len },
        RawStrategy::Trim => TransformStrategy::Trim,
        RawStrategy::Lowercase => TransformStrategy::Lowercase,
        RawStrategy::Uppercase => TransformStrategy::Uppercase,
        RawStrategy::RegexReplace {
            pattern,
            replacement,
        } => {
            let regex = CompiledRegex::compile(pattern, regex_size_limit).map_err(|_| {
                CompileError::RegexBudget {
                    rule_id: rule_id.to_string(),
                    pattern: pattern.clone(),
                }
            })?;
            TransformStrategy::RegexReplace {
                regex,
                replacement: replacement.clone(),
            }
        }
        RawStrategy::Round { decimals } => TransformStrategy::Round {
            decimals: *decimals,
        },
    })
}

fn validate_scope(raw: &RawScope, rule_id: &str) -> Result<Scope, CompileError> {
    if let (Some(min), Some(max)) = (raw.price_min, raw.price_max) {
        if min > max {
            return Err(CompileError::schema(format!(
                "rule '{}': scope price_min {} > price_max {}",
                rule_id, min, max
            )));
        }
    }
    Ok(Scope {
        kind: raw.kind,
        category: raw.category.clone(),
        brand: raw.brand.clone(),
        price_min: raw.price_min,
        price_max: raw.price_max,
    })
}

fn build_condition(
    raw: &RawCondition,
    rule_id: &str,
    outputs: &BTreeSet<String>,
    regex_size_limit: usize,
) -> Result<ConditionExpr, CompileError> {
    let mut forms = 0;
    if raw.all.is_some() {
        forms += 1;
    }
    if raw.any.is_some() {
        forms += 1;
    }
    if raw.not.is_some() {
        forms += 1;
    }
    if raw.field.is_some() {
        forms += 1;
    }
    if forms != 1 {
        return Err(CompileError::schema(format!(
            "rule '{}': condition node must be exactly one of all/any/not/predicate",
            rule_id
        )));
    }

    if let Some(items) = &raw.all {
        if items.is_empty() {
            return Err(CompileError::schema(format!(
                "rule '{}': 'all' cannot be empty",
                rule_id
            )));
        }
        let built: Result<Vec<_>, _> = items
            .iter()
            .map(|c| build_condition(c, rule_id, outputs, regex_size_limit))
            .collect();
        return Ok(ConditionExpr::All(built?));
    }
    if let Some(items) = &raw.any {
        if items.is_empty() {
            return Err(CompileError::schema(format!(
                "rule '{}': 'any' cannot be empty",
                rule_id
            )));
        }
        let built: Result<Vec<_>, _> = items
            .iter()
            .map(|c| build_condition(c, rule_id, outputs, regex_size_limit))
            .collect();
        return Ok(ConditionExpr::Any(built?));
    }
    if let Some(inner) = &raw.not {
        return Ok(ConditionExpr::Not(Box::new(build_condition(
            inner,
            rule_id,
            outputs,
            regex_size_limit,
        )?)));
    }

    // Leaf predicate.
    let field_text = raw.field.as_deref().unwrap_or_default();
    let field = FieldPath::parse(field_text)
        .map_err(|e| CompileError::schema(format!("rule '{}': {}", rule_id, e)))?;
    if !outputs.contains(field.head()) {
        return Err(CompileError::FieldNotFound {
            rule_id: rule_id.to_string(),
            field: field.to_string(),
        });
    }

    let op = raw.op.ok_or_else(|| {
        CompileError::schema(format!("rule '{}': predicate is missing 'op'", rule_id))
    })?;

    let test = match op {
        RawOp::Eq | RawOp::Ne | RawOp::Gt | RawOp::Ge | RawOp::Lt | RawOp::Le => {
            let value = raw.value.clone().ok_or_else(|| {
                CompileError::schema(format!(
                    "rule '{}': comparison on '{}' needs 'value'",
                    rule_id, field
                ))
            })?;
            let cmp = match op {
                RawOp::Eq => CmpOp::Eq,
                RawOp::Ne => CmpOp::Ne,
                RawOp::Gt => CmpOp::Gt,
                RawOp::Ge => CmpOp::Ge,
                RawOp::Lt => CmpOp::Lt,
                RawOp::Le => CmpOp::Le,
                _ => unreachable!(),
            };
            PredicateTest::Cmp { op: cmp, value }
        }
        RawOp::InRange => {
            let (min, max) = match (raw.min, raw.max) {
                (Some(min), Some(max)) if min <= max => (min, max),
                (Some(min), Some(max)) => {
                    return Err(CompileError::schema(format!(
                        "rule '{}': in_range min {} > max {}",
                        rule_id, min, max
                    )));
                }
                _ => {
                    return Err(CompileError::schema(format!(
                        "rule '{}': in_range needs 'min' and 'max'",
                        rule_id
                    )));
                }
            };
            PredicateTest::InRange { min, max }
        }
        RawOp::LenRange => {
            if raw.min.is_none() && raw.max.is_none() {
                return Err(CompileError::schema(format!(
                    "rule '{}': len_range needs 'min' and/or 'max'",
                    rule_id
                )));
            }
            PredicateTest::LenRange {
                min: raw.min.unwrap_or(0.0) as usize,
                max: raw.max.map(|m| m as usize),
            }
        }
        RawOp::Matches => {
            let pattern = raw.pattern.as_deref().ok_or_else(|| {
                CompileError::schema(format!("rule '{}': matches needs 'pattern'", rule_id))
            })?;
            let regex = CompiledRegex::compile(pattern, regex_size_limit).map_err(|_| {
                CompileError::RegexBudget {
                    rule_id: rule_id.to_string(),
                    pattern: pattern.to_string(),
                }
            })?;
            PredicateTest::Matches(regex)
        }
        RawOp::InSet => {
            let values = raw.values.clone().unwrap_or_default();
            if values.is_empty() {
                return Err(CompileError::schema(format!(
                    "rule '{}': in_set needs non-empty 'values'",
                    rule_id
                )));
            }
            PredicateTest::InSet(values)
        }
        RawOp::Exists => PredicateTest::Exists,
        RawOp::IsType => {
            let value_type = raw.value_type.ok_or_else(|| {
                CompileError::schema(format!("rule '{}': is_type needs 'value_type'", rule_id))
            })?;
            PredicateTest::IsType(value_type)
        }
    };

    Ok(ConditionExpr::Leaf(Predicate { field, test }))
}
