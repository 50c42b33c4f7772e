//! The compiled intermediate representation.
//!
//! A `CompiledIR` is immutable once built and identified by its checksum.
//! It serializes deterministically (regexes as their patterns, maps as
//! BTreeMaps) so equivalent logical input always yields byte-identical
//! artifacts for storage and replay.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::compile::checksum::Checksum;
use crate::compile::plan::ExecutionPlan;
use crate::spec::{
    ActionKind, Candidate, ConditionExpr, FieldPath, MappingField, Metadata, PerfHints, RuleDef,
    Scope, Severity, TransformStrategy,
};

/// Mapping entry with its dependency resolved to an index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledMapping {
    pub field: MappingField,
    /// Index of the mapping entry whose output this one reads, if any.
    pub depends_on: Option<usize>,
}

/// A rule with resolved accessors and pre-parsed predicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledRule {
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
    /// Eligible for the columnar execution path.
    pub vectorizable: bool,
    /// Short-circuit candidate: a failing error-severity assert carrying
    /// the "critical" tag halts lower-precedence work for the record under
    /// the default policy.
    pub short_circuit: bool,
    /// Every field the condition reads, precomputed for the evaluation
    /// cache key.
    pub condition_fields: Vec<FieldPath>,
}

impl CompiledRule {
    pub fn from_def(def: RuleDef, vectorizable: bool) -> Self {
        let short_circuit = def.action == ActionKind::Assert
            && def.severity == Severity::Error
            && def.has_tag("critical");
        let mut fields = std::collections::BTreeSet::new();
        if let Some(cond) = &def.condition {
            cond.referenced_fields(&mut fields);
        }
        Self {
            id: def.id,
            target: def.target,
            action: def.action,
            severity: def.severity,
            precedence: def.precedence,
            enabled: def.enabled,
            tags: def.tags,
            scope: def.scope,
            condition: def.condition,
            strategy: def.strategy,
            candidates: def.candidates,
            vectorizable,
            short_circuit,
            condition_fields: fields.into_iter().collect(),
        }
    }
}

/// Immutable compiled artifact, identified by `checksum`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledIR {
    pub schema_version: u32,
    pub checksum: Checksum,
    pub compiler_version: String,
    /// Unix seconds; audit metadata, excluded from the checksum preimage.
    pub compiled_at: u64,
    pub metadata: Metadata,
    pub mapping: Vec<CompiledMapping>,
    /// Mapping indices in dependency order.
    pub mapping_order: Vec<usize>,
    /// output -> outputs it depends on.
    pub dependency_edges: BTreeMap<String, Vec<String>>,
    pub rules: Vec<CompiledRule>,
    pub plan: ExecutionPlan,
    pub performance: PerfHints,
}

impl CompiledIR {
    pub fn find_rule(&self, id: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Declared mapping outputs, sorted.
    pub fn outputs(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.mapping.iter().map(|m| m.field.output.as_str()).collect();
        out.sort_unstable();
        out
    }

    /// Structural integrity check run before execution. A violation means
    /// the artifact is corrupted and the run must abort, so the message is
    /// routed into `ExecuteError::RuntimeFatal` by the engine.
    pub fn check_integrity(&self) -> Result<(), String> {
        if self.mapping_order.len() != self.mapping.len() {
            return Err(format!(
                "mapping order covers {} of {} entries",
                self.mapping_order.len(),
                self.mapping.len()
            ));
        }
        for &idx in &self.mapping_order {
            if idx >= self.mapping.len() {
                return Err(format!("mapping order references entry {}", idx));
            }
        }
        for (i, m) in self.mapping.iter().enumerate() {
            if let Some(dep) = m.depends_on {
                if dep >= self.mapping.len() || dep == i {
                    return Err(format!(
                        "mapping '{}' has invalid dependency index {}",
                        m.field.output, dep
                    ));
                }
            }
        }
        for phase in &self.plan.phases {
            for group in &phase.groups {
                for &idx in &group.rules {
                    if idx >= self.rules.len() {
                        return Err(format!("plan references rule index {}", idx));
                    }
                    if !self.rules[idx].enabled {
                        return Err(format!(
                            "plan schedules disabled rule '{}'",
                            self.rules[idx].id
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
