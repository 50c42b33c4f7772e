//! Semantic-version compatibility between rule specifications.
//!
//! The declared version labels drive the base classification, but the IR
//! diff can overrule them: a removed rule id, a changed action kind, or a
//! narrowed mapping output is a breaking change no matter what the label
//! says. Major changes are never applied without explicit opt-in.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::compile::CompiledIR;
use crate::engine::{Engine, Record};
use crate::error::ExecuteError;

/// A parsed `major.minor.patch` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        let parts: Vec<&str> = text.split('.').collect();
        if parts.len() != 3 {
            return Err(format!("'{}' is not of the form major.minor.patch", text));
        }
        let parse_part = |s: &str| -> Result<u64, String> {
            s.parse::<u64>()
                .map_err(|_| format!("'{}' has a non-numeric component '{}'", text, s))
        };
        Ok(Self {
            major: parse_part(parts[0])?,
            minor: parse_part(parts[1])?,
            patch: parse_part(parts[2])?,
        })
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for SemVer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SemVer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SemVer::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Classification of a version delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionDelta {
    Patch,
    Minor,
    Major,
}

/// What the classification permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyDisposition {
    /// Apply immediately.
    AutoApply,
    /// Run alongside the current version and promote below a divergence
    /// threshold.
    Shadow,
    /// Only on explicit opt-in.
    OptIn,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompatibilityDecision {
    pub from: SemVer,
    pub to: SemVer,
    pub classification: VersionDelta,
    pub disposition: ApplyDisposition,
    /// Defensive findings that forced `Major` regardless of the labels.
    pub forced_major: Vec<String>,
}

impl CompatibilityDecision {
    /// Gate actually applying the new version.
    pub fn ensure_applicable(&self, opt_in: bool) -> Result<(), ExecuteError> {
        if self.classification == VersionDelta::Major && !opt_in {
            return Err(ExecuteError::CompatibilityRejected {
                from: self.from.to_string(),
                to: self.to.to_string(),
            });
        }
        Ok(())
    }
}

/// Classify a candidate version against the current one.
pub fn classify(
    from: SemVer,
    to: SemVer,
    from_ir: &CompiledIR,
    to_ir: &CompiledIR,
) -> CompatibilityDecision {
    // 1) Label-based classification.
    let mut classification = if to.major != from.major || to < from {
        VersionDelta::Major
    } else if to.minor > from.minor {
        VersionDelta::Minor
    } else {
        VersionDelta::Patch
    };

    // 2) Defensive IR diff: structural breakage forces Major.
    let forced_major = breaking_changes(from_ir, to_ir);
    if !forced_major.is_empty() {
        classification = VersionDelta::Major;
    }

    let disposition = match classification {
        VersionDelta::Patch => ApplyDisposition::AutoApply,
        VersionDelta::Minor => ApplyDisposition::Shadow,
        VersionDelta::Major => ApplyDisposition::OptIn,
    };

    CompatibilityDecision {
        from,
        to,
        classification,
        disposition,
        forced_major,
    }
}

fn breaking_changes(from_ir: &CompiledIR, to_ir: &CompiledIR) -> Vec<String> {
    let mut findings = Vec::new();

    let to_rules: BTreeMap<&str, _> = to_ir.rules.iter().map(|r| (r.id.as_str(), r)).collect();
    for rule in &from_ir.rules {
        match to_rules.get(rule.id.as_str()) {
            None => findings.push(format!("rule '{}' was removed", rule.id)),
            Some(new_rule) if new_rule.action != rule.action => findings.push(format!(
                "rule '{}' changed action kind {:?} -> {:?}",
                rule.id, rule.action, new_rule.action
            )),
            Some(_) => {}
        }
    }

    let to_outputs: Vec<&str> = to_ir.outputs();
    for output in from_ir.outputs() {
        if !to_outputs.contains(&output) {
            findings.push(format!("mapping output '{}' was removed", output));
        }
    }

    findings
}

/// Result of running a candidate IR in the shadow of the current one.
#[derive(Debug, Clone, Serialize)]
pub struct ShadowReport {
    pub records: usize,
    pub diverging: usize,
    /// Fraction of records whose output or outcomes differ.
    pub divergence: f64,
}

impl ShadowReport {
    pub fn promotable(&self, threshold: f64) -> bool {
        self.divergence <= threshold
    }
}

/// Execute both versions over the same batch and measure divergence:
/// a record diverges when its corrected output or its (rule id, severity)
/// outcome set differs between versions.
pub fn shadow_compare(
    engine: &Engine,
    current: &CompiledIR,
    candidate: &CompiledIR,
    records: &[Record],
) -> Result<ShadowReport, ExecuteError> {
    let base = engine.execute(current, records)?;
    let next = engine.execute(candidate, records)?;

    let mut diverging = 0usize;
    for i in 0..records.len() {
        let records_differ = base.records.get(i) != next.records.get(i);
        let outcomes_differ = outcome_set(&base, i) != outcome_set(&next, i);
        if records_differ || outcomes_differ {
            diverging += 1;
        }
    }

    Ok(ShadowReport {
        records: records.len(),
        diverging,
        divergence: if records.is_empty() {
            0.0
        } else {
            diverging as f64 / records.len() as f64
        },
    })
}

fn outcome_set(
    result: &crate::engine::ExecutionResult,
    index: usize,
) -> Vec<(String, crate::spec::Severity)> {
    result
        .reports
        .get(index)
        .map(|r| {
            let mut set: Vec<_> = r
                .outcomes
                .iter()
                .map(|o| (o.rule_id.clone(), o.severity))
                .collect();
            set.sort();
            set
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::Compiler;
    use pretty_assertions::assert_eq;

    fn spec(version: &str, rules: &str) -> String {
        format!(
            r#"
schema_version: 1
metadata: {{ marketplace: test, version: "{}" }}
mapping:
  - output: price
  - output: title
rules:
{}
"#,
            version, rules
        )
    }

    const RULES_V1: &str = r#"
  - id: price-positive
    target: price
    action: assert
    condition: { field: price, op: gt, value: 0 }
"#;

    fn compile(text: &str) -> CompiledIR {
        Compiler::new().compile("t", text).unwrap()
    }

    #[test]
    fn semver_parses_and_orders() {
        let a = SemVer::parse("1.2.3").unwrap();
        assert_eq!((a.major, a.minor, a.patch), (1, 2, 3));
        assert!(SemVer::parse("1.2").is_err());
        assert!(SemVer::parse("1.two.3").is_err());
        assert!(SemVer::parse("2.0.0").unwrap() > SemVer::parse("1.9.9").unwrap());
    }

    #[test]
    fn wording_only_patch_change_is_patch() {
        let from_ir = compile(&spec("1.0.0", RULES_V1));
        let to_ir = compile(
            &spec("1.0.1", RULES_V1)
                .replace("marketplace: test", "marketplace: test, description: reworded"),
        );
        let decision = classify(
            SemVer::parse("1.0.0").unwrap(),
            SemVer::parse("1.0.1").unwrap(),
            &from_ir,
            &to_ir,
        );
        assert_eq!(decision.classification, VersionDelta::Patch);
        assert_eq!(decision.disposition, ApplyDisposition::AutoApply);
        assert!(decision.forced_major.is_empty());
    }

    #[test]
    fn minor_bump_goes_to_shadow() {
        let from_ir = compile(&spec("1.0.0", RULES_V1));
        let extended = format!(
            "{}  - id: title-present\n    target: title\n    action: assert\n    condition: {{ field: title, op: exists }}\n",
            RULES_V1
        );
        let to_ir = compile(&spec("1.1.0", &extended));
        let decision = classify(
            SemVer::parse("1.0.0").unwrap(),
            SemVer::parse("1.1.0").unwrap(),
            &from_ir,
            &to_ir,
        );
        assert_eq!(decision.classification, VersionDelta::Minor);
        assert_eq!(decision.disposition, ApplyDisposition::Shadow);
    }

    #[test]
    fn removed_rule_forces_major_despite_patch_label() {
        let from_ir = compile(&spec("1.0.0", RULES_V1));
        let to_ir = compile(&spec("1.0.1", "  []"));
        let decision = classify(
            SemVer::parse("1.0.0").unwrap(),
            SemVer::parse("1.0.1").unwrap(),
            &from_ir,
            &to_ir,
        );
        assert_eq!(decision.classification, VersionDelta::Major);
        assert!(decision.forced_major[0].contains("price-positive"));
        assert!(decision.ensure_applicable(false).is_err());
        assert!(decision.ensure_applicable(true).is_ok());
    }

    #[test]
    fn changed_action_kind_forces_major() {
        let from_ir = compile(&spec("1.0.0", RULES_V1));
        let changed = r#"
  - id: price-positive
    target: price
    action: transform
    strategy: { kind: set, value: 1 }
"#;
        let to_ir = compile(&spec("1.0.1", changed));
        let decision = classify(
            SemVer::parse("1.0.0").unwrap(),
            SemVer::parse("1.0.1").unwrap(),
            &from_ir,
            &to_ir,
        );
        assert_eq!(decision.classification, VersionDelta::Major);
    }

    #[test]
    fn major_without_opt_in_is_rejected() {
        let from_ir = compile(&spec("1.0.0", RULES_V1));
        let to_ir = compile(&spec("2.0.0", RULES_V1));
        let decision = classify(
            SemVer::parse("1.0.0").unwrap(),
            SemVer::parse("2.0.0").unwrap(),
            &from_ir,
            &to_ir,
        );
        assert_eq!(decision.classification, VersionDelta::Major);
        match decision.ensure_applicable(false) {
            Err(ExecuteError::CompatibilityRejected { from, to }) => {
                assert_eq!(from, "1.0.0");
                assert_eq!(to, "2.0.0");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn identical_behavior_has_zero_divergence() {
        let from_ir = compile(&spec("1.0.0", RULES_V1));
        let to_ir = compile(&spec("1.0.1", RULES_V1));
        let engine = Engine::new();
        let batch: Vec<Record> = vec![
            serde_json::json!({"price": 10, "title": "a"})
                .as_object()
                .unwrap()
                .clone(),
            serde_json::json!({"price": -1, "title": "b"})
                .as_object()
                .unwrap()
                .clone(),
        ];
        let report = shadow_compare(&engine, &from_ir, &to_ir, &batch).unwrap();
        assert_eq!(report.diverging, 0);
        assert!(report.promotable(0.01));
    }
}
