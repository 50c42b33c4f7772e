//! Execution plan: phase buckets, precedence order, vectorizable split.
//!
//! Rules execute in fixed phases (validation -> correction -> suggestion).
//! Within a phase, rules sort by ascending precedence, then by target field
//! so rules sharing a field are co-located, then by id for a deterministic
//! tiebreak. Consecutive vectorizable rules form one columnar group; the
//! rest run row-by-row.

use serde::{Deserialize, Serialize};

use crate::spec::{ActionKind, RuleDef, ScopeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePhase {
    Validation,
    Correction,
    Suggestion,
}

impl RulePhase {
    pub fn for_action(action: ActionKind) -> Self {
        match action {
            ActionKind::Assert => RulePhase::Validation,
            ActionKind::Transform => RulePhase::Correction,
            ActionKind::Suggest => RulePhase::Suggestion,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// One batch/columnar pass over all records per rule.
    Vectorized,
    /// Row-by-row evaluation with the full condition machinery.
    Scalar,
}

/// A run of rules with no shared mutable state between groups, enabling
/// multi-worker execution across record chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleGroup {
    pub kind: GroupKind,
    /// Indices into `CompiledIR::rules`.
    pub rules: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhasePlan {
    pub phase: RulePhase,
    pub groups: Vec<RuleGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub phases: Vec<PhasePlan>,
}

/// A rule is vectorizable when its whole evaluation is one simple
/// comparison over a flat, non-array field: assert action, single-leaf
/// comparison condition, flat target and leaf field, non-global scope.
pub fn is_vectorizable(rule: &RuleDef) -> bool {
    if rule.action != ActionKind::Assert || rule.scope.kind == ScopeKind::Global {
        return false;
    }
    if rule.target.is_nested() || rule.target.has_wildcard() {
        return false;
    }
    match rule.condition.as_ref().and_then(|c| c.as_simple_comparison()) {
        Some(p) => !p.field.is_nested() && !p.field.has_wildcard(),
        None => false,
    }
}

pub fn build_plan(rules: &[RuleDef]) -> ExecutionPlan {
    let mut phases = Vec::new();

    for phase in [
        RulePhase::Validation,
        RulePhase::Correction,
        RulePhase::Suggestion,
    ] {
        // 1) Collect enabled rules for this phase.
        let mut indices: Vec<usize> = rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.enabled && RulePhase::for_action(r.action) == phase)
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            continue;
        }

        // 2) Precedence, then target co-location, then id.
        indices.sort_by(|&a, &b| {
            rules[a]
                .precedence
                .cmp(&rules[b].precedence)
                .then_with(|| rules[a].target.cmp(&rules[b].target))
                .then_with(|| rules[a].id.cmp(&rules[b].id))
        });

        // 3) Split consecutive runs by execution strategy.
        let mut groups: Vec<RuleGroup> = Vec::new();
        for idx in indices {
            let kind = if is_vectorizable(&rules[idx]) {
                GroupKind::Vectorized
            } else {
                GroupKind::Scalar
            };
            match groups.last_mut() {
                Some(group) if group.kind == kind => group.rules.push(idx),
                _ => groups.push(RuleGroup {
                    kind,
                    rules: vec![idx],
                }),
            }
        }

        phases.push(PhasePlan { phase, groups });
    }

    ExecutionPlan { phases }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::condition::DEFAULT_REGEX_SIZE_LIMIT;
    use crate::spec::parse_spec;
    use pretty_assertions::assert_eq;

    fn rules_of(text: &str) -> Vec<RuleDef> {
        parse_spec(text)
            .unwrap()
            .validate_and_build(DEFAULT_REGEX_SIZE_LIMIT)
            .unwrap()
            .rules
    }

    const SPEC: &str = r#"
schema_version: 1
metadata: { marketplace: test, version: "1.0.0" }
mapping:
  - output: price
  - output: title
  - output: items
rules:
  - id: later
    target: price
    action: assert
    precedence: 20
    condition: { field: price, op: lt, value: 100000 }
  - id: early
    target: price
    action: assert
    precedence: 10
    condition: { field: price, op: gt, value: 0 }
  - id: deep
    target: items
    action: assert
    precedence: 15
    condition: { field: "items[*].sku", op: exists }
  - id: fix-title
    target: title
    action: transform
    strategy: { kind: trim }
  - id: disabled
    target: title
    action: assert
    enabled: false
    condition: { field: title, op: exists }
"#;

    #[test]
    fn phases_are_ordered_and_disabled_rules_dropped() {
        let rules = rules_of(SPEC);
        let plan = build_plan(&rules);
        assert_eq!(plan.phases.len(), 2);
        assert_eq!(plan.phases[0].phase, RulePhase::Validation);
        assert_eq!(plan.phases[1].phase, RulePhase::Correction);

        let planned: usize = plan
            .phases
            .iter()
            .flat_map(|p| &p.groups)
            .map(|g| g.rules.len())
            .sum();
        assert_eq!(planned, 4, "disabled rule must not be planned");
    }

    #[test]
    fn precedence_orders_within_phase() {
        let rules = rules_of(SPEC);
        let plan = build_plan(&rules);
        let validation: Vec<&str> = plan.phases[0]
            .groups
            .iter()
            .flat_map(|g| &g.rules)
            .map(|&i| rules[i].id.as_str())
            .collect();
        assert_eq!(validation, vec!["early", "deep", "later"]);
    }

    #[test]
    fn wildcard_condition_is_scalar() {
        let rules = rules_of(SPEC);
        let plan = build_plan(&rules);
        for group in &plan.phases[0].groups {
            for &i in &group.rules {
                if rules[i].id == "deep" {
                    assert_eq!(group.kind, GroupKind::Scalar);
                }
                if rules[i].id == "early" || rules[i].id == "later" {
                    assert_eq!(group.kind, GroupKind::Vectorized);
                }
            }
        }
    }
}
