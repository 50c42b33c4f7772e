//! Rule-group execution strategies over one record chunk.
//!
//! The planner emits vectorizable and scalar groups; each maps to one
//! [`RuleGroupExecutor`] strategy selected from the group kind, never from
//! runtime reflection. Both iterate rule-outer/record-inner so per-record
//! outcome order always equals plan order.

use std::time::Instant;

use serde_json::Value;

use crate::compile::{CompiledIR, CompiledRule};
use crate::engine::access::{access, set_at, Record};
use crate::engine::eval::{
    condition_key, eval_condition, eval_test, EvalCache, EvalError, EvalStats,
};
use crate::engine::result::{
    Correction, Outcome, OutcomeKind, RecordReport, RuleCost, Suggestion,
};
use crate::engine::{EnginePolicy, FailFastMode};
use crate::spec::{ActionKind, Scope, Severity, TransformStrategy};

/// Mutable state for one chunk of records. Owned by exactly one worker;
/// nothing here is shared across chunks.
pub struct ChunkState<'a> {
    pub ir: &'a CompiledIR,
    pub policy: &'a EnginePolicy,
    /// Absolute index of the chunk's first record.
    pub offset: usize,
    pub records: Vec<Record>,
    pub reports: Vec<RecordReport>,
    pub halted: Vec<bool>,
    pub corrections: Vec<Correction>,
    pub suggestions: Vec<Suggestion>,
    pub cache: EvalCache,
    /// Indexed by rule index.
    pub rule_cost: Vec<RuleCost>,
}

/// One strategy for running a rule group against a chunk.
pub trait RuleGroupExecutor {
    fn run(&self, rules: &[usize], state: &mut ChunkState<'_>);
}

/// Columnar strategy: one pass over the chunk per rule, plain value test,
/// no condition-tree machinery.
pub struct VectorizedGroup;

/// Row-by-row strategy with the full condition evaluator and the
/// execution-scoped cache.
pub struct ScalarGroup;

impl RuleGroupExecutor for ScalarGroup {
    fn run(&self, rules: &[usize], state: &mut ChunkState<'_>) {
        for &rule_idx in rules {
            let start = Instant::now();
            for rec_idx in 0..state.records.len() {
                state.apply_rule(rule_idx, rec_idx);
            }
            state.rule_cost[rule_idx].micros += start.elapsed().as_micros() as u64;
        }
    }
}

impl RuleGroupExecutor for VectorizedGroup {
    fn run(&self, rules: &[usize], state: &mut ChunkState<'_>) {
        let ir = state.ir;
        for &rule_idx in rules {
            let rule = &ir.rules[rule_idx];
            let predicate = match rule.condition.as_ref().and_then(|c| c.as_simple_comparison()) {
                Some(p) => p,
                // Planner guarantees this; fall back rather than trust it.
                None => {
                    ScalarGroup.run(&[rule_idx], state);
                    continue;
                }
            };
            let target_key = rule.target.head();
            let field_key = predicate.field.head();

            let start = Instant::now();
            for rec_idx in 0..state.records.len() {
                if state.halted[rec_idx] {
                    continue;
                }
                if !scope_matches(&rule.scope, &state.records[rec_idx]) {
                    continue;
                }
                state.rule_cost[rule_idx].evaluations += 1;

                if !state.records[rec_idx].contains_key(target_key) {
                    state.reports[rec_idx].outcomes.push(missing_field(rule));
                    if should_halt(state.policy, rule) {
                        state.halted[rec_idx] = true;
                    }
                    continue;
                }

                let holds = match state.records[rec_idx].get(field_key) {
                    Some(value) => eval_test(
                        &predicate.test,
                        value,
                        &predicate.field,
                        state.policy.regex_time_ceiling,
                    ),
                    None => Ok(false),
                };

                match holds {
                    Ok(true) => {}
                    Ok(false) => {
                        state.reports[rec_idx].outcomes.push(violation(rule));
                        if should_halt(state.policy, rule) {
                            state.halted[rec_idx] = true;
                        }
                    }
                    Err(e) => {
                        state.reports[rec_idx].outcomes.push(eval_failure(rule, &e));
                    }
                }
            }
            state.rule_cost[rule_idx].micros += start.elapsed().as_micros() as u64;
        }
    }
}

impl ChunkState<'_> {
    /// Full per-record rule application: scope gate, target resolution,
    /// cached condition evaluation, action dispatch.
    pub fn apply_rule(&mut self, rule_idx: usize, rec_idx: usize) {
        let ir = self.ir;
        let policy = self.policy;
        let rule = &ir.rules[rule_idx];

        if self.halted[rec_idx] {
            return;
        }
        if !scope_matches(&rule.scope, &self.records[rec_idx]) {
            return;
        }
        self.rule_cost[rule_idx].evaluations += 1;

        // Target resolution: absent target is an error outcome for assert
        // and a silent skip for transform/suggest.
        if access(&self.records[rec_idx], &rule.target).is_empty() {
            if rule.action == ActionKind::Assert {
                self.reports[rec_idx].outcomes.push(missing_field(rule));
                if should_halt(policy, rule) {
                    self.halted[rec_idx] = true;
                }
            }
            return;
        }

        // Condition, consulting the execution-scoped cache.
        let holds = match &rule.condition {
            None => Ok(true),
            Some(cond) => {
                let key = condition_key(
                    rule_idx as u32,
                    &rule.condition_fields,
                    &self.records[rec_idx],
                );
                match self.cache.lookup(key) {
                    Some(v) => Ok(v),
                    None => {
                        let mut stats = EvalStats::default();
                        let result = eval_condition(
                            cond,
                            &self.records[rec_idx],
                            policy.regex_time_ceiling,
                            &mut stats,
                        );
                        if let Ok(v) = result {
                            self.cache.insert(key, v);
                        }
                        result
                    }
                }
            }
        };

        let holds = match holds {
            Ok(v) => v,
            Err(e) => {
                self.reports[rec_idx].outcomes.push(eval_failure(rule, &e));
                return;
            }
        };

        match rule.action {
            ActionKind::Assert => {
                if !holds {
                    self.reports[rec_idx].outcomes.push(violation(rule));
                    if should_halt(policy, rule) {
                        self.halted[rec_idx] = true;
                    }
                }
            }
            ActionKind::Transform => {
                if !holds {
                    return;
                }
                let original = match access(&self.records[rec_idx], &rule.target).first() {
                    Some(v) => (*v).clone(),
                    None => return,
                };
                let strategy = match &rule.strategy {
                    Some(s) => s,
                    None => return,
                };
                if let Some(corrected) = apply_strategy(strategy, &original) {
                    if corrected != original
                        && set_at(&mut self.records[rec_idx], &rule.target, corrected.clone())
                    {
                        self.corrections.push(Correction {
                            record_index: self.offset + rec_idx,
                            rule_id: rule.id.clone(),
                            field: rule.target.to_string(),
                            strategy: strategy.name().to_string(),
                            original,
                            corrected,
                        });
                    }
                }
            }
            ActionKind::Suggest => {
                if !holds {
                    return;
                }
                let current = access(&self.records[rec_idx], &rule.target)
                    .first()
                    .map(|v| (*v).clone());
                let already_candidate = current
                    .as_ref()
                    .map(|c| rule.candidates.iter().any(|cand| &cand.value == c))
                    .unwrap_or(false);
                if !already_candidate {
                    self.suggestions.push(Suggestion {
                        record_index: self.offset + rec_idx,
                        rule_id: rule.id.clone(),
                        field: rule.target.to_string(),
                        current,
                        candidates: rule.candidates.clone(),
                    });
                }
            }
        }
    }
}

/// Scope filters gate rule applicability per record; a missing filtered
/// field means out of scope.
pub fn scope_matches(scope: &Scope, record: &Record) -> bool {
    if let Some(category) = &scope.category {
        if record.get("category").and_then(Value::as_str) != Some(category.as_str()) {
            return false;
        }
    }
    if let Some(brand) = &scope.brand {
        if record.get("brand").and_then(Value::as_str) != Some(brand.as_str()) {
            return false;
        }
    }
    if scope.price_min.is_some() || scope.price_max.is_some() {
        let price = match record.get("price").and_then(Value::as_f64) {
            Some(p) => p,
            None => return false,
        };
        if scope.price_min.map(|min| price < min).unwrap_or(false) {
            return false;
        }
        if scope.price_max.map(|max| price > max).unwrap_or(false) {
            return false;
        }
    }
    true
}

fn should_halt(policy: &EnginePolicy, rule: &CompiledRule) -> bool {
    match policy.fail_fast {
        FailFastMode::CollectAll => false,
        FailFastMode::CriticalTag => rule.short_circuit,
        FailFastMode::FirstError => {
            rule.action == ActionKind::Assert && rule.severity == Severity::Error
        }
    }
}

fn violation(rule: &CompiledRule) -> Outcome {
    Outcome {
        rule_id: rule.id.clone(),
        field: rule.target.to_string(),
        severity: rule.severity,
        kind: OutcomeKind::Violation,
        message: format!("condition failed for '{}'", rule.target),
    }
}

fn missing_field(rule: &CompiledRule) -> Outcome {
    Outcome {
        rule_id: rule.id.clone(),
        field: rule.target.to_string(),
        severity: rule.severity,
        kind: OutcomeKind::MissingField,
        message: format!("field '{}' not found", rule.target),
    }
}

fn eval_failure(rule: &CompiledRule, error: &EvalError) -> Outcome {
    Outcome {
        rule_id: rule.id.clone(),
        field: rule.target.to_string(),
        severity: Severity::Error,
        kind: OutcomeKind::EvaluationError,
        message: error.to_string(),
    }
}

/// Apply a correction strategy. `None` means the strategy does not apply
/// to the value's type and the rule is a no-op for this record.
pub fn apply_strategy(strategy: &TransformStrategy, value: &Value) -> Option<Value> {
    match strategy {
        TransformStrategy::Set { value: v } => Some(v.clone()),
        TransformStrategy::Truncate { max_len } => value.as_str().map(|s| {
            if s.chars().count() > *max_len {
                Value::String(s.chars().take(*max_len).collect())
            } else {
                Value::String(s.to_string())
            }
        }),
        TransformStrategy::Trim => value.as_str().map(|s| Value::String(s.trim().to_string())),
        TransformStrategy::Lowercase => value.as_str().map(|s| Value::String(s.to_lowercase())),
        TransformStrategy::Uppercase => value.as_str().map(|s| Value::String(s.to_uppercase())),
        TransformStrategy::RegexReplace { regex, replacement } => value
            .as_str()
            .map(|s| Value::String(regex.replace_all(s, replacement))),
        TransformStrategy::Round { decimals } => value.as_f64().and_then(|n| {
            let factor = 10f64.powi(*decimals as i32);
            serde_json::Number::from_f64((n * factor).round() / factor).map(Value::Number)
        }),
    }
}
