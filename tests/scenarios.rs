//! End-to-end scenarios: spec text -> compile -> execute -> results.

use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde_json::json;

use rulec::engine::OutcomeKind;
use rulec::{
    CompileError, Compiler, Engine, EngineEvent, EventSink, Record, ReloadManager, RunStatus,
    SpecIdentity,
};

fn batch(values: serde_json::Value) -> Vec<Record> {
    values
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect()
}

// ── Scenario A: one assert rule, one bad record ─────────────────────────

#[test]
fn assert_rule_flags_only_the_bad_record() {
    let spec = r#"
schema_version: 1
metadata: { marketplace: demo, version: "1.0.0" }
mapping:
  - output: price
rules:
  - id: price-positive
    target: price
    action: assert
    severity: error
    condition: { field: price, op: gt, value: 0 }
"#;
    let ir = Compiler::new().compile("t", spec).unwrap();
    let result = Engine::new()
        .execute(&ir, &batch(json!([{"price": 10}, {"price": -5}])))
        .unwrap();

    assert_eq!(result.status, RunStatus::CompletedWithViolations);
    assert_eq!(result.violation_count(), 1);
    assert!(result.reports[0].outcomes.is_empty());
    assert_eq!(result.reports[1].outcomes.len(), 1);
    assert_eq!(result.reports[1].outcomes[0].rule_id, "price-positive");
    assert_eq!(result.reports[1].outcomes[0].kind, OutcomeKind::Violation);
    assert!(result.corrections.is_empty());
}

// ── Scenario B: one transform rule truncating a title ───────────────────

#[test]
fn transform_rule_truncates_and_logs_a_correction() {
    let spec = r#"
schema_version: 1
metadata: { marketplace: demo, version: "1.0.0" }
mapping:
  - output: title
rules:
  - id: title-max-5
    target: title
    action: transform
    strategy: { kind: truncate, max_len: 5 }
"#;
    let ir = Compiler::new().compile("t", spec).unwrap();
    let result = Engine::new()
        .execute(&ir, &batch(json!([{"title": "Hello World"}])))
        .unwrap();

    assert_eq!(result.records[0]["title"], json!("Hello"));
    assert_eq!(result.corrections.len(), 1);
    let correction = &result.corrections[0];
    assert_eq!(correction.rule_id, "title-max-5");
    assert_eq!(correction.field, "title");
    assert_eq!(correction.original, json!("Hello World"));
    assert_eq!(correction.corrected, json!("Hello"));
    assert_eq!(correction.strategy, "truncate");
}

// ── Scenario C: formatting-only variants share a checksum ───────────────

#[test]
fn yaml_formatting_does_not_change_the_checksum() {
    let compact = r#"
schema_version: 1
metadata: { marketplace: demo, version: "1.0.0" }
mapping:
  - { output: price, source: raw_price }
rules:
  - { id: r1, target: price, action: assert, condition: { field: price, op: gt, value: 0 } }
"#;
    let sprawling = r#"
schema_version:   1

metadata:
  version: "1.0.0"
  marketplace: demo

mapping:
  - source: raw_price
    output: price

rules:
  - id: r1
    action: assert
    target: price
    condition:
      value: 0
      op: gt
      field: price
"#;
    let compiler = Compiler::new();
    let a = compiler.compile("t", compact).unwrap();
    let b = compiler.compile("t", sprawling).unwrap();
    assert_eq!(a.checksum, b.checksum);
}

// ── Scenario D: undeclared field fails compilation with location ────────

#[test]
fn undeclared_condition_field_names_rule_and_path() {
    let spec = r#"
schema_version: 1
metadata: { marketplace: demo, version: "1.0.0" }
mapping:
  - output: price
rules:
  - id: weight-check
    target: price
    action: assert
    condition: { field: shipping.weight, op: gt, value: 0 }
"#;
    match Compiler::new().compile("t", spec) {
        Err(CompileError::FieldNotFound { rule_id, field }) => {
            assert_eq!(rule_id, "weight-check");
            assert_eq!(field, "shipping.weight");
        }
        other => panic!("expected FieldNotFound, got {:?}", other.map(|ir| ir.checksum)),
    }
}

// ── Precedence: outcomes on a shared field follow ascending precedence ──

#[test]
fn evaluation_trace_orders_by_precedence() {
    let spec = r#"
schema_version: 1
metadata: { marketplace: demo, version: "1.0.0" }
mapping:
  - output: sku
rules:
  - id: second
    target: sku
    action: assert
    precedence: 20
    condition: { field: sku, op: len_range, min: 10 }
  - id: first
    target: sku
    action: assert
    precedence: 10
    condition: { field: sku, op: matches, pattern: "^[A-Z]" }
"#;
    let ir = Compiler::new().compile("t", spec).unwrap();
    let result = Engine::new()
        .execute(&ir, &batch(json!([{"sku": "abc"}])))
        .unwrap();

    // Both rules fail; the lower-precedence rule's outcome comes first.
    let ids: Vec<&str> = result.reports[0]
        .outcomes
        .iter()
        .map(|o| o.rule_id.as_str())
        .collect();
    assert_eq!(ids, vec!["first", "second"]);
}

// ── Suggestions ─────────────────────────────────────────────────────────

#[test]
fn suggest_rule_emits_candidates_with_confidence() {
    let spec = r#"
schema_version: 1
metadata: { marketplace: demo, version: "1.0.0" }
mapping:
  - output: category
rules:
  - id: category-known
    target: category
    action: suggest
    severity: info
    condition:
      not: { field: category, op: in_set, values: [shoes, apparel] }
    candidates:
      - { value: shoes, confidence: 0.8 }
      - { value: apparel, confidence: 0.6 }
"#;
    let ir = Compiler::new().compile("t", spec).unwrap();
    let result = Engine::new()
        .execute(
            &ir,
            &batch(json!([{"category": "shoez"}, {"category": "shoes"}])),
        )
        .unwrap();

    assert_eq!(result.suggestions.len(), 1);
    let suggestion = &result.suggestions[0];
    assert_eq!(suggestion.record_index, 0);
    assert_eq!(suggestion.current, Some(json!("shoez")));
    assert_eq!(suggestion.candidates.len(), 2);
    assert_eq!(suggestion.candidates[0].confidence, 0.8);
}

// ── Missing-field semantics at runtime ──────────────────────────────────

#[test]
fn missing_target_errors_assert_and_skips_transform() {
    let spec = r#"
schema_version: 1
metadata: { marketplace: demo, version: "1.0.0" }
mapping:
  - output: price
  - output: title
rules:
  - id: price-check
    target: price
    action: assert
    condition: { field: price, op: gt, value: 0 }
  - id: title-trim
    target: title
    action: transform
    strategy: { kind: trim }
"#;
    let ir = Compiler::new().compile("t", spec).unwrap();
    // Record has neither price nor title.
    let result = Engine::new().execute(&ir, &batch(json!([{"sku": "X"}]))).unwrap();

    let outcomes = &result.reports[0].outcomes;
    assert_eq!(outcomes.len(), 1, "transform on missing field must be silent");
    assert_eq!(outcomes[0].rule_id, "price-check");
    assert_eq!(outcomes[0].kind, OutcomeKind::MissingField);
    assert!(result.corrections.is_empty());
}

// ── Events: cache hit/miss through the reload manager ───────────────────

struct CountingSink {
    events: Mutex<Vec<&'static str>>,
}

impl EventSink for CountingSink {
    fn emit(&self, event: &EngineEvent) {
        let label = match event {
            EngineEvent::CompilationStarted { .. } => "compilation_started",
            EngineEvent::CompilationCompleted { .. } => "compilation_completed",
            EngineEvent::CompilationFailed { .. } => "compilation_failed",
            EngineEvent::ExecutionStarted { .. } => "execution_started",
            EngineEvent::ExecutionCompleted { .. } => "execution_completed",
            EngineEvent::ExecutionFailed { .. } => "execution_failed",
            EngineEvent::RuleMeasured { .. } => "rule_measured",
            EngineEvent::CacheHit { .. } => "cache_hit",
            EngineEvent::CacheMiss { .. } => "cache_miss",
            EngineEvent::VersionDeployed { .. } => "version_deployed",
            EngineEvent::VersionRolledBack { .. } => "version_rolled_back",
        };
        self.events.lock().unwrap().push(label);
    }
}

#[test]
fn reload_manager_emits_miss_then_hit() {
    let spec = r#"
schema_version: 1
metadata: { marketplace: demo, version: "1.0.0" }
mapping:
  - output: price
rules:
  - id: r1
    target: price
    action: assert
    condition: { field: price, op: gt, value: 0 }
"#;
    let sink = Arc::new(CountingSink {
        events: Mutex::new(Vec::new()),
    });
    let manager = ReloadManager::new(Compiler::new()).with_sink(sink.clone());
    let identity = SpecIdentity::new("tenant-1", "catalog", "1.0.0");

    let ir = manager.get_or_compile(&identity, spec).unwrap();
    manager.get_or_compile(&identity, spec).unwrap();

    let events = sink.events.lock().unwrap().clone();
    assert!(events.contains(&"cache_miss"));
    assert!(events.contains(&"version_deployed"));
    assert!(events.contains(&"cache_hit"));

    // The cached artifact executes like any other.
    let result = Engine::new()
        .execute(&ir, &batch(json!([{"price": 1}])))
        .unwrap();
    assert_eq!(result.status, RunStatus::Clean);
}

// ── Determinism of the full pipeline ────────────────────────────────────

#[test]
fn compile_execute_twice_is_identical() {
    let spec = r#"
schema_version: 1
metadata: { marketplace: demo, version: "1.0.0" }
mapping:
  - output: price
    source: raw_price
    transform: parse_number
  - output: title
    transform: trim
rules:
  - id: price-range
    target: price
    action: assert
    condition: { field: price, op: in_range, min: 0, max: 10000 }
  - id: title-upper
    target: title
    action: transform
    strategy: { kind: uppercase }
"#;
    let records = batch(json!([
        {"raw_price": "12.5", "title": " widget "},
        {"raw_price": "-3", "title": "gadget"},
        {"raw_price": "oops", "title": "doohickey"}
    ]));

    let compiler = Compiler::new();
    let engine = Engine::new();
    let ir_a = compiler.compile("t", spec).unwrap();
    let ir_b = compiler.compile("t", spec).unwrap();
    assert_eq!(ir_a.checksum, ir_b.checksum);

    let a = engine.execute(&ir_a, &records).unwrap();
    let b = engine.execute(&ir_b, &records).unwrap();
    assert_eq!(a.records, b.records);
    assert_eq!(a.reports, b.reports);
    assert_eq!(a.corrections, b.corrections);
    assert_eq!(a.suggestions, b.suggestions);
    assert_eq!(a.status, b.status);

    // Spot-check the semantics: bad price range flagged, missing price on
    // the unparsable record, titles uppercased.
    assert_eq!(a.records[0]["title"], json!("WIDGET"));
    assert_eq!(a.reports[1].outcomes[0].rule_id, "price-range");
    assert_eq!(a.violation_count(), 2);
}
