//! Execution output: per-record outcomes, corrections, suggestions, stats.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::engine::access::Record;
use crate::spec::{Candidate, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// An assert condition did not hold.
    Violation,
    /// A rule's target field could not be resolved on the record.
    MissingField,
    /// The condition itself failed to evaluate (e.g. regex ceiling).
    EvaluationError,
    /// A required mapping source was missing or untransformable.
    MappingFailure,
}

/// One rule outcome on one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub rule_id: String,
    pub field: String,
    pub severity: Severity,
    pub kind: OutcomeKind,
    pub message: String,
}

/// Everything that happened to one record, in evaluation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordReport {
    pub record_index: usize,
    /// False when the time budget expired before this record's chunk ran.
    pub processed: bool,
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    pub record_index: usize,
    pub rule_id: String,
    pub field: String,
    pub strategy: String,
    pub original: Value,
    pub corrected: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub record_index: usize,
    pub rule_id: String,
    pub field: String,
    pub current: Option<Value>,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleCost {
    pub evaluations: u64,
    pub micros: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStats {
    pub records_in: usize,
    pub records_processed: usize,
    pub duration_micros: u64,
    /// Records per second over the processed portion.
    pub throughput_rps: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_ratio: f64,
    pub per_rule: BTreeMap<String, RuleCost>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Clean,
    CompletedWithViolations,
    /// Time budget expired; the count is records never scheduled.
    Partial { unprocessed: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub status: RunStatus,
    /// Output records in input order. Unprocessed records (partial runs)
    /// pass through unchanged.
    pub records: Vec<Record>,
    pub reports: Vec<RecordReport>,
    pub corrections: Vec<Correction>,
    pub suggestions: Vec<Suggestion>,
    pub stats: ExecutionStats,
}

impl ExecutionResult {
    /// Error-severity outcomes across all records.
    pub fn violation_count(&self) -> usize {
        self.reports
            .iter()
            .flat_map(|r| &r.outcomes)
            .filter(|o| o.severity == Severity::Error)
            .count()
    }
}
