//! Runtime engine: `CompiledIR` + record batch -> `ExecutionResult`.
//!
//! The IR is read-only and shared by all concurrent executions. Each call
//! gets its own chunk states and condition caches; the only cross-call
//! mutable resource in the system is the checksum-keyed IR cache (see
//! `reload`).

pub mod access;
pub mod eval;
pub mod exec;
pub mod groups;
pub mod mapping;
pub mod result;

pub use access::{access, set_at, Record};
pub use eval::{EvalCache, EvalError, EvalStats};
pub use groups::{RuleGroupExecutor, ScalarGroup, VectorizedGroup};
pub use result::{
    Correction, ExecutionResult, ExecutionStats, Outcome, OutcomeKind, RecordReport, RuleCost,
    RunStatus, Suggestion,
};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::compile::CompiledIR;
use crate::error::ExecuteError;
use crate::events::{default_sink, EngineEvent, EventSink};
use crate::spec::PerfHints;

/// What a failing error-severity assert does to the rest of the record's
/// evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailFastMode {
    /// Always collect every violation.
    CollectAll,
    /// Only rules tagged "critical" halt the record. Default.
    CriticalTag,
    /// Any failing error-severity assert halts the record.
    FirstError,
}

/// Engine tuning knobs. Spec-level `performance` hints override the
/// matching fields per execution.
#[derive(Debug, Clone)]
pub struct EnginePolicy {
    pub workers: usize,
    pub parallel: bool,
    /// Minimum batch size before the worker pool kicks in.
    pub parallel_threshold: usize,
    pub chunk_size: usize,
    pub fail_fast: FailFastMode,
    /// Per-call regex evaluation ceiling.
    pub regex_time_ceiling: Duration,
    /// Overall budget; exceeded -> result marked partial.
    pub time_budget: Option<Duration>,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(8);
        Self {
            workers,
            parallel: true,
            parallel_threshold: 1_000,
            chunk_size: 512,
            fail_fast: FailFastMode::CriticalTag,
            regex_time_ceiling: Duration::from_millis(10),
            time_budget: None,
        }
    }
}

impl EnginePolicy {
    /// Apply spec-level performance hints on top of this policy.
    pub fn with_hints(&self, hints: &PerfHints) -> Self {
        let mut policy = self.clone();
        if let Some(batch_size) = hints.batch_size {
            policy.chunk_size = batch_size.max(1);
        }
        if let Some(timeout_ms) = hints.timeout_ms {
            policy.time_budget = Some(Duration::from_millis(timeout_ms));
        }
        if let Some(parallel) = hints.parallel {
            policy.parallel = parallel;
        }
        policy
    }
}

pub struct Engine {
    policy: EnginePolicy,
    sink: Arc<dyn EventSink>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            policy: EnginePolicy::default(),
            sink: default_sink(),
        }
    }

    pub fn with_policy(policy: EnginePolicy) -> Self {
        Self {
            policy,
            sink: default_sink(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Execute a compiled artifact against a record batch.
    ///
    /// Per-record failures land in the result; only systemic failures
    /// (corrupted IR) return `ExecuteError::RuntimeFatal`.
    pub fn execute(
        &self,
        ir: &CompiledIR,
        records: &[Record],
    ) -> Result<ExecutionResult, ExecuteError> {
        if let Err(message) = ir.check_integrity() {
            self.sink.emit(&EngineEvent::ExecutionFailed {
                checksum: ir.checksum,
                message: message.clone(),
            });
            return Err(ExecuteError::RuntimeFatal { message });
        }

        self.sink.emit(&EngineEvent::ExecutionStarted {
            checksum: ir.checksum,
            records: records.len(),
        });

        let policy = self.policy.with_hints(&ir.performance);
        let start = Instant::now();
        let deadline = policy.time_budget.map(|budget| start + budget);

        let outputs = exec::run_chunks(ir, &policy, records, deadline);

        // Fan-in: merge chunk outputs by index; gaps are unscheduled chunks.
        let chunk_size = policy.chunk_size.max(1);
        let chunk_count = records.len().div_ceil(chunk_size);
        let mut by_index: BTreeMap<usize, exec::ChunkOutput> = outputs
            .into_iter()
            .map(|out| (out.chunk_index, out))
            .collect();

        let mut out_records = Vec::with_capacity(records.len());
        let mut reports = Vec::with_capacity(records.len());
        let mut corrections = Vec::new();
        let mut suggestions = Vec::new();
        let mut cache_hits = 0u64;
        let mut cache_misses = 0u64;
        let mut rule_cost = vec![RuleCost::default(); ir.rules.len()];
        let mut unprocessed = 0usize;

        for i in 0..chunk_count {
            let chunk_start = i * chunk_size;
            let chunk_end = (chunk_start + chunk_size).min(records.len());
            match by_index.remove(&i) {
                Some(out) => {
                    out_records.extend(out.records);
                    reports.extend(out.reports);
                    corrections.extend(out.corrections);
                    suggestions.extend(out.suggestions);
                    cache_hits += out.cache_hits;
                    cache_misses += out.cache_misses;
                    for (total, cost) in rule_cost.iter_mut().zip(out.rule_cost) {
                        total.evaluations += cost.evaluations;
                        total.micros += cost.micros;
                    }
                }
                None => {
                    // Never scheduled: pass records through untouched.
                    for (j, record) in records[chunk_start..chunk_end].iter().enumerate() {
                        out_records.push(record.clone());
                        reports.push(RecordReport {
                            record_index: chunk_start + j,
                            processed: false,
                            outcomes: Vec::new(),
                        });
                    }
                    unprocessed += chunk_end - chunk_start;
                }
            }
        }

        let duration = start.elapsed();
        let duration_micros = duration.as_micros() as u64;
        let processed = records.len() - unprocessed;

        let per_rule: BTreeMap<String, RuleCost> = ir
            .rules
            .iter()
            .zip(rule_cost.iter())
            .filter(|(_, cost)| cost.evaluations > 0)
            .map(|(rule, cost)| (rule.id.clone(), *cost))
            .collect();
        for (rule_id, cost) in &per_rule {
            self.sink.emit(&EngineEvent::RuleMeasured {
                checksum: ir.checksum,
                rule_id: rule_id.clone(),
                evaluations: cost.evaluations,
                micros: cost.micros,
            });
        }

        let lookups = cache_hits + cache_misses;
        let stats = ExecutionStats {
            records_in: records.len(),
            records_processed: processed,
            duration_micros,
            throughput_rps: if duration_micros == 0 {
                processed as f64
            } else {
                processed as f64 / (duration_micros as f64 / 1_000_000.0)
            },
            cache_hits,
            cache_misses,
            cache_hit_ratio: if lookups == 0 {
                0.0
            } else {
                cache_hits as f64 / lookups as f64
            },
            per_rule,
        };

        let mut execution_result = ExecutionResult {
            status: RunStatus::Clean,
            records: out_records,
            reports,
            corrections,
            suggestions,
            stats,
        };
        let violations = execution_result.violation_count();
        execution_result.status = if unprocessed > 0 {
            RunStatus::Partial { unprocessed }
        } else if violations > 0 {
            RunStatus::CompletedWithViolations
        } else {
            RunStatus::Clean
        };

        self.sink.emit(&EngineEvent::ExecutionCompleted {
            checksum: ir.checksum,
            records: records.len(),
            violations,
            duration_micros,
        });

        Ok(execution_result)
    }
}
