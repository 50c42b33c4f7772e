//! Chunked execution: fan-out across workers, fan-in by chunk index.
//!
//! Records partition into fixed-size chunks. Workers claim chunks through
//! an atomic counter (work-stealing); each worker owns its own output
//! buffers, so there are no concurrent writes to shared state. The caller
//! merges outputs by chunk index, which restores input order regardless of
//! the parallelism degree. A worker that sees the deadline passed stops
//! claiming chunks; already-claimed chunks always finish.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crate::compile::{CompiledIR, GroupKind};
use crate::engine::access::Record;
use crate::engine::eval::EvalCache;
use crate::engine::groups::{ChunkState, RuleGroupExecutor, ScalarGroup, VectorizedGroup};
use crate::engine::mapping::apply_mapping;
use crate::engine::result::{Correction, RecordReport, RuleCost, Suggestion};
use crate::engine::EnginePolicy;

/// Everything one chunk produced. `chunk_index` drives the ordered merge.
pub struct ChunkOutput {
    pub chunk_index: usize,
    pub records: Vec<Record>,
    pub reports: Vec<RecordReport>,
    pub corrections: Vec<Correction>,
    pub suggestions: Vec<Suggestion>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rule_cost: Vec<RuleCost>,
}

/// Run the mapping phase and every planned rule group over one chunk.
pub fn process_chunk(
    ir: &CompiledIR,
    policy: &EnginePolicy,
    chunk: &[Record],
    offset: usize,
    chunk_index: usize,
) -> ChunkOutput {
    // Mapping phase first, in dependency order.
    let mut records = Vec::with_capacity(chunk.len());
    let mut reports = Vec::with_capacity(chunk.len());
    for (i, input) in chunk.iter().enumerate() {
        let (working, outcomes) = apply_mapping(ir, input);
        records.push(working);
        reports.push(RecordReport {
            record_index: offset + i,
            processed: true,
            outcomes,
        });
    }

    let mut state = ChunkState {
        ir,
        policy,
        offset,
        records,
        reports,
        halted: vec![false; chunk.len()],
        corrections: Vec::new(),
        suggestions: Vec::new(),
        cache: EvalCache::new(),
        rule_cost: vec![RuleCost::default(); ir.rules.len()],
    };

    // Rule phases in plan order.
    for phase in &ir.plan.phases {
        for group in &phase.groups {
            match group.kind {
                GroupKind::Vectorized => VectorizedGroup.run(&group.rules, &mut state),
                GroupKind::Scalar => ScalarGroup.run(&group.rules, &mut state),
            }
        }
    }

    ChunkOutput {
        chunk_index,
        records: state.records,
        reports: state.reports,
        corrections: state.corrections,
        suggestions: state.suggestions,
        cache_hits: state.cache.hits,
        cache_misses: state.cache.misses,
        rule_cost: state.rule_cost,
    }
}

/// Process all chunks, serially or with a bounded worker pool.
///
/// Outputs come back unordered; callers merge by `chunk_index`. A missing
/// index means the deadline expired before that chunk was scheduled.
pub fn run_chunks(
    ir: &CompiledIR,
    policy: &EnginePolicy,
    records: &[Record],
    deadline: Option<Instant>,
) -> Vec<ChunkOutput> {
    let chunk_size = policy.chunk_size.max(1);
    let chunks: Vec<&[Record]> = records.chunks(chunk_size).collect();

    let workers = if policy.parallel && records.len() >= policy.parallel_threshold {
        policy.workers.max(1).min(chunks.len().max(1))
    } else {
        1
    };

    if workers <= 1 {
        let mut outputs = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
                break;
            }
            outputs.push(process_chunk(ir, policy, chunk, i * chunk_size, i));
        }
        return outputs;
    }

    let next_chunk = AtomicUsize::new(0);
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let chunks = &chunks;
                let next_chunk = &next_chunk;

                s.spawn(move || {
                    let mut outputs = Vec::new();
                    // Work-stealing loop: claim chunks until none remain or
                    // the deadline passes.
                    loop {
                        if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
                            break;
                        }
                        let i = next_chunk.fetch_add(1, Ordering::Relaxed);
                        if i >= chunks.len() {
                            break;
                        }
                        outputs.push(process_chunk(ir, policy, chunks[i], i * chunk_size, i));
                    }
                    outputs
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| match h.join() {
                Ok(outputs) => outputs,
                Err(e) => std::panic::resume_unwind(e),
            })
            .collect()
    })
}
