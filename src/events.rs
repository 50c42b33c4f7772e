//! Engine events for external telemetry collaborators.
//!
//! The core never talks to a telemetry backend directly. Everything
//! observable goes through an injected [`EventSink`]; the default sink
//! forwards to `tracing` and callers that want metrics plug in their own.
//! Every event carries the ruleset identity (marketplace + version) and an
//! opaque tenant partition key — no authorization happens here.

use std::sync::Arc;

use crate::compile::Checksum;

/// Identity attached to every emitted event.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RulesetIdentity {
    /// Opaque tenant partition key, passed through unexamined.
    pub tenant: String,
    pub marketplace: String,
    pub version: String,
}

impl RulesetIdentity {
    pub fn new(
        tenant: impl Into<String>,
        marketplace: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            marketplace: marketplace.into(),
            version: version.into(),
        }
    }
}

/// Everything the core reports to the outside world.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    CompilationStarted {
        identity: RulesetIdentity,
    },
    CompilationCompleted {
        identity: RulesetIdentity,
        checksum: Checksum,
        rules: usize,
    },
    CompilationFailed {
        identity: RulesetIdentity,
        message: String,
    },
    ExecutionStarted {
        checksum: Checksum,
        records: usize,
    },
    ExecutionCompleted {
        checksum: Checksum,
        records: usize,
        violations: usize,
        duration_micros: u64,
    },
    ExecutionFailed {
        checksum: Checksum,
        message: String,
    },
    /// Per-rule cost measurement, emitted once per execution per rule.
    RuleMeasured {
        checksum: Checksum,
        rule_id: String,
        evaluations: u64,
        micros: u64,
    },
    CacheHit {
        checksum: Checksum,
    },
    CacheMiss {
        identity: RulesetIdentity,
    },
    VersionDeployed {
        identity: RulesetIdentity,
        checksum: Checksum,
    },
    VersionRolledBack {
        identity: RulesetIdentity,
        checksum: Checksum,
    },
}

/// Observer seam for emitted events. Implementations must be cheap and
/// must not block the engine.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EngineEvent);
}

/// Default sink: structured logging via `tracing`.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::CompilationStarted { identity } => {
                tracing::debug!(tenant = %identity.tenant, marketplace = %identity.marketplace, version = %identity.version, "compilation started");
            }
            EngineEvent::CompilationCompleted {
                identity,
                checksum,
                rules,
            } => {
                tracing::info!(tenant = %identity.tenant, version = %identity.version, %checksum, rules, "compilation completed");
            }
            EngineEvent::CompilationFailed { identity, message } => {
                tracing::warn!(tenant = %identity.tenant, version = %identity.version, %message, "compilation failed");
            }
            EngineEvent::ExecutionStarted { checksum, records } => {
                tracing::debug!(%checksum, records, "execution started");
            }
            EngineEvent::ExecutionCompleted {
                checksum,
                records,
                violations,
                duration_micros,
            } => {
                tracing::info!(%checksum, records, violations, duration_micros, "execution completed");
            }
            EngineEvent::ExecutionFailed { checksum, message } => {
                tracing::warn!(%checksum, %message, "execution failed");
            }
            EngineEvent::RuleMeasured {
                checksum,
                rule_id,
                evaluations,
                micros,
            } => {
                tracing::trace!(%checksum, %rule_id, evaluations, micros, "rule measured");
            }
            EngineEvent::CacheHit { checksum } => {
                tracing::trace!(%checksum, "ir cache hit");
            }
            EngineEvent::CacheMiss { identity } => {
                tracing::debug!(tenant = %identity.tenant, version = %identity.version, "ir cache miss");
            }
            EngineEvent::VersionDeployed { identity, checksum } => {
                tracing::info!(tenant = %identity.tenant, version = %identity.version, %checksum, "version deployed");
            }
            EngineEvent::VersionRolledBack { identity, checksum } => {
                tracing::warn!(tenant = %identity.tenant, version = %identity.version, %checksum, "version rolled back");
            }
        }
    }
}

/// Sink that drops everything. Useful where events are irrelevant.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &EngineEvent) {}
}

pub fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(TracingSink)
}
