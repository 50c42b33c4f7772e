//! Error taxonomy for compilation and execution.
//!
//! Compilation errors surface synchronously with the rule id / field path
//! that caused them; compilation never produces a partial artifact. Runtime
//! errors are split in two: per-record failures are recorded as outcomes in
//! the result (see `engine::result`) and never cross record boundaries,
//! while systemic failures abort the run as [`ExecuteError::RuntimeFatal`].

use thiserror::Error;

/// Errors raised while turning specification text into a `CompiledIR`.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Malformed or contract-violating specification text.
    #[error("schema error: {message}")]
    Schema { message: String },

    /// `schema_version` names a contract this compiler does not speak.
    #[error("unsupported schema_version {found} (supported: {supported})")]
    UnsupportedSchemaVersion { found: u32, supported: u32 },

    /// Two rules share an id within one specification.
    #[error("duplicate rule id '{rule_id}'")]
    DuplicateRule { rule_id: String },

    /// A rule references a field the mapping does not declare.
    #[error("rule '{rule_id}' references undeclared field '{field}'")]
    FieldNotFound { rule_id: String, field: String },

    /// Mapping outputs depend on each other in a cycle.
    #[error("circular mapping dependency: {cycle}")]
    CircularDependency { cycle: String },

    /// A regex pattern exceeded the compile-time complexity budget.
    #[error("rule '{rule_id}': regex rejected by complexity budget: {pattern}")]
    RegexBudget { rule_id: String, pattern: String },
}

impl CompileError {
    /// Shorthand used throughout validation, mirroring `bail!` call sites.
    pub fn schema(message: impl Into<String>) -> Self {
        CompileError::Schema {
            message: message.into(),
        }
    }
}

/// Errors that abort an execution or block a version deployment.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// Systemic failure (corrupted IR, broken plan). Aborts the whole run;
    /// per-record failures never take this path.
    #[error("runtime fatal: {message}")]
    RuntimeFatal { message: String },

    /// A major-version change was attempted without explicit opt-in.
    #[error("compatibility rejected: {from} -> {to} is a major change and requires opt-in")]
    CompatibilityRejected { from: String, to: String },
}
