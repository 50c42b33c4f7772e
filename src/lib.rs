//! # rulec
//!
//! Catalog rule engine: compiles declarative rule specifications (field
//! mappings + validation/correction/suggestion rules) into a
//! checksum-addressed immutable IR, then executes that IR against record
//! batches with chunked parallelism, hot-reload caching, and semantic
//! version compatibility checks.
//!
//! The crate is the engine core only: it consumes specification text plus a
//! tenant/version identity and produces typed results and events. Storage,
//! HTTP surfaces, job orchestration, and authentication are external
//! collaborators.

pub mod compat;
pub mod compile;
pub mod engine;
pub mod error;
pub mod events;
pub mod reload;
pub mod spec;

pub use compat::{classify, shadow_compare, ApplyDisposition, CompatibilityDecision, SemVer, VersionDelta};
pub use compile::{Checksum, CompiledIR, Compiler, CompilerOptions};
pub use engine::{Engine, EnginePolicy, ExecutionResult, FailFastMode, Record, RunStatus};
pub use error::{CompileError, ExecuteError};
pub use events::{EngineEvent, EventSink, RulesetIdentity};
pub use reload::{IrCache, ReloadManager, SpecIdentity};
