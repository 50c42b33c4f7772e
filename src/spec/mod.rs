//! Spec layer: wire schemas + validated in-memory structures.
//!
//! This module is intentionally separate from compilation and execution.
//! It owns:
//! - FieldPath type (dotted paths with [*] wildcard)
//! - Condition trees (closed predicate set, pre-compiled regex)
//! - Raw serde shapes and their validation

pub mod condition;
pub mod path;
pub mod raw;
pub mod validate;

pub use condition::{CmpOp, CompiledRegex, ConditionExpr, Predicate, PredicateTest, ValueType};
pub use path::{FieldPath, Segment};
pub use raw::{parse_spec, ActionKind, MapTransform, RawSpec, ScopeKind, Severity};
pub use validate::{
    Candidate, MappingField, Metadata, PerfHints, RuleDef, Scope, TransformStrategy, ValidatedSpec,
};
