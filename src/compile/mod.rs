//! Compiler: specification text -> checksum-identified `CompiledIR`.
//!
//! Compilation is a pure pipeline with no side effects beyond the returned
//! artifact and emitted events: parse -> validate -> dependency graph ->
//! execution plan -> checksum -> IR. It either returns a classified
//! `CompileError` or a complete artifact, never a partial one.

pub mod checksum;
pub mod graph;
pub mod ir;
pub mod plan;

pub use checksum::{checksum_of, Checksum, COMPILER_VERSION};
pub use graph::{build_field_graph, FieldGraph};
pub use ir::{CompiledIR, CompiledMapping, CompiledRule};
pub use plan::{build_plan, is_vectorizable, ExecutionPlan, GroupKind, RuleGroup, RulePhase};

use std::sync::Arc;

use crate::error::CompileError;
use crate::events::{default_sink, EngineEvent, EventSink, RulesetIdentity};
use crate::spec::condition::DEFAULT_REGEX_SIZE_LIMIT;
use crate::spec::raw::SUPPORTED_SCHEMA_VERSION;
use crate::spec::{parse_spec, RawSpec};

#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Compile-time regex complexity budget (`RegexBuilder::size_limit`).
    pub regex_size_limit: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            regex_size_limit: DEFAULT_REGEX_SIZE_LIMIT,
        }
    }
}

pub struct Compiler {
    options: CompilerOptions,
    sink: Arc<dyn EventSink>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            options: CompilerOptions::default(),
            sink: default_sink(),
        }
    }

    pub fn with_options(options: CompilerOptions) -> Self {
        Self {
            options,
            sink: default_sink(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Compile specification text for the given tenant partition key.
    pub fn compile(&self, tenant: &str, text: &str) -> Result<CompiledIR, CompileError> {
        // 1) Parse (schema_version contract included).
        let raw = parse_spec(text)?;
        let identity = RulesetIdentity::new(
            tenant,
            raw.metadata.marketplace.clone(),
            raw.metadata.version.clone(),
        );
        self.sink.emit(&EngineEvent::CompilationStarted {
            identity: identity.clone(),
        });

        match self.build(&raw) {
            Ok(ir) => {
                self.sink.emit(&EngineEvent::CompilationCompleted {
                    identity,
                    checksum: ir.checksum,
                    rules: ir.rules.len(),
                });
                Ok(ir)
            }
            Err(err) => {
                self.sink.emit(&EngineEvent::CompilationFailed {
                    identity,
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Identity of `text` under this compiler, without building the IR.
    /// Used by the hot-reload manager to detect source drift cheaply.
    pub fn checksum_of_text(&self, text: &str) -> Result<Checksum, CompileError> {
        Ok(checksum_of(&parse_spec(text)?))
    }

    fn build(&self, raw: &RawSpec) -> Result<CompiledIR, CompileError> {
        // 2) Semantic validation.
        let spec = raw.validate_and_build(self.options.regex_size_limit)?;

        // 3) Field-dependency graph over mapping outputs.
        let field_graph = build_field_graph(&spec.mapping)?;

        // 4) Execution plan.
        let exec_plan = build_plan(&spec.rules);

        // 5) Checksum over the canonical spec + compiler version.
        let sum = checksum_of(raw);

        // 6) Assemble the immutable artifact.
        let mapping: Vec<CompiledMapping> = spec
            .mapping
            .into_iter()
            .zip(field_graph.depends_on.iter())
            .map(|(field, &depends_on)| CompiledMapping { field, depends_on })
            .collect();

        let rules: Vec<CompiledRule> = spec
            .rules
            .into_iter()
            .map(|def| {
                let vectorizable = is_vectorizable(&def);
                CompiledRule::from_def(def, vectorizable)
            })
            .collect();

        Ok(CompiledIR {
            schema_version: SUPPORTED_SCHEMA_VERSION,
            checksum: sum,
            compiler_version: COMPILER_VERSION.to_string(),
            compiled_at: unix_now(),
            metadata: spec.metadata,
            mapping,
            mapping_order: field_graph.order,
            dependency_edges: field_graph.edges,
            rules,
            plan: exec_plan,
            performance: spec.performance,
        })
    }
}

fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
