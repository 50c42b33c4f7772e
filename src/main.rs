use anyhow::Context;
use clap::{Parser, Subcommand};

use rulec::{classify, Compiler, Engine, EnginePolicy, Record, SemVer};

pub type Result<T> = anyhow::Result<T>;

#[derive(Parser)]
#[command(name = "rulec")]
#[command(about = "Catalog rule engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a specification into a checksum-identified IR artifact.
    Compile {
        #[arg(long)]
        spec: String,

        #[arg(short = 'o', long)]
        out: String,

        #[arg(long, default_value = "local")]
        tenant: String,
    },

    /// Compile a specification and execute it over a records file.
    Run {
        #[arg(long)]
        spec: String,

        /// JSON array of record objects.
        #[arg(long)]
        records: String,

        #[arg(short = 'o', long)]
        out: String,

        #[arg(long, default_value = "local")]
        tenant: String,

        #[arg(long)]
        workers: Option<usize>,

        /// Overall time budget in milliseconds.
        #[arg(long)]
        budget_ms: Option<u64>,

        /// Force single-threaded execution.
        #[arg(long)]
        serial: bool,
    },

    /// Classify the compatibility of a new specification version.
    Check {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        #[arg(long, default_value = "local")]
        tenant: String,

        /// Accept a major-version change.
        #[arg(long)]
        opt_in: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Compile { spec, out, tenant } => {
            // 1) Compile (parses, validates, plans, checksums).
            let text = std::fs::read_to_string(&spec)
                .with_context(|| format!("read spec file {}", spec))?;
            let ir = Compiler::new().compile(&tenant, &text)?;

            // 2) Persist the deterministic artifact.
            std::fs::write(&out, serde_json::to_string_pretty(&ir)?)?;
            println!("Wrote {} (checksum {})", out, ir.checksum);
        }

        Commands::Run {
            spec,
            records,
            out,
            tenant,
            workers,
            budget_ms,
            serial,
        } => {
            // 1) Compile the spec.
            let text = std::fs::read_to_string(&spec)
                .with_context(|| format!("read spec file {}", spec))?;
            let ir = Compiler::new().compile(&tenant, &text)?;

            // 2) Load the record batch.
            let batch: Vec<Record> = serde_json::from_str(
                &std::fs::read_to_string(&records)
                    .with_context(|| format!("read records file {}", records))?,
            )
            .with_context(|| format!("records file {} must be a JSON array of objects", records))?;

            // 3) Execute with CLI policy overrides.
            let mut policy = EnginePolicy::default();
            if let Some(workers) = workers {
                policy.workers = workers.max(1);
            }
            if let Some(ms) = budget_ms {
                policy.time_budget = Some(std::time::Duration::from_millis(ms));
            }
            if serial {
                policy.parallel = false;
            }
            let result = Engine::with_policy(policy).execute(&ir, &batch)?;

            // 4) Persist the result and summarize.
            std::fs::write(&out, serde_json::to_string_pretty(&result)?)?;
            println!(
                "Wrote {}: {:?}, {} records, {} violations, {} corrections, {} suggestions in {} us",
                out,
                result.status,
                result.stats.records_in,
                result.violation_count(),
                result.corrections.len(),
                result.suggestions.len(),
                result.stats.duration_micros
            );
        }

        Commands::Check {
            from,
            to,
            tenant,
            opt_in,
        } => {
            // 1) Compile both versions.
            let compiler = Compiler::new();
            let from_ir = compiler.compile(
                &tenant,
                &std::fs::read_to_string(&from)
                    .with_context(|| format!("read spec file {}", from))?,
            )?;
            let to_ir = compiler.compile(
                &tenant,
                &std::fs::read_to_string(&to).with_context(|| format!("read spec file {}", to))?,
            )?;

            // 2) Classify using declared versions + defensive IR diff.
            let from_version =
                SemVer::parse(&from_ir.metadata.version).map_err(anyhow::Error::msg)?;
            let to_version = SemVer::parse(&to_ir.metadata.version).map_err(anyhow::Error::msg)?;
            let decision = classify(from_version, to_version, &from_ir, &to_ir);
            println!("{}", serde_json::to_string_pretty(&decision)?);

            // 3) Major without opt-in exits non-zero.
            decision.ensure_applicable(opt_in)?;
        }
    }

    Ok(())
}
