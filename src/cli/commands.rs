//! CLI command definitions for pipeforge.
//!
//! Synthesizes pipelines from a goal and a CSV file, replays and validates
//! saved specifications, and inspects the run ledger.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::engine::replay;
use crate::ledger::{FileLedger, Ledger};
use crate::llm::LiteLlmClient;
use crate::spec::PipelineSpecification;
use crate::synthesis::{
    CancelHandle, SynthesisConfig, SynthesisOrchestrator, SynthesisReport, SynthesisRequest,
};
use crate::table::{read_csv, write_csv, TabularValue};
use crate::validation::{ValidationError, Validator};

/// Synthesize, validate and repair deterministic tabular data pipelines.
#[derive(Parser)]
#[command(name = "pipeforge")]
#[command(about = "Synthesize deterministic tabular data pipelines from natural-language goals")]
#[command(version)]
#[command(
    long_about = "pipeforge turns a goal plus a sample CSV into a re-runnable pipeline specification.\n\nCandidates from the LLM are validated and executed; failures are fed back for repair.\n\nExample usage:\n  pipeforge synthesize -i customers.csv -p \"lowercase emails and drop duplicates\" --spec-out pipeline.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Synthesize a pipeline for a goal and a CSV dataset.
    #[command(alias = "synth")]
    Synthesize(SynthesizeArgs),

    /// Re-run a saved specification against a CSV dataset.
    Replay(ReplayArgs),

    /// Check a saved specification, optionally against a dataset.
    Validate(ValidateArgs),

    /// Inspect or purge the run ledger.
    Ledger(LedgerArgs),
}

/// Arguments for `pipeforge synthesize`.
#[derive(Parser, Debug)]
pub struct SynthesizeArgs {
    /// Input CSV file.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Natural-language goal.
    #[arg(short, long)]
    pub prompt: String,

    /// Repair attempts after the first generation (overrides PIPEFORGE_MAX_ITERATIONS).
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// LLM model (overrides PIPEFORGE_MODEL).
    #[arg(short, long)]
    pub model: Option<String>,

    /// Write the accepted specification to this file.
    #[arg(long)]
    pub spec_out: Option<PathBuf>,

    /// Write the full transformed dataset to this CSV file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Ledger directory (overrides PIPEFORGE_LEDGER_DIR).
    #[arg(long)]
    pub ledger_dir: Option<PathBuf>,

    /// Do not record the run in the ledger.
    #[arg(long)]
    pub no_ledger: bool,

    /// Output the report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `pipeforge replay`.
#[derive(Parser, Debug)]
pub struct ReplayArgs {
    /// Specification file.
    #[arg(short, long)]
    pub spec: PathBuf,

    /// Input CSV file.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output CSV file. Defaults to stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for `pipeforge validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Specification file.
    #[arg(short, long)]
    pub spec: PathBuf,

    /// Dataset for the semantic pass. Without it only the structural pass runs.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output findings as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `pipeforge ledger`.
#[derive(Parser, Debug)]
pub struct LedgerArgs {
    #[command(subcommand)]
    pub command: LedgerSubcommand,

    /// Ledger directory (overrides PIPEFORGE_LEDGER_DIR).
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
pub enum LedgerSubcommand {
    /// List recorded runs.
    List,

    /// Print one recorded run as JSON.
    Show {
        /// Run id.
        run_id: String,
    },

    /// Remove records whose retention has expired.
    Purge,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Synthesize(args) => run_synthesize_command(args).await,
        Commands::Replay(args) => run_replay_command(args),
        Commands::Validate(args) => run_validate_command(args),
        Commands::Ledger(args) => run_ledger_command(args).await,
    }
}

// ============================================================================
// Synthesize
// ============================================================================

async fn run_synthesize_command(args: SynthesizeArgs) -> anyhow::Result<()> {
    let mut config = SynthesisConfig::from_env()?;
    if let Some(model) = args.model.clone() {
        config = config.with_model(model);
    }
    if let Some(max) = args.max_iterations {
        config = config.with_max_iterations(max);
    }
    if let Some(dir) = args.ledger_dir.clone() {
        config = config.with_ledger_dir(dir);
    }
    config.validate()?;

    let dataset = Arc::new(read_csv(&args.input)?);
    info!(
        path = %args.input.display(),
        rows = dataset.row_count(),
        columns = dataset.headers().len(),
        "Loaded dataset"
    );

    let client = LiteLlmClient::from_env().map_err(|e| {
        anyhow::anyhow!(
            "Failed to initialize LLM client: {}. Set LITELLM_API_BASE (and LITELLM_API_KEY if required).",
            e
        )
    })?;

    let mut orchestrator = SynthesisOrchestrator::from_llm(Arc::new(client), config.clone());
    if !args.no_ledger {
        orchestrator = orchestrator.with_ledger(Arc::new(FileLedger::new(&config.ledger_dir)));
    }

    let cancel = CancelHandle::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    let request = SynthesisRequest::new(args.prompt.clone(), Arc::clone(&dataset))
        .with_dataset_ref(args.input.display().to_string());
    let report = orchestrator.synthesize(request, &cancel).await;

    if report.is_success() {
        if let Some(spec) = &report.specification {
            if let Some(path) = &args.spec_out {
                spec.to_file(path)?;
                info!(path = %path.display(), "Wrote specification");
            }
            if let Some(path) = &args.output {
                let output = replay(spec, &dataset)?;
                write_csv(&output, path)?;
                info!(path = %path.display(), rows = output.row_count(), "Wrote output dataset");
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "synthesis failed: {}",
            report
                .failure
                .as_ref()
                .map(|f| format!("{} ({})", f.category, f.message))
                .unwrap_or_else(|| "unknown failure".to_string())
        ))
    }
}

fn print_report(report: &SynthesisReport) {
    println!("Run:        {}", report.run_id);
    println!("Status:     {}", report.final_status);
    println!("Repairs:    {}", report.iterations_used);
    if let Some(failure) = &report.failure {
        println!("Failure:    {} ({})", failure.category, failure.message);
    }
    if let Some(spec) = &report.specification {
        println!(
            "Pipeline:   {} v{} ({} operation(s))",
            spec.id,
            spec.version,
            spec.operations.len()
        );
        for (idx, op) in spec.operations.iter().enumerate() {
            println!("  {}. {}", idx, op.kind);
        }
    }
    print_errors(&report.validation_errors);
    if let Some(sample) = &report.output_sample {
        println!(
            "Output:     {} column(s), {} sample row(s)",
            sample.headers().len(),
            sample.row_count()
        );
    }
    if let Some(err) = &report.ledger_error {
        println!("Ledger:     not recorded ({})", err);
    }
}

fn print_errors(errors: &[ValidationError]) {
    if errors.is_empty() {
        return;
    }
    println!("Errors:");
    for error in errors {
        println!("  {}", error);
    }
}

// ============================================================================
// Replay / Validate
// ============================================================================

fn run_replay_command(args: ReplayArgs) -> anyhow::Result<()> {
    let spec = PipelineSpecification::from_file(&args.spec)?;
    let dataset = read_csv(&args.input)?;

    let output = replay(&spec, &dataset)?;
    info!(
        spec = %spec.id,
        version = spec.version,
        rows_in = dataset.row_count(),
        rows_out = output.row_count(),
        "Replayed specification"
    );

    match &args.output {
        Some(path) => write_csv(&output, path)?,
        None => print!("{}", crate::table::to_csv_string(&output)?),
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ValidateOutput {
    spec_id: String,
    version: u32,
    accepted: bool,
    errors: Vec<ValidationError>,
}

fn run_validate_command(args: ValidateArgs) -> anyhow::Result<()> {
    let spec = PipelineSpecification::from_file(&args.spec)?;
    let config = SynthesisConfig::from_env()?;
    let validator = Validator::new(config.semantic_checks);

    let errors = match &args.input {
        Some(path) => {
            let dataset: TabularValue = read_csv(path)?;
            validator.validate(&spec, &dataset).errors
        }
        None => validator.check_structure(&spec),
    };

    let output = ValidateOutput {
        spec_id: spec.id.clone(),
        version: spec.version,
        accepted: errors.is_empty(),
        errors,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if output.accepted {
        println!("{} v{}: ok", output.spec_id, output.version);
    } else {
        println!("{} v{}: rejected", output.spec_id, output.version);
        print_errors(&output.errors);
    }

    if output.accepted {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "specification has {} validation error(s)",
            output.errors.len()
        ))
    }
}

// ============================================================================
// Ledger
// ============================================================================

fn ledger_dir(dir: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => Ok(SynthesisConfig::from_env()?.ledger_dir),
    }
}

async fn run_ledger_command(args: LedgerArgs) -> anyhow::Result<()> {
    let dir = ledger_dir(args.dir)?;
    let ledger = FileLedger::new(&dir);

    match args.command {
        LedgerSubcommand::List => {
            let records = ledger.list().await?;
            if records.is_empty() {
                println!("No runs recorded in {}", display_dir(&dir));
            }
            for record in records {
                println!(
                    "{}  {}  {}  repairs={}  {}",
                    record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    record.run_id,
                    record.status,
                    record.iterations_used,
                    record.prompt
                );
            }
        }
        LedgerSubcommand::Show { run_id } => {
            let record = ledger.load(&run_id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        LedgerSubcommand::Purge => {
            let purged = ledger.purge_expired(Utc::now()).await?;
            info!(count = purged.len(), "Purged expired runs");
            println!("Purged {} expired run(s)", purged.len());
        }
    }
    Ok(())
}

fn display_dir(dir: &Path) -> String {
    dir.display().to_string()
}
