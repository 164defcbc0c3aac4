use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Automate multi-config simulation runs.
///
/// Span a matrix of configurations with `build`, execute each environment
/// with `run` and aggregate the obtained results with `gather`.
#[derive(Parser)]
#[command(name = "sweep", version = "0.3.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Setup environments.
    Build {
        #[arg(short, long = "config", default_value = "config.yaml")]
        config: PathBuf,
        /// Conduct dry run.
        #[arg(short, long)]
        dry: bool,
        #[arg(long)]
        json: bool,
    },
    /// Run simulations in each environment.
    Run {
        #[arg(short, long = "config", default_value = "config.yaml")]
        config: PathBuf,
        /// Conduct dry run.
        #[arg(short, long)]
        dry: bool,
        #[arg(long)]
        json: bool,
    },
    /// Gather results from each run.
    Gather {
        #[arg(short, long = "config", default_value = "config.yaml")]
        config: PathBuf,
        /// Path to store aggregated results at.
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Show the configuration matrix without building it.
    Describe {
        #[arg(short, long = "config", default_value = "config.yaml")]
        config: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Build { config, dry, json } => {
            let report = sweep_runner::build(&config, dry)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "build",
                    "dry": report.dry,
                    "working_dir": report.working_dir.display().to_string(),
                    "runs": report.identifiers,
                    "preview": report.preview,
                })));
            }
            if report.dry {
                for variant in &report.preview {
                    print_variant(variant)?;
                }
            } else {
                println!("working_dir: {}", report.working_dir.display());
                println!("runs: {}", report.identifiers.len());
            }
        }
        Commands::Run { config, dry, json } => {
            let report = sweep_runner::run(&config, dry)?;
            let failed = !report.failures.is_empty();
            if json {
                let failures: Vec<Value> = report
                    .failures
                    .iter()
                    .map(|f| json!({"run": f.run, "command": f.command, "status": f.status}))
                    .collect();
                emit_json(&json!({
                    "ok": !failed,
                    "command": "run",
                    "dry": report.dry,
                    "runs": report.runs,
                    "commands_executed": report.commands_executed,
                    "failures": failures,
                }));
            } else {
                println!("runs: {}", report.runs.len());
                println!("commands_executed: {}", report.commands_executed);
                for f in &report.failures {
                    println!("failed: {} > {} (status {})", f.run, f.command, f.status);
                }
            }
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Gather {
            config,
            output,
            json,
        } => {
            let report = sweep_runner::gather(&config, output.as_deref())?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "gather",
                    "output_dir": report.output_dir.display().to_string(),
                    "runs": report.runs,
                    "files": report.files,
                })));
            }
            println!("output_dir: {}", report.output_dir.display());
            println!("runs: {}", report.runs);
            println!("files: {}", report.files);
        }
        Commands::Describe { config, json } => {
            let summary = sweep_runner::describe_sweep(&config)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "summary": summary,
                })));
            }
            print_summary(&summary);
        }
    }
    Ok(None)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Build { json, .. }
        | Commands::Run { json, .. }
        | Commands::Gather { json, .. }
        | Commands::Describe { json, .. } => *json,
    }
}

fn print_variant(variant: &sweep_runner::Variant) -> Result<()> {
    println!("{}", variant.identifier);
    println!("{}", serde_json::to_string_pretty(&variant.tree)?);
    println!("{}", serde_json::to_string_pretty(&variant.extra_info)?);
    println!();
    Ok(())
}

fn print_summary(summary: &sweep_runner::SweepSummary) {
    println!("project_source: {}", summary.project_source);
    println!("base_config: {}", summary.base_config.display());
    println!("working_dir: {}", summary.working_dir.display());
    for axis in &summary.axes {
        let kind = match axis.kind {
            sweep_runner::AxisKind::Config => "config",
            sweep_runner::AxisKind::Extra => "extra",
        };
        print!("axis: {} ({}, {} values", axis.name, kind, axis.values);
        if axis.paired > 0 {
            print!(", {} paired", axis.paired);
        }
        if let Some(base) = &axis.base_value {
            print!(", base {}", base);
        }
        println!(")");
    }
    println!("repetitions: {}", summary.repetitions);
    println!("combinations: {}", summary.combinations);
    println!("total_variants: {}", summary.total_variants);
    println!("run_prefix: {}", summary.run_prefix);
}
