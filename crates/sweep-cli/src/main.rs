use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use sweep_runner::{EnergyTracker, Sweep, SweepConfig, SweepError, SweepReport};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sweep", version, about = "Energy-measured parameter sweeps")]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence when set).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every trial of the sweep.
    Run {
        #[command(flatten)]
        sweep: SweepArgs,
        #[arg(long)]
        json: bool,
    },
    /// Print the resolved plan without running anything.
    Describe {
        #[command(flatten)]
        sweep: SweepArgs,
        #[arg(long)]
        json: bool,
    },
    /// Write a commented configuration template.
    Init {
        #[arg(long, default_value = "sweep.yaml")]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct SweepArgs {
    /// YAML configuration; built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    binary: Option<PathBuf>,
    #[arg(long = "population", value_delimiter = ',')]
    population_sizes: Vec<u64>,
    #[arg(long = "crossover", value_delimiter = ',')]
    crossover_probs: Vec<f64>,
    #[arg(long)]
    repetitions: Option<u32>,
    #[arg(long)]
    delay_secs: Option<f64>,
    #[arg(long)]
    first_run_id: Option<u64>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    project_name: Option<String>,
    /// Extra optimizer argument, appended after -p/-c/-i. Repeatable.
    #[arg(long = "extra-arg", allow_hyphen_values = true)]
    extra_args: Vec<String>,
}

impl SweepArgs {
    fn resolve(&self) -> Result<SweepConfig> {
        let mut config = match &self.config {
            Some(path) => SweepConfig::load(path)?,
            None => SweepConfig::default(),
        };
        if let Some(binary) = &self.binary {
            config.optimizer.binary = binary.clone();
        }
        if !self.population_sizes.is_empty() {
            config.sweep.population_sizes = self.population_sizes.clone();
        }
        if !self.crossover_probs.is_empty() {
            config.sweep.crossover_probs = self.crossover_probs.clone();
        }
        if let Some(repetitions) = self.repetitions {
            config.sweep.repetitions = repetitions;
        }
        if let Some(delay_secs) = self.delay_secs {
            config.sweep.delay_secs = delay_secs;
        }
        if let Some(first_run_id) = self.first_run_id {
            config.sweep.first_run_id = first_run_id;
        }
        if let Some(output_dir) = &self.output_dir {
            config.measurement.output_dir = output_dir.clone();
        }
        if let Some(project_name) = &self.project_name {
            config.measurement.project_name = project_name.clone();
        }
        if !self.extra_args.is_empty() {
            config.optimizer.extra_args = self.extra_args.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
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
                let (code, details) = match err.downcast_ref::<SweepError>() {
                    Some(sweep_err) => {
                        (sweep_err.code(), json!({ "run_id": sweep_err.run_id() }))
                    }
                    None => ("command_failed", json!({})),
                };
                emit_json(&json_error(code, format!("{:#}", err), details));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run { sweep, json } => {
            let config = sweep.resolve()?;
            if !json {
                print_summary(&config)?;
            }
            let tracker = EnergyTracker::new(&config.measurement);
            let mut runner = Sweep::from_config(&config, tracker)?;
            let report = runner.run()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "summary": summary_to_json(&config)?,
                    "report": report_to_json(&report),
                })));
            }
            println!("trials_completed: {}", report.trials);
            println!("run_ids: {}..={}", report.first_run_id, report.last_run_id);
            println!(
                "records: {}",
                config
                    .measurement
                    .output_dir
                    .join(sweep_runner::measurement::RECORD_FILE)
                    .display()
            );
        }
        Commands::Describe { sweep, json } => {
            let config = sweep.resolve()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "summary": summary_to_json(&config)?,
                })));
            }
            print_summary(&config)?;
        }
        Commands::Init { path, force } => {
            write_template(&path, force)?;
            println!("wrote: {}", path.display());
            println!("next: sweep describe --config {}", path.display());
        }
    }
    Ok(None)
}

fn write_template(path: &Path, force: bool) -> Result<()> {
    if !force && path.exists() {
        return Err(anyhow::anyhow!(
            "config file already exists (use --force): {}",
            path.display()
        ));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, sweep_runner::CONFIG_TEMPLATE)?;
    Ok(())
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
        Commands::Run { json, .. } | Commands::Describe { json, .. } => *json,
        Commands::Init { .. } => false,
    }
}

fn report_to_json(report: &SweepReport) -> Value {
    json!({
        "trials": report.trials,
        "first_run_id": report.first_run_id,
        "last_run_id": report.last_run_id,
    })
}

fn summary_to_json(config: &SweepConfig) -> Result<Value> {
    let plan = config.plan()?;
    let first = config.sweep.first_run_id;
    let configurations = plan
        .configurations()
        .enumerate()
        .map(|(index, c)| {
            let ids = plan
                .id_range(index, first)
                .ok_or_else(|| id_overflow(first))?;
            Ok(json!({
                "population_size": c.population_size,
                "crossover_probability": c.crossover_probability,
                "first_run_id": ids.start(),
                "last_run_id": ids.end(),
            }))
        })
        .collect::<Result<Vec<Value>>>()?;
    Ok(json!({
        "binary": config.optimizer.binary.display().to_string(),
        "extra_args": config.optimizer.extra_args,
        "repetitions": plan.repetitions(),
        "delay_secs": config.sweep.delay_secs,
        "total_trials": plan.total_trials(),
        "configurations": configurations,
        "measurement": config.measurement,
    }))
}

fn id_overflow(first_run_id: u64) -> anyhow::Error {
    SweepError::InvalidConfig(format!(
        "run ids starting at {} overflow u64",
        first_run_id
    ))
    .into()
}

fn print_summary(config: &SweepConfig) -> Result<()> {
    let plan = config.plan()?;
    let first = config.sweep.first_run_id;
    println!("binary: {}", config.optimizer.binary.display());
    if !config.optimizer.extra_args.is_empty() {
        println!("extra_args: {:?}", config.optimizer.extra_args);
    }
    println!("configurations: {}", plan.len());
    println!("repetitions: {}", plan.repetitions());
    println!("delay_secs: {}", config.sweep.delay_secs);
    println!("total_trials: {}", plan.total_trials());
    for (index, c) in plan.configurations().enumerate() {
        let ids = plan
            .id_range(index, first)
            .ok_or_else(|| id_overflow(first))?;
        println!("  {} -> runs {}..={}", c, ids.start(), ids.end());
    }
    println!("project: {}", config.measurement.project_name);
    println!("output_dir: {}", config.measurement.output_dir.display());
    println!("tracking_mode: {}", config.measurement.tracking_mode.as_str());
    Ok(())
}
