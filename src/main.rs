//! spacedyn - run multi-body spacecraft scenarios from the command line

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use spacedyn::config::{IntegratorKind, ScenarioConfig};
use spacedyn::diagnostics::{RecordingSink, Severity};
use spacedyn::sim::{Simulation, SimulationReport};

#[derive(Parser, Debug)]
#[command(name = "spacedyn", version, about = "Multi-body spacecraft state propagation")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Propagate a scenario and write the final state report
    Run(RunArgs),
    /// Write a built-in scenario as JSON
    Preset(PresetArgs),
    /// List the available integration techniques
    Integrators,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Scenario JSON file (the single-satellite preset when omitted)
    scenario: Option<PathBuf>,
    /// Override the scenario duration in seconds
    #[arg(long)]
    duration: Option<f64>,
    /// Override the integration step in seconds
    #[arg(long)]
    step: Option<f64>,
    /// Override the integration technique (rk4, gauss-jackson, lsode)
    #[arg(long)]
    integrator: Option<IntegratorKind>,
    /// Output JSON file path
    #[arg(long, default_value = "out/report.json")]
    output: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct PresetArgs {
    /// Preset name: single-satellite or docked-stack
    #[arg(default_value = "single-satellite")]
    name: String,
    /// Output JSON file path (stdout when omitted)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct DiagnosticRecord {
    severity: &'static str,
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct RunReport {
    scenario: String,
    #[serde(flatten)]
    simulation: SimulationReport,
    diagnostics: Vec<DiagnosticRecord>,
}

fn preset(name: &str) -> Result<ScenarioConfig> {
    match name {
        "single-satellite" => Ok(ScenarioConfig::single_satellite()),
        "docked-stack" => Ok(ScenarioConfig::docked_stack()),
        other => Err(anyhow!("unknown preset '{}' (expected single-satellite or docked-stack)", other)),
    }
}

fn write_json<T: Serialize>(path: &PathBuf, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, value).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn run(args: RunArgs) -> Result<()> {
    let (mut config, scenario) = match &args.scenario {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading scenario {}", path.display()))?;
            let config = ScenarioConfig::from_json(&text)
                .with_context(|| format!("loading scenario {}", path.display()))?;
            (config, path.display().to_string())
        }
        None => (ScenarioConfig::single_satellite(), "single-satellite".to_string()),
    };
    if let Some(duration) = args.duration {
        config.integrator.duration = duration;
    }
    if let Some(step) = args.step {
        config.integrator.step_size = step;
    }
    if let Some(kind) = args.integrator {
        config.integrator.kind = kind;
    }

    let (recorder, sink) = RecordingSink::shared();
    let mut sim = Simulation::new(config, sink).context("building scenario")?;

    let total = sim.clock().dyn_step(sim.config().integrator.duration);
    log::info!(
        "Propagating {} for {:.1} s with {}",
        scenario,
        total,
        sim.config().integrator.kind.name()
    );

    let progress = ProgressBar::new(total.ceil() as u64);
    progress.set_style(
        ProgressStyle::with_template("{elapsed_precise} {bar:40.cyan/blue} {pos}/{len} s ETA {eta_precise}")
            .context("progress template")?
            .progress_chars("##-"),
    );
    let report = sim
        .run(|elapsed, _| progress.set_position(elapsed as u64))
        .context("propagation failed")?;
    progress.finish_and_clear();

    let warnings = recorder.count(Severity::Warn) + recorder.count(Severity::Error);
    let output = RunReport {
        scenario,
        simulation: report,
        diagnostics: recorder
            .records()
            .into_iter()
            .map(|d| DiagnosticRecord {
                severity: d.severity.name(),
                code: d.code,
                message: d.message,
            })
            .collect(),
    };
    write_json(&args.output, &output)?;
    log::info!(
        "Wrote {} ({} cycles, {} warnings)",
        args.output.display(),
        output.simulation.cycles,
        warnings
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Command::Run(args) => run(args),
        Command::Preset(args) => {
            let config = preset(&args.name)?;
            match &args.output {
                Some(path) => write_json(path, &config),
                None => {
                    println!("{}", config.to_json()?);
                    Ok(())
                }
            }
        }
        Command::Integrators => {
            for kind in IntegratorKind::all() {
                println!("{:<14} {}", kind.name(), kind.description());
            }
            Ok(())
        }
    }
}
