use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use env_logger::Builder;
use serde_json::json;

use rackplan::config::OptimizerConfig;
use rackplan::optimizer::LayoutOptimizer;
use rackplan::snapshot::{RackSnapshot, ResolvedSnapshot};
use rackplan::validator::{check_capacity, validate_set};
use rackplan::weights::OptimizationWeights;
use rackplan::{compute_metrics, validate_placement, DeviceId, OptimizeError, Placement, PlacementError};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
/// Validates, measures and optimizes rack layouts
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validates the placements of a snapshot, or a single candidate placement against them
    Validate {
        /// Path to YAML or JSON rack snapshot
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Device to place (must have a profile in the snapshot)
        #[arg(long, requires = "start_unit")]
        device: Option<String>,

        /// Start unit of the candidate placement
        #[arg(long, requires = "device")]
        start_unit: Option<u32>,

        /// Path to produced JSON file (default - print to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Computes rack metrics
    Metrics {
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Path to YAML file with optimizer configuration (its hotspot policy is used)
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Proposes an improved layout without applying it
    Optimize {
        #[arg(short, long)]
        snapshot: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Objective weights within [0, 100]
        #[arg(short, long, default_value = "thermal=1,power=1,weight=1")]
        weights: String,

        /// Number of neighbour evaluations (default - taken from config)
        #[arg(short, long)]
        budget: Option<u64>,

        /// Number of threads evaluating neighbours (default - taken from config)
        #[arg(short, long)]
        threads: Option<usize>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_snapshot(path: &Path) -> Result<ResolvedSnapshot, Box<dyn Error>> {
    Ok(RackSnapshot::from_file(&path.to_string_lossy())?.resolve()?)
}

fn load_config(path: &Option<PathBuf>) -> Result<OptimizerConfig, Box<dyn Error>> {
    match path {
        Some(path) => Ok(OptimizerConfig::from_file(&path.to_string_lossy())?),
        None => Ok(OptimizerConfig::default()),
    }
}

fn write_output(output: &Option<PathBuf>, value: &serde_json::Value) -> Result<(), Box<dyn Error>> {
    let text = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => std::fs::File::create(path)?.write_all(text.as_bytes())?,
        None => println!("{}", text),
    }
    Ok(())
}

/// Returns true if the command found the input acceptable.
fn run(args: Args) -> Result<bool, Box<dyn Error>> {
    match args.command {
        Command::Validate {
            snapshot,
            device,
            start_unit,
            output,
        } => {
            let snapshot = load_snapshot(&snapshot)?;
            let errors: Vec<PlacementError> = match (device, start_unit) {
                (Some(device), Some(start_unit)) => {
                    let device_id = DeviceId::new(device);
                    let profile = snapshot
                        .devices
                        .get(&device_id)
                        .ok_or_else(|| format!("no profile for device {}", device_id))?;
                    let candidate = Placement::new(snapshot.rack_id.clone(), profile, start_unit);
                    validate_placement(&snapshot.capacity, &snapshot.placements, &candidate)
                        .err()
                        .into_iter()
                        .collect()
                }
                _ => {
                    let mut errors = validate_set(&snapshot.capacity, &snapshot.placements)
                        .err()
                        .unwrap_or_default();
                    errors.extend(
                        check_capacity(&snapshot.capacity, &snapshot.devices, &snapshot.placements)
                            .err()
                            .unwrap_or_default(),
                    );
                    errors
                }
            };
            let valid = errors.is_empty();
            write_output(&output, &json!({ "valid": valid, "errors": errors }))?;
            Ok(valid)
        }
        Command::Metrics {
            snapshot,
            config,
            output,
        } => {
            let snapshot = load_snapshot(&snapshot)?;
            let config = load_config(&config)?;
            let metrics = compute_metrics(&snapshot.capacity, &snapshot.devices, &snapshot.placements, &config.hotspot)?;
            write_output(&output, &serde_json::to_value(&metrics)?)?;
            Ok(true)
        }
        Command::Optimize {
            snapshot,
            config,
            weights,
            budget,
            threads,
            output,
        } => {
            let snapshot = load_snapshot(&snapshot)?;
            let mut config = load_config(&config)?;
            if let Some(threads) = threads {
                config = config.with_threads(threads);
            }
            config.validate()?;
            let budget = budget.unwrap_or(config.iteration_budget);
            let weights: OptimizationWeights = weights.parse()?;

            let optimizer = LayoutOptimizer::new(config);
            match optimizer.optimize(
                &snapshot.capacity,
                &snapshot.devices,
                &snapshot.placements,
                &weights,
                budget,
            ) {
                Ok(proposal) => {
                    write_output(&output, &serde_json::to_value(&proposal)?)?;
                    Ok(true)
                }
                Err(OptimizeError::Infeasible {
                    unaccommodated_device_ids,
                    violations,
                }) => {
                    log::warn!("no feasible layout exists");
                    write_output(
                        &output,
                        &json!({
                            "infeasible": true,
                            "unaccommodated_device_ids": unaccommodated_device_ids,
                            "violations": violations,
                        }),
                    )?;
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}

fn main() {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}
