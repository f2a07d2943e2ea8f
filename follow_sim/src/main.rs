//! Follow Simulator CLI
//!
//! Run deterministic follow scenarios, or one scenario live on wall-clock time.

use anyhow::{bail, Context, Result};
use clap::Parser;
use follow_core::FollowConfig;
use follow_env::BackendKind;
use follow_sim::{LiveRunner, ScenarioId, ScenarioResult, ScenarioRunner};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Follow Deterministic Simulation CLI
#[derive(Parser, Debug)]
#[command(name = "follow-sim")]
#[command(about = "Run deterministic follow scenarios", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (steady_follow, crossing_distractor, brief_occlusion,
    /// sensor_blackout, subject_lost, too_close, jittery_frame_rate, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Detection backend (motion, edge, model, hybrid)
    #[arg(short, long, default_value = "model")]
    backend: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulated duration in seconds
    #[arg(short, long, default_value = "10")]
    duration: f64,

    /// Tick rate in Hz (defaults to the config's driver rate)
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// Pipeline configuration (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export per-tick frames of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// Run a single scenario in real time with concurrent producers
    #[arg(long)]
    live: bool,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    dump_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))?;

    if args.dump_config {
        print!("{}", FollowConfig::default().to_toml_string()?);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => FollowConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path))?,
        None => FollowConfig::default(),
    };
    let backend: BackendKind = args
        .backend
        .parse()
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args
            .scenario
            .parse()
            .map_err(|e| anyhow::anyhow!("{} (try one of: {})", e, scenario_names()))?]
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    if !args.json {
        info!("Follow Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    if args.live {
        if scenarios.len() > 1 {
            bail!("--live only supports a single scenario, not 'all'");
        }
        let summary = LiveRunner::new(base_seed)
            .with_backend(backend)
            .with_config(config)
            .with_duration(Duration::from_secs_f64(args.duration))
            .run(scenarios[0])
            .await?;

        if args.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            info!(
                "✓ {} live: {} ticks, {} held, final distance {}",
                scenarios[0].name(),
                summary.stats.ticks,
                summary.stats.held_ticks,
                summary
                    .final_distance_cm
                    .map_or("n/a".to_string(), |d| format!("{:.1}cm", d))
            );
        }
        return Ok(());
    }

    let make_runner = |seed: u64| {
        let runner = ScenarioRunner::new(seed)
            .with_backend(backend)
            .with_config(config.clone())
            .with_duration(args.duration);
        match args.tick_rate {
            Some(hz) => runner.with_tick_rate(hz),
            None => runner,
        }
    };

    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            bail!("--export only supports a single scenario, not 'all'");
        }
        info!("Running with export to: {}", export_path);

        let (result, export) = make_runner(base_seed).run_with_export(scenarios[0]);
        export
            .write_to_file(export_path)
            .with_context(|| format!("writing export to {}", export_path))?;
        info!("Exported {} frames to {}", export.frames.len(), export_path);

        report(&result, args.json);
        if !result.passed {
            std::process::exit(1);
        }
        return Ok(());
    }

    // Run simulations
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = make_runner(seed);

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                report(&result, false);
            }
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let failed: Vec<&ScenarioResult> = all_results.iter().filter(|r| !r.passed).collect();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed.len(),
            "failed": failed.len(),
            "backend": backend.name(),
            "results": all_results,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed.is_empty() {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed.len(), total);
            for result in &failed {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if !failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn report(result: &ScenarioResult, json: bool) {
    if json {
        match serde_json::to_string_pretty(result) {
            Ok(out) => println!("{}", out),
            Err(e) => error!("Cannot serialize result: {}", e),
        }
    } else if result.passed {
        info!(
            "✓ {} (seed={}) PASSED",
            result.scenario.name(),
            result.seed
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}

fn scenario_names() -> String {
    ScenarioId::all()
        .iter()
        .map(|s| s.name())
        .collect::<Vec<_>>()
        .join(", ")
}
