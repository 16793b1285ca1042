use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use yard_sim::simulation::{SimulatorConfig, Track, TrackSimulator};

#[derive(Parser)]
#[command(name = "yard_sim")]
#[command(about = "Railway yard track simulation")]
struct Cli {
    /// Number of state changes to run
    #[arg(long, default_value = "10")]
    ticks: u32,

    /// Period between two state changes in live mode, in milliseconds
    #[arg(long, default_value = "3000")]
    period_ms: u64,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Wait for the periodic ticker instead of forcing changes immediately
    #[arg(long)]
    live: bool,

    /// Print each snapshot as one JSON line
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn,yard_sim=info"))
        .init();

    let cli = Cli::parse();

    let mut config = SimulatorConfig::default().with_tick_period(Duration::from_millis(cli.period_ms));
    if let Some(seed) = cli.seed {
        config = config.with_rng_seed(seed);
    }
    let simulator = TrackSimulator::new(config).context("Invalid simulator configuration")?;

    print_snapshot(&simulator.snapshot(), cli.json)?;

    if cli.live {
        run_live(&simulator, cli.ticks, cli.json)?;
    } else {
        run_headless(&simulator, cli.ticks, cli.json)?;
    }

    info!("=== SIMULATION COMPLETE ===");
    info!("{}", simulator.summary());
    info!("Changes recorded: {}", simulator.history().len());
    Ok(())
}

/// Force `ticks` changes back to back
fn run_headless(simulator: &TrackSimulator, ticks: u32, json: bool) -> Result<()> {
    info!("Running yard simulation in headless mode, {} ticks", ticks);
    for _ in 0..ticks {
        simulator.tick();
        print_snapshot(&simulator.snapshot(), json)?;
    }
    Ok(())
}

/// Subscribe and print the first `ticks` snapshots pushed by the ticker
fn run_live(simulator: &TrackSimulator, ticks: u32, json: bool) -> Result<()> {
    let period = simulator.config().tick_period;
    info!("Running yard simulation live, {} ticks every {:?}", ticks, period);

    let (tx, rx) = mpsc::channel();
    let subscription = simulator.subscribe(move |tracks| {
        let _ = tx.send(tracks.to_vec());
    });

    let result = (0..ticks).try_for_each(|tick| {
        let tracks = rx
            .recv_timeout(period * 2 + Duration::from_secs(1))
            .with_context(|| format!("No snapshot received for tick {}", tick + 1))?;
        print_snapshot(&tracks, json)
    });

    subscription.unsubscribe();
    result
}

fn print_snapshot(tracks: &[Track], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(tracks).context("Failed to serialize snapshot")?);
        return Ok(());
    }

    println!("--- Tracks ---");
    for track in tracks {
        println!(
            "  Track {}: {:<8} train={:<9} since={}",
            track.id,
            track.status,
            track.train_id.as_deref().unwrap_or("-"),
            track
                .timestamp
                .map(|timestamp| timestamp.to_rfc3339())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    println!();
    Ok(())
}
