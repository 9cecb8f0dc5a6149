//! Constellation Latency Analyzer CLI
//!
//! Loads a propagation data file, resolves the inter-satellite mesh, runs
//! the global latency sweep and writes the JSON artifacts downstream
//! reporting consumes.
//!
//! Usage:
//!   analyze-latency --propagation-data output/propagation-data.json \
//!                   --planes 3 --sats-per-plane 6 \
//!                   --dest-lat 48.14 --dest-lon 11.60

use anyhow::{bail, Result};
use clap::Parser;
use constellation_core::{ConstellationShape, GeoPoint};
use latency_analyzer::{
    contact_report, contacts, first_common_epoch, load_propagation_data, neighbor_table,
    trajectories, write_artifact,
};
use latency_routing::{
    ConstellationSnapshot, ContactGate, LatencySweep, Router, SweepConfig, SweepPolicy,
};
use mesh_topology::{MeshPattern, MeshResolver};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "analyze-latency",
    about = "Mesh connectivity and end-to-end latency analysis over propagated constellation data"
)]
struct Args {
    /// Propagation data JSON (flight dynamics service output)
    #[arg(short = 'p', long)]
    propagation_data: PathBuf,

    /// Mesh pattern: flat-x or ital-x
    #[arg(long, default_value = "flat-x")]
    pattern: String,

    /// Total orbital planes of the constellation
    #[arg(long)]
    planes: u32,

    /// Satellites per plane
    #[arg(long)]
    sats_per_plane: u32,

    /// Destination ground point latitude [deg]
    #[arg(long)]
    dest_lat: f64,

    /// Destination ground point longitude [deg]
    #[arg(long)]
    dest_lon: f64,

    /// Latency grid step [deg]
    #[arg(long, default_value_t = 5.0)]
    grid_step: f64,

    /// Restrict routing to links with an active inter-satellite contact
    #[arg(long)]
    contact_gated: bool,

    /// Abort the sweep on the first unroutable cell
    #[arg(long)]
    fail_fast: bool,

    /// Output directory for JSON artifacts
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let pattern = match args.pattern.as_str() {
        "flat-x" => MeshPattern::ParallelOffset,
        "ital-x" => MeshPattern::Crossed,
        other => bail!("unknown mesh pattern '{other}', expected flat-x or ital-x"),
    };
    let shape = ConstellationShape::new(args.planes, args.sats_per_plane)?;
    let resolver = MeshResolver::new(pattern, shape);
    let file_tag = pattern.to_string().replace(' ', "");

    let data = load_propagation_data(&args.propagation_data)?;
    if data.is_empty() {
        bail!("propagation data is empty");
    }

    // Mesh neighbor table.
    let table = neighbor_table(&resolver, &data)?;
    write_artifact(
        &args.output.join(format!("connections-{file_tag}-mesh.json")),
        &table,
    )?;

    // Contact extraction summary for the link budget collaborators.
    let report = contact_report(&data)?;
    write_artifact(&args.output.join("contact-states.json"), &report)?;

    // Snapshot at the first epoch every satellite has a sample for.
    let epoch = first_common_epoch(&data)?;
    let all_trajectories = trajectories(&data);
    let snapshot = ConstellationSnapshot::from_trajectories(&all_trajectories, epoch)?;
    if !snapshot.skipped().is_empty() {
        warn!(skipped = ?snapshot.skipped(), "satellites without a state at the snapshot epoch");
    }
    info!(%epoch, satellites = snapshot.len(), "constellation snapshot ready");

    // Latency sweep to the destination ground point.
    let router = Router::new(resolver);
    let sweep = LatencySweep::new(&router, &snapshot);
    let mut config = SweepConfig::new(GeoPoint::surface(args.dest_lat, args.dest_lon));
    config.grid_step_deg = args.grid_step;
    config.policy = if args.fail_fast {
        SweepPolicy::FailFast
    } else {
        SweepPolicy::BestEffort
    };

    let grid = if args.contact_gated {
        let gate = ContactGate::new(&contacts(&data), epoch);
        sweep.run_gated(&config, gate.predicate())?
    } else {
        sweep.run(&config)?
    };
    write_artifact(
        &args.output.join(format!("latency-{file_tag}-mesh.json")),
        &grid,
    )?;

    info!("Sweep complete: {} x {} cells", grid.lats_deg.len(), grid.lons_deg.len());
    info!("Destination anchor satellite: {}", grid.anchor);
    if let Some(worst) = &grid.worst {
        info!(
            "Worst user location: lat {} deg, lon {} deg, delay {:.1} ms",
            worst.lat_deg, worst.lon_deg, worst.delay_ms
        );
    }
    if !grid.failures.is_empty() {
        warn!("{} cells could not be routed", grid.failures.len());
    }

    Ok(())
}
