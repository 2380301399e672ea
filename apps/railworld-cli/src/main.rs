use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use railworld_common::{EntityId, EntityKind, OwnerId, Point, square_half};
use railworld_index::IndexConfig;
use railworld_kernel::world::splitmix64;
use railworld_kernel::{Shape, World};
use railworld_service::{GameConfig, Operation, Service, wait_for_tick};

#[derive(Parser)]
#[command(name = "railworld-cli", about = "CLI tool for railworld operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML config file (defaults are used when absent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct PopulateArgs {
    /// Number of rail nodes to place
    #[arg(short, long, default_value = "64")]
    nodes: usize,
    /// Number of distinct owners
    #[arg(short, long, default_value = "4")]
    owners: u64,
    /// Seed for node positions
    #[arg(short, long, default_value = "42")]
    seed: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and index geometry
    Info,
    /// Build a deterministic rail network and print index statistics
    Populate {
        #[command(flatten)]
        world: PopulateArgs,
    },
    /// Query a viewport over a deterministic rail network
    View {
        #[command(flatten)]
        world: PopulateArgs,
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        cx: f64,
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        cy: f64,
        /// log2 of the viewport side
        #[arg(long, default_value = "10")]
        scale: f64,
        /// Levels to descend below the viewport scale
        #[arg(long, default_value = "3")]
        span: f64,
        /// Print the view as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the service: queue operations while the world ticks
    Run {
        /// Operations to submit
        #[arg(long, default_value = "100")]
        ops: usize,
        /// Ticks to wait for before shutting down
        #[arg(long, default_value = "10")]
        ticks: u64,
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = match &cli.config {
        Some(path) => GameConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => GameConfig::default(),
    };

    match cli.command {
        Commands::Info => {
            let index = config.index;
            println!("railworld-cli v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "index: scales {}..={} ({} levels), world half-size {}",
                index.min_scale,
                index.max_scale,
                index.depth(),
                square_half(index.max_scale as f64)
            );
            println!(
                "service: queue={}, tick={}ms, slow-op={}ms",
                config.service.queue_capacity,
                config.service.tick_interval_ms,
                config.service.slow_op_warn_ms
            );
        }
        Commands::Populate { world: args } => {
            let world = populate(config.index, args)?;
            let stats = world.index().stats();
            println!(
                "Populated: nodes={}, entities={}, owners={}",
                args.nodes,
                world.entity_count(),
                args.owners
            );
            println!(
                "Index: clusters={}, buckets={}, placements={}, finest scale={}",
                stats.clusters, stats.buckets, stats.placements, stats.finest_scale
            );
            println!("State hash: {:#x}", world.state_hash());
        }
        Commands::View {
            world: args,
            cx,
            cy,
            scale,
            span,
            json,
        } => {
            let world = populate(config.index, args)?;
            let view = world.view(cx, cy, scale, span);
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                println!(
                    "View ({cx:.1},{cy:.1}) scale={scale} span={span}: entries={}, sources={}, delegates={}",
                    view.len(),
                    view.sources().len(),
                    view.delegates().len()
                );
                for source in view.sources() {
                    println!(
                        "  {} {} {} scale={}",
                        source.cluster, source.chunk, source.owner, source.scale
                    );
                }
                for delegate in view.delegates() {
                    println!(
                        "  delegate {} {} {:?} x{} at {}",
                        delegate.chunk,
                        delegate.owner,
                        delegate.kind,
                        delegate.count(),
                        delegate.point
                    );
                }
            }
        }
        Commands::Run { ops, ticks, seed } => {
            println!("Service run: ops={ops}, ticks={ticks}, seed={seed}");
            let service = Service::start(&config)?;
            let half = square_half(config.index.max_scale as f64);

            let mut state = seed;
            let mut accepted = 0;
            for i in 0..ops {
                let (p, next) = random_point(state, half);
                state = next;
                let op = Operation::Spawn {
                    kind: if i % 5 == 0 {
                        EntityKind::Residence
                    } else {
                        EntityKind::RailNode
                    },
                    owner: OwnerId(i as u64 % 4),
                    shape: Shape::Point(p),
                };
                if service.submit(op) {
                    accepted += 1;
                }
            }

            let timeout = run_timeout(config.service.tick_interval(), ticks);
            if !wait_for_tick(service.world(), ticks, timeout) {
                tracing::warn!(ticks, "timed out waiting for ticks");
            }
            let world = service.world().clone();
            let report = service.shutdown()?;

            let w = world.read();
            println!(
                "Submitted {ops}, accepted {accepted}, applied {}, failed {}",
                report.operations.applied, report.operations.failed
            );
            println!(
                "Ticks: {} (avg {:?}, max {:?})",
                report.tick,
                report.tick_timer.average(),
                report.tick_timer.max()
            );
            println!("Events retained: {}", report.events.len());
            println!(
                "Ops: avg {:?}, max {:?}",
                report.op_timer.average(),
                report.op_timer.max()
            );
            println!(
                "World: entities={}, clusters={}",
                w.entity_count(),
                w.index().cluster_count()
            );
        }
    }

    Ok(())
}

/// How long to wait for `ticks` ticks, with ten ticks of slack.
fn run_timeout(interval: Duration, ticks: u64) -> Duration {
    let n = u32::try_from(ticks.saturating_add(10)).unwrap_or(u32::MAX);
    interval.saturating_mul(n)
}

/// Draw a point inside the central 90% of the world square.
fn random_point(state: u64, half: f64) -> (Point, u64) {
    let a = splitmix64(state);
    let b = splitmix64(a);
    let unit = |v: u64| (v >> 11) as f64 / (1u64 << 53) as f64;
    let p = Point::new(
        (unit(a) * 2.0 - 1.0) * half * 0.9,
        (unit(b) * 2.0 - 1.0) * half * 0.9,
    );
    (p, b)
}

/// Place `nodes` rail nodes and link consecutive nodes of the same owner.
fn populate(config: IndexConfig, args: PopulateArgs) -> anyhow::Result<World> {
    let owners = args.owners.max(1);
    let mut world = World::with_seed(config, args.seed)?;
    let half = square_half(config.max_scale as f64);

    let mut state = args.seed;
    let mut last: Vec<Option<EntityId>> = vec![None; owners as usize];
    for i in 0..args.nodes {
        let (p, next) = random_point(state, half);
        state = next;
        let owner = i as u64 % owners;
        let node = world.spawn(EntityKind::RailNode, OwnerId(owner), Shape::Point(p))?;
        if let Some(prev) = last[owner as usize].replace(node) {
            world.spawn(
                EntityKind::RailEdge,
                OwnerId(owner),
                Shape::Edge {
                    from: prev,
                    to: node,
                },
            )?;
        }
    }
    tracing::debug!(entities = world.entity_count(), "populated world");
    Ok(world)
}
