//! Experiment runner: simulates a mesh in virtual time and prints the
//! outcome as JSON.
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rmhb::settings::{self, NodeRole, ProtocolSettings};
use rmhb::sim::{FailureConfig, FailureMode, ScenarioAction, Simulator, Topology, TopologyKind};

#[derive(Clone, Debug, Parser)]
#[clap(name = "rmhb-sim", version = settings::APP_VERSION)]
struct Args {
    #[clap(long, default_value = "16", help = "Number of simulated nodes")]
    nodes: usize,

    #[clap(
        long,
        default_value = "grid",
        help = "Topology: 'line', 'ring', 'grid' or 'full'"
    )]
    topology: TopologyKind,

    #[clap(long, default_value = "0.0", help = "Per-delivery loss probability")]
    loss_rate: f64,

    #[clap(long, default_value = "5", help = "One-hop delivery delay in milliseconds")]
    link_delay_ms: u64,

    #[clap(long, default_value = "1", help = "Seed for the whole run")]
    seed: u64,

    #[clap(long, default_value = "600", help = "Simulated seconds to run")]
    duration_secs: u64,

    #[clap(long, default_value = "0", help = "Index of the source node")]
    source: usize,

    #[clap(long, help = "Index of the sink node (default: last node)")]
    sink: Option<usize>,

    #[clap(
        long,
        default_value = "30",
        help = "Seconds until the source begins dissemination"
    )]
    start_at_secs: u64,

    #[clap(long, default_value = settings::DEFAULT_ANNOUNCE_PERIOD_MS)]
    announce_period_ms: u64,

    #[clap(long, default_value = settings::DEFAULT_BEACON_PERIOD_MS)]
    beacon_period_ms: u64,

    #[clap(long, default_value = settings::DEFAULT_NEIGHBOR_TIMEOUT_MS)]
    neighbor_timeout_ms: u64,

    #[clap(long, help = "Relay hop ceiling (default: unlimited)")]
    max_hops: Option<i32>,

    #[clap(
        long,
        default_value = "0",
        help = "Crash a relay on a failure tick with probability 1/N (0 disables failures)"
    )]
    failure_probability: u32,

    #[clap(
        long,
        default_value = "random",
        help = "Which relay fails: 'random', or 'location' (next to a failed node)"
    )]
    failure_mode: FailureMode,

    #[clap(long, default_value = "10", help = "Seconds between failure ticks")]
    failure_tick_secs: u64,

    #[clap(long, default_value = "1", help = "Most relays down at once")]
    max_failures: usize,

    #[clap(long, default_value = "30", help = "Seconds a crashed relay stays down")]
    recovery_delay_secs: u64,

    #[clap(long, help = "Pretty-print the JSON result")]
    pretty: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rmhb=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    if args.nodes < 2 {
        anyhow::bail!("a simulation needs at least 2 nodes");
    }
    let sink = args.sink.unwrap_or(args.nodes - 1);
    if args.source >= args.nodes || sink >= args.nodes {
        anyhow::bail!("source and sink must be below --nodes ({})", args.nodes);
    }
    if args.source == sink {
        anyhow::bail!("source and sink must be different nodes");
    }
    if args.failure_probability > 0 && args.failure_tick_secs == 0 {
        anyhow::bail!("--failure-tick-secs must be non-zero when failures are enabled");
    }

    let protocol = ProtocolSettings {
        announce_period: Duration::from_millis(args.announce_period_ms),
        beacon_period: Duration::from_millis(args.beacon_period_ms),
        neighbor_timeout: Duration::from_millis(args.neighbor_timeout_ms),
        max_hops: args.max_hops,
        ..ProtocolSettings::default()
    };
    protocol.validate()?;

    let topology = Topology::build(args.topology, args.nodes)
        .with_loss_rate(args.loss_rate)
        .with_delay(Duration::from_millis(args.link_delay_ms));
    let mut sim = Simulator::new(topology, protocol, args.seed);
    sim.set_role(args.source, NodeRole::Source);
    sim.set_role(sink, NodeRole::Sink);
    if args.failure_probability > 0 {
        sim = sim.with_failures(FailureConfig {
            mode: args.failure_mode,
            tick: Duration::from_secs(args.failure_tick_secs),
            probability: args.failure_probability,
            max_concurrent: args.max_failures,
            recovery_delay: Duration::from_secs(args.recovery_delay_secs),
        });
    }
    sim.schedule_action(
        Duration::from_secs(args.start_at_secs),
        ScenarioAction::Begin {
            node: args.source,
            value: None,
        },
    );

    let result = sim.run_until(Duration::from_secs(args.duration_secs));
    tracing::info!(
        "Simulated {}ms, {} crashes",
        sim.current_time().as_millis(),
        result.metrics.crashes
    );
    let json = if args.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{}", json);
    Ok(())
}
