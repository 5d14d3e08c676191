use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use haulage_core::app::{App, DepotBuilder, DepotStatus};
use haulage_core::config::HaulageConfig;
use haulage_core::depot::AcceptContext;
use haulage_core::domain::{ActorId, LoadCommand, OwnershipMode, ShipperTier, Tier};
use haulage_core::impls::{InMemorySessions, RegionPopulation, StaticRequirements};
use haulage_core::ports::{Clock, FixedClock, SystemClock};

#[derive(Debug, Parser)]
#[command(name = "haulage", about = "Freight dispatch core")]
struct Cli {
    /// TOML config; defaults apply when omitted.
    #[arg(long, env = "HAULAGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run haulers through full deliveries on a simulated clock and print the status.
    Simulate {
        #[arg(long, default_value_t = 3)]
        haulers: usize,
    },
    /// Quote what each posting on the board would pay for a clean on-time delivery.
    Preview {
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        tier: Option<u8>,
        #[arg(long, value_enum, default_value_t = Ownership::Rented)]
        ownership: Ownership,
    },
    /// Run the sweep and publisher loops until Ctrl-C.
    Serve,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Ownership {
    Owned,
    Leased,
    Rented,
}

impl From<Ownership> for OwnershipMode {
    fn from(value: Ownership) -> Self {
        match value {
            Ownership::Owned => OwnershipMode::Owned,
            Ownership::Leased => OwnershipMode::Leased,
            Ownership::Rented => OwnershipMode::Rented,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<HaulageConfig> {
    match path {
        Some(path) => HaulageConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(HaulageConfig::default()),
    }
}

async fn build(config: HaulageConfig, clock: Option<Arc<FixedClock>>) -> anyhow::Result<App> {
    let mut builder = DepotBuilder::new(config)
        .sessions(Arc::new(InMemorySessions::new()))
        .requirements(Arc::new(StaticRequirements::permissive()))
        .population(Arc::new(RegionPopulation::new()));
    if let Some(clock) = clock {
        builder = builder.clock(clock);
    }
    Ok(builder.build().await?)
}

async fn simulate(config: HaulageConfig, haulers: usize) -> anyhow::Result<()> {
    let clock = Arc::new(FixedClock::at_unix(SystemClock.unix()));
    let app = build(config, Some(clock.clone())).await?;
    let depot = &app.depot;

    for n in 0..haulers {
        let actor = ActorId::new(format!("hauler-{n}"));
        depot.fund(&actor, 100_000).await?;
        let Some(posting) = depot
            .listing(None, None)
            .await
            .into_iter()
            .find(|p| p.is_available() && p.expires_at > clock.unix())
        else {
            tracing::warn!(%actor, "board is empty");
            break;
        };
        depot.reserve(posting.job_id, &actor).await?;
        let load = depot
            .accept(posting.job_id, &actor, AcceptContext::default())
            .await?;

        let sealable = depot
            .catalog()
            .cargo(posting.cargo)
            .is_some_and(|c| c.sealable);
        let mut route = Vec::new();
        if sealable {
            route.push(LoadCommand::ApplySeal);
        }
        route.extend([LoadCommand::CompletePreTrip, LoadCommand::VerifyManifest, LoadCommand::Depart]);
        for _ in 1..posting.stops {
            route.extend([LoadCommand::ArriveAtStop, LoadCommand::DepartStop]);
        }
        route.push(LoadCommand::ArriveAtDestination);
        for command in route {
            depot.report(load, &actor, command).await?;
        }

        clock.advance_secs(posting.window_secs / 2);
        let record = depot.deliver(load, &actor).await?;
        println!(
            "{}",
            json!({
                "actor": actor,
                "job": posting.job_id,
                "cargo": posting.cargo,
                "outcome": record.outcome,
                "paid": record.amount_paid(),
                "balance": depot.balance(&actor).await,
            })
        );
    }

    let sweep = app.sweep_loop().tick().await;
    let published = app.publisher_loop().publish_once().await;
    tracing::info!(delivered = published.delivered, ?sweep, "simulation finished");

    let status = DepotStatus::collect(depot).await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    if !status.is_healthy() {
        bail!("deposits do not balance after the simulation");
    }
    Ok(())
}

async fn preview(
    config: HaulageConfig,
    region: Option<String>,
    tier: Option<u8>,
    ownership: Ownership,
) -> anyhow::Result<()> {
    let tier = match tier {
        Some(raw) => Some(Tier::new(raw).with_context(|| format!("tier {raw} is out of range"))?),
        None => None,
    };
    let app = build(config, None).await?;
    let context = AcceptContext {
        ownership: ownership.into(),
        shipper_tier: ShipperTier::New,
    };
    for posting in app.depot.listing(region.as_deref(), tier).await {
        let quote = app.depot.preview(posting.job_id, context).await?;
        println!(
            "{}",
            json!({
                "job": posting.job_id,
                "region": posting.region,
                "cargo": posting.cargo,
                "tier": posting.tier,
                "distance": posting.distance,
                "deposit": posting.deposit,
                "amount": quote.amount,
            })
        );
    }
    Ok(())
}

async fn serve(config: HaulageConfig) -> anyhow::Result<()> {
    let app = build(config, None).await?;
    let loops = app.start_loops();
    tracing::info!(loops = loops.len(), "depot running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    loops.shutdown_and_join().await;
    app.depot.checkpoint().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "haulage_core=info,haulage_cli=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Command::Simulate { haulers } => simulate(config, haulers).await,
        Command::Preview {
            region,
            tier,
            ownership,
        } => preview(config, region, tier, ownership).await,
        Command::Serve => serve(config).await,
    }
}
