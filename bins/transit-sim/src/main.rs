//! # Transit Sim - synthetic transit telemetry producer
//!
//! Provisions the turnstile and weather topics, optionally registers the
//! station connector with Kafka Connect, and then publishes turnstile entries
//! and weather readings on a simulated clock until interrupted or until
//! `max_ticks` ticks have run.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Run the configured stations in July
//! transit-sim -c transit.yaml --month 6
//!
//! # Ten ticks, weather through the REST proxy
//! transit-sim -c transit.yaml --max-ticks 10 --weather-via-rest
//! ```

mod clock;

use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transit_core::TransitSpec;
use transit_io::{
    ConnectorClient, HourlyRidership, RegistryClient, RestProxyProducer, TopicProvisioner,
    Turnstile, Weather, WeatherTransport,
};

use crate::clock::SimulationClock;

#[derive(Parser, Debug)]
#[clap(
    name = "transit-sim",
    about = "Publish synthetic turnstile and weather events to Kafka"
)]
struct Args {
    /// Transit YAML configuration
    #[arg(short, long, default_value = "transit.yaml")]
    config: PathBuf,

    /// Override broker.bootstrap_servers
    #[arg(short, long)]
    brokers: Option<String>,

    /// Override simulation.month (zero-based)
    #[arg(long)]
    month: Option<u32>,

    /// Override simulation.max_ticks
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Send weather through the REST proxy
    #[arg(long)]
    weather_via_rest: bool,
}

fn load_spec(args: &Args) -> Result<TransitSpec> {
    let mut spec = TransitSpec::from_path(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(brokers) = &args.brokers {
        spec.broker.bootstrap_servers = brokers.clone();
    }
    if let Some(month) = args.month {
        spec.simulation.month = month;
    }
    if args.max_ticks.is_some() {
        spec.simulation.max_ticks = args.max_ticks;
    }
    if args.weather_via_rest {
        spec.simulation.weather_via_rest = true;
    }
    spec.validate().context("invalid configuration")?;
    Ok(spec)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let spec = load_spec(&args)?;
    info!(
        stations = spec.stations.len(),
        month = spec.simulation.month,
        "Starting transit simulation"
    );

    if let Some(connect) = &spec.connect {
        let status = ConnectorClient::new(connect.clone(), &spec.topics)?
            .ensure()
            .await
            .context("failed to register station connector")?;
        info!("Station connector: {:?}", status);
    }

    let provisioner = Arc::new(
        TopicProvisioner::connect(&spec.broker).context("failed to create admin client")?,
    );
    let registry = RegistryClient::new(&spec.broker.schema_registry_url)?;

    let mut clock = SimulationClock::starting_in(
        Utc::now().year(),
        spec.simulation.month,
        spec.simulation.time_step(),
    )
    .ok_or_else(|| anyhow!("cannot start clock in month {}", spec.simulation.month))?;

    let mut turnstiles = Vec::with_capacity(spec.stations.len());
    for station in &spec.stations {
        let rate = Box::new(HourlyRidership::new(station.daily_entries));
        let turnstile = Turnstile::connect(
            station.clone(),
            &provisioner,
            &registry,
            &spec.broker,
            &spec.topics,
            rate,
        )
        .await
        .with_context(|| format!("failed to set up turnstile for {}", station.name))?;
        turnstiles.push(turnstile);
    }

    let transport = match (&spec.rest_proxy_url, spec.simulation.weather_via_rest) {
        (Some(url), true) => WeatherTransport::RestProxy(RestProxyProducer::new(url)?),
        _ => WeatherTransport::Broker,
    };
    let mut weather = Weather::connect(
        clock.month(),
        &provisioner,
        &registry,
        &spec.broker,
        &spec.topics,
        transport,
    )
    .await
    .context("failed to set up weather source")?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            ctrl_c.cancel();
        }
    });

    let result = run(&spec, &mut clock, &mut turnstiles, &mut weather, &cancel).await;

    // Flush whatever was enqueued, even after a failed tick.
    for turnstile in &turnstiles {
        if let Err(e) = turnstile.close() {
            warn!("Failed to flush {}: {}", turnstile.topic(), e);
        }
    }
    if let Err(e) = weather.close() {
        warn!("Failed to flush weather producer: {}", e);
    }

    if let Err(e) = &result {
        error!("Simulation stopped: {:#}", e);
    }
    result
}

async fn run(
    spec: &TransitSpec,
    clock: &mut SimulationClock,
    turnstiles: &mut [Turnstile],
    weather: &mut Weather,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut ticks = 0u64;
    loop {
        if spec.simulation.max_ticks.is_some_and(|max| ticks >= max) {
            info!(ticks, "Reached configured tick limit");
            return Ok(());
        }

        let now = clock.now();
        let mut entries = 0u32;
        for turnstile in turnstiles.iter_mut() {
            entries += turnstile
                .run(now, clock.time_step())
                .with_context(|| format!("turnstile {} failed", turnstile.station().name))?;
        }
        let reading = weather
            .run(clock.month())
            .await
            .context("weather source failed")?;
        info!(
            at = %now,
            entries,
            temperature = reading.temperature,
            "Simulation tick"
        );

        clock.advance();
        ticks += 1;

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(spec.simulation.tick_interval()) => {}
        }
    }
}
