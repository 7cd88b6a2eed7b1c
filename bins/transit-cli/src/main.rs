//! # Transit CLI - consumer side of the transit pipeline
//!
//! ## Commands
//!
//! - `stream`: project station reference data into the transformed station
//!   table, optionally restoring the table from its changelog first
//! - `weather`: follow the weather topic and keep the latest reading
//!
//! ```bash
//! RUST_LOG=info transit-cli -c transit.yaml stream --restore
//! RUST_LOG=info transit-cli -c transit.yaml weather --earliest
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transit_core::{reference_topic, MessageHandler, MessageSource, TransitSpec, WEATHER_TOPIC};
use transit_io::{
    KafkaReplaySource, PollingConsumer, RegistryClient, TopicProvisioner, WeatherModel,
};
use transit_tx::StationTransformer;

#[derive(Parser, Debug)]
#[clap(name = "transit-cli", about = "Consume transit telemetry from Kafka")]
struct Args {
    /// Transit YAML configuration
    #[arg(short, long, default_value = "transit.yaml")]
    config: PathBuf,

    /// Override broker.bootstrap_servers
    #[arg(short, long)]
    brokers: Option<String>,

    /// Override broker.group_id
    #[arg(short, long)]
    group_id: Option<String>,

    /// Start every assigned partition from the earliest offset
    #[arg(long)]
    earliest: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the station transform
    Stream {
        /// Rebuild the station table from its changelog before consuming
        #[arg(long)]
        restore: bool,
    },
    /// Follow weather updates
    Weather,
}

fn load_spec(args: &Args) -> Result<TransitSpec> {
    let mut spec = TransitSpec::from_path(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(brokers) = &args.brokers {
        spec.broker.bootstrap_servers = brokers.clone();
    }
    if let Some(group_id) = &args.group_id {
        spec.broker.group_id = group_id.clone();
    }
    if args.earliest {
        spec.consumer.offset_earliest = true;
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

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            ctrl_c.cancel();
        }
    });

    let result = match args.command {
        Command::Stream { restore } => stream(&spec, restore, &cancel).await,
        Command::Weather => weather(&spec, &cancel).await,
    };
    if let Err(e) = &result {
        error!("Consumer stopped: {:#}", e);
    }
    result
}

async fn stream(spec: &TransitSpec, restore: bool, cancel: &CancellationToken) -> Result<()> {
    let provisioner = Arc::new(
        TopicProvisioner::connect(&spec.broker).context("failed to create admin client")?,
    );
    let registry = RegistryClient::new(&spec.broker.schema_registry_url)?;
    let mut transformer =
        StationTransformer::connect(&provisioner, &registry, &spec.broker, &spec.topics)
            .await
            .context("failed to set up station transform")?;

    if restore {
        let mut changelog = KafkaReplaySource::open(&spec.broker, transformer.changelog_topic())
            .context("failed to open station changelog")?;
        transformer
            .restore(
                &mut changelog,
                spec.consumer.consume_timeout(),
                spec.consumer.replay_timeout(),
            )
            .context("failed to restore station table")?;
        changelog.close()?;
    }

    let source_topic = reference_topic(&spec.topics.prefix);
    info!(
        "Transforming {} into {}",
        source_topic,
        transformer.changelog_topic()
    );
    let mut consumer =
        PollingConsumer::subscribe(&spec.broker, &spec.consumer, &source_topic, transformer)?;
    let result = run_until_cancelled(&mut consumer, cancel).await;

    consumer.handler().close()?;
    info!("{} stations in table", consumer.handler().table().len());
    consumer.close()?;
    result
}

async fn weather(spec: &TransitSpec, cancel: &CancellationToken) -> Result<()> {
    let mut consumer = PollingConsumer::subscribe(
        &spec.broker,
        &spec.consumer,
        WEATHER_TOPIC,
        WeatherModel::new()?,
    )?;
    let result = run_until_cancelled(&mut consumer, cancel).await;

    let model = consumer.handler();
    info!(
        "Last weather: {} degrees, {} ({} updates)",
        model.temperature,
        model.status,
        model.updates()
    );
    consumer.close()?;
    result
}

async fn run_until_cancelled<S, H>(
    consumer: &mut PollingConsumer<S, H>,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: MessageSource,
    H: MessageHandler,
{
    let pattern = consumer.pattern().to_string();
    tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        outcome = consumer.consume() => match outcome {
            Ok(never) => match never {},
            Err(e) => Err(e).with_context(|| format!("consumer for {pattern} failed")),
        },
    }
}
