//! epower - electricity price driven home automation runner

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use device_core::{DeviceDrivers, MelCloudConnector, TapoConnector};
use node_engine::{
    validate_settings, CycleRunner, EngineError, FileLock, GraphRepository, JsonFileStore,
    LogicKind, PriceCache, Settings,
};
use price_feed::EntsoeClient;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::Config;

/// State store file inside the data directory
const STATE_FILE: &str = "state.json";

#[derive(Parser)]
#[command(name = "epower")]
#[command(about = "Run the electricity price automation graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one cycle (default)
    Run {
        /// Treat this RFC 3339 instant as "now"
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// List the available logics as JSON
    Logics,
    /// Check settings for a logic
    Validate {
        /// Logic key, e.g. simple_cheapest_hours
        logic: String,
        /// Candidate settings as a JSON object
        settings: String,
        /// Current settings of the node being edited
        #[arg(long)]
        existing: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "epower_runner=info,node_engine=info,price_feed=info,device_core=info,warn".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run { now: None }) {
        Command::Run { now } => run(now.unwrap_or_else(Utc::now)).await,
        Command::Logics => {
            let descriptors: Vec<_> = LogicKind::all().map(LogicKind::descriptor).collect();
            println!("{}", serde_json::to_string_pretty(&descriptors)?);
            Ok(())
        }
        Command::Validate {
            logic,
            settings,
            existing,
        } => validate(&logic, &settings, existing.as_deref()),
    }
}

async fn run(now: DateTime<Utc>) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    tracing::info!("Starting cycle with data directory {:?}", config.data_dir);

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("creating {:?}", config.data_dir))?;

    let store = Arc::new(JsonFileStore::open(config.data_dir.join(STATE_FILE)).await?);
    let graph = Arc::new(GraphRepository::load(&config.data_dir).await?);
    let lock = Arc::new(FileLock::new(&config.data_dir));

    let mut prices = PriceCache::new(store.clone(), config.timezone);
    match config.price_feed() {
        Some((api_key, country_code)) => {
            prices = prices.with_source(Arc::new(EntsoeClient::new(api_key)), country_code);
        }
        None => tracing::warn!("EPOWER_ENTSOE_API_KEY or EPOWER_COUNTRY_CODE not set, prices will not be fetched"),
    }

    let drivers = DeviceDrivers::default()
        .with_plugs(Arc::new(TapoConnector::new()))
        .with_heat_pumps(Arc::new(MelCloudConnector::new(config.melcloud_url.clone())));

    let runner = CycleRunner::new(graph.clone(), graph, store, prices, lock)
        .with_drivers(drivers)
        .with_timezone(config.timezone)
        .with_max_iterations(config.max_iterations)
        .with_lock_timeout(config.lock_timeout);

    let outcome = runner.run_once(now).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn validate(logic: &str, settings: &str, existing: Option<&str>) -> anyhow::Result<()> {
    let kind: LogicKind = logic.parse()?;
    let settings = parse_settings(settings).context("parsing settings")?;
    let existing = existing
        .map(parse_settings)
        .transpose()
        .context("parsing existing settings")?;

    match validate_settings(kind, &settings, existing.as_ref()) {
        Ok(()) => {
            println!("{}", serde_json::json!({ "valid": true }));
            Ok(())
        }
        Err(EngineError::InvalidSettings(errors)) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "valid": false,
                    "errors": errors,
                }))?
            );
            anyhow::bail!("settings for {} were rejected", kind)
        }
        Err(e) => Err(e.into()),
    }
}

fn parse_settings(raw: &str) -> anyhow::Result<Settings> {
    Ok(serde_json::from_str(raw)?)
}
