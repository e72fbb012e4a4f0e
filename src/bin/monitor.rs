use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sensor_alerting::{
    config::{Config, StorageConfig, TransportKind, read_config_file},
    delivery::{
        LoggingHandler, Transport,
        http::HttpBridgeTransport,
        local::LocalBroker,
        mqtt::{Endpoint, MqttTransport},
    },
    monitor::{Monitor, MonitorSettings},
    storage::{MemoryStore, ReadingStore},
    util::get_log_level,
};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON); built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Log level, overrides LOG_LEVEL
    #[arg(long)]
    log_level: Option<LevelFilter>,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("sensor_alerting", level),
        ("sensor_monitor", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => read_config_file(path)?,
        None => {
            debug!("no config file given, using defaults");
            Config::default()
        }
    };

    config.apply_env_overrides();
    config.validate().context("invalid configuration")?;

    Ok(config)
}

fn build_transport(config: &Config) -> anyhow::Result<Arc<dyn Transport>> {
    match config.broker.transport {
        TransportKind::Local => {
            warn!("using the in-process broker, messages will not leave this process");
            Ok(Arc::new(LocalBroker::new()))
        }
        TransportKind::Mqtt => {
            let url = config
                .broker
                .url
                .as_deref()
                .context("the mqtt transport requires a broker url")?;
            let endpoint = Endpoint::parse(url)?;
            info!("using MQTT broker at {}:{}", endpoint.host, endpoint.port);
            Ok(Arc::new(MqttTransport::new(
                endpoint,
                config.broker.client_id(),
                config.broker.keepalive(),
            )))
        }
        TransportKind::Http => {
            let url = config
                .broker
                .url
                .clone()
                .context("the http transport requires a broker url")?;
            info!("using HTTP bridge at {url}");
            let transport = HttpBridgeTransport::new(url, config.broker.keepalive())?;
            Ok(Arc::new(transport))
        }
    }
}

#[instrument(skip_all)]
async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn ReadingStore>> {
    let store: Arc<dyn ReadingStore> = match &config.storage {
        StorageConfig::None => {
            info!("using in-memory storage, readings will not be persisted");
            Arc::new(MemoryStore::new())
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            let store = sensor_alerting::storage::sqlite::SqliteStore::init(path)
                .await
                .with_context(|| format!("failed to open database {}", path.display()))?;
            Arc::new(store)
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            warn!("built without sqlite support, falling back to in-memory storage");
            Arc::new(MemoryStore::new())
        }
    };

    let health = store.health_check().await?;
    if health.healthy {
        debug!("storage health: {}", health.message);
    } else {
        warn!("storage unhealthy: {}", health.message);
    }

    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    init(args.log_level.unwrap_or_else(get_log_level));
    trace!("started with args: {args:?}");

    let config = load_config(&args)?;
    let transport = build_transport(&config)?;
    let store = build_store(&config).await?;

    let mut monitor = Monitor::new(
        transport,
        store.clone(),
        MonitorSettings::from_config(&config),
    );
    for sensor in &config.sensors {
        monitor.add_sensor(sensor.id.clone(), sensor.location.clone())?;
    }
    monitor.register_handler(Arc::new(LoggingHandler)).await;

    if let Err(e) = monitor.start().await {
        error!("monitoring did not start: {e}");
        return Err(e.into());
    }

    let mut heartbeat = interval(Duration::from_secs(config.cadence.heartbeat_secs));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let stats = monitor.stats();
                info!(
                    connected = monitor.is_connected(),
                    cycles = stats.cycles,
                    published = stats.readings_published,
                    dropped = stats.readings_dropped,
                    alerts = stats.alerts_raised,
                    "heartbeat"
                );
                if let Err(e) = monitor.publish_heartbeat().await {
                    debug!("heartbeat not published: {e}");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("failed to listen for ctrl-c: {e}");
                }
                info!("interrupt received, shutting down");
                break;
            }
        }
    }

    monitor.stop().await?;

    match serde_json::to_string(&monitor.stats()) {
        Ok(stats) => info!("final statistics: {stats}"),
        Err(e) => warn!("could not encode statistics: {e}"),
    }

    match store.get_stats().await {
        Ok(stats) => info!("{stats}"),
        Err(e) => warn!("could not read storage stats: {e}"),
    }

    Ok(())
}
