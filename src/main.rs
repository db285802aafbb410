use chrono::{Duration, NaiveDate, TimeZone, Utc};
use clap::Parser;
use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{oneshot, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vitalwatch::acquisition::open_source;
use vitalwatch::alerting::{AlertDispatcher, SimulatedIndicator};
use vitalwatch::analysis::ThresholdClassifier;
use vitalwatch::api::RestApi;
use vitalwatch::config::{load_config, Config};
use vitalwatch::storage::{before_now, export, StorageEngine, TimeRange, VitalStore};
use vitalwatch::MonitorLoop;

#[derive(Parser, Debug)]
#[command(name = "vitalwatch", version, about = "Vital-sign monitoring and alerting")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Check the configuration and exit
    #[arg(long)]
    validate_config: bool,

    /// Print stored status and exit
    #[arg(long)]
    status: bool,

    /// Export stored readings to CSV and exit
    #[arg(long)]
    export: bool,

    /// First day to export (YYYY-MM-DD)
    #[arg(long, requires = "export")]
    start_date: Option<NaiveDate>,

    /// Last day to export (YYYY-MM-DD)
    #[arg(long, requires = "export")]
    end_date: Option<NaiveDate>,

    #[arg(long, default_value = "vitals_export.csv")]
    output: PathBuf,

    /// Send a test alert through every channel and exit
    #[arg(long)]
    test_alerts: bool,

    /// Delete stored records older than --days and exit
    #[arg(long)]
    cleanup: bool,

    #[arg(long, default_value_t = 30)]
    days: i64,

    /// Serve the API even if it is disabled in the configuration
    #[arg(long)]
    web: bool,

    #[arg(long)]
    port: Option<u16>,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "vitalwatch=debug" } else { "vitalwatch=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

fn read_config(path: &Path) -> Result<Config, Box<dyn Error>> {
    let config = if path.exists() {
        load_config(path)?
    } else {
        tracing::warn!(path = %path.display(), "Configuration file not found, using defaults");
        Config::default()
    };
    config.validate()?;
    Ok(config)
}

fn print_status(store: &dyn VitalStore) -> Result<(), Box<dyn Error>> {
    let last = store.query_readings(&TimeRange::all(), Some(1))?;
    match last.first() {
        Some(reading) => {
            println!("Last reading: {}", reading.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
            if let Some(hr) = reading.heart_rate {
                println!("  Heart rate:  {} bpm", hr);
            }
            if let Some(spo2) = reading.spo2 {
                println!("  SpO2:        {}%", spo2);
            }
            if let Some(temp) = reading.temperature {
                println!("  Temperature: {:.1}°{}", temp, reading.temperature_unit);
            }
        }
        None => println!("No readings stored"),
    }

    let day = TimeRange::last_hours(24)?;
    let stats = store.statistics(&day)?;
    let alerts = store.query_alerts(&day, None, None)?;
    println!("Readings in the last 24h: {}", stats.count);
    println!("Alerts in the last 24h: {}", alerts.len());
    for alert in alerts.iter().take(5) {
        println!(
            "  [{}] {} {}",
            alert.event.timestamp.format("%H:%M:%S"),
            alert.event.severity.as_str().to_uppercase(),
            alert.event.message
        );
    }
    Ok(())
}

fn export_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> TimeRange {
    let start = start
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt));
    let end = end
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|dt| Utc.from_utc_datetime(&dt));
    TimeRange { start, end }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = read_config(&args.config)?;
    if args.validate_config {
        println!("Configuration is valid");
        return Ok(());
    }

    let storage = Arc::new(StorageEngine::open(&config.storage.path)?);
    let store: Arc<dyn VitalStore> = storage.clone();

    if args.status {
        return print_status(store.as_ref());
    }

    if args.export {
        let range = export_range(args.start_date, args.end_date);
        let mut writer = BufWriter::new(File::create(&args.output)?);
        let rows = export::export_csv(store.as_ref(), &mut writer, &range)?;
        println!("Exported {} readings to {}", rows, args.output.display());
        return Ok(());
    }

    if args.cleanup {
        if args.days < 1 {
            return Err(format!("--days must be at least 1, got {}", args.days).into());
        }
        let cutoff = before_now(Duration::try_days(args.days))?;
        let removed = store.cleanup_before(cutoff)?;
        println!("Removed {} records older than {} days", removed, args.days);
        return Ok(());
    }

    let indicator = Arc::new(SimulatedIndicator::default());
    let dispatcher = AlertDispatcher::from_config(&config.alerts, indicator);

    let source = open_source(&config.sensors)?;
    let monitor = MonitorLoop::new(
        source,
        ThresholdClassifier::new(config.thresholds.clone()),
        dispatcher,
        Arc::clone(&store),
        &config.monitor,
    );
    let handle = monitor.handle();

    if args.test_alerts {
        let outcome = monitor.send_test_alert().await;
        for (channel, delivered) in outcome.iter() {
            println!("{:<6} {}", channel, if delivered { "delivered" } else { "not delivered" });
        }
        storage.flush_all()?;
        return Ok(());
    }

    // Create channels for shutdown signals
    let (monitor_tx, monitor_rx) = watch::channel(false);
    let monitor_task = tokio::spawn(monitor.run(monitor_rx));

    let mut server_shutdown = None;
    let mut server_task = None;
    if config.api.enabled || args.web {
        let port = args.port.unwrap_or(config.api.port);
        let addr: SocketAddr = format!("{}:{}", config.api.host, port).parse()?;
        let api = RestApi::new(handle.clone(), Arc::clone(&store));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (bound, server) = warp::serve(api.routes())
            .try_bind_with_graceful_shutdown(addr, async move {
                shutdown_rx.await.ok();
                tracing::info!("Shutting down API server");
            })?;
        tracing::info!(%bound, "API server listening");

        server_shutdown = Some(shutdown_tx);
        server_task = Some(tokio::spawn(server));
    }

    // Wait for Ctrl+C
    signal::ctrl_c().await?;
    tracing::info!("Ctrl+C received, starting graceful shutdown");

    monitor_tx.send(true).ok();
    if let Some(tx) = server_shutdown {
        tx.send(()).ok();
    }

    monitor_task.await?;
    if let Some(task) = server_task {
        task.await?;
    }

    tracing::info!(state = %handle.state(), "Shutdown complete");
    Ok(())
}
