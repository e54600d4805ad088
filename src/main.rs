mod broadcast;
mod builder;
mod cache;
mod client;
mod collector;
mod collectors;
mod config;
mod http;
mod metrics;
mod snapshot;

use broadcast::Broadcaster;
use cache::SnapshotCache;
use clap::{Parser, Subcommand};
use collector::Collector;
use collectors::lhm::LhmSource;
use collectors::system::{operating_system_info, SystemSource};
use collectors::SensorSource;
use config::{Config, SourceKind};
use metrics::Metrics;
use snapshot::Snapshot;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long open connections get to wind down after Ctrl+C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "hwmond")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the telemetry service (default)
    Serve,
    /// Subscribe to a running service and print every snapshot
    Watch {
        /// Defaults to ws://<stream_listen>/
        #[arg(long)]
        url: Option<String>,
    },
    /// Fetch the current snapshot once
    Poll {
        /// Defaults to http://<poll_listen><poll_path>
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_service(cfg).await,
        Command::Watch { url } => {
            let url = url.unwrap_or_else(|| format!("ws://{}/", cfg.stream_listen));
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = shutdown_tx.send(true);
                }
            });
            client::watch_stream(&url, shutdown_rx, |snapshot| println!("{snapshot}")).await;
        }
        Command::Poll { url } => {
            let url =
                url.unwrap_or_else(|| format!("http://{}{}", cfg.poll_listen, cfg.poll_path));
            match client::poll_once(&url).await {
                Ok(body) => println!("{body}"),
                Err(err) => {
                    error!(url = %url, error = %err, "poll failed");
                    std::process::exit(1);
                }
            }
        }
    }
}

async fn run_service(cfg: Config) {
    let stream_listener = bind_or_exit("stream", &cfg.stream_listen).await;
    let poll_listener = bind_or_exit("poll", &cfg.poll_listen).await;
    let metrics_listener = match &cfg.metrics_listen {
        Some(addr) => Some(bind_or_exit("metrics", addr).await),
        None => None,
    };

    info!(
        stream_listen = %cfg.stream_listen,
        poll_listen = %cfg.poll_listen,
        poll_path = %cfg.poll_path,
        min_cycle_delay_ms = cfg.min_cycle_delay_ms,
        "starting hwmond"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };

    let os_info = operating_system_info();
    let cache = match SnapshotCache::new(Snapshot::empty(os_info.clone())) {
        Ok(cache) => Arc::new(cache),
        Err(err) => {
            error!(error = %err, "failed to encode placeholder snapshot");
            std::process::exit(1);
        }
    };
    let broadcaster = Arc::new(Broadcaster::new(cfg.send_timeout()));
    let source = select_source(cfg.source);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = vec![
        tokio::spawn(http::serve(
            stream_listener,
            http::stream_router(broadcaster.clone()),
            "stream",
            shutdown_rx.clone(),
        )),
        tokio::spawn(http::serve(
            poll_listener,
            http::poll_router(cache.clone(), metrics.clone(), &cfg.poll_path),
            "poll",
            shutdown_rx.clone(),
        )),
    ];
    if let Some(listener) = metrics_listener {
        tasks.push(tokio::spawn(http::serve(
            listener,
            http::metrics_router(metrics.clone()),
            "metrics",
            shutdown_rx.clone(),
        )));
    }

    let collector = Collector::new(
        source,
        os_info,
        cache.clone(),
        broadcaster,
        metrics,
        cfg.min_cycle_delay(),
    );
    tasks.push(tokio::spawn(collector.run(shutdown_rx)));

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("Ctrl+C received, shutting down");

    let _ = shutdown_tx.send(true);

    if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(tasks))
        .await
        .is_err()
    {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "tasks did not stop in time, exiting anyway"
        );
    }
    info!(snapshots = cache.latest().await.sequence, "hwmond stopped");
}

fn load_config(path: &str) -> Result<Config, config::ConfigError> {
    if !Path::new(path).exists() {
        info!(path, "config file not found, using defaults");
        let cfg = Config::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    Config::load_from_file(path)
}

fn select_source(kind: SourceKind) -> Box<dyn SensorSource> {
    match kind {
        SourceKind::Sysinfo => Box::new(SystemSource::new()),
        SourceKind::LibreHardwareMonitor => Box::new(LhmSource::new()),
        SourceKind::Auto => {
            let mut lhm = LhmSource::new();
            match lhm.refresh() {
                Ok(()) => {
                    info!("using LibreHardwareMonitor sensor source");
                    Box::new(lhm)
                }
                Err(err) => {
                    info!(reason = %err, "using sysinfo sensor source");
                    Box::new(SystemSource::new())
                }
            }
        }
    }
}

async fn bind_or_exit(endpoint: &'static str, addr: &str) -> TcpListener {
    match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(endpoint, addr, error = %err, "failed to bind listener");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
