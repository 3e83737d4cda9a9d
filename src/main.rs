mod clock;
mod collectors;
mod config;
mod error;
mod executor;
mod http;
mod metrics;
mod monitor;
mod registry;
mod state;
#[cfg(test)]
mod testing;

use axum::serve;
use clap::Parser;
use clock::{Clock, SystemClock};
use collectors::probe::PingProber;
use collectors::remote::MetricsCollector;
use collectors::session::{ProcessSessionFactory, SessionFactory, SessionTimeouts};
use config::Config;
use executor::CommandExecutor;
use http::HttpAppState;
use metrics::Metrics;
use monitor::StatusMonitor;
use registry::{MemoryRegistry, ServerRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "srvmond")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Overrides `listen` from the config file.
    #[arg(long)]
    listen: Option<String>,
    /// Overrides `monitor.interval_secs`.
    #[arg(long)]
    interval_secs: Option<u64>,
    /// Runs a single monitoring cycle, prints the report as JSON and exits.
    #[arg(long)]
    check_once: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
    }
    if let Some(interval) = cli.interval_secs {
        cfg.monitor.interval_secs = interval;
    }
    if let Err(err) = cfg.validate() {
        error!(error = %err, "некорректные параметры командной строки");
        std::process::exit(1);
    }

    info!(
        listen = %cfg.listen,
        interval_secs = cfg.monitor.interval_secs,
        "запуск srvmond"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = match Metrics::new(clock.now_unix()) {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };

    let registry: Arc<dyn ServerRegistry> = match &cfg.storage.data_file {
        Some(path) => {
            match MemoryRegistry::open(path, clock.clone(), cfg.monitor.default_platform).await {
                Ok(registry) => Arc::new(registry),
                Err(err) => {
                    error!(error = %err, path = %path, "не удалось открыть реестр серверов");
                    std::process::exit(1);
                }
            }
        }
        None => Arc::new(MemoryRegistry::new(
            clock.clone(),
            cfg.monitor.default_platform,
        )),
    };

    let sessions: Arc<dyn SessionFactory> = Arc::new(ProcessSessionFactory::new(
        cfg.transport.clone(),
        SessionTimeouts::from(&cfg.monitor),
    ));
    let monitor = Arc::new(StatusMonitor::new(
        registry.clone(),
        Arc::new(PingProber::new(cfg.transport.ping_binary.clone())),
        MetricsCollector::new(sessions.clone(), clock.clone()),
        clock.clone(),
        metrics.clone(),
        &cfg.monitor,
    ));
    let executor = Arc::new(CommandExecutor::new(
        registry.clone(),
        sessions,
        metrics.clone(),
    ));

    if cli.check_once {
        match monitor.check_all().await {
            Ok(report) => match serde_json::to_string_pretty(&report) {
                Ok(text) => println!("{text}"),
                Err(err) => error!(error = %err, "не удалось сериализовать отчёт"),
            },
            Err(err) => {
                error!(error = %err, "цикл мониторинга не выполнен");
                std::process::exit(1);
            }
        }
        return;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let state = HttpAppState {
            registry,
            monitor: monitor.clone(),
            executor,
            metrics,
            clock,
            check_on_create: cfg.monitor.check_on_create,
        };
        let listen = cfg.listen.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(state);
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "некорректный адрес listen");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "не удалось запустить HTTP-сервер");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "ошибка HTTP-сервера");
            }
        })
    };

    let monitor_task = tokio::spawn(monitor.run(shutdown_rx));

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");

    let _ = shutdown_tx.send(true);

    let _ = monitor_task.await;
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
