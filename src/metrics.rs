use crate::monitor::CycleReport;
use crate::state::{ServerStatistics, ServerStatus};
use prometheus::core::Collector;
use prometheus::{
    opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub srvmond_cycles_total: Counter,
    pub srvmond_last_cycle_duration_seconds: Gauge,
    pub srvmond_last_cycle_timestamp_seconds: Gauge,
    pub srvmond_last_cycle_servers: GaugeVec,
    pub srvmond_servers: GaugeVec,
    pub srvmond_checks_total: CounterVec,
    pub srvmond_probe_errors_total: Counter,
    pub srvmond_collect_errors_total: CounterVec,
    pub srvmond_commands_total: CounterVec,
    pub srvmond_uptime_seconds: Gauge,
    pub srvmond_scrape_count_total: Counter,
}

impl Metrics {
    pub fn new(started_at_unix: i64) -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let srvmond_cycles_total = Counter::with_opts(opts!(
            "srvmond_cycles_total",
            "Completed monitoring cycles"
        ))?;
        let srvmond_last_cycle_duration_seconds = Gauge::with_opts(opts!(
            "srvmond_last_cycle_duration_seconds",
            "Wall time of the last monitoring cycle"
        ))?;
        let srvmond_last_cycle_timestamp_seconds = Gauge::with_opts(opts!(
            "srvmond_last_cycle_timestamp_seconds",
            "Unix time when the last monitoring cycle finished"
        ))?;
        let srvmond_last_cycle_servers = GaugeVec::new(
            opts!(
                "srvmond_last_cycle_servers",
                "Servers per outcome in the last monitoring cycle"
            ),
            &["outcome"],
        )?;
        let srvmond_servers = GaugeVec::new(
            opts!("srvmond_servers", "Registered servers by current status"),
            &["status"],
        )?;
        let srvmond_checks_total = CounterVec::new(
            opts!("srvmond_checks_total", "Finished server checks by resulting status"),
            &["status"],
        )?;
        let srvmond_probe_errors_total = Counter::with_opts(opts!(
            "srvmond_probe_errors_total",
            "Probes that failed to run (bad address, missing ping binary)"
        ))?;
        let srvmond_collect_errors_total = CounterVec::new(
            opts!(
                "srvmond_collect_errors_total",
                "Remote metric collection failures by metric or connection"
            ),
            &["kind"],
        )?;
        let srvmond_commands_total = CounterVec::new(
            opts!("srvmond_commands_total", "Remote commands by kind and result"),
            &["kind", "result"],
        )?;
        let srvmond_uptime_seconds = Gauge::with_opts(opts!(
            "srvmond_uptime_seconds",
            "Seconds since the service started"
        ))?;
        let srvmond_scrape_count_total = Counter::with_opts(opts!(
            "srvmond_scrape_count_total",
            "Scrapes of the /metrics endpoint"
        ))?;

        register(&registry, &srvmond_cycles_total)?;
        register(&registry, &srvmond_last_cycle_duration_seconds)?;
        register(&registry, &srvmond_last_cycle_timestamp_seconds)?;
        register(&registry, &srvmond_last_cycle_servers)?;
        register(&registry, &srvmond_servers)?;
        register(&registry, &srvmond_checks_total)?;
        register(&registry, &srvmond_probe_errors_total)?;
        register(&registry, &srvmond_collect_errors_total)?;
        register(&registry, &srvmond_commands_total)?;
        register(&registry, &srvmond_uptime_seconds)?;
        register(&registry, &srvmond_scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            started_at_unix,
            srvmond_cycles_total,
            srvmond_last_cycle_duration_seconds,
            srvmond_last_cycle_timestamp_seconds,
            srvmond_last_cycle_servers,
            srvmond_servers,
            srvmond_checks_total,
            srvmond_probe_errors_total,
            srvmond_collect_errors_total,
            srvmond_commands_total,
            srvmond_uptime_seconds,
            srvmond_scrape_count_total,
        }))
    }

    pub fn observe_cycle(&self, report: &CycleReport, elapsed: Duration, finished_at_unix: i64) {
        self.srvmond_cycles_total.inc();
        self.srvmond_last_cycle_duration_seconds
            .set(elapsed.as_secs_f64());
        self.srvmond_last_cycle_timestamp_seconds
            .set(finished_at_unix as f64);
        for (outcome, count) in [
            ("checked", report.checked),
            ("online", report.online),
            ("offline", report.offline),
            ("error", report.error),
        ] {
            self.srvmond_last_cycle_servers
                .with_label_values(&[outcome])
                .set(count as f64);
        }
    }

    pub fn set_server_counts(&self, stats: &ServerStatistics) {
        for status in ServerStatus::ALL {
            self.srvmond_servers
                .with_label_values(&[status.as_str()])
                .set(stats.count(status) as f64);
        }
    }

    pub fn inc_check(&self, status: ServerStatus) {
        self.srvmond_checks_total
            .with_label_values(&[status.as_str()])
            .inc();
    }

    pub fn inc_probe_error(&self) {
        self.srvmond_probe_errors_total.inc();
    }

    pub fn inc_collect_error(&self, kind: &str) {
        self.srvmond_collect_errors_total
            .with_label_values(&[kind])
            .inc();
    }

    pub fn inc_command(&self, kind: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.srvmond_commands_total
            .with_label_values(&[kind, result])
            .inc();
    }

    pub fn inc_scrape_count(&self) {
        self.srvmond_scrape_count_total.inc();
    }

    pub fn refresh_uptime(&self, now_unix: i64) {
        let uptime = now_unix.saturating_sub(self.started_at_unix).max(0) as f64;
        self.srvmond_uptime_seconds.set(uptime);
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
