use crate::clock::Clock;
use crate::collectors::probe::{ProbeOutcome, Prober};
use crate::collectors::remote::{Collection, MetricsCollector};
use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::metrics::Metrics;
use crate::registry::ServerRegistry;
use crate::state::{ServerPatch, ServerStatus};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub checked: usize,
    pub online: usize,
    pub offline: usize,
    pub error: usize,
}

impl CycleReport {
    fn record(&mut self, status: ServerStatus) {
        self.checked += 1;
        match status {
            ServerStatus::Online => self.online += 1,
            ServerStatus::Offline => self.offline += 1,
            _ => self.error += 1,
        }
    }
}

pub struct StatusMonitor {
    registry: Arc<dyn ServerRegistry>,
    prober: Arc<dyn Prober>,
    collector: MetricsCollector,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    probe_timeout: Duration,
    interval: Duration,
}

impl StatusMonitor {
    pub fn new(
        registry: Arc<dyn ServerRegistry>,
        prober: Arc<dyn Prober>,
        collector: MetricsCollector,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        cfg: &MonitorConfig,
    ) -> Self {
        Self {
            registry,
            prober,
            collector,
            clock,
            metrics,
            probe_timeout: cfg.probe_timeout(),
            interval: cfg.interval(),
        }
    }

    /// Runs one full check of a server and returns the status it ended in.
    ///
    /// `Checking` is persisted before any network activity. Registry failures
    /// are logged and leave the server in `Error`; only an unknown id is
    /// reported as an error to the caller.
    pub async fn check_server(&self, id: u64) -> Result<ServerStatus, MonitorError> {
        let checking = ServerPatch::checking(self.clock.now_unix());
        let record = match self.registry.update(id, checking).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(MonitorError::NotFound(id)),
            Err(err) => {
                error!(server_id = id, error = %err, "не удалось отметить начало проверки");
                return Ok(self.mark_error(id).await);
            }
        };

        let outcome = self.prober.probe(&record.address, self.probe_timeout).await;
        let (status, metrics) = match outcome {
            ProbeOutcome::Reachable if record.has_credentials() => {
                let collection = self.collector.collect(&record).await;
                self.count_collect_errors(&collection);
                (ServerStatus::Online, Some(collection.metrics))
            }
            ProbeOutcome::Reachable => (ServerStatus::Online, None),
            ProbeOutcome::Unreachable => {
                debug!(server_id = id, address = %record.address, "сервер недоступен");
                (ServerStatus::Offline, None)
            }
            ProbeOutcome::Error(reason) => {
                warn!(
                    server_id = id,
                    address = %record.address,
                    reason = %reason,
                    "проверка доступности не выполнена"
                );
                self.metrics.inc_probe_error();
                (ServerStatus::Offline, None)
            }
        };

        let patch = ServerPatch::status(status).with_metrics(metrics);
        match self.registry.update(id, patch).await {
            Ok(Some(_)) => {
                self.metrics.inc_check(status);
                debug!(server_id = id, status = status.as_str(), "проверка завершена");
                Ok(status)
            }
            Ok(None) => {
                debug!(server_id = id, "сервер удалён во время проверки");
                Err(MonitorError::NotFound(id))
            }
            Err(err) => {
                error!(server_id = id, error = %err, "не удалось сохранить результат проверки");
                Ok(self.mark_error(id).await)
            }
        }
    }

    /// Checks every registered server concurrently and waits for all of them.
    pub async fn check_all(self: &Arc<Self>) -> Result<CycleReport, MonitorError> {
        let started = Instant::now();
        let servers = self.registry.all().await?;

        let handles: Vec<(u64, JoinHandle<Result<ServerStatus, MonitorError>>)> = servers
            .iter()
            .map(|server| {
                let monitor = Arc::clone(self);
                let id = server.id;
                (id, tokio::spawn(async move { monitor.check_server(id).await }))
            })
            .collect();

        let mut report = CycleReport::default();
        for (id, handle) in handles {
            match handle.await {
                Ok(Ok(status)) => report.record(status),
                Ok(Err(MonitorError::NotFound(_))) => {
                    debug!(server_id = id, "сервер удалён до завершения цикла");
                }
                Ok(Err(err)) => {
                    error!(server_id = id, error = %err, "проверка сервера завершилась ошибкой");
                    report.record(ServerStatus::Error);
                }
                Err(join_err) => {
                    error!(server_id = id, error = %join_err, "задача проверки сервера прервана");
                    report.record(self.mark_error(id).await);
                }
            }
        }

        let elapsed = started.elapsed();
        self.metrics
            .observe_cycle(&report, elapsed, self.clock.now_unix());
        match self.registry.statistics().await {
            Ok(stats) => self.metrics.set_server_counts(&stats),
            Err(err) => warn!(error = %err, "не удалось получить статистику реестра"),
        }
        info!(
            checked = report.checked,
            online = report.online,
            offline = report.offline,
            error = report.error,
            elapsed_ms = elapsed.as_millis() as u64,
            "цикл мониторинга завершён"
        );
        Ok(report)
    }

    /// Runs a cycle immediately, then one per interval measured from the end
    /// of the previous cycle, until `shutdown` turns true or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "мониторинг запущен");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.check_all().await {
                error!(error = %err, "цикл мониторинга не выполнен");
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.clock.sleep(self.interval) => {}
            }
        }
        info!("мониторинг остановлен");
    }

    async fn mark_error(&self, id: u64) -> ServerStatus {
        if let Err(err) = self
            .registry
            .update(id, ServerPatch::status(ServerStatus::Error))
            .await
        {
            error!(server_id = id, error = %err, "не удалось сохранить статус error");
        }
        self.metrics.inc_check(ServerStatus::Error);
        ServerStatus::Error
    }

    fn count_collect_errors(&self, collection: &Collection) {
        if collection.connection_error.is_some() {
            self.metrics.inc_collect_error("connection");
        }
        for result in &collection.results {
            if result.outcome.is_err() {
                self.metrics.inc_collect_error(result.kind.as_str());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::session::SessionFactory;
    use crate::collectors::MetricKind;
    use crate::registry::MemoryRegistry;
    use crate::state::{CreateServerRequest, Platform, ServerMetrics};
    use crate::testing::{FakeProber, FakeSessions, ManualClock, RecordingRegistry};

    struct Harness {
        registry: Arc<RecordingRegistry<MemoryRegistry>>,
        prober: Arc<FakeProber>,
        sessions: Arc<FakeSessions>,
        clock: Arc<ManualClock>,
        monitor: Arc<StatusMonitor>,
    }

    fn harness(prober: Arc<FakeProber>) -> Harness {
        let clock = ManualClock::new(1_700_000_000);
        let registry = RecordingRegistry::new(MemoryRegistry::new(clock.clone(), Platform::Linux));
        let sessions = FakeSessions::new();
        let factory: Arc<dyn SessionFactory> = sessions.clone();
        let collector = MetricsCollector::new(factory, clock.clone());
        let metrics = Metrics::new(0).expect("инициализация метрик");
        let monitor = Arc::new(StatusMonitor::new(
            registry.clone(),
            prober.clone(),
            collector,
            clock.clone(),
            metrics,
            &MonitorConfig::default(),
        ));
        Harness {
            registry,
            prober,
            sessions,
            clock,
            monitor,
        }
    }

    async fn add(h: &Harness, name: &str, username: Option<&str>) -> u64 {
        h.registry
            .insert(CreateServerRequest {
                name: name.to_string(),
                address: format!("{name}.corp.local"),
                port: 22,
                description: String::new(),
                platform: None,
                username: username.map(str::to_string),
                password: Some("secret".to_string()),
                private_key_path: None,
                tags: String::new(),
            })
            .await
            .expect("insert")
            .id
    }

    #[tokio::test]
    async fn unreachable_server_goes_offline_and_keeps_metrics() {
        let h = harness(FakeProber::new(ProbeOutcome::Unreachable));
        let id = add(&h, "db", Some("root")).await;
        let previous = ServerMetrics {
            cpu_usage: Some("12%".to_string()),
            ..ServerMetrics::default()
        };
        h.registry
            .update(id, ServerPatch::default().with_metrics(Some(previous.clone())))
            .await
            .expect("update");

        let status = h.monitor.check_server(id).await.expect("check");

        assert_eq!(status, ServerStatus::Offline);
        let record = h.registry.get(id).await.expect("get").expect("record");
        assert_eq!(record.status, ServerStatus::Offline);
        assert_eq!(record.metrics, previous);
        assert_eq!(record.last_checked, Some(1_700_000_000));
        assert_eq!(h.sessions.opened(), 0);
    }

    #[tokio::test]
    async fn probe_error_is_offline() {
        let prober = FakeProber::new(ProbeOutcome::Reachable);
        let h = harness(prober);
        let id = add(&h, "bad", None).await;
        h.prober
            .set("bad.corp.local", ProbeOutcome::Error("некорректный адрес".to_string()));

        assert_eq!(h.monitor.check_server(id).await.expect("check"), ServerStatus::Offline);
    }

    #[tokio::test]
    async fn reachable_without_credentials_is_online_without_session() {
        let h = harness(FakeProber::new(ProbeOutcome::Reachable));
        let id = add(&h, "web", None).await;

        assert_eq!(h.monitor.check_server(id).await.expect("check"), ServerStatus::Online);
        assert_eq!(h.sessions.opened(), 0);
        let record = h.registry.get(id).await.expect("get").expect("record");
        assert!(record.metrics.is_empty());
    }

    #[tokio::test]
    async fn partial_metrics_are_merged_and_server_is_online() {
        let h = harness(FakeProber::new(ProbeOutcome::Reachable));
        let id = add(&h, "app", Some("root")).await;
        h.registry
            .update(
                id,
                ServerPatch::default().with_metrics(Some(ServerMetrics {
                    memory_usage: Some("50.0%".to_string()),
                    ..ServerMetrics::default()
                })),
            )
            .await
            .expect("update");
        h.sessions
            .set_metric(Platform::Linux, MetricKind::Cpu, Ok("37.2%"));
        h.sessions
            .set_metric(Platform::Linux, MetricKind::Memory, Err("timeout"));

        assert_eq!(h.monitor.check_server(id).await.expect("check"), ServerStatus::Online);
        let record = h.registry.get(id).await.expect("get").expect("record");
        assert_eq!(record.metrics.cpu_usage.as_deref(), Some("37.2%"));
        assert_eq!(record.metrics.memory_usage.as_deref(), Some("50.0%"));
    }

    async fn seed_metrics(h: &Harness, id: u64) -> ServerMetrics {
        let previous = ServerMetrics {
            cpu_usage: Some("12.5%".to_string()),
            uptime: Some("3д 4ч 5м".to_string()),
            ..ServerMetrics::default()
        };
        h.registry
            .update(id, ServerPatch::default().with_metrics(Some(previous.clone())))
            .await
            .expect("update");
        previous
    }

    #[tokio::test]
    async fn connection_failure_still_online() {
        let h = harness(FakeProber::new(ProbeOutcome::Reachable));
        let id = add(&h, "app", Some("root")).await;
        let previous = seed_metrics(&h, id).await;
        h.sessions.fail_connect("auth failed");

        assert_eq!(h.monitor.check_server(id).await.expect("check"), ServerStatus::Online);
        assert_eq!(h.sessions.opened(), 1);
        let record = h.registry.get(id).await.expect("get").expect("record");
        assert_eq!(record.status, ServerStatus::Online);
        assert_eq!(record.metrics, previous);
    }

    #[tokio::test]
    async fn checking_is_persisted_before_terminal_status() {
        let h = harness(FakeProber::new(ProbeOutcome::Reachable));
        let id = add(&h, "app", None).await;

        h.monitor.check_server(id).await.expect("check");

        assert_eq!(
            h.registry.statuses(id),
            vec![ServerStatus::Checking, ServerStatus::Online]
        );
    }

    #[tokio::test]
    async fn unknown_server_is_not_found_without_probe() {
        let h = harness(FakeProber::new(ProbeOutcome::Reachable));
        let err = h.monitor.check_server(99).await.expect_err("нет такого сервера");
        assert!(matches!(err, MonitorError::NotFound(99)));
        assert_eq!(h.prober.calls(), 0);
    }

    #[tokio::test]
    async fn registry_failure_leaves_server_in_error() {
        let h = harness(FakeProber::new(ProbeOutcome::Reachable));
        let id = add(&h, "app", Some("root")).await;
        let previous = seed_metrics(&h, id).await;
        h.sessions
            .set_metric(Platform::Linux, MetricKind::Cpu, Ok("99.0%"));
        h.registry.fail_on(ServerStatus::Online);

        assert_eq!(h.monitor.check_server(id).await.expect("check"), ServerStatus::Error);
        let record = h.registry.get(id).await.expect("get").expect("record");
        assert_eq!(record.status, ServerStatus::Error);
        assert_eq!(record.metrics, previous);
    }

    #[tokio::test]
    async fn check_all_reports_every_server() {
        let h = harness(FakeProber::new(ProbeOutcome::Reachable));
        add(&h, "a", None).await;
        add(&h, "b", None).await;
        add(&h, "c", None).await;
        h.prober.set("b.corp.local", ProbeOutcome::Unreachable);

        let report = h.monitor.check_all().await.expect("cycle");

        assert_eq!(
            report,
            CycleReport {
                checked: 3,
                online: 2,
                offline: 1,
                error: 0,
            }
        );
        let stats = h.registry.statistics().await.expect("stats");
        assert_eq!(stats.checking, 0);

        let again = h.monitor.check_all().await.expect("cycle");
        assert_eq!(again, report);
    }

    #[tokio::test]
    async fn empty_registry_cycle_is_empty() {
        let h = harness(FakeProber::new(ProbeOutcome::Reachable));
        let report = h.monitor.check_all().await.expect("cycle");
        assert_eq!(report, CycleReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn servers_are_checked_concurrently() {
        let h = harness(FakeProber::with_delay(
            ProbeOutcome::Reachable,
            Duration::from_secs(5),
        ));
        for i in 0..10 {
            add(&h, &format!("srv{i}"), None).await;
        }

        let started = Instant::now();
        let report = h.monitor.check_all().await.expect("cycle");

        assert_eq!(report.online, 10);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn run_sleeps_interval_between_cycles() {
        let h = harness(FakeProber::new(ProbeOutcome::Reachable));
        add(&h, "a", None).await;
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(h.monitor.clone().run(rx));

        while h.clock.sleeps().len() < 2 {
            tokio::task::yield_now().await;
        }
        tx.send(true).expect("монитор слушает канал");
        task.await.expect("монитор завершился");

        let sleeps = h.clock.sleeps();
        assert!(sleeps.iter().all(|d| *d == Duration::from_secs(300)));
        assert!(h.prober.calls() >= 2);
    }

    #[tokio::test]
    async fn shutdown_before_start_runs_no_cycle() {
        let h = harness(FakeProber::new(ProbeOutcome::Reachable));
        add(&h, "a", None).await;
        let (tx, rx) = watch::channel(false);
        tx.send(true).expect("канал открыт");

        h.monitor.clone().run(rx).await;

        assert_eq!(h.prober.calls(), 0);
        assert!(h.clock.sleeps().is_empty());
    }
}
