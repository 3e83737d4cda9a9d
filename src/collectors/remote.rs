use crate::clock::Clock;
use crate::collectors::session::{SessionError, SessionFactory, SessionTarget};
use crate::collectors::{merge_results, MetricKind, MetricResult};
use crate::state::{ServerMetrics, ServerRecord};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Collection {
    pub metrics: ServerMetrics,
    pub results: Vec<MetricResult>,
    pub connection_error: Option<SessionError>,
}

impl Collection {
    fn failed(err: SessionError) -> Self {
        Self {
            metrics: ServerMetrics::default(),
            results: Vec::new(),
            connection_error: Some(err),
        }
    }
}

pub struct MetricsCollector {
    sessions: Arc<dyn SessionFactory>,
    clock: Arc<dyn Clock>,
}

impl MetricsCollector {
    pub fn new(sessions: Arc<dyn SessionFactory>, clock: Arc<dyn Clock>) -> Self {
        Self { sessions, clock }
    }

    /// Opens one session, runs every metric query on it and closes it.
    pub async fn collect(&self, record: &ServerRecord) -> Collection {
        let target = match SessionTarget::resolve(record) {
            Ok(target) => target,
            Err(err) => {
                debug!(server_id = record.id, error = %err, "нет пригодного способа аутентификации");
                return Collection::failed(err);
            }
        };
        let platform = target.platform;

        let mut session = self.sessions.open(target);
        if let Err(err) = session.connect().await {
            warn!(
                server_id = record.id,
                address = %record.address,
                error = %err,
                "не удалось подключиться для сбора метрик"
            );
            session.disconnect().await;
            return Collection::failed(err);
        }

        let mut results = Vec::with_capacity(MetricKind::ALL.len());
        for kind in MetricKind::ALL {
            let outcome = match session.run_query(platform.metric_query(kind)).await {
                Ok(raw) => platform.interpret_metric(kind, &raw, self.clock.now_unix()),
                Err(err) => Err(err.to_string()),
            };
            if let Err(reason) = &outcome {
                debug!(
                    server_id = record.id,
                    metric = kind.as_str(),
                    reason = %reason,
                    "метрика не получена"
                );
            }
            results.push(MetricResult { kind, outcome });
        }
        session.disconnect().await;

        Collection {
            metrics: merge_results(&results),
            results,
            connection_error: None,
        }
    }
}
