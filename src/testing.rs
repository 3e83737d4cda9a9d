//! Fakes shared by unit tests.

use crate::clock::Clock;
use crate::collectors::probe::{ProbeOutcome, Prober};
use crate::collectors::process::CommandOutput;
use crate::collectors::session::{RemoteSession, SessionError, SessionFactory, SessionTarget};
use crate::collectors::MetricKind;
use crate::error::MonitorError;
use crate::registry::{ServerPage, ServerRegistry};
use crate::state::{
    CreateServerRequest, Platform, ServerFilter, ServerPatch, ServerRecord, ServerStatistics,
    ServerStatus,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct FakeProber {
    default: ProbeOutcome,
    outcomes: Mutex<HashMap<String, ProbeOutcome>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeProber {
    pub fn new(default: ProbeOutcome) -> Arc<Self> {
        Arc::new(Self::build(default, None))
    }

    /// Every probe takes `delay` of tokio time before answering.
    pub fn with_delay(default: ProbeOutcome, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(default, Some(delay)))
    }

    fn build(default: ProbeOutcome, delay: Option<Duration>) -> Self {
        Self {
            default,
            outcomes: Mutex::new(HashMap::new()),
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, address: &str, outcome: ProbeOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(address.to_string(), outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, address: &str, _timeout: Duration) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcomes
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[derive(Default)]
struct SessionScript {
    connect_error: Option<String>,
    queries: HashMap<String, Result<String, String>>,
    command_output: Option<CommandOutput>,
    command_error: Option<String>,
    commands: Vec<String>,
    targets: Vec<SessionTarget>,
}

/// Session factory whose sessions answer from a shared script.
#[derive(Default)]
pub struct FakeSessions {
    script: Arc<Mutex<SessionScript>>,
    opened: AtomicUsize,
    disconnected: Arc<AtomicUsize>,
}

impl FakeSessions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_connect(&self, reason: &str) {
        self.script.lock().unwrap().connect_error = Some(reason.to_string());
    }

    pub fn set_query(&self, query: &str, result: Result<&str, &str>) {
        self.script.lock().unwrap().queries.insert(
            query.to_string(),
            result.map(str::to_string).map_err(str::to_string),
        );
    }

    pub fn set_metric(&self, platform: Platform, kind: MetricKind, result: Result<&str, &str>) {
        self.set_query(platform.metric_query(kind), result);
    }

    pub fn set_command_output(&self, output: CommandOutput) {
        self.script.lock().unwrap().command_output = Some(output);
    }

    pub fn fail_commands(&self, reason: &str) {
        self.script.lock().unwrap().command_error = Some(reason.to_string());
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> usize {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.script.lock().unwrap().commands.clone()
    }

    pub fn targets(&self) -> Vec<SessionTarget> {
        self.script.lock().unwrap().targets.clone()
    }
}

impl SessionFactory for FakeSessions {
    fn open(&self, target: SessionTarget) -> Box<dyn RemoteSession> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.script.lock().unwrap().targets.push(target);
        Box::new(FakeSession {
            script: self.script.clone(),
            disconnected: self.disconnected.clone(),
            connected: false,
        })
    }
}

struct FakeSession {
    script: Arc<Mutex<SessionScript>>,
    disconnected: Arc<AtomicUsize>,
    connected: bool,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        if let Some(reason) = self.script.lock().unwrap().connect_error.clone() {
            return Err(SessionError::Connect(reason));
        }
        self.connected = true;
        Ok(())
    }

    async fn run_query(&self, query: &str) -> Result<String, SessionError> {
        assert!(self.connected, "query on a closed session");
        match self.script.lock().unwrap().queries.get(query) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(reason)) => Err(SessionError::Query(reason.clone())),
            None => Err(SessionError::Query("нет ответа".to_string())),
        }
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, SessionError> {
        assert!(self.connected, "command on a closed session");
        let mut script = self.script.lock().unwrap();
        script.commands.push(command.to_string());
        if let Some(reason) = script.command_error.clone() {
            return Err(SessionError::Spawn(std::io::Error::other(reason)));
        }
        Ok(script.command_output.clone().unwrap_or(CommandOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }))
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.disconnected.fetch_add(1, Ordering::SeqCst);
    }
}

/// Clock whose `sleep` returns immediately after advancing `now`.
pub struct ManualClock {
    now: AtomicI64,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start_unix: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(start_unix),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.now
            .fetch_add(duration.as_secs() as i64, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}

/// Wraps a registry and records every status it is asked to persist.
pub struct RecordingRegistry<R> {
    inner: R,
    statuses: Mutex<Vec<(u64, ServerStatus)>>,
    fail_statuses: Mutex<Vec<ServerStatus>>,
}

impl<R: ServerRegistry> RecordingRegistry<R> {
    pub fn new(inner: R) -> Arc<Self> {
        Arc::new(Self {
            inner,
            statuses: Mutex::new(Vec::new()),
            fail_statuses: Mutex::new(Vec::new()),
        })
    }

    /// Makes updates that set `status` fail with a storage error.
    pub fn fail_on(&self, status: ServerStatus) {
        self.fail_statuses.lock().unwrap().push(status);
    }

    pub fn statuses(&self, id: u64) -> Vec<ServerStatus> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|(sid, _)| *sid == id)
            .map(|(_, status)| *status)
            .collect()
    }
}

#[async_trait]
impl<R: ServerRegistry> ServerRegistry for RecordingRegistry<R> {
    async fn list(&self, filter: &ServerFilter) -> Result<ServerPage, MonitorError> {
        self.inner.list(filter).await
    }

    async fn all(&self) -> Result<Vec<ServerRecord>, MonitorError> {
        self.inner.all().await
    }

    async fn get(&self, id: u64) -> Result<Option<ServerRecord>, MonitorError> {
        self.inner.get(id).await
    }

    async fn insert(&self, request: CreateServerRequest) -> Result<ServerRecord, MonitorError> {
        self.inner.insert(request).await
    }

    async fn update(
        &self,
        id: u64,
        patch: ServerPatch,
    ) -> Result<Option<ServerRecord>, MonitorError> {
        if let Some(status) = patch.status {
            if self.fail_statuses.lock().unwrap().contains(&status) {
                return Err(MonitorError::Storage("диск переполнен".to_string()));
            }
            self.statuses.lock().unwrap().push((id, status));
        }
        self.inner.update(id, patch).await
    }

    async fn delete(&self, id: u64) -> Result<bool, MonitorError> {
        self.inner.delete(id).await
    }

    async fn statistics(&self) -> Result<ServerStatistics, MonitorError> {
        self.inner.statistics().await
    }
}
