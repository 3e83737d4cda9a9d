use crate::collectors::dialect::{validate_service_name, ServiceAction, ServiceInfo};
use crate::collectors::process::CommandOutput;
use crate::collectors::session::{RemoteSession, SessionError, SessionFactory, SessionTarget};
use crate::error::MonitorError;
use crate::metrics::Metrics;
use crate::registry::ServerRegistry;
use crate::state::ServerRecord;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

const NO_OUTPUT: &str = "Command executed successfully (no output)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Single display string: `Error: <stderr>` for a failed command with
    /// stderr, otherwise stdout or a placeholder when stdout is empty.
    pub output: String,
}

impl CommandResult {
    pub fn from_output(output: CommandOutput) -> Self {
        let success = output.success();
        let display = if !success && !output.stderr.is_empty() {
            format!("Error: {}", output.stderr)
        } else if output.stdout.is_empty() {
            NO_OUTPUT.to_string()
        } else {
            output.stdout.clone()
        };
        Self {
            success,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            output: display,
        }
    }
}

pub struct CommandExecutor {
    registry: Arc<dyn ServerRegistry>,
    sessions: Arc<dyn SessionFactory>,
    metrics: Arc<Metrics>,
}

impl CommandExecutor {
    pub fn new(
        registry: Arc<dyn ServerRegistry>,
        sessions: Arc<dyn SessionFactory>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            sessions,
            metrics,
        }
    }

    pub async fn execute(&self, id: u64, command: &str) -> Result<CommandResult, MonitorError> {
        if command.trim().is_empty() {
            return Err(MonitorError::InvalidArgument(
                "команда не может быть пустой".to_string(),
            ));
        }
        let (_, session) = self.open_session(id).await?;
        let result = self.run(id, session, command).await;
        self.count("execute", &result);
        result
    }

    pub async fn manage_service(
        &self,
        id: u64,
        service: &str,
        action: &str,
    ) -> Result<CommandResult, MonitorError> {
        let action: ServiceAction = action.parse()?;
        validate_service_name(service)?;

        let (record, session) = self.open_session(id).await?;
        let command = record.platform.service_command(action, service);
        info!(server_id = id, service, action = action.as_str(), "управление службой");
        let result = self.run(id, session, &command).await;
        self.count("service", &result);
        result
    }

    pub async fn list_services(&self, id: u64) -> Result<Vec<ServiceInfo>, MonitorError> {
        let (record, mut session) = self.open_session(id).await?;
        let raw = session
            .run_query(record.platform.list_services_query())
            .await;
        session.disconnect().await;
        let raw = raw.map_err(|err| transport_error(id, err))?;
        Ok(record.platform.parse_services(&raw))
    }

    async fn open_session(
        &self,
        id: u64,
    ) -> Result<(ServerRecord, Box<dyn RemoteSession>), MonitorError> {
        let record = self
            .registry
            .get(id)
            .await?
            .ok_or(MonitorError::NotFound(id))?;
        if !record.has_credentials() {
            return Err(MonitorError::InvalidOperation(
                "учётные данные сервера не настроены".to_string(),
            ));
        }
        let target = SessionTarget::resolve(&record).map_err(|err| {
            MonitorError::InvalidOperation(format!("нет пригодного способа аутентификации: {err}"))
        })?;

        let mut session = self.sessions.open(target);
        if let Err(err) = session.connect().await {
            session.disconnect().await;
            return Err(match err {
                SessionError::Spawn(_) => transport_error(id, err),
                other => {
                    warn!(server_id = id, error = %other, "не удалось открыть удалённую сессию");
                    MonitorError::InvalidOperation(format!(
                        "не удалось подключиться к серверу: {other}"
                    ))
                }
            });
        }
        Ok((record, session))
    }

    async fn run(
        &self,
        id: u64,
        mut session: Box<dyn RemoteSession>,
        command: &str,
    ) -> Result<CommandResult, MonitorError> {
        let output = session.run_command(command).await;
        session.disconnect().await;
        let result = CommandResult::from_output(output.map_err(|err| transport_error(id, err))?);
        info!(
            server_id = id,
            exit_code = ?result.exit_code,
            success = result.success,
            "удалённая команда выполнена"
        );
        Ok(result)
    }

    fn count(&self, kind: &str, result: &Result<CommandResult, MonitorError>) {
        let success = matches!(result, Ok(r) if r.success);
        self.metrics.inc_command(kind, success);
    }
}

fn transport_error(id: u64, err: SessionError) -> MonitorError {
    error!(server_id = id, error = %err, "ошибка удалённого выполнения");
    MonitorError::Transport(err.to_string())
}
