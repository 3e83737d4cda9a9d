use crate::collectors::process::CommandOutput;
use crate::collectors::ssh::SshSession;
use crate::collectors::wmi::WmiSession;
use crate::config::{MonitorConfig, TransportConfig};
use crate::state::{Platform, ServerRecord};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("не настроен способ аутентификации")]
    NoCredentials,
    #[error("не удалось подключиться: {0}")]
    Connect(String),
    #[error("превышено время ожидания ({0:?})")]
    Timeout(Duration),
    #[error("не удалось запустить процесс: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("запрос завершился ошибкой: {0}")]
    Query(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    PrivateKey(PathBuf),
    Password(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub server_id: u64,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
    pub platform: Platform,
}

impl SessionTarget {
    pub fn resolve(record: &ServerRecord) -> Result<Self, SessionError> {
        let username = record
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty() && !u.starts_with('-'))
            .ok_or(SessionError::NoCredentials)?;
        let auth = resolve_auth(
            record.platform,
            record.private_key_path.as_deref(),
            record.password.as_deref(),
        )
        .ok_or(SessionError::NoCredentials)?;

        Ok(Self {
            server_id: record.id,
            address: record.address.clone(),
            port: record.port,
            username: username.to_string(),
            auth,
            platform: record.platform,
        })
    }
}

// Key auth only exists on the SSH transport and wins when the key file is present.
fn resolve_auth(
    platform: Platform,
    private_key_path: Option<&str>,
    password: Option<&str>,
) -> Option<AuthMethod> {
    if platform == Platform::Linux {
        if let Some(path) = private_key_path.map(str::trim).filter(|p| !p.is_empty()) {
            if Path::new(path).is_file() {
                return Some(AuthMethod::PrivateKey(PathBuf::from(path)));
            }
        }
    }
    password
        .filter(|p| !p.is_empty())
        .map(|p| AuthMethod::Password(p.to_string()))
}

#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn connect(&mut self) -> Result<(), SessionError>;
    /// Runs a read-only query; empty output is reported as `SessionError::Query`.
    async fn run_query(&self, query: &str) -> Result<String, SessionError>;
    async fn run_command(&self, command: &str) -> Result<CommandOutput, SessionError>;
    async fn disconnect(&mut self);
}

pub trait SessionFactory: Send + Sync {
    /// Creates an unconnected session; no I/O happens until `connect`.
    fn open(&self, target: SessionTarget) -> Box<dyn RemoteSession>;
}

#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    pub connect: Duration,
    pub query: Duration,
    pub command: Duration,
}

impl From<&MonitorConfig> for SessionTimeouts {
    fn from(value: &MonitorConfig) -> Self {
        Self {
            connect: value.connect_timeout(),
            query: value.query_timeout(),
            command: value.command_timeout(),
        }
    }
}

pub struct ProcessSessionFactory {
    transport: TransportConfig,
    timeouts: SessionTimeouts,
}

impl ProcessSessionFactory {
    pub fn new(transport: TransportConfig, timeouts: SessionTimeouts) -> Self {
        Self {
            transport,
            timeouts,
        }
    }
}

impl SessionFactory for ProcessSessionFactory {
    fn open(&self, target: SessionTarget) -> Box<dyn RemoteSession> {
        match target.platform {
            Platform::Linux => Box::new(SshSession::new(target, &self.transport, self.timeouts)),
            Platform::Windows => Box::new(WmiSession::new(target, &self.transport, self.timeouts)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CreateServerRequest, ServerRecord};

    fn record(platform: Platform, key: Option<String>, password: Option<&str>) -> ServerRecord {
        let request = CreateServerRequest {
            name: "srv".to_string(),
            address: "10.0.0.5".to_string(),
            port: 22,
            description: String::new(),
            platform: Some(platform),
            username: Some("admin".to_string()),
            password: password.map(str::to_string),
            private_key_path: key,
            tags: String::new(),
        };
        ServerRecord::from_request(1, request, Platform::Linux, 0)
    }

    fn temp_key_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "srvmond-key-{}-{}",
            std::process::id(),
            name
        ));
        std::fs::write(&path, "key").expect("запись временного ключа");
        path
    }

    #[test]
    fn private_key_preferred_when_file_exists() {
        let key = temp_key_file("preferred");
        let rec = record(
            Platform::Linux,
            Some(key.display().to_string()),
            Some("secret"),
        );
        let target = SessionTarget::resolve(&rec).expect("цель должна разрешиться");
        assert_eq!(target.auth, AuthMethod::PrivateKey(key.clone()));
        let _ = std::fs::remove_file(key);
    }

    #[test]
    fn missing_key_file_falls_back_to_password() {
        let rec = record(
            Platform::Linux,
            Some("/nonexistent/srvmond/id_rsa".to_string()),
            Some("secret"),
        );
        let target = SessionTarget::resolve(&rec).expect("цель должна разрешиться");
        assert_eq!(target.auth, AuthMethod::Password("secret".to_string()));
    }

    #[test]
    fn windows_ignores_private_key() {
        let key = temp_key_file("windows");
        let rec = record(Platform::Windows, Some(key.display().to_string()), None);
        assert!(matches!(
            SessionTarget::resolve(&rec),
            Err(SessionError::NoCredentials)
        ));
        let _ = std::fs::remove_file(key);
    }

    #[test]
    fn username_required() {
        let mut rec = record(Platform::Linux, None, Some("secret"));
        rec.username = None;
        assert!(matches!(
            SessionTarget::resolve(&rec),
            Err(SessionError::NoCredentials)
        ));

        rec.username = Some("-oProxyCommand=x".to_string());
        assert!(matches!(
            SessionTarget::resolve(&rec),
            Err(SessionError::NoCredentials)
        ));
    }
}
