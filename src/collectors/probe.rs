use crate::collectors::process::run_with_timeout;
use crate::collectors::session::SessionError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const MAX_ADDRESS_LEN: usize = 255;
const PROCESS_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable,
    Unreachable,
    Error(String),
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str, timeout: Duration) -> ProbeOutcome;
}

/// One ICMP echo request through the system `ping` binary.
pub struct PingProber {
    binary: String,
}

impl PingProber {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, address: &str, timeout: Duration) -> ProbeOutcome {
        if let Err(reason) = validate_address(address) {
            return ProbeOutcome::Error(reason);
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(ping_args(address, timeout));

        match run_with_timeout(cmd, timeout + PROCESS_GRACE).await {
            Ok(output) if output.success() => ProbeOutcome::Reachable,
            Ok(output) => {
                debug!(address, exit_code = ?output.exit_code, "ping без ответа");
                ProbeOutcome::Unreachable
            }
            Err(SessionError::Timeout(_)) => {
                debug!(address, "ping превысил таймаут");
                ProbeOutcome::Unreachable
            }
            Err(err) => ProbeOutcome::Error(err.to_string()),
        }
    }
}

#[cfg(windows)]
fn ping_args(address: &str, timeout: Duration) -> Vec<String> {
    vec![
        "-n".to_string(),
        "1".to_string(),
        "-w".to_string(),
        timeout.as_millis().max(1).to_string(),
        address.to_string(),
    ]
}

#[cfg(not(windows))]
fn ping_args(address: &str, timeout: Duration) -> Vec<String> {
    let secs = timeout.as_millis().div_ceil(1000).max(1);
    vec![
        "-c".to_string(),
        "1".to_string(),
        "-W".to_string(),
        secs.to_string(),
        address.to_string(),
    ]
}

/// Accepts host names, IPv4 and IPv6 literals (with an optional zone id).
pub fn validate_address(address: &str) -> Result<(), String> {
    if address.is_empty() || address.trim() != address {
        return Err(format!("некорректный адрес '{address}'"));
    }
    if address.len() > MAX_ADDRESS_LEN {
        return Err("адрес слишком длинный".to_string());
    }
    if address.starts_with('-') {
        return Err(format!("адрес не может начинаться с '-': '{address}'"));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '_' | '%');
    if !address.chars().all(allowed) {
        return Err(format!("недопустимые символы в адресе '{address}'"));
    }
    Ok(())
}
