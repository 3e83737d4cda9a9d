use crate::collectors::process::{run_with_timeout, CommandOutput};
use crate::collectors::session::{
    AuthMethod, RemoteSession, SessionError, SessionTarget, SessionTimeouts,
};
use crate::config::TransportConfig;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// ssh(1) reserves exit code 255 for its own connection and auth failures.
const SSH_TRANSPORT_EXIT: i32 = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    program: String,
    args: Vec<String>,
    env: Vec<(&'static str, String)>,
}

/// Shell session driven through the system `ssh` client, `sshpass` for passwords.
pub struct SshSession {
    target: SessionTarget,
    ssh_binary: String,
    sshpass_binary: String,
    timeouts: SessionTimeouts,
    connected: bool,
}

impl SshSession {
    pub fn new(
        target: SessionTarget,
        transport: &TransportConfig,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self {
            target,
            ssh_binary: transport.ssh_binary.clone(),
            sshpass_binary: transport.sshpass_binary.clone(),
            timeouts,
            connected: false,
        }
    }

    fn invocation(&self, remote: &str) -> Invocation {
        let mut args = Vec::new();
        let mut env = Vec::new();
        let program = match &self.target.auth {
            AuthMethod::PrivateKey(path) => {
                args.extend([
                    "-o".to_string(),
                    "BatchMode=yes".to_string(),
                    "-i".to_string(),
                    path.display().to_string(),
                ]);
                self.ssh_binary.clone()
            }
            AuthMethod::Password(password) => {
                env.push(("SSHPASS", password.clone()));
                args.extend([
                    "-e".to_string(),
                    self.ssh_binary.clone(),
                    "-o".to_string(),
                    "PubkeyAuthentication=no".to_string(),
                ]);
                self.sshpass_binary.clone()
            }
        };

        let connect_secs = self.timeouts.connect.as_secs().max(1);
        args.extend([
            "-o".to_string(),
            format!("ConnectTimeout={connect_secs}"),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-p".to_string(),
            self.target.port.to_string(),
            format!("{}@{}", self.target.username, self.target.address),
            remote.to_string(),
        ]);

        Invocation { program, args, env }
    }

    async fn run(&self, remote: &str, timeout: Duration) -> Result<CommandOutput, SessionError> {
        let invocation = self.invocation(remote);
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        run_with_timeout(cmd, timeout).await
    }

    fn ensure_connected(&self) -> Result<(), SessionError> {
        if self.connected {
            Ok(())
        } else {
            Err(SessionError::Connect("сессия не установлена".to_string()))
        }
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        let output = self
            .run("exit 0", self.timeouts.connect + Duration::from_secs(1))
            .await?;
        if !output.success() {
            return Err(SessionError::Connect(failure_reason(&output)));
        }
        debug!(
            server_id = self.target.server_id,
            address = %self.target.address,
            "ssh-сессия установлена"
        );
        self.connected = true;
        Ok(())
    }

    async fn run_query(&self, query: &str) -> Result<String, SessionError> {
        self.ensure_connected()?;
        let output = self.run(query, self.timeouts.query).await?;
        if output.exit_code == Some(SSH_TRANSPORT_EXIT) {
            return Err(SessionError::Connect(failure_reason(&output)));
        }
        let value = output.stdout.trim();
        if value.is_empty() {
            return Err(SessionError::Query(failure_reason(&output)));
        }
        Ok(value.to_string())
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, SessionError> {
        self.ensure_connected()?;
        let output = self.run(command, self.timeouts.command).await?;
        if let Some(reason) = lost_connection(&output) {
            return Err(SessionError::Connect(reason));
        }
        Ok(output)
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}

/// A remote command may exit 255 on its own, so only exits whose last
/// stderr line comes from the client itself count as a lost connection.
fn lost_connection(output: &CommandOutput) -> Option<String> {
    if output.exit_code != Some(SSH_TRANSPORT_EXIT) {
        return None;
    }
    let last = output.stderr.trim().lines().last()?.trim();
    let from_client = last.starts_with("ssh:")
        || last.starts_with("client_loop:")
        || last.starts_with("Connection closed by")
        || (last.starts_with("Connection to ") && last.ends_with("closed by remote host."));
    from_client.then(|| last.to_string())
}

fn failure_reason(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        return stderr.lines().last().unwrap_or(stderr).to_string();
    }
    match output.exit_code {
        Some(code) => format!("пустой ответ, код выхода {code}"),
        None => "процесс завершён сигналом".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Platform;
    use std::path::PathBuf;

    fn timeouts() -> SessionTimeouts {
        SessionTimeouts {
            connect: Duration::from_secs(3),
            query: Duration::from_secs(5),
            command: Duration::from_secs(5),
        }
    }

    fn target(auth: AuthMethod) -> SessionTarget {
        SessionTarget {
            server_id: 1,
            address: "10.0.0.5".to_string(),
            port: 2222,
            username: "deploy".to_string(),
            auth,
            platform: Platform::Linux,
        }
    }

    fn session(auth: AuthMethod, ssh_binary: &str) -> SshSession {
        let transport = TransportConfig {
            ssh_binary: ssh_binary.to_string(),
            ..TransportConfig::default()
        };
        SshSession::new(target(auth), &transport, timeouts())
    }

    #[test]
    fn key_auth_uses_batch_mode() {
        let s = session(AuthMethod::PrivateKey(PathBuf::from("/keys/id_ed25519")), "ssh");
        let inv = s.invocation("uptime -p");
        assert_eq!(inv.program, "ssh");
        assert!(inv.env.is_empty());
        assert_eq!(
            inv.args,
            vec![
                "-o",
                "BatchMode=yes",
                "-i",
                "/keys/id_ed25519",
                "-o",
                "ConnectTimeout=3",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "-p",
                "2222",
                "deploy@10.0.0.5",
                "uptime -p",
            ]
        );
    }

    #[test]
    fn password_goes_through_environment() {
        let s = session(AuthMethod::Password("s3cret".to_string()), "ssh");
        let inv = s.invocation("df -h /");
        assert_eq!(inv.program, "sshpass");
        assert_eq!(inv.env, vec![("SSHPASS", "s3cret".to_string())]);
        assert!(!inv.args.iter().any(|a| a.contains("s3cret")));
        assert_eq!(&inv.args[..2], &["-e".to_string(), "ssh".to_string()]);
    }

    #[tokio::test]
    async fn query_requires_connected_session() {
        let s = session(AuthMethod::PrivateKey(PathBuf::from("/k")), "ssh");
        let err = s.run_query("uptime -p").await.expect_err("сессия не открыта");
        assert!(matches!(err, SessionError::Connect(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn echo_transport_returns_trimmed_stdout() {
        let mut s = session(AuthMethod::PrivateKey(PathBuf::from("/k")), "echo");
        s.connect().await.expect("echo всегда успешен");
        let value = s.run_query("uptime -p").await.expect("ответ");
        assert!(value.ends_with("deploy@10.0.0.5 uptime -p"));
        s.disconnect().await;
        assert!(s.run_query("uptime -p").await.is_err());
    }

    fn exited(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn client_failures_on_exit_255_are_lost_connections() {
        assert_eq!(
            lost_connection(&exited(
                255,
                "ssh: connect to host 10.0.0.5 port 2222: Connection refused\n"
            )),
            Some("ssh: connect to host 10.0.0.5 port 2222: Connection refused".to_string())
        );
        assert!(lost_connection(&exited(
            255,
            "client_loop: send disconnect: Broken pipe"
        ))
        .is_some());
        assert!(lost_connection(&exited(
            255,
            "Connection to 10.0.0.5 closed by remote host."
        ))
        .is_some());
    }

    #[test]
    fn remote_exit_255_stays_command_result() {
        assert_eq!(lost_connection(&exited(255, "")), None);
        assert_eq!(lost_connection(&exited(255, "myscript: fatal error")), None);
        assert_eq!(lost_connection(&exited(1, "ssh: not a transport exit")), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_transport_is_connect_error() {
        let mut s = session(AuthMethod::PrivateKey(PathBuf::from("/k")), "false");
        let err = s.connect().await.expect_err("false завершается с ошибкой");
        assert!(matches!(err, SessionError::Connect(_)));
    }
}
