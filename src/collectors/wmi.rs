use crate::collectors::process::{run_with_timeout, CommandOutput};
use crate::collectors::session::{
    AuthMethod, RemoteSession, SessionError, SessionTarget, SessionTimeouts,
};
use crate::config::TransportConfig;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const ENV_USERNAME: &str = "SRVMOND_USERNAME";
const ENV_PASSWORD: &str = "SRVMOND_PASSWORD";
const ENV_COMMAND: &str = "SRVMOND_COMMAND";

/// WMI access through PowerShell CIM cmdlets over DCOM.
///
/// Every call runs in a fresh PowerShell process that opens a CIM session,
/// evaluates the query with the session bound to `$s`, and tears it down.
/// Credentials travel only through the child environment.
///
/// DCOM negotiates its own endpoints through the RPC endpoint mapper, so the
/// record's port does not apply to queries. Remote commands go over WinRM and
/// use the port only when it is a WinRM listener (5985, or 5986 with TLS).
pub struct WmiSession {
    target: SessionTarget,
    powershell_binary: String,
    timeouts: SessionTimeouts,
    connected: bool,
}

impl WmiSession {
    pub fn new(
        target: SessionTarget,
        transport: &TransportConfig,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self {
            target,
            powershell_binary: transport.powershell_binary.clone(),
            timeouts,
            connected: false,
        }
    }

    fn password(&self) -> Result<&str, SessionError> {
        match &self.target.auth {
            AuthMethod::Password(password) => Ok(password),
            AuthMethod::PrivateKey(_) => Err(SessionError::NoCredentials),
        }
    }

    fn cim_script(&self, body: &str) -> String {
        format!(
            "{prelude}\
             $opt = New-CimSessionOption -Protocol Dcom -Impersonation Impersonate -PacketPrivacy\n\
             $s = New-CimSession -ComputerName {computer} -Credential $cred -SessionOption $opt -OperationTimeoutSec {secs}\n\
             try {{\n{body}\n}} finally {{ Remove-CimSession -CimSession $s }}\n",
            prelude = credential_prelude(),
            computer = ps_quote(&self.target.address),
            secs = self.timeouts.query.as_secs().max(1),
        )
    }

    fn remote_command_script(&self) -> String {
        format!(
            "{prelude}\
             Invoke-Command -ComputerName {computer}{port} -Credential $cred \
             -ScriptBlock ([scriptblock]::Create($env:{ENV_COMMAND}))\n",
            prelude = credential_prelude(),
            computer = ps_quote(&self.target.address),
            port = winrm_port_args(self.target.port),
        )
    }

    async fn run_script(
        &self,
        script: String,
        extra_env: Option<(&str, &str)>,
        timeout: Duration,
    ) -> Result<CommandOutput, SessionError> {
        let password = self.password()?;
        let mut cmd = Command::new(&self.powershell_binary);
        cmd.args(["-NoProfile", "-NonInteractive", "-Command", script.as_str()])
            .env(ENV_USERNAME, &self.target.username)
            .env(ENV_PASSWORD, password);
        if let Some((key, value)) = extra_env {
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
impl RemoteSession for WmiSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        let script = self.cim_script(
            "$null = Get-CimInstance -CimSession $s -ClassName Win32_OperatingSystem\n'ok'",
        );
        let output = self
            .run_script(script, None, self.timeouts.connect + self.timeouts.query)
            .await?;
        if !output.success() {
            return Err(SessionError::Connect(failure_reason(&output)));
        }
        debug!(
            server_id = self.target.server_id,
            address = %self.target.address,
            "cim-сессия установлена"
        );
        self.connected = true;
        Ok(())
    }

    async fn run_query(&self, query: &str) -> Result<String, SessionError> {
        self.ensure_connected()?;
        let output = self
            .run_script(self.cim_script(query), None, self.timeouts.query)
            .await?;
        let value = output.stdout.trim();
        if !output.success() || value.is_empty() {
            return Err(SessionError::Query(failure_reason(&output)));
        }
        Ok(value.to_string())
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, SessionError> {
        self.ensure_connected()?;
        self.run_script(
            self.remote_command_script(),
            Some((ENV_COMMAND, command)),
            self.timeouts.command,
        )
        .await
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}

fn credential_prelude() -> String {
    format!(
        "$ErrorActionPreference = 'Stop'\n\
         [Console]::OutputEncoding = [System.Text.Encoding]::UTF8\n\
         $secure = ConvertTo-SecureString $env:{ENV_PASSWORD} -AsPlainText -Force\n\
         $cred = New-Object System.Management.Automation.PSCredential($env:{ENV_USERNAME}, $secure)\n"
    )
}

fn winrm_port_args(port: u16) -> &'static str {
    match port {
        5985 => " -Port 5985",
        5986 => " -Port 5986 -UseSSL",
        _ => "",
    }
}

/// Single-quoted PowerShell literal.
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn failure_reason(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    match stderr.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(line) => line.to_string(),
        None => match output.exit_code {
            Some(code) => format!("пустой ответ, код выхода {code}"),
            None => "процесс завершён сигналом".to_string(),
        },
    }
}
