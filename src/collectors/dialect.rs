use crate::collectors::process::parse_f64_loose;
use crate::collectors::MetricKind;
use crate::error::MonitorError;
use crate::state::Platform;
use serde::Serialize;
use std::str::FromStr;

const LINUX_CPU: &str =
    r#"top -bn1 | grep "Cpu(s)" | sed "s/.*, *\([0-9.]*\)%* id.*/\1/" | awk '{print 100 - $1"%"}'"#;
const LINUX_MEMORY: &str = r#"free | grep Mem | awk '{printf "%.1f%%", $3/$2 * 100.0}'"#;
const LINUX_DISK: &str = r#"df -h / | awk 'NR==2{print $5}'"#;
const LINUX_UPTIME: &str = "uptime -p";
const LINUX_OS: &str = r#"(lsb_release -ds 2>/dev/null || grep PRETTY_NAME /etc/os-release | cut -d'"' -f2) | head -n1"#;
const LINUX_SERVICES: &str =
    "systemctl list-units --type=service --all --no-legend --plain --no-pager";

const WIN_CPU: &str =
    "Get-CimInstance -CimSession $s -ClassName Win32_Processor | ForEach-Object { $_.LoadPercentage }";
const WIN_MEMORY: &str = "Get-CimInstance -CimSession $s -ClassName Win32_OperatingSystem | \
     ForEach-Object { \"$($_.TotalVisibleMemorySize)|$($_.FreePhysicalMemory)\" }";
const WIN_DISK: &str = "$os = Get-CimInstance -CimSession $s -ClassName Win32_OperatingSystem\n\
     Get-CimInstance -CimSession $s -ClassName Win32_LogicalDisk -Filter \"DeviceID='$($os.SystemDrive)'\" | \
     ForEach-Object { \"$($_.Size)|$($_.FreeSpace)\" }";
const WIN_UPTIME: &str = "Get-CimInstance -CimSession $s -ClassName Win32_OperatingSystem | \
     ForEach-Object { ([DateTimeOffset]$_.LastBootUpTime).ToUnixTimeSeconds() }";
const WIN_OS: &str = "Get-CimInstance -CimSession $s -ClassName Win32_OperatingSystem | \
     ForEach-Object { \"$($_.Caption)|$($_.Version)|$($_.OSArchitecture)\" }";
const WIN_SERVICES: &str = "Get-CimInstance -CimSession $s -ClassName Win32_Service | \
     ForEach-Object { \"$($_.Name)|$($_.DisplayName)|$($_.State)|$($_.StartMode)|$($_.ProcessId)\" }";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        }
    }
}

impl FromStr for ServiceAction {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(ServiceAction::Start),
            "stop" => Ok(ServiceAction::Stop),
            "restart" => Ok(ServiceAction::Restart),
            other => Err(MonitorError::InvalidOperation(format!(
                "недопустимое действие '{other}', ожидается start, stop или restart"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub display_name: String,
    pub state: String,
    pub start_mode: Option<String>,
    pub process_id: Option<u32>,
}

pub fn validate_service_name(name: &str) -> Result<(), MonitorError> {
    let valid = !name.is_empty()
        && name.len() <= 256
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-'));
    if valid {
        Ok(())
    } else {
        Err(MonitorError::InvalidOperation(format!(
            "недопустимое имя службы '{name}'"
        )))
    }
}

impl Platform {
    pub fn metric_query(&self, kind: MetricKind) -> &'static str {
        match (self, kind) {
            (Platform::Linux, MetricKind::Cpu) => LINUX_CPU,
            (Platform::Linux, MetricKind::Memory) => LINUX_MEMORY,
            (Platform::Linux, MetricKind::Disk) => LINUX_DISK,
            (Platform::Linux, MetricKind::Uptime) => LINUX_UPTIME,
            (Platform::Linux, MetricKind::Os) => LINUX_OS,
            (Platform::Windows, MetricKind::Cpu) => WIN_CPU,
            (Platform::Windows, MetricKind::Memory) => WIN_MEMORY,
            (Platform::Windows, MetricKind::Disk) => WIN_DISK,
            (Platform::Windows, MetricKind::Uptime) => WIN_UPTIME,
            (Platform::Windows, MetricKind::Os) => WIN_OS,
        }
    }

    /// Turns raw query output into the stored display string.
    pub fn interpret_metric(
        &self,
        kind: MetricKind,
        raw: &str,
        now_unix: i64,
    ) -> Result<String, String> {
        match self {
            Platform::Linux => {
                let value = raw.trim().trim_matches('"').trim();
                if value.is_empty() {
                    Err("пустой ответ".to_string())
                } else {
                    Ok(value.to_string())
                }
            }
            Platform::Windows => match kind {
                MetricKind::Cpu => average_load(raw),
                MetricKind::Memory | MetricKind::Disk => used_percent(raw),
                MetricKind::Uptime => {
                    let boot = first_line(raw)
                        .parse::<i64>()
                        .map_err(|_| format!("некорректное время загрузки: {}", raw.trim()))?;
                    Ok(format_uptime((now_unix - boot).max(0) as u64))
                }
                MetricKind::Os => os_description(raw),
            },
        }
    }

    pub fn service_command(&self, action: ServiceAction, service: &str) -> String {
        match self {
            Platform::Linux => format!("systemctl {} '{}'", action.as_str(), service),
            Platform::Windows => match action {
                ServiceAction::Start => format!("Start-Service -Name '{service}'"),
                ServiceAction::Stop => format!("Stop-Service -Name '{service}' -Force"),
                ServiceAction::Restart => format!("Restart-Service -Name '{service}' -Force"),
            },
        }
    }

    pub fn list_services_query(&self) -> &'static str {
        match self {
            Platform::Linux => LINUX_SERVICES,
            Platform::Windows => WIN_SERVICES,
        }
    }

    pub fn parse_services(&self, raw: &str) -> Vec<ServiceInfo> {
        let rows = raw.lines().map(str::trim).filter(|l| !l.is_empty());
        match self {
            Platform::Linux => rows.filter_map(parse_systemctl_row).collect(),
            Platform::Windows => rows.filter_map(parse_win32_service_row).collect(),
        }
    }
}

pub fn format_uptime(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    format!("{days}д {hours}ч {minutes}м")
}

fn first_line(raw: &str) -> &str {
    raw.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
}

fn average_load(raw: &str) -> Result<String, String> {
    let loads: Vec<f64> = raw.lines().filter_map(parse_f64_loose).collect();
    if loads.is_empty() {
        return Err(format!("нет данных о загрузке процессора: {}", raw.trim()));
    }
    let avg = loads.iter().sum::<f64>() / loads.len() as f64;
    Ok(format!("{avg:.1}%"))
}

fn used_percent(raw: &str) -> Result<String, String> {
    let line = first_line(raw);
    let (total, free) = line
        .split_once('|')
        .ok_or_else(|| format!("неожиданный формат: {line}"))?;
    let total = parse_f64_loose(total).ok_or_else(|| format!("некорректный объём: {line}"))?;
    let free = parse_f64_loose(free).ok_or_else(|| format!("некорректный остаток: {line}"))?;
    if total <= 0.0 {
        return Err(format!("нулевой объём: {line}"));
    }
    let used = (total - free) / total * 100.0;
    Ok(format!("{used:.1}%"))
}

fn os_description(raw: &str) -> Result<String, String> {
    let line = first_line(raw);
    let mut parts = line.split('|').map(str::trim);
    let caption = parts.next().unwrap_or("");
    let version = parts.next().unwrap_or("");
    let arch = parts.next().unwrap_or("");
    if caption.is_empty() {
        return Err(format!("неожиданный формат: {line}"));
    }
    let base = format!("{caption} {version}");
    let base = base.trim_end();
    if arch.is_empty() {
        Ok(base.to_string())
    } else {
        Ok(format!("{base} ({arch})"))
    }
}

// UNIT LOAD ACTIVE SUB DESCRIPTION...
fn parse_systemctl_row(line: &str) -> Option<ServiceInfo> {
    let line = line.trim_start_matches(['●', '*', ' ']);
    let mut fields = line.split_whitespace();
    let unit = fields.next()?;
    let _load = fields.next()?;
    let active = fields.next()?;
    let sub = fields.next()?;
    let description = fields.collect::<Vec<_>>().join(" ");
    Some(ServiceInfo {
        name: unit.trim_end_matches(".service").to_string(),
        display_name: description,
        state: format!("{active}/{sub}"),
        start_mode: None,
        process_id: None,
    })
}

// Name|DisplayName|State|StartMode|ProcessId
/// `Name|DisplayName|State|StartMode|ProcessId`; only the display name may contain `|`.
fn parse_win32_service_row(line: &str) -> Option<ServiceInfo> {
    let (name, rest) = line.split_once('|')?;
    let mut tail = rest.rsplitn(4, '|').map(str::trim);
    let process_id = tail.next()?;
    let start_mode = tail.next()?;
    let state = tail.next()?;
    let display_name = tail.next()?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(ServiceInfo {
        name: name.to_string(),
        display_name: display_name.to_string(),
        state: state.to_string(),
        start_mode: Some(start_mode.to_string()).filter(|m| !m.is_empty()),
        process_id: process_id.parse::<u32>().ok().filter(|pid| *pid != 0),
    })
}
