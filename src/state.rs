use crate::error::MonitorError;
use serde::{Deserialize, Serialize};

const MAX_NAME_LEN: usize = 100;
const MAX_ADDRESS_LEN: usize = 255;
const MAX_DESCRIPTION_LEN: usize = 500;
const MAX_TAGS_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    #[default]
    Unknown,
    Online,
    Offline,
    Error,
    Checking,
}

impl ServerStatus {
    pub const ALL: [ServerStatus; 5] = [
        ServerStatus::Unknown,
        ServerStatus::Online,
        ServerStatus::Offline,
        ServerStatus::Error,
        ServerStatus::Checking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Unknown => "unknown",
            ServerStatus::Online => "online",
            ServerStatus::Offline => "offline",
            ServerStatus::Error => "error",
            ServerStatus::Checking => "checking",
        }
    }
}

/// Target platform of a server; selects the remote management transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// SSH command-shell transport.
    #[default]
    Linux,
    /// CIM/WMI over PowerShell.
    Windows,
}

impl Platform {
    pub fn infer(port: u16, fallback: Platform) -> Platform {
        match port {
            22 => Platform::Linux,
            3389 | 5985 | 5986 => Platform::Windows,
            _ => fallback,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetrics {
    pub cpu_usage: Option<String>,
    pub memory_usage: Option<String>,
    pub disk_usage: Option<String>,
    pub uptime: Option<String>,
    pub os_info: Option<String>,
}

impl ServerMetrics {
    pub fn is_empty(&self) -> bool {
        self.cpu_usage.is_none()
            && self.memory_usage.is_none()
            && self.disk_usage.is_none()
            && self.uptime.is_none()
            && self.os_info.is_none()
    }

    /// Overwrites only the fields present in `fresh`; absent ones keep the last known value.
    pub fn merge(&mut self, fresh: ServerMetrics) {
        if fresh.cpu_usage.is_some() {
            self.cpu_usage = fresh.cpu_usage;
        }
        if fresh.memory_usage.is_some() {
            self.memory_usage = fresh.memory_usage;
        }
        if fresh.disk_usage.is_some() {
            self.disk_usage = fresh.disk_usage;
        }
        if fresh.uptime.is_some() {
            self.uptime = fresh.uptime;
        }
        if fresh.os_info.is_some() {
            self.os_info = fresh.os_info;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: u64,
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub status: ServerStatus,
    #[serde(default)]
    pub last_checked: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub metrics: ServerMetrics,
}

impl ServerRecord {
    pub fn from_request(
        id: u64,
        request: CreateServerRequest,
        default_platform: Platform,
        now_unix: i64,
    ) -> Self {
        let platform = request
            .platform
            .unwrap_or_else(|| Platform::infer(request.port, default_platform));
        Self {
            id,
            name: request.name.trim().to_string(),
            address: request.address.trim().to_string(),
            port: request.port,
            description: request.description,
            platform,
            username: non_empty(request.username),
            password: non_empty(request.password),
            private_key_path: non_empty(request.private_key_path),
            tags: request.tags,
            status: ServerStatus::Unknown,
            last_checked: None,
            created_at: now_unix,
            updated_at: now_unix,
            metrics: ServerMetrics::default(),
        }
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn has_credentials(&self) -> bool {
        self.username
            .as_deref()
            .map(|u| !u.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn apply(&mut self, patch: ServerPatch, now_unix: i64) {
        if let Some(v) = patch.name {
            self.name = v.trim().to_string();
        }
        if let Some(v) = patch.address {
            self.address = v.trim().to_string();
        }
        if let Some(v) = patch.port {
            self.port = v;
        }
        if let Some(v) = patch.description {
            self.description = v;
        }
        if let Some(v) = patch.platform {
            self.platform = v;
        }
        if let Some(v) = patch.username {
            self.username = non_empty(Some(v));
        }
        if let Some(v) = patch.password {
            self.password = non_empty(Some(v));
        }
        if let Some(v) = patch.private_key_path {
            self.private_key_path = non_empty(Some(v));
        }
        if let Some(v) = patch.tags {
            self.tags = v;
        }
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = patch.last_checked {
            self.last_checked = Some(v);
        }
        if let Some(v) = patch.metrics {
            self.metrics.merge(v);
        }
        self.updated_at = now_unix;
    }
}

/// Field-level change set applied atomically by the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerPatch {
    pub name: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub description: Option<String>,
    pub platform: Option<Platform>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub private_key_path: Option<String>,
    pub tags: Option<String>,
    pub status: Option<ServerStatus>,
    pub last_checked: Option<i64>,
    pub metrics: Option<ServerMetrics>,
}

impl ServerPatch {
    pub fn checking(now_unix: i64) -> Self {
        Self {
            status: Some(ServerStatus::Checking),
            last_checked: Some(now_unix),
            ..Self::default()
        }
    }

    pub fn status(status: ServerStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_metrics(mut self, metrics: Option<ServerMetrics>) -> Self {
        self.metrics = metrics.filter(|m| !m.is_empty());
        self
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub tags: String,
}

impl CreateServerRequest {
    pub fn validate(&self) -> Result<(), MonitorError> {
        validate_required("name", &self.name, MAX_NAME_LEN)?;
        validate_required("address", &self.address, MAX_ADDRESS_LEN)?;
        validate_port(self.port)?;
        validate_max("description", &self.description, MAX_DESCRIPTION_LEN)?;
        validate_max("tags", &self.tags, MAX_TAGS_LEN)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateServerRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub description: Option<String>,
    pub platform: Option<Platform>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub private_key_path: Option<String>,
    pub tags: Option<String>,
}

impl UpdateServerRequest {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if let Some(name) = &self.name {
            validate_required("name", name, MAX_NAME_LEN)?;
        }
        if let Some(address) = &self.address {
            validate_required("address", address, MAX_ADDRESS_LEN)?;
        }
        if let Some(port) = self.port {
            validate_port(port)?;
        }
        if let Some(description) = &self.description {
            validate_max("description", description, MAX_DESCRIPTION_LEN)?;
        }
        if let Some(tags) = &self.tags {
            validate_max("tags", tags, MAX_TAGS_LEN)?;
        }
        Ok(())
    }
}

impl From<UpdateServerRequest> for ServerPatch {
    fn from(value: UpdateServerRequest) -> Self {
        Self {
            name: value.name,
            address: value.address,
            port: value.port,
            description: value.description,
            platform: value.platform,
            username: value.username,
            password: value.password,
            private_key_path: value.private_key_path,
            tags: value.tags,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerFilter {
    pub name: Option<String>,
    pub address: Option<String>,
    pub tag: Option<String>,
    pub status: Option<ServerStatus>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for ServerFilter {
    fn default() -> Self {
        Self {
            name: None,
            address: None,
            tag: None,
            status: None,
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl ServerFilter {
    pub fn matches(&self, record: &ServerRecord) -> bool {
        contains_ci(&record.name, self.name.as_deref())
            && contains_ci(&record.address, self.address.as_deref())
            && contains_ci(&record.tags, self.tag.as_deref())
            && self.status.map(|s| s == record.status).unwrap_or(true)
    }

    /// 1-based page; zero page and zero page size are clamped to 1.
    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1).saturating_mul(self.limit())
    }

    pub fn limit(&self) -> usize {
        self.page_size.max(1) as usize
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStatistics {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub error: usize,
    pub unknown: usize,
    pub checking: usize,
}

impl ServerStatistics {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ServerRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total += 1;
            match record.status {
                ServerStatus::Online => stats.online += 1,
                ServerStatus::Offline => stats.offline += 1,
                ServerStatus::Error => stats.error += 1,
                ServerStatus::Unknown => stats.unknown += 1,
                ServerStatus::Checking => stats.checking += 1,
            }
        }
        stats
    }

    pub fn count(&self, status: ServerStatus) -> usize {
        match status {
            ServerStatus::Online => self.online,
            ServerStatus::Offline => self.offline,
            ServerStatus::Error => self.error,
            ServerStatus::Unknown => self.unknown,
            ServerStatus::Checking => self.checking,
        }
    }
}

fn contains_ci(haystack: &str, needle: Option<&str>) -> bool {
    match needle.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => haystack.to_lowercase().contains(&n.to_lowercase()),
        None => true,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn validate_required(field: &str, value: &str, max_len: usize) -> Result<(), MonitorError> {
    if value.trim().is_empty() {
        return Err(MonitorError::InvalidArgument(format!(
            "поле {field} обязательно"
        )));
    }
    validate_max(field, value, max_len)
}

fn validate_max(field: &str, value: &str, max_len: usize) -> Result<(), MonitorError> {
    if value.chars().count() > max_len {
        return Err(MonitorError::InvalidArgument(format!(
            "поле {field} длиннее {max_len} символов"
        )));
    }
    Ok(())
}

fn validate_port(port: u16) -> Result<(), MonitorError> {
    if port == 0 {
        return Err(MonitorError::InvalidArgument(
            "port должен быть в диапазоне 1..65535".to_string(),
        ));
    }
    Ok(())
}

const fn default_port() -> u16 {
    3389
}

const fn default_page() -> u32 {
    1
}

const fn default_page_size() -> u32 {
    20
}
