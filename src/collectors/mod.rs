pub mod dialect;
pub mod probe;
pub mod process;
pub mod remote;
pub mod session;
pub mod ssh;
pub mod wmi;

use crate::state::ServerMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Cpu,
    Memory,
    Disk,
    Uptime,
    Os,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Cpu,
        MetricKind::Memory,
        MetricKind::Disk,
        MetricKind::Uptime,
        MetricKind::Os,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::Disk => "disk",
            MetricKind::Uptime => "uptime",
            MetricKind::Os => "os",
        }
    }
}

/// Outcome of a single metric query; a failure never affects sibling metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricResult {
    pub kind: MetricKind,
    pub outcome: Result<String, String>,
}

pub fn merge_results(results: &[MetricResult]) -> ServerMetrics {
    let mut metrics = ServerMetrics::default();
    for result in results {
        let Ok(value) = &result.outcome else {
            continue;
        };
        let slot = match result.kind {
            MetricKind::Cpu => &mut metrics.cpu_usage,
            MetricKind::Memory => &mut metrics.memory_usage,
            MetricKind::Disk => &mut metrics.disk_usage,
            MetricKind::Uptime => &mut metrics.uptime,
            MetricKind::Os => &mut metrics.os_info,
        };
        *slot = Some(value.clone());
    }
    metrics
}
