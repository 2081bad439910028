pub mod system;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Metric families read by the providers, in collection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Memory,
    Cpu,
    Network,
    LoadAvg,
    Uptime,
    Temperature,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::Memory,
        MetricKind::Cpu,
        MetricKind::Network,
        MetricKind::LoadAvg,
        MetricKind::Uptime,
        MetricKind::Temperature,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Memory => "memory",
            MetricKind::Cpu => "cpu",
            MetricKind::Network => "network",
            MetricKind::LoadAvg => "load_avg",
            MetricKind::Uptime => "uptime",
            MetricKind::Temperature => "temperature",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryCounters {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

/// Aggregate CPU time counters in clock ticks, cumulative since boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCounters {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub total: u64,
}

impl CpuCounters {
    /// Ticks accumulated between `earlier` and `self`.
    pub fn since(&self, earlier: &CpuCounters) -> CpuCounters {
        CpuCounters {
            user: self.user.saturating_sub(earlier.user),
            nice: self.nice.saturating_sub(earlier.nice),
            system: self.system.saturating_sub(earlier.system),
            idle: self.idle.saturating_sub(earlier.idle),
            iowait: self.iowait.saturating_sub(earlier.iowait),
            irq: self.irq.saturating_sub(earlier.irq),
            softirq: self.softirq.saturating_sub(earlier.softirq),
            steal: self.steal.saturating_sub(earlier.steal),
            total: self.total.saturating_sub(earlier.total),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkCounters {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadAvg {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },
    #[error("{0} statistics are not supported on this platform")]
    Unsupported(MetricKind),
    #[error("{0}")]
    NotFound(String),
    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),
    #[error("provider task failed: {0}")]
    Panicked(String),
}

/// Read-only access to the raw OS counters, one call per metric family.
///
/// Calls may block on syscalls or file reads; the snapshot builder runs them on the
/// blocking pool and bounds each one with a timeout.
pub trait MetricSource: Send + Sync {
    fn memory(&self) -> Result<MemoryCounters, ProviderError>;
    fn cpu(&self) -> Result<CpuCounters, ProviderError>;
    fn network(&self) -> Result<NetworkCounters, ProviderError>;
    fn load_avg(&self) -> Result<LoadAvg, ProviderError>;
    fn uptime(&self) -> Result<Duration, ProviderError>;
    /// Board temperature in degrees Celsius.
    fn board_temp(&self) -> Result<f64, ProviderError>;
}
