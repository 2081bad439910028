use crate::collectors::{
    CpuCounters, LoadAvg, MemoryCounters, MetricKind, MetricSource, NetworkCounters,
    ProviderError,
};
use crate::config::CollectConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{NetworkExt, NetworksExt, System, SystemExt};
use tracing::debug;

#[cfg(target_os = "linux")]
const PROC_STAT: &str = "/proc/stat";

/// Live provider backed by sysinfo, `/proc/stat` and the thermal sysfs tree.
pub struct SystemSource {
    temperature_file: PathBuf,
    network_interface: Option<String>,
}

impl SystemSource {
    pub fn new(cfg: &CollectConfig) -> Self {
        Self {
            temperature_file: cfg.temperature_file.clone(),
            network_interface: cfg.network_interface.clone(),
        }
    }
}

impl MetricSource for SystemSource {
    fn memory(&self) -> Result<MemoryCounters, ProviderError> {
        ensure_supported(MetricKind::Memory)?;
        let mut system = System::new();
        system.refresh_memory();
        Ok(MemoryCounters {
            total: system.total_memory(),
            used: system.used_memory(),
            free: system.free_memory(),
        })
    }

    fn cpu(&self) -> Result<CpuCounters, ProviderError> {
        read_cpu_counters()
    }

    fn network(&self) -> Result<NetworkCounters, ProviderError> {
        ensure_supported(MetricKind::Network)?;
        let mut system = System::new();
        system.refresh_networks_list();
        system.refresh_networks();
        let interfaces: Vec<NetworkCounters> = system
            .networks()
            .iter()
            .map(|(iface, data)| NetworkCounters {
                name: iface.to_string(),
                rx_bytes: data.total_received(),
                tx_bytes: data.total_transmitted(),
            })
            .collect();
        debug!(interfaces = interfaces.len(), "network interfaces discovered");
        select_interface(interfaces, self.network_interface.as_deref())
    }

    fn load_avg(&self) -> Result<LoadAvg, ProviderError> {
        ensure_supported(MetricKind::LoadAvg)?;
        let load = System::new().load_average();
        Ok(LoadAvg {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        })
    }

    fn uptime(&self) -> Result<Duration, ProviderError> {
        ensure_supported(MetricKind::Uptime)?;
        Ok(Duration::from_secs(System::new().uptime()))
    }

    fn board_temp(&self) -> Result<f64, ProviderError> {
        read_board_temp(&self.temperature_file)
    }
}

/// Host name as reported by the OS, if any.
pub fn host_name() -> Option<String> {
    System::new()
        .host_name()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn ensure_supported(kind: MetricKind) -> Result<(), ProviderError> {
    if System::IS_SUPPORTED {
        Ok(())
    } else {
        Err(ProviderError::Unsupported(kind))
    }
}

#[cfg(target_os = "linux")]
fn read_cpu_counters() -> Result<CpuCounters, ProviderError> {
    let text = fs::read_to_string(PROC_STAT).map_err(|source| ProviderError::Io {
        path: PROC_STAT.to_string(),
        source,
    })?;
    parse_proc_stat(&text)
}

#[cfg(not(target_os = "linux"))]
fn read_cpu_counters() -> Result<CpuCounters, ProviderError> {
    Err(ProviderError::Unsupported(MetricKind::Cpu))
}

/// Parses the aggregate `cpu` line of `/proc/stat`.
///
/// Guest time is already folded into user time by the kernel, so the total only sums
/// user, nice, system, idle, iowait, irq, softirq and steal.
pub fn parse_proc_stat(text: &str) -> Result<CpuCounters, ProviderError> {
    let line = text
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| ProviderError::Parse {
            what: "/proc/stat",
            detail: "aggregate cpu line is missing".to_string(),
        })?;

    let mut values = Vec::with_capacity(10);
    for field in line.split_whitespace().skip(1) {
        let v = field.parse::<u64>().map_err(|err| ProviderError::Parse {
            what: "/proc/stat",
            detail: format!("bad counter '{field}': {err}"),
        })?;
        values.push(v);
    }
    if values.len() < 4 {
        return Err(ProviderError::Parse {
            what: "/proc/stat",
            detail: format!("expected at least 4 counters, got {}", values.len()),
        });
    }

    let at = |idx: usize| values.get(idx).copied().unwrap_or(0);
    let mut counters = CpuCounters {
        user: at(0),
        nice: at(1),
        system: at(2),
        idle: at(3),
        iowait: at(4),
        irq: at(5),
        softirq: at(6),
        steal: at(7),
        total: 0,
    };
    counters.total = counters.user
        + counters.nice
        + counters.system
        + counters.idle
        + counters.iowait
        + counters.irq
        + counters.softirq
        + counters.steal;
    Ok(counters)
}

/// Picks the requested interface, or the first non-loopback one in name order.
fn select_interface(
    mut interfaces: Vec<NetworkCounters>,
    wanted: Option<&str>,
) -> Result<NetworkCounters, ProviderError> {
    if let Some(name) = wanted {
        return interfaces
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| ProviderError::NotFound(format!("network interface '{name}' not found")));
    }

    interfaces.sort_by(|a, b| a.name.cmp(&b.name));
    interfaces
        .into_iter()
        .find(|i| i.name != "lo")
        .ok_or_else(|| ProviderError::NotFound("no network interface found".to_string()))
}

fn read_board_temp(path: &Path) -> Result<f64, ProviderError> {
    let raw = fs::read_to_string(path).map_err(|source| ProviderError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_millidegrees(&raw)
}

fn parse_millidegrees(raw: &str) -> Result<f64, ProviderError> {
    let trimmed = raw.trim();
    let milli = trimmed.parse::<i64>().map_err(|err| ProviderError::Parse {
        what: "board temperature",
        detail: format!("'{trimmed}': {err}"),
    })?;
    Ok(milli as f64 / 1000.0)
}
