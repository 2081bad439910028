use crate::collectors::{
    CpuCounters, LoadAvg, MemoryCounters, MetricKind, MetricSource, NetworkCounters,
    ProviderError,
};
use crate::config::{CollectConfig, CpuMode};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error};

/// One point-in-time view of the host, built once per run and never mutated.
#[derive(Debug)]
pub struct Snapshot {
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_free: u64,
    /// `None` when the memory total is zero or memory could not be read.
    pub memory_used_percent: Option<f64>,
    pub cpu_total: u64,
    pub cpu_idle: u64,
    pub cpu_system: u64,
    pub cpu_user: u64,
    /// `None` when the tick total is zero or CPU counters could not be read.
    pub cpu_used_percent: Option<f64>,
    pub load_avg_1: f64,
    pub load_avg_5: f64,
    pub load_avg_15: f64,
    pub net_name: String,
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
    pub uptime: Duration,
    pub board_temp_celsius: f64,
    pub collected_at: SystemTime,
    pub provider_errors: Vec<ProviderFailure>,
}

#[derive(Debug)]
pub struct ProviderFailure {
    pub kind: MetricKind,
    pub error: ProviderError,
}

/// Raw per-provider results of one collection pass.
#[derive(Debug)]
pub struct Readings {
    pub memory: Result<MemoryCounters, ProviderError>,
    pub cpu: Result<CpuCounters, ProviderError>,
    pub network: Result<NetworkCounters, ProviderError>,
    pub load_avg: Result<LoadAvg, ProviderError>,
    pub uptime: Result<Duration, ProviderError>,
    pub board_temp: Result<f64, ProviderError>,
}

impl Snapshot {
    /// Folds provider results into a snapshot. Failed metrics keep zero values and are
    /// listed in `provider_errors` in collection order.
    pub fn from_readings(readings: Readings, collected_at: SystemTime) -> Self {
        let mut failures = Vec::new();

        let memory = take(MetricKind::Memory, readings.memory, &mut failures);
        let cpu = take(MetricKind::Cpu, readings.cpu, &mut failures);
        let network = take(MetricKind::Network, readings.network, &mut failures);
        let load = take(MetricKind::LoadAvg, readings.load_avg, &mut failures);
        let uptime = take(MetricKind::Uptime, readings.uptime, &mut failures);
        let board_temp = take(MetricKind::Temperature, readings.board_temp, &mut failures);

        let memory_used_percent = memory
            .as_ref()
            .and_then(|m| memory_used_percent(m.total, m.used));
        let cpu_used_percent = cpu.as_ref().and_then(|c| cpu_used_percent(c.total, c.idle));

        let memory = memory.unwrap_or_default();
        let cpu = cpu.unwrap_or_default();
        let network = network.unwrap_or_default();
        let load = load.unwrap_or_default();

        Self {
            memory_total: memory.total,
            memory_used: memory.used,
            memory_free: memory.free,
            memory_used_percent,
            cpu_total: cpu.total,
            cpu_idle: cpu.idle,
            cpu_system: cpu.system,
            cpu_user: cpu.user,
            cpu_used_percent,
            load_avg_1: load.one,
            load_avg_5: load.five,
            load_avg_15: load.fifteen,
            net_name: network.name,
            net_rx_bytes: network.rx_bytes,
            net_tx_bytes: network.tx_bytes,
            uptime: uptime.unwrap_or_default(),
            board_temp_celsius: board_temp.unwrap_or_default(),
            collected_at,
            provider_errors: failures,
        }
    }

    pub fn failure(&self, kind: MetricKind) -> Option<&ProviderError> {
        self.provider_errors
            .iter()
            .find(|f| f.kind == kind)
            .map(|f| &f.error)
    }

    pub fn is_collected(&self, kind: MetricKind) -> bool {
        self.failure(kind).is_none()
    }

    /// True when not a single provider answered.
    pub fn all_failed(&self) -> bool {
        MetricKind::ALL.iter().all(|k| !self.is_collected(*k))
    }
}

fn take<T>(
    kind: MetricKind,
    result: Result<T, ProviderError>,
    failures: &mut Vec<ProviderFailure>,
) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(error) => {
            failures.push(ProviderFailure { kind, error });
            None
        }
    }
}

/// `100 - free_share`, where the free share is `(total - used) / total`.
pub fn memory_used_percent(total: u64, used: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let remaining = total.saturating_sub(used) as f64;
    Some(100.0 - (remaining / total as f64 * 100.0))
}

pub fn cpu_used_percent(total: u64, idle: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(total.saturating_sub(idle) as f64 / total as f64 * 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuSampling {
    Cumulative,
    Delta(Duration),
}

pub struct SnapshotBuilder {
    source: Arc<dyn MetricSource>,
    timeout: Duration,
    cpu_sampling: CpuSampling,
}

impl SnapshotBuilder {
    pub fn new(source: Arc<dyn MetricSource>, timeout: Duration, cpu_sampling: CpuSampling) -> Self {
        Self {
            source,
            timeout,
            cpu_sampling,
        }
    }

    pub fn from_config(source: Arc<dyn MetricSource>, cfg: &CollectConfig) -> Self {
        let cpu_sampling = match cfg.cpu_mode {
            CpuMode::Cumulative => CpuSampling::Cumulative,
            CpuMode::Delta => CpuSampling::Delta(Duration::from_millis(cfg.cpu_delta_interval_ms)),
        };
        Self::new(source, cfg.provider_timeout(), cpu_sampling)
    }

    /// Reads every provider concurrently and waits for all of them. Never fails:
    /// errors, timeouts and panics end up in `Snapshot::provider_errors`.
    pub async fn build(&self) -> Snapshot {
        let cpu_sampling = self.cpu_sampling;
        let (memory, cpu, network, load_avg, uptime, board_temp) = tokio::join!(
            self.read(MetricKind::Memory, |s| s.memory()),
            self.read(MetricKind::Cpu, move |s| read_cpu(s, cpu_sampling)),
            self.read(MetricKind::Network, |s| s.network()),
            self.read(MetricKind::LoadAvg, |s| s.load_avg()),
            self.read(MetricKind::Uptime, |s| s.uptime()),
            self.read(MetricKind::Temperature, |s| s.board_temp()),
        );

        let snapshot = Snapshot::from_readings(
            Readings {
                memory,
                cpu,
                network,
                load_avg,
                uptime,
                board_temp,
            },
            SystemTime::now(),
        );
        for failure in &snapshot.provider_errors {
            error!(metric = %failure.kind, error = %failure.error, "failed to collect metric");
        }
        snapshot
    }

    async fn read<T, F>(&self, kind: MetricKind, f: F) -> Result<T, ProviderError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn MetricSource) -> Result<T, ProviderError> + Send + 'static,
    {
        let source = Arc::clone(&self.source);
        let started = Instant::now();
        let task = tokio::task::spawn_blocking(move || f(source.as_ref()));
        let result = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ProviderError::Panicked(join_err.to_string())),
            Err(_) => Err(ProviderError::Timeout(self.timeout)),
        };
        debug!(
            metric = %kind,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "provider finished"
        );
        result
    }
}

fn read_cpu(source: &dyn MetricSource, sampling: CpuSampling) -> Result<CpuCounters, ProviderError> {
    match sampling {
        CpuSampling::Cumulative => source.cpu(),
        CpuSampling::Delta(interval) => {
            let first = source.cpu()?;
            std::thread::sleep(interval);
            let second = source.cpu()?;
            Ok(second.since(&first))
        }
    }
}
