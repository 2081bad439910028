use crate::alerts::{AlertDecision, AlertRule};
use crate::collectors::MetricKind;
use crate::snapshot::Snapshot;
use prometheus::core::Collector;
use prometheus::{opts, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Gauges describing the last run, for node_exporter's textfile collector.
/// Values that could not be collected or are undefined are exported as NaN.
pub struct Metrics {
    registry: Registry,
    pub hostmon_memory_total_bytes: Gauge,
    pub hostmon_memory_used_bytes: Gauge,
    pub hostmon_memory_free_bytes: Gauge,
    pub hostmon_memory_used_percent: Gauge,
    pub hostmon_cpu_used_percent: Gauge,
    pub hostmon_load_average: GaugeVec,
    pub hostmon_net_rx_bytes_total: GaugeVec,
    pub hostmon_net_tx_bytes_total: GaugeVec,
    pub hostmon_uptime_seconds: Gauge,
    pub hostmon_board_temperature_celsius: Gauge,
    pub hostmon_provider_up: GaugeVec,
    pub hostmon_alert_breached: Gauge,
    pub hostmon_alert_rule_breached: GaugeVec,
    pub hostmon_alert_delivered: Gauge,
    pub hostmon_last_run_timestamp_seconds: Gauge,
    pub hostmon_run_duration_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let hostmon_memory_total_bytes =
            Gauge::with_opts(opts!("hostmon_memory_total_bytes", "Total memory in bytes"))?;
        let hostmon_memory_used_bytes =
            Gauge::with_opts(opts!("hostmon_memory_used_bytes", "Used memory in bytes"))?;
        let hostmon_memory_free_bytes =
            Gauge::with_opts(opts!("hostmon_memory_free_bytes", "Free memory in bytes"))?;
        let hostmon_memory_used_percent = Gauge::with_opts(opts!(
            "hostmon_memory_used_percent",
            "Used memory in percent (0..100)"
        ))?;
        let hostmon_cpu_used_percent = Gauge::with_opts(opts!(
            "hostmon_cpu_used_percent",
            "Non-idle share of CPU ticks in percent (0..100)"
        ))?;
        let hostmon_load_average = GaugeVec::new(
            opts!("hostmon_load_average", "System load average by window"),
            &["window"],
        )?;
        let hostmon_net_rx_bytes_total = GaugeVec::new(
            opts!(
                "hostmon_net_rx_bytes_total",
                "Received bytes since boot on the monitored interface"
            ),
            &["iface"],
        )?;
        let hostmon_net_tx_bytes_total = GaugeVec::new(
            opts!(
                "hostmon_net_tx_bytes_total",
                "Transmitted bytes since boot on the monitored interface"
            ),
            &["iface"],
        )?;
        let hostmon_uptime_seconds =
            Gauge::with_opts(opts!("hostmon_uptime_seconds", "Host uptime in seconds"))?;
        let hostmon_board_temperature_celsius = Gauge::with_opts(opts!(
            "hostmon_board_temperature_celsius",
            "Board temperature in Celsius"
        ))?;
        let hostmon_provider_up = GaugeVec::new(
            opts!(
                "hostmon_provider_up",
                "Whether the metric provider answered in the last run (1/0)"
            ),
            &["provider"],
        )?;
        let hostmon_alert_breached = Gauge::with_opts(opts!(
            "hostmon_alert_breached",
            "Whether any threshold was breached in the last run (1/0)"
        ))?;
        let hostmon_alert_rule_breached = GaugeVec::new(
            opts!(
                "hostmon_alert_rule_breached",
                "Whether the rule was reported as breached in the last run (1/0)"
            ),
            &["rule"],
        )?;
        let hostmon_alert_delivered = Gauge::with_opts(opts!(
            "hostmon_alert_delivered",
            "Whether the last alert reached its channel (1/0, NaN when nothing was sent)"
        ))?;
        let hostmon_last_run_timestamp_seconds = Gauge::with_opts(opts!(
            "hostmon_last_run_timestamp_seconds",
            "Unix timestamp of the last snapshot"
        ))?;
        let hostmon_run_duration_seconds = Gauge::with_opts(opts!(
            "hostmon_run_duration_seconds",
            "Wall time of the last run in seconds"
        ))?;

        register(&registry, &hostmon_memory_total_bytes)?;
        register(&registry, &hostmon_memory_used_bytes)?;
        register(&registry, &hostmon_memory_free_bytes)?;
        register(&registry, &hostmon_memory_used_percent)?;
        register(&registry, &hostmon_cpu_used_percent)?;
        register(&registry, &hostmon_load_average)?;
        register(&registry, &hostmon_net_rx_bytes_total)?;
        register(&registry, &hostmon_net_tx_bytes_total)?;
        register(&registry, &hostmon_uptime_seconds)?;
        register(&registry, &hostmon_board_temperature_celsius)?;
        register(&registry, &hostmon_provider_up)?;
        register(&registry, &hostmon_alert_breached)?;
        register(&registry, &hostmon_alert_rule_breached)?;
        register(&registry, &hostmon_alert_delivered)?;
        register(&registry, &hostmon_last_run_timestamp_seconds)?;
        register(&registry, &hostmon_run_duration_seconds)?;

        Ok(Self {
            registry,
            hostmon_memory_total_bytes,
            hostmon_memory_used_bytes,
            hostmon_memory_free_bytes,
            hostmon_memory_used_percent,
            hostmon_cpu_used_percent,
            hostmon_load_average,
            hostmon_net_rx_bytes_total,
            hostmon_net_tx_bytes_total,
            hostmon_uptime_seconds,
            hostmon_board_temperature_celsius,
            hostmon_provider_up,
            hostmon_alert_breached,
            hostmon_alert_rule_breached,
            hostmon_alert_delivered,
            hostmon_last_run_timestamp_seconds,
            hostmon_run_duration_seconds,
        })
    }

    pub fn update_from_snapshot(&self, snapshot: &Snapshot) {
        for kind in MetricKind::ALL {
            self.hostmon_provider_up
                .with_label_values(&[kind.as_str()])
                .set(if snapshot.is_collected(kind) { 1.0 } else { 0.0 });
        }

        let memory = snapshot.is_collected(MetricKind::Memory);
        self.hostmon_memory_total_bytes
            .set(value_or_nan(memory, snapshot.memory_total as f64));
        self.hostmon_memory_used_bytes
            .set(value_or_nan(memory, snapshot.memory_used as f64));
        self.hostmon_memory_free_bytes
            .set(value_or_nan(memory, snapshot.memory_free as f64));
        self.hostmon_memory_used_percent
            .set(snapshot.memory_used_percent.unwrap_or(f64::NAN));
        self.hostmon_cpu_used_percent
            .set(snapshot.cpu_used_percent.unwrap_or(f64::NAN));

        let load = snapshot.is_collected(MetricKind::LoadAvg);
        for (window, value) in [
            ("1m", snapshot.load_avg_1),
            ("5m", snapshot.load_avg_5),
            ("15m", snapshot.load_avg_15),
        ] {
            self.hostmon_load_average
                .with_label_values(&[window])
                .set(value_or_nan(load, value));
        }

        if snapshot.is_collected(MetricKind::Network) {
            let iface = snapshot.net_name.as_str();
            self.hostmon_net_rx_bytes_total
                .with_label_values(&[iface])
                .set(snapshot.net_rx_bytes as f64);
            self.hostmon_net_tx_bytes_total
                .with_label_values(&[iface])
                .set(snapshot.net_tx_bytes as f64);
        }

        self.hostmon_uptime_seconds.set(value_or_nan(
            snapshot.is_collected(MetricKind::Uptime),
            snapshot.uptime.as_secs_f64(),
        ));
        self.hostmon_board_temperature_celsius.set(value_or_nan(
            snapshot.is_collected(MetricKind::Temperature),
            snapshot.board_temp_celsius,
        ));

        let collected_at = snapshot
            .collected_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.hostmon_last_run_timestamp_seconds.set(collected_at);
    }

    /// `delivered` is `None` when no alert was attempted.
    pub fn update_from_decision(&self, decision: &AlertDecision, delivered: Option<bool>) {
        self.hostmon_alert_breached
            .set(if decision.breached() { 1.0 } else { 0.0 });
        for rule in AlertRule::ORDER {
            let hit = decision.reasons().iter().any(|b| b.rule == rule);
            self.hostmon_alert_rule_breached
                .with_label_values(&[rule.as_str()])
                .set(if hit { 1.0 } else { 0.0 });
        }
        self.hostmon_alert_delivered.set(match delivered {
            Some(true) => 1.0,
            Some(false) => 0.0,
            None => f64::NAN,
        });
    }

    pub fn set_run_duration(&self, elapsed: Duration) {
        self.hostmon_run_duration_seconds.set(elapsed.as_secs_f64());
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }

    /// Writes next to `path` and renames over it, so the collector never reads a
    /// half-written file.
    pub async fn write_textfile(&self, path: &Path) -> Result<(), MetricsError> {
        let body = self.encode_metrics()?;
        let mut tmp = OsString::from(path.as_os_str());
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|source| MetricsError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|source| MetricsError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn value_or_nan(collected: bool, value: f64) -> f64 {
    if collected {
        value
    } else {
        f64::NAN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{evaluate, AggregationMode};
    use crate::config::ThresholdConfig;
    use crate::snapshot::tests::FakeSource;
    use crate::snapshot::{CpuSampling, SnapshotBuilder};
    use std::sync::Arc;

    async fn snapshot(source: FakeSource) -> Snapshot {
        SnapshotBuilder::new(Arc::new(source), Duration::from_secs(1), CpuSampling::Cumulative)
            .build()
            .await
    }

    fn encoded(metrics: &Metrics) -> String {
        String::from_utf8(metrics.encode_metrics().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn snapshot_values_are_exported() {
        let metrics = Metrics::new().unwrap();
        metrics.update_from_snapshot(&snapshot(FakeSource::healthy()).await);
        let text = encoded(&metrics);

        assert!(text.contains("hostmon_memory_used_percent 25"));
        assert!(text.contains("hostmon_cpu_used_percent 40"));
        assert!(text.contains("hostmon_board_temperature_celsius 45"));
        assert!(text.contains("hostmon_net_rx_bytes_total{iface=\"eth0\"} 1024"));
        assert!(text.contains("hostmon_load_average{window=\"5m\"} 0.3"));
        assert!(text.contains("hostmon_provider_up{provider=\"temperature\"} 1"));
    }

    #[tokio::test]
    async fn failed_provider_is_down_and_nan() {
        let metrics = Metrics::new().unwrap();
        let source = FakeSource {
            temp: None,
            network: None,
            ..FakeSource::healthy()
        };
        metrics.update_from_snapshot(&snapshot(source).await);
        let text = encoded(&metrics);

        assert!(text.contains("hostmon_provider_up{provider=\"temperature\"} 0"));
        assert!(text.contains("hostmon_board_temperature_celsius NaN"));
        assert!(!text.contains("hostmon_net_rx_bytes_total{"));
        assert!(text.contains("hostmon_provider_up{provider=\"memory\"} 1"));
    }

    #[tokio::test]
    async fn decision_marks_breached_rules() {
        let metrics = Metrics::new().unwrap();
        let snap = snapshot(FakeSource {
            temp: Some(70.0),
            ..FakeSource::healthy()
        })
        .await;
        let decision = evaluate(&snap, &ThresholdConfig::default(), AggregationMode::AllOf);
        metrics.update_from_decision(&decision, Some(false));
        let text = encoded(&metrics);

        assert!(text.contains("hostmon_alert_breached 1"));
        assert!(text.contains("hostmon_alert_rule_breached{rule=\"temperature\"} 1"));
        assert!(text.contains("hostmon_alert_rule_breached{rule=\"memory_usage\"} 0"));
        assert!(text.contains("hostmon_alert_delivered 0"));
    }

    #[tokio::test]
    async fn textfile_is_replaced_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostmon.prom");
        std::fs::write(&path, "stale").unwrap();

        let metrics = Metrics::new().unwrap();
        metrics.set_run_duration(Duration::from_millis(1500));
        metrics.write_textfile(&path).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("hostmon_run_duration_seconds 1.5"));
        assert!(!dir.path().join("hostmon.prom.tmp").exists());
    }

    #[tokio::test]
    async fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent").join("hostmon.prom");
        let metrics = Metrics::new().unwrap();
        assert!(matches!(
            metrics.write_textfile(&path).await,
            Err(MetricsError::Io { .. })
        ));
    }
}
