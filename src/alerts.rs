use crate::collectors::MetricKind;
use crate::config::ThresholdConfig;
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// How many breaches a single evaluation reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Stop at the first breached rule.
    AnyOf,
    /// Evaluate every rule and report all breaches.
    #[default]
    AllOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertRule {
    Temperature,
    MemoryUsage,
    CpuUsage,
    LoadAvg5,
    LoadAvg15,
    NetworkRx,
    NetworkTx,
    Uptime,
}

impl AlertRule {
    /// Evaluation order; breaches are reported in this order.
    pub const ORDER: [AlertRule; 8] = [
        AlertRule::Temperature,
        AlertRule::MemoryUsage,
        AlertRule::CpuUsage,
        AlertRule::LoadAvg5,
        AlertRule::LoadAvg15,
        AlertRule::NetworkRx,
        AlertRule::NetworkTx,
        AlertRule::Uptime,
    ];

    pub fn metric(self) -> MetricKind {
        match self {
            AlertRule::Temperature => MetricKind::Temperature,
            AlertRule::MemoryUsage => MetricKind::Memory,
            AlertRule::CpuUsage => MetricKind::Cpu,
            AlertRule::LoadAvg5 | AlertRule::LoadAvg15 => MetricKind::LoadAvg,
            AlertRule::NetworkRx | AlertRule::NetworkTx => MetricKind::Network,
            AlertRule::Uptime => MetricKind::Uptime,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertRule::Temperature => "temperature",
            AlertRule::MemoryUsage => "memory_usage",
            AlertRule::CpuUsage => "cpu_usage",
            AlertRule::LoadAvg5 => "load_avg_5",
            AlertRule::LoadAvg15 => "load_avg_15",
            AlertRule::NetworkRx => "network_rx",
            AlertRule::NetworkTx => "network_tx",
            AlertRule::Uptime => "uptime",
        }
    }
}

impl fmt::Display for AlertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule whose observed value was strictly above its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Breach {
    pub rule: AlertRule,
    pub observed: f64,
    pub threshold: f64,
}

/// Verdict of one evaluation; breached iff `reasons` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertDecision {
    reasons: Vec<Breach>,
}

impl AlertDecision {
    pub fn breached(&self) -> bool {
        !self.reasons.is_empty()
    }

    pub fn reasons(&self) -> &[Breach] {
        &self.reasons
    }
}

pub fn evaluate(
    snapshot: &Snapshot,
    thresholds: &ThresholdConfig,
    mode: AggregationMode,
) -> AlertDecision {
    let mut reasons = Vec::new();
    for rule in AlertRule::ORDER {
        let Some(breach) = check_rule(rule, snapshot, thresholds) else {
            continue;
        };
        info!(
            rule = %breach.rule,
            observed = breach.observed,
            threshold = breach.threshold,
            "threshold breached"
        );
        reasons.push(breach);
        if mode == AggregationMode::AnyOf {
            break;
        }
    }
    AlertDecision { reasons }
}

fn check_rule(rule: AlertRule, snapshot: &Snapshot, t: &ThresholdConfig) -> Option<Breach> {
    if !snapshot.is_collected(rule.metric()) {
        return None;
    }

    let (observed, threshold) = match rule {
        AlertRule::Temperature => (snapshot.board_temp_celsius, t.temp_celsius),
        AlertRule::MemoryUsage => (snapshot.memory_used_percent?, t.mem_percent),
        AlertRule::CpuUsage => (snapshot.cpu_used_percent?, t.cpu_percent),
        AlertRule::LoadAvg5 if t.load_avg_rules => {
            (snapshot.load_avg_5 * 100.0, t.load_avg_threshold())
        }
        AlertRule::LoadAvg15 if t.load_avg_rules => {
            (snapshot.load_avg_15 * 100.0, t.load_avg_threshold())
        }
        AlertRule::LoadAvg5 | AlertRule::LoadAvg15 => return None,
        AlertRule::NetworkRx => (snapshot.net_rx_bytes as f64, t.network_rx_bytes? as f64),
        AlertRule::NetworkTx => (snapshot.net_tx_bytes as f64, t.network_tx_bytes? as f64),
        AlertRule::Uptime => (snapshot.uptime.as_secs_f64(), t.max_uptime_secs? as f64),
    };

    (observed > threshold).then_some(Breach {
        rule,
        observed,
        threshold,
    })
}
