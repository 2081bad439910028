use crate::alerts::{AlertDecision, AlertRule, Breach};
use crate::collectors::MetricKind;
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const UNAVAILABLE: &str = "unavailable";
const UNDEFINED: &str = "n/a";
const SECS_PER_DAY: u64 = 86_400;

/// Suffix style for humanized byte counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteUnits {
    /// `Bytes`, `KBytes`, `MBytes`, ...
    #[default]
    Long,
    /// `B`, `KB`, `MB`, ...
    Short,
}

impl ByteUnits {
    fn suffixes(self) -> [&'static str; 5] {
        match self {
            ByteUnits::Long => ["Bytes", "KBytes", "MBytes", "GBytes", "TBytes"],
            ByteUnits::Short => ["B", "KB", "MB", "GB", "TB"],
        }
    }
}

/// Who is reporting: rendered into every notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub server_name: String,
    pub host_name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadField {
    pub name: &'static str,
    pub value: String,
}

/// Transport-agnostic alert content. Channels decide how to render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub subject: String,
    pub fields: Vec<PayloadField>,
    /// One line per breached rule, in evaluation order.
    pub alerts: Vec<String>,
    /// Metrics whose provider failed this run.
    pub unavailable: Vec<MetricKind>,
}

impl NotificationPayload {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

/// 1024-based scaling with two decimals; values of 1024 TB and above stay in TB.
pub fn humanize_bytes(bytes: u64, units: ByteUnits) -> String {
    let suffixes = units.suffixes();
    let mut value = bytes as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < suffixes.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    format!("{value:.2}{}", suffixes[idx])
}

/// `<N>d<rest>` from one day up, plain humantime rendering below that.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    if secs < SECS_PER_DAY {
        return humantime::format_duration(uptime).to_string();
    }
    let days = secs / SECS_PER_DAY;
    let rest = uptime.saturating_sub(Duration::from_secs(days * SECS_PER_DAY));
    format!("{days}d{}", humantime::format_duration(rest))
}

pub fn describe_breach(breach: &Breach, units: ByteUnits) -> String {
    let Breach {
        rule,
        observed,
        threshold,
    } = *breach;
    match rule {
        AlertRule::Temperature => {
            format!("Board temperature {observed:.2}c above threshold {threshold:.2}c")
        }
        AlertRule::MemoryUsage => {
            format!("Memory usage {observed:.2}% above threshold {threshold:.2}%")
        }
        AlertRule::CpuUsage => format!("CPU usage {observed:.2}% above threshold {threshold:.2}%"),
        AlertRule::LoadAvg5 => {
            format!("CPU load avg (5min) {observed:.2}% above threshold {threshold:.2}%")
        }
        AlertRule::LoadAvg15 => {
            format!("CPU load avg (15min) {observed:.2}% above threshold {threshold:.2}%")
        }
        AlertRule::NetworkRx => format!(
            "Network rx {} above threshold {}",
            humanize_bytes(observed as u64, units),
            humanize_bytes(threshold as u64, units)
        ),
        AlertRule::NetworkTx => format!(
            "Network tx {} above threshold {}",
            humanize_bytes(observed as u64, units),
            humanize_bytes(threshold as u64, units)
        ),
        AlertRule::Uptime => format!(
            "Uptime {} above threshold {}",
            format_uptime(Duration::from_secs_f64(observed)),
            format_uptime(Duration::from_secs_f64(threshold))
        ),
    }
}

pub fn compose(
    snapshot: &Snapshot,
    decision: &AlertDecision,
    identity: &Identity,
    units: ByteUnits,
) -> NotificationPayload {
    let value = |kind: MetricKind, render: &dyn Fn() -> String| {
        if snapshot.is_collected(kind) {
            render()
        } else {
            UNAVAILABLE.to_string()
        }
    };
    let percent = |v: Option<f64>| v.map_or_else(|| UNDEFINED.to_string(), |p| format!("{p:.2}%"));

    let fields = vec![
        PayloadField {
            name: "Board temperature",
            value: value(MetricKind::Temperature, &|| {
                format!("{:.2}c", snapshot.board_temp_celsius)
            }),
        },
        PayloadField {
            name: "Memory used",
            value: value(MetricKind::Memory, &|| {
                humanize_bytes(snapshot.memory_used, units)
            }),
        },
        PayloadField {
            name: "Memory total",
            value: value(MetricKind::Memory, &|| {
                humanize_bytes(snapshot.memory_total, units)
            }),
        },
        PayloadField {
            name: "Memory used percent",
            value: value(MetricKind::Memory, &|| percent(snapshot.memory_used_percent)),
        },
        PayloadField {
            name: "CPU usage percent",
            value: value(MetricKind::Cpu, &|| percent(snapshot.cpu_used_percent)),
        },
        PayloadField {
            name: "CPU load average",
            value: value(MetricKind::LoadAvg, &|| {
                format!(
                    "{:.2}, {:.2}, {:.2}",
                    snapshot.load_avg_1, snapshot.load_avg_5, snapshot.load_avg_15
                )
            }),
        },
        PayloadField {
            name: "Network interface",
            value: value(MetricKind::Network, &|| snapshot.net_name.clone()),
        },
        PayloadField {
            name: "Network rx",
            value: value(MetricKind::Network, &|| {
                humanize_bytes(snapshot.net_rx_bytes, units)
            }),
        },
        PayloadField {
            name: "Network tx",
            value: value(MetricKind::Network, &|| {
                humanize_bytes(snapshot.net_tx_bytes, units)
            }),
        },
        PayloadField {
            name: "Uptime",
            value: value(MetricKind::Uptime, &|| format_uptime(snapshot.uptime)),
        },
        PayloadField {
            name: "Date/time",
            value: humantime::format_rfc3339_seconds(snapshot.collected_at).to_string(),
        },
        PayloadField {
            name: "Server name",
            value: identity.server_name.clone(),
        },
        PayloadField {
            name: "Host name",
            value: identity.host_name.clone(),
        },
        PayloadField {
            name: "Version",
            value: identity.version.clone(),
        },
    ];

    NotificationPayload {
        subject: format!("{} hostmon alert", identity.server_name),
        fields,
        alerts: decision
            .reasons()
            .iter()
            .map(|b| describe_breach(b, units))
            .collect(),
        unavailable: snapshot.provider_errors.iter().map(|f| f.kind).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{evaluate, AggregationMode};
    use crate::collectors::{
        CpuCounters, LoadAvg, MemoryCounters, NetworkCounters, ProviderError,
    };
    use crate::config::ThresholdConfig;
    use crate::snapshot::Readings;
    use std::time::UNIX_EPOCH;

    const KIB: u64 = 1024;

    fn identity() -> Identity {
        Identity {
            server_name: "garage-pi".to_string(),
            host_name: "raspberrypi".to_string(),
            version: "0.1.0".to_string(),
        }
    }

    fn readings() -> Readings {
        Readings {
            memory: Ok(MemoryCounters {
                total: 4 * KIB * KIB * KIB,
                used: 3 * KIB * KIB * KIB,
                free: KIB * KIB * KIB,
            }),
            cpu: Ok(CpuCounters {
                total: 1000,
                idle: 250,
                ..CpuCounters::default()
            }),
            network: Ok(NetworkCounters {
                name: "eth0".to_string(),
                rx_bytes: 1536,
                tx_bytes: 5 * KIB * KIB,
            }),
            load_avg: Ok(LoadAvg {
                one: 0.5,
                five: 0.25,
                fifteen: 0.1,
            }),
            uptime: Ok(Duration::from_secs(25 * 3600)),
            board_temp: Ok(61.5),
        }
    }

    fn snapshot(readings: Readings) -> Snapshot {
        Snapshot::from_readings(readings, UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }

    #[test]
    fn humanize_below_one_kilobyte_keeps_bytes() {
        assert_eq!(humanize_bytes(0, ByteUnits::Long), "0.00Bytes");
        assert_eq!(humanize_bytes(1023, ByteUnits::Long), "1023.00Bytes");
        assert_eq!(humanize_bytes(1023, ByteUnits::Short), "1023.00B");
    }

    #[test]
    fn humanize_switches_units_at_1024() {
        assert_eq!(humanize_bytes(1024, ByteUnits::Long), "1.00KBytes");
        assert!(humanize_bytes(1024, ByteUnits::Short).ends_with("KB"));
        assert_eq!(humanize_bytes(1536, ByteUnits::Short), "1.50KB");
        assert_eq!(humanize_bytes(KIB * KIB, ByteUnits::Long), "1.00MBytes");
        assert_eq!(humanize_bytes(3 * KIB * KIB * KIB, ByteUnits::Long), "3.00GBytes");
    }

    #[test]
    fn humanize_caps_at_terabytes() {
        let tib = KIB.pow(4);
        assert_eq!(humanize_bytes(tib, ByteUnits::Long), "1.00TBytes");
        assert_eq!(humanize_bytes(tib, ByteUnits::Short), "1.00TB");
        assert_eq!(humanize_bytes(2048 * tib, ByteUnits::Short), "2048.00TB");
    }

    #[test]
    fn humanize_is_monotonic_across_unit_boundaries() {
        let rank = |bytes: u64| -> (usize, f64) {
            let s = humanize_bytes(bytes, ByteUnits::Short);
            let split = s
                .find(|c: char| c.is_ascii_alphabetic())
                .expect("unit suffix present");
            let (number, unit) = s.split_at(split);
            let unit_idx = ["B", "KB", "MB", "GB", "TB"]
                .iter()
                .position(|u| *u == unit)
                .expect("known unit");
            (unit_idx, number.parse().expect("numeric prefix"))
        };
        let samples = [0, 1000, 1023, 1024, 1500, 1_048_575, 1_048_576, 5_000_000];
        for pair in samples.windows(2) {
            assert!(
                rank(pair[0]) <= rank(pair[1]),
                "{} rendered above {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn uptime_of_a_day_or_more_gets_day_prefix() {
        assert_eq!(format_uptime(Duration::from_secs(25 * 3600)), "1d1h");
        assert_eq!(format_uptime(Duration::from_secs(86_400)), "1d0s");
        assert_eq!(
            format_uptime(Duration::from_secs(3 * 86_400 + 90)),
            "3d1m 30s"
        );
    }

    #[test]
    fn uptime_under_a_day_uses_plain_duration() {
        let rendered = format_uptime(Duration::from_secs(23 * 3600));
        assert_eq!(rendered, "23h");
        assert!(!rendered.contains('d'));
    }

    #[test]
    fn composed_fields_follow_documented_order() {
        let snap = snapshot(readings());
        let decision = evaluate(&snap, &ThresholdConfig::default(), AggregationMode::AllOf);
        let payload = compose(&snap, &decision, &identity(), ByteUnits::Long);

        let names: Vec<&str> = payload.fields.iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            vec![
                "Board temperature",
                "Memory used",
                "Memory total",
                "Memory used percent",
                "CPU usage percent",
                "CPU load average",
                "Network interface",
                "Network rx",
                "Network tx",
                "Uptime",
                "Date/time",
                "Server name",
                "Host name",
                "Version",
            ]
        );
        assert_eq!(payload.subject, "garage-pi hostmon alert");
        assert_eq!(payload.field("Board temperature"), Some("61.50c"));
        assert_eq!(payload.field("Memory used"), Some("3.00GBytes"));
        assert_eq!(payload.field("Memory total"), Some("4.00GBytes"));
        assert_eq!(payload.field("Memory used percent"), Some("75.00%"));
        assert_eq!(payload.field("CPU usage percent"), Some("75.00%"));
        assert_eq!(payload.field("CPU load average"), Some("0.50, 0.25, 0.10"));
        assert_eq!(payload.field("Network rx"), Some("1.50KBytes"));
        assert_eq!(payload.field("Network tx"), Some("5.00MBytes"));
        assert_eq!(payload.field("Uptime"), Some("1d1h"));
        assert_eq!(payload.field("Date/time"), Some("2023-11-14T22:13:20Z"));
        assert_eq!(payload.field("Host name"), Some("raspberrypi"));
        assert_eq!(payload.field("Version"), Some("0.1.0"));
        assert_eq!(
            payload.alerts,
            vec!["Board temperature 61.50c above threshold 60.00c".to_string()]
        );
        assert!(payload.unavailable.is_empty());
    }

    #[test]
    fn failed_metrics_render_as_unavailable() {
        let mut r = readings();
        r.network = Err(ProviderError::NotFound("no network interface found".to_string()));
        r.cpu = Ok(CpuCounters::default());
        let snap = snapshot(r);
        let payload = compose(&snap, &AlertDecision::default(), &identity(), ByteUnits::Short);

        assert_eq!(payload.field("Network interface"), Some("unavailable"));
        assert_eq!(payload.field("Network rx"), Some("unavailable"));
        assert_eq!(payload.field("CPU usage percent"), Some("n/a"));
        assert_eq!(payload.field("Memory total"), Some("4.00GB"));
        assert_eq!(payload.unavailable, vec![MetricKind::Network]);
        assert!(payload.alerts.is_empty());
    }

    #[test]
    fn breach_descriptions_cover_extended_rules() {
        let rx = Breach {
            rule: AlertRule::NetworkRx,
            observed: 2048.0,
            threshold: 1024.0,
        };
        assert_eq!(
            describe_breach(&rx, ByteUnits::Short),
            "Network rx 2.00KB above threshold 1.00KB"
        );

        let uptime = Breach {
            rule: AlertRule::Uptime,
            observed: 90_000.0,
            threshold: 3600.0,
        };
        assert_eq!(
            describe_breach(&uptime, ByteUnits::Long),
            "Uptime 1d1h above threshold 1h"
        );

        let load = Breach {
            rule: AlertRule::LoadAvg15,
            observed: 120.0,
            threshold: 75.0,
        };
        assert_eq!(
            describe_breach(&load, ByteUnits::Long),
            "CPU load avg (15min) 120.00% above threshold 75.00%"
        );
    }
}
