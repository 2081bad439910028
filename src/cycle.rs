use crate::alerts::{evaluate, AlertDecision};
use crate::collectors::MetricKind;
use crate::config::Config;
use crate::dispatch::{dispatch_with_timeout, AlertDispatcher, DispatchError};
use crate::notify::{compose, humanize_bytes, format_uptime, Identity, NotificationPayload};
use crate::snapshot::{Snapshot, SnapshotBuilder};
use tracing::{error, info, warn};

/// How a run ended. Maps one-to-one onto the process exit code.
#[derive(Debug)]
pub enum CycleOutcome {
    Healthy,
    AlertDelivered,
    AlertUndelivered(DispatchError),
    /// No provider answered, so nothing could be evaluated.
    CollectionFailed,
}

impl CycleOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            CycleOutcome::Healthy | CycleOutcome::AlertDelivered => 0,
            CycleOutcome::CollectionFailed => 2,
            CycleOutcome::AlertUndelivered(_) => 3,
        }
    }

    /// `None` when no delivery was attempted.
    pub fn delivered(&self) -> Option<bool> {
        match self {
            CycleOutcome::AlertDelivered => Some(true),
            CycleOutcome::AlertUndelivered(_) => Some(false),
            CycleOutcome::Healthy | CycleOutcome::CollectionFailed => None,
        }
    }
}

#[derive(Debug)]
pub struct CycleReport {
    pub snapshot: Snapshot,
    pub decision: AlertDecision,
    pub payload: Option<NotificationPayload>,
    pub outcome: CycleOutcome,
}

/// Collect, evaluate and, when a threshold is breached, notify once.
pub async fn run_cycle(
    builder: &SnapshotBuilder,
    cfg: &Config,
    identity: &Identity,
    dispatcher: &dyn AlertDispatcher,
) -> CycleReport {
    let snapshot = builder.build().await;
    log_snapshot(&snapshot, cfg);

    let decision = evaluate(&snapshot, &cfg.thresholds, cfg.alerts.mode);

    if snapshot.all_failed() {
        error!("no metric could be collected");
        return CycleReport {
            snapshot,
            decision,
            payload: None,
            outcome: CycleOutcome::CollectionFailed,
        };
    }

    if !decision.breached() {
        info!("all thresholds ok, no alert");
        return CycleReport {
            snapshot,
            decision,
            payload: None,
            outcome: CycleOutcome::Healthy,
        };
    }

    let payload = compose(&snapshot, &decision, identity, cfg.notify.byte_units);
    let outcome =
        match dispatch_with_timeout(dispatcher, &payload, cfg.notify.timeout()).await {
            Ok(()) => {
                info!(channel = dispatcher.name(), reasons = decision.reasons().len(), "alert delivered");
                CycleOutcome::AlertDelivered
            }
            Err(err) => {
                error!(channel = dispatcher.name(), error = %err, "alert could not be delivered");
                CycleOutcome::AlertUndelivered(err)
            }
        };

    CycleReport {
        snapshot,
        decision,
        payload: Some(payload),
        outcome,
    }
}

fn log_snapshot(s: &Snapshot, cfg: &Config) {
    let units = cfg.notify.byte_units;
    if s.is_collected(MetricKind::Memory) {
        info!(
            total = %humanize_bytes(s.memory_total, units),
            used = %humanize_bytes(s.memory_used, units),
            free = %humanize_bytes(s.memory_free, units),
            used_percent = ?s.memory_used_percent,
            "memory"
        );
    }
    if s.is_collected(MetricKind::Cpu) {
        info!(
            user = s.cpu_user,
            system = s.cpu_system,
            idle = s.cpu_idle,
            total = s.cpu_total,
            used_percent = ?s.cpu_used_percent,
            "cpu"
        );
    }
    if s.is_collected(MetricKind::LoadAvg) {
        info!(
            one = s.load_avg_1,
            five = s.load_avg_5,
            fifteen = s.load_avg_15,
            "load average"
        );
    }
    if s.is_collected(MetricKind::Network) {
        info!(
            iface = %s.net_name,
            rx = %humanize_bytes(s.net_rx_bytes, units),
            tx = %humanize_bytes(s.net_tx_bytes, units),
            "network"
        );
    }
    if s.is_collected(MetricKind::Uptime) {
        info!(uptime = %format_uptime(s.uptime), "uptime");
    }
    if s.is_collected(MetricKind::Temperature) {
        info!(celsius = s.board_temp_celsius, "board temperature");
    }
    if !s.provider_errors.is_empty() {
        let failed: Vec<&str> = s.provider_errors.iter().map(|f| f.kind.as_str()).collect();
        warn!(failed = ?failed, "snapshot is partial");
    }
}
