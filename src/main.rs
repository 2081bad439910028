mod alerts;
mod collectors;
mod config;
mod cycle;
mod dispatch;
mod metrics;
mod notify;
mod snapshot;

use clap::Parser;
use collectors::system::{host_name, SystemSource};
use config::Config;
use cycle::run_cycle;
use metrics::Metrics;
use notify::Identity;
use snapshot::SnapshotBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const ENV_FILE: &str = ".env";
const EXIT_CONFIG: i32 = 1;
const EXIT_RUNTIME: i32 = 4;

#[derive(Parser, Debug)]
#[command(name = "hostmon")]
#[command(version, about = "One-shot host health check with threshold alerts")]
struct Cli {
    /// YAML config; defaults to ./hostmon.yaml when that file exists.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
    /// Log the alert instead of delivering it.
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    // before tracing so RUST_LOG from .env applies
    let env_file = load_env_file(Path::new(ENV_FILE));
    init_tracing();
    match env_file {
        Ok(Some(path)) => debug!(path = %path.display(), "loaded environment file"),
        Ok(None) => {}
        Err(err) => warn!(error = %err, "failed to load {ENV_FILE}"),
    }

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            error!(error = %err, "failed to start tokio runtime");
            std::process::exit(EXIT_RUNTIME);
        }
    };

    let code = runtime.block_on(run(cli));
    // hung provider threads must not keep the process alive
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let started = Instant::now();

    let cfg = match Config::resolve(cli.config.as_deref(), |name| std::env::var(name).ok()) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            return EXIT_CONFIG;
        }
    };

    info!(
        temp_celsius = cfg.thresholds.temp_celsius,
        mem_percent = cfg.thresholds.mem_percent,
        cpu_percent = cfg.thresholds.cpu_percent,
        load_avg_percent = cfg.thresholds.load_avg_threshold(),
        mode = ?cfg.alerts.mode,
        channel = cfg.notify.channel.as_str(),
        "starting hostmon"
    );

    let dispatcher = match dispatch::from_config(&cfg.notify, cli.dry_run) {
        Ok(d) => d,
        Err(err) => {
            error!(error = %err, "failed to set up alert channel");
            return EXIT_CONFIG;
        }
    };

    let identity = Identity {
        server_name: cfg.server_name.clone(),
        host_name: cfg
            .host_name
            .clone()
            .or_else(host_name)
            .unwrap_or_else(|| "N/A".to_string()),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let source = Arc::new(SystemSource::new(&cfg.collect));
    let builder = SnapshotBuilder::from_config(source, &cfg.collect);
    let report = run_cycle(&builder, &cfg, &identity, dispatcher.as_ref()).await;

    if let Some(path) = &cfg.metrics.textfile {
        export_textfile(path, &report, started).await;
    }

    let code = report.outcome.exit_code();
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        exit_code = code,
        "executed in {} ms",
        started.elapsed().as_millis()
    );
    code
}

/// Variables already set in the process environment win over the file.
/// A missing file is not an error.
fn load_env_file(path: &Path) -> Result<Option<PathBuf>, dotenvy::Error> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(Some(path.to_path_buf())),
        Err(err) if err.not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

async fn export_textfile(path: &Path, report: &cycle::CycleReport, started: Instant) {
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            warn!(error = %err, "failed to initialise metrics");
            return;
        }
    };
    metrics.update_from_snapshot(&report.snapshot);
    metrics.update_from_decision(&report.decision, report.outcome.delivered());
    metrics.set_run_duration(started.elapsed());
    if let Err(err) = metrics.write_textfile(path).await {
        warn!(error = %err, path = %path.display(), "failed to write metrics textfile");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
