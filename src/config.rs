use crate::alerts::AggregationMode;
use crate::notify::ByteUnits;
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::ParseFloatError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "./hostmon.yaml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Falls back to the OS host name when unset.
    #[serde(default)]
    pub host_name: Option<String>,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub collect: CollectConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_temp_celsius")]
    pub temp_celsius: f64,
    #[serde(default = "default_mem_percent")]
    pub mem_percent: f64,
    #[serde(default = "default_cpu_percent")]
    pub cpu_percent: f64,
    #[serde(default = "default_load_avg_rules")]
    pub load_avg_rules: bool,
    /// Ceiling for `load_avg * 100`; defaults to `cpu_percent`.
    #[serde(default)]
    pub load_avg_percent: Option<f64>,
    #[serde(default)]
    pub network_rx_bytes: Option<u64>,
    #[serde(default)]
    pub network_tx_bytes: Option<u64>,
    #[serde(default)]
    pub max_uptime_secs: Option<u64>,
}

impl ThresholdConfig {
    pub fn load_avg_threshold(&self) -> f64 {
        self.load_avg_percent.unwrap_or(self.cpu_percent)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub mode: AggregationMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuMode {
    /// Single read of the since-boot counters.
    #[default]
    Cumulative,
    /// Two reads `cpu_delta_interval_ms` apart; the ratio covers only that window.
    Delta,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectConfig {
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    #[serde(default = "default_temperature_file")]
    pub temperature_file: PathBuf,
    #[serde(default)]
    pub network_interface: Option<String>,
    #[serde(default)]
    pub cpu_mode: CpuMode,
    #[serde(default = "default_cpu_delta_interval_ms")]
    pub cpu_delta_interval_ms: u64,
}

impl CollectConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    Sendmail,
    Telegram,
    Webhook,
    Log,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Sendmail => "sendmail",
            Channel::Telegram => "telegram",
            Channel::Webhook => "webhook",
            Channel::Log => "log",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub channel: Channel,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub byte_units: ByteUnits,
    #[serde(default)]
    pub sendmail: SendmailConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SendmailConfig {
    #[serde(default = "default_sendmail_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub source_email_address: String,
    #[serde(default)]
    pub target_email_address: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// node_exporter textfile-collector target, e.g. `/var/lib/node_exporter/hostmon.prom`.
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            host_name: None,
            thresholds: ThresholdConfig::default(),
            alerts: AlertsConfig::default(),
            collect: CollectConfig::default(),
            notify: NotifyConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            temp_celsius: default_temp_celsius(),
            mem_percent: default_mem_percent(),
            cpu_percent: default_cpu_percent(),
            load_avg_rules: default_load_avg_rules(),
            load_avg_percent: None,
            network_rx_bytes: None,
            network_tx_bytes: None,
            max_uptime_secs: None,
        }
    }
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            provider_timeout_secs: default_provider_timeout_secs(),
            temperature_file: default_temperature_file(),
            network_interface: None,
            cpu_mode: CpuMode::default(),
            cpu_delta_interval_ms: default_cpu_delta_interval_ms(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel: Channel::default(),
            timeout_secs: default_notify_timeout_secs(),
            byte_units: ByteUnits::default(),
            sendmail: SendmailConfig::default(),
            telegram: TelegramConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl Default for SendmailConfig {
    fn default() -> Self {
        Self {
            path: default_sendmail_path(),
            source_email_address: String::new(),
            target_email_address: String::new(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token_env: default_bot_token_env(),
            bot_token: None,
            chat_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("environment variable {var}='{value}' is not a number: {source}")]
    Env {
        var: &'static str,
        value: String,
        source: ParseFloatError,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    /// Loads the file (explicit path, or the default path when it exists), applies
    /// environment overrides and validates the result.
    pub fn resolve<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match path {
            Some(path) => Self::load_from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load_from_file(DEFAULT_CONFIG_PATH)?
            }
            None => Self::default(),
        };
        cfg.apply_env(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })
    }

    /// Applies `SERVER_NAME`, `THRESHOLD_*` and e-mail address overrides. Blank values
    /// leave the current setting in place.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env_value(&lookup, "SERVER_NAME") {
            self.server_name = v;
        }
        self.thresholds.temp_celsius =
            env_threshold(&lookup, "THRESHOLD_TEMP", self.thresholds.temp_celsius)?;
        self.thresholds.mem_percent =
            env_threshold(&lookup, "THRESHOLD_MEM", self.thresholds.mem_percent)?;
        self.thresholds.cpu_percent =
            env_threshold(&lookup, "THRESHOLD_CPU", self.thresholds.cpu_percent)?;
        if let Some(v) = env_value(&lookup, "SOURCE_EMAIL_ADDRESS") {
            self.notify.sendmail.source_email_address = v;
        }
        if let Some(v) = env_value(&lookup, "TARGET_EMAIL_ADDRESS") {
            self.notify.sendmail.target_email_address = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server_name must not be empty".to_string(),
            ));
        }

        validate_thresholds(&self.thresholds)?;
        validate_collect(&self.collect)?;
        validate_notify(&self.notify)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../hostmon.yaml.example")
    }
}

fn env_value<F>(lookup: &F, var: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_threshold<F>(lookup: &F, var: &'static str, current: f64) -> Result<f64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = env_value(lookup, var) else {
        return Ok(current);
    };
    value
        .parse::<f64>()
        .map_err(|source| ConfigError::Env { var, value, source })
}

fn validate_thresholds(t: &ThresholdConfig) -> Result<(), ConfigError> {
    if !t.temp_celsius.is_finite() || t.temp_celsius < 0.0 {
        return Err(ConfigError::Validation(
            "thresholds.temp_celsius must be a finite value >= 0".to_string(),
        ));
    }
    if !(0.0..=100.0).contains(&t.mem_percent) {
        return Err(ConfigError::Validation(
            "thresholds.mem_percent must be within 0..100".to_string(),
        ));
    }
    if !(0.0..=100.0).contains(&t.cpu_percent) {
        return Err(ConfigError::Validation(
            "thresholds.cpu_percent must be within 0..100".to_string(),
        ));
    }
    if let Some(v) = t.load_avg_percent {
        if !v.is_finite() || v < 0.0 {
            return Err(ConfigError::Validation(
                "thresholds.load_avg_percent must be a finite value >= 0".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_collect(c: &CollectConfig) -> Result<(), ConfigError> {
    if c.provider_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "collect.provider_timeout_secs must be >= 1".to_string(),
        ));
    }
    if c.temperature_file.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "collect.temperature_file must not be empty".to_string(),
        ));
    }
    if c.cpu_mode == CpuMode::Delta {
        if c.cpu_delta_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "collect.cpu_delta_interval_ms must be > 0".to_string(),
            ));
        }
        if c.cpu_delta_interval_ms >= c.provider_timeout_secs * 1000 {
            return Err(ConfigError::Validation(
                "collect.cpu_delta_interval_ms must be shorter than provider_timeout_secs"
                    .to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_notify(n: &NotifyConfig) -> Result<(), ConfigError> {
    if n.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "notify.timeout_secs must be >= 1".to_string(),
        ));
    }
    Ok(())
}

impl NotifyConfig {
    /// Settings the selected channel needs. Checked only when that channel is
    /// actually used, so `--dry-run` works without them.
    pub fn validate_channel(&self) -> Result<(), ConfigError> {
        match self.channel {
            Channel::Sendmail => {
                if self.sendmail.path.as_os_str().is_empty() {
                    return Err(ConfigError::Validation(
                        "notify.sendmail.path must not be empty".to_string(),
                    ));
                }
                for (field, value) in [
                    ("source_email_address", &self.sendmail.source_email_address),
                    ("target_email_address", &self.sendmail.target_email_address),
                ] {
                    if !looks_like_address(value) {
                        return Err(ConfigError::Validation(format!(
                            "notify.sendmail.{field} '{value}' is not a valid e-mail address"
                        )));
                    }
                }
            }
            Channel::Telegram => {
                if self.telegram.chat_ids.is_empty() {
                    return Err(ConfigError::Validation(
                        "notify.telegram.chat_ids must list at least one chat id".to_string(),
                    ));
                }
            }
            Channel::Webhook => {
                let url = self.webhook.url.trim();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::Validation(
                        "notify.webhook.url must be an http(s) URL".to_string(),
                    ));
                }
            }
            Channel::Log => {}
        }
        Ok(())
    }
}

fn looks_like_address(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !value.chars().any(|c| c.is_whitespace() || c.is_control())
}

fn default_server_name() -> String {
    "N/A".to_string()
}

const fn default_temp_celsius() -> f64 {
    60.0
}

const fn default_mem_percent() -> f64 {
    75.0
}

const fn default_cpu_percent() -> f64 {
    75.0
}

const fn default_load_avg_rules() -> bool {
    true
}

const fn default_provider_timeout_secs() -> u64 {
    5
}

fn default_temperature_file() -> PathBuf {
    PathBuf::from("/sys/class/thermal/thermal_zone0/temp")
}

const fn default_cpu_delta_interval_ms() -> u64 {
    500
}

const fn default_notify_timeout_secs() -> u64 {
    10
}

fn default_sendmail_path() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

fn default_bot_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn mail_config() -> Config {
        let mut cfg = Config::default();
        cfg.notify.sendmail.source_email_address = "monitor@example.org".to_string();
        cfg.notify.sendmail.target_email_address = "ops@example.org".to_string();
        cfg
    }

    #[test]
    fn defaults_match_documented_thresholds() {
        let cfg = Config::default();
        assert_eq!(cfg.server_name, "N/A");
        assert_eq!(cfg.thresholds.temp_celsius, 60.0);
        assert_eq!(cfg.thresholds.mem_percent, 75.0);
        assert_eq!(cfg.thresholds.cpu_percent, 75.0);
        assert!(cfg.thresholds.load_avg_rules);
        assert_eq!(cfg.alerts.mode, AggregationMode::AllOf);
        assert_eq!(cfg.notify.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.notify.channel, Channel::Sendmail);
    }

    #[test]
    fn env_overrides_thresholds_and_identity() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            ("SERVER_NAME", "pi-nas"),
            ("THRESHOLD_TEMP", "70.5"),
            ("THRESHOLD_MEM", " 80 "),
            ("SOURCE_EMAIL_ADDRESS", "pi@example.org"),
            ("TARGET_EMAIL_ADDRESS", "me@example.org"),
        ]))
        .expect("overrides are valid");

        assert_eq!(cfg.server_name, "pi-nas");
        assert_eq!(cfg.thresholds.temp_celsius, 70.5);
        assert_eq!(cfg.thresholds.mem_percent, 80.0);
        assert_eq!(cfg.thresholds.cpu_percent, 75.0);
        assert_eq!(cfg.notify.sendmail.source_email_address, "pi@example.org");
        assert_eq!(cfg.notify.sendmail.target_email_address, "me@example.org");
    }

    #[test]
    fn blank_env_values_keep_defaults() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[("SERVER_NAME", "  "), ("THRESHOLD_CPU", "")]))
            .expect("blank values are ignored");
        assert_eq!(cfg.server_name, "N/A");
        assert_eq!(cfg.thresholds.cpu_percent, 75.0);
    }

    #[test]
    fn unparsable_threshold_is_a_config_error() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env(env(&[("THRESHOLD_CPU", "seventy")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "THRESHOLD_CPU", .. }));
    }

    #[test]
    fn sendmail_requires_addresses() {
        let err = Config::default().notify.validate_channel().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        mail_config()
            .notify
            .validate_channel()
            .expect("addresses are set");
    }

    #[test]
    fn missing_addresses_do_not_fail_resolve() {
        let cfg = Config::resolve(None, env(&[])).expect("defaults resolve without addresses");
        assert_eq!(cfg.notify.channel, Channel::Sendmail);
        assert!(cfg.notify.sendmail.source_email_address.is_empty());
    }

    #[test]
    fn percent_thresholds_are_range_checked() {
        let mut cfg = mail_config();
        cfg.thresholds.mem_percent = 120.0;
        assert!(cfg.validate().is_err());

        let mut cfg = mail_config();
        cfg.thresholds.temp_celsius = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn delta_interval_must_fit_in_provider_timeout() {
        let mut cfg = mail_config();
        cfg.collect.cpu_mode = CpuMode::Delta;
        cfg.collect.provider_timeout_secs = 1;
        cfg.collect.cpu_delta_interval_ms = 1000;
        assert!(cfg.validate().is_err());

        cfg.collect.cpu_delta_interval_ms = 250;
        cfg.validate().expect("interval shorter than timeout");
    }

    #[test]
    fn channel_specific_settings_are_checked() {
        let mut n = NotifyConfig {
            channel: Channel::Telegram,
            ..NotifyConfig::default()
        };
        assert!(n.validate_channel().is_err());
        n.telegram.chat_ids = vec![42];
        n.validate_channel().expect("telegram with a chat id");

        n.channel = Channel::Webhook;
        n.webhook.url = "ftp://example.org".to_string();
        assert!(n.validate_channel().is_err());
        n.webhook.url = "https://hooks.example.org/alert".to_string();
        n.validate_channel().expect("https webhook");

        n.channel = Channel::Log;
        n.validate_channel().expect("log channel needs nothing");
    }

    #[test]
    fn yaml_sections_are_optional() {
        let cfg: Config = serde_yaml::from_str(
            "server_name: garage\nthresholds:\n  temp_celsius: 55\nalerts:\n  mode: any_of\n",
        )
        .expect("partial YAML parses");
        assert_eq!(cfg.server_name, "garage");
        assert_eq!(cfg.thresholds.temp_celsius, 55.0);
        assert_eq!(cfg.thresholds.mem_percent, 75.0);
        assert_eq!(cfg.alerts.mode, AggregationMode::AnyOf);
        assert_eq!(cfg.collect.provider_timeout_secs, 5);
    }

    #[test]
    fn example_config_parses_and_validates() {
        let cfg: Config =
            serde_yaml::from_str(Config::example_yaml()).expect("example YAML parses");
        cfg.validate().expect("example config is valid");
        assert!(
            cfg.notify.validate_channel().is_err(),
            "example must not ship working mail addresses"
        );
    }

    #[test]
    fn explicit_missing_file_is_a_read_error() {
        let err = Config::resolve(Some(Path::new("/nonexistent/hostmon.yaml")), env(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn resolve_applies_env_on_top_of_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(
            &mut file,
            b"server_name: from-file\nnotify:\n  channel: log\n",
        )
        .expect("write config");

        let cfg = Config::resolve(Some(file.path()), env(&[("THRESHOLD_TEMP", "42")]))
            .expect("config resolves");
        assert_eq!(cfg.server_name, "from-file");
        assert_eq!(cfg.thresholds.temp_celsius, 42.0);
        assert_eq!(cfg.notify.channel, Channel::Log);
    }
}
