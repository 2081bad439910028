pub mod sendmail;
pub mod telegram;
pub mod webhook;

use crate::config::{Channel, ConfigError, NotifyConfig};
use crate::notify::NotificationPayload;
use async_trait::async_trait;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("I/O error while talking to {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Status {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("Telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("delivery did not finish within {0:?}")]
    Timeout(Duration),
}

/// Delivery backend for a composed alert.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn dispatch(&self, payload: &NotificationPayload) -> Result<(), DispatchError>;
}

/// Builds the dispatcher for the configured channel. `dry_run` forces the log channel.
pub fn from_config(
    cfg: &NotifyConfig,
    dry_run: bool,
) -> Result<Box<dyn AlertDispatcher>, ConfigError> {
    if dry_run {
        return Ok(Box::new(LogDispatcher));
    }
    cfg.validate_channel()?;
    let dispatcher: Box<dyn AlertDispatcher> = match cfg.channel {
        Channel::Sendmail => Box::new(sendmail::SendmailDispatcher::new(&cfg.sendmail)),
        Channel::Telegram => Box::new(telegram::TelegramDispatcher::from_config(&cfg.telegram)?),
        Channel::Webhook => Box::new(webhook::WebhookDispatcher::new(&cfg.webhook, cfg.timeout())),
        Channel::Log => Box::new(LogDispatcher),
    };
    Ok(dispatcher)
}

/// Single attempt, bounded by `timeout`. No retries: the next scheduled run retries.
pub async fn dispatch_with_timeout(
    dispatcher: &dyn AlertDispatcher,
    payload: &NotificationPayload,
    timeout: Duration,
) -> Result<(), DispatchError> {
    info!(channel = dispatcher.name(), subject = %payload.subject, "sending alert");
    match tokio::time::timeout(timeout, dispatcher.dispatch(payload)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(channel = dispatcher.name(), ?timeout, "alert delivery timed out");
            Err(DispatchError::Timeout(timeout))
        }
    }
}

/// Writes the alert to the log instead of delivering it.
pub struct LogDispatcher;

#[async_trait]
impl AlertDispatcher for LogDispatcher {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn dispatch(&self, payload: &NotificationPayload) -> Result<(), DispatchError> {
        info!(subject = %payload.subject, "alert (not delivered, log channel)");
        for line in &payload.alerts {
            info!(alert = %line);
        }
        for field in &payload.fields {
            info!(field = field.name, value = %field.value);
        }
        Ok(())
    }
}
