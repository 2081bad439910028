use crate::config::{ConfigError, TelegramConfig};
use crate::dispatch::{AlertDispatcher, DispatchError};
use crate::notify::NotificationPayload;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};
use teloxide::utils::html::escape;
use tracing::{info, warn};

pub struct TelegramDispatcher {
    bot: Bot,
    chat_ids: Vec<i64>,
}

impl TelegramDispatcher {
    pub fn from_config(cfg: &TelegramConfig) -> Result<Self, ConfigError> {
        let token = resolve_token(cfg, |name| std::env::var(name).ok())?;
        Ok(Self {
            bot: Bot::new(token),
            chat_ids: cfg.chat_ids.clone(),
        })
    }
}

#[async_trait]
impl AlertDispatcher for TelegramDispatcher {
    fn name(&self) -> &'static str {
        "telegram"
    }

    /// Sends to every chat. Fails only when no chat received the alert.
    async fn dispatch(&self, payload: &NotificationPayload) -> Result<(), DispatchError> {
        let text = render_text(payload);
        let mut delivered = 0_usize;
        let mut last_err = None;

        for chat_id in &self.chat_ids {
            match self
                .bot
                .send_message(ChatId(*chat_id), text.clone())
                .parse_mode(ParseMode::Html)
                .await
            {
                Ok(_) => delivered += 1,
                Err(err) => {
                    warn!(chat_id = *chat_id, error = %err, "failed to send alert to chat");
                    last_err = Some(err);
                }
            }
        }

        match last_err {
            Some(err) if delivered == 0 => Err(DispatchError::Telegram(err)),
            _ => {
                info!(chats = delivered, "alert sent to Telegram");
                Ok(())
            }
        }
    }
}

/// Environment variable wins over `bot_token` from the file; blank values count as unset.
pub fn resolve_token<F>(cfg: &TelegramConfig, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if cfg.chat_ids.is_empty() {
        return Err(ConfigError::Validation(
            "notify.telegram.chat_ids must list at least one chat id".to_string(),
        ));
    }

    let env_token = lookup(&cfg.bot_token_env)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    if let Some(token) = env_token {
        return Ok(token);
    }

    let cfg_token = cfg
        .bot_token
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    cfg_token.ok_or_else(|| {
        ConfigError::Validation(format!(
            "Telegram token not found: set '{}' in the environment or notify.telegram.bot_token",
            cfg.bot_token_env
        ))
    })
}

pub fn render_text(payload: &NotificationPayload) -> String {
    let mut lines = vec![format!("<b>{}</b>", escape(&payload.subject))];
    for alert in &payload.alerts {
        lines.push(format!("• {}", escape(alert)));
    }
    lines.push(String::new());
    for field in &payload.fields {
        lines.push(format!(
            "{}: <code>{}</code>",
            escape(field.name),
            escape(&field.value)
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::payload;

    fn cfg(token: Option<&str>) -> TelegramConfig {
        TelegramConfig {
            bot_token: token.map(str::to_string),
            chat_ids: vec![42],
            ..TelegramConfig::default()
        }
    }

    #[test]
    fn env_token_takes_precedence() {
        let token = resolve_token(&cfg(Some("from-file")), |name| {
            (name == "TELEGRAM_BOT_TOKEN").then(|| "from-env".to_string())
        })
        .unwrap();
        assert_eq!(token, "from-env");
    }

    #[test]
    fn blank_env_falls_back_to_file_token() {
        let token = resolve_token(&cfg(Some(" from-file ")), |_| Some("  ".to_string())).unwrap();
        assert_eq!(token, "from-file");
    }

    #[test]
    fn missing_token_names_the_variable() {
        let err = resolve_token(&cfg(None), |_| None).unwrap_err();
        assert!(err.to_string().contains("TELEGRAM_BOT_TOKEN"));
    }

    #[test]
    fn chat_ids_are_required() {
        let mut c = cfg(Some("t"));
        c.chat_ids.clear();
        assert!(matches!(
            resolve_token(&c, |_| None),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn text_is_html_escaped() {
        let mut p = payload();
        p.subject = "<lab> hostmon alert".to_string();
        let text = render_text(&p);
        assert!(text.starts_with("<b>&lt;lab&gt; hostmon alert</b>\n"));
        assert!(text.contains("• Board temperature 61.50c above threshold 60.00c"));
        assert!(text.contains("Board temperature: <code>61.50c</code>"));
    }
}
