use crate::config::TelegramConfig;
use crate::notify::{NotifyError, Notifier};
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};
use teloxide::utils::html;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Request(#[from] teloxide::RequestError),
}

/// Mirrors change notifications into Telegram chats, for hosts without a
/// desktop session.
pub struct TelegramNotifier {
    bot: Bot,
    chat_ids: Vec<i64>,
}

impl TelegramNotifier {
    pub fn new(token: String, cfg: &TelegramConfig) -> Self {
        Self {
            bot: Bot::new(token),
            chat_ids: cfg.allowed_chat_ids.clone(),
        }
    }
}

impl Notifier for TelegramNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let text = format_notification(title, message);
        let mut last_err = None;

        for chat_id in &self.chat_ids {
            if let Err(err) = self
                .bot
                .send_message(ChatId(*chat_id), text.clone())
                .parse_mode(ParseMode::Html)
                .await
            {
                warn!(chat_id = *chat_id, error = %err, "failed to send telegram notification");
                last_err = Some(err);
            }
        }

        match last_err {
            Some(err) => Err(TelegramError::from(err).into()),
            None => Ok(()),
        }
    }
}

fn format_notification(title: &str, message: &str) -> String {
    format!("<b>{}</b>\n{}", html::escape(title), html::escape(message))
}

/// Token from the configured env var, falling back to the inline token.
pub fn resolve_token(cfg: &TelegramConfig) -> Result<String, String> {
    if cfg.allowed_chat_ids.is_empty() {
        return Err(
            "telegram.allowed_chat_ids is empty: list at least one chat id in the config"
                .to_string(),
        );
    }

    let env_token = std::env::var(&cfg.bot_token_env)
        .ok()
        .filter(|v| !v.trim().is_empty());
    if let Some(v) = env_token {
        return Ok(v);
    }
    let cfg_token = cfg
        .bot_token
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    if let Some(v) = cfg_token {
        return Ok(v);
    }

    Err(format!(
        "telegram token not found: set '{}' in the environment or telegram.bot_token in the config",
        cfg.bot_token_env
    ))
}
