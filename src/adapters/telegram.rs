use crate::config::NotificationConfig;
use crate::domain::ports::Notifier;
use crate::utils::error::{RenewError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Sends reports through the Telegram Bot API.
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(api_base: impl Into<String>, bot_token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            api_base: api_base.into(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        })
    }

    /// `None` when token or chat id is missing, which disables notification.
    pub fn from_config(config: &NotificationConfig) -> Result<Option<Self>> {
        match config.telegram() {
            Some((token, chat_id)) => Ok(Some(Self::new(
                config.telegram_api_base.trim_end_matches('/'),
                token,
                chat_id,
            )?)),
            None => Ok(None),
        }
    }

    async fn send(&self, message: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let payload = SendMessage {
            chat_id: &self.chat_id,
            text: message,
            parse_mode: "HTML",
        };

        let response = self.client.post(&url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(RenewError::HttpStatusError {
                status: response.status().as_u16(),
                url: format!("{}/bot***/sendMessage", self.api_base),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) {
        match self.send(message).await {
            Ok(()) => tracing::info!("✅ Telegram notification sent"),
            Err(e) => tracing::error!("❌ Telegram notification failed: {}", e),
        }
    }
}
