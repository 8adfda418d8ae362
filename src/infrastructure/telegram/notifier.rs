//! Telegram notification delivery.
//!
//! Best-effort `sendMessage` calls; a failed delivery is logged and
//! reported as `false`, never propagated; notification failure must not
//! block or fail a trade.

use crate::domain::ports::Notifier;
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use tracing::{error, info, warn};

pub struct TelegramNotifier {
    client: ClientWithMiddleware,
    send_url: Option<String>,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        let send_url = if bot_token.is_empty() {
            warn!("TelegramNotifier: bot token not set, notifications disabled");
            None
        } else {
            Some(format!(
                "https://api.telegram.org/bot{}/sendMessage",
                bot_token
            ))
        };

        info!("TelegramNotifier: initialized for chat {}", chat_id);
        Self {
            client: HttpClientFactory::create_client(),
            send_url,
            chat_id,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> bool {
        let Some(url) = &self.send_url else {
            error!("TelegramNotifier: cannot send, bot token not set");
            return false;
        };
        if self.chat_id.is_empty() {
            error!("TelegramNotifier: cannot send, chat id not set");
            return false;
        }

        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!("TelegramNotifier: send failed (HTTP {}): {}", status, body);
                false
            }
            Err(e) => {
                error!("TelegramNotifier: send failed: {}", e);
                false
            }
        }
    }
}
