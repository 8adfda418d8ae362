//! Telegram Bot API long-polling message source.
//!
//! Polls `getUpdates` with the offset cursor, filters posts to the watched
//! channel, and deduplicates on the monotonically increasing message id so
//! a redelivered update can never reach the pipeline twice.

use crate::domain::errors::SourceError;
use crate::domain::events::InboundMessage;
use crate::domain::ports::MessageSource;
use crate::infrastructure::core::http_client_factory::{
    HttpClientFactory, encode_query, url_with_query,
};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Long-poll hold time. Kept under the HTTP client's 30s request timeout so
/// the server, not the client, ends an idle poll.
const LONG_POLL_SECS: u64 = 25;

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    channel_post: Option<TgMessage>,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    #[serde(default)]
    text: String,
    chat: TgChat,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    #[serde(default)]
    username: String,
}

pub struct TelegramPollingSource {
    client: ClientWithMiddleware,
    api_base: String,
    channel: String,
    offset: i64,
    last_message_id: i64,
    buffer: VecDeque<InboundMessage>,
    idle_pause: Duration,
}

impl TelegramPollingSource {
    pub fn new(bot_token: String, channel: impl Into<String>, idle_pause: Duration) -> Self {
        let channel = channel.into().trim_start_matches('@').to_string();
        info!("TelegramPollingSource: monitoring channel @{}", channel);

        Self {
            client: HttpClientFactory::create_client(),
            api_base: format!("https://api.telegram.org/bot{}", bot_token),
            channel,
            offset: 0,
            last_message_id: 0,
            buffer: VecDeque::new(),
            idle_pause,
        }
    }

    async fn fetch_updates(&mut self) -> Result<Vec<Update>, SourceError> {
        let offset = self.offset.to_string();
        let timeout = LONG_POLL_SECS.to_string();
        let query = encode_query(&[
            ("offset", offset.as_str()),
            ("timeout", timeout.as_str()),
            ("allowed_updates", r#"["channel_post","message"]"#),
        ]);
        let url = url_with_query(&format!("{}/getUpdates", self.api_base), &query);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SourceError::transport(format!("HTTP {}: {}", status, text)));
        }

        let body: UpdatesResponse = response
            .json()
            .await
            .map_err(|e| SourceError::transport(format!("update decode failed: {}", e)))?;

        if !body.ok {
            return Err(SourceError::transport(format!(
                "getUpdates rejected: {}",
                body.description.unwrap_or_else(|| "no description".to_string())
            )));
        }

        Ok(body.result)
    }

    /// Advance the offset cursor and buffer the channel's fresh messages.
    fn ingest_updates(&mut self, updates: Vec<Update>) {
        for update in updates {
            self.offset = self.offset.max(update.update_id + 1);

            let Some(post) = update.channel_post.or(update.message) else {
                continue;
            };
            if !post.chat.username.eq_ignore_ascii_case(&self.channel) {
                debug!(
                    "TelegramPollingSource: ignoring post from @{}",
                    post.chat.username
                );
                continue;
            }
            // Redelivered or out-of-order update: already handed over.
            if post.message_id <= self.last_message_id {
                continue;
            }
            self.last_message_id = post.message_id;
            if post.text.is_empty() {
                continue;
            }

            self.buffer.push_back(InboundMessage {
                message_id: post.message_id,
                channel: post.chat.username,
                text: post.text,
            });
        }
    }
}

#[async_trait]
impl MessageSource for TelegramPollingSource {
    async fn next_message(&mut self) -> Result<InboundMessage, SourceError> {
        loop {
            if let Some(message) = self.buffer.pop_front() {
                return Ok(message);
            }

            match self.fetch_updates().await {
                Ok(updates) => self.ingest_updates(updates),
                Err(e) => {
                    warn!("TelegramPollingSource: {}", e);
                    return Err(e);
                }
            }

            if self.buffer.is_empty() {
                tokio::time::sleep(self.idle_pause).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> TelegramPollingSource {
        TelegramPollingSource::new(
            "token".to_string(),
            "@announcements",
            Duration::from_millis(10),
        )
    }

    fn channel_post(update_id: i64, message_id: i64, channel: &str, text: &str) -> Update {
        Update {
            update_id,
            channel_post: Some(TgMessage {
                message_id,
                text: text.to_string(),
                chat: TgChat {
                    username: channel.to_string(),
                },
            }),
            message: None,
        }
    }

    #[test]
    fn test_ingest_filters_other_channels() {
        let mut src = source();
        src.ingest_updates(vec![
            channel_post(10, 1, "announcements", "delist soon"),
            channel_post(11, 7, "othernews", "unrelated"),
        ]);

        assert_eq!(src.buffer.len(), 1);
        assert_eq!(src.buffer[0].text, "delist soon");
        assert_eq!(src.offset, 12);
    }

    #[test]
    fn test_ingest_deduplicates_on_message_id() {
        let mut src = source();
        src.ingest_updates(vec![channel_post(10, 5, "announcements", "first")]);
        // Transport redelivers the same post under a new update id.
        src.ingest_updates(vec![
            channel_post(11, 5, "announcements", "first"),
            channel_post(12, 6, "announcements", "second"),
        ]);

        let texts: Vec<&str> = src.buffer.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_ingest_skips_non_text_posts_but_advances_cursor() {
        let mut src = source();
        src.ingest_updates(vec![channel_post(20, 3, "announcements", "")]);

        assert!(src.buffer.is_empty());
        assert_eq!(src.offset, 21);
        assert_eq!(src.last_message_id, 3);
    }

    #[test]
    fn test_channel_matching_ignores_case_and_at_prefix() {
        let mut src = source();
        src.ingest_updates(vec![channel_post(1, 1, "Announcements", "hello")]);
        assert_eq!(src.buffer.len(), 1);
    }

    #[test]
    fn test_updates_response_decoding() {
        let json = r#"{
            "ok": true,
            "result": [{
                "update_id": 100,
                "channel_post": {
                    "message_id": 42,
                    "text": "Binance Will Delist CVP",
                    "chat": {"id": -1, "username": "announcements", "type": "channel"}
                }
            }]
        }"#;
        let body: UpdatesResponse = serde_json::from_str(json).unwrap();
        assert!(body.ok);
        assert_eq!(body.result.len(), 1);
        assert_eq!(body.result[0].update_id, 100);
    }
}
