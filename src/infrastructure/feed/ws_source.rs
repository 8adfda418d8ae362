//! Persistent-session announcement feed source.
//!
//! Alternative ingestion transport to Bot API polling: a long-lived
//! WebSocket session to an announcement push feed. The connection task owns
//! reconnection with capped backoff and keepalive pings; delivered frames
//! are deduplicated on their monotonically increasing id before they reach
//! the pipeline.

use crate::domain::errors::SourceError;
use crate::domain::events::InboundMessage;
use crate::domain::ports::MessageSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const MAX_RECONNECT_BACKOFF_SECS: u64 = 60;
const PING_INTERVAL_SECS: u64 = 180;

/// One push frame from the feed.
#[derive(Debug, Deserialize)]
struct FeedFrame {
    id: i64,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    text: String,
}

pub struct WsFeedSource {
    rx: mpsc::Receiver<InboundMessage>,
    task: tokio::task::JoinHandle<()>,
}

impl WsFeedSource {
    /// Spawn the session task and hand back the receiving half.
    pub fn connect(url: String, channel: String) -> Self {
        let (tx, rx) = mpsc::channel(100);
        let task = tokio::spawn(run_feed(url, channel, tx));
        Self { rx, task }
    }
}

impl Drop for WsFeedSource {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl MessageSource for WsFeedSource {
    async fn next_message(&mut self) -> Result<InboundMessage, SourceError> {
        // Transport drops are handled by the session task's reconnect loop;
        // a closed channel means the task has given up for good.
        self.rx.recv().await.ok_or(SourceError::Closed)
    }
}

async fn run_feed(url: String, channel: String, tx: mpsc::Sender<InboundMessage>) {
    let mut backoff = 1u64;
    let mut last_id = 0i64;

    loop {
        match connect_and_stream(&url, &channel, &tx, &mut last_id).await {
            Ok(()) => {
                info!("WsFeedSource: connection closed gracefully");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                backoff = 1;
            }
            Err(e) => {
                error!("WsFeedSource: {:#}. Reconnecting in {}s...", e, backoff);
                tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
                backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF_SECS);
            }
        }

        if tx.is_closed() {
            info!("WsFeedSource: receiver dropped, ending session task");
            return;
        }
    }
}

async fn connect_and_stream(
    url: &str,
    channel: &str,
    tx: &mpsc::Sender<InboundMessage>,
    last_id: &mut i64,
) -> Result<()> {
    info!("WsFeedSource: connecting to {}", url);
    let (ws_stream, _) = connect_async(url)
        .await
        .context("failed to connect to announcement feed")?;
    info!("WsFeedSource: connected");

    let (mut write, mut read) = ws_stream.split();
    let mut ping_interval =
        tokio::time::interval(std::time::Duration::from_secs(PING_INTERVAL_SECS));
    ping_interval.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if write.send(Message::Ping(vec![].into())).await.is_err() {
                    anyhow::bail!("keepalive ping failed");
                }
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if handle_frame(&text, channel, tx, last_id).await.is_err() {
                        // Receiver gone; treat as a graceful end of session.
                        return Ok(());
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(cf) = frame {
                        info!("WsFeedSource: closed by server: {} '{}'", cf.code, cf.reason);
                    } else {
                        info!("WsFeedSource: closed by server");
                    }
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => anyhow::bail!("read error: {}", e),
                None => return Ok(()),
            }
        }
    }
}

/// Decode and forward one frame; returns Err only when the pipeline side
/// has hung up.
async fn handle_frame(
    text: &str,
    channel: &str,
    tx: &mpsc::Sender<InboundMessage>,
    last_id: &mut i64,
) -> Result<(), ()> {
    let frame: FeedFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("WsFeedSource: undecodable frame ({}): {}", e, text);
            return Ok(());
        }
    };

    if !frame.channel.is_empty() && !frame.channel.eq_ignore_ascii_case(channel) {
        debug!("WsFeedSource: ignoring frame for channel {}", frame.channel);
        return Ok(());
    }
    // At-most-once: the feed may replay frames after a reconnect.
    if frame.id <= *last_id {
        return Ok(());
    }
    *last_id = frame.id;

    if frame.text.is_empty() {
        return Ok(());
    }

    tx.send(InboundMessage {
        message_id: frame.id,
        channel: channel.to_string(),
        text: frame.text,
    })
    .await
    .map_err(|_| ())
}
