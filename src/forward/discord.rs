use super::{ForwardSink, ForwardTarget};
use crate::config::ForwardConfig;
use crate::error::RelayError;
use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const API_BASE: &str = "https://discord.com/api/v10";

/// Reply posted when the forward target moves.
pub const MOVED_REPLY: &str = "Chat logs moved to this channel!";

/// Discord bot that posts forwarded chat and answers the `here` command.
pub struct DiscordForwarder {
    bot_token: String,
    client: reqwest::Client,
}

impl DiscordForwarder {
    /// Forwarder authenticating with `config.bot_token`.
    #[must_use]
    pub fn new(config: &ForwardConfig) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn bot_user_id_from_token(token: &str) -> Option<String> {
        let first = token.split('.').next()?;
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(first)
            .ok()?;
        String::from_utf8(decoded).ok()
    }

    /// Listen for `here` commands until `cancel` fires, reconnecting after
    /// gateway failures. This is the only writer of `target`.
    pub async fn run_commands(&self, target: ForwardTarget, cancel: CancellationToken) {
        let mut backoff = Duration::from_secs(1);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.listen(&target) => {
                    match result {
                        Ok(()) => backoff = Duration::from_secs(1),
                        Err(e) => warn!(error = %e, retry_secs = backoff.as_secs(), "discord gateway failed"),
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(Duration::from_secs(60));
        }
        info!("discord command listener stopped");
    }

    async fn listen(&self, target: &ForwardTarget) -> anyhow::Result<()> {
        if self.bot_token.trim().is_empty() {
            anyhow::bail!("discord bot token is empty");
        }

        let bot_user_id = Self::bot_user_id_from_token(&self.bot_token).unwrap_or_default();

        let gateway_resp: serde_json::Value = self
            .client
            .get(format!("{API_BASE}/gateway/bot"))
            .header("Authorization", format!("Bot {}", self.bot_token))
            .send()
            .await?
            .json()
            .await?;

        let gateway_url = gateway_resp
            .get("url")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("wss://gateway.discord.gg");
        let ws_url = format!("{gateway_url}/?v=10&encoding=json");

        let (stream, _) = tokio_tungstenite::connect_async(&ws_url).await?;
        let (mut write, mut read) = stream.split();

        let hello = read
            .next()
            .await
            .ok_or_else(|| RelayError::Protocol("gateway closed before hello".to_owned()))??;
        let Message::Text(hello_text) = hello else {
            return Err(RelayError::Protocol("unexpected discord hello payload".to_owned()).into());
        };
        let hello_json: serde_json::Value = serde_json::from_str(&hello_text)?;
        let heartbeat_interval_ms = hello_json
            .get("d")
            .and_then(|v| v.get("heartbeat_interval"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(41_250);

        let identify = json!({
            "op": 2,
            "d": {
                "token": self.bot_token,
                // GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
                "intents": 33281,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "chatvoice",
                    "device": "chatvoice"
                }
            }
        });
        write.send(Message::Text(identify.to_string())).await?;
        info!("discord gateway connected");

        let (hb_tx, mut hb_rx) = mpsc::channel::<()>(1);
        let heartbeat_task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(heartbeat_interval_ms));
            loop {
                interval.tick().await;
                if hb_tx.send(()).await.is_err() {
                    break;
                }
            }
        });

        let result = loop {
            tokio::select! {
                _ = hb_rx.recv() => {
                    let heartbeat = json!({"op": 1, "d": serde_json::Value::Null});
                    if write.send(Message::Text(heartbeat.to_string())).await.is_err() {
                        break Err(anyhow::anyhow!("discord heartbeat failed"));
                    }
                }
                maybe_msg = read.next() => {
                    let raw = match maybe_msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => {
                            break Err(anyhow::anyhow!("discord websocket closed"));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => break Err(anyhow::anyhow!("discord websocket error: {err}")),
                    };

                    let Ok(payload) = serde_json::from_str::<serde_json::Value>(&raw) else {
                        continue;
                    };
                    let Some(channel_id) = here_command_channel(&payload, &bot_user_id) else {
                        continue;
                    };

                    target.set(channel_id.clone());
                    if let Err(e) = self.send(&channel_id, MOVED_REPLY).await {
                        warn!(error = %e, "failed to confirm target change");
                    }
                }
            }
        };
        heartbeat_task.abort();
        result
    }
}

/// Channel id of a `/here` or `!here` message from a human, if `payload` is one.
fn here_command_channel(payload: &serde_json::Value, bot_user_id: &str) -> Option<String> {
    if payload.get("t").and_then(serde_json::Value::as_str) != Some("MESSAGE_CREATE") {
        return None;
    }
    let data = payload.get("d")?;

    let author = data.get("author")?;
    let author_id = author.get("id").and_then(serde_json::Value::as_str)?;
    let author_is_bot = author
        .get("bot")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    if author_id == bot_user_id || author_is_bot {
        return None;
    }

    let content = data.get("content").and_then(serde_json::Value::as_str)?.trim();
    if !matches!(content, "/here" | "!here") {
        return None;
    }

    data.get("channel_id")
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

fn send_failure(status: reqwest::StatusCode, body: &str) -> RelayError {
    RelayError::Forward(format!("discord send failed ({status}): {}", body.trim()))
}

#[async_trait]
impl ForwardSink for DiscordForwarder {
    fn id(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, target: &str, text: &str) -> anyhow::Result<()> {
        let url = format!("{API_BASE}/channels/{target}/messages");
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&json!({ "content": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(send_failure(status, &body).into());
        }
        Ok(())
    }
}
