use async_trait::async_trait;
use omni_common::{Channel, Message, SendResult};
use serde_json::json;
use std::time::Duration;

use crate::{http_client, ChannelAdapter};

#[derive(Debug, Clone, Default)]
pub struct DiscordConfig {
    pub webhook_url: String,
}

pub struct DiscordAdapter {
    client: reqwest::Client,
    config: DiscordConfig,
}

impl DiscordAdapter {
    pub fn new(config: DiscordConfig) -> Self {
        DiscordAdapter { client: http_client(Duration::from_secs(15)), config }
    }

    fn resolve_url<'a>(&'a self, message: &'a Message) -> Option<&'a str> {
        message
            .metadata
            .get("webhook_url")
            .and_then(|v| v.as_str())
            .or(if self.config.webhook_url.is_empty() { None } else { Some(self.config.webhook_url.as_str()) })
    }
}

#[async_trait]
impl ChannelAdapter for DiscordAdapter {
    fn enabled(&self) -> bool {
        !self.config.webhook_url.is_empty()
    }

    async fn validate(&self) -> bool {
        if self.config.webhook_url.is_empty() {
            return false;
        }
        matches!(
            self.client.get(&self.config.webhook_url).timeout(Duration::from_secs(10)).send().await,
            Ok(resp) if resp.status() == reqwest::StatusCode::OK
        )
    }

    async fn send(&self, message: &Message) -> SendResult {
        let Some(url) = self.resolve_url(message) else {
            return SendResult::err(&message.id, Channel::Discord, "Discord not configured: missing webhook URL");
        };

        let username = message
            .metadata
            .get("username")
            .and_then(|v| v.as_str())
            .unwrap_or("OmniMessage");

        let mut payload = json!({
            "content": message.content,
            "username": username,
        });

        if let Some(embed) = message.metadata.get("embed") {
            payload["embeds"] = json!([embed]);
        }

        match self.client.post(url).json(&payload).send().await {
            Ok(resp) => {
                let status = resp.status();
                let success = status == 200 || status == 204;
                SendResult {
                    success,
                    message_id: message.id.clone(),
                    channel: Channel::Discord,
                    response: Some(json!({"status_code": status.as_u16()})),
                    error: if success { None } else { Some(format!("HTTP {status}")) },
                    retry_count: 0,
                }
            }
            Err(e) => SendResult::err(&message.id, Channel::Discord, e.to_string()),
        }
    }
}
