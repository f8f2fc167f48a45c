use async_trait::async_trait;
use omni_common::{Channel, Message, SendResult};
use serde_json::json;
use std::time::Duration;

use crate::{http_client, ChannelAdapter};

#[derive(Debug, Clone, Default)]
pub struct SlackConfig {
    pub webhook_url: String,
}

pub struct SlackAdapter {
    client: reqwest::Client,
    config: SlackConfig,
}

impl SlackAdapter {
    pub fn new(config: SlackConfig) -> Self {
        SlackAdapter { client: http_client(Duration::from_secs(15)), config }
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
impl ChannelAdapter for SlackAdapter {
    fn enabled(&self) -> bool {
        !self.config.webhook_url.is_empty()
    }

    async fn validate(&self) -> bool {
        !self.config.webhook_url.is_empty()
    }

    async fn send(&self, message: &Message) -> SendResult {
        let Some(url) = self.resolve_url(message) else {
            return SendResult::err(&message.id, Channel::Slack, "Slack not configured: missing webhook URL");
        };

        let mut payload = json!({ "text": message.content });
        if let Some(blocks) = message.metadata.get("blocks") {
            payload["blocks"] = blocks.clone();
        }
        if let Some(channel) = message.metadata.get("channel") {
            payload["channel"] = channel.clone();
        }

        match self.client.post(url).json(&payload).send().await {
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                let success = text == "ok";
                SendResult {
                    success,
                    message_id: message.id.clone(),
                    channel: Channel::Slack,
                    response: Some(json!({"text": text, "status_code": status.as_u16()})),
                    error: if success { None } else { Some(text) },
                    retry_count: 0,
                }
            }
            Err(e) => SendResult::err(&message.id, Channel::Slack, e.to_string()),
        }
    }
}
