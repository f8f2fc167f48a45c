use async_trait::async_trait;
use omni_common::{Channel, Message, SendResult};
use serde_json::json;
use std::time::Duration;

use crate::{http_client, ChannelAdapter};

#[derive(Debug, Clone, Default)]
pub struct TelegramConfig {
    pub token: String,
    pub parse_mode: String,
    pub disable_preview: bool,
}

pub struct TelegramAdapter {
    client: reqwest::Client,
    config: TelegramConfig,
    base_url: String,
}

impl TelegramAdapter {
    pub fn new(config: TelegramConfig) -> Self {
        TelegramAdapter {
            client: http_client(Duration::from_secs(15)),
            config,
            base_url: "https://api.telegram.org".to_string(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    fn enabled(&self) -> bool {
        !self.config.token.is_empty()
    }

    async fn validate(&self) -> bool {
        if self.config.token.is_empty() {
            return false;
        }
        let url = format!("{}/bot{}/getMe", self.base_url, self.config.token);
        match self.client.get(url).timeout(Duration::from_secs(10)).send().await {
            Ok(resp) => resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("ok").and_then(|b| b.as_bool()))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn send(&self, message: &Message) -> SendResult {
        if !self.enabled() {
            return SendResult::err(&message.id, Channel::Telegram, "Telegram not configured: missing token");
        }

        let parse_mode = message
            .metadata
            .get("parse_mode")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.config.parse_mode);

        let payload = json!({
            "chat_id": message.target,
            "text": message.content,
            "parse_mode": parse_mode,
            "disable_web_page_preview": self.config.disable_preview,
        });

        let url = format!("{}/bot{}/sendMessage", self.base_url, self.config.token);
        match self.client.post(url).json(&payload).send().await {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(data) => {
                    let ok = data.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
                    let mut result = SendResult::ok(&message.id, Channel::Telegram, data.clone());
                    result.success = ok;
                    if !ok {
                        result.error = data
                            .get("description")
                            .and_then(|v| v.as_str())
                            .map(str::to_string)
                            .or_else(|| Some("Unknown error".to_string()));
                    }
                    result
                }
                Err(e) => SendResult::err(&message.id, Channel::Telegram, e.to_string()),
            },
            Err(e) => SendResult::err(&message.id, Channel::Telegram, e.to_string()),
        }
    }
}
