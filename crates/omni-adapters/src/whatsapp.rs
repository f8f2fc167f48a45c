use async_trait::async_trait;
use omni_common::{Channel, Message, SendResult};
use serde_json::json;
use std::time::Duration;

use crate::{http_client, ChannelAdapter};

#[derive(Debug, Clone, Default)]
pub struct WhatsAppConfig {
    pub token: String,
    pub phone_id: String,
    pub api_version: String,
}

pub struct WhatsAppAdapter {
    client: reqwest::Client,
    config: WhatsAppConfig,
    base_url: String,
}

impl WhatsAppAdapter {
    pub fn new(config: WhatsAppConfig) -> Self {
        WhatsAppAdapter {
            client: http_client(Duration::from_secs(15)),
            config,
            base_url: "https://graph.facebook.com".to_string(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppAdapter {
    fn enabled(&self) -> bool {
        !self.config.token.is_empty() && !self.config.phone_id.is_empty()
    }

    async fn validate(&self) -> bool {
        self.enabled()
    }

    async fn send(&self, message: &Message) -> SendResult {
        if !self.enabled() {
            return SendResult::err(
                &message.id,
                Channel::Whatsapp,
                "WhatsApp not configured: missing token or phone_id",
            );
        }

        let payload = match message.metadata.get("wa_template") {
            Some(template) => json!({
                "messaging_product": "whatsapp",
                "to": message.target,
                "type": "template",
                "template": template,
            }),
            None => json!({
                "messaging_product": "whatsapp",
                "to": message.target,
                "type": "text",
                "text": {"body": message.content},
            }),
        };

        let url = format!(
            "{}/{}/{}/messages",
            self.base_url, self.config.api_version, self.config.phone_id
        );

        match self
            .client
            .post(url)
            .bearer_auth(&self.config.token)
            .json(&payload)
            .send()
            .await
        {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(data) => {
                    let success = data.get("messages").is_some();
                    let mut result = SendResult::ok(&message.id, Channel::Whatsapp, data.clone());
                    result.success = success;
                    if !success {
                        result.error = Some(
                            data.get("error")
                                .and_then(|e| e.get("message"))
                                .and_then(|m| m.as_str())
                                .unwrap_or("Unknown error")
                                .to_string(),
                        );
                    }
                    result
                }
                Err(e) => SendResult::err(&message.id, Channel::Whatsapp, e.to_string()),
            },
            Err(e) => SendResult::err(&message.id, Channel::Whatsapp, e.to_string()),
        }
    }
}
