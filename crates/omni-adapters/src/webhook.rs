use async_trait::async_trait;
use hmac::{Hmac, Mac};
use omni_common::{Channel, Message, SendResult};
use serde_json::json;
use sha2::Sha256;
use std::time::Duration;

use crate::{http_client, ChannelAdapter};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    pub secret: String,
    pub timeout_secs: u64,
}

pub struct WebhookAdapter {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookAdapter {
    pub fn new(config: WebhookConfig) -> Self {
        let timeout = Duration::from_secs(if config.timeout_secs == 0 { 30 } else { config.timeout_secs });
        WebhookAdapter { client: http_client(timeout), config }
    }

    fn sign(&self, payload: &str) -> Option<String> {
        if self.config.secret.is_empty() {
            return None;
        }
        let mut mac = HmacSha256::new_from_slice(self.config.secret.as_bytes())
            .expect("HMAC accepts a key of any length");
        mac.update(payload.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
    fn enabled(&self) -> bool {
        true
    }

    async fn validate(&self) -> bool {
        true
    }

    async fn send(&self, message: &Message) -> SendResult {
        let url = message.target.trim();
        if url.is_empty() {
            return SendResult::err(&message.id, Channel::Webhook, "Webhook target URL is required");
        }

        let event = message
            .metadata
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("message");

        let payload = json!({
            "event": event,
            "content": message.content,
            "message_id": message.id,
            "metadata": message.metadata,
        });
        let payload_str = serde_json::to_string(&payload).unwrap_or_default();

        let mut request = self
            .client
            .request(method_of(message), url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "OmniMessage-Gateway/2.0");

        if let Some(sig) = self.sign(&payload_str) {
            request = request.header("X-Signature-256", format!("sha256={sig}"));
        }

        if let Some(extra) = message.metadata.get("headers").and_then(|v| v.as_object()) {
            for (k, v) in extra {
                if let Some(s) = v.as_str() {
                    request = request.header(k.as_str(), s);
                }
            }
        }

        let request = if method_of(message) == reqwest::Method::GET {
            request
        } else {
            request.body(payload_str)
        };

        match request.send().await {
            Ok(resp) => {
                let status = resp.status();
                let success = status.is_success();
                let body = resp.text().await.unwrap_or_default();
                let truncated: String = body.chars().take(500).collect();
                SendResult {
                    success,
                    message_id: message.id.clone(),
                    channel: Channel::Webhook,
                    response: Some(json!({"status_code": status.as_u16(), "body": truncated})),
                    error: if success { None } else { Some(format!("HTTP {status}")) },
                    retry_count: 0,
                }
            }
            Err(e) => SendResult::err(&message.id, Channel::Webhook, e.to_string()),
        }
    }
}

fn method_of(message: &Message) -> reqwest::Method {
    match message.metadata.get("method").and_then(|v| v.as_str()) {
        Some(m) if m.eq_ignore_ascii_case("GET") => reqwest::Method::GET,
        _ => reqwest::Method::POST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_payload_with_configured_secret() {
        let adapter = WebhookAdapter::new(WebhookConfig { secret: "s3cr3t".into(), timeout_secs: 30 });
        let sig = adapter.sign("hello").unwrap();
        assert_eq!(sig.len(), 64);
    }

    #[test]
    fn no_secret_means_no_signature() {
        let adapter = WebhookAdapter::new(WebhookConfig::default());
        assert!(adapter.sign("hello").is_none());
    }
}
