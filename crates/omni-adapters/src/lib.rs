//! One concrete adapter struct per backend, dispatched through a shared
//! `ChannelAdapter` trait object — no class hierarchy, matching the way the
//! dispatch engine treats channels as interchangeable sinks.

mod discord;
mod email;
mod slack;
mod telegram;
mod webhook;
mod whatsapp;

pub use discord::{DiscordAdapter, DiscordConfig};
pub use email::{EmailAdapter, EmailConfig};
pub use slack::{SlackAdapter, SlackConfig};
pub use telegram::{TelegramAdapter, TelegramConfig};
pub use webhook::{WebhookAdapter, WebhookConfig};
pub use whatsapp::{WhatsAppAdapter, WhatsAppConfig};

use async_trait::async_trait;
use omni_common::{Message, SendResult};

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn enabled(&self) -> bool;
    async fn validate(&self) -> bool;
    async fn send(&self, message: &Message) -> SendResult;
}

pub(crate) fn http_client(timeout: std::time::Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("building a reqwest client with static config never fails")
}
