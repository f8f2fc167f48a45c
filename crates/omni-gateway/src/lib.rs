//! Dispatch facade: wires the six channel adapters, the routing engine,
//! the template engine, the rate limiter, and the analytics collector
//! into one entry point. `omni-server` and `omni-cli` both drive the
//! gateway through this type rather than touching the component crates
//! directly.

pub mod config;
pub mod http;

pub use config::GatewayConfig;

use std::collections::HashMap;
use std::sync::Arc;

use omni_adapters::{
    ChannelAdapter, DiscordAdapter, EmailAdapter, SlackAdapter, TelegramAdapter, WebhookAdapter,
    WhatsAppAdapter,
};
use omni_analytics::AnalyticsCollector;
use omni_common::{Channel, GatewayErrorKind, Message, Priority, SendResult};
use omni_ratelimit::RateLimiter;
use omni_router::RoutingEngine;
use omni_store::MessageStore;
use omni_template::TemplateEngine;
use serde_json::{json, Map, Value};

pub const VERSION: &str = "2.0.0";

pub struct Gateway {
    pub config: GatewayConfig,
    pub router: Arc<RoutingEngine>,
    pub template_engine: Arc<TemplateEngine>,
    pub analytics: Arc<AnalyticsCollector>,
    pub rate_limiter: Arc<RateLimiter>,
    store: Option<Arc<MessageStore>>,
    channels: HashMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let analytics = Arc::new(AnalyticsCollector::with_default_window());
        let rate_limiter = Arc::new(RateLimiter::with_defaults());
        let router = Arc::new(RoutingEngine::new(
            config.max_retries,
            config.retry_delay_secs,
            rate_limiter.clone(),
            analytics.clone(),
        ));
        let template_engine = Arc::new(TemplateEngine::new(
            config.template_dir.as_ref().map(std::path::Path::new),
        ));

        let mut gateway = Gateway {
            config,
            router,
            template_engine,
            analytics,
            rate_limiter,
            store: None,
            channels: HashMap::new(),
        };
        gateway.setup_channels();
        gateway
    }

    /// Opens the configured SQLite store and wires it in, so that every
    /// `send()` call audits a `save_message` / `log_event` / `update_status`
    /// sequence the way the source's `Gateway` does on each state
    /// transition. Without this, the gateway still dispatches correctly but
    /// §4.H persistence is the caller's own responsibility (as `omni-cli`
    /// does per-command).
    pub async fn connect(config: GatewayConfig) -> Result<Self, omni_store::StoreError> {
        let db_path = config.db_path.clone();
        let mut gateway = Gateway::new(config);
        let store = MessageStore::connect(&format!("sqlite:{db_path}?mode=rwc")).await?;
        gateway.store = Some(Arc::new(store));
        Ok(gateway)
    }

    pub fn attach_store(&mut self, store: Arc<MessageStore>) {
        self.store = Some(store);
    }

    pub fn store(&self) -> Option<&Arc<MessageStore>> {
        self.store.as_ref()
    }

    fn setup_channels(&mut self) {
        self.register_channel(Channel::Telegram, Arc::new(TelegramAdapter::new(self.config.telegram.clone())));
        self.register_channel(Channel::Whatsapp, Arc::new(WhatsAppAdapter::new(self.config.whatsapp.clone())));
        self.register_channel(Channel::Discord, Arc::new(DiscordAdapter::new(self.config.discord.clone())));
        self.register_channel(Channel::Slack, Arc::new(SlackAdapter::new(self.config.slack.clone())));
        self.register_channel(Channel::Email, Arc::new(EmailAdapter::new(self.config.email.clone())));
        self.register_channel(Channel::Webhook, Arc::new(WebhookAdapter::new(self.config.webhook.clone())));
    }

    /// Lets embedders swap in a custom adapter (a test double, or a
    /// seventh backend) for any channel.
    pub fn register_channel(&mut self, channel: Channel, adapter: Arc<dyn ChannelAdapter>) {
        let enabled = adapter.enabled();
        self.channels.insert(channel, adapter.clone());
        self.router.register_channel(channel, adapter);
        tracing::info!(%channel, enabled, "channel configured");
    }

    pub fn active_channels(&self) -> Vec<&'static str> {
        Channel::all()
            .into_iter()
            .filter(|c| self.channels.get(c).map(|a| a.enabled()).unwrap_or(false))
            .map(|c| c.as_str())
            .collect()
    }

    pub fn channel_enabled(&self, channel: Channel) -> bool {
        self.channels.get(&channel).map(|a| a.enabled()).unwrap_or(false)
    }

    /// Renders a named template into `message.content` first (a terminal,
    /// non-retriable failure on render error) then routes. When a store is
    /// attached, persists the pre-dispatch snapshot and the terminal status
    /// transition; store write failures are logged but never fail the send
    /// (§7: audit is best-effort).
    pub async fn send(&self, mut message: Message) -> SendResult {
        if let Some(name) = message.template_name.clone() {
            match self.template_engine.render(&name, &Value::Object(message.template_vars.clone())) {
                Ok(rendered) => message.content = rendered,
                Err(e) => {
                    tracing::error!(error = %e, "template render failed");
                    let result = SendResult::err(&message.id, message.to_channel, format!("Template render failed: {e}"));
                    self.audit_terminal(&message, &result).await;
                    return result;
                }
            }
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.save_message(&message.to_map()).await {
                tracing::warn!(error = %e, message_id = %message.id, "failed to persist outbound message");
            }
            if let Err(e) = store.log_event(&message.id, "created", Some(message.to_channel.as_str()), None).await {
                tracing::warn!(error = %e, message_id = %message.id, "failed to log message creation event");
            }
        }

        let result = self.router.route(message.clone()).await;
        self.audit_terminal(&message, &result).await;
        result
    }

    async fn audit_terminal(&self, message: &Message, result: &SendResult) {
        let Some(store) = &self.store else { return };
        let status = if result.success { "sent" } else { "failed" };
        if let Err(e) = store.update_status(&message.id, status, result.error.as_deref()).await {
            tracing::warn!(error = %e, message_id = %message.id, "failed to persist status transition");
        }
        let event = if result.success { "sent" } else { "failed" };
        if let Err(e) = store
            .log_event(&message.id, event, Some(result.channel.as_str()), result.error.as_deref())
            .await
        {
            tracing::warn!(error = %e, message_id = %message.id, "failed to log delivery event");
        }
    }

    /// One message per `(channel, target)` pair; pairs whose target is
    /// empty are silently skipped, matching `core.py::broadcast`'s
    /// `if not target: continue`.
    pub async fn broadcast(
        &self,
        content: &str,
        targets: &[(Channel, String)],
        template: Option<&str>,
        template_vars: Map<String, Value>,
        metadata: Map<String, Value>,
        priority: Priority,
    ) -> Vec<SendResult> {
        let mut results = Vec::with_capacity(targets.len());
        for (channel, target) in targets {
            if target.is_empty() {
                continue;
            }
            let mut msg = Message::new(Channel::Webhook, *channel, content, target.clone());
            msg.template_name = template.map(str::to_string);
            msg.template_vars = template_vars.clone();
            msg.metadata = metadata.clone();
            msg.priority = priority;
            results.push(self.send(msg).await);
        }
        results
    }

    pub fn register_template(&self, name: &str, template: &str) -> Result<(), GatewayErrorKind> {
        self.template_engine.register(name, template)
    }

    pub fn stats(&self) -> Value {
        json!({
            "version": VERSION,
            "active_channels": self.active_channels(),
            "routing": self.router.stats(),
            "templates": {
                "memory": self.template_engine.list_templates().0,
                "files": self.template_engine.list_templates().1,
            },
            "rate_limiter": self.rate_limiter.stats(),
            "analytics": self.analytics.summary(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AlwaysOk;
    #[async_trait]
    impl ChannelAdapter for AlwaysOk {
        fn enabled(&self) -> bool {
            true
        }
        async fn validate(&self) -> bool {
            true
        }
        async fn send(&self, message: &Message) -> SendResult {
            SendResult::ok(&message.id, Channel::Webhook, json!({}))
        }
    }

    fn gateway() -> Gateway {
        let mut gateway = Gateway::new(GatewayConfig::default());
        gateway.register_channel(Channel::Webhook, Arc::new(AlwaysOk));
        gateway
    }

    #[tokio::test]
    async fn send_renders_template_before_routing() {
        let gateway = gateway();
        gateway.register_template("greet", "Hello {{name}}!").unwrap();
        let mut msg = Message::new(Channel::Webhook, Channel::Webhook, "", "http://x");
        msg.template_name = Some("greet".to_string());
        msg.template_vars.insert("name".into(), Value::String("Ada".into()));
        let result = gateway.send(msg).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn send_fails_terminally_on_missing_template() {
        let gateway = gateway();
        let mut msg = Message::new(Channel::Webhook, Channel::Webhook, "", "http://x");
        msg.template_name = Some("nope".to_string());
        let result = gateway.send(msg).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Template render failed"));
    }

    #[tokio::test]
    async fn broadcast_skips_targets_with_empty_address() {
        let gateway = gateway();
        let targets = vec![(Channel::Webhook, "http://x".to_string()), (Channel::Webhook, String::new())];
        let results = gateway.broadcast("hi", &targets, None, Map::new(), Map::new(), Priority::Normal).await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn attached_store_persists_the_send_audit_trail() {
        let mut gateway = gateway();
        let store = Arc::new(omni_store::MessageStore::connect("sqlite::memory:").await.unwrap());
        gateway.attach_store(store.clone());

        let msg = Message::new(Channel::Webhook, Channel::Webhook, "hi", "http://x");
        let id = msg.id.clone();
        let result = gateway.send(msg).await;
        assert!(result.success);

        let saved = store.get_message(&id).await.unwrap().unwrap();
        assert_eq!(saved["status"], "sent");
        let events = store.get_events(&id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "created");
        assert_eq!(events[1]["event"], "sent");
    }

    #[tokio::test]
    async fn store_failure_never_fails_the_send() {
        // No store attached is the degenerate case of "store unavailable" —
        // dispatch must still succeed.
        let gateway = gateway();
        let msg = Message::new(Channel::Webhook, Channel::Webhook, "hi", "http://x");
        let result = gateway.send(msg).await;
        assert!(result.success);
    }
}
