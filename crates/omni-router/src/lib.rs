//! Routing engine: rule matching, middleware, rate-limiter admission,
//! retry-with-backoff dispatch, and an in-memory dead-letter queue.

pub mod error;

pub use error::RouterError;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use omni_adapters::ChannelAdapter;
use omni_analytics::AnalyticsCollector;
use omni_common::{Channel, DeadLetterEntry, Message, MessageStatus, RoutingRule, SendResult};
use omni_ratelimit::RateLimiter;
use parking_lot::Mutex;
use serde_json::{json, Value};

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, message: Message) -> Message;
}

#[derive(Default)]
struct Stats {
    total: AtomicU64,
    sent: AtomicU64,
    errors: AtomicU64,
    dead: AtomicU64,
    sent_by_channel: Mutex<HashMap<String, u64>>,
}

impl Stats {
    fn incr_sent(&self, channel: Channel) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        *self.sent_by_channel.lock().entry(channel.as_str().to_string()).or_insert(0) += 1;
    }
}

pub struct RoutingEngine {
    rules: Mutex<Vec<RoutingRule>>,
    handlers: Mutex<HashMap<Channel, Arc<dyn ChannelAdapter>>>,
    middleware: Mutex<Vec<Arc<dyn Middleware>>>,
    dead_letter_queue: Mutex<Vec<DeadLetterEntry>>,
    stats: Stats,
    max_retries: u32,
    retry_delay_secs: f64,
    rate_limiter: Arc<RateLimiter>,
    analytics: Arc<AnalyticsCollector>,
}

impl RoutingEngine {
    pub fn new(
        max_retries: u32,
        retry_delay_secs: f64,
        rate_limiter: Arc<RateLimiter>,
        analytics: Arc<AnalyticsCollector>,
    ) -> Self {
        RoutingEngine {
            rules: Mutex::new(Vec::new()),
            handlers: Mutex::new(HashMap::new()),
            middleware: Mutex::new(Vec::new()),
            dead_letter_queue: Mutex::new(Vec::new()),
            stats: Stats::default(),
            max_retries,
            retry_delay_secs,
            rate_limiter,
            analytics,
        }
    }

    pub fn register_channel(&self, channel: Channel, handler: Arc<dyn ChannelAdapter>) {
        self.handlers.lock().insert(channel, handler);
        tracing::info!(%channel, "registered channel");
    }

    /// Inserts and re-sorts by descending priority; equal-priority rules
    /// keep insertion order (`sort_by_key` is stable).
    pub fn add_rule(&self, rule: RoutingRule) {
        tracing::info!(name = %rule.name, priority = rule.priority, "added routing rule");
        let mut rules = self.rules.lock();
        rules.push(rule);
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.lock();
        let before = rules.len();
        rules.retain(|r| r.name != name);
        rules.len() < before
    }

    pub fn add_middleware(&self, mw: Arc<dyn Middleware>) {
        self.middleware.lock().push(mw);
    }

    pub fn match_rule(&self, message: &Message) -> Option<usize> {
        let rules = self.rules.lock();
        rules.iter().position(|r| r.matches(message))
    }

    pub fn match_all_rules_count(&self, message: &Message) -> usize {
        self.rules.lock().iter().filter(|r| r.matches(message)).count()
    }

    async fn apply_middleware(&self, mut message: Message) -> Message {
        let chain: Vec<Arc<dyn Middleware>> = self.middleware.lock().clone();
        for mw in chain {
            message = mw.call(message).await;
        }
        message
    }

    pub async fn route(&self, message: Message) -> SendResult {
        self.stats.total.fetch_add(1, Ordering::Relaxed);

        let mut message = self.apply_middleware(message).await;

        let target_channel = {
            let rules = self.rules.lock();
            match rules.iter().find(|r| r.matches(&message)) {
                Some(rule) => {
                    tracing::info!(message_id = %message.id, rule = %rule.name, "message matched rule");
                    let target = rule.target_channel;
                    if let Some(transform) = &rule.transform {
                        message = transform(message);
                    }
                    target
                }
                None => message.to_channel,
            }
        };

        let handler = self.handlers.lock().get(&target_channel).cloned();
        let Some(handler) = handler else {
            let error = format!("No handler for channel: {}", target_channel.as_str());
            tracing::error!(%error);
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            return SendResult::err(&message.id, target_channel, error);
        };

        if !self.rate_limiter.check(target_channel.as_str(), Some(message.target.as_str())) {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            return SendResult::err(&message.id, target_channel, "rate_limited");
        }

        self.send_with_retry(handler.as_ref(), message, target_channel).await
    }

    async fn send_with_retry(
        &self,
        handler: &dyn ChannelAdapter,
        mut message: Message,
        channel: Channel,
    ) -> SendResult {
        let max_attempts = if message.max_retries > 0 { message.max_retries } else { self.max_retries };
        let mut last_error = String::new();
        let started_at = Utc::now();

        for attempt in 0..=max_attempts {
            message.retry_count = attempt;
            message.status = if attempt == 0 { MessageStatus::Sending } else { MessageStatus::Retrying };

            let result = handler.send(&message).await;

            if result.success {
                message.status = MessageStatus::Sent;
                message.sent_at = Some(Utc::now());
                self.stats.incr_sent(channel);
                let latency_ms = (message.sent_at.unwrap() - started_at).num_milliseconds() as f64;
                self.analytics.record_sent(channel.as_str(), latency_ms, Some(message.target.as_str()));

                let mut result = result;
                result.retry_count = attempt;
                return result;
            }

            last_error = result.error.clone().unwrap_or_else(|| "Unknown error".to_string());
            tracing::warn!(
                attempt = attempt + 1,
                max_attempts = max_attempts + 1,
                error = %last_error,
                "send failed"
            );
            if attempt > 0 {
                self.analytics.record_retry(channel.as_str());
            }

            if attempt < max_attempts {
                let delay = self.retry_delay_secs * 2f64.powi(attempt as i32);
                tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
            }
        }

        message.status = MessageStatus::Dead;
        message.last_error = Some(last_error.clone());
        self.stats.dead.fetch_add(1, Ordering::Relaxed);
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        self.analytics.record_failed(channel.as_str(), &last_error);

        let error = format!("All {} attempts failed: {last_error}", max_attempts + 1);
        tracing::error!(message_id = %message.id, "message moved to dead-letter queue after {} attempts", max_attempts + 1);

        self.dead_letter_queue.lock().push(DeadLetterEntry::new(message.clone(), last_error, max_attempts));

        SendResult {
            success: false,
            message_id: message.id,
            channel,
            response: None,
            error: Some(error),
            retry_count: max_attempts,
        }
    }

    /// One per-channel copy of the message per requested channel. `total` is
    /// incremented exactly once per copy, inside `route()` — never again
    /// here, to avoid counting each broadcast target twice.
    pub async fn broadcast(&self, message: &Message, channels: &[Channel]) -> Vec<SendResult> {
        let mut results = Vec::with_capacity(channels.len());
        for &channel in channels {
            let target_key = format!("target:{}", channel.as_str());
            let target = message
                .metadata
                .get(&target_key)
                .and_then(|v| v.as_str())
                .unwrap_or(&message.target)
                .to_string();

            let mut copy = Message::new(message.from_channel, channel, message.content.clone(), target);
            copy.attachments = message.attachments.clone();
            copy.metadata = message.metadata.clone();
            copy.priority = message.priority;
            copy.template_name = message.template_name.clone();
            copy.template_vars = message.template_vars.clone();
            copy.max_retries = message.max_retries;

            results.push(self.route(copy).await);
        }
        results
    }

    pub fn get_dead_letters(&self, limit: usize) -> Vec<Value> {
        let dlq = self.dead_letter_queue.lock();
        let start = dlq.len().saturating_sub(limit);
        dlq[start..].iter().map(|e| Value::Object(e.to_map())).collect()
    }

    pub fn clear_dead_letters(&self) -> usize {
        let mut dlq = self.dead_letter_queue.lock();
        let count = dlq.len();
        dlq.clear();
        count
    }

    pub async fn retry_dead_letter(&self, index: usize) -> Result<SendResult, RouterError> {
        let entry = {
            let mut dlq = self.dead_letter_queue.lock();
            if index >= dlq.len() {
                return Err(RouterError::DeadLetterIndexOutOfRange(index));
            }
            dlq.remove(index)
        };
        let mut message = entry.message;
        message.status = MessageStatus::Pending;
        message.retry_count = 0;
        Ok(self.route(message).await)
    }

    pub fn stats(&self) -> Value {
        let by_channel: HashMap<String, u64> = self.stats.sent_by_channel.lock().clone();
        json!({
            "total": self.stats.total.load(Ordering::Relaxed),
            "sent": self.stats.sent.load(Ordering::Relaxed),
            "errors": self.stats.errors.load(Ordering::Relaxed),
            "dead_letters": self.dead_letter_queue.lock().len(),
            "rules_count": self.rules.lock().len(),
            "channels": self.handlers.lock().keys().map(|c| c.as_str()).collect::<Vec<_>>(),
            "by_channel": by_channel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct AlwaysFail;
    #[async_trait]
    impl ChannelAdapter for AlwaysFail {
        fn enabled(&self) -> bool {
            true
        }
        async fn validate(&self) -> bool {
            true
        }
        async fn send(&self, message: &Message) -> SendResult {
            SendResult::err(&message.id, Channel::Webhook, "boom")
        }
    }

    struct CountingThenSucceed {
        calls: AtomicUsize,
        succeed_on: usize,
    }
    #[async_trait]
    impl ChannelAdapter for CountingThenSucceed {
        fn enabled(&self) -> bool {
            true
        }
        async fn validate(&self) -> bool {
            true
        }
        async fn send(&self, message: &Message) -> SendResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n + 1 >= self.succeed_on {
                SendResult::ok(&message.id, Channel::Webhook, json!({}))
            } else {
                SendResult::err(&message.id, Channel::Webhook, "not yet")
            }
        }
    }

    fn engine() -> RoutingEngine {
        RoutingEngine::new(
            3,
            0.001,
            Arc::new(RateLimiter::with_defaults()),
            Arc::new(AnalyticsCollector::with_default_window()),
        )
    }

    #[tokio::test]
    async fn exhausting_retries_parks_message_in_dead_letter_queue() {
        let engine = engine();
        engine.register_channel(Channel::Webhook, Arc::new(AlwaysFail));
        let msg = Message::new(Channel::Webhook, Channel::Webhook, "hi", "http://x");
        let result = engine.route(msg).await;
        assert!(!result.success);
        assert_eq!(engine.get_dead_letters(10).len(), 1);
    }

    #[tokio::test]
    async fn succeeds_after_retrying_a_flaky_adapter() {
        let engine = engine();
        engine.register_channel(
            Channel::Webhook,
            Arc::new(CountingThenSucceed { calls: AtomicUsize::new(0), succeed_on: 2 }),
        );
        let msg = Message::new(Channel::Webhook, Channel::Webhook, "hi", "http://x");
        let result = engine.route(msg).await;
        assert!(result.success);
        assert_eq!(result.retry_count, 1);
    }

    #[tokio::test]
    async fn missing_handler_fails_without_retry() {
        let engine = engine();
        let msg = Message::new(Channel::Webhook, Channel::Discord, "hi", "x");
        let result = engine.route(msg).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("No handler"));
    }

    #[tokio::test]
    async fn broadcast_increments_total_once_per_channel_not_twice() {
        let engine = engine();
        engine.register_channel(Channel::Webhook, Arc::new(AlwaysFail));
        let msg = Message::new(Channel::Webhook, Channel::Webhook, "hi", "http://x");
        engine.broadcast(&msg, &[Channel::Webhook, Channel::Webhook]).await;
        assert_eq!(engine.stats()["total"], 2);
    }
}
